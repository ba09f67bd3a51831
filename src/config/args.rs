//! Declarative JVM argument table and command-line assembly.
//!
//! Arguments come from a fixed `(template, value)` table rendered by a pure
//! function; no runtime introspection is involved. The orchestrator only
//! consumes the finished string, built once before process start.

use super::Settings;

/// Default JVM arguments for the embedded engine. `{}` in a template is
/// replaced with the paired value; templates without a placeholder are
/// emitted verbatim.
pub(crate) const DEFAULT_JVM_ARGUMENTS: &[(&str, &str)] = &[
    ("-Xms{}m", "128"),
    ("-Xmx{}m", "128"),
    ("-XX:+UseConcMarkSweepGC", ""),
    ("-XX:CMSInitiatingOccupancyFraction={}", "75"),
    ("-XX:+UseCMSInitiatingOccupancyOnly", ""),
    ("-XX:+HeapDumpOnOutOfMemoryError", ""),
    ("-XX:+DisableExplicitGC", ""),
    ("-Djava.awt.headless={}", "true"),
    ("-Dfile.encoding={}", "UTF-8"),
];

pub(crate) fn render(template: &str, value: &str) -> String {
    if template.contains("{}") {
        template.replace("{}", value)
    } else {
        template.to_string()
    }
}

pub(crate) fn default_jvm_arguments() -> Vec<String> {
    DEFAULT_JVM_ARGUMENTS
        .iter()
        .map(|(template, value)| render(template, value))
        .collect()
}

/// Build the single argument string handed to the JVM: the configured JVM
/// arguments, the engine home property, the engine classpath, and the
/// bootstrap class.
pub(crate) fn build_command_line(settings: &Settings) -> String {
    let classpath_sep = if cfg!(windows) { ';' } else { ':' };
    format!(
        "{} -Des.path.home=\"{}\" -cp \"lib/elasticsearch-{}.jar{}lib/*\" \"org.elasticsearch.bootstrap.Elasticsearch\"",
        settings.jvm_arguments().join(" "),
        settings.engine_home().display(),
        settings.engine_version(),
        classpath_sep,
    )
}
