//! Engine settings: the temporary root, bundle sources, engine parameters,
//! JVM arguments, plugins, logging, and config-file materialization.
//!
//! A [`Settings`] value is mutable only inside the configuration closure
//! passed to [`crate::Searchbox::launch`]; afterwards the orchestrator holds
//! it behind an `Arc` as a read-only view that does not change after the
//! instance becomes ready.

pub(crate) mod args;

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use crate::errors::{SearchboxError, SearchboxResult};
use crate::process::LogSink;

/// One embedded compressed resource: either bytes compiled into the host
/// program (`include_bytes!`) or a file shipped next to it.
#[derive(Clone)]
pub enum BundleSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

impl BundleSource {
    pub(crate) fn open(&self) -> SearchboxResult<Box<dyn Read + Send + '_>> {
        match self {
            BundleSource::Bytes(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
            BundleSource::File(path) => {
                let file = fs::File::open(path).map_err(|e| {
                    SearchboxError::Config(format!("cannot open bundle {}: {e}", path.display()))
                })?;
                Ok(Box::new(file))
            }
        }
    }
}

impl fmt::Debug for BundleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleSource::Bytes(bytes) => write!(f, "BundleSource::Bytes({} bytes)", bytes.len()),
            BundleSource::File(path) => write!(f, "BundleSource::File({})", path.display()),
        }
    }
}

/// A plugin to install before the instance becomes ready.
///
/// With a `url` the plugin is installed from that location, otherwise by
/// name. Plugins are installed strictly in registration order, each followed
/// by an engine restart and a fresh health wait.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub name: String,
    pub url: Option<String>,
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
        }
    }

    pub fn from_url(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
        }
    }

    pub(crate) fn install_arguments(&self) -> String {
        match &self.url {
            Some(url) => format!("install \"{url}\""),
            None => format!("install \"{}\"", self.name),
        }
    }
}

/// Configuration for one embedded engine instance.
pub struct Settings {
    root: PathBuf,
    engine_params: BTreeMap<String, String>,
    jvm_args: Vec<String>,
    logging_config: Vec<String>,
    plugins: Vec<Plugin>,
    engine_version: String,
    start_timeout: Duration,
    logging_enabled: bool,
    logger: LogSink,
    runtime_bundle: Option<BundleSource>,
    engine_bundle: Option<BundleSource>,
}

impl Settings {
    /// Defaults: a fresh randomly named temporary root, a random port in the
    /// dynamic range, cluster/node names derived from the port, the standard
    /// JVM argument table, and quieted discovery logging.
    pub fn new() -> Self {
        let port: u16 = rand::rng().random_range(49152..=65535);
        let root = std::env::temp_dir().join(format!("searchbox-{}", Uuid::new_v4().simple()));

        let mut settings = Self {
            root,
            engine_params: BTreeMap::new(),
            jvm_args: args::default_jvm_arguments(),
            logging_config: vec![
                "logger.zen.name = org.elasticsearch.discovery.zen.UnicastZenPing".into(),
                "logger.zen.level = error".into(),
                "logger.zen2.name = org.elasticsearch.discovery.zen.ping.unicast.UnicastZenPing"
                    .into(),
                "logger.zen2.level = error".into(),
            ],
            plugins: Vec::new(),
            engine_version: "7.0.0".into(),
            start_timeout: Duration::from_secs(60),
            logging_enabled: false,
            logger: Arc::new(|line: &str| tracing::info!(target: "searchbox::engine", "{line}")),
            runtime_bundle: None,
            engine_bundle: None,
        };
        settings
            .set_port(port)
            .set_cluster_name(format!("cluster-es-{port}"))
            .set_node_name(format!("node-es-{port}"));
        settings
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    /// Temporary root exclusively owned by this instance; deleted
    /// recursively on disposal.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Destination of the engine bundle.
    pub fn engine_home(&self) -> PathBuf {
        self.root.join("engine")
    }

    /// Destination of the support-runtime bundle.
    pub fn jvm_home(&self) -> PathBuf {
        self.root.join("jre")
    }

    // ------------------------------------------------------------------
    // Fluent configuration
    // ------------------------------------------------------------------

    /// HTTP port the engine binds to.
    pub fn set_port(&mut self, port: u16) -> &mut Self {
        self.set_engine_param("http.port", port.to_string())
    }

    pub fn port(&self) -> Option<u16> {
        self.engine_params.get("http.port")?.parse().ok()
    }

    /// The engine's expected bound address.
    pub fn url(&self) -> SearchboxResult<String> {
        let port = self
            .port()
            .ok_or_else(|| SearchboxError::Config("http.port has not been set".into()))?;
        Ok(format!("http://127.0.0.1:{port}"))
    }

    pub fn set_cluster_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.set_engine_param("cluster.name", name)
    }

    pub fn set_node_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.set_engine_param("node.name", name)
    }

    /// Set an arbitrary engine parameter, written to the engine's YAML
    /// configuration during extraction.
    pub fn set_engine_param(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.engine_params.insert(key.into(), value.into());
        self
    }

    pub fn add_jvm_argument(&mut self, arg: impl Into<String>) -> &mut Self {
        self.jvm_args.push(arg.into());
        self
    }

    pub(crate) fn jvm_arguments(&self) -> &[String] {
        &self.jvm_args
    }

    /// Append a line to the engine's logging properties file.
    pub fn add_logging_config(&mut self, line: impl Into<String>) -> &mut Self {
        self.logging_config.push(line.into());
        self
    }

    pub fn add_plugin(&mut self, plugin: Plugin) -> &mut Self {
        self.plugins.push(plugin);
        self
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    /// Engine distribution version; used to locate the bootstrap jar on the
    /// classpath.
    pub fn set_engine_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.engine_version = version.into();
        self
    }

    pub fn engine_version(&self) -> &str {
        &self.engine_version
    }

    /// Budget for each health wait (initial startup and every restart).
    pub fn set_start_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.start_timeout = timeout;
        self
    }

    pub fn start_timeout(&self) -> Duration {
        self.start_timeout
    }

    pub fn enable_logging(&mut self, enable: bool) -> &mut Self {
        self.logging_enabled = enable;
        self
    }

    /// Replace the default `tracing`-backed sink with a custom one. The sink
    /// is only invoked while logging is enabled.
    pub fn log_to(&mut self, logger: LogSink) -> &mut Self {
        self.logger = logger;
        self
    }

    pub fn set_runtime_bundle(&mut self, source: BundleSource) -> &mut Self {
        self.runtime_bundle = Some(source);
        self
    }

    pub fn set_engine_bundle(&mut self, source: BundleSource) -> &mut Self {
        self.engine_bundle = Some(source);
        self
    }

    // ------------------------------------------------------------------
    // Orchestrator-facing accessors
    // ------------------------------------------------------------------

    pub(crate) fn runtime_bundle(&self) -> SearchboxResult<&BundleSource> {
        self.runtime_bundle
            .as_ref()
            .ok_or_else(|| SearchboxError::Config("runtime bundle has not been configured".into()))
    }

    pub(crate) fn engine_bundle(&self) -> SearchboxResult<&BundleSource> {
        self.engine_bundle
            .as_ref()
            .ok_or_else(|| SearchboxError::Config("engine bundle has not been configured".into()))
    }

    pub(crate) fn log(&self, line: &str) {
        if self.logging_enabled {
            (self.logger)(line);
        }
    }

    /// Sink handed to supervised processes for their output. A no-op when
    /// logging is disabled.
    pub(crate) fn engine_log_sink(&self) -> LogSink {
        if self.logging_enabled {
            Arc::clone(&self.logger)
        } else {
            Arc::new(|_line: &str| {})
        }
    }

    /// The single argument string consumed by the process supervisor.
    pub fn build_command_line(&self) -> String {
        args::build_command_line(self)
    }

    /// Materialize generated configuration into the extracted engine tree:
    /// the parameter map replaces `config/elasticsearch.yml` wholesale, the
    /// logging lines are appended to `config/log4j2.properties`.
    pub(crate) fn write_config_files(&self) -> SearchboxResult<()> {
        let config_dir = self.engine_home().join("config");
        fs::create_dir_all(&config_dir)?;

        let mut yaml = String::new();
        for (key, value) in &self.engine_params {
            yaml.push_str(key);
            yaml.push_str(": ");
            yaml.push_str(value);
            yaml.push('\n');
        }
        fs::write(config_dir.join("elasticsearch.yml"), yaml)?;

        let mut properties = OpenOptions::new()
            .create(true)
            .append(true)
            .open(config_dir.join("log4j2.properties"))?;
        for line in &self.logging_config {
            writeln!(properties, "{line}")?;
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("root", &self.root)
            .field("engine_params", &self.engine_params)
            .field("jvm_args", &self.jvm_args.len())
            .field("plugins", &self.plugins)
            .field("engine_version", &self.engine_version)
            .field("start_timeout", &self.start_timeout)
            .field("logging_enabled", &self.logging_enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_derive_names_from_port() {
        let settings = Settings::new();
        let port = settings.port().expect("default port");
        assert!((49152..=65535).contains(&port));
        assert_eq!(
            settings.engine_params.get("cluster.name"),
            Some(&format!("cluster-es-{port}"))
        );
        assert_eq!(
            settings.engine_params.get("node.name"),
            Some(&format!("node-es-{port}"))
        );
        assert_eq!(settings.url().unwrap(), format!("http://127.0.0.1:{port}"));
    }

    #[test]
    fn roots_are_unique_per_instance() {
        let a = Settings::new();
        let b = Settings::new();
        assert_ne!(a.root(), b.root());
        assert!(a.root().starts_with(std::env::temp_dir()));
    }

    #[test]
    fn missing_bundles_are_a_config_error() {
        let settings = Settings::new();
        assert!(matches!(
            settings.runtime_bundle().unwrap_err(),
            SearchboxError::Config(_)
        ));
        assert!(matches!(
            settings.engine_bundle().unwrap_err(),
            SearchboxError::Config(_)
        ));
    }

    #[test]
    fn plugin_install_arguments() {
        assert_eq!(
            Plugin::new("analysis-icu").install_arguments(),
            "install \"analysis-icu\""
        );
        assert_eq!(
            Plugin::from_url("custom", "https://example.test/custom.zip").install_arguments(),
            "install \"https://example.test/custom.zip\""
        );
    }

    #[test]
    fn writes_yaml_and_appends_logging_config() {
        let mut settings = Settings::new();
        settings
            .set_port(4444)
            .set_cluster_name("test-cluster")
            .add_logging_config("logger.custom.level = warn");

        settings.write_config_files().unwrap();

        let config_dir = settings.engine_home().join("config");
        let yaml = std::fs::read_to_string(config_dir.join("elasticsearch.yml")).unwrap();
        assert!(yaml.contains("http.port: 4444"));
        assert!(yaml.contains("cluster.name: test-cluster"));

        let properties = std::fs::read_to_string(config_dir.join("log4j2.properties")).unwrap();
        assert!(properties.contains("logger.zen.level = error"));
        assert!(properties.contains("logger.custom.level = warn"));

        // Writing again replaces the yaml but appends the properties.
        settings.write_config_files().unwrap();
        let yaml_again = std::fs::read_to_string(config_dir.join("elasticsearch.yml")).unwrap();
        assert_eq!(yaml, yaml_again);

        std::fs::remove_dir_all(settings.root()).unwrap();
    }

    #[test]
    fn sink_is_noop_when_logging_disabled() {
        let hits = Arc::new(std::sync::Mutex::new(0u32));
        let counter = Arc::clone(&hits);
        let mut settings = Settings::new();
        settings.log_to(Arc::new(move |_line: &str| {
            *counter.lock().unwrap() += 1;
        }));

        settings.log("dropped");
        settings.engine_log_sink()("also dropped");
        assert_eq!(*hits.lock().unwrap(), 0);

        settings.enable_logging(true);
        settings.log("kept");
        settings.engine_log_sink()("kept too");
        assert_eq!(*hits.lock().unwrap(), 2);
    }
}
