//! Supervision of a single external process.
//!
//! [`ProcessWrapper`] owns exactly one child process at a time. It spawns the
//! process from a [`ProcessDescriptor`], forwards each stdout/stderr line to
//! a caller-supplied [`LogSink`] (interleaving between the two streams is not
//! ordered), kills-and-waits on stop, and registers a cancellation token so
//! that firing it tears the process down. `Drop` only acts as a last-resort
//! kill; [`ProcessWrapper::dispose`] is the supported teardown path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::errors::{SearchboxError, SearchboxResult};
use crate::util;

/// Sink for pre-formatted process output lines.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Launch parameters for a supervised process.
///
/// `arguments` is a single pre-built string (see
/// [`crate::Settings::build_command_line`]); it is split into discrete
/// arguments with a minimal quote-aware splitter at spawn time.
///
/// Environment overrides replace inherited variables: the inherited entry is
/// explicitly removed before the override is inserted.
#[derive(Debug, Clone)]
pub struct ProcessDescriptor {
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    pub arguments: String,
    pub env_overrides: HashMap<String, String>,
}

/// Owns the full lifecycle of one external process.
pub struct ProcessWrapper {
    descriptor: ProcessDescriptor,
    logger: LogSink,
    child: Option<Child>,
    cancel_watch: Option<tokio::task::JoinHandle<()>>,
}

impl ProcessWrapper {
    pub fn new(descriptor: ProcessDescriptor, logger: LogSink) -> Self {
        Self {
            descriptor,
            logger,
            child: None,
            cancel_watch: None,
        }
    }

    /// Spawn the process and begin streaming its output.
    ///
    /// Firing `cancel` after this returns force-kills the process. Fails with
    /// [`SearchboxError::Launch`] when the OS cannot start it.
    pub async fn start(&mut self, cancel: &CancellationToken) -> SearchboxResult<()> {
        if self.child.is_some() {
            return Err(SearchboxError::Internal(
                "process already running; stop it before starting again".into(),
            ));
        }

        let mut cmd = Command::new(&self.descriptor.executable);
        cmd.args(split_arguments(&self.descriptor.arguments))
            .current_dir(&self.descriptor.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.descriptor.env_overrides {
            // Drop the inherited entry first, then install the override.
            cmd.env_remove(key);
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| SearchboxError::Launch {
            executable: self.descriptor.executable.display().to_string(),
            source,
        })?;

        tracing::debug!(
            executable = %self.descriptor.executable.display(),
            pid = child.id(),
            "spawned supervised process"
        );

        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, Arc::clone(&self.logger));
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, Arc::clone(&self.logger));
        }

        let pid = child.id();
        self.child = Some(child);

        let token = cancel.clone();
        self.cancel_watch = Some(tokio::spawn(async move {
            token.cancelled().await;
            if let Some(pid) = pid {
                tracing::debug!(pid, "cancellation fired, killing supervised process");
                util::kill_process(pid);
            }
        }));

        Ok(())
    }

    /// Force-terminate the process and wait until exit is observed. No-op
    /// when already stopped.
    pub async fn stop(&mut self) -> SearchboxResult<()> {
        if let Some(watch) = self.cancel_watch.take() {
            watch.abort();
        }
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match child.start_kill() {
            Ok(()) => {}
            // Already exited.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e.into()),
        }
        child.wait().await?;
        Ok(())
    }

    /// Stop then start. Service health after the restart is the caller's
    /// concern.
    pub async fn restart(&mut self, cancel: &CancellationToken) -> SearchboxResult<()> {
        self.stop().await?;
        self.start(cancel).await
    }

    /// Wait for the process to exit on its own, returning its status.
    pub async fn wait_for_exit(&mut self) -> SearchboxResult<ExitStatus> {
        let Some(child) = self.child.as_mut() else {
            return Err(SearchboxError::Internal("no running process to wait for".into()));
        };
        let status = child.wait().await?;
        self.child = None;
        if let Some(watch) = self.cancel_watch.take() {
            watch.abort();
        }
        Ok(status)
    }

    /// Best-effort stop. Secondary failures are logged and swallowed, never
    /// re-thrown; safe to call repeatedly.
    pub async fn dispose(&mut self) {
        if let Err(e) = self.stop().await {
            tracing::warn!(error = %e, "failed to stop supervised process during dispose");
            (self.logger)(&format!("failed to stop process: {e}"));
        }
    }

    /// True while a child process handle is held.
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }
}

impl Drop for ProcessWrapper {
    // Last-resort safety net; dispose() is the primary teardown path.
    fn drop(&mut self) {
        if let Some(watch) = self.cancel_watch.take() {
            watch.abort();
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

fn forward_lines<R>(stream: R, logger: LogSink)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            logger(&line);
        }
    });
}

/// Split a single command-line string into discrete arguments. Double quotes
/// group whitespace-containing tokens; the quotes themselves are dropped.
pub(crate) fn split_arguments(raw: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for ch in raw.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    fn capturing_sink() -> (LogSink, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&lines);
        let sink: LogSink = Arc::new(move |line: &str| {
            captured.lock().unwrap().push(line.to_string());
        });
        (sink, lines)
    }

    fn sh_descriptor(script: &str) -> ProcessDescriptor {
        ProcessDescriptor {
            executable: "sh".into(),
            working_dir: std::env::temp_dir(),
            arguments: format!("-c \"{script}\""),
            env_overrides: HashMap::new(),
        }
    }

    async fn wait_for_line(lines: &Arc<Mutex<Vec<String>>>, needle: &str) -> bool {
        for _ in 0..100 {
            if lines.lock().unwrap().iter().any(|l| l.contains(needle)) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[test]
    fn splits_plain_arguments() {
        assert_eq!(split_arguments("-Xms128m -Xmx128m"), vec!["-Xms128m", "-Xmx128m"]);
    }

    #[test]
    fn splits_quoted_arguments() {
        assert_eq!(
            split_arguments("-Des.path.home=\"/tmp/with space\" -cp \"lib/*\" run"),
            vec!["-Des.path.home=/tmp/with space", "-cp", "lib/*", "run"]
        );
    }

    #[test]
    fn splits_empty_string_to_nothing() {
        assert!(split_arguments("   ").is_empty());
    }

    #[tokio::test]
    async fn forwards_output_lines() {
        let (sink, lines) = capturing_sink();
        let mut wrapper = ProcessWrapper::new(sh_descriptor("echo supervised-line"), sink);
        let cancel = CancellationToken::new();

        wrapper.start(&cancel).await.unwrap();
        let status = wrapper.wait_for_exit().await.unwrap();
        assert!(status.success());
        assert!(wait_for_line(&lines, "supervised-line").await);
    }

    #[tokio::test]
    async fn applies_env_overrides() {
        let (sink, lines) = capturing_sink();
        let mut descriptor = sh_descriptor("echo home=$SEARCHBOX_TEST_HOME");
        descriptor
            .env_overrides
            .insert("SEARCHBOX_TEST_HOME".into(), "from-override".into());
        let mut wrapper = ProcessWrapper::new(descriptor, sink);

        wrapper.start(&CancellationToken::new()).await.unwrap();
        wrapper.wait_for_exit().await.unwrap();
        assert!(wait_for_line(&lines, "home=from-override").await);
    }

    #[tokio::test]
    async fn stop_kills_and_is_idempotent() {
        let (sink, _lines) = capturing_sink();
        let mut wrapper = ProcessWrapper::new(sh_descriptor("sleep 30"), sink);
        wrapper.start(&CancellationToken::new()).await.unwrap();

        let started = Instant::now();
        wrapper.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!wrapper.is_running());

        // Second stop is a no-op.
        wrapper.stop().await.unwrap();
    }

    #[tokio::test]
    async fn launch_failure_is_reported() {
        let (sink, _lines) = capturing_sink();
        let mut wrapper = ProcessWrapper::new(
            ProcessDescriptor {
                executable: "/nonexistent/searchbox-test-binary".into(),
                working_dir: std::env::temp_dir(),
                arguments: String::new(),
                env_overrides: HashMap::new(),
            },
            sink,
        );
        let err = wrapper.start(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SearchboxError::Launch { .. }), "got {err}");
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let (sink, _lines) = capturing_sink();
        let mut wrapper = ProcessWrapper::new(sh_descriptor("sleep 30"), sink);
        let cancel = CancellationToken::new();
        wrapper.start(&cancel).await.unwrap();

        cancel.cancel();
        let started = Instant::now();
        let status = wrapper.wait_for_exit().await.unwrap();
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn restart_replaces_the_child() {
        let (sink, lines) = capturing_sink();
        let mut wrapper = ProcessWrapper::new(sh_descriptor("echo round"), sink);
        let cancel = CancellationToken::new();

        wrapper.start(&cancel).await.unwrap();
        wrapper.restart(&cancel).await.unwrap();
        wrapper.wait_for_exit().await.unwrap();
        assert!(wait_for_line(&lines, "round").await);
    }
}
