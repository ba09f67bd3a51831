//! Lifecycle orchestration for the embedded engine.
//!
//! ## Architecture
//!
//! [`Searchbox::launch`] spawns a background startup task and returns
//! immediately; callers wait on the readiness handle:
//!
//! ```text
//! Created
//!   │
//! Extracting      runtime bundle ──┐   (parallel; first error fails both)
//!                 engine bundle  ──┤
//!                   └─ config write┘   (strictly after the engine bundle)
//!   │
//! Starting        spawn bundled-JRE java with the pre-built argument string
//!   │
//! AwaitingHealth  poll /_cluster/health every 100 ms until 200 or timeout
//!   │
//! InstallingPlugin*  per plugin: install → restart → health re-wait
//!   │
//! Ready
//! ```
//!
//! `Failed` is reachable from any non-terminal state and is replayed to every
//! later readiness query. [`Searchbox::dispose`] cancels whatever is in
//! flight, stops the process, deletes the temporary root, and is idempotent;
//! `Drop` is a defensive fallback only.

mod extract;
mod plugins;
mod state;

pub use state::LifecycleState;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Plugin, Settings};
use crate::errors::{SearchboxError, SearchboxResult};
use crate::health;
use crate::process::{ProcessDescriptor, ProcessWrapper};
use extract::BundleKind;
use plugins::EngineControl;

/// An embedded search engine instance.
///
/// Construction starts the whole bootstrap in the background. Use
/// [`Searchbox::ready`] (async) or [`Searchbox::ready_blocking`] to wait for
/// it to become serviceable, and [`Searchbox::dispose`] to tear it down.
pub struct Searchbox {
    settings: Arc<Settings>,
    state_tx: Arc<watch::Sender<LifecycleState>>,
    state_rx: watch::Receiver<LifecycleState>,
    process: Arc<Mutex<Option<ProcessWrapper>>>,
    cancel: CancellationToken,
    startup: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

/// Everything the background startup task needs.
struct StartupCtx {
    settings: Arc<Settings>,
    state_tx: Arc<watch::Sender<LifecycleState>>,
    process: Arc<Mutex<Option<ProcessWrapper>>>,
    cancel: CancellationToken,
}

impl Searchbox {
    /// Launch with default settings adjusted by `configure`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn launch(configure: impl FnOnce(&mut Settings)) -> Self {
        Self::launch_with(configure, CancellationToken::new())
    }

    /// Launch with an outer cancellation token threaded through the entire
    /// startup sequence. Firing it aborts extraction, start, health waits,
    /// and plugin installs; the result surfaces as plain cancellation, never
    /// as a timeout.
    pub fn launch_with(
        configure: impl FnOnce(&mut Settings),
        cancel: CancellationToken,
    ) -> Self {
        let mut settings = Settings::new();
        configure(&mut settings);
        let settings = Arc::new(settings);

        let (state_tx, state_rx) = watch::channel(LifecycleState::Created);
        let state_tx = Arc::new(state_tx);
        let process: Arc<Mutex<Option<ProcessWrapper>>> = Arc::new(Mutex::new(None));

        let ctx = StartupCtx {
            settings: Arc::clone(&settings),
            state_tx: Arc::clone(&state_tx),
            process: Arc::clone(&process),
            cancel: cancel.clone(),
        };
        let startup = tokio::spawn(run_startup(ctx));

        Self {
            settings,
            state_tx,
            state_rx,
            process,
            cancel,
            startup: Mutex::new(Some(startup)),
            disposed: AtomicBool::new(false),
        }
    }

    /// Suspend until the instance is serviceable.
    ///
    /// Settles exactly once per outcome: `Ok` on `Ready`, the startup failure
    /// on `Failed` (replayed identically to every later call), or
    /// [`SearchboxError::Disposed`] once disposed.
    pub async fn ready(&self) -> SearchboxResult<&Self> {
        let mut rx = self.state_rx.clone();
        let settled = rx
            .wait_for(LifecycleState::is_settled)
            .await
            .map_err(|_| SearchboxError::Internal("lifecycle channel closed".into()))?
            .clone();
        match settled {
            LifecycleState::Ready => Ok(self),
            LifecycleState::Failed { reason } => Err(SearchboxError::Startup(reason)),
            LifecycleState::Disposed => Err(SearchboxError::Disposed),
            other => Err(SearchboxError::Internal(format!(
                "unexpected settled state {other}"
            ))),
        }
    }

    /// Blocking equivalent of [`Searchbox::ready`]; a thin wrapper over the
    /// same readiness handle, so both accessors observe the same outcome.
    pub fn ready_blocking(&self) -> SearchboxResult<&Self> {
        futures::executor::block_on(self.ready())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state_rx.borrow().clone()
    }

    /// The engine's bound address. Fixed after `Ready`.
    pub fn url(&self) -> SearchboxResult<String> {
        self.settings.url()
    }

    /// Read-only settings view. Does not change after `Ready`.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Stop and start the engine process, then re-run the health wait.
    /// Usable after readiness, e.g. when external configuration changed.
    pub async fn restart(&self) -> SearchboxResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SearchboxError::Disposed);
        }
        replace_engine_process(&self.settings, &self.process, &self.cancel).await?;
        let url = self.settings.url()?;
        health::wait_for_healthy(&url, self.settings.start_timeout(), &self.cancel).await
    }

    /// Tear the instance down: cancel any in-flight startup, stop the engine
    /// process, and recursively delete the temporary root. Safe and complete
    /// from any state, idempotent under repeated invocation. Failures during
    /// teardown are logged and swallowed.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        // Quiesce the startup task before touching shared state.
        let startup = self.startup.lock().await.take();
        if let Some(handle) = startup {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "startup task did not shut down cleanly");
            }
        }

        if let Some(mut wrapper) = self.process.lock().await.take() {
            wrapper.dispose().await;
        }

        let root = self.settings.root().to_path_buf();
        let removed = tokio::task::spawn_blocking(move || remove_root(&root)).await;
        if let Err(e) = removed {
            tracing::warn!(error = %e, "temporary root cleanup task failed");
        }

        let _ = self.state_tx.send(LifecycleState::Disposed);
        self.settings.log("Disposed");
    }
}

impl fmt::Debug for Searchbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Searchbox")
            .field("settings", &self.settings)
            .field("state", &*self.state_rx.borrow())
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for Searchbox {
    // Last-resort cleanup; dispose() is the supported teardown path.
    fn drop(&mut self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        if let Ok(mut guard) = self.process.try_lock() {
            // ProcessWrapper::drop issues the kill.
            guard.take();
        }
        remove_root(self.settings.root());
    }
}

async fn run_startup(ctx: StartupCtx) {
    match drive_startup(&ctx).await {
        Ok(()) => {
            let _ = ctx.state_tx.send(LifecycleState::Ready);
        }
        Err(err) => {
            tracing::warn!(error = %err, "engine startup failed");
            ctx.settings.log(&format!("Startup failed: {err}"));
            // Never clobber Disposed: teardown may already have run.
            ctx.state_tx.send_if_modified(|state| {
                if *state == LifecycleState::Disposed {
                    return false;
                }
                *state = LifecycleState::Failed {
                    reason: err.to_string(),
                };
                true
            });
        }
    }
}

async fn drive_startup(ctx: &StartupCtx) -> SearchboxResult<()> {
    let started = Instant::now();
    let settings = &ctx.settings;
    settings.log(&format!(
        "Starting embedded engine {}",
        settings.engine_version()
    ));

    publish(&ctx.state_tx, LifecycleState::Extracting);
    // A failed pipeline stops its sibling at the next entry boundary via a
    // shared child token, and both pipelines are always joined before this
    // phase ends: no blocking task may outlive it, or disposal could race a
    // straggler that re-creates files under the deleted root.
    let pipeline_cancel = ctx.cancel.child_token();
    let runtime_task = {
        let settings = Arc::clone(settings);
        let token = pipeline_cancel.clone();
        async move {
            let result =
                extract::extract_bundle(settings, BundleKind::Runtime, token.clone()).await;
            if result.is_err() {
                token.cancel();
            }
            result
        }
    };
    let engine_task = {
        let settings = Arc::clone(settings);
        let token = pipeline_cancel.clone();
        async move {
            let result = async {
                extract::extract_bundle(Arc::clone(&settings), BundleKind::Engine, token.clone())
                    .await?;
                // Config materialization is chained strictly after the engine
                // bundle; it does not wait for the runtime bundle.
                let writer = Arc::clone(&settings);
                tokio::task::spawn_blocking(move || writer.write_config_files())
                    .await
                    .map_err(|e| {
                        SearchboxError::Internal(format!("config write task failed: {e}"))
                    })??;
                Ok::<(), SearchboxError>(())
            }
            .await;
            if result.is_err() {
                token.cancel();
            }
            result
        }
    };
    match tokio::join!(runtime_task, engine_task) {
        (Ok(()), Ok(())) => {}
        (Err(e), Ok(())) | (Ok(()), Err(e)) => return Err(e),
        // Surface the root failure, not the sibling's induced cancellation.
        (Err(a), Err(b)) => return Err(if a.is_cancelled() { b } else { a }),
    }
    settings.log(&format!(
        "Environment ready after {:.1} seconds",
        started.elapsed().as_secs_f64()
    ));

    if ctx.cancel.is_cancelled() {
        return Err(SearchboxError::Cancelled);
    }

    publish(&ctx.state_tx, LifecycleState::Starting);
    replace_engine_process(settings, &ctx.process, &ctx.cancel).await?;
    settings.log("Process started");

    publish(&ctx.state_tx, LifecycleState::AwaitingHealth);
    let url = settings.url()?;
    health::wait_for_healthy(&url, settings.start_timeout(), &ctx.cancel).await?;
    settings.log(&format!(
        "Engine healthy after {:.1} seconds",
        started.elapsed().as_secs_f64()
    ));

    let configured = settings.plugins();
    if !configured.is_empty() {
        let state_tx = Arc::clone(&ctx.state_tx);
        let mut control = LiveEngineControl { ctx, url };
        plugins::run_install_cycles(configured, &mut control, move |plugin| {
            let _ = state_tx.send(LifecycleState::InstallingPlugin {
                name: plugin.name.clone(),
            });
        })
        .await?;
        settings.log("Installed plugins");
    }

    Ok(())
}

fn publish(state_tx: &watch::Sender<LifecycleState>, state: LifecycleState) {
    tracing::debug!(state = %state, "lifecycle transition");
    let _ = state_tx.send(state);
}

/// Launch parameters for the main engine process: the bundled runtime's
/// `java`, the engine home as working directory, and a `JAVA_HOME` override
/// pointing at the bundled runtime.
fn engine_descriptor(settings: &Settings, arguments: String) -> ProcessDescriptor {
    let java = settings
        .jvm_home()
        .join("bin")
        .join(if cfg!(windows) { "java.exe" } else { "java" });
    let mut env_overrides = HashMap::new();
    env_overrides.insert(
        "JAVA_HOME".to_string(),
        settings.jvm_home().display().to_string(),
    );
    ProcessDescriptor {
        executable: java,
        working_dir: settings.engine_home(),
        arguments,
        env_overrides,
    }
}

/// Stop the current supervisor (if any) and install a fresh one. Supervisors
/// are replaced, not reused, across restarts.
async fn replace_engine_process(
    settings: &Arc<Settings>,
    process: &Mutex<Option<ProcessWrapper>>,
    cancel: &CancellationToken,
) -> SearchboxResult<()> {
    let mut guard = process.lock().await;
    if let Some(mut old) = guard.take() {
        old.stop().await?;
    }
    let mut wrapper = ProcessWrapper::new(
        engine_descriptor(settings, settings.build_command_line()),
        settings.engine_log_sink(),
    );
    wrapper.start(cancel).await?;
    *guard = Some(wrapper);
    Ok(())
}

/// [`EngineControl`] backed by the live process and health probe.
struct LiveEngineControl<'a> {
    ctx: &'a StartupCtx,
    url: String,
}

#[async_trait]
impl EngineControl for LiveEngineControl<'_> {
    async fn install_plugin(&mut self, plugin: &Plugin) -> SearchboxResult<()> {
        let settings = &self.ctx.settings;
        settings.log(&format!("Installing plugin {}...", plugin.name));

        let bin_dir = settings.engine_home().join("bin");
        let tool = bin_dir.join(if cfg!(windows) {
            "elasticsearch-plugin.bat"
        } else {
            "elasticsearch-plugin"
        });
        let mut env_overrides = HashMap::new();
        env_overrides.insert(
            "JAVA_HOME".to_string(),
            settings.jvm_home().display().to_string(),
        );
        let descriptor = ProcessDescriptor {
            executable: tool,
            working_dir: bin_dir,
            arguments: plugin.install_arguments(),
            env_overrides,
        };

        let mut installer = ProcessWrapper::new(descriptor, settings.engine_log_sink());
        installer.start(&self.ctx.cancel).await?;

        let status = tokio::select! {
            _ = self.ctx.cancel.cancelled() => {
                installer.dispose().await;
                return Err(SearchboxError::Cancelled);
            }
            status = installer.wait_for_exit() => status?,
        };
        if !status.success() {
            return Err(SearchboxError::PluginInstall {
                plugin: plugin.name.clone(),
                reason: format!("installer exited with {status}"),
            });
        }
        settings.log(&format!("Plugin {} installed", plugin.name));
        Ok(())
    }

    async fn restart_engine(&mut self) -> SearchboxResult<()> {
        replace_engine_process(&self.ctx.settings, &self.ctx.process, &self.ctx.cancel).await
    }

    async fn await_healthy(&mut self) -> SearchboxResult<()> {
        health::wait_for_healthy(
            &self.url,
            self.ctx.settings.start_timeout(),
            &self.ctx.cancel,
        )
        .await
    }
}

fn remove_root(root: &std::path::Path) {
    if !root.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(root) {
        tracing::warn!(root = %root.display(), error = %e, "failed to delete temporary root");
    }
}
