//! Ordered plugin install cycles.
//!
//! Each plugin runs a full cycle (install sub-invocation, engine restart,
//! health re-wait) to completion before the next plugin's cycle begins.
//! Cycles never overlap.

use async_trait::async_trait;

use crate::config::Plugin;
use crate::errors::SearchboxResult;

/// Seam between the plugin sequencing logic and the engine runtime
/// operations, so the ordering contract can be exercised without a live
/// process.
#[async_trait]
pub(crate) trait EngineControl {
    /// Run the engine's plugin tool for one plugin and wait for it to exit.
    async fn install_plugin(&mut self, plugin: &Plugin) -> SearchboxResult<()>;

    /// Full stop-then-start of the main engine process.
    async fn restart_engine(&mut self) -> SearchboxResult<()>;

    /// Re-run the health wait after a restart.
    async fn await_healthy(&mut self) -> SearchboxResult<()>;
}

/// Drive every configured plugin through its cycle, strictly in order. The
/// first failure aborts the remaining cycles.
pub(crate) async fn run_install_cycles<C, F>(
    plugins: &[Plugin],
    control: &mut C,
    mut on_cycle_start: F,
) -> SearchboxResult<()>
where
    C: EngineControl + Send,
    F: FnMut(&Plugin) + Send,
{
    for plugin in plugins {
        on_cycle_start(plugin);
        control.install_plugin(plugin).await?;
        control.restart_engine().await?;
        control.await_healthy().await?;
    }
    Ok(())
}
