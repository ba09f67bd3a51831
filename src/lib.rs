//! Embed a search engine inside your process for integration testing.
//!
//! Searchbox unpacks a bundled Java runtime and engine distribution into a
//! throwaway temporary directory, boots the engine as a child process on a
//! random loopback port, waits for its health endpoint, installs any
//! configured plugins, and hands you the URL. Disposal kills the process and
//! deletes every trace from disk.
//!
//! ```no_run
//! use searchbox::{BundleSource, Searchbox};
//!
//! # async fn run() -> searchbox::SearchboxResult<()> {
//! let engine = Searchbox::launch(|settings| {
//!     settings
//!         .set_runtime_bundle(BundleSource::File("jre-bundle.gz".into()))
//!         .set_engine_bundle(BundleSource::File("engine-bundle.gz".into()))
//!         .set_cluster_name("it-tests");
//! });
//!
//! engine.ready().await?;
//! let url = engine.url()?;
//! // ... point your client at `url` ...
//!
//! engine.dispose().await;
//! # Ok(())
//! # }
//! ```
//!
//! Startup runs in the background from the moment [`Searchbox::launch`]
//! returns; [`Searchbox::ready`] (or [`Searchbox::ready_blocking`] outside
//! async contexts) is the single rendezvous point for success or failure.

pub mod archive;
pub mod config;
pub mod errors;

mod health;
mod lifecycle;
mod process;
mod util;

pub use config::{BundleSource, Plugin, Settings};
pub use errors::{SearchboxError, SearchboxResult};
pub use lifecycle::{LifecycleState, Searchbox};
pub use process::{LogSink, ProcessDescriptor, ProcessWrapper};
