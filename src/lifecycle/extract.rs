//! Bundle extraction pipelines: decompression filter → archive reader →
//! destination directory.
//!
//! Each pipeline runs on the blocking pool; the orchestrator schedules the
//! two bundles in parallel and joins them before proceeding.

use std::sync::Arc;
use std::time::Instant;

use flate2::read::GzDecoder;
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveReader;
use crate::config::Settings;
use crate::errors::{SearchboxError, SearchboxResult};

/// The two bundles shipped with an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BundleKind {
    /// Support runtime (the bundled JRE), extracted to `jvm_home`.
    Runtime,
    /// Engine distribution, extracted to `engine_home`.
    Engine,
}

impl BundleKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            BundleKind::Runtime => "runtime",
            BundleKind::Engine => "engine",
        }
    }
}

/// Decompress and unpack one bundle into its destination directory.
///
/// The cancellation token is threaded down to the per-entry check inside the
/// archive reader.
pub(crate) async fn extract_bundle(
    settings: Arc<Settings>,
    kind: BundleKind,
    cancel: CancellationToken,
) -> SearchboxResult<()> {
    tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        let source = match kind {
            BundleKind::Runtime => settings.runtime_bundle()?,
            BundleKind::Engine => settings.engine_bundle()?,
        };
        let destination = match kind {
            BundleKind::Runtime => settings.jvm_home(),
            BundleKind::Engine => settings.engine_home(),
        };
        std::fs::create_dir_all(&destination)?;

        let raw = source.open()?;
        let mut reader = ArchiveReader::new(GzDecoder::new(raw));
        let entries = reader.extract_to_directory(&destination, &cancel)?;

        let elapsed = started.elapsed();
        settings.log(&format!(
            "Extracted {} ({entries} entries) in {:.2} seconds",
            kind.name(),
            elapsed.as_secs_f64()
        ));
        tracing::debug!(
            bundle = kind.name(),
            entries,
            elapsed_ms = elapsed.as_millis() as u64,
            "bundle extracted"
        );
        Ok(())
    })
    .await
    .map_err(|e| SearchboxError::Internal(format!("extraction task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveWriter;
    use crate::config::BundleSource;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    pub(crate) fn gzipped_bundle(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ArchiveWriter::new(Vec::new());
        for (name, content) in entries {
            writer.add_bytes(name, content).unwrap();
        }
        let packed = writer.into_inner().unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&packed).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn decompresses_and_extracts_into_destination() {
        let mut settings = Settings::new();
        settings.set_engine_bundle(BundleSource::Bytes(gzipped_bundle(&[
            ("bin/elasticsearch-plugin", b"#!/bin/sh\n"),
            ("lib/engine.jar", &[0xCA, 0xFE]),
        ])));
        let settings = Arc::new(settings);

        extract_bundle(
            Arc::clone(&settings),
            BundleKind::Engine,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let home = settings.engine_home();
        assert_eq!(
            std::fs::read(home.join("bin/elasticsearch-plugin")).unwrap(),
            b"#!/bin/sh\n"
        );
        assert_eq!(std::fs::read(home.join("lib/engine.jar")).unwrap(), [0xCA, 0xFE]);

        std::fs::remove_dir_all(settings.root()).unwrap();
    }

    #[tokio::test]
    async fn unset_bundle_fails_with_config_error() {
        let settings = Arc::new(Settings::new());
        let err = extract_bundle(
            Arc::clone(&settings),
            BundleKind::Runtime,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SearchboxError::Config(_)), "got {err}");
        let _ = std::fs::remove_dir_all(settings.root());
    }
}
