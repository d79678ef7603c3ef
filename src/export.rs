//! Export service: offline render + WAV encode off the caller's thread,
//! and timestamped file output.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::EngineConfig;
use crate::dsp::renderer::{RenderRequest, RenderedBuffer, render_pattern};
use crate::dsp::wav::encode_wav;
use crate::error::ExportError;

/// File name prefix for exported patterns.
pub const FILE_PREFIX: &str = "drum-pattern";

/// Clears the in-progress flag however the export ends.
struct InProgress(Arc<AtomicBool>);

impl InProgress {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, ExportError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ExportError::Busy)?;
        Ok(InProgress(Arc::clone(flag)))
    }
}

impl Drop for InProgress {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs one export at a time.
#[derive(Debug, Clone)]
pub struct Exporter {
    config: Arc<EngineConfig>,
    exporting: Arc<AtomicBool>,
}

impl Exporter {
    pub fn new(config: EngineConfig) -> Self {
        Exporter {
            config: Arc::new(config),
            exporting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_exporting(&self) -> bool {
        self.exporting.load(Ordering::Acquire)
    }

    /// Render the request without blocking the async runtime.
    pub async fn render(&self, request: RenderRequest) -> Result<RenderedBuffer, ExportError> {
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || render_pattern(&config, &request))
            .await
            .map_err(|e| ExportError::Render(e.to_string()))
    }

    /// Render and encode to WAV bytes. Fails with `Busy` while another
    /// export is running; never yields a partial file.
    pub async fn export_wav(&self, request: RenderRequest) -> Result<Vec<u8>, ExportError> {
        let _guard = InProgress::acquire(&self.exporting)?;
        log::info!(
            "exporting {} bars at {} BPM",
            self.config.export_bars,
            request.bpm
        );
        let config = Arc::clone(&self.config);
        let result = tokio::task::spawn_blocking(move || {
            let buffer = render_pattern(&config, &request);
            encode_wav(&buffer).map_err(ExportError::from)
        })
        .await
        .map_err(|e| ExportError::Render(e.to_string()))
        .and_then(|encoded| encoded);

        match &result {
            Ok(bytes) => log::info!("export finished: {} bytes", bytes.len()),
            Err(e) => log::error!("export failed: {e}"),
        }
        result
    }

    /// Export and write the result into `dir`. Returns the file path.
    pub async fn export_to_dir(&self, request: RenderRequest, dir: &Path) -> Result<PathBuf, ExportError> {
        let bytes = self.export_wav(request).await?;
        write_export(dir, &bytes).await
    }
}

/// `drum-pattern-YYYYmmdd-HHMMSS.wav` for the current local time.
pub fn export_file_name() -> String {
    format!("{FILE_PREFIX}-{}.wav", chrono::Local::now().format("%Y%m%d-%H%M%S"))
}

/// Write WAV bytes to a new timestamped file in `dir`.
pub async fn write_export(dir: &Path, bytes: &[u8]) -> Result<PathBuf, ExportError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(export_file_name());
    tokio::fs::write(&path, bytes).await?;
    log::info!("wrote {}", path.display());
    Ok(path)
}
