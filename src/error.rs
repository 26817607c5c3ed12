use crate::config::ConfigError;
use crate::render::RenderError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failures surfaced by the export and generation pipeline.
#[derive(Debug, Error)]
pub enum SketchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("remote generation failed: {message}{}", format_detail(.detail))]
    RemoteFailure {
        message: String,
        /// Transport-level detail when the failure was not reported by the service.
        detail: Option<String>,
    },
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("asset import failed: {0}")]
    ImportFailure(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("snapshot render failed: {0}")]
    Render(#[from] RenderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SketchError {
    pub fn remote(message: impl Into<String>) -> Self {
        SketchError::RemoteFailure {
            message: message.into(),
            detail: None,
        }
    }
}

fn format_detail(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|detail| format!(" ({detail})"))
        .unwrap_or_default()
}

pub type SketchResult<T> = Result<T, SketchError>;

/// Runs `future` unless `cancel` fires first. Cancellation wins ties so a
/// token set before the call never lets the operation start.
pub(crate) async fn cancellable<F, T>(cancel: &CancellationToken, future: F) -> SketchResult<T>
where
    F: Future<Output = SketchResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SketchError::Cancelled),
        result = future => result,
    }
}
