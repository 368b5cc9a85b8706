//! Screenshot capture into an append-only directory.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::browser::BrowserSession;
use crate::error::StepError;

/// Where step screenshots go. A store without a directory skips capture.
#[derive(Debug, Clone, Default)]
pub struct ScreenshotStore {
    dir: Option<PathBuf>,
    seq: Arc<AtomicUsize>,
}

impl ScreenshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            seq: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// Capture the page and write it as
    /// `step_<run>_<action>_<millis>_<seq>.png`.
    ///
    /// A failing capture means the session is gone; a failing write only
    /// loses the image.
    pub async fn capture<S: BrowserSession>(
        &self,
        session: &S,
        run_stamp: &str,
        action: &str,
    ) -> Result<Option<String>, StepError> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };

        let png = session.screenshot().await.map_err(StepError::fault)?;

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let millis = chrono::Utc::now().timestamp_millis();
        let path = dir.join(format!(
            "step_{}_{}_{}_{}.png",
            run_stamp, action, millis, seq
        ));

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            tracing::warn!("Failed to create screenshot dir {:?}: {}", dir, e);
            return Ok(None);
        }
        match tokio::fs::write(&path, &png).await {
            Ok(()) => Ok(Some(path.to_string_lossy().to_string())),
            Err(e) => {
                tracing::warn!("Failed to write screenshot {:?}: {}", path, e);
                Ok(None)
            }
        }
    }
}
