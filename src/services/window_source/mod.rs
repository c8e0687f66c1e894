//! WindowSource: responsibility and boundaries
//!
//! This module and its submodules ONLY take a snapshot of the active window
//! using whatever external tool the desktop offers. They are plain producers:
//! no caching, no change tracking. Caching lives in `RefreshingCache`, change
//! tracking in `WindowMonitor`.

mod dry_run;
mod kdotool;
mod xdotool;

pub use dry_run::DryRunSource;
pub use kdotool::KdotoolSource;
pub use xdotool::XdotoolSource;

use crate::config::Config;
use crate::error::{AhkError, Result};
use crate::events::WindowInfo;
use std::sync::Arc;
use tracing::info;

/// Source of active-window snapshots. Calls may block (they usually spawn a
/// helper process), so callers run them on the calling thread of a lazy cache
/// or on the blocking pool.
pub trait WindowSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Quick check: does this source work on the current desktop?
    fn test(&self) -> Result<()>;

    fn active_window(&self) -> Result<WindowInfo>;
}

/// Factory choosing the window source from the configured detection mode
pub fn create_window_source(config: &Config, dry_run: bool) -> Result<Arc<dyn WindowSource>> {
    if dry_run {
        return Ok(Arc::new(DryRunSource::new()));
    }

    match config.window.detection_mode.as_str() {
        "kdotool" => Ok(Arc::new(KdotoolSource::new())),
        "xdotool" => Ok(Arc::new(XdotoolSource::new())),
        "auto" => detect_working_source(),
        other => Err(AhkError::Internal(format!("Неизвестный режим детекции: {}", other))),
    }
}

fn detect_working_source() -> Result<Arc<dyn WindowSource>> {
    info!("Определяем рабочий метод получения активного окна...");

    let candidates: Vec<Arc<dyn WindowSource>> = vec![
        Arc::new(KdotoolSource::new()),
        Arc::new(XdotoolSource::new()),
    ];

    for source in candidates {
        if source.test().is_ok() {
            info!("Используем {}", source.name());
            return Ok(source);
        }
    }

    Err(AhkError::ServiceUnavailable(
        "ни один метод получения активного окна не работает".to_string(),
    ))
}
