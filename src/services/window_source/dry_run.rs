use super::WindowSource;
use crate::error::Result;
use crate::events::WindowInfo;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

const FAKE_WINDOWS: [&str; 4] = [
    "Terminal - dry_run",
    "Browser - dry_run",
    "Editor - dry_run",
    "Game - dry_run",
];

/// Эмуляция: каждый снимок возвращает следующее окно из списка
pub struct DryRunSource {
    next: AtomicUsize,
}

impl DryRunSource {
    pub fn new() -> Self {
        Self {
            next: AtomicUsize::new(0),
        }
    }
}

impl Default for DryRunSource {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowSource for DryRunSource {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn test(&self) -> Result<()> {
        Ok(())
    }

    fn active_window(&self) -> Result<WindowInfo> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % FAKE_WINDOWS.len();
        info!("Dry-run: эмулируем активное окно: {}", FAKE_WINDOWS[index]);
        Ok(WindowInfo::new(FAKE_WINDOWS[index].to_string()).with_class("DryRun".to_string()))
    }
}
