use super::WindowSource;
use crate::error::{AhkError, Result};
use crate::events::WindowInfo;
use std::process::Command;
use tracing::debug;

pub struct XdotoolSource;

impl XdotoolSource {
    pub fn new() -> Self {
        Self
    }

    fn query(args: &[&str]) -> Result<String> {
        let output = Command::new("xdotool").args(args).output().map_err(|e| {
            debug!("xdotool не найден или не работает: {}", e);
            AhkError::ServiceUnavailable(format!("xdotool не найден: {}", e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("xdotool вернул ошибку: {}", stderr);
            return Err(AhkError::Internal(format!("xdotool вернул ошибку: {}", stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for XdotoolSource {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowSource for XdotoolSource {
    fn name(&self) -> &'static str {
        "xdotool"
    }

    fn test(&self) -> Result<()> {
        Self::query(&["getactivewindow", "getwindowname"]).map(|_| ())
    }

    fn active_window(&self) -> Result<WindowInfo> {
        let title = Self::query(&["getactivewindow", "getwindowname"])?;
        debug!("xdotool получил заголовок окна: '{}'", title);

        let class = Self::query(&["getactivewindow", "getwindowclassname"]).unwrap_or_else(|_| {
            debug!("Не удалось получить класс окна");
            "Unknown".to_string()
        });

        let mut window = WindowInfo::new(title).with_class(class);
        if let Some(pid) = Self::query(&["getactivewindow", "getwindowpid"])
            .ok()
            .and_then(|pid| pid.parse().ok())
        {
            window = window.with_pid(pid);
        }

        Ok(window)
    }
}
