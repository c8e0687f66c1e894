use super::WindowSource;
use crate::error::{AhkError, Result};
use crate::events::WindowInfo;
use std::collections::HashMap;
use std::process::Command;
use tracing::debug;

pub struct KdotoolSource;

/// При запуске через sudo kdotool должен достучаться до сессии исходного пользователя
fn build_env_overrides() -> HashMap<String, String> {
    let mut env_vars = HashMap::new();

    if std::env::var("USER").unwrap_or_default() == "root" {
        if let Ok(sudo_user) = std::env::var("SUDO_USER") {
            if let Ok(output) = Command::new("id").args(["-u", &sudo_user]).output() {
                if let Ok(uid_str) = String::from_utf8(output.stdout) {
                    let uid = uid_str.trim();
                    let user_runtime_dir = format!("/run/user/{}", uid);

                    debug!("Подставляем переменные окружения для пользователя {}: uid={}", sudo_user, uid);
                    env_vars.insert(
                        "DBUS_SESSION_BUS_ADDRESS".to_string(),
                        format!("unix:path={}/bus", user_runtime_dir),
                    );
                    env_vars.insert("XDG_RUNTIME_DIR".to_string(), user_runtime_dir);
                    env_vars.insert("USER".to_string(), sudo_user);
                }
            }
        }
    }

    if let Ok(display_var) = std::env::var("DISPLAY") {
        env_vars.insert("DISPLAY".to_string(), display_var);
    }

    env_vars
}

impl KdotoolSource {
    pub fn new() -> Self {
        Self
    }

    fn create_command(args: &[&str]) -> Command {
        let mut cmd = if let Ok(sudo_user) = std::env::var("SUDO_USER") {
            let mut cmd = Command::new("sudo");
            cmd.args(["-E", "-u", &sudo_user, "kdotool"]);
            cmd.args(args);
            cmd
        } else {
            let mut cmd = Command::new("kdotool");
            cmd.args(args);
            cmd
        };

        for (key, value) in build_env_overrides() {
            cmd.env(key, value);
        }

        cmd
    }

    fn query(args: &[&str]) -> Result<String> {
        let output = Self::create_command(args).output()?;
        if !output.status.success() {
            debug!("kdotool {} failed: {}", args.join(" "), String::from_utf8_lossy(&output.stderr));
            return Err(AhkError::Internal(format!("kdotool {} failed", args[0])));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for KdotoolSource {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowSource for KdotoolSource {
    fn name(&self) -> &'static str {
        "kdotool"
    }

    fn test(&self) -> Result<()> {
        let window_id = Self::query(&["getactivewindow"])?;
        debug!("kdotool получил window_id: '{}'", window_id);
        Self::query(&["getwindowname", &window_id]).map(|_| ())
    }

    fn active_window(&self) -> Result<WindowInfo> {
        let window_id = Self::query(&["getactivewindow"])?;

        let title = Self::query(&["getwindowname", &window_id])?;
        if title.is_empty() {
            return Err(AhkError::Internal("kdotool вернул пустое название".to_string()));
        }

        let mut window = WindowInfo::new(title).with_class("KDE".to_string());
        if let Some(pid) = Self::query(&["getwindowpid", &window_id])
            .ok()
            .and_then(|pid| pid.parse().ok())
        {
            window = window.with_pid(pid);
        }

        Ok(window)
    }
}
