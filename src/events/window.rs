use serde::{Deserialize, Serialize};
use std::fmt;

/// Информация об окне
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowInfo {
    pub title: String,
    pub class: String,
    pub pid: Option<u32>,
}

impl WindowInfo {
    pub fn new(title: String) -> Self {
        Self {
            title,
            class: String::new(),
            pid: None,
        }
    }

    pub fn with_class(mut self, class: String) -> Self {
        self.class = class;
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Окно считается тем же, если совпадают заголовок и класс
    pub fn same_window(&self, other: &WindowInfo) -> bool {
        self.title == other.title && self.class == other.class
    }
}

impl fmt::Display for WindowInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.class.is_empty(), self.pid) {
            (true, None) => write!(f, "\"{}\"", self.title),
            (true, Some(pid)) => write!(f, "\"{}\" [pid {}]", self.title, pid),
            (false, None) => write!(f, "\"{}\" ({})", self.title, self.class),
            (false, Some(pid)) => write!(f, "\"{}\" ({}) [pid {}]", self.title, self.class, pid),
        }
    }
}

/// Снимок состояния рабочего стола, который хранится в кэше.
/// `Default` соответствует пустому снимку (окно ещё не определено).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub active: Option<WindowInfo>,
}

impl WindowSnapshot {
    pub fn of(window: WindowInfo) -> Self {
        Self { active: Some(window) }
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_none()
    }

    /// Изменилось ли активное окно по сравнению с `previous`
    pub fn changed_from(&self, previous: &WindowSnapshot) -> bool {
        match (&self.active, &previous.active) {
            (Some(current), Some(previous)) => !current.same_window(previous),
            (None, None) => false,
            _ => true,
        }
    }
}

impl fmt::Display for WindowSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.active {
            Some(window) => write!(f, "{}", window),
            None => write!(f, "<нет активного окна>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_info_creation() {
        let window = WindowInfo::new("Test Window".to_string())
            .with_class("TestApp".to_string())
            .with_pid(1234);

        assert_eq!(window.title, "Test Window");
        assert_eq!(window.class, "TestApp");
        assert_eq!(window.pid, Some(1234));
        assert_eq!(window.to_string(), "\"Test Window\" (TestApp) [pid 1234]");
    }

    #[test]
    fn test_snapshot_change_detection() {
        let vim = WindowSnapshot::of(WindowInfo::new("nvim".to_string()).with_class("term".to_string()));
        let vim_other_pid = WindowSnapshot::of(
            WindowInfo::new("nvim".to_string())
                .with_class("term".to_string())
                .with_pid(7),
        );
        let browser = WindowSnapshot::of(WindowInfo::new("browser".to_string()));

        assert!(!vim.changed_from(&vim_other_pid));
        assert!(browser.changed_from(&vim));
        assert!(vim.changed_from(&WindowSnapshot::default()));
        assert!(!WindowSnapshot::default().changed_from(&WindowSnapshot::default()));
    }
}
