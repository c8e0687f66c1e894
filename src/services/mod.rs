pub mod process_watcher;
pub mod window_monitor;
pub mod window_source;

pub use process_watcher::{ProcessWatcher, WatchedProcess};
pub use window_monitor::WindowMonitor;
pub use window_source::{create_window_source, WindowSource};
