pub mod window;

pub use window::{WindowInfo, WindowSnapshot};
