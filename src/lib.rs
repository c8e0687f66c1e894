//! Ядро утилит автоматизации рабочего стола.
//!
//! The interesting parts are [`sync::AsyncSignal`], a manual-reset gate usable from
//! async and blocking code, and [`cache::RefreshingCache`], which serves the result of
//! an expensive producer (window lists, foreground process, ...) and recomputes it at
//! most once per TTL. The `services` module wires them to the desktop.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod services;
pub mod sync;
pub mod utils;

pub use cache::{CountdownTimer, RefreshPolicy, RefreshingCache};
pub use error::{AhkError, Result};
pub use sync::{AsyncSignal, WaitOutcome};
