pub mod signal;

pub use signal::{AsyncSignal, WaitOutcome};
