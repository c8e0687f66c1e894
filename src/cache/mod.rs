//! Кэширование дорогих снимков внешнего состояния (окна, процессы).

mod countdown;
mod refreshing;

pub use countdown::CountdownTimer;
pub use refreshing::{RefreshPolicy, RefreshingCache};
