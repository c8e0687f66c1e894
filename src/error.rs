use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AhkError {
    #[error("Ошибка конфигурации: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    /// Отложенная ошибка функции обновления кэша. Отдаётся ровно одному вызову `get()`.
    #[error("Ошибка обновления кэша: {0:#}")]
    Refresh(anyhow::Error),

    #[error("Недопустимый TTL {ttl:?}: {reason}")]
    InvalidTtl { ttl: Duration, reason: &'static str },

    #[error("Недопустимая операция: {0}")]
    InvalidOperation(String),

    #[error("Процесс не найден: pid {0}")]
    ProcessNotFound(u32),

    #[error("Сервис недоступен: {0}")]
    ServiceUnavailable(String),

    #[error("Внутренняя ошибка: {0}")]
    Internal(String),
}

impl AhkError {
    pub fn process_not_found<T>(pid: u32) -> Result<T> {
        Err(AhkError::ProcessNotFound(pid))
    }

    /// true для ошибок, захваченных из функции обновления
    pub fn is_refresh(&self) -> bool {
        matches!(self, AhkError::Refresh(_))
    }
}

pub type Result<T> = std::result::Result<T, AhkError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! ahk_error {
    (invalid_operation, $($arg:tt)*) => {
        $crate::error::AhkError::InvalidOperation(format!($($arg)*))
    };
    (service_unavailable, $($arg:tt)*) => {
        $crate::error::AhkError::ServiceUnavailable(format!($($arg)*))
    };
    (internal, $($arg:tt)*) => {
        $crate::error::AhkError::Internal(format!($($arg)*))
    };
}
