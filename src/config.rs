use crate::cache::RefreshPolicy;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub process: ProcessConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    pub ttl_ms: u64,
    pub policy: RefreshPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowConfig {
    pub detection_mode: String,
    pub polling_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessConfig {
    pub poll_interval_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        // Как у монитора окон проводника: снимок живёт пять секунд
        Self {
            ttl_ms: 5000,
            policy: RefreshPolicy::Lazy,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            detection_mode: "auto".to_string(),
            polling_interval_ms: 1000,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl WindowConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

impl ProcessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Порядок слоёв: значения по умолчанию, затем TOML-файл (если есть), затем AHK_* переменные.
    /// Вложенные ключи в окружении разделяются `__`, например `AHK_CACHE__TTL_MS`.
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("AHK_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Валидация настроек логирования
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        // Валидация настроек кэша
        if self.cache.ttl_ms == 0 && self.cache.policy == RefreshPolicy::Continuous {
            anyhow::bail!("ttl_ms должно быть больше 0 для непрерывного обновления");
        }

        // Валидация настроек окон
        match self.window.detection_mode.as_str() {
            "auto" | "kdotool" | "xdotool" => {}
            _ => anyhow::bail!(
                "Неверный режим детекции окон: {}",
                self.window.detection_mode
            ),
        }

        if self.window.polling_interval_ms < 10 {
            anyhow::bail!("polling_interval_ms должно быть минимум 10");
        }

        if self.process.poll_interval_ms < 10 {
            anyhow::bail!("poll_interval_ms должно быть минимум 10");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.ttl(), Duration::from_secs(5));
    }

    #[test]
    fn test_continuous_policy_requires_ttl() {
        let mut config = Config::default();
        config.cache.policy = RefreshPolicy::Continuous;
        config.cache.ttl_ms = 0;
        assert!(config.validate().is_err());

        config.cache.policy = RefreshPolicy::Lazy;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_detection_mode() {
        let mut config = Config::default();
        config.window.detection_mode = "dbus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "ahk.toml",
                r#"
                [cache]
                ttl_ms = 250
                policy = "continuous"

                [window]
                detection_mode = "xdotool"
                polling_interval_ms = 100
                "#,
            )?;
            jail.set_env("AHK_PROCESS__POLL_INTERVAL_MS", "50");

            let config = Config::load("ahk.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.cache.ttl_ms, 250);
            assert_eq!(config.cache.policy, RefreshPolicy::Continuous);
            assert_eq!(config.window.detection_mode, "xdotool");
            assert_eq!(config.process.poll_interval_ms, 50);
            assert_eq!(config.logging.level, "info");
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = Config::load("missing.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.cache.policy, RefreshPolicy::Lazy);
            assert_eq!(config.window.polling_interval_ms, 1000);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("ahk.toml", "[cache]\npolicy = \"sometimes\"\n")?;
            assert!(Config::load("ahk.toml").is_err());
            Ok(())
        });
    }
}
