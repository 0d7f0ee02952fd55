use crate::utils::EffectCatalog;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Запас поверх самого медленного эффекта для дедлайна watchdog
const DEFAULT_WATCHDOG_MARGIN_MS: u64 = 2_000;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub transition: TransitionConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransitionConfig {
    /// Жёсткий дедлайн перехода; 0 означает "вычислить по справочнику эффектов"
    #[serde(default)]
    pub watchdog_timeout_ms: u64,
    #[serde(default = "default_watchdog_margin_ms")]
    pub watchdog_margin_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    pub enabled: bool,
    pub barrier_capacity: usize,
    pub wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

fn default_watchdog_margin_ms() -> u64 {
    DEFAULT_WATCHDOG_MARGIN_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                filter: "mdsync=info".to_string(),
            },
            transition: TransitionConfig {
                watchdog_timeout_ms: 0,
                watchdog_margin_ms: DEFAULT_WATCHDOG_MARGIN_MS,
            },
            sync: SyncConfig {
                enabled: true,
                barrier_capacity: 64,
                wait_timeout_ms: 2_000,
                poll_interval_ms: 1,
            },
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("MDSYNC_").split("__"));

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
            "pretty" | "json" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        // Явно заданный watchdog не должен обрывать известные эффекты
        if self.transition.watchdog_timeout_ms != 0
            && Duration::from_millis(self.transition.watchdog_timeout_ms) <= EffectCatalog::slowest()
        {
            anyhow::bail!(
                "watchdog_timeout_ms ({}) должен превышать самый медленный эффект ({} мс)",
                self.transition.watchdog_timeout_ms,
                EffectCatalog::slowest().as_millis()
            );
        }

        // Валидация настроек синхронизации
        if self.sync.barrier_capacity == 0 {
            anyhow::bail!("barrier_capacity должно быть больше 0");
        }

        if self.sync.wait_timeout_ms == 0 {
            anyhow::bail!("wait_timeout_ms должно быть больше 0");
        }

        if self.sync.poll_interval_ms == 0 || self.sync.poll_interval_ms > self.sync.wait_timeout_ms {
            anyhow::bail!(
                "poll_interval_ms должно быть в диапазоне 1..={}",
                self.sync.wait_timeout_ms
            );
        }

        Ok(())
    }

    /// Итоговый дедлайн watchdog для одного перехода
    pub fn watchdog_timeout(&self) -> Duration {
        if self.transition.watchdog_timeout_ms == 0 {
            EffectCatalog::watchdog_deadline(Duration::from_millis(self.transition.watchdog_margin_ms))
        } else {
            Duration::from_millis(self.transition.watchdog_timeout_ms)
        }
    }

    pub fn barrier_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.wait_timeout_ms)
    }

    pub fn barrier_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_watchdog_exceeds_slowest_effect() {
        let config = Config::default();
        assert!(config.watchdog_timeout() > EffectCatalog::slowest());
    }

    #[test]
    fn test_explicit_watchdog_too_short_is_rejected() {
        let mut config = Config::default();
        config.transition.watchdog_timeout_ms = 500;
        assert!(config.validate().is_err());

        config.transition.watchdog_timeout_ms = 30_000;
        assert!(config.validate().is_ok());
        assert_eq!(config.watchdog_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_poll_interval_bounds() {
        let mut config = Config::default();
        config.sync.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        config.sync.poll_interval_ms = config.sync.wait_timeout_ms + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_merges_file_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "mdsync.toml",
                r#"
                [sync]
                enabled = false
                barrier_capacity = 8
                wait_timeout_ms = 500
                poll_interval_ms = 2
                "#,
            )?;
            jail.set_env("MDSYNC_LOGGING__LEVEL", "debug");

            let config = Config::load("mdsync.toml").map_err(|e| e.to_string())?;
            assert!(!config.sync.enabled);
            assert_eq!(config.sync.barrier_capacity, 8);
            assert_eq!(config.logging.level, "debug");
            assert_eq!(config.transition.watchdog_margin_ms, DEFAULT_WATCHDOG_MARGIN_MS);
            Ok(())
        });
    }
}
