// Typed Porter settings

use crate::{ConfigLoader, ConfigManager, ConfigValidator, Result, Validate};
use porter_log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment prefix for all Porter settings.
pub const ENV_PREFIX: &str = "PORTER";

/// Environment variable naming an optional TOML/JSON settings file.
pub const CONFIG_FILE_VAR: &str = "PORTER_CONFIG_FILE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Stable identity written to `locked_by`; generated when unset.
    pub id: Option<String>,
    pub lease_secs: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            id: None,
            lease_secs: 300,
            batch_size: 10,
            max_attempts: 3,
        }
    }
}

impl WorkerSettings {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    /// The configured id, or a fresh `porter-<uuid>`.
    pub fn resolved_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("porter-{}", uuid::Uuid::new_v4()))
    }
}

/// Exponential retry backoff: `base * 2^attempts`, capped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub base_secs: u64,
    pub cap_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_secs: 60,
            cap_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub queue: String,
    /// Delay before retrying a task whose next run could not be computed.
    pub fallback_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            queue: "scheduled".to_string(),
            fallback_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSettings {
    pub queue: String,
    pub notifications_queue: String,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            queue: "webhooks".to_string(),
            notifications_queue: "notifications".to_string(),
        }
    }
}

/// All Porter settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PorterConfig {
    pub database: DatabaseSettings,
    pub worker: WorkerSettings,
    pub retry: RetrySettings,
    pub scheduler: SchedulerSettings,
    pub webhooks: WebhookSettings,
}

impl PorterConfig {
    /// Load from `$PORTER_CONFIG_FILE` (if set), `.env`, then `PORTER_*`
    /// variables, and validate.
    pub fn load() -> Result<Self> {
        let manager = ConfigManager::with_prefix(ENV_PREFIX);

        if let Ok(path) = std::env::var(CONFIG_FILE_VAR) {
            Self::load_file_into(&manager, Path::new(&path))?;
        }
        manager.load_dotenv(None)?;

        let config = Self::from_manager(&manager)?;
        info!(
            "Configuration loaded";
            lease_secs = config.worker.lease_secs,
            batch_size = config.worker.batch_size,
            database = config.database.url.is_some()
        );
        Ok(config)
    }

    /// Load from an explicit file plus the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let manager = ConfigManager::with_prefix(ENV_PREFIX);
        Self::load_file_into(&manager, path.as_ref())?;
        manager.load_env()?;
        Self::from_manager(&manager)
    }

    fn load_file_into(manager: &ConfigManager, path: &Path) -> Result<()> {
        let values = ConfigLoader::auto(path)?.load_file(path)?;
        for (key, value) in values {
            manager.set(&key, value)?;
        }
        Ok(())
    }

    /// Build from already-loaded keys, falling back to defaults.
    pub fn from_manager(manager: &ConfigManager) -> Result<Self> {
        let d = Self::default();

        let config = Self {
            database: DatabaseSettings {
                url: manager.get_opt("database.url")?,
                max_connections: manager
                    .get_or("database.max_connections", d.database.max_connections)?,
            },
            worker: WorkerSettings {
                id: manager.get_opt("worker.id")?,
                lease_secs: manager.get_or("worker.lease_secs", d.worker.lease_secs)?,
                batch_size: manager.get_or("worker.batch_size", d.worker.batch_size)?,
                max_attempts: manager.get_or("worker.max_attempts", d.worker.max_attempts)?,
            },
            retry: RetrySettings {
                base_secs: manager.get_or("retry.base_secs", d.retry.base_secs)?,
                cap_secs: manager.get_or("retry.cap_secs", d.retry.cap_secs)?,
            },
            scheduler: SchedulerSettings {
                queue: manager.get_or("scheduler.queue", d.scheduler.queue)?,
                fallback_secs: manager
                    .get_or("scheduler.fallback_secs", d.scheduler.fallback_secs)?,
            },
            webhooks: WebhookSettings {
                queue: manager.get_or("webhooks.queue", d.webhooks.queue)?,
                notifications_queue: manager
                    .get_or("webhooks.notifications_queue", d.webhooks.notifications_queue)?,
            },
        };

        config.validate()?;
        Ok(config)
    }
}

impl Validate for PorterConfig {
    fn validate(&self) -> Result<()> {
        if let Some(url) = &self.database.url {
            ConfigValidator::is_postgres_url(url, "database.url")?;
        }
        ConfigValidator::in_range(
            self.database.max_connections,
            1,
            1_000,
            "database.max_connections",
        )?;

        if let Some(id) = &self.worker.id {
            ConfigValidator::not_empty(id, "worker.id")?;
        }
        ConfigValidator::in_range(self.worker.lease_secs, 1, 86_400, "worker.lease_secs")?;
        ConfigValidator::in_range(self.worker.batch_size, 1, 10_000, "worker.batch_size")?;
        ConfigValidator::in_range(self.worker.max_attempts, 1, 100, "worker.max_attempts")?;

        ConfigValidator::in_range(self.retry.base_secs, 1, 86_400, "retry.base_secs")?;
        ConfigValidator::at_least(self.retry.cap_secs, self.retry.base_secs, "retry.cap_secs")?;
        ConfigValidator::in_range(self.retry.cap_secs, 1, 30 * 86_400, "retry.cap_secs")?;

        ConfigValidator::not_empty(&self.scheduler.queue, "scheduler.queue")?;
        ConfigValidator::in_range(
            self.scheduler.fallback_secs,
            1,
            7 * 86_400,
            "scheduler.fallback_secs",
        )?;

        ConfigValidator::not_empty(&self.webhooks.queue, "webhooks.queue")?;
        ConfigValidator::not_empty(
            &self.webhooks.notifications_queue,
            "webhooks.notifications_queue",
        )?;
        Ok(())
    }
}
