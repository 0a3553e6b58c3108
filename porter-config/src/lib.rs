// Configuration management for Porter

pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use settings::{
    DatabaseSettings, PorterConfig, RetrySettings, SchedulerSettings, WebhookSettings,
    WorkerSettings,
};
pub use validation::{ConfigValidator, Validate};

use parking_lot::RwLock;
use porter_log::debug;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Layered key/value configuration store.
///
/// Keys are dotted (`worker.lease_secs`). Later loads override earlier ones,
/// so the usual order is file, then `.env`, then the process environment.
#[derive(Clone, Default)]
pub struct ConfigManager {
    config: Arc<RwLock<HashMap<String, Value>>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only environment variables starting with `<prefix>_` are loaded.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            config: Arc::default(),
            env_prefix: Some(prefix.into()),
        }
    }

    pub fn load_env(&self) -> Result<()> {
        let loader = EnvLoader::new(self.env_prefix.clone());
        let vars = loader.load()?;
        debug!("Loaded {} configuration keys from the environment", vars.len());

        let mut config = self.config.write();
        for (key, value) in vars {
            config.insert(key, Value::String(value));
        }
        Ok(())
    }

    /// Load a `.env` file into the process environment, then the environment.
    ///
    /// Without a path a missing `.env` is ignored.
    pub fn load_dotenv(&self, path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
            }
            None => {
                let _ = dotenvy::dotenv();
            }
        }
        self.load_env()
    }

    pub fn load_file(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let values = ConfigLoader::new(format).load_file(&path)?;
        debug!(
            "Loaded {} configuration keys from {}",
            values.len(),
            path.as_ref().display()
        );
        self.merge_values(values);
        Ok(())
    }

    fn merge_values(&self, values: serde_json::Map<String, Value>) {
        let mut config = self.config.write();
        for (key, value) in values {
            config.insert(key, value);
        }
    }

    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;
        self.config.write().insert(key.to_string(), json_value);
        Ok(())
    }

    /// Read a typed value.
    ///
    /// String values (everything from the environment) are also tried as
    /// JSON, so `"300"` reads as a number and `"true"` as a boolean.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_opt(key)?
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))
    }

    /// Like [`get`](Self::get), but a missing key is `Ok(None)`.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.config.read().get(key).cloned() else {
            return Ok(None);
        };

        let direct = match serde_json::from_value::<T>(value.clone()) {
            Ok(parsed) => return Ok(Some(parsed)),
            Err(e) => e,
        };

        if let Value::String(raw) = &value
            && let Ok(parsed) = serde_json::from_str::<T>(raw.trim())
        {
            return Ok(Some(parsed));
        }

        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: direct.to_string(),
        })
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get_opt(key)?.unwrap_or(default))
    }

    pub fn has(&self, key: &str) -> bool {
        self.config.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.config.read().keys().cloned().collect()
    }
}
