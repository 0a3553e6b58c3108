// Configuration file loading

use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }
}

/// Parses a configuration file into a flat map of dotted keys.
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Pick the format from the file extension.
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                ConfigError::LoadError(format!("No file extension on {}", path.display()))
            })?;

        let format = FileFormat::from_extension(ext)
            .ok_or_else(|| ConfigError::LoadError(format!("Unsupported format: {}", ext)))?;

        Ok(Self::new(format))
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Map<String, Value>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::LoadError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        self.parse(&content)
    }

    /// Parse file content. Nested tables are flattened, so
    /// `[worker] lease_secs = 60` yields the key `worker.lease_secs`.
    pub fn parse(&self, content: &str) -> Result<Map<String, Value>> {
        let value = match self.format {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e)))?,
            FileFormat::Toml => {
                let table: toml::Table = toml::from_str(content)
                    .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;
                serde_json::to_value(table)
                    .map_err(|e| ConfigError::SerializationError(e.to_string()))?
            }
            FileFormat::Env => Self::parse_env(content),
        };

        let Value::Object(root) = value else {
            return Err(ConfigError::ParseError(
                "Configuration root must be a table".to_string(),
            ));
        };

        let mut flat = Map::new();
        flatten("", root, &mut flat);
        Ok(flat)
    }

    fn parse_env(content: &str) -> Value {
        let mut map = Map::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().to_ascii_lowercase().replace("__", ".");
                let value = value.trim().trim_matches('"').trim_matches('\'');
                map.insert(key, Value::String(value.to_string()));
            }
        }

        Value::Object(map)
    }
}

fn flatten(prefix: &str, object: Map<String, Value>, out: &mut Map<String, Value>) {
    for (key, value) in object {
        let key = if prefix.is_empty() {
            key
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(nested) => flatten(&key, nested, out),
            other => {
                out.insert(key, other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml_sections() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let toml = r#"
            [worker]
            lease_secs = 120
            batch_size = 25

            [database]
            url = "postgres://localhost/porter"
        "#;

        let flat = loader.parse(toml).unwrap();
        assert_eq!(flat.get("worker.lease_secs"), Some(&Value::from(120)));
        assert_eq!(flat.get("worker.batch_size"), Some(&Value::from(25)));
        assert_eq!(
            flat.get("database.url"),
            Some(&Value::from("postgres://localhost/porter"))
        );
    }

    #[test]
    fn test_parse_json_nested() {
        let loader = ConfigLoader::new(FileFormat::Json);
        let flat = loader
            .parse(r#"{"retry": {"base_secs": 30, "cap_secs": 3600}}"#)
            .unwrap();

        assert_eq!(flat.get("retry.cap_secs"), Some(&Value::from(3600)));
    }

    #[test]
    fn test_parse_json_rejects_non_object() {
        let loader = ConfigLoader::new(FileFormat::Json);
        assert!(loader.parse("[1, 2, 3]").is_err());
    }

    #[test]
    fn test_parse_env_file() {
        let loader = ConfigLoader::new(FileFormat::Env);
        let flat = loader
            .parse("# comment\nWORKER__ID=\"worker-a\"\nSCHEDULER__QUEUE=cron\n")
            .unwrap();

        assert_eq!(flat.get("worker.id"), Some(&Value::from("worker-a")));
        assert_eq!(flat.get("scheduler.queue"), Some(&Value::from("cron")));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_extension("TOML"), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_extension("yaml"), None);
        assert!(ConfigLoader::auto("porter.toml").is_ok());
        assert!(ConfigLoader::auto("porter").is_err());
    }
}
