//! 配置文件读写（settings.json）。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid json at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("validation error: {0}")]
    Validation(String),
}

pub trait ConfigSpec: Serialize + DeserializeOwned + Default {
    const FILE_NAME: &'static str;
}

pub fn load_or_create<T: ConfigSpec>(config_path: Option<&Path>) -> Result<T, ConfigError> {
    load_or_create_with_base::<T>(config_path, None)
}

/// Load or create a settings file, optionally using a base directory.
///
/// # Path resolution
/// - If config_path is Some: uses the exact path provided
/// - If config_path is None and base_dir is Some: uses base_dir/FILE_NAME
/// - If both are None: uses current directory/FILE_NAME
pub fn load_or_create_with_base<T: ConfigSpec>(
    config_path: Option<&Path>,
    base_dir: Option<&Path>,
) -> Result<T, ConfigError> {
    let path = resolve_path::<T>(config_path, base_dir);
    ensure_parent(&path)?;

    if !path.exists() {
        let default_config = T::default();
        write_config(&default_config, &path)?;
        return Ok(default_config);
    }

    let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;

    let user_json: Value = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;

    let mut merged = serde_json::to_value(T::default())
        .map_err(|err| ConfigError::Validation(err.to_string()))?;
    merge_values(&mut merged, user_json.clone());

    let config: T = serde_json::from_value(merged)
        .map_err(|err| ConfigError::Validation(err.to_string()))?;

    if has_missing_fields::<T>(&user_json)? {
        write_config(&config, &path)?;
    }

    Ok(config)
}

pub fn write_config<T: ConfigSpec>(config: &T, path: &Path) -> Result<(), ConfigError> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(config)
        .map_err(|err| ConfigError::Validation(err.to_string()))?;
    fs::write(path, json + "\n").map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn config_file_path<T: ConfigSpec>(
    config_path: Option<&Path>,
    base_dir: Option<&Path>,
) -> PathBuf {
    resolve_path::<T>(config_path, base_dir)
}

fn has_missing_fields<T: ConfigSpec>(user_json: &Value) -> Result<bool, ConfigError> {
    let defaults = serde_json::to_value(T::default())
        .map_err(|err| ConfigError::Validation(err.to_string()))?;
    let (Value::Object(defaults), Value::Object(user)) = (&defaults, user_json) else {
        return Ok(true);
    };
    Ok(defaults.keys().any(|key| !user.contains_key(key)))
}

fn merge_values(default: &mut Value, user: Value) {
    match (default, user) {
        (Value::Object(dest), Value::Object(src)) => {
            for (key, user_val) in src {
                if let Some(dest_val) = dest.get_mut(&key) {
                    merge_values(dest_val, user_val);
                } else {
                    dest.insert(key, user_val);
                }
            }
        }
        (dest, other) => {
            *dest = other;
        }
    }
}

fn resolve_path<T: ConfigSpec>(path: Option<&Path>, base_dir: Option<&Path>) -> PathBuf {
    if let Some(p) = path {
        p.to_path_buf()
    } else if let Some(base) = base_dir {
        base.join(T::FILE_NAME)
    } else {
        PathBuf::from(T::FILE_NAME)
    }
}

fn ensure_parent(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::context::Config;

    #[test]
    fn creates_default_settings_file_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_create_with_base::<Config>(None, Some(dir.path())).unwrap();
        assert_eq!(config.current_catalog, "publicrelease");
        assert!(dir.path().join(Config::FILE_NAME).exists());
    }

    #[test]
    fn merges_user_values_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(Config::FILE_NAME);
        fs::write(&path, r#"{"current_macos": 17, "find_recovery": true}"#).unwrap();

        let config = load_or_create_with_base::<Config>(None, Some(dir.path())).unwrap();
        assert_eq!(config.current_macos, 17);
        assert!(config.find_recovery);
        // missing keys fall back to defaults
        assert_eq!(config.current_catalog, "publicrelease");
        assert!(config.caffeinate_downloads);

        // the file is rewritten with the missing keys filled in
        let rewritten: Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten["current_catalog"], "publicrelease");
        assert_eq!(rewritten["current_macos"], 17);
    }

    #[test]
    fn roundtrips_saved_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(Config::FILE_NAME);

        let mut config = Config::default();
        config.current_macos = 16;
        config.save_local = true;
        write_config(&config, &path).unwrap();

        let loaded = load_or_create_with_base::<Config>(Some(&path), None).unwrap();
        assert_eq!(loaded.current_macos, 16);
        assert!(loaded.save_local);
    }
}
