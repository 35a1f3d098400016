//! 全局配置结构（Config）与默认值。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::ConfigSpec;
use crate::catalog::resolver::{Channel, DEFAULT_MAX_SLOT};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 目录配置
    #[serde(default = "default_catalog")]
    pub current_catalog: String,
    #[serde(default = "default_current_macos")]
    pub current_macos: u32,
    #[serde(default = "default_false")]
    pub find_recovery: bool,

    // 下载配置
    #[serde(default = "default_true")]
    pub caffeinate_downloads: bool,
    #[serde(default)]
    pub download_dir: String,

    // 本地缓存配置
    #[serde(default = "default_false")]
    pub save_local: bool,
    #[serde(default = "default_false")]
    pub force_local: bool,

    // 网络配置
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            current_catalog: default_catalog(),
            current_macos: default_current_macos(),
            find_recovery: default_false(),
            caffeinate_downloads: default_true(),
            download_dir: String::new(),
            save_local: default_false(),
            force_local: default_false(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "settings.json";
}

impl Config {
    pub fn channel(&self) -> Channel {
        Channel::from_key(&self.current_catalog)
    }

    /// 下载根目录：未配置时使用 `~/macOS Downloads`。
    pub fn default_download_dir(&self) -> PathBuf {
        if self.download_dir.trim().is_empty() {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("macOS Downloads")
        } else {
            PathBuf::from(&self.download_dir)
        }
    }
}

fn default_catalog() -> String {
    Channel::PublicRelease.key().to_string()
}

fn default_current_macos() -> u32 {
    DEFAULT_MAX_SLOT
}

fn default_false() -> bool {
    false
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_catalog_key_falls_back_to_public_release() {
        let mut config = Config::default();
        config.current_catalog = "nightly".to_string();
        assert_eq!(config.channel(), Channel::PublicRelease);
    }

    #[test]
    fn configured_download_dir_wins() {
        let mut config = Config::default();
        config.download_dir = "/tmp/installers".to_string();
        assert_eq!(config.default_download_dir(), PathBuf::from("/tmp/installers"));
    }
}
