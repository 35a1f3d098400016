//! 产品元数据的磁盘缓存（prod_cache.plist）。
//!
//! 产品一经发布便不可变，完整解析过一次就不必再访问网络。
//! 只有完整条目才允许写入，避免把 "Unknown" 永久留在缓存里。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use plist::Date;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::models::UNKNOWN;

const CACHE_FILE: &str = "prod_cache.plist";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to write product cache to {path}: {source}")]
    Write { path: PathBuf, source: plist::Error },
}

/// 缓存条目：除 `packages`/`size`/排序键以外的全部产品字段。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedProduct {
    pub product: String,
    pub title: String,
    pub version: String,
    pub build: String,
    pub description: String,
    pub device_ids: Vec<String>,
    pub date: Date,
    pub installer: bool,
}

impl CachedProduct {
    /// 字符串字段都不是 "Unknown" 才算完整。
    /// 注意：`device_ids` 为空不影响完整性（空设备列表是合法值）。
    pub fn is_complete(&self) -> bool {
        [&self.title, &self.version, &self.build, &self.description]
            .iter()
            .all(|field| field.as_str() != UNKNOWN)
    }
}

pub struct MetadataCache {
    path: PathBuf,
    entries: BTreeMap<String, CachedProduct>,
    dirty: bool,
}

impl MetadataCache {
    /// 从数据目录加载；读不到或格式不对时退化为空缓存。
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(CACHE_FILE);
        let entries = if path.exists() {
            match plist::from_file::<_, BTreeMap<String, CachedProduct>>(&path) {
                Ok(entries) => {
                    debug!("loaded {} cached products from {}", entries.len(), path.display());
                    entries
                }
                Err(err) => {
                    warn!("failed to read product cache at {}: {err}; starting empty", path.display());
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Self {
            path,
            entries,
            dirty: false,
        }
    }

    pub fn get(&self, product_id: &str) -> Option<&CachedProduct> {
        self.entries.get(product_id)
    }

    pub fn insert(&mut self, entry: CachedProduct) {
        self.entries.insert(entry.product.clone(), entry);
        self.dirty = true;
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.dirty = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 有改动时整体重写缓存文件。
    pub fn flush(&mut self) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }
        plist::to_file_xml(&self.path, &self.entries).map_err(|source| CacheError::Write {
            path: self.path.clone(),
            source,
        })?;
        self.dirty = false;
        debug!("product cache flushed ({} entries)", self.entries.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn sample_entry(id: &str) -> CachedProduct {
        CachedProduct {
            product: id.to_string(),
            title: "macOS Sequoia".to_string(),
            version: "15.1".to_string(),
            build: "24B83".to_string(),
            description: String::new(),
            device_ids: vec!["j180dap".to_string(), "vma2macosap".to_string()],
            date: Date::from(UNIX_EPOCH + Duration::from_secs(1_730_000_000)),
            installer: true,
        }
    }

    #[test]
    fn roundtrips_entries_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = MetadataCache::load(dir.path());
        assert!(cache.is_empty());

        let entry = sample_entry("042-18086");
        cache.insert(entry.clone());
        cache.flush().unwrap();

        let reloaded = MetadataCache::load(dir.path());
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("042-18086"), Some(&entry));
    }

    #[test]
    fn flush_without_changes_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = MetadataCache::load(dir.path());
        cache.flush().unwrap();
        assert!(!dir.path().join(CACHE_FILE).exists());
    }

    #[test]
    fn corrupt_cache_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CACHE_FILE), b"not a plist").unwrap();
        let cache = MetadataCache::load(dir.path());
        assert!(cache.is_empty());
    }

    #[test]
    fn completeness_ignores_empty_device_list_but_not_unknown_fields() {
        let mut entry = sample_entry("001-00001");
        entry.device_ids.clear();
        assert!(entry.is_complete());

        entry.build = UNKNOWN.to_string();
        assert!(!entry.is_complete());
    }
}
