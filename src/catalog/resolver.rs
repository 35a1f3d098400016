//! 目录 URL 构造与目录文档的获取 / 本地快照。
//!
//! URL 中的版本 token 序列必须与软件更新服务端期望的逐字节一致，
//! 否则目录直接 404，所以这里的编号规则不能“顺手修正”。

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{info, warn};

use super::models::CatalogDocument;
use crate::net::transport::{HttpTransport, TransportError};

pub const CATALOG_HOST: &str = "https://swscan.apple.com";
/// 引擎支持的最老版本槽位（10.5 Leopard）。
pub const MIN_SLOT: u32 = 5;
/// 默认的最大版本槽位（macOS 15）。
pub const DEFAULT_MAX_SLOT: u32 = 20;

const SNAPSHOT_FILE: &str = "sucatalog.plist";

/// 发布通道；决定目录 URL 的后缀。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    PublicRelease,
    PublicBeta,
    CustomerSeed,
    DeveloperSeed,
}

impl Channel {
    /// 设置文件/命令行里使用的键名。未知键回退到正式版通道。
    pub fn from_key(key: &str) -> Self {
        match key.trim().to_ascii_lowercase().as_str() {
            "public" => Self::PublicBeta,
            "customer" => Self::CustomerSeed,
            "developer" => Self::DeveloperSeed,
            _ => Self::PublicRelease,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::PublicRelease => "publicrelease",
            Self::PublicBeta => "public",
            Self::CustomerSeed => "customer",
            Self::DeveloperSeed => "developer",
        }
    }

    /// 追加在最新版本 token 上的目录后缀；正式版为空。
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::PublicRelease => "",
            Self::PublicBeta => "beta",
            Self::CustomerSeed => "customerseed",
            Self::DeveloperSeed => "seed",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// 内部槽位 → 目录 URL 里的版本 token。
/// 5–8 是历史代号，9–16 是 `10.x`，更高的版本减去 5 得到新式版本号。
pub fn slot_url_token(slot: u32) -> String {
    match slot {
        5 => "leopard".to_string(),
        6 => "snowleopard".to_string(),
        7 => "lion".to_string(),
        8 => "mountainlion".to_string(),
        _ if slot <= 16 => format!("10.{slot}"),
        _ => (slot - 5).to_string(),
    }
}

/// 内部槽位 → 用户可读的版本号（`10.15`、`11`、`12`…）。
pub fn slot_display(slot: u32) -> String {
    if slot <= 15 {
        format!("10.{slot}")
    } else {
        (slot - 5).to_string()
    }
}

/// 用户输入的版本号 → 内部槽位。
///
/// `11.x`（Big Sur 一代）必须映射到槽位 16（URL 里写作 `10.16`），
/// 而不是字面上的 11；这是服务端沿用的编号。
pub fn version_to_slot(version: &str) -> Option<u32> {
    let text = version.trim();
    let mut parts = text.split('.');
    let major: u32 = parts.next()?.trim().parse().ok()?;
    if major == 11 {
        return Some(16);
    }
    if text.starts_with("10.") {
        let minor: u32 = parts.next()?.trim().parse().ok()?;
        return Some(minor);
    }
    Some(major + 5)
}

/// 给定通道与最大槽位，拼出完整的目录 URL。
pub fn catalog_url(channel: Channel, max_slot: u32) -> String {
    let (lo, hi) = if MIN_SLOT > max_slot {
        (max_slot, MIN_SLOT)
    } else {
        (MIN_SLOT, max_slot)
    };
    let mut tokens: Vec<String> = (lo..=hi).map(slot_url_token).collect();
    let suffix = channel.suffix();
    if !suffix.is_empty()
        && let Some(newest) = tokens.last().cloned()
    {
        tokens.push(format!("{newest}{suffix}"));
    }
    tokens.reverse();
    format!(
        "{CATALOG_HOST}/content/catalogs/others/index-{}.merged-1.sucatalog",
        tokens.join("-")
    )
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog fetch cancelled")]
    Cancelled,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid catalog data: {0}")]
    Parse(#[from] plist::Error),
    #[error("failed to save local catalog to {path}: {source}")]
    Snapshot { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogOptions {
    /// 把抓到的目录原样存一份在数据目录，下次直接用。
    pub save_local: bool,
    /// 忽略已有快照，强制重新下载（并刷新快照）。
    pub force_local: bool,
}

pub struct CatalogResolver {
    snapshot_path: PathBuf,
}

impl CatalogResolver {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            snapshot_path: data_dir.join(SNAPSHOT_FILE),
        }
    }

    /// 取目录文档：优先本地快照（启用时），否则经传输层抓取。
    ///
    /// 快照读取失败降级为重新下载；下载或解析失败原样上抛。
    pub fn load_or_fetch(
        &self,
        transport: &HttpTransport,
        url: &str,
        options: CatalogOptions,
        cancel: &AtomicBool,
    ) -> Result<CatalogDocument, CatalogError> {
        if cancel.load(Ordering::Relaxed) {
            return Err(CatalogError::Cancelled);
        }

        if options.save_local && !options.force_local && self.snapshot_path.exists() {
            match self.load_snapshot() {
                Ok(catalog) => {
                    info!("catalog loaded from {}", self.snapshot_path.display());
                    return Ok(catalog);
                }
                Err(err) => {
                    warn!(
                        "failed to load local catalog from {}: {err}; downloading instead",
                        self.snapshot_path.display()
                    );
                }
            }
        }

        info!("downloading catalog from {url}");
        let bytes = transport.get_bytes(url)?;
        if cancel.load(Ordering::Relaxed) {
            return Err(CatalogError::Cancelled);
        }
        let catalog: CatalogDocument = plist::from_bytes(&bytes)?;

        if options.save_local || options.force_local {
            // 快照按抓到的字节原样落盘，不做任何转换
            fs::write(&self.snapshot_path, &bytes).map_err(|source| CatalogError::Snapshot {
                path: self.snapshot_path.clone(),
                source,
            })?;
            info!("catalog saved to {}", self.snapshot_path.display());
        }

        Ok(catalog)
    }

    fn load_snapshot(&self) -> Result<CatalogDocument, CatalogError> {
        let bytes = fs::read(&self.snapshot_path).map_err(|source| CatalogError::Snapshot {
            path: self.snapshot_path.clone(),
            source,
        })?;
        Ok(plist::from_bytes(&bytes)?)
    }
}
