//! 目录文档与产品的数据模型定义。
//!
//! `CatalogDocument` 按软件更新目录（sucatalog）的原始结构建模，
//! `Product` 是解析归一化之后、其余模块操作的单位。

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use plist::{Date, Value};
use serde::Deserialize;

/// 元数据未能解析出来时的占位值。
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Default, Deserialize)]
pub struct CatalogDocument {
    #[serde(rename = "Products", default)]
    pub products: BTreeMap<String, ProductRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductRecord {
    #[serde(rename = "PostDate")]
    pub post_date: Option<Date>,
    #[serde(rename = "ExtendedMetaInfo")]
    pub extended_meta_info: Option<ExtendedMetaInfo>,
    #[serde(rename = "ServerMetadataURL")]
    pub server_metadata_url: Option<String>,
    #[serde(rename = "Distributions", default)]
    pub distributions: BTreeMap<String, String>,
    #[serde(rename = "Packages", default)]
    pub packages: Vec<PackageDescriptor>,
}

impl ProductRecord {
    /// 英文分发文档的 URL（优先 `English`，回退 `en`）。
    pub fn english_distribution(&self) -> Option<&str> {
        self.distributions
            .get("English")
            .or_else(|| self.distributions.get("en"))
            .map(String::as_str)
    }

    pub fn install_assistant(&self) -> Option<&InstallAssistantPackageIdentifiers> {
        self.extended_meta_info
            .as_ref()
            .and_then(|meta| meta.install_assistant.as_ref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ExtendedMetaInfo {
    #[serde(rename = "InstallAssistantPackageIdentifiers")]
    pub install_assistant: Option<InstallAssistantPackageIdentifiers>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InstallAssistantPackageIdentifiers {
    #[serde(rename = "OSInstall")]
    pub os_install: Option<Value>,
    #[serde(rename = "SharedSupport")]
    pub shared_support: Option<Value>,
}

impl InstallAssistantPackageIdentifiers {
    pub fn is_os_install(&self) -> bool {
        self.os_install.as_ref().and_then(Value::as_string) == Some("com.apple.mpkg.OSInstall")
    }

    pub fn is_install_assistant(&self) -> bool {
        self.shared_support
            .as_ref()
            .and_then(Value::as_string)
            .is_some_and(|id| id.starts_with("com.apple.pkg.InstallAssistant"))
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PackageDescriptor {
    #[serde(rename = "URL", default)]
    pub url: String,
    #[serde(rename = "Size", default)]
    pub size: u64,
}

/// 归一化后的产品记录。
#[derive(Debug, Clone)]
pub struct Product {
    pub product_id: String,
    pub title: String,
    pub version: String,
    pub build: String,
    pub description: String,
    pub device_ids: Vec<String>,
    pub post_date: Option<Date>,
    /// 发布时间的 Unix 秒数，仅用于排序，不持久化。
    pub sort_time: f64,
    pub is_full_installer: bool,
    pub packages: Vec<PackageDescriptor>,
    /// 包大小合计的展示字符串；每次解析重新计算，不进缓存。
    pub size: String,
}

impl Product {
    /// 列表里展示的名称：`标题 版本 (构建号)`，构建号未知时省略。
    pub fn display_name(&self) -> String {
        if self.build.eq_ignore_ascii_case(UNKNOWN) {
            format!("{} {}", self.title, self.version)
        } else {
            format!("{} {} ({})", self.title, self.version, self.build)
        }
    }
}

/// plist 日期转 Unix 秒（排序键）。
pub fn sort_time_of(date: Option<&Date>) -> f64 {
    date.map(|date| {
        SystemTime::from(date.clone())
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0)
    })
    .unwrap_or(0.0)
}
