//! 产品元数据解析：server metadata / 分发文档抓取与字段提取。
//!
//! 分发文档是上游拼出来的 HTML/plist 混合体，这里的字符串抽取
//! 函数按“尽力而为”工作：抽不出来就留下 Unknown 占位，绝不让
//! 单个字段失败中断整批解析。各个 key 名与标记串是上游契约，
//! 不能改写。

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use plist::Value;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cache::{CachedProduct, MetadataCache};
use super::models::{
    CatalogDocument, PackageDescriptor, Product, ProductRecord, UNKNOWN, sort_time_of,
};
use super::products::is_recovery_package;
use crate::net::transport::{HttpTransport, format_size};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("metadata resolution cancelled")]
    Cancelled,
}

/// server metadata 文档（plist）里用到的字段。
#[derive(Debug, Default, Deserialize)]
struct ServerMetadata {
    #[serde(rename = "CFBundleShortVersionString")]
    version: Option<String>,
    #[serde(default)]
    localization: BTreeMap<String, LocalizedInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct LocalizedInfo {
    title: Option<String>,
    description: Option<Value>,
}

pub struct MetadataResolver<'a> {
    transport: &'a HttpTransport,
    cache: &'a mut MetadataCache,
}

impl<'a> MetadataResolver<'a> {
    pub fn new(transport: &'a HttpTransport, cache: &'a mut MetadataCache) -> Self {
        Self { transport, cache }
    }

    /// 逐个解析产品元数据，输出按发布时间从新到旧排序。
    ///
    /// 缓存命中时只重新计算 `packages`/`size`（包列表在不同镜像间
    /// 可能不同，即使产品身份不变）；完整解析出的产品写回缓存，
    /// 整批结束后统一落盘一次。
    pub fn resolve(
        &mut self,
        product_ids: &[String],
        catalog: &CatalogDocument,
        recovery_only: bool,
        cancel: &AtomicBool,
    ) -> Result<Vec<Product>, ResolveError> {
        info!("resolving metadata for {} products", product_ids.len());
        let mut products = Vec::with_capacity(product_ids.len());
        let mut cache_changed = false;

        for product_id in product_ids {
            if cancel.load(Ordering::Relaxed) {
                return Err(ResolveError::Cancelled);
            }
            let Some(record) = catalog.products.get(product_id) else {
                debug!("product {product_id} missing from catalog, skipping");
                continue;
            };
            let (packages, size) = packages_and_size(record, recovery_only);

            if let Some(entry) = self
                .cache
                .get(product_id)
                .filter(|entry| entry.is_complete())
                .cloned()
            {
                debug!("cache hit for {product_id}");
                products.push(product_from_cache(&entry, packages, size));
                continue;
            }

            let (product, metadata_available) =
                self.resolve_full(product_id, record, packages, size);
            let metadata_listed = record
                .server_metadata_url
                .as_deref()
                .is_some_and(|url| !url.is_empty());
            if (metadata_available || !metadata_listed)
                && let Some(entry) = cache_entry(&product)
            {
                self.cache.insert(entry);
                cache_changed = true;
            }
            products.push(product);
        }

        if cache_changed && let Err(err) = self.cache.flush() {
            // 缓存写失败只影响下次启动的速度，不影响本次结果
            warn!("{err}");
        }

        products.sort_by(|a, b| {
            b.sort_time
                .partial_cmp(&a.sort_time)
                .unwrap_or(CmpOrdering::Equal)
        });
        Ok(products)
    }

    /// 完整解析一个产品；返回产品与 server metadata 是否真的拿到了。
    fn resolve_full(
        &self,
        product_id: &str,
        record: &ProductRecord,
        packages: Vec<PackageDescriptor>,
        size: String,
    ) -> (Product, bool) {
        let mut server_meta: Option<ServerMetadata> = None;
        if let Some(url) = record
            .server_metadata_url
            .as_deref()
            .filter(|url| !url.is_empty())
        {
            match self.transport.get_bytes(url) {
                Ok(bytes) => match plist::from_bytes::<ServerMetadata>(&bytes) {
                    Ok(doc) => server_meta = Some(doc),
                    Err(err) => debug!("server metadata for {product_id} did not parse: {err}"),
                },
                Err(err) => debug!("failed to fetch server metadata for {product_id}: {err}"),
            }
        }
        let metadata_available = server_meta.is_some();
        let english = server_meta
            .as_ref()
            .and_then(|meta| meta.localization.get("English"));

        let mut version = server_meta
            .as_ref()
            .and_then(|meta| meta.version.as_deref())
            .map(|version| version.trim().to_string())
            .unwrap_or_else(|| UNKNOWN.to_string());
        let description = english
            .and_then(|loc| loc.description.as_ref())
            .map(extract_description)
            .unwrap_or_default();

        let dist_text = record
            .english_distribution()
            .and_then(|url| match self.transport.get_string(url) {
                Ok(text) => Some(text),
                Err(err) => {
                    debug!("failed to fetch distribution for {product_id}: {err}");
                    None
                }
            })
            .unwrap_or_default();
        let dist = parse_distribution(&dist_text);

        let title = english
            .and_then(|loc| loc.title.clone())
            .unwrap_or(dist.title);
        // 分发文档里的版本号更准，解析出来了就以它为准
        if !dist.version.eq_ignore_ascii_case(UNKNOWN) {
            version = dist.version;
        }

        let post_date = record.post_date.clone();
        let sort_time = sort_time_of(post_date.as_ref());
        let product = Product {
            product_id: product_id.to_string(),
            title,
            version,
            build: dist.build,
            description,
            device_ids: dist.device_ids,
            post_date,
            sort_time,
            is_full_installer: record
                .install_assistant()
                .is_some_and(|ids| ids.is_os_install()),
            packages,
            size,
        };
        (product, metadata_available)
    }
}

/// 按当前模式过滤包列表并合计大小。
pub(crate) fn packages_and_size(
    record: &ProductRecord,
    recovery_only: bool,
) -> (Vec<PackageDescriptor>, String) {
    let packages: Vec<PackageDescriptor> = if recovery_only {
        record
            .packages
            .iter()
            .filter(|package| is_recovery_package(&package.url))
            .cloned()
            .collect()
    } else {
        record.packages.clone()
    };
    let total: u64 = packages.iter().map(|package| package.size).sum();
    (packages, format_size(total as f64))
}

fn product_from_cache(
    entry: &CachedProduct,
    packages: Vec<PackageDescriptor>,
    size: String,
) -> Product {
    Product {
        product_id: entry.product.clone(),
        title: entry.title.clone(),
        version: entry.version.clone(),
        build: entry.build.clone(),
        description: entry.description.clone(),
        device_ids: entry.device_ids.clone(),
        post_date: Some(entry.date.clone()),
        sort_time: sort_time_of(Some(&entry.date)),
        is_full_installer: entry.installer,
        packages,
        size,
    }
}

/// 产品完整时给出可写入缓存的条目；任何字段还是 Unknown（或缺少
/// 发布时间）都返回 None。
fn cache_entry(product: &Product) -> Option<CachedProduct> {
    let date = product.post_date.clone()?;
    let entry = CachedProduct {
        product: product.product_id.clone(),
        title: product.title.clone(),
        version: product.version.clone(),
        build: product.build.clone(),
        description: product.description.clone(),
        device_ids: product.device_ids.clone(),
        date,
        installer: product.is_full_installer,
    };
    entry.is_complete().then_some(entry)
}

// ── 分发文档的字符串抽取 ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DistributionInfo {
    pub build: String,
    pub version: String,
    pub title: String,
    pub device_ids: Vec<String>,
}

pub(crate) fn parse_distribution(text: &str) -> DistributionInfo {
    let build_key = if text.contains("macOSProductBuildVersion") {
        "macOSProductBuildVersion"
    } else {
        "BUILD"
    };
    let version_key = if text.contains("macOSProductVersion") {
        "macOSProductVersion"
    } else {
        "VERSION"
    };
    DistributionInfo {
        build: key_string_value(text, build_key).unwrap_or_else(|| UNKNOWN.to_string()),
        version: key_string_value(text, version_key).unwrap_or_else(|| UNKNOWN.to_string()),
        title: title_tag(text).unwrap_or_else(|| UNKNOWN.to_string()),
        device_ids: supported_device_ids(text),
    }
}

/// `<key>K</key>` 之后第一个 `<string>` 的内容。
fn key_string_value(text: &str, key: &str) -> Option<String> {
    let marker = format!("<key>{key}</key>");
    let after = text.split(marker.as_str()).nth(1)?;
    let value = after.split("<string>").nth(1)?.split("</string>").next()?;
    Some(value.to_string())
}

fn title_tag(text: &str) -> Option<String> {
    let re = regex::Regex::new(r"<title>(.+?)</title>").ok()?;
    Some(re.captures(text)?.get(1)?.as_str().to_string())
}

/// `var supportedDeviceIDs = ['A', 'b', ...];` 数组，小写去重。
fn supported_device_ids(text: &str) -> Vec<String> {
    let Some(list) = regex::Regex::new(r"var supportedDeviceIDs\s*=\s*\[([^\]]+)\];")
        .ok()
        .and_then(|re| Some(re.captures(text)?.get(1)?.as_str().to_string()))
    else {
        return Vec::new();
    };
    let Ok(item) = regex::Regex::new(r"'([^',]+)'") else {
        return Vec::new();
    };
    let mut ids = BTreeSet::new();
    for caps in item.captures_iter(&list) {
        if let Some(m) = caps.get(1) {
            ids.insert(m.as_str().to_ascii_lowercase());
        }
    }
    ids.into_iter().collect()
}

/// 本地化描述：`"p1">` 标记到下一个 `</a>` 之间的文本；
/// 形状不符一律返回空串。
fn extract_description(value: &Value) -> String {
    let text = match value {
        Value::String(text) => text.clone(),
        Value::Data(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        _ => return String::new(),
    };
    text.split("\"p1\">")
        .nth(1)
        .and_then(|rest| rest.split("</a>").next())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::TransportConfig;
    use plist::Date;
    use std::time::{Duration, UNIX_EPOCH};

    const SAMPLE_DIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<installer-gui-script minSpecVersion="2">
    <title>macOS Sequoia</title>
    <script>
    var supportedDeviceIDs = ['J180dAP', 'VMA2MACOSAP', 'j180dap'];
    function InstallationCheck() { return true; }
    </script>
    <auxinfo>
        <dict>
            <key>macOSProductBuildVersion</key>
            <string>24B83</string>
            <key>macOSProductVersion</key>
            <string>15.1</string>
        </dict>
    </auxinfo>
</installer-gui-script>"#;

    const LEGACY_DIST: &str = r#"<installer-gui-script>
    <title>Install macOS High Sierra</title>
    <auxinfo>
        <key>BUILD</key>
        <string>17G66</string>
        <key>VERSION</key>
        <string>10.13.6</string>
    </auxinfo>
</installer-gui-script>"#;

    #[test]
    fn parses_modern_distribution_keys() {
        let dist = parse_distribution(SAMPLE_DIST);
        assert_eq!(dist.build, "24B83");
        assert_eq!(dist.version, "15.1");
        assert_eq!(dist.title, "macOS Sequoia");
        // 小写化且去重、稳定有序
        assert_eq!(dist.device_ids, vec!["j180dap".to_string(), "vma2macosap".to_string()]);
    }

    #[test]
    fn falls_back_to_legacy_keys() {
        let dist = parse_distribution(LEGACY_DIST);
        assert_eq!(dist.build, "17G66");
        assert_eq!(dist.version, "10.13.6");
        assert_eq!(dist.title, "Install macOS High Sierra");
        assert!(dist.device_ids.is_empty());
    }

    #[test]
    fn empty_document_yields_unknown_sentinels() {
        let dist = parse_distribution("");
        assert_eq!(dist.build, UNKNOWN);
        assert_eq!(dist.version, UNKNOWN);
        assert_eq!(dist.title, UNKNOWN);
        assert!(dist.device_ids.is_empty());
    }

    #[test]
    fn description_extraction_is_best_effort() {
        let html = Value::String(
            r#"<a href="x" class="p1">Get macOS Sequoia, the latest update.</a><br>"#.to_string(),
        );
        assert_eq!(
            extract_description(&html),
            "Get macOS Sequoia, the latest update."
        );

        let mismatch = Value::String("<p>No marker here</p>".to_string());
        assert_eq!(extract_description(&mismatch), "");

        let data = Value::Data(br#"prefix "p1">from bytes</a>"#.to_vec());
        assert_eq!(extract_description(&data), "from bytes");
    }

    fn record_with_packages(date_secs: u64) -> ProductRecord {
        ProductRecord {
            post_date: Some(Date::from(UNIX_EPOCH + Duration::from_secs(date_secs))),
            packages: vec![
                PackageDescriptor {
                    url: "https://example.com/InstallAssistant.pkg".to_string(),
                    size: 1024,
                },
                PackageDescriptor {
                    url: "https://example.com/RecoveryHDUpdate.pkg".to_string(),
                    size: 512,
                },
            ],
            ..Default::default()
        }
    }

    fn cached(id: &str, date_secs: u64) -> CachedProduct {
        CachedProduct {
            product: id.to_string(),
            title: "macOS".to_string(),
            version: "15.0".to_string(),
            build: "24A335".to_string(),
            description: String::new(),
            device_ids: Vec::new(),
            date: Date::from(UNIX_EPOCH + Duration::from_secs(date_secs)),
            installer: true,
        }
    }

    #[test]
    fn recovery_filter_and_size_aggregation() {
        let record = record_with_packages(0);
        let (packages, size) = packages_and_size(&record, true);
        assert_eq!(packages.len(), 1);
        assert!(packages[0].url.ends_with("RecoveryHDUpdate.pkg"));
        assert_eq!(size, "512 B");

        let (packages, size) = packages_and_size(&record, false);
        assert_eq!(packages.len(), 2);
        assert_eq!(size, "1.5 KB");
    }

    #[test]
    fn cached_products_come_back_sorted_by_post_date_descending() {
        // 2023-01-01, 2024-06-01, 2022-05-01
        let dates = [
            ("001-2023", 1_672_531_200u64),
            ("002-2024", 1_717_200_000u64),
            ("003-2022", 1_651_363_200u64),
        ];

        let dir = tempfile::tempdir().unwrap();
        let mut cache = MetadataCache::load(dir.path());
        let mut catalog = CatalogDocument::default();
        let mut ids = Vec::new();
        for (id, secs) in dates {
            cache.insert(cached(id, secs));
            catalog
                .products
                .insert(id.to_string(), record_with_packages(secs));
            ids.push(id.to_string());
        }

        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        let cancel = AtomicBool::new(false);
        let products = MetadataResolver::new(&transport, &mut cache)
            .resolve(&ids, &catalog, false, &cancel)
            .unwrap();

        let order: Vec<&str> = products.iter().map(|p| p.product_id.as_str()).collect();
        assert_eq!(order, vec!["002-2024", "001-2023", "003-2022"]);
        // 缓存命中仍会带上实时计算的包列表与大小
        assert_eq!(products[0].packages.len(), 2);
        assert_eq!(products[0].size, "1.5 KB");
    }

    #[test]
    fn unresolved_products_are_never_cached() {
        // 没有任何元数据来源的产品：全部字段停在 Unknown
        let dir = tempfile::tempdir().unwrap();
        let mut cache = MetadataCache::load(dir.path());
        let mut catalog = CatalogDocument::default();
        catalog
            .products
            .insert("005-55555".to_string(), record_with_packages(1_700_000_000));
        let ids = vec!["005-55555".to_string()];

        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        let cancel = AtomicBool::new(false);
        let products = MetadataResolver::new(&transport, &mut cache)
            .resolve(&ids, &catalog, false, &cancel)
            .unwrap();

        assert_eq!(products.len(), 1);
        assert_eq!(products[0].title, UNKNOWN);
        assert_eq!(products[0].build, UNKNOWN);
        assert!(cache.is_empty());
        assert!(!dir.path().join("prod_cache.plist").exists());
    }

    #[test]
    fn cancellation_interrupts_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = MetadataCache::load(dir.path());
        let catalog = CatalogDocument::default();
        let ids = vec!["001".to_string()];

        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        let cancel = AtomicBool::new(true);
        let err = MetadataResolver::new(&transport, &mut cache)
            .resolve(&ids, &catalog, false, &cancel)
            .unwrap_err();
        assert!(matches!(err, ResolveError::Cancelled));
    }

    #[test]
    fn cache_hits_preserve_identity_fields() {
        let entry = cached("042-00042", 1_700_000_000);
        let product = product_from_cache(&entry, Vec::new(), "  0 B".to_string());
        assert_eq!(product.product_id, "042-00042");
        assert_eq!(product.title, entry.title);
        assert_eq!(product.version, entry.version);
        assert_eq!(product.build, entry.build);
        assert_eq!(product.description, entry.description);
        assert_eq!(product.device_ids, entry.device_ids);
        assert_eq!(product.post_date, Some(entry.date.clone()));
        assert!(product.is_full_installer);
        // 派生字段不从缓存来
        assert!(product.packages.is_empty());
        assert_eq!(product.size, "  0 B");
    }
}
