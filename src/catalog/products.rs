//! 从目录文档里筛出候选产品 ID。

use super::models::CatalogDocument;

/// 恢复分区镜像的包文件名后缀。
pub const RECOVERY_SUFFIXES: [&str; 2] = ["RecoveryHDUpdate.pkg", "RecoveryHDMetaDmg.pkg"];

pub fn is_recovery_package(url: &str) -> bool {
    RECOVERY_SUFFIXES.iter().any(|suffix| url.ends_with(suffix))
}

/// 候选产品列表。
///
/// 完整安装器模式：`OSInstall` 是系统安装包，或 `SharedSupport`
/// 带 InstallAssistant 前缀。恢复镜像模式：任一包 URL 以已知的
/// 恢复镜像文件名结尾。输出顺序即目录的遍历顺序，用户可见的
/// 排序由后续的发布时间决定。
pub fn installer_product_ids(catalog: &CatalogDocument, recovery_only: bool) -> Vec<String> {
    catalog
        .products
        .iter()
        .filter(|(_, record)| {
            if recovery_only {
                record.packages.iter().any(|package| is_recovery_package(&package.url))
            } else {
                record
                    .install_assistant()
                    .is_some_and(|ids| ids.is_os_install() || ids.is_install_assistant())
            }
        })
        .map(|(id, _)| id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::models::{
        ExtendedMetaInfo, InstallAssistantPackageIdentifiers, PackageDescriptor, ProductRecord,
    };
    use plist::Value;

    fn full_installer_record() -> ProductRecord {
        ProductRecord {
            extended_meta_info: Some(ExtendedMetaInfo {
                install_assistant: Some(InstallAssistantPackageIdentifiers {
                    os_install: Some(Value::String("com.apple.mpkg.OSInstall".to_string())),
                    shared_support: None,
                }),
            }),
            ..Default::default()
        }
    }

    fn shared_support_record() -> ProductRecord {
        ProductRecord {
            extended_meta_info: Some(ExtendedMetaInfo {
                install_assistant: Some(InstallAssistantPackageIdentifiers {
                    os_install: None,
                    shared_support: Some(Value::String(
                        "com.apple.pkg.InstallAssistant.macOSSequoia".to_string(),
                    )),
                }),
            }),
            ..Default::default()
        }
    }

    fn recovery_record() -> ProductRecord {
        ProductRecord {
            packages: vec![
                PackageDescriptor {
                    url: "https://example.com/071-00001/RecoveryHDUpdate.pkg".to_string(),
                    size: 512,
                },
                PackageDescriptor {
                    url: "https://example.com/071-00001/BaseSystem.dmg".to_string(),
                    size: 1024,
                },
            ],
            ..Default::default()
        }
    }

    fn plain_update_record() -> ProductRecord {
        ProductRecord {
            packages: vec![PackageDescriptor {
                url: "https://example.com/001-00002/SafariUpdate.pkg".to_string(),
                size: 77,
            }],
            ..Default::default()
        }
    }

    fn catalog() -> CatalogDocument {
        let mut catalog = CatalogDocument::default();
        catalog
            .products
            .insert("001-00002".to_string(), plain_update_record());
        catalog
            .products
            .insert("042-11111".to_string(), full_installer_record());
        catalog
            .products
            .insert("042-22222".to_string(), shared_support_record());
        catalog
            .products
            .insert("071-00001".to_string(), recovery_record());
        catalog
    }

    #[test]
    fn full_installer_mode_matches_os_install_and_shared_support() {
        let ids = installer_product_ids(&catalog(), false);
        assert_eq!(ids, vec!["042-11111".to_string(), "042-22222".to_string()]);
    }

    #[test]
    fn recovery_mode_matches_known_package_suffixes() {
        let ids = installer_product_ids(&catalog(), true);
        assert_eq!(ids, vec!["071-00001".to_string()]);
    }

    #[test]
    fn recovery_suffix_match_is_exact_on_the_tail() {
        assert!(is_recovery_package("http://x/RecoveryHDMetaDmg.pkg"));
        assert!(!is_recovery_package("http://x/RecoveryHDMetaDmg.pkg.asc"));
        assert!(!is_recovery_package("http://x/InstallAssistant.pkg"));
    }
}
