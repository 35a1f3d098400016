//! 按产品下载包文件的引擎。
//!
//! 一个产品内的文件严格串行下载：对服务端友好，进度汇报也简单。
//! 单个文件失败不会中断整批，收尾时统一汇报；用户取消则立刻停。

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{error, info};

use super::models::{DownloadError, DownloadReport, DownloadedFile};
use super::progress::ProgressReporter;
use crate::catalog::models::{PackageDescriptor, Product};
use crate::net::transport::{HttpTransport, StreamOutcome, StreamRequest};

pub struct ProductDownloader<'a> {
    transport: &'a HttpTransport,
}

impl<'a> ProductDownloader<'a> {
    pub fn new(transport: &'a HttpTransport) -> Self {
        Self { transport }
    }

    /// 把产品的所有包文件下载到 `<download_dir>/<产品目录>/` 下。
    ///
    /// 已存在的部分文件按其当前大小续传。`dmg_only` 只保留磁盘镜像。
    pub fn download_product(
        &self,
        product: &Product,
        download_dir: &Path,
        dmg_only: bool,
        reporter: &mut ProgressReporter,
        cancel: &AtomicBool,
    ) -> Result<DownloadReport, DownloadError> {
        let product_dir = download_dir.join(product_dir_name(product));

        let files: Vec<&PackageDescriptor> = product
            .packages
            .iter()
            .filter(|package| {
                !package.url.is_empty()
                    && (!dmg_only || package.url.to_lowercase().ends_with(".dmg"))
            })
            .collect();
        if files.is_empty() {
            return Err(DownloadError::NoFilesToDownload);
        }

        fs::create_dir_all(&product_dir).map_err(|source| DownloadError::CreateDir {
            path: product_dir.clone(),
            source,
        })?;

        let mut completed: Vec<DownloadedFile> = Vec::new();
        let mut failed: Vec<String> = Vec::new();

        for (index, package) in files.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                return Err(DownloadError::Cancelled);
            }

            let file_name = file_name_from_url(&package.url);
            let dest = product_dir.join(&file_name);
            let resume_from = fs::metadata(&dest).map(|meta| meta.len()).unwrap_or(0);

            info!(
                "downloading file {} of {}: {} -> {}",
                index + 1,
                files.len(),
                file_name,
                product_dir.display()
            );
            reporter.begin_file(index, files.len(), &file_name);

            let request = StreamRequest {
                url: &package.url,
                dest: &dest,
                resume_from,
                known_total: None,
                allow_resume: true,
            };
            let mut on_progress = |received: u64, total: Option<u64>, started: Instant| {
                reporter.transfer(received, total, started);
            };
            match self.transport.stream_to_file(&request, &mut on_progress, cancel) {
                Ok(StreamOutcome::Completed(path)) => {
                    info!("successfully downloaded {file_name}");
                    completed.push(DownloadedFile { file_name, path });
                }
                Ok(StreamOutcome::Cancelled) => {
                    info!("download cancelled by user");
                    return Err(DownloadError::Cancelled);
                }
                Err(err) => {
                    error!("failed to download {file_name}: {err}");
                    failed.push(file_name);
                }
            }
        }
        reporter.finish();

        if !failed.is_empty() {
            return Err(DownloadError::PartialBatchFailure { failed, completed });
        }
        Ok(DownloadReport {
            product_dir,
            files: completed,
        })
    }
}

/// 产品目录名：`<id> - <版本> <标题> (<构建号>)`，剔除冒号。
pub fn product_dir_name(product: &Product) -> String {
    format!(
        "{} - {} {} ({})",
        product.product_id, product.version, product.title, product.build
    )
    .replace(':', "")
    .trim()
    .to_string()
}

fn file_name_from_url(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}
