//! 下载相关的数据模型定义。

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 一个成功落盘的包文件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub file_name: String,
    pub path: PathBuf,
}

/// 整个产品全部下载成功后的汇报。
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    pub product_dir: PathBuf,
    pub files: Vec<DownloadedFile>,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("there were no files to download for this product")]
    NoFilesToDownload,
    /// 用户取消；与失败严格区分，调用方不应当作错误弹报。
    #[error("download cancelled")]
    Cancelled,
    /// 批内个别文件失败；逐个列出失败的文件名，成功的文件保留在磁盘上。
    #[error("{} file(s) failed to download: {}", failed.len(), failed.join(", "))]
    PartialBatchFailure {
        failed: Vec<String>,
        completed: Vec<DownloadedFile>,
    },
    #[error("failed to create {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
}
