//! HTTP 传输层：文本/字节抓取与可断点续传的流式下载。
//!
//! 只认识 URL 和本地文件，不了解目录结构或产品语义。

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderValue, RANGE, USER_AGENT};
use thiserror::Error;
use tracing::{debug, warn};

const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server returned HTTP {0}")]
    Http(StatusCode),
    #[error("connection to {url} interrupted: {source}")]
    Stream { url: String, source: io::Error },
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_13_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/11.1.2 Safari/605.1.15".to_string(),
        }
    }
}

/// 一次流式下载请求。
#[derive(Debug, Clone)]
pub struct StreamRequest<'a> {
    pub url: &'a str,
    pub dest: &'a Path,
    pub resume_from: u64,
    pub known_total: Option<u64>,
    pub allow_resume: bool,
}

/// 流式下载的非错误结果：完成或被用户取消。
/// 取消不是错误，调用方必须区别对待。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed(PathBuf),
    Cancelled,
}

pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or(HeaderValue::from_static("Mozilla/5.0")),
        );

        // 整体超时只用于小请求；流式请求按连接超时控制，
        // 否则大文件下载会在 30 秒后被掐断。
        let client = Client::builder()
            .default_headers(default_headers)
            .connect_timeout(config.request_timeout)
            .timeout(None)
            .build()?;

        Ok(Self { client, config })
    }

    /// GET 并按 UTF-8 解码为文本。
    pub fn get_string(&self, url: &str) -> Result<String, TransportError> {
        let resp = self
            .client
            .get(url)
            .timeout(self.config.request_timeout)
            .send()?
            .error_for_status()?;
        Ok(resp.text()?)
    }

    /// GET 原始字节。
    pub fn get_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let resp = self
            .client
            .get(url)
            .timeout(self.config.request_timeout)
            .send()?
            .error_for_status()?;
        Ok(resp.bytes()?.to_vec())
    }

    /// 把 `req.url` 的内容流式写入 `req.dest`。
    ///
    /// - `resume_from > 0` 且允许续传时发送 `Range: bytes=<n>-`；
    /// - 每写完一个 8 KiB 块回调一次进度并检查取消标志；
    /// - 取消与普通失败都会把已写入的部分文件留在磁盘上（便于续传）；
    /// - 服务器对非零偏移回 416 时：删除部分文件，并以
    ///   `resume_from = 0, allow_resume = false` 重试一次。只重试这一次。
    pub fn stream_to_file(
        &self,
        req: &StreamRequest<'_>,
        on_progress: &mut dyn FnMut(u64, Option<u64>, Instant),
        cancel: &AtomicBool,
    ) -> Result<StreamOutcome, TransportError> {
        match self.stream_once(
            req.url,
            req.dest,
            req.resume_from,
            req.known_total,
            req.allow_resume,
            on_progress,
            cancel,
        ) {
            Err(TransportError::Http(status))
                if status == StatusCode::RANGE_NOT_SATISFIABLE
                    && req.allow_resume
                    && req.resume_from > 0 =>
            {
                warn!(
                    "server rejected range request for {}; restarting from scratch",
                    req.url
                );
                if req.dest.exists() {
                    fs::remove_file(req.dest).map_err(|source| TransportError::Io {
                        path: req.dest.to_path_buf(),
                        source,
                    })?;
                }
                self.stream_once(req.url, req.dest, 0, None, false, on_progress, cancel)
            }
            other => other,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn stream_once(
        &self,
        url: &str,
        dest: &Path,
        resume_from: u64,
        known_total: Option<u64>,
        allow_resume: bool,
        on_progress: &mut dyn FnMut(u64, Option<u64>, Instant),
        cancel: &AtomicBool,
    ) -> Result<StreamOutcome, TransportError> {
        if cancel.load(Ordering::Relaxed) {
            return Ok(StreamOutcome::Cancelled);
        }

        let started = Instant::now();
        let resuming = allow_resume && resume_from > 0;
        let mut total = known_total;

        // 续传时总大小未知：先 HEAD 一次拿 Content-Length（尽力而为）。
        if total.is_none() && resuming {
            match self
                .client
                .head(url)
                .timeout(self.config.request_timeout)
                .send()
            {
                Ok(resp) => total = content_length(&resp),
                Err(err) => debug!("HEAD {url} failed: {err}"),
            }
        }

        if cancel.load(Ordering::Relaxed) {
            return Ok(StreamOutcome::Cancelled);
        }

        let mut request = self.client.get(url);
        if resuming {
            request = request.header(RANGE, format!("bytes={resume_from}-"));
        }
        let mut resp = request.send()?;
        if !resp.status().is_success() {
            return Err(TransportError::Http(resp.status()));
        }
        if total.is_none() {
            total = content_length(&resp);
        }

        let mut file = if resuming {
            OpenOptions::new().append(true).create(true).open(dest)
        } else {
            File::create(dest)
        }
        .map_err(|source| TransportError::Io {
            path: dest.to_path_buf(),
            source,
        })?;

        let mut received = resume_from;
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Ok(StreamOutcome::Cancelled);
            }
            let n = resp.read(&mut buf).map_err(|source| TransportError::Stream {
                url: url.to_string(),
                source,
            })?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).map_err(|source| TransportError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
            received += n as u64;
            on_progress(received, total, started);
        }

        Ok(StreamOutcome::Completed(dest.to_path_buf()))
    }
}

fn content_length(resp: &reqwest::blocking::Response) -> Option<u64> {
    resp.headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

/// 人类可读的大小字符串；宽度和小数位是展示契约的一部分。
pub fn format_size(size: f64) -> String {
    const KB: f64 = 1024.0;
    if size < KB {
        format!("{size:>3.0} B")
    } else if size < KB.powi(2) {
        format!("{:>3.1} KB", size / KB)
    } else if size < KB.powi(3) {
        format!("{:>3.1} MB", size / KB.powi(2))
    } else if size < KB.powi(4) {
        format!("{:>3.1} GB", size / KB.powi(3))
    } else {
        format!("{:>3.1} TB", size / KB.powi(4))
    }
}

/// `42s` / ` 3m 20s` / ` 1h  2m  3s` 形式的时长字符串。
pub fn format_duration(seconds: f64) -> String {
    let t = seconds.max(0.0) as u64;
    if t < 60 {
        format!("{t:>2}s")
    } else if t < 3600 {
        format!("{:>2}m {:>2}s", t / 60, t % 60)
    } else {
        format!("{:>2}h {:>2}m {:>2}s", t / 3600, (t % 3600) / 60, t % 60)
    }
}
