//! 命令行交互层。
//!
//! 长任务（刷新目录、下载）放在独立 worker 线程上跑，主线程只
//! 消费 worker 发来的事件（状态行 / 进度快照），自己绝不碰网络
//! 或磁盘 I/O。取消通过共享标志位协作完成：Ctrl-C 置位，worker
//! 在约定的检查点退出。同一时刻至多一个 worker 在跑。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::SystemTime;

use anyhow::{Result, anyhow};
use crossbeam_channel::{Sender, unbounded};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::info;

use crate::base_system::context::Config;
use crate::base_system::keep_awake::KeepAwake;
use crate::catalog::cache::MetadataCache;
use crate::catalog::metadata::{MetadataResolver, ResolveError};
use crate::catalog::models::Product;
use crate::catalog::products::installer_product_ids;
use crate::catalog::resolver::{CatalogError, CatalogOptions, CatalogResolver, catalog_url};
use crate::download::downloader::ProductDownloader;
use crate::download::models::{DownloadError, DownloadReport};
use crate::download::progress::{TransferProgress, make_reporter};
use crate::net::transport::{HttpTransport, TransportConfig};

/// worker → 主线程的事件（单生产者单消费者）。
enum WorkerEvent {
    Status(String),
    Progress(TransferProgress),
}

enum TaskOutcome<T> {
    Done(T),
    Cancelled,
    Failed(anyhow::Error),
}

pub fn run_list(config: &Config, data_dir: Option<&Path>) -> Result<()> {
    let data_dir = effective_data_dir(data_dir);
    let cancel = install_cancel_flag()?;
    let (events, rx) = unbounded();

    let worker = {
        let config = config.clone();
        let cancel = Arc::clone(&cancel);
        thread::spawn(move || refresh_products(&config, &data_dir, &events, &cancel))
    };

    for event in rx {
        if let WorkerEvent::Status(message) = event {
            println!("{message}");
        }
    }

    match join_worker(worker)? {
        TaskOutcome::Done(products) => {
            print_product_table(&products);
            Ok(())
        }
        TaskOutcome::Cancelled => {
            println!("Operation cancelled by user.");
            Ok(())
        }
        TaskOutcome::Failed(err) => Err(err),
    }
}

pub fn run_download(
    config: &Config,
    data_dir: Option<&Path>,
    product_id: &str,
    dmg_only: bool,
) -> Result<()> {
    let data_dir = effective_data_dir(data_dir);
    let download_dir = config.default_download_dir();
    let cancel = install_cancel_flag()?;
    let (events, rx) = unbounded();

    let worker = {
        let config = config.clone();
        let product_id = product_id.to_string();
        let download_dir = download_dir.clone();
        let cancel = Arc::clone(&cancel);
        thread::spawn(move || {
            download_task(
                &config,
                &data_dir,
                &download_dir,
                &product_id,
                dmg_only,
                &events,
                &cancel,
            )
        })
    };

    let mut bar: Option<ProgressBar> = None;
    let mut current_file = usize::MAX;
    for event in rx {
        match event {
            WorkerEvent::Status(message) => {
                if let Some(bar) = &bar {
                    bar.println(&message);
                } else {
                    println!("{message}");
                }
            }
            WorkerEvent::Progress(progress) => {
                if current_file != progress.file_index {
                    if let Some(old) = bar.take() {
                        old.finish_and_clear();
                    }
                    current_file = progress.file_index;
                    println!(
                        "Downloading file {} of {}...",
                        progress.file_index + 1,
                        progress.file_count
                    );
                    bar = Some(new_transfer_bar());
                }
                if let Some(bar) = &bar {
                    if let Some(total) = progress.total {
                        bar.set_length(total);
                    }
                    bar.set_position(progress.received);
                    bar.set_message(progress.status_line());
                }
            }
        }
    }
    if let Some(bar) = bar.take() {
        bar.finish_and_clear();
    }

    match join_worker(worker)? {
        TaskOutcome::Done(report) => {
            println!(
                "All {} file(s) downloaded to {}",
                report.files.len(),
                report.product_dir.display()
            );
            Ok(())
        }
        TaskOutcome::Cancelled => {
            println!("Operation cancelled by user. Partial files are kept for resuming.");
            Ok(())
        }
        TaskOutcome::Failed(err) => Err(err),
    }
}

// ── worker 侧 ────────────────────────────────────────────────

fn refresh_products(
    config: &Config,
    data_dir: &Path,
    events: &Sender<WorkerEvent>,
    cancel: &AtomicBool,
) -> TaskOutcome<Vec<Product>> {
    let transport = match HttpTransport::new(transport_config(config)) {
        Ok(transport) => transport,
        Err(err) => return TaskOutcome::Failed(err.into()),
    };

    let mut cache = MetadataCache::load(data_dir);
    if config.force_local {
        // 强制刷新连同产品缓存一起作废
        cache.clear();
    }

    let channel = config.channel();
    let url = catalog_url(channel, config.current_macos);
    send_status(events, format!("Downloading {channel} catalog from:\n{url}"));

    let resolver = CatalogResolver::new(data_dir);
    let options = CatalogOptions {
        save_local: config.save_local,
        force_local: config.force_local,
    };
    let catalog = match resolver.load_or_fetch(&transport, &url, options, cancel) {
        Ok(catalog) => catalog,
        Err(CatalogError::Cancelled) => return TaskOutcome::Cancelled,
        Err(err) => return TaskOutcome::Failed(err.into()),
    };

    let ids = installer_product_ids(&catalog, config.find_recovery);
    send_status(
        events,
        format!("Scanning {} candidate products...", ids.len()),
    );

    match MetadataResolver::new(&transport, &mut cache).resolve(
        &ids,
        &catalog,
        config.find_recovery,
        cancel,
    ) {
        Ok(products) => TaskOutcome::Done(products),
        Err(ResolveError::Cancelled) => TaskOutcome::Cancelled,
    }
}

fn download_task(
    config: &Config,
    data_dir: &Path,
    download_dir: &Path,
    product_id: &str,
    dmg_only: bool,
    events: &Sender<WorkerEvent>,
    cancel: &AtomicBool,
) -> TaskOutcome<DownloadReport> {
    let products = match refresh_products(config, data_dir, events, cancel) {
        TaskOutcome::Done(products) => products,
        TaskOutcome::Cancelled => return TaskOutcome::Cancelled,
        TaskOutcome::Failed(err) => return TaskOutcome::Failed(err),
    };

    let Some(product) = products
        .into_iter()
        .find(|product| product.product_id == product_id)
    else {
        return TaskOutcome::Failed(anyhow!(
            "product {product_id} not found in the current catalog (try `list` first)"
        ));
    };

    send_status(
        events,
        format!(
            "Downloading {} ({}) to {}",
            product.display_name(),
            product.size.trim(),
            download_dir.display()
        ),
    );

    let transport = match HttpTransport::new(transport_config(config)) {
        Ok(transport) => transport,
        Err(err) => return TaskOutcome::Failed(err.into()),
    };

    let mut keep_awake = KeepAwake::start(config.caffeinate_downloads);
    let mut reporter = make_reporter(Some(Box::new({
        let events = events.clone();
        move |progress| {
            let _ = events.send(WorkerEvent::Progress(progress));
        }
    })));

    let result = ProductDownloader::new(&transport).download_product(
        &product,
        download_dir,
        dmg_only,
        &mut reporter,
        cancel,
    );
    keep_awake.stop();

    match result {
        Ok(report) => TaskOutcome::Done(report),
        Err(DownloadError::Cancelled) => TaskOutcome::Cancelled,
        Err(err) => TaskOutcome::Failed(err.into()),
    }
}

// ── 辅助 ─────────────────────────────────────────────────────

fn transport_config(config: &Config) -> TransportConfig {
    TransportConfig {
        request_timeout: std::time::Duration::from_secs(config.request_timeout.max(1)),
        ..TransportConfig::default()
    }
}

fn effective_data_dir(data_dir: Option<&Path>) -> PathBuf {
    data_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn install_cancel_flag() -> Result<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
        eprintln!("\nCancelling, please wait...");
    })?;
    Ok(cancel)
}

fn join_worker<T>(worker: thread::JoinHandle<TaskOutcome<T>>) -> Result<TaskOutcome<T>> {
    worker
        .join()
        .map_err(|_| anyhow!("worker thread panicked"))
}

fn send_status(events: &Sender<WorkerEvent>, message: String) {
    info!("{message}");
    let _ = events.send(WorkerEvent::Status(message));
}

fn new_transfer_bar() -> ProgressBar {
    let style = ProgressStyle::with_template("[{elapsed_precise}] {wide_bar} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
    bar.set_style(style);
    bar
}

fn print_product_table(products: &[Product]) {
    if products.is_empty() {
        println!("No products found for the current catalog settings.");
        return;
    }
    println!(
        "{:<44} {:<10} {:<10} {:>10}  {:<12} {}",
        "NAME", "VERSION", "BUILD", "SIZE", "PRODUCT ID", "POST DATE"
    );
    for product in products {
        println!(
            "{:<44} {:<10} {:<10} {:>10}  {:<12} {}",
            product.display_name(),
            product.version,
            product.build,
            product.size.trim(),
            product.product_id,
            post_date_string(product)
        );
    }
    println!("\nFound {} product(s).", products.len());
}

fn post_date_string(product: &Product) -> String {
    let format = format_description!("[year]-[month]-[day]");
    product
        .post_date
        .as_ref()
        .map(|date| OffsetDateTime::from(SystemTime::from(date.clone())))
        .and_then(|date| date.format(&format).ok())
        .unwrap_or_else(|| "-".to_string())
}
