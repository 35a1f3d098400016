//! macOS Installer Downloader（macOS 安装器下载工具）。
//!
//! 从软件更新目录发现可下载的 macOS 安装器 / 恢复镜像，解析其
//! 版本元数据，并以可续传、可取消的方式把包文件下载到本地。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置 / 日志 / 防休眠等基础设施
//! - `net`：HTTP 传输与流式下载
//! - `catalog`：目录 URL、产品提取、元数据解析与缓存
//! - `download`：按产品的串行下载引擎与进度上报
//! - `ui`：命令行交互（worker 线程 + 事件循环）

use std::path::Path;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::info;

mod base_system;
mod catalog;
mod download;
mod net;
mod ui;

use base_system::config::{config_file_path, load_or_create_with_base, write_config};
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use catalog::resolver::{catalog_url, slot_display, version_to_slot};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "macos-installer-downloader")]
#[command(about = "Download macOS installers from the software update catalog")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,

    /// 数据目录路径（settings.json、logs、目录快照与产品缓存）
    #[arg(long)]
    data_dir: Option<String>,

    /// 目录通道: publicrelease / public / customer / developer
    #[arg(long)]
    catalog: Option<String>,

    /// 目录覆盖到的最大 macOS 版本（如 10.15、11、14）
    #[arg(long)]
    max_version: Option<String>,

    /// 只查找 / 下载恢复镜像
    #[arg(long)]
    recovery: Option<bool>,

    /// 下载时运行 caffeinate 防休眠（仅 macOS）
    #[arg(long)]
    caffeinate: Option<bool>,

    /// 把目录快照保存在本地并优先使用
    #[arg(long)]
    save_local: Option<bool>,

    /// 忽略本地快照与产品缓存，强制重新下载目录
    #[arg(long)]
    force_local: Option<bool>,

    /// 下载输出目录
    #[arg(long)]
    output: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 刷新目录并列出可用产品
    List,
    /// 下载指定产品的全部包文件
    Download {
        /// 产品 ID（见 `list` 输出）
        product_id: String,
        /// 只下载磁盘镜像（.dmg）
        #[arg(long, default_value_t = false)]
        dmg_only: bool,
    },
    /// 打印当前设置对应的目录 URL（可用于 softwareupdate --set-catalog）
    CatalogUrl,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("macOS Installer Downloader v{VERSION}");
        return Ok(());
    }

    let data_dir = cli.data_dir.as_deref().map(Path::new);
    let _log = init_logging(cli.debug, data_dir)?;
    info!(target: "startup", "macOS Installer Downloader v{VERSION}");

    let mut config = load_or_create_with_base::<Config>(None, data_dir)
        .map_err(|err| anyhow!(err.to_string()))?;
    apply_overrides(&mut config, &cli, data_dir)?;

    match cli.command.unwrap_or(Command::List) {
        Command::List => ui::cli::run_list(&config, data_dir),
        Command::Download {
            product_id,
            dmg_only,
        } => ui::cli::run_download(&config, data_dir, &product_id, dmg_only),
        Command::CatalogUrl => {
            println!("{}", catalog_url(config.channel(), config.current_macos));
            Ok(())
        }
    }
}

/// 命令行开关覆盖设置文件，并把改动持久化（下次运行沿用）。
fn apply_overrides(config: &mut Config, cli: &Cli, data_dir: Option<&Path>) -> Result<()> {
    let mut changed = false;

    if let Some(catalog) = &cli.catalog {
        config.current_catalog = config_catalog_key(catalog);
        changed = true;
    }
    if let Some(version) = &cli.max_version {
        config.current_macos = version_to_slot(version).ok_or_else(|| {
            anyhow!("invalid macOS version {version:?} (expected e.g. 10.15, 11, 12)")
        })?;
        info!("max macOS version set to {}", slot_display(config.current_macos));
        changed = true;
    }
    if let Some(recovery) = cli.recovery {
        config.find_recovery = recovery;
        changed = true;
    }
    if let Some(caffeinate) = cli.caffeinate {
        config.caffeinate_downloads = caffeinate;
        changed = true;
    }
    if let Some(save_local) = cli.save_local {
        config.save_local = save_local;
        changed = true;
    }
    if let Some(force_local) = cli.force_local {
        config.force_local = force_local;
        changed = true;
    }
    if let Some(output) = &cli.output {
        config.download_dir = output.clone();
        changed = true;
    }

    if changed {
        let path = config_file_path::<Config>(None, data_dir);
        write_config(config, &path).map_err(|err| anyhow!(err.to_string()))?;
    }
    Ok(())
}

/// 未知的通道名归一到正式版通道再落盘。
fn config_catalog_key(raw: &str) -> String {
    catalog::resolver::Channel::from_key(raw).key().to_string()
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        console: debug,
    };
    LogSystem::init_with_base(opts, base_dir).map_err(|err| anyhow!(err))
}
