use anyhow::{Context, Result};
use baidu_pcs_transfer::{
    common::ProgressSnapshot,
    config::AppConfig,
    logging,
    uploader::{Md5Fingerprinter, UploadOptions, UploadSession},
    DownloadOrchestrator, NetdiskClient, PcsApi,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 进度日志间隔
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "pcs-transfer", version, about = "百度网盘分片并发上传 / 多文件下载")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config/app.toml")]
    config: String,

    /// access_token（覆盖配置文件）
    #[arg(long, env = "PCS_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 上传单个文件
    Upload {
        /// 本地文件
        file: PathBuf,

        /// 网盘目标路径，默认 <upload.remote_dir>/<文件名>
        #[arg(long)]
        remote: Option<String>,

        /// 分片大小 (MB)，默认按文件大小自动选择
        #[arg(long)]
        block_size_mb: Option<u64>,

        /// 最大并发分片数
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// 按文件名下载一个或多个网盘文件
    Download {
        /// 网盘文件名，如 /docs/a.txt；不含目录时在根目录查找
        #[arg(required = true)]
        remote: Vec<String>,

        /// 本地保存目录
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// 最大同时下载文件数
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 先加载配置，日志级别和目录来自配置
    let loaded = AppConfig::load_from_file(&cli.config).await;
    let mut config = loaded.as_ref().cloned().unwrap_or_default();

    let _log_guard = logging::init_logging(&config.log);
    info!("pcs-transfer v{} 启动", env!("CARGO_PKG_VERSION"));

    if let Err(e) = &loaded {
        warn!("配置文件加载失败，使用默认配置: {:#}", e);
    }

    if let Some(token) = cli.token {
        config.auth.access_token = token;
    }
    if config.auth.access_token.trim().is_empty() {
        anyhow::bail!("未配置 access_token：请在配置文件 [auth] 中设置，或使用 --token / PCS_ACCESS_TOKEN");
    }

    let client: Arc<dyn PcsApi> =
        Arc::new(NetdiskClient::from_config(&config).context("初始化网盘客户端失败")?);

    let cancel_token = CancellationToken::new();
    spawn_ctrl_c_handler(cancel_token.clone());

    match cli.command {
        Command::Upload {
            file,
            remote,
            block_size_mb,
            concurrency,
        } => {
            run_upload(
                &config,
                client,
                &file,
                remote,
                block_size_mb,
                concurrency,
                cancel_token,
            )
            .await
        }
        Command::Download {
            remote,
            output_dir,
            concurrency,
        } => run_download(&config, client, remote, &output_dir, concurrency, cancel_token).await,
    }
}

/// Ctrl-C 时触发取消
fn spawn_ctrl_c_handler(cancel_token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消...");
            cancel_token.cancel();
        }
    });
}

fn log_progress(label: &str, snap: &ProgressSnapshot) {
    info!(
        "{}进度: {:.1}% ({}/{} bytes, {}/{})",
        label,
        snap.percent(),
        snap.bytes_done,
        snap.bytes_total,
        snap.blocks_confirmed,
        snap.blocks_total
    );
}

async fn run_upload(
    config: &AppConfig,
    client: Arc<dyn PcsApi>,
    file: &Path,
    remote: Option<String>,
    block_size_mb: Option<u64>,
    concurrency: Option<usize>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let remote_path = remote.unwrap_or_else(|| config.upload.remote_path_for(file));
    let block_size = block_size_mb
        .map(|mb| mb * 1024 * 1024)
        .or_else(|| config.upload.block_size_override());

    let mut options = UploadOptions::from(&config.upload);
    if let Some(n) = concurrency {
        options.max_concurrent_blocks = n.max(1);
    }

    let mut session = UploadSession::prepare(
        client,
        file,
        remote_path,
        block_size,
        Arc::new(Md5Fingerprinter),
        options,
    )
    .await
    .with_context(|| format!("准备上传失败: {:?}", file))?
    .with_cancel_token(cancel_token);

    let handle = session.progress_handle();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            log_progress("上传", &handle.snapshot());
        }
    });

    let result = session.run().await;
    ticker.abort();

    match result {
        Ok(report) => {
            if report.rapid_upload {
                info!("秒传成功: {}", report.remote_path);
            } else {
                info!(
                    "上传成功: {} (fs_id={:?}, {} bytes, {} 个分片)",
                    report.remote_path, report.fs_id, report.file_size, report.block_count
                );
            }
            Ok(())
        }
        Err(e) => {
            error!("上传失败: kind={}, {}", e.kind(), e);
            Err(e).context("上传失败")
        }
    }
}

async fn run_download(
    config: &AppConfig,
    client: Arc<dyn PcsApi>,
    remote: Vec<String>,
    output_dir: &Path,
    concurrency: Option<usize>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let max_concurrent = concurrency.unwrap_or(config.download.max_concurrent_tasks);
    let mut orchestrator =
        DownloadOrchestrator::new(client, max_concurrent).with_cancel_token(cancel_token);

    for name in remote {
        let file_name = name
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        orchestrator.add_task(name, output_dir.join(file_name));
    }

    let progress = orchestrator.progress();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            log_progress("下载", &progress.snapshot());
        }
    });

    let reports = orchestrator.run().await;
    ticker.abort();

    let failed: Vec<_> = reports.iter().filter(|r| !r.is_success()).collect();
    for report in &failed {
        if let Err(e) = &report.result {
            error!("{}: {}", report.task.remote_name, e);
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{}/{} 个文件下载失败", failed.len(), reports.len())
    }
}
