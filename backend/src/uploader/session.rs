// 上传会话
//
// 单个文件的完整上传流程：precreate → 并发上传分片（按轮次重试） → create
//
// 分片状态: Pending → InFlight → Confirmed，失败或被放弃时 InFlight → Pending；
// Confirmed 为终态，只有服务端返回的 MD5 与本地指纹一致时才会进入。
// 会话状态: Created → Precreated → Uploading → Committed，任何致命错误进入 Failed。

use crate::common::ProgressSnapshot;
use crate::config::UploadConfig;
use crate::error::{PcsError, PcsResult};
use crate::netdisk::{CreateFileResponse, PcsApi};
use crate::uploader::fingerprint::ContentFingerprinter;
use crate::uploader::planner::{block_count, choose_block_size, plan_file, BlockManifest};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 轮次间最大退避时间（毫秒）
const MAX_BACKOFF_MS: u64 = 5000;

/// 计算第 `retry` 次重试前的退避时间（指数退避）
fn calculate_backoff_delay(initial_ms: u64, retry: u32) -> u64 {
    initial_ms
        .saturating_mul(2u64.saturating_pow(retry))
        .min(MAX_BACKOFF_MS)
}

/// 分片状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Pending,
    InFlight,
    Confirmed,
}

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Precreated,
    Uploading,
    Committed,
    Failed,
}

/// 单个分片的上传结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// 本次上传并校验通过
    Confirmed,
    /// 之前已确认，未发送请求
    AlreadyConfirmed,
}

/// precreate 结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecreateOutcome {
    /// 拿到 uploadid，需要上传分片
    Precreated,
    /// 秒传成功，文件已存在于网盘
    RapidUploaded,
}

/// 上传参数
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// 最大并发分片数
    pub max_concurrent_blocks: usize,
    /// 最大轮次（含首轮）
    pub max_retry_rounds: u32,
    /// 轮次间初始退避（毫秒）
    pub initial_backoff_ms: u64,
    /// 服务端允许的最大分片数
    pub max_block_count: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for UploadOptions {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_concurrent_blocks: config.max_concurrent_blocks.max(1),
            max_retry_rounds: config.max_retry_rounds.max(1),
            initial_backoff_ms: config.initial_backoff_ms,
            max_block_count: config.max_block_count,
        }
    }
}

/// 上传完成报告
#[derive(Debug, Clone)]
pub struct UploadReport {
    /// 网盘最终路径（重名时服务端可能改名）
    pub remote_path: String,
    /// 秒传时服务端不返回 fs_id
    pub fs_id: Option<u64>,
    pub file_size: u64,
    pub block_count: usize,
    pub rapid_upload: bool,
}

/// 分片状态表，进度计数与状态在同一把锁下更新
#[derive(Debug)]
struct BlockTable {
    status: Vec<BlockStatus>,
    confirmed: usize,
    confirmed_bytes: u64,
}

/// 会话共享状态，被各分片任务持有
struct SessionShared {
    api: Arc<dyn PcsApi>,
    local_path: PathBuf,
    remote_path: String,
    manifest: BlockManifest,
    table: Mutex<BlockTable>,
}

/// InFlight 守卫：未确认就被丢弃时（失败、取消、panic）把分片恢复为 Pending
struct InFlightGuard<'a> {
    shared: &'a SessionShared,
    index: usize,
    settled: bool,
}

impl InFlightGuard<'_> {
    fn confirm(mut self, length: u64) {
        let mut table = self.shared.table.lock();
        if table.status[self.index] != BlockStatus::Confirmed {
            table.status[self.index] = BlockStatus::Confirmed;
            table.confirmed += 1;
            table.confirmed_bytes += length;
        }
        self.settled = true;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut table = self.shared.table.lock();
        if table.status[self.index] == BlockStatus::InFlight {
            table.status[self.index] = BlockStatus::Pending;
        }
    }
}

impl SessionShared {
    /// Pending → InFlight；已确认返回 None
    fn begin(&self, index: usize) -> PcsResult<Option<InFlightGuard<'_>>> {
        let mut table = self.table.lock();
        match table.status.get(index).copied() {
            None => Err(PcsError::InvalidInput(format!(
                "分片序号越界: {} (共 {} 个)",
                index,
                table.status.len()
            ))),
            Some(BlockStatus::Confirmed) => Ok(None),
            Some(BlockStatus::InFlight) => Err(PcsError::Precondition(format!(
                "分片 #{} 正在上传",
                index
            ))),
            Some(BlockStatus::Pending) => {
                table.status[index] = BlockStatus::InFlight;
                Ok(Some(InFlightGuard {
                    shared: self,
                    index,
                    settled: false,
                }))
            }
        }
    }

    fn indices_where(&self, pred: impl Fn(BlockStatus) -> bool) -> Vec<usize> {
        self.table
            .lock()
            .status
            .iter()
            .enumerate()
            .filter(|(_, s)| pred(**s))
            .map(|(i, _)| i)
            .collect()
    }

    fn snapshot(&self) -> ProgressSnapshot {
        let table = self.table.lock();
        ProgressSnapshot {
            bytes_done: table.confirmed_bytes,
            bytes_total: self.manifest.file_size(),
            blocks_confirmed: table.confirmed,
            blocks_total: table.status.len(),
        }
    }

    /// 上传单个分片并校验服务端返回的 MD5
    async fn upload_block(&self, upload_id: &str, index: usize) -> PcsResult<BlockOutcome> {
        let Some(guard) = self.begin(index)? else {
            debug!("[分片 #{}] 已确认，跳过", index);
            return Ok(BlockOutcome::AlreadyConfirmed);
        };

        let block = self
            .manifest
            .block(index)
            .ok_or_else(|| PcsError::InvalidInput(format!("分片序号越界: {}", index)))?;

        let data = block.read_data(&self.local_path).await?;
        let digest = self
            .api
            .upload_block(&self.remote_path, upload_id, index, data)
            .await?;

        if digest != block.fingerprint {
            return Err(PcsError::Integrity {
                index,
                expected: block.fingerprint.clone(),
                actual: digest,
            });
        }

        guard.confirm(block.length as u64);
        debug!("[分片 #{}] 上传成功: md5={}", index, digest);
        Ok(BlockOutcome::Confirmed)
    }
}

/// 会话进度观察句柄，可在会话运行期间读取进度
#[derive(Clone)]
pub struct ProgressHandle(Arc<SessionShared>);

impl ProgressHandle {
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.0.snapshot()
    }
}

/// 上传会话
pub struct UploadSession {
    shared: Arc<SessionShared>,
    upload_id: Option<String>,
    state: SessionState,
    options: UploadOptions,
    cancel_token: CancellationToken,
}

impl UploadSession {
    /// 用已有的分片清单创建会话
    pub fn new(
        api: Arc<dyn PcsApi>,
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<String>,
        manifest: BlockManifest,
        options: UploadOptions,
    ) -> Self {
        let table = BlockTable {
            status: vec![BlockStatus::Pending; manifest.len()],
            confirmed: 0,
            confirmed_bytes: 0,
        };

        Self {
            shared: Arc::new(SessionShared {
                api,
                local_path: local_path.into(),
                remote_path: remote_path.into(),
                manifest,
                table: Mutex::new(table),
            }),
            upload_id: None,
            state: SessionState::Created,
            options,
            cancel_token: CancellationToken::new(),
        }
    }

    /// 规划分片并创建会话
    ///
    /// `block_size` 为 None 时按文件大小自动选择。分片数超过 `max_block_count` 时返回
    /// `PcsError::InvalidInput`，不会读取文件内容。
    pub async fn prepare(
        api: Arc<dyn PcsApi>,
        local_path: &Path,
        remote_path: impl Into<String>,
        block_size: Option<u64>,
        fingerprinter: Arc<dyn ContentFingerprinter>,
        options: UploadOptions,
    ) -> PcsResult<Self> {
        let metadata = tokio::fs::metadata(local_path).await?;
        if !metadata.is_file() {
            return Err(PcsError::InvalidInput(format!(
                "不是普通文件: {:?}",
                local_path
            )));
        }

        let file_size = metadata.len();
        let block_size = block_size.unwrap_or_else(|| choose_block_size(file_size));
        let count = block_count(file_size, block_size);
        if count > options.max_block_count as u64 {
            return Err(PcsError::InvalidInput(format!(
                "分片数 {} 超过上限 {} (文件大小={}, 分片大小={})",
                count, options.max_block_count, file_size, block_size
            )));
        }

        info!(
            "计算分片指纹: {:?}, size={}, block_size={}, 算法={}",
            local_path,
            file_size,
            block_size,
            fingerprinter.name()
        );
        let manifest = plan_file(local_path.to_path_buf(), block_size, fingerprinter).await?;

        Ok(Self::new(api, local_path, remote_path, manifest, options))
    }

    /// 使用外部的取消令牌
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    pub fn manifest(&self) -> &BlockManifest {
        &self.shared.manifest
    }

    pub fn local_path(&self) -> &Path {
        &self.shared.local_path
    }

    pub fn remote_path(&self) -> &str {
        &self.shared.remote_path
    }

    pub fn block_status(&self, index: usize) -> Option<BlockStatus> {
        self.shared.table.lock().status.get(index).copied()
    }

    pub fn block_statuses(&self) -> Vec<BlockStatus> {
        self.shared.table.lock().status.clone()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.shared.snapshot()
    }

    pub fn progress_handle(&self) -> ProgressHandle {
        ProgressHandle(self.shared.clone())
    }

    fn fail(&mut self, err: PcsError) -> PcsError {
        self.state = SessionState::Failed;
        err
    }

    fn require_upload_id(&self) -> PcsResult<String> {
        match (self.state, &self.upload_id) {
            (SessionState::Precreated | SessionState::Uploading, Some(id)) => Ok(id.clone()),
            (state, _) => Err(PcsError::Precondition(format!(
                "当前会话状态 {:?} 不允许上传分片",
                state
            ))),
        }
    }

    /// 预创建，获取 uploadid
    pub async fn precreate(&mut self) -> PcsResult<PrecreateOutcome> {
        if self.state != SessionState::Created {
            return Err(PcsError::Precondition(format!(
                "precreate 只能在 Created 状态调用，当前 {:?}",
                self.state
            )));
        }
        if self.cancel_token.is_cancelled() {
            return Err(self.fail(PcsError::Cancelled));
        }

        let response = match self
            .shared
            .api
            .precreate(&self.shared.remote_path, &self.shared.manifest)
            .await
        {
            Ok(response) => response,
            Err(e) => return Err(self.fail(e)),
        };

        if response.is_rapid_upload() {
            info!("预创建时秒传成功: {}", self.shared.remote_path);
            self.state = SessionState::Committed;
            return Ok(PrecreateOutcome::RapidUploaded);
        }

        if response.uploadid.is_empty() {
            return Err(self.fail(PcsError::Protocol(
                "预创建响应缺少 uploadid".to_string(),
            )));
        }

        self.upload_id = Some(response.uploadid);
        self.state = SessionState::Precreated;
        Ok(PrecreateOutcome::Precreated)
    }

    /// 上传单个分片（不重试）
    ///
    /// 校验失败或传输失败时分片保持 Pending，错误原样返回
    pub async fn upload_block(&mut self, index: usize) -> PcsResult<BlockOutcome> {
        let upload_id = self.require_upload_id()?;
        self.state = SessionState::Uploading;
        self.shared.upload_block(&upload_id, index).await
    }

    /// 按轮次并发上传所有未确认分片
    ///
    /// 每轮对当前 Pending 的分片各尝试一次，失败的留到下一轮；
    /// 轮次耗尽后仍有未确认分片时返回 `PcsError::Transfer`
    pub async fn upload_all(&mut self) -> PcsResult<()> {
        let upload_id = self.require_upload_id()?;
        self.state = SessionState::Uploading;

        let max_rounds = self.options.max_retry_rounds.max(1);
        let mut rounds_run = 0;

        for round in 1..=max_rounds {
            if self.cancel_token.is_cancelled() {
                return Err(self.fail(PcsError::Cancelled));
            }

            let pending = self.shared.indices_where(|s| s == BlockStatus::Pending);
            if pending.is_empty() {
                break;
            }

            if round > 1 {
                let delay = calculate_backoff_delay(self.options.initial_backoff_ms, round - 2);
                debug!("第 {} 轮开始前等待 {}ms", round, delay);
                tokio::select! {
                    _ = self.cancel_token.cancelled() => return Err(self.fail(PcsError::Cancelled)),
                    _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                }
            }

            info!(
                "[并发上传] 第 {}/{} 轮: {} 个待上传分片, 并发数 {}",
                round,
                max_rounds,
                pending.len(),
                self.options.max_concurrent_blocks
            );

            rounds_run = round;
            let failed = match self.run_round(&upload_id, round, pending).await {
                Ok(failed) => failed,
                Err(e) => return Err(self.fail(e)),
            };

            if failed > 0 {
                warn!("第 {} 轮结束: {} 个分片失败，等待重试", round, failed);
            }
        }

        let unconfirmed = self.shared.indices_where(|s| s != BlockStatus::Confirmed);
        if !unconfirmed.is_empty() {
            error!(
                "上传失败: {} 轮后仍有 {} 个分片未确认: {:?}",
                rounds_run,
                unconfirmed.len(),
                unconfirmed
            );
            return Err(self.fail(PcsError::Transfer {
                unconfirmed,
                rounds: rounds_run,
            }));
        }

        info!("全部 {} 个分片已确认", self.shared.manifest.len());
        Ok(())
    }

    /// 执行一轮上传，返回失败（可重试）的分片数；遇到致命错误时中止整轮
    async fn run_round(&self, upload_id: &str, round: u32, indices: Vec<usize>) -> PcsResult<usize> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_blocks.max(1)));
        let mut join_set: JoinSet<(usize, PcsResult<BlockOutcome>)> = JoinSet::new();

        for index in indices {
            let shared = self.shared.clone();
            let semaphore = semaphore.clone();
            let upload_id = upload_id.to_string();

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, Err(PcsError::Cancelled));
                };
                let result = shared.upload_block(&upload_id, index).await;
                (index, result)
            });
        }

        let mut failed = 0;
        loop {
            let joined = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    warn!("上传已取消，中止第 {} 轮", round);
                    abort_and_drain(&mut join_set).await;
                    return Err(PcsError::Cancelled);
                }
                joined = join_set.join_next() => joined,
            };

            let Some(joined) = joined else { break };

            match joined {
                Ok((index, Ok(outcome))) => {
                    debug!("[分片 #{}] 第 {} 轮完成: {:?}", index, round, outcome);
                }
                Ok((index, Err(e))) if e.is_retriable() => {
                    failed += 1;
                    warn!("[分片 #{}] 第 {} 轮失败: {}", index, round, e);
                }
                Ok((index, Err(e))) => {
                    error!("[分片 #{}] 致命错误，中止上传: {}", index, e);
                    abort_and_drain(&mut join_set).await;
                    return Err(e);
                }
                Err(join_err) => {
                    failed += 1;
                    warn!("分片任务异常退出: {}", join_err);
                }
            }
        }

        Ok(failed)
    }

    /// 合并分片，创建文件
    ///
    /// 仍有未确认分片时直接返回前置条件错误，不发送请求
    pub async fn commit(&mut self) -> PcsResult<CreateFileResponse> {
        let upload_id = match (self.state, &self.upload_id) {
            (SessionState::Precreated | SessionState::Uploading, Some(id)) => id.clone(),
            (state, _) => {
                return Err(PcsError::Precondition(format!(
                    "当前会话状态 {:?} 不允许提交",
                    state
                )))
            }
        };

        let unconfirmed = self.shared.indices_where(|s| s != BlockStatus::Confirmed);
        if !unconfirmed.is_empty() {
            return Err(PcsError::Precondition(format!(
                "仍有 {} 个分片未确认: {:?}",
                unconfirmed.len(),
                unconfirmed
            )));
        }

        info!("合并上传分片, 创建文件: {}", self.shared.remote_path);
        match self
            .shared
            .api
            .create_file(&self.shared.remote_path, &upload_id, &self.shared.manifest)
            .await
        {
            Ok(created) => {
                self.state = SessionState::Committed;
                Ok(created)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// 执行完整上传流程
    pub async fn run(&mut self) -> PcsResult<UploadReport> {
        info!(
            "开始上传: local={:?}, remote={}, size={}, blocks={}",
            self.shared.local_path,
            self.shared.remote_path,
            self.shared.manifest.file_size(),
            self.shared.manifest.len()
        );

        let manifest = &self.shared.manifest;
        let mut report = UploadReport {
            remote_path: self.shared.remote_path.clone(),
            fs_id: None,
            file_size: manifest.file_size(),
            block_count: manifest.len(),
            rapid_upload: false,
        };

        if self.precreate().await? == PrecreateOutcome::RapidUploaded {
            report.rapid_upload = true;
            return Ok(report);
        }

        self.upload_all().await?;
        let created = self.commit().await?;

        if !created.path.is_empty() {
            report.remote_path = created.path;
        }
        report.fs_id = Some(created.fs_id);

        info!("上传完成: {}", report.remote_path);
        Ok(report)
    }
}

/// 中止所有任务并等待它们退出，确保 InFlight 守卫已全部释放
async fn abort_and_drain<T: 'static>(join_set: &mut JoinSet<T>) {
    join_set.abort_all();
    while join_set.join_next().await.is_some() {}
}
