// 多文件下载编排
//
// 每个任务：定位文件 → 解析直链 → 流式写盘。
// 任务之间互不影响，单个任务失败不会取消其他任务。

use crate::common::{ProgressCallback, TransferProgress};
use crate::downloader::link::LinkResolver;
use crate::downloader::locator::RemoteFileLocator;
use crate::downloader::task::DownloadTask;
use crate::error::{PcsError, PcsResult};
use crate::netdisk::PcsApi;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 单个任务的下载结果
#[derive(Debug)]
pub struct DownloadReport {
    pub task: DownloadTask,
    /// 成功时为写入的字节数
    pub result: PcsResult<u64>,
}

impl DownloadReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// 下载编排器
pub struct DownloadOrchestrator {
    api: Arc<dyn PcsApi>,
    locator: RemoteFileLocator,
    resolver: LinkResolver,
    max_concurrent_tasks: usize,
    queue: Vec<DownloadTask>,
    progress: Arc<TransferProgress>,
    cancel_token: CancellationToken,
}

impl DownloadOrchestrator {
    pub fn new(api: Arc<dyn PcsApi>, max_concurrent_tasks: usize) -> Self {
        Self {
            locator: RemoteFileLocator::new(api.clone()),
            resolver: LinkResolver::new(api.clone()),
            api,
            max_concurrent_tasks: max_concurrent_tasks.max(1),
            queue: Vec::new(),
            progress: Arc::new(TransferProgress::default()),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// 加入下载队列，返回任务ID
    pub fn add_task(
        &mut self,
        remote_name: impl Into<String>,
        local_path: impl Into<std::path::PathBuf>,
    ) -> String {
        let task = DownloadTask::new(remote_name, local_path);
        let id = task.id.clone();
        info!(
            "加入下载队列: [{}] {} -> {:?}",
            task.short_id(),
            task.remote_name,
            task.local_path
        );
        self.queue.push(task);
        id
    }

    pub fn queued(&self) -> &[DownloadTask] {
        &self.queue
    }

    /// 所有任务的聚合进度（文件数 + 字节数）
    pub fn progress(&self) -> Arc<TransferProgress> {
        self.progress.clone()
    }

    /// 并发执行队列中的所有任务，按入队顺序返回每个任务的结果
    pub async fn run(&mut self) -> Vec<DownloadReport> {
        let tasks = std::mem::take(&mut self.queue);
        let total = tasks.len();
        info!(
            "开始下载 {} 个文件, 最大并发 {}",
            total, self.max_concurrent_tasks
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_tasks));
        let mut join_set: JoinSet<(usize, DownloadReport)> = JoinSet::new();

        // 任务异常退出时用入队时的信息补一个失败结果
        let mut slots: Vec<Result<DownloadReport, DownloadTask>> =
            tasks.iter().cloned().map(Err).collect();

        for (position, task) in tasks.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let worker = TaskWorker {
                api: self.api.clone(),
                locator: self.locator.clone(),
                resolver: self.resolver.clone(),
                progress: self.progress.clone(),
                cancel_token: self.cancel_token.clone(),
            };

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (position, worker.execute(task).await)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((position, report)) => slots[position] = Ok(report),
                Err(e) => error!("下载任务异常退出: {}", e),
            }
        }

        let reports: Vec<DownloadReport> = slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(aborted_report))
            .collect();
        let succeeded = reports.iter().filter(|r| r.is_success()).count();
        info!(
            "下载结束: 成功 {}/{}, 失败 {}",
            succeeded,
            total,
            total - succeeded
        );
        reports
    }
}

fn aborted_report(mut task: DownloadTask) -> DownloadReport {
    let message = "下载任务异常退出".to_string();
    task.mark_failed(message.clone());
    DownloadReport {
        task,
        result: Err(PcsError::Transport(message)),
    }
}

/// 单个任务的执行上下文
struct TaskWorker {
    api: Arc<dyn PcsApi>,
    locator: RemoteFileLocator,
    resolver: LinkResolver,
    progress: Arc<TransferProgress>,
    cancel_token: CancellationToken,
}

impl TaskWorker {
    async fn execute(self, mut task: DownloadTask) -> DownloadReport {
        let result = self.download(&mut task).await;

        match &result {
            Ok(bytes) => {
                task.mark_completed(*bytes);
                self.progress.complete_one();
                info!(
                    "[{}] 下载完成: {} -> {:?}, {} bytes",
                    task.short_id(),
                    task.remote_name,
                    task.local_path,
                    bytes
                );
            }
            Err(e) => {
                task.mark_failed(e.to_string());
                warn!(
                    "[{}] 下载失败: {}, kind={}, {}",
                    task.short_id(),
                    task.remote_name,
                    e.kind(),
                    e
                );
            }
        }

        DownloadReport { task, result }
    }

    async fn download(&self, task: &mut DownloadTask) -> PcsResult<u64> {
        if self.cancel_token.is_cancelled() {
            return Err(PcsError::Cancelled);
        }
        task.mark_downloading();

        let item = self.locator.locate(&task.remote_name).await?;
        task.fs_id = Some(item.fs_id);
        task.total_size = item.size;
        self.progress.add_total(item.size, 1);

        let link = self.resolver.resolve(item.fs_id).await?;

        if let Some(parent) = task.local_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let last = Arc::new(AtomicU64::new(0));
        let progress = self.progress.clone();
        let callback: ProgressCallback = Arc::new(move |moved| {
            let prev = last.swap(moved, Ordering::Relaxed);
            progress.add_bytes(moved.saturating_sub(prev));
        });

        // 先写入同目录的临时文件，完成后再替换目标文件
        let part_path = part_path_for(&task.local_path);
        let result = self
            .api
            .fetch_to_file(&link, &part_path, Some(callback), &self.cancel_token)
            .await;

        match result {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::rename(&part_path, &task.local_path).await {
                    remove_part_file(&part_path).await;
                    return Err(e.into());
                }
                Ok(bytes)
            }
            Err(e) => {
                remove_part_file(&part_path).await;
                Err(e)
            }
        }
    }
}

/// 下载中的临时文件路径: `<dest>.part`
fn part_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_part_file(part_path: &Path) {
    if let Err(e) = tokio::fs::remove_file(part_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("清理未完成文件失败: {:?}, {}", part_path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LookupError;
    use crate::netdisk::mock::{MockCall, MockPcsApi};
    use std::time::Duration;

    #[tokio::test]
    async fn test_missing_file_does_not_affect_others() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(MockPcsApi::new().with_file("/docs", "a.txt", 11, b"hello world"));

        let mut orchestrator = DownloadOrchestrator::new(api.clone(), 2);
        orchestrator.add_task("/docs/missing.txt", dir.path().join("missing.txt"));
        orchestrator.add_task("/docs/a.txt", dir.path().join("out/a.txt"));

        let reports = orchestrator.run().await;
        assert_eq!(reports.len(), 2);

        assert!(matches!(
            reports[0].result,
            Err(PcsError::Lookup(LookupError::NotFound { .. }))
        ));
        assert_eq!(reports[0].task.remote_name, "/docs/missing.txt");

        assert_eq!(reports[1].result.as_ref().unwrap(), &11);
        assert_eq!(
            tokio::fs::read(dir.path().join("out/a.txt")).await.unwrap(),
            b"hello world"
        );

        let snap = orchestrator.progress().snapshot();
        assert_eq!(snap.blocks_confirmed, 1);
        assert_eq!(snap.bytes_done, 11);
        assert!(orchestrator.queued().is_empty());
        assert!(!dir.path().join("missing.txt").exists());
    }

    #[tokio::test]
    async fn test_ambiguous_name_fails_task() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(
            MockPcsApi::new()
                .with_file("/", "dup.bin", 1, b"one")
                .with_file("/", "dup.bin", 2, b"two"),
        );

        let mut orchestrator = DownloadOrchestrator::new(api.clone(), 1);
        orchestrator.add_task("dup.bin", dir.path().join("dup.bin"));
        let reports = orchestrator.run().await;

        assert!(matches!(
            reports[0].result,
            Err(PcsError::Lookup(LookupError::Ambiguous { count: 2, .. }))
        ));
        assert!(!api
            .calls()
            .iter()
            .any(|c| matches!(c, MockCall::ResolveDlink(_))));
    }

    #[tokio::test]
    async fn test_reports_keep_queue_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut api = MockPcsApi::new();
        for i in 0..6u64 {
            api = api.with_file("/batch", &format!("f{}.bin", i), 100 + i, &vec![i as u8; 10]);
        }

        let mut orchestrator = DownloadOrchestrator::new(Arc::new(api), 3);
        for i in 0..6 {
            orchestrator.add_task(format!("/batch/f{}.bin", i), dir.path().join(format!("f{}", i)));
        }

        let reports = orchestrator.run().await;
        let names: Vec<&str> = reports.iter().map(|r| r.task.remote_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "/batch/f0.bin",
                "/batch/f1.bin",
                "/batch/f2.bin",
                "/batch/f3.bin",
                "/batch/f4.bin",
                "/batch/f5.bin"
            ]
        );
        assert!(reports.iter().all(|r| r.is_success()));
        assert!(reports.iter().all(|r| r.task.fs_id.is_some()));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(MockPcsApi::new().with_file("/", "a.txt", 1, b"a"));
        let token = CancellationToken::new();
        token.cancel();

        let mut orchestrator = DownloadOrchestrator::new(api.clone(), 2).with_cancel_token(token);
        orchestrator.add_task("a.txt", dir.path().join("a.txt"));
        let reports = orchestrator.run().await;

        assert!(matches!(reports[0].result, Err(PcsError::Cancelled)));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("keep.txt");
        tokio::fs::write(&local, b"local copy").await.unwrap();

        let api = Arc::new(
            MockPcsApi::new()
                .with_file("/docs", "keep.txt", 5, b"remote copy")
                .drop_content(5),
        );
        let mut orchestrator = DownloadOrchestrator::new(api.clone(), 1);
        orchestrator.add_task("/docs/keep.txt", local.clone());

        let reports = orchestrator.run().await;
        assert!(matches!(reports[0].result, Err(PcsError::Transport(_))));
        assert!(api.calls().contains(&MockCall::Fetch(5)));
        assert_eq!(tokio::fs::read(&local).await.unwrap(), b"local copy");
        assert!(!part_path_for(&local).exists());
    }

    #[tokio::test]
    async fn test_success_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.txt");
        tokio::fs::write(&local, b"old").await.unwrap();

        let api = Arc::new(MockPcsApi::new().with_file("/", "a.txt", 1, b"new content"));
        let mut orchestrator = DownloadOrchestrator::new(api, 1);
        orchestrator.add_task("/a.txt", local.clone());

        let reports = orchestrator.run().await;
        assert_eq!(reports[0].result.as_ref().unwrap(), &11);
        assert_eq!(tokio::fs::read(&local).await.unwrap(), b"new content");
        assert!(!part_path_for(&local).exists());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut api = MockPcsApi::new().with_fetch_delay(Duration::from_millis(30));
        for i in 0..8u64 {
            api = api.with_file("/pool", &format!("p{}.bin", i), 200 + i, b"x");
        }
        let api = Arc::new(api);

        let mut orchestrator = DownloadOrchestrator::new(api.clone(), 2);
        for i in 0..8 {
            orchestrator.add_task(format!("/pool/p{}.bin", i), dir.path().join(format!("p{}", i)));
        }

        let reports = orchestrator.run().await;
        assert!(reports.iter().all(|r| r.is_success()));
        assert!(api.max_fetch_in_flight() <= 2);
        assert!(api.max_fetch_in_flight() >= 1);
    }

    #[tokio::test]
    async fn test_panicked_task_still_reported() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(
            MockPcsApi::new()
                .with_file("/", "bad.bin", 1, b"bad")
                .with_file("/", "good.bin", 2, b"good")
                .panic_on_fetch(1),
        );

        let mut orchestrator = DownloadOrchestrator::new(api, 2);
        orchestrator.add_task("/bad.bin", dir.path().join("bad.bin"));
        orchestrator.add_task("/good.bin", dir.path().join("good.bin"));

        let reports = orchestrator.run().await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].task.remote_name, "/bad.bin");
        assert!(!reports[0].is_success());
        assert_eq!(reports[0].task.status, crate::downloader::task::TaskStatus::Failed);
        assert!(reports[1].is_success());
    }
}
