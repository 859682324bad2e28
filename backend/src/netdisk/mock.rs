// 内存版网盘接口，供上传会话和下载编排的单元测试使用

use crate::common::ProgressCallback;
use crate::error::{PcsError, PcsResult};
use crate::netdisk::api::PcsApi;
use crate::netdisk::types::{CreateFileResponse, DirectLink, FileItem, PrecreateResponse};
use crate::uploader::{BlockManifest, ContentFingerprinter, Md5Fingerprinter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 接口调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ListDir(String),
    ResolveDlink(u64),
    Precreate {
        path: String,
        size: u64,
        block_list: Vec<String>,
    },
    UploadBlock {
        upload_id: String,
        index: usize,
        len: usize,
    },
    CreateFile {
        path: String,
        size: u64,
        upload_id: String,
        block_list: Vec<String>,
    },
    Fetch(u64),
}

pub struct MockPcsApi {
    upload_id: String,
    rapid_upload: bool,
    reject_token: bool,
    create_errno: i32,
    block_delay: Option<Duration>,
    fetch_delay: Option<Duration>,
    /// 服务端计算分片摘要所用的算法
    fingerprinter: Arc<dyn ContentFingerprinter>,
    dirs: Mutex<HashMap<String, Vec<FileItem>>>,
    contents: Mutex<HashMap<u64, Vec<u8>>>,
    /// 每个分片剩余的传输失败次数
    transport_failures: Mutex<HashMap<usize, u32>>,
    /// 每个分片剩余的错误摘要次数
    corrupt_digests: Mutex<HashMap<usize, u32>>,
    attempts: Mutex<HashMap<usize, u32>>,
    calls: Mutex<Vec<MockCall>>,
    /// 下载时直接 panic 的文件
    panic_fetches: Mutex<HashSet<u64>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fetch_in_flight: AtomicUsize,
    max_fetch_in_flight: AtomicUsize,
}

impl Default for MockPcsApi {
    fn default() -> Self {
        Self {
            upload_id: "U1".to_string(),
            rapid_upload: false,
            reject_token: false,
            create_errno: 0,
            block_delay: None,
            fetch_delay: None,
            fingerprinter: Arc::new(Md5Fingerprinter),
            dirs: Mutex::new(HashMap::new()),
            contents: Mutex::new(HashMap::new()),
            transport_failures: Mutex::new(HashMap::new()),
            corrupt_digests: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            panic_fetches: Mutex::new(HashSet::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fetch_in_flight: AtomicUsize::new(0),
            max_fetch_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MockPcsApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rapid_upload(mut self) -> Self {
        self.rapid_upload = true;
        self
    }

    pub fn with_rejected_token(mut self) -> Self {
        self.reject_token = true;
        self
    }

    pub fn with_create_errno(mut self, errno: i32) -> Self {
        self.create_errno = errno;
        self
    }

    pub fn with_block_delay(mut self, delay: Duration) -> Self {
        self.block_delay = Some(delay);
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn ContentFingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    /// 下载该文件时任务 panic
    pub fn panic_on_fetch(self, fs_id: u64) -> Self {
        self.panic_fetches.lock().insert(fs_id);
        self
    }

    /// 删除文件内容，保留目录项（下载时返回 404）
    pub fn drop_content(self, fs_id: u64) -> Self {
        self.contents.lock().remove(&fs_id);
        self
    }

    /// 前 `times` 次上传该分片返回传输错误
    pub fn fail_block(self, index: usize, times: u32) -> Self {
        self.transport_failures.lock().insert(index, times);
        self
    }

    /// 前 `times` 次上传该分片返回错误的摘要
    pub fn corrupt_block(self, index: usize, times: u32) -> Self {
        self.corrupt_digests.lock().insert(index, times);
        self
    }

    /// 在目录中放置一个文件
    pub fn with_file(self, dir: &str, name: &str, fs_id: u64, content: &[u8]) -> Self {
        let item = FileItem {
            fs_id,
            path: format!("{}/{}", dir.trim_end_matches('/'), name),
            server_filename: name.to_string(),
            size: content.len() as u64,
            isdir: 0,
            md5: None,
            server_mtime: 0,
        };
        self.dirs.lock().entry(dir.to_string()).or_default().push(item);
        self.contents.lock().insert(fs_id, content.to_vec());
        self
    }

    /// 在目录中放置一个子目录
    pub fn with_dir_entry(self, dir: &str, name: &str, fs_id: u64) -> Self {
        let item = FileItem {
            fs_id,
            path: format!("{}/{}", dir.trim_end_matches('/'), name),
            server_filename: name.to_string(),
            size: 0,
            isdir: 1,
            md5: None,
            server_mtime: 0,
        };
        self.dirs.lock().entry(dir.to_string()).or_default().push(item);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn upload_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, MockCall::UploadBlock { .. }))
            .count()
    }

    pub fn attempts(&self, index: usize) -> u32 {
        self.attempts.lock().get(&index).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_fetch_in_flight(&self) -> usize {
        self.max_fetch_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    fn check_token(&self) -> PcsResult<()> {
        if self.reject_token {
            return Err(PcsError::Auth {
                errno: 111,
                message: "access token invalid".to_string(),
            });
        }
        Ok(())
    }

    fn take_one(map: &Mutex<HashMap<usize, u32>>, index: usize) -> bool {
        let mut map = map.lock();
        match map.get_mut(&index) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

fn block_list(manifest: &BlockManifest) -> Vec<String> {
    manifest.fingerprints().into_iter().map(String::from).collect()
}

#[async_trait]
impl PcsApi for MockPcsApi {
    async fn list_dir(&self, dir: &str) -> PcsResult<Vec<FileItem>> {
        self.record(MockCall::ListDir(dir.to_string()));
        self.check_token()?;
        Ok(self.dirs.lock().get(dir).cloned().unwrap_or_default())
    }

    async fn resolve_dlink(&self, fs_id: u64) -> PcsResult<DirectLink> {
        self.record(MockCall::ResolveDlink(fs_id));
        self.check_token()?;
        Ok(DirectLink::new(
            fs_id,
            format!("https://d.pcs.mock/file/{}?access_token=t", fs_id),
        ))
    }

    async fn precreate(
        &self,
        remote_path: &str,
        manifest: &BlockManifest,
    ) -> PcsResult<PrecreateResponse> {
        self.record(MockCall::Precreate {
            path: remote_path.to_string(),
            size: manifest.file_size(),
            block_list: block_list(manifest),
        });
        self.check_token()?;

        Ok(PrecreateResponse {
            errno: 0,
            return_type: if self.rapid_upload { 2 } else { 1 },
            uploadid: self.upload_id.clone(),
            block_list: (0..manifest.len() as i32).collect(),
            errmsg: String::new(),
        })
    }

    async fn upload_block(
        &self,
        _remote_path: &str,
        upload_id: &str,
        part_seq: usize,
        data: Vec<u8>,
    ) -> PcsResult<String> {
        self.record(MockCall::UploadBlock {
            upload_id: upload_id.to_string(),
            index: part_seq,
            len: data.len(),
        });
        *self.attempts.lock().entry(part_seq).or_insert(0) += 1;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.block_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.check_token()?;

        if Self::take_one(&self.transport_failures, part_seq) {
            return Err(PcsError::Transport(format!("mock: 分片 #{} 连接重置", part_seq)));
        }
        if Self::take_one(&self.corrupt_digests, part_seq) {
            return Ok("0".repeat(32));
        }

        Ok(self.fingerprinter.fingerprint(&data))
    }

    async fn create_file(
        &self,
        remote_path: &str,
        upload_id: &str,
        manifest: &BlockManifest,
    ) -> PcsResult<CreateFileResponse> {
        self.record(MockCall::CreateFile {
            path: remote_path.to_string(),
            size: manifest.file_size(),
            upload_id: upload_id.to_string(),
            block_list: block_list(manifest),
        });
        self.check_token()?;

        if self.create_errno != 0 {
            return Err(PcsError::Protocol(format!(
                "创建文件失败: {{\"errno\":{}}}",
                self.create_errno
            )));
        }

        Ok(CreateFileResponse {
            errno: 0,
            fs_id: 9000,
            md5: String::new(),
            server_filename: remote_path.rsplit('/').next().unwrap_or_default().to_string(),
            path: remote_path.to_string(),
            size: manifest.file_size(),
            errmsg: String::new(),
        })
    }

    async fn fetch_to_file(
        &self,
        link: &DirectLink,
        dest: &Path,
        on_progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> PcsResult<u64> {
        self.record(MockCall::Fetch(link.fs_id));
        if cancel.is_cancelled() {
            return Err(PcsError::Cancelled);
        }
        if self.panic_fetches.lock().contains(&link.fs_id) {
            panic!("mock: fs_id={} 下载 panic", link.fs_id);
        }

        let current = self.fetch_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_fetch_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.fetch_in_flight.fetch_sub(1, Ordering::SeqCst);

        let content = self
            .contents
            .lock()
            .get(&link.fs_id)
            .cloned()
            .ok_or_else(|| PcsError::Transport(format!("HTTP错误: 404, fs_id={}", link.fs_id)))?;

        tokio::fs::write(dest, &content).await?;
        if let Some(callback) = on_progress {
            callback(content.len() as u64);
        }
        Ok(content.len() as u64)
    }
}
