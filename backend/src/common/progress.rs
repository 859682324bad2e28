// 传输进度计数器
//
// 纯观测用途，不参与任何状态判断

use parking_lot::Mutex;
use std::sync::Arc;

/// 流式传输进度回调，参数为已传输的累计字节数
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// 某一时刻的进度快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub blocks_confirmed: usize,
    pub blocks_total: usize,
}

impl ProgressSnapshot {
    /// 字节进度百分比 (0.0 ~ 100.0)
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            if self.blocks_total > 0 && self.blocks_confirmed == self.blocks_total {
                return 100.0;
            }
            return 0.0;
        }
        (self.bytes_done as f64 / self.bytes_total as f64 * 100.0).min(100.0)
    }

    pub fn is_complete(&self) -> bool {
        self.blocks_total > 0 && self.blocks_confirmed == self.blocks_total
    }
}

/// 传输进度
///
/// 所有计数器放在同一把锁下，快照总是一致的
#[derive(Debug, Default)]
pub struct TransferProgress {
    inner: Mutex<ProgressSnapshot>,
}

impl TransferProgress {
    pub fn new(bytes_total: u64, blocks_total: usize) -> Self {
        Self {
            inner: Mutex::new(ProgressSnapshot {
                bytes_total,
                blocks_total,
                ..Default::default()
            }),
        }
    }

    /// 增加总量（下载任务在拿到文件大小后才知道总量）
    pub fn add_total(&self, bytes: u64, blocks: usize) {
        let mut inner = self.inner.lock();
        inner.bytes_total += bytes;
        inner.blocks_total += blocks;
    }

    /// 累加已传输字节
    pub fn add_bytes(&self, bytes: u64) {
        self.inner.lock().bytes_done += bytes;
    }

    /// 一个传输单元（文件）完成
    pub fn complete_one(&self) {
        self.inner.lock().blocks_confirmed += 1;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.inner.lock()
    }
}
