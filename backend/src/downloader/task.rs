use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// 下载任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// 等待中
    Pending,
    /// 下载中
    Downloading,
    /// 已完成
    Completed,
    /// 失败
    Failed,
}

/// 下载任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    /// 任务ID（日志关联用）
    pub id: String,
    /// 网盘文件名或路径，如 "/docs/a.txt"；不含目录时在根目录查找
    pub remote_name: String,
    /// 本地保存路径
    pub local_path: PathBuf,
    /// 定位后得到的文件服务器ID
    pub fs_id: Option<u64>,
    /// 文件大小（定位后可知）
    pub total_size: u64,
    /// 已下载大小
    pub downloaded_size: u64,
    /// 任务状态
    pub status: TaskStatus,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 完成时间 (Unix timestamp)
    pub completed_at: Option<i64>,
    /// 错误信息
    pub error: Option<String>,
}

impl DownloadTask {
    pub fn new(remote_name: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            remote_name: remote_name.into(),
            local_path: local_path.into(),
            fs_id: None,
            total_size: 0,
            downloaded_size: 0,
            status: TaskStatus::Pending,
            created_at: Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// 任务ID前 8 位，日志里够用
    pub fn short_id(&self) -> &str {
        &self.id[..8.min(self.id.len())]
    }

    pub fn mark_downloading(&mut self) {
        self.status = TaskStatus::Downloading;
        self.started_at = Some(Utc::now().timestamp());
    }

    pub fn mark_completed(&mut self, bytes: u64) {
        self.status = TaskStatus::Completed;
        self.downloaded_size = bytes;
        self.completed_at = Some(Utc::now().timestamp());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now().timestamp());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_lifecycle() {
        let mut task = DownloadTask::new("/docs/a.txt", "./a.txt");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.short_id().len(), 8);

        task.mark_downloading();
        assert_eq!(task.status, TaskStatus::Downloading);
        assert!(task.started_at.is_some());

        task.mark_completed(42);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.downloaded_size, 42);
    }

    #[test]
    fn test_task_ids_unique() {
        let a = DownloadTask::new("a", "a");
        let b = DownloadTask::new("a", "a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_mark_failed() {
        let mut task = DownloadTask::new("a", "a");
        task.mark_failed("网盘文件不存在".to_string());
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("网盘文件不存在"));
    }
}
