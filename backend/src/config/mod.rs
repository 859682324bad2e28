// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 认证配置（只接收现成的 access_token，不负责获取/刷新）
    #[serde(default)]
    pub auth: AuthConfig,
    /// 网盘 API 配置
    #[serde(default)]
    pub api: ApiConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 下载配置
    #[serde(default)]
    pub download: DownloadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 认证配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// 开放平台 access_token
    #[serde(default)]
    pub access_token: String,
}

/// 网盘 API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// xpan 接口地址（list / filemetas / precreate / create）
    #[serde(default = "default_pan_base_url")]
    pub pan_base_url: String,
    /// PCS 上传服务器地址（superfile2）
    #[serde(default = "default_pcs_base_url")]
    pub pcs_base_url: String,
    /// User-Agent（dlink 下载要求为 pan.baidu.com）
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// 单次请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_pan_base_url() -> String {
    "https://pan.baidu.com".to_string()
}

fn default_pcs_base_url() -> String {
    "https://d.pcs.baidu.com".to_string()
}

fn default_user_agent() -> String {
    "pan.baidu.com".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            pan_base_url: default_pan_base_url(),
            pcs_base_url: default_pcs_base_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 网盘目标目录，文件上传到 `<remote_dir>/<文件名>`
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
    /// 分片大小 (MB)，0 表示按文件大小自动选择
    #[serde(default)]
    pub block_size_mb: u64,
    /// 单个文件最大并发分片数
    #[serde(default = "default_max_concurrent_blocks")]
    pub max_concurrent_blocks: usize,
    /// 最大重试轮次（含首轮）
    #[serde(default = "default_max_retry_rounds")]
    pub max_retry_rounds: u32,
    /// 轮次间初始退避（毫秒）
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// 服务端允许的最大分片数
    #[serde(default = "default_max_block_count")]
    pub max_block_count: usize,
}

fn default_remote_dir() -> String {
    "/apps/download_anywhere".to_string()
}

fn default_max_concurrent_blocks() -> usize {
    8
}

fn default_max_retry_rounds() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_block_count() -> usize {
    1024
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            remote_dir: default_remote_dir(),
            block_size_mb: 0,
            max_concurrent_blocks: default_max_concurrent_blocks(),
            max_retry_rounds: default_max_retry_rounds(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_block_count: default_max_block_count(),
        }
    }
}

impl UploadConfig {
    /// 配置中显式指定的分片大小（字节）
    pub fn block_size_override(&self) -> Option<u64> {
        (self.block_size_mb > 0).then(|| self.block_size_mb * 1024 * 1024)
    }

    /// 计算本地文件对应的网盘目标路径
    pub fn remote_path_for(&self, local_path: &Path) -> String {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}/{}", self.remote_dir.trim_end_matches('/'), name)
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 最大同时下载文件数
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// 流式写盘缓冲区大小 (KB)
    #[serde(default = "default_buffer_size_kb")]
    pub buffer_size_kb: usize,
}

fn default_max_concurrent_tasks() -> usize {
    3
}

fn default_buffer_size_kb() -> usize {
    64
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            buffer_size_kb: default_buffer_size_kb(),
        }
    }
}

impl DownloadConfig {
    pub fn buffer_size(&self) -> usize {
        self.buffer_size_kb.max(1) * 1024
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 保留的日志文件个数（按天滚动，默认 7 个）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: usize,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> usize {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }

    /// 校验配置取值范围
    pub fn validate(&self) -> Result<()> {
        if self.upload.max_concurrent_blocks == 0 {
            anyhow::bail!("upload.max_concurrent_blocks 必须大于 0");
        }
        if self.upload.max_retry_rounds == 0 {
            anyhow::bail!("upload.max_retry_rounds 必须大于 0");
        }
        if self.upload.max_block_count == 0 {
            anyhow::bail!("upload.max_block_count 必须大于 0");
        }
        if !self.upload.remote_dir.starts_with('/') {
            anyhow::bail!(
                "upload.remote_dir 必须是网盘绝对路径: {}",
                self.upload.remote_dir
            );
        }
        if self.download.max_concurrent_tasks == 0 {
            anyhow::bail!("download.max_concurrent_tasks 必须大于 0");
        }
        if self.api.timeout_secs == 0 {
            anyhow::bail!("api.timeout_secs 必须大于 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.upload.max_concurrent_blocks, 8);
        assert_eq!(config.upload.max_retry_rounds, 5);
        assert_eq!(config.upload.remote_dir, "/apps/download_anywhere");
        assert_eq!(config.download.max_concurrent_tasks, 3);
        assert_eq!(config.api.user_agent, "pan.baidu.com");
        assert!(config.upload.block_size_override().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [auth]
            access_token = "abc"

            [upload]
            block_size_mb = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.auth.access_token, "abc");
        assert_eq!(config.upload.block_size_override(), Some(16 * 1024 * 1024));
        assert_eq!(config.upload.max_concurrent_blocks, 8);
        assert_eq!(config.api.pan_base_url, "https://pan.baidu.com");
        assert!(config.log.enabled);
    }

    #[test]
    fn test_remote_path_for() {
        let upload = UploadConfig {
            remote_dir: "/apps/test/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            upload.remote_path_for(Path::new("/tmp/data/movie.mkv")),
            "/apps/test/movie.mkv"
        );
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.upload.max_concurrent_blocks = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upload.remote_dir = "relative/dir".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config/app.toml");
        let path = path.to_str().unwrap();

        let mut config = AppConfig::default();
        config.auth.access_token = "token-123".to_string();
        config.download.max_concurrent_tasks = 6;
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.auth.access_token, "token-123");
        assert_eq!(loaded.download.max_concurrent_tasks, 6);
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let config = AppConfig::load_or_default("/nonexistent/dir/app.toml").await;
        assert_eq!(config.upload.max_concurrent_blocks, 8);
    }
}
