// Baidu PCS Transfer Library
// 百度网盘分片上传 / 多文件下载客户端核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 错误类型
pub mod error;

// 公共模块（流式传输、进度）
pub mod common;

// 网盘API模块
pub mod netdisk;

// 上传模块
pub mod uploader;

// 下载模块
pub mod downloader;

// 导出常用类型
pub use config::AppConfig;
pub use downloader::{DownloadOrchestrator, DownloadReport, DownloadTask};
pub use error::{LookupError, PcsError, PcsResult};
pub use netdisk::{NetdiskClient, PcsApi};
pub use uploader::{
    BlockManifest, ContentFingerprinter, Md5Fingerprinter, UploadOptions, UploadReport,
    UploadSession,
};
