// 网盘API数据类型

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// dlink 有效期（百度开放平台文档：8 小时）
pub const DLINK_TTL_SECS: i64 = 8 * 60 * 60;

/// 文件信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileItem {
    /// 文件服务器ID
    #[serde(rename = "fs_id")]
    pub fs_id: u64,

    /// 文件路径
    #[serde(default)]
    pub path: String,

    /// 服务器文件名
    pub server_filename: String,

    /// 文件大小（字节）
    #[serde(default)]
    pub size: u64,

    /// 是否是目录 (0=文件, 1=目录)
    #[serde(default)]
    pub isdir: i32,

    /// MD5（仅文件有效）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,

    /// 服务器修改时间
    #[serde(default)]
    pub server_mtime: i64,
}

impl FileItem {
    /// 是否是目录
    pub fn is_directory(&self) -> bool {
        self.isdir == 1
    }

    /// 是否是文件
    pub fn is_file(&self) -> bool {
        self.isdir == 0
    }

    /// 获取文件名（不含路径）
    pub fn filename(&self) -> &str {
        &self.server_filename
    }
}

/// 文件列表响应
#[derive(Debug, Deserialize)]
pub struct FileListResponse {
    /// 错误码（0表示成功）
    pub errno: i32,

    /// 错误信息
    #[serde(default)]
    pub errmsg: String,

    /// 文件列表
    #[serde(default)]
    pub list: Vec<FileItem>,
}

/// filemetas 中的单个文件信息
#[derive(Debug, Deserialize)]
pub struct FileMeta {
    #[serde(rename = "fs_id")]
    pub fs_id: u64,

    /// 下载直链（需拼接 access_token）
    #[serde(default)]
    pub dlink: String,

    #[serde(default)]
    pub filename: String,

    #[serde(default)]
    pub size: u64,
}

/// filemetas 响应
#[derive(Debug, Deserialize)]
pub struct FileMetasResponse {
    pub errno: i32,

    #[serde(default)]
    pub errmsg: String,

    #[serde(default)]
    pub list: Vec<FileMeta>,
}

/// 已解析的下载直链
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectLink {
    /// 文件服务器ID
    pub fs_id: u64,
    /// 可直接 GET 的完整 URL（已带 access_token）
    pub url: String,
    /// 解析时间
    pub resolved_at: DateTime<Utc>,
}

impl DirectLink {
    pub fn new(fs_id: u64, url: String) -> Self {
        Self {
            fs_id,
            url,
            resolved_at: Utc::now(),
        }
    }

    /// 过期时间
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.resolved_at + Duration::seconds(DLINK_TTL_SECS)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }
}

// =====================================================
// 上传相关类型定义
// =====================================================

/// 预创建文件响应
#[derive(Debug, Deserialize)]
pub struct PrecreateResponse {
    /// 错误码（0表示成功）
    pub errno: i32,

    /// 返回类型（1=普通上传，2=秒传成功）
    #[serde(default, rename = "return_type")]
    pub return_type: i32,

    /// 上传ID（用于后续分片上传）
    #[serde(default)]
    pub uploadid: String,

    /// 需要上传的分片序号列表
    #[serde(default)]
    pub block_list: Vec<i32>,

    /// 错误信息
    #[serde(default)]
    pub errmsg: String,
}

impl PrecreateResponse {
    /// 是否秒传成功
    pub fn is_rapid_upload(&self) -> bool {
        self.return_type == 2
    }
}

/// 上传分片响应
#[derive(Debug, Deserialize)]
pub struct UploadChunkResponse {
    /// 错误码（0表示成功）
    #[serde(default)]
    pub error_code: i32,

    /// 服务端计算的分片 MD5
    #[serde(default)]
    pub md5: String,

    /// 请求ID
    #[serde(default)]
    pub request_id: u64,

    /// 错误信息
    #[serde(default)]
    pub error_msg: String,
}

impl UploadChunkResponse {
    /// 是否成功
    pub fn is_success(&self) -> bool {
        self.error_code == 0 && !self.md5.is_empty()
    }
}

/// 创建文件响应
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFileResponse {
    /// 错误码（0表示成功）
    pub errno: i32,

    /// 文件服务器ID
    #[serde(default, rename = "fs_id")]
    pub fs_id: u64,

    /// 文件 MD5
    #[serde(default)]
    pub md5: String,

    /// 服务器文件名
    #[serde(default)]
    pub server_filename: String,

    /// 文件路径（重名时服务端可能改名）
    #[serde(default)]
    pub path: String,

    /// 文件大小
    #[serde(default)]
    pub size: u64,

    /// 错误信息
    #[serde(default)]
    pub errmsg: String,
}

impl CreateFileResponse {
    /// 是否成功
    pub fn is_success(&self) -> bool {
        self.errno == 0
    }
}

/// 百度 API 错误码分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrnoKind {
    /// access_token 无效或过期
    Auth,
    /// 服务器错误（可重试）
    ServerError,
    /// 限流（可重试）
    RateLimited,
    /// 文件或目录不存在
    FileNotFound,
    /// 权限不足
    Forbidden,
    /// 参数错误
    BadRequest,
    /// 文件已存在
    FileExists,
    /// 空间不足
    QuotaExceeded,
    /// 未知错误
    Unknown,
}

impl ErrnoKind {
    /// 是否可重试
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrnoKind::ServerError | ErrnoKind::RateLimited)
    }

    /// 从百度 API errno / error_code 转换
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            -6 | 110 | 111 | 31045 => ErrnoKind::Auth,
            -1 | -3 | -11 | 31299 | 31352 => ErrnoKind::ServerError,
            31023 | 31024 | 31034 => ErrnoKind::RateLimited,
            -9 | 31066 | 404 => ErrnoKind::FileNotFound,
            -7 | 31062 | 31063 => ErrnoKind::Forbidden,
            2 | 31061 | 31079 => ErrnoKind::BadRequest,
            -8 | 31190 => ErrnoKind::FileExists,
            -10 | 31064 | 31083 => ErrnoKind::QuotaExceeded,
            _ => ErrnoKind::Unknown,
        }
    }
}
