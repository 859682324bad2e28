// 错误类型定义
//
// 分片级错误（完整性校验失败、网络错误）在 UploadSession 内部吸收并按轮次重试；
// 会话级错误与每个下载任务的错误以结构化结果返回给调用方

use thiserror::Error;

/// 远程文件查找错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    /// 目录中没有同名文件
    #[error("网盘文件不存在: dir={dir}, name={name}")]
    NotFound { dir: String, name: String },
    /// 目录中存在多个同名文件
    #[error("网盘文件不唯一: dir={dir}, name={name}, 匹配数={count}")]
    Ambiguous {
        dir: String,
        name: String,
        count: usize,
    },
}

/// 传输客户端统一错误类型
#[derive(Debug, Error)]
pub enum PcsError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// 服务端拒绝了访问令牌
    #[error("授权失败: errno={errno}, {message}")]
    Auth { errno: i32, message: String },

    /// precreate/create 等控制面接口返回了无法处理的响应（不重试）
    #[error("协议错误: {0}")]
    Protocol(String),

    /// 服务端返回的分片 MD5 与本地指纹不一致
    #[error("分片 #{index} 校验失败: 本地={expected}, 服务端={actual}")]
    Integrity {
        index: usize,
        expected: String,
        actual: String,
    },

    /// 单次请求的网络/服务端临时错误
    #[error("传输错误: {0}")]
    Transport(String),

    /// 本地文件读写失败
    #[error("本地 IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 重试轮次耗尽后仍有未确认分片
    #[error("上传失败: {rounds} 轮后仍有 {} 个分片未确认 {unconfirmed:?}", .unconfirmed.len())]
    Transfer {
        unconfirmed: Vec<usize>,
        rounds: u32,
    },

    /// 调用时机不满足状态机前置条件
    #[error("前置条件不满足: {0}")]
    Precondition(String),

    /// 参数非法（如分片数超出服务端上限）
    #[error("参数错误: {0}")]
    InvalidInput(String),

    #[error("操作已取消")]
    Cancelled,
}

impl PcsError {
    /// 是否允许在下一轮中重试
    pub fn is_retriable(&self) -> bool {
        matches!(self, PcsError::Integrity { .. } | PcsError::Transport(_))
    }

    /// 简短的错误类别名，用于汇总日志
    pub fn kind(&self) -> &'static str {
        match self {
            PcsError::Lookup(LookupError::NotFound { .. }) => "not_found",
            PcsError::Lookup(LookupError::Ambiguous { .. }) => "ambiguous",
            PcsError::Auth { .. } => "auth",
            PcsError::Protocol(_) => "protocol",
            PcsError::Integrity { .. } => "integrity",
            PcsError::Transport(_) => "transport",
            PcsError::Io(_) => "io",
            PcsError::Transfer { .. } => "transfer",
            PcsError::Precondition(_) => "precondition",
            PcsError::InvalidInput(_) => "invalid_input",
            PcsError::Cancelled => "cancelled",
        }
    }
}

impl From<reqwest::Error> for PcsError {
    fn from(e: reqwest::Error) -> Self {
        PcsError::Transport(e.to_string())
    }
}

pub type PcsResult<T> = std::result::Result<T, PcsError>;
