// 上传模块
//
// - fingerprint: 分片内容指纹（MD5 / SHA-256）
// - planner: 分片大小选择与分片清单
// - session: 单文件上传会话（precreate → 分片上传 → create）

pub mod fingerprint;
pub mod planner;
pub mod session;

pub use fingerprint::{BlockHasher, ContentFingerprinter, Md5Fingerprinter, Sha256Fingerprinter};
pub use planner::{
    block_count, choose_block_size, plan, plan_file, Block, BlockManifest, DEFAULT_BLOCK_SIZE,
    MAX_BLOCK_SIZE,
};
pub use session::{
    BlockOutcome, BlockStatus, PrecreateOutcome, ProgressHandle, SessionState, UploadOptions,
    UploadReport, UploadSession,
};
