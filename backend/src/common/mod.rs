// 公共模块

pub mod progress;
pub mod stream_transfer;

pub use progress::{ProgressCallback, ProgressSnapshot, TransferProgress};
pub use stream_transfer::StreamTransfer;
