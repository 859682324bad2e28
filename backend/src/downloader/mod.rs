// 下载模块
//
// 按文件名定位网盘文件，解析直链后流式写入本地，多个文件并发下载

pub mod link;
pub mod locator;
pub mod orchestrator;
pub mod task;

pub use link::LinkResolver;
pub use locator::{split_remote_name, RemoteFileLocator};
pub use orchestrator::{DownloadOrchestrator, DownloadReport};
pub use task::{DownloadTask, TaskStatus};
