// 网盘开放接口抽象
//
// UploadSession / DownloadOrchestrator 只依赖该 trait，测试中以内存实现替换

use crate::common::ProgressCallback;
use crate::error::PcsResult;
use crate::netdisk::types::{CreateFileResponse, DirectLink, FileItem, PrecreateResponse};
use crate::uploader::BlockManifest;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait PcsApi: Send + Sync {
    /// 列出目录下的全部条目（自动翻页）；目录不存在时返回空列表
    async fn list_dir(&self, dir: &str) -> PcsResult<Vec<FileItem>>;

    /// 通过 fs_id 获取带 access_token 的下载直链
    async fn resolve_dlink(&self, fs_id: u64) -> PcsResult<DirectLink>;

    /// 预创建，返回 uploadid 或秒传结果
    async fn precreate(
        &self,
        remote_path: &str,
        manifest: &BlockManifest,
    ) -> PcsResult<PrecreateResponse>;

    /// 上传单个分片，返回服务端计算的分片 MD5
    async fn upload_block(
        &self,
        remote_path: &str,
        upload_id: &str,
        part_seq: usize,
        data: Vec<u8>,
    ) -> PcsResult<String>;

    /// 合并分片，创建文件
    async fn create_file(
        &self,
        remote_path: &str,
        upload_id: &str,
        manifest: &BlockManifest,
    ) -> PcsResult<CreateFileResponse>;

    /// 把直链内容流式写入本地文件，返回写入字节数
    async fn fetch_to_file(
        &self,
        link: &DirectLink,
        dest: &Path,
        on_progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> PcsResult<u64>;
}
