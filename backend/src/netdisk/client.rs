// 网盘客户端实现（xpan 开放平台接口，access_token 鉴权）

use crate::common::{ProgressCallback, StreamTransfer};
use crate::config::{ApiConfig, AppConfig};
use crate::error::{PcsError, PcsResult};
use crate::netdisk::api::PcsApi;
use crate::netdisk::types::{
    CreateFileResponse, DirectLink, ErrnoKind, FileItem, FileListResponse, FileMetasResponse,
    PrecreateResponse, UploadChunkResponse,
};
use crate::uploader::BlockManifest;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 目录列表每页条数（接口上限 1000）
const LIST_PAGE_SIZE: usize = 1000;

/// 分片上传超时按最低 64KB/s 估算
const MIN_UPLOAD_BYTES_PER_SEC: u64 = 64 * 1024;

/// 百度网盘客户端
#[derive(Debug, Clone)]
pub struct NetdiskClient {
    /// HTTP客户端
    client: Client,
    /// 开放平台 access_token
    access_token: String,
    /// 接口地址与超时配置
    api: ApiConfig,
    /// 流式传输执行器
    stream: StreamTransfer,
}

impl NetdiskClient {
    /// 创建新的网盘客户端
    ///
    /// # 参数
    /// * `access_token` - 开放平台 access_token（由调用方提供，本客户端不负责刷新）
    /// * `api` - 接口地址配置
    /// * `buffer_size` - 流式传输缓冲区大小
    pub fn new(access_token: impl Into<String>, api: ApiConfig, buffer_size: usize) -> PcsResult<Self> {
        let access_token = access_token.into();
        if access_token.trim().is_empty() {
            return Err(PcsError::InvalidInput("access_token 为空".to_string()));
        }

        let client = Client::builder()
            .user_agent(api.user_agent.clone())
            .connect_timeout(Duration::from_secs(api.timeout_secs))
            .build()?;

        info!(
            "初始化网盘客户端: pan={}, pcs={}",
            api.pan_base_url, api.pcs_base_url
        );

        Ok(Self {
            client,
            access_token,
            api,
            stream: StreamTransfer::new(buffer_size),
        })
    }

    /// 从应用配置创建
    pub fn from_config(config: &AppConfig) -> PcsResult<Self> {
        Self::new(
            config.auth.access_token.clone(),
            config.api.clone(),
            config.download.buffer_size(),
        )
    }

    fn pan_url(&self, path: &str) -> String {
        format!("{}{}", self.api.pan_base_url.trim_end_matches('/'), path)
    }

    fn pcs_url(&self, path: &str) -> String {
        format!("{}{}", self.api.pcs_base_url.trim_end_matches('/'), path)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    fn block_timeout(&self, len: usize) -> Duration {
        Duration::from_secs(self.api.timeout_secs + len as u64 / MIN_UPLOAD_BYTES_PER_SEC)
    }

    /// 给 dlink 拼接 access_token
    fn sign_dlink(&self, dlink: &str) -> String {
        let sep = if dlink.contains('?') { '&' } else { '?' };
        format!(
            "{}{}access_token={}",
            dlink,
            sep,
            urlencoding::encode(&self.access_token)
        )
    }

    /// 获取目录的一页
    async fn list_page(&self, dir: &str, start: usize) -> PcsResult<FileListResponse> {
        let start_str = start.to_string();
        let limit_str = LIST_PAGE_SIZE.to_string();

        let response = self
            .client
            .get(self.pan_url("/rest/2.0/xpan/file"))
            .query(&[
                ("method", "list"),
                ("dir", dir),
                ("order", "name"),
                ("start", start_str.as_str()),
                ("limit", limit_str.as_str()),
                ("web", "web"),
                ("folder", "0"),
                ("access_token", self.access_token.as_str()),
            ])
            .timeout(self.request_timeout())
            .send()
            .await?;

        let (status, text) = read_text(response).await?;
        debug!("文件列表响应: dir={}, start={}, status={}", dir, start, status);
        parse_json(status, &text, "文件列表")
    }

    /// 上传请求的 errno 处理：授权错误直接返回，其余作为可重试的传输错误
    fn block_error(errno: i32, message: &str, part_seq: usize) -> PcsError {
        match ErrnoKind::from_errno(errno) {
            ErrnoKind::Auth => PcsError::Auth {
                errno,
                message: message.to_string(),
            },
            kind => PcsError::Transport(format!(
                "分片 #{} 上传失败: error_code={}, error_msg={}, kind={:?}",
                part_seq, errno, message, kind
            )),
        }
    }
}

/// 控制面接口的 errno 处理
fn control_error(errno: i32, message: &str, what: &str) -> PcsError {
    let kind = ErrnoKind::from_errno(errno);
    match kind {
        ErrnoKind::Auth => PcsError::Auth {
            errno,
            message: message.to_string(),
        },
        _ if kind.is_retriable() => PcsError::Transport(format!(
            "{}失败: errno={}, errmsg={}",
            what, errno, message
        )),
        _ => PcsError::Protocol(format!("{}失败: errno={}, errmsg={}", what, errno, message)),
    }
}

async fn read_text(response: reqwest::Response) -> PcsResult<(StatusCode, String)> {
    let status = response.status();
    let text = response.text().await?;
    Ok((status, text))
}

/// 解析 JSON 响应；非 2xx 且无法解析时按 HTTP 状态归类
fn parse_json<T: DeserializeOwned>(status: StatusCode, text: &str, what: &str) -> PcsResult<T> {
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(_) if status == StatusCode::UNAUTHORIZED => Err(PcsError::Auth {
            errno: status.as_u16() as i32,
            message: text.to_string(),
        }),
        Err(_) if status.is_server_error() => Err(PcsError::Transport(format!(
            "{}请求失败: HTTP {}",
            what, status
        ))),
        Err(e) => Err(PcsError::Protocol(format!(
            "解析{}响应失败: {}, status={}, body={}",
            what, e, status, text
        ))),
    }
}

#[async_trait]
impl PcsApi for NetdiskClient {
    async fn list_dir(&self, dir: &str) -> PcsResult<Vec<FileItem>> {
        let mut items = Vec::new();
        let mut start = 0;

        loop {
            let page = self.list_page(dir, start).await?;

            if page.errno != 0 {
                if ErrnoKind::from_errno(page.errno) == ErrnoKind::FileNotFound {
                    debug!("目录不存在: {}", dir);
                    return Ok(Vec::new());
                }
                return Err(control_error(page.errno, &page.errmsg, "获取文件列表"));
            }

            let count = page.list.len();
            items.extend(page.list);

            if count < LIST_PAGE_SIZE {
                break;
            }
            start += count;
        }

        debug!("获取文件列表成功: dir={}, 共 {} 项", dir, items.len());
        Ok(items)
    }

    async fn resolve_dlink(&self, fs_id: u64) -> PcsResult<DirectLink> {
        let fsids = format!("[{}]", fs_id);

        let response = self
            .client
            .get(self.pan_url("/rest/2.0/xpan/multimedia"))
            .query(&[
                ("method", "filemetas"),
                ("fsids", fsids.as_str()),
                ("dlink", "1"),
                ("access_token", self.access_token.as_str()),
            ])
            .timeout(self.request_timeout())
            .send()
            .await?;

        let (status, text) = read_text(response).await?;
        let metas: FileMetasResponse = parse_json(status, &text, "文件元信息")?;

        if metas.errno != 0 {
            return Err(control_error(metas.errno, &metas.errmsg, "获取下载链接"));
        }

        let dlink = metas
            .list
            .into_iter()
            .find(|meta| meta.fs_id == fs_id && !meta.dlink.is_empty())
            .map(|meta| meta.dlink)
            .ok_or_else(|| PcsError::Protocol(format!("filemetas 未返回 dlink: fs_id={}", fs_id)))?;

        debug!("获取下载链接成功: fs_id={}", fs_id);
        Ok(DirectLink::new(fs_id, self.sign_dlink(&dlink)))
    }

    async fn precreate(
        &self,
        remote_path: &str,
        manifest: &BlockManifest,
    ) -> PcsResult<PrecreateResponse> {
        info!(
            "预创建文件: path={}, size={}, blocks={}",
            remote_path,
            manifest.file_size(),
            manifest.len()
        );

        let size = manifest.file_size().to_string();
        let block_list = manifest.to_block_list_json();

        let response = self
            .client
            .post(self.pan_url("/rest/2.0/xpan/file"))
            .query(&[("method", "precreate"), ("access_token", self.access_token.as_str())])
            .form(&[
                ("path", remote_path),
                ("size", size.as_str()),
                ("isdir", "0"),
                ("autoinit", "1"),
                // 1 = path 冲突时重命名
                ("rtype", "1"),
                ("block_list", block_list.as_str()),
            ])
            .timeout(self.request_timeout())
            .send()
            .await?;

        let (status, text) = read_text(response).await?;
        debug!("预创建响应: status={}, body={}", status, text);

        let precreate: PrecreateResponse = parse_json(status, &text, "预创建")?;
        if precreate.errno != 0 {
            error!(
                "预创建失败: errno={}, errmsg={}",
                precreate.errno, precreate.errmsg
            );
            return Err(match ErrnoKind::from_errno(precreate.errno) {
                ErrnoKind::Auth => PcsError::Auth {
                    errno: precreate.errno,
                    message: precreate.errmsg,
                },
                _ => PcsError::Protocol(format!("预创建失败: {}", text)),
            });
        }

        info!(
            "预创建成功: uploadid={}, return_type={}",
            precreate.uploadid, precreate.return_type
        );
        Ok(precreate)
    }

    async fn upload_block(
        &self,
        remote_path: &str,
        upload_id: &str,
        part_seq: usize,
        data: Vec<u8>,
    ) -> PcsResult<String> {
        debug!(
            "上传分片: path={}, uploadid={}, part={}, size={}",
            remote_path,
            upload_id,
            part_seq,
            data.len()
        );

        let part_seq_str = part_seq.to_string();
        let timeout = self.block_timeout(data.len());
        let request = self
            .client
            .post(self.pcs_url("/rest/2.0/pcs/superfile2"))
            .query(&[
                ("method", "upload"),
                ("access_token", self.access_token.as_str()),
                ("type", "tmpfile"),
                ("path", remote_path),
                ("uploadid", upload_id),
                ("partseq", part_seq_str.as_str()),
            ])
            .timeout(timeout);

        let (status, text) = self
            .stream
            .post_multipart(request, "file", data, None, &CancellationToken::new())
            .await?;

        let chunk: UploadChunkResponse = match serde_json::from_str(&text) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(
                    "解析上传分片响应失败: part={}, status={}, err={}",
                    part_seq, status, e
                );
                if status == StatusCode::UNAUTHORIZED {
                    return Err(PcsError::Auth {
                        errno: status.as_u16() as i32,
                        message: text,
                    });
                }
                return Err(PcsError::Transport(format!(
                    "分片 #{} 响应无法解析: status={}, body={}",
                    part_seq, status, text
                )));
            }
        };

        if !chunk.is_success() {
            return Err(Self::block_error(chunk.error_code, &chunk.error_msg, part_seq));
        }

        debug!("上传分片成功: part={}, md5={}", part_seq, chunk.md5);
        Ok(chunk.md5)
    }

    async fn create_file(
        &self,
        remote_path: &str,
        upload_id: &str,
        manifest: &BlockManifest,
    ) -> PcsResult<CreateFileResponse> {
        info!(
            "创建文件: path={}, size={}, uploadid={}, blocks={}",
            remote_path,
            manifest.file_size(),
            upload_id,
            manifest.len()
        );

        let size = manifest.file_size().to_string();
        let block_list = manifest.to_block_list_json();

        let response = self
            .client
            .post(self.pan_url("/rest/2.0/xpan/file"))
            .query(&[("method", "create"), ("access_token", self.access_token.as_str())])
            .form(&[
                ("path", remote_path),
                ("size", size.as_str()),
                ("isdir", "0"),
                ("rtype", "1"),
                ("uploadid", upload_id),
                ("block_list", block_list.as_str()),
            ])
            .timeout(self.request_timeout())
            .send()
            .await?;

        let (status, text) = read_text(response).await?;
        debug!("创建文件响应: status={}, body={}", status, text);

        let created: CreateFileResponse = parse_json(status, &text, "创建文件")?;
        if !created.is_success() {
            error!("创建文件失败: errno={}, errmsg={}", created.errno, created.errmsg);
            return Err(match ErrnoKind::from_errno(created.errno) {
                ErrnoKind::Auth => PcsError::Auth {
                    errno: created.errno,
                    message: created.errmsg,
                },
                _ => PcsError::Protocol(format!("创建文件失败: {}", text)),
            });
        }

        info!("创建文件成功: path={}, fs_id={}", created.path, created.fs_id);
        Ok(created)
    }

    async fn fetch_to_file(
        &self,
        link: &DirectLink,
        dest: &Path,
        on_progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> PcsResult<u64> {
        if link.is_expired() {
            warn!("下载链接已过期: fs_id={}", link.fs_id);
        }

        let request = self.client.get(&link.url);
        self.stream
            .download_to_file(request, dest, on_progress, cancel)
            .await
    }
}
