// 流式 HTTP 传输
//
// 下载：GET 响应体按块写入本地文件
// 上传：分片数据按固定大小切片后作为 multipart 流发送

use crate::common::progress::ProgressCallback;
use crate::error::{PcsError, PcsResult};
use futures::StreamExt;
use reqwest::{multipart, Body, RequestBuilder, StatusCode};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 默认缓冲区大小
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// 单次流式传输执行器
#[derive(Debug, Clone, Copy)]
pub struct StreamTransfer {
    buffer_size: usize,
}

impl Default for StreamTransfer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl StreamTransfer {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// 发送 GET 请求并把响应体写入 `dest`
    ///
    /// 返回写入的字节数。取消时返回 `PcsError::Cancelled`，已写入的部分文件由调用方处理。
    pub async fn download_to_file(
        &self,
        request: RequestBuilder,
        dest: &Path,
        on_progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> PcsResult<u64> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PcsError::Cancelled),
            resp = request.send() => resp?,
        };

        let status = response.status();
        check_status(status)?;
        let expected = response.content_length();

        let file = File::create(dest).await?;
        let mut writer = BufWriter::with_capacity(self.buffer_size, file);
        let mut stream = response.bytes_stream();
        let mut moved = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    writer.flush().await?;
                    debug!("下载已取消: {:?}, 已写入 {} bytes", dest, moved);
                    return Err(PcsError::Cancelled);
                }
                item = stream.next() => item,
            };

            let Some(chunk) = next else { break };
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            moved += chunk.len() as u64;

            if let Some(callback) = &on_progress {
                callback(moved);
            }
        }

        writer.flush().await?;

        if let Some(expected) = expected {
            if expected != moved {
                return Err(PcsError::Transport(format!(
                    "响应体长度不一致: Content-Length={}, 实际={}",
                    expected, moved
                )));
            }
        }

        debug!("下载完成: {:?}, {} bytes", dest, moved);
        Ok(moved)
    }

    /// 以 multipart/form-data 发送一段数据，返回响应状态与响应体文本
    ///
    /// 数据按 `buffer_size` 切片喂给请求体，进度回调参数为已交给连接的累计字节数。
    pub async fn post_multipart(
        &self,
        request: RequestBuilder,
        field: &str,
        data: Vec<u8>,
        on_progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> PcsResult<(StatusCode, String)> {
        let total = data.len();
        let piece_size = self.buffer_size;

        let pieces = (0..total).step_by(piece_size).map(move |start| {
            let end = (start + piece_size).min(total);
            if let Some(callback) = &on_progress {
                callback(end as u64);
            }
            Ok::<_, std::io::Error>(data[start..end].to_vec())
        });

        let body = Body::wrap_stream(futures::stream::iter(pieces));
        let part = multipart::Part::stream_with_length(body, total as u64)
            .file_name("blob")
            .mime_str("application/octet-stream")?;
        let form = multipart::Form::new().part(field.to_string(), part);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PcsError::Cancelled),
            resp = request.multipart(form).send() => resp?,
        };

        let status = response.status();
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PcsError::Cancelled),
            text = response.text() => text?,
        };

        Ok((status, text))
    }
}

/// HTTP 状态码检查
fn check_status(status: StatusCode) -> PcsResult<()> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(PcsError::Auth {
            errno: status.as_u16() as i32,
            message: "下载链接拒绝访问".to_string(),
        });
    }
    if !status.is_success() {
        return Err(PcsError::Transport(format!("HTTP错误: {}", status)));
    }
    Ok(())
}
