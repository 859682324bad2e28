// 下载直链解析

use crate::error::PcsResult;
use crate::netdisk::{DirectLink, PcsApi};
use std::sync::Arc;
use tracing::debug;

/// 通过 filemetas 获取下载直链（已带 access_token）
#[derive(Clone)]
pub struct LinkResolver {
    api: Arc<dyn PcsApi>,
}

impl LinkResolver {
    pub fn new(api: Arc<dyn PcsApi>) -> Self {
        Self { api }
    }

    pub async fn resolve(&self, fs_id: u64) -> PcsResult<DirectLink> {
        let link = self.api.resolve_dlink(fs_id).await?;
        debug!("下载链接有效期至 {}: fs_id={}", link.expires_at(), fs_id);
        Ok(link)
    }
}
