// 网盘文件定位：目录内精确匹配文件名

use crate::error::{LookupError, PcsError, PcsResult};
use crate::netdisk::{FileItem, PcsApi};
use std::sync::Arc;
use tracing::debug;

/// 把网盘文件名拆成 (目录, 文件名)
///
/// 不含目录时在根目录查找；相对路径按根目录解析
pub fn split_remote_name(remote_name: &str) -> PcsResult<(String, String)> {
    let trimmed = remote_name.trim();
    let (dir, name) = match trimmed.rfind('/') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => ("", trimmed),
    };

    if name.is_empty() {
        return Err(PcsError::InvalidInput(format!(
            "网盘文件名为空: {:?}",
            remote_name
        )));
    }

    let dir = dir.trim_matches('/');
    let dir = if dir.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", dir)
    };

    Ok((dir, name.to_string()))
}

/// 远程文件定位器
#[derive(Clone)]
pub struct RemoteFileLocator {
    api: Arc<dyn PcsApi>,
}

impl RemoteFileLocator {
    pub fn new(api: Arc<dyn PcsApi>) -> Self {
        Self { api }
    }

    /// 在所在目录中查找唯一的同名文件（忽略目录）
    pub async fn locate(&self, remote_name: &str) -> PcsResult<FileItem> {
        let (dir, name) = split_remote_name(remote_name)?;
        let items = self.api.list_dir(&dir).await?;

        let mut matches: Vec<FileItem> = items
            .into_iter()
            .filter(|item| item.is_file() && item.filename() == name)
            .collect();

        debug!("定位文件: dir={}, name={}, 匹配数={}", dir, name, matches.len());

        match matches.len() {
            0 => Err(LookupError::NotFound { dir, name }.into()),
            1 => Ok(matches.remove(0)),
            count => Err(LookupError::Ambiguous { dir, name, count }.into()),
        }
    }
}
