// 上传分片规划
//
// 百度网盘分片规则（开放平台）：
// - 单个分片 4MB 起，文件越大分片越大，最大 32MB
// - 分片数有上限（默认 1024），超出时服务端拒绝 precreate

use crate::error::{PcsError, PcsResult};
use crate::uploader::fingerprint::ContentFingerprinter;
use serde::Serialize;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// 默认分片大小: 4MB
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * MIB;

/// 最大分片大小: 32MB
pub const MAX_BLOCK_SIZE: u64 = 32 * MIB;

/// 计算指纹时的读缓冲区大小
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// 根据文件大小选择分片大小
///
/// <4GB → 4MB，<8GB → 8MB，<16GB → 16MB，其余 32MB
pub fn choose_block_size(file_size: u64) -> u64 {
    if file_size < 4 * GIB {
        DEFAULT_BLOCK_SIZE
    } else if file_size < 8 * GIB {
        8 * MIB
    } else if file_size < 16 * GIB {
        16 * MIB
    } else {
        MAX_BLOCK_SIZE
    }
}

/// 指定分片大小下的分片数（空文件也占一个分片）
pub fn block_count(file_size: u64, block_size: u64) -> u64 {
    if file_size == 0 {
        1
    } else {
        file_size.div_ceil(block_size.max(1))
    }
}

/// 一个上传分片
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    /// 分片序号（即 partseq）
    pub index: usize,
    /// 在文件中的起始偏移
    pub offset: u64,
    /// 分片长度（最后一个分片可能更短）
    pub length: u32,
    /// 分片内容指纹
    pub fingerprint: String,
}

impl Block {
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.length as u64
    }

    /// 从本地文件读取分片数据
    pub async fn read_data(&self, path: &Path) -> PcsResult<Vec<u8>> {
        let path = path.to_path_buf();
        let offset = self.offset;
        let length = self.length as usize;

        run_blocking(move || {
            let mut file = File::open(&path)?;
            file.seek(SeekFrom::Start(offset))?;

            let mut buffer = vec![0u8; length];
            file.read_exact(&mut buffer)?;
            Ok(buffer)
        })
        .await
    }
}

/// 分片清单：一次规划生成，之后不再修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockManifest {
    blocks: Vec<Block>,
    block_size: u64,
    file_size: u64,
}

impl BlockManifest {
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// 按文件顺序排列的指纹
    pub fn fingerprints(&self) -> Vec<&str> {
        self.blocks.iter().map(|b| b.fingerprint.as_str()).collect()
    }

    /// 序列化为 precreate/create 的 block_list 参数
    pub fn to_block_list_json(&self) -> String {
        serde_json::Value::from(self.fingerprints()).to_string()
    }
}

/// 同步规划：顺序读取文件，按 `block_size` 切分并计算指纹
///
/// 只占用一个固定大小的读缓冲区，不会把整个分片读入内存
pub fn plan(
    path: &Path,
    block_size: u64,
    fingerprinter: &dyn ContentFingerprinter,
) -> PcsResult<BlockManifest> {
    if block_size == 0 || block_size > u32::MAX as u64 {
        return Err(PcsError::InvalidInput(format!(
            "分片大小非法: {}",
            block_size
        )));
    }

    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut blocks: Vec<Block> = Vec::new();
    let mut offset = 0u64;

    loop {
        let mut hasher = fingerprinter.hasher();
        let mut length = 0u64;

        while length < block_size {
            let want = (block_size - length).min(buffer.len() as u64) as usize;
            let n = match file.read(&mut buffer[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buffer[..n]);
            length += n as u64;
        }

        // 文件长度恰好是分片大小的整数倍时，最后一次读取为空
        if length == 0 && !blocks.is_empty() {
            break;
        }

        let block = Block {
            index: blocks.len(),
            offset,
            length: length as u32,
            fingerprint: hasher.finish(),
        };
        debug!(
            "分片 #{}: offset={}, length={}, {}={}",
            block.index,
            block.offset,
            block.length,
            fingerprinter.name(),
            block.fingerprint
        );
        blocks.push(block);
        offset += length;

        if length < block_size {
            break;
        }
    }

    info!(
        "分片规划完成: {:?}, 文件大小={}, 分片大小={}, 分片数={}",
        path,
        offset,
        block_size,
        blocks.len()
    );

    Ok(BlockManifest {
        blocks,
        block_size,
        file_size: offset,
    })
}

/// 在阻塞线程池中执行 [`plan`]
pub async fn plan_file(
    path: PathBuf,
    block_size: u64,
    fingerprinter: Arc<dyn ContentFingerprinter>,
) -> PcsResult<BlockManifest> {
    run_blocking(move || plan(&path, block_size, fingerprinter.as_ref())).await
}

async fn run_blocking<T, F>(f: F) -> PcsResult<T>
where
    F: FnOnce() -> PcsResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PcsError::Io(std::io::Error::new(ErrorKind::Other, e)))?
}
