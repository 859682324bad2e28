// 分片内容指纹
//
// 服务端按 MD5 校验分片，默认实现即 MD5；SHA-256 实现供测试与替身服务使用

use md5::Context as Md5Context;
use sha2::{Digest, Sha256};
use std::fmt::Debug;

/// 增量哈希器，按读取顺序喂入数据
pub trait BlockHasher: Send {
    fn update(&mut self, data: &[u8]);

    /// 输出小写十六进制摘要
    fn finish(self: Box<Self>) -> String;
}

/// 内容指纹算法
pub trait ContentFingerprinter: Send + Sync + Debug {
    /// 算法名（日志用）
    fn name(&self) -> &'static str;

    fn hasher(&self) -> Box<dyn BlockHasher>;

    /// 一次性计算整段数据的指纹
    fn fingerprint(&self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finish()
    }
}

/// MD5 指纹（服务端使用的算法）
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Fingerprinter;

struct Md5Hasher(Md5Context);

impl BlockHasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.consume(data);
    }

    fn finish(self: Box<Self>) -> String {
        format!("{:x}", self.0.compute())
    }
}

impl ContentFingerprinter for Md5Fingerprinter {
    fn name(&self) -> &'static str {
        "md5"
    }

    fn hasher(&self) -> Box<dyn BlockHasher> {
        Box::new(Md5Hasher(Md5Context::new()))
    }
}

/// SHA-256 指纹
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Fingerprinter;

struct Sha256Hasher(Sha256);

impl BlockHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(self: Box<Self>) -> String {
        hex::encode(self.0.finalize())
    }
}

impl ContentFingerprinter for Sha256Fingerprinter {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn hasher(&self) -> Box<dyn BlockHasher> {
        Box::new(Sha256Hasher(Sha256::new()))
    }
}
