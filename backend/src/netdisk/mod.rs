// 网盘API模块

pub mod api;
pub mod client;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use api::PcsApi;
pub use client::NetdiskClient;
pub use types::*;
