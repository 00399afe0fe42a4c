//! `spark-codec-frame` 提供 [`spark_fiber::Protocol`] 的几种线格式实现。
//!
//! # 教案背景（Why）
//! - 核心 crate 只定义分帧契约与一个透传实现；真实服务需要带边界的帧格式，
//!   也需要“先握手、再进入稳定分帧”的升级式协议；
//! - 三种实现覆盖了最常见的边界识别方式：显式长度、分隔符、自描述帧头。
//!
//! # 使用概览（How）
//! - 在 `Service::protocol` 中为每条连接返回一个新实例，例如 `LengthPrefixed::new(limits)`；
//! - 上限统一由 [`FrameLimits`] 描述，可从 TOML 加载。
//!
//! # 合约说明（What）
//! - 所有实现的 `cut` 在数据不足时不消费任何字节；
//! - 超过上限的帧以 `FramingError::TooLarge` 报告，由 Worker 决定重新同步或关闭；
//! - 出站数据一律经过 `build`，不会写出裸字节。

mod config;
mod length;
mod line;
pub mod websocket;

pub use config::FrameLimits;
pub use length::LengthPrefixed;
pub use line::LineDelimited;
pub use websocket::{Opcode, WebSocket, WsFrame};
