#![doc = r#"
spark-fiber：单线程协作式纤程运行时。

# 教案式概览

## 意图 (Why)
- 网络服务需要同时照看大量连接，却不希望为每个连接付出一个 OS 线程；
- 本 crate 把“等待”显式化：任务在挂起点交出控制权，由 Worker 在每拍心跳中按标识恢复。

## 模块地图 (How)
- [`envelope`]：进程内挂起/恢复与跨组件通知的信封；
- [`fiber`] 与 [`runtime`]：任务状态机、任务注册表、依赖解析、事件队列；
- [`timer`]：按绝对到期时间排序的延时调度器（一次性事件、循环、睡眠）；
- [`protocol`] 与 [`connection`]：可插拔分帧策略与连接状态；
- [`worker`] 与 [`kernel`]：Worker 生命周期、工作队列与单拍调度；
- [`services`]：会话、数据库、进程管理与模板渲染的协作者接口；
- [`test_stubs`]：内存套接字与手动时钟。

## 契约 (What)
- 所有类型都是单线程的；水平扩展依赖多进程 fork，而非进程内线程；
- 取消只经由 `recover`，且幂等。
"#]

pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod fiber;
mod ids;
pub mod inject;
pub mod kernel;
pub mod protocol;
pub mod runtime;
pub mod services;
pub mod socket;
pub mod test_stubs;
pub mod timer;
pub mod worker;

pub use config::{RuntimeConfig, SocketOptions};
pub use connection::Connection;
pub use envelope::{Envelope, Source, names};
pub use error::{
    BoxError, ConfigError, FiberError, FramingError, IoCategory, TaskError, Unresolvable,
    UnresolvableReason, WorkerError, categorize_io_error,
};
pub use fiber::{FiberContext, FiberState, Step};
pub use ids::{SocketId, TaskId, TimerId};
pub use inject::{Injectable, Resolver, TypeMap};
pub use kernel::{Kernel, TickReport};
pub use protocol::{Cut, Handshake, Link, Metadata, Outbound, Passthrough, Protocol};
pub use runtime::{Runtime, WeakRuntime};
pub use socket::{Listener, Socket};
pub use worker::{Corruption, NetWorker, Service, Suspension, WorkOutcome, Worker, WorkerCore};
