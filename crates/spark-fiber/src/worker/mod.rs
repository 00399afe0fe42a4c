//! Worker：驱动与业务之间的调度单元。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 驱动只负责“哪个套接字可读、哪个事件到了、时钟走了一拍”，
//!   Worker 负责把这些刺激转化为任务的创建、排队、推进与回收；
//! - 取消只有一条路径：[`Worker::recover`]。错误处理器、连接关闭、外部超时都走它。
//!
//! ## 逻辑 (How)
//! - 读路径把字节追加到连接的累积缓冲，再由协议切帧，每个完整帧交给 [`Service::on_frame`]；
//! - 服务为帧创建任务并 [`WorkerCore::admit`]：绑定到连接、排队启动；
//! - [`Worker::heartbeat`] 排空心跳开始时已在队列中的条目：启动任务、投递恢复信封、执行服务工作；
//! - 推进过程中逃逸出的错误在 Worker 边界被截获，交给异常处理器后强制回收该任务。
//!
//! ## 契约 (What)
//! - 队列条目按任务标识管理，每个任务的条目在其生命周期内恰好被移除一次；
//! - `recover` 幂等，对未注册的标识是静默空操作；
//! - `heartbeat` 从不阻塞：写不完的数据留给下一拍；
//! - `forking` 之后子进程不持有任何继承来的任务、队列或连接，监听器保留。
//!
//! ## 风险 (Trade-offs)
//! - 单个任务体内部的长时间计算会拖住整个 Worker；协作式模型要求业务代码及时挂起。

mod net;
mod queue;
mod state;

pub use net::{Corruption, NetWorker, Service, Suspension, WorkOutcome};
pub use queue::{Pending, WorkQueue};
pub use state::WorkerCore;

use crate::envelope::Envelope;
use crate::error::WorkerError;
use crate::ids::{SocketId, TaskId};
use crate::runtime::Runtime;
use crate::socket::{Listener, Socket};
use std::rc::Rc;

/// 驱动面向 Worker 的调用契约。
pub trait Worker {
    fn name(&self) -> &Rc<str>;

    /// 启动时调用一次。
    fn initialize(&mut self) -> Result<(), WorkerError>;

    /// 接管一个监听套接字；其可读时 `handle_socket` 会接受所有待接入连接。
    fn listen(&mut self, listener: Box<dyn Listener>) -> SocketId;

    /// 接管一个已建立的连接。
    fn adopt(&mut self, socket: Box<dyn Socket>) -> Result<SocketId, WorkerError>;

    /// 套接字有输入待处理。
    fn handle_socket(&mut self, socket: SocketId);

    /// 套接字出错或挂断。
    fn expect_socket(&mut self, socket: SocketId);

    /// 投递给本 Worker 的跨组件消息。
    fn handle_event(&mut self, envelope: Envelope);

    /// 每拍恰好调用一次。
    fn heartbeat(&mut self);

    fn destroy(&mut self);

    /// 进程 fork 后在子进程中调用，传入全新的运行时。
    fn forking(&mut self, runtime: Runtime);

    fn owns_socket(&self, socket: SocketId) -> bool;

    fn is_busy(&self) -> bool;

    /// 取消任务并移除其排队工作。
    fn recover(&mut self, task: TaskId) -> bool;
}
