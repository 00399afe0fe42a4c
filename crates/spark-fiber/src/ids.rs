//! 运行时内部使用的不透明标识。
//!
//! # 意图（Why）
//! - 任务与套接字都需要“在生命周期内全局唯一”的键，用于注册表、队列与事件路由；
//! - 使用新类型包装 `u64`，防止把套接字编号误当作任务编号传入 `recover`。
//!
//! # 契约（What）
//! - 标识由 [`Runtime`](crate::Runtime) 的单调计数器发放，不会在同一运行时内重复发放；
//! - 标识只在进程内有意义，不做序列化。

use core::fmt;

/// 任务（纤程）标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// 以原始数值构造标识，通常只在测试或跨组件透传时使用。
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// 返回底层数值。
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// 套接字标识，由 Worker 在接管连接或监听器时分配。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

/// 延时调度器中定时动作的句柄，用于取消循环定时器。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}
