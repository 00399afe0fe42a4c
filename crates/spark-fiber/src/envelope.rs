//! 事件信封：进程内挂起/恢复与跨组件通知的唯一载体。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 纤程在任何挂起点都需要告诉驱动“我在等什么”，驱动恢复它时也需要携带结果；
//!   两个方向都使用同一种不可变消息 `{name, data, source}`，路由逻辑因此只需理解一种形状。
//!
//! ## 逻辑 (How)
//! - `data` 以 `Box<dyn Any>` 承载任意负载，接收方通过 [`Envelope::data`] 或
//!   [`Envelope::into_data`] 按类型取回；
//! - `source` 指明应当接收后续延续的一方：某个任务、某个 Worker，或运行时本身。
//!
//! ## 契约 (What)
//! - 信封创建后不可修改，只提供只读访问器与消费式拆解；
//! - 仅在进程内流转，从不序列化到网络。

use crate::ids::TaskId;
use core::fmt;
use std::any::Any;
use std::borrow::Cow;
use std::rc::Rc;

/// 运行时内置的事件名称。
pub mod names {
    /// 纤程在未给出显式事件时挂起所用的占位名称。
    pub const SUSPEND: &str = "fiber.suspend";
    /// `sleep` 到期后由延时调度器投递给目标任务。
    pub const TIMER_WAKE: &str = "timer.wake";
    /// `sleep` 挂起时发出的等待标记。
    pub const TIMER_SLEEP: &str = "timer.sleep";
    /// 外部触发的超时：要求目标任务所属 Worker 执行 `recover`。
    pub const RECOVER: &str = "worker.recover";
    /// 驱动侧订阅/退订套接字的通知。
    pub const SOCKET_SUBSCRIBE: &str = "socket.subscribe";
    pub const SOCKET_UNSUBSCRIBE: &str = "socket.unsubscribe";
}

/// 信封的接收方。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    Task(TaskId),
    Worker(Rc<str>),
    Runtime,
}

impl Source {
    pub fn worker(name: impl Into<Rc<str>>) -> Self {
        Self::Worker(name.into())
    }

    /// 若接收方是任务，返回其标识。
    pub fn task(&self) -> Option<TaskId> {
        match self {
            Self::Task(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => fmt::Display::fmt(id, f),
            Self::Worker(name) => write!(f, "worker:{name}"),
            Self::Runtime => f.write_str("runtime"),
        }
    }
}

/// 不可变的 `{name, data, source}` 消息。
pub struct Envelope {
    name: Cow<'static, str>,
    data: Box<dyn Any>,
    source: Source,
}

impl Envelope {
    pub fn new(name: impl Into<Cow<'static, str>>, data: impl Any, source: Source) -> Self {
        Self {
            name: name.into(),
            data: Box::new(data),
            source,
        }
    }

    /// 构造不带负载的信封，负载为 `()`。
    pub fn signal(name: impl Into<Cow<'static, str>>, source: Source) -> Self {
        Self::new(name, (), source)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// 按类型借用负载；类型不符时返回 `None`。
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.data.is::<T>()
    }

    /// 消费信封并取出负载；类型不符时原样交还信封。
    pub fn into_data<T: Any>(self) -> Result<T, Self> {
        let Self { name, data, source } = self;
        match data.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(data) => Err(Self { name, data, source }),
        }
    }

    /// 拆解为名称、负载与来源三部分。
    pub fn into_parts(self) -> (Cow<'static, str>, Box<dyn Any>, Source) {
        (self.name, self.data, self.source)
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
