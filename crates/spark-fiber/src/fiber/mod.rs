//! 纤程（可挂起任务）模型。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 每个请求、每个定时动作都需要在“等待 IO / 等待时间”时交出控制权，
//!   又不能阻塞同一线程上的其它工作；
//! - 纤程把一段 `async` 业务代码包装成显式状态机：`NEW → RUNNING → SUSPENDED → RUNNING → TERMINATED`，
//!   由驱动按标识恢复。
//!
//! ## 逻辑 (How)
//! - 任务体是一个 `'static` 的本地 Future，使用 no-op waker 手动轮询；
//! - 挂起点是 [`FiberContext::publish_await`] 返回的 [`Suspend`]：第一次轮询把信封写入
//!   发件槽并返回 `Pending`，恢复时从收件槽取出恢复值；
//! - 任务体中的 panic 被 `catch_unwind` 截获，转化为 [`TaskError::Panicked`]。
//!
//! ## 契约 (What)
//! - `start` 只能调用一次；`resume`/`throw` 只能作用于 SUSPENDED 状态；
//! - 对 TERMINATED 任务的任何推进都返回 [`FiberError::Terminated`]；
//! - 任务体只能在本模块提供的挂起点让出；等待其它 Future 时产生的 `Pending`
//!   会以 `fiber.suspend` 占位信封上报，但不会被自动唤醒。
//!
//! ## 风险 (Trade-offs)
//! - 单线程 `Rc`/`RefCell` 设计意味着 [`Fiber`] 不可跨线程移动；水平扩展依赖多进程。

mod context;
mod registry;

pub use context::{EventHandler, FiberContext, Suspend};
pub use registry::FiberRegistry;

use crate::envelope::{Envelope, Source, names};
use crate::error::{FiberError, TaskError};
use crate::ids::TaskId;
use crate::inject::TypeMap;
use core::fmt;
use futures::future::LocalBoxFuture;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::task::{Context, Poll};

/// 纤程的执行状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FiberState {
    New,
    Running,
    Suspended,
    Terminated,
}

/// 一次推进的结果。
pub enum Step {
    /// 任务在等待信封描述的事件。
    Suspended(Envelope),
    /// 任务正常结束，携带返回值。
    Completed(Box<dyn Any>),
}

impl Step {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// 若挂起，返回等待的事件名。
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Self::Suspended(envelope) => Some(envelope.name()),
            Self::Completed(_) => None,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suspended(envelope) => f.debug_tuple("Suspended").field(envelope).finish(),
            Self::Completed(_) => f.write_str("Completed(..)"),
        }
    }
}

pub(crate) enum Incoming {
    Value(Envelope),
    Fault(TaskError),
}

/// 纤程与其挂起点之间的单槽信道。
#[derive(Default)]
pub(crate) struct Channel {
    outgoing: RefCell<Option<Envelope>>,
    incoming: RefCell<Option<Incoming>>,
}

impl Channel {
    pub(crate) fn emit(&self, envelope: Envelope) {
        *self.outgoing.borrow_mut() = Some(envelope);
    }

    fn take_outgoing(&self) -> Option<Envelope> {
        self.outgoing.borrow_mut().take()
    }

    fn deliver(&self, incoming: Incoming) {
        *self.incoming.borrow_mut() = Some(incoming);
    }

    pub(crate) fn take_incoming(&self) -> Option<Incoming> {
        self.incoming.borrow_mut().take()
    }
}

type Body = LocalBoxFuture<'static, Result<Box<dyn Any>, TaskError>>;

/// 一个可挂起的工作单元。
pub struct Fiber {
    id: TaskId,
    owner: Option<Rc<str>>,
    state: Cell<FiberState>,
    body: RefCell<Option<Body>>,
    channel: Rc<Channel>,
    dependencies: Rc<RefCell<TypeMap>>,
}

impl Fiber {
    /// 绑定任务体，状态为 NEW。注册由 [`Runtime`](crate::Runtime) 负责。
    pub(crate) fn new<F, Fut, T>(
        id: TaskId,
        owner: Option<Rc<str>>,
        runtime: crate::runtime::WeakRuntime,
        body: F,
    ) -> Self
    where
        F: FnOnce(FiberContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + 'static,
        T: Any,
    {
        let channel = Rc::new(Channel::default());
        let dependencies = Rc::new(RefCell::new(TypeMap::new()));
        let context = FiberContext::new(id, Rc::clone(&channel), Rc::clone(&dependencies), runtime);
        let future = body(context);
        let body: Body = Box::pin(async move {
            let value = future.await?;
            Ok(Box::new(value) as Box<dyn Any>)
        });
        Self {
            id,
            owner,
            state: Cell::new(FiberState::New),
            body: RefCell::new(Some(body)),
            channel,
            dependencies,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// 所属 Worker 名称，用于路由恢复信封与异常。
    pub fn owner(&self) -> Option<&Rc<str>> {
        self.owner.as_ref()
    }

    pub fn state(&self) -> FiberState {
        self.state.get()
    }

    /// 任务作用域的依赖缓存。
    pub fn dependencies(&self) -> &Rc<RefCell<TypeMap>> {
        &self.dependencies
    }

    /// 开始执行，直到第一次挂起或结束。
    pub fn start(&self) -> Result<Step, FiberError> {
        match self.state.get() {
            FiberState::New => self.poll(),
            FiberState::Terminated => Err(FiberError::Terminated(self.id)),
            FiberState::Running => Err(FiberError::Running(self.id)),
            FiberState::Suspended => Err(FiberError::AlreadyStarted(self.id)),
        }
    }

    /// 以 `value` 作为上一个挂起点的结果继续执行。
    pub fn resume(&self, value: Envelope) -> Result<Step, FiberError> {
        self.ensure_suspended()?;
        self.channel.deliver(Incoming::Value(value));
        self.poll()
    }

    /// 在上一个挂起点抛出错误。
    pub fn throw(&self, error: TaskError) -> Result<Step, FiberError> {
        self.ensure_suspended()?;
        self.channel.deliver(Incoming::Fault(error));
        self.poll()
    }

    fn ensure_suspended(&self) -> Result<(), FiberError> {
        match self.state.get() {
            FiberState::Suspended => Ok(()),
            FiberState::New => Err(FiberError::NotStarted(self.id)),
            FiberState::Running => Err(FiberError::Running(self.id)),
            FiberState::Terminated => Err(FiberError::Terminated(self.id)),
        }
    }

    /// 丢弃任务体并进入 TERMINATED；正在运行时只标记状态，由轮询结束后清理。
    pub(crate) fn terminate(&self) {
        if let Ok(mut slot) = self.body.try_borrow_mut() {
            slot.take();
        }
        self.state.set(FiberState::Terminated);
    }

    fn poll(&self) -> Result<Step, FiberError> {
        let mut slot = self
            .body
            .try_borrow_mut()
            .map_err(|_| FiberError::Running(self.id))?;
        let Some(body) = slot.as_mut() else {
            self.state.set(FiberState::Terminated);
            return Err(FiberError::Terminated(self.id));
        };

        self.state.set(FiberState::Running);
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        let polled = panic::catch_unwind(AssertUnwindSafe(|| body.as_mut().poll(&mut cx)));

        // 任务体在运行期间被销毁时，状态已被置为 TERMINATED。
        let destroyed = self.state.get() == FiberState::Terminated;
        match polled {
            Ok(Poll::Pending) if !destroyed => {
                self.state.set(FiberState::Suspended);
                let envelope = self.channel.take_outgoing().unwrap_or_else(|| {
                    Envelope::signal(names::SUSPEND, Source::Task(self.id))
                });
                Ok(Step::Suspended(envelope))
            }
            Ok(Poll::Pending) => {
                slot.take();
                Err(FiberError::Terminated(self.id))
            }
            Ok(Poll::Ready(Ok(value))) => {
                slot.take();
                self.state.set(FiberState::Terminated);
                Ok(Step::Completed(value))
            }
            Ok(Poll::Ready(Err(error))) => {
                slot.take();
                self.state.set(FiberState::Terminated);
                Err(FiberError::Unhandled { id: self.id, error })
            }
            Err(payload) => {
                slot.take();
                self.state.set(FiberState::Terminated);
                Err(FiberError::Unhandled {
                    id: self.id,
                    error: TaskError::Panicked(panic_message(payload.as_ref())),
                })
            }
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("state", &self.state.get())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
