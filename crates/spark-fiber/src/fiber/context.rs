use super::{Channel, Incoming};
use crate::envelope::{Envelope, Source, names};
use crate::error::{TaskError, Unresolvable};
use crate::ids::TaskId;
use crate::inject::{Injectable, Resolver, TypeMap};
use crate::runtime::{Runtime, WeakRuntime};
use core::fmt;
use std::any::Any;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

/// `publish_async` 恢复值的处理器。
pub type EventHandler = Box<dyn FnMut(&Envelope)>;

/// 任务体内部使用的句柄：挂起、睡眠、依赖解析都经由它完成。
#[derive(Clone)]
pub struct FiberContext {
    id: TaskId,
    channel: Rc<Channel>,
    dependencies: Rc<RefCell<TypeMap>>,
    handlers: Rc<RefCell<HashMap<String, Vec<EventHandler>>>>,
    runtime: WeakRuntime,
}

impl FiberContext {
    pub(crate) fn new(
        id: TaskId,
        channel: Rc<Channel>,
        dependencies: Rc<RefCell<TypeMap>>,
        runtime: WeakRuntime,
    ) -> Self {
        Self {
            id,
            channel,
            dependencies,
            handlers: Rc::new(RefCell::new(HashMap::new())),
            runtime,
        }
    }

    /// 当前任务的标识。
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// 所在运行时；运行时已被销毁时返回 `None`。
    pub fn runtime(&self) -> Option<Runtime> {
        self.runtime.upgrade()
    }

    /// 挂起当前任务并发出信封，直到外部以某个值恢复它。
    ///
    /// 恢复值即 `await` 的结果；外部调用 `throw` 时得到错误。
    pub fn publish_await(&self, name: impl Into<Cow<'static, str>>, data: impl Any) -> Suspend {
        Suspend {
            channel: Rc::clone(&self.channel),
            pending: Some(Envelope::new(name, data, Source::Task(self.id))),
        }
    }

    /// 挂起当前任务并发出信封；恢复值交给 [`on_event`](Self::on_event) 注册的处理器，
    /// 而不是返回给调用点。
    pub fn publish_async(
        &self,
        name: impl Into<Cow<'static, str>>,
        data: impl Any,
    ) -> impl Future<Output = Result<(), TaskError>> + 'static {
        let suspend = self.publish_await(name, data);
        let handlers = Rc::clone(&self.handlers);
        let id = self.id;
        async move {
            let envelope = suspend.await?;
            dispatch(&handlers, id, &envelope);
            Ok(())
        }
    }

    /// 为 `publish_async` 的恢复值注册处理器，按恢复信封的名称匹配。
    pub fn on_event(&self, name: impl Into<String>, handler: impl FnMut(&Envelope) + 'static) {
        self.handlers
            .borrow_mut()
            .entry(name.into())
            .or_default()
            .push(Box::new(handler));
    }

    /// 睡眠 `duration`：只挂起当前任务，到期后由延时调度器唤醒。
    pub fn sleep(&self, duration: Duration) -> impl Future<Output = Result<(), TaskError>> + 'static {
        let runtime = self.runtime.clone();
        let id = self.id;
        let suspend = self.publish_await(names::TIMER_SLEEP, duration);
        async move {
            match runtime.upgrade() {
                Some(runtime) => runtime.schedule_sleep(duration, id),
                None => return Err(TaskError::interrupted("runtime is gone")),
            };
            suspend.await.map(|_| ())
        }
    }

    /// 为当前任务固定一个显式实例，覆盖运行时提供者。
    pub fn inject<T: ?Sized + 'static>(&self, instance: Rc<T>) {
        self.dependencies.borrow_mut().insert(instance);
    }

    /// 只在已注册实例中查找（任务缓存 → 运行时提供者）。
    pub fn lookup<T: ?Sized + 'static>(&self) -> Result<Rc<T>, Unresolvable> {
        self.with_resolver(|resolver| resolver.lookup::<T>())
    }

    /// 查找或构造 `T`。
    pub fn resolve<T: Injectable>(&self) -> Result<Rc<T>, Unresolvable> {
        self.with_resolver(|resolver| resolver.require::<T>())
    }

    fn with_resolver<R>(
        &self,
        body: impl FnOnce(&mut Resolver<'_>) -> Result<R, Unresolvable>,
    ) -> Result<R, Unresolvable> {
        let runtime = self.runtime.upgrade();
        let empty = TypeMap::new();
        let (outcome, promoted) = {
            let local = self.dependencies.borrow();
            let providers = runtime.as_ref().map(|runtime| runtime.providers().borrow());
            let mut resolver = Resolver::new(&local, providers.as_deref().unwrap_or(&empty));
            let outcome = body(&mut resolver);
            (outcome, resolver.into_promoted())
        };
        promoted.apply(&mut self.dependencies.borrow_mut());
        outcome
    }
}

impl fmt::Debug for FiberContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberContext").field("id", &self.id).finish_non_exhaustive()
    }
}

fn dispatch(handlers: &RefCell<HashMap<String, Vec<EventHandler>>>, id: TaskId, envelope: &Envelope) {
    let taken = handlers.borrow_mut().remove(envelope.name());
    let Some(mut list) = taken else {
        tracing::debug!(task = %id, event = envelope.name(), "no handler for async resumption");
        return;
    };
    for handler in list.iter_mut() {
        handler(envelope);
    }
    // 处理器执行期间可能注册了同名的新处理器，保留两者。
    let mut handlers = handlers.borrow_mut();
    let slot = handlers.entry(envelope.name().to_owned()).or_default();
    list.append(slot);
    *slot = list;
}

/// 单个挂起点。
///
/// 第一次轮询发出信封并返回 `Pending`；之后每次轮询检查收件槽。
#[must_use = "suspension only happens when awaited"]
pub struct Suspend {
    channel: Rc<Channel>,
    pending: Option<Envelope>,
}

impl Future for Suspend {
    type Output = Result<Envelope, TaskError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(envelope) = this.pending.take() {
            this.channel.emit(envelope);
            return Poll::Pending;
        }
        match this.channel.take_incoming() {
            Some(Incoming::Value(envelope)) => Poll::Ready(Ok(envelope)),
            Some(Incoming::Fault(error)) => Poll::Ready(Err(error)),
            None => Poll::Pending,
        }
    }
}
