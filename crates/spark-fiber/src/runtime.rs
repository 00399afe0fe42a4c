//! 运行时：任务注册表、提供者注册表、延时调度器与事件队列的唯一所有者。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 以显式对象取代进程级全局表：所有需要查找任务、投递事件、注册定时器的组件
//!   都持有同一个 [`Runtime`] 句柄；
//! - 进程 fork 后，子进程通过 [`Runtime::fork`] 得到全新的实例，而不是继承再清空。
//!
//! ## 逻辑 (How)
//! - 内部状态放在 `Rc<Inner>` 中，各张表分别包在 `RefCell` 里，借用范围始终不跨越
//!   对纤程的轮询，避免纤程在运行时回调运行时导致的重复借用；
//! - 纤程上下文只持有 [`WeakRuntime`]，运行时释放时不会被循环引用拖住。
//!
//! ## 契约 (What)
//! - 单线程使用：`Runtime` 既不是 `Send` 也不是 `Sync`；
//! - 任务标识来自单调计数器，同一运行时内不会重复发放；
//! - `destroy` 幂等；对已终止任务的 `resume` 返回 [`FiberError::Terminated`]。

use crate::config::RuntimeConfig;
use crate::envelope::{Envelope, Source, names};
use crate::error::{FiberError, TaskError, Unresolvable};
use crate::fiber::{Fiber, FiberContext, FiberRegistry, FiberState, Step};
use crate::ids::{SocketId, TaskId, TimerId};
use crate::inject::{Injectable, Resolver, TypeMap};
use crate::timer::{Clock, DelayScheduler, SystemClock, TimedAction};
use core::fmt;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const MIN_LOOP_INTERVAL: Duration = Duration::from_millis(1);

struct Inner {
    config: RuntimeConfig,
    clock: Rc<dyn Clock>,
    fibers: RefCell<FiberRegistry>,
    providers: RefCell<TypeMap>,
    timers: RefCell<DelayScheduler>,
    events: RefCell<VecDeque<Envelope>>,
    subscriptions: RefCell<HashMap<String, Rc<str>>>,
    task_timers: RefCell<HashMap<TaskId, Vec<TimerId>>>,
    next_task: Cell<u64>,
    next_socket: Cell<u64>,
}

/// 单线程运行时句柄，克隆开销为一次引用计数。
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<Inner>,
}

/// 不持有所有权的运行时句柄。
#[derive(Clone, Default)]
pub struct WeakRuntime {
    inner: Weak<Inner>,
}

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_clock(config, Rc::new(SystemClock))
    }

    /// 使用自定义时钟创建运行时，测试中通常配合 `ManualClock`。
    pub fn with_clock(config: RuntimeConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                clock,
                fibers: RefCell::new(FiberRegistry::new()),
                providers: RefCell::new(TypeMap::new()),
                timers: RefCell::new(DelayScheduler::new()),
                events: RefCell::new(VecDeque::new()),
                subscriptions: RefCell::new(HashMap::new()),
                task_timers: RefCell::new(HashMap::new()),
                next_task: Cell::new(0),
                next_socket: Cell::new(0),
            }),
        }
    }

    /// fork 后在子进程中使用的全新实例：沿用配置、时钟与组合阶段注册的提供者，
    /// 不继承任何任务、定时器或事件。
    ///
    /// 套接字计数器延续下去，保证新接入的连接不会与继承来的监听器撞号。
    pub fn fork(&self) -> Self {
        let fresh = Self::with_clock(self.inner.config.clone(), Rc::clone(&self.inner.clock));
        fresh.inner.next_socket.set(self.inner.next_socket.get());
        *fresh.inner.providers.borrow_mut() = self.inner.providers.borrow().clone();
        fresh
    }

    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn now(&self) -> Instant {
        self.inner.clock.now()
    }

    /// 两个句柄是否指向同一个运行时。
    pub fn same(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- 任务 ----

    fn next_task_id(&self) -> TaskId {
        let next = self.inner.next_task.get() + 1;
        self.inner.next_task.set(next);
        TaskId::from_raw(next)
    }

    /// 分配一个新的套接字标识。
    pub fn next_socket_id(&self) -> SocketId {
        let next = self.inner.next_socket.get() + 1;
        self.inner.next_socket.set(next);
        SocketId::from_raw(next)
    }

    /// 绑定任务体并以新标识注册，状态为 NEW。
    pub fn spawn<F, Fut, T>(&self, body: F) -> TaskId
    where
        F: FnOnce(FiberContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + 'static,
        T: Any,
    {
        self.spawn_owned(None, body)
    }

    /// 同 [`spawn`](Self::spawn)，并记录所属 Worker，用于路由恢复信封。
    pub fn spawn_owned<F, Fut, T>(&self, owner: Option<Rc<str>>, body: F) -> TaskId
    where
        F: FnOnce(FiberContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + 'static,
        T: Any,
    {
        // 显式复用过的标识可能占用了计数器的下一个值，跳过它们。
        let id = loop {
            let id = self.next_task_id();
            if !self.inner.fibers.borrow().contains(id) {
                break id;
            }
        };
        let fiber = Fiber::new(id, owner, self.downgrade(), body);
        // 上面已确认未被占用，插入不会失败。
        let _ = self.inner.fibers.borrow_mut().insert(fiber);
        debug!(task = %id, "task registered");
        id
    }

    /// 以指定标识注册任务；标识仍被存活任务占用时失败。
    pub fn spawn_as<F, Fut, T>(
        &self,
        id: TaskId,
        owner: Option<Rc<str>>,
        body: F,
    ) -> Result<TaskId, FiberError>
    where
        F: FnOnce(FiberContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + 'static,
        T: Any,
    {
        if self.inner.fibers.borrow().contains(id) {
            return Err(FiberError::Occupied(id));
        }
        let fiber = Fiber::new(id, owner, self.downgrade(), body);
        self.inner.fibers.borrow_mut().insert(fiber)?;
        debug!(task = %id, "task registered with explicit identity");
        Ok(id)
    }

    pub fn fiber(&self, id: TaskId) -> Option<Rc<Fiber>> {
        self.inner.fibers.borrow().get(id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.inner.fibers.borrow().contains(id)
    }

    pub fn state(&self, id: TaskId) -> Option<FiberState> {
        self.inner.fibers.borrow().state(id)
    }

    pub fn owner(&self, id: TaskId) -> Option<Rc<str>> {
        self.fiber(id).and_then(|fiber| fiber.owner().cloned())
    }

    pub fn task_count(&self) -> usize {
        self.inner.fibers.borrow().len()
    }

    pub fn tasks(&self) -> Vec<TaskId> {
        self.inner.fibers.borrow().ids()
    }

    pub fn tasks_owned_by(&self, owner: &str) -> Vec<TaskId> {
        self.inner.fibers.borrow().owned_by(owner)
    }

    pub fn start(&self, id: TaskId) -> Result<Step, FiberError> {
        self.fiber(id).ok_or(FiberError::Unknown(id))?.start()
    }

    pub fn resume(&self, id: TaskId, value: Envelope) -> Result<Step, FiberError> {
        self.fiber(id).ok_or(FiberError::Unknown(id))?.resume(value)
    }

    pub fn throw(&self, id: TaskId, error: TaskError) -> Result<Step, FiberError> {
        self.fiber(id).ok_or(FiberError::Unknown(id))?.throw(error)
    }

    /// 注销任务并丢弃其任务体，同时取消它尚未触发的睡眠与超时；
    /// 重复调用返回 `false`，不会报错。
    pub fn destroy(&self, id: TaskId) -> bool {
        let removed = self.inner.fibers.borrow_mut().remove(id);
        let cancelled = self.cancel_task_timers(id);
        match removed {
            Some(fiber) => {
                fiber.terminate();
                debug!(task = %id, cancelled, "task destroyed");
                true
            }
            None => false,
        }
    }

    // ---- 依赖 ----

    /// 在运行时层注册一个提供者，`T` 可以是 trait 对象。
    pub fn provide<T: ?Sized + 'static>(&self, instance: Rc<T>) -> Option<Rc<T>> {
        self.inner.providers.borrow_mut().insert(instance)
    }

    pub fn lookup<T: ?Sized + 'static>(&self) -> Option<Rc<T>> {
        self.inner.providers.borrow().get::<T>()
    }

    /// 在组合阶段解析依赖（无任务本地缓存）。
    pub fn resolve<T: Injectable>(&self) -> Result<Rc<T>, Unresolvable> {
        let local = TypeMap::new();
        let providers = self.inner.providers.borrow();
        Resolver::new(&local, &providers).require::<T>()
    }

    pub(crate) fn providers(&self) -> &RefCell<TypeMap> {
        &self.inner.providers
    }

    // ---- 定时器 ----

    /// `delay` 之后投递一次 `envelope`。
    pub fn schedule_event(&self, delay: Duration, envelope: Envelope) -> TimerId {
        let expiry = self.now() + delay;
        self.inner
            .timers
            .borrow_mut()
            .insert(expiry, TimedAction::Event(envelope))
    }

    /// 每隔 `interval` 执行一次回调，间隔从回调结束时起算。
    pub fn schedule_loop(
        &self,
        interval: Duration,
        callback: impl FnMut(&Runtime) + 'static,
    ) -> TimerId {
        let interval = interval.max(MIN_LOOP_INTERVAL);
        let expiry = self.now() + interval;
        self.inner.timers.borrow_mut().insert(
            expiry,
            TimedAction::Loop {
                interval,
                callback: Box::new(callback),
            },
        )
    }

    pub(crate) fn schedule_sleep(&self, delay: Duration, task: TaskId) -> TimerId {
        let expiry = self.now() + delay;
        let id = self
            .inner
            .timers
            .borrow_mut()
            .insert(expiry, TimedAction::Sleep(task));
        self.track_timer(task, id);
        id
    }

    /// `after` 之后要求任务所属 Worker 回收该任务，用于组合显式超时。
    ///
    /// 任务先行销毁时该定时器随之取消。
    pub fn schedule_timeout(&self, task: TaskId, after: Duration) -> TimerId {
        let id = self.schedule_event(after, Envelope::signal(names::RECOVER, Source::Task(task)));
        self.track_timer(task, id);
        id
    }

    /// 记录任务名下的定时器，顺带清掉已经触发或取消的旧句柄。
    fn track_timer(&self, task: TaskId, id: TimerId) {
        let timers = self.inner.timers.borrow();
        let mut owned = self.inner.task_timers.borrow_mut();
        let entry = owned.entry(task).or_default();
        entry.retain(|timer| timers.contains(*timer));
        entry.push(id);
    }

    fn cancel_task_timers(&self, task: TaskId) -> usize {
        let owned = self.inner.task_timers.borrow_mut().remove(&task);
        let mut timers = self.inner.timers.borrow_mut();
        owned
            .into_iter()
            .flatten()
            .filter(|timer| timers.cancel(*timer))
            .count()
    }

    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.inner.timers.borrow_mut().cancel(id)
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.inner.timers.borrow().next_expiry()
    }

    /// 触发所有已到期的动作，返回触发数量。
    ///
    /// 到期判断使用进入时的时间点；循环动作重新入堆后的到期时间必然晚于该时间点，
    /// 因此同一次排空不会无限循环。
    pub fn drain_timers(&self) -> usize {
        let now = self.now();
        let mut fired = 0;
        loop {
            let due = self.inner.timers.borrow_mut().pop_due(now);
            let Some(due) = due else { break };
            fired += 1;
            trace!(timer = %due.id, kind = due.action.kind(), "timer fired");
            match due.action {
                TimedAction::Event(envelope) => self.publish(envelope),
                TimedAction::Sleep(task) => {
                    self.publish(Envelope::signal(names::TIMER_WAKE, Source::Task(task)))
                }
                TimedAction::Loop {
                    interval,
                    mut callback,
                } => {
                    self.inner.timers.borrow_mut().begin_fire(due.id);
                    callback(self);
                    let next = self.now().max(now) + interval;
                    self.inner.timers.borrow_mut().finish_loop(
                        due.id,
                        next,
                        TimedAction::Loop { interval, callback },
                    );
                }
            }
        }
        fired
    }

    // ---- 事件 ----

    /// 投递一个信封，等待驱动在本拍或下一拍路由。
    pub fn publish(&self, envelope: Envelope) {
        trace!(event = envelope.name(), source = %envelope.source(), "event published");
        self.inner.events.borrow_mut().push_back(envelope);
    }

    /// 取出至多 `limit` 个待路由信封，保持投递顺序。
    pub fn take_events(&self, limit: usize) -> Vec<Envelope> {
        let mut events = self.inner.events.borrow_mut();
        let count = limit.min(events.len());
        events.drain(..count).collect()
    }

    pub fn pending_events(&self) -> usize {
        self.inner.events.borrow().len()
    }

    /// 声明 `worker` 处理名为 `name` 的事件。
    pub fn subscribe(&self, name: impl Into<String>, worker: Rc<str>) {
        self.inner
            .subscriptions
            .borrow_mut()
            .insert(name.into(), worker);
    }

    pub fn unsubscribe(&self, name: &str) -> Option<Rc<str>> {
        self.inner.subscriptions.borrow_mut().remove(name)
    }

    pub fn subscriber(&self, name: &str) -> Option<Rc<str>> {
        self.inner.subscriptions.borrow().get(name).cloned()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("tasks", &self.task_count())
            .field("timers", &self.pending_timers())
            .field("events", &self.pending_events())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::ManualClock;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn manual() -> (Runtime, Rc<ManualClock>) {
        let clock = Rc::new(ManualClock::new());
        let runtime = Runtime::with_clock(RuntimeConfig::default(), clock.clone());
        (runtime, clock)
    }

    #[test]
    fn start_suspend_resume_complete() {
        let runtime = Runtime::default();
        let id = runtime.spawn(|ctx| async move {
            let reply = ctx.publish_await("db.query", "select 1").await?;
            Ok(*reply.data::<u32>().unwrap_or(&0) + 1)
        });
        assert_eq!(runtime.state(id), Some(FiberState::New));

        let step = runtime.start(id).unwrap();
        assert_eq!(step.event_name(), Some("db.query"));
        assert_eq!(runtime.state(id), Some(FiberState::Suspended));

        let step = runtime
            .resume(id, Envelope::new("db.result", 41_u32, Source::Runtime))
            .unwrap();
        let Step::Completed(value) = step else {
            panic!("expected completion");
        };
        assert_eq!(*value.downcast::<u32>().unwrap(), 42);
        assert_eq!(runtime.state(id), Some(FiberState::Terminated));
    }

    #[test]
    fn resume_after_terminate_fails() {
        let runtime = Runtime::default();
        let id = runtime.spawn(|_ctx| async move { Ok(()) });
        assert!(runtime.start(id).unwrap().is_completed());
        let err = runtime
            .resume(id, Envelope::signal("late", Source::Runtime))
            .unwrap_err();
        assert!(matches!(err, FiberError::Terminated(t) if t == id));
        assert!(matches!(runtime.start(id), Err(FiberError::Terminated(_))));
    }

    #[test]
    fn resume_before_start_fails() {
        let runtime = Runtime::default();
        let id = runtime.spawn(|_ctx| async move { Ok(()) });
        let err = runtime
            .resume(id, Envelope::signal("early", Source::Runtime))
            .unwrap_err();
        assert!(matches!(err, FiberError::NotStarted(_)));
    }

    #[test]
    fn failures_and_panics_escape_as_unhandled() {
        let runtime = Runtime::default();
        let failing = runtime.spawn(|_ctx| async move {
            Err::<(), _>(TaskError::failed("boom"))
        });
        let panicking = runtime.spawn(|_ctx| async move {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });
        match runtime.start(failing) {
            Err(FiberError::Unhandled { id, error }) => {
                assert_eq!(id, failing);
                assert_eq!(error.to_string(), "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
        match runtime.start(panicking) {
            Err(FiberError::Unhandled {
                error: TaskError::Panicked(message),
                ..
            }) => assert_eq!(message, "kaboom"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(runtime.state(panicking), Some(FiberState::Terminated));
    }

    #[test]
    fn throw_raises_at_the_suspension_point() {
        let runtime = Runtime::default();
        let id = runtime.spawn(|ctx| async move {
            match ctx.publish_await("wait", ()).await {
                Err(TaskError::Interrupted(reason)) => Ok(reason.into_owned()),
                other => Err(TaskError::failed(format!("unexpected {other:?}"))),
            }
        });
        runtime.start(id).unwrap();
        let Step::Completed(value) = runtime.throw(id, TaskError::interrupted("cancel")).unwrap()
        else {
            panic!("expected completion");
        };
        assert_eq!(*value.downcast::<String>().unwrap(), "cancel");
    }

    #[test]
    fn publish_async_feeds_event_handlers() {
        let runtime = Runtime::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = runtime.spawn(move |ctx| async move {
            ctx.on_event("notify.ack", move |envelope| {
                sink.borrow_mut().push(*envelope.data::<u8>().unwrap());
            });
            ctx.publish_async("notify", ()).await?;
            Ok(())
        });
        assert_eq!(runtime.start(id).unwrap().event_name(), Some("notify"));
        assert!(runtime
            .resume(id, Envelope::new("notify.ack", 7_u8, Source::Runtime))
            .unwrap()
            .is_completed());
        assert_eq!(*seen.borrow(), vec![7]);
    }

    #[test]
    fn destroy_is_idempotent_and_frees_the_identity() {
        let runtime = Runtime::default();
        let id = runtime.spawn(|ctx| async move {
            ctx.publish_await("never", ()).await?;
            Ok(())
        });
        runtime.start(id).unwrap();
        assert!(runtime.destroy(id));
        assert!(!runtime.destroy(id));
        assert!(!runtime.contains(id));

        let reused = runtime
            .spawn_as(id, None, |_ctx| async move { Ok(()) })
            .unwrap();
        assert_eq!(reused, id);
        assert!(matches!(
            runtime.spawn_as(id, None, |_ctx| async move { Ok(()) }),
            Err(FiberError::Occupied(_))
        ));
        let fresh = runtime.spawn(|_ctx| async move { Ok(()) });
        assert_ne!(fresh, id);
    }

    #[test]
    fn sleep_suspends_until_the_timer_wakes_the_task() {
        let (runtime, clock) = manual();
        let id = runtime.spawn(|ctx| async move {
            ctx.sleep(Duration::from_millis(50)).await?;
            Ok("woke")
        });
        assert_eq!(runtime.start(id).unwrap().event_name(), Some(names::TIMER_SLEEP));
        assert_eq!(runtime.pending_timers(), 1);

        clock.advance(Duration::from_millis(49));
        assert_eq!(runtime.drain_timers(), 0);
        clock.advance(Duration::from_millis(1));
        assert_eq!(runtime.drain_timers(), 1);

        let wake = runtime.take_events(16).pop().unwrap();
        assert_eq!(wake.name(), names::TIMER_WAKE);
        assert_eq!(wake.source().task(), Some(id));
        assert!(runtime.resume(id, wake).unwrap().is_completed());
    }

    #[test]
    fn loop_reinserts_after_interval() {
        let (runtime, clock) = manual();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let timer = runtime.schedule_loop(Duration::from_millis(10), move |_| {
            counter.set(counter.get() + 1);
        });
        clock.advance(Duration::from_millis(10));
        let fired_at = runtime.now();
        assert_eq!(runtime.drain_timers(), 1);
        assert_eq!(hits.get(), 1);
        assert!(runtime.next_expiry().unwrap() >= fired_at + Duration::from_millis(10));

        assert!(runtime.cancel_timer(timer));
        clock.advance(Duration::from_millis(100));
        assert_eq!(runtime.drain_timers(), 0);
    }

    #[test]
    fn loop_cancelled_inside_its_callback_stops() {
        let (runtime, clock) = manual();
        let slot: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));
        let own = Rc::clone(&slot);
        let timer = runtime.schedule_loop(Duration::from_millis(1), move |rt| {
            if let Some(id) = own.get() {
                rt.cancel_timer(id);
            }
        });
        slot.set(Some(timer));
        clock.advance(Duration::from_millis(5));
        assert_eq!(runtime.drain_timers(), 1);
        assert_eq!(runtime.pending_timers(), 0);
    }

    #[test]
    fn destroy_cancels_the_tasks_sleep_and_timeout() {
        let clock = Rc::new(ManualClock::new());
        let runtime = Runtime::with_clock(RuntimeConfig::default(), clock.clone());
        let id = runtime.spawn(|ctx| async move {
            ctx.sleep(Duration::from_secs(60)).await?;
            Ok(())
        });
        runtime.start(id).unwrap();
        runtime.schedule_timeout(id, Duration::from_secs(300));
        let unrelated = runtime.schedule_event(
            Duration::from_secs(300),
            Envelope::signal("other", Source::Runtime),
        );
        assert_eq!(runtime.pending_timers(), 3);

        assert!(runtime.destroy(id));
        assert_eq!(runtime.pending_timers(), 1);
        assert!(runtime.cancel_timer(unrelated));

        clock.advance(Duration::from_secs(600));
        assert_eq!(runtime.drain_timers(), 0);
        assert_eq!(runtime.pending_events(), 0);
    }

    #[test]
    fn fork_starts_from_a_clean_slate() {
        let runtime = Runtime::default();
        runtime.provide(Rc::new(7_u32));
        runtime.spawn(|_ctx| async move { Ok(()) });
        runtime.publish(Envelope::signal("x", Source::Runtime));
        runtime.schedule_event(Duration::from_secs(1), Envelope::signal("y", Source::Runtime));
        let child = runtime.fork();
        assert!(!child.same(&runtime));
        assert_eq!(child.task_count(), 0);
        assert_eq!(child.pending_events(), 0);
        assert_eq!(child.pending_timers(), 0);
        assert_eq!(child.lookup::<u32>().as_deref(), Some(&7));

        // 子进程里新注册的提供者不影响父进程。
        child.provide(Rc::new(9_u32));
        assert_eq!(runtime.lookup::<u32>().as_deref(), Some(&7));
    }

    proptest! {
        #[test]
        fn live_identities_never_collide(destroy_mask in proptest::collection::vec(any::<bool>(), 1..64)) {
            let runtime = Runtime::default();
            let mut live = HashSet::new();
            for destroy in destroy_mask {
                let id = runtime.spawn(|ctx| async move {
                    ctx.publish_await("park", ()).await?;
                    Ok(())
                });
                prop_assert!(live.insert(id));
                if destroy {
                    prop_assert!(runtime.destroy(id));
                    live.remove(&id);
                }
            }
            prop_assert_eq!(runtime.task_count(), live.len());
        }
    }
}
