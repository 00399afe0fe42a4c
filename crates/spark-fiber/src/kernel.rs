//! 内核：单线程的一拍调度。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 驱动（TCP、测试）只需要三个入口：某个套接字可读、某个套接字挂断、时钟走了一拍；
//!   路由、定时器与心跳的顺序由内核统一保证。
//!
//! ## 逻辑 (How)
//! - `tick` = 触发到期定时器 → 路由待处理事件 → 依次调用每个 Worker 的 `heartbeat`；
//! - 事件路由顺序：按名称订阅的 Worker → 来源任务的所属 Worker → `Source::Worker` 指名的 Worker；
//!   都找不到时丢弃并记录日志；
//! - 每拍路由的事件数受 `max_events_per_tick` 限制，剩余事件留到下一拍。
//!
//! ## 契约 (What)
//! - 同一时刻只有一拍在执行；Worker 之间没有并发；
//! - fork 之后子进程中的内核持有全新的运行时，所有 Worker 收到 `forking`。

use crate::envelope::{Envelope, Source};
use crate::error::WorkerError;
use crate::ids::SocketId;
use crate::runtime::Runtime;
use crate::services::{ForkRole, ProcessManager};
use crate::socket::{Listener, Socket};
use crate::worker::Worker;
use std::rc::Rc;
use tracing::{debug, info, trace};

/// 一拍的统计。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub timers_fired: usize,
    pub events_routed: usize,
    pub events_dropped: usize,
}

pub struct Kernel {
    runtime: Runtime,
    workers: Vec<Box<dyn Worker>>,
}

impl Kernel {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            workers: Vec::new(),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// 注册并初始化一个 Worker；名称必须唯一。
    pub fn register(&mut self, mut worker: Box<dyn Worker>) -> Result<(), WorkerError> {
        if self.position(worker.name()).is_some() {
            return Err(WorkerError::Duplicate(worker.name().to_string()));
        }
        worker.initialize()?;
        info!(worker = %worker.name(), "worker registered");
        self.workers.push(worker);
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.workers.iter().position(|worker| &**worker.name() == name)
    }

    pub fn worker(&self, name: &str) -> Option<&dyn Worker> {
        self.position(name).map(|index| &*self.workers[index])
    }

    pub fn worker_mut(&mut self, name: &str) -> Option<&mut (dyn Worker + 'static)> {
        let index = self.position(name)?;
        Some(&mut *self.workers[index])
    }

    fn require(&mut self, name: &str) -> Result<&mut (dyn Worker + 'static), WorkerError> {
        self.worker_mut(name)
            .ok_or_else(|| WorkerError::UnknownWorker(name.to_owned()))
    }

    pub fn listen(&mut self, worker: &str, listener: Box<dyn Listener>) -> Result<SocketId, WorkerError> {
        Ok(self.require(worker)?.listen(listener))
    }

    pub fn adopt(&mut self, worker: &str, socket: Box<dyn Socket>) -> Result<SocketId, WorkerError> {
        self.require(worker)?.adopt(socket)
    }

    /// 套接字可读；返回是否找到所属 Worker。
    pub fn readable(&mut self, socket: SocketId) -> bool {
        match self.workers.iter_mut().find(|worker| worker.owns_socket(socket)) {
            Some(worker) => {
                worker.handle_socket(socket);
                true
            }
            None => false,
        }
    }

    /// 套接字出错或挂断。
    pub fn hangup(&mut self, socket: SocketId) -> bool {
        match self.workers.iter_mut().find(|worker| worker.owns_socket(socket)) {
            Some(worker) => {
                worker.expect_socket(socket);
                true
            }
            None => false,
        }
    }

    pub fn owns_socket(&self, socket: SocketId) -> bool {
        self.workers.iter().any(|worker| worker.owns_socket(socket))
    }

    /// 把一个信封交给应当处理它的 Worker。
    pub fn dispatch(&mut self, envelope: Envelope) -> bool {
        let target = self
            .runtime
            .subscriber(envelope.name())
            .or_else(|| {
                envelope
                    .source()
                    .task()
                    .and_then(|task| self.runtime.owner(task))
            })
            .or_else(|| match envelope.source() {
                Source::Worker(name) => Some(Rc::clone(name)),
                _ => None,
            });
        let Some(target) = target else {
            debug!(event = envelope.name(), source = %envelope.source(), "event has no recipient");
            return false;
        };
        match self.worker_mut(&target) {
            Some(worker) => {
                trace!(event = envelope.name(), worker = %target, "event routed");
                worker.handle_event(envelope);
                true
            }
            None => {
                debug!(event = envelope.name(), worker = %target, "event addressed to unknown worker");
                false
            }
        }
    }

    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport {
            timers_fired: self.runtime.drain_timers(),
            ..TickReport::default()
        };
        let limit = self.runtime.config().max_events_per_tick;
        for envelope in self.runtime.take_events(limit) {
            if self.dispatch(envelope) {
                report.events_routed += 1;
            } else {
                report.events_dropped += 1;
            }
        }
        for worker in &mut self.workers {
            worker.heartbeat();
        }
        report
    }

    /// 通过进程管理器 fork；在子进程中以全新运行时重新初始化所有 Worker。
    pub fn fork(&mut self, manager: &dyn ProcessManager) -> Result<ForkRole, WorkerError> {
        let role = manager.fork().map_err(WorkerError::Fork)?;
        match role {
            ForkRole::Parent { child } => {
                info!(child, "forked worker process");
            }
            ForkRole::Child => {
                self.runtime = self.runtime.fork();
                for worker in &mut self.workers {
                    worker.forking(self.runtime.clone());
                }
                info!(workers = self.workers.len(), "running as forked child");
            }
        }
        Ok(role)
    }

    /// 销毁所有 Worker。
    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            worker.destroy();
        }
        self.workers.clear();
        info!("kernel shut down");
    }

    pub fn is_idle(&self) -> bool {
        self.runtime.pending_events() == 0 && self.workers.iter().all(|worker| !worker.is_busy())
    }
}
