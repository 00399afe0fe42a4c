//! 通用网络 Worker：读路径、分帧、工作队列与任务推进都在这里，
//! 具体业务通过 [`Service`] 的钩子注入。

use super::Worker;
use super::queue::Pending;
use super::state::WorkerCore;
use crate::config::SocketOptions;
use crate::connection::Connection;
use crate::envelope::{Envelope, names};
use crate::error::{FiberError, FramingError, TaskError, WorkerError};
use crate::fiber::Step;
use crate::ids::{SocketId, TaskId};
use crate::protocol::{Cut, Handshake, Protocol};
use crate::runtime::Runtime;
use crate::socket::{Listener, Socket};
use std::any::Any;
use std::io;
use std::rc::Rc;
use tracing::{debug, error, trace, warn};

const READ_CHUNK: usize = 16 * 1024;

/// 损坏帧的处理方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// 调用 `corrective` 丢弃到下一个帧边界后继续。
    Resync,
    /// 冲刷已写出的数据后关闭连接。
    Close,
}

/// 任务挂起后的去向。
pub enum Suspension<W> {
    /// 立即以该信封恢复任务。
    Resume(Envelope),
    /// 保持挂起，等待外部事件。
    Park,
    /// 排队一项服务工作，下一次心跳处理。
    Queue(W),
}

/// 服务工作处理后的去向。
pub enum WorkOutcome<W> {
    /// 本拍未完成，重新排到队尾。
    Requeue(W),
    /// 工作完成，以该信封恢复任务。
    Resume(Envelope),
    /// 放弃该任务。
    Recover,
}

/// 挂在 [`NetWorker`] 上的业务实现。
///
/// 所有钩子都拿到 Worker 的 [`WorkerCore`]，可以读写连接、创建任务与回收任务；
/// 除 [`on_frame`](Self::on_frame) 外都有默认实现。
pub trait Service: Sized + 'static {
    type Protocol: Protocol;
    type Work: 'static;
    type Attachment: 'static;

    /// 为新连接创建协议实例。
    fn protocol(&mut self) -> Self::Protocol;

    fn initialize(&mut self, core: &mut WorkerCore<Self>) -> Result<(), WorkerError> {
        let _ = core;
        Ok(())
    }

    /// 新连接接入：默认切换为非阻塞并应用缓冲区参数。
    fn on_connect(&mut self, core: &mut WorkerCore<Self>, socket: SocketId) -> io::Result<()> {
        let options = core.socket_options().clone();
        match core.connection_mut(socket) {
            Some(connection) => connection.configure(&options),
            None => Ok(()),
        }
    }

    fn on_handshake(&mut self, core: &mut WorkerCore<Self>, socket: SocketId) {
        let _ = (core, socket);
    }

    /// 一个完整帧到达。
    fn on_frame(
        &mut self,
        core: &mut WorkerCore<Self>,
        socket: SocketId,
        frame: <Self::Protocol as Protocol>::Frame,
    );

    fn on_corrupt(
        &mut self,
        core: &mut WorkerCore<Self>,
        socket: SocketId,
        error: &FramingError,
    ) -> Corruption {
        let _ = (core, socket, error);
        Corruption::Resync
    }

    /// 连接即将被丢弃；之后 Worker 会回收其绑定的任务。
    fn on_close(&mut self, core: &mut WorkerCore<Self>, socket: SocketId, binding: Option<TaskId>) {
        let _ = (core, socket, binding);
    }

    /// 任务挂起在一个没有其它 Worker 订阅的事件上。
    fn on_suspend(
        &mut self,
        core: &mut WorkerCore<Self>,
        task: TaskId,
        envelope: Envelope,
    ) -> Suspension<Self::Work> {
        trace!(worker = %core.name(), task = %task, event = envelope.name(), "task parked");
        Suspension::Park
    }

    fn on_work(
        &mut self,
        core: &mut WorkerCore<Self>,
        task: TaskId,
        work: Self::Work,
    ) -> WorkOutcome<Self::Work> {
        let _ = (core, task, work);
        WorkOutcome::Recover
    }

    /// 任务正常结束，随后 Worker 会回收它。
    fn on_complete(&mut self, core: &mut WorkerCore<Self>, task: TaskId, value: Box<dyn Any>) {
        let _ = (core, task, value);
    }

    /// 异常处理器：任务体逃逸出的错误；随后 Worker 会回收该任务。默认只记录日志。
    fn on_error(&mut self, core: &mut WorkerCore<Self>, task: TaskId, error: TaskError) {
        error!(
            worker = %core.name(),
            task = %task,
            code = error.code(),
            error = %error,
            "unhandled task failure"
        );
    }

    /// 不属于本 Worker 任何任务的事件。
    fn on_event(&mut self, core: &mut WorkerCore<Self>, envelope: Envelope) {
        debug!(worker = %core.name(), event = envelope.name(), "event ignored");
    }

    /// 每次心跳在排空队列之后调用。
    fn heartbeat(&mut self, core: &mut WorkerCore<Self>) {
        let _ = core;
    }

    /// fork 之后在子进程中调用，此时核心状态已经清空。
    fn on_fork(&mut self, core: &mut WorkerCore<Self>) {
        let _ = core;
    }
}

/// 由 [`Service`] 驱动的 Worker。
pub struct NetWorker<S: Service> {
    service: S,
    core: WorkerCore<S>,
    scratch: Vec<u8>,
}

impl<S: Service> NetWorker<S> {
    pub fn new(name: impl Into<Rc<str>>, runtime: Runtime, service: S) -> Self {
        Self::with_options(name, runtime, SocketOptions::default(), service)
    }

    pub fn with_options(
        name: impl Into<Rc<str>>,
        runtime: Runtime,
        options: SocketOptions,
        service: S,
    ) -> Self {
        Self {
            service,
            core: WorkerCore::new(name.into(), runtime, options),
            scratch: vec![0; READ_CHUNK],
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut S {
        &mut self.service
    }

    pub fn core(&self) -> &WorkerCore<S> {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut WorkerCore<S> {
        &mut self.core
    }

    fn accept_all(&mut self, listener: SocketId) {
        loop {
            let Some(entry) = self.core.listeners.get_mut(&listener) else {
                return;
            };
            match entry.accept() {
                Ok(socket) => {
                    if let Err(err) = self.adopt(socket) {
                        warn!(worker = %self.core.name, code = err.code(), error = %err, "accepted socket dropped");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(worker = %self.core.name, socket = %listener, error = %err, "accept failed");
                    return;
                }
            }
        }
    }

    fn read(&mut self, socket: SocketId) {
        let Some(connection) = self.core.connections.get_mut(&socket) else {
            return;
        };
        match connection.read_available(&mut self.scratch) {
            Ok(outcome) => {
                if outcome.received > 0 {
                    trace!(worker = %self.core.name, socket = %socket, bytes = outcome.received, "bytes received");
                    self.on_message(socket);
                }
                if outcome.eof {
                    debug!(worker = %self.core.name, socket = %socket, "peer closed");
                    self.close_connection(socket);
                }
            }
            Err(err) => {
                debug!(worker = %self.core.name, socket = %socket, error = %err, "read failed");
                self.close_connection(socket);
            }
        }
        self.reap();
    }

    /// 把累积缓冲交给协议，逐个分发完整帧。
    fn on_message(&mut self, socket: SocketId) {
        loop {
            let Some(connection) = self.core.connections.get_mut(&socket) else {
                return;
            };
            if connection.is_closing() || self.core.doomed.contains(&socket) {
                return;
            }
            if !connection.is_verified() {
                match connection.handshake() {
                    Handshake::NeedMore => return,
                    Handshake::Active => {
                        debug!(worker = %self.core.name, socket = %socket, "handshake completed");
                        self.service.on_handshake(&mut self.core, socket);
                        continue;
                    }
                    Handshake::Reject(err) => {
                        warn!(worker = %self.core.name, socket = %socket, code = err.code(), error = %err, "handshake rejected");
                        self.core.close(socket);
                        return;
                    }
                }
            }
            match connection.cut() {
                Cut::Frame(frame) => self.service.on_frame(&mut self.core, socket, frame),
                Cut::NeedMore => return,
                Cut::Corrupt(err) => {
                    warn!(worker = %self.core.name, socket = %socket, code = err.code(), error = %err, "corrupt frame");
                    match self.service.on_corrupt(&mut self.core, socket, &err) {
                        // 校验失败的帧已被切出，无需再丢弃字节。
                        Corruption::Resync if matches!(err, FramingError::Rejected(_)) => {}
                        Corruption::Resync => {
                            let discarded = self
                                .core
                                .connections
                                .get_mut(&socket)
                                .map_or(0, Connection::corrective);
                            if discarded == 0 {
                                self.core.abort(socket);
                                return;
                            }
                            debug!(worker = %self.core.name, socket = %socket, discarded, "resynchronized");
                        }
                        Corruption::Close => {
                            self.core.close(socket);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// 推进一个任务，直到它停在外部事件、排队工作或结束。
    fn drive(&mut self, task: TaskId, mut result: Result<Step, FiberError>) {
        loop {
            let envelope = match result {
                Ok(Step::Suspended(envelope)) => envelope,
                Ok(Step::Completed(value)) => {
                    trace!(worker = %self.core.name, task = %task, "task completed");
                    self.service.on_complete(&mut self.core, task, value);
                    self.core.recover(task);
                    return;
                }
                Err(FiberError::Unhandled { id, error }) => {
                    self.service.on_error(&mut self.core, id, error);
                    self.core.recover(id);
                    return;
                }
                Err(err) => {
                    debug!(worker = %self.core.name, task = %task, code = err.code(), error = %err, "task dropped");
                    self.core.recover(task);
                    return;
                }
            };

            if envelope.name() == names::TIMER_SLEEP {
                return;
            }
            if let Some(subscriber) = self.core.runtime.subscriber(envelope.name())
                && subscriber != self.core.name
            {
                trace!(worker = %self.core.name, task = %task, event = envelope.name(), to = %subscriber, "suspension published");
                self.core.runtime.publish(envelope);
                return;
            }
            match self.service.on_suspend(&mut self.core, task, envelope) {
                Suspension::Resume(reply) => result = self.core.runtime.resume(task, reply),
                Suspension::Park => return,
                Suspension::Queue(work) => {
                    self.core.schedule_work(task, work);
                    return;
                }
            }
        }
    }

    /// 冲刷待发数据，并关闭已请求关闭的连接。
    fn flush_connections(&mut self) {
        for socket in self.core.sockets() {
            let Some(connection) = self.core.connections.get_mut(&socket) else {
                continue;
            };
            if connection.pending_output() == 0 {
                continue;
            }
            if let Err(err) = connection.flush() {
                debug!(worker = %self.core.name, socket = %socket, error = %err, "flush failed");
                self.core.abort(socket);
            }
        }
        self.reap();
    }

    fn reap(&mut self) {
        let mut doomed = std::mem::take(&mut self.core.doomed);
        doomed.extend(
            self.core
                .connections
                .iter()
                .filter(|(_, connection)| connection.ready_to_close())
                .map(|(id, _)| *id),
        );
        doomed.sort();
        doomed.dedup();
        for socket in doomed {
            self.close_connection(socket);
        }
    }

    fn close_connection(&mut self, socket: SocketId) {
        let Some(connection) = self.core.connections.get(&socket) else {
            return;
        };
        let binding = connection.binding();
        self.service.on_close(&mut self.core, socket, binding);
        if let Some(mut connection) = self.core.connections.remove(&socket) {
            if let Err(err) = connection.shutdown() {
                trace!(worker = %self.core.name, socket = %socket, error = %err, "shutdown failed");
            }
        }
        self.core.doomed.retain(|id| *id != socket);
        if let Some(task) = binding {
            self.core.recover(task);
        }
        debug!(worker = %self.core.name, socket = %socket, "connection closed");
    }
}

impl<S: Service> Worker for NetWorker<S> {
    fn name(&self) -> &Rc<str> {
        &self.core.name
    }

    fn initialize(&mut self) -> Result<(), WorkerError> {
        self.service.initialize(&mut self.core)?;
        debug!(worker = %self.core.name, "worker initialized");
        Ok(())
    }

    fn listen(&mut self, listener: Box<dyn Listener>) -> SocketId {
        let id = self.core.runtime.next_socket_id();
        self.core.listeners.insert(id, listener);
        debug!(worker = %self.core.name, socket = %id, "listener registered");
        id
    }

    fn adopt(&mut self, socket: Box<dyn Socket>) -> Result<SocketId, WorkerError> {
        let id = self.core.runtime.next_socket_id();
        let protocol = self.service.protocol();
        self.core
            .connections
            .insert(id, Connection::new(id, socket, protocol));
        if let Err(source) = self.service.on_connect(&mut self.core, id) {
            self.core.connections.remove(&id);
            return Err(WorkerError::Configure {
                worker: self.core.name.to_string(),
                source,
            });
        }
        debug!(worker = %self.core.name, socket = %id, "connection adopted");
        // 握手可能不需要任何入站数据。
        self.on_message(id);
        self.reap();
        Ok(id)
    }

    fn handle_socket(&mut self, socket: SocketId) {
        if self.core.listeners.contains_key(&socket) {
            self.accept_all(socket);
        } else {
            self.read(socket);
        }
    }

    fn expect_socket(&mut self, socket: SocketId) {
        if self.core.listeners.remove(&socket).is_some() {
            warn!(worker = %self.core.name, socket = %socket, "listener failed");
            return;
        }
        self.close_connection(socket);
    }

    fn handle_event(&mut self, envelope: Envelope) {
        let task = envelope.source().task();
        if envelope.name() == names::RECOVER {
            if let Some(task) = task {
                debug!(worker = %self.core.name, task = %task, "recover requested");
                self.core.recover(task);
            }
            return;
        }
        match task {
            Some(task) if self.core.runtime.owner(task).as_ref() == Some(&self.core.name) => {
                self.core.deliver(task, envelope);
            }
            _ => self.service.on_event(&mut self.core, envelope),
        }
    }

    /// 只处理心跳开始时已在队列中的条目；本拍重新排队的工作留到下一拍。
    fn heartbeat(&mut self) {
        self.core.busy = true;
        let budget = self.core.queue.len();
        for _ in 0..budget {
            let Some((task, pending)) = self.core.queue.pop() else {
                break;
            };
            match pending {
                Pending::Start => {
                    let result = self.core.runtime.start(task);
                    self.drive(task, result);
                }
                Pending::Deliver(envelope) => {
                    let result = self.core.runtime.resume(task, envelope);
                    self.drive(task, result);
                }
                Pending::Service(work) => {
                    match self.service.on_work(&mut self.core, task, work) {
                        WorkOutcome::Requeue(work) => self.core.schedule_work(task, work),
                        WorkOutcome::Resume(envelope) => {
                            let result = self.core.runtime.resume(task, envelope);
                            self.drive(task, result);
                        }
                        WorkOutcome::Recover => {
                            self.core.recover(task);
                        }
                    }
                }
            }
        }
        self.service.heartbeat(&mut self.core);
        self.flush_connections();
        self.core.busy = false;
    }

    fn destroy(&mut self) {
        for socket in self.core.sockets() {
            self.close_connection(socket);
        }
        for task in self.core.queue.tasks() {
            self.core.recover(task);
        }
        for task in self.core.runtime.tasks_owned_by(&self.core.name) {
            self.core.recover(task);
        }
        self.core.attachments.clear();
        self.core.listeners.clear();
        debug!(worker = %self.core.name, "worker destroyed");
    }

    /// 子进程中：换用全新的运行时，丢弃继承来的连接与任务，只保留监听器。
    fn forking(&mut self, runtime: Runtime) {
        // 继承来的连接由父进程继续服务，这里只释放副本，不做 shutdown。
        self.core.connections.clear();
        self.core.queue.clear();
        self.core.attachments.clear();
        self.core.doomed.clear();
        self.core.runtime = runtime;
        self.core.resubscribe();
        self.service.on_fork(&mut self.core);
        debug!(worker = %self.core.name, listeners = self.core.listeners.len(), "worker re-initialized after fork");
    }

    fn owns_socket(&self, socket: SocketId) -> bool {
        self.core.connections.contains_key(&socket) || self.core.listeners.contains_key(&socket)
    }

    fn is_busy(&self) -> bool {
        self.core.busy
    }

    fn recover(&mut self, task: TaskId) -> bool {
        self.core.recover(task)
    }
}
