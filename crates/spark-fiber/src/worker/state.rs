use super::net::Service;
use super::queue::{Pending, WorkQueue};
use crate::config::SocketOptions;
use crate::connection::Connection;
use crate::envelope::Envelope;
use crate::error::TaskError;
use crate::fiber::FiberContext;
use crate::ids::{SocketId, TaskId, TimerId};
use crate::runtime::Runtime;
use crate::socket::Listener;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;
use tracing::debug;

/// Worker 自身持有的全部状态：连接、监听器、工作队列与任务附件。
///
/// 服务钩子拿到的是 `&mut WorkerCore`，通过它创建任务、绑定连接、排队工作与回收任务。
pub struct WorkerCore<S: Service> {
    pub(super) name: Rc<str>,
    pub(super) runtime: Runtime,
    pub(super) options: SocketOptions,
    pub(super) listeners: HashMap<SocketId, Box<dyn Listener>>,
    pub(super) connections: HashMap<SocketId, Connection<S::Protocol>>,
    pub(super) queue: WorkQueue<S::Work>,
    pub(super) attachments: HashMap<TaskId, S::Attachment>,
    pub(super) subscriptions: Vec<String>,
    pub(super) doomed: Vec<SocketId>,
    pub(super) busy: bool,
}

impl<S: Service> WorkerCore<S> {
    pub(super) fn new(name: Rc<str>, runtime: Runtime, options: SocketOptions) -> Self {
        Self {
            name,
            runtime,
            options,
            listeners: HashMap::new(),
            connections: HashMap::new(),
            queue: WorkQueue::new(),
            attachments: HashMap::new(),
            subscriptions: Vec::new(),
            doomed: Vec::new(),
            busy: false,
        }
    }

    pub fn name(&self) -> &Rc<str> {
        &self.name
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn socket_options(&self) -> &SocketOptions {
        &self.options
    }

    // ---- 任务 ----

    /// 创建一个归属于本 Worker 的任务（尚未排队）。
    pub fn spawn<F, Fut, T>(&self, body: F) -> TaskId
    where
        F: FnOnce(FiberContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + 'static,
        T: Any,
    {
        self.runtime.spawn_owned(Some(Rc::clone(&self.name)), body)
    }

    /// 排队等待首次启动。
    pub fn enqueue(&mut self, task: TaskId) {
        self.queue.push(task, Pending::Start);
    }

    /// 排队等待以 `envelope` 恢复。
    pub fn deliver(&mut self, task: TaskId, envelope: Envelope) {
        self.queue.push(task, Pending::Deliver(envelope));
    }

    /// 排队一项服务自定义工作，在下一次心跳交给 `Service::on_work`。
    pub fn schedule_work(&mut self, task: TaskId, work: S::Work) {
        self.queue.push(task, Pending::Service(work));
    }

    /// 把新任务绑定到连接并排队启动。
    ///
    /// 连接上原先绑定的任务若已没有排队工作，视为过期并立即回收。
    pub fn admit(&mut self, socket: SocketId, task: TaskId) {
        let stale = self
            .connections
            .get_mut(&socket)
            .and_then(|connection| connection.bind(task));
        if let Some(stale) = stale
            && stale != task
            && !self.queue.contains_task(stale)
        {
            self.recover(stale);
        }
        self.enqueue(task);
    }

    /// 唯一的取消原语：销毁任务（连同其未触发的睡眠与超时）、移除其排队工作并丢弃附件。
    ///
    /// 对未注册的标识调用是静默的空操作；返回是否真的释放了什么。
    pub fn recover(&mut self, task: TaskId) -> bool {
        let destroyed = self.runtime.destroy(task);
        let dequeued = self.queue.remove_task(task);
        let detached = self.attachments.remove(&task).is_some();
        let released = destroyed || dequeued > 0 || detached;
        if released {
            debug!(worker = %self.name, task = %task, dequeued, "task recovered");
        }
        released
    }

    /// `after` 之后回收 `task`，除非它已先行结束。
    pub fn timeout(&self, task: TaskId, after: Duration) -> TimerId {
        self.runtime.schedule_timeout(task, after)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn has_queued(&self, task: TaskId) -> bool {
        self.queue.contains_task(task)
    }

    // ---- 附件 ----

    pub fn attach(&mut self, task: TaskId, attachment: S::Attachment) -> Option<S::Attachment> {
        self.attachments.insert(task, attachment)
    }

    pub fn attachment(&self, task: TaskId) -> Option<&S::Attachment> {
        self.attachments.get(&task)
    }

    pub fn attachment_mut(&mut self, task: TaskId) -> Option<&mut S::Attachment> {
        self.attachments.get_mut(&task)
    }

    // ---- 连接 ----

    pub fn connection(&self, socket: SocketId) -> Option<&Connection<S::Protocol>> {
        self.connections.get(&socket)
    }

    pub fn connection_mut(&mut self, socket: SocketId) -> Option<&mut Connection<S::Protocol>> {
        self.connections.get_mut(&socket)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn sockets(&self) -> Vec<SocketId> {
        let mut ids: Vec<_> = self.connections.keys().copied().collect();
        ids.sort();
        ids
    }

    /// 待发数据冲刷完毕后关闭连接。
    pub fn close(&mut self, socket: SocketId) {
        if let Some(connection) = self.connections.get_mut(&socket) {
            connection.close_after_flush();
        }
    }

    /// 立即关闭连接，丢弃未发送的数据。
    pub fn abort(&mut self, socket: SocketId) {
        if self.connections.contains_key(&socket) && !self.doomed.contains(&socket) {
            self.doomed.push(socket);
        }
    }

    // ---- 订阅 ----

    /// 声明本 Worker 处理名为 `name` 的事件；fork 后自动在新运行时上重新登记。
    pub fn subscribe(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.runtime.subscribe(name.clone(), Rc::clone(&self.name));
        if !self.subscriptions.contains(&name) {
            self.subscriptions.push(name);
        }
    }

    pub(super) fn resubscribe(&self) {
        for name in &self.subscriptions {
            self.runtime.subscribe(name.clone(), Rc::clone(&self.name));
        }
    }
}
