use crate::envelope::Envelope;
use crate::ids::TaskId;
use core::fmt;
use std::collections::VecDeque;

/// 队列中的一项待办工作。
pub enum Pending<W> {
    /// 任务已创建，等待首次 `start`。
    Start,
    /// 任务已挂起，等待以该信封恢复。
    Deliver(Envelope),
    /// 服务自定义的后续工作，例如文件下载的下一块。
    Service(W),
}

impl<W> Pending<W> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Deliver(_) => "deliver",
            Self::Service(_) => "service",
        }
    }
}

impl<W> fmt::Debug for Pending<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deliver(envelope) => f.debug_tuple("Deliver").field(envelope).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// 以任务标识为键的 FIFO 工作队列。
///
/// 同一任务可以有多项待办；[`remove_task`](Self::remove_task) 一次性移除该任务的全部条目，
/// 之后再调用返回 0。
pub struct WorkQueue<W> {
    entries: VecDeque<(TaskId, Pending<W>)>,
}

impl<W> Default for WorkQueue<W> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<W> WorkQueue<W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: TaskId, pending: Pending<W>) {
        self.entries.push_back((task, pending));
    }

    pub fn pop(&mut self) -> Option<(TaskId, Pending<W>)> {
        self.entries.pop_front()
    }

    /// 移除 `task` 的全部条目，返回移除数量。
    pub fn remove_task(&mut self, task: TaskId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(id, _)| *id != task);
        before - self.entries.len()
    }

    pub fn contains_task(&self, task: TaskId) -> bool {
        self.entries.iter().any(|(id, _)| *id == task)
    }

    /// 队列中出现过的任务，按首次出现顺序去重。
    pub fn tasks(&self) -> Vec<TaskId> {
        let mut seen = Vec::new();
        for (id, _) in &self.entries {
            if !seen.contains(id) {
                seen.push(*id);
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<W> fmt::Debug for WorkQueue<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(id, pending)| (id, pending.kind())))
            .finish()
    }
}
