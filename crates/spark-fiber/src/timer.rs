//! 延时调度器：按绝对到期时间排序的最小堆。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 超时、周期任务与纤程睡眠都归结为“在某个时间点做某件事”，集中在一个堆里，
//!   每次心跳只需查看堆顶即可决定是否有动作到期，无需扫描全部条目。
//!
//! ## 逻辑 (How)
//! - [`DelayScheduler`] 基于 `BinaryHeap`，条目按 `(expiry, seq)` 反序比较，使堆顶为最早到期者；
//!   相同到期时间按插入顺序先进先出；
//! - 取消采用惰性删除：`live` 集合记录仍有效的定时器，弹出时跳过已取消条目；
//! - 真正的“触发”由 [`Runtime::drain_timers`](crate::Runtime::drain_timers) 完成，
//!   本模块只负责排序与出堆，保持可单独测试。
//!
//! ## 契约 (What)
//! - `insert` 为 O(log n)；
//! - `pop_due(now)` 仅在堆顶 `expiry ≤ now` 时出堆，否则返回 `None`，调用方据此停止排空；
//! - 循环动作在回调执行期间被取消时，不会重新入堆。

use crate::envelope::Envelope;
use crate::ids::{TaskId, TimerId};
use crate::runtime::Runtime;
use core::cmp::Ordering;
use core::fmt;
use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

/// 时间来源。
pub trait Clock {
    fn now(&self) -> Instant;
}

/// 基于 `Instant::now` 的系统单调时钟。
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 循环动作的回调。
pub type LoopCallback = Box<dyn FnMut(&Runtime)>;

/// 定时动作的三种形态。
pub enum TimedAction {
    /// 到期时投递一次信封。
    Event(Envelope),
    /// 到期时执行回调，再以 `回调结束时刻 + interval` 重新入堆。
    Loop {
        interval: Duration,
        callback: LoopCallback,
    },
    /// 到期时唤醒一个正在睡眠的任务。
    Sleep(TaskId),
}

impl TimedAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Loop { .. } => "loop",
            Self::Sleep(_) => "sleep",
        }
    }
}

impl fmt::Debug for TimedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(envelope) => f.debug_tuple("Event").field(envelope).finish(),
            Self::Loop { interval, .. } => f.debug_struct("Loop").field("interval", interval).finish(),
            Self::Sleep(task) => f.debug_tuple("Sleep").field(task).finish(),
        }
    }
}

struct Entry {
    expiry: Instant,
    seq: u64,
    id: TimerId,
    action: TimedAction,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.expiry == other.expiry && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // 反序：BinaryHeap 为大顶堆，堆顶需要是最早到期、最早插入的条目。
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .expiry
            .cmp(&self.expiry)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// 已出堆、等待触发的动作。
#[derive(Debug)]
pub struct DueAction {
    pub id: TimerId,
    pub expiry: Instant,
    pub action: TimedAction,
}

/// 定时动作最小堆。
#[derive(Default)]
pub struct DelayScheduler {
    heap: BinaryHeap<Entry>,
    live: HashSet<TimerId>,
    seq: u64,
    next_id: u64,
    firing: Option<TimerId>,
    firing_cancelled: bool,
}

impl DelayScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入一个新动作并返回其句柄。
    pub fn insert(&mut self, expiry: Instant, action: TimedAction) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.push(id, expiry, action);
        id
    }

    fn push(&mut self, id: TimerId, expiry: Instant, action: TimedAction) {
        self.seq += 1;
        self.live.insert(id);
        self.heap.push(Entry {
            expiry,
            seq: self.seq,
            id,
            action,
        });
    }

    /// 弹出一个已到期的动作；堆顶尚未到期时返回 `None`。
    pub fn pop_due(&mut self, now: Instant) -> Option<DueAction> {
        loop {
            let top = self.heap.peek()?;
            if !self.live.contains(&top.id) {
                self.heap.pop();
                continue;
            }
            if top.expiry > now {
                return None;
            }
            let entry = self.heap.pop()?;
            self.live.remove(&entry.id);
            return Some(DueAction {
                id: entry.id,
                expiry: entry.expiry,
                action: entry.action,
            });
        }
    }

    /// 标记一个循环动作进入回调阶段，以便回调内部的取消能够生效。
    pub(crate) fn begin_fire(&mut self, id: TimerId) {
        self.firing = Some(id);
        self.firing_cancelled = false;
    }

    /// 回调结束后重新入堆；若回调期间被取消则丢弃。
    pub(crate) fn finish_loop(&mut self, id: TimerId, expiry: Instant, action: TimedAction) -> bool {
        let cancelled = self.firing == Some(id) && self.firing_cancelled;
        self.firing = None;
        self.firing_cancelled = false;
        if cancelled {
            return false;
        }
        self.push(id, expiry, action);
        true
    }

    /// 取消一个尚未触发的动作（或正在执行回调的循环动作）。
    pub fn cancel(&mut self, id: TimerId) -> bool {
        if self.live.remove(&id) {
            return true;
        }
        if self.firing == Some(id) && !self.firing_cancelled {
            self.firing_cancelled = true;
            return true;
        }
        false
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.live.contains(&id)
    }

    /// 仍然有效的动作数量。
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// 最早到期的有效动作的到期时间。
    pub fn next_expiry(&self) -> Option<Instant> {
        self.heap
            .iter()
            .filter(|entry| self.live.contains(&entry.id))
            .map(|entry| entry.expiry)
            .min()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
        self.firing = None;
        self.firing_cancelled = false;
    }
}

impl fmt::Debug for DelayScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayScheduler")
            .field("live", &self.live.len())
            .field("next_expiry", &self.next_expiry())
            .finish()
    }
}
