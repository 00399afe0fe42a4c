use super::{Fiber, FiberState};
use crate::error::FiberError;
use crate::ids::TaskId;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::rc::Rc;

/// 任务标识到纤程的查找表。
///
/// # 契约 (What)
/// - 同一时刻一个标识最多对应一个存活纤程，重复注册返回 [`FiberError::Occupied`]；
/// - `remove` 之后标识立即可被新任务复用；
/// - 对不存在的标识调用 `remove` 是静默的空操作。
#[derive(Debug, Default)]
pub struct FiberRegistry {
    fibers: HashMap<TaskId, Rc<Fiber>>,
}

impl FiberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, fiber: Fiber) -> Result<Rc<Fiber>, FiberError> {
        match self.fibers.entry(fiber.id()) {
            Entry::Occupied(occupied) => Err(FiberError::Occupied(*occupied.key())),
            Entry::Vacant(vacant) => Ok(Rc::clone(vacant.insert(Rc::new(fiber)))),
        }
    }

    pub fn get(&self, id: TaskId) -> Option<Rc<Fiber>> {
        self.fibers.get(&id).cloned()
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Rc<Fiber>> {
        self.fibers.remove(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.fibers.contains_key(&id)
    }

    pub fn state(&self, id: TaskId) -> Option<FiberState> {
        self.fibers.get(&id).map(|fiber| fiber.state())
    }

    pub fn ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<_> = self.fibers.keys().copied().collect();
        ids.sort();
        ids
    }

    /// 指定 Worker 拥有的任务。
    pub fn owned_by(&self, owner: &str) -> Vec<TaskId> {
        let mut ids: Vec<_> = self
            .fibers
            .values()
            .filter(|fiber| fiber.owner().is_some_and(|name| &**name == owner))
            .map(|fiber| fiber.id())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.fibers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    /// 清空注册表并返回被移除的纤程，调用方负责终止它们。
    pub fn drain(&mut self) -> Vec<Rc<Fiber>> {
        self.fibers.drain().map(|(_, fiber)| fiber).collect()
    }
}
