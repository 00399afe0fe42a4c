//! 外部协作者接口：会话存储、数据库连接池、进程管理器与模板渲染器。
//!
//! 运行时只通过类型解析与注入使用它们（`Runtime::provide::<dyn SessionStore>` 等），
//! 不关心其实现。[`MemorySessionStore`] 是唯一随库提供的实现。

use crate::error::BoxError;
use crate::timer::{Clock, SystemClock};
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// 会话数据。
pub type SessionData = HashMap<String, String>;

/// 查询结果中的一行。
pub type Row = HashMap<String, String>;

/// 协作者调用失败。
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(Cow<'static, str>),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Backend(BoxError),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "spark.service.unavailable",
            Self::NotFound(_) => "spark.service.not_found",
            Self::Backend(_) => "spark.service.backend",
        }
    }
}

/// 按键读写、带 TTL 过期的会话存储。
pub trait SessionStore {
    /// 读取未过期的会话。
    fn load(&self, key: &str) -> Option<SessionData>;

    /// 写入并刷新过期时间。
    fn save(&self, key: &str, data: SessionData, ttl: Duration);

    fn remove(&self, key: &str) -> bool;
}

/// 数据库连接的租约。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lease(pub u64);

/// 池化的数据库代理。
pub trait DatabasePool {
    fn acquire(&self) -> Result<Lease, ServiceError>;

    fn query(&self, lease: Lease, statement: &str, params: &[String]) -> Result<Vec<Row>, ServiceError>;

    fn release(&self, lease: Lease);
}

/// fork 的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkRole {
    Parent { child: u32 },
    Child,
}

/// 进程管理：fork 与信号。
pub trait ProcessManager {
    fn fork(&self) -> io::Result<ForkRole>;

    fn signal(&self, pid: u32, signal: i32) -> io::Result<()>;
}

/// 模板渲染。
pub trait TemplateRenderer {
    fn render(&self, name: &str, variables: &HashMap<String, String>) -> Result<String, ServiceError>;
}

/// 进程内会话存储，过期判断基于注入的时钟。
pub struct MemorySessionStore {
    clock: Rc<dyn Clock>,
    entries: RefCell<HashMap<String, (Instant, SessionData)>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(Rc::new(SystemClock))
    }
}

impl MemorySessionStore {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RefCell::new(HashMap::new()),
        }
    }

    /// 清除所有已过期的会话，返回清除数量。
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|_, (expiry, _)| *expiry > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, key: &str) -> Option<SessionData> {
        let now = self.clock.now();
        let mut entries = self.entries.borrow_mut();
        match entries.get(key) {
            Some((expiry, data)) if *expiry > now => Some(data.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn save(&self, key: &str, data: SessionData, ttl: Duration) {
        let expiry = self.clock.now() + ttl;
        self.entries
            .borrow_mut()
            .insert(key.to_owned(), (expiry, data));
    }

    fn remove(&self, key: &str) -> bool {
        self.entries.borrow_mut().remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use crate::test_stubs::ManualClock;

    #[test]
    fn sessions_expire_after_their_ttl() {
        let clock = Rc::new(ManualClock::new());
        let store = MemorySessionStore::new(clock.clone());
        let mut data = SessionData::new();
        data.insert("user".into(), "ada".into());
        store.save("sid-1", data, Duration::from_secs(30));
        store.save("sid-2", SessionData::new(), Duration::from_secs(90));

        clock.advance(Duration::from_secs(29));
        assert_eq!(store.load("sid-1").unwrap()["user"], "ada");

        clock.advance(Duration::from_secs(1));
        assert!(store.load("sid-1").is_none());
        assert_eq!(store.len(), 1);

        clock.advance(Duration::from_secs(60));
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn store_is_resolved_by_interface() {
        let runtime = Runtime::default();
        runtime.provide::<dyn SessionStore>(Rc::new(MemorySessionStore::default()));
        let id = runtime.spawn(|ctx| async move {
            let store = ctx.lookup::<dyn SessionStore>()?;
            store.save("k", SessionData::new(), Duration::from_secs(1));
            Ok(store.load("k").is_some())
        });
        let step = runtime.start(id).unwrap();
        let crate::fiber::Step::Completed(value) = step else {
            panic!("expected completion");
        };
        assert!(*value.downcast::<bool>().unwrap());
    }
}
