//! 运行时错误分类。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 将失败划分为五类：分帧错误、对已终止任务的恢复、依赖无法解析、IO 失败、
//!   逃逸出任务体的未处理错误；每类在不同层被消化，互不串扰。
//! - 每个错误类型都提供 `code()`，返回稳定的点分错误码，便于日志检索与告警聚合。
//!
//! ## 契约 (What)
//! - [`FramingError`] 只在分帧层内部处理（`corrective` 或关闭连接），不会让 Worker 崩溃；
//! - [`FiberError::Terminated`] 属于调用方编程错误，立即返回；
//! - [`Unresolvable`] 是非异常的失败值，由 `resolve` 返回；
//! - [`TaskError`] 是任务体内部的错误，经 [`FiberError::Unhandled`] 交给 Worker 边界。

use crate::ids::TaskId;
use std::borrow::Cow;
use std::io;
use thiserror::Error;

/// 任务体可以返回的任意错误。
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// 分帧错误：畸形或损坏的帧。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// 帧长度超过协议允许的上限。
    #[error("frame length {len} exceeds limit {limit}")]
    TooLarge { len: usize, limit: usize },
    /// 帧结构不满足协议语法。
    #[error("malformed frame: {0}")]
    Malformed(Cow<'static, str>),
    /// 帧结构合法，但未通过协议的校验规则。
    #[error("frame rejected: {0}")]
    Rejected(Cow<'static, str>),
}

impl FramingError {
    pub fn malformed(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Malformed(reason.into())
    }

    pub fn rejected(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Rejected(reason.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::TooLarge { .. } => "spark.frame.too_large",
            Self::Malformed(_) => "spark.frame.malformed",
            Self::Rejected(_) => "spark.frame.rejected",
        }
    }
}

/// 依赖无法解析的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvableReason {
    /// 注册表中不存在，且类型无法自行构造。
    Missing,
    /// 构造过程中再次请求了正在构造的类型。
    Cycle,
}

/// 依赖解析失败的哨兵值。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("dependency `{type_name}` is unresolvable ({reason:?})")]
pub struct Unresolvable {
    pub type_name: &'static str,
    pub reason: UnresolvableReason,
}

impl Unresolvable {
    pub fn code(&self) -> &'static str {
        "spark.fiber.unresolvable"
    }
}

/// 任务体内部产生的错误。
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("io failure: {0}")]
    Io(#[from] io::Error),
    #[error("framing failure: {0}")]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Unresolvable(#[from] Unresolvable),
    /// 外部通过 `throw` 注入的中断。
    #[error("interrupted: {0}")]
    Interrupted(Cow<'static, str>),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Failed(BoxError),
}

impl TaskError {
    /// 包装任意业务错误。
    pub fn failed(error: impl Into<BoxError>) -> Self {
        Self::Failed(error.into())
    }

    pub fn interrupted(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Interrupted(reason.into())
    }

    /// IO 类错误（含套接字与文件），调用方通常静默回收。
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "spark.fiber.io",
            Self::Framing(err) => err.code(),
            Self::Unresolvable(err) => err.code(),
            Self::Interrupted(_) => "spark.fiber.interrupted",
            Self::Panicked(_) => "spark.fiber.panicked",
            Self::Failed(_) => "spark.fiber.failed",
        }
    }
}

/// 纤程控制面的错误。
#[derive(Debug, Error)]
pub enum FiberError {
    #[error("{0} has terminated")]
    Terminated(TaskId),
    #[error("{0} has not been started")]
    NotStarted(TaskId),
    #[error("{0} has already been started")]
    AlreadyStarted(TaskId),
    #[error("{0} is already running")]
    Running(TaskId),
    #[error("{0} is not registered")]
    Unknown(TaskId),
    #[error("{0} is already registered")]
    Occupied(TaskId),
    #[error("{id} failed: {error}")]
    Unhandled {
        id: TaskId,
        #[source]
        error: TaskError,
    },
}

impl FiberError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Terminated(_) => "spark.fiber.task_terminated",
            Self::NotStarted(_) => "spark.fiber.not_started",
            Self::AlreadyStarted(_) => "spark.fiber.already_started",
            Self::Running(_) => "spark.fiber.reentrant",
            Self::Unknown(_) => "spark.fiber.unknown_task",
            Self::Occupied(_) => "spark.fiber.occupied",
            Self::Unhandled { .. } => "spark.fiber.unhandled",
        }
    }

    /// 若为任务体错误，取出内部的 [`TaskError`]。
    pub fn into_task_error(self) -> TaskError {
        match self {
            Self::Unhandled { error, .. } => error,
            other => TaskError::failed(other.to_string()),
        }
    }
}

/// IO 错误的粗粒度分类，决定读写路径如何继续。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCategory {
    /// 暂不可用，下一拍重试。
    WouldBlock,
    /// 被信号打断，可立即重试。
    Interrupted,
    /// 对端已关闭或连接被重置。
    Closed,
    /// 其余不可恢复错误。
    Fatal,
}

/// 将 `io::Error` 归类。
pub fn categorize_io_error(error: &io::Error) -> IoCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::WouldBlock => IoCategory::WouldBlock,
        ErrorKind::Interrupted => IoCategory::Interrupted,
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof
        | ErrorKind::WriteZero => IoCategory::Closed,
        _ => IoCategory::Fatal,
    }
}

/// 配置加载或校验失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: Cow<'static, str>,
    },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "spark.config.parse_failed",
            Self::Invalid { .. } => "spark.config.invalid",
        }
    }
}

/// Worker 生命周期错误。
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker `{worker}` failed to initialize: {source}")]
    Initialize {
        worker: String,
        #[source]
        source: io::Error,
    },
    #[error("worker `{worker}` rejected socket configuration: {source}")]
    Configure {
        worker: String,
        #[source]
        source: io::Error,
    },
    #[error("worker `{0}` is not registered")]
    UnknownWorker(String),
    #[error("worker `{0}` is already registered")]
    Duplicate(String),
    #[error("fork failed: {0}")]
    Fork(#[source] io::Error),
}

impl WorkerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "spark.worker.initialize_failed",
            Self::Configure { .. } => "spark.worker.configure_failed",
            Self::UnknownWorker(_) => "spark.worker.unknown",
            Self::Duplicate(_) => "spark.worker.duplicate",
            Self::Fork(_) => "spark.worker.fork_failed",
        }
    }
}
