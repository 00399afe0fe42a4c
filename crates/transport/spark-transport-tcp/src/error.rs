use spark_fiber::{IoCategory, categorize_io_error};
use std::fmt;
use std::io;
use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

impl fmt::Debug for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code)
    }
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.transport.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "spark.transport.tcp.accept_failed",
    message: "tcp accept",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "spark.transport.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "spark.transport.tcp.write_failed",
    message: "tcp write",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.transport.tcp.configure_failed",
    message: "tcp configure",
};
pub(crate) const RUNTIME: OperationKind = OperationKind {
    code: "spark.transport.tcp.runtime_failed",
    message: "tokio runtime",
};

/// 驱动层的 IO 失败，附带发生失败的操作。
///
/// # 契约说明（What）
/// - [`code`](Self::code) 返回按操作区分的稳定错误码，例如 `spark.transport.tcp.bind_failed`；
/// - [`category`](Self::category) 复用运行时的 IO 分类，调用方据此决定重试还是放弃。
#[derive(Debug, Error)]
#[error("{}: {source}", kind.message)]
pub struct TransportError {
    kind: OperationKind,
    #[source]
    source: io::Error,
}

impl TransportError {
    pub(crate) fn new(kind: OperationKind, source: io::Error) -> Self {
        Self { kind, source }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code
    }

    pub fn category(&self) -> IoCategory {
        categorize_io_error(&self.source)
    }

    pub fn io(&self) -> &io::Error {
        &self.source
    }
}

/// 在 `io::Error` 的文案前加上操作名，保持错误类型不变，供 `Socket` 实现直接返回。
pub(crate) fn annotate(kind: OperationKind, error: io::Error) -> io::Error {
    match error.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => error,
        other => io::Error::new(other, format!("{}: {error}", kind.message)),
    }
}
