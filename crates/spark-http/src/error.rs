use spark_fiber::{TaskError, Unresolvable};
use std::borrow::Cow;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 请求处理过程中的错误。
///
/// # 契约说明（What）
/// - [`HttpError::is_io`] 为真的错误（套接字或文件）只回收当前请求并断开连接，不触发异常处理器；
/// - 其余错误交给注册的异常处理器渲染响应，例如 500。
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("io failure: {0}")]
    Io(#[from] io::Error),
    #[error("cannot access `{}`: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Handler(Cow<'static, str>),
    /// 处理器内部等待运行时（睡眠、挂起、依赖解析）时得到的错误。
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl From<Unresolvable> for HttpError {
    fn from(error: Unresolvable) -> Self {
        Self::Task(error.into())
    }
}

impl HttpError {
    pub fn handler(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Handler(reason.into())
    }

    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }

    pub fn is_io(&self) -> bool {
        match self {
            Self::Io(_) | Self::File { .. } => true,
            Self::Task(inner) => inner.is_io(),
            Self::Json(_) | Self::Handler(_) => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "spark.http.io",
            Self::File { .. } => "spark.http.file",
            Self::Json(_) => "spark.http.json",
            Self::Handler(_) => "spark.http.handler",
            Self::Task(inner) => inner.code(),
        }
    }
}

/// IO 类错误保持为 [`TaskError::Io`]，让 Worker 边界能够区分静默回收与异常处理。
impl From<HttpError> for TaskError {
    fn from(error: HttpError) -> Self {
        match error {
            HttpError::Io(source) => TaskError::Io(source),
            HttpError::File { path, source } => TaskError::Io(io::Error::new(
                source.kind(),
                format!("{}: {source}", path.display()),
            )),
            HttpError::Task(inner) => inner,
            other => TaskError::failed(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_errors_stay_classified_as_io() {
        let error = HttpError::file("/missing", io::ErrorKind::NotFound.into());
        assert!(error.is_io());
        assert_eq!(error.code(), "spark.http.file");
        let task: TaskError = error.into();
        assert!(task.is_io());

        let task: TaskError = HttpError::handler("boom").into();
        assert!(!task.is_io());
        assert_eq!(task.code(), "spark.fiber.failed");

        let interrupted = HttpError::from(TaskError::interrupted("runtime is gone"));
        assert_eq!(interrupted.code(), "spark.fiber.interrupted");
        assert!(matches!(TaskError::from(interrupted), TaskError::Interrupted(_)));
    }
}
