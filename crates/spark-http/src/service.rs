//! HTTP 服务：把请求交给业务处理器，把它产出的响应写回连接。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 业务处理器是一个返回响应流的函数；每个请求对应一个任务，任务逐个拉取响应并挂起在
//!   [`RESPONSE`] 事件上，由 Worker 在 `on_suspend` 中写出，写完再恢复任务；
//! - 文件响应不在挂起点一次写完，而是排队为 [`Download`]，每拍按发送缓冲容量写一块。
//!
//! ## 逻辑 (How)
//! - `on_frame`：创建任务、附加 [`Exchange`]（套接字与 keep-alive 标记），绑定连接并排队启动；
//! - `on_suspend`：写出响应头（及内存中的响应体）；文件响应返回 `Queue(Download)`，
//!   否则立即以 [`RESPONSE_SENT`] 恢复任务；
//! - `on_work`：推进下载；写完后以 [`DOWNLOAD_COMPLETE`] 恢复任务；
//! - `on_complete`：请求未要求 keep-alive 时，冲刷完毕后关闭连接；
//! - `on_error`：IO 类错误静默断开；其余错误交给异常处理器渲染响应，没有处理器时断开连接。
//!
//! ## 契约 (What)
//! - 一个请求的失败只影响它自己的任务与连接；
//! - 分帧失败（畸形请求、超长请求头）得到 400/413 响应并在冲刷后关闭连接。
//!
//! ## 风险 (Trade-offs)
//! - 下载进行中若客户端在同一连接上流水线发送下一个请求，新请求的响应可能与下载交错；
//!   需要严格顺序的客户端应等待下载结束后再发送。

use crate::backpressure::Pressure;
use crate::config::HttpConfig;
use crate::download::{Download, DownloadStep};
use crate::error::HttpError;
use crate::parser::RequestParser;
use crate::request::Request;
use crate::response::{Body, Response};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::{self, LocalBoxStream};
use spark_fiber::{
    Connection, Corruption, Envelope, FiberContext, FramingError, NetWorker, Runtime, Service,
    SocketId, Source, Suspension, TaskError, TaskId, WorkOutcome, WorkerCore,
};
use std::any::Any;
use std::io;
use std::rc::Rc;
use tracing::{debug, error, trace, warn};

/// 任务挂起以请求写出一个响应。
pub const RESPONSE: &str = "http.response";
/// 内存响应已写入连接。
pub const RESPONSE_SENT: &str = "http.response.sent";
/// 文件响应已全部写出。
pub const DOWNLOAD_COMPLETE: &str = "http.download.complete";

/// 处理器产出的响应序列。
pub type ResponseStream = LocalBoxStream<'static, Result<Response, HttpError>>;

/// 业务处理器：每个请求调用一次。
pub type Handler = Rc<dyn Fn(Request, FiberContext) -> ResponseStream>;

/// 异常处理器：为非 IO 类失败渲染响应；返回 `None` 时直接断开连接。
pub type ExceptionHandler = Rc<dyn Fn(&TaskError) -> Option<Response>>;

pub type HttpWorker = NetWorker<HttpService>;

/// 单个响应的流。
pub fn respond(response: Response) -> ResponseStream {
    stream::once(async move { Ok(response) }).boxed_local()
}

/// 依次写出多个响应。
pub fn respond_all(responses: impl IntoIterator<Item = Response> + 'static) -> ResponseStream {
    stream::iter(responses.into_iter().map(Ok)).boxed_local()
}

/// 请求任务的附件。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    pub socket: SocketId,
    pub keep_alive: bool,
}

pub struct HttpService {
    config: Rc<HttpConfig>,
    handler: Handler,
    exception: Option<ExceptionHandler>,
}

impl HttpService {
    pub fn new(
        config: HttpConfig,
        handler: impl Fn(Request, FiberContext) -> ResponseStream + 'static,
    ) -> Self {
        Self {
            config: Rc::new(config),
            handler: Rc::new(handler),
            exception: None,
        }
    }

    pub fn on_exception(mut self, handler: impl Fn(&TaskError) -> Option<Response> + 'static) -> Self {
        self.exception = Some(Rc::new(handler));
        self
    }

    /// 所有非 IO 类失败都渲染为 500。
    pub fn with_internal_error_page(self) -> Self {
        self.on_exception(|_| Some(Response::text("internal server error").with_status(500)))
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// 包装为使用 `config.socket` 的 Worker。
    pub fn worker(self, name: impl Into<Rc<str>>, runtime: Runtime) -> HttpWorker {
        let options = self.config.socket.clone();
        NetWorker::with_options(name, runtime, options, self)
    }

    /// 写出只含内存响应体的响应；文件响应体在这里视为失败。
    fn write_buffered(
        &self,
        connection: &mut Connection<RequestParser>,
        response: Response,
        keep_alive: bool,
    ) -> io::Result<()> {
        let (head, body) = response.into_wire(&self.config.server_name, keep_alive);
        let Body::Bytes(bytes) = body else {
            return Err(io::Error::other("file body cannot be written inline"));
        };
        send_message(connection, &head, &bytes)
    }
}

/// 把响应头与内存响应体拼成一条报文，经协议的 `build`/`send` 写出。
fn send_message(
    connection: &mut Connection<RequestParser>,
    head: &str,
    bytes: &Bytes,
) -> io::Result<()> {
    let mut message = BytesMut::with_capacity(head.len() + bytes.len());
    message.extend_from_slice(head.as_bytes());
    message.extend_from_slice(bytes);
    connection.send(&message)
}

impl Service for HttpService {
    type Protocol = RequestParser;
    type Work = Download;
    type Attachment = Exchange;

    fn protocol(&mut self) -> RequestParser {
        RequestParser::new(&self.config)
    }

    fn on_frame(&mut self, core: &mut WorkerCore<Self>, socket: SocketId, request: Request) {
        debug!(
            worker = %core.name(),
            socket = %socket,
            method = request.method(),
            uri = request.target(),
            "request received"
        );
        let keep_alive = request.is_keep_alive();
        let handler = Rc::clone(&self.handler);
        let task = core.spawn(move |ctx| async move {
            let mut responses = handler(request, ctx.clone());
            while let Some(response) = responses.next().await {
                ctx.publish_await(RESPONSE, response?).await?;
            }
            Ok(())
        });
        core.attach(task, Exchange { socket, keep_alive });
        core.admit(socket, task);
    }

    fn on_corrupt(
        &mut self,
        core: &mut WorkerCore<Self>,
        socket: SocketId,
        error: &FramingError,
    ) -> Corruption {
        let status = match error {
            FramingError::TooLarge { .. } => 413,
            _ => 400,
        };
        let response = Response::text(status.to_string()).with_status(status);
        if let Some(connection) = core.connection_mut(socket)
            && let Err(err) = self.write_buffered(connection, response, false)
        {
            debug!(worker = %core.name(), socket = %socket, error = %err, "error response not written");
        }
        Corruption::Close
    }

    fn on_suspend(
        &mut self,
        core: &mut WorkerCore<Self>,
        task: TaskId,
        envelope: Envelope,
    ) -> Suspension<Download> {
        if envelope.name() != RESPONSE {
            trace!(worker = %core.name(), task = %task, event = envelope.name(), "task parked");
            return Suspension::Park;
        }
        let Some(exchange) = core.attachment(task).copied() else {
            core.recover(task);
            return Suspension::Park;
        };
        let response = match envelope.into_data::<Response>() {
            Ok(response) => response,
            Err(other) => {
                warn!(worker = %core.name(), task = %task, event = other.name(), "response payload missing");
                core.abort(exchange.socket);
                core.recover(task);
                return Suspension::Park;
            }
        };
        let status = response.status_code();
        let (head, body) = response.into_wire(&self.config.server_name, exchange.keep_alive);
        let Some(connection) = core
            .connection_mut(exchange.socket)
            .filter(|connection| !connection.is_closing())
        else {
            core.recover(task);
            return Suspension::Park;
        };
        let written = match &body {
            Body::Bytes(bytes) => send_message(connection, &head, bytes),
            Body::File { .. } => connection.send(head.as_bytes()),
        };
        if let Err(err) = written {
            debug!(worker = %core.name(), task = %task, socket = %exchange.socket, error = %err, "response write failed");
            core.abort(exchange.socket);
            core.recover(task);
            return Suspension::Park;
        }
        trace!(worker = %core.name(), task = %task, status, "response written");
        match body {
            Body::File { file, path, len } => {
                debug!(worker = %core.name(), task = %task, path = %path.display(), len, "download started");
                Suspension::Queue(Download::new(file, path, len))
            }
            Body::Bytes(_) => Suspension::Resume(Envelope::signal(
                RESPONSE_SENT,
                Source::worker(Rc::clone(core.name())),
            )),
        }
    }

    fn on_work(
        &mut self,
        core: &mut WorkerCore<Self>,
        task: TaskId,
        mut download: Download,
    ) -> WorkOutcome<Download> {
        let Some(exchange) = core.attachment(task).copied() else {
            return WorkOutcome::Recover;
        };
        let now = core.runtime().now();
        let Some(connection) = core.connection_mut(exchange.socket) else {
            return WorkOutcome::Recover;
        };
        match download.step(connection, now) {
            Ok(DownloadStep::Wrote(bytes)) => {
                trace!(worker = %core.name(), task = %task, bytes, position = download.position(), "download chunk written");
                WorkOutcome::Requeue(download)
            }
            Ok(DownloadStep::WouldBlock(pressure)) => {
                match pressure {
                    Pressure::Stalled { ticks, since } if ticks.is_power_of_two() => {
                        warn!(
                            worker = %core.name(),
                            task = %task,
                            ticks,
                            stalled_ms = since.as_millis() as u64,
                            "download stalled by peer"
                        );
                    }
                    _ => trace!(worker = %core.name(), task = %task, "download would block"),
                }
                WorkOutcome::Requeue(download)
            }
            Ok(DownloadStep::Finished) => {
                debug!(worker = %core.name(), task = %task, len = download.position(), "download complete");
                WorkOutcome::Resume(Envelope::signal(
                    DOWNLOAD_COMPLETE,
                    Source::worker(Rc::clone(core.name())),
                ))
            }
            Err(err) => {
                debug!(worker = %core.name(), task = %task, error = %err, "download aborted");
                core.abort(exchange.socket);
                WorkOutcome::Recover
            }
        }
    }

    fn on_complete(&mut self, core: &mut WorkerCore<Self>, task: TaskId, value: Box<dyn Any>) {
        let _ = value;
        if let Some(exchange) = core.attachment(task).copied()
            && !exchange.keep_alive
        {
            core.close(exchange.socket);
        }
    }

    fn on_error(&mut self, core: &mut WorkerCore<Self>, task: TaskId, error: TaskError) {
        let Some(exchange) = core.attachment(task).copied() else {
            debug!(worker = %core.name(), task = %task, code = error.code(), "detached task failed");
            return;
        };
        if error.is_io() {
            debug!(
                worker = %core.name(),
                task = %task,
                code = error.code(),
                error = %error,
                "request dropped after io failure"
            );
            core.abort(exchange.socket);
            return;
        }
        error!(
            worker = %core.name(),
            task = %task,
            code = error.code(),
            error = %error,
            "request handler failed"
        );
        let rendered = self.exception.as_ref().and_then(|handler| handler(&error));
        let Some(response) = rendered else {
            core.abort(exchange.socket);
            return;
        };
        let Some(connection) = core.connection_mut(exchange.socket) else {
            return;
        };
        match self.write_buffered(connection, response, exchange.keep_alive) {
            Ok(()) if exchange.keep_alive => {}
            Ok(()) => core.close(exchange.socket),
            Err(err) => {
                debug!(worker = %core.name(), task = %task, error = %err, "error page not written");
                core.abort(exchange.socket);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_fiber::RuntimeConfig;
    use spark_fiber::Worker;
    use spark_fiber::test_stubs::MemorySocket;
    use spark_fiber::{Protocol, SocketId};

    #[test]
    fn responses_leave_through_the_protocol_framing() {
        let (head, body) = Response::text("hello world").into_wire("spark", true);
        let Body::Bytes(bytes) = body else {
            panic!("expected an inline body");
        };
        let wire = [head.as_bytes(), &bytes[..]].concat();
        assert_eq!(&RequestParser::default().build(&wire).unwrap()[..], &wire[..]);

        let (socket, peer) = MemorySocket::pair();
        let mut connection =
            Connection::new(SocketId::from_raw(1), Box::new(socket), RequestParser::default());
        peer.set_write_limit(Some(16));
        peer.script_writes([false, true]);
        send_message(&mut connection, &head, &bytes).unwrap();
        assert_eq!(peer.output_len(), 16);
        assert_eq!(connection.pending_output(), wire.len() - 16);

        peer.set_write_limit(None);
        assert!(connection.flush().unwrap());
        assert_eq!(peer.output_string().as_bytes(), &wire[..]);
    }

    #[test]
    fn worker_uses_the_configured_socket_options() {
        let mut config = HttpConfig::default();
        config.socket.send_buffer = 4096;
        let service = HttpService::new(config, |_, _| respond(Response::text("ok")));
        let mut worker = service.worker("http", Runtime::new(RuntimeConfig::default()));
        let (socket, peer) = MemorySocket::pair();
        worker.adopt(Box::new(socket)).unwrap();
        assert_eq!(peer.configured().map(|options| options.send_buffer), Some(4096));
    }

    #[test]
    fn oversized_heads_answer_413() {
        let config = HttpConfig {
            max_head_len: 32,
            ..HttpConfig::default()
        };
        let mut worker = HttpService::new(config, |_, _| respond(Response::text("ok")))
            .worker("http", Runtime::new(RuntimeConfig::default()));
        let (socket, peer) = MemorySocket::pair();
        worker.adopt(Box::new(socket)).unwrap();
        peer.send(format!("GET /{} HTTP/1.1\r\n", "a".repeat(64)));
        let id = worker.core().sockets()[0];
        worker.handle_socket(id);
        assert!(peer.output_string().starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(peer.is_closed());
    }
}
