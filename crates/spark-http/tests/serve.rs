//! HTTP 服务端到端测试：内存套接字 + `NetWorker<HttpService>`。
//!
//! # 教案式注释
//!
//! - **意图 (Why)**：从字节进、字节出的角度验证请求生命周期，而不是逐个钩子孤立测试；
//! - **结构 (How)**：`route` 按路径分派到几种典型处理器（文本、失败、缺失文件、下载、上传、会话、睡眠）；
//!   直接调用 `handle_socket`/`heartbeat` 或经由 `Kernel::tick` 推进；
//! - **契约 (What)**：
//!   - 请求被任意切分时，只有完整请求才会创建任务；
//!   - 一个请求的失败不影响同一 Worker 上的其它连接；
//!   - 下载在写阻塞时重试同一块，不会丢字节，也不会把整个文件读进待发缓冲。

use futures::StreamExt;
use futures::stream;
use spark_fiber::services::{ForkRole, MemorySessionStore, ProcessManager, SessionStore};
use spark_fiber::test_stubs::{ManualClock, MemoryPeer, MemorySocket};
use spark_fiber::{FiberContext, Kernel, Runtime, RuntimeConfig, SocketId, Worker};
use spark_http::{
    HttpConfig, HttpError, HttpService, HttpWorker, Request, Response, ResponseStream, respond,
    respond_all,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tracing_test::traced_test;

fn route(download: Option<PathBuf>) -> impl Fn(Request, FiberContext) -> ResponseStream + 'static {
    move |request: Request, ctx: FiberContext| {
        let path = request.path().to_owned();
        match path.as_str() {
            "/hello" => respond(Response::text("hello world")),
            "/twice" => respond_all([Response::text("one"), Response::text("two")]),
            "/boom" => stream::once(async { Err::<Response, _>(HttpError::handler("boom")) }).boxed_local(),
            "/missing" => stream::once(async { Response::file("/definitely/not/here.bin", "x.bin") })
                .boxed_local(),
            "/download" => {
                let file = download.clone();
                stream::once(async move {
                    let file = file.ok_or_else(|| HttpError::handler("no download configured"))?;
                    Response::file(file, "data.bin")
                })
                .boxed_local()
            }
            "/upload" => {
                let mut names: Vec<String> = request
                    .files()
                    .iter()
                    .map(|file| format!("{}={}", file.file_name, file.size))
                    .collect();
                names.sort();
                let title = request.form("title").unwrap_or_default().to_owned();
                respond(Response::text(format!("{title}:{}", names.join(","))))
            }
            "/session" => stream::once(async move {
                let store = ctx.lookup::<dyn SessionStore>()?;
                let sid = request.cookie("sid").unwrap_or("anonymous").to_owned();
                let mut data = store.load(&sid).unwrap_or_default();
                let visits = data
                    .get("visits")
                    .and_then(|value| value.parse::<u32>().ok())
                    .unwrap_or(0)
                    + 1;
                data.insert("visits".to_owned(), visits.to_string());
                store.save(&sid, data, Duration::from_secs(60));
                Ok::<_, HttpError>(Response::text(format!("visits={visits}")))
            })
            .boxed_local(),
            "/nap" => stream::once(async move {
                ctx.sleep(Duration::from_millis(50)).await?;
                Ok::<_, HttpError>(Response::text("rested"))
            })
            .boxed_local(),
            _ => respond(Response::status(404)),
        }
    }
}

fn worker_with(config: HttpConfig, download: Option<PathBuf>) -> (HttpWorker, Runtime) {
    let runtime = Runtime::new(RuntimeConfig::default());
    let worker = HttpService::new(config, route(download))
        .with_internal_error_page()
        .worker("http", runtime.clone());
    (worker, runtime)
}

fn connect(worker: &mut HttpWorker) -> (SocketId, MemoryPeer) {
    let (socket, peer) = MemorySocket::pair();
    let id = worker.adopt(Box::new(socket)).unwrap();
    (id, peer)
}

#[test]
fn split_request_is_served_once_complete() {
    let (mut worker, runtime) = worker_with(HttpConfig::default(), None);
    let (id, peer) = connect(&mut worker);

    peer.send("GET /hel");
    worker.handle_socket(id);
    assert_eq!(runtime.task_count(), 0);
    assert_eq!(worker.core().queued(), 0);

    peer.send("lo\r\n\r\n");
    worker.handle_socket(id);
    assert_eq!(worker.core().queued(), 1);

    worker.heartbeat();
    assert_eq!(
        peer.output_string(),
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: 11\r\n\
         Server: spark\r\n\
         Connection: close\r\n\r\n\
         hello world"
    );
    assert!(peer.is_closed());
    assert_eq!(runtime.task_count(), 0);
    assert_eq!(worker.core().connection_count(), 0);
}

#[test]
fn keep_alive_serves_pipelined_requests_in_order() {
    let (mut worker, runtime) = worker_with(HttpConfig::default(), None);
    let (id, peer) = connect(&mut worker);
    peer.send(
        "GET /hello HTTP/1.1\r\nConnection: keep-alive\r\n\r\n\
         GET /twice HTTP/1.1\r\nConnection: keep-alive\r\n\r\n",
    );
    worker.handle_socket(id);
    assert_eq!(worker.core().queued(), 2);

    worker.heartbeat();
    let output = peer.output_string();
    let hello = output.find("hello world").unwrap();
    let one = output.find("\r\n\r\none").unwrap();
    let two = output.find("\r\n\r\ntwo").unwrap();
    assert!(hello < one && one < two);
    assert_eq!(output.matches("Connection: keep-alive\r\n").count(), 3);
    assert!(!peer.is_closed());
    assert_eq!(runtime.task_count(), 0);

    peer.take_output();
    peer.send("GET /nowhere HTTP/1.1\r\n\r\n");
    worker.handle_socket(id);
    worker.heartbeat();
    assert!(peer.output_string().starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(peer.is_closed());
}

#[test]
fn malformed_request_gets_400_and_the_connection_closes() {
    let (mut worker, runtime) = worker_with(HttpConfig::default(), None);
    let (id, peer) = connect(&mut worker);
    peer.send("BROKEN\r\n\r\n");
    worker.handle_socket(id);
    assert!(peer.output_string().starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(peer.is_closed());
    assert_eq!(runtime.task_count(), 0);
}

#[test]
#[traced_test]
fn handler_failure_renders_500_and_spares_other_connections() {
    let (mut worker, runtime) = worker_with(HttpConfig::default(), None);
    let (failing, failing_peer) = connect(&mut worker);
    let (healthy, healthy_peer) = connect(&mut worker);
    failing_peer.send("GET /boom HTTP/1.1\r\n\r\n");
    healthy_peer.send("GET /hello HTTP/1.1\r\n\r\n");
    worker.handle_socket(failing);
    worker.handle_socket(healthy);

    worker.heartbeat();
    let failure = failing_peer.output_string();
    assert!(failure.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    assert!(failure.ends_with("internal server error"));
    assert!(failing_peer.is_closed());
    assert!(healthy_peer.output_string().ends_with("hello world"));
    assert_eq!(runtime.task_count(), 0);
    assert!(logs_contain("request handler failed"));
    assert!(logs_contain("boom"));
}

#[test]
fn without_an_exception_handler_the_connection_is_dropped() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let mut worker =
        HttpService::new(HttpConfig::default(), route(None)).worker("http", runtime.clone());
    let (id, peer) = connect(&mut worker);
    peer.send("GET /boom HTTP/1.1\r\n\r\n");
    worker.handle_socket(id);
    worker.heartbeat();
    assert_eq!(peer.output_len(), 0);
    assert!(peer.is_closed());
    assert_eq!(runtime.task_count(), 0);
}

#[test]
#[traced_test]
fn missing_file_is_dropped_quietly() {
    let (mut worker, runtime) = worker_with(HttpConfig::default(), None);
    let (id, peer) = connect(&mut worker);
    peer.send("GET /missing HTTP/1.1\r\n\r\n");
    worker.handle_socket(id);
    worker.heartbeat();
    assert_eq!(peer.output_len(), 0);
    assert!(peer.is_closed());
    assert_eq!(runtime.task_count(), 0);
    assert!(logs_contain("request dropped after io failure"));
    assert!(!logs_contain("request handler failed"));
}

#[test]
fn download_retries_blocked_chunks_until_the_file_is_sent() {
    let data: Vec<u8> = (0..10_000u32).map(|index| (index % 251) as u8).collect();
    let mut scratch = tempfile::NamedTempFile::new().unwrap();
    scratch.write_all(&data).unwrap();

    let mut config = HttpConfig::default();
    config.socket.send_buffer = 4096;
    let (mut worker, runtime) = worker_with(config, Some(scratch.path().to_path_buf()));
    let (id, peer) = connect(&mut worker);
    peer.send("GET /download HTTP/1.1\r\n\r\n");
    worker.handle_socket(id);

    // 第一拍只写出响应头，下载排到下一拍。
    worker.heartbeat();
    let head = peer.take_output();
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Length: 10000\r\n"));
    assert!(head.contains("Content-Disposition: attachment; filename=\"data.bin\"\r\n"));
    assert!(head.ends_with("\r\n\r\n"));

    peer.script_writes([true, true]);
    worker.heartbeat();
    worker.heartbeat();
    assert_eq!(peer.output_len(), 0);
    assert!(!peer.is_closed());

    let mut body = Vec::new();
    let mut ticks = 0;
    while !peer.is_closed() {
        worker.heartbeat();
        let chunk = peer.take_output();
        assert!(chunk.len() <= 4096);
        body.extend(chunk);
        ticks += 1;
        assert!(ticks < 16, "download did not finish");
    }
    assert_eq!(body, data);
    assert_eq!(runtime.task_count(), 0);
}

#[test]
fn download_aborts_when_the_peer_resets() {
    let mut scratch = tempfile::NamedTempFile::new().unwrap();
    scratch.write_all(&[1; 2048]).unwrap();
    let (mut worker, runtime) = worker_with(HttpConfig::default(), Some(scratch.path().to_path_buf()));
    let (id, peer) = connect(&mut worker);
    peer.send("GET /download HTTP/1.1\r\n\r\n");
    worker.handle_socket(id);
    worker.heartbeat();
    peer.fail_writes(Some(std::io::ErrorKind::ConnectionReset));
    worker.heartbeat();
    assert!(peer.is_closed());
    assert_eq!(runtime.task_count(), 0);
    assert_eq!(worker.core().queued(), 0);
}

#[test]
fn multipart_upload_reaches_the_handler_through_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let config = HttpConfig {
        upload_dir: dir.path().to_path_buf(),
        ..HttpConfig::default()
    };
    let (mut worker, _runtime) = worker_with(config, None);
    let (id, peer) = connect(&mut worker);

    let body = "--B0\r\n\
        Content-Disposition: form-data; name=\"title\"\r\n\r\n\
        report\r\n\
        --B0\r\n\
        Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n\
        Content-Type: text/plain\r\n\r\n\
        hello upload\r\n\
        --B0--\r\n";
    let wire = format!(
        "POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=B0\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    for chunk in wire.as_bytes().chunks(11) {
        peer.send(chunk);
        worker.handle_socket(id);
    }
    worker.heartbeat();
    assert!(peer.output_string().ends_with("report:a.txt=12"));
    let stored: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(stored.len(), 1);
}

#[test]
fn handlers_reach_collaborators_through_the_runtime() {
    let (mut worker, runtime) = worker_with(HttpConfig::default(), None);
    let store: Rc<dyn SessionStore> = Rc::new(MemorySessionStore::default());
    runtime.provide(store.clone());

    for expected in ["visits=1", "visits=2"] {
        let (id, peer) = connect(&mut worker);
        peer.send("GET /session HTTP/1.1\r\nCookie: sid=s1\r\n\r\n");
        worker.handle_socket(id);
        worker.heartbeat();
        assert!(peer.output_string().ends_with(expected));
    }
    assert_eq!(
        store.load("s1"),
        Some(HashMap::from([("visits".to_owned(), "2".to_owned())]))
    );
}

#[test]
fn unresolvable_collaborator_is_a_handler_failure() {
    let (mut worker, _runtime) = worker_with(HttpConfig::default(), None);
    let (id, peer) = connect(&mut worker);
    peer.send("GET /session HTTP/1.1\r\n\r\n");
    worker.handle_socket(id);
    worker.heartbeat();
    assert!(peer.output_string().starts_with("HTTP/1.1 500 "));
}

#[test]
fn sleeping_handler_does_not_block_the_kernel() {
    let clock = Rc::new(ManualClock::new());
    let runtime = Runtime::with_clock(RuntimeConfig::default(), clock.clone());
    let mut kernel = Kernel::new(runtime.clone());
    kernel
        .register(Box::new(
            HttpService::new(HttpConfig::default(), route(None)).worker("http", runtime.clone()),
        ))
        .unwrap();
    let (sleepy, sleepy_peer) = MemorySocket::pair();
    let (eager, eager_peer) = MemorySocket::pair();
    let sleepy = kernel.adopt("http", Box::new(sleepy)).unwrap();
    let eager = kernel.adopt("http", Box::new(eager)).unwrap();
    sleepy_peer.send("GET /nap HTTP/1.1\r\n\r\n");
    eager_peer.send("GET /hello HTTP/1.1\r\n\r\n");
    kernel.readable(sleepy);
    kernel.readable(eager);

    kernel.tick();
    assert!(eager_peer.output_string().ends_with("hello world"));
    assert_eq!(sleepy_peer.output_len(), 0);

    clock.advance(Duration::from_millis(50));
    kernel.tick();
    assert!(sleepy_peer.output_string().ends_with("rested"));
    assert!(sleepy_peer.is_closed());
    assert_eq!(runtime.task_count(), 0);
}

fn serve_session(kernel: &mut Kernel) -> String {
    let (socket, peer) = MemorySocket::pair();
    let id = kernel.adopt("http", Box::new(socket)).unwrap();
    peer.send("GET /session HTTP/1.1\r\nCookie: sid=s1\r\n\r\n");
    kernel.readable(id);
    kernel.tick();
    peer.output_string()
}

struct ChildProcess;

impl ProcessManager for ChildProcess {
    fn fork(&self) -> io::Result<ForkRole> {
        Ok(ForkRole::Child)
    }

    fn signal(&self, _pid: u32, _signal: i32) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn forked_child_keeps_registered_collaborators() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let store: Rc<dyn SessionStore> = Rc::new(MemorySessionStore::default());
    runtime.provide(store.clone());
    let mut kernel = Kernel::new(runtime.clone());
    kernel
        .register(Box::new(
            HttpService::new(HttpConfig::default(), route(None)).worker("http", runtime.clone()),
        ))
        .unwrap();

    assert!(serve_session(&mut kernel).ends_with("visits=1"));
    assert_eq!(kernel.fork(&ChildProcess).unwrap(), ForkRole::Child);
    assert!(!kernel.runtime().same(&runtime));

    let after = serve_session(&mut kernel);
    assert!(after.starts_with("HTTP/1.1 200 OK\r\n"), "{after}");
    assert!(after.ends_with("visits=2"));
}
