use crate::error::{self, TransportError};
use crate::socket::TcpSocket;
use spark_fiber::{Kernel, SocketId};
use std::future::Future;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// 监视任务发给驱动循环的就绪通知。
#[derive(Debug)]
enum Readiness {
    /// 套接字可读；驱动处理后回答连接是否仍然存活。
    Readable { socket: SocketId, ack: oneshot::Sender<bool> },
    /// 套接字出错。
    Hangup(SocketId),
}

/// 绑定监听地址。
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, TransportError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| TransportError::new(error::BIND, err))?;
    if let Ok(local) = listener.local_addr() {
        info!(addr = %local, "listening");
    }
    Ok(listener)
}

/// 在 tokio 单线程运行时上驱动一个 [`Kernel`]。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 内核与 Worker 全部是单线程的（`Rc` 共享），需要一个同样单线程的事件循环：
///   接受连接、把“可读”转达给内核、按固定节拍调用 `tick`；
/// - 驱动只做转达，不解释字节，也不持有任何业务状态。
///
/// ## 逻辑 (How)
/// - 主循环以 `select!` 等待四件事：关闭信号、新连接、就绪通知、节拍；
/// - 新连接经 [`Kernel::adopt`] 交给指定 Worker，随后为它 `spawn_local` 一个监视任务；
/// - 监视任务等待可读后发出通知并等待应答：驱动调用 [`Kernel::readable`]，
///   连接仍归属内核时回答 `true`，监视任务继续；否则监视任务退出并释放流；
/// - 收到关闭信号后调用 [`Kernel::shutdown`] 销毁所有 Worker。
///
/// ## 契约 (What)
/// - [`serve`](Self::serve) 必须在 `LocalSet` 内运行；[`run`](Self::run) 自行构建运行时与 `LocalSet`；
/// - 节拍间隔取自运行时配置，最小 1ms；错过的节拍顺延而不是补跑。
///
/// ## 风险 (Trade-offs)
/// - 待发数据只在心跳中冲刷，写路径的延迟上限是一个节拍。
pub struct TcpDriver {
    kernel: Kernel,
    tick: Duration,
}

impl TcpDriver {
    pub fn new(kernel: Kernel) -> Self {
        let tick = kernel.runtime().config().tick().max(Duration::from_millis(1));
        Self { kernel, tick }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    /// 构建单线程运行时，绑定 `addr` 并服务到 `shutdown` 完成。
    pub fn run(
        self,
        addr: SocketAddr,
        worker: &str,
        shutdown: impl Future<Output = ()>,
    ) -> Result<Kernel, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| TransportError::new(error::RUNTIME, err))?;
        let local = LocalSet::new();
        local.block_on(&runtime, async move {
            let listener = bind(addr).await?;
            self.serve(listener, worker, shutdown).await
        })
    }

    /// 在已有的 `LocalSet` 中服务，返回关闭后的内核。
    pub async fn serve(
        mut self,
        listener: TcpListener,
        worker: &str,
        shutdown: impl Future<Output = ()>,
    ) -> Result<Kernel, TransportError> {
        let (notify, mut readiness) = mpsc::unbounded_channel();
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.adopt(worker, stream, peer, &notify),
                    Err(err) => {
                        let err = TransportError::new(error::ACCEPT, err);
                        warn!(code = err.code(), error = %err, "accept failed");
                    }
                },
                Some(event) = readiness.recv() => self.on_readiness(event),
                _ = ticker.tick() => {
                    let report = self.kernel.tick();
                    if report.timers_fired > 0 || report.events_routed > 0 {
                        trace!(timers = report.timers_fired, events = report.events_routed, "tick");
                    }
                }
            }
        }
        info!("driver shutting down");
        self.kernel.shutdown();
        Ok(self.kernel)
    }

    fn adopt(
        &mut self,
        worker: &str,
        stream: TcpStream,
        peer: SocketAddr,
        notify: &mpsc::UnboundedSender<Readiness>,
    ) {
        let stream = Rc::new(stream);
        match self.kernel.adopt(worker, Box::new(TcpSocket::new(Rc::clone(&stream)))) {
            Ok(socket) => {
                debug!(socket = %socket, peer = %peer, "tcp connection adopted");
                tokio::task::spawn_local(watch(socket, stream, notify.clone()));
            }
            Err(err) => warn!(peer = %peer, code = err.code(), error = %err, "connection refused by worker"),
        }
    }

    fn on_readiness(&mut self, event: Readiness) {
        match event {
            Readiness::Readable { socket, ack } => {
                self.kernel.readable(socket);
                let _ = ack.send(self.kernel.owns_socket(socket));
            }
            Readiness::Hangup(socket) => {
                self.kernel.hangup(socket);
            }
        }
    }
}

/// 等待可读并通知驱动，直到连接不再归属内核。
async fn watch(socket: SocketId, stream: Rc<TcpStream>, notify: mpsc::UnboundedSender<Readiness>) {
    loop {
        if let Err(err) = stream.readable().await {
            debug!(socket = %socket, error = %err, "readiness watch failed");
            let _ = notify.send(Readiness::Hangup(socket));
            return;
        }
        let (ack, answer) = oneshot::channel();
        if notify.send(Readiness::Readable { socket, ack }).is_err() {
            return;
        }
        match answer.await {
            Ok(true) => {}
            _ => {
                trace!(socket = %socket, "readiness watch finished");
                return;
            }
        }
    }
}
