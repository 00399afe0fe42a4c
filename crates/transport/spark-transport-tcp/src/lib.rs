#![doc = r#"
spark-transport-tcp：spark-fiber 内核的 TCP 驱动。

# 教案式概览

## 意图 (Why)
- 内核只接受“某个套接字可读”和“走一拍”两种刺激；本 crate 用 tokio 的单线程运行时
  产生这两种刺激，并把 tokio 的 `TcpStream` 适配为运行时的非阻塞 [`spark_fiber::Socket`]。

## 模块地图 (How)
- [`socket`]：[`TcpSocket`]，`try_read`/`try_write` 与 `socket2` 套接字参数；
- [`driver`]：[`TcpDriver`]，接受连接、转达就绪、按节拍调用 `Kernel::tick`；
- [`observability`]：全局日志订阅者的一次性安装；
- `error`：按操作区分错误码的 [`TransportError`]。

## 契约 (What)
- 驱动与内核运行在同一线程；[`TcpDriver::serve`] 需要 `LocalSet`。
"#]

pub mod driver;
mod error;
pub mod observability;
pub mod socket;

pub use driver::{TcpDriver, bind};
pub use error::TransportError;
pub use socket::TcpSocket;
