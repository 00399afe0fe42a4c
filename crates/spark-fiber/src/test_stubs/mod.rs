//! 确定性的测试替身：内存套接字、内存监听器与手动时钟。
//!
//! # 设计定位（Why）
//! - Worker、协议与请求生命周期的测试都需要“可控的对端”：按任意切分投递字节、
//!   模拟写阻塞、观察连接是否被关闭；
//! - 延时调度器的测试需要可以手动推进的时间。
//!
//! # 使用方式（How）
//! - [`MemorySocket::pair`] 返回交给 Worker 的套接字与留在测试中的 [`MemoryPeer`]；
//! - [`MemoryPeer::script_writes`] 按顺序规定后续每次写入是阻塞还是放行，
//!   用于构造“目的端比文件读取更慢”的场景；
//! - [`ManualClock::advance`] 推进时间，再调用 `Runtime::drain_timers`。
//!
//! # 契约说明（What）
//! - 内存套接字从不真正阻塞：没有可读数据时返回 `WouldBlock`，对端关闭后返回 `Ok(0)`；
//! - 套接字被 Worker 关闭后写入返回 `BrokenPipe`。

mod clock;
mod memory;

pub use clock::ManualClock;
pub use memory::{MemoryConnector, MemoryListener, MemoryPeer, MemorySocket};
