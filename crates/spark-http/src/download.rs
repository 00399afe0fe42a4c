//! 下载模式：把文件响应体按发送缓冲容量逐块写出。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 文件可能远大于内存能承受的范围，也可能远快于对端的读取速度；
//!   背压的实现方式是“每拍只写一个块，写不出去就下一拍重试同一个块”，而不是把文件读进待发缓冲。
//!
//! ## 逻辑 (How)
//! - 连接上还有积压（例如未写完的响应头）时先冲刷积压，本拍不读文件；
//! - 当前块为空时按 `send_capacity` 读出下一块，之后只用直接写，不进入连接的待发缓冲；
//! - 写出多少，`position` 就前进多少；`WouldBlock` 时块原样保留。
//!
//! ## 契约 (What)
//! - 内存中待写的数据永远不超过一个块，块大小不超过读取时的发送容量；
//! - 读到文件末尾时返回 [`DownloadStep::Finished`]，读写失败以 `io::Error` 返回。

use crate::backpressure::{BackpressureState, Pressure};
use spark_fiber::{Connection, IoCategory, Protocol, categorize_io_error};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// 一拍的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStep {
    /// 写出了若干字节。
    Wrote(usize),
    /// 本拍无法写出，下一拍重试。
    WouldBlock(Pressure),
    /// 文件已全部写出。
    Finished,
}

#[derive(Debug)]
pub struct Download {
    file: File,
    path: PathBuf,
    len: u64,
    position: u64,
    chunk: Vec<u8>,
    pressure: BackpressureState,
}

impl Download {
    pub fn new(file: File, path: PathBuf, len: u64) -> Self {
        Self {
            file,
            path,
            len,
            position: 0,
            chunk: Vec::new(),
            pressure: BackpressureState::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 已成功写到套接字的字节数。
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 已读出但尚未写出的字节数。
    pub fn pending(&self) -> usize {
        self.chunk.len()
    }

    /// 连续遇到 `WouldBlock` 的拍数。
    pub fn blocked_ticks(&self) -> u32 {
        self.pressure.consecutive()
    }

    /// 推进一拍。
    pub fn step<P: Protocol>(
        &mut self,
        connection: &mut Connection<P>,
        now: Instant,
    ) -> io::Result<DownloadStep> {
        if connection.pending_output() > 0 && !connection.flush()? {
            return Ok(DownloadStep::WouldBlock(self.pressure.on_would_block(now)));
        }
        if self.chunk.is_empty() && !self.fill(connection.send_capacity())? {
            return Ok(DownloadStep::Finished);
        }
        match connection.write_direct(&self.chunk) {
            Ok(0) => Err(io::ErrorKind::WriteZero.into()),
            Ok(written) => {
                self.chunk.drain(..written);
                self.position += written as u64;
                self.pressure.on_ready();
                Ok(DownloadStep::Wrote(written))
            }
            Err(err) => match categorize_io_error(&err) {
                IoCategory::WouldBlock | IoCategory::Interrupted => {
                    Ok(DownloadStep::WouldBlock(self.pressure.on_would_block(now)))
                }
                IoCategory::Closed | IoCategory::Fatal => Err(err),
            },
        }
    }

    /// 读出下一块；文件已读完时返回 `false`。
    fn fill(&mut self, capacity: usize) -> io::Result<bool> {
        let remaining = self.len.saturating_sub(self.position);
        if remaining == 0 {
            return Ok(false);
        }
        let want = usize::try_from(remaining).map_or(capacity, |remaining| remaining.min(capacity));
        self.chunk.resize(want.max(1), 0);
        let read = loop {
            match self.file.read(&mut self.chunk) {
                Ok(read) => break read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.chunk.clear();
                    return Err(err);
                }
            }
        };
        self.chunk.truncate(read);
        Ok(read > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_fiber::test_stubs::MemorySocket;
    use proptest::prelude::*;
    use spark_fiber::{Passthrough, SocketId};
    use std::io::Write;
    use std::time::Duration;

    fn download_of(bytes: &[u8]) -> (Download, tempfile::NamedTempFile) {
        let mut scratch = tempfile::NamedTempFile::new().unwrap();
        scratch.write_all(bytes).unwrap();
        let file = File::open(scratch.path()).unwrap();
        (
            Download::new(file, scratch.path().to_path_buf(), bytes.len() as u64),
            scratch,
        )
    }

    #[test]
    fn would_block_retries_the_same_chunk() {
        let data: Vec<u8> = (0..=255).cycle().take(1000).collect();
        let (mut download, _scratch) = download_of(&data);
        let (socket, peer) = MemorySocket::pair();
        let mut connection = Connection::new(SocketId::from_raw(1), Box::new(socket), Passthrough);
        peer.set_capacity(300);
        let now = Instant::now();

        peer.set_blocked(true);
        assert!(matches!(download.step(&mut connection, now).unwrap(), DownloadStep::WouldBlock(_)));
        assert_eq!((download.position(), download.pending()), (0, 300));
        assert_eq!(download.blocked_ticks(), 1);

        peer.set_blocked(false);
        peer.set_write_limit(Some(120));
        assert_eq!(download.step(&mut connection, now + Duration::from_millis(10)).unwrap(), DownloadStep::Wrote(120));
        assert_eq!((download.position(), download.pending()), (120, 180));
        assert_eq!(download.blocked_ticks(), 0);

        peer.set_write_limit(None);
        let mut guard = 0;
        while download.step(&mut connection, now).unwrap() != DownloadStep::Finished {
            guard += 1;
            assert!(guard < 10);
        }
        assert_eq!(peer.take_output(), data);
        assert_eq!(download.position(), 1000);
    }

    #[test]
    fn pending_head_is_flushed_before_any_file_bytes() {
        let (mut download, _scratch) = download_of(b"body");
        let (socket, peer) = MemorySocket::pair();
        let mut connection = Connection::new(SocketId::from_raw(1), Box::new(socket), Passthrough);
        peer.set_blocked(true);
        connection.write_raw(b"HEAD\r\n\r\n").unwrap();
        assert_eq!(connection.pending_output(), 8);

        assert!(matches!(download.step(&mut connection, Instant::now()).unwrap(), DownloadStep::WouldBlock(_)));
        assert_eq!(download.pending(), 0);

        peer.set_blocked(false);
        assert_eq!(download.step(&mut connection, Instant::now()).unwrap(), DownloadStep::Wrote(4));
        assert_eq!(peer.output_string(), "HEAD\r\n\r\nbody");
    }

    #[test]
    fn write_failure_is_reported() {
        let (mut download, _scratch) = download_of(b"body");
        let (socket, peer) = MemorySocket::pair();
        let mut connection = Connection::new(SocketId::from_raw(1), Box::new(socket), Passthrough);
        peer.fail_writes(Some(io::ErrorKind::ConnectionReset));
        assert!(download.step(&mut connection, Instant::now()).is_err());
        assert_eq!(download.position(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn pending_stays_within_one_chunk_and_position_tracks_written_bytes(
            len in 0usize..4000,
            capacity in 1usize..700,
            script in proptest::collection::vec((any::<bool>(), 1usize..900), 1..40),
        ) {
            let data: Vec<u8> = (0..len).map(|index| (index % 253) as u8).collect();
            let (mut download, _scratch) = download_of(&data);
            let (socket, peer) = MemorySocket::pair();
            let mut connection = Connection::new(SocketId::from_raw(1), Box::new(socket), Passthrough);
            peer.set_capacity(capacity);
            let now = Instant::now();

            let mut steps = 0;
            loop {
                let (blocked, limit) = script[steps % script.len()];
                // 阻塞只持续有限拍，保证下载最终结束。
                peer.set_blocked(blocked && steps < 2 * script.len());
                peer.set_write_limit(Some(limit));
                let step = download.step(&mut connection, now).unwrap();
                prop_assert!(download.pending() <= capacity);
                prop_assert_eq!(peer.output_len() as u64, download.position());
                if step == DownloadStep::Finished {
                    break;
                }
                steps += 1;
            }
            prop_assert_eq!(peer.take_output(), data);
        }
    }
}
