use std::time::{Duration, Instant};

/// 下载写路径的背压统计。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 下载模式每拍只尝试写一个块；对端读得比文件慢时，连续多拍都会遇到 `WouldBlock`；
/// - 记录连续阻塞的拍数与持续时间，把“偶尔拥塞”和“长期停滞”区分开，供日志与诊断使用。
///
/// ## 逻辑 (How)
/// - `on_would_block` 累加连续计数；与上一次阻塞相隔超过 `WOULD_BLOCK_DECAY` 时先清零，
///   避免久远的历史影响当前判断；
/// - 计数达到 `STALL_THRESHOLD` 后返回 [`Pressure::Stalled`]，并带上自首次阻塞以来的时长；
/// - `on_ready` 在成功写出后清零。
///
/// ## 契约 (What)
/// - 时间由调用方传入（通常是运行时时钟），因此统计结果可在测试中复现；
/// - 只统计，不决定重试策略：无论返回什么，调用方都会在下一拍重试同一个块。
#[derive(Debug, Default)]
pub(crate) struct BackpressureState {
    consecutive_would_block: u32,
    first_blocked: Option<Instant>,
    last_event: Option<Instant>,
}

/// 一次 `WouldBlock` 之后的背压程度。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    /// 短暂拥塞。
    Busy { ticks: u32 },
    /// 连续多拍无法写出。
    Stalled { ticks: u32, since: Duration },
}

impl BackpressureState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn consecutive(&self) -> u32 {
        self.consecutive_would_block
    }

    /// 写出成功后重置统计。
    pub(crate) fn on_ready(&mut self) {
        self.consecutive_would_block = 0;
        self.first_blocked = None;
        self.last_event = None;
    }

    /// 记录一次 `WouldBlock`。
    pub(crate) fn on_would_block(&mut self, now: Instant) -> Pressure {
        if let Some(last) = self.last_event
            && now.saturating_duration_since(last) > WOULD_BLOCK_DECAY
        {
            self.consecutive_would_block = 0;
            self.first_blocked = None;
        }
        self.consecutive_would_block = self.consecutive_would_block.saturating_add(1);
        let first = *self.first_blocked.get_or_insert(now);
        self.last_event = Some(now);

        let ticks = self.consecutive_would_block;
        if ticks >= STALL_THRESHOLD {
            Pressure::Stalled {
                ticks,
                since: now.saturating_duration_since(first),
            }
        } else {
            Pressure::Busy { ticks }
        }
    }
}

const WOULD_BLOCK_DECAY: Duration = Duration::from_secs(5);
const STALL_THRESHOLD: u32 = 8;
