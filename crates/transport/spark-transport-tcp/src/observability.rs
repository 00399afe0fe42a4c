//! 日志初始化。

use std::sync::OnceLock;
use tracing::dispatcher;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 安装全局 `tracing` 订阅者：`fmt` 输出 + `EnvFilter`。
///
/// # 教案式说明
/// - **意图（Why）**：驱动进程只需调用一次即可获得结构化日志，过滤规则沿用 `RUST_LOG`；
/// - **逻辑（How）**：`RUST_LOG` 缺失或无法解析时回退到 `info`；组装 `registry + EnvFilter + fmt` 后设为全局默认；
/// - **契约（What）**：首次成功安装返回 `true`；重复调用，或外部已设置订阅者时返回 `false` 且不做任何改动。
pub fn install() -> bool {
    if INSTALLED.get().is_some() || dispatcher::has_been_set() {
        return false;
    }
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }
    INSTALLED.set(()).is_ok()
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
