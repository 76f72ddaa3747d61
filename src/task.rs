use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 后台循环的状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LoopState {
    #[default]
    Idle,
    Running,
    /// 连续失败次数过多，循环已退出
    Degraded(String),
}

/// 在控制器和后台循环之间共享的状态
#[derive(Debug, Clone, Default)]
pub struct SharedState(Arc<Mutex<LoopState>>);

impl SharedState {
    pub fn get(&self) -> LoopState {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set(&self, state: LoopState) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

/// 连续失败计数
#[derive(Debug)]
pub struct FailureCounter {
    consecutive: u32,
    max: u32,
}

impl FailureCounter {
    pub fn new(max: u32) -> Self {
        Self { consecutive: 0, max: max.max(1) }
    }

    /// 记录一次失败，达到阈值时返回 true
    pub fn record(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.max
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// 正在运行的后台循环
pub struct LoopHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LoopHandle {
    pub fn new(cancel: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self { cancel, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 通知循环退出并等待，超时后强制取消
    ///
    /// 阻塞线程无法被强制取消，超时后只能放弃等待，它会在下一次迭代开始前退出
    pub async fn shutdown(self, timeout: Duration, name: &str) {
        self.cancel.cancel();
        let abort = self.handle.abort_handle();
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => debug!("{name} 已退出"),
            Ok(Err(e)) if e.is_cancelled() => debug!("{name} 已取消"),
            Ok(Err(e)) => error!("{name} 异常退出: {e}"),
            Err(_) => {
                warn!("{name} 在 {:?} 内没有退出，强制取消", timeout);
                abort.abort();
            }
        }
    }
}
