//! 运行监管：全局预算与中断
//!
//! 持有整次运行的 CancellationToken。墙钟预算由 watchdog 到期取消，模型回合预算由共享的原子计数器
//! 用尽时取消；所有 worker 都监听这个 token，被取消时把自己的子任务标记为 budget exhausted。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct RunSupervisor {
    cancel_token: CancellationToken,
    turns_used: AtomicUsize,
    max_turns: Option<usize>,
    reason: Mutex<Option<String>>,
}

impl RunSupervisor {
    pub fn new(max_turns: Option<usize>) -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            turns_used: AtomicUsize::new(0),
            max_turns,
            reason: Mutex::new(None),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 申请一个模型回合；全局回合预算已用完时中止整次运行并返回 false
    pub fn try_spend_turn(&self) -> bool {
        if self.cancel_token.is_cancelled() {
            return false;
        }
        let used = self.turns_used.fetch_add(1, Ordering::SeqCst) + 1;
        match self.max_turns {
            Some(max) if used > max => {
                self.abort(format!("run turn budget of {} turns exhausted", max));
                false
            }
            _ => true,
        }
    }

    pub fn turns_used(&self) -> usize {
        self.turns_used.load(Ordering::SeqCst).min(self.max_turns.unwrap_or(usize::MAX))
    }

    /// 中止运行；只保留第一个原因
    pub fn abort(&self, reason: impl Into<String>) {
        if let Ok(mut r) = self.reason.lock() {
            if r.is_none() {
                let reason = reason.into();
                tracing::warn!(reason = %reason, "run aborted");
                *r = Some(reason);
            }
        }
        self.cancel_token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.reason.lock().ok().and_then(|r| r.clone())
    }

    /// 墙钟预算 watchdog：到期中止运行；运行先结束时随 token 取消退出
    pub fn spawn_watchdog(self: &Arc<Self>, budget: Duration) -> JoinHandle<()> {
        let supervisor = self.clone();
        let token = self.cancel_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(budget) => {
                    supervisor.abort(format!("run wall-clock budget of {}ms exhausted", budget.as_millis()));
                }
                _ = token.cancelled() => {}
            }
        })
    }
}
