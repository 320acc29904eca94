//! Status - runner の状態とスナップショット
//!
//! ```ignore
//! let status = runner.status().await;
//! println!("{} queued={} in_flight={}", status.state, status.queued, status.in_flight);
//! ```

use std::fmt;

use serde::Serialize;

/// `Stopped → Running → Stopping → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerState {
    Stopped,
    Running,
    Stopping,
}

impl RunnerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerState::Stopped => "stopped",
            RunnerState::Running => "running",
            RunnerState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnerStatus {
    pub state: RunnerState,
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// queue に積まれてまだ worker が取っていない数
    pub queued: usize,
    /// handler を実行中の数
    pub in_flight: usize,
}

impl RunnerStatus {
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.in_flight == 0
    }
}
