//! SRS のチューニング値（SM-2 系）

use serde::{Deserialize, Serialize};

use crate::domain::{ReviewOutcome, SrsError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrsParams {
    /// ease factor の下限
    pub min_ease_factor: f64,
    pub max_ease_factor: f64,

    pub again_ease_delta: f64,
    pub hard_ease_delta: f64,
    pub good_ease_delta: f64,
    pub easy_ease_delta: f64,

    pub hard_interval_modifier: f64,
    /// ease factor にさらに掛ける
    pub easy_interval_modifier: f64,
    /// lapse 直後（連続正解 0）に good を付けたときの倍率
    pub lapse_good_multiplier: f64,

    pub first_hard_interval: u32,
    pub first_good_interval: u32,
    pub first_easy_interval: u32,

    /// again 後の interval（日）
    pub base_interval: u32,
    pub max_interval: u32,
}

impl Default for SrsParams {
    fn default() -> Self {
        Self {
            min_ease_factor: 1.3,
            max_ease_factor: 2.5,
            again_ease_delta: -0.20,
            hard_ease_delta: -0.15,
            good_ease_delta: 0.0,
            easy_ease_delta: 0.15,
            hard_interval_modifier: 1.2,
            easy_interval_modifier: 1.3,
            lapse_good_multiplier: 1.5,
            first_hard_interval: 1,
            first_good_interval: 1,
            first_easy_interval: 2,
            base_interval: 1,
            max_interval: 36_500,
        }
    }
}

impl SrsParams {
    pub fn ease_delta(&self, outcome: ReviewOutcome) -> f64 {
        match outcome {
            ReviewOutcome::Again => self.again_ease_delta,
            ReviewOutcome::Hard => self.hard_ease_delta,
            ReviewOutcome::Good => self.good_ease_delta,
            ReviewOutcome::Easy => self.easy_ease_delta,
        }
    }

    pub fn first_interval(&self, outcome: ReviewOutcome) -> u32 {
        match outcome {
            ReviewOutcome::Again => self.base_interval,
            ReviewOutcome::Hard => self.first_hard_interval,
            ReviewOutcome::Good => self.first_good_interval,
            ReviewOutcome::Easy => self.first_easy_interval,
        }
    }

    pub fn validate(&self) -> Result<(), SrsError> {
        let invalid = |msg: &str| Err(SrsError::InvalidParams(msg.to_string()));

        if !(self.min_ease_factor > 1.0) {
            return invalid("min_ease_factor must be greater than 1.0");
        }
        if !(self.max_ease_factor >= self.min_ease_factor) {
            return invalid("max_ease_factor must be >= min_ease_factor");
        }
        let modifiers = [
            self.hard_interval_modifier,
            self.easy_interval_modifier,
            self.lapse_good_multiplier,
        ];
        if modifiers.iter().any(|m| !(*m > 0.0)) {
            return invalid("interval modifiers must be positive");
        }
        let intervals = [
            self.first_hard_interval,
            self.first_good_interval,
            self.first_easy_interval,
            self.base_interval,
        ];
        if intervals.contains(&0) {
            return invalid("intervals must be at least 1 day");
        }
        if self.max_interval < self.base_interval {
            return invalid("max_interval must be >= base_interval");
        }
        Ok(())
    }
}
