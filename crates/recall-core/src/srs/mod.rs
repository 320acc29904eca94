//! Spaced-repetition engine
//!
//! 永続状態を持たない。呼び出し側が `ReviewStats` を読み、
//! `next_state` / `postpone` の結果をそのまま保存する。
//!
//! # 学習ポイント
//! - 純粋関数（`algorithm`）と、入力検証をする薄いラッパー（`SrsEngine`）の分離
//! - 時刻は引数で受け取るので、テストは固定の `now` だけで書ける

mod algorithm;
pub mod params;

use chrono::{DateTime, Utc};

use crate::domain::{ReviewOutcome, ReviewStats, SrsError};

pub use self::params::SrsParams;

#[derive(Debug, Clone, Default)]
pub struct SrsEngine {
    params: SrsParams,
}

impl SrsEngine {
    pub fn new(params: SrsParams) -> Result<Self, SrsError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &SrsParams {
        &self.params
    }

    /// 1 回の回答を反映した新しい stats を返す
    ///
    /// - `review_count` は常にちょうど 1 増える
    /// - `next_review_at == now + interval 日`（`last_reviewed_at` は `now`）
    pub fn next_state(
        &self,
        stats: &ReviewStats,
        outcome: ReviewOutcome,
        now: DateTime<Utc>,
    ) -> Result<ReviewStats, SrsError> {
        stats.validate()?;
        Ok(algorithm::next_state(stats, outcome, now, &self.params))
    }

    /// `next_review_at` を `days` 日後ろにずらす。interval / ease / streak は変えない。
    pub fn postpone(
        &self,
        stats: &ReviewStats,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<ReviewStats, SrsError> {
        let days = u32::try_from(days)
            .ok()
            .filter(|d| *d >= 1)
            .ok_or(SrsError::InvalidDays(days))?;
        stats.validate()?;
        Ok(algorithm::postpone(stats, days, now))
    }
}
