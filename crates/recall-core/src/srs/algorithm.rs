//! 純粋関数としてのスケジューリング
//!
//! 入力（stats, outcome, now, params）が同じなら出力も必ず同じ。
//! 時刻は引数で受け取り、内部で `Utc::now()` を呼ばない。

use chrono::{DateTime, Duration, Utc};

use super::params::SrsParams;
use crate::domain::{ReviewOutcome, ReviewStats};

pub(crate) fn next_ease_factor(current: f64, outcome: ReviewOutcome, params: &SrsParams) -> f64 {
    (current + params.ease_delta(outcome))
        .max(params.min_ease_factor)
        .min(params.max_ease_factor)
}

/// `previous_streak` は今回の回答を反映する前の consecutive_correct
pub(crate) fn next_interval(
    current: u32,
    previous_streak: u32,
    ease_factor: f64,
    outcome: ReviewOutcome,
    params: &SrsParams,
) -> u32 {
    let multiplier = match outcome {
        ReviewOutcome::Again => return params.base_interval,
        _ if current == 0 => return params.first_interval(outcome).min(params.max_interval),
        ReviewOutcome::Good if previous_streak == 0 => params.lapse_good_multiplier,
        ReviewOutcome::Good => ease_factor,
        ReviewOutcome::Hard => params.hard_interval_modifier,
        ReviewOutcome::Easy => params.easy_interval_modifier * ease_factor,
    };
    let computed = (f64::from(current) * multiplier).floor() as u32;

    // 正解なら最低 1 日は伸ばす
    computed
        .max(current.saturating_add(1))
        .min(params.max_interval)
}

pub(crate) fn next_state(
    stats: &ReviewStats,
    outcome: ReviewOutcome,
    now: DateTime<Utc>,
    params: &SrsParams,
) -> ReviewStats {
    let ease_factor = next_ease_factor(stats.ease_factor, outcome, params);
    let interval = next_interval(
        stats.interval,
        stats.consecutive_correct,
        ease_factor,
        outcome,
        params,
    );
    let consecutive_correct = if outcome.is_correct() {
        stats.consecutive_correct.saturating_add(1)
    } else {
        0
    };

    ReviewStats {
        interval,
        ease_factor,
        consecutive_correct,
        review_count: stats.review_count.saturating_add(1),
        last_reviewed_at: Some(now),
        next_review_at: now + Duration::days(i64::from(interval)),
        updated_at: now,
        ..stats.clone()
    }
}

pub(crate) fn postpone(stats: &ReviewStats, days: u32, now: DateTime<Utc>) -> ReviewStats {
    ReviewStats {
        next_review_at: stats.next_review_at + Duration::days(i64::from(days)),
        updated_at: now,
        ..stats.clone()
    }
}
