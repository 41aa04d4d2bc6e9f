//! Google API quota estimation and monthly AI-reply allowances.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use reviewpilot_core::error::{ReviewPilotError, Result};
use reviewpilot_core::types::Package;
use serde::{Deserialize, Serialize};

/// Default Business Profile quota per project.
pub const GOOGLE_REQUESTS_PER_MINUTE: u64 = 300;
pub const GOOGLE_REQUESTS_PER_DAY: u64 = 10_000;

/// Reviews returned per listing call.
pub const REVIEWS_PAGE_SIZE: u64 = 50;

/// Upper bound accepted for `reviews_per_location`.
pub const MAX_REVIEWS_PER_LOCATION: f64 = 1_000_000.0;

const MINUTES_PER_DAY: u64 = 1440;
const DAYS_PER_MONTH: f64 = 30.0;

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaInput {
    pub locations: u32,
    /// Average new reviews per location per month.
    pub reviews_per_location: f64,
    pub sync_interval_mins: u32,
    /// Share of reviews that get a reply posted (0.0..=1.0).
    pub reply_ratio: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuotaEstimate {
    pub syncs_per_day: u64,
    pub list_calls_per_sync: u64,
    pub reply_calls_per_day: u64,
    pub requests_per_day: u64,
    pub peak_requests_per_minute: u64,
    pub daily_headroom: i64,
    pub minute_headroom: i64,
    pub fits: bool,
    pub ai_replies_per_month: u64,
    /// Smallest package that covers the locations and AI replies.
    pub suggested_package: Package,
}

/// Estimate Google API usage for a deployment profile.
///
/// Every sync lists each location's recent reviews (one month's worth,
/// `REVIEWS_PAGE_SIZE` per call). All list calls of one sync run are assumed
/// to land in the same minute.
pub fn estimate(input: &QuotaInput) -> Result<QuotaEstimate> {
    if input.sync_interval_mins == 0 {
        return Err(ReviewPilotError::validation("sync interval must be at least one minute"));
    }
    if !(0.0..=1.0).contains(&input.reply_ratio) {
        return Err(ReviewPilotError::validation("reply ratio must be between 0 and 1"));
    }
    if !input.reviews_per_location.is_finite() || input.reviews_per_location < 0.0 {
        return Err(ReviewPilotError::validation("reviews per location must be non-negative"));
    }
    if input.reviews_per_location > MAX_REVIEWS_PER_LOCATION {
        return Err(ReviewPilotError::validation(format!(
            "reviews per location must be at most {MAX_REVIEWS_PER_LOCATION}"
        )));
    }
    let too_large = || ReviewPilotError::validation("estimate does not fit in 64 bits");

    let locations = input.locations as u64;
    let syncs_per_day = MINUTES_PER_DAY.div_ceil(input.sync_interval_mins as u64);
    let pages_per_location = ((input.reviews_per_location / REVIEWS_PAGE_SIZE as f64).ceil() as u64).max(1);
    let list_calls_per_sync = locations.checked_mul(pages_per_location).ok_or_else(too_large)?;

    let reviews_per_month = input.reviews_per_location * locations as f64;
    let reply_calls_per_day = (reviews_per_month / DAYS_PER_MONTH * input.reply_ratio).ceil() as u64;
    let requests_per_day = syncs_per_day
        .checked_mul(list_calls_per_sync)
        .and_then(|n| n.checked_add(reply_calls_per_day))
        .ok_or_else(too_large)?;
    let peak_requests_per_minute = list_calls_per_sync
        .checked_add(u64::from(reply_calls_per_day > 0))
        .ok_or_else(too_large)?;

    let ai_replies_per_month = (reviews_per_month * input.reply_ratio).ceil() as u64;
    let suggested_package = [Package::Basic, Package::Pro, Package::Enterprise]
        .into_iter()
        .find(|p| {
            p.max_locations().is_none_or(|max| input.locations <= max)
                && p.monthly_ai_replies().is_none_or(|max| ai_replies_per_month <= max as u64)
        })
        .unwrap_or(Package::Enterprise);

    let headroom = |limit: u64, used: u64| -> Result<i64> {
        let limit = i64::try_from(limit).map_err(|_| too_large())?;
        let used = i64::try_from(used).map_err(|_| too_large())?;
        Ok(limit - used)
    };
    let daily_headroom = headroom(GOOGLE_REQUESTS_PER_DAY, requests_per_day)?;
    let minute_headroom = headroom(GOOGLE_REQUESTS_PER_MINUTE, peak_requests_per_minute)?;
    Ok(QuotaEstimate {
        syncs_per_day,
        list_calls_per_sync,
        reply_calls_per_day,
        requests_per_day,
        peak_requests_per_minute,
        daily_headroom,
        minute_headroom,
        fits: daily_headroom >= 0 && minute_headroom >= 0,
        ai_replies_per_month,
        suggested_package,
    })
}

/// Midnight UTC on the first day of `now`'s month.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// AI reply usage for the current month against a package allowance.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AiAllowance {
    pub used: u32,
    /// `None` means unlimited.
    pub limit: Option<u32>,
}

impl AiAllowance {
    pub fn new(package: Package, used: u32) -> Self {
        Self { used, limit: package.monthly_ai_replies() }
    }

    pub fn exhausted(&self) -> bool {
        self.limit.is_some_and(|l| self.used >= l)
    }

    pub fn remaining(&self) -> Option<u32> {
        self.limit.map(|l| l.saturating_sub(self.used))
    }
}
