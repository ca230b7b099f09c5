//! Rate Governor - Batch sizing, daily quota, business hours and cooldowns

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDateTime, NaiveTime, Offset, TimeZone, Timelike, Utc};
use courier_common::config::DispatchConfig;
use courier_storage::models::ThroughputPolicy;

/// Longest backoff after a rate-limited send
const MAX_RATE_LIMIT_BACKOFF_SECS: u64 = 3600;

/// Decision for the next batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Send a batch of this many recipients now
    Proceed { batch_len: usize },
    /// Outside business hours; wait until the next window opens
    HaltUntil(DateTime<Utc>),
    /// Today's quota is used up
    HaltDailyLimit { resume_at: DateTime<Utc> },
}

/// Per-worker rate governor
#[derive(Debug, Clone)]
pub struct RateGovernor {
    policy: ThroughputPolicy,
    offset: FixedOffset,
    business_hours_start: u32,
    business_hours_end: u32,
    business_days: Vec<u32>,
    rate_limit_backoff: std::time::Duration,
    sends_since_cooldown: u32,
}

impl RateGovernor {
    pub fn new(policy: ThroughputPolicy, config: &DispatchConfig) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or(Utc.fix());

        Self {
            policy,
            offset,
            business_hours_start: config.business_hours_start,
            business_hours_end: config.business_hours_end,
            business_days: config.business_days.clone(),
            rate_limit_backoff: std::time::Duration::from_secs(config.rate_limit_backoff_secs),
            sends_since_cooldown: 0,
        }
    }

    fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let naive_utc = local - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&naive_utc)
    }

    /// Start of the tenant-local day containing `now`
    pub fn day_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let date = now.with_timezone(&self.offset).date_naive();
        self.to_utc(date.and_time(NaiveTime::MIN))
    }

    /// Next tenant-local midnight after `now`
    pub fn next_midnight(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.day_start(now) + Duration::days(1)
    }

    fn is_business_day(&self, weekday: chrono::Weekday) -> bool {
        self.business_days.contains(&weekday.number_from_monday())
    }

    pub fn in_business_hours(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset);
        let hour = local.hour();
        self.is_business_day(local.weekday())
            && hour >= self.business_hours_start
            && hour < self.business_hours_end
    }

    /// Opening of the next business-hours window after `now`
    pub fn next_window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.offset).naive_local();
        let opening = NaiveTime::from_hms_opt(self.business_hours_start, 0, 0).unwrap_or(NaiveTime::MIN);

        for days_ahead in 0..=7 {
            let date = local.date() + Duration::days(days_ahead);
            if !self.is_business_day(date.weekday()) {
                continue;
            }
            let start = date.and_time(opening);
            if start > local {
                return self.to_utc(start);
            }
        }

        now + Duration::days(1)
    }

    /// Next window opening when sends are restricted to business hours and `now` is outside them
    pub fn window_closed_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.policy.send_only_business_hours && !self.in_business_hours(now))
            .then(|| self.next_window_start(now))
    }

    /// Decide about the next batch given the attempts already made today
    pub fn evaluate(&self, now: DateTime<Utc>, sent_today: i64) -> Verdict {
        let mut batch_len = self.policy.batch_size.max(1) as i64;

        if self.policy.daily_limit > 0 {
            let remaining = i64::from(self.policy.daily_limit) - sent_today;
            if remaining <= 0 {
                return Verdict::HaltDailyLimit {
                    resume_at: self.next_midnight(now),
                };
            }
            batch_len = batch_len.min(remaining);
        }

        if let Some(until) = self.window_closed_until(now) {
            return Verdict::HaltUntil(until);
        }

        Verdict::Proceed {
            batch_len: batch_len as usize,
        }
    }

    /// Delay between two batches
    pub fn inter_batch_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.policy.delay_between_batches.max(0) as u64)
    }

    /// Count a successful send; returns the cooldown to observe, if one is due
    pub fn after_send(&mut self) -> Option<std::time::Duration> {
        if self.policy.pause_after_messages <= 0 || self.policy.pause_duration <= 0 {
            return None;
        }

        self.sends_since_cooldown += 1;
        if self.sends_since_cooldown >= self.policy.pause_after_messages as u32 {
            self.sends_since_cooldown = 0;
            return Some(std::time::Duration::from_secs(self.policy.pause_duration as u64));
        }
        None
    }

    /// Exponential backoff for the given rate-limited retry, capped at one hour
    pub fn rate_limit_backoff(&self, attempt: u32) -> std::time::Duration {
        let factor = 2u64.saturating_pow(attempt.min(16));
        let secs = self
            .rate_limit_backoff
            .as_secs()
            .saturating_mul(factor)
            .min(MAX_RATE_LIMIT_BACKOFF_SECS);
        std::time::Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn policy() -> ThroughputPolicy {
        ThroughputPolicy {
            batch_size: 50,
            delay_between_batches: 60,
            daily_limit: 0,
            send_only_business_hours: false,
            pause_after_messages: 0,
            pause_duration: 0,
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_proceeds_with_full_batch() {
        let governor = RateGovernor::new(policy(), &DispatchConfig::default());
        assert_eq!(
            governor.evaluate(at("2024-03-05T10:00:00Z"), 0),
            Verdict::Proceed { batch_len: 50 }
        );
        assert_eq!(governor.inter_batch_delay(), std::time::Duration::from_secs(60));
    }

    #[test]
    fn test_daily_limit_truncates_then_halts() {
        let mut p = policy();
        p.daily_limit = 10;
        let governor = RateGovernor::new(p, &DispatchConfig::default());
        let now = at("2024-03-05T10:00:00Z");

        assert_eq!(governor.evaluate(now, 0), Verdict::Proceed { batch_len: 10 });
        assert_eq!(governor.evaluate(now, 7), Verdict::Proceed { batch_len: 3 });
        assert_eq!(
            governor.evaluate(now, 10),
            Verdict::HaltDailyLimit {
                resume_at: at("2024-03-06T00:00:00Z")
            }
        );
    }

    #[test]
    fn test_local_day_uses_offset() {
        let config = DispatchConfig {
            utc_offset_minutes: -180,
            ..Default::default()
        };
        let governor = RateGovernor::new(policy(), &config);

        // 01:30 UTC is 22:30 of the previous day at UTC-3
        let now = at("2024-03-05T01:30:00Z");
        assert_eq!(governor.day_start(now), at("2024-03-04T03:00:00Z"));
        assert_eq!(governor.next_midnight(now), at("2024-03-05T03:00:00Z"));
    }

    #[test]
    fn test_business_hours() {
        let mut p = policy();
        p.send_only_business_hours = true;
        let governor = RateGovernor::new(p, &DispatchConfig::default());

        // Tuesday inside the 09-18 window
        assert_eq!(
            governor.evaluate(at("2024-03-05T10:00:00Z"), 0),
            Verdict::Proceed { batch_len: 50 }
        );
        // Tuesday before opening
        assert_eq!(
            governor.evaluate(at("2024-03-05T07:00:00Z"), 0),
            Verdict::HaltUntil(at("2024-03-05T09:00:00Z"))
        );
        // Friday after closing waits for Monday
        assert_eq!(
            governor.evaluate(at("2024-03-08T18:00:00Z"), 0),
            Verdict::HaltUntil(at("2024-03-11T09:00:00Z"))
        );
    }

    #[test]
    fn test_cooldown_after_n_sends() {
        let mut p = policy();
        p.pause_after_messages = 2;
        p.pause_duration = 30;
        let mut governor = RateGovernor::new(p, &DispatchConfig::default());

        assert_eq!(governor.after_send(), None);
        assert_eq!(governor.after_send(), Some(std::time::Duration::from_secs(30)));
        assert_eq!(governor.after_send(), None);
        assert_eq!(governor.after_send(), Some(std::time::Duration::from_secs(30)));
    }

    #[test]
    fn test_rate_limit_backoff_is_capped() {
        let governor = RateGovernor::new(policy(), &DispatchConfig::default());
        assert_eq!(governor.rate_limit_backoff(0), std::time::Duration::from_secs(30));
        assert_eq!(governor.rate_limit_backoff(2), std::time::Duration::from_secs(120));
        assert_eq!(governor.rate_limit_backoff(20), std::time::Duration::from_secs(3600));
    }
}
