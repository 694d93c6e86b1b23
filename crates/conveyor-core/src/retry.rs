//! Retry schedule grammar for failed callback deliveries.
//!
//! A schedule is an ordered list of delays written as comma-separated
//! human-readable durations (`"5s,1m,5m"`). An unset schedule resolves to the
//! built-in fallback; an explicit schedule is used verbatim.

use std::{fmt, time::Duration};

use crate::error::{CoreError, Result};

/// Delays applied by the built-in fallback schedule.
const FALLBACK_DELAYS: [Duration; 3] =
    [Duration::from_secs(5), Duration::from_secs(60), Duration::from_secs(300)];

/// Ordered list of delays driven after a failed callback.
///
/// Each delay is slept before the corresponding re-POST. An empty schedule
/// means the initial attempt is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl RetrySchedule {
    /// The built-in fallback applied when a consumer has no explicit schedule.
    pub fn fallback() -> Self {
        Self { delays: FALLBACK_DELAYS.to_vec() }
    }

    /// Builds a schedule from explicit delays.
    pub fn from_delays(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Parses a comma-separated duration list.
    ///
    /// Returns `None` for an empty or whitespace-only string, leaving the
    /// policy decision (fallback vs. explicit) to the caller.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` when any element fails to parse or
    /// parses to a zero duration.
    pub fn parse(raw: &str) -> Result<Option<Self>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }

        let mut delays = Vec::new();
        for part in raw.split(',') {
            let part = part.trim();
            let delay = humantime::parse_duration(part)
                .map_err(|e| CoreError::invalid(format!("bad retry delay {part:?}: {e}")))?;
            if delay.is_zero() {
                return Err(CoreError::invalid(format!("retry delay {part:?} must be positive")));
            }
            delays.push(delay);
        }

        Ok(Some(Self { delays }))
    }

    /// Resolves the stored `retry_mode` column to an effective schedule.
    ///
    /// Empty means "unset" and yields the fallback; an explicit list is used
    /// verbatim.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` when the stored value is present but
    /// malformed.
    pub fn resolve(raw: &str) -> Result<Self> {
        Ok(Self::parse(raw)?.unwrap_or_else(Self::fallback))
    }

    /// The configured delays in order.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Number of retry attempts this schedule drives.
    pub fn len(&self) -> usize {
        self.delays.len()
    }

    /// Whether the schedule drives no retries at all.
    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

impl fmt::Display for RetrySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for delay in &self.delays {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", humantime::format_duration(*delay))?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_durations() {
        let schedule = RetrySchedule::parse("5s,1m,5m").unwrap().unwrap();
        assert_eq!(
            schedule.delays(),
            &[Duration::from_secs(5), Duration::from_secs(60), Duration::from_secs(300)]
        );
    }

    #[test]
    fn empty_string_is_unset() {
        assert_eq!(RetrySchedule::parse("").unwrap(), None);
        assert_eq!(RetrySchedule::parse("   ").unwrap(), None);
    }

    #[test]
    fn unset_resolves_to_fallback() {
        let schedule = RetrySchedule::resolve("").unwrap();
        assert_eq!(schedule, RetrySchedule::fallback());
        assert_eq!(schedule.len(), 3);
    }

    #[test]
    fn explicit_schedule_resolves_verbatim() {
        let schedule = RetrySchedule::resolve("1s,2s").unwrap();
        assert_eq!(schedule.delays(), &[Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn malformed_delay_rejected() {
        assert!(RetrySchedule::parse("5s,soon").is_err());
        assert!(RetrySchedule::parse("0s").is_err());
    }

    #[test]
    fn tolerates_whitespace_between_elements() {
        let schedule = RetrySchedule::parse("5s, 1m , 5m").unwrap().unwrap();
        assert_eq!(schedule.len(), 3);
    }

    #[test]
    fn round_trips_through_display() {
        let schedule = RetrySchedule::parse("5s,1m,5m").unwrap().unwrap();
        assert_eq!(RetrySchedule::parse(&schedule.to_string()).unwrap().unwrap(), schedule);
    }
}

#[cfg(test)]
mod property_tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        /// Any schedule built from positive delays survives a display/parse
        /// round trip unchanged.
        #[test]
        fn schedule_round_trips_through_display(
            secs in prop::collection::vec(1u64..86_400, 1..8)
        ) {
            let schedule = RetrySchedule::from_delays(
                secs.iter().map(|s| Duration::from_secs(*s)).collect(),
            );

            let reparsed = RetrySchedule::parse(&schedule.to_string())
                .expect("rendered schedule must parse")
                .expect("rendered schedule is never empty");

            prop_assert_eq!(reparsed, schedule);
        }

        /// The number of retries a schedule drives equals the number of
        /// configured delays, and each delay is taken verbatim.
        #[test]
        fn retry_count_is_bounded_by_the_schedule(
            secs in prop::collection::vec(1u64..3_600, 1..6)
        ) {
            let raw = secs.iter().map(|s| format!("{s}s")).collect::<Vec<_>>().join(",");
            let schedule = RetrySchedule::resolve(&raw).expect("explicit schedule must resolve");

            prop_assert_eq!(schedule.len(), secs.len());
            for (delay, s) in schedule.delays().iter().zip(&secs) {
                prop_assert_eq!(*delay, Duration::from_secs(*s));
            }
        }

        /// Resolving is idempotent: re-resolving a schedule's rendered form
        /// yields the same schedule, fallback included.
        #[test]
        fn resolve_is_idempotent(raw in "[0-9a-z, ]{0,32}") {
            if let Ok(schedule) = RetrySchedule::resolve(&raw) {
                let again = RetrySchedule::resolve(&schedule.to_string())
                    .expect("rendered schedule must resolve");
                prop_assert_eq!(again, schedule);
            }
        }

        /// Parsing arbitrary input never panics; it only ever rejects.
        #[test]
        fn parse_never_panics(raw in "\\PC*") {
            let _ = RetrySchedule::parse(&raw);
        }
    }
}
