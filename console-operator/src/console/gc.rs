//! Garbage Collector: pure due-time arithmetic deciding when a Console
//! becomes eligible for deletion. Does not delete anything itself; the
//! harness compares `now` against the returned due time.

use crate::util::time::add_seconds;
use console_types::{ConsolePhase, ConsoleStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

pub struct GcInput<'a> {
    pub status: &'a ConsoleStatus,
    pub creation_time: &'a Time,
    /// When the Console most recently entered its current phase. `None`
    /// when no transition has been observed yet, in which case
    /// `creation_time` stands in for it.
    pub last_transition_time: Option<&'a Time>,
    pub ttl_seconds_before_running: i64,
    pub ttl_seconds_after_finished: i64,
}

/// Returns the Unix-seconds timestamp at which this Console should be
/// garbage collected, or `None` if no GC is scheduled for its phase.
pub fn due_time(input: &GcInput) -> Option<Time> {
    match input.status.phase {
        ConsolePhase::PendingAuthorisation => {
            let last_transition = input.last_transition_time.unwrap_or(input.creation_time);
            let base = if last_transition.0 >= input.creation_time.0 { last_transition } else { input.creation_time };
            Some(add_seconds(base, input.ttl_seconds_before_running))
        }
        ConsolePhase::Stopped => {
            let base = input.status.completion_time.as_ref().or(input.status.expiry_time.as_ref())?;
            Some(add_seconds(base, input.ttl_seconds_after_finished))
        }
        _ => None,
    }
}

/// Whether `now` (Unix seconds) has reached or passed the due time.
pub fn is_due(input: &GcInput, now: i64) -> bool {
    due_time(input).is_some_and(|due| now >= crate::util::time::to_unix(&due))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::time::{from_unix, to_unix};

    fn status(phase: ConsolePhase) -> ConsoleStatus {
        ConsoleStatus { phase, ..Default::default() }
    }

    #[test]
    fn pending_authorisation_uses_creation_time_when_no_transition_recorded() {
        let created = from_unix(1_000);
        let input = GcInput {
            status: &status(ConsolePhase::PendingAuthorisation),
            creation_time: &created,
            last_transition_time: None,
            ttl_seconds_before_running: 60,
            ttl_seconds_after_finished: 600,
        };
        assert_eq!(to_unix(&due_time(&input).unwrap()), 1_060);
    }

    #[test]
    fn pending_authorisation_prefers_later_transition_time() {
        let created = from_unix(1_000);
        let transitioned = from_unix(1_500);
        let input = GcInput {
            status: &status(ConsolePhase::PendingAuthorisation),
            creation_time: &created,
            last_transition_time: Some(&transitioned),
            ttl_seconds_before_running: 60,
            ttl_seconds_after_finished: 600,
        };
        assert_eq!(to_unix(&due_time(&input).unwrap()), 1_560);
    }

    #[test]
    fn stopped_prefers_completion_time_over_expiry_time() {
        let mut s = status(ConsolePhase::Stopped);
        s.completion_time = Some(from_unix(2_000));
        s.expiry_time = Some(from_unix(1_800));
        let created = from_unix(1_000);
        let input = GcInput {
            status: &s,
            creation_time: &created,
            last_transition_time: None,
            ttl_seconds_before_running: 60,
            ttl_seconds_after_finished: 100,
        };
        assert_eq!(to_unix(&due_time(&input).unwrap()), 2_100);
    }

    #[test]
    fn stopped_falls_back_to_expiry_time_when_completion_time_absent() {
        let mut s = status(ConsolePhase::Stopped);
        s.expiry_time = Some(from_unix(1_800));
        let created = from_unix(1_000);
        let input = GcInput {
            status: &s,
            creation_time: &created,
            last_transition_time: None,
            ttl_seconds_before_running: 60,
            ttl_seconds_after_finished: 100,
        };
        assert_eq!(to_unix(&due_time(&input).unwrap()), 1_900);
    }

    #[test]
    fn stopped_with_neither_timestamp_schedules_nothing() {
        let s = status(ConsolePhase::Stopped);
        let created = from_unix(1_000);
        let input = GcInput {
            status: &s,
            creation_time: &created,
            last_transition_time: None,
            ttl_seconds_before_running: 60,
            ttl_seconds_after_finished: 100,
        };
        assert!(due_time(&input).is_none());
    }

    #[test]
    fn running_phase_schedules_no_gc() {
        let s = status(ConsolePhase::Running);
        let created = from_unix(1_000);
        let input = GcInput {
            status: &s,
            creation_time: &created,
            last_transition_time: None,
            ttl_seconds_before_running: 60,
            ttl_seconds_after_finished: 100,
        };
        assert!(due_time(&input).is_none());
    }

    #[test]
    fn is_due_compares_against_now() {
        let created = from_unix(1_000);
        let input = GcInput {
            status: &status(ConsolePhase::PendingAuthorisation),
            creation_time: &created,
            last_transition_time: None,
            ttl_seconds_before_running: 60,
            ttl_seconds_after_finished: 600,
        };
        assert!(!is_due(&input, 1_059));
        assert!(is_due(&input, 1_060));
    }
}
