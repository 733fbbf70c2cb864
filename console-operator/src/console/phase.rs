//! Phase Tracker: the deterministic, I/O-free function that turns a
//! Console's current status plus the latest Job/Pod observations into
//! the next `ConsoleStatus`, alongside the audit events that transition
//! produces.

use crate::util::time::{add_seconds, now_unix, to_unix};
use console_types::{ConsolePhase, ConsoleStatus};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;

pub struct PhaseInput<'a> {
    pub previous: &'a ConsoleStatus,
    pub job: Option<&'a Job>,
    pub pod: Option<&'a Pod>,
    pub authorised: bool,
    pub timeout_seconds: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub reason: &'static str,
    pub message: String,
}

/// Runs the phase decision table and derives the next status. Pure: no
/// I/O, no wall-clock reads beyond what's needed to compute `expiryTime`
/// when it is first observed.
pub fn determine_status(input: &PhaseInput) -> (ConsoleStatus, Vec<AuditEvent>) {
    if input.previous.phase.is_terminal() {
        return (input.previous.clone(), Vec::new());
    }

    let new_phase = decide_phase(input);

    let expiry_time = input.previous.expiry_time.clone().or_else(|| {
        input
            .job
            .and_then(|j| j.metadata.creation_timestamp.clone())
            .map(|created| add_seconds(&created, input.timeout_seconds))
    });

    let completion_time = input
        .job
        .and_then(|j| j.status.as_ref())
        .and_then(|s| s.completion_time.clone())
        .or_else(|| input.previous.completion_time.clone());

    let pod_name = input
        .previous
        .pod_name
        .clone()
        .or_else(|| input.pod.and_then(|p| p.metadata.name.clone()));

    let events = transition_events(input.previous.phase, new_phase, input, &completion_time, &expiry_time);
    let reason = events.last().map(|e| e.message.clone()).or_else(|| input.previous.reason.clone());

    (
        ConsoleStatus {
            phase: new_phase,
            pod_name,
            expiry_time,
            completion_time,
            reason,
        },
        events,
    )
}

fn decide_phase(input: &PhaseInput) -> ConsolePhase {
    if !input.authorised {
        return ConsolePhase::PendingAuthorisation;
    }
    let Some(job) = input.job else {
        return ConsolePhase::Destroyed;
    };
    if job_finished(job) {
        return ConsolePhase::Stopped;
    }
    if pod_running(input.pod) {
        return ConsolePhase::Running;
    }
    ConsolePhase::Pending
}

fn job_finished(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| (c.type_ == "Complete" || c.type_ == "Failed") && c.status == "True")
        })
}

fn pod_running(pod: Option<&Pod>) -> bool {
    pod.and_then(|p| p.status.as_ref())
        .and_then(|s| s.phase.as_deref())
        == Some("Running")
}

fn transition_events(
    previous: ConsolePhase,
    new: ConsolePhase,
    input: &PhaseInput,
    completion_time: &Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::Time>,
    expiry_time: &Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::Time>,
) -> Vec<AuditEvent> {
    if previous == new {
        return Vec::new();
    }
    let mut events = Vec::new();

    if new == ConsolePhase::PendingAuthorisation {
        events.push(AuditEvent {
            reason: "ConsolePendingAuthorisation",
            message: "waiting for the required authorisations".to_string(),
        });
    }
    if previous == ConsolePhase::PendingAuthorisation && new != ConsolePhase::PendingAuthorisation {
        events.push(AuditEvent {
            reason: "ConsoleAuthorised",
            message: "required authorisations granted".to_string(),
        });
    }
    if previous == ConsolePhase::Pending && new == ConsolePhase::Running {
        events.push(AuditEvent {
            reason: "ConsoleStarted",
            message: "pod entered Running".to_string(),
        });
    }
    if new == ConsolePhase::Stopped {
        let job_start = input
            .job
            .and_then(|j| j.status.as_ref())
            .and_then(|s| s.start_time.clone())
            .or_else(|| input.job.and_then(|j| j.metadata.creation_timestamp.clone()));
        let end = completion_time.clone().or_else(|| expiry_time.clone());
        let duration_secs = match (job_start.as_ref(), end.as_ref()) {
            (Some(start), Some(end)) => Some(to_unix(end) - to_unix(start)),
            _ => None,
        };
        events.push(AuditEvent {
            reason: "ConsoleEnded",
            message: match duration_secs {
                Some(secs) => format!("console session ended after {secs}s"),
                None => "console session ended".to_string(),
            },
        });
    }
    if new == ConsolePhase::Destroyed {
        events.push(AuditEvent {
            reason: "ConsoleDestroyed",
            message: "job no longer exists; console is being removed".to_string(),
        });
    }

    events
}

/// Number of seconds since the Unix epoch right now; used by the GC and
/// the harness's requeue arithmetic. Kept alongside the phase tracker
/// since both operate on the same `Time` representation.
pub fn now() -> i64 {
    now_unix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::time::from_unix;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::api::core::v1::PodStatus;
    use kube::api::ObjectMeta;

    fn status(phase: ConsolePhase) -> ConsoleStatus {
        ConsoleStatus { phase, ..Default::default() }
    }

    fn job_with_creation(ts: i64) -> Job {
        Job {
            metadata: ObjectMeta { creation_timestamp: Some(from_unix(ts)), ..Default::default() },
            ..Default::default()
        }
    }

    fn running_pod() -> Pod {
        Pod {
            status: Some(PodStatus { phase: Some("Running".to_string()), ..Default::default() }),
            ..Default::default()
        }
    }

    #[test]
    fn unauthorised_is_pending_authorisation_regardless_of_job() {
        let input = PhaseInput {
            previous: &status(ConsolePhase::Creating),
            job: None,
            pod: None,
            authorised: false,
            timeout_seconds: 600,
        };
        let (new_status, events) = determine_status(&input);
        assert_eq!(new_status.phase, ConsolePhase::PendingAuthorisation);
        assert_eq!(events[0].reason, "ConsolePendingAuthorisation");
    }

    #[test]
    fn authorised_with_no_job_is_destroyed() {
        let input = PhaseInput {
            previous: &status(ConsolePhase::Pending),
            job: None,
            pod: None,
            authorised: true,
            timeout_seconds: 600,
        };
        let (new_status, events) = determine_status(&input);
        assert_eq!(new_status.phase, ConsolePhase::Destroyed);
        assert_eq!(events[0].reason, "ConsoleDestroyed");
    }

    #[test]
    fn job_present_no_pod_is_pending() {
        let job = job_with_creation(1_000);
        let input = PhaseInput {
            previous: &status(ConsolePhase::Creating),
            job: Some(&job),
            pod: None,
            authorised: true,
            timeout_seconds: 600,
        };
        let (new_status, _) = determine_status(&input);
        assert_eq!(new_status.phase, ConsolePhase::Pending);
        assert_eq!(new_status.expiry_time, Some(from_unix(1_600)));
    }

    #[test]
    fn pod_running_transitions_from_pending_to_running_with_event() {
        let job = job_with_creation(1_000);
        let pod = running_pod();
        let input = PhaseInput {
            previous: &status(ConsolePhase::Pending),
            job: Some(&job),
            pod: Some(&pod),
            authorised: true,
            timeout_seconds: 600,
        };
        let (new_status, events) = determine_status(&input);
        assert_eq!(new_status.phase, ConsolePhase::Running);
        assert_eq!(events[0].reason, "ConsoleStarted");
    }

    #[test]
    fn expiry_time_is_sticky_once_set() {
        let job = job_with_creation(5_000);
        let mut previous = status(ConsolePhase::Pending);
        previous.expiry_time = Some(from_unix(1_600));
        let input = PhaseInput {
            previous: &previous,
            job: Some(&job),
            pod: None,
            authorised: true,
            timeout_seconds: 600,
        };
        let (new_status, _) = determine_status(&input);
        assert_eq!(new_status.expiry_time, Some(from_unix(1_600)));
    }

    #[test]
    fn completed_job_is_stopped_with_duration_event() {
        let mut job = job_with_creation(1_000);
        job.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Complete".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            start_time: Some(from_unix(1_000)),
            completion_time: Some(from_unix(1_300)),
            ..Default::default()
        });
        let input = PhaseInput {
            previous: &status(ConsolePhase::Running),
            job: Some(&job),
            pod: None,
            authorised: true,
            timeout_seconds: 600,
        };
        let (new_status, events) = determine_status(&input);
        assert_eq!(new_status.phase, ConsolePhase::Stopped);
        assert_eq!(new_status.completion_time, Some(from_unix(1_300)));
        assert_eq!(events[0].message, "console session ended after 300s");
    }

    #[test]
    fn duration_falls_back_to_expiry_when_completion_time_absent() {
        let mut job = job_with_creation(1_000);
        job.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            start_time: Some(from_unix(1_000)),
            ..Default::default()
        });
        let mut previous = status(ConsolePhase::Running);
        previous.expiry_time = Some(from_unix(1_600));
        let input = PhaseInput {
            previous: &previous,
            job: Some(&job),
            pod: None,
            authorised: true,
            timeout_seconds: 600,
        };
        let (new_status, events) = determine_status(&input);
        assert_eq!(new_status.phase, ConsolePhase::Stopped);
        assert_eq!(events[0].message, "console session ended after 600s");
    }

    #[test]
    fn stopped_never_transitions_back() {
        let mut previous = status(ConsolePhase::Stopped);
        previous.reason = Some("already stopped".to_string());
        let input = PhaseInput {
            previous: &previous,
            job: None,
            pod: None,
            authorised: false,
            timeout_seconds: 600,
        };
        let (new_status, events) = determine_status(&input);
        assert_eq!(new_status.phase, ConsolePhase::Stopped);
        assert!(events.is_empty());
    }

    #[test]
    fn pod_name_is_sticky_once_observed() {
        let mut pod = running_pod();
        pod.metadata.name = Some("console-0-console-abcde".to_string());
        let job = job_with_creation(1_000);
        let input = PhaseInput {
            previous: &status(ConsolePhase::Pending),
            job: Some(&job),
            pod: Some(&pod),
            authorised: true,
            timeout_seconds: 600,
        };
        let (new_status, _) = determine_status(&input);
        assert_eq!(new_status.pod_name, Some("console-0-console-abcde".to_string()));

        let input2 = PhaseInput {
            previous: &new_status,
            job: Some(&job),
            pod: None,
            authorised: true,
            timeout_seconds: 600,
        };
        let (new_status2, _) = determine_status(&input2);
        assert_eq!(new_status2.pod_name, new_status.pod_name);
    }
}
