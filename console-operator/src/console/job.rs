//! Execution Materialiser: builds the single-shot Job that runs a
//! Console's pod.

use super::diff::Diff;
use super::resolver::ResolvedExecution;
use crate::util::MANAGER_NAME;
use crate::util::labels::{local_part, sanitise_label_value, truncate};
use console_common::annotations;
use console_types::Console;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::{Resource, ResourceExt, api::ObjectMeta};
use std::collections::BTreeMap;

fn created_by_annotations() -> BTreeMap<String, String> {
    BTreeMap::from([(annotations::CREATED_BY.to_string(), MANAGER_NAME.to_string())])
}

const JOB_NAME_MAX_PREFIX: usize = 55;

pub fn job_name(console: &Console) -> String {
    format!("{}-console", truncate(&console.name_any(), JOB_NAME_MAX_PREFIX))
}

fn job_labels(console: &Console, template_labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    for (key, value) in template_labels {
        labels.insert(key.clone(), sanitise_label_value(value));
    }
    for (key, value) in &console.spec.labels {
        labels.insert(key.clone(), sanitise_label_value(value));
    }
    labels.insert("console-name".to_string(), sanitise_label_value(&console.name_any()));
    labels.insert("user".to_string(), sanitise_label_value(local_part(&console.spec.user)));
    labels
}

/// Builds the expected Job for a Console, given its resolved execution
/// descriptor and the template's pod spec. `template_labels` are the
/// labels declared on the template's pod template metadata.
pub fn build_job(
    console: &Console,
    resolved: &ResolvedExecution,
    template_pod: &PodTemplateSpec,
    template_labels: &BTreeMap<String, String>,
) -> Job {
    let mut pod = template_pod.clone();
    let labels = job_labels(console, template_labels);

    if let Some(spec) = pod.spec.as_mut() {
        spec.restart_policy = Some("Never".to_string());
        if let Some(first) = spec.containers.first_mut() {
            let (head, tail) = split_command(&resolved.command);
            first.command = head;
            first.args = tail;
            if !console.spec.noninteractive {
                first.stdin = Some(true);
                first.tty = Some(true);
            }
        }
    }
    pod.metadata.labels = Some(labels.clone());

    Job {
        metadata: ObjectMeta {
            name: Some(job_name(console)),
            namespace: console.namespace(),
            owner_references: Some(vec![console.controller_owner_ref(&()).unwrap()]),
            labels: Some(labels),
            annotations: Some(created_by_annotations()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            completions: Some(1),
            parallelism: Some(1),
            backoff_limit: Some(0),
            active_deadline_seconds: Some(resolved.timeout_seconds),
            ttl_seconds_after_finished: Some(resolved.ttl_after_finished as i32),
            template: pod,
            ..Default::default()
        }),
        status: None,
    }
}

fn split_command(command: &[String]) -> (Option<Vec<String>>, Option<Vec<String>>) {
    if command.is_empty() {
        return (None, None);
    }
    (Some(vec![command[0].clone()]), Some(command[1..].to_vec()))
}

/// Compares the fields the Job diff is scoped to: `activeDeadlineSeconds,
/// backoffLimit, completions, parallelism, ttlSecondsAfterFinished`, and
/// labels. Everything else about the pod template is immutable once the
/// Job exists, so it is deliberately excluded from the comparison.
pub fn diff_job(expected: &Job, observed: &Job) -> Diff<Job> {
    let e = expected.spec.as_ref();
    let o = observed.spec.as_ref();
    let changed = e.and_then(|s| s.active_deadline_seconds) != o.and_then(|s| s.active_deadline_seconds)
        || e.and_then(|s| s.backoff_limit) != o.and_then(|s| s.backoff_limit)
        || e.and_then(|s| s.completions) != o.and_then(|s| s.completions)
        || e.and_then(|s| s.parallelism) != o.and_then(|s| s.parallelism)
        || e.and_then(|s| s.ttl_seconds_after_finished) != o.and_then(|s| s.ttl_seconds_after_finished)
        || expected.metadata.labels != observed.metadata.labels;
    if !changed {
        return Diff::None;
    }
    let mut patched = observed.clone();
    if let Some(patched_spec) = patched.spec.as_mut()
        && let Some(expected_spec) = e
    {
        patched_spec.active_deadline_seconds = expected_spec.active_deadline_seconds;
        patched_spec.backoff_limit = expected_spec.backoff_limit;
        patched_spec.completions = expected_spec.completions;
        patched_spec.parallelism = expected_spec.parallelism;
        patched_spec.ttl_seconds_after_finished = expected_spec.ttl_seconds_after_finished;
    }
    patched.metadata.labels = expected.metadata.labels.clone();
    Diff::Update(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use console_types::ConsoleSpec;
    use k8s_openapi::api::core::v1::{Container, PodSpec};

    fn console(name: &str) -> Console {
        Console::new(
            name,
            ConsoleSpec {
                user: "alice@example.com".to_string(),
                noninteractive: false,
                ..Default::default()
            },
        )
    }

    fn pod_template() -> PodTemplateSpec {
        PodTemplateSpec {
            spec: Some(PodSpec {
                containers: vec![Container { name: "console".to_string(), ..Default::default() }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn resolved(timeout: i64, ttl_after: i64, command: Vec<&str>) -> ResolvedExecution {
        ResolvedExecution {
            command: command.iter().map(|s| s.to_string()).collect(),
            timeout_seconds: timeout,
            ttl_before_running: 60,
            ttl_after_finished: ttl_after,
            timeout_clamped: false,
        }
    }

    #[test]
    fn job_name_truncates_and_suffixes() {
        let c = console(&"a".repeat(90));
        assert_eq!(job_name(&c).len(), 63);
        assert!(job_name(&c).ends_with("-console"));
    }

    #[test]
    fn short_name_is_used_verbatim() {
        let c = console("console-0");
        assert_eq!(job_name(&c), "console-0-console");
    }

    #[test]
    fn active_deadline_seconds_matches_resolved_timeout() {
        let job = build_job(&console("c"), &resolved(7200, 86400, vec!["sleep", "1"]), &pod_template(), &BTreeMap::new());
        assert_eq!(job.spec.unwrap().active_deadline_seconds, Some(7200));
    }

    #[test]
    fn interactive_by_default_sets_stdin_and_tty() {
        let job = build_job(&console("c"), &resolved(600, 60, vec!["bash"]), &pod_template(), &BTreeMap::new());
        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.stdin, Some(true));
        assert_eq!(container.tty, Some(true));
    }

    #[test]
    fn noninteractive_console_skips_stdin_tty() {
        let mut c = console("c");
        c.spec.noninteractive = true;
        let job = build_job(&c, &resolved(600, 60, vec!["bash"]), &pod_template(), &BTreeMap::new());
        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.stdin, None);
        assert_eq!(container.tty, None);
    }

    #[test]
    fn command_split_into_head_and_args() {
        let job = build_job(&console("c"), &resolved(600, 60, vec!["sleep", "666"]), &pod_template(), &BTreeMap::new());
        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.command, Some(vec!["sleep".to_string()]));
        assert_eq!(container.args, Some(vec!["666".to_string()]));
    }

    #[test]
    fn labels_carry_console_name_and_user_local_part() {
        let job = build_job(&console("c"), &resolved(600, 60, vec![]), &pod_template(), &BTreeMap::new());
        let labels = job.metadata.labels.unwrap();
        assert_eq!(labels.get("console-name"), Some(&"c".to_string()));
        assert_eq!(labels.get("user"), Some(&"alice".to_string()));
    }

    #[test]
    fn console_labels_win_over_template_labels_on_conflict() {
        let mut template_labels = BTreeMap::new();
        template_labels.insert("team".to_string(), "template-team".to_string());
        let mut c = console("c");
        c.spec.labels.insert("team".to_string(), "console-team".to_string());
        let job = build_job(&c, &resolved(600, 60, vec![]), &pod_template(), &template_labels);
        assert_eq!(job.metadata.labels.unwrap().get("team"), Some(&"console-team".to_string()));
    }

    #[test]
    fn diff_none_for_identical_jobs() {
        let job = build_job(&console("c"), &resolved(600, 60, vec![]), &pod_template(), &BTreeMap::new());
        assert_eq!(diff_job(&job, &job), Diff::None);
    }

    #[test]
    fn diff_detects_active_deadline_change() {
        let expected = build_job(&console("c"), &resolved(7200, 60, vec![]), &pod_template(), &BTreeMap::new());
        let observed = build_job(&console("c"), &resolved(600, 60, vec![]), &pod_template(), &BTreeMap::new());
        match diff_job(&expected, &observed) {
            Diff::Update(patched) => {
                assert_eq!(patched.spec.unwrap().active_deadline_seconds, Some(7200));
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }
}
