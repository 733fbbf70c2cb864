//! Write-phase orchestration: resolves a Console's template, runs it
//! through the authorisation gate, materialises its Job and RBAC
//! objects, folds the observation into its next status, and publishes
//! the audit trail.

use super::diff::Diff;
use super::{access_control, authorisation, gc, job as job_materialiser, phase, resolver};
use crate::util::Error;
use console_types::{Console, ConsoleAuthorisation, ConsolePhase, ConsoleStatus, ConsoleTemplate};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::{ListParams, PostParams};
use kube::core::Resource;
use kube::runtime::events::{Event, EventType, Recorder};
use kube::{Api, Client, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// What the write phase learned this reconcile; `reconcile.rs` turns
/// this into the re-queue decision.
pub struct Outcome {
    pub status: ConsoleStatus,
    /// Set when the referenced ConsoleTemplate could not be fetched;
    /// the harness requeues with backoff without advancing the phase.
    pub template_missing: bool,
    /// Set once the garbage collector has deleted the Console.
    pub deleted: bool,
    /// Whether a pod was observed this reconcile; used by the harness to
    /// pick the 1s fast-poll re-queue while `Pending` with no pod yet.
    pub pod_observed: bool,
    /// Unix-seconds GC due time, when one is scheduled for the resulting
    /// status (`PendingAuthorisation` or `Stopped`).
    pub gc_due_at: Option<i64>,
}

pub async fn reconcile(client: Client, console: &Console, recorder: &Recorder) -> Result<Outcome, Error> {
    let namespace = console
        .namespace()
        .ok_or_else(|| Error::UserInput("Console is missing metadata.namespace".to_string()))?;
    let name = console.name_any();
    let previous_status = console.status.clone().unwrap_or_default();

    if previous_status.phase.is_terminal() {
        // A Destroyed Console has already lost its Job; nothing is left
        // to wait out, so it is eligible for deletion immediately. A
        // Stopped Console waits out ttlSecondsAfterFinished.
        let due = if previous_status.phase == ConsolePhase::Destroyed {
            Some(phase::now())
        } else {
            gc_due_time(console, &previous_status)
        };
        if due.is_some_and(|d| phase::now() >= d) {
            delete_console(client, console).await?;
            return Ok(Outcome {
                status: previous_status,
                template_missing: false,
                deleted: true,
                pod_observed: false,
                gc_due_at: due,
            });
        }
        return Ok(Outcome {
            status: previous_status,
            template_missing: false,
            deleted: false,
            pod_observed: false,
            gc_due_at: due,
        });
    }

    let Some(template) = resolver::fetch_template(client.clone(), &namespace, &console.spec.console_template_ref.name).await?
    else {
        publish(recorder, EventType::Warning, "TemplateMissing", format!(
            "ConsoleTemplate {} not found",
            console.spec.console_template_ref.name
        ))
        .await?;
        return Ok(Outcome {
            status: previous_status,
            template_missing: true,
            deleted: false,
            pod_observed: false,
            gc_due_at: None,
        });
    };

    let resolved = resolver::resolve(console, &template);
    if resolved.timeout_clamped {
        publish(
            recorder,
            EventType::Warning,
            "InvalidSpecification",
            format!("timeoutSeconds clamped to {}", resolved.timeout_seconds),
        )
        .await?;
    }
    if resolver::has_extra_containers(&template) {
        publish(
            recorder,
            EventType::Warning,
            "TemplateUnsupported",
            "template declares more than one container; only the first is used".to_string(),
        )
        .await?;
    }

    let rule = authorisation::select_rule(&template.spec, &resolved.command);

    let auth_api: Api<ConsoleAuthorisation> = Api::namespaced(client.clone(), &namespace);
    let authorised = if rule.is_some() {
        let expected = authorisation::build_authorisation(console);
        upsert(recorder, "ConsoleAuthorisation", &auth_api, &name, expected, authorisation::diff_authorisation).await?;
        let observed = auth_api.get(&name).await?;
        authorisation::compute_authorised(rule.as_ref(), Some(&observed.spec))
    } else {
        true
    };

    let job_api: Api<Job> = Api::namespaced(client.clone(), &namespace);
    let job_name = job_materialiser::job_name(console);
    let observed_job = get_optional(&job_api, &job_name).await?;

    let job = if authorised {
        match observed_job {
            Some(observed) => {
                let template_labels = pod_template_labels(&template);
                let expected =
                    job_materialiser::build_job(console, &resolved, &template.spec.pod_template, &template_labels);
                match job_materialiser::diff_job(&expected, &observed) {
                    Diff::Update(patched) => {
                        job_api.replace(&job_name, &PostParams::default(), &patched).await?;
                        publish(recorder, EventType::Normal, "SuccessfulUpdate", format!("updated Job {job_name}")).await?;
                        Some(patched)
                    }
                    Diff::None => {
                        publish(recorder, EventType::Normal, "NoCreateOrUpdate", format!("Job {job_name} unchanged"))
                            .await?;
                        Some(observed)
                    }
                    Diff::Create => {
                        publish(
                            recorder,
                            EventType::Warning,
                            "UnknownOutcome",
                            format!("diff function reported Create for already-existing Job {job_name}"),
                        )
                        .await?;
                        Some(observed)
                    }
                }
            }
            // The Job has never existed yet: create it. If it existed
            // before and has since vanished externally, leave `job` as
            // `None` so the phase tracker moves the Console to
            // `Destroyed` instead of recreating it.
            None if !job_previously_existed(&previous_status) => {
                let template_labels = pod_template_labels(&template);
                let expected =
                    job_materialiser::build_job(console, &resolved, &template.spec.pod_template, &template_labels);
                job_api.create(&PostParams::default(), &expected).await?;
                publish(recorder, EventType::Normal, "SuccessfulCreate", format!("created Job {job_name}")).await?;
                Some(expected)
            }
            None => None,
        }
    } else {
        observed_job
    };

    let pod = match job.as_ref() {
        Some(_) => find_pod_for_job(client.clone(), &namespace, &job_name).await?,
        None => None,
    };

    let known_pod_name = previous_status
        .pod_name
        .clone()
        .or_else(|| pod.as_ref().and_then(|p| p.metadata.name.clone()));
    if let Some(pod_name) = known_pod_name.as_deref() {
        apply_access_control(client.clone(), recorder, console, &template, rule.as_ref(), pod_name).await?;
    }

    let phase_input = phase::PhaseInput {
        previous: &previous_status,
        job: job.as_ref(),
        pod: pod.as_ref(),
        authorised,
        timeout_seconds: resolved.timeout_seconds,
    };
    let (new_status, events) = phase::determine_status(&phase_input);
    for event in &events {
        publish(recorder, EventType::Normal, event.reason, event.message.clone()).await?;
    }

    let gc_due_at = console.meta().creation_timestamp.as_ref().and_then(|creation_time| {
        gc::due_time(&gc::GcInput {
            status: &new_status,
            creation_time,
            last_transition_time: None,
            ttl_seconds_before_running: resolved.ttl_before_running,
            ttl_seconds_after_finished: resolved.ttl_after_finished,
        })
        .map(|t| crate::util::time::to_unix(&t))
    });

    Ok(Outcome {
        status: new_status,
        template_missing: false,
        deleted: false,
        pod_observed: pod.is_some(),
        gc_due_at,
    })
}

/// Whether this Console's Job has been created at some point in the
/// past. `previous_status.phase` only ever leaves `Creating`/
/// `PendingAuthorisation` once a Job has been materialised (see
/// `phase::decide_phase`), and `pod_name` is set no later than the Job
/// is. Used to distinguish "never created yet" from "created, then
/// deleted externally" — only the former is recreated.
fn job_previously_existed(previous_status: &ConsoleStatus) -> bool {
    previous_status.pod_name.is_some()
        || !matches!(previous_status.phase, ConsolePhase::Creating | ConsolePhase::PendingAuthorisation)
}

fn pod_template_labels(template: &ConsoleTemplate) -> std::collections::BTreeMap<String, String> {
    template
        .spec
        .pod_template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default()
}

async fn apply_access_control(
    client: Client,
    recorder: &Recorder,
    console: &Console,
    template: &ConsoleTemplate,
    rule: Option<&console_types::AuthorisationRule>,
    pod_name: &str,
) -> Result<(), Error> {
    let roles: Api<Role> = Api::namespaced(client.clone(), &console.namespace().unwrap_or_default());
    let role_bindings: Api<RoleBinding> = Api::namespaced(client.clone(), &console.namespace().unwrap_or_default());

    let expected_role = access_control::build_pod_role(console, pod_name);
    upsert(recorder, "Role", &roles, &console.name_any(), expected_role, access_control::diff_role).await?;

    let expected_binding = access_control::build_pod_role_binding(console, &template.spec.additional_attach_subjects);
    upsert(recorder, "RoleBinding", &role_bindings, &console.name_any(), expected_binding, access_control::diff_role_binding)
        .await?;

    if let Some(rule) = rule {
        let auth_role_name = format!("{}-authorisation", console.name_any());
        let expected_auth_role = access_control::build_authorisation_role(console);
        upsert(recorder, "Role", &roles, &auth_role_name, expected_auth_role, access_control::diff_role).await?;

        let expected_auth_binding = access_control::build_authorisation_role_binding(console, &rule.subjects);
        upsert(
            recorder,
            "RoleBinding",
            &role_bindings,
            &auth_role_name,
            expected_auth_binding,
            access_control::diff_role_binding,
        )
        .await?;
    }

    Ok(())
}

/// Creates `expected` when missing, or patches it in place per `diff_fn`,
/// publishing the outcome as an event. A diff function reporting `Create`
/// for an object that already exists is a contract violation by the
/// materialiser, not a normal outcome, and is surfaced as `UnknownOutcome`
/// rather than silently treated as a no-op.
async fn upsert<T, F>(recorder: &Recorder, kind: &str, api: &Api<T>, name: &str, expected: T, diff_fn: F) -> Result<(), Error>
where
    T: Clone + Resource + Serialize + DeserializeOwned + Debug,
    <T as Resource>::DynamicType: Default,
    F: Fn(&T, &T) -> Diff<T>,
{
    match api.get(name).await {
        Ok(observed) => match diff_fn(&expected, &observed) {
            Diff::Update(patched) => {
                api.replace(name, &PostParams::default(), &patched).await?;
                publish(recorder, EventType::Normal, "SuccessfulUpdate", format!("updated {kind} {name}")).await?;
            }
            Diff::None => {
                publish(recorder, EventType::Normal, "NoCreateOrUpdate", format!("{kind} {name} unchanged")).await?;
            }
            Diff::Create => {
                publish(
                    recorder,
                    EventType::Warning,
                    "UnknownOutcome",
                    format!("diff function reported Create for already-existing {kind} {name}"),
                )
                .await?;
            }
        },
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            api.create(&PostParams::default(), &expected).await?;
            publish(recorder, EventType::Normal, "SuccessfulCreate", format!("created {kind} {name}")).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn get_optional<T>(api: &Api<T>, name: &str) -> Result<Option<T>, Error>
where
    T: Clone + Resource + Serialize + DeserializeOwned + Debug,
    <T as Resource>::DynamicType: Default,
{
    match api.get(name).await {
        Ok(object) => Ok(Some(object)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn find_pod_for_job(client: Client, namespace: &str, job_name: &str) -> Result<Option<Pod>, Error> {
    let pods: Api<Pod> = Api::namespaced(client, namespace);
    let params = ListParams::default().labels(&format!("job-name={job_name}"));
    let list = pods.list(&params).await?;
    Ok(list.items.into_iter().next())
}

async fn publish(recorder: &Recorder, type_: EventType, reason: &str, note: String) -> Result<(), Error> {
    recorder
        .publish(Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: reason.to_string(),
            secondary: None,
        })
        .await?;
    Ok(())
}

fn gc_due_time(console: &Console, status: &ConsoleStatus) -> Option<i64> {
    if status.phase != ConsolePhase::PendingAuthorisation && status.phase != ConsolePhase::Stopped {
        return None;
    }
    let creation_time = console.meta().creation_timestamp.as_ref()?;
    let input = gc::GcInput {
        status,
        creation_time,
        last_transition_time: None,
        ttl_seconds_before_running: console.spec.ttl_seconds_before_running.unwrap_or(3600),
        ttl_seconds_after_finished: console.spec.ttl_seconds_after_finished.unwrap_or(24 * 3600),
    };
    gc::due_time(&input).map(|t| crate::util::time::to_unix(&t))
}

async fn delete_console(client: Client, console: &Console) -> Result<(), Error> {
    let namespace = console.namespace().unwrap_or_default();
    let api: Api<Console> = Api::namespaced(client, &namespace);
    match api.delete(&console.name_any(), &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}
