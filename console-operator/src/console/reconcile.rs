use console_types::{Console, ConsoleAuthorisation, ConsolePhase};
use futures::stream::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::runtime::reflector::ObjectRef;
use kube::{
    Api, Resource, ResourceExt,
    client::Client,
    runtime::{Controller, controller::Action},
};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::{sync::Mutex, time::Duration};
use tokio_util::sync::CancellationToken;

use super::actions;
use crate::util::{
    Error, MANAGER_NAME, PROBE_INTERVAL,
    colors::{FG1, FG2},
};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Entrypoint for the Console controller. `metrics` is the single shared
/// instance also served by `util::server::run`'s `/metrics` endpoint;
/// constructing a second one here would leave reconcile-side counters
/// invisible to it.
pub async fn run(client: Client, #[cfg(feature = "metrics")] metrics: Arc<ControllerMetrics>) -> Result<(), Error> {
    println!("{}", "⚙️ Starting Console controller...".green());

    #[cfg(feature = "metrics")]
    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone(), metrics));
    #[cfg(not(feature = "metrics"))]
    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone()));

    let lease_namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("console-operator-{}", uuid::Uuid::new_v4()));
    let lease_name = "console-operator-lock".to_string();
    let lease_ttl = Duration::from_secs(15);
    let renew_every = Duration::from_secs(5);
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams { holder_id, lease_name, lease_ttl },
    );

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        console_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });
    console_common::signal_ready();
    println!("{}", "🌱 Starting Console controller...".green());

    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(renew_every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break Ok(())
            },
            _ = tick.tick() => {}
        }
        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                    eprintln!("aborted controller due to leader election error");
                }
                continue;
            }
        };
        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controller_task.is_none() {
                println!("{}", "👑 Acquired leadership; starting controller".green());
                let client_for_controller = client.clone();
                let context_for_controller = context.clone();
                let controller_namespace = lease_namespace.clone();
                let console_api: Api<Console> = Api::namespaced(client_for_controller.clone(), &controller_namespace);
                let auth_api: Api<ConsoleAuthorisation> =
                    Api::namespaced(client_for_controller.clone(), &controller_namespace);
                let job_api: Api<Job> = Api::namespaced(client_for_controller.clone(), &controller_namespace);
                controller_task = Some(tokio::spawn(async move {
                    println!("{}", "🚀 Console controller started.".green());
                    Controller::new(console_api, Default::default())
                        .owns(job_api, Default::default())
                        .watches(auth_api, Default::default(), |auth: ConsoleAuthorisation| {
                            auth.namespace().map(|ns| {
                                ObjectRef::<Console>::new(&auth.spec.console_ref.name).within(&ns)
                            })
                        })
                        .run(reconcile, on_error, context_for_controller)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost leadership; stopping controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,

    #[cfg(feature = "metrics")]
    metrics: Arc<ControllerMetrics>,

    last_action: Mutex<HashMap<(String, String), (ConsoleAction, Instant)>>,
}

impl ContextData {
    fn new(client: Client, #[cfg(feature = "metrics")] metrics: Arc<ControllerMetrics>) -> Self {
        #[cfg(feature = "metrics")]
        {
            ContextData { client, metrics, last_action: Mutex::new(HashMap::new()) }
        }
        #[cfg(not(feature = "metrics"))]
        {
            ContextData { client, last_action: Mutex::new(HashMap::new()) }
        }
    }
}

/// The action taken this reconcile, as reported to logs and metrics.
/// Distinct from `kube_runtime`'s `Action`, which only carries the
/// re-queue decision.
#[derive(Debug, PartialEq, Clone)]
enum ConsoleAction {
    TemplateMissing,
    PendingAuthorisation,
    Pending,
    Running,
    Stopped,
    Destroyed,
}

impl ConsoleAction {
    fn to_str(&self) -> &str {
        match self {
            ConsoleAction::TemplateMissing => "TemplateMissing",
            ConsoleAction::PendingAuthorisation => "PendingAuthorisation",
            ConsoleAction::Pending => "Pending",
            ConsoleAction::Running => "Running",
            ConsoleAction::Stopped => "Stopped",
            ConsoleAction::Destroyed => "Destroyed",
        }
    }
}

async fn reconcile(instance: Arc<Console>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client: Client = context.client.clone();

    let namespace: String = match instance.namespace() {
        None => {
            return Err(Error::UserInput(
                "Expected Console resource to be namespaced. Can't reconcile without a namespace.".to_owned(),
            ));
        }
        Some(namespace) => namespace,
    };
    let name = instance.name_any();

    // Don't do anything while being deleted; children are cleaned up by
    // owner-reference cascade, not by this controller.
    if instance.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    #[cfg(feature = "metrics")]
    context.metrics.reconcile_counter.with_label_values(&[&name, &namespace]).inc();
    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    let reporter: Reporter = MANAGER_NAME.into();
    let recorder = Recorder::new(client.clone(), reporter, instance.object_ref(&()));

    let outcome = actions::reconcile(client.clone(), &instance, &recorder).await?;

    let action = to_console_action(&outcome);
    log_action(&context, &namespace, &name, &action).await;

    #[cfg(feature = "metrics")]
    context
        .metrics
        .read_histogram
        .with_label_values(&[&name, &namespace, action.to_str()])
        .observe(start.elapsed().as_secs_f64());
    #[cfg(feature = "metrics")]
    context.metrics.action_counter.with_label_values(&[&name, &namespace, action.to_str()]).inc();

    if !outcome.deleted && status_differs(instance.status.as_ref(), &outcome.status) {
        crate::util::patch::patch_status(client, instance.as_ref(), outcome.status.clone()).await?;
    }

    Ok(next_action(&outcome))
}

fn to_console_action(outcome: &actions::Outcome) -> ConsoleAction {
    if outcome.template_missing {
        return ConsoleAction::TemplateMissing;
    }
    match outcome.status.phase {
        ConsolePhase::Creating | ConsolePhase::Pending => ConsoleAction::Pending,
        ConsolePhase::PendingAuthorisation => ConsoleAction::PendingAuthorisation,
        ConsolePhase::Running => ConsoleAction::Running,
        ConsolePhase::Stopped => ConsoleAction::Stopped,
        ConsolePhase::Destroyed => ConsoleAction::Destroyed,
    }
}

/// Re-enqueue policy: 1s while `Pending` with no observed pod, the GC
/// due time while `PendingAuthorisation`/`Stopped`, no requeue once
/// `Destroyed`, else the default probe interval.
fn next_action(outcome: &actions::Outcome) -> Action {
    if outcome.deleted || outcome.status.phase == ConsolePhase::Destroyed {
        return Action::await_change();
    }
    if outcome.status.phase == ConsolePhase::Pending && !outcome.pod_observed {
        return Action::requeue(Duration::from_secs(1));
    }
    if let Some(due_at) = outcome.gc_due_at {
        let now = crate::util::time::now_unix();
        let remaining = (due_at - now).max(0) as u64;
        return Action::requeue(Duration::from_secs(remaining));
    }
    Action::requeue(PROBE_INTERVAL)
}

fn status_differs(observed: Option<&console_types::ConsoleStatus>, computed: &console_types::ConsoleStatus) -> bool {
    observed != Some(computed)
}

async fn log_action(context: &ContextData, namespace: &str, name: &str, action: &ConsoleAction) {
    let value = {
        let mut la = context.last_action.lock().await;
        la.insert((namespace.to_string(), name.to_string()), (action.clone(), Instant::now()))
    };
    if let Some((last_action, last_instant)) = value
        && (&last_action != action || last_instant.elapsed() > Duration::from_secs(300))
    {
        println!(
            "🔧 {}{}{}{}{}",
            namespace.color(FG2),
            "/".color(FG1),
            name.color(FG2),
            " ACTION: ".color(FG1),
            action.to_str().color(FG2),
        );
    }
}

fn on_error(instance: Arc<Console>, error: &Error, context: Arc<ContextData>) -> Action {
    if error.is_conflict() {
        println!("{}", format!("conflict reconciling {}: {:?}", instance.name_any(), error).yellow());
        return Action::requeue(Duration::from_secs(1));
    }
    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_errors_total
        .with_label_values(&[&format!("{:?}", error.kind())])
        .inc();
    eprintln!("{}", format!("Reconciliation error: {:?} {:?}", error, instance).red());

    // `on_error` is a synchronous callback, so the event publish is
    // dispatched as a detached task rather than awaited inline.
    let reporter: Reporter = MANAGER_NAME.into();
    let recorder = Recorder::new(context.client.clone(), reporter, instance.object_ref(&()));
    let note = format!("{error:?}");
    tokio::spawn(async move {
        let _ = recorder
            .publish(Event {
                type_: EventType::Warning,
                reason: "ReconcileError".to_string(),
                note: Some(note),
                action: "ReconcileError".to_string(),
                secondary: None,
            })
            .await;
    });

    Action::requeue(Duration::from_secs(5))
}
