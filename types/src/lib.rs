use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::api::rbac::v1::Subject;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_ttl_before_running() -> i64 {
    3600
}

fn default_ttl_after_finished() -> i64 {
    24 * 3600
}

/// A reusable specification from which [`Console`]s are instantiated.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "console.crate.dev",
    version = "v1",
    kind = "ConsoleTemplate",
    plural = "consoletemplates",
    derive = "PartialEq",
    namespaced
)]
#[kube(derive = "Default")]
pub struct ConsoleTemplateSpec {
    /// The pod specification to instantiate. The first container is the one
    /// a Console attaches to; additional containers only draw a warning.
    pub pod_template: PodTemplateSpec,

    pub default_timeout_seconds: i64,
    pub max_timeout_seconds: i64,

    #[serde(default)]
    pub default_ttl_seconds_before_running: Option<i64>,
    #[serde(default)]
    pub default_ttl_seconds_after_finished: Option<i64>,

    /// Subjects always granted attach rights on every Console built from
    /// this template, in addition to the requesting user.
    #[serde(default)]
    pub additional_attach_subjects: Vec<Subject>,

    /// Ordered; the first rule whose `match_command_elements` pattern
    /// accepts the Console's command wins.
    #[serde(default)]
    pub authorisation_rules: Vec<AuthorisationRule>,

    /// Required whenever `authorisation_rules` is non-empty; used when no
    /// rule's pattern matches the command.
    #[serde(default)]
    pub default_authorisation_rule: Option<AuthorisationRule>,
}

impl ConsoleTemplateSpec {
    pub fn ttl_before_running(&self) -> i64 {
        self.default_ttl_seconds_before_running
            .unwrap_or_else(default_ttl_before_running)
    }

    pub fn ttl_after_finished(&self) -> i64 {
        self.default_ttl_seconds_after_finished
            .unwrap_or_else(default_ttl_after_finished)
    }
}

#[derive(Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
pub struct AuthorisationRule {
    pub name: String,

    /// Pattern list compared positionally against the command. `*` matches
    /// any single element; `**` matches zero or more trailing elements and
    /// is only legal as the final element.
    #[serde(default)]
    pub match_command_elements: Vec<String>,

    #[serde(default)]
    pub authorisations_required: u32,

    #[serde(default)]
    pub subjects: Vec<Subject>,
}

/// A user-facing request for an ephemeral interactive pod session.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "console.crate.dev",
    version = "v1",
    kind = "Console",
    plural = "consoles",
    derive = "PartialEq",
    status = "ConsoleStatus",
    namespaced,
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }",
    printcolumn = "{\"jsonPath\": \".spec.user\", \"name\": \"USER\", \"type\": \"string\" }"
)]
#[kube(derive = "Default")]
pub struct ConsoleSpec {
    /// Stamped by an admission webhook before the first reconcile; the core
    /// trusts it once set and never mutates it.
    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub reason: String,

    /// Verbatim override of the template's default command; empty means
    /// "use the template default".
    #[serde(default)]
    pub command: Vec<String>,

    pub console_template_ref: ConsoleTemplateRef,

    #[serde(default)]
    pub timeout_seconds: i64,

    #[serde(default)]
    pub ttl_seconds_before_running: Option<i64>,
    #[serde(default)]
    pub ttl_seconds_after_finished: Option<i64>,

    #[serde(default)]
    pub noninteractive: bool,

    #[serde(default)]
    pub labels: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: std::collections::BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Default, Debug, PartialEq, Eq, Clone, JsonSchema)]
pub struct ConsoleTemplateRef {
    pub name: String,
}

#[derive(Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
pub struct ConsoleStatus {
    #[serde(default)]
    pub phase: ConsolePhase,

    #[serde(default)]
    pub pod_name: Option<String>,

    #[serde(default)]
    pub expiry_time: Option<Time>,

    #[serde(default)]
    pub completion_time: Option<Time>,

    /// Human-readable reason accompanying the most recent phase transition;
    /// mirrors the message of the most recently emitted audit event.
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ConsolePhase {
    #[default]
    Creating,
    PendingAuthorisation,
    Pending,
    Running,
    Stopped,
    Destroyed,
}

impl ConsolePhase {
    /// A Console in one of these phases never transitions back to an
    /// earlier phase across any number of reconciliations.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConsolePhase::Stopped | ConsolePhase::Destroyed)
    }
}

impl fmt::Display for ConsolePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsolePhase::Creating => write!(f, "Creating"),
            ConsolePhase::PendingAuthorisation => write!(f, "PendingAuthorisation"),
            ConsolePhase::Pending => write!(f, "Pending"),
            ConsolePhase::Running => write!(f, "Running"),
            ConsolePhase::Stopped => write!(f, "Stopped"),
            ConsolePhase::Destroyed => write!(f, "Destroyed"),
        }
    }
}

/// A sibling resource used to collect required human approvals before a
/// Console's Job is created. 1:1 with Consoles requiring authorisation.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "console.crate.dev",
    version = "v1",
    kind = "ConsoleAuthorisation",
    plural = "consoleauthorisations",
    derive = "PartialEq",
    namespaced
)]
#[kube(derive = "Default")]
pub struct ConsoleAuthorisationSpec {
    /// Immutable once set; the name of the Console this authorises.
    pub console_ref: ConsoleRef,

    /// Append-only; one subject per update, enforced by an external
    /// validating webhook. The core only ever reads this field.
    #[serde(default)]
    pub authorisations: Vec<String>,
}

#[derive(Serialize, Deserialize, Default, Debug, PartialEq, Eq, Clone, JsonSchema)]
pub struct ConsoleRef {
    pub name: String,
}
