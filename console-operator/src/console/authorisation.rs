//! Authorisation Gate: picks the rule governing a Console's command and
//! decides whether enough approvals have been recorded against its
//! companion ConsoleAuthorisation.

use super::diff::Diff;
use super::patterns;
use crate::util::MANAGER_NAME;
use crate::util::labels::sanitise_label_value;
use console_common::annotations;
use console_types::{AuthorisationRule, Console, ConsoleAuthorisation, ConsoleAuthorisationSpec, ConsoleRef, ConsoleTemplateSpec};
use kube::{Resource, ResourceExt, api::ObjectMeta};
use std::collections::BTreeMap;

/// Selects the rule governing `command`. `None` means the template
/// declares no authorisation rules at all, i.e. the gate is a no-op.
pub fn select_rule(template: &ConsoleTemplateSpec, command: &[String]) -> Option<AuthorisationRule> {
    if template.authorisation_rules.is_empty() {
        return None;
    }
    template
        .authorisation_rules
        .iter()
        .find(|rule| {
            patterns::is_well_formed(&rule.match_command_elements)
                && patterns::matches_command(&rule.match_command_elements, command)
        })
        .or(template.default_authorisation_rule.as_ref())
        .cloned()
}

/// `authorised = len(auth.authorisations) >= rule.authorisationsRequired`.
/// A `None` rule (no authorisation rules declared) is always authorised.
pub fn compute_authorised(rule: Option<&AuthorisationRule>, auth: Option<&ConsoleAuthorisationSpec>) -> bool {
    match rule {
        None => true,
        Some(rule) => {
            let granted = auth.map(|a| a.authorisations.len()).unwrap_or(0) as u32;
            granted >= rule.authorisations_required
        }
    }
}

fn console_labels(console: &Console) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "console-name".to_string(),
        sanitise_label_value(&console.name_any()),
    );
    labels.insert("user".to_string(), sanitise_label_value(&console.spec.user));
    labels
}

/// The ConsoleAuthorisation this Console should own, named identically to
/// it. `authorisations` starts empty; it is end-user-owned from here on.
pub fn build_authorisation(console: &Console) -> ConsoleAuthorisation {
    ConsoleAuthorisation {
        metadata: ObjectMeta {
            name: Some(console.name_any()),
            namespace: console.namespace(),
            owner_references: Some(vec![console.controller_owner_ref(&()).unwrap()]),
            labels: Some(console_labels(console)),
            annotations: Some(BTreeMap::from([(annotations::CREATED_BY.to_string(), MANAGER_NAME.to_string())])),
            ..Default::default()
        },
        spec: ConsoleAuthorisationSpec {
            console_ref: ConsoleRef { name: console.name_any() },
            authorisations: Vec::new(),
        },
        status: None,
    }
}

/// Compares only `spec.consoleRef` and `metadata.labels`; `authorisations`
/// is append-only and owned by end users via an external validator, so
/// the controller never touches it.
pub fn diff_authorisation(expected: &ConsoleAuthorisation, observed: &ConsoleAuthorisation) -> Diff<ConsoleAuthorisation> {
    let console_ref_changed = expected.spec.console_ref != observed.spec.console_ref;
    let labels_changed = expected.metadata.labels != observed.metadata.labels;
    if !console_ref_changed && !labels_changed {
        return Diff::None;
    }
    let mut patched = observed.clone();
    patched.spec.console_ref = expected.spec.console_ref.clone();
    patched.metadata.labels = expected.metadata.labels.clone();
    Diff::Update(patched)
}
