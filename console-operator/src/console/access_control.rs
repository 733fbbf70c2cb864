//! Access-Control Materialiser: the narrow Role+RoleBinding pair granting
//! attach rights on a Console's pod, and the second pair granting the
//! authorisation rule's subjects rights to patch its ConsoleAuthorisation.

use super::diff::Diff;
use crate::util::MANAGER_NAME;
use console_common::annotations;
use console_types::Console;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use kube::{Resource, ResourceExt, api::ObjectMeta};
use std::collections::BTreeMap;

fn owned_metadata(console: &Console, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: console.namespace(),
        owner_references: Some(vec![console.controller_owner_ref(&()).unwrap()]),
        annotations: Some(BTreeMap::from([(annotations::CREATED_BY.to_string(), MANAGER_NAME.to_string())])),
        ..Default::default()
    }
}

/// The Role scoped to exactly one pod name, granting exec/attach/log/get/
/// delete. Built only once `status.podName` is known — granting rights on
/// a not-yet-existing name risks a later pod reusing it.
pub fn build_pod_role(console: &Console, pod_name: &str) -> Role {
    Role {
        metadata: owned_metadata(console, console.name_any()),
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec!["".to_string()]),
                resources: Some(vec!["pods/exec".to_string()]),
                verbs: vec!["create".to_string()],
                resource_names: Some(vec![pod_name.to_string()]),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["".to_string()]),
                resources: Some(vec!["pods/attach".to_string()]),
                verbs: vec!["create".to_string()],
                resource_names: Some(vec![pod_name.to_string()]),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["".to_string()]),
                resources: Some(vec!["pods/log".to_string()]),
                verbs: vec!["get".to_string()],
                resource_names: Some(vec![pod_name.to_string()]),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["".to_string()]),
                resources: Some(vec!["pods".to_string()]),
                verbs: vec!["get".to_string(), "delete".to_string()],
                resource_names: Some(vec![pod_name.to_string()]),
                ..Default::default()
            },
        ]),
    }
}

/// Binds the pod Role to the requesting user plus the template's
/// always-granted attach subjects.
pub fn build_pod_role_binding(console: &Console, additional_attach_subjects: &[Subject]) -> RoleBinding {
    let mut subjects: Vec<Subject> = Vec::new();
    if !console.spec.user.is_empty() {
        subjects.push(Subject {
            kind: "User".to_string(),
            name: console.spec.user.clone(),
            ..Default::default()
        });
    }
    subjects.extend(additional_attach_subjects.iter().cloned());
    RoleBinding {
        metadata: owned_metadata(console, console.name_any()),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: console.name_any(),
        },
        subjects: Some(subjects),
    }
}

fn authorisation_name(console: &Console) -> String {
    format!("{}-authorisation", console.name_any())
}

/// The Role granting the designated authorisers the right to patch this
/// Console's ConsoleAuthorisation.
pub fn build_authorisation_role(console: &Console) -> Role {
    Role {
        metadata: owned_metadata(console, authorisation_name(console)),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["console.crate.dev".to_string()]),
            resources: Some(vec!["consoleauthorisations".to_string()]),
            verbs: vec!["get".to_string(), "patch".to_string(), "update".to_string()],
            resource_names: Some(vec![console.name_any()]),
            ..Default::default()
        }]),
    }
}

pub fn build_authorisation_role_binding(console: &Console, subjects: &[Subject]) -> RoleBinding {
    RoleBinding {
        metadata: owned_metadata(console, authorisation_name(console)),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: authorisation_name(console),
        },
        subjects: Some(subjects.to_vec()),
    }
}

pub fn diff_role(expected: &Role, observed: &Role) -> Diff<Role> {
    if expected.rules == observed.rules {
        return Diff::None;
    }
    let mut patched = observed.clone();
    patched.rules = expected.rules.clone();
    Diff::Update(patched)
}

fn normalised(subjects: &[Subject]) -> Vec<(String, String, Option<String>)> {
    let mut v: Vec<_> = subjects
        .iter()
        .map(|s| (s.kind.clone(), s.name.clone(), s.namespace.clone()))
        .collect();
    v.sort();
    v
}

pub fn diff_role_binding(expected: &RoleBinding, observed: &RoleBinding) -> Diff<RoleBinding> {
    let role_ref_changed = expected.role_ref != observed.role_ref;
    let subjects_changed = normalised(expected.subjects.as_deref().unwrap_or_default())
        != normalised(observed.subjects.as_deref().unwrap_or_default());
    if !role_ref_changed && !subjects_changed {
        return Diff::None;
    }
    let mut patched = observed.clone();
    patched.role_ref = expected.role_ref.clone();
    patched.subjects = expected.subjects.clone();
    Diff::Update(patched)
}
