//! Given a Console and its resolved ConsoleTemplate, derives the
//! immutable execution descriptor the rest of the reconciler acts on:
//! effective command, timeout, and TTLs.

use crate::util::Error;
use console_types::{Console, ConsoleTemplate};
use kube::{Api, Client, ResourceExt};

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedExecution {
    pub command: Vec<String>,
    pub timeout_seconds: i64,
    pub ttl_before_running: i64,
    pub ttl_after_finished: i64,
    /// Set when `console.spec.timeoutSeconds` exceeded the template's
    /// ceiling and was clamped down; the caller emits `InvalidSpecification`.
    pub timeout_clamped: bool,
}

/// Fetches the ConsoleTemplate referenced by `console`. Returns `Ok(None)`
/// on a 404 so the caller can treat a missing template as the terminal
/// `TemplateMissing` condition rather than a retryable error.
pub async fn fetch_template(
    client: Client,
    namespace: &str,
    name: &str,
) -> Result<Option<ConsoleTemplate>, Error> {
    let api: Api<ConsoleTemplate> = Api::namespaced(client, namespace);
    match api.get(name).await {
        Ok(template) => Ok(Some(template)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Pure resolution of the effective execution descriptor. No I/O.
pub fn resolve(console: &Console, template: &ConsoleTemplate) -> ResolvedExecution {
    let command = if !console.spec.command.is_empty() {
        console.spec.command.clone()
    } else {
        default_command(template)
    };

    let (timeout_seconds, timeout_clamped) = if console.spec.timeout_seconds == 0 {
        (template.spec.default_timeout_seconds, false)
    } else if console.spec.timeout_seconds > template.spec.max_timeout_seconds {
        (template.spec.max_timeout_seconds, true)
    } else {
        (console.spec.timeout_seconds, false)
    };

    let ttl_before_running = console
        .spec
        .ttl_seconds_before_running
        .unwrap_or_else(|| template.spec.ttl_before_running());
    let ttl_after_finished = console
        .spec
        .ttl_seconds_after_finished
        .unwrap_or_else(|| template.spec.ttl_after_finished());

    ResolvedExecution {
        command,
        timeout_seconds,
        ttl_before_running,
        ttl_after_finished,
        timeout_clamped,
    }
}

/// The template's default command: first container's `command ++ args`.
/// A template declaring more than one container only ever uses the first;
/// callers separately warn when that's the case.
fn default_command(template: &ConsoleTemplate) -> Vec<String> {
    let Some(containers) = template.spec.pod_template.spec.as_ref().map(|s| &s.containers) else {
        return Vec::new();
    };
    let Some(first) = containers.first() else {
        return Vec::new();
    };
    let mut out = first.command.clone().unwrap_or_default();
    out.extend(first.args.clone().unwrap_or_default());
    out
}

/// True when the template declares more than one container; the execution
/// materialiser only ever instantiates the first.
pub fn has_extra_containers(template: &ConsoleTemplate) -> bool {
    template
        .spec
        .pod_template
        .spec
        .as_ref()
        .is_some_and(|s| s.containers.len() > 1)
}

pub fn instance_name(console: &Console) -> &str {
    console.meta().name.as_deref().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use console_types::{ConsoleSpec, ConsoleTemplateRef, ConsoleTemplateSpec};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};

    fn template(default_timeout: i64, max_timeout: i64, command: Vec<&str>) -> ConsoleTemplate {
        ConsoleTemplate::new(
            "t",
            ConsoleTemplateSpec {
                pod_template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "console".to_string(),
                            command: Some(command.iter().map(|s| s.to_string()).collect()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                default_timeout_seconds: default_timeout,
                max_timeout_seconds: max_timeout,
                ..Default::default()
            },
        )
    }

    fn console(timeout_seconds: i64, command: Vec<&str>) -> Console {
        Console::new(
            "console-0",
            ConsoleSpec {
                user: "u1".to_string(),
                command: command.iter().map(|s| s.to_string()).collect(),
                console_template_ref: ConsoleTemplateRef { name: "t".to_string() },
                timeout_seconds,
                ..Default::default()
            },
        )
    }

    #[test]
    fn clamps_timeout_to_max_and_flags_it() {
        let t = template(600, 7200, vec!["sleep", "1"]);
        let c = console(7201, vec![]);
        let r = resolve(&c, &t);
        assert_eq!(r.timeout_seconds, 7200);
        assert!(r.timeout_clamped);
    }

    #[test]
    fn zero_timeout_uses_template_default_without_clamp_flag() {
        let t = template(600, 7200, vec!["sleep", "1"]);
        let c = console(0, vec![]);
        let r = resolve(&c, &t);
        assert_eq!(r.timeout_seconds, 600);
        assert!(!r.timeout_clamped);
    }

    #[test]
    fn in_range_timeout_passes_through() {
        let t = template(600, 7200, vec!["sleep", "1"]);
        let c = console(900, vec![]);
        let r = resolve(&c, &t);
        assert_eq!(r.timeout_seconds, 900);
        assert!(!r.timeout_clamped);
    }

    #[test]
    fn console_command_overrides_template_default() {
        let t = template(600, 7200, vec!["sleep", "1"]);
        let c = console(600, vec!["sleep", "666"]);
        let r = resolve(&c, &t);
        assert_eq!(r.command, vec!["sleep".to_string(), "666".to_string()]);
    }

    #[test]
    fn empty_console_command_falls_back_to_template_default() {
        let t = template(600, 7200, vec!["sleep", "1"]);
        let c = console(600, vec![]);
        let r = resolve(&c, &t);
        assert_eq!(r.command, vec!["sleep".to_string(), "1".to_string()]);
    }

    #[test]
    fn ttl_falls_back_through_template_then_system_default() {
        let t = template(600, 7200, vec!["sleep", "1"]);
        let c = console(600, vec![]);
        let r = resolve(&c, &t);
        assert_eq!(r.ttl_before_running, 3600);
        assert_eq!(r.ttl_after_finished, 24 * 3600);
    }
}
