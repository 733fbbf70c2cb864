//! Command-pattern matching used by the authorisation gate to select an
//! `AuthorisationRule` by comparing its `matchCommandElements` against the
//! Console's effective command.

/// Returns whether `pattern` accepts `command`. `*` matches exactly one
/// element; `**` — legal only as the pattern's final element — matches
/// zero or more trailing elements. A pattern longer than the command
/// never matches (a `**` pattern "ending" at the comparison point still
/// needs every element up to it to be present).
pub fn matches_command(pattern: &[String], command: &[String]) -> bool {
    if pattern.len() > command.len() {
        return false;
    }
    for (i, elem) in pattern.iter().enumerate() {
        if elem == "**" {
            // Only legal as the final element; callers are expected to
            // validate this ahead of time, but we still honour it
            // positionally here rather than panic.
            return i == pattern.len() - 1;
        }
        if elem == "*" {
            continue;
        }
        if command.get(i) != Some(elem) {
            return false;
        }
    }
    pattern.len() == command.len()
}

/// A pattern is well-formed if `**` appears at most once and only as the
/// final element.
pub fn is_well_formed(pattern: &[String]) -> bool {
    match pattern.iter().position(|e| e == "**") {
        Some(idx) => idx == pattern.len() - 1,
        None => true,
    }
}
