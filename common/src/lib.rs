pub mod shutdown;

pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}

pub fn signal_ready() {
    let Ok(path) = std::env::var("READY_FILE") else {
        return;
    };
    if let Err(e) = std::fs::write(&path, "ready") {
        eprintln!("failed to write readiness file {path}: {e}");
    }
}

/// Annotation keys written onto derived objects.
pub mod annotations {
    pub const CREATED_BY: &str = "console.crate.dev/created-by";
}
