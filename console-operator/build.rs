use console_types::*;
use kube::CustomResourceExt;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/console.crate.dev_consoletemplates.yaml",
        serde_yaml::to_string(&ConsoleTemplate::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/console.crate.dev_consoles.yaml",
        serde_yaml::to_string(&Console::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/console.crate.dev_consoleauthorisations.yaml",
        serde_yaml::to_string(&ConsoleAuthorisation::crd()).unwrap(),
    )
    .unwrap();
}
