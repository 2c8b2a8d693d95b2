//! Version command implementation.

use console::style;

/// Execute the version command.
pub fn execute() {
    let version = env!("CARGO_PKG_VERSION");

    println!(
        "{} {} - batch infrastructure for quantum molecular unfolding",
        style("Unfold").cyan().bold(),
        style(format!("v{version}")).yellow()
    );
    println!();
    println!("Components:");
    println!("  unfold-infra  Topology, cross-account image resolution, synthesis");
    println!("  unfold-cli    Command-line interface");
    println!();
    println!("License:    {}", style("Apache-2.0").dim());
}
