//! Common test utilities for CLI tests.

use std::io::Write;
use std::process::{Command, Output};

use tempfile::NamedTempFile;

/// Write `source` to a temporary `.arbor` file and run the CLI on it.
pub fn run_arbor(subcommand: &str, source: &str, flags: &[&str]) -> Output {
    let mut file = NamedTempFile::with_suffix(".arbor").expect("Failed to create temp file");
    file.write_all(source.as_bytes())
        .expect("Failed to write method body");

    Command::new(env!("CARGO_BIN_EXE_arbor"))
        .arg(subcommand)
        .arg(file.path())
        .args(flags)
        .env_remove("RUST_LOG")
        .env_remove("ARBOR_DISABLE_EQUALITY_FASTPATH")
        .output()
        .expect("Failed to execute arbor")
}

#[allow(dead_code)]
pub fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "arbor failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}
