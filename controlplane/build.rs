//! Stamps the binary with the commit it was built from.
//!
//! CI passes `BERTH_COMMIT` explicitly; local builds fall back to git.

use std::env;
use std::process::Command;

use chrono::{SecondsFormat, Utc};

fn main() {
    println!("cargo:rerun-if-env-changed=BERTH_COMMIT");
    println!("cargo:rerun-if-changed=../.git/HEAD");

    let commit = env::var("BERTH_COMMIT")
        .ok()
        .filter(|commit| !commit.trim().is_empty())
        .or_else(git_commit)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=BERTH_COMMIT={}", commit.trim());
    println!(
        "cargo:rustc-env=BERTH_BUILT_AT={}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    );
}

fn git_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}
