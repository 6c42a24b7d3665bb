//! Stamps the binary with the source revision it was built from
//!
//! `RCPT_REVISION` comes from `git describe`, or from the environment of the
//! same name when building outside a checkout (release tarballs).

use std::env;
use std::process::Command;

fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=10"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let described = String::from_utf8(output.stdout).ok()?;
    let described = described.trim();
    (!described.is_empty()).then(|| described.to_string())
}

fn main() {
    println!("cargo:rerun-if-env-changed=RCPT_REVISION");
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/index");

    let revision = env::var("RCPT_REVISION")
        .ok()
        .filter(|r| !r.trim().is_empty())
        .or_else(git_describe)
        .unwrap_or_else(|| "unknown".to_string());
    let built_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=RCPT_REVISION={}", revision);
    println!("cargo:rustc-env=RCPT_BUILT_AT={}", built_at);
    println!("cargo:rustc-env=RCPT_PROFILE={}", profile);
}
