use std::env;
use std::process::Command;
use time::OffsetDateTime;

/// Short commit id for dev builds, when built from a git checkout.
fn git_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!commit.is_empty()).then_some(commit)
}

fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=.git/HEAD");

    // Reproducible builds pin the year through SOURCE_DATE_EPOCH
    let build_year = env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|raw| raw.parse::<i64>().ok())
        .and_then(|epoch| OffsetDateTime::from_unix_timestamp(epoch).ok())
        .map(|dt| dt.year())
        .unwrap_or_else(|| OffsetDateTime::now_utc().year());

    let version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    let release = env::var("PROFILE").is_ok_and(|p| p == "release");
    let display = match (release, git_commit()) {
        (false, Some(commit)) => format!("{version}-dev+{commit}"),
        (false, None) => format!("{version}-dev"),
        (true, _) => version,
    };

    println!("cargo:rustc-env=LDTRACE_BUILD_YEAR={build_year}");
    println!("cargo:rustc-env=LDTRACE_VERSION_DISPLAY={display}");
}
