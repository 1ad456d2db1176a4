use std::process::Command;

/// Short commit hash of the checkout being built, if git can tell us
fn git_short_sha() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8(output.stdout).ok()?;
    Some(sha.trim().to_string()).filter(|s| !s.is_empty())
}

fn main() {
    println!("cargo:rustc-env=VERSION={}", env!("CARGO_PKG_VERSION"));

    let sha = std::env::var("GIT_SHA")
        .ok()
        .or_else(git_short_sha)
        .unwrap_or_else(|| "dev".to_string());
    println!("cargo:rustc-env=SHA={}", sha);

    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-env-changed=GIT_SHA");
}
