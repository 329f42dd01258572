use std::env;
use std::process::Command;

fn main() {
    emit("BUILD_TIMESTAMP", chrono::Utc::now().format("%Y%m%d.%H%M%S").to_string());

    let hash = git(&["rev-parse", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let short: String = hash.chars().take(7).collect();
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
        .map(|status| !status.is_empty())
        .unwrap_or(false);
    emit("GIT_HASH", hash);
    emit("GIT_HASH_SHORT", if dirty { format!("{short}-dirty") } else { short });

    emit("TARGET_PLATFORM", format!("{}-{}", cfg_var("CARGO_CFG_TARGET_ARCH"), cfg_var("CARGO_CFG_TARGET_OS")));
    emit("BUILD_PROFILE", cfg_var("PROFILE"));

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
    println!("cargo:rerun-if-changed=build.rs");
}

fn emit(key: &str, value: String) {
    println!("cargo:rustc-env={key}={value}");
}

fn cfg_var(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| "unknown".to_string())
}

/// Trimmed stdout of a successful git invocation.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
}
