use std::process::Command;

// Stamp the binary with its build time (UTC) for `depot --version` and the
// startup banner. Falls back to "unknown" when `date` is unavailable so the
// build never fails over a version string.
fn main() {
    let stamp = Command::new("date")
        .args(["-u", "+%Y-%m-%dT%H:%M:%SZ"])
        .output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=DEPOT_BUILD_TIME={stamp}");
}
