// Reject lint-suppression attributes ("#[" + "allow" + ...) anywhere in applycore sources.
// Runs on every build so that a suppression cannot slip in through a dependent crate either.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=src");
    println!("cargo:rerun-if-env-changed=CHECK_NO_ALLOW");

    // CHECK_NO_ALLOW=0 disables the scan.
    if env::var("CHECK_NO_ALLOW").is_ok_and(|v| v == "0") {
        return;
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("manifest dir"));
    let mut violations = Vec::new();
    for relative in ["src", "tests", "benches"] {
        let path = manifest_dir.join(relative);
        if path.exists() {
            scan_path(&path, &mut violations);
        }
    }

    if violations.is_empty() {
        return;
    }

    eprintln!("ERROR: disallowed allow-attributes detected in applycore:");
    for (file, line, content) in violations {
        eprintln!("  {}:{}: {}", file.display(), line, content.trim());
    }
    panic!("lint suppression attributes are forbidden");
}

fn scan_path(path: &Path, violations: &mut Vec<(PathBuf, usize, String)>) {
    const IGNORED_DIRS: [&str; 2] = ["target", ".git"];

    if path.is_dir() {
        if IGNORED_DIRS.iter().any(|&d| path.ends_with(d)) {
            return;
        }
        for entry in fs::read_dir(path).expect("read dir") {
            let entry = entry.expect("dir entry");
            scan_path(&entry.path(), violations);
        }
        return;
    }

    if path.extension().map_or(true, |ext| ext != "rs") {
        return;
    }

    if let Ok(content) = fs::read_to_string(path) {
        let needles = [concat!("#[", "allow"), concat!("#![", "allow")];
        for (idx, line) in content.lines().enumerate() {
            if needles.iter().any(|needle| line.contains(needle)) {
                violations.push((path.to_path_buf(), idx + 1, line.to_string()));
            }
        }
    }
}
