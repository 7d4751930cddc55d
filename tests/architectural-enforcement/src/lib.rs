//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No sleeping in library or binary code; wait on channels and timers instead
//! - No panicking shortcuts (`unwrap`, `expect`) outside of tests
//! - Only the relay and its launcher may touch the network client
//!
//! The helpers here locate the workspace and hand tests the production part
//! of every source file, with `#[cfg(test)]` modules cut off.

use std::fs;
use std::path::{Path, PathBuf};

/// Source trees scanned by the enforcement tests
pub const PRODUCTION_DIRS: &[&str] = &["bridge/core/src", "bridge/cli/src"];

/// Root of the workspace, independent of the directory tests run from
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// One line of production code
#[derive(Debug, Clone)]
pub struct SourceLine {
    /// File path relative to the workspace root
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// The line with any trailing `//` comment removed
    pub code: String,
    /// The untouched line
    pub raw: String,
}

impl std::fmt::Display for SourceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.number, self.raw.trim())
    }
}

/// Every `.rs` file under `dir` (relative to the workspace root)
#[must_use]
pub fn rust_files(dir: &str) -> Vec<PathBuf> {
    let root = workspace_root();
    let path = root.join(dir);
    if !path.exists() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Production lines of one file: everything before the first `#[cfg(test)]`
#[must_use]
pub fn production_lines(path: &Path) -> Vec<SourceLine> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let relative = path
        .strip_prefix(workspace_root())
        .map_or_else(|_| path.to_path_buf(), Path::to_path_buf);

    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim_start();
            !trimmed.starts_with("//") && !trimmed.starts_with("///")
        })
        .map(|(idx, line)| SourceLine {
            path: relative.clone(),
            number: idx + 1,
            code: line.split("//").next().unwrap_or(line).to_string(),
            raw: line.to_string(),
        })
        .collect()
}

/// Production lines of every file in [`PRODUCTION_DIRS`] matching `predicate`
pub fn find_in_production(predicate: impl Fn(&SourceLine) -> bool) -> Vec<SourceLine> {
    PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| rust_files(dir))
        .flat_map(|file| production_lines(&file))
        .filter(|line| predicate(line))
        .collect()
}

/// Print violations and fail the test
///
/// # Panics
///
/// Panics when `violations` is not empty.
pub fn report(title: &str, violations: &[SourceLine], guidance: &[&str]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    if !guidance.is_empty() {
        eprintln!();
        for hint in guidance {
            eprintln!("  - {hint}");
        }
    }

    panic!("\nFound {} violation(s): {title}", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_root_holds_manifest() {
        assert!(workspace_root().join("Cargo.toml").exists());
    }

    #[test]
    fn test_production_dirs_exist() {
        for dir in PRODUCTION_DIRS {
            assert!(!rust_files(dir).is_empty(), "no sources under {dir}");
        }
    }

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let lib = workspace_root().join("tests/architectural-enforcement/src/lib.rs");
        let lines = production_lines(&lib);
        assert!(lines.iter().any(|l| l.code.contains("fn workspace_root")));
        assert!(!lines.iter().any(|l| l.code.contains("fn test_workspace_root")));
    }
}
