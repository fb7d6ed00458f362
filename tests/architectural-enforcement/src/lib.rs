//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the tests in `tests/`:
//! - No sleep() calls in production code outside reconnect backoff
//! - No blocking I/O inside async functions
//!
//! The scanners are line based. They are meant to catch regressions early,
//! not to replace review.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees checked by every rule, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["tokenflow/core/src", "tokenflow/cli/src"];

/// Files that exist only to support tests
pub const TEST_SUPPORT_FILES: &[&str] = &["testing.rs"];

/// A rule violation at a source location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: PathBuf,
    pub line_number: usize,
    pub line: String,
    pub reason: &'static str,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line_number,
            self.reason,
            self.line
        )
    }
}

/// Workspace root, resolved from this crate's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Every `.rs` file under `dir`, skipping test-support files
pub fn production_sources(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }

    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("rs"))
        .filter(|p| {
            let name = p.file_name().and_then(|s| s.to_str()).unwrap_or_default();
            !TEST_SUPPORT_FILES.contains(&name)
        })
        .collect()
}

/// Read a source file into lines (empty on read failure)
pub fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|c| c.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Strip a trailing `//` comment
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Index of the first line of the `#[cfg(test)]` module, if any
///
/// Everything after it is test code.
pub fn test_module_start<S: AsRef<str>>(lines: &[S]) -> Option<usize> {
    lines
        .iter()
        .position(|l| l.as_ref().trim().starts_with("#[cfg(test)]"))
}

/// Check if line is inside a test function
pub fn is_in_test_function<S: AsRef<str>>(lines: &[S], current_idx: usize) -> bool {
    if test_module_start(lines).is_some_and(|start| current_idx > start) {
        return true;
    }

    for i in (0..current_idx).rev() {
        let line = lines[i].as_ref().trim();

        if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
            return true;
        }

        if is_fn_line(line) && !lines_above_have_test_marker(lines, i) {
            return false;
        }

        // Stop at module boundaries
        if line.starts_with("mod ") || line.starts_with("impl ") {
            return false;
        }
    }
    false
}

fn lines_above_have_test_marker<S: AsRef<str>>(lines: &[S], fn_idx: usize) -> bool {
    fn_idx
        .checked_sub(1)
        .map(|i| lines[i].as_ref().trim())
        .is_some_and(|l| l.starts_with("#[test]") || l.starts_with("#[tokio::test"))
}

fn is_fn_line(line: &str) -> bool {
    line.starts_with("fn ")
        || line.starts_with("pub fn ")
        || line.starts_with("pub(crate) fn ")
        || line.starts_with("async fn ")
        || line.starts_with("pub async fn ")
        || line.starts_with("pub(crate) async fn ")
}

/// Check if line is inside an async function or async block
pub fn is_in_async_function<S: AsRef<str>>(lines: &[S], current_idx: usize) -> bool {
    for i in (0..current_idx).rev() {
        let line = lines[i].as_ref().trim();

        if line.contains("async fn ") || line.contains("async move {") {
            return true;
        }

        if is_fn_line(line) {
            return false;
        }

        // Stop at module/impl boundaries
        if line.starts_with("mod ") || (line.starts_with("impl") && line.contains('{')) {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_function_detection() {
        let code = [
            "async fn bad_function() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
        ];
        assert!(is_in_async_function(&code, 1));

        let code = [
            "fn load() {",
            "    let contents = std::fs::read_to_string(\"config.toml\")?;",
            "}",
        ];
        assert!(!is_in_async_function(&code, 1));
    }

    #[test]
    fn test_spawned_block_is_async() {
        let code = [
            "pub fn spawn_reader() {",
            "    tokio::spawn(async move {",
            "        std::io::stdin().read_line(&mut buf);",
            "    });",
            "}",
        ];
        assert!(is_in_async_function(&code, 2));
    }

    #[test]
    fn test_test_function_detection() {
        let code = [
            "#[tokio::test]",
            "async fn test_something() {",
            "    tokio::time::sleep(Duration::from_millis(5)).await;",
            "}",
        ];
        assert!(is_in_test_function(&code, 2));

        let code = [
            "pub async fn run() {",
            "    tokio::time::sleep(Duration::from_millis(5)).await;",
            "}",
        ];
        assert!(!is_in_test_function(&code, 1));
    }

    #[test]
    fn test_cfg_test_module_counts_as_test_code() {
        let code = [
            "fn production() {}",
            "#[cfg(test)]",
            "mod tests {",
            "    fn helper() { std::thread::sleep(d); }",
            "}",
        ];
        assert!(!is_in_test_function(&code, 0));
        assert!(is_in_test_function(&code, 3));
    }

    #[test]
    fn test_production_sources_skip_support_files() {
        let root = workspace_root();
        let files = production_sources(&root.join("tokenflow/core/src"));
        assert!(!files.is_empty());
        assert!(files.iter().all(|p| !p.ends_with("testing.rs")));
    }
}
