//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep methods. Work is driven by
//! stream events and deadlines (`sleep_until` on a computed instant), never
//! by polling.
//! **Exceptions**: Reconnect backoff delay, test code, test-support files

use std::path::Path;

use architectural_enforcement::{
    code_part, is_in_test_function, production_sources, read_lines, workspace_root, Violation,
    PRODUCTION_DIRS,
};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Reconnect backoff delay between connection attempts");
        eprintln!("  - Test code (#[test] / #[tokio::test] / #[cfg(test)] modules)");
        eprintln!("  - Deadlines via tokio::time::sleep_until");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - std::thread::sleep anywhere in async code");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep to 'wait' for events (await the channel!)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all sleep() calls in production code
fn find_sleep_violations() -> Vec<Violation> {
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for path in production_sources(&root.join(dir)) {
            check_file(&path, &mut violations);
        }
    }

    violations
}

fn check_file(path: &Path, violations: &mut Vec<Violation>) {
    let lines = read_lines(path);

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);

        if !(code.contains("::sleep(") || code.contains(".sleep(")) {
            continue;
        }

        if is_in_test_function(&lines, idx) {
            continue;
        }

        if code.contains("thread::sleep") {
            violations.push(Violation {
                path: path.to_path_buf(),
                line_number: idx + 1,
                line: line.trim().to_string(),
                reason: "Blocking thread sleep",
            });
            continue;
        }

        if is_backoff_context(&lines, idx) {
            continue;
        }

        violations.push(Violation {
            path: path.to_path_buf(),
            line_number: idx + 1,
            line: line.trim().to_string(),
            reason: "Sleep outside reconnect backoff",
        });
    }
}

/// Check if sleep waits out a computed backoff delay
fn is_backoff_context<S: AsRef<str>>(lines: &[S], current_idx: usize) -> bool {
    let context_range = current_idx.saturating_sub(20)..current_idx;

    let mut has_backoff_delay = false;
    let mut has_reconnect_context = false;

    for i in context_range {
        let line = lines[i].as_ref().to_lowercase();

        if line.contains("backoff.next_delay()") || line.contains("jittered_delay(") {
            has_backoff_delay = true;
        }

        if line.contains("reconnect") || line.contains("retry") || line.contains("attempt") {
            has_reconnect_context = true;
        }
    }

    has_backoff_delay && has_reconnect_context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_detection() {
        let code = [
            "let delay = self.backoff.next_delay();",
            "info!(attempt, \"Scheduling reconnect\");",
            "tokio::time::sleep(delay).await;",
        ];
        assert!(is_backoff_context(&code, 2));
    }

    #[test]
    fn test_polling_sleep_is_not_backoff() {
        let code = [
            "loop {",
            "    if ready() { break; }",
            "    tokio::time::sleep(Duration::from_millis(10)).await;",
            "}",
        ];
        assert!(!is_backoff_context(&code, 2));
    }
}
