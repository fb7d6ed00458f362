//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async code in the streaming engine and CLI MUST NOT block the
//! runtime.
//! **Required**: Use `tokio::fs`, `tokio::net` and async `reqwest`, not
//! `std::fs`, `std::net` or `reqwest::blocking`, inside async functions.

use std::path::Path;

use architectural_enforcement::{
    code_part, is_in_async_function, is_in_test_function, production_sources, read_lines,
    workspace_root, Violation, PRODUCTION_DIRS,
};

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n❌ FORBIDDEN in async code:");
        eprintln!("  - std::fs::read_to_string(), std::fs::File");
        eprintln!("  - std::net::TcpStream");
        eprintln!("  - std::io::stdin() / std::io::stdout()");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Non-async functions (config loading, consumer callbacks)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in async code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all blocking I/O calls in async production code
fn find_blocking_io_violations() -> Vec<Violation> {
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for path in production_sources(&root.join(dir)) {
            check_file(&path, &mut violations);
        }
    }

    violations
}

const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::io::stdin()", "Blocking stdin in async"),
    ("std::io::stdout()", "Blocking stdout in async"),
    ("std::thread::sleep", "Blocking thread sleep"),
];

fn check_file(path: &Path, violations: &mut Vec<Violation>) {
    let lines = read_lines(path);

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);

        if code.contains("reqwest::blocking") {
            violations.push(Violation {
                path: path.to_path_buf(),
                line_number: idx + 1,
                line: line.trim().to_string(),
                reason: "Blocking HTTP client",
            });
            continue;
        }

        let Some((_, reason)) = BLOCKING_PATTERNS
            .iter()
            .find(|(pattern, _)| code.contains(pattern))
        else {
            continue;
        };

        if is_in_test_function(&lines, idx) || !is_in_async_function(&lines, idx) {
            continue;
        }

        violations.push(Violation {
            path: path.to_path_buf(),
            line_number: idx + 1,
            line: line.trim().to_string(),
            reason,
        });
    }
}
