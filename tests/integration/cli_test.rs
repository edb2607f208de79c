use std::path::{Path, PathBuf};
use std::process::{Command, Output};

pub fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_term_superopt"))
}

/// Write `contents` to `name` inside `dir` and return the path
pub fn write_input(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

pub fn run(args: &[&str]) -> Output {
    Command::new(binary())
        .args(args)
        .args(["-j", "2"])
        .output()
        .expect("Failed to execute term_superopt")
}

pub fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_no_arguments_prints_help() {
    let output = Command::new(binary()).output().expect("Failed to execute term_superopt");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("find-rules"), "help should list subcommands: {}", stderr);
}

#[test]
fn test_parse_error_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "bad.txt", "x + * y\n");

    let output = run(&["disprove", input.to_str().unwrap()]);
    assert!(!output.status.success(), "a malformed term should fail the run");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("reading terms"), "stderr: {}", stderr);
}

#[test]
fn test_missing_input_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.txt");

    let output = run(&["disprove", missing.to_str().unwrap()]);
    assert!(!output.status.success());
}

#[test]
fn test_unknown_solver_reports_failures() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "terms.txt", "# one term\nx*y + 1\n");

    let output = run(&[
        "simplify",
        input.to_str().unwrap(),
        "--solver",
        "no-such-solver-binary",
        "--max-size",
        "1",
    ]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let lines = stdout_lines(&output);
    assert_eq!(lines.len(), 1, "{:?}", lines);
    assert!(lines[0].starts_with("# failed: "), "{:?}", lines);
}

#[test]
fn test_interval_bound_is_labelled() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "terms.txt", "x*y\n");

    let output = run(&[
        "bound",
        input.to_str().unwrap(),
        "--solver",
        "no-such-solver-binary",
        "--max-size",
        "1",
    ]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let lines = stdout_lines(&output);
    assert_eq!(lines.len(), 1, "{:?}", lines);
    assert!(lines[0].starts_with("upper bound of x*y (interval): "), "{:?}", lines);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("interval arithmetic"), "stderr: {}", stderr);
}
