use crate::cli_test::{run, stdout_lines, write_input};

#[test]
fn test_disprove_reports_each_goal() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(
        dir.path(),
        "goals.txt",
        "// unsatisfiable\n!(min(x, 10) <= 10)\nx + 1 < x\n// satisfiable\nx < 5\n",
    );

    let output = run(&["disprove", input.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let lines: Vec<String> = stdout_lines(&output)
        .into_iter()
        .filter(|l| !l.starts_with("  implies"))
        .collect();
    assert_eq!(lines.len(), 3, "{:?}", lines);
    assert!(lines[0].ends_with(": disproved"), "{:?}", lines);
    assert!(lines[1].ends_with(": disproved"), "{:?}", lines);
    assert!(lines[2].ends_with(": not disproved"), "{:?}", lines);
}

#[test]
fn test_disprove_accepts_beam_width() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "goals.txt", "x < y && y < x\n");

    let output = run(&["disprove", input.to_str().unwrap(), "--beam-width", "1"]);
    assert!(output.status.success());
    assert_eq!(stdout_lines(&output).len(), 1);
}
