use crate::cli_test::{run, stdout_lines, write_input};

const RULES: &str = "\
# mined rules
rewrite((x + 3) - x, 3)
rewrite((x + y) - x, y)
rewrite(min(x, y) - min(x, y), 0)
rewrite(x - x, 0)
rewrite(x*2 - x, x)
";

#[test]
fn test_filter_rules_without_checking() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "rules.txt", RULES);
    let out_dir = dir.path().join("out");

    let output = run(&[
        "filter-rules",
        input.to_str().unwrap(),
        out_dir.to_str().unwrap(),
        "--no-check",
    ]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let lines = stdout_lines(&output);
    assert_eq!(lines.len(), 3, "{:?}", lines);
    assert!(lines.contains(&"rewrite(x - x, 0)".to_string()), "{:?}", lines);
    assert!(lines.iter().all(|l| !l.contains("min(")), "{:?}", lines);

    let sub = std::fs::read_to_string(out_dir.join("Simplify_Sub.inc")).unwrap();
    assert!(sub.contains("rewrite(x - x, 0)"), "{}", sub);
    let mul = std::fs::read_to_string(out_dir.join("Simplify_Mul.inc")).unwrap();
    assert_eq!(mul.trim(), "false");
}

#[test]
fn test_filter_rules_rejects_non_rules() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "rules.txt", "x + y\n");
    let out_dir = dir.path().join("out");

    let output = run(&[
        "filter-rules",
        input.to_str().unwrap(),
        out_dir.to_str().unwrap(),
        "--no-check",
    ]);
    assert!(!output.status.success());
}
