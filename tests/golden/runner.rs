use scriptdesk_common::delta::{Delta, Op};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct GoldenCase {
    name: String,
    before: Delta,
    after: Delta,
    expected_ops: Vec<Op>,
}

#[test]
fn diff_golden_cases() {
    let cases_dir = golden_cases_dir();
    let cases = load_cases(&cases_dir);

    assert!(
        !cases.is_empty(),
        "no golden cases found in {}",
        cases_dir.display()
    );

    let mut failures = Vec::new();
    for case in cases {
        if let Err(message) = run_case(&case) {
            failures.push(message);
        }
    }

    if !failures.is_empty() {
        panic!(
            "{} golden case(s) failed:\n\n{}",
            failures.len(),
            failures.join("\n\n")
        );
    }
}

fn golden_cases_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../tests/golden/cases")
}

fn load_cases(cases_dir: &Path) -> Vec<GoldenCase> {
    let mut case_dirs: Vec<PathBuf> = fs::read_dir(cases_dir)
        .unwrap_or_else(|error| panic!("failed to read {}: {error}", cases_dir.display()))
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if path.is_dir() { Some(path) } else { None }
        })
        .collect();
    case_dirs.sort();
    case_dirs.into_iter().map(load_case).collect()
}

fn load_case(case_dir: PathBuf) -> GoldenCase {
    let name = case_dir
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("<unnamed-case>")
        .to_owned();

    let before_path = case_dir.join("before.json");
    let after_path = case_dir.join("after.json");
    let expected_path = case_dir.join("expected_diff.json");

    let before = parse_delta(&before_path);
    let after = parse_delta(&after_path);
    let expected_ops = serde_json::from_str::<Vec<Op>>(&read_required(&expected_path))
        .unwrap_or_else(|error| {
            panic!("failed to parse expected ops in {}: {error}", expected_path.display())
        });

    GoldenCase { name, before, after, expected_ops }
}

fn run_case(case: &GoldenCase) -> Result<(), String> {
    let patch = case
        .before
        .diff(&case.after)
        .map_err(|error| format!("case `{}` diff failed: {error}", case.name))?;

    let composed = case.before.compose(&patch);
    if composed != case.after {
        return Err(format!(
            "case `{}` composed document mismatch.\nexpected: {}\nactual:   {}",
            case.name,
            case.after.to_json(),
            composed.to_json()
        ));
    }

    if patch.ops() != case.expected_ops.as_slice() {
        return Err(format_ops_mismatch(&case.name, &case.expected_ops, patch.ops()));
    }

    Ok(())
}

fn format_ops_mismatch(case_name: &str, expected: &[Op], actual: &[Op]) -> String {
    let expected_rendered = render_ops(expected);
    let actual_rendered = render_ops(actual);
    let max_len = expected_rendered.len().max(actual_rendered.len());

    let mut diff_lines = Vec::with_capacity(max_len);
    for index in 0..max_len {
        let expected_line = expected_rendered.get(index).map(String::as_str).unwrap_or("<none>");
        let actual_line = actual_rendered.get(index).map(String::as_str).unwrap_or("<none>");
        let marker = if expected_line == actual_line { " " } else { "!" };
        diff_lines.push(format!(
            "{marker} [{index}] expected: {expected_line}\n      actual:   {actual_line}"
        ));
    }

    format!(
        "case `{case_name}` diff ops mismatch.\nExpected ops:\n{}\nActual ops:\n{}\nDiff:\n{}",
        expected_rendered.join("\n"),
        actual_rendered.join("\n"),
        diff_lines.join("\n")
    )
}

fn render_ops(ops: &[Op]) -> Vec<String> {
    ops.iter()
        .map(|op| serde_json::to_string(op).unwrap_or_else(|_| format!("{op:?}")))
        .collect()
}

fn parse_delta(path: &Path) -> Delta {
    serde_json::from_str(&read_required(path))
        .unwrap_or_else(|error| panic!("failed to parse document in {}: {error}", path.display()))
}

fn read_required(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|error| panic!("failed to read {}: {error}", path.display()))
}
