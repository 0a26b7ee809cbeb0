//! Integration tests driving the sweeplab binary

use std::path::Path;
use std::process::{Command, Output};

use tempfile::tempdir;

use sweeplab_store::JsonBackend;

fn sweeplab(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sweeplab"))
        .args(args)
        .output()
        .expect("binary runs")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// A notebook with two populated-ish result sets, 'alpha' current.
fn seed_notebook(path: &Path) {
    let mut nb = JsonBackend::open(path, Some("seeded notebook")).unwrap();
    nb.add_result_set("alpha", Some("first")).unwrap();
    nb.add_result_set("beta", Some("second")).unwrap();
    nb.select("alpha").unwrap();
    nb.commit().unwrap();
}

#[test]
fn test_show_long_and_short() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nb.json");
    seed_notebook(&path);
    let path = path.to_str().unwrap();

    let long = sweeplab(&["show", path]);
    assert!(long.status.success());
    let text = stdout(&long);
    assert!(text.contains("seeded notebook"));
    assert!(text.contains("* alpha"));
    assert!(text.contains("beta"));

    let short = sweeplab(&["show", path, "--short"]);
    assert!(short.status.success());
    let short_stdout = stdout(&short);
    let tags: Vec<&str> = short_stdout.lines().collect();
    assert_eq!(tags, vec!["alpha", "beta", "default"]);
}

#[test]
fn test_show_missing_notebook_fails() {
    let output = sweeplab(&["show", "/nonexistent/nb.json"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!String::from_utf8_lossy(&output.stderr).is_empty());
}

#[test]
fn test_select_prints_and_changes_current() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nb.json");
    seed_notebook(&path);
    let path = path.to_str().unwrap();

    let current = sweeplab(&["select", path]);
    assert!(current.status.success());
    assert_eq!(stdout(&current).trim(), "alpha");

    let change = sweeplab(&["select", &format!("{path}:beta")]);
    assert!(change.status.success());
    let nb = JsonBackend::open(path, None).unwrap();
    assert_eq!(nb.current_tag(), "beta");

    let missing = sweeplab(&["select", &format!("{path}:gamma")]);
    assert_eq!(missing.status.code(), Some(1));
}

#[test]
fn test_copy_result_sets() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src.json");
    let dest = dir.path().join("dest.json");
    seed_notebook(&src);
    let src = src.to_str().unwrap();
    let dest = dest.to_str().unwrap();

    let copy = sweeplab(&["copy", &format!("{src}:alpha=renamed"), &format!("{src}:beta"), dest]);
    assert!(copy.status.success(), "{}", String::from_utf8_lossy(&copy.stderr));

    let nb = JsonBackend::open(dest, None).unwrap();
    assert!(nb.contains("renamed"));
    assert!(nb.contains("beta"));
    assert_eq!(nb.result_set("renamed").unwrap().description(), "first");

    // tag clashes in the destination are refused
    let clash = sweeplab(&["copy", &format!("{src}:beta"), dest]);
    assert_eq!(clash.status.code(), Some(1));
}

#[test]
fn test_copy_refuses_locked_destination() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src.json");
    let dest = dir.path().join("dest.json");
    seed_notebook(&src);
    {
        let mut nb = JsonBackend::open(&dest, None).unwrap();
        nb.finish(true).unwrap();
    }

    let copy = sweeplab(&[
        "copy",
        &format!("{}:alpha", src.to_str().unwrap()),
        dest.to_str().unwrap(),
    ]);
    assert_eq!(copy.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&copy.stderr).contains("locked"));
}

#[test]
fn test_remove_result_set() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nb.json");
    seed_notebook(&path);
    let path = path.to_str().unwrap();

    // -n previews without changing anything
    let preview = sweeplab(&["remove", "-n", &format!("{path}:beta")]);
    assert!(preview.status.success());
    assert!(JsonBackend::open(path, None).unwrap().contains("beta"));

    let remove = sweeplab(&["remove", &format!("{path}:beta")]);
    assert!(remove.status.success());
    assert!(!JsonBackend::open(path, None).unwrap().contains("beta"));

    // the default result set can't be removed
    let default = sweeplab(&["remove", &format!("{path}:default")]);
    assert_eq!(default.status.code(), Some(1));
}
