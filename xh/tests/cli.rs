//! End-to-end runs of harness files through the library and the binary.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;
use xh::HarnessFile;
use xh::summary::TestCounter;
use xh_common::{HarnessConfig, Project};

const SUITE: &str = r#"
[harness]
name = "suite"
results_dir = "out"

[properties]
greeting = "hello"

[[task]]
type = "testgroup"
name = "g"
tasks = [
    { type = "testcase", name = "ok", owner = "qa", tasks = [
        { type = "echo", message = "${greeting} world" },
        { type = "assert", condition = { type = "property-equals", name = "greeting", value = "hello" } },
    ] },
    { type = "testcase", name = "skipped", tasks = [
        { type = "skip", unless_set = "db.host" },
    ] },
    { type = "testcase", name = "broken", tasks = [
        { type = "fail", message = "boom" },
    ] },
]
"#;

fn write_suite(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("suite.toml");
    fs::write(&path, text).unwrap();
    path
}

fn result_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_library_run_counts_tests() {
    let dir = TempDir::new().unwrap();
    let path = write_suite(dir.path(), SUITE);

    let file = HarnessFile::load(&path).unwrap();
    let mut config = HarnessConfig::default();
    file.harness.apply(&mut config);
    let harness = file.build(file.name_or("x")).unwrap();

    let project = Arc::new(Project::new("suite", dir.path()));
    for (key, value) in &file.properties {
        project.set_property(key, value);
    }
    let counter = Arc::new(TestCounter::default());
    project.add_build_listener(counter.clone());

    let err = harness.run(project, config).unwrap_err();
    assert!(!err.is_skip() && !err.is_warning(), "{err:?}");
    assert!(err.message_chain().contains("Testgroup g failed"), "{}", err.message_chain());

    let counts = counter.counts();
    assert_eq!((counts.passed, counts.failed, counts.skipped), (1, 1, 1));

    let files = result_files(&dir.path().join("out"));
    assert!(files.contains(&"TEST_g_ok.xml".to_string()), "{files:?}");
    assert!(files.contains(&"GROUP_g.xml".to_string()), "{files:?}");
    assert!(files.contains(&"XHARNESS_suite.xml".to_string()), "{files:?}");
}

#[cfg(unix)]
#[test]
fn test_binary_run_with_pattern_passes() {
    let dir = TempDir::new().unwrap();
    let path = write_suite(dir.path(), SUITE);
    let results = dir.path().join("selected");

    let output = Command::new(env!("CARGO_BIN_EXE_xh"))
        .arg("run")
        .arg(&path)
        .arg("--pattern")
        .arg("g/ok")
        .arg("--results")
        .arg(&results)
        .arg("--json")
        .env_remove("RUST_LOG")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["harness"], "suite");
    assert_eq!(summary["passed"], true);
    assert_eq!(summary["tests"]["passed"], 1);
    assert_eq!(summary["tests"]["failed"], 0);

    let files = result_files(&results);
    assert!(!files.iter().any(|f| f.contains("broken")), "{files:?}");
}

#[cfg(unix)]
#[test]
fn test_binary_run_failure_exit_code() {
    let dir = TempDir::new().unwrap();
    let path = write_suite(dir.path(), SUITE);

    let output = Command::new(env!("CARGO_BIN_EXE_xh"))
        .arg("run")
        .arg(&path)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("suite FAILED"), "{stdout}");
    assert!(dir.path().join("out").is_dir());
}

#[test]
fn test_binary_check_rejects_unknown_type() {
    let dir = TempDir::new().unwrap();
    let path = write_suite(dir.path(), "[[task]]\ntype = \"parallel\"\n");

    let output = Command::new(env!("CARGO_BIN_EXE_xh"))
        .arg("check")
        .arg(&path)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("parsing"), "{stderr}");
}

#[test]
fn test_binary_check_counts_tasks() {
    let dir = TempDir::new().unwrap();
    let path = write_suite(dir.path(), SUITE);

    let output = Command::new(env!("CARGO_BIN_EXE_xh"))
        .arg("check")
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "suite: 8 tasks OK");
}
