//! End-to-end scenarios driving the compiled binary against generated
//! configuration files.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("build.yaml");
    fs::write(&path, contents).unwrap();
    path
}

fn run_in(dir: &TempDir, config: &Path) -> Output {
    Command::cargo_bin("buildflow")
        .unwrap()
        .current_dir(dir.path())
        .arg("run")
        .arg("-c")
        .arg(config)
        .output()
        .unwrap()
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn hello_world() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "phases:
- name: main
  tasks:
  - name: hello
    command:
      command: echo hello
",
    );
    let output = run_in(&dir, &config);
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert!(stdout_of(&output).contains("hello"));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("= Phase: main ="));
    assert!(stderr.contains("= Phase Result: main ="));
    assert!(stderr.contains("succeeded"));
}

#[test]
fn parallel_tasks_share_the_window() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "parallelism: 3
phases:
- name: main
  tasks:
  - name: one
    command:
      command: sleep 0.5
  - name: two
    command:
      command: sleep 0.5
  - name: three
    command:
      command: sleep 0.5
",
    );
    let started = Instant::now();
    let output = run_in(&dir, &config);
    let elapsed = started.elapsed();
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    // Three 0.5s sleeps run concurrently; sequential execution would need
    // at least 1.5s.
    assert!(elapsed < Duration::from_millis(1400), "took {elapsed:?}");
}

#[test]
fn dependency_orders_tasks() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "phases:
- name: main
  tasks:
  - name: foo
    command:
      command: printf ready > marker.txt
  - name: bar
    dependency: [foo]
    command:
      command: cat marker.txt
",
    );
    let output = run_in(&dir, &config);
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert!(stdout_of(&output).contains("ready"));
}

#[test]
fn false_when_skips_the_task() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "phases:
- name: main
  tasks:
  - name: guarded
    when: false
    command:
      command: printf hit > side_effect.txt
",
    );
    let output = run_in(&dir, &config);
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert!(!dir.path().join("side_effect.txt").exists());
    assert!(stderr_of(&output).contains("No task is run"));
}

#[test]
fn read_file_text_flows_into_later_tasks() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("data.txt"), "sesame").unwrap();
    let config = write_config(
        &dir,
        "phases:
- name: main
  tasks:
  - name: read
    read_file:
      path: data.txt
  - name: show
    dependency: [read]
    command:
      command: \"echo {{ Phases.main.Tasks.0.File.Text }}\"
",
    );
    let output = run_in(&dir, &config);
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert!(stdout_of(&output).contains("sesame"));
}

#[test]
fn failing_task_fails_the_build_but_not_its_siblings() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "phases:
- name: main
  tasks:
  - name: boom
    command:
      command: exit 1
  - name: bystander
    command:
      command: printf ran > bystander.txt
",
    );
    let output = run_in(&dir, &config);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("the build failed"));
    assert!(dir.path().join("bystander.txt").exists());
}

#[test]
fn unknown_field_rejects_the_config_before_any_phase() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "unknown_key: true
phases:
- name: main
  tasks:
  - name: never
    command:
      command: printf hit > never.txt
",
    );
    let output = run_in(&dir, &config);
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("unknown field"), "stderr: {stderr}");
    assert!(!stderr.contains("= Phase:"));
    assert!(!dir.path().join("never.txt").exists());
}

#[test]
fn items_expand_into_runtime_tasks() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "phases:
- name: main
  tasks:
  - name: \"task-{{ Item.Value }}\"
    items: [a, b, c]
    command:
      command: \"echo {{ Item.Value }}\"
",
    );
    let output = run_in(&dir, &config);
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    let stdout = stdout_of(&output);
    for name in ["task-a", "task-b", "task-c"] {
        assert!(stdout.contains(name), "stdout: {stdout}");
    }
}

#[test]
fn phase_exit_stops_the_pipeline() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "phases:
- name: first
  condition:
    exit: true
  tasks:
  - name: t
    command:
      command: printf first > first.txt
- name: second
  tasks:
  - name: t
    command:
      command: printf second > second.txt
",
    );
    let output = run_in(&dir, &config);
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert!(dir.path().join("first.txt").exists());
    assert!(!dir.path().join("second.txt").exists());
}

#[test]
fn skipped_phase_does_not_run_tasks() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "phases:
- name: skipped
  condition:
    skip: true
  tasks:
  - name: t
    command:
      command: printf hit > skipped.txt
- name: runs
  tasks:
  - name: t
    command:
      command: printf hit > ran.txt
",
    );
    let output = run_in(&dir, &config);
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert!(!dir.path().join("skipped.txt").exists());
    assert!(dir.path().join("ran.txt").exists());
}

#[test]
fn later_phases_see_earlier_phase_results() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "phases:
- name: produce
  tasks:
  - name: emit
    command:
      command: printf product
- name: consume
  tasks:
  - name: use
    command:
      command: \"echo got-{{ Phases.produce.Tasks.0.Stdout }}\"
",
    );
    let output = run_in(&dir, &config);
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert!(stdout_of(&output).contains("got-product"));
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    Command::cargo_bin("buildflow")
        .unwrap()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
    let starter = fs::read_to_string(dir.path().join(".buildflow.yaml")).unwrap();
    assert!(starter.contains("phases:"));

    // A second run leaves an existing file untouched.
    fs::write(
        dir.path().join(".buildflow.yaml"),
        format!("{starter}# local edit\n"),
    )
    .unwrap();
    Command::cargo_bin("buildflow")
        .unwrap()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
    let kept = fs::read_to_string(dir.path().join(".buildflow.yaml")).unwrap();
    assert!(kept.ends_with("# local edit\n"));
}

#[test]
fn starter_config_runs_end_to_end() {
    let dir = TempDir::new().unwrap();
    Command::cargo_bin("buildflow")
        .unwrap()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
    let output = Command::cargo_bin("buildflow")
        .unwrap()
        .current_dir(dir.path())
        .arg("run")
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert!(stdout_of(&output).contains("hello"));
}
