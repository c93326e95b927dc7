//! Cross-project action invocation: ordering, interactive scoping,
//! classpath assembly and the parallel runner.

use kiln::{
    project::{run_action, Project, ProjectBuilder},
    task::Task,
    Version,
};
use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

type Trace = Arc<Mutex<Vec<String>>>;

fn tracing_task(trace: &Trace, label: &str, interactive: bool) -> impl FnOnce(&kiln::TaskMap) -> Task + 'static {
    let trace = Arc::clone(trace);
    let label = label.to_string();
    move |_| {
        let task = Task::new(move || {
            trace.lock().unwrap().push(label.clone());
            None
        });
        if interactive {
            task.interactive()
        } else {
            task
        }
    }
}

fn project(
    name: &str,
    root: &Path,
    trace: &Trace,
    deps: &[Arc<Project>],
) -> Arc<Project> {
    let mut builder = ProjectBuilder::new(name, Version::parse("0.1").unwrap(), root.join(name))
        .task("echo", tracing_task(trace, &format!("{name}/echo"), false))
        .task("shell", tracing_task(trace, &format!("{name}/shell"), true));
    for dep in deps {
        builder = builder.depends_on(Arc::clone(dep));
    }
    builder.build().unwrap()
}

#[test]
fn actions_run_dependencies_first() {
    let dir = tempfile::tempdir().unwrap();
    let trace: Trace = Default::default();
    let core = project("core", dir.path(), &trace, &[]);
    let app = project("app", dir.path(), &trace, &[core]);

    run_action(&app, "echo", None).unwrap();
    assert_eq!(trace.lock().unwrap().clone(), vec!["core/echo", "app/echo"]);
}

/// An interactive action runs its body only in the requested project, not
/// in dependency projects that also define it.
#[test]
fn interactive_actions_are_scoped_to_the_requested_project() {
    let dir = tempfile::tempdir().unwrap();
    let trace: Trace = Default::default();
    let core = project("core", dir.path(), &trace, &[]);
    let app = project("app", dir.path(), &trace, &[core.clone()]);

    run_action(&app, "shell", None).unwrap();
    assert_eq!(trace.lock().unwrap().clone(), vec!["app/shell"]);

    trace.lock().unwrap().clear();
    run_action(&core, "shell", None).unwrap();
    assert_eq!(trace.lock().unwrap().clone(), vec!["core/shell"]);
}

#[test]
fn unknown_actions_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let trace: Trace = Default::default();
    let solo = project("solo", dir.path(), &trace, &[]);
    let failures = run_action(&solo, "frobnicate", None).unwrap_err();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("frobnicate"));
}

#[test]
fn parallel_invocation_covers_every_project_once() {
    let dir = tempfile::tempdir().unwrap();
    let trace: Trace = Default::default();
    let base = project("base", dir.path(), &trace, &[]);
    let left = project("left", dir.path(), &trace, &[base.clone()]);
    let right = project("right", dir.path(), &trace, &[base.clone()]);
    let top = project("top", dir.path(), &trace, &[left, right]);

    run_action(&top, "echo", Some(2)).unwrap();
    let mut ran = trace.lock().unwrap().clone();
    assert_eq!(ran.first().map(String::as_str), Some("base/echo"));
    assert_eq!(ran.last().map(String::as_str), Some("top/echo"));
    ran.sort();
    assert_eq!(ran, vec!["base/echo", "left/echo", "right/echo", "top/echo"]);
}

#[test]
fn classpath_unions_own_entries_with_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    let trace: Trace = Default::default();

    fs::create_dir_all(dir.path().join("core/lib")).unwrap();
    fs::write(dir.path().join("core/lib/core-util.jar"), "").unwrap();
    fs::create_dir_all(dir.path().join("app/lib/managed/compile")).unwrap();
    fs::write(dir.path().join("app/lib/managed/compile/managed.jar"), "").unwrap();

    let core = project("core", dir.path(), &trace, &[]);
    let app = project("app", dir.path(), &trace, &[core]);

    let classpath = app.classpath("compile");
    let rendered: Vec<String> = classpath.iter().map(|p| p.display().to_string()).collect();

    assert!(rendered[0].ends_with("app/target/classes"), "own output first: {rendered:?}");
    assert!(rendered.iter().any(|p| p.ends_with("managed.jar")));
    assert!(rendered.iter().any(|p| p.ends_with("core/target/classes")));
    assert!(rendered.iter().any(|p| p.ends_with("core-util.jar")));
    // no duplicates
    let mut sorted = rendered.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), rendered.len());
}

#[test]
fn clean_preserves_the_analysis_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let trace: Trace = Default::default();
    let solo = project("solo", dir.path(), &trace, &[]);

    let root = solo.layout().root().resolve();
    fs::create_dir_all(root.join("target/classes")).unwrap();
    fs::write(root.join("target/classes/A.class"), "bytecode").unwrap();
    fs::create_dir_all(root.join("target/analysis")).unwrap();
    fs::write(root.join("target/analysis/dependencies"), "src/A.scala=\n").unwrap();

    run_action(&solo, "clean", None).unwrap();
    assert!(!root.join("target/classes").exists());
    assert!(root.join("target/analysis/dependencies").exists());
}
