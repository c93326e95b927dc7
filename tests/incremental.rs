//! End-to-end staleness scenarios, driven with a synthetic compiler that
//! stands in for the external compiler plugin: it writes class files for
//! the dirty sources and reports facts through the analysis callback.

use kiln::{
    analysis::ProjectAnalysis,
    callback::{AnalysisAdapter, AnalysisCallback},
    incremental::{self, StalenessReport},
    logger::Logger,
    path::RelativePath,
};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

struct Workspace {
    _dir: tempfile::TempDir,
    root: RelativePath,
    output: RelativePath,
    analysis: Arc<Mutex<ProjectAnalysis>>,
    /// source name -> names of sources it imports
    imports: BTreeMap<String, Vec<String>>,
    log: Logger,
    clock: SystemTime,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = RelativePath::root(dir.path());
        let output = root.join("target").unwrap().join("classes").unwrap().rebase();
        Self {
            _dir: dir,
            root,
            output,
            analysis: Arc::new(Mutex::new(ProjectAnalysis::new())),
            imports: BTreeMap::new(),
            log: Logger::new("scenario"),
            clock: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        }
    }

    /// Each call moves the file-system clock forward one minute.
    fn tick(&mut self) -> SystemTime {
        self.clock += Duration::from_secs(60);
        self.clock
    }

    fn write_source(&mut self, name: &str, imports: &[&str]) -> RelativePath {
        let source = self.source(name);
        let time = self.tick();
        write_at(&source.resolve(), time);
        self.imports.insert(name.to_string(), imports.iter().map(|s| s.to_string()).collect());
        source
    }

    fn touch_source(&mut self, name: &str) {
        let path = self.source(name).resolve();
        let time = self.tick();
        fs::File::options().write(true).open(path).unwrap().set_modified(time).unwrap();
    }

    fn source(&self, name: &str) -> RelativePath {
        self.root.join("src").unwrap().join(name).unwrap()
    }

    fn snapshot(&self) -> Vec<RelativePath> {
        let src = self.root.join("src").unwrap().resolve();
        let mut names: Vec<String> = fs::read_dir(src)
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        names.iter().map(|n| self.source(n)).collect()
    }

    fn analysis_dir(&self) -> PathBuf {
        self.root.project_root().join("target/analysis")
    }

    /// One build: scan for dirt, "compile" the dirty sources and persist
    /// the analysis, exactly as the compile lifecycle would.
    fn build(&mut self, classpath: &[PathBuf]) -> StalenessReport {
        let snapshot = self.snapshot();
        let report = {
            let mut analysis = self.analysis.lock().unwrap();
            incremental::dirty_sources(&snapshot, classpath, &mut analysis, &self.log)
        };

        let mut adapter = AnalysisAdapter::new(
            Arc::clone(&self.analysis),
            self.root.clone(),
            self.output.clone(),
            vec!["org.scalatest.Suite".to_string()],
            "kiln.ProjectDefinition",
        );
        let class_time = self.tick();
        for source in &report.modified {
            let name = source.name().to_string();
            let abs = source.resolve();
            adapter.begin_source(&abs);
            for import in self.imports.get(&name).cloned().unwrap_or_default() {
                adapter.source_dependency(&self.source(&import).resolve(), &abs);
            }
            let class = self
                .output
                .join(format!("{}.class", name.trim_end_matches(".scala")))
                .unwrap()
                .resolve();
            write_at(&class, class_time);
            adapter.generated_class(&abs, &class);
            adapter.end_source(&abs);
        }

        self.analysis.lock().unwrap().save(&self.analysis_dir()).unwrap();
        report
    }

    fn names(report_set: &std::collections::BTreeSet<RelativePath>) -> Vec<String> {
        report_set.iter().map(|p| p.name().to_string()).collect()
    }
}

fn write_at(path: &Path, mtime: SystemTime) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, "content").unwrap();
    fs::File::options().write(true).open(path).unwrap().set_modified(mtime).unwrap();
}

/// Scenario: fresh compile of `A` and `B` where `B` imports `A`, then a
/// second compile with nothing changed.
#[test]
fn fresh_compile_then_noop() {
    let mut ws = Workspace::new();
    let a = ws.write_source("A.scala", &[]);
    let b = ws.write_source("B.scala", &["A.scala"]);

    let first = ws.build(&[]);
    assert_eq!(Workspace::names(&first.modified), vec!["A.scala", "B.scala"]);

    {
        let analysis = ws.analysis.lock().unwrap();
        assert_eq!(analysis.classes_of(&a).count(), 1);
        assert_eq!(analysis.classes_of(&b).count(), 1);
        let b_deps: Vec<_> = analysis.dependencies_of(&b).unwrap().iter().cloned().collect();
        assert_eq!(b_deps, vec![a.clone()]);
        assert!(analysis.dependencies_of(&a).unwrap().is_empty());
    }

    let second = ws.build(&[]);
    assert!(second.is_clean(), "unchanged project must recompile nothing: {second:?}");
}

/// Scenario: touching `A` recompiles `A` and its dependent `B`, leaving the
/// analysis identical modulo timestamps.
#[test]
fn touched_dependency_propagates() {
    let mut ws = Workspace::new();
    ws.write_source("A.scala", &[]);
    let b = ws.write_source("B.scala", &["A.scala"]);
    ws.build(&[]);

    let before = ws.analysis.lock().unwrap().clone();
    ws.touch_source("A.scala");
    let report = ws.build(&[]);
    assert_eq!(Workspace::names(&report.modified), vec!["A.scala", "B.scala"]);

    let after = ws.analysis.lock().unwrap().clone();
    assert_eq!(before, after, "recompiling everything must reproduce the same analysis");
    assert_eq!(after.dependencies_of(&b).unwrap().len(), 1);
}

/// Scenario: `B` depends on a jar; replacing the jar with a newer file
/// recompiles `B` only.
#[test]
fn newer_jar_recompiles_only_its_dependent() {
    let mut ws = Workspace::new();
    ws.write_source("A.scala", &[]);
    let b = ws.write_source("B.scala", &[]);
    let jar = ws.root.project_root().join("lib/util.jar");
    write_at(&jar, ws.tick());
    let classpath = vec![kiln::utils::canonicalized(jar.clone())];

    ws.build(&classpath);
    ws.analysis.lock().unwrap().add_external_dep(&jar, &b);
    ws.analysis.lock().unwrap().save(&ws.analysis_dir()).unwrap();

    // replace the jar with a newer one
    let newer = ws.tick();
    write_at(&jar, newer);

    let report = ws.build(&classpath);
    assert_eq!(Workspace::names(&report.modified), vec!["B.scala"]);
}

/// Scenario: deleting `B` leaves nothing to compile but removes `B`'s class
/// file and analysis entries.
#[test]
fn removed_source_is_forgotten() {
    let mut ws = Workspace::new();
    ws.write_source("A.scala", &[]);
    let b = ws.write_source("B.scala", &["A.scala"]);
    ws.build(&[]);

    let b_class = ws.output.join("B.class").unwrap().resolve();
    assert!(b_class.exists());
    fs::remove_file(b.resolve()).unwrap();

    let report = ws.build(&[]);
    assert!(report.modified.is_empty(), "nothing depends on B, so nothing recompiles");
    assert_eq!(Workspace::names(&report.removed), vec!["B.scala"]);
    assert!(!b_class.exists(), "B's class file must be deleted");
    assert!(!ws.analysis.lock().unwrap().is_known(&b));
}

/// The persisted analysis round-trips exactly, and reloading it discards
/// un-persisted mutations the way a failed compile must.
#[test]
fn persisted_analysis_restores_the_pre_build_state() {
    let mut ws = Workspace::new();
    let a = ws.write_source("A.scala", &[]);
    ws.write_source("B.scala", &["A.scala"]);
    ws.build(&[]);

    let saved = ws.analysis.lock().unwrap().clone();

    // a compile that fails midway leaves partial facts in memory
    ws.analysis.lock().unwrap().remove_source(&a, &ws.log);
    assert_ne!(saved, ws.analysis.lock().unwrap().clone());

    let restored =
        ProjectAnalysis::load(&ws.root, &ws.output, &ws.analysis_dir()).unwrap();
    assert_eq!(saved, restored);
}
