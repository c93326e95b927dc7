//! The contract between the compiler's analysis plugin and the build core.
//!
//! The plugin is handed a small integer token on the compiler command line
//! (`-P:kiln-analyzer:callback:<id>`) and reports everything it discovers
//! about each compilation unit as an ordered fact stream. The token indexes a
//! process-wide registry of live callback instances; the stream itself
//! crosses the process boundary as JSON lines in a file named after the
//! token under `$KILN_CALLBACK_DIR`.

use crate::{
    analysis::ProjectAnalysis,
    error::{BuildError, Result},
    path::RelativePath,
    testing::TestDefinition,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    io::BufRead,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};

/// Name of the compiler analysis plugin.
pub const PLUGIN_NAME: &str = "kiln-analyzer";

/// Environment variable telling the plugin where to write fact streams.
pub const CALLBACK_DIR_ENV: &str = "KILN_CALLBACK_DIR";

/// Facts reported by the compiler plugin, in the order they are issued for
/// each compilation unit: `beginSource`, dependencies, subclasses, generated
/// classes, `endSource`.
pub trait AnalysisCallback: Send {
    fn begin_source(&mut self, source: &Path);
    /// `source` depends on the project source `dependency`.
    fn source_dependency(&mut self, dependency: &Path, source: &Path);
    /// `source` depends on the jar `jar` outside the project.
    fn jar_dependency(&mut self, jar: &Path, source: &Path);
    /// `source` depends on the loose class file `class_file`.
    fn class_dependency(&mut self, class_file: &Path, source: &Path);
    /// A public, concrete, statically reachable class in `source` extends
    /// one of the watched super classes.
    fn found_subclass(&mut self, source: &Path, name: &str, super_name: &str, is_module: bool);
    /// The compiler emitted `class_file` for `source`.
    fn generated_class(&mut self, source: &Path, class_file: &Path);
    fn end_source(&mut self, source: &Path);
}

type SharedCallback = Arc<Mutex<dyn AnalysisCallback>>;

static REGISTRY: Lazy<Mutex<HashMap<u32, SharedCallback>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

// ids are never reused within a run so that concurrent compiles cannot
// observe each other's callbacks
static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// Registers a live callback and returns its fresh token.
pub fn register(callback: SharedCallback) -> u32 {
    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    REGISTRY.lock().unwrap().insert(id, callback);
    id
}

/// The callback registered under `id`, if still live.
pub fn lookup(id: u32) -> Option<SharedCallback> {
    REGISTRY.lock().unwrap().get(&id).cloned()
}

/// Removes the callback registered under `id`.
pub fn unregister(id: u32) -> Option<SharedCallback> {
    REGISTRY.lock().unwrap().remove(&id)
}

/// The plugin flag handed to the compiler for the given token.
pub fn plugin_option(id: u32) -> String {
    format!("-P:{PLUGIN_NAME}:callback:{id}")
}

/// Where the plugin writes the fact stream for the given token.
pub fn facts_file(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{id}.facts"))
}

/// One line of the serialized fact stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AnalyzerFact {
    BeginSource { source: PathBuf },
    SourceDependency { dependency: PathBuf, source: PathBuf },
    JarDependency { jar: PathBuf, source: PathBuf },
    #[serde(rename_all = "camelCase")]
    ClassDependency { class_file: PathBuf, source: PathBuf },
    #[serde(rename_all = "camelCase")]
    FoundSubclass { source: PathBuf, name: String, super_name: String, is_module: bool },
    #[serde(rename_all = "camelCase")]
    GeneratedClass { source: PathBuf, class_file: PathBuf },
    EndSource { source: PathBuf },
}

/// Replays a serialized fact stream into a callback.
pub fn replay(reader: impl BufRead, callback: &mut dyn AnalysisCallback) -> Result<()> {
    for line in reader.lines() {
        let line = line.map_err(|err| BuildError::io(err, "<fact stream>"))?;
        if line.trim().is_empty() {
            continue;
        }
        let fact: AnalyzerFact = serde_json::from_str(&line)
            .map_err(|err| BuildError::parse(format!("malformed analyzer fact: {err}")))?;
        dispatch(fact, callback);
    }
    Ok(())
}

fn dispatch(fact: AnalyzerFact, callback: &mut dyn AnalysisCallback) {
    match fact {
        AnalyzerFact::BeginSource { source } => callback.begin_source(&source),
        AnalyzerFact::SourceDependency { dependency, source } => {
            callback.source_dependency(&dependency, &source)
        }
        AnalyzerFact::JarDependency { jar, source } => callback.jar_dependency(&jar, &source),
        AnalyzerFact::ClassDependency { class_file, source } => {
            callback.class_dependency(&class_file, &source)
        }
        AnalyzerFact::FoundSubclass { source, name, super_name, is_module } => {
            callback.found_subclass(&source, &name, &super_name, is_module)
        }
        AnalyzerFact::GeneratedClass { source, class_file } => {
            callback.generated_class(&source, &class_file)
        }
        AnalyzerFact::EndSource { source } => callback.end_source(&source),
    }
}

/// Feeds compiler facts into a [`ProjectAnalysis`].
///
/// Dependencies pointing into the output directory are ignored (they would
/// duplicate the corresponding source dependency); dependencies outside the
/// project become external edges. Watched subclasses become tests, or
/// project definitions when they extend the definition super class.
pub struct AnalysisAdapter {
    analysis: Arc<Mutex<ProjectAnalysis>>,
    root: RelativePath,
    output: RelativePath,
    test_supers: Vec<String>,
    definition_super: String,
}

impl AnalysisAdapter {
    pub fn new(
        analysis: Arc<Mutex<ProjectAnalysis>>,
        root: RelativePath,
        output: RelativePath,
        test_supers: Vec<String>,
        definition_super: impl Into<String>,
    ) -> Self {
        Self { analysis, root, output, test_supers, definition_super: definition_super.into() }
    }

    fn source(&self, path: &Path) -> Option<RelativePath> {
        RelativePath::from_absolute(&self.root, path)
    }

    fn in_output(&self, path: &Path) -> bool {
        RelativePath::from_absolute(&self.output, path).is_some()
    }

    fn external_dependency(&mut self, file: &Path, source: &Path) {
        if self.in_output(file) {
            // output-directory hits duplicate source dependencies reported
            // separately by the plugin
            return;
        }
        if let Some(source) = self.source(source) {
            self.analysis.lock().unwrap().add_external_dep(file, &source);
        }
    }
}

impl AnalysisCallback for AnalysisAdapter {
    fn begin_source(&mut self, source: &Path) {
        if let Some(source) = self.source(source) {
            self.analysis.lock().unwrap().mark_source(&source);
        }
    }

    fn source_dependency(&mut self, dependency: &Path, source: &Path) {
        if let (Some(dependency), Some(source)) = (self.source(dependency), self.source(source)) {
            self.analysis.lock().unwrap().add_source_dep(&source, &dependency);
        }
    }

    fn jar_dependency(&mut self, jar: &Path, source: &Path) {
        self.external_dependency(jar, source);
    }

    fn class_dependency(&mut self, class_file: &Path, source: &Path) {
        self.external_dependency(class_file, source);
    }

    fn found_subclass(&mut self, source: &Path, name: &str, super_name: &str, is_module: bool) {
        let Some(source) = self.source(source) else { return };
        let mut analysis = self.analysis.lock().unwrap();
        if super_name == self.definition_super {
            analysis.add_project_definition(&source, name);
        } else if self.test_supers.iter().any(|s| s == super_name) {
            analysis.add_test(&source, &TestDefinition::new(is_module, name, super_name));
        } else {
            trace!("ignoring subclass {name} of unwatched super {super_name}");
        }
    }

    fn generated_class(&mut self, source: &Path, class_file: &Path) {
        let (Some(source), Some(class)) =
            (self.source(source), RelativePath::from_absolute(&self.output, class_file))
        else {
            return;
        };
        self.analysis.lock().unwrap().add_generated(&source, &class);
    }

    fn end_source(&mut self, source: &Path) {
        if let Some(source) = self.source(source) {
            self.analysis.lock().unwrap().remove_self_dep(&source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct Recording(Vec<String>);

    impl AnalysisCallback for Recording {
        fn begin_source(&mut self, source: &Path) {
            self.0.push(format!("begin {}", source.display()));
        }
        fn source_dependency(&mut self, dependency: &Path, source: &Path) {
            self.0.push(format!("dep {} -> {}", source.display(), dependency.display()));
        }
        fn jar_dependency(&mut self, jar: &Path, source: &Path) {
            self.0.push(format!("jar {} -> {}", source.display(), jar.display()));
        }
        fn class_dependency(&mut self, class_file: &Path, source: &Path) {
            self.0.push(format!("class {} -> {}", source.display(), class_file.display()));
        }
        fn found_subclass(&mut self, _: &Path, name: &str, _: &str, _: bool) {
            self.0.push(format!("subclass {name}"));
        }
        fn generated_class(&mut self, _: &Path, class_file: &Path) {
            self.0.push(format!("generated {}", class_file.display()));
        }
        fn end_source(&mut self, source: &Path) {
            self.0.push(format!("end {}", source.display()));
        }
    }

    #[test]
    fn registry_hands_out_fresh_ids() {
        let a = register(Arc::new(Mutex::new(Recording::default())));
        let b = register(Arc::new(Mutex::new(Recording::default())));
        assert_ne!(a, b);
        assert!(lookup(a).is_some());
        assert!(unregister(a).is_some());
        assert!(lookup(a).is_none());
        // ids are not recycled
        let c = register(Arc::new(Mutex::new(Recording::default())));
        assert_ne!(a, c);
        unregister(b);
        unregister(c);
    }

    #[test]
    fn plugin_option_format() {
        assert_eq!(plugin_option(7), "-P:kiln-analyzer:callback:7");
    }

    #[test]
    fn replay_preserves_fact_order() {
        let stream = [
            r#"{"kind":"beginSource","source":"/p/src/A.scala"}"#,
            r#"{"kind":"sourceDependency","dependency":"/p/src/B.scala","source":"/p/src/A.scala"}"#,
            r#"{"kind":"generatedClass","source":"/p/src/A.scala","classFile":"/p/target/classes/A.class"}"#,
            r#"{"kind":"endSource","source":"/p/src/A.scala"}"#,
        ]
        .join("\n");
        let mut recording = Recording::default();
        replay(Cursor::new(stream), &mut recording).unwrap();
        assert_eq!(
            recording.0,
            vec![
                "begin /p/src/A.scala",
                "dep /p/src/A.scala -> /p/src/B.scala",
                "generated /p/target/classes/A.class",
                "end /p/src/A.scala",
            ]
        );
    }

    #[test]
    fn replay_rejects_garbage() {
        let mut recording = Recording::default();
        assert!(replay(Cursor::new("not json"), &mut recording).is_err());
    }

    #[test]
    fn adapter_routes_facts_into_the_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let root = RelativePath::root(dir.path());
        let output = root.join("target").unwrap().join("classes").unwrap().rebase();
        let analysis = Arc::new(Mutex::new(ProjectAnalysis::new()));
        let mut adapter = AnalysisAdapter::new(
            Arc::clone(&analysis),
            root.clone(),
            output.clone(),
            vec!["org.scalatest.Suite".to_string()],
            "kiln.ProjectDefinition",
        );

        let a = dir.path().join("src/A.scala");
        let b = dir.path().join("src/B.scala");
        adapter.begin_source(&a);
        adapter.source_dependency(&b, &a);
        adapter.source_dependency(&a, &a);
        adapter.jar_dependency(Path::new("/opt/lib/util.jar"), &a);
        // a dependency into the output dir is dropped
        adapter.class_dependency(&dir.path().join("target/classes/Old.class"), &a);
        adapter.found_subclass(&a, "ASpec", "org.scalatest.Suite", false);
        adapter.found_subclass(&a, "Build", "kiln.ProjectDefinition", false);
        adapter.generated_class(&a, &dir.path().join("target/classes/A.class"));
        adapter.end_source(&a);

        let analysis = analysis.lock().unwrap();
        let a_rel = RelativePath::parse(&root, "src/A.scala").unwrap();
        let deps = analysis.dependencies_of(&a_rel).unwrap();
        assert_eq!(deps.len(), 1, "self edge must be gone, external dep is separate");
        assert_eq!(analysis.external_dependencies().count(), 1);
        assert_eq!(analysis.all_tests().len(), 1);
        assert_eq!(analysis.all_projects().into_iter().collect::<Vec<_>>(), vec!["Build"]);
        assert_eq!(analysis.classes_of(&a_rel).count(), 1);
    }
}
