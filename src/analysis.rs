//! The persisted project analysis.
//!
//! Tracks the relationships discovered during compilation: which sources a
//! source depends on, which external jars and class files it uses, which
//! class files were generated for it, and which test and project-definition
//! classes it declares. The analysis is loaded at project construction,
//! mutated through the compiler callback during a compile, and saved at the
//! end of a successful compile.

use crate::{
    error::{BuildError, Result},
    logger::Logger,
    path::RelativePath,
    testing::TestDefinition,
    utils,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

/// File names of the persisted maps, one file per map.
pub const DEPENDENCIES_FILE: &str = "dependencies";
pub const GENERATED_FILE: &str = "generated_files";
pub const TESTS_FILE: &str = "tests";
pub const PROJECTS_FILE: &str = "projects";
pub const EXTERNAL_DEPENDENCIES_FILE: &str = "external_dependencies";

/// Persistent record of inter-source and source-to-artifact relationships.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProjectAnalysis {
    /// source -> sources it depends on (transitively via recompile need)
    source_deps: BTreeMap<RelativePath, BTreeSet<RelativePath>>,
    /// absolute external file -> sources depending on it
    external_deps: BTreeMap<PathBuf, BTreeSet<RelativePath>>,
    /// source -> class files generated from it, relative to the output dir
    generated_classes: BTreeMap<RelativePath, BTreeSet<RelativePath>>,
    /// source -> serialized test definitions declared in it
    tests: BTreeMap<RelativePath, BTreeSet<String>>,
    /// source -> project definition classes declared in it
    project_definitions: BTreeMap<RelativePath, BTreeSet<String>>,
}

impl ProjectAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures the source is known, with empty dependency and class sets.
    pub fn mark_source(&mut self, source: &RelativePath) {
        self.source_deps.entry(source.clone()).or_default();
        self.generated_classes.entry(source.clone()).or_default();
    }

    /// Records that `source` depends on `depends_on`.
    pub fn add_source_dep(&mut self, source: &RelativePath, depends_on: &RelativePath) {
        self.source_deps.entry(source.clone()).or_default().insert(depends_on.clone());
    }

    /// Records that `source` depends on the external `file` (a jar or class
    /// file outside the project).
    pub fn add_external_dep(&mut self, file: &Path, source: &RelativePath) {
        self.external_deps
            .entry(utils::canonicalized(file.to_path_buf()))
            .or_default()
            .insert(source.clone());
    }

    /// Records a class file generated from `source`.
    pub fn add_generated(&mut self, source: &RelativePath, class: &RelativePath) {
        self.generated_classes.entry(source.clone()).or_default().insert(class.clone());
    }

    /// Records a test class declared in `source`.
    pub fn add_test(&mut self, source: &RelativePath, test: &TestDefinition) {
        self.tests.entry(source.clone()).or_default().insert(test.to_string());
    }

    /// Records a project definition class declared in `source`.
    pub fn add_project_definition(&mut self, source: &RelativePath, class_name: &str) {
        self.project_definitions.entry(source.clone()).or_default().insert(class_name.to_string());
    }

    /// Deletes the class files generated from `source` (best effort, logged
    /// on failure) and forgets the source entirely: it disappears as a key
    /// from every map and from every dependent set.
    pub fn remove_source(&mut self, source: &RelativePath, log: &Logger) {
        if let Some(classes) = self.generated_classes.remove(source) {
            for class in classes {
                let file = class.resolve();
                if file.exists() {
                    if let Err(err) = fs::remove_file(&file) {
                        log.warn(format!(
                            "could not delete class file \"{}\": {err}",
                            file.display()
                        ));
                    }
                }
            }
        }
        self.source_deps.remove(source);
        self.tests.remove(source);
        self.project_definitions.remove(source);
        self.remove_dependent(source);
    }

    /// Erases the self-edge `source ∈ sourceDeps[source]`, inserted while
    /// the compiler reports intra-source dependencies.
    pub fn remove_self_dep(&mut self, source: &RelativePath) {
        if let Some(deps) = self.source_deps.get_mut(source) {
            deps.remove(source);
        }
    }

    /// Erases `source` from every dependent set, so that nothing lists it as
    /// a dependency anymore. Externals left without dependents are dropped.
    pub fn remove_dependent(&mut self, source: &RelativePath) {
        for deps in self.source_deps.values_mut() {
            deps.remove(source);
        }
        self.external_deps.retain(|_, dependents| {
            dependents.remove(source);
            !dependents.is_empty()
        });
    }

    /// Removes and returns the dependency set of `source`.
    pub fn take_deps(&mut self, source: &RelativePath) -> BTreeSet<RelativePath> {
        self.source_deps.remove(source).unwrap_or_default()
    }

    /// The class files recorded for `source`.
    pub fn classes_of<'a>(
        &'a self,
        source: &RelativePath,
    ) -> impl Iterator<Item = &'a RelativePath> + 'a {
        self.generated_classes.get(source).into_iter().flatten()
    }

    /// The class files recorded for all of `sources`.
    pub fn classes_of_all<'a>(
        &'a self,
        sources: impl IntoIterator<Item = &'a RelativePath> + 'a,
    ) -> Vec<RelativePath> {
        sources.into_iter().flat_map(|s| self.classes_of(s).cloned()).collect()
    }

    /// Every source the analysis currently knows about.
    pub fn all_sources(&self) -> BTreeSet<RelativePath> {
        self.source_deps.keys().chain(self.generated_classes.keys()).cloned().collect()
    }

    /// Whether `source` has ever been seen by a compile.
    pub fn is_known(&self, source: &RelativePath) -> bool {
        self.source_deps.contains_key(source) || self.generated_classes.contains_key(source)
    }

    pub fn dependencies_of(&self, source: &RelativePath) -> Option<&BTreeSet<RelativePath>> {
        self.source_deps.get(source)
    }

    /// Iterates `(external file, dependents)` pairs.
    pub fn external_dependencies(
        &self,
    ) -> impl Iterator<Item = (&PathBuf, &BTreeSet<RelativePath>)> {
        self.external_deps.iter()
    }

    /// Drops the external file and returns the sources that depended on it.
    pub fn take_external(&mut self, file: &Path) -> BTreeSet<RelativePath> {
        self.external_deps.remove(file).unwrap_or_default()
    }

    /// All recorded test definitions, parsed from their serialized form.
    pub fn all_tests(&self) -> Vec<TestDefinition> {
        self.tests
            .values()
            .flatten()
            .filter_map(|raw| raw.parse::<TestDefinition>().ok())
            .collect()
    }

    /// All recorded generated class files.
    pub fn all_classes(&self) -> Vec<RelativePath> {
        self.generated_classes.values().flatten().cloned().collect()
    }

    /// All recorded project definition class names.
    pub fn all_projects(&self) -> BTreeSet<String> {
        self.project_definitions.values().flatten().cloned().collect()
    }

    /// Number of known sources.
    pub fn len(&self) -> usize {
        self.all_sources().len()
    }

    pub fn is_empty(&self) -> bool {
        self.source_deps.is_empty() && self.generated_classes.is_empty()
    }

    /// Persists each map as a line-oriented key/value file under `dir`.
    ///
    /// Keys are portable relative source strings (external files use their
    /// absolute form); values join with the platform path-list separator.
    pub fn save(&self, dir: &Path) -> Result<()> {
        trace!("saving analysis with {} sources to \"{}\"", self.len(), dir.display());
        fs::create_dir_all(dir).map_err(|err| BuildError::io(err, dir))?;
        write_map(&dir.join(DEPENDENCIES_FILE), &self.source_deps, path_key, path_value)?;
        write_map(&dir.join(GENERATED_FILE), &self.generated_classes, path_key, path_value)?;
        write_map(&dir.join(TESTS_FILE), &self.tests, path_key, string_value)?;
        write_map(&dir.join(PROJECTS_FILE), &self.project_definitions, path_key, string_value)?;
        write_map(
            &dir.join(EXTERNAL_DEPENDENCIES_FILE),
            &self.external_deps,
            |file| file.display().to_string(),
            path_value,
        )?;
        Ok(())
    }

    /// Loads the analysis persisted under `dir`. Missing files are empty
    /// maps; anything else I/O-related is a single textual error.
    ///
    /// `root` anchors source keys, `output` anchors generated class files.
    pub fn load(root: &RelativePath, output: &RelativePath, dir: &Path) -> Result<Self> {
        let mut analysis = Self::new();
        analysis.source_deps = read_map(
            &dir.join(DEPENDENCIES_FILE),
            |k| RelativePath::parse(root, k),
            |v| RelativePath::parse(root, v),
        )?;
        analysis.generated_classes = read_map(
            &dir.join(GENERATED_FILE),
            |k| RelativePath::parse(root, k),
            |v| RelativePath::parse(output, v),
        )?;
        analysis.tests = read_map(
            &dir.join(TESTS_FILE),
            |k| RelativePath::parse(root, k),
            |v| Ok(v.to_string()),
        )?;
        analysis.project_definitions = read_map(
            &dir.join(PROJECTS_FILE),
            |k| RelativePath::parse(root, k),
            |v| Ok(v.to_string()),
        )?;
        analysis.external_deps = read_map(
            &dir.join(EXTERNAL_DEPENDENCIES_FILE),
            |k| Ok(PathBuf::from(k)),
            |v| RelativePath::parse(root, v),
        )?;
        trace!("loaded analysis with {} sources from \"{}\"", analysis.len(), dir.display());
        Ok(analysis)
    }

    /// Writes the two dot-format dependency graphs under `dir`: one for
    /// source-to-source edges, one for source-to-external edges.
    pub fn write_dot_graphs(&self, dir: &Path) -> Result<()> {
        let mut sources = String::from("digraph dependencies {\n");
        for (source, deps) in &self.source_deps {
            for dep in deps {
                let _ = writeln!(sources, "{} -> {};", node_label(source), node_label(dep));
            }
        }
        sources.push_str("}\n");
        utils::write_file(&dir.join("dependencies"), &sources)?;

        let mut externals = String::from("digraph externalDependencies {\n");
        for (file, dependents) in &self.external_deps {
            let jar = quote(file.file_name().and_then(|n| n.to_str()).unwrap_or("<unnamed>"));
            for dependent in dependents {
                let _ = writeln!(externals, "{} -> {};", node_label(dependent), jar);
            }
        }
        externals.push_str("}\n");
        utils::write_file(&dir.join("externalDependencies"), &externals)
    }
}

/// Quoted file basename with the source extension stripped.
fn node_label(path: &RelativePath) -> String {
    let name = path.name();
    let stripped = name
        .strip_suffix(&format!(".{}", utils::SOURCE_EXTENSION))
        .or_else(|| name.strip_suffix(&format!(".{}", utils::CLASS_EXTENSION)))
        .unwrap_or(name);
    quote(stripped)
}

fn quote(s: &str) -> String {
    format!("\"{s}\"")
}

fn path_key(path: &RelativePath) -> String {
    path.relative_string()
}

fn path_value(path: &RelativePath) -> String {
    path.relative_string()
}

fn string_value(s: &String) -> String {
    s.clone()
}

fn write_map<K: Ord, V: Ord>(
    file: &Path,
    map: &BTreeMap<K, BTreeSet<V>>,
    key: impl Fn(&K) -> String,
    value: impl Fn(&V) -> String,
) -> Result<()> {
    let mut contents = String::new();
    for (k, values) in map {
        let mut rendered: Vec<_> = values.iter().map(&value).collect();
        rendered.sort();
        contents.push_str(&key(k));
        contents.push('=');
        contents.push_str(&utils::join_path_list(rendered));
        contents.push('\n');
    }
    utils::write_file(file, &contents)
}

fn read_map<K: Ord + Clone, V: Ord>(
    file: &Path,
    key: impl Fn(&str) -> Result<K>,
    value: impl Fn(&str) -> Result<V>,
) -> Result<BTreeMap<K, BTreeSet<V>>> {
    let mut map = BTreeMap::new();
    if !file.exists() {
        return Ok(map);
    }
    let contents = utils::read_to_string(file)?;
    for line in contents.lines().filter(|l| !l.trim().is_empty()) {
        let (raw_key, raw_values) = line.split_once('=').ok_or_else(|| {
            BuildError::parse(format!("malformed analysis line in \"{}\": {line}", file.display()))
        })?;
        let entry: &mut BTreeSet<V> = map.entry(key(raw_key)?).or_default();
        for raw in utils::split_path_list(raw_values) {
            entry.insert(value(raw)?);
        }
    }
    Ok(map)
}
