//! Two-stage project loading.
//!
//! Stage one reads the project descriptor (`project/info`). Stage two, when
//! a builder sub-project exists under `project/build/`, compiles it and uses
//! its analysis to discover the user's project class, which is then
//! instantiated through the constructor registry. The registry is the typed
//! stand-in for reflective constructor lookup: every loadable project class
//! is registered under its fully qualified name, with the default project
//! class always present.

use crate::{
    analysis::ProjectAnalysis,
    compile::{self, CompileConfiguration, Compiler},
    config::{ProjectLayout, BUILDER_DIR, INFO_FILE, METADATA_DIR},
    error::{BuildError, Result},
    filter::{self, NameFilter},
    logger::Logger,
    path::{PathSet, RelativePath},
    project::{Project, ProjectBuilder, ProjectInfo},
    testing,
    version::Version,
};
use std::{
    collections::BTreeMap,
    fs,
    io::{BufRead, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// Super class of user project definitions, watched by the compiler
/// callback while the builder project compiles.
pub const PROJECT_DEFINITION_SUPER: &str = "kiln.ProjectDefinition";

/// Project class used when the info file names none.
pub const DEFAULT_PROJECT_CLASS: &str = "kiln.DefaultProject";

/// The hard-wired class the builder project itself is built as. A user
/// project must never resolve to this class, or bootstrapping would recurse
/// forever.
pub const BUILDER_PROJECT_CLASS: &str = "kiln.BuilderProject";

/// Reads `<root>/project/info`: name line, version line, optional project
/// class line.
///
/// A missing metadata directory prompts interactively and writes a fresh
/// info file; an existing directory without an info file is an error.
pub fn read_info(
    root: &Path,
    input: &mut dyn BufRead,
    output: &mut dyn Write,
) -> Result<ProjectInfo> {
    let metadata = root.join(METADATA_DIR);
    let info_file = metadata.join(INFO_FILE);
    if !metadata.is_dir() {
        return prompt_new_info(root, &info_file, input, output);
    }
    if !info_file.is_file() {
        return Err(BuildError::config(format!(
            "project descriptor \"{}\" is missing",
            info_file.display()
        )));
    }
    parse_info(&fs::read_to_string(&info_file).map_err(|err| BuildError::io(err, &info_file))?)
}

fn parse_info(contents: &str) -> Result<ProjectInfo> {
    let mut lines = contents.lines().map(str::trim).filter(|l| !l.is_empty());
    let name = lines
        .next()
        .ok_or_else(|| BuildError::config("project info is missing the name line"))?
        .to_string();
    let version = Version::parse(
        lines.next().ok_or_else(|| BuildError::config("project info is missing the version line"))?,
    )?;
    let project_class = lines.next().map(str::to_string);
    Ok(ProjectInfo { name, version, project_class })
}

fn prompt_new_info(
    root: &Path,
    info_file: &Path,
    input: &mut dyn BufRead,
    output: &mut dyn Write,
) -> Result<ProjectInfo> {
    let ask = |output: &mut dyn Write, input: &mut dyn BufRead, question: &str| -> Result<String> {
        write!(output, "{question}: ").map_err(|err| BuildError::io(err, "<prompt>"))?;
        output.flush().map_err(|err| BuildError::io(err, "<prompt>"))?;
        let mut answer = String::new();
        input.read_line(&mut answer).map_err(|err| BuildError::io(err, "<prompt>"))?;
        Ok(answer.trim().to_string())
    };

    writeln!(output, "Project in \"{}\" does not exist yet.", root.display())
        .map_err(|err| BuildError::io(err, "<prompt>"))?;
    let name = ask(output, input, "Name")?;
    if name.is_empty() {
        return Err(BuildError::config("a project needs a name"));
    }
    let version = Version::parse(&ask(output, input, "Version")?)?;

    let info = ProjectInfo { name, version, project_class: None };
    let contents = format!("{}\n{}\n", info.name, info.version);
    fs::create_dir_all(info_file.parent().unwrap())
        .map_err(|err| BuildError::io(err, info_file))?;
    fs::write(info_file, contents).map_err(|err| BuildError::io(err, info_file))?;
    Ok(info)
}

type Constructor = Box<dyn Fn(&ProjectInfo, &Path) -> Result<Arc<Project>> + Send + Sync>;

/// Maps fully qualified project class names to their constructors.
pub struct ConstructorRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl Default for ConstructorRegistry {
    fn default() -> Self {
        let mut registry = Self { constructors: BTreeMap::new() };
        registry.register(DEFAULT_PROJECT_CLASS, |info, root| {
            ProjectBuilder::new(info.name.clone(), info.version.clone(), root)
                .project_class(info.project_class.clone())
                .build()
        });
        registry
    }
}

impl ConstructorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        class_name: impl Into<String>,
        constructor: impl Fn(&ProjectInfo, &Path) -> Result<Arc<Project>> + Send + Sync + 'static,
    ) {
        self.constructors.insert(class_name.into(), Box::new(constructor));
    }

    pub fn get(&self, class_name: &str) -> Option<&Constructor> {
        self.constructors.get(class_name)
    }
}

/// Loads the project rooted at `root`.
pub struct Loader {
    registry: ConstructorRegistry,
    compiler: Compiler,
    /// Classpath the builder project compiles against (the tool's own jar)
    builder_classpath: Vec<PathBuf>,
}

impl Default for Loader {
    fn default() -> Self {
        Self {
            registry: ConstructorRegistry::default(),
            compiler: Compiler::default(),
            builder_classpath: Vec::new(),
        }
    }
}

impl Loader {
    pub fn new(registry: ConstructorRegistry, compiler: Compiler) -> Self {
        Self { registry, compiler, builder_classpath: Vec::new() }
    }

    #[must_use]
    pub fn builder_classpath(mut self, classpath: Vec<PathBuf>) -> Self {
        self.builder_classpath = classpath;
        self
    }

    pub fn registry_mut(&mut self) -> &mut ConstructorRegistry {
        &mut self.registry
    }

    /// The two-stage load: read the info file, compile the builder project
    /// if present, pick the project class, instantiate it.
    pub fn load(
        &self,
        root: &Path,
        input: &mut dyn BufRead,
        output: &mut dyn Write,
    ) -> Result<Arc<Project>> {
        let info = read_info(root, input, output)?;
        let log = Logger::new(format!("{}-builder", info.name));

        let builder_dir = root.join(METADATA_DIR).join(BUILDER_DIR);
        let discovered = if builder_dir.is_dir() {
            self.compile_builder(&builder_dir, &log)?
        } else {
            Default::default()
        };

        let class_name = select_project_class(&discovered, &info);
        if class_name == BUILDER_PROJECT_CLASS {
            return Err(BuildError::config(format!(
                "the project class of \"{}\" resolves to the builder class `{class_name}`; \
                 a builder cannot build itself",
                root.display()
            )));
        }

        let constructor = self.registry.get(&class_name).ok_or_else(|| {
            BuildError::config(format!("no constructor registered for project class `{class_name}`"))
        })?;
        constructor(&info, root)
    }

    /// Compiles the builder sub-project to `project/build/target/classes`
    /// and returns the project definition classes its analysis discovered.
    fn compile_builder(
        &self,
        builder_dir: &Path,
        log: &Logger,
    ) -> Result<std::collections::BTreeSet<String>> {
        let layout = ProjectLayout::new(RelativePath::root(builder_dir));
        let root = layout.root().clone();
        let output = layout.classes_dir();
        let analysis_dir = layout.analysis_dir();
        let analysis = Arc::new(Mutex::new(ProjectAnalysis::load(
            &root,
            &output,
            &analysis_dir,
        )?));

        // builder sources sit directly under project/build/, outside the
        // conventional src tree
        let sources = PathSet::descendants(
            root.clone(),
            NameFilter::glob(&format!("*.{}", crate::utils::SOURCE_EXTENSION))
                .except(filter::default_excludes().or(NameFilter::exact("target"))),
        );
        let config = CompileConfiguration {
            label: "builder-compile".to_string(),
            sources,
            output,
            classpath: self.builder_classpath.clone(),
            analysis_dir,
            root,
            test_supers: testing::test_super_classes(),
            definition_super: PROJECT_DEFINITION_SUPER.to_string(),
            options: Vec::new(),
        };
        compile::compile(&config, &analysis, &self.compiler, log)?;

        let projects = analysis.lock().unwrap().all_projects();
        Ok(projects)
    }
}

/// Picks the user's project class: a uniquely discovered definition wins,
/// then the class named in the info file, then the default.
fn select_project_class(
    discovered: &std::collections::BTreeSet<String>,
    info: &ProjectInfo,
) -> String {
    if discovered.len() == 1 {
        return discovered.iter().next().unwrap().clone();
    }
    info.project_class.clone().unwrap_or_else(|| DEFAULT_PROJECT_CLASS.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn write_info(root: &Path, contents: &str) {
        let metadata = root.join(METADATA_DIR);
        fs::create_dir_all(&metadata).unwrap();
        fs::write(metadata.join(INFO_FILE), contents).unwrap();
    }

    #[test]
    fn info_parses_two_and_three_line_forms() {
        let two = parse_info("demo\n1.2\n").unwrap();
        assert_eq!(two.name, "demo");
        assert_eq!(two.version.to_string(), "1.2");
        assert_eq!(two.project_class, None);

        let three = parse_info("demo\n1.2.3-SNAPSHOT\ncom.example.Build\n").unwrap();
        assert_eq!(three.project_class.as_deref(), Some("com.example.Build"));
    }

    #[test]
    fn missing_info_file_in_existing_metadata_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(METADATA_DIR)).unwrap();
        let mut input = Cursor::new(Vec::new());
        let mut output = Vec::new();
        let err = read_info(dir.path(), &mut input, &mut output).unwrap_err();
        assert!(err.to_string().contains("missing"), "{err}");
    }

    #[test]
    fn missing_metadata_prompts_and_writes_the_info_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"demo\n0.1\n".to_vec());
        let mut output = Vec::new();
        let info = read_info(dir.path(), &mut input, &mut output).unwrap();
        assert_eq!(info.name, "demo");
        assert_eq!(info.version.to_string(), "0.1");

        // the descriptor now exists and round-trips
        let mut empty = Cursor::new(Vec::new());
        let reread = read_info(dir.path(), &mut empty, &mut Vec::new()).unwrap();
        assert_eq!(reread, info);
    }

    #[test]
    fn class_selection_prefers_the_unique_discovery() {
        let info = ProjectInfo {
            name: "demo".into(),
            version: Version::parse("1.0").unwrap(),
            project_class: Some("com.example.FromInfo".into()),
        };
        let unique: std::collections::BTreeSet<String> =
            ["com.example.Discovered".to_string()].into();
        assert_eq!(select_project_class(&unique, &info), "com.example.Discovered");

        let none = Default::default();
        assert_eq!(select_project_class(&none, &info), "com.example.FromInfo");

        let ambiguous: std::collections::BTreeSet<String> =
            ["a.One".to_string(), "a.Two".to_string()].into();
        assert_eq!(select_project_class(&ambiguous, &info), "com.example.FromInfo");

        let plain = ProjectInfo { project_class: None, ..info };
        assert_eq!(select_project_class(&none, &plain), DEFAULT_PROJECT_CLASS);
    }

    #[test]
    fn builder_class_recursion_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        write_info(dir.path(), &format!("demo\n1.0\n{BUILDER_PROJECT_CLASS}\n"));
        let loader = Loader::default();
        let mut input = Cursor::new(Vec::new());
        let err = loader.load(dir.path(), &mut input, &mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("builder"), "{err}");
    }

    #[test]
    fn default_class_loads_a_default_project() {
        let dir = tempfile::tempdir().unwrap();
        write_info(dir.path(), "demo\n2.0\n");
        let loader = Loader::default();
        let mut input = Cursor::new(Vec::new());
        let project = loader.load(dir.path(), &mut input, &mut Vec::new()).unwrap();
        assert_eq!(project.name(), "demo");
        assert!(project.tasks().contains("compile"));
        assert!(project.tasks().contains("doc-test"));
    }

    #[test]
    fn unregistered_class_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        write_info(dir.path(), "demo\n1.0\ncom.example.Unknown\n");
        let loader = Loader::default();
        let mut input = Cursor::new(Vec::new());
        let err = loader.load(dir.path(), &mut input, &mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("no constructor"), "{err}");
    }
}
