//! The project model: a named, versioned unit owning tasks, sub-projects,
//! an analysis and a logger.
//!
//! Projects form a DAG; running an action walks the dependency projects
//! first and the requested project last. Interactive tasks only execute
//! their body in the directly requested project.

use crate::{
    analysis::ProjectAnalysis,
    compile::{self, CompileConfiguration, Compiler},
    config::{
        configurations, first_or_warn, CleanOption, CompileOption, DocOption, ManagedOption,
        PackageOption, ProjectLayout, TestOption,
    },
    error::{BuildError, Result},
    logger::Logger,
    path::RelativePath,
    scheduler::{self, Job, JobFailure},
    task::{Task, TaskMap},
    testing::{self, TestResult},
    utils,
    version::Version,
};
use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::PathBuf,
    process::Command,
    sync::{Arc, Mutex},
};

/// The interpreter binary used by the `run` and `console` actions.
pub const INTERPRETER: &str = "scala";

/// The archiver binary used by the `package` actions.
pub const ARCHIVER: &str = "jar";

/// Environment variable naming the external dependency resolver.
pub const RESOLVER_ENV: &str = "KILN_RESOLVER";

/// Analysis of the test sources, persisted separately from the main one.
const TEST_ANALYSIS_DIR: &str = "test-analysis";

/// Name, version and declared project class of a project.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProjectInfo {
    pub name: String,
    pub version: Version,
    /// Fully qualified project class from the info file, if any
    pub project_class: Option<String>,
}

/// A named, versioned unit with a root directory, a task map, sub-projects,
/// an analysis instance, a logger and an ordered list of project
/// dependencies. Projects live for one invocation of the tool.
pub struct Project {
    info: ProjectInfo,
    layout: ProjectLayout,
    log: Arc<Logger>,
    analysis: Arc<Mutex<ProjectAnalysis>>,
    test_analysis: Arc<Mutex<ProjectAnalysis>>,
    tasks: TaskMap,
    sub_projects: BTreeMap<String, Arc<Project>>,
    dependencies: Vec<Arc<Project>>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.info.name)
            .field("version", &self.info.version)
            .field("root", &self.layout.root().resolve())
            .field("tasks", &self.tasks.names().collect::<Vec<_>>())
            .field("dependencies", &self.dependencies.iter().map(|d| d.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl Project {
    pub fn builder(name: impl Into<String>, version: Version, root: impl Into<PathBuf>) -> ProjectBuilder {
        ProjectBuilder::new(name, version, root)
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn version(&self) -> &Version {
        &self.info.version
    }

    pub fn info(&self) -> &ProjectInfo {
        &self.info
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn log(&self) -> &Arc<Logger> {
        &self.log
    }

    pub fn analysis(&self) -> &Arc<Mutex<ProjectAnalysis>> {
        &self.analysis
    }

    pub fn test_analysis(&self) -> &Arc<Mutex<ProjectAnalysis>> {
        &self.test_analysis
    }

    pub fn tasks(&self) -> &TaskMap {
        &self.tasks
    }

    pub fn sub_projects(&self) -> &BTreeMap<String, Arc<Project>> {
        &self.sub_projects
    }

    pub fn dependencies(&self) -> &[Arc<Project>] {
        &self.dependencies
    }

    /// The classpath of the given configuration: own outputs and jars,
    /// unioned with the dependencies' classpaths, in dependency order and
    /// without duplicates.
    pub fn classpath(&self, configuration: &str) -> Vec<PathBuf> {
        assemble_classpath(&self.layout, &self.dependencies, configuration)
    }

    /// Dependency-first order over the project DAG, with `self` last.
    pub fn execution_order(self: &Arc<Project>) -> Vec<Arc<Project>> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        fn visit(
            project: &Arc<Project>,
            seen: &mut HashSet<String>,
            order: &mut Vec<Arc<Project>>,
        ) {
            if !seen.insert(project.name().to_string()) {
                return;
            }
            for dependency in &project.dependencies {
                visit(dependency, seen, order);
            }
            order.push(Arc::clone(project));
        }
        visit(self, &mut seen, &mut order);
        order
    }

    /// Whether `action` is defined by this project or any dependency.
    pub fn knows_action(self: &Arc<Project>, action: &str) -> bool {
        self.execution_order().iter().any(|p| p.tasks.contains(action))
    }
}

fn assemble_classpath(
    layout: &ProjectLayout,
    dependencies: &[Arc<Project>],
    configuration: &str,
) -> Vec<PathBuf> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |path: PathBuf| {
        if seen.insert(path.clone()) {
            entries.push(path);
        }
    };
    push(layout.classes_dir().resolve());
    if configuration == configurations::TEST {
        push(layout.test_classes_dir().resolve());
    }
    for jar in layout.jars(configuration).evaluate() {
        push(jar.resolve());
    }
    for dependency in dependencies {
        for entry in dependency.classpath(configuration) {
            push(entry);
        }
    }
    entries
}

type TaskFactory = Box<dyn FnOnce(&TaskMap) -> Task>;

/// Configures and constructs a [`Project`] with the default task set.
pub struct ProjectBuilder {
    info: ProjectInfo,
    root: PathBuf,
    dependencies: Vec<Arc<Project>>,
    sub_projects: BTreeMap<String, Arc<Project>>,
    compiler: Compiler,
    runner_jar: PathBuf,
    definition_super: String,
    extra_tasks: Vec<(String, TaskFactory)>,
    clean_options: Vec<CleanOption>,
    compile_options: Vec<CompileOption>,
    test_options: Vec<TestOption>,
    package_options: Vec<PackageOption>,
    managed_options: Vec<ManagedOption>,
    doc_options: Vec<DocOption>,
}

impl ProjectBuilder {
    pub fn new(name: impl Into<String>, version: Version, root: impl Into<PathBuf>) -> Self {
        Self {
            info: ProjectInfo { name: name.into(), version, project_class: None },
            root: root.into(),
            dependencies: Vec::new(),
            sub_projects: BTreeMap::new(),
            compiler: Compiler::default(),
            runner_jar: PathBuf::from("kiln-runner.jar"),
            definition_super: crate::bootstrap::PROJECT_DEFINITION_SUPER.to_string(),
            extra_tasks: Vec::new(),
            clean_options: Vec::new(),
            compile_options: Vec::new(),
            test_options: Vec::new(),
            package_options: Vec::new(),
            managed_options: Vec::new(),
            doc_options: Vec::new(),
        }
    }

    #[must_use]
    pub fn project_class(mut self, class: Option<String>) -> Self {
        self.info.project_class = class;
        self
    }

    #[must_use]
    pub fn depends_on(mut self, dependency: Arc<Project>) -> Self {
        self.dependencies.push(dependency);
        self
    }

    #[must_use]
    pub fn sub_project(mut self, project: Arc<Project>) -> Self {
        self.sub_projects.insert(project.name().to_string(), project);
        self
    }

    #[must_use]
    pub fn compiler(mut self, compiler: Compiler) -> Self {
        self.compiler = compiler;
        self
    }

    #[must_use]
    pub fn runner_jar(mut self, jar: impl Into<PathBuf>) -> Self {
        self.runner_jar = jar.into();
        self
    }

    /// Registers an additional task under `name`, as a project definition
    /// would. The factory receives the tasks registered so far, so custom
    /// tasks can depend on the default set.
    #[must_use]
    pub fn task(
        mut self,
        name: impl Into<String>,
        factory: impl FnOnce(&TaskMap) -> Task + 'static,
    ) -> Self {
        self.extra_tasks.push((name.into(), Box::new(factory)));
        self
    }

    #[must_use]
    pub fn clean_options(mut self, options: impl IntoIterator<Item = CleanOption>) -> Self {
        self.clean_options.extend(options);
        self
    }

    #[must_use]
    pub fn compile_options(mut self, options: impl IntoIterator<Item = CompileOption>) -> Self {
        self.compile_options.extend(options);
        self
    }

    #[must_use]
    pub fn test_options(mut self, options: impl IntoIterator<Item = TestOption>) -> Self {
        self.test_options.extend(options);
        self
    }

    #[must_use]
    pub fn package_options(mut self, options: impl IntoIterator<Item = PackageOption>) -> Self {
        self.package_options.extend(options);
        self
    }

    #[must_use]
    pub fn managed_options(mut self, options: impl IntoIterator<Item = ManagedOption>) -> Self {
        self.managed_options.extend(options);
        self
    }

    #[must_use]
    pub fn doc_options(mut self, options: impl IntoIterator<Item = DocOption>) -> Self {
        self.doc_options.extend(options);
        self
    }

    pub fn build(self) -> Result<Arc<Project>> {
        let layout = ProjectLayout::new(RelativePath::root(self.root));
        let log = Arc::new(Logger::new(self.info.name.clone()));
        let analysis = Arc::new(Mutex::new(ProjectAnalysis::load(
            layout.root(),
            &layout.classes_dir(),
            &layout.analysis_dir(),
        )?));
        let test_analysis_dir = layout.target_dir().resolve().join(TEST_ANALYSIS_DIR);
        let test_analysis = Arc::new(Mutex::new(ProjectAnalysis::load(
            layout.root(),
            &layout.test_classes_dir(),
            &test_analysis_dir,
        )?));

        let ctx = TaskContext {
            name: self.info.name.clone(),
            version: self.info.version.clone(),
            layout: layout.clone(),
            log: Arc::clone(&log),
            analysis: Arc::clone(&analysis),
            test_analysis: Arc::clone(&test_analysis),
            test_analysis_dir,
            compiler: self.compiler,
            dependencies: self.dependencies.clone(),
            runner_jar: self.runner_jar,
            definition_super: self.definition_super,
            clean_options: self.clean_options,
            compile_options: self.compile_options,
            test_options: self.test_options,
            package_options: self.package_options,
            managed_options: self.managed_options,
            doc_options: self.doc_options,
        };
        let mut tasks = register_default_tasks(&ctx)?;
        for (name, factory) in self.extra_tasks {
            let task = factory(&tasks);
            tasks.register(&name, task)?;
        }

        Ok(Arc::new(Project {
            info: self.info,
            layout,
            log,
            analysis,
            test_analysis,
            tasks,
            sub_projects: self.sub_projects,
            dependencies: self.dependencies,
        }))
    }
}

/// Everything the default task bodies capture. Cheap to clone into each
/// closure; none of it refers back to the finished [`Project`].
#[derive(Clone)]
struct TaskContext {
    name: String,
    version: Version,
    layout: ProjectLayout,
    log: Arc<Logger>,
    analysis: Arc<Mutex<ProjectAnalysis>>,
    test_analysis: Arc<Mutex<ProjectAnalysis>>,
    test_analysis_dir: PathBuf,
    compiler: Compiler,
    dependencies: Vec<Arc<Project>>,
    runner_jar: PathBuf,
    definition_super: String,
    clean_options: Vec<CleanOption>,
    compile_options: Vec<CompileOption>,
    test_options: Vec<TestOption>,
    package_options: Vec<PackageOption>,
    managed_options: Vec<ManagedOption>,
    doc_options: Vec<DocOption>,
}

impl TaskContext {
    fn classpath(&self, configuration: &str) -> Vec<PathBuf> {
        assemble_classpath(&self.layout, &self.dependencies, configuration)
    }

    fn compile_configuration(&self, test: bool) -> CompileConfiguration {
        let (label, sources, output, analysis_dir, configuration) = if test {
            (
                "test-compile",
                self.layout.test_sources(),
                self.layout.test_classes_dir(),
                self.test_analysis_dir.clone(),
                configurations::TEST,
            )
        } else {
            (
                "compile",
                self.layout.main_sources(),
                self.layout.classes_dir(),
                self.layout.analysis_dir(),
                configurations::COMPILE,
            )
        };
        CompileConfiguration {
            label: label.to_string(),
            sources,
            output,
            classpath: self.classpath(configuration),
            analysis_dir,
            root: self.layout.root().clone(),
            test_supers: testing::test_super_classes(),
            definition_super: self.definition_super.clone(),
            options: self.compile_options.iter().map(CompileOption::as_arg).collect(),
        }
    }

    fn run_compile(&self, test: bool) -> Option<String> {
        let config = self.compile_configuration(test);
        let analysis = if test { &self.test_analysis } else { &self.analysis };
        match compile::compile(&config, analysis, &self.compiler, &self.log) {
            Ok(_) => None,
            Err(err) => Some(err.to_string()),
        }
    }

    fn jar_file_name(&self, suffix: &str) -> String {
        let base = first_or_warn(
            self.package_options.iter().filter_map(|o| match o {
                PackageOption::JarName(name) => Some(name),
                _ => None,
            }),
            "jar-name",
            &self.log,
        );
        match base {
            Some(name) => name.clone(),
            None => format!("{}{suffix}-{}.jar", self.name, self.version),
        }
    }
}

fn err_to_failure(result: Result<()>) -> Option<String> {
    result.err().map(|err| err.to_string())
}

/// Registers the default action set of a project.
fn register_default_tasks(ctx: &TaskContext) -> Result<TaskMap> {
    let mut tasks = TaskMap::new();

    let clean = {
        let ctx = ctx.clone();
        tasks.register(
            "clean",
            Task::new(move || err_to_failure(clean_action(&ctx)))
                .described_as("Deletes compiled outputs and generated docs."),
        )?
    };

    let update = {
        let ctx = ctx.clone();
        tasks.register(
            "update",
            Task::new(move || err_to_failure(update_action(&ctx)))
                .described_as("Resolves managed library dependencies."),
        )?
    };

    let compile = {
        let ctx = ctx.clone();
        tasks.register(
            "compile",
            Task::new(move || ctx.run_compile(false))
                .described_as("Incrementally compiles main sources.")
                .with_cost(4),
        )?
    };

    let test_compile = {
        let ctx = ctx.clone();
        tasks.register(
            "testCompile",
            Task::new(move || ctx.run_compile(true))
                .described_as("Incrementally compiles test sources.")
                .depends_on([Arc::clone(&compile)])
                .with_cost(2),
        )?
    };

    {
        let ctx = ctx.clone();
        tasks.register(
            "test",
            Task::new(move || test_action(&ctx))
                .described_as("Runs all discovered tests.")
                .depends_on([Arc::clone(&test_compile)])
                .with_cost(4),
        )?;
    }

    {
        let ctx = ctx.clone();
        tasks.register(
            "run",
            Task::new(move || run_action_body(&ctx))
                .described_as("Runs the declared main class.")
                .depends_on([Arc::clone(&compile)])
                .interactive(),
        )?;
    }

    {
        let ctx = ctx.clone();
        tasks.register(
            "console",
            Task::new(move || console_action(&ctx))
                .described_as("Starts the interpreter with the project classpath.")
                .depends_on([Arc::clone(&compile)])
                .interactive(),
        )?;
    }

    let doc = {
        let ctx = ctx.clone();
        tasks.register(
            "doc",
            Task::new(move || doc_action(&ctx, false))
                .described_as("Generates API documentation for main sources.")
                .depends_on([Arc::clone(&compile)]),
        )?
    };

    {
        let ctx = ctx.clone();
        tasks.register(
            "docTest",
            Task::new(move || doc_action(&ctx, true))
                .described_as("Generates API documentation for test sources.")
                .depends_on([Arc::clone(&test_compile)]),
        )?;
    }

    let package = {
        let ctx = ctx.clone();
        tasks.register(
            "package",
            Task::new(move || package_action(&ctx, PackageKind::Classes))
                .described_as("Packages compiled classes into a jar.")
                .depends_on([Arc::clone(&compile)]),
        )?
    };

    let package_test = {
        let ctx = ctx.clone();
        tasks.register(
            "packageTest",
            Task::new(move || package_action(&ctx, PackageKind::TestClasses))
                .described_as("Packages compiled test classes into a jar.")
                .depends_on([Arc::clone(&test_compile)]),
        )?
    };

    let package_src = {
        let ctx = ctx.clone();
        tasks.register(
            "packageSrc",
            Task::new(move || package_action(&ctx, PackageKind::Sources))
                .described_as("Packages main sources into a jar."),
        )?
    };

    let package_docs = {
        let ctx = ctx.clone();
        tasks.register(
            "packageDocs",
            Task::new(move || package_action(&ctx, PackageKind::Docs))
                .described_as("Packages generated documentation into a jar.")
                .depends_on([Arc::clone(&doc)]),
        )?
    };

    tasks.register(
        "packageAll",
        Task::empty()
            .described_as("Produces all artifact jars.")
            .depends_on([package.clone(), package_test, package_src, package_docs]),
    )?;

    {
        let test = tasks.get("test").cloned().expect("test registered above");
        tasks.register(
            "release",
            Task::new(move || {
                clean
                    .run()
                    .or_else(|| update.run())
                    .or_else(|| test.run())
                    .or_else(|| package.run())
            })
            .described_as("Cleans, compiles, tests and packages.")
            .with_cost(8),
        )?;
    }

    {
        let ctx = ctx.clone();
        tasks.register(
            "graph",
            Task::new(move || {
                err_to_failure(
                    ctx.analysis.lock().unwrap().write_dot_graphs(&ctx.layout.graph_dir()),
                )
            })
            .described_as("Writes the dependency graphs in dot format."),
        )?;
    }

    Ok(tasks)
}

fn clean_action(ctx: &TaskContext) -> Result<()> {
    let clear_analysis = ctx.clean_options.contains(&CleanOption::ClearAnalysis);
    let target = ctx.layout.target_dir().resolve();
    if target.exists() {
        let analysis_dir = ctx.layout.analysis_dir();
        for entry in fs::read_dir(&target).map_err(|err| BuildError::io(err, &target))? {
            let entry = entry.map_err(|err| BuildError::io(err, &target))?;
            let path = entry.path();
            if !clear_analysis && (path == analysis_dir || path == ctx.test_analysis_dir) {
                continue;
            }
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|err| BuildError::io(err, &path))?;
        }
    }
    if clear_analysis {
        *ctx.analysis.lock().unwrap() = ProjectAnalysis::new();
        *ctx.test_analysis.lock().unwrap() = ProjectAnalysis::new();
        ctx.log.info("Cleaned outputs and analysis.");
    } else {
        ctx.log.info("Cleaned outputs.");
    }
    Ok(())
}

fn update_action(ctx: &TaskContext) -> Result<()> {
    let descriptor = ctx.layout.dependency_descriptor();
    let validate = ctx.managed_options.contains(&ManagedOption::Validate);
    if !descriptor.exists() {
        if validate {
            return Err(BuildError::Resolution(format!(
                "dependency descriptor \"{}\" is missing",
                descriptor.display()
            )));
        }
        ctx.log.info("No dependency descriptor, nothing to update.");
        return Ok(());
    }

    let managed_root = ctx.layout.managed_root_dir().resolve();
    if ctx.managed_options.contains(&ManagedOption::Synchronize) && managed_root.exists() {
        fs::remove_dir_all(&managed_root).map_err(|err| BuildError::io(err, &managed_root))?;
    }
    fs::create_dir_all(&managed_root).map_err(|err| BuildError::io(err, &managed_root))?;

    let resolver = ctx
        .managed_options
        .iter()
        .find_map(|o| match o {
            ManagedOption::LibraryManager(name) => Some(name.clone()),
            _ => None,
        })
        .or_else(|| std::env::var(RESOLVER_ENV).ok())
        .ok_or_else(|| {
            BuildError::Resolution("no library manager configured for managed dependencies".into())
        })?;

    let quiet = ctx.managed_options.contains(&ManagedOption::QuietUpdate);
    if !quiet {
        ctx.log.info(format!("Updating managed dependencies with `{resolver}`..."));
    }
    let output = Command::new(&resolver)
        .arg(&descriptor)
        .arg(&managed_root)
        .output()
        .map_err(|err| BuildError::io(err, &resolver))?;
    if !quiet {
        compile::log_process_output(&output, &ctx.log);
    }
    if output.status.success() {
        Ok(())
    } else {
        Err(BuildError::Resolution(format!("`{resolver}` exited with {}", output.status)))
    }
}

fn test_action(ctx: &TaskContext) -> Option<String> {
    let tests = {
        let main = ctx.analysis.lock().unwrap();
        let test = ctx.test_analysis.lock().unwrap();
        let mut all = main.all_tests();
        all.extend(test.all_tests());
        all
    };
    if tests.is_empty() {
        ctx.log.info("No tests to run.");
        return None;
    }
    let excluded: Vec<String> = ctx
        .test_options
        .iter()
        .flat_map(|TestOption::ExcludeTests(names)| names.iter().cloned())
        .collect();
    let classpath = ctx.classpath(configurations::TEST);
    match testing::run_tests(&tests, &classpath, &ctx.runner_jar, &excluded, &ctx.log) {
        Ok(TestResult::Passed) => None,
        Ok(outcome) => Some(format!("tests {outcome}")),
        Err(err) => Some(err.to_string()),
    }
}

fn run_action_body(ctx: &TaskContext) -> Option<String> {
    let Some(main_class) = first_or_warn(
        ctx.package_options.iter().filter_map(|o| match o {
            PackageOption::MainClass(name) => Some(name),
            _ => None,
        }),
        "main-class",
        &ctx.log,
    ) else {
        return Some("no main class configured (set the main-class package option)".to_string());
    };
    let classpath = ctx.classpath(configurations::RUNTIME);
    let status = Command::new(INTERPRETER)
        .arg("-cp")
        .arg(utils::join_path_list(
            classpath.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        ))
        .arg(main_class)
        .status();
    match status {
        Ok(status) if status.success() => None,
        Ok(status) => Some(format!("`{main_class}` exited with {status}")),
        Err(err) => Some(format!("could not launch `{INTERPRETER}`: {err}")),
    }
}

fn console_action(ctx: &TaskContext) -> Option<String> {
    let classpath = ctx.classpath(configurations::TEST);
    let status = Command::new(INTERPRETER)
        .arg("-cp")
        .arg(utils::join_path_list(
            classpath.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        ))
        .status();
    match status {
        Ok(status) if status.success() => None,
        Ok(status) => Some(format!("console exited with {status}")),
        Err(err) => Some(format!("could not launch `{INTERPRETER}`: {err}")),
    }
}

fn doc_action(ctx: &TaskContext, test: bool) -> Option<String> {
    let (sources, destination, configuration) = if test {
        (ctx.layout.test_sources(), ctx.layout.test_doc_dir(), configurations::TEST)
    } else {
        (ctx.layout.main_sources(), ctx.layout.main_doc_dir(), configurations::COMPILE)
    };
    let mut extra = Vec::new();
    for option in &ctx.doc_options {
        option.append_to(&mut extra);
    }
    let sources = sources.evaluate();
    err_to_failure(compile::generate_docs(
        &sources,
        &ctx.classpath(configuration),
        &destination,
        &extra,
        &ctx.log,
    ))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PackageKind {
    Classes,
    TestClasses,
    Sources,
    Docs,
}

fn package_action(ctx: &TaskContext, kind: PackageKind) -> Option<String> {
    err_to_failure(package_jar(ctx, kind))
}

/// Builds a jar through the external archiver. The manifest is written next
/// to the jar and handed to the archiver when a main class or extra entries
/// are configured.
fn package_jar(ctx: &TaskContext, kind: PackageKind) -> Result<()> {
    let (content_dir, suffix) = match kind {
        PackageKind::Classes => (ctx.layout.classes_dir().resolve(), ""),
        PackageKind::TestClasses => (ctx.layout.test_classes_dir().resolve(), "-test"),
        PackageKind::Sources => (ctx.layout.main_sources_dir().resolve(), "-src"),
        PackageKind::Docs => (ctx.layout.main_doc_dir(), "-docs"),
    };
    if !content_dir.exists() {
        return Err(BuildError::msg(format!(
            "nothing to package: \"{}\" does not exist",
            content_dir.display()
        )));
    }

    let output_dir = first_or_warn(
        ctx.package_options.iter().filter_map(|o| match o {
            PackageOption::OutputDir(dir) => Some(dir),
            _ => None,
        }),
        "output-dir",
        &ctx.log,
    )
    .cloned()
    .unwrap_or_else(|| ctx.layout.target_dir().resolve());
    fs::create_dir_all(&output_dir).map_err(|err| BuildError::io(err, &output_dir))?;
    let jar = output_dir.join(ctx.jar_file_name(suffix));

    let main_class = first_or_warn(
        ctx.package_options.iter().filter_map(|o| match o {
            PackageOption::MainClass(class) => Some(class),
            _ => None,
        }),
        "main-class",
        &ctx.log,
    );
    let manifest_entries: Vec<(String, String)> = ctx
        .package_options
        .iter()
        .filter_map(|o| match o {
            PackageOption::ManifestEntries(entries) => Some(entries.clone()),
            _ => None,
        })
        .flatten()
        .collect();

    let mut cmd = Command::new(ARCHIVER);
    if main_class.is_some() || !manifest_entries.is_empty() {
        let mut manifest = String::new();
        if let Some(class) = main_class {
            manifest.push_str(&format!("Main-Class: {class}\n"));
        }
        for (key, value) in &manifest_entries {
            manifest.push_str(&format!("{key}: {value}\n"));
        }
        let manifest_file = output_dir.join("MANIFEST.MF");
        utils::write_file(&manifest_file, &manifest)?;
        cmd.arg("cfm").arg(&jar).arg(&manifest_file);
    } else {
        cmd.arg("cf").arg(&jar);
    }
    // class and doc trees are always packaged whole; source jars only pick
    // up nested directories with the `Recursive` option
    let recursive = !matches!(kind, PackageKind::Sources)
        || ctx.package_options.iter().any(|o| matches!(o, PackageOption::Recursive));
    if recursive {
        cmd.arg("-C").arg(&content_dir).arg(".");
    } else {
        let entries = fs::read_dir(&content_dir).map_err(|err| BuildError::io(err, &content_dir))?;
        for entry in entries.filter_map(std::result::Result::ok) {
            if entry.path().is_file() {
                cmd.arg("-C").arg(&content_dir).arg(entry.file_name());
            }
        }
    }
    debug!(?cmd, "invoking archiver");
    let output = cmd.output().map_err(|err| BuildError::io(err, ARCHIVER))?;
    compile::log_process_output(&output, &ctx.log);
    if output.status.success() {
        ctx.log.info(format!("Packaged \"{}\".", jar.display()));
        Ok(())
    } else {
        Err(BuildError::msg(format!("packaging \"{}\" failed", jar.display())))
    }
}

/// Runs `action` on `project` and its dependency projects, dependencies
/// first. Interactive task bodies execute only in the requested project.
///
/// With `parallel = Some(max)`, one job per project runs on the bounded
/// scheduler with per-project log buffering; `None` runs sequentially in
/// deterministic order.
pub fn run_action(
    project: &Arc<Project>,
    action: &str,
    parallel: Option<usize>,
) -> Result<(), Vec<JobFailure>> {
    let order = project.execution_order();
    let involved: Vec<Arc<Project>> =
        order.iter().filter(|p| p.tasks().contains(action)).cloned().collect();
    if involved.is_empty() {
        return Err(vec![JobFailure {
            job: action.to_string(),
            message: format!("action `{action}` is not defined by any project"),
        }]);
    }

    match parallel {
        None => {
            for p in &involved {
                let requested = Arc::ptr_eq(p, project);
                let task = p.tasks().get(action).expect("filtered above");
                let skip = |t: &Task| t.is_interactive() && !requested;
                if let Some(failure) = task.run_filtered(&skip) {
                    return Err(vec![JobFailure {
                        job: format!("{} / {action}", p.name()),
                        message: failure,
                    }]);
                }
            }
            Ok(())
        }
        Some(max_tasks) => {
            let index: BTreeMap<String, usize> = involved
                .iter()
                .enumerate()
                .map(|(i, p)| (p.name().to_string(), i))
                .collect();
            let jobs: Vec<Job> = involved
                .iter()
                .map(|p| {
                    let requested = Arc::ptr_eq(p, project);
                    let task = Arc::clone(p.tasks().get(action).expect("filtered above"));
                    let dependencies = providers(p, action)
                        .into_iter()
                        .filter_map(|name| index.get(&name).copied())
                        .collect();
                    let log = Arc::clone(p.log());
                    log.start_buffering();
                    let flush_log = Arc::clone(&log);
                    let cost = task.cost();
                    Job::new(format!("{} / {action}", p.name()), dependencies, move || {
                        task.run_filtered(&|t| t.is_interactive() && !requested)
                    })
                    .with_cost(cost)
                    .on_complete(move || flush_log.flush())
                })
                .collect();
            let failures = scheduler::run_jobs(jobs, max_tasks);
            if failures.is_empty() {
                Ok(())
            } else {
                Err(failures)
            }
        }
    }
}

/// The nearest dependency projects that define `action`: immediate
/// dependencies that define it, or their providers when they do not.
fn providers(project: &Arc<Project>, action: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    fn visit(
        project: &Arc<Project>,
        action: &str,
        seen: &mut HashSet<String>,
        found: &mut Vec<String>,
    ) {
        for dependency in project.dependencies() {
            if !seen.insert(dependency.name().to_string()) {
                continue;
            }
            if dependency.tasks().contains(action) {
                found.push(dependency.name().to_string());
            } else {
                visit(dependency, action, seen, found);
            }
        }
    }
    visit(project, action, &mut seen, &mut found);
    found
}
