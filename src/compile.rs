//! Invocation of the external compiler and the compile lifecycle.
//!
//! A compile snapshots the configured sources, asks the staleness engine
//! what must be rebuilt, hands those sources to the external compiler with
//! the analysis plugin enabled, and replays the plugin's fact stream into
//! the analysis. The analysis is saved at the end of a successful compile
//! and reloaded from disk after a failed one, so failures never corrupt the
//! previously persisted state.

use crate::{
    analysis::ProjectAnalysis,
    callback::{self, AnalysisAdapter},
    error::{BuildError, Result},
    incremental::{self, StalenessReport},
    logger::Logger,
    path::{PathSet, RelativePath},
    utils,
};
use itertools::Itertools;
use std::{
    fs,
    io::BufReader,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
    sync::{Arc, Mutex},
};

/// The name of the compiler binary on the system.
pub const COMPILER: &str = "scalac";

/// The name of the documentation generator binary on the system.
pub const DOC_GENERATOR: &str = "scaladoc";

/// Environment variable overriding the compiler binary.
pub const COMPILER_PATH_ENV: &str = "KILN_COMPILER";

/// Everything a compilation pass needs to know.
#[derive(Clone, Debug)]
pub struct CompileConfiguration {
    /// Label used in log output, e.g. `compile` or `test-compile`
    pub label: String,
    /// The source files to consider
    pub sources: PathSet,
    /// Directory the compiler writes class files to
    pub output: RelativePath,
    /// Jars and class directories visible to the compiler
    pub classpath: Vec<PathBuf>,
    /// Directory the analysis is persisted under
    pub analysis_dir: PathBuf,
    /// The project root anchoring relative source paths
    pub root: RelativePath,
    /// Super classes whose subclasses are recorded as tests
    pub test_supers: Vec<String>,
    /// Super class whose subclasses are recorded as project definitions
    pub definition_super: String,
    /// Additional compiler options
    pub options: Vec<String>,
}

/// Abstraction over the compiler command line utility.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Compiler {
    /// Path to the compiler executable
    pub path: PathBuf,
}

impl Default for Compiler {
    fn default() -> Self {
        let path =
            std::env::var_os(COMPILER_PATH_ENV).map(PathBuf::from).unwrap_or_else(|| {
                PathBuf::from(COMPILER)
            });
        Self { path }
    }
}

impl Compiler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Invokes `--version` and returns the version line the compiler
    /// reports.
    pub fn version(&self) -> Result<String> {
        let mut cmd = Command::new(&self.path);
        cmd.arg("-version").stdin(Stdio::piped()).stderr(Stdio::piped()).stdout(Stdio::piped());
        debug!(?cmd, "getting compiler version");
        let output = cmd.output().map_err(|err| BuildError::io(err, &self.path))?;
        let raw = if output.stdout.is_empty() { output.stderr } else { output.stdout };
        String::from_utf8_lossy(&raw)
            .lines()
            .find(|l| !l.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| BuildError::msg("version not found in compiler output"))
    }

    fn configure_cmd(
        &self,
        config: &CompileConfiguration,
        sources: &[RelativePath],
        callback_id: u32,
        facts_dir: &Path,
    ) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.stdin(Stdio::piped()).stderr(Stdio::piped()).stdout(Stdio::piped());
        cmd.env(callback::CALLBACK_DIR_ENV, facts_dir);
        cmd.arg("-d").arg(config.output.resolve());
        if !config.classpath.is_empty() {
            cmd.arg("-classpath").arg(utils::join_path_list(
                config.classpath.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            ));
        }
        cmd.args(&config.options);
        cmd.arg(callback::plugin_option(callback_id));
        cmd.args(sources.iter().map(|s| s.resolve()));
        cmd
    }
}

/// Runs an incremental compilation pass.
///
/// Returns the staleness report of the pass; `report.modified` is the set of
/// sources that were handed to the compiler.
pub fn compile(
    config: &CompileConfiguration,
    analysis: &Arc<Mutex<ProjectAnalysis>>,
    compiler: &Compiler,
    log: &Logger,
) -> Result<StalenessReport> {
    let snapshot = config.sources.evaluate();
    trace!("{}: {} source(s) in snapshot", config.label, snapshot.len());

    let report = {
        let mut analysis = analysis.lock().unwrap();
        incremental::dirty_sources(&snapshot, &config.classpath, &mut analysis, log)
    };

    if report.modified.is_empty() {
        log.info("Nothing to compile.");
        if !report.removed.is_empty() {
            // deletions changed the analysis even though the compiler did not run
            analysis.lock().unwrap().save(&config.analysis_dir)?;
        }
        return Ok(report);
    }

    let output_dir = config.output.resolve();
    fs::create_dir_all(&output_dir).map_err(|err| BuildError::io(err, &output_dir))?;

    let facts_dir = std::env::temp_dir().join("kiln-callbacks");
    fs::create_dir_all(&facts_dir).map_err(|err| BuildError::io(err, &facts_dir))?;

    let adapter = AnalysisAdapter::new(
        Arc::clone(analysis),
        config.root.clone(),
        config.output.clone(),
        config.test_supers.clone(),
        config.definition_super.clone(),
    );
    let id = callback::register(Arc::new(Mutex::new(adapter)));

    log.info(format!("Compiling {} source(s)...", report.modified.len()));
    let sources: Vec<_> = report.modified.iter().cloned().collect();
    let mut cmd = compiler.configure_cmd(config, &sources, id, &facts_dir);
    debug!(?cmd, "invoking compiler");
    let run = cmd.output();

    let outcome = finish_compile(config, analysis, run, id, &facts_dir, log);
    callback::unregister(id);
    outcome?;
    Ok(report)
}

fn finish_compile(
    config: &CompileConfiguration,
    analysis: &Arc<Mutex<ProjectAnalysis>>,
    run: std::io::Result<Output>,
    id: u32,
    facts_dir: &Path,
    log: &Logger,
) -> Result<()> {
    let output = match run {
        Ok(output) => output,
        Err(err) => {
            reload(config, analysis)?;
            return Err(BuildError::compile(format!("could not start the compiler: {err}")));
        }
    };
    log_process_output(&output, log);

    let facts = callback::facts_file(facts_dir, id);
    if facts.exists() {
        let file = fs::File::open(&facts).map_err(|err| BuildError::io(err, &facts))?;
        if let Some(cb) = callback::lookup(id) {
            callback::replay(BufReader::new(file), &mut *cb.lock().unwrap())?;
        }
        let _ = fs::remove_file(&facts);
    }

    if output.status.success() {
        analysis.lock().unwrap().save(&config.analysis_dir)?;
        log.info("Compilation successful.");
        Ok(())
    } else {
        // discard the partially mutated analysis so a failed compile cannot
        // corrupt the previously persisted state
        reload(config, analysis)?;
        Err(BuildError::compile(format!("{} failed", config.label)))
    }
}

fn reload(config: &CompileConfiguration, analysis: &Arc<Mutex<ProjectAnalysis>>) -> Result<()> {
    let restored =
        ProjectAnalysis::load(&config.root, &config.output, &config.analysis_dir)?;
    *analysis.lock().unwrap() = restored;
    Ok(())
}

/// Logs a finished child process' streams through the project logger:
/// stdout at info, stderr at warn (error when the process failed).
pub fn log_process_output(output: &Output, log: &Logger) {
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        log.info(line);
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        if output.status.success() {
            log.warn(line);
        } else {
            log.error(line);
        }
    }
}

/// Runs the external documentation generator over `sources`.
pub fn generate_docs(
    sources: &[RelativePath],
    classpath: &[PathBuf],
    destination: &Path,
    options: &[String],
    log: &Logger,
) -> Result<()> {
    if sources.is_empty() {
        log.info("No sources to document.");
        return Ok(());
    }
    fs::create_dir_all(destination).map_err(|err| BuildError::io(err, destination))?;
    let mut cmd = Command::new(DOC_GENERATOR);
    cmd.stdin(Stdio::piped()).stderr(Stdio::piped()).stdout(Stdio::piped());
    cmd.arg("-d").arg(destination);
    if !classpath.is_empty() {
        cmd.arg("-classpath").arg(
            classpath.iter().map(|p| p.display().to_string()).join(
                &utils::PATH_LIST_SEPARATOR.to_string(),
            ),
        );
    }
    cmd.args(options);
    cmd.args(sources.iter().map(|s| s.resolve()));
    debug!(?cmd, "invoking doc generator");
    let output = cmd.output().map_err(|err| BuildError::io(err, DOC_GENERATOR))?;
    log_process_output(&output, log);
    if output.status.success() {
        Ok(())
    } else {
        Err(BuildError::msg("documentation generation failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiler_path_defaults_to_the_system_binary() {
        // the env override is exercised separately to avoid cross-test races
        let compiler = Compiler::new("/opt/scala/bin/scalac");
        assert_eq!(compiler.path, PathBuf::from("/opt/scala/bin/scalac"));
        assert_eq!(Compiler::default().path, PathBuf::from(COMPILER));
    }

    #[test]
    fn command_carries_output_classpath_and_plugin_flag() {
        let dir = tempfile::tempdir().unwrap();
        let root = RelativePath::root(dir.path());
        let output = root.join("target").unwrap().join("classes").unwrap().rebase();
        let config = CompileConfiguration {
            label: "compile".into(),
            sources: PathSet::Empty,
            output: output.clone(),
            classpath: vec![PathBuf::from("/opt/libs/util.jar")],
            analysis_dir: dir.path().join("target/analysis"),
            root: root.clone(),
            test_supers: vec![],
            definition_super: "kiln.ProjectDefinition".into(),
            options: vec!["-deprecation".into()],
        };
        let source = root.join("src").unwrap().join("A.scala").unwrap();
        let cmd = Compiler::default().configure_cmd(&config, &[source], 3, dir.path());
        let args: Vec<String> =
            cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.contains(&"-deprecation".to_string()));
        assert!(args.contains(&"-P:kiln-analyzer:callback:3".to_string()));
        assert!(args.iter().any(|a| a.ends_with("A.scala")));
        let d_pos = args.iter().position(|a| a == "-d").unwrap();
        assert_eq!(args[d_pos + 1], output.resolve().display().to_string());
    }
}
