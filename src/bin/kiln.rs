//! The `kiln` command line interface.
//!
//! Batch mode runs the given actions left to right and exits non-zero on
//! the first failure. Without actions an interactive shell starts, offering
//! the same actions plus the meta verbs (`projects`, `actions`,
//! `project <name>`, `current`, `set`/`get`, log levels, `exit`).

use clap::Parser;
use kiln::{
    logger::LogLevel,
    project::{run_action, Project},
    Loader,
};
use std::{
    collections::BTreeMap,
    io::{self, BufRead, Write},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
    time::Instant,
};
use tracing_subscriber::EnvFilter;
use yansi::Paint;

#[derive(Parser)]
#[command(name = "kiln", version, about = "Incremental build tool for JVM-family sources")]
struct Cli {
    /// Actions to run, left to right; none starts the interactive shell
    actions: Vec<String>,

    /// Project root directory
    #[arg(long, short = 'p', default_value = ".")]
    project: PathBuf,

    /// Run project jobs in parallel, optionally bounding the thread budget
    #[arg(long, value_name = "N", num_args = 0..=1, default_missing_value = "0")]
    parallel: Option<usize>,

    /// Initial log level
    #[arg(long, default_value = "info")]
    log_level: LogLevel,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str())),
        )
        .with_target(false)
        .init();

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    let project = match Loader::default().load(&cli.project, &mut input, &mut output) {
        Ok(project) => project,
        Err(err) => {
            eprintln!("{} {err}", Paint::red("error:"));
            return ExitCode::FAILURE;
        }
    };
    project.log().set_level(cli.log_level);

    let parallel = cli.parallel.map(|n| if n == 0 { kiln::scheduler::default_max_tasks() } else { n });
    let mut session = Session { current: project, parallel, properties: BTreeMap::new() };

    if cli.actions.is_empty() {
        session.interactive(&mut input, &mut output)
    } else {
        for action in &cli.actions {
            if !session.run(action) {
                return ExitCode::FAILURE;
            }
        }
        ExitCode::SUCCESS
    }
}

struct Session {
    current: Arc<Project>,
    parallel: Option<usize>,
    properties: BTreeMap<String, String>,
}

impl Session {
    /// Runs one action against the current project, reporting elapsed time.
    /// Returns whether the action succeeded.
    fn run(&self, action: &str) -> bool {
        let started = Instant::now();
        match run_action(&self.current, action, self.parallel) {
            Ok(()) => {
                let elapsed = started.elapsed().as_secs_f32();
                println!("{} ({elapsed:.1} s)", Paint::green("Build successful."));
                true
            }
            Err(failures) => {
                for failure in &failures {
                    eprintln!("{} {}: {}", Paint::red("error:"), failure.job, failure.message);
                }
                false
            }
        }
    }

    fn interactive(&mut self, input: &mut dyn BufRead, output: &mut dyn Write) -> ExitCode {
        loop {
            let _ = write!(output, "> ");
            let _ = output.flush();
            let mut line = String::new();
            match input.read_line(&mut line) {
                Ok(0) | Err(_) => return ExitCode::SUCCESS,
                Ok(_) => {}
            }
            let mut words = line.split_whitespace();
            let Some(verb) = words.next() else { continue };
            let argument = words.next();
            match (verb, argument) {
                ("exit" | "quit", _) => return ExitCode::SUCCESS,
                ("projects", _) => {
                    for project in self.current.execution_order() {
                        println!("  {} {}", project.name(), project.version());
                    }
                }
                ("actions", _) => {
                    for (name, task) in self.current.tasks().iter() {
                        match task.description() {
                            Some(description) => println!("  {name}: {description}"),
                            None => println!("  {name}"),
                        }
                    }
                }
                ("current", _) => println!("{}", self.current.name()),
                ("project", Some(name)) => match self.find_project(name) {
                    Some(project) => {
                        self.current = project;
                        println!("Set current project to {}", self.current.name());
                    }
                    None => eprintln!("{} unknown project `{name}`", Paint::red("error:")),
                },
                ("project", None) => eprintln!("usage: project <name>"),
                ("set", Some(name)) => match words.next() {
                    Some(value) => {
                        self.properties.insert(name.to_string(), value.to_string());
                    }
                    None => eprintln!("usage: set <name> <value>"),
                },
                ("get", Some(name)) => match self.property(name) {
                    Some(value) => println!("{value}"),
                    None => eprintln!("{} no property `{name}`", Paint::red("error:")),
                },
                ("get", None) => eprintln!("usage: get <name>"),
                ("trace" | "debug" | "info" | "warn" | "error", _) => {
                    // unwrap is fine, the verb list mirrors LogLevel
                    let level: LogLevel = verb.parse().unwrap();
                    for project in self.current.execution_order() {
                        project.log().set_level(level);
                    }
                    println!("Set log level to {level}");
                }
                (action, _) => {
                    if self.current.knows_action(action) {
                        self.run(action);
                    } else {
                        eprintln!("{} unknown action `{action}`", Paint::red("error:"));
                    }
                }
            }
        }
    }

    fn find_project(&self, name: &str) -> Option<Arc<Project>> {
        self.current
            .execution_order()
            .into_iter()
            .chain(self.current.sub_projects().values().cloned())
            .find(|p| p.name() == name)
    }

    fn property(&self, name: &str) -> Option<String> {
        match name {
            "name" => Some(self.current.name().to_string()),
            "version" => Some(self.current.version().to_string()),
            _ => self.properties.get(name).cloned(),
        }
    }
}
