#![doc = include_str!("../README.md")]
#![warn(rustdoc::all)]
#![deny(unused_must_use, rust_2018_idioms)]

#[macro_use]
extern crate tracing;

pub mod error;
pub use error::{BuildError, BuildIoError, Result};

pub mod utils;

pub mod version;
pub use version::Version;

pub mod filter;
pub use filter::NameFilter;

pub mod path;
pub use path::{PathSet, RelativePath};

pub mod logger;
pub use logger::{LogLevel, Logger};

pub mod analysis;
pub use analysis::ProjectAnalysis;

pub mod testing;
pub use testing::{TestDefinition, TestResult};

pub mod callback;
pub use callback::{AnalysisCallback, AnalysisAdapter};

pub mod incremental;
pub use incremental::StalenessReport;

pub mod compile;
pub use compile::{CompileConfiguration, Compiler};

pub mod task;
pub use task::{Task, TaskMap};

pub mod scheduler;
pub use scheduler::{Job, JobFailure};

pub mod config;
pub use config::{
    CleanOption, CompileOption, DocOption, ManagedOption, PackageOption, ProjectLayout,
    TestOption,
};

pub mod project;
pub use project::{run_action, Project, ProjectBuilder, ProjectInfo};

pub mod bootstrap;
pub use bootstrap::{ConstructorRegistry, Loader};
