//! Project directory layout, configurations and action options.

use crate::{
    filter::{self, NameFilter},
    logger::Logger,
    path::{PathSet, RelativePath},
    utils,
};
use std::{fmt, path::PathBuf};

/// Directory holding the project metadata, relative to the root.
pub const METADATA_DIR: &str = "project";

/// Project descriptor file inside the metadata directory.
pub const INFO_FILE: &str = "info";

/// Optional builder sub-project inside the metadata directory.
pub const BUILDER_DIR: &str = "build";

/// Descriptor consumed by the external dependency resolver.
pub const DEPENDENCIES_FILE: &str = "dependencies";

/// The named classpath scopes.
pub mod configurations {
    pub const COMPILE: &str = "compile";
    pub const TEST: &str = "test";
    pub const RUNTIME: &str = "runtime";
    pub const PROVIDED: &str = "provided";

    pub const ALL: &[&str] = &[COMPILE, TEST, RUNTIME, PROVIDED];
}

/// The conventional directory tree of a project, all paths derived from the
/// root:
///
/// ```text
/// src/main/{scala,resources}
/// src/test/{scala,resources}
/// lib/                lib/managed/<conf>/
/// target/{classes,test-classes,analysis,doc,graph}
/// project/{info,build/}
/// ```
#[derive(Clone, Debug)]
pub struct ProjectLayout {
    root: RelativePath,
}

impl ProjectLayout {
    pub fn new(root: RelativePath) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &RelativePath {
        &self.root
    }

    fn at(&self, components: &[&str]) -> RelativePath {
        let mut path = self.root.clone();
        for component in components {
            // layout components are fixed names, so joining cannot fail
            path = path.join(component).unwrap();
        }
        path
    }

    pub fn main_sources_dir(&self) -> RelativePath {
        self.at(&["src", "main", "scala"])
    }

    pub fn test_sources_dir(&self) -> RelativePath {
        self.at(&["src", "test", "scala"])
    }

    pub fn main_resources_dir(&self) -> RelativePath {
        self.at(&["src", "main", "resources"])
    }

    pub fn test_resources_dir(&self) -> RelativePath {
        self.at(&["src", "test", "resources"])
    }

    pub fn lib_dir(&self) -> RelativePath {
        self.at(&["lib"])
    }

    /// Root of the managed jars, one sub-directory per configuration.
    pub fn managed_root_dir(&self) -> RelativePath {
        self.at(&["lib", "managed"])
    }

    pub fn managed_lib_dir(&self, configuration: &str) -> RelativePath {
        self.managed_root_dir().join(configuration).unwrap_or_else(|_| self.managed_root_dir())
    }

    pub fn target_dir(&self) -> RelativePath {
        self.at(&["target"])
    }

    /// Compiled output of the `compile` configuration, rebased so that
    /// generated class files render relative to it.
    pub fn classes_dir(&self) -> RelativePath {
        self.at(&["target", "classes"]).rebase()
    }

    pub fn test_classes_dir(&self) -> RelativePath {
        self.at(&["target", "test-classes"]).rebase()
    }

    pub fn analysis_dir(&self) -> PathBuf {
        self.at(&["target", "analysis"]).resolve()
    }

    pub fn graph_dir(&self) -> PathBuf {
        self.at(&["target", "graph"]).resolve()
    }

    pub fn main_doc_dir(&self) -> PathBuf {
        self.at(&["target", "doc", "main", "api"]).resolve()
    }

    pub fn test_doc_dir(&self) -> PathBuf {
        self.at(&["target", "doc", "test", "api"]).resolve()
    }

    pub fn metadata_dir(&self) -> RelativePath {
        self.at(&[METADATA_DIR])
    }

    pub fn info_file(&self) -> PathBuf {
        self.at(&[METADATA_DIR, INFO_FILE]).resolve()
    }

    pub fn builder_dir(&self) -> RelativePath {
        self.at(&[METADATA_DIR, BUILDER_DIR])
    }

    pub fn dependency_descriptor(&self) -> PathBuf {
        self.at(&[METADATA_DIR, DEPENDENCIES_FILE]).resolve()
    }

    /// The main source set: every compiler source under the main source
    /// directory, skipping hidden trees.
    pub fn main_sources(&self) -> PathSet {
        source_set(self.main_sources_dir())
    }

    pub fn test_sources(&self) -> PathSet {
        source_set(self.test_sources_dir())
    }

    /// Unmanaged plus managed jars visible to the given configuration.
    pub fn jars(&self, configuration: &str) -> PathSet {
        PathSet::children(self.lib_dir(), NameFilter::glob("*.jar"))
            .union(PathSet::children(
                self.managed_lib_dir(configuration),
                NameFilter::glob("*.jar"),
            ))
    }
}

fn source_set(dir: RelativePath) -> PathSet {
    let sources = NameFilter::glob(&format!("*.{}", utils::SOURCE_EXTENSION));
    PathSet::descendants(dir, sources.except(filter::default_excludes()))
}

/// Options for the `clean` action.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CleanOption {
    /// Also delete the persisted analysis
    ClearAnalysis,
}

/// JVM targets the compiler can emit code for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TargetPlatform {
    Jvm14,
    Jvm15,
    Msil,
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetPlatform::Jvm14 => f.write_str("jvm-1.4"),
            TargetPlatform::Jvm15 => f.write_str("jvm-1.5"),
            TargetPlatform::Msil => f.write_str("msil"),
        }
    }
}

/// Options for the `compile` actions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CompileOption {
    Deprecation,
    Unchecked,
    Optimize,
    Target(TargetPlatform),
    /// A raw compiler flag passed through unchanged
    Raw(String),
}

impl CompileOption {
    /// The command-line form handed to the compiler.
    pub fn as_arg(&self) -> String {
        match self {
            CompileOption::Deprecation => "-deprecation".to_string(),
            CompileOption::Unchecked => "-unchecked".to_string(),
            CompileOption::Optimize => "-optimise".to_string(),
            CompileOption::Target(platform) => format!("-target:{platform}"),
            CompileOption::Raw(flag) => flag.clone(),
        }
    }
}

/// Options for the `test` action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TestOption {
    /// Test class names excluded from the run
    ExcludeTests(Vec<String>),
}

/// Options for the `package` actions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PackageOption {
    /// Extra entries added to the jar manifest
    ManifestEntries(Vec<(String, String)>),
    MainClass(String),
    JarName(String),
    OutputDir(PathBuf),
    Recursive,
}

/// Options for the `update` action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ManagedOption {
    Synchronize,
    Validate,
    QuietUpdate,
    /// Name of the external resolver to drive
    LibraryManager(String),
}

/// Options for the documentation actions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DocOption {
    /// A bare flag, e.g. `-no-comment`
    Simple(String),
    /// A flag with a value, e.g. `-doc-title` `myproject`
    Compound(String, String),
}

impl DocOption {
    pub fn append_to(&self, args: &mut Vec<String>) {
        match self {
            DocOption::Simple(flag) => args.push(flag.clone()),
            DocOption::Compound(flag, value) => {
                args.push(flag.clone());
                args.push(value.clone());
            }
        }
    }
}

/// Keeps the first of several single-value options and warns about the rest.
pub fn first_or_warn<'a, T>(
    values: impl IntoIterator<Item = &'a T>,
    what: &str,
    log: &Logger,
) -> Option<&'a T>
where
    T: fmt::Debug + 'a,
{
    let mut values = values.into_iter();
    let first = values.next();
    for ignored in values {
        log.warn(format!("duplicate {what} option {ignored:?} ignored, keeping the first"));
    }
    first
}
