//! Discovery and execution of external test frameworks.
//!
//! Frameworks are described by the super class their tests extend, whether
//! tests are module objects or plain classes, and the runner that knows how
//! to execute them. Each runner executes in its own `java` process so that
//! framework classes stay isolated from the tool while still seeing the
//! project's runtime classpath.

use crate::{
    error::{BuildError, Result},
    logger::Logger,
    utils,
};
use itertools::Itertools;
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    str::FromStr,
};

/// Separator between test class name and super class in the serialized form.
const SUPER_SEPARATOR: &str = "<<<";

/// Marker prefix for module-object tests in the serialized form.
const MODULE_MARKER: &str = "[module]";

/// Outcome of a framework run. Ordering is by severity, so the overall
/// outcome of several runs is simply the maximum.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum TestResult {
    Passed,
    Failed,
    Error,
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestResult::Passed => f.write_str("passed"),
            TestResult::Failed => f.write_str("failed"),
            TestResult::Error => f.write_str("error"),
        }
    }
}

/// A test class discovered by the compiler callback.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TestDefinition {
    pub is_module: bool,
    pub class_name: String,
    pub super_class: String,
}

impl TestDefinition {
    pub fn new(
        is_module: bool,
        class_name: impl Into<String>,
        super_class: impl Into<String>,
    ) -> Self {
        Self { is_module, class_name: class_name.into(), super_class: super_class.into() }
    }
}

impl fmt::Display for TestDefinition {
    /// Serialized textual form `[<module>]<name><<<super>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_module {
            f.write_str(MODULE_MARKER)?;
        }
        write!(f, "{}{}{}", self.class_name, SUPER_SEPARATOR, self.super_class)
    }
}

impl FromStr for TestDefinition {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self> {
        let (is_module, rest) = match s.strip_prefix(MODULE_MARKER) {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (name, super_class) = rest
            .split_once(SUPER_SEPARATOR)
            .ok_or_else(|| BuildError::parse(format!("malformed test definition `{s}`")))?;
        if name.is_empty() || super_class.is_empty() {
            return Err(BuildError::parse(format!("malformed test definition `{s}`")));
        }
        Ok(Self::new(is_module, name, super_class))
    }
}

/// Description of an external test framework.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestFramework {
    /// Display name used in log output
    pub name: &'static str,
    /// Fully qualified super class its tests extend
    pub super_class: &'static str,
    /// Whether tests are module objects rather than classes
    pub is_module: bool,
    /// Fully qualified runner class, loaded from the tool's runner jar
    pub runner_class: &'static str,
}

/// The frameworks the tool knows how to drive out of the box.
pub const FRAMEWORKS: &[TestFramework] = &[
    TestFramework {
        name: "ScalaCheck",
        super_class: "org.scalacheck.Properties",
        is_module: true,
        runner_class: "kiln.runner.ScalaCheckRunner",
    },
    TestFramework {
        name: "ScalaTest",
        super_class: "org.scalatest.Suite",
        is_module: false,
        runner_class: "kiln.runner.ScalaTestRunner",
    },
    TestFramework {
        name: "specs",
        super_class: "org.specs.Specification",
        is_module: true,
        runner_class: "kiln.runner.SpecsRunner",
    },
];

/// The super-class names the compiler callback should watch for.
pub fn test_super_classes() -> Vec<String> {
    FRAMEWORKS.iter().map(|f| f.super_class.to_string()).collect()
}

/// Groups the discovered tests by the framework that owns them. Tests whose
/// `(super class, is module)` key matches no known framework are dropped
/// with a warning.
pub fn partition(
    tests: &[TestDefinition],
    log: &Logger,
) -> BTreeMap<&'static str, (&'static TestFramework, Vec<TestDefinition>)> {
    let mut grouped: BTreeMap<&'static str, (&'static TestFramework, Vec<TestDefinition>)> =
        BTreeMap::new();
    for test in tests {
        let framework = FRAMEWORKS
            .iter()
            .find(|f| f.super_class == test.super_class && f.is_module == test.is_module);
        match framework {
            Some(framework) => grouped
                .entry(framework.name)
                .or_insert_with(|| (framework, Vec::new()))
                .1
                .push(test.clone()),
            None => log.warn(format!(
                "no known test framework for `{}` (extends {})",
                test.class_name, test.super_class
            )),
        }
    }
    for (_, tests) in grouped.values_mut() {
        tests.sort();
        tests.dedup();
    }
    grouped
}

/// Runs all discovered tests, one isolated runner process per framework, and
/// returns the worst outcome.
pub fn run_tests(
    tests: &[TestDefinition],
    classpath: &[PathBuf],
    runner_jar: &Path,
    excluded: &[String],
    log: &Logger,
) -> Result<TestResult> {
    let mut overall = TestResult::Passed;
    for (name, (framework, tests)) in partition(tests, log) {
        let selected: Vec<_> =
            tests.iter().filter(|t| !excluded.contains(&t.class_name)).collect();
        if selected.is_empty() {
            continue;
        }
        log.info(format!("running {} {} test(s)", selected.len(), name));
        let outcome = run_framework(framework, &selected, classpath, runner_jar, log)?;
        log.info(format!("{name}: {outcome}"));
        overall = overall.max(outcome);
    }
    Ok(overall)
}

/// Launches the framework's runner class in a fresh `java` process whose
/// classpath is the project runtime classpath plus the tool's runner jar.
fn run_framework(
    framework: &TestFramework,
    tests: &[&TestDefinition],
    classpath: &[PathBuf],
    runner_jar: &Path,
    log: &Logger,
) -> Result<TestResult> {
    let cp = classpath
        .iter()
        .chain(std::iter::once(&runner_jar.to_path_buf()))
        .map(|p| p.display().to_string())
        .join(&utils::PATH_LIST_SEPARATOR.to_string());

    let mut cmd = Command::new("java");
    cmd.arg("-cp")
        .arg(cp)
        .arg(framework.runner_class)
        .args(tests.iter().map(|t| t.class_name.as_str()))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    debug!(?cmd, "launching test runner");

    let output = cmd.output().map_err(|err| BuildError::io(err, runner_jar))?;
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        log.info(line);
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        log.warn(line);
    }
    Ok(match output.status.code() {
        Some(0) => TestResult::Passed,
        Some(1) => TestResult::Failed,
        _ => TestResult::Error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn definition_round_trips() {
        let class = TestDefinition::new(false, "com.example.ASpec", "org.scalatest.Suite");
        assert_eq!(class.to_string(), "com.example.ASpec<<<org.scalatest.Suite");
        assert_eq!(class.to_string().parse::<TestDefinition>().unwrap(), class);

        let module = TestDefinition::new(true, "com.example.Props", "org.scalacheck.Properties");
        assert_eq!(module.to_string(), "[module]com.example.Props<<<org.scalacheck.Properties");
        assert_eq!(module.to_string().parse::<TestDefinition>().unwrap(), module);
    }

    #[test]
    fn malformed_definitions_are_rejected() {
        for bad in ["NoSeparator", "<<<Super", "Name<<<"] {
            assert!(bad.parse::<TestDefinition>().is_err(), "`{bad}` should not parse");
        }
    }

    #[test]
    fn result_severity_orders() {
        assert!(TestResult::Passed < TestResult::Failed);
        assert!(TestResult::Failed < TestResult::Error);
        assert_eq!(TestResult::Passed.max(TestResult::Error), TestResult::Error);
    }

    #[test]
    fn partition_groups_by_super_class_and_shape() {
        let log = Logger::new("test");
        let tests = vec![
            TestDefinition::new(false, "a.One", "org.scalatest.Suite"),
            TestDefinition::new(false, "a.Two", "org.scalatest.Suite"),
            TestDefinition::new(true, "a.Props", "org.scalacheck.Properties"),
            // module flag mismatch: Suite tests are classes, so this is unclaimed
            TestDefinition::new(true, "a.Odd", "org.scalatest.Suite"),
        ];
        let grouped = partition(&tests, &log);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["ScalaTest"].1.len(), 2);
        assert_eq!(grouped["ScalaCheck"].1.len(), 1);
    }
}
