//! Composable build tasks and the sequential runner.
//!
//! Tasks are immutable after construction and shared behind `Arc`; a project
//! registers each task under an explicit name, which is normalized from
//! camelCase to hyphen-case the way action names are spelled on the command
//! line.

use crate::error::{BuildError, Result};
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    sync::Arc,
};

/// The body of a task: `None` is success, `Some` carries the failure
/// message.
pub type TaskAction = Box<dyn Fn() -> Option<String> + Send + Sync>;

pub struct Task {
    name: String,
    description: Option<String>,
    dependencies: Vec<Arc<Task>>,
    interactive: bool,
    cost: u32,
    action: TaskAction,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("dependencies", &self.dependencies.iter().map(|d| d.name()).collect::<Vec<_>>())
            .field("interactive", &self.interactive)
            .field("cost", &self.cost)
            .finish()
    }
}

impl Task {
    /// A task with the given body and no dependencies. The name is assigned
    /// when the task is registered with its project.
    pub fn new(action: impl Fn() -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            name: String::new(),
            description: None,
            dependencies: Vec::new(),
            interactive: false,
            cost: 1,
            action: Box::new(action),
        }
    }

    /// A task that does nothing, useful as a pure aggregation point.
    pub fn empty() -> Self {
        Self::new(|| None)
    }

    pub fn depends_on(mut self, tasks: impl IntoIterator<Item = Arc<Task>>) -> Self {
        self.dependencies.extend(tasks);
        self
    }

    pub fn described_as(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Marks the task interactive: when its project is only a transitive
    /// dependency of the requested project, the task's dependencies run but
    /// its own body does not.
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Sets the scheduling cost used for critical-path prioritization.
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    pub(crate) fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sequential composition: a fresh task that runs `first`'s body, then
    /// `second`'s, short-circuiting on the first failure. Dependencies of
    /// both constituents carry over.
    pub fn sequence(first: &Arc<Task>, second: &Arc<Task>) -> Task {
        let dependencies =
            first.dependencies.iter().chain(second.dependencies.iter()).cloned().collect();
        let (first, second) = (Arc::clone(first), Arc::clone(second));
        Task {
            name: format!("{}-and-{}", first.name, second.name),
            description: None,
            dependencies,
            interactive: first.interactive || second.interactive,
            cost: first.cost + second.cost,
            action: Box::new(move || first.invoke().or_else(|| second.invoke())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn dependencies(&self) -> &[Arc<Task>] {
        &self.dependencies
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Runs just this task's body.
    pub fn invoke(&self) -> Option<String> {
        (self.action)()
    }

    /// Runs the task and everything it depends on in topological order,
    /// stopping at the first failure. Each task runs at most once.
    pub fn run(&self) -> Option<String> {
        self.run_filtered(&|_| false)
    }

    /// Like [`Self::run`], except that tasks matched by `skip_body` have
    /// their dependencies executed but not their own body.
    pub fn run_filtered(&self, skip_body: &dyn Fn(&Task) -> bool) -> Option<String> {
        for task in self.execution_order() {
            if skip_body(task) {
                continue;
            }
            if let Some(failure) = task.invoke() {
                return Some(format!("{}: {failure}", task.name));
            }
        }
        None
    }

    /// Dependency-first execution order, deduplicated by task identity.
    pub fn execution_order(&self) -> Vec<&Task> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        fn visit<'t>(
            task: &'t Task,
            visited: &mut HashSet<*const Task>,
            order: &mut Vec<&'t Task>,
        ) {
            if !visited.insert(task as *const Task) {
                return;
            }
            for dependency in &task.dependencies {
                visit(dependency, visited, order);
            }
            order.push(task);
        }
        visit(self, &mut visited, &mut order);
        order
    }
}

/// Converts a camelCase member name into its hyphen-case action name.
pub fn hyphenate(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if !out.is_empty() {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// The named tasks of a project.
#[derive(Debug, Default)]
pub struct TaskMap {
    tasks: BTreeMap<String, Arc<Task>>,
}

impl TaskMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task under the hyphen-cased form of `name`.
    ///
    /// Names must stay injective after normalization; a collision is a
    /// configuration error.
    pub fn register(&mut self, name: &str, task: Task) -> Result<Arc<Task>> {
        let normalized = hyphenate(name);
        if self.tasks.contains_key(&normalized) {
            return Err(BuildError::config(format!(
                "duplicate task name `{normalized}` (registered as `{name}`)"
            )));
        }
        let task = Arc::new(task.named(normalized.clone()));
        self.tasks.insert(normalized, Arc::clone(&task));
        Ok(task)
    }

    pub fn get(&self, action: &str) -> Option<&Arc<Task>> {
        self.tasks.get(action)
    }

    pub fn contains(&self, action: &str) -> bool {
        self.tasks.contains_key(action)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Task>)> {
        self.tasks.iter().map(|(name, task)| (name.as_str(), task))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Task {
        let log = Arc::clone(log);
        Task::new(move || {
            log.lock().unwrap().push(name);
            None
        })
    }

    #[test]
    fn hyphenation() {
        assert_eq!(hyphenate("compile"), "compile");
        assert_eq!(hyphenate("docTest"), "doc-test");
        assert_eq!(hyphenate("packageAllDocs"), "package-all-docs");
        assert_eq!(hyphenate("Compile"), "compile");
    }

    #[test]
    fn registration_rejects_colliding_names() {
        let mut map = TaskMap::new();
        map.register("docTest", Task::empty()).unwrap();
        assert!(map.register("doc-test", Task::empty()).is_err());
        assert!(map.contains("doc-test"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn run_is_dependency_first_and_at_most_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut map = TaskMap::new();
        let base = map.register("base", recording(&log, "base")).unwrap();
        let left =
            map.register("left", recording(&log, "left").depends_on([base.clone()])).unwrap();
        let right =
            map.register("right", recording(&log, "right").depends_on([base.clone()])).unwrap();
        let top = map
            .register("top", recording(&log, "top").depends_on([left, right]))
            .unwrap();

        assert_eq!(top.run(), None);
        let ran = log.lock().unwrap().clone();
        assert_eq!(ran, vec!["base", "left", "right", "top"]);
    }

    #[test]
    fn first_failure_short_circuits() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut map = TaskMap::new();
        let boom = map
            .register("boom", Task::new(|| Some("exploded".to_string())))
            .unwrap();
        let after = {
            let counter = Arc::clone(&counter);
            map.register(
                "after",
                Task::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    None
                })
                .depends_on([boom]),
            )
            .unwrap()
        };

        let failure = after.run().unwrap();
        assert!(failure.contains("boom") && failure.contains("exploded"));
        assert_eq!(counter.load(Ordering::SeqCst), 0, "dependent body must not run");
    }

    #[test]
    fn and_then_short_circuits_and_keeps_dependencies() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut map = TaskMap::new();
        let dep = map.register("dep", recording(&log, "dep")).unwrap();
        let first = map
            .register("first", Task::new(|| Some("no".to_string())).depends_on([dep]))
            .unwrap();
        let second = map.register("second", recording(&log, "second")).unwrap();
        let combined = map.register("combined", Task::sequence(&first, &second)).unwrap();

        assert!(combined.run().is_some());
        let ran = log.lock().unwrap().clone();
        assert_eq!(ran, vec!["dep"], "second body must not run after first fails");
    }

    #[test]
    fn skip_body_still_runs_dependencies() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut map = TaskMap::new();
        let dep = map.register("dep", recording(&log, "dep")).unwrap();
        let console = map
            .register("console", recording(&log, "console").depends_on([dep]).interactive())
            .unwrap();

        assert_eq!(console.run_filtered(&|t| t.is_interactive()), None);
        assert_eq!(log.lock().unwrap().clone(), vec!["dep"]);
    }
}
