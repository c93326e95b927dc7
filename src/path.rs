//! Project-relative paths and lazy path-set expressions.

use crate::{
    error::{BuildError, Result},
    filter::NameFilter,
    utils,
};
use std::{
    cmp::Ordering,
    collections::HashSet,
    fmt, fs,
    hash::{Hash, Hasher},
    path::{Path, PathBuf, MAIN_SEPARATOR},
    sync::Arc,
};
use walkdir::WalkDir;

/// A path identifying a file under a project root as an ordered list of name
/// components plus an optional rebase anchor.
///
/// Identity is defined on the resolved absolute file, so two compositions
/// that resolve to the same file compare equal regardless of how they were
/// built.
#[derive(Clone)]
pub struct RelativePath {
    root: Arc<PathBuf>,
    components: Vec<String>,
    /// Index from which `relative_string` renders. `0` renders the full
    /// component list relative to the project root.
    anchor: usize,
}

impl RelativePath {
    /// The path designating the project root itself.
    pub fn root(root: impl Into<PathBuf>) -> Self {
        Self { root: Arc::new(utils::canonicalized(root.into())), components: Vec::new(), anchor: 0 }
    }

    fn shared_root(root: &Arc<PathBuf>) -> Self {
        Self { root: Arc::clone(root), components: Vec::new(), anchor: 0 }
    }

    /// Appends a single name component.
    pub fn join(&self, name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        check_component(name)?;
        let mut components = self.components.clone();
        components.push(name.to_string());
        Ok(Self { root: Arc::clone(&self.root), components, anchor: self.anchor })
    }

    /// Marks the current path as the anchor for subsequent relative renders.
    /// Paths joined below a rebased path render relative to the rebase point
    /// instead of the project root.
    pub fn rebase(mut self) -> Self {
        self.anchor = self.components.len();
        self
    }

    /// The absolute file this path resolves to.
    pub fn resolve(&self) -> PathBuf {
        let mut path = (*self.root).clone();
        for component in &self.components {
            path.push(component);
        }
        path
    }

    /// The project root this path is anchored under.
    pub fn project_root(&self) -> &Path {
        &self.root
    }

    /// The final name component, or the empty string for the root path.
    pub fn name(&self) -> &str {
        self.components.last().map(String::as_str).unwrap_or("")
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Renders the path from its rebase anchor with `/` separators,
    /// producing a portable string that round-trips through [`Self::parse`].
    pub fn relative_string(&self) -> String {
        self.components[self.anchor..].join("/")
    }

    /// Parses a relative string produced by [`Self::relative_string`] back
    /// into a path under `root`. Accepts both `/` and the platform separator
    /// and rejects `.` and `..` components.
    pub fn parse(root: &Self, s: &str) -> Result<Self> {
        let mut path = Self::shared_root(&root.root);
        path.components.extend_from_slice(&root.components);
        path.anchor = root.anchor;
        for component in s.split(['/', MAIN_SEPARATOR]).filter(|c| !c.is_empty()) {
            path = path.join(component)?;
        }
        Ok(path)
    }

    /// Whether this path is lexically below (or equal to) `other`.
    pub fn starts_with(&self, other: &RelativePath) -> bool {
        self.resolve().starts_with(other.resolve())
    }

    /// Rebuilds a path from an absolute file under `root`, if it is one.
    pub fn from_absolute(root: &Self, file: &Path) -> Option<Self> {
        let file = utils::canonicalized(file);
        let rel = file.strip_prefix(root.resolve()).ok()?;
        let mut path = Self::shared_root(&root.root);
        path.components.extend_from_slice(&root.components);
        path.anchor = root.anchor;
        for component in rel.components() {
            path = path.join(component.as_os_str().to_str()?).ok()?;
        }
        Some(path)
    }
}

fn check_component(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(BuildError::parse(format!("illegal path component `{name}`")));
    }
    if name.contains(['/', '\\']) || name.contains(utils::PATH_LIST_SEPARATOR) {
        return Err(BuildError::parse(format!("path component `{name}` contains a separator")));
    }
    Ok(())
}

impl PartialEq for RelativePath {
    fn eq(&self, other: &Self) -> bool {
        self.resolve() == other.resolve()
    }
}

impl Eq for RelativePath {}

impl PartialOrd for RelativePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RelativePath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.resolve().cmp(&other.resolve())
    }
}

impl Hash for RelativePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resolve().hash(state);
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_string())
    }
}

impl fmt::Debug for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.root.display(), self.relative_string())
    }
}

/// A lazily evaluated set of project-relative paths.
///
/// Expressions compose by union and evaluate bottom-up against the live file
/// system; the result preserves the insertion order of the listing and
/// contains no duplicates.
#[derive(Clone, Debug)]
pub enum PathSet {
    Empty,
    Single(RelativePath),
    Union(Vec<PathSet>),
    /// Immediate children of `base` whose name passes `filter`.
    Children { base: RelativePath, filter: NameFilter },
    /// All descendants of `base` whose name passes `filter`, optionally
    /// including `base` itself. Descent never enters directories ruled out
    /// by the filter's exclusion part.
    Descendants { base: RelativePath, filter: NameFilter, include_base: bool },
}

impl PathSet {
    pub fn single(path: RelativePath) -> Self {
        PathSet::Single(path)
    }

    pub fn children(base: RelativePath, filter: impl Into<NameFilter>) -> Self {
        PathSet::Children { base, filter: filter.into() }
    }

    pub fn descendants(base: RelativePath, filter: impl Into<NameFilter>) -> Self {
        PathSet::Descendants { base, filter: filter.into(), include_base: false }
    }

    pub fn descendants_and_base(base: RelativePath, filter: impl Into<NameFilter>) -> Self {
        PathSet::Descendants { base, filter: filter.into(), include_base: true }
    }

    /// Unions two expressions without evaluating either.
    pub fn union(self, other: PathSet) -> Self {
        match (self, other) {
            (PathSet::Empty, other) => other,
            (this, PathSet::Empty) => this,
            (PathSet::Union(mut sets), other) => {
                sets.push(other);
                PathSet::Union(sets)
            }
            (this, other) => PathSet::Union(vec![this, other]),
        }
    }

    /// Evaluates the expression against the file system.
    pub fn evaluate(&self) -> Vec<RelativePath> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect(&mut seen, &mut out);
        out
    }

    fn collect(&self, seen: &mut HashSet<PathBuf>, out: &mut Vec<RelativePath>) {
        let mut push = |path: RelativePath| {
            if seen.insert(path.resolve()) {
                out.push(path);
            }
        };
        match self {
            PathSet::Empty => {}
            PathSet::Single(path) => push(path.clone()),
            PathSet::Union(sets) => {
                for set in sets {
                    set.collect(seen, out);
                }
            }
            PathSet::Children { base, filter } => {
                for name in list_names(&base.resolve()) {
                    if filter.accepts(&name) {
                        if let Ok(child) = base.join(&name) {
                            push(child);
                        }
                    }
                }
            }
            PathSet::Descendants { base, filter, include_base } => {
                if *include_base {
                    push(base.clone());
                }
                walk(base, filter, &mut push);
            }
        }
    }
}

fn walk(base: &RelativePath, filter: &NameFilter, push: &mut impl FnMut(RelativePath)) {
    let root = base.resolve();
    let walker = WalkDir::new(&root).min_depth(1).follow_links(true).into_iter();
    let entries = walker.filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        !e.file_type().is_dir() || filter.allows_descent(&name)
    });
    for entry in entries.filter_map(std::result::Result::ok) {
        if !filter.accepts(&entry.file_name().to_string_lossy()) {
            continue;
        }
        // walked paths always extend the base, so rejoining cannot escape it
        let Ok(rel) = entry.path().strip_prefix(&root) else { continue };
        let mut path = base.clone();
        let mut valid = true;
        for component in rel.components() {
            match component.as_os_str().to_str().and_then(|c| path.join(c).ok()) {
                Some(next) => path = next,
                None => {
                    valid = false;
                    break;
                }
            }
        }
        if valid {
            push(path);
        }
    }
}

/// Lists the entry names of `dir` in file-system order. A missing or
/// unreadable directory yields nothing.
fn list_names(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(std::result::Result::ok)
        .filter_map(|e| e.file_name().into_string().ok())
        .collect()
}
