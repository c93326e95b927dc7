//! Decides which sources a compile must rebuild.
//!
//! Staleness is determined from modification times and external-artifact
//! changes, then propagated transitively over the reverse dependency graph
//! recorded in the analysis.

use crate::{
    analysis::ProjectAnalysis,
    logger::Logger,
    path::RelativePath,
    utils,
};
use rayon::prelude::*;
use std::{
    collections::{BTreeSet, VecDeque},
    path::{Path, PathBuf},
};

/// Result of a staleness scan.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StalenessReport {
    /// Sources that must be passed to the compiler.
    pub modified: BTreeSet<RelativePath>,
    /// Previously known sources that no longer exist.
    pub removed: BTreeSet<RelativePath>,
}

impl StalenessReport {
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Computes the set of sources to recompile from the current source
/// snapshot, the classpath and the prior analysis.
///
/// On return the analysis no longer carries entries for modified or removed
/// sources; the subsequent compile refills them through the callback. Stale
/// class files of those sources are already deleted from disk.
///
/// An external artifact that still exists on disk but is no longer on the
/// classpath invalidates all of its dependents and is forgotten; no other
/// classpath entry is searched for a replacement.
pub fn dirty_sources(
    current: &[RelativePath],
    classpath: &[PathBuf],
    analysis: &mut ProjectAnalysis,
    log: &Logger,
) -> StalenessReport {
    let current_set: BTreeSet<_> = current.iter().cloned().collect();

    // deletion phase
    let removed: BTreeSet<_> =
        analysis.all_sources().difference(&current_set).cloned().collect();
    for r in &removed {
        log.debug(format!("source removed: {r}"));
    }

    // direct-modification phase: no recorded classes, or any class file
    // missing or strictly older than its source
    let snapshot_view: &ProjectAnalysis = analysis;
    let mut modified: BTreeSet<_> = current
        .par_iter()
        .filter(|source| is_modified(snapshot_view, source))
        .cloned()
        .collect();

    external_phase(classpath, analysis, &mut modified, log);

    for m in &modified {
        log.debug(format!("source modified: {m}"));
    }

    // transitive propagation: breadth-first closure over reverse edges;
    // a visited dependent loses its edge set, which the compile recomputes
    let mut queue: VecDeque<RelativePath> =
        modified.iter().chain(removed.iter()).cloned().collect();
    while let Some(changed) = queue.pop_front() {
        let dependents: Vec<RelativePath> = analysis
            .all_sources()
            .into_iter()
            .filter(|t| !modified.contains(t) && !removed.contains(t))
            .filter(|t| {
                analysis.dependencies_of(t).map(|deps| deps.contains(&changed)).unwrap_or(false)
            })
            .collect();
        for dependent in dependents {
            log.debug(format!("invalidated by {changed}: {dependent}"));
            analysis.take_deps(&dependent);
            modified.insert(dependent.clone());
            queue.push_back(dependent);
        }
    }

    // cleanup: drop stale outputs and entries before the compiler runs
    for source in removed.iter().chain(modified.iter()) {
        analysis.remove_source(source, log);
    }

    StalenessReport { modified, removed }
}

fn is_modified(analysis: &ProjectAnalysis, source: &RelativePath) -> bool {
    let mut classes = analysis.classes_of(source).peekable();
    if classes.peek().is_none() {
        return true;
    }
    let Some(source_time) = utils::modified_time(&source.resolve()) else {
        return true;
    };
    classes.any(|class| match utils::modified_time(&class.resolve()) {
        Some(class_time) => class_time < source_time,
        None => true,
    })
}

/// Checks every recorded external artifact against the classpath: a changed
/// artifact invalidates lagging dependents, a vanished one invalidates them
/// all and loses its edge.
fn external_phase(
    classpath: &[PathBuf],
    analysis: &mut ProjectAnalysis,
    modified: &mut BTreeSet<RelativePath>,
    log: &Logger,
) {
    let externals: Vec<PathBuf> =
        analysis.external_dependencies().map(|(file, _)| file.clone()).collect();
    for file in externals {
        let on_classpath = classpath_contains(classpath, &file);
        let file_time = utils::modified_time(&file);
        match (on_classpath, file_time) {
            (true, Some(file_time)) => {
                let dependents: Vec<RelativePath> = analysis
                    .external_dependencies()
                    .find(|(f, _)| **f == file)
                    .map(|(_, d)| d.iter().cloned().collect())
                    .unwrap_or_default();
                for dependent in dependents {
                    if modified.contains(&dependent) {
                        continue;
                    }
                    let lagging = analysis.classes_of(&dependent).any(|class| {
                        utils::modified_time(&class.resolve())
                            .map(|t| t < file_time)
                            .unwrap_or(true)
                    });
                    if lagging {
                        log.debug(format!(
                            "external artifact \"{}\" is newer than {dependent}",
                            file.display()
                        ));
                        modified.insert(dependent);
                    }
                }
            }
            _ => {
                log.debug(format!(
                    "external artifact \"{}\" left the classpath, invalidating dependents",
                    file.display()
                ));
                modified.extend(analysis.take_external(&file));
            }
        }
    }
}

/// Whether `file` is reachable through one of the classpath entries: either
/// listed directly or located under a directory entry.
fn classpath_contains(classpath: &[PathBuf], file: &Path) -> bool {
    classpath.iter().any(|entry| {
        let entry = utils::canonicalized(entry.clone());
        entry == file || (entry.is_dir() && file.starts_with(&entry))
    })
}
