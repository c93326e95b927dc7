//! A bounded parallel runner for job graphs.
//!
//! The coordinator owns all mutable state and the workers communicate with
//! it exclusively through a channel, one message per finished job. Ready
//! jobs wait in a max-heap keyed by path cost (own cost plus the most
//! expensive chain of dependents), so critical-path work starts first. At
//! most `max_tasks` jobs are in flight at any instant.
//!
//! There is no preemptive cancellation: a failed job produces a failure
//! record, its transitive dependents are skipped without ever running, and
//! everything already in flight runs to completion.

use std::{
    collections::BinaryHeap,
    sync::mpsc,
    thread,
};

/// A unit of schedulable work.
pub struct Job {
    /// Label used in failure records, typically `project / action`
    pub name: String,
    /// Cost estimate for prioritization
    pub cost: u32,
    /// Indices of jobs that must succeed before this one may run
    pub dependencies: Vec<usize>,
    /// The work itself; `None` is success
    pub action: Box<dyn FnOnce() -> Option<String> + Send>,
    /// Invoked by the coordinator when the job leaves the running set, on
    /// success and failure alike. Used to flush buffered project logs as a
    /// unit.
    pub on_complete: Option<Box<dyn FnOnce() + Send>>,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        dependencies: Vec<usize>,
        action: impl FnOnce() -> Option<String> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            cost: 1,
            dependencies,
            action: Box::new(action),
            on_complete: None,
        }
    }

    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    pub fn on_complete(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(hook));
        self
    }
}

/// Failure record of a single job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobFailure {
    pub job: String,
    pub message: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum JobState {
    Waiting,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Runs the job graph with at most `max_tasks` jobs in flight and returns
/// all failure records. An empty result means every job ran successfully.
pub fn run_jobs(jobs: Vec<Job>, max_tasks: usize) -> Vec<JobFailure> {
    assert!(max_tasks > 0, "scheduler needs at least one slot");
    let total = jobs.len();
    if total == 0 {
        return Vec::new();
    }

    let mut names = Vec::with_capacity(total);
    let mut costs = Vec::with_capacity(total);
    let mut dependencies = Vec::with_capacity(total);
    let mut actions = Vec::with_capacity(total);
    let mut hooks = Vec::with_capacity(total);
    for job in jobs {
        names.push(job.name);
        costs.push(job.cost);
        dependencies.push(job.dependencies);
        actions.push(Some(job.action));
        hooks.push(job.on_complete);
    }

    let mut dependents = vec![Vec::new(); total];
    for (id, deps) in dependencies.iter().enumerate() {
        for &dep in deps {
            dependents[dep].push(id);
        }
    }
    let path_costs = path_costs(&costs, &dependents);

    let mut states = vec![JobState::Waiting; total];
    let mut pending = dependencies.iter().map(Vec::len).collect::<Vec<_>>();
    let mut failures: Vec<JobFailure> = Vec::new();
    let mut ready: BinaryHeap<(u64, std::cmp::Reverse<usize>)> = BinaryHeap::new();
    for id in 0..total {
        if pending[id] == 0 {
            ready.push((path_costs[id], std::cmp::Reverse(id)));
        }
    }

    let (tx, rx) = mpsc::channel::<(usize, Option<String>)>();
    thread::scope(|scope| {
        let mut running = 0usize;
        let mut finished = 0usize;
        while finished < total {
            while running < max_tasks {
                let Some((_, std::cmp::Reverse(id))) = ready.pop() else { break };
                states[id] = JobState::Running;
                running += 1;
                let action = actions[id].take().expect("job dispatched twice");
                let tx = tx.clone();
                scope.spawn(move || {
                    let result = action();
                    // the coordinator outlives every worker, so the send
                    // cannot fail
                    let _ = tx.send((id, result));
                });
            }

            if running == 0 {
                // only reachable on a cyclic graph, which task construction
                // cannot produce
                failures.push(JobFailure {
                    job: "<scheduler>".to_string(),
                    message: "job graph contains a cycle".to_string(),
                });
                break;
            }

            let (id, result) = rx.recv().expect("all workers hung up");
            running -= 1;
            finished += 1;
            if let Some(hook) = hooks[id].take() {
                hook();
            }
            match result {
                None => {
                    states[id] = JobState::Succeeded;
                    trace!("job done: {}", names[id]);
                }
                Some(message) => {
                    states[id] = JobState::Failed;
                    debug!("job failed: {}: {message}", names[id]);
                    failures.push(JobFailure { job: names[id].clone(), message });
                }
            }

            // dependents of a completed job either become ready or, once all
            // their dependencies have reported, are skipped; a skip counts
            // as a completion for its own dependents in turn
            let mut completed = vec![id];
            while let Some(done) = completed.pop() {
                for &next in &dependents[done] {
                    if states[next] != JobState::Waiting {
                        continue;
                    }
                    pending[next] -= 1;
                    if pending[next] > 0 {
                        continue;
                    }
                    let all_succeeded =
                        dependencies[next].iter().all(|&d| states[d] == JobState::Succeeded);
                    if all_succeeded {
                        ready.push((path_costs[next], std::cmp::Reverse(next)));
                    } else {
                        states[next] = JobState::Skipped;
                        finished += 1;
                        trace!("job skipped: {}", names[next]);
                        if let Some(hook) = hooks[next].take() {
                            hook();
                        }
                        completed.push(next);
                    }
                }
            }
        }
    });

    failures
}

/// Path cost of each job: its own cost plus the maximum path cost among its
/// dependents.
fn path_costs(costs: &[u32], dependents: &[Vec<usize>]) -> Vec<u64> {
    fn compute(
        id: usize,
        costs: &[u32],
        dependents: &[Vec<usize>],
        memo: &mut [Option<u64>],
    ) -> u64 {
        if let Some(cached) = memo[id] {
            return cached;
        }
        let downstream = dependents[id]
            .iter()
            .map(|&d| compute(d, costs, dependents, memo))
            .max()
            .unwrap_or(0);
        let cost = u64::from(costs[id]) + downstream;
        memo[id] = Some(cost);
        cost
    }

    let mut memo = vec![None; costs.len()];
    (0..costs.len()).map(|id| compute(id, costs, dependents, &mut memo)).collect()
}

/// The default thread budget.
pub fn default_max_tasks() -> usize {
    num_cpus::get()
}
