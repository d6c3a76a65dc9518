//! One dispatcher invocation, end to end.
//!
//! `Idle -> Detecting -> Dispatching -> Aggregating -> Done`. Each phase is
//! entered exactly once and in order; aggregation only starts after the
//! worker pool has joined.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::{self, AggregateReport};
use crate::changes::{self, ChangeSet, Detection};
use crate::config::Registry;
use crate::dispatch::{self, DeploymentRequest, DeploymentResult, Dispatcher};
use crate::error::{Error, Result};
use crate::provenance::Provenance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Detecting,
    Dispatching,
    Aggregating,
    Done,
}

impl Phase {
    fn successor(self) -> Option<Phase> {
        match self {
            Phase::Idle => Some(Phase::Detecting),
            Phase::Detecting => Some(Phase::Dispatching),
            Phase::Dispatching => Some(Phase::Aggregating),
            Phase::Aggregating => Some(Phase::Done),
            Phase::Done => None,
        }
    }
}

/// Per-invocation state machine.
#[derive(Debug)]
pub struct Invocation {
    id: Uuid,
    phase: Phase,
    started_at: DateTime<Utc>,
}

impl Default for Invocation {
    fn default() -> Self {
        Self::new()
    }
}

impl Invocation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            phase: Phase::Idle,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `next`, which must be the immediate successor.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if self.phase.successor() != Some(next) {
            return Err(Error::internal_unexpected(format!(
                "invalid phase transition {:?} -> {:?}",
                self.phase, next
            )));
        }
        log_status!("run", "{:?} -> {:?}", self.phase, next);
        self.phase = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the registry's pool size.
    pub concurrency: Option<usize>,
    /// Plan requests without invoking the publish command.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub invocation_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub changed_paths: usize,
    pub detections: Vec<Detection>,
    pub requests: Vec<DeploymentRequest>,
    pub results: Vec<DeploymentResult>,
    pub aggregate: AggregateReport,
}

fn planned_report(requests: &[DeploymentRequest]) -> AggregateReport {
    AggregateReport {
        lines: requests
            .iter()
            .map(|r| format!("planned {} -> {}", r.target.name, r.target.workspace_id))
            .collect(),
        exit_code: 0,
        total: requests.len(),
        succeeded: 0,
        failed: 0,
    }
}

/// Run one invocation.
///
/// `provenance` is only consulted when at least one target is affected, so a
/// push that touches nothing succeeds even without CI metadata.
pub fn run<P>(
    registry: &Registry,
    changes: &ChangeSet,
    provenance: P,
    dispatcher: &Dispatcher,
    options: &RunOptions,
) -> Result<RunReport>
where
    P: FnOnce() -> Result<Provenance>,
{
    let concurrency = options.concurrency.unwrap_or(registry.concurrency);
    if concurrency == 0 {
        return Err(Error::validation_invalid_argument(
            "concurrency",
            "concurrency must be at least 1",
            None,
            None,
        ));
    }

    let mut invocation = Invocation::new();

    invocation.advance(Phase::Detecting)?;
    let detections = changes::detect(
        &registry.targets,
        changes,
        registry.workflow_path.as_deref(),
    );
    log_status!(
        "detect",
        "{} changed path(s), {} of {} target(s) affected",
        changes.len(),
        detections.len(),
        registry.targets.len()
    );

    let requests = if detections.is_empty() {
        Vec::new()
    } else {
        let provenance = provenance()?;
        dispatch::plan_requests(
            detections.iter().map(|d| d.target.clone()).collect(),
            &provenance,
        )
    };

    invocation.advance(Phase::Dispatching)?;
    let results = if options.dry_run {
        Vec::new()
    } else {
        dispatcher.dispatch_all(&requests, concurrency)
    };

    invocation.advance(Phase::Aggregating)?;
    let aggregate = if options.dry_run {
        planned_report(&requests)
    } else {
        aggregate::report(&results)
    };

    invocation.advance(Phase::Done)?;

    Ok(RunReport {
        invocation_id: invocation.id().to_string(),
        started_at: invocation.started_at,
        finished_at: Utc::now(),
        dry_run: options.dry_run,
        changed_paths: changes.len(),
        detections,
        requests,
        results,
        aggregate,
    })
}
