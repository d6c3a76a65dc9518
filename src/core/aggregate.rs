//! Folding per-target results into one exit code and summary.

use serde::Serialize;

use crate::dispatch::DeploymentResult;

/// Aggregated outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateReport {
    pub lines: Vec<String>,
    pub exit_code: i32,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl AggregateReport {
    pub fn summary(&self) -> String {
        self.lines.join("\n")
    }
}

/// Summary line for one result.
pub fn summary_line(result: &DeploymentResult) -> String {
    if result.success {
        format!("ok      {}", result.target_name)
    } else {
        format!(
            "failed  {} (exit {}): {}",
            result.target_name,
            result.exit_code,
            first_line(&result.message)
        )
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("").trim_end()
}

/// Exit code for a result sequence: 0 iff every result succeeded, otherwise
/// the first non-zero code in dispatch order.
fn exit_code_for(results: &[DeploymentResult]) -> i32 {
    results
        .iter()
        .filter(|r| !r.success)
        .map(|r| r.exit_code)
        .find(|&code| code != 0)
        .or_else(|| results.iter().any(|r| !r.success).then_some(1))
        .unwrap_or(0)
}

/// One line per result, in the given (dispatch) order, never reordered or
/// de-duplicated.
pub fn report(results: &[DeploymentResult]) -> AggregateReport {
    let succeeded = results.iter().filter(|r| r.success).count();

    AggregateReport {
        lines: results.iter().map(summary_line).collect(),
        exit_code: exit_code_for(results),
        total: results.len(),
        succeeded,
        failed: results.len() - succeeded,
    }
}

/// `(summary, exit_code)` for a result sequence.
pub fn aggregate(results: &[DeploymentResult]) -> (String, i32) {
    let report = report(results);
    (report.summary(), report.exit_code)
}
