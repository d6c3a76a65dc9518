//! Dispatching deployment requests to the external publish command.
//!
//! Each dispatch is independent and at-most-once: the dispatcher never
//! retries. Failures of any kind (non-zero exit, timeout, cancellation,
//! unresolvable credential) are captured in a [`DeploymentResult`] instead of
//! being returned as errors, so one failing target never stops its siblings.

use std::collections::VecDeque;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{PublishCommand, Registry};
use crate::provenance::Provenance;
use crate::secrets::{self, SecretStore};
use crate::target::Target;
use crate::utils::command;
use crate::utils::template::{self, TemplateVars};

pub const TIMEOUT_EXIT_CODE: i32 = -1;
pub const CANCELLED_EXIT_CODE: i32 = 130;
pub const SPAWN_FAILED_EXIT_CODE: i32 = 127;
pub const CREDENTIAL_FAILED_EXIT_CODE: i32 = 1;
pub const MISSING_RESULT_EXIT_CODE: i32 = 1;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Requests and results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentRequest {
    pub target: Target,
    pub version_label: String,
    pub provenance_url: String,
}

impl DeploymentRequest {
    pub fn new(target: Target, provenance: &Provenance) -> Self {
        Self {
            target,
            version_label: provenance.version_label.clone(),
            provenance_url: provenance.provenance_url.clone(),
        }
    }
}

/// One request per affected target, in the order given.
pub fn plan_requests(targets: Vec<Target>, provenance: &Provenance) -> Vec<DeploymentRequest> {
    targets
        .into_iter()
        .map(|target| DeploymentRequest::new(target, provenance))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    pub target_name: String,
    pub success: bool,
    pub message: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Timing is not part of a result's identity.
impl PartialEq for DeploymentResult {
    fn eq(&self, other: &Self) -> bool {
        self.target_name == other.target_name
            && self.success == other.success
            && self.message == other.message
            && self.exit_code == other.exit_code
    }
}

impl Eq for DeploymentResult {}

impl DeploymentResult {
    pub fn published(target_name: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            target_name: target_name.into(),
            success: true,
            message: "published".to_string(),
            exit_code: 0,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn failed(
        target_name: impl Into<String>,
        exit_code: i32,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            target_name: target_name.into(),
            success: false,
            message: message.into(),
            exit_code,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn timeout(target_name: impl Into<String>, elapsed: Duration) -> Self {
        Self::failed(target_name, TIMEOUT_EXIT_CODE, "timeout", elapsed)
    }

    pub fn cancelled(target_name: impl Into<String>, elapsed: Duration) -> Self {
        Self::failed(target_name, CANCELLED_EXIT_CODE, "cancelled", elapsed)
    }

    pub fn missing(target_name: impl Into<String>) -> Self {
        Self::failed(
            target_name,
            MISSING_RESULT_EXIT_CODE,
            "missing result",
            Duration::ZERO,
        )
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Invocation-wide cancellation flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Publisher seam
// ============================================================================

/// A fully rendered publish invocation.
#[derive(Debug, Clone)]
pub struct PublishJob {
    pub target_name: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<String>,
    pub timeout: Duration,
    pub grace_period: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Exited {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    Cancelled,
    SpawnFailed(String),
}

pub trait Publisher: Send + Sync {
    fn publish(&self, job: &PublishJob, cancel: &CancelToken) -> PublishOutcome;
}

/// Runs the publish command as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandPublisher;

enum Settled {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
    WaitFailed(String),
}

impl Publisher for CommandPublisher {
    fn publish(&self, job: &PublishJob, cancel: &CancelToken) -> PublishOutcome {
        let mut cmd = Command::new(&job.program);
        cmd.args(&job.args)
            .envs(job.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &job.working_dir {
            cmd.current_dir(dir);
        }

        // Own process group so termination reaches anything the command spawns.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return PublishOutcome::SpawnFailed(format!(
                    "failed to start '{}': {}",
                    job.program, e
                ))
            }
        };

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let started = Instant::now();
        let settled = loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    // Background children may still hold the output pipes.
                    kill_leftovers(&child);
                    break Settled::Exited(status);
                }
                Ok(None) => {}
                Err(e) => {
                    terminate(&mut child, Duration::ZERO);
                    break Settled::WaitFailed(e.to_string());
                }
            }

            if cancel.is_cancelled() {
                terminate(&mut child, job.grace_period);
                break Settled::Cancelled;
            }
            if started.elapsed() >= job.timeout {
                terminate(&mut child, job.grace_period);
                break Settled::TimedOut;
            }

            thread::sleep(POLL_INTERVAL);
        };

        let stdout = collect_reader(stdout);
        let stderr = collect_reader(stderr);

        match settled {
            Settled::Exited(status) => PublishOutcome::Exited {
                exit_code: exit_code_of(&status),
                stdout,
                stderr,
            },
            Settled::TimedOut => PublishOutcome::TimedOut,
            Settled::Cancelled => PublishOutcome::Cancelled,
            Settled::WaitFailed(e) => PublishOutcome::Exited {
                exit_code: 1,
                stdout,
                stderr: format!("failed to wait for '{}': {}", job.program, e),
            },
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    source.map(|mut source| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = source.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect_reader(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

fn exit_code_of(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: libc::c_int) {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: plain kill(2) on the child's own process group.
    unsafe {
        libc::kill(-pgid, signal);
    }
}

/// Kill whatever is left in the process group of an already exited child.
fn kill_leftovers(child: &Child) {
    #[cfg(unix)]
    signal_group(child, libc::SIGKILL);

    #[cfg(not(unix))]
    let _ = child;
}

/// Ask the child to stop, wait up to `grace`, then force-kill and reap it.
fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        signal_group(child, libc::SIGTERM);
        // An unrepresentable deadline means no grace at all.
        let deadline = Instant::now().checked_add(grace).unwrap_or_else(Instant::now);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = child.try_wait() {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
        signal_group(child, libc::SIGKILL);
    }

    #[cfg(not(unix))]
    let _ = grace;

    let _ = child.kill();
    let _ = child.wait();
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct Dispatcher {
    publish: PublishCommand,
    default_timeout: Duration,
    grace_period: Duration,
    publisher: Arc<dyn Publisher>,
    secrets: Arc<dyn SecretStore>,
    cancel: CancelToken,
}

impl Dispatcher {
    pub fn new(
        registry: &Registry,
        publisher: Arc<dyn Publisher>,
        secrets: Arc<dyn SecretStore>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            publish: registry.publish.clone(),
            default_timeout: Duration::from_secs(registry.default_timeout_secs),
            grace_period: registry.grace_period(),
            publisher,
            secrets,
            cancel,
        }
    }

    fn timeout_for(&self, target: &Target) -> Duration {
        target
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }

    /// Render the publish command for one request. `secret` is only placed
    /// in the environment, never in arguments.
    pub fn build_job(&self, request: &DeploymentRequest, secret: &str) -> PublishJob {
        let target = &request.target;
        let vars = [
            (TemplateVars::TARGET_NAME, target.name.as_str()),
            (TemplateVars::SOURCE_PATH, target.source_path.as_str()),
            (TemplateVars::WORKSPACE_ID, target.workspace_id.as_str()),
            (TemplateVars::VERSION_LABEL, request.version_label.as_str()),
            (TemplateVars::PROVENANCE_URL, request.provenance_url.as_str()),
        ];

        let args = self
            .publish
            .args
            .iter()
            .map(|arg| template::render(arg, &vars))
            .collect();

        let mut env: Vec<(String, String)> = self
            .publish
            .env
            .iter()
            .map(|(k, v)| (k.clone(), template::render(v, &vars)))
            .collect();
        env.push((self.publish.credential_env.clone(), secret.to_string()));

        PublishJob {
            target_name: target.name.clone(),
            program: self.publish.program.clone(),
            args,
            env,
            working_dir: self.publish.working_dir.clone(),
            timeout: self.timeout_for(target),
            grace_period: self.grace_period,
        }
    }

    /// Publish one target. Never retries; every failure becomes a result.
    pub fn dispatch(&self, request: &DeploymentRequest) -> DeploymentResult {
        let name = request.target.name.as_str();
        let started = Instant::now();

        if self.cancel.is_cancelled() {
            eprintln!("[dispatch] {}: skipped, invocation cancelled", name);
            return DeploymentResult::cancelled(name, started.elapsed());
        }

        let secret = match self.secrets.resolve(&request.target.credential_ref) {
            Ok(secret) => secret,
            Err(e) => {
                eprintln!("[dispatch] {}: {}", name, e.message);
                return DeploymentResult::failed(
                    name,
                    CREDENTIAL_FAILED_EXIT_CODE,
                    e.message,
                    started.elapsed(),
                );
            }
        };

        let job = self.build_job(request, &secret);
        eprintln!(
            "[dispatch] {}: publishing {} to workspace {} (version {})",
            name, request.target.source_path, request.target.workspace_id, request.version_label
        );

        let outcome = self.publisher.publish(&job, &self.cancel);
        let elapsed = started.elapsed();

        let result = match outcome {
            PublishOutcome::Exited { exit_code: 0, .. } => DeploymentResult::published(name, elapsed),
            PublishOutcome::Exited {
                exit_code,
                stdout,
                stderr,
            } => {
                let text = command::pick_error_text(stdout.as_bytes(), stderr.as_bytes());
                let text = if text.is_empty() {
                    format!("publish command exited with status {}", exit_code)
                } else {
                    secrets::redact(&text, &[secret.as_str()])
                };
                DeploymentResult::failed(name, exit_code, text, elapsed)
            }
            PublishOutcome::TimedOut => DeploymentResult::timeout(name, elapsed),
            PublishOutcome::Cancelled => DeploymentResult::cancelled(name, elapsed),
            PublishOutcome::SpawnFailed(e) => DeploymentResult::failed(
                name,
                SPAWN_FAILED_EXIT_CODE,
                secrets::redact(&e, &[secret.as_str()]),
                elapsed,
            ),
        };

        if result.success {
            eprintln!("[dispatch] {}: published in {} ms", name, result.duration_ms);
        } else {
            eprintln!(
                "[dispatch] {}: failed (exit {}): {}",
                name, result.exit_code, result.message
            );
        }

        result
    }

    /// Dispatch every request on a pool of at most `concurrency` workers.
    ///
    /// Returns after all workers have joined, with results in request order
    /// regardless of completion order.
    pub fn dispatch_all(
        &self,
        requests: &[DeploymentRequest],
        concurrency: usize,
    ) -> Vec<DeploymentResult> {
        if requests.is_empty() {
            return Vec::new();
        }

        let workers = concurrency.clamp(1, requests.len());
        let queue: Mutex<VecDeque<usize>> = Mutex::new((0..requests.len()).collect());
        let slots: Mutex<Vec<Option<DeploymentResult>>> =
            Mutex::new((0..requests.len()).map(|_| None).collect());

        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| loop {
                        let next = queue
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .pop_front();
                        let Some(index) = next else { break };

                        let result = self.dispatch(&requests[index]);
                        slots
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())[index] = Some(result);
                    })
                })
                .collect();

            for handle in handles {
                if handle.join().is_err() {
                    eprintln!("[dispatch] a worker thread panicked");
                }
            }
        });

        slots
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .into_iter()
            .zip(requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| DeploymentResult::missing(&request.target.name))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::secrets::StaticSecretStore;

    struct FixedPublisher(PublishOutcome);

    impl Publisher for FixedPublisher {
        fn publish(&self, _job: &PublishJob, _cancel: &CancelToken) -> PublishOutcome {
            self.0.clone()
        }
    }

    fn target(name: &str) -> Target {
        Target {
            name: name.to_string(),
            source_path: format!("{}/", name),
            workspace_id: format!("ws-{}", name),
            credential_ref: "env:TOKEN".to_string(),
            timeout_secs: None,
            workflow_path: None,
        }
    }

    fn request(name: &str) -> DeploymentRequest {
        DeploymentRequest::new(
            target(name),
            &Provenance {
                version_label: "abc123".to_string(),
                provenance_url: "https://github.com/o/r/commit/abc123".to_string(),
            },
        )
    }

    fn dispatcher(outcome: PublishOutcome) -> Dispatcher {
        let registry = Registry::from_config(RegistryConfig::default()).unwrap();
        Dispatcher::new(
            &registry,
            Arc::new(FixedPublisher(outcome)),
            Arc::new(StaticSecretStore::new().with("env:TOKEN", "tok-secret")),
            CancelToken::new(),
        )
    }

    #[test]
    fn build_job_renders_request_verbatim() {
        let d = dispatcher(PublishOutcome::TimedOut);
        let job = d.build_job(&request("alpha"), "tok-secret");

        assert_eq!(job.program, "openhexa");
        assert_eq!(
            job.args,
            vec![
                "pipelines",
                "push",
                "alpha/",
                "--workspace",
                "ws-alpha",
                "--version",
                "abc123",
                "--link",
                "https://github.com/o/r/commit/abc123",
                "--yes"
            ]
        );
        assert!(!job.args.iter().any(|a| a.contains("tok-secret")));
        assert!(job
            .env
            .contains(&("HEXA_TOKEN".to_string(), "tok-secret".to_string())));
        assert_eq!(job.timeout, Duration::from_secs(1800));
    }

    #[test]
    fn non_zero_exit_is_recorded_and_redacted() {
        let d = dispatcher(PublishOutcome::Exited {
            exit_code: 7,
            stdout: String::new(),
            stderr: "auth rejected for tok-secret\n".to_string(),
        });
        let result = d.dispatch(&request("alpha"));
        assert!(!result.success);
        assert_eq!(result.exit_code, 7);
        assert_eq!(result.message, "auth rejected for ***");
    }

    #[test]
    fn timeout_and_cancel_map_to_fixed_results() {
        let result = dispatcher(PublishOutcome::TimedOut).dispatch(&request("a"));
        assert_eq!((result.exit_code, result.message.as_str()), (-1, "timeout"));

        let result = dispatcher(PublishOutcome::Cancelled).dispatch(&request("a"));
        assert_eq!((result.exit_code, result.message.as_str()), (130, "cancelled"));
    }

    #[test]
    fn unresolvable_credential_fails_without_publishing() {
        let mut req = request("alpha");
        req.target.credential_ref = "env:OTHER".to_string();
        let result = dispatcher(PublishOutcome::TimedOut).dispatch(&req);
        assert!(!result.success);
        assert_eq!(result.exit_code, CREDENTIAL_FAILED_EXIT_CODE);
        assert!(result.message.contains("env:OTHER"));
    }

    #[test]
    fn dispatch_is_idempotent_for_deterministic_publisher() {
        let d = dispatcher(PublishOutcome::Exited {
            exit_code: 0,
            stdout: "ok".to_string(),
            stderr: String::new(),
        });
        assert_eq!(d.dispatch(&request("alpha")), d.dispatch(&request("alpha")));
    }

    #[test]
    fn cancelled_invocation_skips_queued_requests() {
        let d = dispatcher(PublishOutcome::Exited {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        });
        d.cancel.cancel();
        let results = d.dispatch_all(&[request("a"), request("b")], 2);
        assert!(results.iter().all(|r| r.message == "cancelled"));
    }

    #[test]
    fn empty_request_list_dispatches_nothing() {
        let d = dispatcher(PublishOutcome::TimedOut);
        assert!(d.dispatch_all(&[], 4).is_empty());
    }
}
