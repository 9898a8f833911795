//! Background command jobs started from the console.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Per-job wall clock limit.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    /// Program followed by its arguments, exactly as passed to the process.
    pub command: Vec<String>,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub output: String,
    /// Changes cluster state; at most one such job runs at a time.
    pub mutating: bool,
}

impl Job {
    /// Command for display; arguments with whitespace or quotes are single-quoted.
    #[must_use]
    pub fn command_line(&self) -> String {
        self.command
            .iter()
            .map(|arg| {
                if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
                    format!("'{}'", arg.replace('\'', r"'\''"))
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("'{name}' ({id}) is still running; wait for it to finish")]
    Busy { id: String, name: String },
}

/// What to run.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub mutating: bool,
}

/// In-memory job table. Jobs are kept for the life of the process.
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Job>>,
    workdir: Option<PathBuf>,
    timeout: Duration,
}

impl JobRegistry {
    #[must_use]
    pub fn new(workdir: Option<PathBuf>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            workdir,
            timeout: JOB_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Spawn `spec` and return its id.
    ///
    /// A mutating job is refused while another mutating job runs. A process
    /// that fails to start is recorded as a failed job rather than an error.
    pub fn start(self: &Arc<Self>, spec: JobSpec) -> Result<String, JobError> {
        let mut jobs = self.lock();
        if spec.mutating {
            if let Some(active) = jobs
                .values()
                .find(|j| j.mutating && j.status == JobStatus::Running)
            {
                return Err(JobError::Busy {
                    id: active.id.clone(),
                    name: active.name.clone(),
                });
            }
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let command = std::iter::once(spec.program.display().to_string())
            .chain(spec.args.iter().cloned())
            .collect::<Vec<_>>();
        let mut job = Job {
            id: id.clone(),
            name: spec.name.clone(),
            command,
            status: JobStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            exit_code: None,
            output: String::new(),
            mutating: spec.mutating,
        };

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        match cmd.spawn() {
            Ok(child) => {
                info!(job = %id, name = %spec.name, command = %job.command_line(), "Job started");
                jobs.insert(id.clone(), job);
                drop(jobs);
                tokio::spawn(Arc::clone(self).supervise(id.clone(), child));
            }
            Err(e) => {
                warn!(job = %id, name = %spec.name, error = %e, "Job failed to start");
                job.status = JobStatus::Error;
                job.ended_at = Some(Utc::now());
                job.output = format!("failed to start {}: {e}\n", spec.program.display());
                jobs.insert(id.clone(), job);
            }
        }
        Ok(id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Job> {
        self.lock().get(id).cloned()
    }

    /// Newest first.
    #[must_use]
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().values().cloned().collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    fn append(&self, id: &str, line: &str) {
        if let Some(job) = self.lock().get_mut(id) {
            job.output.push_str(line);
            job.output.push('\n');
        }
    }

    fn finish(&self, id: &str, exit_code: Option<i32>, note: Option<String>) {
        if let Some(job) = self.lock().get_mut(id) {
            if let Some(note) = note {
                job.output.push_str(&note);
                job.output.push('\n');
            }
            job.exit_code = exit_code;
            job.ended_at = Some(Utc::now());
            job.status = if exit_code == Some(0) {
                JobStatus::Done
            } else {
                JobStatus::Error
            };
            info!(job = %id, status = ?job.status, exit_code = ?exit_code, "Job finished");
        }
    }

    async fn supervise(self: Arc<Self>, id: String, mut child: Child) {
        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(Arc::clone(&self).pump(id.clone(), stdout)));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(Arc::clone(&self).pump(id.clone(), stderr)));
        }

        let (exit_code, note) = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => (status.code(), None),
            Ok(Err(e)) => (None, Some(format!("wait failed: {e}"))),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(job = %id, error = %e, "Failed to kill timed out job");
                }
                (
                    None,
                    Some(format!("timed out after {}s", self.timeout.as_secs())),
                )
            }
        };

        for pump in pumps {
            if tokio::time::timeout(DRAIN_TIMEOUT, pump).await.is_err() {
                debug!(job = %id, "Output still open after exit, detaching");
            }
        }
        self.finish(&id, exit_code, note);
    }

    async fn pump<R: AsyncRead + Unpin>(self: Arc<Self>, id: String, reader: R) {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            self.append(&id, &line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, mutating: bool) -> JobSpec {
        JobSpec {
            name: "test".to_string(),
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            mutating,
        }
    }

    async fn wait_finished(registry: &JobRegistry, id: &str) -> Job {
        for _ in 0..600 {
            let job = registry.get(id).unwrap();
            if job.status != JobStatus::Running {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn test_job_captures_both_streams() {
        let registry = Arc::new(JobRegistry::new(None));
        let id = registry.start(sh("echo out; echo err >&2", false)).unwrap();
        assert_eq!(registry.list().len(), 1);

        let job = wait_finished(&registry, &id).await;
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.exit_code, Some(0));
        assert!(job.output.contains("out\n"));
        assert!(job.output.contains("err\n"));
        assert!(job.ended_at.is_some());
        assert_eq!(id.len(), 32);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let registry = Arc::new(JobRegistry::new(None));
        let id = registry.start(sh("exit 3", false)).unwrap();
        let job = wait_finished(&registry, &id).await;
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_running_job_visible_and_output_grows() {
        let registry = Arc::new(JobRegistry::new(None));
        let id = registry.start(sh("echo first; sleep 0.5; echo second", false)).unwrap();
        assert_eq!(registry.get(&id).unwrap().status, JobStatus::Running);

        let mut seen = 0;
        for _ in 0..200 {
            let job = registry.get(&id).unwrap();
            assert!(job.output.len() >= seen);
            seen = job.output.len();
            if job.status != JobStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.get(&id).unwrap().output, "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_timeout_marks_error() {
        let registry = Arc::new(JobRegistry::new(None).with_timeout(Duration::from_millis(200)));
        let id = registry.start(sh("exec sleep 5", false)).unwrap();
        let job = wait_finished(&registry, &id).await;
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.output.contains("timed out"));
    }

    #[tokio::test]
    async fn test_single_flight_for_mutating_jobs() {
        let registry = Arc::new(JobRegistry::new(None));
        let first = registry.start(sh("sleep 1", true)).unwrap();

        let err = registry.start(sh("true", true)).unwrap_err();
        assert!(matches!(err, JobError::Busy { ref id, .. } if *id == first));
        assert!(registry.start(sh("true", false)).is_ok());

        wait_finished(&registry, &first).await;
        assert!(registry.start(sh("true", true)).is_ok());
    }

    #[tokio::test]
    async fn test_missing_program_recorded_as_failed_job() {
        let registry = Arc::new(JobRegistry::new(None));
        let id = registry
            .start(JobSpec {
                name: "missing".to_string(),
                program: PathBuf::from("/nonexistent/ceres"),
                args: Vec::new(),
                mutating: true,
            })
            .unwrap();
        let job = registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.output.contains("failed to start"));
    }

    #[tokio::test]
    async fn test_command_keeps_argument_boundaries() {
        let registry = Arc::new(JobRegistry::new(None));
        let id = registry
            .start(JobSpec {
                name: "ceres backup".to_string(),
                program: PathBuf::from("echo"),
                args: vec!["backup".into(), "create".into(), "nightly run".into()],
                mutating: false,
            })
            .unwrap();
        let job = wait_finished(&registry, &id).await;
        assert_eq!(job.command, vec!["echo", "backup", "create", "nightly run"]);
        assert_eq!(job.command_line(), "echo backup create 'nightly run'");
        assert_eq!(job.output, "backup create nightly run\n");
    }
}
