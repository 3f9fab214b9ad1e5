//! External consumer-runner invocation.

use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::{Child, Command};

use crate::streams::StreamId;

/// Runner subcommand that consumes a stream.
pub const LISTEN_VERB: &str = "streamer:listen";

/// No-op invocation used to detect a working runner.
pub const PROBE_ARGS: [&str; 2] = ["list", "streamer"];

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Runner executable not found: {0}")]
    NotFound(String),
    #[error("Runner probe failed ({0})")]
    ProbeFailed(String),
    #[error("Runner stdout unavailable")]
    NoStdout,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Arguments of one `listen` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenArgs {
    pub stream: String,
    pub group: Option<String>,
    pub consumer: Option<String>,
    /// Resume cursor passed as `--last_id`.
    pub last_id: StreamId,
}

impl ListenArgs {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![LISTEN_VERB.to_string(), self.stream.clone()];
        if let Some(group) = &self.group {
            args.push(format!("--group={}", group));
        }
        if let Some(consumer) = &self.consumer {
            args.push(format!("--consumer={}", consumer));
        }
        args.push(format!("--last_id={}", self.last_id));
        args
    }
}

/// How to launch the consumer runner: an executable plus leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCommand {
    program: String,
    base_args: Vec<String>,
}

impl RunnerCommand {
    pub fn new<I, S>(program: impl Into<String>, base_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            base_args: base_args.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolve the runner from an artisan location.
    ///
    /// An existing directory means `php <dir>/artisan`. Anything else is a
    /// command prefix (for example `docker exec app`) that `php artisan`
    /// is appended to. No path means `php artisan` in the working directory.
    pub fn artisan(path: Option<&str>) -> Self {
        match path.map(str::trim).filter(|p| !p.is_empty()) {
            Some(dir) if Path::new(dir).is_dir() => {
                let artisan = Path::new(dir).join("artisan");
                Self::new("php", [artisan.to_string_lossy().into_owned()])
            }
            Some(prefix) => {
                let mut parts: Vec<String> =
                    prefix.split_whitespace().map(str::to_string).collect();
                parts.push("php".to_string());
                parts.push("artisan".to_string());
                let program = parts.remove(0);
                Self::new(program, parts)
            }
            None => Self::new("php", ["artisan"]),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn base_args(&self) -> &[String] {
        &self.base_args
    }

    /// Build a command running the runner with `args` appended.
    pub fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args).args(args);
        cmd
    }

    /// Check that the runner can be executed at all.
    pub async fn probe(&self) -> Result<(), RunnerError> {
        which::which(&self.program).map_err(|_| RunnerError::NotFound(self.program.clone()))?;

        let output = self
            .command(PROBE_ARGS)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(RunnerError::ProbeFailed(output.status.to_string()))
        }
    }

    /// Start a listener process with stdout piped. The child is killed if
    /// its handle is dropped.
    pub fn spawn_listen(&self, args: &ListenArgs) -> Result<Child, RunnerError> {
        let child = self
            .command(args.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn listen(stream: &str) -> ListenArgs {
        ListenArgs {
            stream: stream.to_string(),
            group: None,
            consumer: None,
            last_id: StreamId::ZERO,
        }
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    #[test]
    fn test_artisan_default() {
        let runner = RunnerCommand::artisan(None);
        assert_eq!(runner.program(), "php");
        assert_eq!(runner.base_args(), ["artisan"]);
        assert_eq!(RunnerCommand::artisan(Some("  ")), runner);
    }

    #[test]
    fn test_artisan_directory() {
        let dir = TempDir::new().unwrap();
        let runner = RunnerCommand::artisan(dir.path().to_str());
        assert_eq!(runner.program(), "php");
        assert_eq!(
            runner.base_args(),
            [dir.path().join("artisan").to_string_lossy().into_owned()]
        );
    }

    #[test]
    fn test_artisan_command_prefix() {
        let runner = RunnerCommand::artisan(Some("docker exec -i app"));
        assert_eq!(runner.program(), "docker");
        assert_eq!(runner.base_args(), ["exec", "-i", "app", "php", "artisan"]);
    }

    // =========================================================================
    // Arguments
    // =========================================================================

    #[test]
    fn test_listen_args_minimal() {
        assert_eq!(
            listen("orders").to_args(),
            vec!["streamer:listen", "orders", "--last_id=0-0"]
        );
    }

    #[test]
    fn test_listen_args_with_group() {
        let args = ListenArgs {
            group: Some("billing".into()),
            consumer: Some("worker-1".into()),
            last_id: StreamId::new(1_700_000_000_000, 4),
            ..listen("orders")
        };
        assert_eq!(
            args.to_args(),
            vec![
                "streamer:listen",
                "orders",
                "--group=billing",
                "--consumer=worker-1",
                "--last_id=1700000000000-4",
            ]
        );
    }

    // =========================================================================
    // Probe
    // =========================================================================

    #[tokio::test]
    async fn test_probe_missing_program() {
        let runner = RunnerCommand::new("definitely-not-a-runner-9f3a", Vec::<String>::new());
        assert!(matches!(
            runner.probe().await,
            Err(RunnerError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_success_and_failure() {
        let ok = RunnerCommand::new("sh", ["-c", "exit 0"]);
        assert!(ok.probe().await.is_ok());

        let failing = RunnerCommand::new("sh", ["-c", "exit 3"]);
        assert!(matches!(
            failing.probe().await,
            Err(RunnerError::ProbeFailed(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_passes_list_arguments() {
        // `sh -c script argv0 args...`: the probe args land in $0 and $1.
        let runner = RunnerCommand::new("sh", ["-c", r#"[ "$0" = list ] && [ "$1" = streamer ]"#]);
        assert!(runner.probe().await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_listen_pipes_stdout() {
        use tokio::io::AsyncReadExt;

        let runner = RunnerCommand::new("sh", ["-c", r#"echo "$0 $1 $2""#]);
        let mut child = runner.spawn_listen(&listen("orders")).unwrap();

        let mut out = String::new();
        child
            .stdout
            .take()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        child.wait().await.unwrap();

        assert_eq!(out, "streamer:listen orders --last_id=0-0\n");
    }
}
