use crate::deadline::Deadline;
use crate::error::{Result, UpdaterError};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured result of a finished git invocation.
#[derive(Debug)]
pub struct GitOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Runs `git` in a directory, killing it when the pass deadline passes.
///
/// `secrets` are scrubbed from anything that ends up in an error message.
#[derive(Debug, Clone)]
pub struct GitRunner {
    secrets: Vec<String>,
}

impl GitRunner {
    pub fn new(secrets: Vec<String>) -> Self {
        let secrets = secrets.into_iter().filter(|s| !s.is_empty()).collect();
        Self { secrets }
    }

    pub fn run(&self, dir: &Path, args: &[&str], deadline: &Deadline) -> Result<GitOutput> {
        let operation = operation_name(args);
        deadline.remaining(&operation)?;
        debug!(command = %self.redact(&args.join(" ")), "running git");

        let mut child = Command::new("git")
            .current_dir(dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| UpdaterError::Git(format!("Failed to execute '{operation}': {e}")))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = wait_until(&mut child, deadline, &operation)?;

        Ok(GitOutput {
            status,
            stdout: self.redact(&join_reader(stdout)),
            stderr: self.redact(&join_reader(stderr)),
        })
    }

    /// Like [`GitRunner::run`], mapping a non-zero exit to an error built by `to_error`.
    pub fn run_checked(
        &self,
        dir: &Path,
        args: &[&str],
        deadline: &Deadline,
        to_error: fn(String) -> UpdaterError,
    ) -> Result<GitOutput> {
        let output = self.run(dir, args, deadline)?;
        if output.success() {
            return Ok(output);
        }

        let command = self.redact(&args.join(" "));
        Err(to_error(format!(
            "git {command} failed: {}",
            output.stderr.trim()
        )))
    }

    pub fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), "***"))
    }
}

/// `git <subcommand>`, skipping leading `-c key=value` overrides.
fn operation_name(args: &[&str]) -> String {
    let mut args = args.iter();
    while let Some(arg) = args.next() {
        if *arg == "-c" {
            args.next();
            continue;
        }
        return format!("git {arg}");
    }
    "git".to_string()
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn wait_until(child: &mut Child, deadline: &Deadline, operation: &str) -> Result<ExitStatus> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if deadline.is_expired() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(UpdaterError::Timeout(operation.to_string()));
        }
        thread::sleep(POLL_INTERVAL);
    }
}
