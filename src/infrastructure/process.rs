/// Subprocess supervision for foreign runtimes.
///
/// A child is spawned with stdout and stderr redirected into files in its
/// working directory, then polled until it exits or its deadline passes.
/// Every exit path reaps the child; a child still running when the guard
/// drops is killed first.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ═══════════════════════════════════════════════════════════════════════════
// Public API
// ═══════════════════════════════════════════════════════════════════════════

/// Describes a command without running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

/// The command that runs an R driver script.
pub fn build_rscript_spec(rscript: &str, driver: &Path) -> CommandSpec {
    CommandSpec {
        program: rscript.to_string(),
        args: vec!["--vanilla".to_string(), driver.to_string_lossy().to_string()],
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug)]
pub enum Completion {
    Finished(ProcessOutput),
    TimedOut,
}

/// Run `spec` inside `workdir`, killing it once `timeout` elapses.
pub fn run_supervised(spec: &CommandSpec, workdir: &Path, timeout: Option<Duration>) -> io::Result<Completion> {
    let stdout_path = workdir.join("stdout.log");
    let stderr_path = workdir.join("stderr.log");

    let child = Command::new(&spec.program)
        .args(&spec.args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(File::create(&stdout_path)?)
        .stderr(File::create(&stderr_path)?)
        .spawn()?;
    debug!("Spawned {} (pid {})", spec.program, child.id());

    let mut guard = ChildGuard { child: Some(child) };
    // A deadline past `Instant`'s range is no deadline.
    let deadline = timeout.and_then(|limit| Instant::now().checked_add(limit).map(|at| (limit, at)));
    let status = match deadline {
        None => guard.wait()?,
        Some((limit, deadline)) => match guard.wait_until(deadline)? {
            Some(status) => status,
            None => {
                warn!("{} exceeded {:?}; killing it", spec.program, limit);
                guard.kill();
                return Ok(Completion::TimedOut);
            }
        },
    };

    Ok(Completion::Finished(ProcessOutput {
        status,
        stdout: read_log(&stdout_path),
        stderr: read_log(&stderr_path),
    }))
}

// ═══════════════════════════════════════════════════════════════════════════
// Internal Implementation
// ═══════════════════════════════════════════════════════════════════════════

struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    fn wait(&mut self) -> io::Result<ExitStatus> {
        match self.child.take() {
            Some(mut child) => child.wait(),
            None => Err(io::Error::new(io::ErrorKind::Other, "child already reaped")),
        }
    }

    fn wait_until(&mut self, deadline: Instant) -> io::Result<Option<ExitStatus>> {
        let Some(child) = self.child.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::Other, "child already reaped"));
        };
        loop {
            if let Some(status) = child.try_wait()? {
                self.child = None;
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

fn read_log(path: &Path) -> String {
    fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
