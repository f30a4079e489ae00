//! Command runner abstraction for invoking external programs.
//!
//! `CommandRunner` is the trait the engine uses to run the trust-store
//! rebuild and package queries. `ProcessRunner` is the production
//! implementation that spawns the program directly (no shell) and kills it
//! on timeout. `MockRunner` is the test double that records calls and
//! returns preset responses.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Exit status and captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `-1` if the process was terminated by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn ok() -> Self {
        CommandOutput {
            status: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: &str) -> Self {
        CommandOutput {
            status,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    Spawn(String),
    TimedOut,
}

/// Trait for executing a program with arguments under a deadline.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str], timeout: Duration)
        -> Result<CommandOutput, RunError>;
}

/// Production runner that spawns the program and polls it until the deadline.
pub struct ProcessRunner;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

impl CommandRunner for ProcessRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, RunError> {
        debug!(program, ?args, "spawning");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RunError::Spawn(e.to_string()))?;

        // Drain pipes on their own threads so a chatty child cannot block on
        // a full pipe while we wait for it.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    terminate(&mut child);
                    return Err(RunError::Spawn(e.to_string()));
                }
            }
            if Instant::now() >= deadline {
                warn!(program, "timed out, killing");
                terminate(&mut child);
                return Err(RunError::TimedOut);
            }
            std::thread::sleep(Duration::from_millis(20));
        };

        Ok(CommandOutput {
            status: status.code().unwrap_or(-1),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        })
    }
}

/// Kill and reap a child we are giving up on.
fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Test-double runner that records invocations and returns pre-configured
/// responses in order. Once the responses run out, every call succeeds.
pub struct MockRunner {
    responses: Mutex<Vec<Result<CommandOutput, RunError>>>,
    commands: Mutex<Vec<String>>,
}

impl MockRunner {
    pub fn with_responses(responses: Vec<Result<CommandOutput, RunError>>) -> Self {
        let mut reversed = responses;
        reversed.reverse();
        MockRunner {
            responses: Mutex::new(reversed),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn new() -> Self {
        MockRunner::with_responses(Vec::new())
    }

    /// Every invocation so far, rendered as `program arg1 arg2`.
    pub fn executed_commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.executed_commands().len()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        _timeout: Duration,
    ) -> Result<CommandOutput, RunError> {
        let mut rendered = program.to_string();
        for arg in args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(rendered);
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_else(|| Ok(CommandOutput::ok()))
    }
}
