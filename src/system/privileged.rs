//! Capability for running commands with elevated rights.

use crate::config::PrivilegedConfig;
use async_trait::async_trait;
use std::{
   env,
   path::{Path, PathBuf},
   process::Stdio,
   time::Duration,
};
use tokio::{io::AsyncWriteExt, process::Command};

// pkexec: 126 = authorization dismissed or refused, 127 = no agent / cannot authenticate.
const ELEVATOR_DENIED_CODES: [i32; 2] = [126, 127];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivilegedStatus {
   Success,
   Failed(Option<i32>),
   Denied,
   TimedOut,
}

#[derive(Debug, Clone)]
pub struct PrivilegedOutput {
   pub status: PrivilegedStatus,
   /// stdout of the command alone. Anything read back as file content comes from here.
   pub stdout: String,
   /// stdout followed by stderr, verbatim. For logs and error reports.
   pub output: String,
}

impl PrivilegedOutput {
   fn with_status(status: PrivilegedStatus, output: String) -> Self {
      Self {
         status,
         stdout: output.clone(),
         output,
      }
   }

   pub fn success(stdout: impl Into<String>) -> Self {
      Self::with_status(PrivilegedStatus::Success, stdout.into())
   }

   pub fn failed(code: Option<i32>, output: impl Into<String>) -> Self {
      Self::with_status(PrivilegedStatus::Failed(code), output.into())
   }

   pub fn denied(output: impl Into<String>) -> Self {
      Self::with_status(PrivilegedStatus::Denied, output.into())
   }

   /// Append diagnostics that must not be mistaken for command output.
   pub fn with_stderr(mut self, stderr: &str) -> Self {
      self.output.push_str(stderr);
      self
   }

   pub fn ok(&self) -> bool {
      self.status == PrivilegedStatus::Success
   }
}

/// Runs one argv with elevated rights. `stdin` is fed to the process when given.
///
/// May block for as long as the user takes to answer an authorization prompt.
#[async_trait]
pub trait PrivilegedRunner: Send + Sync {
   async fn run(&self, argv: &[String], stdin: Option<&str>) -> PrivilegedOutput;
}

/// Runs commands through an elevation helper such as `pkexec`.
pub struct ElevatedRunner {
   elevator: Option<String>,
   timeout: Option<Duration>,
}

impl ElevatedRunner {
   pub fn new(elevator: Option<String>, timeout: Option<Duration>) -> Self {
      Self {
         elevator: elevator.filter(|e| !e.trim().is_empty()),
         timeout,
      }
   }

   /// No elevation: the argv runs as the current user.
   pub fn direct() -> Self {
      Self::new(None, None)
   }

   pub fn from_config(config: &PrivilegedConfig) -> Self {
      Self::new(Some(config.elevator.clone()), config.timeout())
   }

   fn command_line(&self, argv: &[String]) -> Vec<String> {
      self
         .elevator
         .iter()
         .cloned()
         .chain(argv.iter().cloned())
         .collect()
   }

   async fn spawn_and_wait(&self, full: &[String], stdin: Option<&str>) -> PrivilegedOutput {
      let Some((program, args)) = full.split_first() else {
         return PrivilegedOutput::failed(None, "empty command");
      };

      let mut command = Command::new(program);
      command
         .args(args)
         .stdin(if stdin.is_some() {
            Stdio::piped()
         } else {
            Stdio::null()
         })
         .stdout(Stdio::piped())
         .stderr(Stdio::piped())
         .kill_on_drop(true);

      let mut child = match command.spawn() {
         Ok(child) => child,
         Err(e) if self.elevator.is_some() && e.kind() == std::io::ErrorKind::NotFound => {
            return PrivilegedOutput::denied(format!("elevation helper '{}' not found", program));
         }
         Err(e) => return PrivilegedOutput::failed(None, format!("failed to start {}: {}", program, e)),
      };

      if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
         if let Err(e) = pipe.write_all(input.as_bytes()).await {
            log::warn!("Writing stdin of {} failed: {}", program, e);
         }
         drop(pipe);
      }

      let output = child.wait_with_output().await;

      match output {
         Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output.status.code();
            let status = if output.status.success() {
               PrivilegedStatus::Success
            } else if self.elevator.is_some()
               && code.is_some_and(|c| ELEVATOR_DENIED_CODES.contains(&c))
            {
               PrivilegedStatus::Denied
            } else {
               PrivilegedStatus::Failed(code)
            };
            PrivilegedOutput::with_status(status, stdout).with_stderr(&stderr)
         }
         Err(e) => PrivilegedOutput::failed(None, e.to_string()),
      }
   }
}

#[async_trait]
impl PrivilegedRunner for ElevatedRunner {
   async fn run(&self, argv: &[String], stdin: Option<&str>) -> PrivilegedOutput {
      let full = self.command_line(argv);
      log::info!("Running privileged command: {}", full.join(" "));

      let result = match self.timeout {
         Some(limit) => match tokio::time::timeout(limit, self.spawn_and_wait(&full, stdin)).await {
            Ok(result) => result,
            Err(_) => PrivilegedOutput::with_status(
               PrivilegedStatus::TimedOut,
               format!("timed out after {:?}", limit),
            ),
         },
         None => self.spawn_and_wait(&full, stdin).await,
      };

      if !result.ok() {
         log::error!(
            "Privileged command `{}` failed ({:?}): {}",
            full.join(" "),
            result.status,
            result.output.trim()
         );
      }
      result
   }
}

/// Manual equivalent of a privileged argv, for remediation hints.
pub fn manual_command(argv: &[String]) -> String {
   format!("sudo {}", argv.join(" "))
}

pub fn argv<I, S>(parts: I) -> Vec<String>
where
   I: IntoIterator<Item = S>,
   S: Into<String>,
{
   parts.into_iter().map(Into::into).collect()
}

/// Locate `program` the way a shell would: absolute paths must exist, bare names are
/// searched on `PATH`.
pub fn find_program(program: &str) -> Option<PathBuf> {
   let path = Path::new(program);
   if path.is_absolute() || program.contains('/') {
      return path.is_file().then(|| path.to_path_buf());
   }
   env::var_os("PATH").and_then(|paths| {
      env::split_paths(&paths)
         .map(|dir| dir.join(program))
         .find(|candidate| candidate.is_file())
   })
}
