use std::fs::{self, File};
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;

use camino::Utf8PathBuf;

use crate::error::GenerateError;
use crate::io::as_overhead;

/// External command producing a plan file.
///
/// The command line is split with POSIX shell quoting rules and run directly,
/// without a shell.
/// Standard output and standard error both go to `log`, after a first line
/// holding the command itself.
#[derive(Debug, Clone)]
pub struct PlanGenerator {
    pub command: String,
    pub log: Utf8PathBuf,
}

impl PlanGenerator {
    pub fn new(command: impl Into<String>, log: impl Into<Utf8PathBuf>) -> Self {
        Self {
            command: command.into(),
            log: log.into(),
        }
    }

    pub fn run(&self) -> Result<(), GenerateError> {
        let parts = shlex::split(&self.command)
            .ok_or_else(|| GenerateError::UnbalancedQuotes(self.command.clone()))?;
        let (program, args) = parts.split_first().ok_or(GenerateError::EmptyCommand)?;

        if let Some(parent) = self.log.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| GenerateError::Spawn(self.command.clone(), e))?;
        }

        let mut stdout =
            File::create(&self.log).map_err(|e| GenerateError::Spawn(self.command.clone(), e))?;
        writeln!(stdout, "{}", self.command)
            .map_err(|e| GenerateError::Spawn(self.command.clone(), e))?;
        let stderr = stdout
            .try_clone()
            .map_err(|e| GenerateError::Spawn(self.command.clone(), e))?;

        tracing::info!("running plan generator: {}", self.command);
        let s = Instant::now();

        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .map_err(|e| GenerateError::Spawn(self.command.clone(), e))?;

        if !status.success() {
            tracing::error!("plan generator failed, see {}", self.log);
            return Err(GenerateError::ExternalToolFailed {
                code: status.code(),
                log: self.log.clone(),
            });
        }

        tracing::info!("plan generator finished {}", as_overhead(s));
        Ok(())
    }
}
