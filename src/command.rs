use std::ffi::OsStr;
use std::process::{Command, ExitStatus, Stdio};
use log::{debug, trace};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0} is not installed, install it before running this command")]
    MissingBinary(String),

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("run `{command}`: {err}")]
    Spawn {
        command: String,
        err: std::io::Error,
    },
}

fn command_line<I, S>(program: &str, args: I) -> (Command, String)
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
        command.arg(arg);
    }
    (command, line)
}

/// Fail with [Error::MissingBinary] unless `program` can be found in `PATH`.
pub fn ensure_binary(program: &str) -> Result<(), Error> {
    let found = std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false);
    if found {
        Ok(())
    } else {
        Err(Error::MissingBinary(program.to_string()))
    }
}

/// Run a command with its output mapped to ours.
pub fn run<I, S>(program: &str, args: I) -> Result<(), Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let (mut command, line) = command_line(program, args);
    debug!("Running {line}");
    command
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|err| Error::Spawn { command: line.clone(), err })
        .and_then(|status| {
            if status.success() {
                Ok(())
            } else {
                Err(Error::Failed { command: line, status, stderr: String::new() })
            }
        })
}

/// Run a command and return its trimmed standard output.
pub fn output<I, S>(program: &str, args: I) -> Result<String, Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let (mut command, line) = command_line(program, args);
    trace!("Running {line}");
    let output = command
        .stdin(Stdio::null())
        .output()
        .map_err(|err| Error::Spawn { command: line.clone(), err })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(Error::Failed {
            command: line,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Run a command only for its exit status.
///
/// A non-zero exit code is `Ok(false)`, only a failure to start the program is an error.
pub fn succeeds<I, S>(program: &str, args: I) -> Result<bool, Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let (mut command, line) = command_line(program, args);
    trace!("Running {line}");
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .map_err(|err| Error::Spawn { command: line, err })
}
