use std::fmt::{Display, Formatter};
use std::process::{Command, Stdio};

use log::debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("run {command}: {err}")]
    Spawn {
        command: String,
        err: std::io::Error,
    },

    #[error("{command} failed with {code}:\n{output}")]
    Failed {
        command: String,
        code: ExitCode,
        /// Combined stdout and stderr.
        output: String,
    },

    #[error("prepare {command}: {err}")]
    Prepare {
        command: String,
        err: std::io::Error,
    },
}

impl Error {
    /// Whatever the command printed before failing.
    pub fn output(&self) -> &str {
        match self {
            Error::Failed { output, .. } => output,
            _ => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub Option<i32>);

impl Display for ExitCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("no exit code (terminated by signal)"),
        }
    }
}

/// Runs external programs on behalf of the adapters.
pub trait CommandRunner {
    /// Run `program` to completion and return its combined output.
    fn capture(&self, program: &str, args: &[String]) -> Result<String, Error>;
}

/// Runs commands as child processes of this one.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner {
    env: Vec<(String, String)>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an extra environment variable for every command.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

pub fn display(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

impl CommandRunner for SystemRunner {
    fn capture(&self, program: &str, args: &[String]) -> Result<String, Error> {
        let command = display(program, args);
        debug!("Running command {}", command);

        let output = Command::new(program)
            .args(args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .output()
            .map_err(|err| Error::Spawn {
                command: command.clone(),
                err,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(text)
        } else {
            Err(Error::Failed {
                command,
                code: ExitCode(output.status.code()),
                output: text,
            })
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Records every command and answers from a queue of canned results.
    #[derive(Default)]
    pub struct ScriptedRunner {
        pub calls: RefCell<Vec<String>>,
        pub responses: RefCell<VecDeque<Result<String, Error>>>,
    }

    impl ScriptedRunner {
        pub fn respond(self, response: Result<String, Error>) -> Self {
            self.responses.borrow_mut().push_back(response);
            self
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn capture(&self, program: &str, args: &[String]) -> Result<String, Error> {
            self.calls.borrow_mut().push(display(program, args));
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    pub fn failure(output: &str) -> Error {
        Error::Failed {
            command: "test".into(),
            code: ExitCode(Some(1)),
            output: output.into(),
        }
    }

    #[test]
    fn failed_commands_carry_their_output() {
        let err = failure("denied");
        assert_eq!(err.output(), "denied");
        assert_eq!(err.to_string(), "test failed with exit code 1:\ndenied");
        assert_eq!(ExitCode(None).to_string(), "no exit code (terminated by signal)");
    }

    #[test]
    fn missing_programs_fail_to_spawn() {
        let result = SystemRunner::new().capture("gcpb-no-such-program", &["x".to_string()]);
        assert!(matches!(result, Err(Error::Spawn { ref command, .. }) if command == "gcpb-no-such-program x"));
    }
}
