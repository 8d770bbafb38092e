use std::fmt::{Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

/// Expands to every step in [`Step::ALL`].
pub const ALL: &str = "all";

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("unrecognized step '{0}'")]
    Unrecognized(String),
}

/// The fixed step vocabulary of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Info,
    Auth,
    Build,
    Push,
    DeployConfig,
    ValidateConfig,
    Deploy,
    WaitForDeploy,
}

impl Step {
    /// Canonical release order.
    pub const ALL: [Step; 8] = [
        Step::Info,
        Step::Auth,
        Step::Build,
        Step::Push,
        Step::DeployConfig,
        Step::ValidateConfig,
        Step::Deploy,
        Step::WaitForDeploy,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::Info => "info",
            Step::Auth => "auth",
            Step::Build => "build",
            Step::Push => "push",
            Step::DeployConfig => "deploy-config",
            Step::ValidateConfig => "validate-config",
            Step::Deploy => "deploy",
            Step::WaitForDeploy => "wait-for-deploy",
        }
    }
}

impl Display for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Step {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Step::ALL
            .into_iter()
            .find(|step| step.name() == s)
            .ok_or_else(|| Error::Unrecognized(s.to_string()))
    }
}

/// Turn requested step names into steps, expanding `all` in place.
///
/// The whole list is checked before anything runs.
pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Vec<Step>, Error> {
    let mut steps = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref().trim();
        if name == ALL {
            steps.extend(Step::ALL);
        } else {
            steps.push(name.parse()?);
        }
    }
    Ok(steps)
}

/// Comma separated step names, as shown in notifications.
pub fn join(steps: &[Step]) -> String {
    steps
        .iter()
        .map(|step| step.name())
        .collect::<Vec<_>>()
        .join(", ")
}
