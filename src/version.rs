use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::config::Project;
use crate::platform::BuildInfo;

/// Marks a version derived from a branch rather than a release tag.
pub const SNAPSHOT_SUFFIX: &str = "-snapshot";

const MAX_BRANCH_LENGTH: usize = 100;
const SHORT_COMMIT_LENGTH: usize = 7;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("could not resolve version: no release tag, branch or commit available")]
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Release,
    Snapshot,
}

/// A resolved release version. Its [`Kind`] is read off the string itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(String);

impl Version {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> Kind {
        if self.0 == SNAPSHOT_SUFFIX[1..] || self.0.ends_with(SNAPSHOT_SUFFIX) {
            Kind::Snapshot
        } else {
            Kind::Release
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.kind() == Kind::Snapshot
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the version to release from the current build signals.
///
/// A tag carrying the project's version prefix is a release, and the version
/// is the tag without the prefix. Anything else with a branch or commit becomes
/// `<branch>[-<build number or short commit>]-snapshot`.
pub fn resolve(project: &Project, build: &BuildInfo) -> Result<Version, Error> {
    if let Some(release) = build.tag.strip_prefix(&project.version_prefix) {
        if !build.tag.is_empty() && !release.is_empty() {
            return Ok(Version::new(release));
        }
    }

    if build.commit.is_empty() && build.branch.is_empty() {
        return Err(Error::Unresolved);
    }

    let mut parts = vec![branch_slug(&build.branch)];
    if !build.build_number.is_empty() {
        parts.push(build.build_number.clone());
    } else if !build.commit.is_empty() {
        parts.push(build.commit.chars().take(SHORT_COMMIT_LENGTH).collect());
    }

    Ok(Version::new(format!("{}{}", parts.join("-"), SNAPSHOT_SUFFIX)))
}

/// Make a branch name usable inside a docker tag.
fn branch_slug(branch: &str) -> String {
    if branch.is_empty() {
        return "detached".to_string();
    }
    branch
        .chars()
        .take(MAX_BRANCH_LENGTH)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
