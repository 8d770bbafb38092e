//! CI platform detection.
//!
//! Candidates are consulted in a fixed order and the first one that detects
//! itself wins: Bitbucket Pipelines, GitHub Actions, then a plain local git
//! checkout.

use std::path::Path;

use log::debug;
use thiserror::Error;

use crate::command::CommandRunner;
use crate::vars::VarSource;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no supported CI platform or git repository detected")]
    NotRecognized,
}

/// Build signals exposed by a CI platform.
pub trait Platform {
    fn name(&self) -> &str;
    fn is_detected(&self) -> bool;
    fn current_commit(&self) -> String;
    fn current_tag(&self) -> String;
    fn current_branch(&self) -> String;
    fn current_build_number(&self) -> String;
    fn build_url(&self) -> String;
    fn repository_url(&self) -> String;
}

/// Snapshot of everything a [`Platform`] reports, taken once per run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildInfo {
    pub platform: String,
    pub commit: String,
    pub tag: String,
    pub branch: String,
    pub build_number: String,
    pub build_url: String,
    pub repository_url: String,
}

impl BuildInfo {
    pub fn from_platform(platform: &dyn Platform) -> Self {
        Self {
            platform: platform.name().to_string(),
            commit: platform.current_commit(),
            tag: platform.current_tag(),
            branch: platform.current_branch(),
            build_number: platform.current_build_number(),
            build_url: platform.build_url(),
            repository_url: platform.repository_url(),
        }
    }
}

/// Bitbucket Pipelines.
pub struct Bitbucket<'a> {
    vars: &'a dyn VarSource,
}

impl<'a> Bitbucket<'a> {
    pub fn new(vars: &'a dyn VarSource) -> Self {
        Self { vars }
    }

    fn get(&self, key: &str) -> String {
        self.vars.var(key).unwrap_or_default()
    }
}

impl Platform for Bitbucket<'_> {
    fn name(&self) -> &str {
        "Bitbucket"
    }

    fn is_detected(&self) -> bool {
        self.vars.var("BITBUCKET_REPO_SLUG").is_some()
    }

    fn current_commit(&self) -> String {
        self.get("BITBUCKET_COMMIT")
    }

    fn current_tag(&self) -> String {
        self.get("BITBUCKET_TAG")
    }

    fn current_branch(&self) -> String {
        self.get("BITBUCKET_BRANCH")
    }

    fn current_build_number(&self) -> String {
        self.get("BITBUCKET_BUILD_NUMBER")
    }

    fn build_url(&self) -> String {
        let origin = self.get("BITBUCKET_GIT_HTTP_ORIGIN");
        if origin.is_empty() {
            return String::new();
        }
        format!(
            "{}/addon/pipelines/home#!/results/{}",
            origin,
            self.current_build_number()
        )
    }

    fn repository_url(&self) -> String {
        self.get("BITBUCKET_GIT_HTTP_ORIGIN")
    }
}

/// GitHub Actions.
pub struct GitHubActions<'a> {
    vars: &'a dyn VarSource,
}

impl<'a> GitHubActions<'a> {
    pub fn new(vars: &'a dyn VarSource) -> Self {
        Self { vars }
    }

    fn get(&self, key: &str) -> String {
        self.vars.var(key).unwrap_or_default()
    }

    fn ref_type(&self) -> String {
        self.get("GITHUB_REF_TYPE")
    }
}

impl Platform for GitHubActions<'_> {
    fn name(&self) -> &str {
        "GitHub Actions"
    }

    fn is_detected(&self) -> bool {
        self.vars.var("GITHUB_ACTIONS").is_some_and(|value| value == "true")
    }

    fn current_commit(&self) -> String {
        self.get("GITHUB_SHA")
    }

    fn current_tag(&self) -> String {
        if self.ref_type() == "tag" {
            self.get("GITHUB_REF_NAME")
        } else {
            String::new()
        }
    }

    fn current_branch(&self) -> String {
        // Pull request runs check out a merge ref; the head branch is more useful.
        if let Some(head) = self.vars.non_empty("GITHUB_HEAD_REF") {
            return head;
        }
        if self.ref_type() == "branch" {
            self.get("GITHUB_REF_NAME")
        } else {
            String::new()
        }
    }

    fn current_build_number(&self) -> String {
        self.get("GITHUB_RUN_NUMBER")
    }

    fn build_url(&self) -> String {
        format!(
            "{}/actions/runs/{}",
            self.repository_url(),
            self.get("GITHUB_RUN_ID")
        )
    }

    fn repository_url(&self) -> String {
        let server = self.vars.var_or("GITHUB_SERVER_URL", "https://github.com");
        format!("{}/{}", server, self.get("GITHUB_REPOSITORY"))
    }
}

/// A git checkout outside of any recognised CI system.
#[derive(Debug, Default)]
pub struct LocalGit {
    commit: Option<String>,
    branch: String,
    tag: String,
    remote: String,
}

impl LocalGit {
    /// Query the repository containing `directory`.
    pub fn open(runner: &dyn CommandRunner, directory: &Path) -> Self {
        let directory_arg = directory.display().to_string();
        let run_git = |args: &[&str]| -> Option<String> {
            let mut full = vec!["-C".to_string(), directory_arg.clone()];
            full.extend(args.iter().map(|arg| arg.to_string()));
            runner
                .capture("git", &full)
                .ok()
                .map(|output| output.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let commit = run_git(&["rev-parse", "HEAD"]);
        if commit.is_none() {
            debug!("{} is not inside a git repository", directory.display());
            return Self::default();
        }

        Self {
            commit,
            branch: run_git(&["rev-parse", "--abbrev-ref", "HEAD"])
                .filter(|branch| branch != "HEAD")
                .unwrap_or_default(),
            tag: run_git(&["describe", "--tags", "--exact-match", "HEAD"]).unwrap_or_default(),
            remote: run_git(&["config", "--get", "remote.origin.url"]).unwrap_or_default(),
        }
    }
}

impl Platform for LocalGit {
    fn name(&self) -> &str {
        "Git"
    }

    fn is_detected(&self) -> bool {
        self.commit.is_some()
    }

    fn current_commit(&self) -> String {
        self.commit.clone().unwrap_or_default()
    }

    fn current_tag(&self) -> String {
        self.tag.clone()
    }

    fn current_branch(&self) -> String {
        self.branch.clone()
    }

    fn current_build_number(&self) -> String {
        String::new()
    }

    fn build_url(&self) -> String {
        String::new()
    }

    fn repository_url(&self) -> String {
        self.remote.clone()
    }
}

/// Pick the first detected platform out of `candidates`.
pub fn select<'a>(candidates: Vec<Box<dyn Platform + 'a>>) -> Result<Box<dyn Platform + 'a>, Error> {
    for candidate in candidates {
        debug!(
            "CI platform {} detected: {}",
            candidate.name(),
            candidate.is_detected()
        );
        if candidate.is_detected() {
            return Ok(candidate);
        }
    }
    Err(Error::NotRecognized)
}

/// Detect the platform this process is running on, in precedence order.
pub fn detect<'a>(
    vars: &'a dyn VarSource,
    runner: &dyn CommandRunner,
    directory: &Path,
) -> Result<BuildInfo, Error> {
    let candidates: Vec<Box<dyn Platform + 'a>> = vec![
        Box::new(Bitbucket::new(vars)),
        Box::new(GitHubActions::new(vars)),
        Box::new(LocalGit::open(runner, directory)),
    ];
    select(candidates).map(|platform| BuildInfo::from_platform(platform.as_ref()))
}
