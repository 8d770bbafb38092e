use std::path::Path;
use std::rc::Rc;

use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::command::{self, CommandRunner};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Command(#[from] command::Error),

    #[error("inspect {reference}: {reason}")]
    Inspect { reference: String, reason: String },
}

impl Error {
    pub fn output(&self) -> &str {
        match self {
            Error::Command(err) => err.output(),
            Error::Inspect { .. } => "",
        }
    }
}

/// Container engine operations used by the `build`, `push` and
/// `deploy-config` steps.
pub trait ContainerEngine {
    fn build(&self, dockerfile: &Path, tag: &str, context: &Path) -> Result<String, Error>;

    fn push(&self, tag: &str) -> Result<String, Error>;

    /// Registry content digest (`sha256:...`) of a pushed image.
    fn digest(&self, reference: &str) -> Result<String, Error>;
}

/// The `docker` command line client.
pub struct Docker {
    runner: Rc<dyn CommandRunner>,
    host: Option<String>,
}

impl Docker {
    /// `host` is passed as `-H` when set, e.g. from `DOCKER_HOST`.
    pub fn new(runner: Rc<dyn CommandRunner>, host: Option<String>) -> Self {
        Self { runner, host }
    }

    fn docker(&self, args: &[&str]) -> Result<String, command::Error> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(host) = &self.host {
            full.push("-H".to_string());
            full.push(host.clone());
        }
        full.extend(args.iter().map(|arg| arg.to_string()));
        self.runner.capture("docker", &full)
    }
}

impl ContainerEngine for Docker {
    fn build(&self, dockerfile: &Path, tag: &str, context: &Path) -> Result<String, Error> {
        debug!("Building image {} from {}", tag, dockerfile.display());
        let dockerfile = dockerfile.display().to_string();
        let context = context.display().to_string();
        Ok(self.docker(&["build", "--file", &dockerfile, "--tag", tag, &context])?)
    }

    fn push(&self, tag: &str) -> Result<String, Error> {
        debug!("Pushing image {}", tag);
        Ok(self.docker(&["push", tag])?)
    }

    fn digest(&self, reference: &str) -> Result<String, Error> {
        let output = self.docker(&["inspect", reference])?;
        repo_digest(&output, reference)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Inspect {
    #[serde(default)]
    repo_digests: Vec<String>,
}

/// Strip the tag from `registry/name:tag`; ports in the registry host are kept.
fn repository(reference: &str) -> &str {
    match reference.rfind(':') {
        Some(colon) if !reference[colon..].contains('/') => &reference[..colon],
        _ => reference,
    }
}

/// Pick the digest of `reference`'s repository out of `docker inspect` output.
fn repo_digest(inspect_output: &str, reference: &str) -> Result<String, Error> {
    let fail = |reason: &str| Error::Inspect {
        reference: reference.to_string(),
        reason: reason.to_string(),
    };

    let images: Vec<Inspect> = serde_json::from_str(inspect_output)
        .map_err(|err| fail(&format!("unreadable inspect output: {err}")))?;
    let image = images.first().ok_or_else(|| fail("image not found"))?;

    let repository = repository(reference);
    let prefix = format!("{repository}@");
    let digest = image
        .repo_digests
        .iter()
        .find_map(|entry| entry.strip_prefix(&prefix))
        .ok_or_else(|| fail(&format!("image was not pushed to {repository}")))?;

    Ok(digest.to_string())
}
