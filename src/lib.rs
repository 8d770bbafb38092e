//! Release orchestration for container workloads on Google Cloud: build and
//! push images, render a Kubernetes manifest from a template, apply it, and
//! report progress to a chat channel.

use thiserror::Error;

pub mod command;
pub mod config;
pub mod context;
pub mod deploy;
pub mod docker;
pub mod gcloud;
pub mod notify;
pub mod params;
pub mod pipeline;
pub mod platform;
pub mod slack;
pub mod step;
pub mod template;
pub mod validate;
pub mod vars;
pub mod version;

/// Any failure of a release run. Module errors pass through unchanged so
/// their messages reach the user as written.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),

    #[error(transparent)]
    Context(#[from] context::Error),

    #[error(transparent)]
    Version(#[from] version::Error),

    #[error(transparent)]
    Platform(#[from] platform::Error),

    #[error(transparent)]
    Step(#[from] step::Error),

    #[error(transparent)]
    Template(#[from] template::Error),

    #[error(transparent)]
    Command(#[from] command::Error),

    #[error(transparent)]
    Docker(#[from] docker::Error),

    #[error(transparent)]
    Validate(#[from] validate::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("remove {path}: {err}")]
    Cleanup { path: String, err: std::io::Error },

    #[error("read {path}: {err}")]
    Io { path: String, err: std::io::Error },
}

impl Error {
    /// Captured output of the external command behind this error, if any.
    pub fn output(&self) -> &str {
        match self {
            Error::Command(err) => err.output(),
            Error::Docker(err) => err.output(),
            _ => "",
        }
    }
}
