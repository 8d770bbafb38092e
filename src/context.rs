use std::collections::HashMap;
use std::path::Path;

use log::info;
use thiserror::Error;

use crate::config::{Configuration, Environment};
use crate::template::{self, Scope};
use crate::version::Version;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unrecognized environment '{0}'")]
    UnrecognizedEnvironment(String),

    #[error(transparent)]
    Template(#[from] template::Error),

    #[error("read template {path}: {err}")]
    ReadTemplate {
        path: String,
        err: std::io::Error,
    },

    #[error("write {path}: {err}")]
    Write {
        path: String,
        err: std::io::Error,
    },
}

/// Everything a release run renders against.
///
/// Project, environment and version are fixed at construction. The only
/// thing that changes during a run is the digest of each pushed image.
#[derive(Debug)]
pub struct ReleaseContext {
    config: Configuration,
    environment: usize,
    version: Version,
    /// Tag reference -> content digest.
    digests: HashMap<String, String>,
}

impl ReleaseContext {
    pub fn new(config: Configuration, environment: &str, version: Version) -> Result<Self, Error> {
        let environment = config
            .environments
            .iter()
            .position(|env| env.name == environment)
            .ok_or_else(|| Error::UnrecognizedEnvironment(environment.to_string()))?;

        Ok(Self {
            config,
            environment,
            version,
            digests: HashMap::new(),
        })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn environment(&self) -> &Environment {
        &self.config.environments[self.environment]
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Environment variables shadow project variables. Misses render as
    /// `VariableNotFound(<name>)` instead of failing.
    pub fn variable(&self, name: &str) -> String {
        self.environment()
            .kubernetes
            .variables
            .find(name)
            .or_else(|| self.config.variables.find(name))
            .map(str::to_string)
            .unwrap_or_else(|| format!("VariableNotFound({name})"))
    }

    /// `<registry>/<project>/<image>:<version>`
    pub fn container_path(&self, image: &str) -> String {
        self.container_version(image, self.version.as_str())
    }

    pub fn container_version(&self, image: &str, version: &str) -> String {
        format!("{}:{}", self.repository(image), version)
    }

    fn repository(&self, image: &str) -> String {
        format!(
            "{}/{}/{}",
            self.environment().cloud.registry,
            self.config.project.full_name(),
            image
        )
    }

    /// Canonical reference to deploy. Snapshot versions are pinned to the
    /// recorded digest once one is known.
    pub fn container_reference(&self, image: &str) -> String {
        if self.version.is_snapshot() {
            if let Some(digest) = self.digest(image) {
                return format!("{}@{}", self.repository(image), digest);
            }
        }
        self.container_path(image)
    }

    pub fn record_digest(&mut self, image: &str, digest: impl Into<String>) {
        let reference = self.container_path(image);
        self.digests.insert(reference, digest.into());
    }

    pub fn digest(&self, image: &str) -> Option<&str> {
        self.digests
            .get(&self.container_path(image))
            .map(String::as_str)
    }

    /// Name of the rendered manifest, `deployment-<project>-<environment>.yml`.
    pub fn deployment_file(&self) -> String {
        format!(
            "deployment-{}-{}.yml",
            self.config.project.full_name(),
            self.environment().name
        )
    }

    pub fn render(&self, source: &str) -> Result<String, template::Error> {
        template::expand(source, self)
    }

    /// Render the template at `input` into `output`, returning what was written.
    pub fn render_template(&self, input: &Path, output: &Path) -> Result<String, Error> {
        let source = std::fs::read_to_string(input).map_err(|err| Error::ReadTemplate {
            path: input.display().to_string(),
            err,
        })?;
        let rendered = self.render(&source)?;

        info!(
            "Generating '{}' from template '{}' for environment '{}'",
            output.display(),
            input.display(),
            self.environment().name
        );

        std::fs::write(output, &rendered).map_err(|err| Error::Write {
            path: output.display().to_string(),
            err,
        })?;
        Ok(rendered)
    }
}

impl Scope for ReleaseContext {
    fn field(&self, path: &str) -> Option<String> {
        let env = self.environment();
        let project = &self.config.project;

        let value = match path {
            "Version" | "ProjectVersion" | "BuildVersion" => self.version.to_string(),
            "Snapshot" => {
                if self.version.is_snapshot() {
                    "true".to_string()
                } else {
                    String::new()
                }
            }
            "Env" | "Environment" | "EnvironmentName" | "Environment.Name" => env.name.clone(),
            "Project.Name" | "ProjectName" => project.name.clone(),
            "Project.Domain" | "ProjectDomain" => project.domain.clone(),
            "Project.Context" | "ProjectContext" => project.context.clone(),
            "Project.VersionPrefix" => project.version_prefix.clone(),
            "Project.FullName" | "ProjectFullName" => project.full_name(),
            "Environment.Cloud.Registry" | "CloudRegistry" => env.cloud.registry.clone(),
            "Environment.Cloud.Project" | "CloudProject" => env.cloud.project.clone(),
            "Environment.Kubernetes.Cluster" | "KubernetesCluster" => {
                env.kubernetes.cluster.clone()
            }
            "Environment.Kubernetes.Zone" | "KubernetesZone" => env.kubernetes.zone.clone(),
            "Environment.Kubernetes.Template" => env.kubernetes.template.clone(),
            "DeploymentFile" => self.deployment_file(),
            _ => return None,
        };
        Some(value)
    }

    fn call(&self, name: &str, args: &[String]) -> Option<String> {
        match (name, args) {
            ("Variable", [variable]) => Some(self.variable(variable)),
            ("Container", [image]) => Some(self.container_reference(image)),
            ("ContainerPath", [image]) => Some(self.container_path(image)),
            ("ContainerVersion", [image, version]) => Some(self.container_version(image, version)),
            ("Digest", [image]) => Some(self.digest(image).unwrap_or_default().to_string()),
            _ => None,
        }
    }
}
