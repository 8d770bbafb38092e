use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use thiserror::Error;

use crate::vars::VarSource;

/// Manifest template used when an environment declares none.
pub const DEFAULT_MANIFEST_TEMPLATE: &str = "kubernetes.yml";

#[derive(Error, Debug)]
pub enum Error {
    #[error("read configuration file {path}: {err}")]
    Read {
        path: String,
        err: std::io::Error,
    },

    #[error("parse configuration file {path}: {err}")]
    Yaml {
        path: String,
        err: serde_yaml::Error,
    },

    #[error("parse configuration file {path}: {err}")]
    Toml {
        path: String,
        err: toml::de::Error,
    },

    #[error("missing configuration {field} for environment '{environment}': set it in the project file or export {variable}")]
    Missing {
        field: Field,
        environment: String,
        variable: String,
    },
}

/// A project.yml file.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Configuration {
    pub project: Project,
    #[serde(default)]
    pub environments: Vec<Environment>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub variables: Variables,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub context: String,
    /// Tags starting with this prefix are releases.
    #[serde(default)]
    pub version_prefix: String,
}

impl Project {
    /// `<domain>-<context>-<name>`, used for registry paths and file names.
    pub fn full_name(&self) -> String {
        format!("{}-{}-{}", self.domain, self.context, self.name)
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Environment {
    pub name: String,
    /// Service account key, either a path to a key file or the key itself.
    #[serde(default, rename = "key")]
    pub service_key: String,
    #[serde(default)]
    pub kubernetes: Kubernetes,
    #[serde(default, rename = "gcloud")]
    pub cloud: GoogleCloud,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GoogleCloud {
    #[serde(default)]
    pub registry: String,
    #[serde(default)]
    pub project: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Kubernetes {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub zone: String,
    /// Path to the manifest template.
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub variables: Variables,
}

/// A container image built from this project.
#[serde_inline_default]
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Image {
    pub name: String,
    /// Docker build context.
    #[serde_inline_default(".".to_string())]
    pub build: String,
    pub dockerfile: Option<String>,
}

impl Image {
    /// Dockerfile template for this image, `<build>/Dockerfile` unless set explicitly.
    pub fn dockerfile_path(&self) -> PathBuf {
        match &self.dockerfile {
            Some(dockerfile) if !dockerfile.is_empty() => PathBuf::from(dockerfile),
            _ => Path::new(&self.build).join("Dockerfile"),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Variables(pub Vec<Variable>);

impl Variables {
    pub fn find(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|variable| variable.name == name)
            .map(|variable| variable.value.as_str())
    }
}

/// Environment fields that can be supplied through environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Zone,
    Cluster,
    ManifestTemplate,
    CloudProject,
    Registry,
    ServiceKey,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Zone,
        Field::Cluster,
        Field::ManifestTemplate,
        Field::CloudProject,
        Field::Registry,
        Field::ServiceKey,
    ];

    fn variable_prefix(self) -> &'static str {
        match self {
            Field::Zone => "KUBERNETES_ZONE",
            Field::Cluster => "KUBERNETES_CLUSTER",
            Field::ManifestTemplate => "KUBERNETES_TEMPLATE",
            Field::CloudProject => "GCLOUD_PROJECT",
            Field::Registry => "GCLOUD_REGISTRY",
            Field::ServiceKey => "SERVICE_KEY",
        }
    }

    fn default_value(self) -> Option<&'static str> {
        match self {
            Field::ManifestTemplate => Some(DEFAULT_MANIFEST_TEMPLATE),
            _ => None,
        }
    }

    fn slot(self, env: &mut Environment) -> &mut String {
        match self {
            Field::Zone => &mut env.kubernetes.zone,
            Field::Cluster => &mut env.kubernetes.cluster,
            Field::ManifestTemplate => &mut env.kubernetes.template,
            Field::CloudProject => &mut env.cloud.project,
            Field::Registry => &mut env.cloud.registry,
            Field::ServiceKey => &mut env.service_key,
        }
    }

    /// Name of the variable consulted for `environment`, e.g. `KUBERNETES_ZONE_PROD`.
    pub fn variable(self, environment: &str) -> String {
        format!("{}_{}", self.variable_prefix(), environment.to_uppercase())
    }

    /// Variables consulted for `environment`, in order: [`Field::variable`],
    /// then a shell-safe spelling with non-alphanumerics replaced by `_`.
    pub fn variables(self, environment: &str) -> Vec<String> {
        let plain = self.variable(environment);
        let shell_safe: String = plain
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        if shell_safe == plain {
            vec![plain]
        } else {
            vec![plain, shell_safe]
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Field::Zone => "zone",
            Field::Cluster => "cluster",
            Field::ManifestTemplate => "manifest-template",
            Field::CloudProject => "cloud-project",
            Field::Registry => "registry",
            Field::ServiceKey => "service-key",
        })
    }
}

impl Configuration {
    /// Read a project file and fill in blank environment fields from `vars`.
    ///
    /// Files ending in `.toml` are parsed as TOML, everything else as YAML.
    pub fn from_file(path: &Path, vars: &dyn VarSource) -> Result<Self, Error> {
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|err| Error::Read {
            path: display.clone(),
            err,
        })?;

        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let mut config = if is_toml {
            toml::from_str::<Configuration>(&contents).map_err(|err| Error::Toml {
                path: display,
                err,
            })?
        } else {
            Self::parse(&contents).map_err(|err| Error::Yaml { path: display, err })?
        };

        config.fill_from_vars(vars)?;
        Ok(config)
    }

    pub fn parse(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Substitute every blank [`Field`] of every environment.
    pub fn fill_from_vars(&mut self, vars: &dyn VarSource) -> Result<(), Error> {
        for env in self.environments.iter_mut() {
            for field in Field::ALL {
                if !field.slot(env).is_empty() {
                    continue;
                }
                let found = field
                    .variables(&env.name)
                    .into_iter()
                    .find_map(|variable| vars.var(&variable).map(|value| (variable, value)));
                let value = match (found, field.default_value()) {
                    (Some((variable, value)), _) => {
                        debug!("{} for environment {} read from {}", field, env.name, variable);
                        value
                    }
                    (None, Some(default)) => default.to_string(),
                    (None, None) => {
                        return Err(Error::Missing {
                            field,
                            environment: env.name.clone(),
                            variable: field.variable(&env.name),
                        })
                    }
                };
                *field.slot(env) = value;
            }
        }
        Ok(())
    }

    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|env| env.name == name)
    }
}
