//! Structural checks for rendered Kubernetes manifests.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

const WORKLOAD_KINDS: [&str; 6] = ["Deployment", "StatefulSet", "DaemonSet", "Job", "CronJob", "Pod"];
const UNRESOLVED_VARIABLE: &str = "VariableNotFound(";

#[derive(Error, Debug)]
pub enum Error {
    #[error("{file} is not valid YAML: {err}")]
    Yaml {
        file: String,
        err: serde_yaml::Error,
    },

    #[error("{file} failed validation:\n  {}", .problems.join("\n  "))]
    Invalid { file: String, problems: Vec<String> },
}

pub trait ManifestValidator {
    fn validate(&self, contents: &str, file: &str) -> Result<(), Error>;
}

/// Checks every document for the fields the API server always requires,
/// containers on workloads, and variables that failed to resolve. Resources
/// of well-known kinds are also checked against their API schema.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaValidator;

impl ManifestValidator for SchemaValidator {
    fn validate(&self, contents: &str, file: &str) -> Result<(), Error> {
        let mut problems = Vec::new();

        for (line, text) in contents.lines().enumerate() {
            if text.contains(UNRESOLVED_VARIABLE) {
                problems.push(format!("line {}: unresolved variable: {}", line + 1, text.trim()));
            }
        }

        // Placeholders already explain any type errors they cause.
        let schema = problems.is_empty();

        let mut index = 0;
        for document in serde_yaml::Deserializer::from_str(contents) {
            let value = Value::deserialize(document).map_err(|err| Error::Yaml {
                file: file.to_string(),
                err,
            })?;
            if value.is_null() {
                continue;
            }
            index += 1;
            check_resource(&value, &format!("document {index}"), schema, &mut problems);
        }

        if index == 0 {
            problems.push("no resources found".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Invalid {
                file: file.to_string(),
                problems,
            })
        }
    }
}

fn string_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |current, key| current.get(*key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn check_resource(value: &Value, location: &str, schema: bool, problems: &mut Vec<String>) {
    if !value.is_mapping() {
        problems.push(format!("{location}: expected a mapping"));
        return;
    }
    let before = problems.len();

    for (path, name) in [
        (&["apiVersion"][..], "apiVersion"),
        (&["kind"][..], "kind"),
        (&["metadata", "name"][..], "metadata.name"),
    ] {
        if string_at(value, path).is_none() {
            problems.push(format!("{location}: missing {name}"));
        }
    }

    let kind = string_at(value, &["kind"]).unwrap_or_default();
    let location = match string_at(value, &["metadata", "name"]) {
        Some(name) => format!("{location} ({kind} {name})"),
        None => location.to_string(),
    };

    if kind == "List" {
        if let Some(items) = value.get("items").and_then(Value::as_sequence) {
            for (i, item) in items.iter().enumerate() {
                check_resource(item, &format!("{location} item {}", i + 1), schema, problems);
            }
        }
        return;
    }

    if WORKLOAD_KINDS.contains(&kind) {
        check_containers(value, kind, &location, problems);
    }

    // Schema errors only add noise on top of the problems above.
    if schema && problems.len() == before {
        if let Err(err) = check_schema(value, kind) {
            problems.push(format!("{location}: {err}"));
        }
    }
}

fn check_containers(value: &Value, kind: &str, location: &str, problems: &mut Vec<String>) {
    let pod_spec = match kind {
        "Pod" => value.get("spec"),
        "CronJob" => ["spec", "jobTemplate", "spec", "template", "spec"]
            .iter()
            .try_fold(value, |current, key| current.get(*key)),
        _ => ["spec", "template", "spec"]
            .iter()
            .try_fold(value, |current, key| current.get(*key)),
    };

    let containers = pod_spec
        .and_then(|spec| spec.get("containers"))
        .and_then(Value::as_sequence);
    match containers {
        Some(containers) if !containers.is_empty() => {
            for (i, container) in containers.iter().enumerate() {
                for field in ["name", "image"] {
                    if string_at(container, &[field]).is_none() {
                        problems.push(format!("{location}: container {} is missing {field}", i + 1));
                    }
                }
            }
        }
        _ => problems.push(format!("{location}: no containers declared")),
    }
}

/// Deserialize resources of well-known kinds into their API types, which
/// rejects wrongly typed and missing required fields. Other kinds pass.
fn check_schema(value: &Value, kind: &str) -> Result<(), serde_yaml::Error> {
    use k8s_openapi::api::apps::v1 as apps;
    use k8s_openapi::api::batch::v1 as batch;
    use k8s_openapi::api::core::v1 as core;
    use k8s_openapi::api::networking::v1 as networking;

    match kind {
        "Deployment" => conforms::<apps::Deployment>(value),
        "StatefulSet" => conforms::<apps::StatefulSet>(value),
        "DaemonSet" => conforms::<apps::DaemonSet>(value),
        "Job" => conforms::<batch::Job>(value),
        "CronJob" => conforms::<batch::CronJob>(value),
        "Pod" => conforms::<core::Pod>(value),
        "Service" => conforms::<core::Service>(value),
        "ConfigMap" => conforms::<core::ConfigMap>(value),
        "Secret" => conforms::<core::Secret>(value),
        "ServiceAccount" => conforms::<core::ServiceAccount>(value),
        "Ingress" => conforms::<networking::Ingress>(value),
        _ => Ok(()),
    }
}

fn conforms<T: DeserializeOwned>(value: &Value) -> Result<(), serde_yaml::Error> {
    serde_yaml::from_value::<T>(value.clone()).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: api
spec:
  replicas: 2
  selector:
    matchLabels:
      app: api
  template:
    metadata:
      labels:
        app: api
    spec:
      containers:
        - name: api
          image: eu.gcr.io/acme-web-api/api@sha256:abcd
---
apiVersion: v1
kind: Service
metadata:
  name: api
spec:
  ports:
    - port: 80
"#;

    fn problems(contents: &str) -> Vec<String> {
        match SchemaValidator.validate(contents, "deployment.yml") {
            Err(Error::Invalid { problems, .. }) => problems,
            other => panic!("expected validation problems, got {other:?}"),
        }
    }

    #[test]
    fn accepts_well_formed_manifests() {
        SchemaValidator.validate(VALID, "deployment.yml").unwrap();
    }

    #[test]
    fn reports_missing_identity_fields() {
        let found = problems("kind: ConfigMap\nmetadata: {}\n");
        assert_eq!(
            found,
            vec!["document 1: missing apiVersion", "document 1: missing metadata.name"]
        );
    }

    #[test]
    fn workloads_need_containers() {
        let found = problems(
            "apiVersion: batch/v1\nkind: CronJob\nmetadata: {name: nightly}\nspec:\n  jobTemplate:\n    spec:\n      template:\n        spec:\n          containers:\n            - name: job\n",
        );
        assert_eq!(found, vec!["document 1 (CronJob nightly): container 1 is missing image"]);

        let found = problems("apiVersion: apps/v1\nkind: Deployment\nmetadata: {name: api}\nspec: {}\n");
        assert_eq!(found, vec!["document 1 (Deployment api): no containers declared"]);
    }

    #[test]
    fn known_kinds_are_checked_against_their_schema() {
        let manifest = VALID.replace("replicas: 2", "replicas: two");
        let found = problems(&manifest);
        assert_eq!(found.len(), 1, "{found:?}");
        assert!(found[0].starts_with("document 1 (Deployment api): "), "{found:?}");
        assert!(found[0].contains("invalid type"), "{found:?}");

        let manifest = VALID.replace("  selector:", "  selectr:");
        let found = problems(&manifest);
        assert_eq!(found.len(), 1, "{found:?}");
        assert!(found[0].contains("missing field `selector`"), "{found:?}");
    }

    #[test]
    fn unknown_kinds_only_need_identity() {
        SchemaValidator
            .validate(
                "apiVersion: acme.io/v1\nkind: Widget\nmetadata:\n  name: w\nspec:\n  size: large\n",
                "deployment.yml",
            )
            .unwrap();
    }

    #[test]
    fn flags_unresolved_variables() {
        let manifest = VALID.replace("replicas: 2", "replicas: VariableNotFound(replicas)");
        let found = problems(&manifest);
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("unresolved variable"));
    }

    #[test]
    fn empty_and_broken_documents() {
        assert_eq!(problems("---\n"), vec!["no resources found"]);
        let err = SchemaValidator
            .validate("kind: [", "deployment.yml")
            .unwrap_err();
        assert!(matches!(err, Error::Yaml { .. }));
    }
}
