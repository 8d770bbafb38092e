use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use gcpb::command;
use gcpb::config::Configuration;
use gcpb::context::ReleaseContext;
use gcpb::deploy::ClusterAdapter;
use gcpb::docker::{self, ContainerEngine};
use gcpb::gcloud::CloudAdapter;
use gcpb::notify::{self, Notifier};
use gcpb::pipeline::{Collaborators, ManifestCleanup, Pipeline, PipelineOptions};
use gcpb::platform::BuildInfo;
use gcpb::step::Step;
use gcpb::validate::SchemaValidator;
use gcpb::version::Version;
use gcpb::{config, Error};

const PROJECT: &str = r#"
project:
  name: api
  domain: acme
  context: web
  versionPrefix: v
images:
  - name: api
    build: api
environments:
  - name: staging
    gcloud:
      registry: eu.gcr.io
      project: acme-staging
    kubernetes:
      cluster: main
      zone: europe-west1-b
"#;

const MANIFEST: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ .Project.Name }}
  labels:
    version: {{ .Version }}
{{- if .Snapshot }}
    track: snapshot
{{- end }}
spec:
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
          image: {{ .Container "api" }}
"#;

#[derive(Default)]
struct Calls {
    log: RefCell<Vec<String>>,
}

impl Calls {
    fn record(&self, call: String) {
        self.log.borrow_mut().push(call);
    }

    fn count(&self, prefix: &str) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn total(&self) -> usize {
        self.log.borrow().len()
    }
}

struct Cloud(Rc<Calls>);

impl CloudAdapter for Cloud {
    fn activate_service_account(&self, key: &str) -> Result<String, command::Error> {
        self.0.record(format!("activate {key}"));
        Ok(String::new())
    }

    fn get_cluster_credentials(&self, project: &str, cluster: &str, zone: &str) -> Result<String, command::Error> {
        self.0.record(format!("credentials {project} {cluster} {zone}"));
        Ok(String::new())
    }
}

struct Engine {
    calls: Rc<Calls>,
    broken: bool,
}

impl ContainerEngine for Engine {
    fn build(&self, dockerfile: &Path, tag: &str, _context: &Path) -> Result<String, docker::Error> {
        self.calls.record(format!("build {tag} {}", dockerfile.display()));
        if self.broken {
            return Err(docker::Error::Command(command::Error::Failed {
                command: "docker build".into(),
                code: command::ExitCode(Some(1)),
                output: "Step 2/4 : RUN make\nmake: *** [all] Error 2".into(),
            }));
        }
        Ok("Successfully built 1234".into())
    }

    fn push(&self, tag: &str) -> Result<String, docker::Error> {
        self.calls.record(format!("push {tag}"));
        Ok(String::new())
    }

    fn digest(&self, reference: &str) -> Result<String, docker::Error> {
        self.calls.record(format!("digest {reference}"));
        Ok("sha256:0f1e2d".into())
    }
}

struct Cluster(Rc<Calls>);

impl ClusterAdapter for Cluster {
    fn apply(&self, manifest: &Path) -> Result<String, command::Error> {
        let contents = fs::read_to_string(manifest).map_err(|err| command::Error::Spawn {
            command: "kubectl apply".into(),
            err,
        })?;
        self.0.record(format!("apply {contents}"));
        Ok("deployment.apps/api configured".into())
    }
}

/// Records every event and then refuses it.
struct Unreachable(Rc<Calls>);

impl Unreachable {
    fn refuse(&self, event: &str) -> notify::Result {
        self.0.record(format!("notify {event}"));
        Err(notify::Error::Rejected("channel_not_found".into()))
    }
}

impl Notifier for Unreachable {
    fn name(&self) -> &str {
        "unreachable"
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn on_release_started(&mut self, steps: &[Step]) -> notify::Result {
        self.refuse(&format!("started {}", gcpb::step::join(steps)))
    }

    fn on_release_completed(&mut self, _steps: &[Step], error: Option<&Error>) -> notify::Result {
        self.refuse(&format!("completed {}", error.is_none()))
    }

    fn on_image_building(&mut self, image: &config::Image) -> notify::Result {
        self.refuse(&format!("building {}", image.name))
    }

    fn on_image_built(&mut self, image: &config::Image, output: &str, _error: Option<&Error>) -> notify::Result {
        self.refuse(&format!("built {} {}", image.name, output.lines().last().unwrap_or_default()))
    }

    fn on_image_pushing(&mut self, image: &config::Image) -> notify::Result {
        self.refuse(&format!("pushing {}", image.name))
    }

    fn on_image_pushed(&mut self, image: &config::Image, _output: &str, _error: Option<&Error>) -> notify::Result {
        self.refuse(&format!("pushed {}", image.name))
    }

    fn on_configuration_validated(&mut self, error: Option<&Error>) -> notify::Result {
        self.refuse(&format!("validated {}", error.is_none()))
    }

    fn on_deploying(&mut self) -> notify::Result {
        self.refuse("deploying")
    }

    fn on_deployed(&mut self, _output: &str, error: Option<&Error>) -> notify::Result {
        self.refuse(&format!("deployed {}", error.is_none()))
    }
}

struct Release {
    workdir: tempfile::TempDir,
    calls: Rc<Calls>,
}

impl Release {
    fn new() -> Self {
        let workdir = tempfile::tempdir().unwrap();
        fs::create_dir_all(workdir.path().join("api")).unwrap();
        fs::write(
            workdir.path().join("api/Dockerfile"),
            "FROM alpine\nLABEL version={{ .Version }}\n",
        )
        .unwrap();
        fs::write(workdir.path().join("kubernetes.yml"), MANIFEST).unwrap();
        Self {
            workdir,
            calls: Rc::new(Calls::default()),
        }
    }

    fn pipeline(&self, version: &str, broken: bool) -> Pipeline {
        let vars = HashMap::from([(
            "SERVICE_KEY_STAGING".to_string(),
            "/run/secrets/staging.json".to_string(),
        )]);
        let mut config = Configuration::parse(PROJECT).unwrap();
        config.fill_from_vars(&vars).unwrap();

        let context = ReleaseContext::new(config, "staging", Version::new(version)).unwrap();
        let collaborators = Collaborators {
            cloud: Box::new(Cloud(self.calls.clone())),
            containers: Box::new(Engine {
                calls: self.calls.clone(),
                broken,
            }),
            cluster: Box::new(Cluster(self.calls.clone())),
            validator: Box::new(SchemaValidator),
            notifier: Box::new(Unreachable(self.calls.clone())),
        };
        let options = PipelineOptions {
            workdir: self.workdir.path().to_path_buf(),
            manifest_cleanup: ManifestCleanup::Strict,
        };
        Pipeline::new(context, BuildInfo::default(), collaborators, options)
    }

    fn files(&self) -> Vec<String> {
        let mut files: Vec<String> = fs::read_dir(self.workdir.path())
            .unwrap()
            .chain(fs::read_dir(self.workdir.path().join("api")).unwrap())
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        files
    }
}

#[test]
fn snapshot_release_end_to_end() {
    let release = Release::new();
    let mut pipeline = release.pipeline("staging-snapshot", false);

    assert_eq!(
        pipeline.context().deployment_file(),
        "deployment-acme-web-api-staging.yml"
    );
    pipeline.run(&["all"]).unwrap();

    let build = format!(
        "build eu.gcr.io/acme-web-api/api:staging-snapshot {}",
        release.workdir.path().join("api/Dockerfile-staging").display()
    );
    assert_eq!(
        *release.calls.log.borrow(),
        [
            "notify started info, auth, build, push, deploy-config, validate-config, deploy, wait-for-deploy",
            "activate /run/secrets/staging.json",
            "credentials acme-staging main europe-west1-b",
            "notify building api",
            build.as_str(),
            "notify built api Successfully built 1234",
            "notify pushing api",
            "push eu.gcr.io/acme-web-api/api:staging-snapshot",
            "notify pushed api",
            "digest eu.gcr.io/acme-web-api/api:staging-snapshot",
            "notify validated true",
            "notify deploying",
            "apply apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: api\n  labels:\n    version: staging-snapshot\n    track: snapshot\nspec:\n  selector:\n    matchLabels:\n      app: api\n  template:\n    metadata:\n      labels:\n        app: api\n    spec:\n      containers:\n        - name: api\n          image: eu.gcr.io/acme-web-api/api@sha256:0f1e2d\n",
            "notify deployed true",
            "notify completed true",
        ]
    );

    assert!(!release
        .workdir
        .path()
        .join("deployment-acme-web-api-staging.yml")
        .exists());
    assert_eq!(release.files(), ["Dockerfile", "api", "kubernetes.yml"]);
}

#[test]
fn tagged_release_deploys_by_tag() {
    let release = Release::new();
    let mut pipeline = release.pipeline("1.4.0", false);
    pipeline.run(&["deploy-config", "deploy"]).unwrap();

    assert_eq!(release.calls.count("digest"), 0);
    let applied = release.calls.log.borrow().iter().find(|call| call.starts_with("apply")).cloned().unwrap();
    assert!(applied.contains("image: eu.gcr.io/acme-web-api/api:1.4.0"), "{applied}");
    assert!(!applied.contains("track"), "{applied}");
}

#[test]
fn failed_build_stops_the_release() {
    let release = Release::new();
    let mut pipeline = release.pipeline("staging-snapshot", true);
    let err = pipeline.run(&["build", "push", "deploy"]).unwrap_err();

    assert!(matches!(err, Error::Docker(_)), "{err}");
    assert_eq!(err.output(), "Step 2/4 : RUN make\nmake: *** [all] Error 2");
    assert_eq!(release.calls.count("build"), 1);
    assert_eq!(release.calls.count("push"), 0);
    assert_eq!(release.calls.count("apply"), 0);
    assert_eq!(release.calls.count("notify built api make: *** [all] Error 2"), 1);
    assert_eq!(release.calls.count("notify completed false"), 1);
    assert_eq!(release.files(), ["Dockerfile", "api", "kubernetes.yml"]);
}

#[test]
fn unrecognized_steps_have_no_side_effects() {
    let release = Release::new();
    let mut pipeline = release.pipeline("staging-snapshot", false);
    let err = pipeline.run(&["build", "rollback", "deploy"]).unwrap_err();

    assert_eq!(err.to_string(), "unrecognized step 'rollback'");
    assert_eq!(release.calls.total(), 0);
    assert_eq!(release.files(), ["Dockerfile", "api", "kubernetes.yml"]);
}

#[test]
fn missing_environment_fields_fail_before_any_step() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.yml");
    fs::write(&path, PROJECT).unwrap();

    let vars: HashMap<String, String> = HashMap::new();
    let err = Configuration::from_file(&path, &vars).unwrap_err();
    assert!(
        matches!(err, config::Error::Missing { field: config::Field::ServiceKey, .. }),
        "{err}"
    );
    assert!(err.to_string().contains("SERVICE_KEY_STAGING"), "{err}");
}
