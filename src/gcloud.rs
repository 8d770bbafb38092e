use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use log::{debug, info};

use crate::command::{CommandRunner, Error};

/// Cloud provider operations the `auth` step needs.
pub trait CloudAdapter {
    fn activate_service_account(&self, key: &str) -> Result<String, Error>;

    fn get_cluster_credentials(&self, project: &str, cluster: &str, zone: &str)
        -> Result<String, Error>;
}

/// The `gcloud` command line tool.
pub struct Gcloud {
    runner: Rc<dyn CommandRunner>,
}

impl Gcloud {
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn gcloud(&self, args: &[&str]) -> Result<String, Error> {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        self.runner.capture("gcloud", &args)
    }

    /// Update installed SDK components and make sure `kubectl` is present.
    pub fn update_components(&self) -> Result<(), Error> {
        info!("Updating Google Cloud SDK components");
        self.gcloud(&["components", "update", "--quiet"])?;
        self.gcloud(&["components", "install", "kubectl", "--quiet"])?;
        Ok(())
    }
}

impl CloudAdapter for Gcloud {
    /// `key` is either a path to a key file or the JSON key itself. Inline
    /// keys are written to a temporary file that is removed again as soon
    /// as gcloud has read it.
    fn activate_service_account(&self, key: &str) -> Result<String, Error> {
        const COMMAND: &str = "gcloud auth activate-service-account";

        if Path::new(key).is_file() {
            debug!("Using service account key file {key}");
            return self.gcloud(&["auth", "activate-service-account", "--key-file", key]);
        }

        let prepare = |err| Error::Prepare {
            command: COMMAND.to_string(),
            err,
        };
        let mut file = tempfile::Builder::new()
            .prefix("gcpb-key-")
            .suffix(".json")
            .tempfile()
            .map_err(prepare)?;
        file.write_all(key.as_bytes()).map_err(prepare)?;
        file.flush().map_err(prepare)?;

        let path = file.path().display().to_string();
        self.gcloud(&["auth", "activate-service-account", "--key-file", &path])
    }

    fn get_cluster_credentials(
        &self,
        project: &str,
        cluster: &str,
        zone: &str,
    ) -> Result<String, Error> {
        self.gcloud(&[
            "container",
            "clusters",
            "get-credentials",
            cluster,
            "--project",
            project,
            "--zone",
            zone,
        ])
    }
}
