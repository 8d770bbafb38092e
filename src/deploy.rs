use std::path::Path;
use std::rc::Rc;

use crate::command::{CommandRunner, Error};

/// Applies rendered manifests to the cluster selected by `auth`.
pub trait ClusterAdapter {
    fn apply(&self, manifest: &Path) -> Result<String, Error>;
}

/// The `kubectl` command line client.
pub struct Kubectl {
    runner: Rc<dyn CommandRunner>,
}

impl Kubectl {
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl ClusterAdapter for Kubectl {
    fn apply(&self, manifest: &Path) -> Result<String, Error> {
        self.runner.capture(
            "kubectl",
            &[
                "apply".to_string(),
                "-f".to_string(),
                manifest.display().to_string(),
            ],
        )
    }
}
