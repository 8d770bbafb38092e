//! The step pipeline: runs the requested steps of one release, in order,
//! stopping at the first failure.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::Image;
use crate::context::ReleaseContext;
use crate::deploy::ClusterAdapter;
use crate::docker::ContainerEngine;
use crate::gcloud::CloudAdapter;
use crate::notify::{self, Notifier};
use crate::platform::BuildInfo;
use crate::step::{self, Step};
use crate::validate::ManifestValidator;
use crate::Error;

/// What to do when the rendered manifest cannot be removed after a
/// successful apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ManifestCleanup {
    /// Fail the run.
    #[default]
    Strict,
    /// Log a warning and carry on.
    Warn,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Relative Dockerfile, build context and manifest paths are resolved
    /// against this directory, and the rendered manifest is written here.
    pub workdir: PathBuf,
    pub manifest_cleanup: ManifestCleanup,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            manifest_cleanup: ManifestCleanup::default(),
        }
    }
}

/// External systems the steps talk to.
pub struct Collaborators {
    pub cloud: Box<dyn CloudAdapter>,
    pub containers: Box<dyn ContainerEngine>,
    pub cluster: Box<dyn ClusterAdapter>,
    pub validator: Box<dyn ManifestValidator>,
    pub notifier: Box<dyn Notifier>,
}

pub struct Pipeline {
    context: ReleaseContext,
    build: BuildInfo,
    cloud: Box<dyn CloudAdapter>,
    containers: Box<dyn ContainerEngine>,
    cluster: Box<dyn ClusterAdapter>,
    validator: Box<dyn ManifestValidator>,
    notifier: Box<dyn Notifier>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        context: ReleaseContext,
        build: BuildInfo,
        collaborators: Collaborators,
        options: PipelineOptions,
    ) -> Self {
        Self {
            context,
            build,
            cloud: collaborators.cloud,
            containers: collaborators.containers,
            cluster: collaborators.cluster,
            validator: collaborators.validator,
            notifier: collaborators.notifier,
            options,
        }
    }

    pub fn context(&self) -> &ReleaseContext {
        &self.context
    }

    /// Where `deploy-config` writes the manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.options.workdir.join(self.context.deployment_file())
    }

    /// Run `requested` steps. The list is validated before anything runs;
    /// the first failing step's error is returned as is.
    pub fn run<S: AsRef<str>>(&mut self, requested: &[S]) -> Result<(), Error> {
        let steps = step::parse(requested)?;
        info!("Running steps: {}", step::join(&steps));

        self.notify(|notifier| notifier.on_release_started(&steps));
        let result = steps.iter().try_for_each(|step| self.execute(*step));
        self.notify(|notifier| notifier.on_release_completed(&steps, result.as_ref().err()));

        result
    }

    fn execute(&mut self, step: Step) -> Result<(), Error> {
        debug!("Executing step {step}");
        match step {
            Step::Info => {
                self.info();
                Ok(())
            }
            Step::Auth => self.auth(),
            Step::Build => self.build(),
            Step::Push => self.push(),
            Step::DeployConfig => self.deploy_config(),
            Step::ValidateConfig => self.validate_config(),
            Step::Deploy => self.deploy(),
            Step::WaitForDeploy => {
                debug!("Nothing to wait for");
                Ok(())
            }
        }
    }

    fn notify(&mut self, event: impl FnOnce(&mut dyn Notifier) -> notify::Result) {
        if let Err(err) = event(self.notifier.as_mut()) {
            warn!("Could not send {} notification: {err}", self.notifier.name());
        }
    }

    fn info(&self) {
        let env = self.context.environment();
        let project = &self.context.config().project;

        info!("Platform: {}", self.build.platform);
        info!("Repository: {}", self.build.repository_url);
        info!("Build url: {}", self.build.build_url);
        info!("Commit: {}", self.build.commit);
        info!("Branch: {}", self.build.branch);
        info!("Tag: {}", self.build.tag);
        info!("Build number: {}", self.build.build_number);
        info!("Project: {}", project.full_name());
        info!("Version: {}", self.context.version());
        info!("Environment: {}", env.name);
        info!("Cloud project: {}", env.cloud.project);
        info!("Registry: {}", env.cloud.registry);
        info!("Cluster: {} ({})", env.kubernetes.cluster, env.kubernetes.zone);
        info!("Manifest template: {}", env.kubernetes.template);
        for image in &self.context.config().images {
            info!("Image {}: {}", image.name, self.context.container_path(&image.name));
        }
    }

    fn auth(&self) -> Result<(), Error> {
        let env = self.context.environment();

        info!("Activating service account for environment {}", env.name);
        let output = self.cloud.activate_service_account(&env.service_key)?;
        print_output(&output);

        info!(
            "Fetching credentials for cluster {} in {}",
            env.kubernetes.cluster, env.kubernetes.zone
        );
        let output = self.cloud.get_cluster_credentials(
            &env.cloud.project,
            &env.kubernetes.cluster,
            &env.kubernetes.zone,
        )?;
        print_output(&output);
        Ok(())
    }

    fn build(&mut self) -> Result<(), Error> {
        let images = self.context.config().images.clone();
        for image in &images {
            self.notify(|notifier| notifier.on_image_building(image));
            let result = self.build_image(image);
            let output = output_of(&result);
            print_output(&output);
            self.notify(|notifier| notifier.on_image_built(image, &output, result.as_ref().err()));
            result?;
        }
        Ok(())
    }

    fn build_image(&self, image: &Image) -> Result<String, Error> {
        let tag = self.context.container_path(&image.name);
        info!("Building image {tag}");

        let template = self.options.workdir.join(image.dockerfile_path());
        let dockerfile = RenderedFile::new(PathBuf::from(format!(
            "{}-{}",
            template.display(),
            self.context.environment().name
        )));
        self.context.render_template(&template, dockerfile.path())?;

        let build_context = self.options.workdir.join(&image.build);
        let output = self
            .containers
            .build(dockerfile.path(), &tag, &build_context)?;

        dockerfile.remove()?;
        Ok(output)
    }

    fn push(&mut self) -> Result<(), Error> {
        let images = self.context.config().images.clone();
        for image in &images {
            self.notify(|notifier| notifier.on_image_pushing(image));

            let tag = self.context.container_path(&image.name);
            info!("Pushing image {tag}");
            let result = self.containers.push(&tag).map_err(Error::from);
            let output = output_of(&result);
            print_output(&output);

            self.notify(|notifier| notifier.on_image_pushed(image, &output, result.as_ref().err()));
            result?;
        }
        Ok(())
    }

    fn deploy_config(&mut self) -> Result<(), Error> {
        if self.context.version().is_snapshot() {
            let names: Vec<String> = self
                .context
                .config()
                .images
                .iter()
                .map(|image| image.name.clone())
                .collect();
            for name in names {
                let reference = self.context.container_path(&name);
                let digest = self.containers.digest(&reference)?;
                info!("Image {reference} has digest {digest}");
                self.context.record_digest(&name, digest);
            }
        }

        let template = self
            .options
            .workdir
            .join(&self.context.environment().kubernetes.template);
        let manifest = self.manifest_path();
        let rendered = self.context.render_template(&template, &manifest)?;
        info!(
            "Rendered {} (sha256 {})",
            manifest.display(),
            sha256::digest(rendered.as_str())
        );
        Ok(())
    }

    fn validate_config(&mut self) -> Result<(), Error> {
        let manifest = self.manifest_path();
        let contents = fs::read_to_string(&manifest).map_err(|err| Error::Io {
            path: manifest.display().to_string(),
            err,
        })?;

        let result = self
            .validator
            .validate(&contents, &self.context.deployment_file())
            .map_err(Error::from);
        self.notify(|notifier| notifier.on_configuration_validated(result.as_ref().err()));
        result?;

        info!("{} is valid", manifest.display());
        Ok(())
    }

    fn deploy(&mut self) -> Result<(), Error> {
        self.notify(|notifier| notifier.on_deploying());

        let manifest = self.manifest_path();
        info!(
            "Applying {} to cluster {}",
            manifest.display(),
            self.context.environment().kubernetes.cluster
        );
        let result = self.cluster.apply(&manifest).map_err(Error::from);
        let output = output_of(&result);
        print_output(&output);

        self.notify(|notifier| notifier.on_deployed(&output, result.as_ref().err()));
        result?;

        if let Err(err) = fs::remove_file(&manifest) {
            match self.options.manifest_cleanup {
                ManifestCleanup::Strict => {
                    return Err(Error::Cleanup {
                        path: manifest.display().to_string(),
                        err,
                    })
                }
                ManifestCleanup::Warn => {
                    warn!("Could not remove {}: {err}", manifest.display())
                }
            }
        }
        Ok(())
    }
}

fn output_of(result: &Result<String, Error>) -> String {
    match result {
        Ok(output) => output.clone(),
        Err(err) => err.output().to_string(),
    }
}

fn print_output(output: &str) {
    let output = output.trim_end();
    if !output.is_empty() {
        info!("{output}");
    }
}

/// A rendered file that is removed when it goes out of scope. Call
/// [`RenderedFile::remove`] to observe removal failures.
struct RenderedFile {
    path: PathBuf,
    armed: bool,
}

impl RenderedFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn remove(mut self) -> Result<(), Error> {
        self.armed = false;
        fs::remove_file(&self.path).map_err(|err| Error::Cleanup {
            path: self.path.display().to_string(),
            err,
        })
    }
}

impl Drop for RenderedFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed {}", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("Could not remove {}: {err}", self.path.display()),
        }
    }
}
