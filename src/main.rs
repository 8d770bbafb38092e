//! Google Cloud Platform build and release tool.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use clap::Parser;
use log::{error, info};

use gcpb::command::{CommandRunner, SystemRunner};
use gcpb::config::Configuration;
use gcpb::context::ReleaseContext;
use gcpb::deploy::Kubectl;
use gcpb::docker::Docker;
use gcpb::gcloud::Gcloud;
use gcpb::notify::{self, Notifier};
use gcpb::params::Params;
use gcpb::pipeline::{Collaborators, ManifestCleanup, Pipeline, PipelineOptions};
use gcpb::slack::SlackNotifier;
use gcpb::validate::SchemaValidator;
use gcpb::vars::{ProcessEnv, VarSource};
use gcpb::{platform, version, Error};

/// Build, push and deploy container images to Google Kubernetes Engine.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Steps to run: info, auth, build, push, deploy-config, validate-config,
    /// deploy, wait-for-deploy, or `all`.
    #[arg(default_value = "all")]
    steps: Vec<String>,

    /// Environment to release to.
    #[arg(long, default_value = "test")]
    env: String,

    /// Path to the project configuration file.
    #[arg(long, default_value = "project.yml")]
    config: PathBuf,

    /// Update Google Cloud SDK components and install kubectl before running.
    #[arg(long)]
    update: bool,

    /// Directory that templates are read from and rendered files written to.
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// What to do when the rendered manifest cannot be removed after deploy.
    #[arg(long, value_enum, default_value_t = ManifestCleanup::Strict)]
    manifest_cleanup: ManifestCleanup,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            error!("Command failed due to: {err}");
            std::process::exit(1)
        }
    }
}

fn run() -> Result<(), Error> {
    let args = Cli::parse();
    let vars = ProcessEnv;

    let runner: Rc<dyn CommandRunner> = Rc::new(SystemRunner::new());

    let config = Configuration::from_file(&args.config, &vars)?;
    let build = platform::detect(&vars, runner.as_ref(), &args.workdir)?;
    let version = version::resolve(&config.project, &build)?;
    info!(
        "Releasing {} version {} to {}",
        config.project.full_name(),
        version,
        args.env
    );

    let context = ReleaseContext::new(config, &args.env, version)?;
    let params = Params::from_context(&context, &build);

    let gcloud = Gcloud::new(runner.clone());
    if args.update {
        gcloud.update_components()?;
    }

    let collaborators = Collaborators {
        cloud: Box::new(gcloud),
        containers: Box::new(Docker::new(runner.clone(), vars.non_empty("DOCKER_HOST"))),
        cluster: Box::new(Kubectl::new(runner)),
        validator: Box::new(SchemaValidator),
        notifier: notifier(&vars, params),
    };

    let options = PipelineOptions {
        workdir: args.workdir.clone(),
        manifest_cleanup: args.manifest_cleanup,
    };
    info!("Working directory: {}", display(&options.workdir));

    Pipeline::new(context, build, collaborators, options).run(args.steps.as_slice())
}

fn notifier(vars: &dyn VarSource, params: Params) -> Box<dyn Notifier> {
    let slack = SlackNotifier::from_env(vars, params)
        .transpose()
        .map(|slack| slack.map(|slack| Box::new(slack) as Box<dyn Notifier>));
    notify::select_available(slack.into_iter().collect())
}

fn display(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
