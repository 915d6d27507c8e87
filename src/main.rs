//! Uyuni proxy deployment
use std::path::PathBuf;
use clap::Parser;
use thiserror::Error;
use log::{debug, error, info};
use crate::cli::{
    Cli, Commands, InstallBackend, LogsBackend, PtfBackend, ServiceBackend, UninstallBackend, UpgradeBackend,
};
use crate::deploy::Deployer;
use crate::kubernetes::Kubectl;
use crate::logs::LogFlags;
use crate::oci::HttpRegistry;
use crate::podman::{Podman, PodmanEngine};
use crate::ptf::PatchFlags;
use crate::registry::{AuthFileLogin, PodmanRegistry};
use crate::systemd::Systemctl;

mod cli;
mod command;
mod config;
mod deploy;
mod image;
mod kubernetes;
mod logs;
mod oci;
mod podman;
mod proxy_config;
mod ptf;
mod registry;
mod systemd;
mod unit;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration file: {0}")]
    ConfigParse(#[from] config::file::Error),

    #[error("configuration: {0}")]
    Config(#[from] config::runtime::Error),

    #[error("missing requirement: {0}")]
    Precondition(#[from] command::Error),

    #[error("registry: {0}")]
    Registry(#[from] registry::Error),

    #[error("podman: {0}")]
    Podman(#[from] podman::Error),

    #[error("kubernetes: {0}")]
    Kubernetes(#[from] deploy::Error),
}

/// Read configuration file from disk and merge it with the
/// `default.toml` [built-in config](../default.toml).
///
/// If a configuration file name is not set explicitly, this function will
/// detect whether a config file with the default file name exists in the
/// working directory. If it does, it is used implicitly.
fn read_config(args: &Cli) -> Result<config::file::File, Error> {
    const DEFAULT_CONFIG_FILE: &str = "pxy.toml";

    let config_file = match &args.config {
        None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|path| path.is_file()),
        Some(path) => Some(path.clone()),
    };

    Ok(if let Some(config_file) = config_file {
        debug!("Reading configuration from {}", config_file.display());
        config::file::File::default_with_user_config_file(&config_file)?
    } else {
        config::file::File::default()
    })
}

fn main() {
    let args = Cli::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = args.log_level {
        logger.filter_level(level);
    }
    logger.init();

    match run(args) {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            error!("fatal: {}", err.to_string());
            std::process::exit(1)
        }
    }
}

fn run(args: Cli) -> Result<(), Error> {
    let cfg_file = read_config(&args)?;
    info!("pxy {}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Commands::Install { backend } => match backend {
            InstallBackend::Podman { tarball, images, podman } => {
                let flags = config::runtime::Config::new(&cfg_file, &images)?.podman(&cfg_file, &podman);
                with_podman(|podman| podman.install(&flags, &tarball))
            }
            InstallBackend::Kubernetes { tarball, images, helm } => {
                let flags = config::runtime::Config::new(&cfg_file, &images)?.kubernetes(&cfg_file, &helm);
                with_kubernetes(|deployer| deployer.install(&flags, &tarball))
            }
        },
        Commands::Upgrade { backend } => match backend {
            UpgradeBackend::Podman { images, podman } => {
                let flags = config::runtime::Config::new(&cfg_file, &images)?.podman(&cfg_file, &podman);
                with_podman(|podman| podman.upgrade(&flags))
            }
            UpgradeBackend::Kubernetes { images, helm, config_dir } => {
                let flags = config::runtime::Config::new(&cfg_file, &images)?.kubernetes(&cfg_file, &helm);
                with_kubernetes(|deployer| deployer.upgrade(&flags, config_dir.as_deref()))
            }
        },
        Commands::Ptf { backend } => match backend {
            PtfBackend::Podman { images, podman, patch } => {
                let flags = config::runtime::Config::new(&cfg_file, &images)?.podman(&cfg_file, &podman);
                let patch = PatchFlags::from(patch);
                with_podman(|podman| podman.ptf(&flags, &patch))
            }
            PtfBackend::Kubernetes { images, helm, patch, config_dir } => {
                let flags = config::runtime::Config::new(&cfg_file, &images)?.kubernetes(&cfg_file, &helm);
                let patch = PatchFlags::from(patch);
                let registry = HttpRegistry::new()?;
                let authenticator = AuthFileLogin::default();
                with_kubernetes(|deployer| {
                    deployer.ptf(&flags, &patch, &registry, &authenticator, config_dir.as_deref())
                })
            }
        },
        Commands::Start { backend } => match backend {
            ServiceBackend::Podman => with_podman(|podman| podman.start()),
            ServiceBackend::Kubernetes { helm_namespace } => {
                let namespace = namespace(&cfg_file, helm_namespace);
                with_kubernetes(|deployer| deployer.start(&namespace))
            }
        },
        Commands::Stop { backend } => match backend {
            ServiceBackend::Podman => with_podman(|podman| podman.stop()),
            ServiceBackend::Kubernetes { helm_namespace } => {
                let namespace = namespace(&cfg_file, helm_namespace);
                with_kubernetes(|deployer| deployer.stop(&namespace))
            }
        },
        Commands::Restart { backend } => match backend {
            ServiceBackend::Podman => with_podman(|podman| podman.restart()),
            ServiceBackend::Kubernetes { helm_namespace } => {
                let namespace = namespace(&cfg_file, helm_namespace);
                with_kubernetes(|deployer| deployer.restart(&namespace))
            }
        },
        Commands::Status { backend } => match backend {
            ServiceBackend::Podman => with_podman(|podman| {
                for service in podman.status() {
                    let state = if service.running { "running" } else { "stopped" };
                    println!("{}: {state}", service.name);
                }
                Ok(())
            }),
            ServiceBackend::Kubernetes { helm_namespace } => {
                let namespace = namespace(&cfg_file, helm_namespace);
                with_kubernetes(|deployer| {
                    let pods = deployer.status(&namespace)?;
                    println!("{}: {pods} pod(s) running in {namespace} namespace", deploy::APP);
                    Ok(())
                })
            }
        },
        Commands::Uninstall { backend } => match backend {
            UninstallBackend::Podman { dry_run, purge_volumes } => {
                with_podman(|podman| podman.uninstall(dry_run, purge_volumes))
            }
            UninstallBackend::Kubernetes { dry_run } => with_kubernetes(|deployer| deployer.uninstall(dry_run)),
        },
        Commands::Logs { backend } => match backend {
            LogsBackend::Podman { logs, containers } => {
                let flags = LogFlags::from(logs);
                with_podman(|podman| podman.logs(&flags, &containers))
            }
            LogsBackend::Kubernetes { logs, helm_namespace, pod, container } => {
                let namespace = namespace(&cfg_file, helm_namespace);
                let flags = LogFlags::from(logs);
                with_kubernetes(|deployer| deployer.logs(&namespace, &flags, pod.as_deref(), container.as_deref()))
            }
        },
    }
}

fn namespace(cfg_file: &config::file::File, helm_namespace: Option<String>) -> String {
    let helm = cli::HelmArgs {
        helm_namespace,
        ..Default::default()
    };
    config::runtime::helm_flags(cfg_file, &helm).namespace
}

/// Run `operation` against the local podman and systemd.
fn with_podman<F>(operation: F) -> Result<(), Error>
where
    F: FnOnce(&Podman) -> Result<(), podman::Error>,
{
    command::ensure_binary("podman")?;

    let manager = Systemctl;
    let engine = PodmanEngine;
    let registry = PodmanRegistry::default();
    let authenticator = AuthFileLogin::default();
    let podman = Podman::new(&manager, &engine, &registry, &authenticator);
    Ok(operation(&podman)?)
}

/// Run `operation` against the cluster kubectl is configured for.
fn with_kubernetes<F>(operation: F) -> Result<(), Error>
where
    F: FnOnce(&Deployer) -> Result<(), deploy::Error>,
{
    command::ensure_binary("kubectl")?;
    command::ensure_binary("helm")?;

    let cluster = Kubectl;
    let deployer = Deployer::new(&cluster);
    Ok(operation(&deployer)?)
}
