use std::path::PathBuf;
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use crate::image::ServiceRole;
use crate::logs::LogFlags;
use crate::ptf::PatchFlags;

/// Install, upgrade and patch an Uyuni proxy on podman or Kubernetes.
#[derive(Parser, Debug)]
#[command(name = "pxy", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file, `pxy.toml` in the working directory is used if present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level, overriding RUST_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<LevelFilter>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install a proxy from the configuration tarball generated by the server.
    Install {
        #[command(subcommand)]
        backend: InstallBackend,
    },
    /// Upgrade the proxy images.
    Upgrade {
        #[command(subcommand)]
        backend: UpgradeBackend,
    },
    /// Deploy a program temporary fix or a test package.
    Ptf {
        #[command(subcommand)]
        backend: PtfBackend,
    },
    /// Start the proxy services.
    Start {
        #[command(subcommand)]
        backend: ServiceBackend,
    },
    /// Stop the proxy services.
    Stop {
        #[command(subcommand)]
        backend: ServiceBackend,
    },
    /// Restart the proxy services.
    Restart {
        #[command(subcommand)]
        backend: ServiceBackend,
    },
    /// Show whether the proxy services are running.
    Status {
        #[command(subcommand)]
        backend: ServiceBackend,
    },
    /// Remove the proxy, and optionally its volumes.
    Uninstall {
        #[command(subcommand)]
        backend: UninstallBackend,
    },
    /// Show the logs of the proxy containers.
    Logs {
        #[command(subcommand)]
        backend: LogsBackend,
    },
}

#[derive(Debug, Subcommand)]
pub enum InstallBackend {
    Podman {
        /// Configuration tarball generated by the server.
        #[arg(value_name = "CONFIG_TARBALL")]
        tarball: PathBuf,
        #[command(flatten)]
        images: ImageArgs,
        #[command(flatten)]
        podman: PodmanArgs,
    },
    Kubernetes {
        /// Configuration tarball generated by the server.
        #[arg(value_name = "CONFIG_TARBALL")]
        tarball: PathBuf,
        #[command(flatten)]
        images: ImageArgs,
        #[command(flatten)]
        helm: HelmArgs,
    },
}

#[derive(Debug, Subcommand)]
pub enum UpgradeBackend {
    Podman {
        #[command(flatten)]
        images: ImageArgs,
        #[command(flatten)]
        podman: PodmanArgs,
    },
    Kubernetes {
        #[command(flatten)]
        images: ImageArgs,
        #[command(flatten)]
        helm: HelmArgs,
        /// Directory with the proxy configuration files, read from the cluster when missing.
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum PtfBackend {
    Podman {
        #[command(flatten)]
        images: ImageArgs,
        #[command(flatten)]
        podman: PodmanArgs,
        #[command(flatten)]
        patch: PatchArgs,
    },
    Kubernetes {
        #[command(flatten)]
        images: ImageArgs,
        #[command(flatten)]
        helm: HelmArgs,
        #[command(flatten)]
        patch: PatchArgs,
        /// Directory with the proxy configuration files, read from the cluster when missing.
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ServiceBackend {
    Podman,
    Kubernetes {
        /// Namespace of the proxy deployment.
        #[arg(long)]
        helm_namespace: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum UninstallBackend {
    Podman {
        /// Only show what would be done.
        #[arg(short = 'n', long)]
        dry_run: bool,
        /// Also remove the volumes.
        #[arg(long)]
        purge_volumes: bool,
    },
    Kubernetes {
        /// Only show what would be done.
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum LogsBackend {
    Podman {
        #[command(flatten)]
        logs: LogArgs,
        /// Containers to show the logs of, all the proxy ones if none is given.
        containers: Vec<String>,
    },
    Kubernetes {
        #[command(flatten)]
        logs: LogArgs,
        /// Namespace of the proxy deployment.
        #[arg(long)]
        helm_namespace: Option<String>,
        /// Pod to show the logs of, the proxy one if not given.
        pod: Option<String>,
        /// Container of the pod, all of them if not given.
        container: Option<String>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct LogArgs {
    /// Keep printing the new log lines.
    #[arg(short, long)]
    pub follow: bool,
    /// Show the timestamps of the log lines.
    #[arg(short, long)]
    pub timestamps: bool,
    /// Number of lines to show from the end of the logs.
    #[arg(long)]
    pub tail: Option<u32>,
    /// Show the logs since a RFC 3339 timestamp or a duration, e.g. `3h`.
    #[arg(long)]
    pub since: Option<String>,
}

impl From<LogArgs> for LogFlags {
    fn from(args: LogArgs) -> Self {
        Self {
            follow: args.follow,
            timestamps: args.timestamps,
            tail: args.tail,
            since: args.since,
        }
    }
}

/// Registry, images and credentials. Unset values come from the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct ImageArgs {
    /// Registry prefix of the proxy images.
    #[arg(long)]
    pub registry: Option<String>,
    #[arg(long)]
    pub registry_user: Option<String>,
    #[arg(long)]
    pub registry_password: Option<String>,

    /// Tag of all the proxy images.
    #[arg(long)]
    pub tag: Option<String>,
    /// Always, IfNotPresent or Never.
    #[arg(long)]
    pub pull_policy: Option<String>,

    #[arg(long)]
    pub httpd_image: Option<String>,
    #[arg(long)]
    pub httpd_tag: Option<String>,
    #[arg(long)]
    pub salt_broker_image: Option<String>,
    #[arg(long)]
    pub salt_broker_tag: Option<String>,
    #[arg(long)]
    pub squid_image: Option<String>,
    #[arg(long)]
    pub squid_tag: Option<String>,
    #[arg(long)]
    pub ssh_image: Option<String>,
    #[arg(long)]
    pub ssh_tag: Option<String>,
    #[arg(long)]
    pub tftpd_image: Option<String>,
    #[arg(long)]
    pub tftpd_tag: Option<String>,

    /// Apache configuration fragment mounted in the httpd container.
    #[arg(long)]
    pub httpd_tuning: Option<PathBuf>,
    /// Squid configuration fragment mounted in the squid container.
    #[arg(long)]
    pub squid_tuning: Option<PathBuf>,

    /// SUSE Customer Center credentials.
    #[arg(long)]
    pub scc_user: Option<String>,
    #[arg(long)]
    pub scc_password: Option<String>,
}

impl ImageArgs {
    /// Image name and tag overrides of a service.
    pub fn image(&self, role: ServiceRole) -> (Option<&str>, Option<&str>) {
        let (name, tag) = match role {
            ServiceRole::Httpd => (&self.httpd_image, &self.httpd_tag),
            ServiceRole::SaltBroker => (&self.salt_broker_image, &self.salt_broker_tag),
            ServiceRole::Squid => (&self.squid_image, &self.squid_tag),
            ServiceRole::Ssh => (&self.ssh_image, &self.ssh_tag),
            ServiceRole::Tftpd => (&self.tftpd_image, &self.tftpd_tag),
        };
        (name.as_deref(), tag.as_deref())
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct PodmanArgs {
    /// Extra argument for `podman pod create`, can be repeated.
    #[arg(long = "podman-arg")]
    pub podman_args: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct HelmArgs {
    #[arg(long)]
    pub helm_namespace: Option<String>,
    /// Proxy helm chart, e.g. `oci://registry.opensuse.org/uyuni/proxy-helm`.
    #[arg(long)]
    pub helm_chart: Option<String>,
    #[arg(long)]
    pub helm_version: Option<String>,
    /// Values file passed to helm before the generated values.
    #[arg(long)]
    pub helm_values: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PatchArgs {
    /// Program temporary fix ID.
    #[arg(long, default_value = "")]
    pub ptf: String,
    /// Test package ID.
    #[arg(long, default_value = "")]
    pub test: String,
    /// SUSE Customer Center user the patch was built for.
    #[arg(long, default_value = "")]
    pub user: String,
}

impl From<PatchArgs> for PatchFlags {
    fn from(args: PatchArgs) -> Self {
        Self {
            ptf: args.ptf,
            test: args.test,
            user: args.user,
        }
    }
}
