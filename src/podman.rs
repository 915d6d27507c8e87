use std::path::{Path, PathBuf};
use log::{debug, error, info, warn};
use thiserror::Error;
use crate::command;
use crate::image::{ImageReference, ImageSettings, ProxyImageSet, ServiceRole};
use crate::logs::LogFlags;
use crate::proxy_config;
use crate::ptf::{self, PatchFlags, PatchRequest};
use crate::registry::{self, AuthContext, Authenticator, Credentials, RegistryClient};
use crate::systemd::{self, ServiceManager, POD_SERVICE};
use crate::unit::{self, PodmanFlags, UnitGenerator, NETWORK};

/// Files telling whether IPv6 is disabled on the host.
const IPV6_DISABLE_FILES: [&str; 3] = [
    "/sys/module/ipv6/parameters/disable",
    "/proc/sys/net/ipv6/conf/default/disable_ipv6",
    "/proc/sys/net/ipv6/conf/all/disable_ipv6",
];

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Command(#[from] command::Error),

    #[error("registry: {0}")]
    Registry(#[from] registry::Error),

    #[error("generate systemd units: {0}")]
    Units(#[from] unit::Error),

    #[error(transparent)]
    Service(#[from] systemd::Error),

    #[error("proxy configuration: {0}")]
    Config(#[from] proxy_config::Error),

    #[error(transparent)]
    Patch(#[from] ptf::Error),

    #[error("no running proxy container found, install the proxy first")]
    NotInstalled,

    #[error("remove {}: {err}", path.display())]
    Remove { path: PathBuf, err: std::io::Error },
}

/// Container engine operations outside of the services lifecycle.
pub trait ContainerEngine {
    /// Make sure the proxy network exists and return whether it has IPv6 enabled.
    fn setup_network(&self) -> Result<bool, Error>;

    /// Image of a running container, if any.
    fn running_image(&self, container: &str) -> Result<Option<ImageReference>, Error>;

    fn volume_exists(&self, volume: &str) -> Result<bool, Error>;

    fn remove_volume(&self, volume: &str) -> Result<(), Error>;

    /// Print the logs of the containers.
    fn logs(&self, args: &[String]) -> Result<(), Error>;
}

/// Whether IPv6 is usable, given the host files disabling it.
pub fn ipv6_enabled<P: AsRef<Path>>(disable_files: &[P]) -> bool {
    !disable_files.iter().any(|file| {
        std::fs::read_to_string(file)
            .map(|content| matches!(content.trim(), "1" | "Y" | "y" | "true"))
            .unwrap_or(false)
    })
}

/// [ContainerEngine] running the podman command line.
#[derive(Default)]
pub struct PodmanEngine;

impl ContainerEngine for PodmanEngine {
    fn setup_network(&self) -> Result<bool, Error> {
        info!("Setting up {NETWORK} network");
        let ipv6 = ipv6_enabled(&IPV6_DISABLE_FILES);

        if command::succeeds("podman", ["network", "exists", NETWORK])? {
            let has_ipv6 =
                command::output("podman", ["network", "inspect", "--format", "{{.IPv6Enabled}}", NETWORK])?;
            if has_ipv6 == "true" || !ipv6 {
                info!("Reusing existing {NETWORK} network");
                return Ok(has_ipv6 == "true");
            }
            info!("{NETWORK} network doesn't have IPv6, deleting existing network to enable IPv6 on it");
            command::run("podman", ["network", "rm", NETWORK])?;
        }

        let mut args = vec!["network", "create"];
        let mut with_ipv6 = false;
        if ipv6 {
            // IPv6 networks only work with the netavark backend
            let backend = command::output("podman", ["info", "--format", "{{.Host.NetworkBackend}}"])?;
            if backend == "netavark" {
                args.push("--ipv6");
                with_ipv6 = true;
            } else {
                info!("Podman's network backend ({backend}) is not netavark, skipping IPv6 enabling on {NETWORK} network");
            }
        }
        args.push(NETWORK);
        command::run("podman", args)?;
        Ok(with_ipv6)
    }

    fn running_image(&self, container: &str) -> Result<Option<ImageReference>, Error> {
        let filter = format!("--filter=name={container}");
        let out = command::output("podman", ["ps", filter.as_str(), "--format={{ .Image }}"])?;
        debug!("Running image of {container}: {out}");
        Ok(out.lines().next().and_then(ImageReference::parse))
    }

    fn volume_exists(&self, volume: &str) -> Result<bool, Error> {
        Ok(command::succeeds("podman", ["volume", "exists", volume])?)
    }

    fn remove_volume(&self, volume: &str) -> Result<(), Error> {
        Ok(command::run("podman", ["volume", "rm", volume])?)
    }

    fn logs(&self, args: &[String]) -> Result<(), Error> {
        Ok(command::run("podman", args)?)
    }
}

/// Everything needed to deploy the proxy with podman.
#[derive(Debug, Clone, Default)]
pub struct PodmanProxyFlags {
    pub images: ImageSettings,
    pub scc: Credentials,
    pub podman: PodmanFlags,
}

/// Running state of a proxy service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStatus {
    pub name: String,
    pub running: bool,
}

/// Proxy deployed on a podman host, run by systemd.
pub struct Podman<'a> {
    pub manager: &'a dyn ServiceManager,
    pub engine: &'a dyn ContainerEngine,
    pub registry: &'a dyn RegistryClient,
    pub authenticator: &'a dyn Authenticator,
    pub units_dir: PathBuf,
    pub config_dir: PathBuf,
    pub http_proxy_file: Option<PathBuf>,
}

impl<'a> Podman<'a> {
    pub fn new(
        manager: &'a dyn ServiceManager,
        engine: &'a dyn ContainerEngine,
        registry: &'a dyn RegistryClient,
        authenticator: &'a dyn Authenticator,
    ) -> Self {
        let http_proxy_file = Path::new(unit::HTTP_PROXY_FILE);
        Self {
            manager,
            engine,
            registry,
            authenticator,
            units_dir: PathBuf::from(systemd::UNITS_DIR),
            config_dir: PathBuf::from(proxy_config::CONFIG_DIR),
            http_proxy_file: http_proxy_file.exists().then(|| http_proxy_file.to_path_buf()),
        }
    }

    /// Unpack the configuration generated by the server, then deploy and start the proxy.
    pub fn install(&self, flags: &PodmanProxyFlags, config_tarball: &Path) -> Result<(), Error> {
        proxy_config::unpack(config_tarball, &self.config_dir)?;
        proxy_config::validate(&self.config_dir)?;

        let auth = self.authenticator.login(&flags.images.registry, &flags.scc)?;
        let images = self.prepare(ProxyImageSet::resolve(&flags.images), &auth);
        self.generate(&images, &flags.podman)?;
        auth.release();

        systemd::start(self.manager, POD_SERVICE)?;
        Ok(())
    }

    /// Deploy new images, restarting the proxy.
    pub fn upgrade(&self, flags: &PodmanProxyFlags) -> Result<(), Error> {
        let auth = self.authenticator.login(&flags.images.registry, &flags.scc)?;
        let images = self.prepare(ProxyImageSet::resolve(&flags.images), &auth);
        self.redeploy(&images, &flags.podman)
    }

    /// Replace the images of the running services by their patched builds, where one exists.
    pub fn ptf(&self, flags: &PodmanProxyFlags, patch: &PatchFlags) -> Result<(), Error> {
        let request = PatchRequest::try_from(patch)?;

        let auth = self.authenticator.login(&flags.images.registry, &flags.scc)?;
        let current = self.running_images(&flags.images)?;
        let patched = ptf::resolve(&request, &current, self.registry, &auth)?;
        if patched.is_empty() {
            warn!("No patched image found, keeping the current images");
        }
        let images = self.prepare(patched, &auth);
        self.redeploy(&images, &flags.podman)
    }

    pub fn start(&self) -> Result<(), Error> {
        Ok(systemd::start(self.manager, POD_SERVICE)?)
    }

    pub fn stop(&self) -> Result<(), Error> {
        Ok(systemd::stop(self.manager, POD_SERVICE)?)
    }

    pub fn restart(&self) -> Result<(), Error> {
        Ok(systemd::restart(self.manager, POD_SERVICE)?)
    }

    /// Disable and remove the proxy units, and the volumes if `purge_volumes` is set.
    ///
    /// With `dry_run`, only log what would be done.
    pub fn uninstall(&self, dry_run: bool, purge_volumes: bool) -> Result<(), Error> {
        let units = ServiceRole::ALL
            .iter()
            .map(ServiceRole::unit_name)
            .chain(std::iter::once(POD_SERVICE.to_string()));
        for name in units {
            let unit_file = self.units_dir.join(format!("{name}.service"));
            let drop_in = self.units_dir.join(format!("{name}.service.d"));
            if !unit_file.exists() {
                debug!("No {name} unit to remove");
                continue;
            }
            if dry_run {
                info!("Would run systemctl disable --now {name}");
                info!("Would remove {} and {}", unit_file.display(), drop_in.display());
                continue;
            }

            info!("Disabling {name} service");
            if let Err(err) = self.manager.disable(&name) {
                error!("{err}");
            }
            debug!("Removing {}", unit_file.display());
            std::fs::remove_file(&unit_file).map_err(|err| Error::Remove { path: unit_file, err })?;
            if drop_in.exists() {
                std::fs::remove_dir_all(&drop_in).map_err(|err| Error::Remove { path: drop_in, err })?;
            }
        }

        if purge_volumes {
            for volume in unit::volume_names() {
                if !self.engine.volume_exists(volume)? {
                    continue;
                }
                if dry_run {
                    info!("Would run podman volume rm {volume}");
                } else {
                    info!("Removing {volume} volume");
                    self.engine.remove_volume(volume)?;
                }
            }
        }

        if dry_run {
            info!("Would reload systemd");
            return Ok(());
        }
        Ok(self.manager.reload()?)
    }

    /// Print the logs of the given containers, of all the proxy ones if none is given.
    pub fn logs(&self, flags: &LogFlags, containers: &[String]) -> Result<(), Error> {
        let all: Vec<String>;
        let containers: &[String] = if containers.is_empty() {
            all = ServiceRole::ALL.iter().map(ServiceRole::unit_name).collect();
            &all
        } else {
            containers
        };
        self.engine.logs(&flags.podman_args(containers))
    }

    /// State of the pod and of every service.
    pub fn status(&self) -> Vec<ServiceStatus> {
        std::iter::once(POD_SERVICE.to_string())
            .chain(ServiceRole::ALL.iter().map(ServiceRole::unit_name))
            .map(|name| ServiceStatus {
                running: self.manager.is_running(&name),
                name,
            })
            .collect()
    }

    /// Images of the running proxy containers.
    fn running_images(&self, settings: &ImageSettings) -> Result<ProxyImageSet, Error> {
        let mut images = ProxyImageSet::empty(settings);
        for role in ServiceRole::ALL {
            match self.engine.running_image(&role.unit_name())? {
                Some(image) => images.insert(role, image),
                None => warn!("No running container found for {role}"),
            }
        }
        if images.is_empty() {
            return Err(Error::NotInstalled);
        }
        Ok(images)
    }

    /// Make the images available locally. A service whose image cannot be prepared keeps its current one.
    fn prepare(&self, mut images: ProxyImageSet, auth: &AuthContext) -> ProxyImageSet {
        let pull_policy = images.pull_policy;
        let requested: Vec<(ServiceRole, ImageReference)> =
            images.iter().map(|(role, image)| (role, image.clone())).collect();

        for (role, image) in requested {
            match self.registry.prepare(&image, auth, pull_policy) {
                Ok(prepared) => images.insert(role, prepared),
                Err(err) => {
                    warn!("Cannot use {image} for {role}, keeping the current image: {err}");
                    images.remove(role);
                }
            }
        }
        images
    }

    fn generate(&self, images: &ProxyImageSet, flags: &PodmanFlags) -> Result<(), Error> {
        let ipv6 = self.engine.setup_network()?;
        UnitGenerator::new(self.manager, &self.units_dir)
            .with_http_proxy_file(self.http_proxy_file.clone())
            .with_ipv6(ipv6)
            .generate(images, flags)?;
        Ok(())
    }

    /// Stop the running pod, write the new units and start again.
    fn redeploy(&self, images: &ProxyImageSet, flags: &PodmanFlags) -> Result<(), Error> {
        if self.manager.is_running(POD_SERVICE) {
            systemd::stop(self.manager, POD_SERVICE)?;
        }
        self.generate(images, flags)?;
        systemd::start(self.manager, POD_SERVICE)?;
        Ok(())
    }
}
