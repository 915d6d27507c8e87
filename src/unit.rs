use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;
use crate::image::{ProxyImageSet, ServiceRole};
use crate::systemd::{self, ServiceManager, POD_SERVICE};

const POD_TEMPLATE: &str = include_str!("../templates/pod.service");
const SERVICE_TEMPLATE: &str = include_str!("../templates/proxy-service.service");

/// Podman network shared with the server containers.
pub const NETWORK: &str = "uyuni";

/// HTTP proxy settings of the host, only found on SUSE distributions.
pub const HTTP_PROXY_FILE: &str = "/etc/sysconfig/proxy";

/// Override fragment owned by us. Operators write `local.conf` next to it.
const GENERATED_CONF: &str = "generated.conf";

#[derive(Error, Debug)]
pub enum Error {
    #[error("render {name}: {err}")]
    Template { name: String, err: tera::Error },

    #[error("write {}: {err}", path.display())]
    Write { path: PathBuf, err: std::io::Error },

    #[error("tuning file {} cannot be used: {err}", path.display())]
    Tuning { path: PathBuf, err: std::io::Error },

    #[error(transparent)]
    Reload(#[from] systemd::Error),
}

/// Host port mapped to a port of the pod.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PortMap {
    pub name: &'static str,
    pub exposed: u16,
    pub port: u16,
    pub protocol: Option<&'static str>,
}

const fn tcp(name: &'static str, exposed: u16, port: u16) -> PortMap {
    PortMap { name, exposed, port, protocol: None }
}

pub static TCP_PORTS: [PortMap; 5] = [
    tcp("http", 80, 80),
    tcp("https", 443, 443),
    tcp("salt-publish", 4505, 4505),
    tcp("salt-request", 4506, 4506),
    tcp("ssh", 8022, 22),
];

pub static UDP_PORTS: [PortMap; 1] = [PortMap {
    name: "tftp",
    exposed: 69,
    port: 69,
    protocol: Some("udp"),
}];

#[derive(Serialize, Debug, Clone, PartialEq)]
struct VolumeMount {
    name: &'static str,
    mount_path: &'static str,
}

const fn volume(name: &'static str, mount_path: &'static str) -> VolumeMount {
    VolumeMount { name, mount_path }
}

fn volumes(role: ServiceRole) -> Vec<VolumeMount> {
    match role {
        ServiceRole::Httpd => vec![
            volume("uyuni-proxy-rhn-cache", "/var/cache/rhn"),
            volume("uyuni-proxy-tftpboot", "/srv/tftpboot"),
        ],
        ServiceRole::Squid => vec![volume("uyuni-proxy-squid-cache", "/var/cache/squid")],
        ServiceRole::Tftpd => vec![volume("uyuni-proxy-tftpboot", "/srv/tftpboot:ro")],
        ServiceRole::SaltBroker | ServiceRole::Ssh => vec![],
    }
}

/// Names of the volumes used by the proxy containers.
pub fn volume_names() -> BTreeSet<&'static str> {
    ServiceRole::ALL
        .iter()
        .flat_map(|role| volumes(*role))
        .map(|volume| volume.name)
        .collect()
}

/// Environment variable and container path of the tuning file mount, for the roles having one.
fn tuning_mount(role: ServiceRole) -> Option<(&'static str, &'static str)> {
    match role {
        ServiceRole::Httpd => Some(("HTTPD_EXTRA_CONF", "/etc/apache2/conf.d/apache_tuning.conf")),
        ServiceRole::Squid => Some(("SQUID_EXTRA_CONF", "/etc/squid/conf.d/squid_tuning.conf")),
        _ => None,
    }
}

/// Extra arguments passed to `podman pod create`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodmanFlags {
    pub args: Vec<String>,
}

/// Files generated for one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitDescriptor {
    /// `None` for the pod.
    pub role: Option<ServiceRole>,
    pub unit_file: PathBuf,
    pub override_conf: PathBuf,
    pub image: Option<String>,
    pub extra_env: Vec<(String, String)>,
}

impl UnitDescriptor {
    pub fn name(&self) -> String {
        match self.role {
            Some(role) => role.unit_name(),
            None => POD_SERVICE.to_string(),
        }
    }

    /// Content of `generated.conf`, `None` when it has to be left untouched.
    pub fn override_content(&self) -> Option<String> {
        if self.role.is_some() && self.image.is_none() {
            return None;
        }
        let mut content = String::from("# Generated by pxy, changes will be lost. Use local.conf instead.\n[Service]\n");
        if let Some(image) = &self.image {
            content.push_str(&format!("Environment=UYUNI_IMAGE={image}\n"));
        }
        for (key, value) in &self.extra_env {
            content.push_str(&format!("Environment=\"{key}={value}\"\n"));
        }
        Some(content)
    }
}

/// Writes the systemd units running the proxy containers.
pub struct UnitGenerator<'a> {
    manager: &'a dyn ServiceManager,
    units_dir: PathBuf,
    http_proxy_file: Option<PathBuf>,
    network: String,
    ipv6: bool,
}

impl<'a> UnitGenerator<'a> {
    pub fn new(manager: &'a dyn ServiceManager, units_dir: impl Into<PathBuf>) -> Self {
        let http_proxy_file = Path::new(HTTP_PROXY_FILE);
        Self {
            manager,
            units_dir: units_dir.into(),
            http_proxy_file: http_proxy_file.exists().then(|| http_proxy_file.to_path_buf()),
            network: NETWORK.to_string(),
            ipv6: false,
        }
    }

    pub fn with_http_proxy_file(mut self, file: Option<PathBuf>) -> Self {
        self.http_proxy_file = file;
        self
    }

    pub fn with_ipv6(mut self, ipv6: bool) -> Self {
        self.ipv6 = ipv6;
        self
    }

    fn unit_file(&self, name: &str) -> PathBuf {
        self.units_dir.join(format!("{name}.service"))
    }

    fn override_conf(&self, name: &str) -> PathBuf {
        self.units_dir
            .join(format!("{name}.service.d"))
            .join(GENERATED_CONF)
    }

    /// Describe the pod unit followed by one unit per role.
    pub fn descriptors(&self, images: &ProxyImageSet, flags: &PodmanFlags) -> Result<Vec<UnitDescriptor>, Error> {
        let mut descriptors = vec![UnitDescriptor {
            role: None,
            unit_file: self.unit_file(POD_SERVICE),
            override_conf: self.override_conf(POD_SERVICE),
            image: None,
            extra_env: vec![("PODMAN_EXTRA_ARGS".to_string(), flags.args.join(" "))],
        }];

        for role in ServiceRole::ALL {
            let name = role.unit_name();
            let image = images.get(role).map(|image| image.to_string());
            let tuning = images.tuning.for_role(role);

            let mut extra_env = Vec::new();
            match (tuning_mount(role), tuning) {
                (Some((variable, target)), Some(path)) if image.is_some() => {
                    let path = path.canonicalize().map_err(|err| Error::Tuning {
                        path: path.to_path_buf(),
                        err,
                    })?;
                    extra_env.push((variable.to_string(), format!("-v{}:{target}:ro", path.display())));
                }
                (_, Some(path)) if image.is_none() => {
                    warn!("No image for {role}, ignoring tuning file {}", path.display());
                }
                _ => {}
            }

            descriptors.push(UnitDescriptor {
                role: Some(role),
                unit_file: self.unit_file(&name),
                override_conf: self.override_conf(&name),
                image,
                extra_env,
            });
        }
        Ok(descriptors)
    }

    fn render(&self, descriptor: &UnitDescriptor) -> Result<String, Error> {
        let name = descriptor.name();
        let mut tera = Tera::default();
        let mut context = Context::new();
        context.insert("http_proxy_file", &self.http_proxy_file);

        let template = match descriptor.role {
            None => {
                let services: Vec<String> = ServiceRole::ALL.iter().map(ServiceRole::unit_name).collect();
                let ports: Vec<&PortMap> = TCP_PORTS.iter().chain(UDP_PORTS.iter()).collect();
                context.insert("services", &services);
                context.insert("network", &self.network);
                context.insert("ports", &ports);
                context.insert("ipv6", &self.ipv6);
                POD_TEMPLATE
            }
            Some(role) => {
                context.insert("name", &name);
                context.insert("role", role.name());
                context.insert("pod", POD_SERVICE);
                context.insert("volumes", &volumes(role));
                context.insert(
                    "extra_conf",
                    &tuning_mount(role).map(|(variable, _)| format!("${{{variable}}}")),
                );
                SERVICE_TEMPLATE
            }
        };

        tera.render_str(template, &context)
            .map_err(|err| Error::Template { name, err })
    }

    /// Write every unit and override fragment, then reload the service manager once.
    ///
    /// Running it twice with the same inputs produces the same files.
    pub fn generate(&self, images: &ProxyImageSet, flags: &PodmanFlags) -> Result<(), Error> {
        info!("Generating systemd services");
        for descriptor in self.descriptors(images, flags)? {
            let unit = self.render(&descriptor)?;
            write(&descriptor.unit_file, &unit)?;

            match descriptor.override_content() {
                Some(content) => write(&descriptor.override_conf, &content)?,
                None => debug!("Keeping current image of {}", descriptor.name()),
            }
        }
        self.manager.reload()?;
        Ok(())
    }
}

fn write(path: &Path, content: &str) -> Result<(), Error> {
    let to_error = |err| Error::Write { path: path.to_path_buf(), err };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(to_error)?;
    }
    debug!("Writing {}", path.display());
    std::fs::write(path, content).map_err(to_error)
}
