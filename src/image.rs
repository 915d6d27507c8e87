use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use serde::Deserialize;
use thiserror::Error;

/// Registry and namespace used when nothing else is configured.
pub const DEFAULT_REGISTRY: &str = "registry.opensuse.org/uyuni";

/// Image tag used when neither a global nor a per-service tag is set.
pub const DEFAULT_TAG: &str = "latest";

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("invalid proxy service name: {0}")]
    UnknownRole(String),

    #[error("{0} is not a valid image pull policy value")]
    UnknownPullPolicy(String),
}

/// The containers making up a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceRole {
    Httpd,
    SaltBroker,
    Squid,
    Ssh,
    Tftpd,
}

impl ServiceRole {
    pub const ALL: [ServiceRole; 5] = [
        ServiceRole::Httpd,
        ServiceRole::SaltBroker,
        ServiceRole::Squid,
        ServiceRole::Ssh,
        ServiceRole::Tftpd,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ServiceRole::Httpd => "httpd",
            ServiceRole::SaltBroker => "salt-broker",
            ServiceRole::Squid => "squid",
            ServiceRole::Ssh => "ssh",
            ServiceRole::Tftpd => "tftpd",
        }
    }

    /// Repository name of the released image, relative to the registry namespace.
    pub fn default_repository(&self) -> String {
        format!("proxy-{}", self.name())
    }

    /// Systemd unit and container name, without the `.service` suffix.
    pub fn unit_name(&self) -> String {
        format!("uyuni-proxy-{}", self.name())
    }

    /// Find the role whose image is stored in `repository`.
    pub fn from_repository(repository: &str) -> Option<ServiceRole> {
        let last = repository.rsplit('/').next().unwrap_or(repository);
        ServiceRole::ALL
            .into_iter()
            .find(|role| last == role.name() || last == role.default_repository())
    }
}

impl Display for ServiceRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ServiceRole {
    type Err = Error;

    /// Accepts both the service name and the camel-cased configuration key (`saltBroker`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "httpd" => Ok(ServiceRole::Httpd),
            "salt-broker" | "saltBroker" | "salt_broker" => Ok(ServiceRole::SaltBroker),
            "squid" => Ok(ServiceRole::Squid),
            "ssh" => Ok(ServiceRole::Ssh),
            "tftpd" => Ok(ServiceRole::Tftpd),
            _ => Err(Error::UnknownRole(s.to_string())),
        }
    }
}

/// Per-service image override. Empty strings mean "not set".
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ImageFlags {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tag: String,
}

/// Registry prefix holding the proxy images, with optional credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct Registry {
    pub host: String,
    pub user: String,
    pub password: String,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            host: DEFAULT_REGISTRY.to_string(),
            user: String::new(),
            password: String::new(),
        }
    }
}

impl Registry {
    /// Registry prefix without trailing slash, falling back to [DEFAULT_REGISTRY].
    pub fn prefix(&self) -> &str {
        let host = self.host.trim().trim_end_matches('/');
        if host.is_empty() {
            DEFAULT_REGISTRY
        } else {
            host
        }
    }

    /// Host name part of the prefix, e.g. `registry.suse.com`.
    pub fn hostname(&self) -> &str {
        self.prefix().split('/').next().unwrap_or_default()
    }
}

/// When to pull images.
///
/// Podman has no such concept, so the values are interpreted as:
/// * `Never`: only check the image is available locally,
/// * `IfNotPresent`: check and pull if missing,
/// * `Always`: pull without checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

impl Display for PullPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PullPolicy::Always => "Always",
            PullPolicy::IfNotPresent => "IfNotPresent",
            PullPolicy::Never => "Never",
        })
    }
}

impl FromStr for PullPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(PullPolicy::Always),
            "ifnotpresent" => Ok(PullPolicy::IfNotPresent),
            "never" => Ok(PullPolicy::Never),
            _ => Err(Error::UnknownPullPolicy(s.to_string())),
        }
    }
}

/// Fully qualified container image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry_host: String,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    /// Build a reference from a `host/path` string and a tag.
    fn from_path(path: &str, tag: &str) -> Self {
        let (registry_host, repository) = path.split_once('/').unwrap_or((path, ""));
        Self {
            registry_host: registry_host.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
        }
    }

    /// Parse a qualified `host/path[:tag]` image name, as reported by podman or kubectl.
    ///
    /// Names without a registry host part are rejected.
    pub fn parse(image: &str) -> Option<Self> {
        let image = image.trim().trim_matches('\'').trim_matches('"');
        let (path, tag) = split_tag(image);
        if path.is_empty() || !path.contains('/') {
            return None;
        }
        let tag = if tag.is_empty() { DEFAULT_TAG } else { tag };
        Some(Self::from_path(path, tag))
    }
}

impl Display for ImageReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.repository.is_empty() {
            write!(f, "{}:{}", self.registry_host, self.tag)
        } else {
            write!(f, "{}/{}:{}", self.registry_host, self.repository, self.tag)
        }
    }
}

/// Split `name:tag` without mistaking a registry port for a tag.
fn split_tag(name: &str) -> (&str, &str) {
    match name.rfind(':') {
        Some(index) if !name[index..].contains('/') => (&name[..index], &name[index + 1..]),
        _ => (name, ""),
    }
}

/// Compute the image of a service from the registry, the global tag and the per-service override.
///
/// An override name is joined to the registry prefix unless it already starts with it.
/// An override naming another registry therefore ends up nested below ours:
/// `registry.example.com/proxy` + `other.io/httpd` gives `registry.example.com/proxy/other.io/httpd`.
///
/// The tag is the first non-empty value of the override tag, a tag embedded in the override name,
/// the global tag and [DEFAULT_TAG].
pub fn resolve(
    registry: &Registry,
    global_tag: &str,
    image: &ImageFlags,
    default_repository: &str,
) -> ImageReference {
    let prefix = registry.prefix();
    let (name, embedded_tag) = split_tag(image.name.trim());

    let path = if name.is_empty() {
        format!("{prefix}/{default_repository}")
    } else if name.starts_with(prefix) {
        name.to_string()
    } else {
        format!("{prefix}/{}", name.trim_start_matches('/'))
    };

    let tag = [image.tag.as_str(), embedded_tag, global_tag]
        .into_iter()
        .map(str::trim)
        .find(|tag| !tag.is_empty())
        .unwrap_or(DEFAULT_TAG);

    ImageReference::from_path(&path, tag)
}

/// Optional per-service configuration overrides bind-mounted in the containers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuning {
    pub httpd: Option<PathBuf>,
    pub squid: Option<PathBuf>,
}

impl Tuning {
    pub fn for_role(&self, role: ServiceRole) -> Option<&Path> {
        match role {
            ServiceRole::Httpd => self.httpd.as_deref(),
            ServiceRole::Squid => self.squid.as_deref(),
            _ => None,
        }
    }
}

/// Every input needed to compute the images of a proxy.
#[derive(Debug, Clone, Default)]
pub struct ImageSettings {
    pub registry: Registry,
    pub tag: String,
    pub pull_policy: PullPolicy,
    pub overrides: BTreeMap<ServiceRole, ImageFlags>,
    pub tuning: Tuning,
}

/// Images to deploy for each service.
///
/// A service without an image keeps whatever is currently deployed for it.
#[derive(Debug, Clone, Default)]
pub struct ProxyImageSet {
    images: BTreeMap<ServiceRole, ImageReference>,
    pub tuning: Tuning,
    pub registry: Registry,
    pub pull_policy: PullPolicy,
}

impl ProxyImageSet {
    /// An image set without any image, sharing the registry, tuning and pull policy of `settings`.
    pub fn empty(settings: &ImageSettings) -> Self {
        Self {
            images: BTreeMap::new(),
            tuning: settings.tuning.clone(),
            registry: settings.registry.clone(),
            pull_policy: settings.pull_policy,
        }
    }

    /// A copy of this set without any image.
    pub fn without_images(&self) -> Self {
        Self {
            images: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Resolve the image of every service.
    pub fn resolve(settings: &ImageSettings) -> Self {
        let mut set = Self::empty(settings);
        for role in ServiceRole::ALL {
            let image = settings.overrides.get(&role).cloned().unwrap_or_default();
            set.images.insert(
                role,
                resolve(&settings.registry, &settings.tag, &image, &role.default_repository()),
            );
        }
        set
    }

    pub fn get(&self, role: ServiceRole) -> Option<&ImageReference> {
        self.images.get(&role)
    }

    pub fn insert(&mut self, role: ServiceRole, image: ImageReference) {
        self.images.insert(role, image);
    }

    pub fn remove(&mut self, role: ServiceRole) -> Option<ImageReference> {
        self.images.remove(&role)
    }

    /// Replace the images of `self` with those set in `other`.
    pub fn overlay(&mut self, other: &ProxyImageSet) {
        for (role, image) in other.iter() {
            self.images.insert(role, image.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ServiceRole, &ImageReference)> {
        self.images.iter().map(|(role, image)| (*role, image))
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }
}
