use std::fmt::{Debug, Formatter};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use crate::command;
use crate::image::{ImageReference, PullPolicy, Registry};

/// Registry requiring authentication, served with the SUSE Customer Center credentials.
const SCC_REGISTRY: &str = "registry.suse.com";

/// Where a registered host keeps its SUSE Customer Center credentials.
pub const HOST_SCC_CREDENTIALS: &str = "/etc/zypp/credentials.d/SCCcredentials";

#[derive(Error, Debug)]
pub enum Error {
    #[error("no credentials provided for {0}, which requires authentication")]
    MissingCredentials(String),

    #[error("failed to write registry authentication file: {0}")]
    AuthFile(#[from] std::io::Error),

    #[error("image {image} is missing and the pull policy forbids pulling it")]
    NotPulled { image: String },

    #[error("{0} should only contain lower case characters, otherwise podman pull would fail")]
    UpperCase(String),

    #[error("container engine: {0}")]
    Command(#[from] command::Error),

    #[error("registry request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry answered {status} for {image}")]
    Status { status: u16, image: String },

    #[error("read registry authentication file: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// User name and password pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() || self.password.is_empty()
    }

    /// Parse a zypper credentials file made of `username=` and `password=` lines.
    pub fn parse_zypp(content: &str) -> Self {
        let mut credentials = Credentials::default();
        for line in content.lines() {
            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "username" => credentials.user = value.trim().to_string(),
                    "password" => credentials.password = value.trim().to_string(),
                    _ => {}
                }
            }
        }
        credentials
    }
}

/// Registry login valid for the duration of one operation.
///
/// The release callback runs exactly once, when the context is dropped or explicitly released,
/// and removes the temporary authentication file if there is one.
pub struct AuthContext {
    auth_file: Option<PathBuf>,
    release: Option<Box<dyn FnOnce()>>,
}

impl AuthContext {
    /// Context for registries accepting anonymous pulls.
    pub fn anonymous() -> Self {
        Self {
            auth_file: None,
            release: None,
        }
    }

    pub fn new(auth_file: Option<PathBuf>, release: impl FnOnce() + 'static) -> Self {
        Self {
            auth_file,
            release: Some(Box::new(release)),
        }
    }

    pub fn auth_file(&self) -> Option<&Path> {
        self.auth_file.as_deref()
    }

    pub fn release(self) {}
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Debug for AuthContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("auth_file", &self.auth_file)
            .finish()
    }
}

/// Exchanges credentials for an [AuthContext].
pub trait Authenticator {
    fn login(&self, registry: &Registry, scc: &Credentials) -> Result<AuthContext, Error>;
}

/// Writes a podman authentication file in a private temporary directory.
pub struct AuthFileLogin {
    /// Credentials file of a host registered to the SUSE Customer Center.
    pub host_credentials: PathBuf,
}

impl Default for AuthFileLogin {
    fn default() -> Self {
        Self {
            host_credentials: PathBuf::from(HOST_SCC_CREDENTIALS),
        }
    }
}

impl Authenticator for AuthFileLogin {
    fn login(&self, registry: &Registry, scc: &Credentials) -> Result<AuthContext, Error> {
        let host = std::fs::read_to_string(&self.host_credentials)
            .map(|content| Credentials::parse_zypp(&content))
            .unwrap_or_default();

        let Some(content) = auth_file_content(registry, scc, &host) else {
            if requires_auth(registry) {
                return Err(Error::MissingCredentials(registry.prefix().to_string()));
            }
            debug!("No credentials for {}, pulling anonymously", registry.prefix());
            return Ok(AuthContext::anonymous());
        };

        let dir = tempfile::Builder::new().prefix("pxy-").tempdir()?;
        let path = dir.path().join("auth.json");
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)?;
        file.write_all(content.as_bytes())?;
        info!("Logged in to {}", registry.prefix());

        Ok(AuthContext::new(Some(path), move || {
            debug!("Removing registry authentication file");
            if let Err(err) = dir.close() {
                warn!("failed to remove registry authentication file: {err}");
            }
        }))
    }
}

fn requires_auth(registry: &Registry) -> bool {
    registry.hostname() == SCC_REGISTRY
}

#[derive(Serialize, Deserialize)]
struct AuthFile {
    auths: BTreeMap<String, AuthEntry>,
}

#[derive(Serialize, Deserialize)]
struct AuthEntry {
    auth: String,
}

/// Build the podman authentication file for `registry`, or `None` without usable credentials.
///
/// The SUSE registry is served with the SCC credentials: the ones passed explicitly,
/// else the ones of the registered host. Other registries use the registry credentials.
pub fn auth_file_content(registry: &Registry, scc: &Credentials, host: &Credentials) -> Option<String> {
    let credentials = if requires_auth(registry) {
        [scc, host].into_iter().find(|c| !c.is_empty())?.clone()
    } else {
        let credentials = Credentials {
            user: registry.user.clone(),
            password: registry.password.clone(),
        };
        if credentials.is_empty() {
            return None;
        }
        credentials
    };

    let auth = STANDARD.encode(format!("{}:{}", credentials.user, credentials.password));
    let file = AuthFile {
        auths: BTreeMap::from([(registry.host.clone(), AuthEntry { auth })]),
    };
    serde_json::to_string_pretty(&file).ok()
}

/// Find the credentials stored in a podman authentication file for a registry host.
pub fn credentials_for(auth_file: &Path, registry_host: &str) -> Result<Option<Credentials>, Error> {
    let file: AuthFile = serde_json::from_slice(&std::fs::read(auth_file)?)?;
    let entry = file
        .auths
        .iter()
        .find(|(key, _)| key.split('/').next() == Some(registry_host))
        .map(|(_, entry)| entry);

    Ok(entry.and_then(|entry| {
        let decoded = STANDARD.decode(entry.auth.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        Some(Credentials {
            user: user.to_string(),
            password: password.to_string(),
        })
    }))
}

/// Registry operations needed to deploy images.
pub trait RegistryClient {
    /// Whether the image exists in the remote registry.
    ///
    /// A missing image is `Ok(false)`; only failing to ask the registry is an error.
    fn image_exists(&self, image: &ImageReference, auth: &AuthContext) -> Result<bool, Error>;

    /// Make sure the image can be used, honoring the pull policy.
    ///
    /// Returns the reference to deploy, which may differ from the requested one
    /// if a local copy is found under another name.
    fn prepare(
        &self,
        image: &ImageReference,
        auth: &AuthContext,
        pull_policy: PullPolicy,
    ) -> Result<ImageReference, Error>;
}

/// Registry answers telling that an image does not exist, as reported by podman.
const NOT_FOUND_ERRORS: [&str; 3] = ["manifest unknown", "name unknown", "not found"];

fn is_not_found(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    NOT_FOUND_ERRORS.iter().any(|message| stderr.contains(message))
}

/// Registry operations run through the podman command line.
pub struct PodmanRegistry {
    pub program: String,
}

impl Default for PodmanRegistry {
    fn default() -> Self {
        Self {
            program: "podman".to_string(),
        }
    }
}

impl PodmanRegistry {
    fn with_auth(mut args: Vec<String>, auth: &AuthContext) -> Vec<String> {
        if let Some(file) = auth.auth_file() {
            args.push("--authfile".to_string());
            args.push(file.display().to_string());
        }
        args
    }

    /// Look for the image in the local storage, also under the `localhost/` prefix.
    fn local_image(&self, image: &ImageReference) -> Result<Option<ImageReference>, Error> {
        let name = image.to_string();
        let out = command::output(&self.program, ["images", "--quiet", &name])?;
        if !out.is_empty() {
            return Ok(Some(image.clone()));
        }

        let local = ImageReference {
            registry_host: "localhost".to_string(),
            ..image.clone()
        };
        let out = command::output(&self.program, ["images", "--quiet", &local.to_string()])?;
        Ok((!out.is_empty()).then_some(local))
    }

    fn pull(&self, image: &ImageReference, auth: &AuthContext) -> Result<(), Error> {
        let name = image.to_string();
        if name.chars().any(|c| c.is_uppercase()) {
            return Err(Error::UpperCase(name));
        }
        info!("Running podman pull {name}");
        let args = Self::with_auth(vec!["pull".to_string(), name], auth);
        Ok(command::run(&self.program, args)?)
    }
}

impl RegistryClient for PodmanRegistry {
    fn image_exists(&self, image: &ImageReference, auth: &AuthContext) -> Result<bool, Error> {
        let args = Self::with_auth(
            vec!["manifest".to_string(), "inspect".to_string(), image.to_string()],
            auth,
        );
        match command::output(&self.program, args) {
            Ok(_) => Ok(true),
            Err(command::Error::Failed { stderr, .. }) if is_not_found(&stderr) => {
                debug!("{image} not found in registry: {stderr}");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn prepare(
        &self,
        image: &ImageReference,
        auth: &AuthContext,
        pull_policy: PullPolicy,
    ) -> Result<ImageReference, Error> {
        if pull_policy != PullPolicy::Always {
            info!("Ensure image {image} is available");
            if let Some(present) = self.local_image(image)? {
                debug!("Image {present} already present");
                return Ok(present);
            }
            debug!("Image {image} is missing");
        }

        if pull_policy == PullPolicy::Never {
            return Err(Error::NotPulled { image: image.to_string() });
        }

        self.pull(image, auth)?;
        Ok(image.clone())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn registry(host: &str, user: &str, password: &str) -> Registry {
        Registry {
            host: host.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        }
    }

    fn credentials(user: &str, password: &str) -> Credentials {
        Credentials {
            user: user.to_string(),
            password: password.to_string(),
        }
    }

    fn encoded(user_password: &str) -> String {
        STANDARD.encode(user_password)
    }

    #[test]
    fn scc_flags_win_on_suse_registry() {
        let content = auth_file_content(
            &registry("registry.suse.com/suse/some/paths/", "reguser", "regpass"),
            &credentials("sccuserflag", "sccpasswordflag"),
            &credentials("sccuserhost", "sccpasswordhost"),
        )
        .unwrap();
        let file: AuthFile = serde_json::from_str(&content).unwrap();
        assert_eq!(
            file.auths["registry.suse.com/suse/some/paths/"].auth,
            encoded("sccuserflag:sccpasswordflag")
        );
    }

    #[test]
    fn host_credentials_used_without_flags() {
        let content = auth_file_content(
            &registry("registry.suse.com", "reguser", "regpass"),
            &Credentials::default(),
            &credentials("sccuserhost", "sccpasswordhost"),
        )
        .unwrap();
        let file: AuthFile = serde_json::from_str(&content).unwrap();
        assert_eq!(file.auths["registry.suse.com"].auth, encoded("sccuserhost:sccpasswordhost"));
    }

    #[test]
    fn registry_credentials_used_elsewhere() {
        let content = auth_file_content(
            &registry("myregistry.com/suse/some/paths/", "reguser", "regpass"),
            &credentials("sccuserflag", "sccpasswordflag"),
            &credentials("sccuserhost", "sccpasswordhost"),
        )
        .unwrap();
        let file: AuthFile = serde_json::from_str(&content).unwrap();
        assert_eq!(file.auths["myregistry.com/suse/some/paths/"].auth, encoded("reguser:regpass"));
    }

    #[test]
    fn no_credentials_no_file() {
        let content = auth_file_content(
            &registry("myregistry.com", "", ""),
            &Credentials::default(),
            &Credentials::default(),
        );
        assert!(content.is_none());
    }

    #[test]
    fn zypp_credentials_are_parsed() {
        let parsed = Credentials::parse_zypp("username=SCC_abc\npassword = secret\nother=1\n");
        assert_eq!(parsed, credentials("SCC_abc", "secret"));
    }

    #[test]
    fn login_writes_and_releases_auth_file() {
        let login = AuthFileLogin {
            host_credentials: PathBuf::from("/nonexistent/credentials"),
        };
        let context = login
            .login(&registry("myregistry.com/proxy", "user", "pass"), &Credentials::default())
            .unwrap();
        let path = context.auth_file().unwrap().to_path_buf();
        assert!(path.exists());

        let found = credentials_for(&path, "myregistry.com").unwrap();
        assert_eq!(found, Some(credentials("user", "pass")));
        assert_eq!(credentials_for(&path, "other.com").unwrap(), None);

        context.release();
        assert!(!path.exists());
    }

    #[test]
    fn login_fails_without_credentials_for_suse_registry() {
        let login = AuthFileLogin {
            host_credentials: PathBuf::from("/nonexistent/credentials"),
        };
        let err = login
            .login(&registry("registry.suse.com/suse", "", ""), &Credentials::default())
            .unwrap_err();
        assert!(matches!(err, Error::MissingCredentials(_)));
    }

    #[test]
    fn anonymous_login_elsewhere() {
        let login = AuthFileLogin {
            host_credentials: PathBuf::from("/nonexistent/credentials"),
        };
        let context = login
            .login(&registry("registry.opensuse.org/uyuni", "", ""), &Credentials::default())
            .unwrap();
        assert!(context.auth_file().is_none());
    }

    fn stub_podman(dir: &Path, script: &str) -> PodmanRegistry {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("podman");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        PodmanRegistry {
            program: path.display().to_string(),
        }
    }

    fn patched_image() -> ImageReference {
        ImageReference::parse("registry.suse.com/a/sccuser/1234/suse/proxy-httpd:1234-ptf").unwrap()
    }

    #[test]
    fn existing_image() {
        let dir = tempfile::tempdir().unwrap();
        let podman = stub_podman(dir.path(), "echo '{\"schemaVersion\": 2}'");
        assert!(podman.image_exists(&patched_image(), &AuthContext::anonymous()).unwrap());
    }

    #[test]
    fn missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let podman = stub_podman(
            dir.path(),
            "echo 'Error: reading manifest 1234-ptf in registry.suse.com/a/sccuser/1234/suse/proxy-httpd: manifest unknown' >&2\nexit 125",
        );
        assert!(!podman.image_exists(&patched_image(), &AuthContext::anonymous()).unwrap());
    }

    #[test]
    fn unreachable_registry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let podman = stub_podman(
            dir.path(),
            "echo 'Error: pinging container registry registry.suse.com: Get \"https://registry.suse.com/v2/\": dial tcp: connect: connection refused' >&2\nexit 125",
        );
        let err = podman
            .image_exists(&patched_image(), &AuthContext::anonymous())
            .unwrap_err();
        assert!(matches!(err, Error::Command(command::Error::Failed { .. })));

        let podman = stub_podman(dir.path(), "echo 'Error: unauthorized: authentication required' >&2\nexit 125");
        assert!(podman.image_exists(&patched_image(), &AuthContext::anonymous()).is_err());
    }

    #[test]
    fn release_runs_once() {
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        let context = AuthContext::new(None, move || counter.set(counter.get() + 1));
        context.release();
        assert_eq!(count.get(), 1);

        let counter = count.clone();
        {
            let _context = AuthContext::new(None, move || counter.set(counter.get() + 1));
        }
        assert_eq!(count.get(), 2);
    }
}
