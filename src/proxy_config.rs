use std::fs::File;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use flate2::read::GzDecoder;
use log::{debug, info};
use thiserror::Error;
use Error::*;

/// Where the podman containers find the proxy configuration.
pub const CONFIG_DIR: &str = "/etc/uyuni/proxy";

pub const HTTPD_YAML: &str = "httpd.yaml";
pub const SSH_YAML: &str = "ssh.yaml";
pub const CONFIG_YAML: &str = "config.yaml";

/// Files of the configuration generated by the server for a proxy.
pub const REQUIRED_FILES: [&str; 3] = [HTTPD_YAML, SSH_YAML, CONFIG_YAML];

#[derive(Error, Debug)]
pub enum Error {
    #[error("extract {}: {err}", path.display())]
    Extract {
        path: PathBuf,
        err: std::io::Error,
    },

    #[error("missing {0} in the proxy configuration")]
    MissingFile(String),

    #[error("{} must be readable by everyone and only writable by its owner, found mode {mode:o}", path.display())]
    WrongMode { path: PathBuf, mode: u32 },

    #[error("inspect {}: {err}", path.display())]
    Inspect {
        path: PathBuf,
        err: std::io::Error,
    },

    #[error("{}: {err}", path.display())]
    Yaml {
        path: PathBuf,
        err: serde_yaml::Error,
    },
}

/// Extract a proxy configuration tarball, as generated by the server, into `destination`.
pub fn unpack(tarball: &Path, destination: &Path) -> Result<(), Error> {
    info!("Setting up proxy with configuration {}", tarball.display());
    let extract_error = |err| Extract {
        path: tarball.to_path_buf(),
        err,
    };

    std::fs::create_dir_all(destination).map_err(extract_error)?;
    let file = File::open(tarball).map_err(extract_error)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);

    for entry in archive.entries().map_err(extract_error)? {
        let mut entry = entry.map_err(extract_error)?;
        let unpacked = entry.unpack_in(destination).map_err(extract_error)?;
        if !unpacked {
            debug!("Skipped entry outside of {}", destination.display());
        }
    }
    Ok(())
}

/// Names of the required files absent from `dir`.
pub fn missing_files(dir: &Path) -> Vec<&'static str> {
    REQUIRED_FILES
        .into_iter()
        .filter(|file| !dir.join(file).is_file())
        .collect()
}

/// Check an unpacked configuration before deploying it.
///
/// The containers run `config.yaml` as another user, so it has to be readable by all,
/// while nobody but the owner may change it.
pub fn validate(dir: &Path) -> Result<(), Error> {
    if let Some(missing) = missing_files(dir).first() {
        return Err(MissingFile(missing.to_string()));
    }

    for file in REQUIRED_FILES {
        let path = dir.join(file);
        let content = std::fs::read_to_string(&path).map_err(|err| Inspect {
            path: path.clone(),
            err,
        })?;
        serde_yaml::from_str::<serde_yaml::Value>(&content).map_err(|err| Yaml {
            path: path.clone(),
            err,
        })?;
    }

    let path = dir.join(CONFIG_YAML);
    let mode = std::fs::metadata(&path)
        .map_err(|err| Inspect {
            path: path.clone(),
            err,
        })?
        .permissions()
        .mode()
        & 0o777;
    if mode & 0o444 != 0o444 || mode & 0o022 != 0 {
        return Err(WrongMode { path, mode });
    }
    Ok(())
}
