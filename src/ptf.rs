use log::{info, warn};
use thiserror::Error;
use crate::image::{ImageReference, ProxyImageSet};
use crate::registry::{self, AuthContext, RegistryClient};

#[derive(Error, Debug)]
pub enum Error {
    #[error("ptf and test flags cannot be set simultaneously")]
    ConflictingPatchKind,

    #[error("ptf and test flags cannot be empty simultaneously")]
    MissingPatchKind,

    #[error("user flag cannot be empty")]
    MissingCustomer,

    #[error("check patched image {image}: {err}")]
    Registry { image: String, err: registry::Error },
}

/// Raw patch flags, validated into a [PatchRequest].
#[derive(Debug, Clone, Default)]
pub struct PatchFlags {
    pub ptf: String,
    pub test: String,
    pub user: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    Ptf,
    Test,
}

impl PatchKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            PatchKind::Ptf => "ptf",
            PatchKind::Test => "test",
        }
    }
}

/// A program temporary fix or test package to deploy.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRequest {
    pub kind: PatchKind,
    pub project_id: String,
    pub customer_id: String,
}

impl TryFrom<&PatchFlags> for PatchRequest {
    type Error = Error;

    fn try_from(flags: &PatchFlags) -> Result<Self, Self::Error> {
        let ptf = flags.ptf.trim();
        let test = flags.test.trim();
        let (kind, project_id) = match (ptf.is_empty(), test.is_empty()) {
            (false, false) => return Err(Error::ConflictingPatchKind),
            (true, true) => return Err(Error::MissingPatchKind),
            (false, true) => (PatchKind::Ptf, ptf),
            (true, false) => (PatchKind::Test, test),
        };

        let customer_id = flags.user.trim();
        if customer_id.is_empty() {
            return Err(Error::MissingCustomer);
        }

        Ok(Self {
            kind,
            project_id: project_id.to_string(),
            customer_id: customer_id.to_string(),
        })
    }
}

impl PatchRequest {
    /// Image of the patched build of `base`.
    ///
    /// Patched images live in a per-customer namespace of the base registry:
    /// `<host>/a/<customer>/<project>/<repository>:<project>-<kind>`.
    /// A base image already coming from a patch namespace is moved to the new one.
    pub fn candidate(&self, base: &ImageReference) -> ImageReference {
        let repository = strip_patch_namespace(&base.repository);
        ImageReference {
            registry_host: base.registry_host.clone(),
            repository: format!("a/{}/{}/{repository}", self.customer_id, self.project_id),
            tag: format!("{}-{}", self.project_id, self.kind.suffix()),
        }
    }
}

fn strip_patch_namespace(repository: &str) -> &str {
    let mut parts = repository.splitn(4, '/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("a"), Some(_), Some(_), Some(rest)) => rest,
        _ => repository,
    }
}

/// Compute the patched image of every service having a base image.
///
/// Only the services whose patched image exists are set in the returned set,
/// the others keep their current image.
pub fn resolve(
    request: &PatchRequest,
    current: &ProxyImageSet,
    client: &dyn RegistryClient,
    auth: &AuthContext,
) -> Result<ProxyImageSet, Error> {
    let mut patched = current.without_images();
    for (role, base) in current.iter() {
        let candidate = request.candidate(base);
        let exists = client.image_exists(&candidate, auth).map_err(|err| Error::Registry {
            image: candidate.to_string(),
            err,
        })?;

        if exists {
            info!("The {role} {} image computed is: {candidate}", request.kind.suffix());
            patched.insert(role, candidate);
        } else {
            warn!("No {} image found for {role}, keeping {base}", request.kind.suffix());
        }
    }
    Ok(patched)
}
