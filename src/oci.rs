use std::time::Duration;
use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use serde::Deserialize;
use crate::image::{ImageReference, PullPolicy};
use crate::registry::{self, AuthContext, Credentials, Error, RegistryClient};

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
    application/vnd.oci.image.manifest.v1+json, \
    application/vnd.docker.distribution.manifest.list.v2+json, \
    application/vnd.docker.distribution.manifest.v2+json";

/// Talks to a registry through the OCI distribution API.
///
/// Used where no container engine is installed, like a host only administering a cluster.
/// Pulling is left to the cluster nodes, so [RegistryClient::prepare] only returns the reference.
pub struct HttpRegistry {
    client: Client,
}

impl HttpRegistry {
    pub fn new() -> Result<Self, Error> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client })
    }

    fn manifest_url(image: &ImageReference) -> String {
        format!(
            "https://{}/v2/{}/manifests/{}",
            image.registry_host, image.repository, image.tag
        )
    }

    fn head(&self, url: &str) -> RequestBuilder {
        self.client.head(url).header(ACCEPT, MANIFEST_ACCEPT)
    }

    /// Fetch a bearer token from the realm announced in a `WWW-Authenticate` challenge.
    fn token(&self, challenge: &Challenge, credentials: Option<&Credentials>) -> Result<Option<String>, Error> {
        let mut request = self.client.get(&challenge.realm);
        let mut query = Vec::new();
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }
        if let Some(scope) = &challenge.scope {
            query.push(("scope", scope.as_str()));
        }
        request = request.query(&query);
        if let Some(credentials) = credentials {
            request = request.basic_auth(&credentials.user, Some(&credentials.password));
        }

        let response = request.send()?;
        if !response.status().is_success() {
            debug!("token request to {} answered {}", challenge.realm, response.status());
            return Ok(None);
        }
        let token: TokenResponse = response.json()?;
        Ok(token.token.or(token.access_token))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Parameters of a `Bearer` authentication challenge.
#[derive(Debug, PartialEq)]
struct Challenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

impl Challenge {
    fn parse(header: &str) -> Option<Self> {
        let params = header.trim().strip_prefix("Bearer ")?;
        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for part in split_params(params) {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match key.trim() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }
        Some(Self {
            realm: realm?,
            service,
            scope,
        })
    }
}

/// Split challenge parameters on commas outside of quoted values.
fn split_params(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (index, c) in params.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(&params[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&params[start..]);
    parts
}

impl RegistryClient for HttpRegistry {
    fn image_exists(&self, image: &ImageReference, auth: &AuthContext) -> Result<bool, Error> {
        let url = Self::manifest_url(image);
        debug!("Checking {url}");
        let response = self.head(&url).send()?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|value| value.to_str().ok())
                .and_then(Challenge::parse);
            let Some(challenge) = challenge else {
                return Ok(false);
            };
            let credentials = match auth.auth_file() {
                Some(file) => registry::credentials_for(file, &image.registry_host)?,
                None => None,
            };
            let Some(token) = self.token(&challenge, credentials.as_ref())? else {
                return Ok(false);
            };
            self.head(&url).bearer_auth(token).send()?
        } else {
            response
        };

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            status => Err(Error::Status {
                status: status.as_u16(),
                image: image.to_string(),
            }),
        }
    }

    fn prepare(
        &self,
        image: &ImageReference,
        _auth: &AuthContext,
        _pull_policy: PullPolicy,
    ) -> Result<ImageReference, Error> {
        Ok(image.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bearer_challenge() {
        let challenge = Challenge::parse(
            r#"Bearer realm="https://registry.suse.com/auth",service="SUSE Linux Docker Registry",scope="repository:a/user/ptf/proxy-httpd:pull,push""#,
        )
        .unwrap();
        assert_eq!(
            challenge,
            Challenge {
                realm: "https://registry.suse.com/auth".to_string(),
                service: Some("SUSE Linux Docker Registry".to_string()),
                scope: Some("repository:a/user/ptf/proxy-httpd:pull,push".to_string()),
            }
        );
    }

    #[test]
    fn basic_challenge_is_ignored() {
        assert_eq!(Challenge::parse(r#"Basic realm="registry""#), None);
        assert_eq!(Challenge::parse(r#"Bearer service="no realm""#), None);
    }

    #[test]
    fn manifest_url() {
        let image = ImageReference::parse("registry.suse.com/a/user/1234/suse/proxy-httpd:1234-ptf").unwrap();
        assert_eq!(
            HttpRegistry::manifest_url(&image),
            "https://registry.suse.com/v2/a/user/1234/suse/proxy-httpd/manifests/1234-ptf"
        );
    }
}
