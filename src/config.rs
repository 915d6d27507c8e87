pub mod file {
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use serde::Deserialize;
    use serde_inline_default::serde_inline_default;
    use thiserror::Error;
    use crate::image::ImageFlags;

    const DEFAULT_CONFIG: &str = include_str!("../default.toml");

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("read {}: {err}", path.display())]
        Read { path: PathBuf, err: std::io::Error },

        #[error("parse {}: {err}", path.display())]
        Parse { path: PathBuf, err: toml::de::Error },

        #[error(transparent)]
        Merge(#[from] toml::de::Error),
    }

    /// A pxy.toml file.
    #[serde_inline_default]
    #[derive(Deserialize, Debug, Clone)]
    pub struct File {
        pub description: Option<String>,
        #[serde(default)]
        pub registry: RegistryConfig,
        #[serde(default)]
        pub tag: String,
        #[serde_inline_default("IfNotPresent".to_string())]
        pub pull_policy: String,
        /// Per-service overrides, keyed by service name (`httpd`, `saltBroker`...).
        #[serde(default)]
        pub images: BTreeMap<String, ImageFlags>,
        #[serde(default)]
        pub tuning: TuningConfig,
        #[serde(default)]
        pub scc: SccConfig,
        #[serde(default)]
        pub podman: PodmanConfig,
        #[serde(default)]
        pub helm: HelmConfig,
    }

    impl Default for File {
        fn default() -> Self {
            // The default config is compiled into the program, so
            // make sure to test default() to catch panics compile-time.
            toml::from_str(DEFAULT_CONFIG).unwrap()
        }
    }

    impl File {
        /// The built-in configuration, with the values of `path` taking precedence.
        pub fn default_with_user_config_file(path: &Path) -> Result<Self, Error> {
            let content = std::fs::read_to_string(path).map_err(|err| Error::Read {
                path: path.to_path_buf(),
                err,
            })?;
            Self::default_with_user_config(&content).map_err(|err| match err {
                Error::Merge(err) => Error::Parse {
                    path: path.to_path_buf(),
                    err,
                },
                err => err,
            })
        }

        fn default_with_user_config(content: &str) -> Result<Self, Error> {
            let mut config: toml::Table = toml::from_str(DEFAULT_CONFIG)?;
            merge(&mut config, toml::from_str(content)?);
            Ok(toml::Value::Table(config).try_into()?)
        }
    }

    /// Recursively override the values of `base` with those of `overlay`.
    fn merge(base: &mut toml::Table, overlay: toml::Table) {
        for (key, value) in overlay {
            match value {
                toml::Value::Table(nested) => match base.get_mut(&key) {
                    Some(toml::Value::Table(existing)) => merge(existing, nested),
                    _ => {
                        base.insert(key, toml::Value::Table(nested));
                    }
                },
                value => {
                    base.insert(key, value);
                }
            }
        }
    }

    #[derive(Deserialize, Debug, Clone, Default)]
    pub struct RegistryConfig {
        #[serde(default)]
        pub host: String,
        #[serde(default)]
        pub user: String,
        #[serde(default)]
        pub password: String,
    }

    #[derive(Deserialize, Debug, Clone, Default)]
    pub struct TuningConfig {
        pub httpd: Option<PathBuf>,
        pub squid: Option<PathBuf>,
    }

    #[derive(Deserialize, Debug, Clone, Default)]
    pub struct SccConfig {
        #[serde(default)]
        pub user: String,
        #[serde(default)]
        pub password: String,
    }

    #[derive(Deserialize, Debug, Clone, Default)]
    pub struct PodmanConfig {
        /// Extra arguments for `podman pod create`.
        #[serde(default)]
        pub args: Vec<String>,
    }

    #[serde_inline_default]
    #[derive(Deserialize, Debug, Clone)]
    pub struct HelmConfig {
        #[serde_inline_default("default".to_string())]
        pub namespace: String,
        #[serde(default)]
        pub chart: String,
        #[serde(default)]
        pub version: String,
        pub values: Option<PathBuf>,
    }

    impl Default for HelmConfig {
        fn default() -> Self {
            Self {
                namespace: "default".to_string(),
                chart: String::new(),
                version: String::new(),
                values: None,
            }
        }
    }

}

pub mod runtime {
    use thiserror::Error;
    use crate::cli::{HelmArgs, ImageArgs, PodmanArgs};
    use crate::deploy::{HelmFlags, KubernetesProxyFlags};
    use crate::image::{self, ImageFlags, ImageSettings, Registry, ServiceRole, Tuning};
    use crate::podman::PodmanProxyFlags;
    use crate::registry::Credentials;
    use crate::unit::PodmanFlags;
    use super::file::File;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error(transparent)]
        Image(#[from] image::Error),
    }

    /// First non-empty value of the command line and the configuration file.
    fn pick(cli: Option<&str>, file: &str) -> String {
        cli.map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(file)
            .to_string()
    }

    /// Image and credentials settings, command line values taking precedence over the file ones.
    #[derive(Debug, Clone)]
    pub struct Config {
        pub images: ImageSettings,
        pub scc: Credentials,
    }

    impl Config {
        pub fn new(file: &File, args: &ImageArgs) -> Result<Self, Error> {
            let registry = Registry {
                host: pick(args.registry.as_deref(), &file.registry.host),
                user: pick(args.registry_user.as_deref(), &file.registry.user),
                password: pick(args.registry_password.as_deref(), &file.registry.password),
            };

            let mut overrides = file
                .images
                .iter()
                .map(|(key, flags)| key.parse::<ServiceRole>().map(|role| (role, flags.clone())))
                .collect::<Result<std::collections::BTreeMap<_, _>, image::Error>>()?;
            for role in ServiceRole::ALL {
                let (name, tag) = args.image(role);
                let current = overrides.remove(&role).unwrap_or_default();
                overrides.insert(
                    role,
                    ImageFlags {
                        name: pick(name, &current.name),
                        tag: pick(tag, &current.tag),
                    },
                );
            }

            let images = ImageSettings {
                registry,
                tag: pick(args.tag.as_deref(), &file.tag),
                pull_policy: pick(args.pull_policy.as_deref(), &file.pull_policy).parse()?,
                overrides,
                tuning: Tuning {
                    httpd: args.httpd_tuning.clone().or_else(|| file.tuning.httpd.clone()),
                    squid: args.squid_tuning.clone().or_else(|| file.tuning.squid.clone()),
                },
            };

            Ok(Self {
                images,
                scc: Credentials {
                    user: pick(args.scc_user.as_deref(), &file.scc.user),
                    password: pick(args.scc_password.as_deref(), &file.scc.password),
                },
            })
        }

        pub fn podman(self, file: &File, args: &PodmanArgs) -> PodmanProxyFlags {
            let mut podman = PodmanFlags {
                args: file.podman.args.clone(),
            };
            podman.args.extend(args.podman_args.iter().cloned());
            PodmanProxyFlags {
                images: self.images,
                scc: self.scc,
                podman,
            }
        }

        pub fn kubernetes(self, file: &File, args: &HelmArgs) -> KubernetesProxyFlags {
            KubernetesProxyFlags {
                images: self.images,
                scc: self.scc,
                helm: helm_flags(file, args),
            }
        }
    }

    pub fn helm_flags(file: &File, args: &HelmArgs) -> HelmFlags {
        HelmFlags {
            namespace: pick(args.helm_namespace.as_deref(), &file.helm.namespace),
            chart: pick(args.helm_chart.as_deref(), &file.helm.chart),
            version: pick(args.helm_version.as_deref(), &file.helm.version),
            values: args.helm_values.clone().or_else(|| file.helm.values.clone()),
        }
    }

}
