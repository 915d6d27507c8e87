use std::path::{Path, PathBuf};
use std::time::Duration;
use log::{debug, error, info, warn};
use thiserror::Error;
use crate::image::{ImageReference, ImageSettings, ProxyImageSet, ServiceRole};
use crate::kubernetes::{self, Cluster, ClusterInfo, HelmUninstall, HelmUpgrade};
use crate::logs::LogFlags;
use crate::proxy_config::{self, CONFIG_YAML, HTTPD_YAML, SSH_YAML};
use crate::ptf::{self, PatchFlags, PatchRequest};
use crate::registry::{self, Authenticator, Credentials, RegistryClient};

/// Name of the helm release, of the deployment and of its `app` label.
pub const APP: &str = "uyuni-proxy";

/// Secret holding the `httpd.yaml` and `ssh.yaml` values of a deployed proxy.
pub const PROXY_SECRET: &str = "proxy-secret";

/// Config map holding the `config.yaml` values of a deployed proxy.
pub const PROXY_CONFIG_MAP: &str = "proxy-configMap";

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Cluster(#[from] kubernetes::Error),

    #[error("proxy configuration: {0}")]
    Config(#[from] proxy_config::Error),

    #[error("registry: {0}")]
    Registry(#[from] registry::Error),

    #[error(transparent)]
    Patch(#[from] ptf::Error),

    #[error("{file} is neither in the configuration directory nor in the cluster")]
    MissingConfig { file: &'static str },

    #[error("write {}: {err}", path.display())]
    Write { path: PathBuf, err: std::io::Error },

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error("no {APP} deployment found, install the proxy first")]
    NotInstalled,
}

/// Where and what helm chart to deploy.
#[derive(Default, Debug, Clone)]
pub struct HelmFlags {
    pub namespace: String,
    pub chart: String,
    pub version: String,
    /// Values file passed before the generated ones.
    pub values: Option<PathBuf>,
}

/// Everything needed to deploy the proxy on a cluster.
#[derive(Default, Debug, Clone)]
pub struct KubernetesProxyFlags {
    pub images: ImageSettings,
    pub scc: Credentials,
    pub helm: HelmFlags,
}

/// Helm arguments for the proxy chart.
///
/// Services without an image are left to the chart defaults.
pub fn chart_values(
    images: &ProxyImageSet,
    settings: &ImageSettings,
    config_dir: &Path,
    helm: &HelmFlags,
    info: &ClusterInfo,
    pull_secret: Option<&str>,
) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(values) = &helm.values {
        args.push("-f".to_string());
        args.push(values.display().to_string());
    }
    for file in [HTTPD_YAML, SSH_YAML, CONFIG_YAML] {
        args.push("-f".to_string());
        args.push(config_dir.join(file).display().to_string());
    }

    let mut set = |value: String| {
        args.push("--set".to_string());
        args.push(value);
    };
    for (role, image) in images.iter() {
        set(format!("images.{}={image}", role.default_repository()));
    }
    let tag = settings.tag.trim();
    set(format!("repository={}", settings.registry.prefix()));
    set(format!(
        "version={}",
        if tag.is_empty() { crate::image::DEFAULT_TAG } else { tag }
    ));
    set(format!("pullPolicy={}", settings.pull_policy));
    if !info.ingress.is_empty() {
        set(format!("ingress={}", info.ingress));
    }
    if let Some(secret) = pull_secret {
        set(format!("registrySecret={secret}"));
    }
    args
}

/// Whether the proxy deployment has to be scaled up again after an upgrade.
pub fn needs_restore(cluster: &dyn Cluster, namespace: &str) -> Result<bool, kubernetes::Error> {
    Ok(cluster.running_pods(namespace, APP)? == 0)
}

/// Scales the proxy down, and back to one replica when dropped if no pod came back meanwhile.
pub struct ReplicaRestore<'a> {
    cluster: &'a dyn Cluster,
    namespace: String,
}

impl<'a> ReplicaRestore<'a> {
    /// Scale the proxy to zero replicas and wait for its pod to be gone.
    pub fn scale_down(
        cluster: &'a dyn Cluster,
        namespace: &str,
        attempts: u32,
        interval: Duration,
    ) -> Result<Self, kubernetes::Error> {
        info!("Stopping the proxy");
        cluster.scale(namespace, APP, 0)?;
        if let Err(err) = kubernetes::wait_for_no_pods(cluster, namespace, APP, attempts, interval) {
            if let Err(err) = cluster.scale(namespace, APP, 1) {
                error!("failed to scale {APP} back to one replica: {err}");
            }
            return Err(err);
        }
        Ok(Self {
            cluster,
            namespace: namespace.to_string(),
        })
    }
}

impl Drop for ReplicaRestore<'_> {
    fn drop(&mut self) {
        match needs_restore(self.cluster, &self.namespace) {
            Ok(true) => {
                info!("Starting the proxy again");
                if let Err(err) = self.cluster.scale(&self.namespace, APP, 1) {
                    error!("failed to scale {APP} back to one replica: {err}");
                }
            }
            Ok(false) => debug!("{APP} is already running"),
            Err(err) => warn!("cannot check whether {APP} is running: {err}"),
        }
    }
}

/// Deploys the proxy helm chart on a cluster.
pub struct Deployer<'a> {
    pub cluster: &'a dyn Cluster,
    /// Prepended to the ingress manifest paths.
    pub manifests_root: PathBuf,
    pub readiness_attempts: u32,
    pub readiness_interval: Duration,
}

impl<'a> Deployer<'a> {
    pub fn new(cluster: &'a dyn Cluster) -> Self {
        Self {
            cluster,
            manifests_root: PathBuf::from("/"),
            readiness_attempts: 60,
            readiness_interval: Duration::from_secs(1),
        }
    }

    /// Install or upgrade the chart, then wait for the proxy to be ready.
    pub fn deploy(
        &self,
        info: &ClusterInfo,
        images: &ProxyImageSet,
        flags: &KubernetesProxyFlags,
        config_dir: &Path,
        pull_secret: Option<&str>,
    ) -> Result<(), Error> {
        info!("Installing Uyuni proxy");
        let upgrade = HelmUpgrade {
            kubeconfig: info.kubeconfig.clone(),
            namespace: flags.helm.namespace.clone(),
            install: true,
            name: APP.to_string(),
            chart: flags.helm.chart.clone(),
            version: flags.helm.version.clone(),
            args: chart_values(images, &flags.images, config_dir, &flags.helm, info, pull_secret),
        };
        self.cluster.helm_upgrade(&upgrade)?;

        kubernetes::wait_for_deployment(
            self.cluster,
            &flags.helm.namespace,
            APP,
            self.readiness_attempts,
            self.readiness_interval,
        )?;
        Ok(())
    }

    /// Install the proxy from the configuration tarball generated by the server.
    pub fn install(&self, flags: &KubernetesProxyFlags, config_tarball: &Path) -> Result<(), Error> {
        let info = ClusterInfo::check(self.cluster)?;

        let config_dir = tempfile::Builder::new().prefix("pxy-").tempdir()?;
        proxy_config::unpack(config_tarball, config_dir.path())?;
        proxy_config::validate(config_dir.path())?;

        info.flavor
            .install_ingress_config(self.cluster, &self.manifests_root, &flags.helm.namespace)?;

        let images = ProxyImageSet::resolve(&flags.images);
        self.deploy(&info, &images, flags, config_dir.path(), None)
    }

    /// Upgrade the proxy to the images computed from the flags.
    ///
    /// The configuration files missing from `config_dir` are read from the deployed proxy.
    pub fn upgrade(&self, flags: &KubernetesProxyFlags, config_dir: Option<&Path>) -> Result<(), Error> {
        let images = ProxyImageSet::resolve(&flags.images);
        self.upgrade_to(flags, &images, config_dir)
    }

    /// Replace the deployed images by their patched builds, where one exists.
    pub fn ptf(
        &self,
        flags: &KubernetesProxyFlags,
        patch: &PatchFlags,
        registry: &dyn RegistryClient,
        authenticator: &dyn Authenticator,
        config_dir: Option<&Path>,
    ) -> Result<(), Error> {
        let request = PatchRequest::try_from(patch)?;

        let auth = authenticator.login(&flags.images.registry, &flags.scc)?;
        let mut images = self.deployed_images(flags)?;
        let patched = ptf::resolve(&request, &images, registry, &auth)?;
        auth.release();

        if patched.is_empty() {
            warn!("No patched image found, keeping the current images");
        }
        images.overlay(&patched);
        self.upgrade_to(flags, &images, config_dir)
    }

    pub fn start(&self, namespace: &str) -> Result<(), Error> {
        if needs_restore(self.cluster, namespace)? {
            self.cluster.scale(namespace, APP, 1)?;
        } else {
            debug!("{APP} is already running");
        }
        Ok(())
    }

    /// Scale the proxy to zero replicas, returning once its pod is gone.
    pub fn stop(&self, namespace: &str) -> Result<(), Error> {
        self.cluster.scale(namespace, APP, 0)?;
        kubernetes::wait_for_no_pods(
            self.cluster,
            namespace,
            APP,
            self.readiness_attempts,
            self.readiness_interval,
        )?;
        Ok(())
    }

    pub fn restart(&self, namespace: &str) -> Result<(), Error> {
        self.stop(namespace)?;
        self.start(namespace)
    }

    /// Uninstall the proxy chart and the ingress configuration written at install time.
    ///
    /// With `dry_run`, only log what would be done.
    pub fn uninstall(&self, dry_run: bool) -> Result<(), Error> {
        let info = ClusterInfo::check(self.cluster)?;
        match self.cluster.deployment_namespace(APP)? {
            Some(namespace) => {
                let uninstall = HelmUninstall {
                    kubeconfig: info.kubeconfig.clone(),
                    namespace,
                    name: APP.to_string(),
                };
                if dry_run {
                    info!("Would run helm {}", uninstall.command_args().join(" "));
                } else {
                    self.cluster.helm_uninstall(&uninstall)?;
                }
            }
            None => info!("No {APP} deployment found, skipping the chart removal"),
        }

        info.flavor
            .uninstall_ingress_config(self.cluster, &self.manifests_root, dry_run)?;
        Ok(())
    }

    /// Print the logs of a proxy pod, of all its containers unless `container` is set.
    pub fn logs(
        &self,
        namespace: &str,
        flags: &LogFlags,
        pod: Option<&str>,
        container: Option<&str>,
    ) -> Result<(), Error> {
        let pod = match pod {
            Some(pod) => pod.to_string(),
            None => self.cluster.pod_name(namespace, APP)?.ok_or(Error::NotInstalled)?,
        };
        self.cluster.logs(&flags.kubectl_args(namespace, &pod, container))?;
        Ok(())
    }

    /// Number of running proxy pods.
    pub fn status(&self, namespace: &str) -> Result<usize, Error> {
        Ok(self.cluster.running_pods(namespace, APP)?)
    }

    fn upgrade_to(
        &self,
        flags: &KubernetesProxyFlags,
        images: &ProxyImageSet,
        config_dir: Option<&Path>,
    ) -> Result<(), Error> {
        let info = ClusterInfo::check(self.cluster)?;
        let namespace = &flags.helm.namespace;

        let temp_dir;
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => {
                temp_dir = tempfile::Builder::new().prefix("pxy-").tempdir()?;
                temp_dir.path()
            }
        };
        self.fetch_missing_config(namespace, config_dir)?;

        let pull_secret = self.cluster.image_pull_secret(namespace, APP)?;

        let _restore =
            ReplicaRestore::scale_down(self.cluster, namespace, self.readiness_attempts, self.readiness_interval)?;
        self.deploy(&info, images, flags, config_dir, pull_secret.as_deref())
    }

    /// Write the configuration files absent from `config_dir` from the ones of the deployed proxy.
    fn fetch_missing_config(&self, namespace: &str, config_dir: &Path) -> Result<(), Error> {
        for file in proxy_config::missing_files(config_dir) {
            debug!("Reading {file} from the cluster");
            let value = if file == CONFIG_YAML {
                self.cluster.config_map_value(namespace, PROXY_CONFIG_MAP, file)?
            } else {
                self.cluster.secret_value(namespace, PROXY_SECRET, file)?
            };
            let value = value.ok_or(Error::MissingConfig { file })?;
            let path = config_dir.join(file);
            std::fs::write(&path, value).map_err(|err| Error::Write { path, err })?;
        }
        Ok(())
    }

    /// Images of the containers of the proxy deployment.
    fn deployed_images(&self, flags: &KubernetesProxyFlags) -> Result<ProxyImageSet, Error> {
        let mut images = ProxyImageSet::empty(&flags.images);
        for image in self.cluster.deployment_images(&flags.helm.namespace, APP)? {
            let role = ImageReference::parse(&image)
                .and_then(|reference| Some((ServiceRole::from_repository(&reference.repository)?, reference)));
            match role {
                Some((role, reference)) => images.insert(role, reference),
                None => debug!("Ignoring container image {image}"),
            }
        }
        if images.is_empty() {
            return Err(Error::NotInstalled);
        }
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::BTreeMap;
    use super::*;
    use crate::image::{PullPolicy, Registry};
    use crate::kubernetes::fake::FakeCluster;
    use crate::kubernetes::ClusterFlavor;
    use crate::registry::fake::{FakeAuthenticator, FakeRegistry};

    fn flags() -> KubernetesProxyFlags {
        KubernetesProxyFlags {
            images: ImageSettings {
                registry: Registry {
                    host: "registry.opensuse.org/uyuni".to_string(),
                    ..Default::default()
                },
                tag: "2025.10".to_string(),
                pull_policy: PullPolicy::Always,
                ..Default::default()
            },
            helm: HelmFlags {
                namespace: "uyuni".to_string(),
                chart: "oci://registry.opensuse.org/uyuni/proxy-helm".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn deployer(cluster: &FakeCluster) -> Deployer<'_> {
        Deployer {
            readiness_interval: Duration::ZERO,
            ..Deployer::new(cluster)
        }
    }

    fn cluster_with_config() -> FakeCluster {
        FakeCluster {
            secrets: BTreeMap::from([
                ("proxy-secret/httpd.yaml".to_string(), "httpd:\n  system_id: abc\n".to_string()),
                ("proxy-secret/ssh.yaml".to_string(), "ssh: {}\n".to_string()),
            ]),
            config_maps: BTreeMap::from([(
                "proxy-configMap/config.yaml".to_string(),
                "server: server.example.com\n".to_string(),
            )]),
            ..Default::default()
        }
    }

    fn info() -> ClusterInfo {
        ClusterInfo {
            flavor: ClusterFlavor::Generic,
            ingress: "traefik".to_string(),
            kubeconfig: None,
        }
    }

    #[test]
    fn values_carry_images_and_cluster_settings() {
        let flags = flags();
        let images = ProxyImageSet::resolve(&flags.images);
        let args = chart_values(&images, &flags.images, Path::new("/tmp/config"), &flags.helm, &info(), Some("scc-secret"))
            .join(" ");

        assert!(args.starts_with("-f /tmp/config/httpd.yaml -f /tmp/config/ssh.yaml -f /tmp/config/config.yaml"));
        assert!(args.contains("--set images.proxy-httpd=registry.opensuse.org/uyuni/proxy-httpd:2025.10"));
        assert!(args.contains("--set images.proxy-salt-broker=registry.opensuse.org/uyuni/proxy-salt-broker:2025.10"));
        assert!(args.contains("--set repository=registry.opensuse.org/uyuni"));
        assert!(args.contains("--set version=2025.10"));
        assert!(args.contains("--set pullPolicy=Always"));
        assert!(args.contains("--set ingress=traefik"));
        assert!(args.ends_with("--set registrySecret=scc-secret"));
    }

    #[test]
    fn user_values_come_first() {
        let mut flags = flags();
        flags.helm.values = Some(PathBuf::from("/root/values.yaml"));
        let images = ProxyImageSet::empty(&flags.images);
        let args = chart_values(&images, &flags.images, Path::new("/cfg"), &flags.helm, &info(), None);
        assert_eq!(args[..2], ["-f".to_string(), "/root/values.yaml".to_string()]);
        assert!(!args.iter().any(|arg| arg.starts_with("images.")));
        assert!(!args.iter().any(|arg| arg.starts_with("registrySecret")));
    }

    #[test]
    fn upgrade_with_running_replica_skips_scale_up() {
        let cluster = FakeCluster {
            helm_starts_pod: true,
            ..cluster_with_config()
        };
        cluster.running_pods.set(1);

        deployer(&cluster).upgrade(&flags(), None).unwrap();

        assert_eq!(cluster.calls(), vec!["scale uyuni-proxy 0", "helm uyuni-proxy"]);
        let upgrade = &cluster.upgrades.borrow()[0];
        assert!(upgrade.install);
        assert_eq!(upgrade.namespace, "uyuni");
    }

    #[test]
    fn upgrade_restores_replica() {
        let cluster = cluster_with_config();

        deployer(&cluster).upgrade(&flags(), None).unwrap();

        assert_eq!(
            cluster.calls(),
            vec!["scale uyuni-proxy 0", "helm uyuni-proxy", "scale uyuni-proxy 1"]
        );
    }

    #[test]
    fn failed_chart_upgrade_still_restores_replica() {
        let cluster = FakeCluster {
            fail_helm: true,
            ..cluster_with_config()
        };

        let err = deployer(&cluster).upgrade(&flags(), None).unwrap_err();

        assert!(matches!(err, Error::Cluster(_)));
        assert_eq!(
            cluster.calls(),
            vec!["scale uyuni-proxy 0", "helm uyuni-proxy", "scale uyuni-proxy 1"]
        );
    }

    #[test]
    fn only_missing_config_is_fetched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(HTTPD_YAML), "httpd:\n  system_id: local\n").unwrap();
        let cluster = cluster_with_config();
        cluster.running_pods.set(1);

        deployer(&cluster).upgrade(&flags(), Some(dir.path())).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join(HTTPD_YAML)).unwrap(),
            "httpd:\n  system_id: local\n"
        );
        assert_eq!(std::fs::read_to_string(dir.path().join(SSH_YAML)).unwrap(), "ssh: {}\n");
        assert_eq!(
            std::fs::read_to_string(dir.path().join(CONFIG_YAML)).unwrap(),
            "server: server.example.com\n"
        );
    }

    #[test]
    fn missing_cluster_config_fails_before_scaling() {
        let cluster = FakeCluster::default();
        let err = deployer(&cluster).upgrade(&flags(), None).unwrap_err();
        assert!(matches!(err, Error::MissingConfig { .. }));
        assert!(cluster.calls().is_empty());
    }

    #[test]
    fn pull_secret_is_forwarded() {
        let cluster = FakeCluster {
            pull_secret: Some("scc-credentials".to_string()),
            ..cluster_with_config()
        };
        cluster.running_pods.set(1);

        deployer(&cluster).upgrade(&flags(), None).unwrap();

        let upgrade = &cluster.upgrades.borrow()[0];
        assert!(upgrade.args.contains(&"registrySecret=scc-credentials".to_string()));
    }

    #[test]
    fn ptf_overlays_patched_images() {
        let cluster = FakeCluster {
            images: ServiceRole::ALL
                .iter()
                .map(|role| format!("registry.suse.com/suse/multi-linux-manager/5.1/x86_64/proxy-{role}:5.1.0"))
                .collect(),
            ..cluster_with_config()
        };
        cluster.running_pods.set(1);
        let registry = FakeRegistry::with(Some("/proxy-squid:"));
        let authenticator = FakeAuthenticator::default();
        let patch = PatchFlags {
            test: "77".to_string(),
            user: "sccuser".to_string(),
            ..Default::default()
        };

        deployer(&cluster)
            .ptf(&flags(), &patch, &registry, &authenticator, None)
            .unwrap();

        let args = cluster.upgrades.borrow()[0].args.join(" ");
        assert!(args.contains(
            "images.proxy-squid=registry.suse.com/a/sccuser/77/suse/multi-linux-manager/5.1/x86_64/proxy-squid:77-test"
        ));
        assert!(args.contains("images.proxy-httpd=registry.suse.com/suse/multi-linux-manager/5.1/x86_64/proxy-httpd:5.1.0"));
        assert_eq!(authenticator.released.get(), 1);
    }

    #[test]
    fn ptf_without_deployment() {
        let cluster = cluster_with_config();
        let patch = PatchFlags {
            ptf: "77".to_string(),
            user: "sccuser".to_string(),
            ..Default::default()
        };
        let err = deployer(&cluster)
            .ptf(&flags(), &patch, &FakeRegistry::default(), &FakeAuthenticator::default(), None)
            .unwrap_err();
        assert!(matches!(err, Error::NotInstalled));
        assert!(cluster.calls().is_empty());
    }

    #[test]
    fn start_only_scales_when_nothing_runs() {
        let cluster = FakeCluster::default();
        let deployer = deployer(&cluster);
        deployer.start("uyuni").unwrap();
        cluster.running_pods.set(1);
        deployer.start("uyuni").unwrap();
        deployer.stop("uyuni").unwrap();
        assert_eq!(cluster.calls(), vec!["scale uyuni-proxy 1", "scale uyuni-proxy 0"]);
        assert_eq!(deployer.status("uyuni").unwrap(), 0);
    }

    #[test]
    fn restart_waits_for_terminating_pod() {
        let cluster = FakeCluster {
            terminating_polls: Cell::new(3),
            ..Default::default()
        };
        cluster.running_pods.set(1);

        deployer(&cluster).restart("uyuni").unwrap();

        assert_eq!(cluster.calls(), vec!["scale uyuni-proxy 0", "scale uyuni-proxy 1"]);
        assert_eq!(deployer(&cluster).status("uyuni").unwrap(), 1);
    }

    #[test]
    fn upgrade_waits_for_terminating_pod() {
        let cluster = FakeCluster {
            terminating_polls: Cell::new(2),
            ..cluster_with_config()
        };
        cluster.running_pods.set(1);

        deployer(&cluster).upgrade(&flags(), None).unwrap();

        assert_eq!(
            cluster.calls(),
            vec!["scale uyuni-proxy 0", "helm uyuni-proxy", "scale uyuni-proxy 1"]
        );
    }

    #[test]
    fn stuck_pod_fails_the_upgrade_and_restores_replica() {
        let cluster = FakeCluster {
            terminating_polls: Cell::new(u32::MAX),
            ..cluster_with_config()
        };
        cluster.running_pods.set(1);
        let deployer = Deployer {
            readiness_attempts: 3,
            ..deployer(&cluster)
        };

        let err = deployer.upgrade(&flags(), None).unwrap_err();

        assert!(matches!(err, Error::Cluster(kubernetes::Error::Timeout(_))));
        assert_eq!(cluster.calls(), vec!["scale uyuni-proxy 0", "scale uyuni-proxy 1"]);
    }

    #[test]
    fn k3s_uninstall_removes_chart_and_traefik_config() {
        let root = tempfile::tempdir().unwrap();
        let traefik = root.path().join("var/lib/rancher/k3s/server/manifests/uyuni-traefik-config.yaml");
        std::fs::create_dir_all(traefik.parent().unwrap()).unwrap();
        std::fs::write(&traefik, "kind: HelmChartConfig\n").unwrap();
        let cluster = FakeCluster {
            kubelet_version: "v1.30.4+k3s1".to_string(),
            deployed_namespace: Some("uyuni".to_string()),
            ..Default::default()
        };
        let deployer = Deployer {
            manifests_root: root.path().to_path_buf(),
            ..deployer(&cluster)
        };

        deployer.uninstall(true).unwrap();
        assert!(cluster.calls().is_empty());
        assert!(traefik.exists());

        deployer.uninstall(false).unwrap();
        assert_eq!(cluster.calls(), vec!["helm uninstall uyuni-proxy"]);
        assert!(!traefik.exists());
    }

    #[test]
    fn uninstall_without_deployment() {
        let cluster = FakeCluster::default();
        deployer(&cluster).uninstall(false).unwrap();
        assert!(cluster.calls().is_empty());
    }

    #[test]
    fn logs_of_the_proxy_pod() {
        let cluster = FakeCluster {
            pod: Some("uyuni-proxy-7d9".to_string()),
            ..Default::default()
        };
        let deployer = deployer(&cluster);
        let flags = LogFlags {
            tail: Some(10),
            ..Default::default()
        };

        deployer.logs("uyuni", &flags, None, None).unwrap();
        deployer.logs("uyuni", &flags, Some("uyuni-proxy-abc"), Some("squid")).unwrap();

        assert_eq!(
            cluster.calls(),
            vec![
                "logs -n uyuni --tail=10 uyuni-proxy-7d9 --all-containers",
                "logs -n uyuni --tail=10 uyuni-proxy-abc -c squid",
            ]
        );

        let cluster = FakeCluster::default();
        let err = Deployer::new(&cluster)
            .logs("uyuni", &flags, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::NotInstalled));
    }

    #[test]
    fn k3s_install_writes_traefik_config() {
        let root = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let tarball = source.path().join("config.tar.gz");
        {
            use std::os::unix::fs::PermissionsExt;
            let files = source.path().join("files");
            std::fs::create_dir(&files).unwrap();
            for (name, content) in [
                (HTTPD_YAML, "httpd: {}\n"),
                (SSH_YAML, "ssh: {}\n"),
                (CONFIG_YAML, "server: server.example.com\n"),
            ] {
                std::fs::write(files.join(name), content).unwrap();
                std::fs::set_permissions(files.join(name), std::fs::Permissions::from_mode(0o644)).unwrap();
            }
            let encoder = flate2::write::GzEncoder::new(
                std::fs::File::create(&tarball).unwrap(),
                flate2::Compression::default(),
            );
            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all(".", &files).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let cluster = FakeCluster {
            kubelet_version: "v1.30.4+k3s1".to_string(),
            ..Default::default()
        };
        let deployer = Deployer {
            manifests_root: root.path().to_path_buf(),
            ..deployer(&cluster)
        };
        deployer.install(&flags(), &tarball).unwrap();

        assert!(root
            .path()
            .join("var/lib/rancher/k3s/server/manifests/uyuni-traefik-config.yaml")
            .exists());
        assert_eq!(cluster.calls(), vec!["helm uyuni-proxy"]);
    }
}
