use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::command;
use crate::unit::{PortMap, TCP_PORTS, UDP_PORTS};

/// Manifest configuring the traefik ingress bundled with k3s.
pub const K3S_TRAEFIK_CONFIG: &str = "/var/lib/rancher/k3s/server/manifests/uyuni-traefik-config.yaml";

/// Manifest configuring the nginx ingress bundled with rke2.
pub const RKE2_NGINX_CONFIG: &str = "/var/lib/rancher/rke2/server/manifests/uyuni-ingress-nginx-config.yaml";

const K3S_KUBECONFIG: &str = "/etc/rancher/k3s/k3s.yaml";

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Command(#[from] command::Error),

    #[error("decode {name}: {err}")]
    Decode { name: String, err: base64::DecodeError },

    #[error("parse kubectl output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("generate ingress configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("write {}: {err}", path.display())]
    Write { path: PathBuf, err: std::io::Error },

    #[error("remove {}: {err}", path.display())]
    Remove { path: PathBuf, err: std::io::Error },

    #[error("timed out waiting for {0}")]
    Timeout(String),
}

/// Kubernetes distributions needing dedicated ingress configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterFlavor {
    Generic,
    K3s,
    Rke2,
}

impl ClusterFlavor {
    pub fn detect(kubelet_version: &str) -> Self {
        if kubelet_version.contains("k3s") {
            ClusterFlavor::K3s
        } else if kubelet_version.contains("rke2") {
            ClusterFlavor::Rke2
        } else {
            ClusterFlavor::Generic
        }
    }

    /// Kubeconfig to pass to helm when the user has none.
    ///
    /// Only k3s has a well known one, rke2 users need to set theirs for kubectl to work anyway.
    pub fn default_kubeconfig(&self) -> Option<PathBuf> {
        if *self != ClusterFlavor::K3s {
            return None;
        }
        let user_config = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".kube/config"))
            .is_some_and(|path| path.exists());
        if std::env::var_os("KUBECONFIG").is_none() || !user_config {
            Some(PathBuf::from(K3S_KUBECONFIG))
        } else {
            None
        }
    }

    /// Expose the proxy ports through the ingress controller shipped with the distribution.
    ///
    /// `root` is prepended to the manifest paths.
    pub fn install_ingress_config(&self, cluster: &dyn Cluster, root: &Path, namespace: &str) -> Result<(), Error> {
        match self {
            ClusterFlavor::Generic => {
                info!("Make sure the ingress controller exposes the proxy TCP and UDP ports");
                Ok(())
            }
            ClusterFlavor::K3s => {
                info!("Installing K3s Traefik configuration");
                write_manifest(&root.join(relative(K3S_TRAEFIK_CONFIG)), &traefik_config()?)?;
                wait_for_traefik(cluster, 120, Duration::from_secs(1))
            }
            ClusterFlavor::Rke2 => {
                info!("Installing RKE2 ingress-nginx configuration");
                write_manifest(&root.join(relative(RKE2_NGINX_CONFIG)), &nginx_config(namespace)?)
            }
        }
    }

    /// Remove the ingress configuration written at install time.
    ///
    /// k3s gets an empty configuration first, for traefik to be reinstalled with its defaults.
    pub fn uninstall_ingress_config(&self, cluster: &dyn Cluster, root: &Path, dry_run: bool) -> Result<(), Error> {
        let path = match self {
            ClusterFlavor::Generic => return Ok(()),
            ClusterFlavor::K3s => root.join(relative(K3S_TRAEFIK_CONFIG)),
            ClusterFlavor::Rke2 => root.join(relative(RKE2_NGINX_CONFIG)),
        };
        if !path.exists() {
            debug!("No {} to remove", path.display());
            return Ok(());
        }
        if dry_run {
            info!("Would remove {}", path.display());
            return Ok(());
        }

        if *self == ClusterFlavor::K3s {
            info!("Reinstalling Traefik without additional configuration");
            write_manifest(&path, "")?;
            if let Err(err) = wait_for_traefik(cluster, 120, Duration::from_secs(1)) {
                warn!("Traefik may still have the proxy ports: {err}");
            }
        }
        info!("Removing {}", path.display());
        std::fs::remove_file(&path).map_err(|err| Error::Remove { path, err })
    }
}

fn relative(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn write_manifest(path: &Path, content: &str) -> Result<(), Error> {
    let to_error = |err| Error::Write { path: path.to_path_buf(), err };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(to_error)?;
    }
    debug!("Writing {}", path.display());
    std::fs::write(path, content).map_err(to_error)
}

/// Snapshot of the cluster, taken once per operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterInfo {
    pub flavor: ClusterFlavor,
    /// `traefik`, `nginx` or empty when unknown.
    pub ingress: String,
    pub kubeconfig: Option<PathBuf>,
}

impl ClusterInfo {
    pub fn check(cluster: &dyn Cluster) -> Result<Self, Error> {
        let version = cluster.kubelet_version()?;
        let flavor = ClusterFlavor::detect(&version);
        let ingress = cluster.ingress()?;
        debug!("Kubelet version {version}, {flavor:?} cluster with ingress '{ingress}'");
        Ok(Self {
            flavor,
            ingress,
            kubeconfig: flavor.default_kubeconfig(),
        })
    }
}

/// A `helm upgrade` invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HelmUpgrade {
    pub kubeconfig: Option<PathBuf>,
    pub namespace: String,
    pub install: bool,
    pub name: String,
    pub chart: String,
    pub version: String,
    pub args: Vec<String>,
}

impl HelmUpgrade {
    pub fn command_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "upgrade".into(),
            "-n".into(),
            self.namespace.clone(),
            "--create-namespace".into(),
            self.name.clone(),
            self.chart.clone(),
        ];
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push("--kubeconfig".into());
            args.push(kubeconfig.display().to_string());
        }
        if !self.version.is_empty() {
            args.push("--version".into());
            args.push(self.version.clone());
        }
        if self.install {
            args.push("--install".into());
        }
        args.extend(self.args.iter().cloned());
        args
    }
}

/// A `helm uninstall` invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HelmUninstall {
    pub kubeconfig: Option<PathBuf>,
    pub namespace: String,
    pub name: String,
}

impl HelmUninstall {
    pub fn command_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        args.extend(["uninstall".to_string(), "-n".to_string(), self.namespace.clone(), self.name.clone()]);
        args
    }
}

/// Cluster operations needed to deploy the proxy.
pub trait Cluster {
    fn kubelet_version(&self) -> Result<String, Error>;

    /// Name of the detected ingress controller, empty if none is recognized.
    fn ingress(&self) -> Result<String, Error>;

    /// Decoded value of a secret key.
    fn secret_value(&self, namespace: &str, secret: &str, key: &str) -> Result<Option<String>, Error>;

    fn config_map_value(&self, namespace: &str, config_map: &str, key: &str) -> Result<Option<String>, Error>;

    fn scale(&self, namespace: &str, deployment: &str, replicas: u32) -> Result<(), Error>;

    /// Number of running pods of an app.
    fn running_pods(&self, namespace: &str, app: &str) -> Result<usize, Error>;

    fn ready_replicas(&self, namespace: &str, deployment: &str) -> Result<u32, Error>;

    fn image_pull_secret(&self, namespace: &str, deployment: &str) -> Result<Option<String>, Error>;

    fn deployment_images(&self, namespace: &str, deployment: &str) -> Result<Vec<String>, Error>;

    fn helm_upgrade(&self, upgrade: &HelmUpgrade) -> Result<(), Error>;

    fn helm_uninstall(&self, uninstall: &HelmUninstall) -> Result<(), Error>;

    /// Namespace of the deployment, looked up in every namespace.
    fn deployment_namespace(&self, deployment: &str) -> Result<Option<String>, Error>;

    /// Name of one of the pods of an app.
    fn pod_name(&self, namespace: &str, app: &str) -> Result<Option<String>, Error>;

    /// Print the output of `kubectl` run with `args`.
    fn logs(&self, args: &[String]) -> Result<(), Error>;

    /// When the k3s job reinstalling traefik last completed.
    fn traefik_completion_time(&self) -> Result<Option<DateTime<Utc>>, Error>;
}

/// Wait for a deployment to have a ready replica.
pub fn wait_for_deployment(
    cluster: &dyn Cluster,
    namespace: &str,
    deployment: &str,
    attempts: u32,
    interval: Duration,
) -> Result<(), Error> {
    info!("Waiting for {deployment} deployment to be ready in {namespace} namespace");
    for _ in 0..attempts {
        match cluster.ready_replicas(namespace, deployment) {
            Ok(ready) if ready > 0 => return Ok(()),
            Ok(_) => debug!("{deployment} not ready yet"),
            Err(err) => debug!("{deployment} readiness: {err}"),
        }
        std::thread::sleep(interval);
    }
    Err(Error::Timeout(format!("{deployment} deployment")))
}

/// Wait for the pods of an app to be gone.
///
/// A terminating pod still reports the `Running` phase until its containers are stopped.
pub fn wait_for_no_pods(
    cluster: &dyn Cluster,
    namespace: &str,
    app: &str,
    attempts: u32,
    interval: Duration,
) -> Result<(), Error> {
    debug!("Waiting for {app} pods to terminate in {namespace} namespace");
    for _ in 0..attempts {
        match cluster.running_pods(namespace, app) {
            Ok(0) => return Ok(()),
            Ok(count) => debug!("{count} {app} pod(s) still running"),
            Err(err) => debug!("{app} pods: {err}"),
        }
        std::thread::sleep(interval);
    }
    Err(Error::Timeout(format!("{app} pods to terminate")))
}

/// Wait for the traefik reinstallation triggered by a configuration change to complete.
pub fn wait_for_traefik(cluster: &dyn Cluster, attempts: u32, interval: Duration) -> Result<(), Error> {
    info!("Waiting for Traefik to be reloaded");
    for _ in 0..attempts {
        if let Ok(Some(completion)) = cluster.traefik_completion_time() {
            if (Utc::now() - completion).num_seconds() < 60 {
                return Ok(());
            }
        }
        std::thread::sleep(interval);
    }
    Err(Error::Timeout("Traefik reload".to_string()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HelmChartConfig {
    api_version: &'static str,
    kind: &'static str,
    metadata: Metadata,
    spec: HelmChartConfigSpec,
}

#[derive(Serialize)]
struct Metadata {
    name: &'static str,
    namespace: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HelmChartConfigSpec {
    values_content: String,
}

impl HelmChartConfig {
    fn new(name: &'static str, values_content: String) -> Self {
        Self {
            api_version: "helm.cattle.io/v1",
            kind: "HelmChartConfig",
            metadata: Metadata {
                name,
                namespace: "kube-system",
            },
            spec: HelmChartConfigSpec { values_content },
        }
    }
}

/// Ports going through the ingress rather than the HTTP routes.
fn ingress_ports() -> impl Iterator<Item = &'static PortMap> {
    TCP_PORTS
        .iter()
        .filter(|port| port.exposed != 80 && port.exposed != 443)
        .chain(UDP_PORTS.iter())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TraefikPort {
    port: u16,
    expose: TraefikExpose,
    exposed_port: u16,
    protocol: String,
}

#[derive(Serialize)]
struct TraefikExpose {
    default: bool,
}

fn traefik_config() -> Result<String, Error> {
    let ports: BTreeMap<String, TraefikPort> = ingress_ports()
        .map(|port| {
            (
                format!("uyuni-{}", port.name),
                TraefikPort {
                    port: port.exposed,
                    expose: TraefikExpose { default: true },
                    exposed_port: port.exposed,
                    protocol: port.protocol.unwrap_or("tcp").to_uppercase(),
                },
            )
        })
        .collect();
    let values = serde_yaml::to_string(&BTreeMap::from([("ports", ports)]))?;
    Ok(serde_yaml::to_string(&HelmChartConfig::new("traefik", values))?)
}

fn nginx_config(namespace: &str) -> Result<String, Error> {
    let mut tcp = BTreeMap::new();
    let mut udp = BTreeMap::new();
    for port in ingress_ports() {
        match port.protocol {
            Some("udp") => udp.insert(
                port.exposed.to_string(),
                format!("{namespace}/uyuni-proxy-udp:{}", port.exposed),
            ),
            _ => tcp.insert(
                port.exposed.to_string(),
                format!("{namespace}/uyuni-proxy-tcp:{}", port.exposed),
            ),
        };
    }
    let values = serde_yaml::to_string(&BTreeMap::from([("tcp", tcp), ("udp", udp)]))?;
    Ok(serde_yaml::to_string(&HelmChartConfig::new("rke2-ingress-nginx", values))?)
}

/// [Cluster] reached through the `kubectl` and `helm` command lines.
#[derive(Default)]
pub struct Kubectl;

#[derive(Deserialize)]
struct DataResource {
    #[serde(default)]
    data: BTreeMap<String, String>,
}

impl Kubectl {
    fn get_data(&self, kind: &str, namespace: &str, name: &str) -> Result<BTreeMap<String, String>, Error> {
        let out = command::output("kubectl", ["get", kind, name, "-n", namespace, "-o", "json"])?;
        Ok(serde_json::from_str::<DataResource>(&out)?.data)
    }

    fn jsonpath(&self, args: &[&str], path: &str) -> Result<String, Error> {
        let jsonpath = format!("jsonpath={path}");
        let mut command = args.to_vec();
        command.push("-o");
        command.push(&jsonpath);
        Ok(command::output("kubectl", command)?)
    }
}

impl Cluster for Kubectl {
    fn kubelet_version(&self) -> Result<String, Error> {
        self.jsonpath(&["get", "node"], "{.items[0].status.nodeInfo.kubeletVersion}")
    }

    fn ingress(&self) -> Result<String, Error> {
        if command::succeeds("kubectl", ["explain", "ingressroutetcp"])? {
            return Ok("traefik".to_string());
        }
        debug!("No ingressroutetcp resource deployed");

        // No common way to find out other than looking for the controller command
        let commands = self.jsonpath(
            &["get", "pod", "-A"],
            "{range .items[*]}{.spec.containers[*].args[0]}{.spec.containers[*].command}{end}",
        )?;
        if commands.contains("/nginx-ingress-controller") {
            return Ok("nginx".to_string());
        }
        Ok(String::new())
    }

    fn secret_value(&self, namespace: &str, secret: &str, key: &str) -> Result<Option<String>, Error> {
        let Some(encoded) = self.get_data("secret", namespace, secret)?.remove(key) else {
            return Ok(None);
        };
        let decoded = STANDARD.decode(encoded.trim()).map_err(|err| Error::Decode {
            name: format!("{secret}/{key}"),
            err,
        })?;
        Ok(Some(String::from_utf8_lossy(&decoded).into_owned()))
    }

    fn config_map_value(&self, namespace: &str, config_map: &str, key: &str) -> Result<Option<String>, Error> {
        Ok(self.get_data("configMap", namespace, config_map)?.remove(key))
    }

    fn scale(&self, namespace: &str, deployment: &str, replicas: u32) -> Result<(), Error> {
        debug!("Setting replicas for {deployment} in {namespace} to {replicas}");
        let replicas = format!("--replicas={replicas}");
        command::output("kubectl", ["scale", "-n", namespace, "deploy", deployment, replicas.as_str()])?;
        Ok(())
    }

    fn running_pods(&self, namespace: &str, app: &str) -> Result<usize, Error> {
        let label = format!("-lapp={app}");
        let names = self.jsonpath(
            &["get", "pod", "-n", namespace, label.as_str(), "--field-selector=status.phase=Running"],
            "{.items[*].metadata.name}",
        )?;
        Ok(names.split_whitespace().count())
    }

    fn ready_replicas(&self, namespace: &str, deployment: &str) -> Result<u32, Error> {
        let ready = self.jsonpath(&["get", "deploy", "-n", namespace, deployment], "{.status.readyReplicas}")?;
        Ok(ready.parse().unwrap_or(0))
    }

    fn image_pull_secret(&self, namespace: &str, deployment: &str) -> Result<Option<String>, Error> {
        let secrets = self.jsonpath(
            &["get", "deploy", "-n", namespace, deployment],
            "{.spec.template.spec.imagePullSecrets[*].name}",
        )?;
        Ok(secrets.split_whitespace().next().map(str::to_string))
    }

    fn deployment_images(&self, namespace: &str, deployment: &str) -> Result<Vec<String>, Error> {
        let images = self.jsonpath(
            &["get", "deploy", "-n", namespace, deployment],
            "{.spec.template.spec.containers[*].image}",
        )?;
        Ok(images.split_whitespace().map(str::to_string).collect())
    }

    fn helm_upgrade(&self, upgrade: &HelmUpgrade) -> Result<(), Error> {
        let action = if upgrade.install { "Installing" } else { "Upgrading" };
        info!("{action} helm chart {} in namespace {}", upgrade.chart, upgrade.namespace);
        Ok(command::run("helm", upgrade.command_args())?)
    }

    fn helm_uninstall(&self, uninstall: &HelmUninstall) -> Result<(), Error> {
        info!("Uninstalling {} from namespace {}", uninstall.name, uninstall.namespace);
        Ok(command::run("helm", uninstall.command_args())?)
    }

    fn deployment_namespace(&self, deployment: &str) -> Result<Option<String>, Error> {
        let namespaces = self.jsonpath(
            &["get", "-A", "deploy"],
            &format!("{{.items[?(@.metadata.name==\"{deployment}\")].metadata.namespace}}"),
        )?;
        Ok(namespaces.split_whitespace().next().map(str::to_string))
    }

    fn pod_name(&self, namespace: &str, app: &str) -> Result<Option<String>, Error> {
        let label = format!("-lapp={app}");
        let names = self.jsonpath(&["get", "pod", "-n", namespace, label.as_str()], "{.items[*].metadata.name}")?;
        Ok(names.split_whitespace().next().map(str::to_string))
    }

    fn logs(&self, args: &[String]) -> Result<(), Error> {
        Ok(command::run("kubectl", args)?)
    }

    fn traefik_completion_time(&self) -> Result<Option<DateTime<Utc>>, Error> {
        let out = self.jsonpath(
            &["get", "job", "-n", "kube-system", "helm-install-traefik"],
            "{.status.completionTime}",
        )?;
        Ok(DateTime::parse_from_rfc3339(&out)
            .ok()
            .map(|time| time.with_timezone(&Utc)))
    }
}


#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use super::fake::FakeCluster;
    use super::*;

    #[test]
    fn flavor_detection() {
        assert_eq!(ClusterFlavor::detect("v1.30.4+k3s1"), ClusterFlavor::K3s);
        assert_eq!(ClusterFlavor::detect("v1.29.8+rke2r1"), ClusterFlavor::Rke2);
        assert_eq!(ClusterFlavor::detect("v1.30.4"), ClusterFlavor::Generic);
        assert_eq!(ClusterFlavor::Rke2.default_kubeconfig(), None);
        assert_eq!(ClusterFlavor::Generic.default_kubeconfig(), None);
    }

    #[test]
    fn cluster_info_snapshot() {
        let cluster = FakeCluster {
            kubelet_version: "v1.29.8+rke2r1".to_string(),
            ingress: "nginx".to_string(),
            ..Default::default()
        };
        let info = ClusterInfo::check(&cluster).unwrap();
        assert_eq!(info.flavor, ClusterFlavor::Rke2);
        assert_eq!(info.ingress, "nginx");
        assert_eq!(info.kubeconfig, None);
    }

    #[test]
    fn helm_arguments() {
        let upgrade = HelmUpgrade {
            kubeconfig: Some(PathBuf::from("/etc/rancher/k3s/k3s.yaml")),
            namespace: "uyuni".to_string(),
            install: true,
            name: "uyuni-proxy".to_string(),
            chart: "oci://registry.opensuse.org/uyuni/proxy-helm".to_string(),
            version: "".to_string(),
            args: vec!["-f".to_string(), "values.yaml".to_string()],
        };
        assert_eq!(
            upgrade.command_args().join(" "),
            "upgrade -n uyuni --create-namespace uyuni-proxy oci://registry.opensuse.org/uyuni/proxy-helm \
             --kubeconfig /etc/rancher/k3s/k3s.yaml --install -f values.yaml"
        );
    }

    #[test]
    fn helm_uninstall_arguments() {
        let uninstall = HelmUninstall {
            kubeconfig: Some(PathBuf::from("/etc/rancher/k3s/k3s.yaml")),
            namespace: "uyuni".to_string(),
            name: "uyuni-proxy".to_string(),
        };
        assert_eq!(
            uninstall.command_args().join(" "),
            "--kubeconfig /etc/rancher/k3s/k3s.yaml uninstall -n uyuni uyuni-proxy"
        );
    }

    #[test]
    fn ingress_config_removal() {
        let root = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::default();
        for flavor in [ClusterFlavor::K3s, ClusterFlavor::Rke2] {
            flavor.install_ingress_config(&cluster, root.path(), "uyuni").unwrap();
        }
        let traefik = root.path().join(relative(K3S_TRAEFIK_CONFIG));
        let nginx = root.path().join(relative(RKE2_NGINX_CONFIG));

        ClusterFlavor::K3s.uninstall_ingress_config(&cluster, root.path(), true).unwrap();
        assert!(traefik.exists());

        ClusterFlavor::K3s.uninstall_ingress_config(&cluster, root.path(), false).unwrap();
        ClusterFlavor::Rke2.uninstall_ingress_config(&cluster, root.path(), false).unwrap();
        assert!(!traefik.exists());
        assert!(!nginx.exists());

        ClusterFlavor::Rke2.uninstall_ingress_config(&cluster, root.path(), false).unwrap();
    }

    #[test]
    fn k3s_traefik_manifest() {
        let root = tempfile::tempdir().unwrap();
        ClusterFlavor::K3s
            .install_ingress_config(&FakeCluster::default(), root.path(), "uyuni")
            .unwrap();

        let content = std::fs::read_to_string(root.path().join(relative(K3S_TRAEFIK_CONFIG))).unwrap();
        let manifest: serde_yaml::Value = serde_yaml::from_str(&content).unwrap();
        assert_eq!(manifest["kind"], "HelmChartConfig");
        assert_eq!(manifest["metadata"]["name"], "traefik");

        let values: serde_yaml::Value =
            serde_yaml::from_str(manifest["spec"]["valuesContent"].as_str().unwrap()).unwrap();
        assert_eq!(values["ports"]["uyuni-ssh"]["exposedPort"], 8022);
        assert_eq!(values["ports"]["uyuni-tftp"]["protocol"], "UDP");
        assert_eq!(values["ports"]["uyuni-salt-publish"]["protocol"], "TCP");
        assert!(values["ports"].get("uyuni-https").is_none());
    }

    #[test]
    fn rke2_nginx_manifest() {
        let root = tempfile::tempdir().unwrap();
        ClusterFlavor::Rke2
            .install_ingress_config(&FakeCluster::default(), root.path(), "uyuni")
            .unwrap();

        let content = std::fs::read_to_string(root.path().join(relative(RKE2_NGINX_CONFIG))).unwrap();
        let manifest: serde_yaml::Value = serde_yaml::from_str(&content).unwrap();
        assert_eq!(manifest["metadata"]["name"], "rke2-ingress-nginx");
        let values: serde_yaml::Value =
            serde_yaml::from_str(manifest["spec"]["valuesContent"].as_str().unwrap()).unwrap();
        assert_eq!(values["tcp"]["4505"], "uyuni/uyuni-proxy-tcp:4505");
        assert_eq!(values["udp"]["69"], "uyuni/uyuni-proxy-udp:69");
    }

    #[test]
    fn generic_cluster_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        ClusterFlavor::Generic
            .install_ingress_config(&FakeCluster::default(), root.path(), "uyuni")
            .unwrap();
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn deployment_wait() {
        let cluster = FakeCluster::default();
        wait_for_deployment(&cluster, "uyuni", "uyuni-proxy", 3, Duration::ZERO).unwrap();
        wait_for_traefik(&cluster, 3, Duration::ZERO).unwrap();
    }

    #[test]
    fn terminating_pods_are_waited_for() {
        let cluster = FakeCluster {
            terminating_polls: Cell::new(2),
            ..Default::default()
        };
        cluster.running_pods.set(1);
        cluster.scale("uyuni", "uyuni-proxy", 0).unwrap();

        wait_for_no_pods(&cluster, "uyuni", "uyuni-proxy", 5, Duration::ZERO).unwrap();
        assert_eq!(cluster.terminating_polls.get(), 0);

        cluster.scale("uyuni", "uyuni-proxy", 1).unwrap();
        let err = wait_for_no_pods(&cluster, "uyuni", "uyuni-proxy", 3, Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
