// Cluster Managers
// Lifecycle of external Kubernetes clusters added to the platform as pools

use crate::error::{ConfigError, FlowError, FlowResult};
use crate::execution::environment::Environment;
use crate::runners::command::{Command, CommandResult};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Provisioner used by every cluster backend
pub const KUBERNETES_PROVISIONER: &str = "kubernetes";

/// A provisioning backend that creates and destroys a cluster
#[async_trait::async_trait]
pub trait ClusterManager: Send + Sync + fmt::Debug {
    /// Backend name, as selected through the `clusters` variable
    fn name(&self) -> &str;

    /// Platform provisioner for pools backed by this cluster
    fn provisioner(&self) -> &str;

    /// Create the cluster
    async fn start(&self, env: &Environment) -> CommandResult;

    /// Destroy the cluster
    async fn delete(&self, env: &Environment) -> CommandResult;

    /// Extra `cluster-update` arguments that point the platform at the cluster
    async fn update_params(&self, env: &Environment) -> FlowResult<Vec<String>>;

    /// Name the cluster is registered under
    fn cluster_name(&self) -> String {
        format!("icluster-{}", self.name())
    }

    /// Pool served by the cluster
    fn pool_name(&self) -> String {
        format!("ipool-{}", self.name())
    }
}

/// Known cluster backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    Gce,
    Minikube,
}

impl ClusterKind {
    pub fn manager(self) -> Arc<dyn ClusterManager> {
        match self {
            ClusterKind::Gce => Arc::new(GceClusterManager::new()),
            ClusterKind::Minikube => Arc::new(MinikubeClusterManager::new()),
        }
    }
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterKind::Gce => write!(f, "gce"),
            ClusterKind::Minikube => write!(f, "minikube"),
        }
    }
}

impl FromStr for ClusterKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "gce" => Ok(ClusterKind::Gce),
            "minikube" => Ok(ClusterKind::Minikube),
            other => Err(ConfigError::UnknownCluster(other.to_string())),
        }
    }
}

/// Managers for a comma-separated list of backend names.
///
/// Unknown names are ignored and duplicates keep their first position.
pub fn select_cluster_managers(clusters: &str) -> Vec<Arc<dyn ClusterManager>> {
    let mut kinds: Vec<ClusterKind> = Vec::new();
    for name in clusters.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        match name.parse::<ClusterKind>() {
            Ok(kind) if !kinds.contains(&kind) => kinds.push(kind),
            Ok(_) => debug!(cluster = name, "ignoring duplicate cluster"),
            Err(e) => warn!("{}", e),
        }
    }
    kinds.into_iter().map(ClusterKind::manager).collect()
}

// =============================================================================
// Google Kubernetes Engine
// =============================================================================

/// Cluster on Google Kubernetes Engine, configured through the `gce_zone`,
/// `gce_project` and `gce_machine_type` variables
#[derive(Debug, Clone)]
pub struct GceClusterManager {
    gcloud: Command,
}

impl GceClusterManager {
    pub fn new() -> Self {
        Self::with_command(Command::new("gcloud", ["container", "clusters"]))
    }

    /// Use `gcloud` as the base of every `container clusters` invocation
    pub fn with_command(gcloud: Command) -> Self {
        Self { gcloud }
    }

    fn location_args(&self) -> [&'static str; 4] {
        ["--zone", "{{.gce_zone}}", "--project", "{{.gce_project}}"]
    }
}

impl Default for GceClusterManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ClusterManager for GceClusterManager {
    fn name(&self) -> &str {
        "gce"
    }

    fn provisioner(&self) -> &str {
        KUBERNETES_PROVISIONER
    }

    async fn start(&self, env: &Environment) -> CommandResult {
        let cluster = self.cluster_name();
        let created = self
            .gcloud
            .with_args(["create", cluster.as_str()])
            .with_args(self.location_args())
            .with_args([
                "--machine-type",
                "{{.gce_machine_type}}",
                "--num-nodes",
                "1",
                "--enable-legacy-authorization",
            ])
            .run(env)
            .await;
        if !created.ok() {
            return created;
        }
        self.gcloud
            .with_args(["get-credentials", cluster.as_str()])
            .with_args(self.location_args())
            .run(env)
            .await
    }

    async fn delete(&self, env: &Environment) -> CommandResult {
        self.gcloud
            .with_args(["delete", self.cluster_name().as_str(), "--async", "-q"])
            .with_args(self.location_args())
            .run(env)
            .await
    }

    async fn update_params(&self, env: &Environment) -> FlowResult<Vec<String>> {
        let res = self
            .gcloud
            .with_args(["describe", self.cluster_name().as_str()])
            .with_args(self.location_args())
            .with_args(["--format=value(endpoint,masterAuth.username,masterAuth.password)"])
            .run(env)
            .await;
        if !res.ok() {
            return Err(FlowError::check(format!(
                "could not describe cluster:\n{}",
                res
            )));
        }

        let stdout = res.stdout_str();
        let fields: Vec<&str> = stdout.trim().split('\t').collect();
        let &[endpoint, username, password] = fields.as_slice() else {
            return Err(FlowError::check(format!(
                "unexpected cluster description: {}",
                stdout.trim()
            )));
        };

        Ok(vec![
            "--addr".to_string(),
            format!("https://{}", endpoint),
            "--custom".to_string(),
            format!("username={}", username),
            "--custom".to_string(),
            format!("password={}", password),
        ])
    }
}

// =============================================================================
// Minikube
// =============================================================================

/// Local single-node cluster managed by minikube
#[derive(Debug, Clone)]
pub struct MinikubeClusterManager {
    minikube: Command,
    cert_dir: Option<PathBuf>,
}

impl MinikubeClusterManager {
    pub fn new() -> Self {
        Self {
            minikube: Command::new("minikube", Vec::<String>::new()),
            cert_dir: None,
        }
    }

    /// Use `minikube` as the base of every invocation
    pub fn with_command(mut self, minikube: Command) -> Self {
        self.minikube = minikube;
        self
    }

    /// Read client certificates from `dir` instead of `~/.minikube`
    pub fn with_cert_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cert_dir = Some(dir.into());
        self
    }

    fn cert_dir(&self) -> FlowResult<PathBuf> {
        if let Some(dir) = &self.cert_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".minikube"))
            .ok_or_else(|| FlowError::Io("could not determine home directory".to_string()))
    }
}

impl Default for MinikubeClusterManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ClusterManager for MinikubeClusterManager {
    fn name(&self) -> &str {
        "minikube"
    }

    fn provisioner(&self) -> &str {
        KUBERNETES_PROVISIONER
    }

    async fn start(&self, env: &Environment) -> CommandResult {
        self.minikube.with_args(["start"]).run(env).await
    }

    async fn delete(&self, env: &Environment) -> CommandResult {
        self.minikube.with_args(["delete"]).run(env).await
    }

    async fn update_params(&self, env: &Environment) -> FlowResult<Vec<String>> {
        let res = self.minikube.with_args(["ip"]).run(env).await;
        if !res.ok() {
            return Err(FlowError::check(format!("could not get minikube ip:\n{}", res)));
        }
        let ip = res.stdout_str().trim().to_string();
        let certs = self.cert_dir()?;

        Ok(vec![
            "--addr".to_string(),
            format!("https://{}:8443", ip),
            "--cacert".to_string(),
            certs.join("ca.crt").display().to_string(),
            "--clientcert".to_string(),
            certs.join("apiserver.crt").display().to_string(),
            "--clientkey".to_string(),
            certs.join("apiserver.key").display().to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(managers: &[Arc<dyn ClusterManager>]) -> Vec<String> {
        managers.iter().map(|m| m.name().to_string()).collect()
    }

    /// Command that prints `output` and ignores the arguments appended to it
    fn fake(output: &str) -> Command {
        Command::new("sh", ["-c".to_string(), format!("printf '{}'", output), "fake".to_string()])
    }

    #[test]
    fn test_select_cluster_managers() {
        assert_eq!(
            names(&select_cluster_managers("minikube, gce")),
            vec!["minikube", "gce"]
        );
        assert_eq!(
            names(&select_cluster_managers("gce,unknown, gce ,minikube")),
            vec!["gce", "minikube"]
        );
        assert!(select_cluster_managers("").is_empty());
        assert!(select_cluster_managers(" , ").is_empty());
    }

    #[test]
    fn test_cluster_kind_parsing() {
        assert_eq!("gce".parse::<ClusterKind>().unwrap(), ClusterKind::Gce);
        assert_eq!(" minikube ".parse::<ClusterKind>().unwrap(), ClusterKind::Minikube);
        assert!(matches!(
            "aks".parse::<ClusterKind>(),
            Err(ConfigError::UnknownCluster(name)) if name == "aks"
        ));
        assert_eq!(ClusterKind::Minikube.to_string(), "minikube");
    }

    #[test]
    fn test_names() {
        let gce = GceClusterManager::new();
        assert_eq!(gce.provisioner(), "kubernetes");
        assert_eq!(gce.cluster_name(), "icluster-gce");
        assert_eq!(gce.pool_name(), "ipool-gce");
    }

    #[tokio::test]
    async fn test_gce_update_params() {
        let gce = GceClusterManager::with_command(fake("35.1.2.3\\tadmin\\tsecret\\n"));
        let params = gce.update_params(&Environment::new()).await.unwrap();
        assert_eq!(
            params,
            vec![
                "--addr",
                "https://35.1.2.3",
                "--custom",
                "username=admin",
                "--custom",
                "password=secret"
            ]
        );
    }

    #[tokio::test]
    async fn test_gce_update_params_rejects_bad_output() {
        let gce = GceClusterManager::with_command(fake("35.1.2.3\\n"));
        assert!(gce.update_params(&Environment::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_gce_start_stops_on_create_failure() {
        let gce = GceClusterManager::with_command(Command::new("false", Vec::<String>::new()));
        let res = gce.start(&Environment::new()).await;
        assert!(!res.ok());
        assert!(res.command.contains("create icluster-gce"));
    }

    #[tokio::test]
    async fn test_minikube_update_params() {
        let minikube = MinikubeClusterManager::new()
            .with_command(fake("192.168.49.2\\n"))
            .with_cert_dir("/certs");
        let params = minikube.update_params(&Environment::new()).await.unwrap();
        assert_eq!(params[1], "https://192.168.49.2:8443");
        assert_eq!(params[3], "/certs/ca.crt");
        assert_eq!(params[7], "/certs/apiserver.key");
    }

    #[tokio::test]
    async fn test_minikube_resolves_templates() {
        let minikube =
            MinikubeClusterManager::new().with_command(Command::new("echo", ["{{.profile}}"]));
        let env = Environment::new();
        env.set("profile", ["integration"]);
        let res = minikube.start(&env).await;
        assert!(res.ok());
        assert_eq!(res.stdout_str(), "integration start\n");
    }
}
