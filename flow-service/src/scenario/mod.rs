// Installer Scenario Module
// End-to-end flows that install a platform, exercise it, and tear it down

pub mod cluster;
pub mod extract;
pub mod installer;

// Re-export key types
pub use cluster::{
    select_cluster_managers, ClusterKind, ClusterManager, GceClusterManager,
    MinikubeClusterManager,
};
pub use extract::{parse_install_output, InstallInfo};
pub use installer::installer_flows;

use crate::execution::environment::Environment;

/// Variables exchanged between flows
pub mod vars {
    pub const INSTALLER_CONFIG: &str = "installerconfig";
    pub const INSTALLER_COMPOSE: &str = "installercompose";
    pub const TARGET_ADDR: &str = "targetaddr";
    pub const ADMIN_USER: &str = "adminuser";
    pub const ADMIN_PASSWORD: &str = "adminpassword";
    pub const NODE_OPTS: &str = "nodeopts";
    pub const INSTALLER_NODES: &str = "installernodes";
    pub const NODE_ADDRS: &str = "nodeaddrs";
    pub const TEAM: &str = "team";
    pub const POOL_NAMES: &str = "poolnames";
    pub const PLATFORM_IMAGES: &str = "platformimages";
    pub const PLATFORMS: &str = "platforms";

    /// Set to run the scenario at all
    pub const ENABLED: &str = "enabled";
    /// Comma-separated cluster backends
    pub const CLUSTERS: &str = "clusters";
    /// Installation name used for the certificates directory
    pub const INSTALLER_NAME: &str = "installername";
    /// Directory holding one sample app per platform
    pub const EXAMPLES_DIR: &str = "examplesdir";
}

/// Whether the environment opts into running the scenario
pub fn scenario_enabled(env: &Environment) -> bool {
    env.has(vars::ENABLED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_enabled() {
        let env = Environment::new();
        assert!(!scenario_enabled(&env));

        env.set(vars::ENABLED, ["1"]);
        assert!(scenario_enabled(&env));
    }
}
