// Installer Scenario
// Installs a platform, configures pools and platforms, and deploys sample apps

use crate::config::ScenarioConfig;
use crate::error::{FlowError, FlowResult};
use crate::execution::environment::Environment;
use crate::execution::flow::{Action, Flow, Scope};
use crate::runners::command::{Command, CommandResult};
use crate::scenario::cluster::ClusterManager;
use crate::scenario::extract::{
    app_address, app_platform, cluster_node_addresses, mentions_before, node_created_address,
    parse_install_output,
};
use crate::scenario::vars;
use crate::testing::assertions::Expect;

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

const TARGET_NAME: &str = "integration-target";
const TEAM_NAME: &str = "integration-team";
const APP_NAME: &str = "iapp-{{.plat}}-{{.pool}}";
const DEFAULT_INSTALLER_NAME: &str = "tsuru";

/// Shared state of every installer action
#[derive(Debug)]
struct Installer {
    config: ScenarioConfig,
    clusters: Vec<Arc<dyn ClusterManager>>,
}

impl Installer {
    /// Platform CLI invocation
    fn cli<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command::new(self.config.cli.clone(), args)
    }
}

/// The installer scenario, in execution order.
///
/// `clusters` get a pool each on top of the configured provisioners.
pub fn installer_flows(
    config: &ScenarioConfig,
    clusters: Vec<Arc<dyn ClusterManager>>,
) -> Vec<Flow> {
    let ctx = Arc::new(Installer {
        config: config.clone(),
        clusters,
    });

    vec![
        Flow::new("platforms-to-install", action(&ctx, platforms_to_install))
            .provides([vars::PLATFORM_IMAGES]),
        Flow::new("installer-config", action(&ctx, installer_config))
            .provides([vars::INSTALLER_CONFIG])
            .backward(action(&ctx, remove_installer_config)),
        Flow::new("installer-compose", action(&ctx, installer_compose))
            .provides([vars::INSTALLER_COMPOSE])
            .backward(action(&ctx, remove_installer_compose)),
        Flow::new("installer", action(&ctx, install))
            .provides([vars::TARGET_ADDR])
            .requires([vars::INSTALLER_CONFIG, vars::INSTALLER_COMPOSE])
            .backward(action(&ctx, uninstall)),
        Flow::new("target", action(&ctx, target)).requires([vars::TARGET_ADDR]),
        Flow::new("login", action(&ctx, login))
            .requires([vars::ADMIN_USER, vars::ADMIN_PASSWORD]),
        Flow::new("remove-install-nodes", action(&ctx, remove_install_node))
            .requires([vars::INSTALLER_NODES])
            .matrix("node", vars::INSTALLER_NODES),
        Flow::new("quota", action(&ctx, quota)).requires([vars::ADMIN_USER]),
        Flow::new("team", action(&ctx, create_team))
            .provides([vars::TEAM])
            .backward(action(&ctx, remove_team)),
        Flow::new("pool-add", action(&ctx, add_pools))
            .provides([vars::POOL_NAMES])
            .requires([vars::TEAM, vars::NODE_OPTS])
            .backward(action(&ctx, remove_pools)),
        Flow::new("platform-add", action(&ctx, add_platform))
            .provides([vars::PLATFORMS])
            .requires([vars::PLATFORM_IMAGES])
            .matrix("platimg", vars::PLATFORM_IMAGES)
            .parallel(true)
            .backward(action(&ctx, remove_platform)),
        Flow::new("example-apps", action(&ctx, deploy_example_app))
            .requires([vars::POOL_NAMES, vars::PLATFORMS, vars::TEAM, vars::EXAMPLES_DIR])
            .matrix("pool", vars::POOL_NAMES)
            .matrix("plat", vars::PLATFORMS)
            .parallel(true)
            .backward(action(&ctx, remove_example_app)),
    ]
}

/// Bind an installer step to the shared state
fn action<F, Fut>(ctx: &Arc<Installer>, step: F) -> impl Action + 'static
where
    F: Fn(Arc<Installer>, Scope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FlowResult<()>> + Send + 'static,
{
    let ctx = Arc::clone(ctx);
    move |scope: Scope| step(Arc::clone(&ctx), scope)
}

// =============================================================================
// Installation
// =============================================================================

async fn platforms_to_install(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    scope
        .env()
        .add(vars::PLATFORM_IMAGES, ctx.config.platforms.iter().cloned());
    Ok(())
}

async fn installer_config(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let mut file = tempfile::Builder::new()
        .prefix("installer-config")
        .tempfile()?;
    file.write_all(ctx.config.installer_config_text().as_bytes())?;
    let (_, path) = file.keep().map_err(|e| FlowError::Io(e.to_string()))?;

    debug!(path = %path.display(), "installer config written");
    scope
        .env()
        .set(vars::INSTALLER_CONFIG, [path.display().to_string()]);
    Ok(())
}

async fn remove_installer_config(_ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let res = Command::new("rm", ["{{.installerconfig}}"])
        .run(scope.env())
        .await;
    scope.check(&res, &Expect::Ok);
    Ok(())
}

async fn installer_compose(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let compose = tempfile::Builder::new()
        .prefix("installer-compose")
        .tempfile()?;
    // Scratch config for install-config-init; removed on drop
    let scratch = tempfile::Builder::new()
        .prefix("installer-config")
        .tempfile()?;

    let res = ctx
        .cli([
            "install-config-init".to_string(),
            scratch.path().display().to_string(),
            compose.path().display().to_string(),
        ])
        .run(scope.env())
        .await;
    scope.assert(&res, &Expect::Ok)?;

    let data = tokio::fs::read_to_string(compose.path()).await?;
    let data = data.replacen("tsuru/api:v1", "tsuru/api:latest", 1);
    tokio::fs::write(compose.path(), data).await?;

    let (_, path) = compose.keep().map_err(|e| FlowError::Io(e.to_string()))?;
    scope
        .env()
        .set(vars::INSTALLER_COMPOSE, [path.display().to_string()]);
    Ok(())
}

async fn remove_installer_compose(_ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let res = Command::new("rm", ["{{.installercompose}}"])
        .run(scope.env())
        .await;
    scope.check(&res, &Expect::Ok);
    Ok(())
}

async fn install(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let env = scope.env();
    let res = ctx
        .cli([
            "install-create",
            "--config",
            "{{.installerconfig}}",
            "--compose",
            "{{.installercompose}}",
        ])
        .with_timeout(ctx.config.install_timeout())
        .run(env)
        .await;
    scope.assert(&res, &Expect::Ok)?;

    let info = parse_install_output(&res.stdout_str())?;
    info!(
        address = %info.target_address(),
        nodes = info.node_addresses.len(),
        "platform installed"
    );
    env.set(vars::TARGET_ADDR, [info.target_address()]);

    let certs = certs_dir(env)?;
    for node in &info.node_addresses {
        env.add(vars::NODE_OPTS, [node_opts(node, &certs)]);
        env.add(vars::INSTALLER_NODES, [node.clone()]);
    }

    let (Some(user), Some(password)) = (info.admin_user, info.admin_password) else {
        return Err(FlowError::check("install output has no admin credentials"));
    };
    env.set(vars::ADMIN_USER, [user]);
    env.set(vars::ADMIN_PASSWORD, [password]);
    Ok(())
}

async fn uninstall(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let res = ctx
        .cli(["install-remove", "--config", "{{.installerconfig}}", "-y"])
        .run(scope.env())
        .await;
    scope.check(&res, &Expect::Ok);
    Ok(())
}

/// Certificates written by the installer for its docker nodes
fn certs_dir(env: &Environment) -> FlowResult<PathBuf> {
    let mut name = env.get(vars::INSTALLER_NAME);
    if name.is_empty() {
        name = DEFAULT_INSTALLER_NAME.to_string();
    }
    let home = dirs::home_dir()
        .ok_or_else(|| FlowError::Io("could not determine home directory".to_string()))?;
    Ok(home.join(".tsuru").join("installs").join(name).join("certs"))
}

/// `node-add` options registering an installer node
fn node_opts(address: &str, certs: &std::path::Path) -> String {
    let certs = certs.display();
    format!(
        "--register address={} --cacert {}/ca.pem --clientcert {}/cert.pem --clientkey {}/key.pem",
        address, certs, certs, certs
    )
}

/// Split `node_opts` text back into arguments. Only `--flag` boundaries
/// separate values, so certificate paths may contain spaces.
fn node_opts_args(opts: &str) -> Vec<String> {
    let mut args = Vec::new();
    for (i, segment) in opts.trim().split(" --").enumerate() {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let option = if i == 0 {
            segment.to_string()
        } else {
            format!("--{}", segment)
        };
        match option.split_once(' ') {
            Some((flag, value)) => {
                args.push(flag.to_string());
                args.push(value.trim().to_string());
            }
            None => args.push(option),
        }
    }
    args
}

// =============================================================================
// Target, login, and quota
// =============================================================================

async fn target(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let env = scope.env();
    let res = ctx
        .cli(["target-add", TARGET_NAME, "{{.targetaddr}}"])
        .run(env)
        .await;
    scope.assert(&res, &Expect::Ok)?;

    let res = ctx.cli(["target-list"]).run(env).await;
    let listed = Expect::matches(&format!(r"\s+{} .*", regex::escape(TARGET_NAME)))?;
    scope.assert(&res, &listed)?;

    let res = ctx.cli(["target-set", TARGET_NAME]).run(env).await;
    scope.assert(&res, &Expect::Ok)
}

async fn login(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let res = ctx
        .cli(["login", "{{.adminuser}}"])
        .with_input("{{.adminpassword}}")
        .run(scope.env())
        .await;
    scope.assert(&res, &Expect::Ok)
}

async fn remove_install_node(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let res = ctx
        .cli(["node-remove", "-y", "--no-rebalance", "{{.node}}"])
        .run(scope.env())
        .await;
    scope.assert(&res, &Expect::Ok)
}

async fn quota(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let env = scope.env();
    let res = ctx
        .cli(["user-quota-change", "{{.adminuser}}", "100"])
        .run(env)
        .await;
    scope.assert(&res, &Expect::Ok)?;

    let res = ctx.cli(["user-quota-view", "{{.adminuser}}"]).run(env).await;
    scope.assert(&res, &Expect::matches(r"(?s)Apps usage.*/100")?)
}

async fn create_team(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let res = ctx.cli(["team-create", TEAM_NAME]).run(scope.env()).await;
    scope.assert(&res, &Expect::Ok)?;
    scope.env().set(vars::TEAM, [TEAM_NAME]);
    Ok(())
}

async fn remove_team(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let res = ctx
        .cli(["team-remove", "-y", TEAM_NAME])
        .run(scope.env())
        .await;
    scope.check(&res, &Expect::Ok);
    Ok(())
}

// =============================================================================
// Pools and nodes
// =============================================================================

async fn add_pools(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    for provisioner in &ctx.config.provisioners {
        add_provisioner_pool(&ctx, &scope, provisioner).await?;
    }
    for cluster in &ctx.clusters {
        add_cluster_pool(&ctx, &scope, cluster.as_ref()).await?;
    }
    Ok(())
}

/// Pool for a provisioner, served by the next installer node
async fn add_provisioner_pool(
    ctx: &Installer,
    scope: &Scope,
    provisioner: &str,
) -> FlowResult<()> {
    let env = scope.env();
    let pool = format!("ipool-{}", provisioner);
    create_pool(ctx, scope, &pool, provisioner).await?;

    let opts = env.get(vars::NODE_OPTS);
    let res = ctx
        .cli(["node-add".to_string()])
        .with_args(node_opts_args(&opts))
        .with_args([format!("pool={}", pool)])
        .run(env)
        .await;
    scope.assert(&res, &Expect::Ok)?;

    let events = ctx.cli(["event-list"]).run(env).await;
    scope.assert(&events, &Expect::Ok)?;
    rotate(env, vars::NODE_OPTS);

    let node = node_created_address(&events.stdout_str())?;
    env.add(vars::NODE_ADDRS, [node.clone()]);

    let node_list = ctx.cli(["node-list"]);
    let node_ref = node.as_str();
    let node_list_ref = &node_list;
    scope
        .wait_for(ctx.config.ready_timeout(), "node", move || async move {
            let res = node_list_ref.run(env).await;
            mentions_before(&res.stdout_str(), node_ref, "ready").unwrap_or(false)
        })
        .await
}

/// Pool backed by an external cluster whose nodes move into it
async fn add_cluster_pool(
    ctx: &Installer,
    scope: &Scope,
    cluster: &dyn ClusterManager,
) -> FlowResult<()> {
    let env = scope.env();
    let pool = cluster.pool_name();
    create_pool(ctx, scope, &pool, cluster.provisioner()).await?;

    let res = cluster.start(env).await;
    scope.assert(&res, &Expect::Ok)?;

    let cluster_name = cluster.cluster_name();
    let params = cluster.update_params(env).await?;
    let res = ctx
        .cli([
            "cluster-update".to_string(),
            cluster_name.clone(),
            cluster.provisioner().to_string(),
            "--pool".to_string(),
            pool.clone(),
        ])
        .with_args(params)
        .run(env)
        .await;
    scope.assert(&res, &Expect::Ok)?;
    ctx.cli(["cluster-list"]).run(env).await;

    let cluster_nodes = ctx.cli([
        "node-list".to_string(),
        "-f".to_string(),
        format!("tsuru.io/cluster={}", cluster_name),
    ]);
    let cluster_nodes_ref = &cluster_nodes;
    scope
        .wait_for(ctx.config.ready_timeout(), "cluster nodes", move || async move {
            cluster_nodes_ref.run(env).await.stdout_str().contains("Ready")
        })
        .await?;
    let res = cluster_nodes.run(env).await;
    let addresses = cluster_node_addresses(&res.stdout_str());

    for address in &addresses {
        let res = ctx
            .cli(["node-update".to_string(), address.clone(), format!("pool={}", pool)])
            .run(env)
            .await;
        scope.assert(&res, &Expect::Ok)?;
    }

    let events = ctx.cli(["event-list"]).run(env).await;
    scope.assert(&events, &Expect::Ok)?;
    rotate(env, vars::NODE_OPTS);
    let events = events.stdout_str();
    for address in &addresses {
        let updated = format!(r"node:\s+{}", regex::escape(address));
        scope.ensure(
            mentions_before(&events, "node.update", &updated)?,
            format!("no node.update event for {}", address),
        )?;
    }

    let node_list = ctx.cli(["node-list"]);
    let node_list_ref = &node_list;
    let addresses_ref = &addresses;
    scope
        .wait_for(ctx.config.ready_timeout(), "cluster nodes", move || async move {
            let listed = node_list_ref.run(env).await.stdout_str();
            addresses_ref
                .iter()
                .all(|address| mentions_before(&listed, address, "Ready").unwrap_or(false))
        })
        .await
}

/// Create a pool restricted to the integration team
async fn create_pool(
    ctx: &Installer,
    scope: &Scope,
    pool: &str,
    provisioner: &str,
) -> FlowResult<()> {
    let env = scope.env();
    let res = ctx
        .cli(["pool-add", "--provisioner", provisioner, pool])
        .run(env)
        .await;
    scope.assert(&res, &Expect::Ok)?;
    env.add(vars::POOL_NAMES, [pool]);

    let res = ctx
        .cli(["pool-constraint-set", pool, "team", "{{.team}}"])
        .run(env)
        .await;
    scope.assert(&res, &Expect::Ok)
}

async fn remove_pools(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let env = scope.env();
    for cluster in &ctx.clusters {
        let res = ctx
            .cli(["cluster-remove".to_string(), cluster.cluster_name()])
            .run(env)
            .await;
        scope.check(&res, &Expect::Ok);
        let res = cluster.delete(env).await;
        scope.check(&res, &Expect::Ok);
        let res = ctx
            .cli(["pool-remove".to_string(), "-y".to_string(), cluster.pool_name()])
            .run(env)
            .await;
        scope.check(&res, &Expect::Ok);
    }
    for node in env.all(vars::NODE_ADDRS) {
        let res = ctx
            .cli(["node-remove".to_string(), "-y".to_string(), "--no-rebalance".to_string(), node])
            .run(env)
            .await;
        scope.check(&res, &Expect::Ok);
    }
    for provisioner in &ctx.config.provisioners {
        let res = ctx
            .cli(["pool-remove".to_string(), "-y".to_string(), format!("ipool-{}", provisioner)])
            .run(env)
            .await;
        scope.check(&res, &Expect::Ok);
    }
    Ok(())
}

/// Move the first value of a variable to the end
fn rotate(env: &Environment, name: &str) {
    let mut values = env.all(name);
    if values.len() > 1 {
        values.rotate_left(1);
        env.set(name, values);
    }
}

// =============================================================================
// Platforms and apps
// =============================================================================

/// Platform name for an image: `iplat-` plus the text after the last `/`
fn platform_name(image: &str) -> String {
    let suffix = image.rsplit('/').next().unwrap_or(image);
    format!("iplat-{}", suffix)
}

async fn add_platform(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let env = scope.env();
    let image = scope.param("platimg");
    let name = platform_name(&image);

    let res = ctx
        .cli(["platform-add", name.as_str(), "-i", image.as_str()])
        .with_timeout(ctx.config.platform_timeout())
        .run(env)
        .await;
    scope.assert(&res, &Expect::Ok)?;
    env.add(vars::PLATFORMS, [name.clone()]);

    let res = ctx.cli(["platform-list"]).run(env).await;
    scope.assert(&res, &Expect::Ok)?;
    let listed = Expect::matches(&format!("(?s).*- {}.*", regex::escape(&name)))?;
    scope.assert(&res, &listed)
}

async fn remove_platform(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let name = platform_name(&scope.param("platimg"));
    let res = ctx
        .cli(["platform-remove", "-y", name.as_str()])
        .run(scope.env())
        .await;
    scope.check(&res, &Expect::Ok);
    Ok(())
}

async fn deploy_example_app(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let env = scope.env();
    let res = ctx
        .cli([
            "app-create",
            APP_NAME,
            "{{.plat}}",
            "-t",
            "{{.team}}",
            "-o",
            "{{.pool}}",
        ])
        .run(env)
        .await;
    scope.assert(&res, &Expect::Ok)?;

    let app_info = ctx.cli(["app-info", "-a", APP_NAME]);
    let res = app_info.run(env).await;
    scope.assert(&res, &Expect::Ok)?;
    let lang = app_platform(&res.stdout_str())?.replace("iplat-", "");

    let res = ctx
        .cli([
            "app-deploy".to_string(),
            "-a".to_string(),
            APP_NAME.to_string(),
            format!("{{{{.examplesdir}}}}/{}/", lang),
        ])
        .run(env)
        .await;
    scope.assert(&res, &Expect::Ok)?;

    // A failing app-info ends the wait so its result is reported
    let last_info = Mutex::new(CommandResult::default());
    let app_info_ref = &app_info;
    let last_info_ref = &last_info;
    let started = scope
        .wait_for(ctx.config.ready_timeout(), "app", move || async move {
            let res = app_info_ref.run(env).await;
            let done = !res.ok() || res.stdout_str().contains("started");
            *last_info_ref.lock().unwrap_or_else(PoisonError::into_inner) = res;
            done
        })
        .await;
    let res = last_info.into_inner().unwrap_or_else(PoisonError::into_inner);
    scope.assert(&res, &Expect::Ok)?;
    started?;
    let address = app_address(&res.stdout_str())?;

    let curl = Command::new("curl", ["-sSf".to_string(), format!("http://{}", address)]);
    let curl_ref = &curl;
    scope
        .wait_for(ctx.config.app_timeout(), "app response", move || async move {
            curl_ref.run(env).await.ok()
        })
        .await
}

async fn remove_example_app(ctx: Arc<Installer>, scope: Scope) -> FlowResult<()> {
    let res = ctx
        .cli(["app-remove", "-y", "-a", APP_NAME])
        .run(scope.env())
        .await;
    scope.check(&res, &Expect::Ok);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::runner::{FlowRunner, FlowStatus, RunnerConfig};
    use std::time::Duration;

    const TEST_POLL: Duration = Duration::from_millis(5);

    fn echo_config() -> ScenarioConfig {
        ScenarioConfig {
            cli: "echo".to_string(),
            platforms: vec!["tsuru/go".to_string(), "tsuru/python".to_string()],
            ..ScenarioConfig::default()
        }
    }

    fn runner(flows: Vec<Flow>, names: &[&str]) -> FlowRunner {
        let flows = flows
            .into_iter()
            .filter(|f| names.contains(&f.name.as_str()))
            .collect();
        FlowRunner::new(flows).with_config(RunnerConfig {
            poll_interval: TEST_POLL,
        })
    }

    #[test]
    fn test_flow_sequence() {
        let flows = installer_flows(&ScenarioConfig::default(), Vec::new());
        let names: Vec<&str> = flows.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "platforms-to-install",
                "installer-config",
                "installer-compose",
                "installer",
                "target",
                "login",
                "remove-install-nodes",
                "quota",
                "team",
                "pool-add",
                "platform-add",
                "example-apps",
            ]
        );

        let platform_add = &flows[10];
        assert_eq!(platform_add.provides, vec!["platforms"]);
        assert_eq!(
            platform_add.matrix,
            vec![("platimg".to_string(), "platformimages".to_string())]
        );
        assert!(platform_add.parallel);

        let apps = &flows[11];
        assert_eq!(apps.matrix.len(), 2);
        assert_eq!(apps.matrix[0].0, "pool");
        assert_eq!(apps.matrix[1].0, "plat");
        assert!(apps.parallel);
        assert!(apps.provides.is_empty());

        assert!(!flows[4].has_rollback());
        assert!(flows[8].has_rollback());
        assert_eq!(flows[7].requires, vec!["adminuser"]);
    }

    #[test]
    fn test_platform_name() {
        assert_eq!(platform_name("tsuru/python3"), "iplat-python3");
        assert_eq!(platform_name("registry.io/org/go"), "iplat-go");
        assert_eq!(platform_name("static"), "iplat-static");
    }

    #[test]
    fn test_node_opts() {
        let opts = node_opts(
            "https://10.0.0.2:2376",
            std::path::Path::new("/home/u/.tsuru/installs/tsuru/certs"),
        );
        assert_eq!(
            opts,
            "--register address=https://10.0.0.2:2376 \
             --cacert /home/u/.tsuru/installs/tsuru/certs/ca.pem \
             --clientcert /home/u/.tsuru/installs/tsuru/certs/cert.pem \
             --clientkey /home/u/.tsuru/installs/tsuru/certs/key.pem"
        );
    }

    #[test]
    fn test_certs_dir_uses_installer_name() {
        let env = Environment::new();
        assert!(certs_dir(&env).unwrap().ends_with(".tsuru/installs/tsuru/certs"));

        env.set(vars::INSTALLER_NAME, ["staging"]);
        assert!(certs_dir(&env).unwrap().ends_with(".tsuru/installs/staging/certs"));
    }

    #[test]
    fn test_rotate() {
        let env = Environment::new();
        env.set("nodeopts", ["a", "b", "c"]);
        rotate(&env, "nodeopts");
        assert_eq!(env.all("nodeopts"), vec!["b", "c", "a"]);

        env.set("single", ["a"]);
        rotate(&env, "single");
        assert_eq!(env.all("single"), vec!["a"]);

        rotate(&env, "missing");
        assert!(!env.has("missing"));
    }

    #[tokio::test]
    async fn test_setup_flows_run_and_roll_back() {
        let flows = installer_flows(&echo_config(), Vec::new());
        let runner = runner(flows, &["platforms-to-install", "installer-config", "team"]);
        let env = Environment::new();

        let report = runner.run(&env).await;

        assert!(report.success(), "{:?}", report);
        assert_eq!(env.all("platformimages"), vec!["tsuru/go", "tsuru/python"]);
        assert_eq!(env.get("team"), "integration-team");

        let config_path = env.get("installerconfig");
        assert!(config_path.contains("installer-config"));
        assert!(!std::path::Path::new(&config_path).exists());
        assert!(report.flows.iter().all(|f| f.status == FlowStatus::Completed));
    }

    #[tokio::test]
    async fn test_setup_flows_are_skipped_when_provided() {
        let flows = installer_flows(&echo_config(), Vec::new());
        let runner = runner(flows, &["platforms-to-install", "team"]);
        let env = Environment::new();
        env.set("platformimages", ["custom/image"]);
        env.set("team", ["existing-team"]);

        let report = runner.run(&env).await;

        assert_eq!(report.skipped().count(), 2);
        assert_eq!(env.all("platformimages"), vec!["custom/image"]);
        assert_eq!(env.get("team"), "existing-team");
    }

    #[tokio::test]
    async fn test_failed_team_creation_stops_run() {
        let config = ScenarioConfig {
            cli: "false".to_string(),
            ..ScenarioConfig::default()
        };
        let flows = installer_flows(&config, Vec::new());
        let runner = runner(flows, &["team", "pool-add"]);
        let env = Environment::new();

        let report = runner.run(&env).await;

        assert!(matches!(report.forward_error, Some(FlowError::CheckFailed { .. })));
        assert_eq!(report.flows.len(), 1);
        assert!(!env.has("team"));
        assert_eq!(report.rollback_failures.len(), 1);
    }

    #[tokio::test]
    async fn test_platforms_added_per_image() {
        let flows = installer_flows(&echo_config(), Vec::new());
        let runner = runner(flows, &["platforms-to-install", "platform-add"]);
        let env = Environment::new();

        let report = runner.run(&env).await;

        // echo never lists the platform, so the listing check fails for each image
        assert!(!report.success());
        let mut platforms = env.all("platforms");
        platforms.sort();
        assert_eq!(platforms, vec!["iplat-go", "iplat-python"]);
        assert!(report.rollback_failures.is_empty());
    }
    #[test]
    fn test_node_opts_args_keeps_paths_with_spaces() {
        let opts = node_opts(
            "https://10.0.0.2:2376",
            std::path::Path::new("/home/Jo Doe/.tsuru/installs/tsuru/certs"),
        );
        assert_eq!(
            node_opts_args(&opts),
            vec![
                "--register",
                "address=https://10.0.0.2:2376",
                "--cacert",
                "/home/Jo Doe/.tsuru/installs/tsuru/certs/ca.pem",
                "--clientcert",
                "/home/Jo Doe/.tsuru/installs/tsuru/certs/cert.pem",
                "--clientkey",
                "/home/Jo Doe/.tsuru/installs/tsuru/certs/key.pem",
            ]
        );
    }

    const INSTALL_OUTPUT: &str = "Core Hosts:
+-----------------+-------+
| IP              | State |
+-----------------+-------+
| 192.168.99.100  | up    |
+-----------------+-------+
Core Components:
+------------------+---------+----------+
| tsuru_tsuru      | 8080    | 1        |
+------------------+---------+----------+
Apps Nodes:
+-----------------------------+-------+
| https://192.168.99.101:2376 | ready |
| https://192.168.99.102:2376 | ready |
+-----------------------------+-------+
Username: admin@example.com
Password: s3cret pass
";

    /// Platform CLI stand-in: logs every invocation and prints canned output
    const FAKE_CLI: &str = r#"#!/bin/sh
dir=$(dirname "$0")
echo "$*" >> "$dir/log"
case "$1" in
    install-config-init)
        printf 'services:\n  api:\n    image: tsuru/api:v1\n' > "$3" ;;
    install-create)
        cp "$5" "$dir/compose-used"
        cat "$dir/install-output" ;;
    target-list)
        echo "  integration-target (http://192.168.99.100:8080)" ;;
    login)
        read -r password
        echo "$password" > "$dir/password" ;;
    user-quota-view)
        echo "Apps usage: 0/100" ;;
    node-add)
        echo "$#" >> "$dir/node-add-argc"
        for arg in "$@"; do
            case "$arg" in address=*) addr="${arg#address=}" ;; esac
        done
        echo "$addr" > "$dir/last-node"
        echo "| $addr | ready |" >> "$dir/nodes" ;;
    event-list)
        echo "2017-08-01 10:00:00 (1s) node.create node: $(cat "$dir/last-node") admin" ;;
    node-list)
        cat "$dir/nodes" ;;
    platform-list)
        echo "- iplat-go" ;;
    app-info)
        if [ -f "$dir/app-info-fails" ] && [ -f "$dir/app-info-seen" ]; then
            echo "app-info: connection refused" >&2
            exit 1
        fi
        touch "$dir/app-info-seen"
        printf 'Application: app\nPlatform: iplat-go\nAddress: 127.0.0.1:1\nUnits: 1 (started)\n' ;;
esac
"#;

    fn fake_cli() -> (tempfile::TempDir, ScenarioConfig) {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cli = dir.path().join("fake-cli");
        std::fs::write(&cli, FAKE_CLI).unwrap();
        std::fs::set_permissions(&cli, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(dir.path().join("install-output"), INSTALL_OUTPUT).unwrap();

        let config = ScenarioConfig {
            cli: cli.display().to_string(),
            platforms: vec!["tsuru/go".to_string()],
            provisioners: vec!["docker".to_string(), "swarm".to_string()],
            ready_timeout_secs: 1,
            app_timeout_secs: 1,
            ..ScenarioConfig::default()
        };
        (dir, config)
    }

    fn logged(dir: &tempfile::TempDir) -> Vec<String> {
        std::fs::read_to_string(dir.path().join("log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn read(dir: &tempfile::TempDir, name: &str) -> String {
        std::fs::read_to_string(dir.path().join(name)).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_install_through_platforms() {
        let (dir, config) = fake_cli();
        let flows = installer_flows(&config, Vec::new());
        let flows: Vec<Flow> = flows
            .into_iter()
            .filter(|f| f.name != "example-apps")
            .collect();
        let runner = FlowRunner::new(flows).with_config(RunnerConfig {
            poll_interval: TEST_POLL,
        });
        let env = Environment::new();

        let report = runner.run(&env).await;
        assert!(report.success(), "{:?}", report);

        assert_eq!(env.get("targetaddr"), "http://192.168.99.100:8080");
        assert_eq!(env.get("adminuser"), "admin@example.com");
        assert_eq!(env.get("adminpassword"), "s3cret pass");
        assert_eq!(
            env.all("installernodes"),
            vec!["https://192.168.99.101:2376", "https://192.168.99.102:2376"]
        );
        // One node per pool, taken in turn from the installer nodes
        assert_eq!(
            env.all("nodeaddrs"),
            vec!["https://192.168.99.101:2376", "https://192.168.99.102:2376"]
        );
        let nodeopts = env.all("nodeopts");
        assert_eq!(nodeopts.len(), 2);
        assert!(nodeopts[0].starts_with("--register address=https://192.168.99.101:2376 "));
        assert_eq!(env.all("poolnames"), vec!["ipool-docker", "ipool-swarm"]);
        assert_eq!(env.all("platforms"), vec!["iplat-go"]);

        let compose = read(&dir, "compose-used");
        assert!(compose.contains("tsuru/api:latest"));
        assert!(!compose.contains("tsuru/api:v1"));
        assert_eq!(read(&dir, "password").trim(), "s3cret pass");
        assert_eq!(read(&dir, "node-add-argc").lines().collect::<Vec<_>>(), vec!["10", "10"]);

        let log = logged(&dir);
        assert!(log[0].starts_with("install-config-init "));
        assert!(log[1].starts_with("install-create --config "));
        assert_eq!(log[2], "target-add integration-target http://192.168.99.100:8080");
        assert_eq!(log[5], "login admin@example.com");
        assert_eq!(log[6], "node-remove -y --no-rebalance https://192.168.99.101:2376");
        assert_eq!(log[7], "node-remove -y --no-rebalance https://192.168.99.102:2376");
        assert!(log
            .iter()
            .any(|l| l.starts_with("node-add --register address=https://192.168.99.102:2376 ")
                && l.ends_with(" pool=ipool-swarm")));

        let unwind_start = log.iter().position(|l| l == "platform-list").unwrap() + 1;
        let unwind = &log[unwind_start..];
        assert_eq!(
            &unwind[..6],
            [
                "platform-remove -y iplat-go",
                "node-remove -y --no-rebalance https://192.168.99.101:2376",
                "node-remove -y --no-rebalance https://192.168.99.102:2376",
                "pool-remove -y ipool-docker",
                "pool-remove -y ipool-swarm",
                "team-remove -y integration-team",
            ]
        );
        assert_eq!(unwind.len(), 7);
        assert!(unwind[6].starts_with("install-remove --config ") && unwind[6].ends_with(" -y"));
    }

    fn app_env() -> Environment {
        let env = Environment::new();
        env.set("poolnames", ["ipool-docker"]);
        env.set("platforms", ["iplat-go"]);
        env.set("team", ["integration-team"]);
        env.set("examplesdir", ["/srv/examples"]);
        env
    }

    #[tokio::test]
    async fn test_example_app_deployed_from_platform_dir() {
        let (dir, config) = fake_cli();
        let runner = runner(installer_flows(&config, Vec::new()), &["example-apps"]);
        let env = app_env();

        let report = runner.run(&env).await;

        // Nothing listens on the app address
        match &report.forward_error {
            Some(FlowError::Timeout { what, .. }) => assert_eq!(what, "app response"),
            other => panic!("unexpected error: {:?}", other),
        }
        let log = logged(&dir);
        assert_eq!(
            log,
            vec![
                "app-create iapp-iplat-go-ipool-docker iplat-go \
                 -t integration-team -o ipool-docker",
                "app-info -a iapp-iplat-go-ipool-docker",
                "app-deploy -a iapp-iplat-go-ipool-docker /srv/examples/go/",
                "app-info -a iapp-iplat-go-ipool-docker",
                "app-remove -y -a iapp-iplat-go-ipool-docker",
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_app_info_is_reported() {
        let (dir, config) = fake_cli();
        std::fs::write(dir.path().join("app-info-fails"), "").unwrap();
        let runner = runner(installer_flows(&config, Vec::new()), &["example-apps"]);
        let env = app_env();

        let report = runner.run(&env).await;

        match &report.forward_error {
            Some(FlowError::CheckFailed { message }) => {
                assert!(message.contains("connection refused"), "{}", message)
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(logged(&dir).last().unwrap(), "app-remove -y -a iapp-iplat-go-ipool-docker");
    }
}
