// Output Extraction
// Pulls structured fields out of the text printed by the platform CLI

use crate::error::ExtractError;

use regex::Regex;
use std::sync::LazyLock;

static CORE_HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?si).*Core Hosts:.*?([\d.]+)\s.*").expect("valid pattern"));
static API_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?si).*tsuru_tsuru.*?\|\s(\d+)").expect("valid pattern"));
static NODE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\| (https?[^\s]+?) \|").expect("valid pattern"));
static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Username: ([[:print:]]+)").expect("valid pattern"));
static PASSWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Password: ([[:print:]]+)").expect("valid pattern"));
static NODE_CREATED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"node.create.*?node:\s+(.*?)\s+").expect("valid pattern"));
static PLATFORM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Platform: (.*?)\n").expect("valid pattern"));
static ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Address: (.*?)\n").expect("valid pattern"));
static CLUSTER_NODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^ *\| *((?:https?://)?\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}(?::\d+)?) *\|")
        .expect("valid pattern")
});

/// What an installation reports about the platform it created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallInfo {
    pub target_host: String,
    pub target_port: String,
    /// Docker node URLs, in output order
    pub node_addresses: Vec<String>,
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
}

impl InstallInfo {
    /// API address to register as a CLI target
    pub fn target_address(&self) -> String {
        format!("http://{}:{}", self.target_host, self.target_port)
    }
}

/// Parse the output of `install-create`
pub fn parse_install_output(text: &str) -> Result<InstallInfo, ExtractError> {
    let target_host =
        first_capture(&CORE_HOST, text).ok_or(ExtractError::MissingField { field: "core host" })?;
    let target_port =
        first_capture(&API_PORT, text).ok_or(ExtractError::MissingField { field: "api port" })?;

    Ok(InstallInfo {
        target_host,
        target_port,
        node_addresses: all_captures(&NODE_URL, text),
        admin_user: first_capture(&USERNAME, text),
        admin_password: first_capture(&PASSWORD, text),
    })
}

/// Address of the node created by the latest `node.create` event
pub fn node_created_address(event_list: &str) -> Result<String, ExtractError> {
    first_capture(&NODE_CREATED, event_list)
        .ok_or(ExtractError::MissingField { field: "created node" })
}

/// Platform name from `app-info`
pub fn app_platform(app_info: &str) -> Result<String, ExtractError> {
    first_capture(&PLATFORM, app_info).ok_or(ExtractError::MissingField { field: "app platform" })
}

/// Public address from `app-info`
pub fn app_address(app_info: &str) -> Result<String, ExtractError> {
    first_capture(&ADDRESS, app_info).ok_or(ExtractError::MissingField { field: "app address" })
}

/// Node addresses listed in a `node-list` table
pub fn cluster_node_addresses(node_list: &str) -> Vec<String> {
    all_captures(&CLUSTER_NODE, node_list)
        .into_iter()
        .filter(|address| !address.is_empty())
        .collect()
}

/// Whether `text` mentions `subject` followed later by `marker`.
/// `subject` is matched literally; `marker` is a pattern.
pub fn mentions_before(text: &str, subject: &str, marker: &str) -> Result<bool, ExtractError> {
    let pattern = format!("{}.*?{}", regex::escape(subject), marker);
    let re = Regex::new(&pattern).map_err(|e| ExtractError::InvalidPattern {
        pattern: pattern.clone(),
        message: e.to_string(),
    })?;
    Ok(re.is_match(text))
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn all_captures(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}
