//! Run configuration loaded from YAML
//!
//! The file is named by `--config` or `TFP_CONFIG`. Everything except the
//! Rancher endpoint and at least one cluster (for cluster commands) has a
//! default.
//!
//! ```yaml
//! rancher:
//!   host: rancher.example.com
//!   adminToken: token-abc:xyz
//!   cleanup: true
//! terraform:
//!   workDir: /tmp/tfp
//!   privateKeyPath: /home/me/.ssh/id.pem
//!   scriptsDir: ./scripts
//!   aws:
//!     region: us-east-2
//!     ami: ami-0123
//! multiCluster: true
//! clusters:
//!   - module: ec2_rke2
//!     kubernetesVersion: v1.30.4+rke2r1
//!     nodePools:
//!       - { etcd: true, controlplane: true, worker: true, quantity: 1 }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterSpec, NodePool, PrivateRegistry, ProviderConfig, Psact, Scaling, Snapshots};
use crate::dispatch::BatchPolicy;
use crate::retry::PollPolicy;
use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "TFP_CONFIG";

/// Top-level run configuration
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Management server endpoint
    pub rancher: RancherConfig,
    /// Generation and apply settings
    #[serde(default)]
    pub terraform: TerraformConfig,
    /// Treat `clusters` as a batch rather than a single cluster
    #[serde(default)]
    pub multi_cluster: bool,
    /// What to do with entries whose module is unsupported
    #[serde(default)]
    pub batch_policy: BatchPolicy,
    /// Bounded wait for the management client
    #[serde(default)]
    pub poll: PollConfig,
    /// Declarative cluster records
    #[serde(default)]
    pub clusters: Vec<ClusterInput>,
}

impl RunConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml(&text)
    }

    /// Parse and validate config text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rancher.host.trim().is_empty() {
            return Err(Error::configuration("rancher.host is required"));
        }
        Ok(())
    }
}

/// Rancher management server settings
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RancherConfig {
    /// Hostname without scheme
    pub host: String,
    /// API token used by the `rancher2` provider
    #[serde(default)]
    pub admin_token: String,
    /// Skip TLS verification
    #[serde(default)]
    pub insecure: bool,
    /// Destroy applied infrastructure when a phase fails
    #[serde(default = "default_true")]
    pub cleanup: bool,
}

impl RancherConfig {
    /// `https://<host>` for provider blocks
    pub fn api_url(&self) -> String {
        format!("https://{}", self.host)
    }
}

/// Terraform generation and execution settings
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerraformConfig {
    /// Directory holding `main.tf` and state
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Terraform executable
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Seconds before a single terraform command is abandoned
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// SSH key used by remote-exec connections
    #[serde(default)]
    pub private_key_path: PathBuf,
    /// Directory holding the remote shell scripts
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,
    /// Infrastructure provider for standalone servers: `aws` or `linode`
    #[serde(default = "default_provider")]
    pub provider: String,
    /// `rancher2` provider version constraint
    #[serde(default = "default_rancher2_version")]
    pub provider_version: String,
    /// AWS settings for instances created by this tool
    #[serde(default)]
    pub aws: AwsConfig,
    /// Linode settings for standalone servers
    #[serde(default)]
    pub linode: LinodeConfig,
    /// Cloud credential fields keyed by credential kind (`amazonec2`, `azure`, ...)
    #[serde(default)]
    pub cloud_credentials: BTreeMap<String, ProviderConfig>,
    /// Standalone Rancher server install
    #[serde(default)]
    pub standalone: StandaloneConfig,
    /// Registries created alongside the standalone server
    #[serde(default)]
    pub standalone_registry: StandaloneRegistryConfig,
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            binary: default_binary(),
            command_timeout_secs: default_command_timeout(),
            private_key_path: PathBuf::new(),
            scripts_dir: default_scripts_dir(),
            provider: default_provider(),
            provider_version: default_rancher2_version(),
            aws: AwsConfig::default(),
            linode: LinodeConfig::default(),
            cloud_credentials: BTreeMap::new(),
            standalone: StandaloneConfig::default(),
            standalone_registry: StandaloneRegistryConfig::default(),
        }
    }
}

impl TerraformConfig {
    /// Per-command timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// AWS settings for EC2 instances
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsConfig {
    /// Region
    #[serde(default)]
    pub region: String,
    /// Access key for the `aws` provider
    #[serde(default)]
    pub access_key: String,
    /// Secret key for the `aws` provider
    #[serde(default)]
    pub secret_key: String,
    /// AMI for every instance
    #[serde(default)]
    pub ami: String,
    /// Default instance type when a pool does not set one
    #[serde(default)]
    pub instance_type: String,
    /// Subnet
    #[serde(default)]
    pub subnet_id: String,
    /// Security groups
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// EC2 key pair name
    #[serde(default)]
    pub key_name: String,
    /// Root volume size in GiB
    #[serde(default = "default_volume_size")]
    pub volume_size: u32,
    /// SSH user
    #[serde(default = "default_aws_user")]
    pub user: String,
    /// Prefix for instance `Name` tags
    #[serde(default)]
    pub hostname_prefix: String,
    /// Bastion used to reach airgapped nodes
    #[serde(default)]
    pub bastion_host: String,
}

/// Linode settings for standalone servers
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinodeConfig {
    /// API token
    #[serde(default)]
    pub token: String,
    /// Region
    #[serde(default)]
    pub region: String,
    /// Image
    #[serde(default)]
    pub image: String,
    /// Instance type
    #[serde(default)]
    pub instance_type: String,
    /// Root password
    #[serde(default)]
    pub root_password: String,
}

/// Standalone Rancher server install parameters
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StandaloneConfig {
    /// Public hostname of the Rancher server
    #[serde(default)]
    pub rancher_hostname: String,
    /// Helm repository URL
    #[serde(default)]
    pub rancher_chart_repository: String,
    /// Helm repository name
    #[serde(default)]
    pub repo: String,
    /// cert-manager chart version
    #[serde(default)]
    pub cert_manager_version: String,
    /// Certificate source (`self-signed`, `lets-encrypt`)
    #[serde(default)]
    pub cert_type: String,
    /// Rancher image tag
    #[serde(default)]
    pub rancher_tag_version: String,
    /// Rancher chart version
    #[serde(default)]
    pub chart_version: String,
    /// Initial admin password
    #[serde(default)]
    pub bootstrap_password: String,
    /// Rancher image
    #[serde(default)]
    pub rancher_image: String,
    /// Agent image override
    #[serde(default)]
    pub rancher_agent_image: String,
    /// RKE2 version for the server cluster
    #[serde(default)]
    pub rke2_version: String,
    /// OS user on the servers
    #[serde(default)]
    pub os_user: String,
    /// OS group on the servers
    #[serde(default)]
    pub os_group: String,
    /// Send the RKE2 servers' outbound traffic through a proxy bastion
    #[serde(default)]
    pub proxy: bool,
}

/// Registries created for the standalone server
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StandaloneRegistryConfig {
    /// Create the registry hosts and phase-two registries
    #[serde(default)]
    pub enabled: bool,
    /// Registry name
    #[serde(default)]
    pub registry_name: String,
    /// User for the authenticated registry
    #[serde(default)]
    pub registry_username: String,
    /// Password for the authenticated registry
    #[serde(default)]
    pub registry_password: String,
    /// Path to image assets on the registry hosts
    #[serde(default)]
    pub assets_path: String,
    /// ECR repository URI
    #[serde(default)]
    pub ecr_uri: String,
}

/// Bounded polling settings
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollConfig {
    /// Seconds between checks
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Seconds before giving up
    #[serde(default = "default_poll_deadline")]
    pub deadline_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            deadline_secs: default_poll_deadline(),
        }
    }
}

impl From<&PollConfig> for PollPolicy {
    fn from(config: &PollConfig) -> Self {
        PollPolicy::new(
            Duration::from_secs(config.interval_secs),
            Duration::from_secs(config.deadline_secs),
        )
    }
}

/// One declarative cluster record
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInput {
    /// Topology module, e.g. `ec2_rke2` or `custom_ec2_k3s`
    pub module: String,
    /// Kubernetes version
    #[serde(default)]
    pub kubernetes_version: String,
    /// Node pools
    #[serde(default)]
    pub node_pools: Vec<NodePool>,
    /// Pod security admission template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psact: Option<Psact>,
    /// Snapshot parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshots: Option<Snapshots>,
    /// Scale up/down pools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling: Option<Scaling>,
    /// Private registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_registry: Option<PrivateRegistry>,
    /// Opaque provider fields
    #[serde(default)]
    pub provider_config: ProviderConfig,
    /// Authorized cluster endpoint
    #[serde(default)]
    pub local_auth_endpoint: bool,
    /// CNI plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_plugin: Option<String>,
}

impl TryFrom<&ClusterInput> for ClusterSpec {
    type Error = Error;

    fn try_from(input: &ClusterInput) -> Result<Self> {
        let topology = input.module.parse()?;
        let spec = ClusterSpec {
            topology,
            kubernetes_version: input.kubernetes_version.clone(),
            node_pools: input.node_pools.clone(),
            psact: input.psact,
            snapshots: input.snapshots.clone(),
            scaling: input.scaling.clone(),
            private_registry: input.private_registry.clone(),
            provider_config: input.provider_config.clone(),
            local_auth_endpoint: input.local_auth_endpoint,
            network_plugin: input.network_plugin.clone(),
        };
        spec.validate()?;
        Ok(spec)
    }
}

fn default_true() -> bool {
    true
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_binary() -> String {
    "terraform".to_string()
}

fn default_command_timeout() -> u64 {
    3600
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_provider() -> String {
    "aws".to_string()
}

fn default_rancher2_version() -> String {
    "5.1.0".to_string()
}

fn default_volume_size() -> u32 {
    50
}

fn default_aws_user() -> String {
    "ubuntu".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_poll_deadline() -> u64 {
    300
}
