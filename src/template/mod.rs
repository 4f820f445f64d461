//! Block synthesis
//!
//! Each [`BlockBuilder`] turns a [`SynthContext`] (one cluster's spec, its
//! generated names and the run settings) into Terraform resource blocks. The
//! [`TemplateCatalog`] maps every supported topology to the ordered chain of
//! builders that produces its blocks.
//!
//! Builders are pure apart from reading remote shell scripts and key material
//! through [`ScriptLibrary`]; they never touch the document or the apply tool.
//!
//! # Builders
//!
//! - [`credential`] - cloud credentials for node drivers and hosted clusters
//! - [`hosted`] - AKS, EKS and GKE clusters
//! - [`rke1`] - RKE1 node templates, clusters and node pools
//! - [`rke2`] - RKE2/K3s machine configs and `rancher2_cluster_v2`
//! - [`custom`] - EC2 nodes registered into custom and airgapped clusters
//! - [`imported`] - clusters imported by applying the registration manifest
//! - [`outputs`] - per-cluster id outputs used for verification
//! - [`providers`] - provider blocks and `required_providers`
//! - [`standalone`] - the standalone Rancher server and its registries

pub mod catalog;
pub mod credential;
pub mod custom;
pub mod hosted;
pub mod imported;
pub mod outputs;
pub mod providers;
pub mod rke1;
pub mod rke2;
pub mod standalone;

pub use catalog::{BuilderChain, TemplateCatalog};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cluster::{ClusterSpec, ProviderConfig, Topology};
use crate::config::{
    AwsConfig, LinodeConfig, RancherConfig, RunConfig, StandaloneConfig, StandaloneRegistryConfig,
};
use crate::document::{Address, Body, NestedBlock, Reference, ResourceBlock, Value};
use crate::{Error, Result};

// =============================================================================
// Builder trait
// =============================================================================

/// When a builder's blocks are appended during dispatch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildStage {
    /// Appended with the rest of the cluster's blocks
    Cluster,
    /// Appended after every cluster and the shared locals block
    Registration,
}

/// Produces resource blocks for one cluster
pub trait BlockBuilder: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Dispatch stage
    fn stage(&self) -> BuildStage {
        BuildStage::Cluster
    }

    /// Build the blocks for the cluster in `ctx`
    fn build(&self, ctx: &SynthContext<'_>) -> Result<Vec<ResourceBlock>>;
}

/// Everything a builder may read
#[derive(Clone, Copy)]
pub struct SynthContext<'a> {
    /// The cluster being synthesized
    pub spec: &'a ClusterSpec,
    /// Names generated for this cluster
    pub names: &'a ClusterNames,
    /// Run-wide settings
    pub settings: &'a SynthSettings,
}

// =============================================================================
// Names
// =============================================================================

/// Names generated once per cluster by the dispatcher
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterNames {
    /// Cluster resource name
    pub cluster: String,
    /// Node pool prefix
    pub pool: String,
    /// Cloud credential name
    pub credential: String,
    /// Node template / machine config name
    pub machine_config: String,
}

impl ClusterNames {
    /// Address of the cloud credential
    pub fn credential_address(&self) -> Address {
        Address::resource("rancher2_cloud_credential", &self.credential)
    }

    /// Address of the RKE2/K3s machine config
    pub fn machine_config_address(&self) -> Address {
        Address::resource("rancher2_machine_config_v2", &self.machine_config)
    }

    /// Address of the RKE1 node template
    pub fn node_template_address(&self) -> Address {
        Address::resource("rancher2_node_template", &self.machine_config)
    }

    /// Address of the cluster resource for `topology`
    pub fn cluster_address(&self, topology: &Topology) -> Address {
        if uses_cluster_v2(topology) {
            Address::resource("rancher2_cluster_v2", &self.cluster)
        } else {
            Address::resource("rancher2_cluster", &self.cluster)
        }
    }

    /// Reference to the v1 cluster id, whichever resource type holds it
    pub fn cluster_id(&self, topology: &Topology) -> Reference {
        let address = self.cluster_address(topology);
        if uses_cluster_v2(topology) {
            address.attr("cluster_v1_id")
        } else {
            address.attr("id")
        }
    }

    /// `cluster_registration_token[0].<field>` on the cluster resource
    pub fn registration_token(&self, topology: &Topology, field: &str) -> Reference {
        Reference::new(self.cluster_address(topology))
            .attr("cluster_registration_token")
            .index(0)
            .attr(field)
    }

    /// Key of this cluster's node command in the shared locals block
    pub fn node_command_key(&self) -> String {
        format!("{}_node_command", self.cluster)
    }

    /// Name of the output holding the cluster id
    pub fn cluster_id_output(&self) -> String {
        format!("{}_cluster_id", self.cluster)
    }
}

/// RKE2/K3s clusters other than imports are `rancher2_cluster_v2` resources
pub fn uses_cluster_v2(topology: &Topology) -> bool {
    match topology {
        Topology::Hosted(_) | Topology::Imported { .. } => false,
        other => other.distro().is_some_and(|d| d.is_v2()),
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Run-wide inputs shared by every builder
#[derive(Clone, Debug, Default)]
pub struct SynthSettings {
    /// Management server
    pub rancher: RancherConfig,
    /// EC2 settings
    pub aws: AwsConfig,
    /// Linode settings
    pub linode: LinodeConfig,
    /// Infrastructure provider for standalone servers
    pub provider: String,
    /// `rancher2` provider version constraint
    pub provider_version: String,
    /// SSH key path used in `file()` calls
    pub private_key_path: PathBuf,
    /// Remote shell scripts
    pub scripts: ScriptLibrary,
    /// Cloud credential fields by credential kind
    pub cloud_credentials: BTreeMap<String, ProviderConfig>,
    /// Standalone server install
    pub standalone: StandaloneConfig,
    /// Standalone registries
    pub standalone_registry: StandaloneRegistryConfig,
}

impl SynthSettings {
    /// Settings derived from a run configuration
    pub fn from_config(config: &RunConfig) -> Self {
        let tf = &config.terraform;
        Self {
            rancher: config.rancher.clone(),
            aws: tf.aws.clone(),
            linode: tf.linode.clone(),
            provider: tf.provider.clone(),
            provider_version: tf.provider_version.clone(),
            private_key_path: tf.private_key_path.clone(),
            scripts: ScriptLibrary::new(&tf.scripts_dir),
            cloud_credentials: tf.cloud_credentials.clone(),
            standalone: tf.standalone.clone(),
            standalone_registry: tf.standalone_registry.clone(),
        }
    }

    /// `file("<private key>")`
    pub fn private_key(&self) -> Value {
        Value::file(self.private_key_path.to_string_lossy().into_owned())
    }
}

/// Directory of remote shell scripts embedded into provisioners
#[derive(Clone, Debug, Default)]
pub struct ScriptLibrary {
    dir: PathBuf,
}

impl ScriptLibrary {
    /// Scripts under `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Read a script as an opaque payload
    pub fn load(&self, name: &str) -> Result<String> {
        let path = self.dir.join(name);
        std::fs::read_to_string(&path).map_err(|e| Error::io(path, e))
    }
}

// =============================================================================
// Shared block helpers
// =============================================================================

/// Wrap `payload` in a heredoc that writes it to `target`
///
/// The delimiter is chosen so that it never occurs in the payload. A payload
/// that ends in a newline is written byte for byte; one that does not gains
/// a single trailing newline, since a heredoc always ends its last line.
pub fn heredoc(target: &str, payload: &str) -> String {
    let mut delimiter = "EOF".to_string();
    let mut n = 0;
    while payload.contains(&delimiter) {
        n += 1;
        delimiter = format!("TFP_EOF_{n}");
    }
    let separator = if payload.is_empty() || payload.ends_with('\n') { "" } else { "\n" };
    format!("cat <<'{delimiter}' > {target}\n{payload}{separator}{delimiter}")
}

/// Quote `word` for a POSIX shell; plain words pass through unchanged
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Inline commands that write a script, make it executable and run it
///
/// Each argument reaches the script as exactly one word.
pub fn script_commands(name: &str, payload: &str, args: &[&str]) -> Vec<Value> {
    let target = format!("/tmp/{name}");
    let mut invocation = target.clone();
    for arg in args {
        invocation.push(' ');
        invocation.push_str(&shell_quote(arg));
    }
    vec![
        Value::from(heredoc(&target, payload)),
        Value::from(format!("chmod +x {target}")),
        Value::from(format!("bash -c '{}'", invocation.replace('\'', r"'\''"))),
    ]
}

/// SSH `connection` block for remote-exec
pub fn ssh_connection(host: impl Into<Value>, settings: &SynthSettings) -> NestedBlock {
    NestedBlock::new(
        "connection",
        Body::new()
            .attr("type", "ssh")
            .attr("host", host)
            .attr("user", &settings.aws.user)
            .attr("private_key", settings.private_key()),
    )
}

/// `provisioner "remote-exec"` running `inline` over `connection`
pub fn remote_exec(connection: NestedBlock, inline: Vec<Value>) -> NestedBlock {
    NestedBlock::labelled(
        "provisioner",
        "remote-exec",
        Body::new().block(connection).attr("inline", Value::List(inline)),
    )
}

/// `null_resource` that runs `inline` on `host`
pub fn remote_exec_resource(
    name: impl Into<String>,
    host: impl Into<Value>,
    inline: Vec<Value>,
    settings: &SynthSettings,
) -> ResourceBlock {
    ResourceBlock::resource(
        "null_resource",
        name,
        Body::new().block(remote_exec(ssh_connection(host, settings), inline)),
    )
}

/// Fail with a configuration error when `value` is blank
pub fn require_field(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::configuration(format!("{what} is required")));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::cluster::NodePool;

    pub fn names() -> ClusterNames {
        ClusterNames {
            cluster: "tfp-clstr".into(),
            pool: "tfp-pool0".into(),
            credential: "tfp-creds".into(),
            machine_config: "tfp-mconf".into(),
        }
    }

    pub fn settings() -> SynthSettings {
        let mut settings = SynthSettings {
            provider: "aws".into(),
            provider_version: "5.1.0".into(),
            private_key_path: PathBuf::from("/keys/id.pem"),
            ..Default::default()
        };
        settings.rancher.host = "rancher.example.com".into();
        settings.rancher.admin_token = "token-abc".into();
        settings.aws.region = "us-east-2".into();
        settings.aws.ami = "ami-0123".into();
        settings.aws.instance_type = "t3.xlarge".into();
        settings.aws.user = "ubuntu".into();
        settings.aws.volume_size = 50;
        settings.cloud_credentials.insert(
            "amazonec2".into(),
            serde_json::json!({"access_key": "AK", "secret_key": "SK", "default_region": "us-east-2"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        );
        settings
    }

    pub fn spec(module: &str) -> ClusterSpec {
        ClusterSpec::new(module.parse().unwrap(), "v1.30.4+rke2r1")
            .with_node_pools(vec![NodePool::all_roles(1), NodePool::new(false, false, true, 2)])
            .with_provider_config(
                serde_json::json!({"region": "us-east-2", "instance_type": "t3.large"})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            )
    }

    /// Build through a builder and return its blocks
    pub fn build(builder: &dyn BlockBuilder, spec: &ClusterSpec, settings: &SynthSettings) -> Result<Vec<ResourceBlock>> {
        let names = names();
        builder.build(&SynthContext {
            spec,
            names: &names,
            settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heredoc_delimiter_never_appears_in_payload() {
        let plain = heredoc("/tmp/a.sh", "echo hi\n");
        assert_eq!(plain, "cat <<'EOF' > /tmp/a.sh\necho hi\nEOF");

        let tricky = "cat <<EOF\nx\nEOF\necho TFP_EOF_1";
        let framed = heredoc("/tmp/b.sh", tricky);
        let first_line = framed.lines().next().unwrap();
        assert_eq!(first_line, "cat <<'TFP_EOF_2' > /tmp/b.sh");
        assert!(framed.ends_with("TFP_EOF_1\nTFP_EOF_2"));
    }

    fn bash(command: &str) -> std::process::Output {
        let output = std::process::Command::new("bash")
            .arg("-c")
            .arg(command)
            .output()
            .unwrap();
        assert!(output.status.success(), "{command}: {}", String::from_utf8_lossy(&output.stderr));
        output
    }

    #[cfg(unix)]
    #[rstest::rstest]
    #[case::trailing_newline("#!/bin/bash\necho hi\n", "#!/bin/bash\necho hi\n")]
    #[case::blank_lines_kept("a\n\n\nb\n\n", "a\n\n\nb\n\n")]
    #[case::no_trailing_newline("echo hi", "echo hi\n")]
    #[case::empty("", "")]
    #[case::no_expansion("echo $HOME `id` \\n\nEOF\n", "echo $HOME `id` \\n\nEOF\n")]
    fn heredoc_writes_the_payload_bytes(#[case] payload: &str, #[case] expected: &str) {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("script.sh");
        bash(&heredoc(&target.display().to_string(), payload));
        assert_eq!(std::fs::read(&target).unwrap(), expected.as_bytes());
    }

    #[test]
    fn script_commands_write_chmod_and_run() {
        let cmds = script_commands("setup.sh", "echo hi", &["a", "b"]);
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[1], Value::from("chmod +x /tmp/setup.sh"));
        assert_eq!(cmds[2], Value::from("bash -c '/tmp/setup.sh a b'"));
    }

    #[test]
    fn shell_quote_leaves_plain_words_alone() {
        assert_eq!(shell_quote("v1.30.4+rke2r1"), "v1.30.4+rke2r1");
        assert_eq!(shell_quote("reg.example.com:5000/path"), "reg.example.com:5000/path");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[cfg(unix)]
    #[test]
    fn script_arguments_arrive_as_single_words() {
        let name = format!("{}.sh", crate::namegen::append_random_string("tfp-args"));
        let args = ["plain", "two words", "it's", "", "$(echo injected)", "a;b", "p@ss\"w'rd"];
        let cmds = script_commands(&name, "#!/bin/bash\nprintf '<%s>\\n' \"$@\"\n", &args);

        let mut stdout = Vec::new();
        for cmd in &cmds {
            match cmd {
                Value::String(cmd) => stdout = bash(cmd).stdout,
                other => panic!("expected a string command, got {other:?}"),
            }
        }
        let _ = std::fs::remove_file(format!("/tmp/{name}"));

        let expected: String = args.iter().map(|a| format!("<{a}>\n")).collect();
        assert_eq!(String::from_utf8(stdout).unwrap(), expected);
    }

    #[test]
    fn missing_script_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let lib = ScriptLibrary::new(dir.path());
        let err = lib.load("setup.sh").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(err.to_string().contains("setup.sh"));
    }

    #[test]
    fn cluster_addresses_follow_topology() {
        let names = test_support::names();
        let v2: Topology = "ec2_rke2".parse().unwrap();
        let v1: Topology = "ec2_rke1".parse().unwrap();
        let imported: Topology = "import_rke2".parse().unwrap();

        assert_eq!(names.cluster_id(&v2).to_string(), "rancher2_cluster_v2.tfp-clstr.cluster_v1_id");
        assert_eq!(names.cluster_id(&v1).to_string(), "rancher2_cluster.tfp-clstr.id");
        assert_eq!(names.cluster_id(&imported).to_string(), "rancher2_cluster.tfp-clstr.id");
        assert_eq!(
            names.registration_token(&v2, "insecure_node_command").to_string(),
            "rancher2_cluster_v2.tfp-clstr.cluster_registration_token[0].insecure_node_command"
        );
    }

    #[test]
    fn blank_fields_are_rejected() {
        assert!(require_field("  ", "registry username").is_err());
        assert!(require_field("admin", "registry username").is_ok());
    }
}
