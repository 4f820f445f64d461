//! Document assembly for generated Terraform configuration
//!
//! A [`Document`] is an ordered list of [`ResourceBlock`]s plus the top-level
//! `terraform { required_providers { ... } }` settings. Blocks are built from
//! typed [`Value`]s: literals are escaped when serialized and references are
//! typed [`Reference`]s that only become `aws_instance.x.public_dns` text at
//! the serialization boundary.
//!
//! # Invariants
//!
//! [`Document::append_all`] is one assembly step and is atomic. It fails with
//! [`Error::Configuration`] and leaves the document untouched when:
//!
//! - a block address is already present (or appears twice in the step)
//! - a reference or `depends_on` entry targets a block that is neither present
//!   nor appended in the same step
//! - a `local.<key>` reference names a key no locals block defines

pub mod hcl;
pub mod writer;

pub use writer::{SharedDocument, MAIN_TF};

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::{Error, Result};

// =============================================================================
// Addresses and references
// =============================================================================

/// Kind of a top-level block, carrying the resource type where there is one
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// `provider "<type>"`
    Provider(String),
    /// `resource "<type>" "<name>"`
    Resource(String),
    /// `data "<type>" "<name>"`
    Data(String),
    /// `locals`
    Locals,
    /// `output "<name>"`
    Output,
}

/// Typed address of a block (or of a single local value)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    /// Block kind
    pub kind: BlockKind,
    /// Instance name; for locals, the local key
    pub name: String,
}

impl Address {
    /// Address of a managed resource
    pub fn resource(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Resource(resource_type.into()),
            name: name.into(),
        }
    }

    /// Address of a data source
    pub fn data(data_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Data(data_type.into()),
            name: name.into(),
        }
    }

    /// Address of a local value
    pub fn local(key: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Locals,
            name: key.into(),
        }
    }

    /// Address of an output
    pub fn output(name: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Output,
            name: name.into(),
        }
    }

    /// Address of a provider configuration
    pub fn provider(provider_type: impl Into<String>) -> Self {
        let provider_type = provider_type.into();
        Self {
            kind: BlockKind::Provider(provider_type.clone()),
            name: provider_type,
        }
    }

    /// Reference to an attribute of this address
    pub fn attr(&self, name: impl Into<String>) -> Reference {
        Reference::new(self.clone()).attr(name)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BlockKind::Resource(t) => write!(f, "{}.{}", t, self.name),
            BlockKind::Data(t) => write!(f, "data.{}.{}", t, self.name),
            BlockKind::Locals => write!(f, "local.{}", self.name),
            BlockKind::Output => write!(f, "output.{}", self.name),
            BlockKind::Provider(t) => write!(f, "provider.{}", t),
        }
    }
}

/// One step of a traversal after the address
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSegment {
    /// `.name`
    Attr(String),
    /// `[index]`
    Index(u64),
}

/// An expression pointing into another block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    /// Block being referenced
    pub address: Address,
    /// Attribute path inside the block
    pub path: Vec<PathSegment>,
}

impl Reference {
    /// Reference to the block itself
    pub fn new(address: Address) -> Self {
        Self {
            address,
            path: Vec::new(),
        }
    }

    /// Append an attribute step
    pub fn attr(mut self, name: impl Into<String>) -> Self {
        self.path.push(PathSegment::Attr(name.into()));
        self
    }

    /// Append an index step
    pub fn index(mut self, index: u64) -> Self {
        self.path.push(PathSegment::Index(index));
        self
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        for segment in &self.path {
            match segment {
                PathSegment::Attr(name) => write!(f, ".{}", name)?,
                PathSegment::Index(i) => write!(f, "[{}]", i)?,
            }
        }
        Ok(())
    }
}

// =============================================================================
// Values
// =============================================================================

/// Piece of an interpolated string
#[derive(Clone, Debug, PartialEq)]
pub enum TemplatePart {
    /// Literal text, escaped on output
    Literal(String),
    /// `${reference}`
    Ref(Reference),
}

/// Attribute value: a literal or an expression
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// `null`
    Null,
    /// Quoted string literal
    String(String),
    /// `true` / `false`
    Bool(bool),
    /// Numeric literal
    Number(serde_json::Number),
    /// `[a, b]`
    List(Vec<Value>),
    /// `{ "k" = v }`
    Map(BTreeMap<String, Value>),
    /// Traversal such as `rancher2_cluster_v2.x.cluster_v1_id`
    Ref(Reference),
    /// Function call such as `file("/path/key.pem")`
    Call {
        /// Function name
        func: String,
        /// Arguments
        args: Vec<Value>,
    },
    /// Interpolated string
    Template(Vec<TemplatePart>),
}

impl Value {
    /// A `file(path)` call
    pub fn file(path: impl Into<String>) -> Self {
        Self::Call {
            func: "file".to_string(),
            args: vec![Self::String(path.into())],
        }
    }

    /// Convert an opaque JSON value into an attribute value
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.clone()),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Collect every reference reachable from this value
    pub fn references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Ref(r) => out.push(r),
            Self::List(items) => items.iter().for_each(|v| v.references(out)),
            Self::Map(map) => map.values().for_each(|v| v.references(out)),
            Self::Call { args, .. } => args.iter().for_each(|v| v.references(out)),
            Self::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Ref(r) = part {
                        out.push(r);
                    }
                }
            }
            Self::Null | Self::String(_) | Self::Bool(_) | Self::Number(_) => {}
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Self::Ref(r)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

// =============================================================================
// Blocks
// =============================================================================

/// Entry in a block body
#[derive(Clone, Debug, PartialEq)]
pub enum BodyItem {
    /// `key = value`
    Attribute(String, Value),
    /// Nested block
    Block(NestedBlock),
}

/// Ordered attributes and nested blocks
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Body {
    /// Items in emission order
    pub items: Vec<BodyItem>,
}

impl Body {
    /// Empty body
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.items.push(BodyItem::Attribute(key.into(), value.into()));
        self
    }

    /// Append an attribute when `value` is present
    pub fn attr_opt(self, key: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.attr(key, v),
            None => self,
        }
    }

    /// Append a nested block
    pub fn block(mut self, block: NestedBlock) -> Self {
        self.items.push(BodyItem::Block(block));
        self
    }

    /// Append every field of an opaque JSON object as an attribute
    pub fn extend_json(mut self, map: &serde_json::Map<String, serde_json::Value>) -> Self {
        for (key, value) in map {
            self.items
                .push(BodyItem::Attribute(key.clone(), Value::from_json(value)));
        }
        self
    }

    /// Look up an attribute by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.items.iter().find_map(|item| match item {
            BodyItem::Attribute(k, v) if k == key => Some(v),
            _ => None,
        })
    }

    /// Nested blocks with the given identifier
    pub fn blocks<'a>(&'a self, ident: &'a str) -> impl Iterator<Item = &'a NestedBlock> + 'a {
        self.items.iter().filter_map(move |item| match item {
            BodyItem::Block(b) if b.ident == ident => Some(b),
            _ => None,
        })
    }

    fn references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        for item in &self.items {
            match item {
                BodyItem::Attribute(_, v) => v.references(out),
                BodyItem::Block(b) => b.body.references(out),
            }
        }
    }
}

/// Block nested inside a resource body (`rke_config { ... }`)
#[derive(Clone, Debug, PartialEq)]
pub struct NestedBlock {
    /// Block identifier
    pub ident: String,
    /// Block labels
    pub labels: Vec<String>,
    /// Contents
    pub body: Body,
}

impl NestedBlock {
    /// Unlabelled nested block
    pub fn new(ident: impl Into<String>, body: Body) -> Self {
        Self {
            ident: ident.into(),
            labels: Vec::new(),
            body,
        }
    }

    /// Nested block with one label, e.g. `provisioner "remote-exec"`
    pub fn labelled(ident: impl Into<String>, label: impl Into<String>, body: Body) -> Self {
        Self {
            ident: ident.into(),
            labels: vec![label.into()],
            body,
        }
    }
}

/// One top-level block of the document
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceBlock {
    /// Block kind
    pub kind: BlockKind,
    /// Instance name, unique within the document for its kind
    pub name: String,
    /// Contents
    pub body: Body,
    /// Explicit ordering dependencies
    pub depends_on: Vec<Address>,
}

impl ResourceBlock {
    /// `resource "<type>" "<name>"`
    pub fn resource(resource_type: impl Into<String>, name: impl Into<String>, body: Body) -> Self {
        Self {
            kind: BlockKind::Resource(resource_type.into()),
            name: name.into(),
            body,
            depends_on: Vec::new(),
        }
    }

    /// `data "<type>" "<name>"`
    pub fn data(data_type: impl Into<String>, name: impl Into<String>, body: Body) -> Self {
        Self {
            kind: BlockKind::Data(data_type.into()),
            name: name.into(),
            body,
            depends_on: Vec::new(),
        }
    }

    /// `provider "<type>"`
    pub fn provider(provider_type: impl Into<String>, body: Body) -> Self {
        let provider_type = provider_type.into();
        Self {
            kind: BlockKind::Provider(provider_type.clone()),
            name: provider_type,
            body,
            depends_on: Vec::new(),
        }
    }

    /// `output "<name>" { value = ... }`
    pub fn output(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            kind: BlockKind::Output,
            name: name.into(),
            body: Body::new().attr("value", value),
            depends_on: Vec::new(),
        }
    }

    /// `locals { ... }`; `name` identifies the block and is not emitted
    pub fn locals(name: impl Into<String>, body: Body) -> Self {
        Self {
            kind: BlockKind::Locals,
            name: name.into(),
            body,
            depends_on: Vec::new(),
        }
    }

    /// Add an ordering dependency
    pub fn depends_on(mut self, address: Address) -> Self {
        self.depends_on.push(address);
        self
    }

    /// Address of this block
    pub fn address(&self) -> Address {
        Address {
            kind: self.kind.clone(),
            name: self.name.clone(),
        }
    }

    /// Reference to an attribute of this block
    pub fn attr(&self, name: impl Into<String>) -> Reference {
        self.address().attr(name)
    }

    /// Addresses this block makes available to references
    ///
    /// A locals block defines one `local.<key>` address per attribute.
    fn defined_addresses(&self) -> Vec<Address> {
        match self.kind {
            BlockKind::Locals => self
                .body
                .items
                .iter()
                .filter_map(|item| match item {
                    BodyItem::Attribute(key, _) => Some(Address::local(key.clone())),
                    BodyItem::Block(_) => None,
                })
                .collect(),
            _ => vec![self.address()],
        }
    }

    /// Every reference the block makes, including `depends_on`
    fn referenced_addresses(&self) -> Vec<&Address> {
        let mut refs = Vec::new();
        self.body.references(&mut refs);
        refs.into_iter()
            .map(|r| &r.address)
            .chain(self.depends_on.iter())
            .collect()
    }
}

// =============================================================================
// Document
// =============================================================================

/// Version constraint for a required provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderRequirement {
    /// Registry source, e.g. `rancher/rancher2`
    pub source: String,
    /// Version constraint
    pub version: String,
}

/// Top-level `terraform { ... }` settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    /// `required_providers` entries keyed by local name
    pub required_providers: BTreeMap<String, ProviderRequirement>,
}

impl Settings {
    /// Require a provider
    pub fn require(
        mut self,
        name: impl Into<String>,
        source: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.required_providers.insert(
            name.into(),
            ProviderRequirement {
                source: source.into(),
                version: version.into(),
            },
        );
        self
    }
}

/// Ordered, reference-checked set of blocks
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    settings: Settings,
    blocks: Vec<ResourceBlock>,
    defined: HashSet<Address>,
}

impl Document {
    /// Empty document with the given settings
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            blocks: Vec::new(),
            defined: HashSet::new(),
        }
    }

    /// Top-level settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Blocks in insertion order
    pub fn blocks(&self) -> &[ResourceBlock] {
        &self.blocks
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when no block has been appended
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// True if a block (or local key) with this address is present
    pub fn contains(&self, address: &Address) -> bool {
        self.defined.contains(address)
    }

    /// Append one block
    pub fn append(&mut self, block: ResourceBlock) -> Result<()> {
        self.append_all(vec![block])
    }

    /// Append blocks as one assembly step
    ///
    /// References may point at blocks already present or at any block in
    /// `blocks`. On error nothing is appended.
    pub fn append_all(&mut self, blocks: Vec<ResourceBlock>) -> Result<()> {
        let mut step: HashSet<Address> = HashSet::new();
        for block in &blocks {
            for address in block.defined_addresses() {
                if self.defined.contains(&address) || !step.insert(address.clone()) {
                    return Err(Error::configuration(format!(
                        "duplicate block address {}",
                        address
                    )));
                }
            }
        }

        for block in &blocks {
            for target in block.referenced_addresses() {
                if !self.defined.contains(target) && !step.contains(target) {
                    return Err(Error::configuration(format!(
                        "{} references {} which is not defined",
                        block.address(),
                        target
                    )));
                }
            }
        }

        self.defined.extend(step);
        self.blocks.extend(blocks);
        Ok(())
    }

    /// Render the document as HCL text
    pub fn serialize(&self) -> Result<String> {
        self::hcl::render(&self.settings, &self.blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(name: &str) -> ResourceBlock {
        ResourceBlock::resource("aws_instance", name, Body::new().attr("ami", "ami-123"))
    }

    fn null_resource_on(name: &str, host: &ResourceBlock) -> ResourceBlock {
        ResourceBlock::resource(
            "null_resource",
            name,
            Body::new().attr("host", host.attr("public_dns")),
        )
    }

    // ==========================================================================
    // Story Tests: Assembling a document
    // ==========================================================================

    /// Story: every block address is unique
    #[test]
    fn story_duplicate_addresses_are_rejected() {
        let mut doc = Document::default();
        doc.append(instance("rke2_server1")).unwrap();

        let err = doc.append(instance("rke2_server1")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("aws_instance.rke2_server1"));
        assert_eq!(doc.len(), 1);
    }

    /// Story: the same name under another resource type is a different address
    #[test]
    fn story_names_are_scoped_by_type() {
        let mut doc = Document::default();
        let server = instance("rke2_server1");
        doc.append(server.clone()).unwrap();
        doc.append(null_resource_on("rke2_server1", &server)).unwrap();
        assert_eq!(doc.len(), 2);
    }

    /// Story: references must point backwards or into the same step
    #[test]
    fn story_dangling_references_are_rejected() {
        let mut doc = Document::default();
        let server = instance("rke2_server1");

        let err = doc
            .append(null_resource_on("install", &server))
            .unwrap_err();
        assert!(err.to_string().contains("not defined"));
        assert!(doc.is_empty());

        doc.append_all(vec![null_resource_on("install", &server), server.clone()])
            .unwrap();
        assert_eq!(doc.len(), 2);
        assert!(doc.contains(&server.address()));
    }

    /// Story: depends_on entries are checked like references
    #[test]
    fn story_depends_on_targets_must_exist() {
        let mut doc = Document::default();
        let second = instance("rke2_server2").depends_on(Address::resource("null_resource", "rke2_server1"));
        assert!(doc.append(second).is_err());
    }

    /// Story: a failed step leaves the document exactly as it was
    #[test]
    fn story_failed_steps_are_atomic() {
        let mut doc = Document::default();
        doc.append(instance("a")).unwrap();

        let ghost = instance("ghost");
        let result = doc.append_all(vec![instance("b"), null_resource_on("c", &ghost)]);
        assert!(result.is_err());
        assert_eq!(doc.len(), 1);
        assert!(!doc.contains(&Address::resource("aws_instance", "b")));
    }

    /// Story: local references need a locals block defining the key
    #[test]
    fn story_locals_define_one_address_per_key() {
        let mut doc = Document::default();
        let cluster = ResourceBlock::resource("rancher2_cluster_v2", "tfp-abcde", Body::new());
        doc.append(cluster.clone()).unwrap();

        let register = ResourceBlock::resource(
            "null_resource",
            "tfp-abcde-register",
            Body::new().attr("command", Reference::new(Address::local("tfp-abcde_node_command"))),
        );
        assert!(doc.append(register.clone()).is_err());

        let locals = ResourceBlock::locals(
            "custom_clusters",
            Body::new().attr(
                "tfp-abcde_node_command",
                cluster
                    .attr("cluster_registration_token")
                    .index(0)
                    .attr("insecure_node_command"),
            ),
        );
        doc.append(locals).unwrap();
        doc.append(register).unwrap();
        assert!(doc.contains(&Address::local("tfp-abcde_node_command")));
    }

    #[test]
    fn references_render_in_traversal_syntax() {
        let r = Address::resource("rancher2_cluster_v2", "x")
            .attr("cluster_registration_token")
            .index(0)
            .attr("insecure_node_command");
        assert_eq!(
            r.to_string(),
            "rancher2_cluster_v2.x.cluster_registration_token[0].insecure_node_command"
        );
        assert_eq!(Address::data("aws_vpc", "main").attr("id").to_string(), "data.aws_vpc.main.id");
    }

    #[test]
    fn json_objects_become_values() {
        let json = serde_json::json!({"region": "us-east-2", "count": 2, "spot": false, "tags": ["a"]});
        let body = Body::new().extend_json(json.as_object().unwrap());
        assert_eq!(body.get("region"), Some(&Value::String("us-east-2".into())));
        assert_eq!(body.get("count"), Some(&Value::from(2i64)));
        assert_eq!(body.get("spot"), Some(&Value::Bool(false)));
        assert_eq!(body.get("tags"), Some(&Value::List(vec![Value::from("a")])));
    }
}
