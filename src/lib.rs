//! tfp-forge - Terraform configuration synthesis and apply orchestration
//!
//! Provisions heterogeneous Kubernetes clusters (hosted, node-driver, custom,
//! imported and air-gapped) through a Rancher management server by generating
//! Terraform configuration and driving it through ordered apply phases.
//!
//! # Architecture
//!
//! - Declarative cluster records are decoded once into a typed [`cluster::Topology`]
//! - The [`dispatch::Dispatcher`] gives each cluster generated names and routes it
//!   to the builder chain the [`template::TemplateCatalog`] registers for its topology
//! - Builders produce typed resource blocks; the [`document::Document`] rejects
//!   duplicate addresses and dangling references before anything is written
//! - The [`pipeline::Orchestrator`] writes `main.tf`, applies it, reads outputs and
//!   feeds them to the next phase; failures trigger [`cleanup`]
//!
//! # Modules
//!
//! - [`cluster`] - Cluster specs, node pools and topologies
//! - [`config`] - YAML run configuration
//! - [`document`] - Resource blocks, references, HCL rendering and the shared writer
//! - [`template`] - Block builders and the topology catalog
//! - [`dispatch`] - Topology dispatch and document assembly
//! - [`pipeline`] - Phase orchestration, the apply tool and the standalone pipeline
//! - [`cleanup`] - Destroy and artifact removal after failures
//! - [`verify`] - Management API verification boundary
//! - [`retry`] - Backoff retries and bounded polling
//! - [`namegen`] - Random resource names
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod namegen;
pub mod pipeline;
pub mod retry;
pub mod template;
pub mod verify;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
