//! Unfold Infrastructure
//!
//! Declares the batch infrastructure behind the molecular unfolding
//! workload and renders it into a provisioning template.
//!
//! # Overview
//!
//! A deployment is a tree of resources under a single stack root:
//! - [`ResourceTree`] holds the declared nodes, addressed by [`NodeId`]
//! - [`BatchTopology`] declares roles, network, compute, job definitions,
//!   the aggregation function and the sweep [`StateMachine`]
//! - [`CrossAccountImageResolver`] is an [`Aspect`] that grants the batch
//!   execution role pull access to every private registry a job definition
//!   image lives in
//! - [`synthesize`] renders the resolved tree into a [`Template`]
//!
//! # Resolution
//!
//! Job definition images are usually published as container assets into
//! another account's registry. Their URIs are only known as substitution
//! templates:
//!
//! ```text
//! {"Fn::Sub": "123456789012.dkr.ecr.${AWS::Region}.${AWS::URLSuffix}/repo:tag"}
//! ```
//!
//! The resolver extracts `repo`, and attaches a `CrossAccountECR-repo-{digest}`
//! policy, one per distinct repository ARN, to the role whose path ends with `/batchExecutionRole`, whether
//! the walk reaches that role before or after the job definition.
//!
//! # Example
//!
//! ```ignore
//! use unfold_infra::{App, DeployConfig, OutputFormat};
//!
//! let config = DeployConfig::load(Some("unfold.yaml".as_ref()))?;
//! let assembly = App::new(config).synth()?;
//! for grant in &assembly.report.grants {
//!     println!("{} -> {}", grant.repository, grant.role_path);
//! }
//! println!("{}", assembly.template.render(OutputFormat::Yaml)?);
//! ```

pub mod app;
pub mod aspect;
pub mod config;
pub mod devices;
pub mod diagnostics;
pub mod ecr;
pub mod error;
pub mod iam;
pub mod resolver;
pub mod synth;
pub mod template;
pub mod topology;
pub mod tree;
pub mod workflow;

pub use app::{App, Assembly};
pub use aspect::Aspect;
pub use config::{DeployConfig, ImageSource, InstanceShape};
pub use diagnostics::{Diagnostic, DiagnosticSink, Level, MemorySink, TracingSink};
pub use ecr::EcrRepository;
pub use error::{InfraError, InfraResult};
pub use iam::{Policy, PolicyDocument, PolicyStatement, Role};
pub use resolver::{
    CrossAccountImageResolver, Grant, GrantTiming, ResolutionReport, ResolverConfig,
    pull_policy_name,
};
pub use synth::{Output, OutputFormat, Template, policy_logical_id, synthesize};
pub use template::{ImageRef, TemplateExpr};
pub use topology::BatchTopology;
pub use tree::{JobDefinition, NodeId, NodeKind, Resource, ResourceNode, ResourceTree};
pub use workflow::{State, StateKind, StateMachine, StateMachineBuilder};
