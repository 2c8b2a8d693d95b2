//! The deployment pipeline: configuration to template.

use tracing::{info, warn};

use crate::config::DeployConfig;
use crate::diagnostics::DiagnosticSink;
use crate::error::{InfraError, InfraResult};
use crate::resolver::{CrossAccountImageResolver, ResolutionReport};
use crate::synth::{Template, synthesize};
use crate::topology::BatchTopology;
use crate::tree::ResourceTree;

/// Output of a pipeline run.
#[derive(Debug, Clone)]
pub struct Assembly {
    /// The synthesized document.
    pub template: Template,

    /// What the cross-account resolver granted.
    pub report: ResolutionReport,

    /// The resolved topology the template was rendered from.
    pub topology: BatchTopology,
}

/// Runs topology declaration, resolution and synthesis for one
/// configuration.
pub struct App {
    config: DeployConfig,
    sink: Option<Box<dyn DiagnosticSink>>,
}

impl App {
    pub fn new(config: DeployConfig) -> Self {
        Self { config, sink: None }
    }

    /// Route resolver diagnostics to `sink` instead of `tracing`.
    pub fn with_sink(mut self, sink: Box<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Declare the topology.
    pub fn build(&self) -> InfraResult<BatchTopology> {
        self.config.validate()?;
        BatchTopology::build(&self.config)
    }

    /// Walk `tree` once with a fresh cross-account resolver.
    ///
    /// Fails with [`InfraError::UnresolvedRegistries`] only when the
    /// resolver is configured to treat leftovers as errors.
    pub fn resolve(&mut self, tree: &mut ResourceTree) -> InfraResult<ResolutionReport> {
        let resolver_config = self.config.resolver.clone();
        let mut resolver = match self.sink.take() {
            Some(sink) => CrossAccountImageResolver::with_sink(resolver_config, sink),
            None => CrossAccountImageResolver::new(resolver_config),
        };
        tree.apply_aspect(&mut resolver);
        let report = resolver.finish(tree);

        info!(
            role = report.role.as_deref().unwrap_or("<none>"),
            grants = report.grants.len(),
            "Resolved cross-account registries"
        );

        if !report.is_complete() && self.config.resolver.fail_on_unresolved {
            warn!(unresolved = report.unresolved.len(), "Refusing to synthesize");
            return Err(InfraError::UnresolvedRegistries {
                suffix: self.config.resolver.execution_role_suffix.clone(),
                repositories: report.unresolved.clone(),
            });
        }
        Ok(report)
    }

    /// Run the whole pipeline.
    pub fn synth(mut self) -> InfraResult<Assembly> {
        let mut topology = self.build()?;
        let report = self.resolve(&mut topology.tree)?;

        let description = self.config.stack.description.as_deref();
        let template = synthesize(&topology.tree, &topology.outputs, description)?;
        info!(resources = template.resources.len(), "Synthesized template");

        Ok(Assembly {
            template,
            report,
            topology,
        })
    }
}
