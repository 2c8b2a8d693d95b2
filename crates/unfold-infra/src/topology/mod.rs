//! The batch topology.
//!
//! Declares everything the unfolding workload needs under one stack root:
//!
//! ```text
//! Stack
//! └── Batch
//!     ├── batchExecutionRole, jobRole       (container roles)
//!     ├── VPC                               (private subnets, NAT, flow log)
//!     ├── Batch-Compute-Env, JobQueue       (on-demand EC2 capacity)
//!     ├── QCJob_vCpus{v}_Mem{m}G            (one job definition per shape)
//!     ├── AggResultLambdaRole, AggResultLambda
//!     └── QCBatchStateMachineRole, QCBatchStateMachine
//! ```
//!
//! The cross-account image resolver runs over this tree afterwards; nothing
//! here grants registry access.

mod aggregate;
mod compute;
mod network;
mod orchestration;

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::DeployConfig;
use crate::error::InfraResult;
use crate::synth::Output;
use crate::tree::ResourceTree;
use crate::workflow::StateMachine;

pub use network::subnet_cidr;
pub use orchestration::task_name;

/// Id of the scope grouping all batch resources.
pub const BATCH_SCOPE: &str = "Batch";

/// A fully declared stack, ready for resolution and synthesis.
#[derive(Debug, Clone)]
pub struct BatchTopology {
    /// The declared resources.
    pub tree: ResourceTree,

    /// The workflow driving the parameter sweep.
    pub state_machine: StateMachine,

    /// Stack outputs keyed by output name.
    pub outputs: BTreeMap<String, Output>,
}

impl BatchTopology {
    /// Declare the topology described by `config`.
    pub fn build(config: &DeployConfig) -> InfraResult<Self> {
        let mut tree = ResourceTree::new(&config.stack.name)?;
        let scope = tree.add_scope(tree.root(), BATCH_SCOPE)?;

        let roles = compute::declare_job_roles(&mut tree, scope, config)?;
        let network = network::declare(&mut tree, scope, config)?;
        let compute = compute::declare(&mut tree, scope, &network, config)?;
        let jobs = compute::declare_job_definitions(&mut tree, scope, &roles, config)?;
        let function = aggregate::declare(&mut tree, scope, &network, config)?;
        debug!(jobs = jobs.len(), "Declared batch resources");

        let (state_machine, outputs) =
            orchestration::declare(&mut tree, scope, &compute, &jobs, function, config)?;

        info!(
            stack = %config.stack.name,
            nodes = tree.len(),
            branches = state_machine.branch_count(),
            "Declared batch topology"
        );

        Ok(Self {
            tree,
            state_machine,
            outputs,
        })
    }
}
