//! The parameter-sweep state machine and the stack outputs.

use std::collections::BTreeMap;

use serde_json::json;

use crate::config::{DeployConfig, InstanceShape};
use crate::devices;
use crate::error::InfraResult;
use crate::iam::{PolicyStatement, Role};
use crate::synth::Output;
use crate::template::{get_att, reference};
use crate::tree::{NodeId, NodeKind, Resource, ResourceTree};
use crate::workflow::{Branch, State, StateKind, StateMachine, StateMachineBuilder};

use super::aggregate::AggregateFunction;
use super::compute::{Compute, DeclaredJob, job_command};

const PARALLEL_STATE: &str = "QCBatchParallel";
const AGGREGATE_STATE: &str = "Aggregate Result";
const SUCCEED_STATE: &str = "Succeed";

const JOB_QUEUE_VAR: &str = "JobQueue";
const FUNCTION_VAR: &str = "AggResultFunction";

/// Rule Step Functions manages to track synchronous batch jobs.
const BATCH_EVENTS_RULE: &str = "StepFunctionsGetEventsForBatchJobsRule";

/// Name of the task running one sweep point.
///
/// The first `.` is replaced by `_` since task names end up in job names.
pub fn task_name(m: u32, d: u32, device_arn: &str, shape: &InstanceShape) -> String {
    format!(
        "M{m}-D{d}-{}-{}",
        devices::device_name(device_arn),
        shape.label()
    )
    .replacen('.', "_", 1)
}

fn job_definition_var(shape: &InstanceShape) -> String {
    format!("JobDefinition_{}", shape.label())
}

fn state_machine_role(config: &DeployConfig, function_name: &str) -> Role {
    let partition = &config.resolver.partition;
    let region = &config.stack.region;
    let account = &config.stack.account;

    let mut role = Role::new("states.amazonaws.com");
    role.add_to_policy(
        PolicyStatement::allow()
            .actions(["batch:SubmitJob", "batch:DescribeJobs", "batch:TerminateJob"])
            .resources(["*"]),
    );
    role.add_to_policy(
        PolicyStatement::allow()
            .actions(["events:PutTargets", "events:PutRule", "events:DescribeRule"])
            .resources([format!(
                "arn:{partition}:events:{region}:{account}:rule/{BATCH_EVENTS_RULE}"
            )]),
    );
    role.add_to_policy(
        PolicyStatement::allow()
            .actions(["lambda:InvokeFunction"])
            .resources([
                format!("arn:{partition}:lambda:{region}:{account}:function:{function_name}"),
                format!("arn:{partition}:lambda:{region}:{account}:function:{function_name}:*"),
            ]),
    );
    role
}

/// Parallel sweep over every (m, d, device, shape) point.
fn sweep_branches(jobs: &[DeclaredJob], config: &DeployConfig) -> Vec<Branch> {
    let batch = &config.batch;
    let mut branches = Vec::with_capacity(config.branch_count());
    for m in &batch.m_values {
        for d in &batch.d_values {
            for device in &batch.devices {
                for job in jobs {
                    branches.push(Branch::single(State::new(
                        task_name(*m, *d, device, &job.shape),
                        StateKind::BatchSubmitJob {
                            job_definition_var: job_definition_var(&job.shape),
                            job_queue_var: JOB_QUEUE_VAR.to_string(),
                            command: job_command(*m, *d, device, &job.shape, config),
                        },
                    )));
                }
            }
        }
    }
    branches
}

pub(crate) fn declare(
    tree: &mut ResourceTree,
    scope: NodeId,
    compute: &Compute,
    jobs: &[DeclaredJob],
    function: AggregateFunction,
    config: &DeployConfig,
) -> InfraResult<(StateMachine, BTreeMap<String, Output>)> {
    let queue_lid = tree.logical_id(compute.queue)?;
    let function_lid = tree.logical_id(function.node)?;

    let mut builder = StateMachineBuilder::new()
        .timeout_seconds(config.workflow.timeout_seconds()?)
        .substitute(JOB_QUEUE_VAR, reference(&queue_lid))
        .substitute(FUNCTION_VAR, get_att(&function_lid, "Arn"));
    for job in jobs {
        builder = builder.substitute(
            job_definition_var(&job.shape),
            reference(&tree.logical_id(job.node)?),
        );
    }

    let state_machine = builder
        .then(State::new(
            PARALLEL_STATE,
            StateKind::Parallel {
                branches: sweep_branches(jobs, config),
            },
        ))?
        .then(State::new(
            AGGREGATE_STATE,
            StateKind::LambdaInvoke {
                function_var: FUNCTION_VAR.to_string(),
                output_path: Some("$.Payload".to_string()),
            },
        ))?
        .then(State::new(SUCCEED_STATE, StateKind::Succeed))?
        .build();

    let role = tree.add(
        scope,
        "QCBatchStateMachineRole",
        NodeKind::Role(state_machine_role(config, &function.name)),
    )?;
    let role_arn = get_att(&tree.logical_id(role)?, "Arn");

    let node = tree.add(
        scope,
        "QCBatchStateMachine",
        NodeKind::Other(Resource::new(
            "AWS::StepFunctions::StateMachine",
            json!({
                "Definition": state_machine.to_asl(),
                "DefinitionSubstitutions": state_machine.substitutions(),
                "RoleArn": role_arn,
            }),
        )),
    )?;
    let machine_lid = tree.logical_id(node)?;

    let mut outputs = BTreeMap::new();
    outputs.insert(
        "jobQueue".to_string(),
        Output::new(get_att(&queue_lid, "JobQueueName")).with_description("Batch job queue"),
    );
    outputs.insert(
        "stateMachine".to_string(),
        Output::new(get_att(&machine_lid, "Name")).with_description("Sweep state machine"),
    );
    outputs.insert(
        "stateMachineURL".to_string(),
        Output::new(json!({
            "Fn::Join": ["", [
                format!(
                    "https://console.aws.amazon.com/states/home?region={}#/statemachines/view/",
                    config.stack.region
                ),
                reference(&machine_lid),
            ]]
        }))
        .with_description("Console URL of the state machine"),
    );

    Ok((state_machine, outputs))
}
