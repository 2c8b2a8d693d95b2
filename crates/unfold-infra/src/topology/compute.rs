//! Container roles, compute environment, job queue and job definitions.

use serde_json::json;

use crate::config::{DeployConfig, InstanceShape};
use crate::error::InfraResult;
use crate::iam::{PolicyStatement, Role};
use crate::template::{get_att, reference};
use crate::tree::{JobDefinition, NodeId, NodeKind, Platform, Resource, ResourceTree};

use super::network::Network;

/// Managed policy giving containers access to the annealing devices.
pub(crate) const BRAKET_FULL_ACCESS: &str = "AmazonBraketFullAccess";

const ECS_TASKS: &str = "ecs-tasks.amazonaws.com";

/// Upper bound of vCPUs the compute environment scales to.
const MAX_VCPUS: u32 = 256;

#[derive(Debug, Clone, Copy)]
pub(crate) struct JobRoles {
    pub execution: NodeId,
    pub job: NodeId,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Compute {
    pub queue: NodeId,
}

/// A declared job definition and the shape it was declared for.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeclaredJob {
    pub shape: InstanceShape,
    pub node: NodeId,
}

/// Construct id of the job definition for `shape`.
pub(crate) fn job_definition_id(shape: &InstanceShape) -> String {
    format!("QCJob_vCpus{}_Mem{}G", shape.vcpus, shape.memory_gib)
}

/// Permissions shared by the execution role and the job role.
fn container_role(config: &DeployConfig) -> Role {
    let partition = &config.resolver.partition;
    let bucket = &config.stack.bucket_name;

    let mut role = Role::new(ECS_TASKS).with_managed_policy(BRAKET_FULL_ACCESS);
    role.add_to_policy(
        PolicyStatement::allow()
            .actions([
                "s3:GetObject",
                "s3:PutObject",
                "s3:ListBucket",
                "s3:GetBucketLocation",
            ])
            .resources([
                format!("arn:{partition}:s3:::{bucket}"),
                format!("arn:{partition}:s3:::{bucket}/*"),
                format!("arn:{partition}:s3:::amazon-braket-*"),
                format!("arn:{partition}:s3:::amazon-braket-*/*"),
            ]),
    );
    role.add_to_policy(
        PolicyStatement::allow()
            .actions([
                "logs:CreateLogGroup",
                "logs:CreateLogStream",
                "logs:PutLogEvents",
            ])
            .resources([format!("arn:{partition}:logs:*:*:log-group:/aws/batch/*")]),
    );
    role.add_to_policy(
        PolicyStatement::allow()
            .actions(["braket:*"])
            .resources(["*"]),
    );
    role
}

pub(crate) fn declare_job_roles(
    tree: &mut ResourceTree,
    scope: NodeId,
    config: &DeployConfig,
) -> InfraResult<JobRoles> {
    let execution = tree.add(
        scope,
        "batchExecutionRole",
        NodeKind::Role(container_role(config)),
    )?;
    let job = tree.add(scope, "jobRole", NodeKind::Role(container_role(config)))?;
    Ok(JobRoles { execution, job })
}

/// On-demand, best-fit compute environment and its job queue.
pub(crate) fn declare(
    tree: &mut ResourceTree,
    scope: NodeId,
    network: &Network,
    config: &DeployConfig,
) -> InfraResult<Compute> {
    let vpc_ref = reference(&tree.logical_id(network.vpc)?);
    let subnets = network
        .private_subnets
        .iter()
        .map(|id| tree.logical_id(*id).map(|lid| reference(&lid)))
        .collect::<InfraResult<Vec<_>>>()?;

    let environment = tree.add_scope(scope, "Batch-Compute-Env")?;

    let instance_role = tree.add(
        environment,
        "InstanceRole",
        NodeKind::Role(
            Role::new("ec2.amazonaws.com")
                .with_managed_policy("service-role/AmazonEC2ContainerServiceforEC2Role"),
        ),
    )?;
    let profile = tree.add(
        environment,
        "InstanceProfile",
        NodeKind::Other(Resource::new(
            "AWS::IAM::InstanceProfile",
            json!({ "Roles": [reference(&tree.logical_id(instance_role)?)] }),
        )),
    )?;
    let security_group = tree.add(
        environment,
        "SecurityGroup",
        NodeKind::Other(Resource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": "Batch compute environment instances",
                "VpcId": vpc_ref,
                "SecurityGroupEgress": [{ "CidrIp": "0.0.0.0/0", "IpProtocol": "-1" }],
            }),
        )),
    )?;

    let resource = tree.add(
        environment,
        "Resource",
        NodeKind::Other(Resource::new(
            "AWS::Batch::ComputeEnvironment",
            json!({
                "Type": "MANAGED",
                "State": "ENABLED",
                "ComputeResources": {
                    "Type": "EC2",
                    "AllocationStrategy": "BEST_FIT",
                    "InstanceTypes": config.batch.instance_types,
                    "MinvCpus": 0,
                    "MaxvCpus": MAX_VCPUS,
                    "Subnets": subnets,
                    "SecurityGroupIds": [get_att(&tree.logical_id(security_group)?, "GroupId")],
                    "InstanceRole": get_att(&tree.logical_id(profile)?, "Arn"),
                },
            }),
        )),
    )?;

    let queue = tree.add(
        scope,
        "JobQueue",
        NodeKind::Other(Resource::new(
            "AWS::Batch::JobQueue",
            json!({
                "Priority": 1,
                "State": "ENABLED",
                "ComputeEnvironmentOrder": [{
                    "Order": 1,
                    "ComputeEnvironment": reference(&tree.logical_id(resource)?),
                }],
            }),
        )),
    )?;

    Ok(Compute { queue })
}

/// Default command for a job definition. The workflow overrides it per task.
pub(crate) fn job_command(
    m: u32,
    d: u32,
    device: &str,
    shape: &InstanceShape,
    config: &DeployConfig,
) -> Vec<String> {
    vec![
        "--M".to_string(),
        m.to_string(),
        "--D".to_string(),
        d.to_string(),
        "--device-arn".to_string(),
        device.to_string(),
        "--aws-region".to_string(),
        config.stack.region.clone(),
        "--instance-type".to_string(),
        shape.label(),
        "--s3-bucket".to_string(),
        config.stack.bucket_name.clone(),
    ]
}

pub(crate) fn declare_job_definitions(
    tree: &mut ResourceTree,
    scope: NodeId,
    roles: &JobRoles,
    config: &DeployConfig,
) -> InfraResult<Vec<DeclaredJob>> {
    let image = config.image();
    let timeout = config.batch.job_timeout_seconds()?;
    let mut jobs = Vec::with_capacity(config.batch.shapes.len());

    for shape in &config.batch.shapes {
        let mut def = JobDefinition::new(image.clone());
        def.command = job_command(1, 4, &config.batch.default_device, shape, config);
        def.vcpus = shape.vcpus;
        def.memory_mib = shape.memory_mib()?;
        def.execution_role = Some(roles.execution);
        def.job_role = Some(roles.job);
        def.timeout_seconds = Some(timeout);
        def.retry_attempts = config.batch.retry_attempts;
        def.platform = Platform::Ec2;
        def.privileged = false;

        let node = tree.add(scope, &job_definition_id(shape), NodeKind::JobDefinition(def))?;
        jobs.push(DeclaredJob {
            shape: *shape,
            node,
        });
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_role_permissions() {
        let config = DeployConfig::default();
        let role = container_role(&config);
        assert_eq!(role.assumed_by, ECS_TASKS);
        assert_eq!(role.managed_policies, vec![BRAKET_FULL_ACCESS]);
        assert!(role.attached_policies().is_empty());

        let statements = &role.default_policy.statement;
        assert!(statements[0].grants("s3:PutObject", "arn:aws:s3:::amazon-braket-unfold/*"));
        assert!(statements[1].grants(
            "logs:PutLogEvents",
            "arn:aws:logs:*:*:log-group:/aws/batch/*"
        ));
        assert!(statements[2].grants("braket:*", "*"));
    }

    #[test]
    fn test_job_definition_id() {
        assert_eq!(job_definition_id(&InstanceShape::new(8, 8)), "QCJob_vCpus8_Mem8G");
    }
}
