//! Result aggregation function and its role.

use serde_json::json;

use crate::config::DeployConfig;
use crate::error::InfraResult;
use crate::iam::{PolicyStatement, Role};
use crate::template::{get_att, reference};
use crate::tree::{NodeId, NodeKind, Resource, ResourceTree};

use super::network::Network;

/// Declared function and the name it is deployed under.
#[derive(Debug, Clone)]
pub(crate) struct AggregateFunction {
    pub node: NodeId,
    pub name: String,
}

/// Deployed name of the aggregation function.
fn function_name(config: &DeployConfig) -> String {
    format!("{}-AggResult", config.stack.name)
}

fn lambda_role(config: &DeployConfig) -> Role {
    let partition = &config.resolver.partition;
    let bucket = &config.stack.bucket_name;

    let mut role = Role::new("lambda.amazonaws.com")
        .with_managed_policy("service-role/AWSLambdaBasicExecutionRole")
        .with_managed_policy("service-role/AWSLambdaVPCAccessExecutionRole")
        .with_managed_policy("AmazonAthenaFullAccess");
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
            ]),
    );
    role
}

pub(crate) fn declare(
    tree: &mut ResourceTree,
    scope: NodeId,
    network: &Network,
    config: &DeployConfig,
) -> InfraResult<AggregateFunction> {
    let agg = &config.aggregation;
    let name = function_name(config);

    let role = tree.add(scope, "AggResultLambdaRole", NodeKind::Role(lambda_role(config)))?;
    let role_arn = get_att(&tree.logical_id(role)?, "Arn");

    let subnets = network
        .private_subnets
        .iter()
        .map(|id| tree.logical_id(*id).map(|lid| reference(&lid)))
        .collect::<InfraResult<Vec<_>>>()?;
    let vpc_ref = reference(&tree.logical_id(network.vpc)?);

    let function = tree.add_scope(scope, "AggResultLambda")?;
    let security_group = tree.add(
        function,
        "SecurityGroup",
        NodeKind::Other(Resource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": "Result aggregation function",
                "VpcId": vpc_ref,
                "SecurityGroupEgress": [{ "CidrIp": "0.0.0.0/0", "IpProtocol": "-1" }],
            }),
        )),
    )?;

    let node = tree.add(
        function,
        "Resource",
        NodeKind::Other(Resource::new(
            "AWS::Lambda::Function",
            json!({
                "FunctionName": name,
                "Runtime": agg.runtime,
                "Handler": agg.handler,
                "MemorySize": agg.memory_mib,
                "Timeout": agg.timeout_seconds,
                "Role": role_arn,
                "Code": {
                    "S3Bucket": config.stack.bucket_name,
                    "S3Key": agg.code_path,
                },
                "Environment": {
                    "Variables": { "BUCKET": config.stack.bucket_name },
                },
                "VpcConfig": {
                    "SubnetIds": subnets,
                    "SecurityGroupIds": [get_att(&tree.logical_id(security_group)?, "GroupId")],
                },
            }),
        )),
    )?;

    Ok(AggregateFunction { node, name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::network;

    #[test]
    fn test_function_declaration() {
        let config = DeployConfig::default();
        let mut tree = ResourceTree::new("Stack").unwrap();
        let scope = tree.add_scope(tree.root(), "Batch").unwrap();
        let network = network::declare(&mut tree, scope, &config).unwrap();
        let function = declare(&mut tree, scope, &network, &config).unwrap();

        assert_eq!(function.name, "QCUnfoldStack-AggResult");
        assert_eq!(tree.logical_id(function.node).unwrap(), "BatchAggResultLambdaResource");

        let NodeKind::Other(resource) = &tree.get(function.node).unwrap().kind else {
            panic!("expected a function resource");
        };
        assert_eq!(resource.properties["Runtime"], "nodejs18.x");
        assert_eq!(
            resource.properties["Environment"]["Variables"]["BUCKET"],
            "amazon-braket-unfold"
        );
        assert_eq!(
            resource.properties["Role"],
            get_att("BatchAggResultLambdaRole", "Arn")
        );

        let role = tree.find("Stack/Batch/AggResultLambdaRole").unwrap();
        assert_eq!(tree.role(role).unwrap().managed_policies.len(), 3);
    }
}
