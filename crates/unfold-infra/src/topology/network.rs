//! VPC with private subnets behind NAT and a CloudWatch flow log.

use std::net::Ipv4Addr;

use serde_json::json;

use crate::config::DeployConfig;
use crate::error::{InfraError, InfraResult};
use crate::iam::{PolicyStatement, Role};
use crate::template::{get_att, reference};
use crate::tree::{NodeId, NodeKind, Resource, ResourceTree};

const VPC_BASE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 0);
const VPC_MASK: u8 = 16;

/// Prefix length of the private subnets.
const PRIVATE_MASK: u8 = 18;

/// Prefix length of the NAT egress subnets.
const EGRESS_MASK: u8 = 24;

/// Availability zones spanned.
const AZ_COUNT: u32 = 2;

/// Ids of the network resources other constructs refer to.
#[derive(Debug, Clone)]
pub(crate) struct Network {
    pub vpc: NodeId,
    pub private_subnets: Vec<NodeId>,
}

/// CIDR of the `index`-th block of size `/mask` counted from `base`.
pub fn subnet_cidr(base: Ipv4Addr, index: u32, mask: u8) -> InfraResult<String> {
    if !(1..=32).contains(&mask) {
        return Err(InfraError::Config(format!("invalid prefix length /{mask}")));
    }
    let block = 1u64 << (32 - u32::from(mask));
    let start = u64::from(u32::from(base)) + u64::from(index) * block;
    let end = start + block - 1;
    let start = u32::try_from(start)
        .ok()
        .filter(|_| end <= u64::from(u32::MAX))
        .ok_or_else(|| {
            InfraError::Config(format!("subnet {index} of /{mask} overflows the address space"))
        })?;
    Ok(format!("{}/{mask}", Ipv4Addr::from(start)))
}

fn select_az(index: u32) -> serde_json::Value {
    json!({ "Fn::Select": [index, { "Fn::GetAZs": "" }] })
}

fn add_resource(
    tree: &mut ResourceTree,
    parent: NodeId,
    id: &str,
    resource: Resource,
) -> InfraResult<NodeId> {
    tree.add(parent, id, NodeKind::Other(resource))
}

pub(crate) fn declare(
    tree: &mut ResourceTree,
    scope: NodeId,
    config: &DeployConfig,
) -> InfraResult<Network> {
    let vpc = add_resource(
        tree,
        scope,
        "VPC",
        Resource::new(
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": format!("{VPC_BASE}/{VPC_MASK}"),
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
            }),
        ),
    )?;
    let vpc_ref = reference(&tree.logical_id(vpc)?);

    let igw = add_resource(tree, vpc, "IGW", Resource::new("AWS::EC2::InternetGateway", json!({})))?;
    let igw_ref = reference(&tree.logical_id(igw)?);
    add_resource(
        tree,
        vpc,
        "VPCGW",
        Resource::new(
            "AWS::EC2::VPCGatewayAttachment",
            json!({ "VpcId": vpc_ref, "InternetGatewayId": igw_ref }),
        ),
    )?;

    // Egress blocks sit after the private ones.
    let egress_base = subnet_cidr(VPC_BASE, AZ_COUNT, PRIVATE_MASK)?;
    let egress_base: Ipv4Addr = egress_base
        .split('/')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| InfraError::Config(format!("bad subnet cidr {egress_base}")))?;

    let mut private_subnets = Vec::new();
    for az in 0..AZ_COUNT {
        let n = az + 1;

        let egress = add_resource(
            tree,
            vpc,
            &format!("egressSubnet{n}"),
            Resource::new(
                "AWS::EC2::Subnet",
                json!({
                    "VpcId": vpc_ref,
                    "CidrBlock": subnet_cidr(egress_base, az, EGRESS_MASK)?,
                    "AvailabilityZone": select_az(az),
                    "MapPublicIpOnLaunch": true,
                }),
            ),
        )?;
        let egress_ref = reference(&tree.logical_id(egress)?);
        let egress_rt = add_resource(
            tree,
            egress,
            "RouteTable",
            Resource::new("AWS::EC2::RouteTable", json!({ "VpcId": vpc_ref })),
        )?;
        let egress_rt_ref = reference(&tree.logical_id(egress_rt)?);
        add_resource(
            tree,
            egress,
            "RouteTableAssociation",
            Resource::new(
                "AWS::EC2::SubnetRouteTableAssociation",
                json!({ "RouteTableId": egress_rt_ref, "SubnetId": egress_ref }),
            ),
        )?;
        add_resource(
            tree,
            egress,
            "DefaultRoute",
            Resource::new(
                "AWS::EC2::Route",
                json!({
                    "RouteTableId": egress_rt_ref,
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "GatewayId": igw_ref,
                }),
            ),
        )?;
        let eip = add_resource(
            tree,
            egress,
            "EIP",
            Resource::new("AWS::EC2::EIP", json!({ "Domain": "vpc" })),
        )?;
        let nat = add_resource(
            tree,
            egress,
            "NATGateway",
            Resource::new(
                "AWS::EC2::NatGateway",
                json!({
                    "SubnetId": egress_ref,
                    "AllocationId": get_att(&tree.logical_id(eip)?, "AllocationId"),
                }),
            ),
        )?;
        let nat_ref = reference(&tree.logical_id(nat)?);

        let private = add_resource(
            tree,
            vpc,
            &format!("batchSubnet{n}"),
            Resource::new(
                "AWS::EC2::Subnet",
                json!({
                    "VpcId": vpc_ref,
                    "CidrBlock": subnet_cidr(VPC_BASE, az, PRIVATE_MASK)?,
                    "AvailabilityZone": select_az(az),
                    "MapPublicIpOnLaunch": false,
                }),
            ),
        )?;
        let private_ref = reference(&tree.logical_id(private)?);
        let rt = add_resource(
            tree,
            private,
            "RouteTable",
            Resource::new("AWS::EC2::RouteTable", json!({ "VpcId": vpc_ref })),
        )?;
        let rt_ref = reference(&tree.logical_id(rt)?);
        add_resource(
            tree,
            private,
            "RouteTableAssociation",
            Resource::new(
                "AWS::EC2::SubnetRouteTableAssociation",
                json!({ "RouteTableId": rt_ref, "SubnetId": private_ref }),
            ),
        )?;
        add_resource(
            tree,
            private,
            "DefaultRoute",
            Resource::new(
                "AWS::EC2::Route",
                json!({
                    "RouteTableId": rt_ref,
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "NatGatewayId": nat_ref,
                }),
            ),
        )?;
        private_subnets.push(private);
    }

    declare_flow_log(tree, vpc, config)?;

    Ok(Network {
        vpc,
        private_subnets,
    })
}

/// Flow log capturing all VPC traffic into a CloudWatch log group.
fn declare_flow_log(tree: &mut ResourceTree, vpc: NodeId, config: &DeployConfig) -> InfraResult<()> {
    let partition = &config.resolver.partition;
    let log_group_name = format!("/aws/vpc/{}/flowlogs", config.stack.name);

    let scope = tree.add_scope(vpc, "logtoCW")?;

    let mut role = Role::new("vpc-flow-logs.amazonaws.com");
    role.add_to_policy(
        PolicyStatement::allow()
            .actions([
                "logs:CreateLogStream",
                "logs:PutLogEvents",
                "logs:DescribeLogStreams",
            ])
            .resources([format!(
                "arn:{partition}:logs:{}:{}:log-group:{log_group_name}:*",
                config.stack.region, config.stack.account
            )]),
    );
    let role = tree.add(scope, "IAMRole", NodeKind::Role(role))?;

    let log_group = add_resource(
        tree,
        scope,
        "LogGroup",
        Resource::new(
            "AWS::Logs::LogGroup",
            json!({ "LogGroupName": log_group_name, "RetentionInDays": 731 }),
        ),
    )?;

    let flow_log = Resource::new(
        "AWS::EC2::FlowLog",
        json!({
            "ResourceId": reference(&tree.logical_id(vpc)?),
            "ResourceType": "VPC",
            "TrafficType": "ALL",
            "LogDestinationType": "cloud-watch-logs",
            "LogGroupName": reference(&tree.logical_id(log_group)?),
            "DeliverLogsPermissionArn": get_att(&tree.logical_id(role)?, "Arn"),
        }),
    );
    add_resource(tree, scope, "FlowLog", flow_log)?;
    Ok(())
}
