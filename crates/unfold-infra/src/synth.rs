//! Provisioning document synthesis.
//!
//! Renders a [`ResourceTree`] into a template keyed by logical id. Roles
//! expand into the role itself, its default policy and one policy resource
//! per attached inline policy; job definitions expand their container
//! properties; any other typed node is emitted as declared.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{InfraError, InfraResult};
use crate::iam::{Policy, Role};
use crate::template::{get_att, reference};
use crate::tree::{
    JobDefinition, NodeId, NodeKind, ResourceNode, ResourceTree, logical_id, short_hash,
};

/// Template format version emitted.
pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Longest logical id the provisioning engine accepts.
const MAX_LOGICAL_ID_LEN: usize = 255;

/// A stack output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub value: Value,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
}

impl Output {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A synthesized provisioning document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(rename = "Description", skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,

    /// Resources keyed by logical id.
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Value>,

    #[serde(rename = "Outputs", skip_serializing_if = "BTreeMap::is_empty", default)]
    pub outputs: BTreeMap<String, Output>,
}

/// Serialization format of a rendered template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

impl FromStr for OutputFormat {
    type Err = InfraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            other => Err(InfraError::Config(format!("unknown output format '{other}'"))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Yaml => write!(f, "yaml"),
        }
    }
}

impl Template {
    /// Render the template in the given format.
    pub fn render(&self, format: OutputFormat) -> InfraResult<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Yaml => Ok(serde_yaml_ng::to_string(self)?),
        }
    }

    /// Logical ids of all resources of `resource_type`.
    pub fn resources_of_type(&self, resource_type: &str) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, r)| r["Type"] == resource_type)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Resource by logical id.
    pub fn resource(&self, logical_id: &str) -> Option<&Value> {
        self.resources.get(logical_id)
    }
}

/// Managed policy ARN in the deployment partition.
fn managed_policy_ref(name: &str) -> Value {
    json!({
        "Fn::Join": ["", ["arn:", { "Ref": "AWS::Partition" }, ":iam::aws:policy/", name]]
    })
}

fn resource_value(resource_type: &str, properties: Value) -> Value {
    json!({ "Type": resource_type, "Properties": properties })
}

fn policy_resource(name: &str, policy_value: Value, role_lid: &str) -> Value {
    resource_value(
        "AWS::IAM::Policy",
        json!({
            "PolicyName": name,
            "PolicyDocument": policy_value,
            "Roles": [reference(role_lid)],
        }),
    )
}

/// Logical id of an inline policy attached to the role `role_lid`.
///
/// The alphanumerics of the policy name are followed by a digest of the
/// full name, so names differing only in punctuation stay distinct.
pub fn policy_logical_id(role_lid: &str, policy: &Policy) -> String {
    let digest = short_hash(&policy.name);
    let room = MAX_LOGICAL_ID_LEN.saturating_sub(role_lid.len() + digest.len());
    let readable: String = policy
        .name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(room)
        .collect();
    format!("{role_lid}{readable}{digest}")
}

struct Synthesizer<'a> {
    tree: &'a ResourceTree,
    resources: BTreeMap<String, Value>,
}

impl<'a> Synthesizer<'a> {
    fn insert(&mut self, logical_id: String, path: &str, value: Value) -> InfraResult<()> {
        if self.resources.contains_key(&logical_id) {
            return Err(InfraError::DuplicateLogicalId {
                logical_id,
                path: path.to_string(),
            });
        }
        self.resources.insert(logical_id, value);
        Ok(())
    }

    fn role_arn(&self, id: NodeId) -> InfraResult<Value> {
        let node = self
            .tree
            .get(id)
            .ok_or_else(|| InfraError::NodeNotFound(id.to_string()))?;
        if !matches!(node.kind, NodeKind::Role(_)) {
            return Err(InfraError::WrongKind {
                path: node.path.clone(),
                expected: "role",
            });
        }
        Ok(get_att(&node.logical_id(), "Arn"))
    }

    fn role(&mut self, node: &ResourceNode, role: &Role) -> InfraResult<()> {
        let lid = node.logical_id();
        let mut properties = Map::new();
        properties.insert(
            "AssumeRolePolicyDocument".to_string(),
            role.assume_role_policy(),
        );
        if !role.managed_policies.is_empty() {
            properties.insert(
                "ManagedPolicyArns".to_string(),
                Value::Array(
                    role.managed_policies
                        .iter()
                        .map(|name| managed_policy_ref(name))
                        .collect(),
                ),
            );
        }
        self.insert(
            lid.clone(),
            &node.path,
            resource_value("AWS::IAM::Role", Value::Object(properties)),
        )?;

        if !role.default_policy.is_empty() {
            let name = format!("{lid}DefaultPolicy");
            let value = policy_resource(&name, serde_json::to_value(&role.default_policy)?, &lid);
            self.insert(name, &node.path, value)?;
        }

        for policy in role.attached_policies() {
            let value = policy_resource(&policy.name, serde_json::to_value(&policy.document)?, &lid);
            self.insert(policy_logical_id(&lid, policy), &node.path, value)?;
        }
        Ok(())
    }

    fn job_definition(&mut self, node: &ResourceNode, def: &JobDefinition) -> InfraResult<()> {
        let mut container = Map::new();
        container.insert("Image".to_string(), def.image.to_json());
        if !def.command.is_empty() {
            container.insert("Command".to_string(), json!(def.command));
        }
        container.insert(
            "ResourceRequirements".to_string(),
            json!([
                { "Type": "VCPU", "Value": def.vcpus.to_string() },
                { "Type": "MEMORY", "Value": def.memory_mib.to_string() },
            ]),
        );
        if let Some(role) = def.execution_role {
            container.insert("ExecutionRoleArn".to_string(), self.role_arn(role)?);
        }
        if let Some(role) = def.job_role {
            container.insert("JobRoleArn".to_string(), self.role_arn(role)?);
        }
        container.insert("Privileged".to_string(), json!(def.privileged));

        let mut properties = Map::new();
        properties.insert("Type".to_string(), json!("container"));
        properties.insert(
            "PlatformCapabilities".to_string(),
            json!([def.platform.as_str()]),
        );
        properties.insert("ContainerProperties".to_string(), Value::Object(container));
        properties.insert(
            "RetryStrategy".to_string(),
            json!({ "Attempts": def.retry_attempts }),
        );
        if let Some(timeout) = def.timeout_seconds {
            properties.insert(
                "Timeout".to_string(),
                json!({ "AttemptDurationSeconds": timeout }),
            );
        }

        self.insert(
            node.logical_id(),
            &node.path,
            resource_value("AWS::Batch::JobDefinition", Value::Object(properties)),
        )
    }
}

/// Render `tree` and `outputs` into a template.
pub fn synthesize(
    tree: &ResourceTree,
    outputs: &BTreeMap<String, Output>,
    description: Option<&str>,
) -> InfraResult<Template> {
    let mut synth = Synthesizer {
        tree,
        resources: BTreeMap::new(),
    };

    for id in tree.preorder() {
        let Some(node) = tree.get(id) else {
            continue;
        };
        match &node.kind {
            NodeKind::Role(role) => synth.role(node, role)?,
            NodeKind::JobDefinition(def) => synth.job_definition(node, def)?,
            NodeKind::Other(resource) => {
                let Some(resource_type) = &resource.resource_type else {
                    continue;
                };
                synth.insert(
                    logical_id(&node.path),
                    &node.path,
                    resource_value(resource_type, resource.properties.clone()),
                )?;
            }
        }
    }

    Ok(Template {
        format_version: TEMPLATE_FORMAT_VERSION.to_string(),
        description: description.map(str::to_string),
        resources: synth.resources,
        outputs: outputs.clone(),
    })
}
