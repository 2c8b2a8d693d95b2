//! IAM principals and policy documents.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// IAM policy language version.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Statement effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// A single permission statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    /// Allow or deny.
    pub effect: Effect,

    /// Actions, e.g. `ecr:BatchGetImage`.
    pub action: Vec<String>,

    /// Resource ARNs or `*`.
    pub resource: Vec<String>,
}

impl PolicyStatement {
    /// An empty allow statement.
    pub fn allow() -> Self {
        Self {
            effect: Effect::Allow,
            action: Vec::new(),
            resource: Vec::new(),
        }
    }

    /// Add actions.
    pub fn actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.action.extend(actions.into_iter().map(Into::into));
        self
    }

    /// Add resources.
    pub fn resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource.extend(resources.into_iter().map(Into::into));
        self
    }

    /// Check whether the statement grants `action` on `resource` verbatim.
    pub fn grants(&self, action: &str, resource: &str) -> bool {
        self.effect == Effect::Allow
            && self.action.iter().any(|a| a == action)
            && self.resource.iter().any(|r| r == resource)
    }
}

/// An identity-based policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: Vec::new(),
        }
    }
}

impl PolicyDocument {
    /// A document holding the given statements.
    pub fn with_statements(statements: Vec<PolicyStatement>) -> Self {
        Self {
            statement: statements,
            ..Self::default()
        }
    }

    /// Append a statement.
    pub fn add(&mut self, statement: PolicyStatement) {
        self.statement.push(statement);
    }

    pub fn is_empty(&self) -> bool {
        self.statement.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statement.len()
    }
}

/// A named inline policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy name, unique per role.
    pub name: String,

    /// Permissions granted.
    pub document: PolicyDocument,
}

impl Policy {
    pub fn new(name: impl Into<String>, statements: Vec<PolicyStatement>) -> Self {
        Self {
            name: name.into(),
            document: PolicyDocument::with_statements(statements),
        }
    }
}

/// An IAM role as declared in the topology.
///
/// Permissions only ever accumulate: statements are appended to the default
/// policy and inline policies are attached, never replaced or detached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Service principal allowed to assume the role.
    pub assumed_by: String,

    /// AWS managed policy names (e.g. `AmazonBraketFullAccess`).
    pub managed_policies: Vec<String>,

    /// Statements added directly to the role.
    pub default_policy: PolicyDocument,

    /// Inline policies attached after declaration, in attach order.
    attached: Vec<Policy>,
}

impl Role {
    /// A role assumable by `service` (e.g. `ecs-tasks.amazonaws.com`).
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            assumed_by: service.into(),
            managed_policies: Vec::new(),
            default_policy: PolicyDocument::default(),
            attached: Vec::new(),
        }
    }

    /// Add an AWS managed policy by name.
    pub fn with_managed_policy(mut self, name: impl Into<String>) -> Self {
        self.managed_policies.push(name.into());
        self
    }

    /// Add a statement to the default policy.
    pub fn add_to_policy(&mut self, statement: PolicyStatement) {
        self.default_policy.add(statement);
    }

    /// Attach an inline policy.
    ///
    /// Attaching a policy whose name is already attached leaves the role
    /// unchanged. Returns `true` if the policy was newly attached.
    pub fn attach_inline_policy(&mut self, policy: Policy) -> bool {
        if self.has_policy(&policy.name) {
            return false;
        }
        self.attached.push(policy);
        true
    }

    /// Inline policies in attach order.
    pub fn attached_policies(&self) -> &[Policy] {
        &self.attached
    }

    /// Check whether an inline policy with this name is attached.
    pub fn has_policy(&self, name: &str) -> bool {
        self.attached.iter().any(|p| p.name == name)
    }

    /// Trust policy allowing the service principal to assume the role.
    pub fn assume_role_policy(&self) -> Value {
        json!({
            "Version": POLICY_VERSION,
            "Statement": [{
                "Action": "sts:AssumeRole",
                "Effect": "Allow",
                "Principal": { "Service": self.assumed_by }
            }]
        })
    }
}
