//! The resource tree.
//!
//! Resources are declared under a single root in a hierarchy of construct
//! ids. Each node's path (`Root/Scope/Child`) is unique in the tree and is
//! the only identity visitors and the synthesizer rely on. Nodes live in an
//! arena and are addressed by [`NodeId`].

use std::fmt;
use std::hash::Hasher;

use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{InfraError, InfraResult};
use crate::iam::Role;
use crate::template::ImageRef;

/// Separator between construct ids in a node path.
pub const PATH_SEP: char = '/';

/// Index of a node in its [`ResourceTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Platform a job definition targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Platform {
    #[default]
    Ec2,
}

impl Platform {
    /// Platform capability name as the batch service spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ec2 => "EC2",
        }
    }
}

/// A containerized unit of work submittable to a job queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Container image.
    pub image: ImageRef,

    /// Default container command.
    pub command: Vec<String>,

    /// vCPUs reserved per job.
    pub vcpus: u32,

    /// Memory limit in MiB.
    pub memory_mib: u32,

    /// Role the container agent assumes to pull the image and ship logs.
    pub execution_role: Option<NodeId>,

    /// Role the job's own code runs as.
    pub job_role: Option<NodeId>,

    /// Attempt timeout in seconds.
    pub timeout_seconds: Option<u64>,

    /// Retry attempts.
    pub retry_attempts: u32,

    pub platform: Platform,

    pub privileged: bool,
}

impl JobDefinition {
    /// A single-vCPU, 2 GiB job definition running `image`.
    pub fn new(image: ImageRef) -> Self {
        Self {
            image,
            command: Vec::new(),
            vcpus: 1,
            memory_mib: 2048,
            execution_role: None,
            job_role: None,
            timeout_seconds: None,
            retry_attempts: 1,
            platform: Platform::Ec2,
            privileged: false,
        }
    }
}

/// Any other provisioned resource, or a pure grouping scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Provisioning type (e.g. `AWS::EC2::VPC`); `None` for grouping scopes.
    pub resource_type: Option<String>,

    /// Resource properties as they appear in the provisioning document.
    pub properties: Value,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, properties: Value) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            properties,
        }
    }

    /// A scope that only groups children and synthesizes to nothing.
    pub fn scope() -> Self {
        Self {
            resource_type: None,
            properties: Value::Null,
        }
    }

    pub fn is_scope(&self) -> bool {
        self.resource_type.is_none()
    }
}

/// Closed set of node kinds visitors dispatch on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    JobDefinition(JobDefinition),
    Role(Role),
    Other(Resource),
}

impl NodeKind {
    /// Human-readable kind name.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::JobDefinition(_) => "job definition",
            NodeKind::Role(_) => "role",
            NodeKind::Other(r) if r.is_scope() => "scope",
            NodeKind::Other(_) => "resource",
        }
    }
}

/// A node of the resource tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Arena index.
    pub id: NodeId,

    /// Construct id, unique among siblings.
    pub construct_id: String,

    /// Full path from the root.
    pub path: String,

    pub parent: Option<NodeId>,

    /// Children in declaration order.
    pub children: Vec<NodeId>,

    pub kind: NodeKind,
}

impl ResourceNode {
    /// Logical id of this node in the provisioning document.
    pub fn logical_id(&self) -> String {
        logical_id(&self.path)
    }
}

/// Logical id for a node path.
///
/// Drops the root component, keeps only ASCII alphanumerics of the rest and
/// concatenates them. A root-only path maps to its own alphanumerics.
pub fn logical_id(path: &str) -> String {
    let mut components = path.split(PATH_SEP);
    let root = components.next().unwrap_or_default();
    let rest: String = components
        .flat_map(str::chars)
        .filter(char::is_ascii_alphanumeric)
        .collect();
    if rest.is_empty() {
        root.chars().filter(char::is_ascii_alphanumeric).collect()
    } else {
        rest
    }
}

/// Eight uppercase hex digits derived from `input`.
///
/// Deterministic across runs; used to keep generated names unique when
/// their readable part is lossy.
pub fn short_hash(input: &str) -> String {
    let mut hasher = FxHasher::default();
    hasher.write(input.as_bytes());
    let hash = hasher.finish();
    format!("{:08X}", (hash >> 32) ^ (hash & 0xFFFF_FFFF))
}

fn validate_construct_id(id: &str) -> InfraResult<()> {
    if id.is_empty() || id.contains(PATH_SEP) {
        return Err(InfraError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Arena of resource nodes under a single root.
#[derive(Debug, Clone)]
pub struct ResourceTree {
    nodes: Vec<ResourceNode>,
    by_path: FxHashMap<String, NodeId>,
}

impl ResourceTree {
    /// Create a tree whose root scope is named `root_id`.
    pub fn new(root_id: &str) -> InfraResult<Self> {
        validate_construct_id(root_id)?;
        let root = ResourceNode {
            id: NodeId(0),
            construct_id: root_id.to_string(),
            path: root_id.to_string(),
            parent: None,
            children: Vec::new(),
            kind: NodeKind::Other(Resource::scope()),
        };
        let mut by_path = FxHashMap::default();
        by_path.insert(root.path.clone(), root.id);
        Ok(Self {
            nodes: vec![root],
            by_path,
        })
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Declare a node under `parent`.
    pub fn add(&mut self, parent: NodeId, construct_id: &str, kind: NodeKind) -> InfraResult<NodeId> {
        validate_construct_id(construct_id)?;
        let parent_path = self
            .get(parent)
            .map(|p| p.path.clone())
            .ok_or_else(|| InfraError::NodeNotFound(parent.to_string()))?;

        let path = format!("{parent_path}{PATH_SEP}{construct_id}");
        if self.by_path.contains_key(&path) {
            return Err(InfraError::DuplicateNode(path));
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(ResourceNode {
            id,
            construct_id: construct_id.to_string(),
            path: path.clone(),
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.by_path.insert(path, id);
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Declare a grouping scope under `parent`.
    pub fn add_scope(&mut self, parent: NodeId, construct_id: &str) -> InfraResult<NodeId> {
        self.add(parent, construct_id, NodeKind::Other(Resource::scope()))
    }

    pub fn get(&self, id: NodeId) -> Option<&ResourceNode> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut ResourceNode> {
        self.nodes.get_mut(id.0)
    }

    /// Look a node up by its full path.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.by_path.get(path).copied()
    }

    /// The role at `id`, if that node is a role.
    pub fn role(&self, id: NodeId) -> Option<&Role> {
        match &self.get(id)?.kind {
            NodeKind::Role(role) => Some(role),
            _ => None,
        }
    }

    /// Mutable access to the role at `id`, if that node is a role.
    pub fn role_mut(&mut self, id: NodeId) -> Option<&mut Role> {
        match &mut self.get_mut(id)?.kind {
            NodeKind::Role(role) => Some(role),
            _ => None,
        }
    }

    /// The job definition at `id`, if that node is one.
    pub fn job_definition(&self, id: NodeId) -> Option<&JobDefinition> {
        match &self.get(id)?.kind {
            NodeKind::JobDefinition(def) => Some(def),
            _ => None,
        }
    }

    /// Logical id of the node at `id`.
    pub fn logical_id(&self, id: NodeId) -> InfraResult<String> {
        self.get(id)
            .map(ResourceNode::logical_id)
            .ok_or_else(|| InfraError::NodeNotFound(id.to_string()))
    }

    /// Node ids in pre-order: parents before children, siblings in
    /// declaration order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        order
    }

    /// All nodes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter()
    }

    /// Ids of all role nodes.
    pub fn roles(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Role(_)))
            .map(|n| n.id)
    }

    /// Ids of all job definition nodes.
    pub fn job_definitions(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::JobDefinition(_)))
            .map(|n| n.id)
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
