//! Cross-account image pull policy resolution.
//!
//! Job definitions whose image lives in another account's private registry
//! can only start if the batch execution role may pull from that registry.
//! [`CrossAccountImageResolver`] walks the declared tree once, collects the
//! repositories referenced by templated job definition images and attaches
//! one least-privilege pull policy per repository ARN to the execution role.
//!
//! The walk order is not under the resolver's control, so the role may be
//! met before or after the job definitions that need it:
//!
//! - job definition before role: the repository is queued and flushed when
//!   the role is bound;
//! - job definition after role: the policy is attached during that visit.
//!
//! Only the first role whose path ends with the configured suffix is ever
//! bound. Images that are literal strings, templated with anything but
//! `Fn::Sub`, or not private registry endpoints are skipped silently.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::aspect::Aspect;
use crate::diagnostics::{DiagnosticSink, Level, TracingSink};
use crate::ecr::EcrRepository;
use crate::iam::{Policy, PolicyStatement};
use crate::tree::{JobDefinition, NodeId, NodeKind, ResourceTree, short_hash};

/// Path suffix identifying the batch execution role.
pub const DEFAULT_EXECUTION_ROLE_SUFFIX: &str = "/batchExecutionRole";

/// Account-wide action needed to log in to any registry.
pub const AUTH_TOKEN_ACTION: &str = "ecr:GetAuthorizationToken";

/// Repository-scoped actions needed to pull an image.
pub const PULL_ACTIONS: [&str; 3] = [
    "ecr:BatchCheckLayerAvailability",
    "ecr:GetDownloadUrlForLayer",
    "ecr:BatchGetImage",
];

/// Prefix of generated pull policy names.
pub const POLICY_NAME_PREFIX: &str = "CrossAccountECR-";

/// Longest inline policy name IAM accepts.
const MAX_POLICY_NAME_LEN: usize = 128;

/// Name of the pull policy granting access to the repository `arn`.
///
/// The readable part is the repository name with `/` mapped to `-`; the
/// trailing digest of the full ARN keeps repositories that differ only in
/// account, region or punctuation apart.
pub fn pull_policy_name(repository: &str, arn: &str) -> String {
    let digest = short_hash(arn);
    let room = MAX_POLICY_NAME_LEN - POLICY_NAME_PREFIX.len() - digest.len() - 1;
    let slug: String = repository
        .chars()
        .map(|c| if c == '/' { '-' } else { c })
        .take(room)
        .collect();
    format!("{POLICY_NAME_PREFIX}{slug}-{digest}")
}

/// Resolver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Path suffix identifying the execution role.
    #[serde(default = "default_role_suffix")]
    pub execution_role_suffix: String,

    /// Account that publishes container assets. Overrides the account
    /// parsed from the image URI in granted ARNs.
    #[serde(default)]
    pub image_asset_account: Option<String>,

    /// ARN partition.
    #[serde(default = "default_partition")]
    pub partition: String,

    /// Treat registries left pending after the walk as a pipeline error.
    #[serde(default)]
    pub fail_on_unresolved: bool,
}

fn default_role_suffix() -> String {
    DEFAULT_EXECUTION_ROLE_SUFFIX.to_string()
}

fn default_partition() -> String {
    "aws".to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            execution_role_suffix: default_role_suffix(),
            image_asset_account: None,
            partition: default_partition(),
            fail_on_unresolved: false,
        }
    }
}

/// When a grant was attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantTiming {
    /// Queued before the role was found and flushed when it was bound.
    Deferred,

    /// Attached while visiting the job definition.
    Immediate,
}

/// One attach call made on the execution role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub repository: String,
    /// Repository ARN the policy grants pull access to.
    pub arn: String,
    pub role_path: String,
    pub policy_name: String,
    pub timing: GrantTiming,
}

/// Outcome of one traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    /// Path of the bound execution role, if one was found.
    pub role: Option<String>,

    /// Attach calls in the order they happened, one per discovery.
    pub grants: Vec<Grant>,

    /// Repositories discovered but never granted.
    pub unresolved: Vec<String>,
}

impl ResolutionReport {
    /// Repository names of all grants, in attach order.
    pub fn granted_repositories(&self) -> Vec<&str> {
        self.grants.iter().map(|g| g.repository.as_str()).collect()
    }

    /// `true` when nothing was left pending.
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Single-use visitor wiring cross-account pull policies onto the
/// execution role.
pub struct CrossAccountImageResolver {
    config: ResolverConfig,
    pending: Vec<EcrRepository>,
    resolved_role: Option<NodeId>,
    /// Pull policies keyed by the repository ARN they grant.
    policies: FxHashMap<String, Policy>,
    grants: Vec<Grant>,
    sink: Box<dyn DiagnosticSink>,
}

impl CrossAccountImageResolver {
    /// A resolver logging through `tracing`.
    pub fn new(config: ResolverConfig) -> Self {
        Self::with_sink(config, Box::new(TracingSink))
    }

    /// A resolver logging through `sink`.
    pub fn with_sink(config: ResolverConfig, sink: Box<dyn DiagnosticSink>) -> Self {
        Self {
            config,
            pending: Vec::new(),
            resolved_role: None,
            policies: FxHashMap::default(),
            grants: Vec::new(),
            sink,
        }
    }

    /// Repository names waiting for the execution role, oldest first.
    pub fn pending(&self) -> Vec<&str> {
        self.pending.iter().map(|r| r.name.as_str()).collect()
    }

    /// The bound execution role.
    pub fn resolved_role(&self) -> Option<NodeId> {
        self.resolved_role
    }

    /// Attach calls made so far.
    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }

    /// End the traversal and report.
    ///
    /// Registries still pending mean no execution role was found; this is
    /// reported as a warning, not an error.
    pub fn finish(self, tree: &ResourceTree) -> ResolutionReport {
        let role = self
            .resolved_role
            .and_then(|id| tree.get(id))
            .map(|n| n.path.clone());
        let unresolved: Vec<String> = self.pending.iter().map(|r| r.name.clone()).collect();

        if !unresolved.is_empty() {
            let joined = unresolved.join(",");
            self.sink.log(
                Level::Warn,
                "cross-account registries left without an execution role",
                &[
                    ("suffix", self.config.execution_role_suffix.as_str()),
                    ("repositories", joined.as_str()),
                ],
            );
        }

        ResolutionReport {
            role,
            grants: self.grants,
            unresolved,
        }
    }

    /// The registry a job definition pulls from, if it is a templated
    /// private registry endpoint.
    fn registry_of(&self, path: &str, def: &JobDefinition) -> Option<EcrRepository> {
        let Some(expr) = def.image.as_template() else {
            self.sink.log(Level::Debug, "literal image, skipping", &[("node", path)]);
            return None;
        };
        if !expr.is_sub() {
            self.sink.log(
                Level::Debug,
                "image template is not a substitution, skipping",
                &[("node", path), ("key", expr.key.as_str())],
            );
            return None;
        }
        let repo = expr.first_arg().and_then(EcrRepository::parse);
        if repo.is_none() {
            self.sink.log(
                Level::Debug,
                "image is not a private registry endpoint, skipping",
                &[("node", path)],
            );
        }
        repo
    }

    /// ARN the pull policy for `repo` is scoped to.
    fn granted_arn(&self, repo: &EcrRepository) -> String {
        repo.arn(
            &self.config.partition,
            self.config.image_asset_account.as_deref(),
        )
    }

    /// Pull policy for a repository ARN, built once per ARN.
    fn pull_policy(&mut self, repo: &EcrRepository, arn: &str) -> Policy {
        self.policies
            .entry(arn.to_string())
            .or_insert_with_key(|arn| {
                Policy::new(
                    pull_policy_name(&repo.name, arn),
                    vec![
                        PolicyStatement::allow()
                            .actions([AUTH_TOKEN_ACTION])
                            .resources(["*"]),
                        PolicyStatement::allow()
                            .actions(PULL_ACTIONS)
                            .resources([arn.clone()]),
                    ],
                )
            })
            .clone()
    }

    fn grant(
        &mut self,
        tree: &mut ResourceTree,
        role_id: NodeId,
        repo: &EcrRepository,
        timing: GrantTiming,
    ) {
        let arn = self.granted_arn(repo);
        let policy = self.pull_policy(repo, &arn);
        let policy_name = policy.name.clone();
        let Some(role_path) = tree.get(role_id).map(|n| n.path.clone()) else {
            return;
        };
        let Some(role) = tree.role_mut(role_id) else {
            return;
        };
        let newly_attached = role.attach_inline_policy(policy);

        let timing_name = match timing {
            GrantTiming::Deferred => "deferred",
            GrantTiming::Immediate => "immediate",
        };
        self.sink.log(
            Level::Info,
            "attached cross-account pull policy",
            &[
                ("repository", repo.name.as_str()),
                ("arn", arn.as_str()),
                ("role", role_path.as_str()),
                ("timing", timing_name),
                ("new", if newly_attached { "true" } else { "false" }),
            ],
        );

        self.grants.push(Grant {
            repository: repo.name.clone(),
            arn,
            role_path,
            policy_name,
            timing,
        });
    }

    fn visit_job_definition(&mut self, tree: &mut ResourceTree, repo: EcrRepository, path: &str) {
        match self.resolved_role {
            Some(role_id) => self.grant(tree, role_id, &repo, GrantTiming::Immediate),
            None => {
                self.sink.log(
                    Level::Debug,
                    "queued repository until the execution role is found",
                    &[("repository", repo.name.as_str()), ("node", path)],
                );
                self.pending.push(repo);
            }
        }
    }

    fn visit_role(&mut self, tree: &mut ResourceTree, node: NodeId, path: &str) {
        if self.resolved_role.is_some() {
            self.sink.log(
                Level::Debug,
                "execution role already bound, ignoring",
                &[("node", path)],
            );
            return;
        }

        self.resolved_role = Some(node);
        let pending = self.pending.len().to_string();
        self.sink.log(
            Level::Info,
            "execution role bound",
            &[("role", path), ("pending", pending.as_str())],
        );

        while let Some(repo) = self.pending.pop() {
            self.grant(tree, node, &repo, GrantTiming::Deferred);
        }
    }
}

impl Aspect for CrossAccountImageResolver {
    fn visit(&mut self, tree: &mut ResourceTree, node: NodeId) {
        let Some(current) = tree.get(node) else {
            return;
        };
        let path = current.path.clone();

        match &current.kind {
            NodeKind::JobDefinition(def) => {
                if let Some(repo) = self.registry_of(&path, def) {
                    self.visit_job_definition(tree, repo, &path);
                }
            }
            NodeKind::Role(_) if path.ends_with(&self.config.execution_role_suffix) => {
                self.visit_role(tree, node, &path);
            }
            NodeKind::Role(_) | NodeKind::Other(_) => {}
        }
    }
}
