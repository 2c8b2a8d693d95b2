//! Property-based tests for cross-account image resolution.
//!
//! Whatever the order in which job definitions and roles are declared, the
//! execution role must end up with exactly one pull policy per distinct
//! repository ARN, and every discovery must be accounted for.

use std::collections::BTreeSet;

use proptest::prelude::*;
use unfold_infra::{
    CrossAccountImageResolver, ImageRef, JobDefinition, NodeId, NodeKind, ResolverConfig,
    ResourceTree, Role, TemplateExpr,
};

const ACCOUNTS: [&str; 3] = ["111111111111", "222222222222", "210987654321"];

const REGIONS: [&str; 3] = ["us-east-1", "eu-west-1", "${AWS::Region}"];

/// A private registry image.
#[derive(Debug, Clone)]
struct Image {
    account: &'static str,
    region: &'static str,
    repository: String,
}

impl Image {
    fn uri(&self) -> String {
        format!(
            "{}.dkr.ecr.{}.amazonaws.com/{}:latest",
            self.account, self.region, self.repository
        )
    }

    fn arn(&self) -> String {
        let region = if self.region.starts_with("${") { "*" } else { self.region };
        format!(
            "arn:aws:ecr:{region}:{}:repository/{}",
            self.account, self.repository
        )
    }
}

/// Nodes placed under the stack root.
#[derive(Debug, Clone)]
enum Decl {
    /// Job definition pulling from a cross-account registry.
    EcrJob(Image),
    /// Job definition with a public image.
    PublicJob,
    /// Role matching the execution role suffix.
    ExecutionRole,
    /// Unrelated role.
    OtherRole,
}

fn arb_repository() -> impl Strategy<Value = String> {
    prop_oneof![
        // Names whose readable policy slugs or logical ids collide.
        1 => prop::sample::select(vec!["team/solver", "team-solver", "my-repo", "my_repo"])
            .prop_map(str::to_string),
        3 => "[a-z0-9]{1,6}([._-][a-z0-9]{1,4}){0,2}(/[a-z0-9]{1,6}([._-][a-z0-9]{1,4})?){0,2}",
    ]
}

fn arb_image() -> impl Strategy<Value = Image> {
    (
        prop::sample::select(ACCOUNTS.to_vec()),
        prop::sample::select(REGIONS.to_vec()),
        arb_repository(),
    )
        .prop_map(|(account, region, repository)| Image {
            account,
            region,
            repository,
        })
}

fn arb_decl() -> impl Strategy<Value = Decl> {
    prop_oneof![
        4 => arb_image().prop_map(Decl::EcrJob),
        1 => Just(Decl::PublicJob),
        1 => Just(Decl::ExecutionRole),
        1 => Just(Decl::OtherRole),
    ]
}

/// Declarations drawing on a small image pool, so repositories repeat.
fn arb_decls(max: usize) -> impl Strategy<Value = Vec<Decl>> {
    prop::collection::vec(arb_image(), 1..5).prop_flat_map(move |pool| {
        let pooled = prop::sample::select(pool).prop_map(Decl::EcrJob);
        prop::collection::vec(prop_oneof![1 => pooled, 1 => arb_decl()], 0..max)
    })
}

/// Declare each item in its own scope so ids never collide.
fn build(decls: &[Decl]) -> (ResourceTree, Vec<NodeId>, Vec<NodeId>) {
    let mut tree = ResourceTree::new("Stack").unwrap();
    let mut execution_roles = Vec::new();
    let mut other_roles = Vec::new();
    for (i, decl) in decls.iter().enumerate() {
        let scope = tree.add_scope(tree.root(), &format!("S{i}")).unwrap();
        match decl {
            Decl::EcrJob(image) => {
                let image = ImageRef::Template(TemplateExpr::sub(image.uri()));
                let def = JobDefinition::new(image);
                tree.add(scope, "Job", NodeKind::JobDefinition(def)).unwrap();
            }
            Decl::PublicJob => {
                let def = JobDefinition::new(ImageRef::literal("public.ecr.aws/my-repo"));
                tree.add(scope, "Job", NodeKind::JobDefinition(def)).unwrap();
            }
            Decl::ExecutionRole => {
                let role = Role::new("ecs-tasks.amazonaws.com");
                let id = tree
                    .add(scope, "batchExecutionRole", NodeKind::Role(role))
                    .unwrap();
                execution_roles.push(id);
            }
            Decl::OtherRole => {
                let role = Role::new("ecs-tasks.amazonaws.com");
                let id = tree.add(scope, "jobRole", NodeKind::Role(role)).unwrap();
                other_roles.push(id);
            }
        }
    }
    (tree, execution_roles, other_roles)
}

fn images(decls: &[Decl]) -> Vec<&Image> {
    decls
        .iter()
        .filter_map(|d| match d {
            Decl::EcrJob(image) => Some(image),
            _ => None,
        })
        .collect()
}

fn attached_resources(tree: &ResourceTree, role: NodeId) -> Vec<String> {
    tree.role(role)
        .unwrap()
        .attached_policies()
        .iter()
        .flat_map(|p| p.document.statement[1].resource.clone())
        .collect()
}

fn attached_names(tree: &ResourceTree, roles: &[NodeId]) -> BTreeSet<String> {
    roles
        .iter()
        .flat_map(|role| tree.role(*role).unwrap().attached_policies())
        .map(|p| p.name.clone())
        .collect()
}

proptest! {
    #[test]
    fn every_discovery_is_accounted_for(decls in arb_decls(24)) {
        let (mut tree, execution_roles, _) = build(&decls);
        let mut resolver = CrossAccountImageResolver::new(ResolverConfig::default());
        tree.apply_aspect(&mut resolver);
        let report = resolver.finish(&tree);

        let mut discovered: Vec<String> =
            images(&decls).iter().map(|i| i.repository.clone()).collect();
        let mut accounted: Vec<String> = report
            .granted_repositories()
            .into_iter()
            .map(str::to_string)
            .chain(report.unresolved.iter().cloned())
            .collect();
        discovered.sort();
        accounted.sort();
        prop_assert_eq!(discovered, accounted);

        if execution_roles.is_empty() {
            prop_assert!(report.grants.is_empty());
            prop_assert!(report.role.is_none());
        } else {
            prop_assert!(report.unresolved.is_empty());
        }
    }

    #[test]
    fn first_execution_role_gets_one_policy_per_repository_arn(decls in arb_decls(24)) {
        let (mut tree, execution_roles, other_roles) = build(&decls);
        let mut resolver = CrossAccountImageResolver::new(ResolverConfig::default());
        tree.apply_aspect(&mut resolver);

        let Some((first, rest)) = execution_roles.split_first() else {
            return Ok(());
        };

        let expected: BTreeSet<String> = images(&decls).iter().map(|i| i.arn()).collect();
        let mut granted = attached_resources(&tree, *first);
        let total = granted.len();
        granted.sort();
        granted.dedup();
        prop_assert_eq!(total, granted.len());
        prop_assert_eq!(granted.into_iter().collect::<BTreeSet<_>>(), expected.clone());
        prop_assert_eq!(attached_names(&tree, &[*first]).len(), expected.len());

        for other in rest.iter().chain(&other_roles) {
            prop_assert!(attached_resources(&tree, *other).is_empty());
        }
    }

    #[test]
    fn grants_are_independent_of_declaration_order(
        (decls, shuffled) in arb_decls(16)
            .prop_flat_map(|decls| (Just(decls.clone()), Just(decls).prop_shuffle()))
    ) {
        let resolve = |decls: &[Decl]| {
            let (mut tree, execution_roles, _) = build(decls);
            let mut resolver = CrossAccountImageResolver::new(ResolverConfig::default());
            tree.apply_aspect(&mut resolver);
            let mut grants: Vec<(String, String, String)> = resolver
                .finish(&tree)
                .grants
                .into_iter()
                .map(|g| (g.repository, g.arn, g.policy_name))
                .collect();
            grants.sort();
            (grants, attached_names(&tree, &execution_roles))
        };

        let (grants, names) = resolve(&decls);
        let (shuffled_grants, shuffled_names) = resolve(&shuffled);
        prop_assert_eq!(&grants, &shuffled_grants);
        prop_assert_eq!(names, shuffled_names);

        if decls.iter().any(|d| matches!(d, Decl::ExecutionRole)) {
            let mut all: Vec<String> = images(&decls).iter().map(|i| i.arn()).collect();
            all.sort();
            let granted: Vec<String> = grants.into_iter().map(|(_, arn, _)| arn).collect();
            prop_assert_eq!(granted, all);
        }
    }
}
