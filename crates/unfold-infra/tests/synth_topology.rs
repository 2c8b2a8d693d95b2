//! End-to-end synthesis of the batch topology.

use serde_json::{Value, json};
use unfold_infra::{
    App, DeployConfig, GrantTiming, ImageSource, OutputFormat, policy_logical_id,
    pull_policy_name,
};

fn policies_on(template: &unfold_infra::Template, role_lid: &str) -> Vec<String> {
    template
        .resources
        .values()
        .filter(|r| r["Type"] == "AWS::IAM::Policy")
        .filter(|r| r["Properties"]["Roles"][0] == json!({ "Ref": role_lid }))
        .filter_map(|r| r["Properties"]["PolicyName"].as_str().map(str::to_string))
        .collect()
}

#[test]
fn test_default_stack() {
    let assembly = App::new(DeployConfig::default()).synth().unwrap();
    let template = &assembly.template;

    assert_eq!(template.resources_of_type("AWS::Batch::JobDefinition").len(), 4);
    assert_eq!(template.resources_of_type("AWS::Batch::ComputeEnvironment").len(), 1);
    assert_eq!(template.resources_of_type("AWS::StepFunctions::StateMachine").len(), 1);
    assert_eq!(template.resources_of_type("AWS::EC2::FlowLog").len(), 1);

    let mut policies = policies_on(template, "BatchbatchExecutionRole");
    policies.sort();
    let pull = pull_policy_name(
        "unfold-sa-optimizer",
        "arn:aws:ecr:*:123456789012:repository/unfold-sa-optimizer",
    );
    assert_eq!(
        policies,
        vec!["BatchbatchExecutionRoleDefaultPolicy".to_string(), pull]
    );
    assert_eq!(policies_on(template, "BatchjobRole").len(), 1);

    // The role is declared before the job definitions.
    assert!(
        assembly
            .report
            .grants
            .iter()
            .all(|g| g.timing == GrantTiming::Immediate)
    );
}

#[test]
fn test_pull_policy_targets_asset_account() {
    let mut config = DeployConfig::default();
    config.resolver.image_asset_account = Some("366590864501".to_string());
    let assembly = App::new(config).synth().unwrap();

    let tree = &assembly.topology.tree;
    let role = tree.find("QCUnfoldStack/Batch/batchExecutionRole").unwrap();
    let attached = &tree.role(role).unwrap().attached_policies()[0];
    let policy = assembly
        .template
        .resource(&policy_logical_id("BatchbatchExecutionRole", attached))
        .unwrap();
    let statements = &policy["Properties"]["PolicyDocument"]["Statement"];
    assert_eq!(statements[0]["Action"], json!(["ecr:GetAuthorizationToken"]));
    assert_eq!(
        statements[1]["Resource"],
        json!(["arn:aws:ecr:*:366590864501:repository/unfold-sa-optimizer"])
    );

    let job = assembly
        .template
        .resource("BatchQCJobvCpus2Mem2G")
        .unwrap();
    assert_eq!(
        job["Properties"]["ContainerProperties"]["Image"]["Fn::Sub"],
        "366590864501.dkr.ecr.${AWS::Region}.${AWS::URLSuffix}/unfold-sa-optimizer:latest"
    );
}

#[test]
fn test_distinct_repositories_synthesize_side_by_side() {
    let mut config = DeployConfig::default();
    config.batch.image = ImageSource::Asset {
        repository: "my-repo".to_string(),
        tag: "1".to_string(),
        account: None,
    };
    let mut topology = App::new(config.clone()).build().unwrap();

    // A second job pulling a repository whose name differs only in punctuation.
    let tree = &mut topology.tree;
    let batch = tree.find("QCUnfoldStack/Batch").unwrap();
    let execution = tree.find("QCUnfoldStack/Batch/batchExecutionRole").unwrap();
    let mut def = unfold_infra::JobDefinition::new(unfold_infra::ImageRef::container_asset(
        "123456789012",
        "my_repo",
        "1",
    ));
    def.execution_role = Some(execution);
    tree.add(batch, "ExtraJob", unfold_infra::NodeKind::JobDefinition(def))
        .unwrap();

    let report = App::new(config).resolve(tree).unwrap();
    assert!(report.is_complete());

    let template =
        unfold_infra::synthesize(&topology.tree, &topology.outputs, None).unwrap();
    let mut resources: Vec<String> = template
        .resources
        .values()
        .filter(|r| r["Type"] == "AWS::IAM::Policy")
        .filter(|r| {
            r["Properties"]["PolicyName"]
                .as_str()
                .is_some_and(|n| n.starts_with("CrossAccountECR-"))
        })
        .filter_map(|r| {
            r["Properties"]["PolicyDocument"]["Statement"][1]["Resource"][0]
                .as_str()
                .map(str::to_string)
        })
        .collect();
    resources.sort();
    assert_eq!(
        resources,
        vec![
            "arn:aws:ecr:*:123456789012:repository/my-repo".to_string(),
            "arn:aws:ecr:*:123456789012:repository/my_repo".to_string(),
        ]
    );
}

#[test]
fn test_state_machine_definition() {
    let assembly = App::new(DeployConfig::default()).synth().unwrap();
    let machine = assembly.template.resource("BatchQCBatchStateMachine").unwrap();
    let definition = &machine["Properties"]["Definition"];

    assert_eq!(definition["StartAt"], "QCBatchParallel");
    assert_eq!(definition["TimeoutSeconds"], 7200);

    let branches = definition["States"]["QCBatchParallel"]["Branches"]
        .as_array()
        .unwrap();
    assert_eq!(branches.len(), 60);

    let first = &branches[0]["States"]["M1-D4-DW_2000Q_6-vCpus2_Mem_2G"];
    assert_eq!(first["Resource"], "arn:aws:states:::batch:submitJob.sync");
    assert_eq!(
        first["Parameters"]["JobDefinition"],
        "${JobDefinition_vCpus2_Mem_2G}"
    );

    let substitutions = &machine["Properties"]["DefinitionSubstitutions"];
    assert_eq!(substitutions["JobQueue"], json!({ "Ref": "BatchJobQueue" }));
    assert_eq!(
        substitutions["JobDefinition_vCpus2_Mem_2G"],
        json!({ "Ref": "BatchQCJobvCpus2Mem2G" })
    );
    assert_eq!(
        substitutions["AggResultFunction"],
        json!({ "Fn::GetAtt": ["BatchAggResultLambdaResource", "Arn"] })
    );

    assert_eq!(
        definition["States"]["Aggregate Result"]["Next"],
        "Succeed"
    );
}

#[test]
fn test_outputs_and_rendering() {
    let mut config = DeployConfig::default();
    config.stack.description = Some("Molecular unfolding".to_string());
    config.batch.image = ImageSource::Uri {
        uri: "python:3.11".to_string(),
    };
    let assembly = App::new(config).synth().unwrap();
    assert!(assembly.report.grants.is_empty());

    let rendered = assembly.template.render(OutputFormat::Json).unwrap();
    let parsed: Value = serde_json::from_str(&rendered).unwrap();
    assert_eq!(parsed["Description"], "Molecular unfolding");
    assert_eq!(
        parsed["Outputs"]["jobQueue"]["Value"],
        json!({ "Fn::GetAtt": ["BatchJobQueue", "JobQueueName"] })
    );
    assert_eq!(
        parsed["Outputs"]["stateMachineURL"]["Value"]["Fn::Join"][1][0],
        "https://console.aws.amazon.com/states/home?region=us-east-1#/statemachines/view/"
    );

    let yaml = assembly.template.render(OutputFormat::Yaml).unwrap();
    let reparsed: Value = serde_yaml_ng::from_str(&yaml).unwrap();
    assert_eq!(reparsed["Resources"].as_object().unwrap().len(), template_len(&parsed));
}

fn template_len(parsed: &Value) -> usize {
    parsed["Resources"].as_object().map_or(0, |r| r.len())
}
