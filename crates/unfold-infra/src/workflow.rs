//! Workflow state machine for the job sweep.
//!
//! States form a DAG of transitions; every state has at most one successor.
//! The machine renders to Amazon States Language with `${Var}` placeholders
//! that the provisioning engine fills from [`StateMachine::substitutions`].

use std::collections::BTreeMap;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{InfraError, InfraResult};

/// Service integration for a synchronous batch job submission.
pub const BATCH_SUBMIT_JOB_SYNC: &str = "arn:aws:states:::batch:submitJob.sync";

/// Service integration for a function invocation.
pub const LAMBDA_INVOKE: &str = "arn:aws:states:::lambda:invoke";

/// Transient function errors retried by default.
const LAMBDA_RETRYABLE_ERRORS: [&str; 4] = [
    "Lambda.ClientExecutionTimeoutException",
    "Lambda.ServiceException",
    "Lambda.AWSLambdaException",
    "Lambda.SdkClientException",
];

/// What a state does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateKind {
    /// Submit a batch job and wait for it to finish.
    BatchSubmitJob {
        /// Substitution variable holding the job definition ARN.
        job_definition_var: String,
        /// Substitution variable holding the job queue ARN.
        job_queue_var: String,
        /// Container command override.
        command: Vec<String>,
    },

    /// Invoke a function with the state input as payload.
    LambdaInvoke {
        /// Substitution variable holding the function ARN.
        function_var: String,
        /// JSONPath selecting the state output.
        output_path: Option<String>,
    },

    /// Run branches concurrently and wait for all of them.
    Parallel { branches: Vec<Branch> },

    /// Terminal success.
    Succeed,
}

/// A named state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub name: String,
    pub kind: StateKind,
}

impl State {
    pub fn new(name: impl Into<String>, kind: StateKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Check if the state ends execution by itself.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, StateKind::Succeed)
    }

    /// ASL body without the transition field.
    fn body(&self) -> Value {
        match &self.kind {
            StateKind::BatchSubmitJob {
                job_definition_var,
                job_queue_var,
                command,
            } => json!({
                "Type": "Task",
                "Resource": BATCH_SUBMIT_JOB_SYNC,
                "Parameters": {
                    "JobDefinition": format!("${{{job_definition_var}}}"),
                    "JobName": self.name,
                    "JobQueue": format!("${{{job_queue_var}}}"),
                    "ContainerOverrides": { "Command": command },
                },
            }),
            StateKind::LambdaInvoke {
                function_var,
                output_path,
            } => {
                let mut body = json!({
                    "Type": "Task",
                    "Resource": LAMBDA_INVOKE,
                    "Parameters": {
                        "FunctionName": format!("${{{function_var}}}"),
                        "Payload.$": "$",
                    },
                    "Retry": [{
                        "ErrorEquals": LAMBDA_RETRYABLE_ERRORS,
                        "IntervalSeconds": 2,
                        "MaxAttempts": 6,
                        "BackoffRate": 2,
                    }],
                });
                if let (Some(path), Some(obj)) = (output_path, body.as_object_mut()) {
                    obj.insert("OutputPath".to_string(), Value::String(path.clone()));
                }
                body
            }
            StateKind::Parallel { branches } => json!({
                "Type": "Parallel",
                "Branches": branches.iter().map(Branch::to_asl).collect::<Vec<_>>(),
            }),
            StateKind::Succeed => json!({ "Type": "Succeed" }),
        }
    }

    /// ASL body with `Next` or `End` set.
    fn to_asl(&self, next: Option<&str>) -> Value {
        let mut body = self.body();
        if self.is_terminal() {
            return body;
        }
        if let Some(obj) = body.as_object_mut() {
            match next {
                Some(next) => obj.insert("Next".to_string(), Value::String(next.to_string())),
                None => obj.insert("End".to_string(), Value::Bool(true)),
            };
        }
        body
    }
}

/// A linear chain of states run inside a parallel state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub states: Vec<State>,
}

impl Branch {
    /// A branch consisting of one state.
    pub fn single(state: State) -> Self {
        Self {
            states: vec![state],
        }
    }

    fn to_asl(&self) -> Value {
        let mut states = Map::new();
        for (i, state) in self.states.iter().enumerate() {
            let next = self.states.get(i + 1).map(|s| s.name.as_str());
            states.insert(state.name.clone(), state.to_asl(next));
        }
        json!({
            "StartAt": self.states.first().map(|s| s.name.as_str()),
            "States": states,
        })
    }
}

/// A state machine definition.
#[derive(Debug, Clone)]
pub struct StateMachine {
    /// Execution timeout in seconds.
    pub timeout_seconds: Option<u64>,

    graph: DiGraph<State, ()>,
    index: FxHashMap<String, NodeIndex>,
    /// Every state name in the machine, branch states included.
    names: FxHashSet<String>,
    start: Option<NodeIndex>,
    substitutions: BTreeMap<String, Value>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create an empty state machine.
    pub fn new() -> Self {
        Self {
            timeout_seconds: None,
            graph: DiGraph::new(),
            index: FxHashMap::default(),
            names: FxHashSet::default(),
            start: None,
            substitutions: BTreeMap::new(),
        }
    }

    /// Add a top-level state. The first state added is the start state.
    pub fn add_state(&mut self, state: State) -> InfraResult<()> {
        let mut new_names = vec![state.name.clone()];
        if let StateKind::Parallel { branches } = &state.kind {
            new_names.extend(
                branches
                    .iter()
                    .flat_map(|b| b.states.iter().map(|s| s.name.clone())),
            );
        }
        let mut seen = FxHashSet::default();
        for name in &new_names {
            if self.names.contains(name) || !seen.insert(name.as_str()) {
                return Err(InfraError::DuplicateState(name.clone()));
            }
        }
        self.names.extend(new_names);

        let name = state.name.clone();
        let idx = self.graph.add_node(state);
        self.index.insert(name, idx);
        if self.start.is_none() {
            self.start = Some(idx);
        }
        Ok(())
    }

    /// Transition from `from` to `to` once `from` finishes.
    pub fn next(&mut self, from: &str, to: &str) -> InfraResult<()> {
        let from_idx = self.idx(from)?;
        let to_idx = self.idx(to)?;

        let has_next = self
            .graph
            .edges_directed(from_idx, Direction::Outgoing)
            .next()
            .is_some();
        if has_next || self.graph[from_idx].is_terminal() {
            return Err(InfraError::InvalidTransition(from.to_string()));
        }

        if from_idx == to_idx
            || petgraph::algo::has_path_connecting(&self.graph, to_idx, from_idx, None)
        {
            return Err(InfraError::StateCycle);
        }

        self.graph.add_edge(from_idx, to_idx, ());
        Ok(())
    }

    /// Bind a `${var}` placeholder to a provisioning-time value.
    pub fn substitute(&mut self, var: impl Into<String>, value: Value) {
        self.substitutions.insert(var.into(), value);
    }

    /// Placeholder bindings.
    pub fn substitutions(&self) -> &BTreeMap<String, Value> {
        &self.substitutions
    }

    /// Look up a top-level state.
    pub fn state(&self, name: &str) -> Option<&State> {
        self.index.get(name).map(|idx| &self.graph[*idx])
    }

    /// Name of the successor of a top-level state.
    pub fn successor(&self, name: &str) -> Option<&str> {
        let idx = self.index.get(name)?;
        self.graph
            .edges_directed(*idx, Direction::Outgoing)
            .next()
            .map(|edge| self.graph[edge.target()].name.as_str())
    }

    /// Name of the start state.
    pub fn start_at(&self) -> Option<&str> {
        self.start.map(|idx| self.graph[idx].name.as_str())
    }

    /// Top-level states in execution order.
    pub fn execution_order(&self) -> Vec<&State> {
        match petgraph::algo::toposort(&self.graph, None) {
            Ok(order) => order.into_iter().map(|idx| &self.graph[idx]).collect(),
            // Cycles are rejected in `next`.
            Err(_) => Vec::new(),
        }
    }

    /// Number of top-level states.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Total number of parallel branches across all parallel states.
    pub fn branch_count(&self) -> usize {
        self.graph
            .node_weights()
            .map(|s| match &s.kind {
                StateKind::Parallel { branches } => branches.len(),
                _ => 0,
            })
            .sum()
    }

    /// Render as an Amazon States Language document.
    pub fn to_asl(&self) -> Value {
        let mut states = Map::new();
        for idx in self.graph.node_indices() {
            let state = &self.graph[idx];
            states.insert(
                state.name.clone(),
                state.to_asl(self.successor(&state.name)),
            );
        }

        let mut asl = Map::new();
        asl.insert("StartAt".to_string(), json!(self.start_at()));
        asl.insert("States".to_string(), Value::Object(states));
        if let Some(timeout) = self.timeout_seconds {
            asl.insert("TimeoutSeconds".to_string(), json!(timeout));
        }
        Value::Object(asl)
    }

    fn idx(&self, name: &str) -> InfraResult<NodeIndex> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| InfraError::UnknownState(name.to_string()))
    }
}

/// Builder for chaining states with a fluent API.
pub struct StateMachineBuilder {
    machine: StateMachine,
    last: Option<String>,
}

impl StateMachineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            machine: StateMachine::new(),
            last: None,
        }
    }

    /// Set the execution timeout.
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.machine.timeout_seconds = Some(seconds);
        self
    }

    /// Add a state that runs after the previously added one.
    pub fn then(mut self, state: State) -> InfraResult<Self> {
        let name = state.name.clone();
        self.machine.add_state(state)?;
        if let Some(prev) = &self.last {
            self.machine.next(prev, &name)?;
        }
        self.last = Some(name);
        Ok(self)
    }

    /// Bind a placeholder.
    pub fn substitute(mut self, var: impl Into<String>, value: Value) -> Self {
        self.machine.substitute(var, value);
        self
    }

    /// Finish building.
    pub fn build(self) -> StateMachine {
        self.machine
    }
}

impl Default for StateMachineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(name: &str) -> State {
        State::new(
            name,
            StateKind::BatchSubmitJob {
                job_definition_var: "JobDef".to_string(),
                job_queue_var: "JobQueue".to_string(),
                command: vec!["--M".to_string(), "1".to_string()],
            },
        )
    }

    fn aggregate() -> State {
        State::new(
            "Aggregate Result",
            StateKind::LambdaInvoke {
                function_var: "AggFn".to_string(),
                output_path: Some("$.Payload".to_string()),
            },
        )
    }

    fn parallel(names: &[&str]) -> State {
        State::new(
            "Parallel",
            StateKind::Parallel {
                branches: names.iter().map(|n| Branch::single(submit(n))).collect(),
            },
        )
    }

    #[test]
    fn test_chain_renders_next_and_end() {
        let machine = StateMachineBuilder::new()
            .timeout_seconds(7200)
            .then(parallel(&["a", "b"]))
            .unwrap()
            .then(aggregate())
            .unwrap()
            .then(State::new("Succeed", StateKind::Succeed))
            .unwrap()
            .build();

        assert_eq!(machine.len(), 3);
        assert_eq!(machine.branch_count(), 2);
        assert_eq!(machine.start_at(), Some("Parallel"));
        assert_eq!(machine.successor("Parallel"), Some("Aggregate Result"));

        let order: Vec<_> = machine.execution_order().into_iter().map(|s| s.name.as_str()).collect();
        assert_eq!(order, vec!["Parallel", "Aggregate Result", "Succeed"]);

        let asl = machine.to_asl();
        assert_eq!(asl["StartAt"], "Parallel");
        assert_eq!(asl["TimeoutSeconds"], 7200);
        assert_eq!(asl["States"]["Parallel"]["Next"], "Aggregate Result");
        assert_eq!(asl["States"]["Aggregate Result"]["Next"], "Succeed");
        assert_eq!(asl["States"]["Aggregate Result"]["OutputPath"], "$.Payload");
        assert_eq!(asl["States"]["Succeed"], json!({ "Type": "Succeed" }));

        let branch = &asl["States"]["Parallel"]["Branches"][1];
        assert_eq!(branch["StartAt"], "b");
        assert_eq!(branch["States"]["b"]["End"], true);
        assert_eq!(branch["States"]["b"]["Parameters"]["JobQueue"], "${JobQueue}");
        assert_eq!(branch["States"]["b"]["Resource"], BATCH_SUBMIT_JOB_SYNC);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut machine = StateMachine::new();
        machine.add_state(parallel(&["a", "b"])).unwrap();
        assert!(matches!(
            machine.add_state(submit("a")),
            Err(InfraError::DuplicateState(n)) if n == "a"
        ));

        let mut machine = StateMachine::new();
        assert!(matches!(
            machine.add_state(parallel(&["x", "x"])),
            Err(InfraError::DuplicateState(_))
        ));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut machine = StateMachine::new();
        machine.add_state(submit("a")).unwrap();
        machine.add_state(submit("b")).unwrap();
        machine.add_state(State::new("done", StateKind::Succeed)).unwrap();

        assert!(matches!(machine.next("a", "zzz"), Err(InfraError::UnknownState(_))));
        machine.next("a", "b").unwrap();
        assert!(matches!(machine.next("a", "done"), Err(InfraError::InvalidTransition(_))));
        assert!(matches!(machine.next("b", "a"), Err(InfraError::StateCycle)));
        assert!(matches!(machine.next("done", "a"), Err(InfraError::InvalidTransition(_))));
    }

    #[test]
    fn test_substitutions() {
        let machine = StateMachineBuilder::new()
            .substitute("JobQueue", json!({ "Ref": "BatchJobQueue" }))
            .build();
        assert_eq!(machine.substitutions()["JobQueue"], json!({ "Ref": "BatchJobQueue" }));
        assert!(machine.is_empty());
        assert_eq!(machine.to_asl()["StartAt"], Value::Null);
    }
}
