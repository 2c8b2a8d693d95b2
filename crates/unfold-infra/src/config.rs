//! Deployment configuration.
//!
//! Supports loading configuration from:
//! 1. Configuration files (YAML)
//! 2. Environment variables (with UNFOLD_ prefix)
//! 3. .env files
//!
//! Configuration precedence (highest to lowest):
//! 1. Environment variables
//! 2. Configuration file
//! 3. Default values

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::devices;
use crate::error::{InfraError, InfraResult};
use crate::resolver::ResolverConfig;
use crate::template::ImageRef;

/// Complete deployment configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Target account, region and result bucket
    #[serde(default)]
    pub stack: StackConfig,

    /// Compute environment, job definitions and parameter sweep
    #[serde(default)]
    pub batch: BatchConfig,

    /// Workflow state machine settings
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Result aggregation function
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Cross-account image policy resolution
    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// Stack identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Stack (root construct) name
    #[serde(default = "default_stack_name")]
    pub name: String,

    /// Template description
    #[serde(default)]
    pub description: Option<String>,

    /// 12-digit account id the stack deploys into
    #[serde(default = "default_account")]
    pub account: String,

    /// Region the stack deploys into
    #[serde(default = "default_region")]
    pub region: String,

    /// Bucket receiving job results
    #[serde(default = "default_bucket_name")]
    pub bucket_name: String,
}

/// A job definition resource shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceShape {
    pub vcpus: u32,
    pub memory_gib: u32,
}

impl InstanceShape {
    pub fn new(vcpus: u32, memory_gib: u32) -> Self {
        Self { vcpus, memory_gib }
    }

    /// Name used in job definition ids and task names.
    pub fn label(&self) -> String {
        format!("vCpus{}_Mem_{}G", self.vcpus, self.memory_gib)
    }

    /// Memory in MiB, as job definitions declare it.
    pub fn memory_mib(&self) -> InfraResult<u32> {
        self.memory_gib.checked_mul(1024).ok_or_else(|| {
            InfraError::Config(format!(
                "instance shape {} has more memory than a job definition can declare",
                self.label()
            ))
        })
    }
}

fn hours_to_seconds(hours: u64, what: &str) -> InfraResult<u64> {
    hours
        .checked_mul(3600)
        .ok_or_else(|| InfraError::Config(format!("{what} of {hours} hours is out of range")))
}

/// Where job containers get their image from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    /// A container asset published to a private registry. The registry
    /// account defaults to the resolver's image asset account, then the
    /// stack account; when both are set they must agree.
    Asset {
        repository: String,
        #[serde(default = "default_tag")]
        tag: String,
        #[serde(default)]
        account: Option<String>,
    },

    /// A fully spelled-out image URI.
    Uri { uri: String },
}

impl Default for ImageSource {
    fn default() -> Self {
        ImageSource::Asset {
            repository: default_asset_repository(),
            tag: default_tag(),
            account: None,
        }
    }
}

/// Batch compute and parameter sweep settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// EC2 instance types the compute environment may launch
    #[serde(default = "default_instance_types")]
    pub instance_types: Vec<String>,

    /// One job definition per shape
    #[serde(default = "default_shapes")]
    pub shapes: Vec<InstanceShape>,

    /// Device ARNs swept by the workflow
    #[serde(default = "devices::default_devices")]
    pub devices: Vec<String>,

    /// Device baked into the job definitions' default command
    #[serde(default = "default_device")]
    pub default_device: String,

    /// Values of the M (rotatable bonds) parameter
    #[serde(default = "default_m_values")]
    pub m_values: Vec<u32>,

    /// Values of the D (angle precision) parameter
    #[serde(default = "default_d_values")]
    pub d_values: Vec<u32>,

    /// Attempt timeout per job in hours
    #[serde(default = "default_job_timeout_hours")]
    pub job_timeout_hours: u64,

    /// Retry attempts per job
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Container image
    #[serde(default)]
    pub image: ImageSource,
}

impl BatchConfig {
    /// Attempt timeout per job in seconds.
    pub fn job_timeout_seconds(&self) -> InfraResult<u64> {
        hours_to_seconds(self.job_timeout_hours, "job timeout")
    }
}

/// Workflow settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// State machine timeout in hours
    #[serde(default = "default_workflow_timeout_hours")]
    pub timeout_hours: u64,
}

impl WorkflowConfig {
    /// State machine timeout in seconds.
    pub fn timeout_seconds(&self) -> InfraResult<u64> {
        hours_to_seconds(self.timeout_hours, "workflow timeout")
    }
}

/// Aggregation function declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_runtime")]
    pub runtime: String,

    #[serde(default = "default_handler")]
    pub handler: String,

    #[serde(default = "default_lambda_memory")]
    pub memory_mib: u32,

    #[serde(default = "default_lambda_timeout")]
    pub timeout_seconds: u64,

    /// Key of the function code bundle in the result bucket
    #[serde(default = "default_code_path")]
    pub code_path: String,
}

// Default value functions
fn default_stack_name() -> String {
    "QCUnfoldStack".to_string()
}

fn default_account() -> String {
    "123456789012".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_bucket_name() -> String {
    "amazon-braket-unfold".to_string()
}

fn default_asset_repository() -> String {
    "unfold-sa-optimizer".to_string()
}

fn default_tag() -> String {
    "latest".to_string()
}

fn default_instance_types() -> Vec<String> {
    ["c5.large", "c5.xlarge", "c5.2xlarge", "c5.4xlarge"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_shapes() -> Vec<InstanceShape> {
    vec![
        InstanceShape::new(2, 2),
        InstanceShape::new(4, 4),
        InstanceShape::new(8, 8),
        InstanceShape::new(16, 16),
    ]
}

fn default_device() -> String {
    devices::DWAVE_ADVANTAGE_1.to_string()
}

fn default_m_values() -> Vec<u32> {
    vec![1, 2, 3, 4, 5]
}

fn default_d_values() -> Vec<u32> {
    vec![4]
}

fn default_job_timeout_hours() -> u64 {
    2
}

fn default_retry_attempts() -> u32 {
    1
}

fn default_workflow_timeout_hours() -> u64 {
    2
}

fn default_runtime() -> String {
    "nodejs18.x".to_string()
}

fn default_handler() -> String {
    "index.handler".to_string()
}

fn default_lambda_memory() -> u32 {
    512
}

fn default_lambda_timeout() -> u64 {
    120
}

fn default_code_path() -> String {
    "lambda/AthenaTableLambda.zip".to_string()
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            name: default_stack_name(),
            description: None,
            account: default_account(),
            region: default_region(),
            bucket_name: default_bucket_name(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            instance_types: default_instance_types(),
            shapes: default_shapes(),
            devices: devices::default_devices(),
            default_device: default_device(),
            m_values: default_m_values(),
            d_values: default_d_values(),
            job_timeout_hours: default_job_timeout_hours(),
            retry_attempts: default_retry_attempts(),
            image: ImageSource::default(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            timeout_hours: default_workflow_timeout_hours(),
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            handler: default_handler(),
            memory_mib: default_lambda_memory(),
            timeout_seconds: default_lambda_timeout(),
            code_path: default_code_path(),
        }
    }
}

fn is_account_id(s: &str) -> bool {
    s.len() == 12 && s.bytes().all(|b| b.is_ascii_digit())
}

impl DeployConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> InfraResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(contents: &str) -> InfraResult<Self> {
        Ok(serde_yaml_ng::from_str(contents)?)
    }

    /// Load configuration with the following precedence:
    /// 1. Load .env file if it exists
    /// 2. Load from file if provided
    /// 3. Apply environment variable overrides
    pub fn load(config_file: Option<&Path>) -> InfraResult<Self> {
        dotenvy::dotenv().ok();

        let config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let config = config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `UNFOLD_*` overrides read through `lookup`.
    ///
    /// Only keys `lookup` returns a value for override the current values.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("UNFOLD_STACK_NAME") {
            self.stack.name = v;
        }
        if let Some(v) = lookup("UNFOLD_ACCOUNT") {
            self.stack.account = v;
        }
        if let Some(v) = lookup("UNFOLD_REGION") {
            self.stack.region = v;
        }
        if let Some(v) = lookup("UNFOLD_BUCKET") {
            self.stack.bucket_name = v;
        }
        if let Some(v) = lookup("UNFOLD_IMAGE_URI") {
            self.batch.image = ImageSource::Uri { uri: v };
        }
        if let Some(v) = lookup("UNFOLD_IMAGE_ASSET_ACCOUNT") {
            self.resolver.image_asset_account = Some(v);
        }
        if let Some(v) = lookup("UNFOLD_ROLE_SUFFIX") {
            self.resolver.execution_role_suffix = v;
        }
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> InfraResult<()> {
        if self.stack.name.is_empty() || self.stack.name.contains('/') {
            return Err(InfraError::Config(format!(
                "invalid stack name '{}'",
                self.stack.name
            )));
        }
        if !is_account_id(&self.stack.account) {
            return Err(InfraError::Config(format!(
                "stack account must be a 12-digit id, got '{}'",
                self.stack.account
            )));
        }
        if let Some(account) = &self.resolver.image_asset_account {
            if !is_account_id(account) {
                return Err(InfraError::Config(format!(
                    "image asset account must be a 12-digit id, got '{account}'"
                )));
            }
        }
        if let ImageSource::Asset {
            account: Some(account),
            ..
        } = &self.batch.image
        {
            if !is_account_id(account) {
                return Err(InfraError::Config(format!(
                    "image account must be a 12-digit id, got '{account}'"
                )));
            }
        }
        if let (
            ImageSource::Asset {
                account: Some(image_account),
                ..
            },
            Some(asset_account),
        ) = (&self.batch.image, &self.resolver.image_asset_account)
        {
            if image_account != asset_account {
                return Err(InfraError::Config(format!(
                    "image account '{image_account}' conflicts with resolver image asset account '{asset_account}'"
                )));
            }
        }
        if self.stack.region.is_empty() {
            return Err(InfraError::Config("region must not be empty".to_string()));
        }
        if self.stack.bucket_name.is_empty() {
            return Err(InfraError::Config("bucket name must not be empty".to_string()));
        }
        if self.batch.shapes.is_empty() {
            return Err(InfraError::Config(
                "at least one instance shape is required".to_string(),
            ));
        }
        if let Some(shape) = self
            .batch
            .shapes
            .iter()
            .find(|s| s.vcpus == 0 || s.memory_gib == 0)
        {
            return Err(InfraError::Config(format!(
                "instance shape {} must have positive vCPUs and memory",
                shape.label()
            )));
        }
        for shape in &self.batch.shapes {
            shape.memory_mib()?;
        }
        self.batch.job_timeout_seconds()?;
        self.workflow.timeout_seconds()?;
        if self.batch.instance_types.is_empty() {
            return Err(InfraError::Config(
                "at least one instance type is required".to_string(),
            ));
        }
        if self.batch.devices.is_empty() {
            return Err(InfraError::Config("at least one device is required".to_string()));
        }
        if let Some(device) = self
            .batch
            .devices
            .iter()
            .chain(std::iter::once(&self.batch.default_device))
            .find(|d| !devices::is_device_arn(d))
        {
            return Err(InfraError::Config(format!(
                "'{device}' is not a device ARN"
            )));
        }
        if self.batch.m_values.is_empty() || self.batch.d_values.is_empty() {
            return Err(InfraError::Config(
                "M and D parameter lists must not be empty".to_string(),
            ));
        }
        if !self.resolver.execution_role_suffix.starts_with('/') {
            return Err(InfraError::Config(format!(
                "execution role suffix must start with '/', got '{}'",
                self.resolver.execution_role_suffix
            )));
        }
        Ok(())
    }

    /// Account publishing container assets.
    pub fn image_asset_account(&self) -> &str {
        if let ImageSource::Asset {
            account: Some(account),
            ..
        } = &self.batch.image
        {
            return account;
        }
        self.resolver
            .image_asset_account
            .as_deref()
            .unwrap_or(&self.stack.account)
    }

    /// Container image reference for the job definitions.
    pub fn image(&self) -> ImageRef {
        match &self.batch.image {
            ImageSource::Asset {
                repository, tag, ..
            } => ImageRef::container_asset(self.image_asset_account(), repository, tag),
            ImageSource::Uri { uri } => ImageRef::literal(uri.clone()),
        }
    }

    /// Number of parallel workflow branches this configuration produces.
    pub fn branch_count(&self) -> usize {
        self.batch.m_values.len()
            * self.batch.d_values.len()
            * self.batch.devices.len()
            * self.batch.shapes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = DeployConfig::default();
        config.validate().unwrap();
        assert_eq!(config.branch_count(), 60);
        assert_eq!(config.batch.shapes[0].label(), "vCpus2_Mem_2G");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = DeployConfig::from_yaml(
            r#"
stack:
  account: "210987654321"
  bucket_name: results-bucket
batch:
  m_values: [1, 2]
  image:
    kind: uri
    uri: python:3.11
"#,
        )
        .unwrap();
        assert_eq!(config.stack.account, "210987654321");
        assert_eq!(config.stack.region, "us-east-1");
        assert_eq!(config.batch.m_values, vec![1, 2]);
        assert_eq!(config.batch.shapes.len(), 4);
        assert_eq!(config.image(), ImageRef::literal("python:3.11"));
        assert_eq!(config.resolver, ResolverConfig::default());
    }

    #[test]
    fn test_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("UNFOLD_REGION", "eu-west-1"),
            ("UNFOLD_IMAGE_ASSET_ACCOUNT", "366590864501"),
            ("UNFOLD_ROLE_SUFFIX", "/executionRole"),
        ]
        .into_iter()
        .collect();

        let config = DeployConfig::default()
            .apply_overrides(|k| env.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.stack.region, "eu-west-1");
        assert_eq!(config.stack.bucket_name, "amazon-braket-unfold");
        assert_eq!(config.resolver.execution_role_suffix, "/executionRole");
        assert_eq!(config.image_asset_account(), "366590864501");
        let image = config.image();
        assert!(
            image
                .as_template()
                .and_then(|t| t.first_arg())
                .unwrap()
                .starts_with("366590864501.dkr.ecr.")
        );
    }

    #[test]
    fn test_validation_errors() {
        let mut config = DeployConfig::default();
        config.stack.account = "1234".to_string();
        assert!(matches!(config.validate(), Err(InfraError::Config(_))));

        let mut config = DeployConfig::default();
        config.batch.shapes.clear();
        assert!(config.validate().is_err());

        let mut config = DeployConfig::default();
        config.batch.shapes.push(InstanceShape::new(0, 4));
        assert!(config.validate().is_err());

        let mut config = DeployConfig::default();
        config.resolver.execution_role_suffix = "batchExecutionRole".to_string();
        assert!(config.validate().is_err());

        let mut config = DeployConfig::default();
        config.resolver.image_asset_account = Some("abc".to_string());
        assert!(config.validate().is_err());

        let mut config = DeployConfig::default();
        config.stack.name = "a/b".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_asset_account_precedence() {
        let mut config = DeployConfig::default();
        assert_eq!(config.image_asset_account(), "123456789012");

        config.resolver.image_asset_account = Some("111111111111".to_string());
        assert_eq!(config.image_asset_account(), "111111111111");

        config.batch.image = ImageSource::Asset {
            repository: "r".to_string(),
            tag: "t".to_string(),
            account: Some("222222222222".to_string()),
        };
        assert_eq!(config.image_asset_account(), "222222222222");
        assert!(matches!(config.validate(), Err(InfraError::Config(_))));

        config.resolver.image_asset_account = Some("222222222222".to_string());
        config.validate().unwrap();

        config.resolver.image_asset_account = None;
        config.validate().unwrap();
        assert_eq!(config.image_asset_account(), "222222222222");
    }

    #[test]
    fn test_out_of_range_sizes_are_rejected() {
        let mut config = DeployConfig::default();
        config.batch.shapes.push(InstanceShape::new(2, 5_000_000));
        assert!(matches!(config.validate(), Err(InfraError::Config(_))));
        assert_eq!(InstanceShape::new(2, 4).memory_mib().unwrap(), 4096);

        let mut config = DeployConfig::default();
        config.batch.job_timeout_hours = u64::MAX;
        assert!(matches!(config.validate(), Err(InfraError::Config(_))));

        let mut config = DeployConfig::default();
        config.workflow.timeout_hours = u64::MAX / 1000;
        assert!(matches!(config.validate(), Err(InfraError::Config(_))));
        assert_eq!(DeployConfig::default().workflow.timeout_seconds().unwrap(), 7200);
    }

    #[test]
    fn test_devices_must_be_arns() {
        let mut config = DeployConfig::default();
        config.batch.devices.push("Advantage_system1".to_string());
        assert!(matches!(config.validate(), Err(InfraError::Config(_))));

        let mut config = DeployConfig::default();
        config.batch.default_device = "DW_2000Q_6".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unfold.yaml");
        std::fs::write(&path, "stack:\n  name: TestStack\n").unwrap();
        let config = DeployConfig::from_file(&path).unwrap();
        assert_eq!(config.stack.name, "TestStack");

        let missing = DeployConfig::from_file(dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(InfraError::Io(_))));
    }
}
