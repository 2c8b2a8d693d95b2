//! Private registry endpoint parsing.
//!
//! Recognizes image URIs of the form
//! `{account}.dkr.ecr.{region}.{domain}/{repository}[:tag|@digest]`, where
//! region and domain may still be deployment-time placeholders.

use std::sync::LazyLock;

use regex::Regex;

static ECR_IMAGE_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<account>\d{12})\.dkr\.ecr\.(?P<region>[^/]+?)\.(?:amazonaws\.com(?:\.cn)?|\$\{AWS::URLSuffix\})/(?P<repository>[^:@]+)(?:[:@].*)?$",
    )
    .expect("static registry pattern is valid")
});

/// Placeholder the provisioning engine substitutes with the stack region.
pub const REGION_PLACEHOLDER: &str = "${AWS::Region}";

/// A repository in a private registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EcrRepository {
    /// Account owning the registry.
    pub account: String,

    /// Region of the registry; `None` while it is still a placeholder.
    pub region: Option<String>,

    /// Repository name, without tag or digest.
    pub name: String,
}

impl EcrRepository {
    /// Parse a registry image URI.
    ///
    /// Returns `None` for anything that is not a private registry endpoint,
    /// e.g. public gallery images or Docker Hub references.
    pub fn parse(uri: &str) -> Option<Self> {
        let caps = ECR_IMAGE_URI.captures(uri)?;
        let region = match &caps["region"] {
            REGION_PLACEHOLDER => None,
            other if other.contains('$') => return None,
            other => Some(other.to_string()),
        };
        Some(Self {
            account: caps["account"].to_string(),
            region,
            name: caps["repository"].to_string(),
        })
    }

    /// ARN of this repository.
    ///
    /// An unresolved region widens to `*`; `account` overrides the parsed
    /// account when the image was published through a dedicated asset
    /// account.
    pub fn arn(&self, partition: &str, account: Option<&str>) -> String {
        format!(
            "arn:{partition}:ecr:{}:{}:repository/{}",
            self.region.as_deref().unwrap_or("*"),
            account.unwrap_or(&self.account),
            self.name
        )
    }
}
