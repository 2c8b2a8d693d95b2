//! Deferred-substitution strings and intrinsic references.
//!
//! A provisioning document cannot always spell out a value at synthesis
//! time: the region or URL suffix of a registry endpoint, the ARN of a job
//! queue. Such values are carried as [`TemplateExpr`]s and rendered as the
//! provisioning engine's intrinsic functions.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Template key of the string-substitution intrinsic.
pub const FN_SUB: &str = "Fn::Sub";

/// Template key of the string-join intrinsic.
pub const FN_JOIN: &str = "Fn::Join";

/// A deferred-substitution string built from an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateExpr {
    /// Intrinsic name, e.g. `Fn::Sub`.
    pub key: String,

    /// Ordered arguments. For `Fn::Sub` the first argument is the pattern.
    pub args: Vec<String>,
}

impl TemplateExpr {
    /// Create an expression with an arbitrary key.
    pub fn new(key: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            key: key.into(),
            args,
        }
    }

    /// Create an `Fn::Sub` expression over a single pattern.
    pub fn sub(pattern: impl Into<String>) -> Self {
        Self::new(FN_SUB, vec![pattern.into()])
    }

    /// Check whether this is a string-substitution expression.
    pub fn is_sub(&self) -> bool {
        self.key == FN_SUB
    }

    /// The first argument, if any.
    pub fn first_arg(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Render as an intrinsic function object.
    ///
    /// A single argument renders as a bare string (`{"Fn::Sub": "..."}`),
    /// several as a list.
    pub fn to_json(&self) -> Value {
        let body = match self.args.as_slice() {
            [single] => Value::String(single.clone()),
            many => Value::Array(many.iter().cloned().map(Value::String).collect()),
        };
        let mut obj = serde_json::Map::new();
        obj.insert(self.key.clone(), body);
        Value::Object(obj)
    }
}

/// A container image reference on a job definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    /// Fully spelled-out image URI (same-account, public, or pinned).
    Literal(String),

    /// Image URI resolved at deployment time.
    Template(TemplateExpr),
}

impl ImageRef {
    /// A literal image URI.
    pub fn literal(uri: impl Into<String>) -> Self {
        ImageRef::Literal(uri.into())
    }

    /// The image URI of a published container asset.
    ///
    /// The registry account is fixed while region and URL suffix are left
    /// to the provisioning engine.
    pub fn container_asset(account: &str, repository: &str, tag: &str) -> Self {
        ImageRef::Template(TemplateExpr::sub(format!(
            "{account}.dkr.ecr.${{AWS::Region}}.${{AWS::URLSuffix}}/{repository}:{tag}"
        )))
    }

    /// The template expression, if the image is deferred.
    pub fn as_template(&self) -> Option<&TemplateExpr> {
        match self {
            ImageRef::Template(expr) => Some(expr),
            ImageRef::Literal(_) => None,
        }
    }

    /// Render as a provisioning document value.
    pub fn to_json(&self) -> Value {
        match self {
            ImageRef::Literal(uri) => Value::String(uri.clone()),
            ImageRef::Template(expr) => expr.to_json(),
        }
    }
}

impl From<&str> for ImageRef {
    fn from(uri: &str) -> Self {
        ImageRef::literal(uri)
    }
}

/// `{"Ref": logical_id}`.
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [logical_id, attribute]}`.
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_renders_single_arg_as_string() {
        let expr = TemplateExpr::sub("${AWS::AccountId}.dkr.ecr");
        assert!(expr.is_sub());
        assert_eq!(expr.to_json(), json!({ "Fn::Sub": "${AWS::AccountId}.dkr.ecr" }));
    }

    #[test]
    fn test_join_renders_args_as_list() {
        let expr = TemplateExpr::new(FN_JOIN, vec!["".into(), "a".into()]);
        assert!(!expr.is_sub());
        assert_eq!(expr.to_json(), json!({ "Fn::Join": ["", "a"] }));
    }

    #[test]
    fn test_container_asset_image() {
        let image = ImageRef::container_asset("123456789012", "unfold-assets", "abc123");
        let expr = image.as_template().unwrap();
        assert_eq!(
            expr.first_arg(),
            Some("123456789012.dkr.ecr.${AWS::Region}.${AWS::URLSuffix}/unfold-assets:abc123")
        );
    }

    #[test]
    fn test_image_ref_deserializes_untagged() {
        let literal: ImageRef = serde_json::from_value(json!("python:3.11")).unwrap();
        assert_eq!(literal, ImageRef::literal("python:3.11"));

        let templated: ImageRef =
            serde_json::from_value(json!({ "key": "Fn::Sub", "args": ["x/y"] })).unwrap();
        assert_eq!(templated, ImageRef::Template(TemplateExpr::sub("x/y")));
    }

    #[test]
    fn test_intrinsics() {
        assert_eq!(reference("JobQueue"), json!({ "Ref": "JobQueue" }));
        assert_eq!(
            get_att("AggResultLambda", "Arn"),
            json!({ "Fn::GetAtt": ["AggResultLambda", "Arn"] })
        );
    }
}
