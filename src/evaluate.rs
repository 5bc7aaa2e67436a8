use crate::aws::{
    AwsError, CloudFormationApi, Environment, ListStackResourcesInput, StackResourceSummary,
};
use crate::template::Template;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::OnceCell;

#[derive(thiserror::Error, Debug)]
pub(crate) enum EvaluationError {
    #[error("unresolved reference {0}")]
    UnresolvedReference(String),
    #[error("resource {0} has no physical id in the deployed stack")]
    NoPhysicalId(String),
    #[error("unsupported intrinsic function {0}")]
    UnsupportedIntrinsic(String),
    #[error("unsupported attribute {attribute} of {resource_type}")]
    UnsupportedAttribute {
        resource_type: String,
        attribute: String,
    },
    #[error("malformed {function}: {reason}")]
    Malformed {
        function: &'static str,
        reason: String,
    },
    #[error("the account id is not known")]
    UnknownAccount,
    #[error("listing stack resources: {0}")]
    Lookup(#[from] AwsError),
}

type Result<T> = std::result::Result<T, EvaluationError>;

fn malformed(function: &'static str, reason: impl Into<String>) -> EvaluationError {
    EvaluationError::Malformed {
        function,
        reason: reason.into(),
    }
}

/// Resolves intrinsic functions in a template against a deployed stack.
pub(crate) struct EvaluateCloudFormationTemplate<'a> {
    template: &'a Template,
    parameters: &'a HashMap<String, String>,
    environment: Environment,
    stack_name: &'a str,
    stack_id: &'a str,
    cloudformation: &'a dyn CloudFormationApi,
    stack_resources: OnceCell<HashMap<String, StackResourceSummary>>,
}

impl<'a> EvaluateCloudFormationTemplate<'a> {
    pub(crate) fn new(
        template: &'a Template,
        parameters: &'a HashMap<String, String>,
        environment: Environment,
        stack_name: &'a str,
        stack_id: &'a str,
        cloudformation: &'a dyn CloudFormationApi,
    ) -> Self {
        Self {
            template,
            parameters,
            environment,
            stack_name,
            stack_id,
            cloudformation,
            stack_resources: OnceCell::new(),
        }
    }

    pub(crate) fn environment(&self) -> &Environment {
        &self.environment
    }

    pub(crate) fn account(&self) -> Result<&str> {
        self.environment
            .account
            .as_deref()
            .ok_or(EvaluationError::UnknownAccount)
    }

    pub(crate) fn evaluate<'s>(&'s self, value: &'s Value) -> BoxFuture<'s, Result<Value>> {
        async move {
            match value {
                Value::Array(items) => {
                    let mut evaluated = Vec::with_capacity(items.len());
                    for item in items {
                        evaluated.push(self.evaluate(item).await?);
                    }
                    Ok(Value::Array(evaluated))
                }
                Value::Object(map) => {
                    if let Some((name, args)) = intrinsic(map) {
                        return self.evaluate_intrinsic(name, args).await;
                    }
                    let mut evaluated = Map::new();
                    for (key, value) in map {
                        evaluated.insert(key.clone(), self.evaluate(value).await?);
                    }
                    Ok(Value::Object(evaluated))
                }
                other => Ok(other.clone()),
            }
        }
        .boxed()
    }

    pub(crate) async fn evaluate_string(&self, value: &Value) -> Result<String> {
        let evaluated = self.evaluate(value).await?;
        as_text("value", &evaluated)
    }

    pub(crate) async fn find_physical_name_for(
        &self,
        logical_id: &str,
    ) -> std::result::Result<Option<String>, AwsError> {
        let resources = self.stack_resources().await?;
        Ok(resources
            .get(logical_id)
            .and_then(|r| r.physical_resource_id.clone()))
    }

    async fn stack_resources(
        &self,
    ) -> std::result::Result<&HashMap<String, StackResourceSummary>, AwsError> {
        self.stack_resources
            .get_or_try_init(|| async {
                let mut resources = HashMap::new();
                let mut next_token: Option<String> = None;
                loop {
                    tracing::debug!(next_token = ?next_token, "listing stack resources");
                    let output = self
                        .cloudformation
                        .list_stack_resources(ListStackResourcesInput {
                            stack_name: self.stack_name.to_string(),
                            next_token: next_token.take(),
                        })
                        .await?;
                    for summary in output.stack_resource_summaries {
                        tracing::trace!(
                            logical_id = %summary.logical_resource_id,
                            status = %summary.resource_status,
                            last_updated = %summary.last_updated_timestamp,
                            "stack resource"
                        );
                        resources.insert(summary.logical_resource_id.clone(), summary);
                    }
                    match output.next_token {
                        Some(token) => next_token = Some(token),
                        None => break,
                    }
                }
                tracing::debug!(nresources = resources.len(), "got stack resources");
                Ok::<_, AwsError>(resources)
            })
            .await
    }

    async fn evaluate_intrinsic(&self, name: &str, args: &Value) -> Result<Value> {
        match name {
            "Ref" => {
                let target = args
                    .as_str()
                    .ok_or_else(|| malformed("Ref", "expected a string"))?;
                Ok(Value::String(self.resolve_ref(target).await?))
            }
            "Fn::GetAtt" => {
                let (logical_id, attribute) = match args {
                    Value::String(s) => s
                        .split_once('.')
                        .ok_or_else(|| malformed("Fn::GetAtt", "expected Logical.Attribute"))?,
                    Value::Array(parts) => match parts.as_slice() {
                        [Value::String(logical_id), Value::String(attribute)] => {
                            (logical_id.as_str(), attribute.as_str())
                        }
                        _ => return Err(malformed("Fn::GetAtt", "expected two strings")),
                    },
                    _ => return Err(malformed("Fn::GetAtt", "expected a list")),
                };
                Ok(Value::String(self.get_att(logical_id, attribute).await?))
            }
            "Fn::Join" => {
                let (delimiter, values) = match args {
                    Value::Array(parts) => match parts.as_slice() {
                        [Value::String(delimiter), values] => (delimiter, values),
                        _ => return Err(malformed("Fn::Join", "expected [delimiter, list]")),
                    },
                    _ => return Err(malformed("Fn::Join", "expected a list")),
                };
                let values = match self.evaluate(values).await? {
                    Value::Array(values) => values,
                    _ => return Err(malformed("Fn::Join", "second argument must be a list")),
                };
                let parts = values
                    .iter()
                    .map(|v| as_text("Fn::Join", v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::String(parts.join(delimiter.as_str())))
            }
            "Fn::Select" => {
                let (index, values) = match args {
                    Value::Array(parts) if parts.len() == 2 => (&parts[0], &parts[1]),
                    _ => return Err(malformed("Fn::Select", "expected [index, list]")),
                };
                let index: usize = as_text("Fn::Select", &self.evaluate(index).await?)?
                    .parse()
                    .map_err(|_| malformed("Fn::Select", "index must be a number"))?;
                match self.evaluate(values).await? {
                    Value::Array(mut values) if index < values.len() => {
                        Ok(values.swap_remove(index))
                    }
                    Value::Array(_) => Err(malformed("Fn::Select", "index out of range")),
                    _ => Err(malformed("Fn::Select", "second argument must be a list")),
                }
            }
            "Fn::Split" => {
                let (delimiter, source) = match args {
                    Value::Array(parts) => match parts.as_slice() {
                        [Value::String(delimiter), source] => (delimiter, source),
                        _ => return Err(malformed("Fn::Split", "expected [delimiter, string]")),
                    },
                    _ => return Err(malformed("Fn::Split", "expected a list")),
                };
                let source = as_text("Fn::Split", &self.evaluate(source).await?)?;
                Ok(Value::Array(
                    source
                        .split(delimiter.as_str())
                        .map(|s| Value::String(s.to_string()))
                        .collect(),
                ))
            }
            "Fn::Sub" => {
                let (body, variables) = match args {
                    Value::String(body) => (body, None),
                    Value::Array(parts) => match parts.as_slice() {
                        [Value::String(body), Value::Object(variables)] => (body, Some(variables)),
                        _ => return Err(malformed("Fn::Sub", "expected [string, variables]")),
                    },
                    _ => return Err(malformed("Fn::Sub", "expected a string or a list")),
                };
                let mut resolved = HashMap::new();
                for (key, value) in variables.into_iter().flatten() {
                    let value = as_text("Fn::Sub", &self.evaluate(value).await?)?;
                    resolved.insert(key.as_str(), value);
                }
                Ok(Value::String(self.substitute(body, &resolved).await?))
            }
            other => Err(EvaluationError::UnsupportedIntrinsic(other.to_string())),
        }
    }

    async fn resolve_ref(&self, name: &str) -> Result<String> {
        if let Some(value) = self.parameters.get(name) {
            return Ok(value.clone());
        }

        match name {
            "AWS::AccountId" => return self.account().map(str::to_owned),
            "AWS::Region" => return Ok(self.environment.region.clone()),
            "AWS::Partition" => return Ok(self.environment.partition.clone()),
            "AWS::URLSuffix" => return Ok(self.environment.url_suffix().to_string()),
            "AWS::StackName" => return Ok(self.stack_name.to_string()),
            "AWS::StackId" => return Ok(self.stack_id.to_string()),
            _ => {}
        }

        if let Some(value) = self.template.parameter_default(name) {
            return Ok(value);
        }

        let resources = self.stack_resources().await?;
        match resources.get(name) {
            Some(summary) => summary
                .physical_resource_id
                .clone()
                .ok_or_else(|| EvaluationError::NoPhysicalId(name.to_string())),
            None => Err(EvaluationError::UnresolvedReference(name.to_string())),
        }
    }

    async fn get_att(&self, logical_id: &str, attribute: &str) -> Result<String> {
        let resources = self.stack_resources().await?;
        let summary = resources
            .get(logical_id)
            .ok_or_else(|| EvaluationError::NoPhysicalId(logical_id.to_string()))?;
        let physical_id = summary
            .physical_resource_id
            .as_deref()
            .ok_or_else(|| EvaluationError::NoPhysicalId(logical_id.to_string()))?;
        let Environment {
            partition, region, ..
        } = &self.environment;

        let value = match (summary.resource_type.as_str(), attribute) {
            ("AWS::Lambda::Function", "Arn") => format!(
                "arn:{}:lambda:{}:{}:function:{}",
                partition,
                region,
                self.account()?,
                physical_id
            ),
            ("AWS::StepFunctions::StateMachine", "Arn") | ("AWS::SNS::Topic", "TopicArn") => {
                physical_id.to_string()
            }
            ("AWS::StepFunctions::StateMachine", "Name") => last_segment(physical_id, ':'),
            ("AWS::IAM::Role", "Arn") => {
                format!("arn:{}:iam::{}:role/{}", partition, self.account()?, physical_id)
            }
            ("AWS::S3::Bucket", "Arn") => format!("arn:{}:s3:::{}", partition, physical_id),
            ("AWS::DynamoDB::Table", "Arn") => format!(
                "arn:{}:dynamodb:{}:{}:table/{}",
                partition,
                region,
                self.account()?,
                physical_id
            ),
            // the physical id of a queue is its URL
            ("AWS::SQS::Queue", "Arn") => format!(
                "arn:{}:sqs:{}:{}:{}",
                partition,
                region,
                self.account()?,
                last_segment(physical_id, '/')
            ),
            ("AWS::SQS::Queue", "QueueName") => last_segment(physical_id, '/'),
            (resource_type, attribute) => {
                return Err(EvaluationError::UnsupportedAttribute {
                    resource_type: resource_type.to_string(),
                    attribute: attribute.to_string(),
                })
            }
        };
        Ok(value)
    }

    async fn substitute(&self, body: &str, variables: &HashMap<&str, String>) -> Result<String> {
        let mut out = String::with_capacity(body.len());
        let mut rest = body;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| malformed("Fn::Sub", "unterminated ${"))?;
            let name = &after[..end];

            if let Some(literal) = name.strip_prefix('!') {
                out.push_str("${");
                out.push_str(literal);
                out.push('}');
            } else if let Some(value) = variables.get(name) {
                out.push_str(value);
            } else if let Some((logical_id, attribute)) = name.split_once('.') {
                out.push_str(&self.get_att(logical_id, attribute).await?);
            } else {
                out.push_str(&self.resolve_ref(name).await?);
            }

            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// The `(name, arguments)` pair when `map` is a single intrinsic function call.
fn intrinsic(map: &Map<String, Value>) -> Option<(&str, &Value)> {
    if map.len() != 1 {
        return None;
    }
    let (name, args) = map.iter().next()?;
    if name == "Ref" || name.starts_with("Fn::") {
        Some((name.as_str(), args))
    } else {
        None
    }
}

fn as_text(function: &'static str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(malformed(function, format!("expected a string, got {}", other))),
    }
}

fn last_segment(id: &str, separator: char) -> String {
    id.rsplit(separator).next().unwrap_or(id).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::{ListStackResourcesOutput, MockCloudFormationApi};
    use crate::hotswap::test_setup::{list_stack_resources_of, stack_summary_of, STACK_NAME};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct Fixture {
        template: Template,
        parameters: HashMap<String, String>,
        cloudformation: MockCloudFormationApi,
    }

    impl Fixture {
        fn new(template: Value) -> Self {
            Self {
                template: Template::from_value(template).unwrap(),
                parameters: HashMap::new(),
                cloudformation: MockCloudFormationApi::new(),
            }
        }

        /// The deployed stack holds `summaries`, and they are listed exactly once.
        fn deployed(&mut self, summaries: Vec<StackResourceSummary>) {
            self.cloudformation
                .expect_list_stack_resources()
                .times(1)
                .returning(list_stack_resources_of(Arc::new(Mutex::new(summaries))));
        }

        fn evaluator(&self) -> EvaluateCloudFormationTemplate<'_> {
            EvaluateCloudFormationTemplate::new(
                &self.template,
                &self.parameters,
                Environment::new("bermuda-triangle-1337", Some("123456789012".to_string())),
                STACK_NAME,
                "stackId",
                &self.cloudformation,
            )
        }
    }

    #[tokio::test]
    async fn resolves_parameters_pseudo_parameters_and_defaults() {
        let mut fixture = Fixture::new(json!({
            "Parameters": { "Stage": { "Type": "String", "Default": "prod" } }
        }));
        fixture
            .parameters
            .insert("AssetKey".to_string(), "asset.zip".to_string());
        let evaluator = fixture.evaluator();

        let value = evaluator
            .evaluate(&json!({
                "Fn::Join": ["/", [
                    { "Ref": "AssetKey" },
                    { "Ref": "Stage" },
                    { "Ref": "AWS::Region" },
                    { "Ref": "AWS::AccountId" },
                    { "Ref": "AWS::Partition" },
                    { "Ref": "AWS::URLSuffix" },
                    { "Ref": "AWS::StackName" }
                ]]
            }))
            .await
            .unwrap();

        assert_eq!(
            value,
            json!("asset.zip/prod/bermuda-triangle-1337/123456789012/aws/amazonaws.com/withouterrors")
        );
    }

    #[tokio::test]
    async fn refs_prefer_parameters_then_pseudo_parameters_then_defaults() {
        let mut fixture = Fixture::new(json!({
            "Parameters": {
                "AssetKey": { "Type": "String", "Default": "default.zip" },
                "AWS::Region": { "Type": "String", "Default": "nowhere-1" },
                "Func": { "Type": "String", "Default": "from-default" }
            }
        }));
        fixture
            .parameters
            .insert("AssetKey".to_string(), "asset.zip".to_string());
        let evaluator = fixture.evaluator();

        let value = evaluator
            .evaluate(&json!([
                { "Ref": "AssetKey" },
                { "Ref": "AWS::Region" },
                { "Ref": "Func" }
            ]))
            .await
            .unwrap();

        assert_eq!(
            value,
            json!(["asset.zip", "bermuda-triangle-1337", "from-default"])
        );
    }

    #[tokio::test]
    async fn resolves_resources_through_the_deployed_stack() {
        let mut fixture = Fixture::new(json!({}));
        fixture.deployed(vec![
            stack_summary_of("Func", "AWS::Lambda::Function", "my-func"),
            stack_summary_of("Queue", "AWS::SQS::Queue", "https://sqs.eu-west-1.amazonaws.com/123456789012/jobs"),
        ]);
        let evaluator = fixture.evaluator();

        let value = evaluator
            .evaluate(&json!({
                "Name": { "Ref": "Func" },
                "Arn": { "Fn::GetAtt": ["Func", "Arn"] },
                "QueueArn": { "Fn::GetAtt": "Queue.Arn" },
                "Plain": [1, true, "x"]
            }))
            .await
            .unwrap();

        assert_eq!(
            value,
            json!({
                "Name": "my-func",
                "Arn": "arn:aws:lambda:bermuda-triangle-1337:123456789012:function:my-func",
                "QueueArn": "arn:aws:sqs:bermuda-triangle-1337:123456789012:jobs",
                "Plain": [1, true, "x"]
            })
        );
    }

    #[tokio::test]
    async fn stack_resources_are_listed_once_per_evaluator() {
        let mut fixture = Fixture::new(json!({}));
        fixture.deployed(vec![
            stack_summary_of("Func", "AWS::Lambda::Function", "my-func"),
            stack_summary_of("Topic", "AWS::SNS::Topic", "arn:aws:sns:here:123456789012:topic"),
        ]);
        let evaluator = fixture.evaluator();

        evaluator.evaluate(&json!({ "Ref": "Func" })).await.unwrap();
        evaluator
            .evaluate(&json!({ "Fn::GetAtt": ["Topic", "TopicArn"] }))
            .await
            .unwrap();
        let name = evaluator.find_physical_name_for("Func").await.unwrap();

        assert_eq!(name.as_deref(), Some("my-func"));
    }

    #[tokio::test]
    async fn every_page_of_stack_resources_is_read() {
        let mut fixture = Fixture::new(json!({}));
        fixture
            .cloudformation
            .expect_list_stack_resources()
            .withf(|input| input.stack_name == STACK_NAME && input.next_token.is_none())
            .times(1)
            .returning(|_| {
                Ok(ListStackResourcesOutput {
                    stack_resource_summaries: vec![stack_summary_of(
                        "Func",
                        "AWS::Lambda::Function",
                        "my-func",
                    )],
                    next_token: Some("page-2".to_string()),
                })
            });
        fixture
            .cloudformation
            .expect_list_stack_resources()
            .withf(|input| input.next_token.as_deref() == Some("page-2"))
            .times(1)
            .returning(|_| {
                Ok(ListStackResourcesOutput {
                    stack_resource_summaries: vec![stack_summary_of(
                        "Machine",
                        "AWS::StepFunctions::StateMachine",
                        "arn:aws:states:here:123456789012:stateMachine:my-machine",
                    )],
                    next_token: None,
                })
            });
        let evaluator = fixture.evaluator();

        let value = evaluator
            .evaluate(&json!([
                { "Ref": "Machine" },
                { "Fn::GetAtt": ["Machine", "Name"] },
                { "Ref": "Func" }
            ]))
            .await
            .unwrap();

        assert_eq!(
            value,
            json!([
                "arn:aws:states:here:123456789012:stateMachine:my-machine",
                "my-machine",
                "my-func"
            ])
        );
    }

    #[tokio::test]
    async fn substitutes_variables_references_and_literals() {
        let mut fixture = Fixture::new(json!({}));
        fixture.deployed(vec![stack_summary_of(
            "Machine",
            "AWS::StepFunctions::StateMachine",
            "arn:aws:states:here:123456789012:stateMachine:my-machine",
        )]);
        let evaluator = fixture.evaluator();

        let value = evaluator
            .evaluate_string(&json!({
                "Fn::Sub": [
                    "${Greeting} ${Machine.Name} in ${AWS::Region} ${!Literal}",
                    { "Greeting": { "Fn::Select": [1, { "Fn::Split": [",", "bye,hello"] }] } }
                ]
            }))
            .await
            .unwrap();

        assert_eq!(value, "hello my-machine in bermuda-triangle-1337 ${Literal}");
    }

    #[tokio::test]
    async fn unknown_references_and_functions_are_errors() {
        let mut fixture = Fixture::new(json!({}));
        fixture.deployed(Vec::new());
        let evaluator = fixture.evaluator();

        let err = evaluator.evaluate(&json!({ "Ref": "Nope" })).await.unwrap_err();
        assert!(matches!(err, EvaluationError::UnresolvedReference(name) if name == "Nope"));

        let err = evaluator
            .evaluate(&json!({ "Fn::ImportValue": "Shared" }))
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::UnsupportedIntrinsic(name) if name == "Fn::ImportValue"));
    }

    #[tokio::test]
    async fn unsupported_attributes_are_errors() {
        let mut fixture = Fixture::new(json!({}));
        fixture.deployed(vec![stack_summary_of("Bucket", "AWS::S3::Bucket", "my-bucket")]);
        let evaluator = fixture.evaluator();

        let arn = evaluator
            .evaluate_string(&json!({ "Fn::GetAtt": ["Bucket", "Arn"] }))
            .await
            .unwrap();
        assert_eq!(arn, "arn:aws:s3:::my-bucket");

        let err = evaluator
            .evaluate(&json!({ "Fn::GetAtt": ["Bucket", "DomainName"] }))
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::UnsupportedAttribute { .. }));
    }

    #[tokio::test]
    async fn failed_listing_is_a_lookup_error() {
        let mut fixture = Fixture::new(json!({}));
        fixture
            .cloudformation
            .expect_list_stack_resources()
            .returning(|_| Err(AwsError::CredentialsExpired));
        let evaluator = fixture.evaluator();

        let err = evaluator.evaluate(&json!({ "Ref": "Func" })).await.unwrap_err();

        assert!(matches!(err, EvaluationError::Lookup(AwsError::CredentialsExpired)));
    }

    #[tokio::test]
    async fn account_is_required_for_account_references() {
        let fixture = Fixture::new(json!({}));
        let evaluator = EvaluateCloudFormationTemplate::new(
            &fixture.template,
            &fixture.parameters,
            Environment::new("eu-west-1", None),
            STACK_NAME,
            "stackId",
            &fixture.cloudformation,
        );

        let err = evaluator
            .evaluate(&json!({ "Ref": "AWS::AccountId" }))
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::UnknownAccount));
    }
}
