use super::{
    AwsError, CloudFormationApi, DescribeStacksInput, DescribeStacksOutput, Environment,
    FunctionCode, FunctionConfiguration, GetTemplateInput, GetTemplateOutput, LambdaApi,
    ListStackResourcesInput, ListStackResourcesOutput, Output, SdkProvider, Stack,
    StackResourceSummary, StepFunctionsApi, UpdateFunctionCodeInput, UpdateStateMachineInput,
    UpdateStateMachineOutput,
};
use crate::error::Error;

use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::types::TemplateStage;
use aws_smithy_types::DateTime;
use aws_smithy_types_convert::date_time::DateTimeExt;
use chrono::Utc;
use std::convert::TryFrom;

const TRANSIENT_ERROR_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
];

macro_rules! send_request_with_retry {
    ($name:literal, $builder:ident) => {
        backoff::future::retry(backoff::ExponentialBackoff::default(), || async {
            let name = $name;
            // any errors that deserve a retry should be wrapped in a `backoff::Error::Transient`
            // type so that the retry behaviour kicks in. Other types of errors should be
            // `backoff::Error::Permanent` to indicate that the failure should not be retried.
            $builder.clone().send().await.map_err(|e| match e {
                SdkError::TimeoutError(_) => {
                    tracing::trace!(%name, "timeout error, retrying");
                    backoff::Error::transient(AwsError::Timeout { operation: name })
                }
                SdkError::ServiceError(_) => match e.code() {
                    Some(code) if TRANSIENT_ERROR_CODES.contains(&code) => {
                        tracing::trace!(%name, %code, "throttling error, retrying");
                        backoff::Error::transient(AwsError::Throttling { operation: name })
                    }
                    Some("ExpiredToken") | Some("ExpiredTokenException") => {
                        backoff::Error::permanent(AwsError::CredentialsExpired)
                    }
                    Some("ValidationError")
                        if e.message().map_or(false, |m| m.contains("does not exist")) =>
                    {
                        backoff::Error::permanent(AwsError::NoStack)
                    }
                    code => backoff::Error::permanent(AwsError::Service {
                        operation: name,
                        code: code.map(str::to_owned),
                        message: DisplayErrorContext(&e).to_string(),
                    }),
                },
                _ => backoff::Error::permanent(AwsError::Service {
                    operation: name,
                    code: None,
                    message: DisplayErrorContext(&e).to_string(),
                }),
            })
        })
        .await
    };
}

/// Members the service models as optional but that are always present in practice.
fn required<'a, T: ?Sized>(
    operation: &'static str,
    member: &str,
    value: Option<&'a T>,
) -> Result<&'a T, AwsError> {
    value.ok_or_else(|| AwsError::InvalidResponse {
        operation,
        reason: format!("missing {}", member),
    })
}

fn to_chrono(operation: &'static str, dt: &DateTime) -> Result<chrono::DateTime<Utc>, AwsError> {
    dt.to_chrono_utc().map_err(|e| AwsError::InvalidResponse {
        operation,
        reason: e.to_string(),
    })
}

pub(crate) struct AwsSdkProvider {
    cloudformation: aws_sdk_cloudformation::Client,
    lambda: aws_sdk_lambda::Client,
    step_functions: aws_sdk_sfn::Client,
    environment: Environment,
}

impl AwsSdkProvider {
    #[tracing::instrument]
    pub(crate) async fn from_env(
        region: Option<String>,
        account: Option<String>,
    ) -> Result<Self, Error> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;

        let region = config.region().ok_or(Error::NoRegion)?.to_string();
        tracing::debug!(%region, "chosen region");

        Ok(Self {
            cloudformation: aws_sdk_cloudformation::Client::new(&config),
            lambda: aws_sdk_lambda::Client::new(&config),
            step_functions: aws_sdk_sfn::Client::new(&config),
            environment: Environment::new(region, account),
        })
    }
}

impl SdkProvider for AwsSdkProvider {
    fn cloudformation(&self) -> &dyn CloudFormationApi {
        &self.cloudformation
    }

    fn lambda(&self) -> &dyn LambdaApi {
        &self.lambda
    }

    fn step_functions(&self) -> &dyn StepFunctionsApi {
        &self.step_functions
    }

    fn environment(&self) -> &Environment {
        &self.environment
    }
}

#[async_trait::async_trait]
impl CloudFormationApi for aws_sdk_cloudformation::Client {
    async fn describe_stacks(
        &self,
        input: DescribeStacksInput,
    ) -> Result<DescribeStacksOutput, AwsError> {
        let builder = aws_sdk_cloudformation::Client::describe_stacks(self)
            .set_stack_name(input.stack_name)
            .set_next_token(input.next_token);
        let output = send_request_with_retry!("describe_stacks", builder)?;
        DescribeStacksOutput::try_from(output)
    }

    async fn get_template(&self, input: GetTemplateInput) -> Result<GetTemplateOutput, AwsError> {
        let builder = aws_sdk_cloudformation::Client::get_template(self)
            .stack_name(input.stack_name)
            .template_stage(TemplateStage::Original);
        let output = send_request_with_retry!("get_template", builder)?;
        Ok(output.into())
    }

    async fn list_stack_resources(
        &self,
        input: ListStackResourcesInput,
    ) -> Result<ListStackResourcesOutput, AwsError> {
        let builder = aws_sdk_cloudformation::Client::list_stack_resources(self)
            .stack_name(input.stack_name)
            .set_next_token(input.next_token);
        let output = send_request_with_retry!("list_stack_resources", builder)?;
        ListStackResourcesOutput::try_from(output)
    }
}

impl TryFrom<aws_sdk_cloudformation::operation::describe_stacks::DescribeStacksOutput>
    for DescribeStacksOutput
{
    type Error = AwsError;

    fn try_from(
        o: aws_sdk_cloudformation::operation::describe_stacks::DescribeStacksOutput,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            stacks: o
                .stacks()
                .iter()
                .map(TryFrom::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl TryFrom<&aws_sdk_cloudformation::types::Stack> for Stack {
    type Error = AwsError;

    fn try_from(s: &aws_sdk_cloudformation::types::Stack) -> Result<Self, Self::Error> {
        let status = required("describe_stacks", "StackStatus", s.stack_status())?;
        Ok(Self {
            stack_id: required("describe_stacks", "StackId", s.stack_id())?.to_string(),
            stack_name: required("describe_stacks", "StackName", s.stack_name())?.to_string(),
            stack_status: status.as_str().to_string(),
            outputs: Some(s.outputs().iter().filter_map(output).collect()),
        })
    }
}

/// Outputs without a key or value carry nothing worth printing.
fn output(o: &aws_sdk_cloudformation::types::Output) -> Option<Output> {
    Some(Output {
        key: o.output_key()?.to_string(),
        value: o.output_value()?.to_string(),
    })
}

impl From<aws_sdk_cloudformation::operation::get_template::GetTemplateOutput>
    for GetTemplateOutput
{
    fn from(o: aws_sdk_cloudformation::operation::get_template::GetTemplateOutput) -> Self {
        Self {
            template_body: o.template_body().map(str::to_owned),
        }
    }
}

impl TryFrom<aws_sdk_cloudformation::operation::list_stack_resources::ListStackResourcesOutput>
    for ListStackResourcesOutput
{
    type Error = AwsError;

    fn try_from(
        o: aws_sdk_cloudformation::operation::list_stack_resources::ListStackResourcesOutput,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            stack_resource_summaries: o
                .stack_resource_summaries()
                .iter()
                .map(TryFrom::try_from)
                .collect::<Result<_, _>>()?,
            next_token: o.next_token().map(str::to_owned),
        })
    }
}

impl TryFrom<&aws_sdk_cloudformation::types::StackResourceSummary> for StackResourceSummary {
    type Error = AwsError;

    fn try_from(
        r: &aws_sdk_cloudformation::types::StackResourceSummary,
    ) -> Result<Self, Self::Error> {
        const OPERATION: &str = "list_stack_resources";
        Ok(Self {
            logical_resource_id: required(OPERATION, "LogicalResourceId", r.logical_resource_id())?
                .to_string(),
            physical_resource_id: r.physical_resource_id().map(str::to_owned),
            resource_type: required(OPERATION, "ResourceType", r.resource_type())?.to_string(),
            resource_status: required(OPERATION, "ResourceStatus", r.resource_status())?
                .as_str()
                .to_string(),
            last_updated_timestamp: to_chrono(
                OPERATION,
                required(OPERATION, "LastUpdatedTimestamp", r.last_updated_timestamp())?,
            )?,
        })
    }
}

#[async_trait::async_trait]
impl LambdaApi for aws_sdk_lambda::Client {
    async fn update_function_code(
        &self,
        input: UpdateFunctionCodeInput,
    ) -> Result<FunctionConfiguration, AwsError> {
        let builder = aws_sdk_lambda::Client::update_function_code(self)
            .function_name(input.function_name);
        let builder = match input.code {
            FunctionCode::S3 {
                bucket,
                key,
                object_version,
            } => builder
                .s3_bucket(bucket)
                .s3_key(key)
                .set_s3_object_version(object_version),
            FunctionCode::ImageUri(uri) => builder.image_uri(uri),
        };
        let output = send_request_with_retry!("update_function_code", builder)?;
        Ok(output.into())
    }
}

impl From<aws_sdk_lambda::operation::update_function_code::UpdateFunctionCodeOutput>
    for FunctionConfiguration
{
    fn from(o: aws_sdk_lambda::operation::update_function_code::UpdateFunctionCodeOutput) -> Self {
        Self {
            function_name: o.function_name().map(str::to_owned),
            function_arn: o.function_arn().map(str::to_owned),
            last_update_status: o.last_update_status().map(|s| s.as_str().to_string()),
        }
    }
}

#[async_trait::async_trait]
impl StepFunctionsApi for aws_sdk_sfn::Client {
    async fn update_state_machine(
        &self,
        input: UpdateStateMachineInput,
    ) -> Result<UpdateStateMachineOutput, AwsError> {
        let builder = aws_sdk_sfn::Client::update_state_machine(self)
            .state_machine_arn(input.state_machine_arn)
            .definition(input.definition);
        let output = send_request_with_retry!("update_state_machine", builder)?;
        UpdateStateMachineOutput::try_from(output)
    }
}

impl TryFrom<aws_sdk_sfn::operation::update_state_machine::UpdateStateMachineOutput>
    for UpdateStateMachineOutput
{
    type Error = AwsError;

    fn try_from(
        o: aws_sdk_sfn::operation::update_state_machine::UpdateStateMachineOutput,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            update_date: to_chrono("update_state_machine", o.update_date())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_cloudformation::types::{ResourceStatus, StackStatus};

    #[test]
    fn converts_stacks_and_skips_incomplete_outputs() {
        let stack = aws_sdk_cloudformation::types::Stack::builder()
            .stack_id("arn:aws:cloudformation:eu-west-1:123456789012:stack/app/1")
            .stack_name("app")
            .stack_status(StackStatus::UpdateComplete)
            .outputs(
                aws_sdk_cloudformation::types::Output::builder()
                    .output_key("Url")
                    .output_value("https://example.com")
                    .build(),
            )
            .outputs(
                aws_sdk_cloudformation::types::Output::builder()
                    .output_key("Empty")
                    .build(),
            )
            .build();

        let stack = Stack::try_from(&stack).unwrap();

        assert_eq!(stack.stack_name, "app");
        assert_eq!(stack.stack_status, "UPDATE_COMPLETE");
        assert_eq!(
            stack.outputs,
            Some(vec![Output {
                key: "Url".to_string(),
                value: "https://example.com".to_string(),
            }])
        );
    }

    #[test]
    fn stack_without_status_is_an_invalid_response() {
        let stack = aws_sdk_cloudformation::types::Stack::builder()
            .stack_id("id")
            .stack_name("app")
            .build();

        let err = Stack::try_from(&stack).unwrap_err();

        assert!(matches!(
            err,
            AwsError::InvalidResponse { operation: "describe_stacks", reason } if reason == "missing StackStatus"
        ));
    }

    #[test]
    fn converts_resource_summaries() {
        let summary = aws_sdk_cloudformation::types::StackResourceSummary::builder()
            .logical_resource_id("Func")
            .physical_resource_id("my-func")
            .resource_type("AWS::Lambda::Function")
            .resource_status(ResourceStatus::UpdateComplete)
            .last_updated_timestamp(DateTime::from_secs(1_600_000_000))
            .build();

        let summary = StackResourceSummary::try_from(&summary).unwrap();

        assert_eq!(summary.logical_resource_id, "Func");
        assert_eq!(summary.physical_resource_id.as_deref(), Some("my-func"));
        assert_eq!(summary.resource_status, "UPDATE_COMPLETE");
        assert_eq!(summary.last_updated_timestamp.timestamp(), 1_600_000_000);
    }
}
