mod aws_sdk;

pub(crate) use aws_sdk::AwsSdkProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(thiserror::Error, Debug)]
pub(crate) enum AwsError {
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("{operation} was throttled")]
    Throttling { operation: &'static str },
    #[error("no stack found")]
    NoStack,
    #[error("credentials expired")]
    CredentialsExpired,
    #[error("{operation} failed ({}): {message}", .code.as_deref().unwrap_or("unknown error"))]
    Service {
        operation: &'static str,
        code: Option<String>,
        message: String,
    },
    #[error("invalid response from {operation}: {reason}")]
    InvalidResponse {
        operation: &'static str,
        reason: String,
    },
}

/// Trait representing interactions with CloudFormation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait CloudFormationApi: Send + Sync {
    async fn describe_stacks(
        &self,
        input: DescribeStacksInput,
    ) -> Result<DescribeStacksOutput, AwsError>;

    async fn get_template(&self, input: GetTemplateInput) -> Result<GetTemplateOutput, AwsError>;

    async fn list_stack_resources(
        &self,
        input: ListStackResourcesInput,
    ) -> Result<ListStackResourcesOutput, AwsError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait LambdaApi: Send + Sync {
    async fn update_function_code(
        &self,
        input: UpdateFunctionCodeInput,
    ) -> Result<FunctionConfiguration, AwsError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait StepFunctionsApi: Send + Sync {
    async fn update_state_machine(
        &self,
        input: UpdateStateMachineInput,
    ) -> Result<UpdateStateMachineOutput, AwsError>;
}

/// Hands out service clients for a single account and region.
pub(crate) trait SdkProvider: Send + Sync {
    fn cloudformation(&self) -> &dyn CloudFormationApi;
    fn lambda(&self) -> &dyn LambdaApi;
    fn step_functions(&self) -> &dyn StepFunctionsApi;
    fn environment(&self) -> &Environment;
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Environment {
    pub(crate) partition: String,
    pub(crate) region: String,
    pub(crate) account: Option<String>,
}

impl Environment {
    pub(crate) fn new(region: impl Into<String>, account: Option<String>) -> Self {
        let region = region.into();
        Self {
            partition: partition_for_region(&region).to_string(),
            region,
            account,
        }
    }

    /// Prefer the coordinates embedded in a stack ARN over the configured ones.
    pub(crate) fn for_stack(&self, stack_id: &str) -> Self {
        let parts: Vec<&str> = stack_id.splitn(6, ':').collect();
        match parts.as_slice() {
            ["arn", partition, "cloudformation", region, account, _]
                if !region.is_empty() && !account.is_empty() =>
            {
                Self {
                    partition: partition.to_string(),
                    region: region.to_string(),
                    account: Some(account.to_string()),
                }
            }
            _ => self.clone(),
        }
    }

    pub(crate) fn url_suffix(&self) -> &'static str {
        if self.partition == "aws-cn" {
            "amazonaws.com.cn"
        } else {
            "amazonaws.com"
        }
    }
}

fn partition_for_region(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "aws-cn"
    } else if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else {
        "aws"
    }
}

#[derive(Debug, Default)]
pub(crate) struct DescribeStacksInput {
    pub(crate) stack_name: Option<String>,
    pub(crate) next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Output {
    pub(crate) key: String,
    pub(crate) value: String,
}

#[derive(Debug, Clone)]
pub(crate) struct Stack {
    pub(crate) stack_id: String,
    pub(crate) stack_name: String,
    pub(crate) stack_status: String,
    pub(crate) outputs: Option<Vec<Output>>,
}

#[derive(Debug)]
pub(crate) struct DescribeStacksOutput {
    pub(crate) stacks: Vec<Stack>,
}

#[derive(Debug)]
pub(crate) struct GetTemplateInput {
    pub(crate) stack_name: String,
}

#[derive(Debug)]
pub(crate) struct GetTemplateOutput {
    pub(crate) template_body: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct ListStackResourcesInput {
    pub(crate) stack_name: String,
    pub(crate) next_token: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct ListStackResourcesOutput {
    pub(crate) stack_resource_summaries: Vec<StackResourceSummary>,
    pub(crate) next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StackResourceSummary {
    pub(crate) logical_resource_id: String,
    pub(crate) physical_resource_id: Option<String>,
    pub(crate) resource_type: String,
    pub(crate) resource_status: String,
    pub(crate) last_updated_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FunctionCode {
    S3 {
        bucket: String,
        key: String,
        object_version: Option<String>,
    },
    ImageUri(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UpdateFunctionCodeInput {
    pub(crate) function_name: String,
    pub(crate) code: FunctionCode,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FunctionConfiguration {
    pub(crate) function_name: Option<String>,
    pub(crate) function_arn: Option<String>,
    pub(crate) last_update_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UpdateStateMachineInput {
    pub(crate) state_machine_arn: String,
    pub(crate) definition: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UpdateStateMachineOutput {
    pub(crate) update_date: DateTime<Utc>,
}
