//! Fixtures for exercising hotswap deployments against mocked AWS clients.
//!
//! Every test builds its own [`HotswapTestSetup`] with [`setup_hotswap_tests`],
//! so the stack resource summaries and the fake stack start empty each time.

use super::DeployStackResult;
use crate::artifact::StackArtifact;
use crate::aws::{
    AwsError, CloudFormationApi, Environment, FunctionConfiguration, LambdaApi,
    ListStackResourcesInput, ListStackResourcesOutput, MockCloudFormationApi, MockLambdaApi,
    MockStepFunctionsApi, SdkProvider, StackResourceSummary, StepFunctionsApi,
    UpdateFunctionCodeInput, UpdateStateMachineInput, UpdateStateMachineOutput,
};
use crate::error::Error;
use crate::stack::CloudFormationStack;
use crate::template::Template;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub(crate) const STACK_NAME: &str = "withouterrors";
pub(crate) const STACK_ID: &str = "stackId";

pub(crate) struct MockSdkProvider {
    cloudformation: MockCloudFormationApi,
    lambda: MockLambdaApi,
    step_functions: MockStepFunctionsApi,
    environment: Environment,
}

impl SdkProvider for MockSdkProvider {
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

/// `list_stack_resources` answering with `summaries`, for the fixture stack only.
pub(crate) fn list_stack_resources_of(
    summaries: Arc<Mutex<Vec<StackResourceSummary>>>,
) -> impl FnMut(ListStackResourcesInput) -> Result<ListStackResourcesOutput, AwsError> + Send + 'static
{
    move |input| {
        assert!(
            input.stack_name == STACK_NAME,
            "Expected stack name in list_stack_resources() call to be: '{}', but received: '{}'",
            STACK_NAME,
            input.stack_name
        );
        Ok(ListStackResourcesOutput {
            stack_resource_summaries: summaries.lock().unwrap().clone(),
            next_token: None,
        })
    }
}

pub(crate) struct HotswapTestSetup {
    provider: MockSdkProvider,
    stack_resources: Arc<Mutex<Vec<StackResourceSummary>>>,
    current_cfn_stack: CloudFormationStack,
}

pub(crate) fn setup_hotswap_tests() -> HotswapTestSetup {
    let stack_resources = Arc::new(Mutex::new(Vec::new()));
    let mut cloudformation = MockCloudFormationApi::new();
    cloudformation
        .expect_list_stack_resources()
        .returning(list_stack_resources_of(Arc::clone(&stack_resources)));

    HotswapTestSetup {
        provider: MockSdkProvider {
            cloudformation,
            lambda: MockLambdaApi::new(),
            step_functions: MockStepFunctionsApi::new(),
            environment: Environment::new(
                "bermuda-triangle-1337",
                Some("123456789012".to_string()),
            ),
        },
        stack_resources,
        current_cfn_stack: CloudFormationStack::new(STACK_NAME, STACK_ID),
    }
}

impl HotswapTestSetup {
    pub(crate) fn provider(&self) -> &MockSdkProvider {
        &self.provider
    }

    /// Call `checkpoint()` first to replace the fixture `list_stack_resources`.
    pub(crate) fn cloudformation_mock(&mut self) -> &mut MockCloudFormationApi {
        &mut self.provider.cloudformation
    }

    pub(crate) fn lambda_mock(&mut self) -> &mut MockLambdaApi {
        &mut self.provider.lambda
    }

    pub(crate) fn step_functions_mock(&mut self) -> &mut MockStepFunctionsApi {
        &mut self.provider.step_functions
    }

    pub(crate) fn push_stack_resource_summaries(
        &self,
        items: impl IntoIterator<Item = StackResourceSummary>,
    ) {
        self.stack_resources.lock().unwrap().extend(items);
    }

    pub(crate) fn set_current_cfn_stack_template(&mut self, template: Template) {
        self.current_cfn_stack.set_template(template);
    }

    pub(crate) fn set_current_cfn_stack_outputs(&mut self, outputs: Vec<(&str, &str)>) {
        self.current_cfn_stack.set_outputs(
            outputs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
    }

    pub(crate) fn set_update_state_machine_mock(
        &mut self,
        mock: impl FnMut(UpdateStateMachineInput) -> Result<UpdateStateMachineOutput, AwsError>
            + Send
            + 'static,
    ) {
        self.provider
            .step_functions
            .expect_update_state_machine()
            .returning(mock);
    }

    pub(crate) fn set_update_function_code_mock(
        &mut self,
        mock: impl FnMut(UpdateFunctionCodeInput) -> Result<FunctionConfiguration, AwsError>
            + Send
            + 'static,
    ) {
        self.provider
            .lambda
            .expect_update_function_code()
            .returning(mock);
    }

    pub(crate) async fn try_hotswap_deployment(
        &self,
        artifact: &StackArtifact,
    ) -> Result<Option<DeployStackResult>, Error> {
        self.try_hotswap_deployment_with_params(artifact, &HashMap::new())
            .await
    }

    pub(crate) async fn try_hotswap_deployment_with_params(
        &self,
        artifact: &StackArtifact,
        asset_params: &HashMap<String, String>,
    ) -> Result<Option<DeployStackResult>, Error> {
        super::try_hotswap_deployment(
            &self.provider,
            asset_params,
            &self.current_cfn_stack,
            artifact,
        )
        .await
    }
}

pub(crate) fn cdk_stack_artifact_of(template: Template) -> StackArtifact {
    StackArtifact::new(STACK_NAME, template)
}

pub(crate) fn template_of(value: serde_json::Value) -> Template {
    Template::from_value(value).expect("valid template")
}

pub(crate) fn stack_summary_of(
    logical_id: &str,
    resource_type: &str,
    physical_resource_id: &str,
) -> StackResourceSummary {
    StackResourceSummary {
        logical_resource_id: logical_id.to_string(),
        physical_resource_id: Some(physical_resource_id.to_string()),
        resource_type: resource_type.to_string(),
        resource_status: "CREATE_COMPLETE".to_string(),
        last_updated_timestamp: Utc::now(),
    }
}

pub(crate) fn service_error(operation: &'static str) -> AwsError {
    AwsError::Service {
        operation,
        code: Some("ServiceException".to_string()),
        message: "something went wrong".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_fixture_stack() -> ListStackResourcesInput {
        ListStackResourcesInput {
            stack_name: STACK_NAME.to_string(),
            next_token: None,
        }
    }

    #[tokio::test]
    async fn lists_the_pushed_summaries() {
        let setup = setup_hotswap_tests();
        setup.push_stack_resource_summaries(vec![stack_summary_of(
            "Func",
            "AWS::Lambda::Function",
            "my-func",
        )]);

        let output = setup
            .provider()
            .cloudformation()
            .list_stack_resources(list_fixture_stack())
            .await
            .unwrap();

        assert_eq!(output.stack_resource_summaries.len(), 1);
        assert_eq!(output.stack_resource_summaries[0].resource_status, "CREATE_COMPLETE");
    }

    #[tokio::test]
    async fn each_setup_starts_empty() {
        let first = setup_hotswap_tests();
        first.push_stack_resource_summaries(vec![stack_summary_of("A", "AWS::SNS::Topic", "a")]);

        let second = setup_hotswap_tests();
        let output = second
            .provider()
            .cloudformation()
            .list_stack_resources(list_fixture_stack())
            .await
            .unwrap();

        assert!(output.stack_resource_summaries.is_empty());
    }

    #[tokio::test]
    async fn registered_mocks_can_fail() {
        let mut setup = setup_hotswap_tests();
        setup.set_update_function_code_mock(|_| Err(service_error("update_function_code")));

        let err = setup
            .provider()
            .lambda()
            .update_function_code(UpdateFunctionCodeInput {
                function_name: "f".to_string(),
                code: crate::aws::FunctionCode::ImageUri("image".to_string()),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AwsError::Service { operation: "update_function_code", .. }));
    }

    #[tokio::test]
    #[should_panic(expected = "No matching expectation found")]
    async fn unregistered_mock_fails_loudly() {
        let setup = setup_hotswap_tests();
        let _ = setup
            .provider()
            .lambda()
            .update_function_code(UpdateFunctionCodeInput {
                function_name: "f".to_string(),
                code: crate::aws::FunctionCode::ImageUri("image".to_string()),
            })
            .await;
    }
}
