//! Applying template changes directly to live resources.
//!
//! A hotswap deployment only goes ahead when every difference between the
//! deployed template and the new one can be pushed through a service API.
//! Anything else (new resources, replaced resources, changes to properties
//! other than code or definitions) means a full CloudFormation deployment is
//! needed, and nothing is touched.

mod lambda;
mod stepfunctions;
#[cfg(test)]
pub(crate) mod test_setup;

use crate::artifact::StackArtifact;
use crate::aws::{FunctionCode, SdkProvider};
use crate::diff::{diff_templates, ResourceDifference};
use crate::error::Error;
use crate::evaluate::{EvaluateCloudFormationTemplate, EvaluationError};
use crate::stack::CloudFormationStack;
use futures::future::try_join_all;
use std::collections::HashMap;
use tracing_futures::Instrument;

const CDK_METADATA_RESOURCE: &str = "AWS::CDK::Metadata";

/// Asset parameters are renamed on every asset change and outputs are read
/// back from the deployed stack, so neither section blocks a hotswap.
const HOTSWAP_SAFE_SECTIONS: &[&str] = &["Parameters", "Outputs"];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HotswapOperation {
    LambdaFunctionCode {
        logical_id: String,
        function_name: String,
        code: FunctionCode,
    },
    StateMachineDefinition {
        logical_id: String,
        state_machine_arn: String,
        definition: String,
    },
}

impl HotswapOperation {
    pub(crate) fn logical_id(&self) -> &str {
        match self {
            Self::LambdaFunctionCode { logical_id, .. }
            | Self::StateMachineDefinition { logical_id, .. } => logical_id,
        }
    }

    pub(crate) fn resource_type(&self) -> &'static str {
        match self {
            Self::LambdaFunctionCode { .. } => lambda::RESOURCE_TYPE,
            Self::StateMachineDefinition { .. } => stepfunctions::RESOURCE_TYPE,
        }
    }

    /// The function name or state machine ARN being updated.
    pub(crate) fn target(&self) -> &str {
        match self {
            Self::LambdaFunctionCode { function_name, .. } => function_name,
            Self::StateMachineDefinition {
                state_machine_arn, ..
            } => state_machine_arn,
        }
    }

    pub(crate) fn change(&self) -> &'static str {
        match self {
            Self::LambdaFunctionCode { .. } => "function code",
            Self::StateMachineDefinition { .. } => "state machine definition",
        }
    }

    async fn apply(&self, sdk: &dyn SdkProvider) -> Result<(), Error> {
        match self {
            Self::LambdaFunctionCode {
                function_name,
                code,
                ..
            } => lambda::update_function_code(sdk, function_name, code).await,
            Self::StateMachineDefinition {
                state_machine_arn,
                definition,
                ..
            } => stepfunctions::update_state_machine(sdk, state_machine_arn, definition).await,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DeployStackResult {
    pub(crate) no_op: bool,
    pub(crate) stack_arn: String,
    pub(crate) outputs: HashMap<String, String>,
    pub(crate) operations: Vec<HotswapOperation>,
}

pub(crate) enum ChangeHotswapImpact {
    Operation(HotswapOperation),
    Irrelevant,
    NotHotswappable(String),
}

/// Work out the operations needed to hotswap `artifact` onto `current_stack`,
/// or `None` if a full deployment is required.
#[tracing::instrument(skip_all, fields(stack_name = %artifact.stack_name))]
pub(crate) async fn plan_hotswap(
    sdk: &dyn SdkProvider,
    asset_params: &HashMap<String, String>,
    current_stack: &CloudFormationStack,
    artifact: &StackArtifact,
) -> Result<Option<Vec<HotswapOperation>>, Error> {
    if !current_stack.exists() {
        tracing::info!("stack has not been deployed yet");
        return Ok(None);
    }
    if let Some(status) = current_stack.status() {
        if status.is_in_progress() {
            return Err(Error::StackBusy {
                stack_name: current_stack.stack_name().to_string(),
                status: status.to_string(),
            });
        }
    }

    let diff = diff_templates(current_stack.template(), &artifact.template);
    if diff.is_empty() {
        tracing::debug!(template_file = ?artifact.template_file, "template unchanged");
        return Ok(Some(Vec::new()));
    }
    let blocking: Vec<_> = diff
        .changed_sections
        .iter()
        .filter(|section| !HOTSWAP_SAFE_SECTIONS.contains(&section.as_str()))
        .collect();
    if !blocking.is_empty() {
        tracing::info!(sections = ?blocking, "template sections outside Resources changed");
        return Ok(None);
    }

    let evaluator = EvaluateCloudFormationTemplate::new(
        &artifact.template,
        asset_params,
        sdk.environment().for_stack(current_stack.stack_id()),
        &artifact.stack_name,
        current_stack.stack_id(),
        sdk.cloudformation(),
    );

    let mut operations = Vec::new();
    for (logical_id, difference) in &diff.resources {
        match classify_change(logical_id, difference, &evaluator).await? {
            ChangeHotswapImpact::Operation(operation) => {
                tracing::debug!(%logical_id, change = operation.change(), "hotswappable change");
                operations.push(operation);
            }
            ChangeHotswapImpact::Irrelevant => {
                tracing::trace!(%logical_id, "ignoring change");
            }
            ChangeHotswapImpact::NotHotswappable(reason) => {
                tracing::info!(%logical_id, %reason, "change cannot be hotswapped");
                return Ok(None);
            }
        }
    }

    Ok(Some(operations))
}

/// Attempt a hotswap deployment.
///
/// Returns `None` without making any changes when the differences cannot all
/// be hotswapped. Otherwise every operation is applied concurrently and the
/// first failure is returned.
#[tracing::instrument(skip_all, fields(stack_name = %artifact.stack_name))]
pub(crate) async fn try_hotswap_deployment(
    sdk: &dyn SdkProvider,
    asset_params: &HashMap<String, String>,
    current_stack: &CloudFormationStack,
    artifact: &StackArtifact,
) -> Result<Option<DeployStackResult>, Error> {
    let operations = match plan_hotswap(sdk, asset_params, current_stack, artifact).await? {
        Some(operations) => operations,
        None => return Ok(None),
    };

    try_join_all(operations.iter().map(|operation| {
        operation.apply(sdk).instrument(tracing::info_span!(
            "hotswap",
            logical_id = %operation.logical_id(),
            target = %operation.target()
        ))
    }))
    .await?;

    tracing::info!(noperations = operations.len(), "hotswap finished");
    Ok(Some(DeployStackResult {
        no_op: operations.is_empty(),
        stack_arn: current_stack.stack_id().to_string(),
        outputs: current_stack.outputs().clone(),
        operations,
    }))
}

async fn classify_change(
    logical_id: &str,
    difference: &ResourceDifference,
    evaluator: &EvaluateCloudFormationTemplate<'_>,
) -> Result<ChangeHotswapImpact, Error> {
    let (new, changed_properties) = match difference {
        ResourceDifference::Added(resource) | ResourceDifference::Removed(resource)
            if resource.resource_type == CDK_METADATA_RESOURCE =>
        {
            return Ok(ChangeHotswapImpact::Irrelevant)
        }
        ResourceDifference::Added(_) => {
            return Ok(ChangeHotswapImpact::NotHotswappable(
                "resource was added".to_string(),
            ))
        }
        ResourceDifference::Removed(_) => {
            return Ok(ChangeHotswapImpact::NotHotswappable(
                "resource was removed".to_string(),
            ))
        }
        ResourceDifference::Modified {
            old,
            new,
            changed_properties,
            changed_attributes,
        } => {
            if old.resource_type == CDK_METADATA_RESOURCE
                && new.resource_type == CDK_METADATA_RESOURCE
            {
                return Ok(ChangeHotswapImpact::Irrelevant);
            }
            if !changed_attributes.is_empty() {
                return Ok(ChangeHotswapImpact::NotHotswappable(format!(
                    "resource attributes changed: {:?}",
                    changed_attributes
                )));
            }
            (new, changed_properties)
        }
    };

    let impact = match new.resource_type.as_str() {
        lambda::RESOURCE_TYPE => {
            lambda::classify(logical_id, new, changed_properties, evaluator).await
        }
        stepfunctions::RESOURCE_TYPE => {
            stepfunctions::classify(logical_id, new, changed_properties, evaluator).await
        }
        other => Ok(ChangeHotswapImpact::NotHotswappable(format!(
            "{} resources cannot be hotswapped",
            other
        ))),
    };

    match impact {
        Ok(impact) => Ok(impact),
        Err(EvaluationError::Lookup(e)) => Err(e.into()),
        Err(e) => Ok(ChangeHotswapImpact::NotHotswappable(e.to_string())),
    }
}
