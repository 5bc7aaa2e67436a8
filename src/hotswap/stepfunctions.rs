use super::{ChangeHotswapImpact, HotswapOperation};
use crate::aws::{SdkProvider, UpdateStateMachineInput};
use crate::error::Error;
use crate::evaluate::{EvaluateCloudFormationTemplate, EvaluationError};
use crate::template::Resource;
use std::collections::BTreeSet;

pub(super) const RESOURCE_TYPE: &str = "AWS::StepFunctions::StateMachine";

pub(super) async fn classify(
    logical_id: &str,
    resource: &Resource,
    changed_properties: &BTreeSet<String>,
    evaluator: &EvaluateCloudFormationTemplate<'_>,
) -> Result<ChangeHotswapImpact, EvaluationError> {
    if let Some(property) = changed_properties
        .iter()
        .find(|p| p.as_str() != "DefinitionString")
    {
        return Ok(ChangeHotswapImpact::NotHotswappable(format!(
            "property {} of a state machine changed",
            property
        )));
    }

    let definition = match resource.properties.get("DefinitionString") {
        Some(definition) => evaluator.evaluate_string(definition).await?,
        None => {
            return Ok(ChangeHotswapImpact::NotHotswappable(
                "DefinitionString was removed".to_string(),
            ))
        }
    };

    let state_machine_arn = match resource.properties.get("StateMachineName") {
        Some(name) => {
            let name = evaluator.evaluate_string(name).await?;
            let environment = evaluator.environment();
            format!(
                "arn:{}:states:{}:{}:stateMachine:{}",
                environment.partition,
                environment.region,
                evaluator.account()?,
                name
            )
        }
        // the physical id of a state machine is its ARN
        None => match evaluator.find_physical_name_for(logical_id).await? {
            Some(arn) => arn,
            None => {
                return Ok(ChangeHotswapImpact::NotHotswappable(
                    "state machine has not been deployed".to_string(),
                ))
            }
        },
    };

    Ok(ChangeHotswapImpact::Operation(
        HotswapOperation::StateMachineDefinition {
            logical_id: logical_id.to_string(),
            state_machine_arn,
            definition,
        },
    ))
}

pub(super) async fn update_state_machine(
    sdk: &dyn SdkProvider,
    state_machine_arn: &str,
    definition: &str,
) -> Result<(), Error> {
    tracing::debug!(%state_machine_arn, "updating state machine definition");
    let output = sdk
        .step_functions()
        .update_state_machine(UpdateStateMachineInput {
            state_machine_arn: state_machine_arn.to_string(),
            definition: definition.to_string(),
        })
        .await?;
    tracing::info!(update_date = %output.update_date, "updated state machine definition");
    Ok(())
}
