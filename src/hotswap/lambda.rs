use super::{ChangeHotswapImpact, HotswapOperation};
use crate::aws::{FunctionCode, SdkProvider, UpdateFunctionCodeInput};
use crate::error::Error;
use crate::evaluate::{EvaluateCloudFormationTemplate, EvaluationError};
use crate::template::Resource;
use serde_json::Value;
use std::collections::BTreeSet;

pub(super) const RESOURCE_TYPE: &str = "AWS::Lambda::Function";

/// Only a change to `Code` can be pushed straight to the function.
pub(super) async fn classify(
    logical_id: &str,
    resource: &Resource,
    changed_properties: &BTreeSet<String>,
    evaluator: &EvaluateCloudFormationTemplate<'_>,
) -> Result<ChangeHotswapImpact, EvaluationError> {
    if let Some(property) = changed_properties.iter().find(|p| p.as_str() != "Code") {
        return Ok(ChangeHotswapImpact::NotHotswappable(format!(
            "property {} of a Lambda function changed",
            property
        )));
    }

    let code = match resource.properties.get("Code") {
        Some(code) => evaluator.evaluate(code).await?,
        None => {
            return Ok(ChangeHotswapImpact::NotHotswappable(
                "Code was removed".to_string(),
            ))
        }
    };
    let code = match function_code(&code) {
        Some(code) => code,
        None => {
            return Ok(ChangeHotswapImpact::NotHotswappable(
                "only S3 and container image code can be hotswapped".to_string(),
            ))
        }
    };

    let function_name = match resource.properties.get("FunctionName") {
        Some(name) => evaluator.evaluate_string(name).await?,
        None => match evaluator.find_physical_name_for(logical_id).await? {
            Some(name) => name,
            None => {
                return Ok(ChangeHotswapImpact::NotHotswappable(
                    "function has not been deployed".to_string(),
                ))
            }
        },
    };

    Ok(ChangeHotswapImpact::Operation(
        HotswapOperation::LambdaFunctionCode {
            logical_id: logical_id.to_string(),
            function_name,
            code,
        },
    ))
}

fn function_code(code: &Value) -> Option<FunctionCode> {
    if let Some(uri) = code.get("ImageUri").and_then(Value::as_str) {
        return Some(FunctionCode::ImageUri(uri.to_string()));
    }

    Some(FunctionCode::S3 {
        bucket: code.get("S3Bucket")?.as_str()?.to_string(),
        key: code.get("S3Key")?.as_str()?.to_string(),
        object_version: code
            .get("S3ObjectVersion")
            .and_then(Value::as_str)
            .map(str::to_owned),
    })
}

pub(super) async fn update_function_code(
    sdk: &dyn SdkProvider,
    function_name: &str,
    code: &FunctionCode,
) -> Result<(), Error> {
    tracing::debug!(%function_name, ?code, "updating function code");
    let configuration = sdk
        .lambda()
        .update_function_code(UpdateFunctionCodeInput {
            function_name: function_name.to_string(),
            code: code.clone(),
        })
        .await?;
    tracing::info!(
        function_arn = ?configuration.function_arn,
        last_update_status = ?configuration.last_update_status,
        "updated function code"
    );
    Ok(())
}
