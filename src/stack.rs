use crate::aws::{AwsError, CloudFormationApi, DescribeStacksInput, GetTemplateInput, Output};
use crate::error::Error;
use crate::stack_status::StackStatus;
use crate::template::Template;
use std::collections::HashMap;
use std::convert::TryFrom;

/// Snapshot of a deployed stack: its identity, status, outputs and template.
#[derive(Debug, Clone)]
pub(crate) struct CloudFormationStack {
    stack_name: String,
    stack_id: String,
    status: Option<StackStatus>,
    outputs: HashMap<String, String>,
    template: Template,
}

impl CloudFormationStack {
    /// A deployed stack with an empty template.
    pub(crate) fn new(stack_name: impl Into<String>, stack_id: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            stack_id: stack_id.into(),
            status: Some(StackStatus::CreateComplete),
            outputs: HashMap::new(),
            template: Template::default(),
        }
    }

    pub(crate) fn does_not_exist(stack_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            stack_id: String::new(),
            status: None,
            outputs: HashMap::new(),
            template: Template::default(),
        }
    }

    #[tracing::instrument(skip(client))]
    pub(crate) async fn lookup(
        client: &dyn CloudFormationApi,
        stack_name: &str,
    ) -> Result<Self, Error> {
        let input = DescribeStacksInput {
            stack_name: Some(stack_name.to_string()),
            ..Default::default()
        };
        let stack = match client.describe_stacks(input).await {
            Ok(output) => output.stacks.into_iter().next(),
            Err(AwsError::NoStack) => None,
            Err(e) => return Err(e.into()),
        };
        let stack = match stack {
            Some(stack) => stack,
            None => {
                tracing::debug!("stack does not exist");
                return Ok(Self::does_not_exist(stack_name));
            }
        };

        let status = StackStatus::try_from(stack.stack_status.as_str())?;
        tracing::debug!(stack_id = %stack.stack_id, %status, "found stack");

        let body = client
            .get_template(GetTemplateInput {
                stack_name: stack_name.to_string(),
            })
            .await?
            .template_body
            .ok_or_else(|| Error::MissingTemplate(stack_name.to_string()))?;

        Ok(Self {
            stack_name: stack.stack_name,
            stack_id: stack.stack_id,
            status: Some(status),
            outputs: stack
                .outputs
                .unwrap_or_default()
                .into_iter()
                .map(|Output { key, value }| (key, value))
                .collect(),
            template: body.parse()?,
        })
    }

    pub(crate) fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub(crate) fn stack_id(&self) -> &str {
        &self.stack_id
    }

    pub(crate) fn status(&self) -> Option<StackStatus> {
        self.status
    }

    /// A stack created by a change set that was never executed does not count.
    pub(crate) fn exists(&self) -> bool {
        matches!(self.status, Some(status) if status != StackStatus::ReviewInProgress)
    }

    pub(crate) fn outputs(&self) -> &HashMap<String, String> {
        &self.outputs
    }

    pub(crate) fn template(&self) -> &Template {
        &self.template
    }

    pub(crate) fn set_template(&mut self, template: Template) {
        self.template = template;
    }

    #[cfg(test)]
    pub(crate) fn set_outputs(&mut self, outputs: HashMap<String, String>) {
        self.outputs = outputs;
    }

    #[cfg(test)]
    pub(crate) fn with_status(mut self, status: StackStatus) -> Self {
        self.status = Some(status);
        self
    }
}
