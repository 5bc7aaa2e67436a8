use crate::aws::AwsError;

#[derive(thiserror::Error, Debug)]
pub(crate) enum Error {
    #[error("aws error: {0}")]
    Aws(#[from] AwsError),
    #[error("error parsing parameter {0:?}, expected KEY=VALUE")]
    ParseParameter(String),
    #[error("unknown stack status {0}")]
    UnknownStatus(String),
    #[error("no region configured")]
    NoRegion,
    #[error("stack {stack_name} is busy ({status})")]
    StackBusy { stack_name: String, status: String },
    #[error("invalid template: {0}")]
    InvalidTemplate(#[from] serde_json::Error),
    #[error("stack {0} has no template body")]
    MissingTemplate(String),
}
