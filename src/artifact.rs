use crate::template::Template;
use eyre::{Result, WrapErr};
use std::path::{Path, PathBuf};

/// A synthesized stack waiting to be deployed.
#[derive(Debug, Clone)]
pub(crate) struct StackArtifact {
    pub(crate) stack_name: String,
    pub(crate) template: Template,
    pub(crate) template_file: Option<PathBuf>,
}

impl StackArtifact {
    pub(crate) fn new(stack_name: impl Into<String>, template: Template) -> Self {
        Self {
            stack_name: stack_name.into(),
            template,
            template_file: None,
        }
    }

    pub(crate) fn from_template_file(
        stack_name: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading template {}", path.display()))?;
        let template: Template = body
            .parse()
            .wrap_err_with(|| format!("parsing template {}", path.display()))?;

        Ok(Self {
            stack_name: stack_name.into(),
            template,
            template_file: Some(path.to_path_buf()),
        })
    }
}
