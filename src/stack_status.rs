use crate::error::Error;
use std::convert::TryFrom;
use std::fmt;
use termcolor::{Color, ColorSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StackStatus {
    CreateInProgress,
    CreateComplete,
    CreateFailed,
    DeleteComplete,
    DeleteFailed,
    DeleteInProgress,
    ReviewInProgress,
    RollbackComplete,
    RollbackFailed,
    RollbackInProgress,
    UpdateComplete,
    UpdateCompleteCleanupInProgress,
    UpdateFailed,
    UpdateInProgress,
    UpdateRollbackComplete,
    UpdateRollbackCompleteCleanupInProgress,
    UpdateRollbackFailed,
    UpdateRollbackInProgress,
    ImportInProgress,
    ImportComplete,
    ImportRollbackInProgress,
    ImportRollbackFailed,
    ImportRollbackComplete,
}

impl TryFrom<&str> for StackStatus {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        use StackStatus::*;
        match value {
            "CREATE_IN_PROGRESS" => Ok(CreateInProgress),
            "CREATE_COMPLETE" => Ok(CreateComplete),
            "CREATE_FAILED" => Ok(CreateFailed),
            "DELETE_COMPLETE" => Ok(DeleteComplete),
            "DELETE_FAILED" => Ok(DeleteFailed),
            "DELETE_IN_PROGRESS" => Ok(DeleteInProgress),
            "REVIEW_IN_PROGRESS" => Ok(ReviewInProgress),
            "ROLLBACK_COMPLETE" => Ok(RollbackComplete),
            "ROLLBACK_FAILED" => Ok(RollbackFailed),
            "ROLLBACK_IN_PROGRESS" => Ok(RollbackInProgress),
            "UPDATE_COMPLETE" => Ok(UpdateComplete),
            "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS" => Ok(UpdateCompleteCleanupInProgress),
            "UPDATE_FAILED" => Ok(UpdateFailed),
            "UPDATE_IN_PROGRESS" => Ok(UpdateInProgress),
            "UPDATE_ROLLBACK_COMPLETE" => Ok(UpdateRollbackComplete),
            "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS" => {
                Ok(UpdateRollbackCompleteCleanupInProgress)
            }
            "UPDATE_ROLLBACK_FAILED" => Ok(UpdateRollbackFailed),
            "UPDATE_ROLLBACK_IN_PROGRESS" => Ok(UpdateRollbackInProgress),
            "IMPORT_IN_PROGRESS" => Ok(ImportInProgress),
            "IMPORT_COMPLETE" => Ok(ImportComplete),
            "IMPORT_ROLLBACK_IN_PROGRESS" => Ok(ImportRollbackInProgress),
            "IMPORT_ROLLBACK_FAILED" => Ok(ImportRollbackFailed),
            "IMPORT_ROLLBACK_COMPLETE" => Ok(ImportRollbackComplete),
            _ => Err(Error::UnknownStatus(value.to_string())),
        }
    }
}

impl StackStatus {
    pub(crate) fn as_str(&self) -> &'static str {
        use StackStatus::*;
        match self {
            CreateInProgress => "CREATE_IN_PROGRESS",
            CreateComplete => "CREATE_COMPLETE",
            CreateFailed => "CREATE_FAILED",
            DeleteComplete => "DELETE_COMPLETE",
            DeleteFailed => "DELETE_FAILED",
            DeleteInProgress => "DELETE_IN_PROGRESS",
            ReviewInProgress => "REVIEW_IN_PROGRESS",
            RollbackComplete => "ROLLBACK_COMPLETE",
            RollbackFailed => "ROLLBACK_FAILED",
            RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            UpdateComplete => "UPDATE_COMPLETE",
            UpdateCompleteCleanupInProgress => "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
            UpdateFailed => "UPDATE_FAILED",
            UpdateInProgress => "UPDATE_IN_PROGRESS",
            UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            UpdateRollbackCompleteCleanupInProgress => {
                "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS"
            }
            UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
            UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
            ImportInProgress => "IMPORT_IN_PROGRESS",
            ImportComplete => "IMPORT_COMPLETE",
            ImportRollbackInProgress => "IMPORT_ROLLBACK_IN_PROGRESS",
            ImportRollbackFailed => "IMPORT_ROLLBACK_FAILED",
            ImportRollbackComplete => "IMPORT_ROLLBACK_COMPLETE",
        }
    }

    pub(crate) fn color_spec(&self) -> ColorSpec {
        let mut spec = ColorSpec::new();
        if self.is_in_progress() {
            spec.set_fg(Some(Color::Blue));
        } else if self.is_complete() {
            spec.set_fg(Some(Color::Green));
        } else {
            spec.set_fg(Some(Color::Red));
        }
        spec
    }

    pub(crate) fn is_complete(&self) -> bool {
        matches!(
            self,
            Self::CreateComplete
                | Self::DeleteComplete
                | Self::RollbackComplete
                | Self::UpdateComplete
                | Self::UpdateRollbackComplete
                | Self::ImportComplete
                | Self::ImportRollbackComplete
        )
    }

    /// A stack in one of these states is being modified by CloudFormation.
    pub(crate) fn is_in_progress(&self) -> bool {
        self.as_str().ends_with("_IN_PROGRESS")
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
