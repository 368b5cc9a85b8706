//! Human-readable step verdicts.

use std::fmt;

/// Prefix of a status that terminated its iteration early.
pub const ERROR_PREFIX: &str = "Error: ";

/// Verdict of one executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    NoAccess,
    Failed,
    Clicked,
    Input(String),
    Selected(String),
    DropdownItemNotFound,
    Scrolled { x: i64, y: i64 },
    /// Step-level failure that does not stop the iteration.
    StepFailed(String),
    /// Failure that ended the iteration.
    Error(String),
}

impl StepStatus {
    pub fn is_pass(&self) -> bool {
        matches!(
            self,
            StepStatus::Success
                | StepStatus::Clicked
                | StepStatus::Input(_)
                | StepStatus::Selected(_)
                | StepStatus::Scrolled { .. }
        )
    }

    /// Notification override: any notification mentioning "success"
    /// (case-insensitive) passes the step, any other notification fails it,
    /// and no notification keeps the current verdict.
    pub fn with_notifications(self, notifications: &[String]) -> Self {
        if notifications.is_empty() {
            self
        } else if notifications
            .iter()
            .any(|n| n.to_lowercase().contains("success"))
        {
            StepStatus::Success
        } else {
            StepStatus::Failed
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Success => f.write_str("Success"),
            StepStatus::NoAccess => f.write_str("No Access"),
            StepStatus::Failed => f.write_str("Failed"),
            StepStatus::Clicked => f.write_str("Clicked"),
            StepStatus::Input(value) => write!(f, "Input '{}'", value),
            StepStatus::Selected(text) => write!(f, "Selected '{}'", text),
            StepStatus::DropdownItemNotFound => f.write_str("Dropdown item not found"),
            StepStatus::Scrolled { x, y } => write!(f, "Scrolled to ({}, {})", x, y),
            StepStatus::StepFailed(reason) => write!(f, "Failed: {}", reason),
            StepStatus::Error(reason) => write!(f, "{}{}", ERROR_PREFIX, reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_substring_is_case_insensitive() {
        let notes = vec!["Saved SUCCESSFULLY".to_string()];
        assert_eq!(
            StepStatus::NoAccess.with_notifications(&notes),
            StepStatus::Success
        );
    }

    #[test]
    fn test_other_notification_fails_step() {
        let notes = vec!["Email is required".to_string()];
        assert_eq!(
            StepStatus::Clicked.with_notifications(&notes),
            StepStatus::Failed
        );
    }

    #[test]
    fn test_no_notification_keeps_verdict() {
        assert_eq!(
            StepStatus::NoAccess.with_notifications(&[]),
            StepStatus::NoAccess
        );
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(StepStatus::Input("Bob".into()).to_string(), "Input 'Bob'");
        assert_eq!(
            StepStatus::Scrolled { x: 0, y: 120 }.to_string(),
            "Scrolled to (0, 120)"
        );
        assert_eq!(
            StepStatus::Error("boom".into()).to_string(),
            "Error: boom"
        );
        assert!(!StepStatus::DropdownItemNotFound.is_pass());
    }
}
