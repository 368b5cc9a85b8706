//! Failure taxonomy of the step engine.

use thiserror::Error;

use crate::models::SelectorKind;

/// Errors raised while executing a step.
///
/// Only [`StepError::SessionFault`] escapes the step executor; the other
/// variants are recorded as step statuses.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// Selector matched nothing, or fewer elements than the occurrence index.
    #[error("No element found at index {index} for {kind}: {value}")]
    ElementNotFound {
        kind: SelectorKind,
        value: String,
        index: usize,
    },

    /// Expected text is absent from the page content.
    #[error("Assertion failed: '{expected}' not found in page")]
    AssertionMismatch { expected: String },

    /// The browser session is no longer usable.
    #[error("Browser session fault: {0}")]
    SessionFault(String),
}

impl StepError {
    pub fn fault(err: anyhow::Error) -> Self {
        StepError::SessionFault(format!("{:#}", err))
    }
}
