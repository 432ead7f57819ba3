//! Free functions bound to the thread's current operator.
//!
//! Each function looks up the innermost operator installed with
//! [`operator_context`](crate::operator::operator_context) and fails with
//! [`RunbookError::NoOperatorFound`] outside of one. Steps that hold an
//! `&Operator` can call the methods directly instead.

use gcpdiag_types::{PromptRequest, PromptResponse, Resource};
use serde_json::Value;

use crate::{
    error::RunbookError,
    operator::{ActiveStep, current_operator},
    step::Step,
};

pub fn get(key: &str) -> Result<Option<Value>, RunbookError> {
    Ok(current_operator()?.get(key))
}

pub fn get_str(key: &str) -> Result<Option<String>, RunbookError> {
    Ok(current_operator()?.get_str(key))
}

pub fn put(key: &str, value: impl Into<Value>) -> Result<(), RunbookError> {
    current_operator()?.put(key, value);
    Ok(())
}

pub fn project_id() -> Result<String, RunbookError> {
    Ok(current_operator()?.context().project_id.clone())
}

pub fn step() -> Result<Option<ActiveStep>, RunbookError> {
    Ok(current_operator()?.step())
}

pub fn add_ok(resource: &dyn Resource, reason: impl Into<String>) -> Result<(), RunbookError> {
    current_operator()?.add_ok(resource, reason)
}

pub fn add_failed(resource: &dyn Resource, reason: impl Into<String>, remediation: impl Into<String>) -> Result<(), RunbookError> {
    current_operator()?.add_failed(resource, reason, remediation)
}

pub fn add_uncertain(resource: &dyn Resource, reason: impl Into<String>, remediation: impl Into<String>) -> Result<(), RunbookError> {
    current_operator()?.add_uncertain(resource, reason, remediation)
}

pub fn add_skipped(resource: &dyn Resource, reason: impl Into<String>) -> Result<(), RunbookError> {
    current_operator()?.add_skipped(resource, reason)
}

pub fn add_child(child: impl Step + 'static) -> Result<(), RunbookError> {
    current_operator()?.add_child(child)
}

pub fn prompt(request: &PromptRequest) -> Result<PromptResponse, RunbookError> {
    current_operator()?.prompt(request)
}

pub fn info(message: &str) -> Result<(), RunbookError> {
    current_operator()?.info(message);
    Ok(())
}

pub fn prep_msg(block: &str, args: &[(&str, &str)]) -> Result<String, RunbookError> {
    current_operator()?.prep_msg(block, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_functions_fail_fast_without_an_operator() {
        assert!(matches!(get("project_id"), Err(RunbookError::NoOperatorFound)));
        assert!(matches!(info("hello"), Err(RunbookError::NoOperatorFound)));
        assert!(matches!(prep_msg("failure_reason", &[]), Err(RunbookError::NoOperatorFound)));
    }
}
