// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use serde_json::Value;

use crate::errors::RpcError;

/// The completed outcome of one invocation.
///
/// A completed-error result (`outcome` is `Err`) is distinct from a
/// synchronous invoke failure: the former travels through completion
/// callbacks, the latter is reported to the throwing filter's error hook and
/// propagated as `Err` from `invoke`.
#[derive(Debug)]
pub struct RpcResult {
    outcome: Result<Value, RpcError>,
    attachments: HashMap<String, String>,
}

impl RpcResult {
    pub fn ok(value: Value) -> Self {
        RpcResult {
            outcome: Ok(value),
            attachments: HashMap::new(),
        }
    }

    pub fn error(error: RpcError) -> Self {
        RpcResult {
            outcome: Err(error),
            attachments: HashMap::new(),
        }
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn outcome(&self) -> Result<&Value, &RpcError> {
        self.outcome.as_ref()
    }

    pub fn value(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn exception(&self) -> Option<&RpcError> {
        self.outcome.as_ref().err()
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn attachments(&self) -> &HashMap<String, String> {
        &self.attachments
    }

    pub fn into_value(self) -> Result<Value, RpcError> {
        self.outcome
    }
}
