// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use serde_json::Value;

/// Reserved method answered by the echo filter without reaching the service.
pub const ECHO_METHOD: &str = "$echo";

/// One call: method, ordered parameter type names, ordered arguments and
/// string attachments. Immutable for the duration of a call; filters that
/// need to add attachments clone it first.
#[derive(Clone, Debug, Default)]
pub struct Invocation {
    method: String,
    parameter_types: Vec<String>,
    arguments: Vec<Value>,
    attachments: HashMap<String, String>,
}

impl Invocation {
    pub fn new(method: impl Into<String>) -> Self {
        Invocation {
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_argument(mut self, parameter_type: impl Into<String>, value: Value) -> Self {
        self.parameter_types.push(parameter_type.into());
        self.arguments.push(value);
        self
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn attachments(&self) -> &HashMap<String, String> {
        &self.attachments
    }

    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }
}
