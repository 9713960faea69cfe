// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Application-level settings, consumed from the object container under the
/// name `application`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name; keys the application-level configurator rule
    /// subscription.
    pub name: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        ApplicationConfig {
            name: "relay".to_string(),
        }
    }
}

impl ApplicationConfig {
    pub fn new(name: impl Into<String>) -> Self {
        ApplicationConfig { name: name.into() }
    }
}
