// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Shared name resolution for adaptive dispatchers.
//!
//! An adaptive implementation picks the concrete extension per call by
//! probing URL parameters. The pseudo-key `protocol` reads the URL scheme
//! instead of a parameter.

use crate::url::Url;

use super::{ExtensionError, ExtensionPoint};

/// The key that resolves against the URL scheme rather than a parameter.
pub const PROTOCOL_KEY: &str = "protocol";

/// Resolve the extension name for an adaptive call: probe `keys` in order,
/// first non-empty wins, falling back to the point's default name.
pub fn resolve_name<T: ExtensionPoint + ?Sized>(
    url: &Url,
    keys: &[&str],
) -> Result<String, ExtensionError> {
    for key in keys {
        let value = if *key == PROTOCOL_KEY {
            url.protocol()
        } else {
            url.parameter(key).unwrap_or("")
        };
        if !value.is_empty() {
            return Ok(value.to_string());
        }
    }
    match T::DEFAULT {
        Some(default) => Ok(default.to_string()),
        None => Err(ExtensionError::AdaptiveKeyMissing {
            point: T::NAME.to_string(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
            url: url.to_string(),
        }),
    }
}
