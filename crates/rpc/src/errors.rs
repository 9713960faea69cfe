// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use relay_common::extension::ExtensionError;
use relay_common::url::UrlError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    // Wiring errors, fatal at export/refer time
    #[error(transparent)]
    Extension(#[from] ExtensionError),
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error("protocol export failed: {0}")]
    ExportFailed(String),

    // Registry transport surfaced to export/refer callers
    #[error("registry operation failed: {0}")]
    Registry(String),

    // Per-call outcomes
    #[error("remote invocation failed: {0}")]
    Remote(String),
    #[error("invocation timed out: {0}")]
    Timeout(String),
    #[error("no providers available for service {0}")]
    NoProviders(String),
    #[error("business error: {0}")]
    Business(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("already destroyed: {0}")]
    Destroyed(String),
}

impl RpcError {
    /// Business errors originate in the service itself; fault-tolerance
    /// strategies must not retry them.
    pub fn is_business(&self) -> bool {
        matches!(self, RpcError::Business(_))
    }
}
