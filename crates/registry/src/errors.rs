// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use relay_common::extension::ExtensionError;
use relay_common::url::UrlError;
use relay_rpc::RpcError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    // Transport failures, recovered locally by failback
    #[error("registry unavailable: {0}")]
    Unavailable(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    // Wiring failures, fatal to the caller
    #[error(transparent)]
    InvalidUrl(#[from] UrlError),
    #[error(transparent)]
    Extension(#[from] ExtensionError),
    #[error("registry already destroyed")]
    Destroyed,
}

impl From<RegistryError> for RpcError {
    fn from(error: RegistryError) -> Self {
        RpcError::Registry(error.to_string())
    }
}
