// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod constants;
pub mod extension;
pub mod url;

pub use extension::{ExtensionPoint, ExtensionRegistry};
pub use url::Url;
