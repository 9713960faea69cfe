// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The registry-driven protocol orchestration pipelines.

pub mod directory;
pub mod listeners;
pub mod protocol;

pub use directory::RegistryDirectory;
pub use protocol::RegistryProtocol;
