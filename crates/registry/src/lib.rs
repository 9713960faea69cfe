// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod dynamic;
pub mod errors;
pub mod failback;
pub mod integration;
pub mod memory;
pub mod traits;

pub use config::ApplicationConfig;
pub use errors::RegistryError;
pub use integration::{RegistryDirectory, RegistryProtocol};
pub use traits::{NotifyListener, Registry, RegistryFactory, RegistryManager};

use std::sync::Arc;

use relay_common::extension::ImplSpec;
use relay_common::ExtensionRegistry;
use relay_rpc::Protocol;

use dynamic::{DynamicConfiguration, InMemoryDynamicConfiguration};

/// Container object name of the application settings.
pub const APPLICATION_OBJECT: &str = "application";
/// Container object name of the dynamic-configuration store.
pub const DYNAMIC_CONFIGURATION_OBJECT: &str = "dynamic-configuration";

const PROTOCOL_DESCRIPTOR: &str = "registry=relay.registry.RegistryProtocol\n";
const REGISTRY_FACTORY_DESCRIPTOR: &str = "memory=relay.registry.MemoryRegistryFactory\n";

/// Register this crate's extension implementations and descriptors.
pub fn install(registry: &Arc<ExtensionRegistry>) {
    registry.register_impl::<dyn Protocol>(ImplSpec::<dyn Protocol>::normal(
        "relay.registry.RegistryProtocol",
        |ctx| {
            let application = ctx
                .object::<ApplicationConfig>(APPLICATION_OBJECT)
                .map(|config| config.name.clone())
                .unwrap_or_else(|| ApplicationConfig::default().name);
            let dynamic = ctx
                .object::<dyn DynamicConfiguration>(DYNAMIC_CONFIGURATION_OBJECT)
                .unwrap_or_else(|| Arc::new(InMemoryDynamicConfiguration::new()));
            Ok(RegistryProtocol::new(ctx.registry(), application, dynamic))
        },
    ));
    registry.register_descriptor::<dyn Protocol>(PROTOCOL_DESCRIPTOR);

    registry.register_impl::<dyn RegistryFactory>(ImplSpec::<dyn RegistryFactory>::normal(
        "relay.registry.MemoryRegistryFactory",
        |_| Ok(Arc::new(memory::MemoryRegistryFactory)),
    ));
    registry.register_descriptor::<dyn RegistryFactory>(REGISTRY_FACTORY_DESCRIPTOR);
}

/// Build an extension registry with the whole framework stack installed.
pub fn bootstrap() -> Arc<ExtensionRegistry> {
    let registry = ExtensionRegistry::new();
    relay_rpc::install(&registry);
    relay_cluster::install(&registry);
    install(&registry);
    registry
}
