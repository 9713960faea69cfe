// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Dependency resolution for freshly created extensions.
//!
//! Factories receive an [`InjectionContext`] and pull their collaborators
//! from it. Behind the typed accessors sits the `ExtensionFactory` point:
//! a composite of the `spi` factory (adaptive instances of other points)
//! and the `container` factory (externally managed objects).

use std::sync::Arc;

use super::{ErasedExtension, ExtensionError, ExtensionPoint, ExtensionRegistry, ImplSpec};

pub trait ExtensionFactory: Send + Sync {
    /// Resolve an object by point name and/or instance name. Either key may
    /// be empty depending on the factory.
    fn get_object(
        &self,
        registry: &Arc<ExtensionRegistry>,
        point_name: &str,
        name: &str,
    ) -> Option<ErasedExtension>;
}

impl ExtensionPoint for dyn ExtensionFactory {
    const NAME: &'static str = "relay.common.ExtensionFactory";
    const DEFAULT: Option<&'static str> = None;
}

/// Handed to every extension factory during instantiation.
pub struct InjectionContext<'a> {
    registry: &'a Arc<ExtensionRegistry>,
}

impl<'a> InjectionContext<'a> {
    pub(super) fn new(registry: &'a Arc<ExtensionRegistry>) -> Self {
        InjectionContext { registry }
    }

    pub fn registry(&self) -> Arc<ExtensionRegistry> {
        self.registry.clone()
    }

    pub fn extension<T: ExtensionPoint + ?Sized>(
        &self,
        name: &str,
    ) -> Result<Arc<T>, ExtensionError> {
        self.registry.get_extension::<T>(name)
    }

    pub fn default_extension<T: ExtensionPoint + ?Sized>(&self) -> Result<Arc<T>, ExtensionError> {
        self.registry.get_default_extension::<T>()
    }

    pub fn adaptive<T: ExtensionPoint + ?Sized>(&self) -> Result<Arc<T>, ExtensionError> {
        self.registry.get_adaptive_extension::<T>()
    }

    /// Resolve a container-managed object by name through the composite
    /// object factory.
    pub fn object<O: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Option<Arc<O>> {
        let erased = self.raw_object("", name)?;
        erased.downcast::<Arc<O>>().ok().map(|a| (*a).clone())
    }

    /// Resolve another point's adaptive instance by point name through the
    /// composite object factory.
    pub fn raw_object(&self, point_name: &str, name: &str) -> Option<ErasedExtension> {
        let composite = self
            .registry
            .get_adaptive_extension::<dyn ExtensionFactory>()
            .ok()?;
        composite.get_object(self.registry, point_name, name)
    }
}

/// Serves adaptive instances of other extension points.
struct SpiExtensionFactory;

impl ExtensionFactory for SpiExtensionFactory {
    fn get_object(
        &self,
        registry: &Arc<ExtensionRegistry>,
        point_name: &str,
        _name: &str,
    ) -> Option<ErasedExtension> {
        if point_name.is_empty() {
            return None;
        }
        registry.point_adaptive(point_name)?.ok()
    }
}

/// Serves objects published with `ExtensionRegistry::register_object`.
struct ContainerExtensionFactory;

impl ExtensionFactory for ContainerExtensionFactory {
    fn get_object(
        &self,
        registry: &Arc<ExtensionRegistry>,
        _point_name: &str,
        name: &str,
    ) -> Option<ErasedExtension> {
        if name.is_empty() {
            return None;
        }
        registry.container_object(name)
    }
}

/// The composite: probes every named factory in descriptor order.
struct AdaptiveExtensionFactory {
    factories: Vec<Arc<dyn ExtensionFactory>>,
}

impl ExtensionFactory for AdaptiveExtensionFactory {
    fn get_object(
        &self,
        registry: &Arc<ExtensionRegistry>,
        point_name: &str,
        name: &str,
    ) -> Option<ErasedExtension> {
        self.factories
            .iter()
            .find_map(|f| f.get_object(registry, point_name, name))
    }
}

const DESCRIPTOR: &str = "\
spi=relay.common.SpiExtensionFactory
container=relay.common.ContainerExtensionFactory
relay.common.AdaptiveExtensionFactory
";

pub(super) fn install(registry: &Arc<ExtensionRegistry>) {
    registry.register_impl::<dyn ExtensionFactory>(ImplSpec::<dyn ExtensionFactory>::normal(
        "relay.common.SpiExtensionFactory",
        |_| Ok(Arc::new(SpiExtensionFactory)),
    ));
    registry.register_impl::<dyn ExtensionFactory>(ImplSpec::<dyn ExtensionFactory>::normal(
        "relay.common.ContainerExtensionFactory",
        |_| Ok(Arc::new(ContainerExtensionFactory)),
    ));
    registry.register_impl::<dyn ExtensionFactory>(ImplSpec::<dyn ExtensionFactory>::adaptive(
        "relay.common.AdaptiveExtensionFactory",
        |ctx| {
            let registry = ctx.registry();
            let mut factories = Vec::new();
            for name in registry.supported_extensions::<dyn ExtensionFactory>() {
                factories.push(registry.get_extension::<dyn ExtensionFactory>(&name)?);
            }
            Ok(Arc::new(AdaptiveExtensionFactory { factories }))
        },
    ));
    registry.register_descriptor::<dyn ExtensionFactory>(DESCRIPTOR);
}
