// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The registry facade: abstract register/unregister/subscribe/unsubscribe
//! over a concrete naming backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_common::extension::{adaptive, ExtensionPoint};
use relay_common::{ExtensionRegistry, Url};

use crate::errors::RegistryError;

/// Subscription callback. Every delivery carries the full current set for
/// the subscribed URL, never a delta; the empty set is represented by a
/// single `empty://` placeholder.
#[async_trait]
pub trait NotifyListener: Send + Sync {
    async fn notify(&self, urls: Vec<Url>);
}

#[async_trait]
pub trait Registry: Send + Sync {
    fn url(&self) -> &Url;

    fn is_available(&self) -> bool;

    /// Idempotent: re-registering the same URL is a no-op.
    async fn register(&self, url: &Url) -> Result<(), RegistryError>;

    async fn unregister(&self, url: &Url) -> Result<(), RegistryError>;

    /// Subscribing triggers exactly one synchronous notification with the
    /// current set, then one per change.
    async fn subscribe(
        &self,
        url: &Url,
        listener: Arc<dyn NotifyListener>,
    ) -> Result<(), RegistryError>;

    async fn unsubscribe(
        &self,
        url: &Url,
        listener: &Arc<dyn NotifyListener>,
    ) -> Result<(), RegistryError>;

    async fn destroy(&self);
}

/// Produces a registry for a backend URL. Selected by URL scheme.
pub trait RegistryFactory: Send + Sync {
    fn create(&self, url: &Url) -> Result<Arc<dyn Registry>, RegistryError>;
}

impl ExtensionPoint for dyn RegistryFactory {
    const NAME: &'static str = "relay.registry.RegistryFactory";
    const DEFAULT: Option<&'static str> = Some(relay_common::constants::DEFAULT_REGISTRY);
}

/// Deduplicates registries by connection identity so every component
/// talking to the same backend shares one client.
pub struct RegistryManager {
    extensions: Arc<ExtensionRegistry>,
    cache: Mutex<HashMap<String, Arc<dyn Registry>>>,
}

impl RegistryManager {
    pub fn new(extensions: Arc<ExtensionRegistry>) -> Self {
        RegistryManager {
            extensions,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self, url: &Url) -> Result<Arc<dyn Registry>, RegistryError> {
        let key = url.connection_key();
        let mut cache = self.cache.lock();
        if let Some(registry) = cache.get(&key) {
            return Ok(registry.clone());
        }
        let name = adaptive::resolve_name::<dyn RegistryFactory>(url, &[adaptive::PROTOCOL_KEY])?;
        let factory = self.extensions.get_extension::<dyn RegistryFactory>(&name)?;
        let registry = factory.create(url)?;
        cache.insert(key, registry.clone());
        Ok(registry)
    }

    pub async fn destroy(&self) {
        let registries: Vec<_> = self.cache.lock().drain().map(|(_, r)| r).collect();
        for registry in registries {
            registry.destroy().await;
        }
    }
}
