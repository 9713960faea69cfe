// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The consumer-side dynamic directory: continuously reconciled against the
//! registry's `providers`, `configurators` and `routers` categories.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use relay_cluster::configurator::{configure_url, is_configurator, to_configurators, Configurator};
use relay_cluster::{Directory, RouterChain};
use relay_common::constants::{EMPTY_PROTOCOL, ROUTERS_CATEGORY, ROUTE_PROTOCOL};
use relay_common::{ExtensionRegistry, Url};
use relay_rpc::{Invocation, Invoker, Protocol, RpcError};
use tracing::{debug, error, info, warn};

use crate::traits::{NotifyListener, Registry};

pub struct RegistryDirectory {
    service: String,
    /// The rewritten registry URL this directory was referred through.
    url: Url,
    /// Parameters of the consumer reference, merged over provider URLs.
    consumer_params: BTreeMap<String, String>,
    registry: Arc<dyn Registry>,
    protocol: Arc<dyn Protocol>,
    extensions: Arc<ExtensionRegistry>,
    router_chain: RwLock<Option<Arc<RouterChain>>>,
    /// Copy-on-write snapshot read by every call.
    invokers: RwLock<Arc<Vec<Arc<dyn Invoker>>>>,
    /// Merged-URL string → live invoker; guards reconciliation.
    invoker_map: tokio::sync::Mutex<HashMap<String, Arc<dyn Invoker>>>,
    configurators: RwLock<Vec<Arc<dyn Configurator>>>,
    /// Last notified provider list, re-merged when configurators or
    /// routers change without a provider notification.
    cached_provider_urls: RwLock<Vec<Url>>,
    subscribe_url: RwLock<Option<Url>>,
    registered_consumer_url: RwLock<Option<Url>>,
    forbidden: AtomicBool,
    destroyed: AtomicBool,
    weak: Weak<RegistryDirectory>,
}

impl RegistryDirectory {
    pub fn new(
        service: impl Into<String>,
        url: Url,
        consumer_params: BTreeMap<String, String>,
        registry: Arc<dyn Registry>,
        protocol: Arc<dyn Protocol>,
        extensions: Arc<ExtensionRegistry>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| RegistryDirectory {
            service: service.into(),
            url,
            consumer_params,
            registry,
            protocol,
            extensions,
            router_chain: RwLock::new(None),
            invokers: RwLock::new(Arc::new(Vec::new())),
            invoker_map: tokio::sync::Mutex::new(HashMap::new()),
            configurators: RwLock::new(Vec::new()),
            cached_provider_urls: RwLock::new(Vec::new()),
            subscribe_url: RwLock::new(None),
            registered_consumer_url: RwLock::new(None),
            forbidden: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            weak: weak.clone(),
        })
    }

    pub fn build_router_chain(&self, subscribe_url: &Url) -> Result<(), RpcError> {
        let chain = RouterChain::build(&self.extensions, subscribe_url)?;
        *self.router_chain.write() = Some(Arc::new(chain));
        Ok(())
    }

    pub fn set_registered_consumer_url(&self, url: Url) {
        *self.registered_consumer_url.write() = Some(url);
    }

    pub fn registered_consumer_url(&self) -> Option<Url> {
        self.registered_consumer_url.read().clone()
    }

    /// Subscribe this directory to the compound-category URL; the registry
    /// delivers the initial full set before this returns.
    pub async fn subscribe(self: &Arc<Self>, url: Url) -> Result<(), RpcError> {
        *self.subscribe_url.write() = Some(url.clone());
        self.registry
            .subscribe(&url, self.clone() as Arc<dyn NotifyListener>)
            .await?;
        Ok(())
    }

    /// Merge the consumer reference parameters over a provider URL, then
    /// apply the current configurators. Provider identity keys survive the
    /// merge untouched.
    fn merge_url(&self, provider: &Url) -> Url {
        use relay_common::constants::{GROUP_KEY, INTERFACE_KEY, VERSION_KEY};
        let merged = provider.with_parameters(
            self.consumer_params
                .iter()
                .filter(|(k, _)| {
                    k.as_str() != GROUP_KEY
                        && k.as_str() != VERSION_KEY
                        && k.as_str() != INTERFACE_KEY
                })
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        configure_url(&self.configurators.read(), merged)
    }

    /// Reconcile the live invoker set against a freshly notified provider
    /// list: reuse by merged URL, create the new, destroy the removed.
    async fn refresh_invokers(&self, provider_urls: Vec<Url>) {
        if provider_urls.len() == 1 && provider_urls[0].protocol() == EMPTY_PROTOCOL {
            info!(service = %self.service, "provider set is empty, forbidding access");
            self.forbidden.store(true, Ordering::SeqCst);
            let mut map = self.invoker_map.lock().await;
            for (_, invoker) in map.drain() {
                invoker.destroy();
            }
            *self.invokers.write() = Arc::new(Vec::new());
            return;
        }

        self.forbidden.store(false, Ordering::SeqCst);
        let mut map = self.invoker_map.lock().await;
        let mut next: HashMap<String, Arc<dyn Invoker>> = HashMap::new();
        let mut snapshot: Vec<Arc<dyn Invoker>> = Vec::new();
        for provider in &provider_urls {
            if provider.protocol() == EMPTY_PROTOCOL {
                continue;
            }
            let merged = self.merge_url(provider);
            let key = merged.to_string();
            if next.contains_key(&key) {
                continue;
            }
            let invoker = match map.remove(&key) {
                Some(existing) => existing,
                None => match self.protocol.refer(&self.service, &merged).await {
                    Ok(created) => {
                        debug!(service = %self.service, provider = %merged.address(), "created provider invoker");
                        created
                    }
                    Err(e) => {
                        error!(service = %self.service, url = %merged, error = %e, "failed to refer provider");
                        continue;
                    }
                },
            };
            snapshot.push(invoker.clone());
            next.insert(key, invoker);
        }

        // whatever is left in the old map has disappeared from the registry
        for (url, stale) in map.drain() {
            debug!(service = %self.service, url = %url, "destroying removed provider invoker");
            stale.destroy();
        }
        *map = next;
        *self.invokers.write() = Arc::new(snapshot);
    }
}

#[async_trait]
impl NotifyListener for RegistryDirectory {
    async fn notify(&self, urls: Vec<Url>) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }

        let mut configurator_urls = Vec::new();
        let mut router_urls = Vec::new();
        let mut provider_urls = Vec::new();
        for url in urls {
            if is_configurator(&url)
                || (url.protocol() == EMPTY_PROTOCOL
                    && url.category() == relay_common::constants::CONFIGURATORS_CATEGORY)
            {
                configurator_urls.push(url);
            } else if url.protocol() == ROUTE_PROTOCOL || url.category() == ROUTERS_CATEGORY {
                router_urls.push(url);
            } else {
                provider_urls.push(url);
            }
        }

        let mut reconfigured = false;
        if !configurator_urls.is_empty() {
            if let Some(configurators) = to_configurators(&configurator_urls) {
                *self.configurators.write() = configurators;
                reconfigured = true;
            }
        }
        if !router_urls.is_empty() {
            if let Some(chain) = self.router_chain.read().clone() {
                chain.set_router_urls(&self.extensions, &router_urls);
            }
        }
        if !provider_urls.is_empty() {
            *self.cached_provider_urls.write() = provider_urls.clone();
            self.refresh_invokers(provider_urls).await;
        } else if reconfigured {
            // re-merge the last known provider set under the new rules
            let cached = self.cached_provider_urls.read().clone();
            if !cached.is_empty() {
                self.refresh_invokers(cached).await;
            }
        }
    }
}

impl Directory for RegistryDirectory {
    fn url(&self) -> Url {
        self.url.clone()
    }

    fn service(&self) -> &str {
        &self.service
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire)
            && !self.forbidden.load(Ordering::Acquire)
            && self.invokers.read().iter().any(|i| i.is_available())
    }

    fn list(&self, invocation: &Invocation) -> Result<Vec<Arc<dyn Invoker>>, RpcError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RpcError::Destroyed(self.service.clone()));
        }
        if self.forbidden.load(Ordering::Acquire) {
            return Err(RpcError::NoProviders(self.service.clone()));
        }
        let snapshot: Vec<Arc<dyn Invoker>> = self.invokers.read().as_ref().clone();
        match self.router_chain.read().clone() {
            Some(chain) => Ok(chain.route(snapshot, invocation)),
            None => Ok(snapshot),
        }
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        // children are cut off synchronously; registry cleanup is remote
        let snapshot: Vec<Arc<dyn Invoker>> = self.invokers.read().as_ref().clone();
        for invoker in snapshot {
            invoker.destroy();
        }
        *self.invokers.write() = Arc::new(Vec::new());

        let registry = self.registry.clone();
        let registered = self.registered_consumer_url.read().clone();
        let subscribed = self.subscribe_url.read().clone();
        let service = self.service.clone();
        let listener = self.weak.upgrade();
        tokio::spawn(async move {
            if let Some(url) = registered {
                if let Err(e) = registry.unregister(&url).await {
                    warn!(service = %service, error = %e, "failed to unregister consumer url");
                }
            }
            if let (Some(url), Some(listener)) = (subscribed, listener) {
                let listener: Arc<dyn NotifyListener> = listener;
                if let Err(e) = registry.unsubscribe(&url, &listener).await {
                    warn!(service = %service, error = %e, "failed to unsubscribe consumer url");
                }
            }
        });
    }
}
