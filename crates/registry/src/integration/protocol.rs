// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! `RegistryProtocol`: the registry-driven orchestration of exports and
//! references.
//!
//! Provider side: export the invocable target through the transport
//! protocol, register the simplified URL, subscribe to override rules and
//! re-export on change. Consumer side: build a [`RegistryDirectory`], keep
//! it reconciled against the registry and fold it into one invoker through
//! the cluster strategy.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use relay_cluster::configurator::{configure_url, to_configurators, Configurator};
use relay_cluster::{Cluster, Directory};
use relay_common::constants::{
    ANY_VALUE, APPLICATION_KEY, CATEGORY_KEY, CHECK_KEY, CLUSTER_KEY, CODEC_KEY,
    COMMA_SEPARATOR, CONFIGURATORS_CATEGORY, CONNECTIONS_KEY, CONSUMERS_CATEGORY,
    CONSUMER_PROTOCOL, DEFAULT_CLUSTER, DEFAULT_REGISTRY, DEPRECATED_KEY, DYNAMIC_KEY,
    EMPTY_PROTOCOL, ENABLED_KEY, EXPORT_KEY, EXTRA_KEYS_KEY, GROUP_KEY, HIDE_KEY_PREFIX,
    INTERFACE_KEY, LOADBALANCE_KEY, MERGEABLE_CLUSTER, METHODS_KEY, MOCK_KEY,
    PROVIDERS_CATEGORY, PROVIDER_PROTOCOL, REFER_KEY, REGISTER_IP_KEY, REGISTER_KEY,
    REGISTRY_KEY, REGISTRY_PROTOCOL, REGISTRY_SERVICE_INTERFACE, RELEASE_KEY, ROUTERS_CATEGORY,
    SERIALIZATION_KEY, SHUTDOWN_TIMEOUT_KEY, SIMPLIFIED_KEY, SIMPLIFY_EXCLUDE_KEY,
    TIMEOUT_KEY, TIMESTAMP_KEY, TOKEN_KEY, VERSION_KEY, WARMUP_KEY, WEIGHT_KEY,
};
use relay_common::url::{is_match, parse_query};
use relay_common::{ExtensionRegistry, Url};
use relay_rpc::invoker::DelegateInvoker;
use relay_rpc::{Exporter, Invocation, Invoker, Protocol, RpcError, RpcResult};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::dynamic::{ConfigurationListener, DynamicConfiguration};
use crate::integration::directory::RegistryDirectory;
use crate::integration::listeners::{ProviderConfigurationListener, ServiceConfigurationListener};
use crate::traits::{NotifyListener, Registry, RegistryManager};

/// Infrastructure keys never persisted in the naming service. The registry
/// URL's `simplify.exclude` parameter extends this set.
pub const DEFAULT_EXCLUDED_KEYS: [&str; 9] = [
    "monitor",
    "bind.ip",
    "bind.port",
    "qos.enable",
    "qos.host",
    "qos.port",
    "qos.accept.foreign.ip",
    "validation",
    "interfaces",
];

/// Allow-list applied to provider URLs when the registry requests
/// simplified registration.
pub const DEFAULT_REGISTER_PROVIDER_KEYS: [&str; 18] = [
    APPLICATION_KEY,
    CODEC_KEY,
    "exchanger",
    SERIALIZATION_KEY,
    CLUSTER_KEY,
    CONNECTIONS_KEY,
    DEPRECATED_KEY,
    GROUP_KEY,
    LOADBALANCE_KEY,
    MOCK_KEY,
    "path",
    TIMEOUT_KEY,
    TOKEN_KEY,
    VERSION_KEY,
    WARMUP_KEY,
    WEIGHT_KEY,
    TIMESTAMP_KEY,
    RELEASE_KEY,
];

/// Allow-list for simplified consumer registration.
pub const DEFAULT_REGISTER_CONSUMER_KEYS: [&str; 5] = [
    APPLICATION_KEY,
    VERSION_KEY,
    GROUP_KEY,
    RELEASE_KEY,
    INTERFACE_KEY,
];

/// Rewrite `registry://…?registry=<backend>` to `<backend>://…`.
pub fn registry_url_of(url: &Url) -> Url {
    if url.protocol() == REGISTRY_PROTOCOL {
        let backend = url.parameter_or(REGISTRY_KEY, DEFAULT_REGISTRY).to_string();
        url.with_protocol(backend).without_parameter(REGISTRY_KEY)
    } else {
        url.clone()
    }
}

/// Decode the provider URL carried in the origin's `export` parameter.
pub fn provider_url_of(origin_url: &Url) -> Result<Url, RpcError> {
    let export = origin_url
        .parameter_decoded(EXPORT_KEY)?
        .filter(|e| !e.is_empty())
        .ok_or_else(|| {
            RpcError::ExportFailed(format!("registry export url missing on {origin_url}"))
        })?;
    Ok(Url::parse(&export)?)
}

/// The `bounds` cache key: the provider URL without its volatile
/// `dynamic`/`enabled` switches, in canonical string form.
pub fn cache_key_of(provider_url: &Url) -> String {
    provider_url
        .without_parameters([DYNAMIC_KEY, ENABLED_KEY])
        .to_string()
}

fn subscribed_override_url(provider_url: &Url) -> Url {
    provider_url
        .with_protocol(PROVIDER_PROTOCOL)
        .with_parameters([(CATEGORY_KEY, CONFIGURATORS_CATEGORY), (CHECK_KEY, "false")])
}

/// Simplify a provider URL for persistence: hidden (`.`-prefixed) keys and
/// the infrastructure exclusion set are dropped; under `simplified=true`
/// only the declared allow-list (plus `extra.keys`) survives.
pub fn registered_provider_url(provider_url: &Url, registry_url: &Url) -> Url {
    if !registry_url.bool_parameter(SIMPLIFIED_KEY, false) {
        let hidden: Vec<String> = provider_url
            .parameters()
            .keys()
            .filter(|k| k.starts_with(HIDE_KEY_PREFIX))
            .cloned()
            .collect();
        let mut url = provider_url.without_parameters(hidden.iter().map(String::as_str));
        url = url.without_parameters(DEFAULT_EXCLUDED_KEYS);
        if let Some(extra) = registry_url.parameter(SIMPLIFY_EXCLUDE_KEY) {
            url = url.without_parameters(extra.split(COMMA_SEPARATOR).filter(|s| !s.is_empty()));
        }
        url
    } else {
        let mut keep: Vec<&str> = DEFAULT_REGISTER_PROVIDER_KEYS.to_vec();
        keep.push(METHODS_KEY);
        let extra = registry_url.parameter_or(EXTRA_KEYS_KEY, "");
        keep.extend(extra.split(COMMA_SEPARATOR).filter(|s| !s.is_empty()));
        // keep the interface key when the path is an alias, so the registry
        // tree stays keyed by interface
        if provider_url.path() != provider_url.parameter_or(INTERFACE_KEY, "") {
            keep.push(INTERFACE_KEY);
        }
        provider_url.retain_parameters(keep)
    }
}

/// Simplified consumer URL registered under `category=consumers`.
pub fn registered_consumer_url(consumer_url: &Url, registry_url: &Url) -> Url {
    let base = if registry_url.bool_parameter(SIMPLIFIED_KEY, false) {
        consumer_url.retain_parameters(DEFAULT_REGISTER_CONSUMER_KEYS)
    } else {
        consumer_url.clone()
    };
    base.with_parameters([(CATEGORY_KEY, CONSUMERS_CATEGORY), (CHECK_KEY, "false")])
}

pub struct RegistryProtocol {
    pub(crate) extensions: Arc<ExtensionRegistry>,
    pub(crate) manager: Arc<RegistryManager>,
    pub(crate) dynamic: Arc<dyn DynamicConfiguration>,
    application: String,
    /// Cache-key → live export; compute-if-absent under the async lock so
    /// local export runs at most once per key.
    pub(crate) bounds: tokio::sync::Mutex<HashMap<String, Arc<ExporterChangeableWrapper>>>,
    pub(crate) override_listeners: Mutex<HashMap<Url, Arc<OverrideListener>>>,
    pub(crate) service_listeners: Mutex<HashMap<String, Arc<ServiceConfigurationListener>>>,
    provider_listener: RwLock<Option<Arc<ProviderConfigurationListener>>>,
    weak: Weak<RegistryProtocol>,
}

impl RegistryProtocol {
    pub fn new(
        extensions: Arc<ExtensionRegistry>,
        application: impl Into<String>,
        dynamic: Arc<dyn DynamicConfiguration>,
    ) -> Arc<Self> {
        let application = application.into();
        let this = Arc::new_cyclic(|weak| RegistryProtocol {
            extensions: extensions.clone(),
            manager: Arc::new(RegistryManager::new(extensions)),
            dynamic: dynamic.clone(),
            application: application.clone(),
            bounds: tokio::sync::Mutex::new(HashMap::new()),
            override_listeners: Mutex::new(HashMap::new()),
            service_listeners: Mutex::new(HashMap::new()),
            provider_listener: RwLock::new(None),
            weak: weak.clone(),
        });
        let listener =
            ProviderConfigurationListener::new(Arc::downgrade(&this), &dynamic, &application);
        dynamic.add_listener(listener.key(), listener.clone());
        *this.provider_listener.write() = Some(listener);
        this
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub(crate) fn override_listeners(&self) -> Vec<Arc<OverrideListener>> {
        self.override_listeners.lock().values().cloned().collect()
    }

    /// The filter-wrapped transport protocol, dispatched per URL scheme.
    fn transport(&self) -> Result<Arc<dyn Protocol>, RpcError> {
        Ok(self.extensions.get_adaptive_extension::<dyn Protocol>()?)
    }

    fn configure_with_provider_listener(&self, url: Url) -> Url {
        match self.provider_listener.read().as_ref() {
            Some(listener) => listener.configure(url),
            None => url,
        }
    }

    fn configure_with_service_listener(&self, service_key: &str, url: Url) -> Url {
        match self.service_listeners.lock().get(service_key) {
            Some(listener) => listener.configure(url),
            None => url,
        }
    }

    /// Merge the two dynamic-config levels into the provider URL and set up
    /// the per-service listener.
    fn override_url_with_config(
        &self,
        provider_url: Url,
        listener: &Arc<OverrideListener>,
    ) -> Url {
        let provider_url = self.configure_with_provider_listener(provider_url);
        let service_key = provider_url.service_key();
        let service_listener =
            ServiceConfigurationListener::new(&self.dynamic, &service_key, listener);
        self.dynamic
            .add_listener(service_listener.key(), service_listener.clone());
        self.service_listeners
            .lock()
            .insert(service_key, service_listener.clone());
        service_listener.configure(provider_url)
    }

    async fn do_local_export(
        self: &Arc<Self>,
        origin: &Arc<dyn Invoker>,
        provider_url: &Url,
    ) -> Result<Arc<ExporterChangeableWrapper>, RpcError> {
        // keyed by the origin's provider url so re-export and unexport find
        // the same entry regardless of applied overrides
        let key = cache_key_of(&provider_url_of(&origin.url())?);
        let mut bounds = self.bounds.lock().await;
        if let Some(existing) = bounds.get(&key) {
            return Ok(existing.clone());
        }
        let delegate: Arc<dyn Invoker> =
            Arc::new(DelegateInvoker::new(origin.clone(), provider_url.clone()));
        let exporter = self.transport()?.export(delegate).await?;
        let wrapper = Arc::new(ExporterChangeableWrapper {
            protocol: Arc::downgrade(self),
            origin: origin.clone(),
            cache_key: key.clone(),
            exporter: RwLock::new(exporter),
            register_url: RwLock::new(None),
            subscribe_url: RwLock::new(None),
            registered: AtomicBool::new(false),
            unexported: AtomicBool::new(false),
        });
        bounds.insert(key, wrapper.clone());
        Ok(wrapper)
    }

    pub(crate) async fn export_inner(
        self: &Arc<Self>,
        origin: Arc<dyn Invoker>,
    ) -> Result<Arc<dyn Exporter>, RpcError> {
        let origin_url = origin.url();
        let registry_url = registry_url_of(&origin_url);
        let provider_url = provider_url_of(&origin_url)?;
        let override_subscribe_url = subscribed_override_url(&provider_url);

        let override_listener = Arc::new(OverrideListener {
            protocol: self.weak.clone(),
            subscribe_url: override_subscribe_url.clone(),
            origin: origin.clone(),
            configurators: RwLock::new(Vec::new()),
            monitor: tokio::sync::Mutex::new(()),
        });
        self.override_listeners
            .lock()
            .insert(override_subscribe_url.clone(), override_listener.clone());

        let provider_url = self.override_url_with_config(provider_url, &override_listener);
        let wrapper = self.do_local_export(&origin, &provider_url).await?;

        let registry = self.manager.registry(&registry_url)?;
        let registered_url = registered_provider_url(&provider_url, &registry_url);
        if provider_url.bool_parameter(REGISTER_KEY, true) {
            registry.register(&registered_url).await?;
            wrapper.registered.store(true, Ordering::SeqCst);
        }
        // record before subscribing: the first notification is synchronous
        // and may re-export against these urls
        *wrapper.register_url.write() = Some(registered_url);
        *wrapper.subscribe_url.write() = Some(override_subscribe_url.clone());

        registry
            .subscribe(
                &override_subscribe_url,
                override_listener.clone() as Arc<dyn NotifyListener>,
            )
            .await?;
        info!(provider = %provider_url, "exported service through registry");

        // a fresh destroyable exporter per call, even on a bounds hit
        Ok(Arc::new(DestroyableExporter { wrapper }))
    }

    /// Swap the local export for `new_url`; touch the naming service only
    /// when the simplified form actually changed.
    pub(crate) async fn re_export(
        self: &Arc<Self>,
        origin: &Arc<dyn Invoker>,
        new_url: Url,
    ) -> Result<(), RpcError> {
        let origin_url = origin.url();
        let provider_url = provider_url_of(&origin_url)?;
        let key = cache_key_of(&provider_url);
        let wrapper = self.bounds.lock().await.get(&key).cloned();
        let Some(wrapper) = wrapper else {
            warn!(key = %key, "re-export requested but exporter is gone");
            return Ok(());
        };

        let delegate: Arc<dyn Invoker> =
            Arc::new(DelegateInvoker::new(origin.clone(), new_url.clone()));
        let exporter = self.transport()?.export(delegate).await?;
        *wrapper.exporter.write() = exporter;

        let registry_url = registry_url_of(&origin_url);
        let new_registered = registered_provider_url(&new_url, &registry_url);
        let old_registered = wrapper.register_url.read().clone();
        if wrapper.registered.load(Ordering::SeqCst)
            && old_registered.as_ref() != Some(&new_registered)
        {
            let registry = self.manager.registry(&registry_url)?;
            if let Some(old) = old_registered {
                if let Err(e) = registry.unregister(&old).await {
                    warn!(url = %old, error = %e, "failed to unregister replaced provider url");
                }
            }
            registry.register(&new_registered).await?;
            *wrapper.register_url.write() = Some(new_registered);
        }
        Ok(())
    }

    pub(crate) async fn refer_inner(
        self: &Arc<Self>,
        service: &str,
        url: &Url,
    ) -> Result<Arc<dyn Invoker>, RpcError> {
        let registry_url = registry_url_of(url);
        let registry = self.manager.registry(&registry_url)?;

        // escape hatch: a reference to the naming service itself
        if service == REGISTRY_SERVICE_INTERFACE {
            return Ok(Arc::new(RegistryServiceInvoker {
                registry,
                url: registry_url,
                destroyed: AtomicBool::new(false),
            }));
        }

        let refer_params: BTreeMap<String, String> = match registry_url
            .parameter_decoded(REFER_KEY)?
        {
            Some(query) => parse_query(&query),
            None => BTreeMap::new(),
        };

        // multi-group references aggregate; everything else picks by name
        let group = refer_params.get(GROUP_KEY).map(String::as_str).unwrap_or("");
        let cluster_name = if !group.is_empty()
            && (group.contains(COMMA_SEPARATOR) || group == ANY_VALUE)
        {
            MERGEABLE_CLUSTER
        } else {
            refer_params
                .get(CLUSTER_KEY)
                .map(String::as_str)
                .filter(|c| !c.is_empty())
                .unwrap_or(DEFAULT_CLUSTER)
        };
        let cluster = self.extensions.get_extension::<dyn Cluster>(cluster_name)?;
        self.do_refer(cluster, registry, service, &registry_url, refer_params)
            .await
    }

    async fn do_refer(
        self: &Arc<Self>,
        cluster: Arc<dyn Cluster>,
        registry: Arc<dyn Registry>,
        service: &str,
        registry_url: &Url,
        mut refer_params: BTreeMap<String, String>,
    ) -> Result<Arc<dyn Invoker>, RpcError> {
        let register_ip = refer_params
            .remove(REGISTER_IP_KEY)
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let subscribe_url = Url::new(CONSUMER_PROTOCOL, register_ip, 0)
            .with_path(service)
            .with_parameters(refer_params.clone());

        let directory = RegistryDirectory::new(
            service,
            registry_url.clone(),
            refer_params,
            registry.clone(),
            self.transport()?,
            self.extensions.clone(),
        );

        if subscribe_url.service_interface() != ANY_VALUE
            && subscribe_url.bool_parameter(REGISTER_KEY, true)
        {
            let registered = registered_consumer_url(&subscribe_url, registry_url);
            directory.set_registered_consumer_url(registered.clone());
            registry.register(&registered).await?;
        }

        directory.build_router_chain(&subscribe_url)?;
        directory
            .subscribe(subscribe_url.with_parameter(
                CATEGORY_KEY,
                format!("{PROVIDERS_CATEGORY},{CONFIGURATORS_CATEGORY},{ROUTERS_CATEGORY}"),
            ))
            .await?;

        let invoker = cluster.join(directory as Arc<dyn Directory>)?;
        info!(service, "referred service through registry");
        Ok(invoker)
    }
}

#[async_trait]
impl Protocol for RegistryProtocol {
    fn default_port(&self) -> u16 {
        9090
    }

    async fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Arc<dyn Exporter>, RpcError> {
        let this = self
            .weak
            .upgrade()
            .ok_or_else(|| RpcError::Destroyed("registry protocol".to_string()))?;
        this.export_inner(invoker).await
    }

    async fn refer(&self, service: &str, url: &Url) -> Result<Arc<dyn Invoker>, RpcError> {
        let this = self
            .weak
            .upgrade()
            .ok_or_else(|| RpcError::Destroyed("registry protocol".to_string()))?;
        this.refer_inner(service, url).await
    }

    async fn destroy(&self) {
        let wrappers: Vec<_> = self.bounds.lock().await.values().cloned().collect();
        for wrapper in wrappers {
            wrapper.unexport().await;
        }
        if let Some(listener) = self.provider_listener.write().take() {
            let key = listener.key().to_string();
            let listener: Arc<dyn ConfigurationListener> = listener;
            self.dynamic.remove_listener(&key, &listener);
        }
        self.manager.destroy().await;
    }
}

/// Subscription callback for override rules of one exported service.
///
/// Rebuilds the configurator list from the full notified set and recomputes
/// the effective provider URL from the *original* provider URL plus all
/// three configurator sources; only an actual change triggers re-export.
pub(crate) struct OverrideListener {
    protocol: Weak<RegistryProtocol>,
    subscribe_url: Url,
    origin: Arc<dyn Invoker>,
    configurators: RwLock<Vec<Arc<dyn Configurator>>>,
    /// Serializes bursts of notifications per subscription.
    monitor: tokio::sync::Mutex<()>,
}

impl OverrideListener {
    pub(crate) async fn do_override_if_necessary(&self) {
        let _serialized = self.monitor.lock().await;
        self.do_override_locked().await;
    }

    async fn do_override_locked(&self) {
        let Some(protocol) = self.protocol.upgrade() else {
            return;
        };
        let origin_url = match provider_url_of(&self.origin.url()) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "override ignored, origin has no provider url");
                return;
            }
        };
        let key = cache_key_of(&origin_url);
        let wrapper = protocol.bounds.lock().await.get(&key).cloned();
        let Some(wrapper) = wrapper else {
            warn!(key = %key, "override ignored, exporter should not be null");
            return;
        };

        let current_url = wrapper.exporter.read().invoker().url();
        // configurators are full sets, so overrides always recompute from
        // the original provider url, never from the current one
        let mut new_url = configure_url(&self.configurators.read(), origin_url.clone());
        new_url = protocol.configure_with_provider_listener(new_url);
        new_url = protocol.configure_with_service_listener(&origin_url.service_key(), new_url);

        if current_url != new_url {
            match protocol.re_export(&self.origin, new_url.clone()).await {
                Ok(()) => info!(
                    origin = %origin_url,
                    old = %current_url,
                    new = %new_url,
                    "exported provider url changed"
                ),
                Err(e) => error!(error = %e, "re-export failed"),
            }
        }
    }
}

#[async_trait]
impl NotifyListener for OverrideListener {
    async fn notify(&self, urls: Vec<Url>) {
        let _serialized = self.monitor.lock().await;
        let matched: Vec<Url> = urls
            .into_iter()
            .filter(|u| u.protocol() == EMPTY_PROTOCOL || is_match(&self.subscribe_url, u))
            .collect();
        if matched.is_empty() {
            return;
        }
        if let Some(configurators) = to_configurators(&matched) {
            *self.configurators.write() = configurators;
        }
        self.do_override_locked().await;
    }
}

/// Holds the current inner exporter for an origin invoker so a re-export
/// can swap it without touching the registration. `unexport` finishes the
/// registry bookkeeping before returning; only the configured drain delay
/// and the inner unexport run on a spawned task so they never block the
/// caller.
pub(crate) struct ExporterChangeableWrapper {
    protocol: Weak<RegistryProtocol>,
    origin: Arc<dyn Invoker>,
    cache_key: String,
    pub(crate) exporter: RwLock<Arc<dyn Exporter>>,
    pub(crate) register_url: RwLock<Option<Url>>,
    subscribe_url: RwLock<Option<Url>>,
    registered: AtomicBool,
    unexported: AtomicBool,
}

impl ExporterChangeableWrapper {
    async fn unexport(self: &Arc<Self>) {
        if self.unexported.swap(true, Ordering::SeqCst) {
            return;
        }
        let register_url = self.register_url.read().clone();
        let subscribe_url = self.subscribe_url.read().clone();
        let registered = self.registered.load(Ordering::SeqCst);
        let inner = self.exporter.read().clone();

        if let Some(protocol) = self.protocol.upgrade() {
            protocol.bounds.lock().await.remove(&self.cache_key);

            let registry_url = registry_url_of(&self.origin.url());
            match protocol.manager.registry(&registry_url) {
                Ok(registry) => {
                    if registered {
                        if let Some(url) = &register_url {
                            if let Err(e) = registry.unregister(url).await {
                                warn!(url = %url, error = %e, "failed to unregister on unexport");
                            }
                        }
                    }
                    if let Some(sub) = &subscribe_url {
                        let listener = protocol.override_listeners.lock().remove(sub);
                        if let Some(listener) = listener {
                            let listener: Arc<dyn NotifyListener> = listener;
                            if let Err(e) = registry.unsubscribe(sub, &listener).await {
                                warn!(url = %sub, error = %e, "failed to unsubscribe on unexport");
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "registry unreachable during unexport"),
            }

            if let Some(sub) = &subscribe_url {
                let service_key = sub.service_key();
                if let Some(listener) = protocol.service_listeners.lock().remove(&service_key) {
                    let rule_key = listener.key().to_string();
                    let listener: Arc<dyn ConfigurationListener> = listener;
                    protocol.dynamic.remove_listener(&rule_key, &listener);
                }
            }
        }

        let drain_ms = inner.invoker().url().u64_parameter(SHUTDOWN_TIMEOUT_KEY, 0);
        tokio::spawn(async move {
            if drain_ms > 0 {
                info!(timeout_ms = drain_ms, "waiting for consumers before unexport");
                tokio::time::sleep(Duration::from_millis(drain_ms)).await;
            }
            inner.unexport().await;
        });
    }
}

/// The object handed back to the exporting caller: a fresh instance per
/// export call, delegating to the shared changeable wrapper.
struct DestroyableExporter {
    wrapper: Arc<ExporterChangeableWrapper>,
}

#[async_trait]
impl Exporter for DestroyableExporter {
    fn invoker(&self) -> Arc<dyn Invoker> {
        self.wrapper.exporter.read().invoker()
    }

    async fn unexport(&self) {
        self.wrapper.unexport().await;
    }
}

/// Direct invoker over the registry itself, returned when the referred
/// interface is the naming service.
struct RegistryServiceInvoker {
    registry: Arc<dyn Registry>,
    url: Url,
    destroyed: AtomicBool,
}

impl RegistryServiceInvoker {
    fn argument_url(invocation: &Invocation) -> Result<Url, RpcError> {
        let raw = invocation
            .arguments()
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RpcError::Unsupported(format!(
                    "{} expects a url string argument",
                    invocation.method()
                ))
            })?;
        Ok(Url::parse(raw)?)
    }
}

#[async_trait]
impl Invoker for RegistryServiceInvoker {
    fn url(&self) -> Url {
        self.url.clone()
    }

    fn service(&self) -> &str {
        REGISTRY_SERVICE_INTERFACE
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire) && self.registry.is_available()
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult, RpcError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RpcError::Destroyed(REGISTRY_SERVICE_INTERFACE.to_string()));
        }
        match invocation.method() {
            "register" => {
                let url = Self::argument_url(invocation)?;
                self.registry.register(&url).await?;
                Ok(RpcResult::ok(Value::Null))
            }
            "unregister" => {
                let url = Self::argument_url(invocation)?;
                self.registry.unregister(&url).await?;
                Ok(RpcResult::ok(Value::Null))
            }
            other => Err(RpcError::Unsupported(format!(
                "registry service does not expose {other}"
            ))),
        }
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}
