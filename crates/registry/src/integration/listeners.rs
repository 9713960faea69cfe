// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Two-level dynamic-configuration listeners feeding the provider export
//! pipeline: one application-wide listener per protocol instance plus one
//! per exported service.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use relay_cluster::configurator::{configure_url, to_configurators, Configurator};
use relay_common::constants::CONFIGURATORS_SUFFIX;
use relay_common::Url;
use tracing::{debug, warn};

use crate::dynamic::{
    ChangeType, ConfigChangeEvent, ConfigurationListener, DynamicConfiguration,
};
use crate::integration::protocol::{OverrideListener, RegistryProtocol};

/// Shared core of both listener kinds: parse the rule payload into
/// configurators and keep the current list.
pub(crate) struct ConfiguratorRuleHolder {
    key: String,
    configurators: RwLock<Vec<Arc<dyn Configurator>>>,
}

impl ConfiguratorRuleHolder {
    fn new(key: String, dynamic: &Arc<dyn DynamicConfiguration>) -> Self {
        let holder = ConfiguratorRuleHolder {
            key,
            configurators: RwLock::new(Vec::new()),
        };
        // seed from the rule already present, if any
        if let Some(content) = dynamic.get_rule(&holder.key) {
            holder.accept(&ConfigChangeEvent {
                key: holder.key.clone(),
                content: Some(content),
                change_type: ChangeType::Added,
            });
        }
        holder
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn configure(&self, url: Url) -> Url {
        configure_url(&self.configurators.read(), url)
    }

    fn accept(&self, event: &ConfigChangeEvent) {
        if event.change_type == ChangeType::Deleted {
            self.configurators.write().clear();
            return;
        }
        let mut urls = Vec::new();
        for line in event.content.as_deref().unwrap_or("").lines() {
            let line = match line.split_once('#') {
                Some((content, _)) => content,
                None => line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            match Url::parse(line) {
                Ok(url) => urls.push(url),
                Err(e) => warn!(key = %self.key, line, error = %e, "skipping malformed configurator rule"),
            }
        }
        let configurators = to_configurators(&urls).unwrap_or_default();
        debug!(key = %self.key, count = configurators.len(), "configurator rules updated");
        *self.configurators.write() = configurators;
    }
}

/// Application-level listener, keyed on `<application>.configurators`. On
/// change it re-runs the override path of every exported service.
pub(crate) struct ProviderConfigurationListener {
    holder: ConfiguratorRuleHolder,
    protocol: Weak<RegistryProtocol>,
}

impl ProviderConfigurationListener {
    pub(crate) fn new(
        protocol: Weak<RegistryProtocol>,
        dynamic: &Arc<dyn DynamicConfiguration>,
        application: &str,
    ) -> Arc<Self> {
        Arc::new(ProviderConfigurationListener {
            holder: ConfiguratorRuleHolder::new(
                format!("{application}{CONFIGURATORS_SUFFIX}"),
                dynamic,
            ),
            protocol,
        })
    }

    pub(crate) fn key(&self) -> &str {
        self.holder.key()
    }

    pub(crate) fn configure(&self, url: Url) -> Url {
        self.holder.configure(url)
    }
}

impl ConfigurationListener for ProviderConfigurationListener {
    fn process(&self, event: &ConfigChangeEvent) {
        self.holder.accept(event);
        let Some(protocol) = self.protocol.upgrade() else {
            return;
        };
        for listener in protocol.override_listeners() {
            tokio::spawn(async move { listener.do_override_if_necessary().await });
        }
    }
}

/// Per-service listener, keyed on `<serviceKey>.configurators`.
pub(crate) struct ServiceConfigurationListener {
    holder: ConfiguratorRuleHolder,
    override_listener: Weak<OverrideListener>,
}

impl ServiceConfigurationListener {
    pub(crate) fn new(
        dynamic: &Arc<dyn DynamicConfiguration>,
        service_key: &str,
        override_listener: &Arc<OverrideListener>,
    ) -> Arc<Self> {
        Arc::new(ServiceConfigurationListener {
            holder: ConfiguratorRuleHolder::new(
                format!("{service_key}{CONFIGURATORS_SUFFIX}"),
                dynamic,
            ),
            override_listener: Arc::downgrade(override_listener),
        })
    }

    pub(crate) fn key(&self) -> &str {
        self.holder.key()
    }

    pub(crate) fn configure(&self, url: Url) -> Url {
        self.holder.configure(url)
    }
}

impl ConfigurationListener for ServiceConfigurationListener {
    fn process(&self, event: &ConfigChangeEvent) {
        self.holder.accept(event);
        if let Some(listener) = self.override_listener.upgrade() {
            tokio::spawn(async move { listener.do_override_if_necessary().await });
        }
    }
}
