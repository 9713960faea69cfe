// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! In-process naming backend.
//!
//! One [`MemoryHub`] exists per registry connection identity and is shared
//! by every registry pointing at it, mirroring the shared-client ownership
//! of a remote backend. Entries are indexed by the naming-service encoding
//! `<category>:<interface>:<version>:<group>` (separator configurable) and
//! looked up with `*` wildcards. The hub supports fault injection so
//! failback behavior is testable.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_common::constants::{
    ANY_VALUE, CATEGORY_KEY, COMMA_SEPARATOR, DEFAULT_CATEGORY, GROUP_KEY,
    SERVICE_NAME_SEPARATOR_KEY, VERSION_KEY,
};
use relay_common::Url;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::RegistryError;
use crate::failback::{ChangeEvent, FailbackRegistry, NamingClient};
use crate::traits::{Registry, RegistryFactory};

const DEFAULT_SEPARATOR: &str = ":";

/// Naming-service level service identity with wildcard support.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceName {
    pub category: String,
    pub interface: String,
    pub version: String,
    pub group: String,
}

impl ServiceName {
    pub fn from_url(url: &Url) -> Self {
        ServiceName {
            category: crate::failback::category_of(url).to_string(),
            interface: url.service_interface().to_string(),
            version: url.parameter_or(VERSION_KEY, "").to_string(),
            group: url.parameter_or(GROUP_KEY, "").to_string(),
        }
    }

    pub fn encode(&self, separator: &str) -> String {
        [
            self.category.as_str(),
            self.interface.as_str(),
            self.version.as_str(),
            self.group.as_str(),
        ]
        .join(separator)
    }

    pub fn decode(encoded: &str, separator: &str) -> Option<Self> {
        let mut parts = encoded.splitn(4, separator);
        Some(ServiceName {
            category: parts.next()?.to_string(),
            interface: parts.next()?.to_string(),
            version: parts.next()?.to_string(),
            group: parts.next()?.to_string(),
        })
    }

    /// Wildcard match: `*` in interface, version or group of `self` (the
    /// pattern) matches anything; a comma-separated group pattern matches
    /// any of the listed groups.
    pub fn matches(&self, concrete: &ServiceName) -> bool {
        fn component(pattern: &str, value: &str) -> bool {
            pattern == ANY_VALUE || pattern == value
        }
        self.category == concrete.category
            && component(&self.interface, &concrete.interface)
            && component(&self.version, &concrete.version)
            && (component(&self.group, &concrete.group)
                || self
                    .group
                    .split(COMMA_SEPARATOR)
                    .any(|g| g == concrete.group))
    }
}

#[derive(Default)]
pub struct HubStats {
    pub registers: AtomicUsize,
    pub unregisters: AtomicUsize,
    pub subscribes: AtomicUsize,
}

struct Watcher {
    id: u64,
    subscriptions: HashSet<Url>,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

pub struct MemoryHub {
    separator: String,
    entries: Mutex<HashMap<String, HashSet<Url>>>,
    watchers: Mutex<Vec<Watcher>>,
    watcher_seq: AtomicU64,
    pub stats: HubStats,
    /// When set, every backend operation fails until cleared.
    faulted: AtomicBool,
}

fn hubs() -> &'static Mutex<HashMap<String, Arc<MemoryHub>>> {
    static HUBS: OnceLock<Mutex<HashMap<String, Arc<MemoryHub>>>> = OnceLock::new();
    HUBS.get_or_init(|| Mutex::new(HashMap::new()))
}

impl MemoryHub {
    /// The shared hub for a registry URL, deduplicated by connection
    /// identity.
    pub fn get(registry_url: &Url) -> Arc<MemoryHub> {
        let key = registry_url.connection_key();
        hubs()
            .lock()
            .entry(key)
            .or_insert_with(|| {
                Arc::new(MemoryHub {
                    separator: registry_url
                        .parameter_or(SERVICE_NAME_SEPARATOR_KEY, DEFAULT_SEPARATOR)
                        .to_string(),
                    entries: Mutex::new(HashMap::new()),
                    watchers: Mutex::new(Vec::new()),
                    watcher_seq: AtomicU64::new(0),
                    stats: HubStats::default(),
                    faulted: AtomicBool::new(false),
                })
            })
            .clone()
    }

    /// Inject or clear a backend fault.
    pub fn set_faulted(&self, faulted: bool) {
        self.faulted.store(faulted, Ordering::SeqCst);
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    /// Attach a new watcher, producing its naming client and change stream.
    pub fn attach(self: &Arc<Self>) -> (MemoryNamingClient, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.watcher_seq.fetch_add(1, Ordering::SeqCst);
        self.watchers.lock().push(Watcher {
            id,
            subscriptions: HashSet::new(),
            tx,
        });
        (
            MemoryNamingClient {
                hub: self.clone(),
                watcher_id: id,
            },
            rx,
        )
    }

    /// Every URL currently registered, across all services.
    pub fn registered_urls(&self) -> Vec<Url> {
        self.entries
            .lock()
            .values()
            .flat_map(|set| set.iter().cloned())
            .collect()
    }

    /// Every subscription currently established, across all watchers.
    pub fn subscriptions(&self) -> Vec<Url> {
        self.watchers
            .lock()
            .iter()
            .flat_map(|w| w.subscriptions.iter().cloned())
            .collect()
    }

    fn check_fault(&self) -> Result<(), RegistryError> {
        if self.is_faulted() {
            Err(RegistryError::Unavailable("memory hub faulted".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn register(&self, url: &Url) -> Result<(), RegistryError> {
        self.check_fault()?;
        let name = ServiceName::from_url(url).encode(&self.separator);
        self.entries
            .lock()
            .entry(name.clone())
            .or_default()
            .insert(url.clone());
        self.stats.registers.fetch_add(1, Ordering::SeqCst);
        debug!(service = %name, url = %url, "registered");
        self.broadcast(url);
        Ok(())
    }

    pub fn unregister(&self, url: &Url) -> Result<(), RegistryError> {
        self.check_fault()?;
        let name = ServiceName::from_url(url).encode(&self.separator);
        let mut entries = self.entries.lock();
        let emptied = match entries.get_mut(&name) {
            Some(set) => {
                set.remove(url);
                set.is_empty()
            }
            None => false,
        };
        if emptied {
            entries.remove(&name);
        }
        drop(entries);
        self.stats.unregisters.fetch_add(1, Ordering::SeqCst);
        debug!(service = %name, url = %url, "unregistered");
        self.broadcast(url);
        Ok(())
    }

    /// Full current set for a subscription, across its requested
    /// categories.
    fn lookup(&self, subscribed: &Url) -> Vec<Url> {
        let entries = self.entries.lock();
        let mut result = Vec::new();
        for category in subscribed
            .parameter_or(CATEGORY_KEY, DEFAULT_CATEGORY)
            .split(COMMA_SEPARATOR)
        {
            let pattern = ServiceName {
                category: category.to_string(),
                interface: subscribed.service_interface().to_string(),
                version: subscribed.parameter_or(VERSION_KEY, ANY_VALUE).to_string(),
                group: subscribed.parameter_or(GROUP_KEY, ANY_VALUE).to_string(),
            };
            for (name, urls) in entries.iter() {
                let Some(concrete) = ServiceName::decode(name, &self.separator) else {
                    continue;
                };
                if pattern.matches(&concrete) {
                    result.extend(urls.iter().cloned());
                }
            }
        }
        result
    }

    /// Push the full refreshed set to every subscription affected by a
    /// change to `changed`.
    fn broadcast(&self, changed: &Url) {
        let changed_name = ServiceName::from_url(changed);
        let watchers = self.watchers.lock();
        for watcher in watchers.iter() {
            for subscribed in &watcher.subscriptions {
                let interested = subscribed
                    .parameter_or(CATEGORY_KEY, DEFAULT_CATEGORY)
                    .split(COMMA_SEPARATOR)
                    .any(|category| {
                        let pattern = ServiceName {
                            category: category.to_string(),
                            interface: subscribed.service_interface().to_string(),
                            version: subscribed.parameter_or(VERSION_KEY, ANY_VALUE).to_string(),
                            group: subscribed.parameter_or(GROUP_KEY, ANY_VALUE).to_string(),
                        };
                        pattern.matches(&changed_name)
                    });
                if interested {
                    let _ = watcher.tx.send((subscribed.clone(), self.lookup(subscribed)));
                }
            }
        }
    }

    fn subscribe(&self, watcher_id: u64, url: &Url) -> Result<Vec<Url>, RegistryError> {
        self.check_fault()
            .map_err(|e| RegistryError::SubscribeFailed(e.to_string()))?;
        let mut watchers = self.watchers.lock();
        if let Some(watcher) = watchers.iter_mut().find(|w| w.id == watcher_id) {
            watcher.subscriptions.insert(url.clone());
        }
        drop(watchers);
        self.stats.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(self.lookup(url))
    }

    fn unsubscribe(&self, watcher_id: u64, url: &Url) -> Result<(), RegistryError> {
        let mut watchers = self.watchers.lock();
        if let Some(watcher) = watchers.iter_mut().find(|w| w.id == watcher_id) {
            watcher.subscriptions.remove(url);
        }
        Ok(())
    }
}

pub struct MemoryNamingClient {
    hub: Arc<MemoryHub>,
    watcher_id: u64,
}

#[async_trait]
impl NamingClient for MemoryNamingClient {
    async fn do_register(&self, url: &Url) -> Result<(), RegistryError> {
        self.hub.register(url)
    }

    async fn do_unregister(&self, url: &Url) -> Result<(), RegistryError> {
        self.hub.unregister(url)
    }

    async fn do_subscribe(&self, url: &Url) -> Result<Vec<Url>, RegistryError> {
        self.hub.subscribe(self.watcher_id, url)
    }

    async fn do_unsubscribe(&self, url: &Url) -> Result<(), RegistryError> {
        self.hub.unsubscribe(self.watcher_id, url)
    }

    fn is_available(&self) -> bool {
        !self.hub.is_faulted()
    }
}

pub struct MemoryRegistryFactory;

impl RegistryFactory for MemoryRegistryFactory {
    fn create(&self, url: &Url) -> Result<Arc<dyn Registry>, RegistryError> {
        let hub = MemoryHub::get(url);
        let (client, events) = hub.attach();
        Ok(FailbackRegistry::new(url.clone(), client, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_name_round_trips_and_matches_wildcards() {
        let url = Url::parse("relay://h:1/com.X?group=g1&version=2.0").unwrap();
        let name = ServiceName::from_url(&url);
        let encoded = name.encode(":");
        assert_eq!(encoded, "providers:com.X:2.0:g1");
        assert_eq!(ServiceName::decode(&encoded, ":").unwrap(), name);

        let pattern = ServiceName {
            category: "providers".to_string(),
            interface: "com.X".to_string(),
            version: ANY_VALUE.to_string(),
            group: ANY_VALUE.to_string(),
        };
        assert!(pattern.matches(&name));

        let other = ServiceName {
            interface: "com.Y".to_string(),
            ..pattern.clone()
        };
        assert!(!other.matches(&name));
    }

    #[test]
    fn custom_separator_is_honored() {
        let url = Url::parse("memory://hub-a?service.name.separator=|").unwrap();
        let hub = MemoryHub::get(&url);
        assert_eq!(hub.separator, "|");
    }

    #[test]
    fn hubs_are_shared_by_connection_identity() {
        let a = MemoryHub::get(&Url::parse("memory://shared:1234").unwrap());
        let b = MemoryHub::get(&Url::parse("memory://shared:1234?retry.period=50").unwrap());
        let c = MemoryHub::get(&Url::parse("memory://other:1234").unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
