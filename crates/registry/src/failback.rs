// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Failback wrapper over a concrete naming client.
//!
//! Operations never fail the caller (unless the URL demands `check=true`):
//! a failed backend call is queued and replayed by the retry task, and the
//! full set of registrations and subscriptions is recovered when the
//! backend comes back. Notifications are filtered to the subscription,
//! partitioned by category, deduplicated against the last delivered set and
//! serialized per subscribed URL.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_common::constants::{
    CATEGORY_KEY, CHECK_KEY, COMMA_SEPARATOR, DEFAULT_CATEGORY, DYNAMIC_KEY, EMPTY_PROTOCOL,
    RETRY_PERIOD_KEY,
};
use relay_common::url::is_match;
use relay_common::Url;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::RegistryError;
use crate::traits::{NotifyListener, Registry};

pub const DEFAULT_RETRY_PERIOD_MS: u64 = 5000;

/// A change pushed by the naming backend: the subscribed URL and the full
/// current set matching it.
pub type ChangeEvent = (Url, Vec<Url>);

/// The concrete backend operations. The wrapper owns idempotence, retry and
/// notification plumbing; implementations only talk to the backend.
#[async_trait]
pub trait NamingClient: Send + Sync + 'static {
    async fn do_register(&self, url: &Url) -> Result<(), RegistryError>;
    async fn do_unregister(&self, url: &Url) -> Result<(), RegistryError>;
    /// Establish the watch and return the current full set.
    async fn do_subscribe(&self, url: &Url) -> Result<Vec<Url>, RegistryError>;
    async fn do_unsubscribe(&self, url: &Url) -> Result<(), RegistryError>;
    fn is_available(&self) -> bool;
}

#[derive(Default)]
struct FailedSets {
    register: HashSet<Url>,
    unregister: HashSet<Url>,
    subscribe: HashMap<Url, Vec<Arc<dyn NotifyListener>>>,
}

pub struct FailbackRegistry<C: NamingClient> {
    url: Url,
    client: C,
    registered: Mutex<HashSet<Url>>,
    subscribed: Mutex<HashMap<Url, Vec<Arc<dyn NotifyListener>>>>,
    /// Last delivered set per (subscribed url, category, listener),
    /// canonical string form, used to suppress duplicate consecutive
    /// notifications without starving a freshly added listener.
    notified: Mutex<HashMap<(String, String, usize), Vec<String>>>,
    /// Per-subscribed-url delivery serialization.
    delivery: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    failed: Mutex<FailedSets>,
    faulted: AtomicBool,
    cancel: CancellationToken,
}

impl<C: NamingClient> FailbackRegistry<C> {
    pub fn new(url: Url, client: C, events: mpsc::UnboundedReceiver<ChangeEvent>) -> Arc<Self> {
        let registry = Arc::new(FailbackRegistry {
            url,
            client,
            registered: Mutex::new(HashSet::new()),
            subscribed: Mutex::new(HashMap::new()),
            notified: Mutex::new(HashMap::new()),
            delivery: Mutex::new(HashMap::new()),
            failed: Mutex::new(FailedSets::default()),
            faulted: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        registry.clone().spawn_event_pump(events);
        registry.clone().spawn_retry_task();
        registry
    }

    fn spawn_event_pump(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ChangeEvent>) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some((subscribed, urls)) = event else { break };
                        let listeners = self.subscribed.lock().get(&subscribed).cloned();
                        if let Some(listeners) = listeners {
                            self.notify(&subscribed, &listeners, urls).await;
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }

    fn spawn_retry_task(self: Arc<Self>) {
        let period = Duration::from_millis(
            self.url
                .u64_parameter(RETRY_PERIOD_KEY, DEFAULT_RETRY_PERIOD_MS),
        );
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => self.retry().await,
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }

    /// Replay every failed operation; successful replays leave the failed
    /// sets.
    async fn retry(&self) {
        let snapshot = {
            let mut failed = self.failed.lock();
            FailedSets {
                register: std::mem::take(&mut failed.register),
                unregister: std::mem::take(&mut failed.unregister),
                subscribe: std::mem::take(&mut failed.subscribe),
            }
        };
        if snapshot.register.is_empty()
            && snapshot.unregister.is_empty()
            && snapshot.subscribe.is_empty()
        {
            return;
        }
        debug!(registry = %self.url, "retrying failed registry operations");

        for url in snapshot.register {
            if let Err(e) = self.client.do_register(&url).await {
                self.record_failure("register", &e);
                self.failed.lock().register.insert(url);
            } else {
                self.record_recovery();
            }
        }
        for url in snapshot.unregister {
            if let Err(e) = self.client.do_unregister(&url).await {
                self.record_failure("unregister", &e);
                self.failed.lock().unregister.insert(url);
            } else {
                self.record_recovery();
            }
        }
        for (url, listeners) in snapshot.subscribe {
            match self.client.do_subscribe(&url).await {
                Ok(current) => {
                    self.record_recovery();
                    self.notify(&url, &listeners, current).await;
                }
                Err(e) => {
                    self.record_failure("subscribe", &e);
                    self.failed.lock().subscribe.entry(url).or_default().extend(listeners);
                }
            }
        }
    }

    /// Log once per availability transition rather than once per failure.
    fn record_failure(&self, op: &str, error: &RegistryError) {
        if !self.faulted.swap(true, Ordering::SeqCst) {
            warn!(registry = %self.url, op, error = %error, "registry operation failed, waiting for retry");
        }
    }

    fn record_recovery(&self) {
        if self.faulted.swap(false, Ordering::SeqCst) {
            info!(registry = %self.url, "registry recovered, failed operations replayed");
        }
    }

    /// Deliver a raw full set to the listeners of one subscription.
    async fn notify(
        &self,
        subscribed: &Url,
        listeners: &[Arc<dyn NotifyListener>],
        urls: Vec<Url>,
    ) {
        let guard = self
            .delivery
            .lock()
            .entry(subscribed.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _serialized = guard.lock().await;

        let matched: Vec<Url> = urls
            .into_iter()
            .filter(|u| u.protocol() == EMPTY_PROTOCOL || is_match(subscribed, u))
            .collect();

        let requested = subscribed.parameter_or(CATEGORY_KEY, DEFAULT_CATEGORY);
        for category in requested.split(COMMA_SEPARATOR) {
            let mut set: Vec<Url> = matched
                .iter()
                .filter(|u| category_of(u) == category && u.protocol() != EMPTY_PROTOCOL)
                .cloned()
                .collect();
            if set.is_empty() {
                set.push(
                    subscribed
                        .with_protocol(EMPTY_PROTOCOL)
                        .with_parameter(CATEGORY_KEY, category),
                );
            }
            set.sort_by_key(|u| u.to_string());
            let canonical: Vec<String> = set.iter().map(|u| u.to_string()).collect();

            for listener in listeners {
                let key = (
                    subscribed.to_string(),
                    category.to_string(),
                    Arc::as_ptr(listener) as *const () as usize,
                );
                {
                    let mut notified = self.notified.lock();
                    if notified.get(&key).is_some_and(|last| *last == canonical) {
                        continue;
                    }
                    notified.insert(key, canonical.clone());
                }
                debug!(subscribed = %subscribed, category, count = set.len(), "delivering notification");
                listener.notify(set.clone()).await;
            }
        }
    }
}

/// Category classification, honoring the legacy configurator and router
/// schemes that predate the `category` parameter.
pub(crate) fn category_of(url: &Url) -> &str {
    match url.protocol() {
        p if p == relay_common::constants::OVERRIDE_PROTOCOL
            || p == relay_common::constants::ABSENT_PROTOCOL =>
        {
            relay_common::constants::CONFIGURATORS_CATEGORY
        }
        p if p == relay_common::constants::ROUTE_PROTOCOL => {
            relay_common::constants::ROUTERS_CATEGORY
        }
        _ => url.category(),
    }
}

#[async_trait]
impl<C: NamingClient> Registry for FailbackRegistry<C> {
    fn url(&self) -> &Url {
        &self.url
    }

    fn is_available(&self) -> bool {
        self.client.is_available()
    }

    async fn register(&self, url: &Url) -> Result<(), RegistryError> {
        if self.cancel.is_cancelled() {
            return Err(RegistryError::Destroyed);
        }
        if !self.registered.lock().insert(url.clone()) {
            return Ok(());
        }
        self.failed.lock().unregister.remove(url);
        match self.client.do_register(url).await {
            Ok(()) => {
                self.record_recovery();
                Ok(())
            }
            Err(e) if url.bool_parameter(CHECK_KEY, false) => Err(e),
            Err(e) => {
                self.record_failure("register", &e);
                self.failed.lock().register.insert(url.clone());
                Ok(())
            }
        }
    }

    async fn unregister(&self, url: &Url) -> Result<(), RegistryError> {
        if !self.registered.lock().remove(url) {
            return Ok(());
        }
        self.failed.lock().register.remove(url);
        match self.client.do_unregister(url).await {
            Ok(()) => {
                self.record_recovery();
                Ok(())
            }
            Err(e) => {
                self.record_failure("unregister", &e);
                self.failed.lock().unregister.insert(url.clone());
                Ok(())
            }
        }
    }

    async fn subscribe(
        &self,
        url: &Url,
        listener: Arc<dyn NotifyListener>,
    ) -> Result<(), RegistryError> {
        if self.cancel.is_cancelled() {
            return Err(RegistryError::Destroyed);
        }
        {
            let mut subscribed = self.subscribed.lock();
            let listeners = subscribed.entry(url.clone()).or_default();
            if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                listeners.push(listener.clone());
            }
        }
        match self.client.do_subscribe(url).await {
            Ok(current) => {
                self.record_recovery();
                self.notify(url, std::slice::from_ref(&listener), current).await;
                Ok(())
            }
            Err(e) if url.bool_parameter(CHECK_KEY, false) => Err(e),
            Err(e) => {
                self.record_failure("subscribe", &e);
                self.failed
                    .lock()
                    .subscribe
                    .entry(url.clone())
                    .or_default()
                    .push(listener);
                Ok(())
            }
        }
    }

    async fn unsubscribe(
        &self,
        url: &Url,
        listener: &Arc<dyn NotifyListener>,
    ) -> Result<(), RegistryError> {
        let last = {
            let mut subscribed = self.subscribed.lock();
            let emptied = match subscribed.get_mut(url) {
                None => return Ok(()),
                Some(listeners) => {
                    listeners.retain(|l| !Arc::ptr_eq(l, listener));
                    listeners.is_empty()
                }
            };
            if emptied {
                subscribed.remove(url);
            }
            emptied
        };
        if let Some(pending) = self.failed.lock().subscribe.get_mut(url) {
            pending.retain(|l| !Arc::ptr_eq(l, listener));
        }
        if !last {
            return Ok(());
        }
        if let Err(e) = self.client.do_unsubscribe(url).await {
            self.record_failure("unsubscribe", &e);
        }
        Ok(())
    }

    async fn destroy(&self) {
        self.cancel.cancel();
        let registered: Vec<Url> = self.registered.lock().drain().collect();
        for url in registered {
            if url.bool_parameter(DYNAMIC_KEY, true) {
                if let Err(e) = self.client.do_unregister(&url).await {
                    warn!(url = %url, error = %e, "failed to unregister on destroy");
                }
            }
        }
        let subscribed: Vec<Url> = self.subscribed.lock().drain().map(|(u, _)| u).collect();
        for url in subscribed {
            if let Err(e) = self.client.do_unsubscribe(&url).await {
                warn!(url = %url, error = %e, "failed to unsubscribe on destroy");
            }
        }
    }
}
