// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Dynamic-configuration store, distinct from the naming registry.
//!
//! Rules are keyed strings; configurator rule payloads are
//! newline-separated configurator URLs with `#` comments.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

#[derive(Clone, Debug)]
pub struct ConfigChangeEvent {
    pub key: String,
    pub content: Option<String>,
    pub change_type: ChangeType,
}

pub trait ConfigurationListener: Send + Sync {
    fn process(&self, event: &ConfigChangeEvent);
}

pub trait DynamicConfiguration: Send + Sync {
    fn get_rule(&self, key: &str) -> Option<String>;
    fn add_listener(&self, key: &str, listener: Arc<dyn ConfigurationListener>);
    fn remove_listener(&self, key: &str, listener: &Arc<dyn ConfigurationListener>);
}

/// Process-wide in-memory store; `publish`/`delete` drive listeners, which
/// makes it the test double for an external config center as well as the
/// default standalone store.
#[derive(Default)]
pub struct InMemoryDynamicConfiguration {
    rules: Mutex<HashMap<String, String>>,
    listeners: Mutex<HashMap<String, Vec<Arc<dyn ConfigurationListener>>>>,
}

impl InMemoryDynamicConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, key: &str, content: &str) {
        let previous = self
            .rules
            .lock()
            .insert(key.to_string(), content.to_string());
        let change_type = if previous.is_some() {
            ChangeType::Modified
        } else {
            ChangeType::Added
        };
        debug!(key, ?change_type, "configuration rule published");
        self.fire(ConfigChangeEvent {
            key: key.to_string(),
            content: Some(content.to_string()),
            change_type,
        });
    }

    pub fn delete(&self, key: &str) {
        if self.rules.lock().remove(key).is_none() {
            return;
        }
        self.fire(ConfigChangeEvent {
            key: key.to_string(),
            content: None,
            change_type: ChangeType::Deleted,
        });
    }

    fn fire(&self, event: ConfigChangeEvent) {
        let listeners = self.listeners.lock().get(&event.key).cloned();
        if let Some(listeners) = listeners {
            for listener in listeners {
                listener.process(&event);
            }
        }
    }
}

impl DynamicConfiguration for InMemoryDynamicConfiguration {
    fn get_rule(&self, key: &str) -> Option<String> {
        self.rules.lock().get(key).cloned()
    }

    fn add_listener(&self, key: &str, listener: Arc<dyn ConfigurationListener>) {
        self.listeners
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(listener);
    }

    fn remove_listener(&self, key: &str, listener: &Arc<dyn ConfigurationListener>) {
        if let Some(listeners) = self.listeners.lock().get_mut(key) {
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }
}
