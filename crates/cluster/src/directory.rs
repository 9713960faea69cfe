// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use relay_common::Url;
use relay_rpc::{Invocation, Invoker, RpcError};

/// The consumer-side authoritative set of candidate invokers for one
/// service reference. `list` reads a snapshot and never blocks writers.
pub trait Directory: Send + Sync {
    fn url(&self) -> Url;
    fn service(&self) -> &str;
    fn is_available(&self) -> bool;
    fn list(&self, invocation: &Invocation) -> Result<Vec<Arc<dyn Invoker>>, RpcError>;
    fn destroy(&self);
}

/// Fixed-membership directory, used for tests and direct references.
pub struct StaticDirectory {
    url: Url,
    service: String,
    invokers: Vec<Arc<dyn Invoker>>,
    destroyed: AtomicBool,
}

impl StaticDirectory {
    pub fn new(url: Url, service: impl Into<String>, invokers: Vec<Arc<dyn Invoker>>) -> Self {
        StaticDirectory {
            url,
            service: service.into(),
            invokers,
            destroyed: AtomicBool::new(false),
        }
    }
}

impl Directory for StaticDirectory {
    fn url(&self) -> Url {
        self.url.clone()
    }

    fn service(&self) -> &str {
        &self.service
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire) && self.invokers.iter().any(|i| i.is_available())
    }

    fn list(&self, _invocation: &Invocation) -> Result<Vec<Arc<dyn Invoker>>, RpcError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RpcError::Destroyed(self.service.clone()));
        }
        Ok(self.invokers.clone())
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        for invoker in &self.invokers {
            invoker.destroy();
        }
    }
}
