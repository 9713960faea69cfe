// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Cluster strategies: fold a [`Directory`] into one fault-tolerant
//! invoker.

pub mod failfast;
pub mod failover;
pub mod mergeable;

use std::sync::Arc;

use relay_common::constants::LOADBALANCE_KEY;
use relay_common::{ExtensionRegistry, Url};
use relay_rpc::{Invocation, Invoker, RpcError};

use crate::directory::Directory;
use crate::loadbalance::LoadBalance;

pub trait Cluster: Send + Sync {
    fn join(&self, directory: Arc<dyn Directory>) -> Result<Arc<dyn Invoker>, RpcError>;
}

/// Resolve the load balancer named by the candidate URL (`loadbalance`
/// parameter, point default otherwise).
pub(crate) fn loadbalance_for(
    registry: &Arc<ExtensionRegistry>,
    url: &Url,
) -> Result<Arc<dyn LoadBalance>, RpcError> {
    match url.parameter(LOADBALANCE_KEY) {
        Some(name) if !name.is_empty() => Ok(registry.get_extension::<dyn LoadBalance>(name)?),
        _ => Ok(registry.get_default_extension::<dyn LoadBalance>()?),
    }
}

/// Pick one invoker among `invokers`, preferring available candidates not
/// yet tried. Returns `None` only when `invokers` is empty.
pub(crate) fn select(
    loadbalance: &Arc<dyn LoadBalance>,
    invokers: &[Arc<dyn Invoker>],
    excluded: &[Arc<dyn Invoker>],
    url: &Url,
    invocation: &Invocation,
) -> Option<Arc<dyn Invoker>> {
    if invokers.is_empty() {
        return None;
    }
    let mut candidates: Vec<Arc<dyn Invoker>> = Vec::with_capacity(invokers.len());
    for invoker in invokers {
        let tried = excluded.iter().any(|e| Arc::ptr_eq(e, invoker));
        if invoker.is_available() && !tried {
            candidates.push(invoker.clone());
        }
    }
    match candidates.len() {
        0 => None,
        1 => Some(candidates[0].clone()),
        _ => Some(loadbalance.select(&candidates, url, invocation)),
    }
}
