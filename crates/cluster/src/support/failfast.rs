// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Failfast: exactly one attempt; any failure surfaces immediately.

use std::sync::Arc;

use async_trait::async_trait;
use relay_common::{ExtensionRegistry, Url};
use relay_rpc::{Invocation, Invoker, RpcError, RpcResult};

use crate::directory::Directory;
use crate::support::{loadbalance_for, select, Cluster};

pub struct FailfastCluster {
    registry: Arc<ExtensionRegistry>,
}

impl FailfastCluster {
    pub fn new(registry: Arc<ExtensionRegistry>) -> Self {
        FailfastCluster { registry }
    }
}

impl Cluster for FailfastCluster {
    fn join(&self, directory: Arc<dyn Directory>) -> Result<Arc<dyn Invoker>, RpcError> {
        Ok(Arc::new(FailfastClusterInvoker {
            registry: self.registry.clone(),
            directory,
        }))
    }
}

struct FailfastClusterInvoker {
    registry: Arc<ExtensionRegistry>,
    directory: Arc<dyn Directory>,
}

#[async_trait]
impl Invoker for FailfastClusterInvoker {
    fn url(&self) -> Url {
        self.directory.url()
    }

    fn service(&self) -> &str {
        self.directory.service()
    }

    fn is_available(&self) -> bool {
        self.directory.is_available()
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult, RpcError> {
        let invokers = self.directory.list(invocation)?;
        let reference_url = invokers
            .first()
            .map(|i| i.url())
            .ok_or_else(|| RpcError::NoProviders(self.directory.service().to_string()))?;
        let loadbalance = loadbalance_for(&self.registry, &reference_url)?;
        let invoker = select(&loadbalance, &invokers, &[], &reference_url, invocation)
            .ok_or_else(|| RpcError::NoProviders(self.directory.service().to_string()))?;
        invoker.invoke(invocation).await
    }

    fn destroy(&self) {
        self.directory.destroy();
    }
}
