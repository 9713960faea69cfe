// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use relay_common::extension::{adaptive, ExtensionPoint};
use relay_common::{ExtensionRegistry, Url};

use crate::errors::RpcError;
use crate::invoker::Invoker;

/// A transport binding: publishes invokers and produces client-side ones.
#[async_trait]
pub trait Protocol: Send + Sync {
    fn default_port(&self) -> u16 {
        0
    }

    async fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Arc<dyn Exporter>, RpcError>;

    async fn refer(&self, service: &str, url: &Url) -> Result<Arc<dyn Invoker>, RpcError>;

    async fn destroy(&self) {}
}

impl ExtensionPoint for dyn Protocol {
    const NAME: &'static str = "relay.rpc.Protocol";
    const DEFAULT: Option<&'static str> = Some("local");
}

/// Ownership token for an active export. `unexport` is idempotent, releases
/// the invoker and never fails; any registry bookkeeping it implies is
/// finished by the time it returns.
#[async_trait]
pub trait Exporter: Send + Sync {
    fn invoker(&self) -> Arc<dyn Invoker>;
    async fn unexport(&self);
}

/// Per-call dispatcher on the URL scheme. The resolved extension comes back
/// decorated by the point's wrappers; the dispatcher itself does not.
pub struct AdaptiveProtocol {
    registry: Arc<ExtensionRegistry>,
}

impl AdaptiveProtocol {
    pub fn new(registry: Arc<ExtensionRegistry>) -> Self {
        AdaptiveProtocol { registry }
    }

    fn resolve(&self, url: &Url) -> Result<Arc<dyn Protocol>, RpcError> {
        let name = adaptive::resolve_name::<dyn Protocol>(url, &[adaptive::PROTOCOL_KEY])?;
        Ok(self.registry.get_extension::<dyn Protocol>(&name)?)
    }
}

#[async_trait]
impl Protocol for AdaptiveProtocol {
    async fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Arc<dyn Exporter>, RpcError> {
        let url = invoker.url();
        self.resolve(&url)?.export(invoker).await
    }

    async fn refer(&self, service: &str, url: &Url) -> Result<Arc<dyn Invoker>, RpcError> {
        self.resolve(url)?.refer(service, url).await
    }
}
