// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The uniform call surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relay_common::extension::ExtensionPoint;
use relay_common::Url;
use serde_json::Value;

use crate::errors::RpcError;
use crate::invocation::Invocation;
use crate::result::RpcResult;

/// Handle to something callable. Owned by the protocol that produced it and
/// destroyed at unexport; `destroy` propagates synchronously to children.
#[async_trait]
pub trait Invoker: Send + Sync {
    fn url(&self) -> Url;
    fn service(&self) -> &str;
    fn is_available(&self) -> bool;
    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult, RpcError>;
    fn destroy(&self);
}

/// User-side callable target, standing in for the generated proxy wrapper
/// of the external bytecode generator.
#[async_trait]
pub trait Service: Send + Sync {
    async fn call(&self, invocation: &Invocation) -> Result<Value, RpcError>;
}

/// Adapts a [`Service`] into an [`Invoker`].
pub trait ProxyFactory: Send + Sync {
    fn proxy_invoker(
        &self,
        service: Arc<dyn Service>,
        interface: &str,
        url: &Url,
    ) -> Result<Arc<dyn Invoker>, RpcError>;
}

impl ExtensionPoint for dyn ProxyFactory {
    const NAME: &'static str = "relay.rpc.ProxyFactory";
    const DEFAULT: Option<&'static str> = Some("default");
}

pub struct ServiceProxyFactory;

impl ProxyFactory for ServiceProxyFactory {
    fn proxy_invoker(
        &self,
        service: Arc<dyn Service>,
        interface: &str,
        url: &Url,
    ) -> Result<Arc<dyn Invoker>, RpcError> {
        Ok(Arc::new(ServiceInvoker::new(service, interface, url.clone())))
    }
}

/// Terminal provider invoker delegating to the user object.
pub struct ServiceInvoker {
    service: Arc<dyn Service>,
    interface: String,
    url: Url,
    destroyed: AtomicBool,
}

impl ServiceInvoker {
    pub fn new(service: Arc<dyn Service>, interface: impl Into<String>, url: Url) -> Self {
        ServiceInvoker {
            service,
            interface: interface.into(),
            url,
            destroyed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Invoker for ServiceInvoker {
    fn url(&self) -> Url {
        self.url.clone()
    }

    fn service(&self) -> &str {
        &self.interface
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire)
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult, RpcError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RpcError::Destroyed(self.interface.clone()));
        }
        // a service failure is a completed-error outcome, not an invoke throw
        match self.service.call(invocation).await {
            Ok(value) => Ok(RpcResult::ok(value)),
            Err(error) => Ok(RpcResult::error(error)),
        }
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

/// Delegating invoker overriding only the URL; everything else is forwarded
/// to the origin.
pub struct DelegateInvoker {
    inner: Arc<dyn Invoker>,
    url: Url,
}

impl DelegateInvoker {
    pub fn new(inner: Arc<dyn Invoker>, url: Url) -> Self {
        DelegateInvoker { inner, url }
    }

    pub fn inner(&self) -> &Arc<dyn Invoker> {
        &self.inner
    }
}

#[async_trait]
impl Invoker for DelegateInvoker {
    fn url(&self) -> Url {
        self.url.clone()
    }

    fn service(&self) -> &str {
        self.inner.service()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult, RpcError> {
        self.inner.invoke(invocation).await
    }

    fn destroy(&self) {
        self.inner.destroy();
    }
}
