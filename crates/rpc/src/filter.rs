// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Interceptor chain around an invoker.
//!
//! `build_invoker_chain` folds the activated filter list into a linked
//! chain: the filter at index 0 is outermost, the innermost `next` is the
//! terminal invoker. The chain head is wrapped in a
//! [`CallbackRegistrationInvoker`] that, once the call completes, walks the
//! list in reverse and fires each filter's listener hook.

use std::sync::Arc;

use async_trait::async_trait;
use relay_common::constants::{
    ACCESSLOG_KEY, CONSUMER_SIDE, PROVIDER_SIDE, REFERENCE_FILTER_KEY, REGISTRY_PROTOCOL,
    SERVICE_FILTER_KEY, SIDE_KEY,
};
use relay_common::extension::{Activate, ExtensionPoint, ImplSpec};
use relay_common::{ExtensionRegistry, Url};
use tracing::{info, warn};

use crate::errors::RpcError;
use crate::invocation::{Invocation, ECHO_METHOD};
use crate::invoker::Invoker;
use crate::protocol::{Exporter, Protocol};
use crate::result::RpcResult;

/// An interceptor with optional completion hooks.
///
/// A synchronous failure from `invoke` is reported to this filter's
/// `on_error` by the surrounding chain node and then propagated; a completed
/// result reaches every filter's hook through the reverse walk instead.
#[async_trait]
pub trait Filter: Send + Sync {
    async fn invoke(
        &self,
        next: &dyn Invoker,
        invocation: &Invocation,
    ) -> Result<RpcResult, RpcError>;

    fn on_response(
        &self,
        _result: &RpcResult,
        _invoker: &dyn Invoker,
        _invocation: &Invocation,
    ) -> Result<(), RpcError> {
        Ok(())
    }

    fn on_error(
        &self,
        _error: &RpcError,
        _invoker: &dyn Invoker,
        _invocation: &Invocation,
    ) -> Result<(), RpcError> {
        Ok(())
    }
}

impl ExtensionPoint for dyn Filter {
    const NAME: &'static str = "relay.rpc.Filter";
    const DEFAULT: Option<&'static str> = None;
}

/// Build the filter chain for `invoker` on the given side. `key` names the
/// URL parameter carrying extra filter names, `group` the activation group.
pub fn build_invoker_chain(
    registry: &Arc<ExtensionRegistry>,
    invoker: Arc<dyn Invoker>,
    key: &str,
    group: &str,
) -> Result<Arc<dyn Invoker>, RpcError> {
    let url = invoker.url();
    let filters = registry.get_activate_by_key::<dyn Filter>(&url, key, Some(group))?;
    if filters.is_empty() {
        return Ok(invoker);
    }

    let mut last = invoker.clone();
    for filter in filters.iter().rev() {
        last = Arc::new(FilterNode {
            filter: filter.clone(),
            next: last,
            original: invoker.clone(),
        });
    }
    Ok(Arc::new(CallbackRegistrationInvoker {
        head: last,
        filters,
    }))
}

struct FilterNode {
    filter: Arc<dyn Filter>,
    next: Arc<dyn Invoker>,
    original: Arc<dyn Invoker>,
}

#[async_trait]
impl Invoker for FilterNode {
    fn url(&self) -> Url {
        self.original.url()
    }

    fn service(&self) -> &str {
        self.original.service()
    }

    fn is_available(&self) -> bool {
        self.original.is_available()
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult, RpcError> {
        match self.filter.invoke(self.next.as_ref(), invocation).await {
            Ok(result) => Ok(result),
            Err(error) => {
                if let Err(hook) = self.filter.on_error(&error, self.original.as_ref(), invocation)
                {
                    warn!(error = %hook, "filter error hook failed");
                }
                Err(error)
            }
        }
    }

    fn destroy(&self) {
        self.original.destroy();
    }
}

/// Chain head: awaits the inner chain, then walks the filter list in
/// reverse firing listener hooks. Hook failures are logged and never alter
/// the returned result.
struct CallbackRegistrationInvoker {
    head: Arc<dyn Invoker>,
    filters: Vec<Arc<dyn Filter>>,
}

#[async_trait]
impl Invoker for CallbackRegistrationInvoker {
    fn url(&self) -> Url {
        self.head.url()
    }

    fn service(&self) -> &str {
        self.head.service()
    }

    fn is_available(&self) -> bool {
        self.head.is_available()
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult, RpcError> {
        let result = self.head.invoke(invocation).await?;
        for filter in self.filters.iter().rev() {
            let hook = match result.outcome() {
                Ok(_) => filter.on_response(&result, self.head.as_ref(), invocation),
                Err(error) => filter.on_error(error, self.head.as_ref(), invocation),
            };
            if let Err(error) = hook {
                warn!(error = %error, "filter completion hook failed");
            }
        }
        Ok(result)
    }

    fn destroy(&self) {
        self.head.destroy();
    }
}

/// Protocol decorator applying the side-specific filter chain around every
/// exported and referred invoker. Registry URLs pass through untouched.
pub struct FilterProtocolWrapper {
    inner: Arc<dyn Protocol>,
    registry: Arc<ExtensionRegistry>,
}

impl FilterProtocolWrapper {
    pub fn new(inner: Arc<dyn Protocol>, registry: Arc<ExtensionRegistry>) -> Self {
        FilterProtocolWrapper { inner, registry }
    }
}

#[async_trait]
impl Protocol for FilterProtocolWrapper {
    fn default_port(&self) -> u16 {
        self.inner.default_port()
    }

    async fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Arc<dyn Exporter>, RpcError> {
        if invoker.url().protocol() == REGISTRY_PROTOCOL {
            return self.inner.export(invoker).await;
        }
        let chained = build_invoker_chain(&self.registry, invoker, SERVICE_FILTER_KEY, PROVIDER_SIDE)?;
        self.inner.export(chained).await
    }

    async fn refer(&self, service: &str, url: &Url) -> Result<Arc<dyn Invoker>, RpcError> {
        if url.protocol() == REGISTRY_PROTOCOL {
            return self.inner.refer(service, url).await;
        }
        let invoker = self.inner.refer(service, url).await?;
        build_invoker_chain(&self.registry, invoker, REFERENCE_FILTER_KEY, CONSUMER_SIDE)
    }

    async fn destroy(&self) {
        self.inner.destroy().await;
    }
}

// -- built-in filters ------------------------------------------------------

/// Answers `$echo` with its first argument without touching the service.
struct EchoFilter;

#[async_trait]
impl Filter for EchoFilter {
    async fn invoke(
        &self,
        next: &dyn Invoker,
        invocation: &Invocation,
    ) -> Result<RpcResult, RpcError> {
        if invocation.method() == ECHO_METHOD {
            let value = invocation
                .arguments()
                .first()
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            return Ok(RpcResult::ok(value));
        }
        next.invoke(invocation).await
    }
}

/// Stamps the calling side onto outgoing invocations.
struct ContextFilter;

#[async_trait]
impl Filter for ContextFilter {
    async fn invoke(
        &self,
        next: &dyn Invoker,
        invocation: &Invocation,
    ) -> Result<RpcResult, RpcError> {
        let stamped = invocation
            .clone()
            .with_attachment(SIDE_KEY, CONSUMER_SIDE);
        next.invoke(&stamped).await
    }
}

/// Logs call completion through the listener hooks; active only when the
/// provider URL carries an `accesslog` parameter.
struct AccessLogFilter;

#[async_trait]
impl Filter for AccessLogFilter {
    async fn invoke(
        &self,
        next: &dyn Invoker,
        invocation: &Invocation,
    ) -> Result<RpcResult, RpcError> {
        next.invoke(invocation).await
    }

    fn on_response(
        &self,
        _result: &RpcResult,
        invoker: &dyn Invoker,
        invocation: &Invocation,
    ) -> Result<(), RpcError> {
        info!(service = invoker.service(), method = invocation.method(), "call completed");
        Ok(())
    }

    fn on_error(
        &self,
        error: &RpcError,
        invoker: &dyn Invoker,
        invocation: &Invocation,
    ) -> Result<(), RpcError> {
        warn!(
            service = invoker.service(),
            method = invocation.method(),
            error = %error,
            "call failed"
        );
        Ok(())
    }
}

const FILTER_DESCRIPTOR: &str = "\
echo=relay.rpc.EchoFilter
context=relay.rpc.ContextFilter
accesslog=relay.rpc.AccessLogFilter
";

pub(crate) fn install(registry: &Arc<ExtensionRegistry>) {
    registry.register_impl::<dyn Filter>(
        ImplSpec::<dyn Filter>::normal("relay.rpc.EchoFilter", |_| Ok(Arc::new(EchoFilter))).with_activate(
            Activate {
                groups: &[PROVIDER_SIDE],
                keys: &[],
                order: -110,
            },
        ),
    );
    registry.register_impl::<dyn Filter>(
        ImplSpec::<dyn Filter>::normal("relay.rpc.ContextFilter", |_| Ok(Arc::new(ContextFilter))).with_activate(
            Activate {
                groups: &[CONSUMER_SIDE],
                keys: &[],
                order: -100,
            },
        ),
    );
    registry.register_impl::<dyn Filter>(
        ImplSpec::<dyn Filter>::normal("relay.rpc.AccessLogFilter", |_| Ok(Arc::new(AccessLogFilter)))
            .with_activate(Activate {
                groups: &[PROVIDER_SIDE],
                keys: &[ACCESSLOG_KEY],
                order: -90,
            }),
    );
    registry.register_descriptor::<dyn Filter>(FILTER_DESCRIPTOR);
}
