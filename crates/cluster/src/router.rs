// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Router chain: an ordered sequence of per-call invoker-set reductions.
//!
//! Built-in routers come from the activate extensions of
//! [`RouterFactory`]; additional routers arrive at runtime through the
//! registry's `routers` category and are resolved by URL scheme.

use std::sync::Arc;

use parking_lot::RwLock;
use relay_common::constants::{
    CONSUMER_SIDE, EMPTY_PROTOCOL, FORCE_TAG_KEY, ROUTER_KEY, TAG_KEY,
};
use relay_common::{ExtensionRegistry, Url};
use relay_rpc::{Invocation, Invoker, RpcError};
use tracing::warn;

pub trait Router: Send + Sync {
    fn url(&self) -> Url;

    fn priority(&self) -> i32 {
        0
    }

    fn route(
        &self,
        invokers: Vec<Arc<dyn Invoker>>,
        url: &Url,
        invocation: &Invocation,
    ) -> Vec<Arc<dyn Invoker>>;
}

pub trait RouterFactory: Send + Sync {
    fn get_router(&self, url: &Url) -> Result<Arc<dyn Router>, RpcError>;
}

pub struct RouterChain {
    url: Url,
    builtin: Vec<Arc<dyn Router>>,
    dynamic: RwLock<Arc<Vec<Arc<dyn Router>>>>,
}

impl RouterChain {
    /// Build the chain for a consumer URL from the activated router
    /// factories.
    pub fn build(registry: &Arc<ExtensionRegistry>, url: &Url) -> Result<Self, RpcError> {
        let factories =
            registry.get_activate_by_key::<dyn RouterFactory>(url, ROUTER_KEY, Some(CONSUMER_SIDE))?;
        let mut builtin = Vec::with_capacity(factories.len());
        for factory in factories {
            builtin.push(factory.get_router(url)?);
        }
        builtin.sort_by_key(|r| r.priority());
        Ok(RouterChain {
            url: url.clone(),
            builtin,
            dynamic: RwLock::new(Arc::new(Vec::new())),
        })
    }

    /// Replace the dynamic routers from a set of router URLs delivered by
    /// the registry. The factory is picked by URL scheme; unknown schemes
    /// are skipped.
    pub fn set_router_urls(&self, registry: &Arc<ExtensionRegistry>, urls: &[Url]) {
        let mut routers: Vec<Arc<dyn Router>> = Vec::new();
        for url in urls {
            if url.protocol() == EMPTY_PROTOCOL {
                continue;
            }
            let name = url.parameter_or(ROUTER_KEY, url.protocol());
            match registry.get_extension::<dyn RouterFactory>(name) {
                Ok(factory) => match factory.get_router(url) {
                    Ok(router) => routers.push(router),
                    Err(e) => warn!(url = %url, error = %e, "failed to build router"),
                },
                Err(e) => warn!(url = %url, error = %e, "unknown router factory"),
            }
        }
        routers.sort_by_key(|r| r.priority());
        *self.dynamic.write() = Arc::new(routers);
    }

    pub fn route(
        &self,
        mut invokers: Vec<Arc<dyn Invoker>>,
        invocation: &Invocation,
    ) -> Vec<Arc<dyn Invoker>> {
        for router in &self.builtin {
            invokers = router.route(invokers, &self.url, invocation);
        }
        let dynamic = self.dynamic.read().clone();
        for router in dynamic.iter() {
            invokers = router.route(invokers, &self.url, invocation);
        }
        invokers
    }
}

/// Keeps only providers whose `tag` parameter matches the request tag
/// (invocation attachment first, consumer URL second). Falls back to the
/// whole set unless the tag is forced.
pub struct TagRouter {
    url: Url,
}

impl Router for TagRouter {
    fn url(&self) -> Url {
        self.url.clone()
    }

    fn priority(&self) -> i32 {
        100
    }

    fn route(
        &self,
        invokers: Vec<Arc<dyn Invoker>>,
        url: &Url,
        invocation: &Invocation,
    ) -> Vec<Arc<dyn Invoker>> {
        let tag = invocation
            .attachment(TAG_KEY)
            .map(str::to_string)
            .or_else(|| url.parameter(TAG_KEY).map(str::to_string));
        let Some(tag) = tag.filter(|t| !t.is_empty()) else {
            return invokers;
        };

        let tagged: Vec<_> = invokers
            .iter()
            .filter(|i| i.url().parameter(TAG_KEY) == Some(tag.as_str()))
            .cloned()
            .collect();
        if tagged.is_empty() && !url.bool_parameter(FORCE_TAG_KEY, false) {
            invokers
        } else {
            tagged
        }
    }
}

pub struct TagRouterFactory;

impl RouterFactory for TagRouterFactory {
    fn get_router(&self, url: &Url) -> Result<Arc<dyn Router>, RpcError> {
        Ok(Arc::new(TagRouter { url: url.clone() }))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use relay_rpc::RpcResult;

    use super::*;

    struct Tagged {
        url: Url,
    }

    #[async_trait]
    impl Invoker for Tagged {
        fn url(&self) -> Url {
            self.url.clone()
        }
        fn service(&self) -> &str {
            "com.example.Demo"
        }
        fn is_available(&self) -> bool {
            true
        }
        async fn invoke(&self, _invocation: &Invocation) -> Result<RpcResult, RpcError> {
            Ok(RpcResult::ok(serde_json::Value::Null))
        }
        fn destroy(&self) {}
    }

    fn invoker(tag: Option<&str>) -> Arc<dyn Invoker> {
        let mut url = Url::parse("x://h:1/com.example.Demo").unwrap();
        if let Some(tag) = tag {
            url = url.with_parameter(TAG_KEY, tag);
        }
        Arc::new(Tagged { url })
    }

    #[test]
    fn tag_router_filters_by_request_tag() {
        let consumer = Url::parse("consumer://c/com.example.Demo").unwrap();
        let router = TagRouterFactory.get_router(&consumer).unwrap();
        let invokers = vec![invoker(Some("blue")), invoker(Some("green")), invoker(None)];

        let invocation = Invocation::new("m").with_attachment(TAG_KEY, "green");
        let routed = router.route(invokers.clone(), &consumer, &invocation);
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].url().parameter(TAG_KEY), Some("green"));

        // unknown tag falls back to the full set when not forced
        let invocation = Invocation::new("m").with_attachment(TAG_KEY, "red");
        let routed = router.route(invokers.clone(), &consumer, &invocation);
        assert_eq!(routed.len(), 3);

        // forced tag yields the empty set instead
        let forced = consumer.with_parameter(FORCE_TAG_KEY, "true");
        let router = TagRouterFactory.get_router(&forced).unwrap();
        let routed = router.route(invokers, &forced, &invocation);
        assert!(routed.is_empty());
    }

    #[test]
    fn chain_applies_builtin_routers() {
        let registry = ExtensionRegistry::new();
        crate::install(&registry);
        let consumer = Url::parse("consumer://c/com.example.Demo").unwrap();
        let chain = RouterChain::build(&registry, &consumer).unwrap();

        let invokers = vec![invoker(Some("blue")), invoker(None)];
        let invocation = Invocation::new("m").with_attachment(TAG_KEY, "blue");
        let routed = chain.route(invokers, &invocation);
        assert_eq!(routed.len(), 1);
    }
}
