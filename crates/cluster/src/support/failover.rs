// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Failover: on a non-business failure, retry on another provider not yet
//! tried, up to `retries` additional attempts.

use std::sync::Arc;

use async_trait::async_trait;
use relay_common::constants::{DEFAULT_RETRIES, RETRIES_KEY};
use relay_common::{ExtensionRegistry, Url};
use relay_rpc::{Invocation, Invoker, RpcError, RpcResult};
use tracing::warn;

use crate::directory::Directory;
use crate::support::{loadbalance_for, select, Cluster};

pub struct FailoverCluster {
    registry: Arc<ExtensionRegistry>,
}

impl FailoverCluster {
    pub fn new(registry: Arc<ExtensionRegistry>) -> Self {
        FailoverCluster { registry }
    }
}

impl Cluster for FailoverCluster {
    fn join(&self, directory: Arc<dyn Directory>) -> Result<Arc<dyn Invoker>, RpcError> {
        Ok(Arc::new(FailoverClusterInvoker {
            registry: self.registry.clone(),
            directory,
        }))
    }
}

struct FailoverClusterInvoker {
    registry: Arc<ExtensionRegistry>,
    directory: Arc<dyn Directory>,
}

#[async_trait]
impl Invoker for FailoverClusterInvoker {
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
        if invokers.is_empty() {
            return Err(RpcError::NoProviders(self.directory.service().to_string()));
        }

        let reference_url = invokers[0].url();
        let loadbalance = loadbalance_for(&self.registry, &reference_url)?;
        let attempts = reference_url.u32_parameter(RETRIES_KEY, DEFAULT_RETRIES) + 1;

        let mut tried: Vec<Arc<dyn Invoker>> = Vec::new();
        let mut last_error: Option<RpcError> = None;
        for _ in 0..attempts {
            let Some(invoker) =
                select(&loadbalance, &invokers, &tried, &reference_url, invocation)
            else {
                break;
            };
            tried.push(invoker.clone());
            match invoker.invoke(invocation).await {
                Ok(result) => return Ok(result),
                Err(error) if error.is_business() => return Err(error),
                Err(error) => {
                    warn!(
                        service = self.directory.service(),
                        method = invocation.method(),
                        provider = %invoker.url().address(),
                        error = %error,
                        "provider failed, failing over"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(RpcError::Remote(format!(
            "failed to invoke {}.{} after trying {} provider(s): {}",
            self.directory.service(),
            invocation.method(),
            tried.len(),
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no provider selectable".to_string()),
        )))
    }

    fn destroy(&self) {
        self.directory.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::directory::StaticDirectory;

    struct Flaky {
        port: u16,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Invoker for Flaky {
        fn url(&self) -> Url {
            Url::parse("x://h/com.example.Demo")
                .unwrap()
                .with_port(self.port)
                .with_parameter("loadbalance", "roundrobin")
        }
        fn service(&self) -> &str {
            "com.example.Demo"
        }
        fn is_available(&self) -> bool {
            true
        }
        async fn invoke(&self, _invocation: &Invocation) -> Result<RpcResult, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(RpcError::Remote("connection reset".to_string()))
            } else {
                Ok(RpcResult::ok(json!(self.port)))
            }
        }
        fn destroy(&self) {}
    }

    fn cluster_invoker(
        registry: &Arc<ExtensionRegistry>,
        invokers: Vec<Arc<dyn Invoker>>,
    ) -> Arc<dyn Invoker> {
        let directory = Arc::new(StaticDirectory::new(
            Url::parse("consumer://c/com.example.Demo").unwrap(),
            "com.example.Demo",
            invokers,
        ));
        FailoverCluster::new(registry.clone()).join(directory).unwrap()
    }

    #[tokio::test]
    async fn retries_on_remote_errors_without_reusing_providers() {
        let registry = ExtensionRegistry::new();
        crate::install(&registry);
        let calls = Arc::new(AtomicUsize::new(0));
        let invoker = cluster_invoker(
            &registry,
            vec![
                Arc::new(Flaky { port: 1, fail: true, calls: calls.clone() }),
                Arc::new(Flaky { port: 2, fail: false, calls: calls.clone() }),
            ],
        );

        let result = invoker.invoke(&Invocation::new("m")).await.unwrap();
        assert_eq!(result.value(), Some(&json!(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        struct Biz {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Invoker for Biz {
            fn url(&self) -> Url {
                Url::parse("x://h:1/com.example.Demo").unwrap()
            }
            fn service(&self) -> &str {
                "com.example.Demo"
            }
            fn is_available(&self) -> bool {
                true
            }
            async fn invoke(&self, _invocation: &Invocation) -> Result<RpcResult, RpcError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(RpcError::Business("rejected".to_string()))
            }
            fn destroy(&self) {}
        }

        let registry = ExtensionRegistry::new();
        crate::install(&registry);
        let calls = Arc::new(AtomicUsize::new(0));
        let invoker = cluster_invoker(
            &registry,
            vec![
                Arc::new(Biz { calls: calls.clone() }),
                Arc::new(Biz { calls: calls.clone() }),
            ],
        );

        let error = invoker.invoke(&Invocation::new("m")).await.unwrap_err();
        assert!(error.is_business());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_directory_raises_no_providers() {
        let registry = ExtensionRegistry::new();
        crate::install(&registry);
        let invoker = cluster_invoker(&registry, vec![]);
        assert!(matches!(
            invoker.invoke(&Invocation::new("m")).await,
            Err(RpcError::NoProviders(_))
        ));
    }

    #[tokio::test]
    async fn exhausting_all_providers_surfaces_the_last_error() {
        let registry = ExtensionRegistry::new();
        crate::install(&registry);
        let calls = Arc::new(AtomicUsize::new(0));
        let invoker = cluster_invoker(
            &registry,
            vec![
                Arc::new(Flaky { port: 1, fail: true, calls: calls.clone() }),
                Arc::new(Flaky { port: 2, fail: true, calls: calls.clone() }),
            ],
        );

        let error = invoker.invoke(&Invocation::new("m")).await.unwrap_err();
        assert!(matches!(error, RpcError::Remote(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
