// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Mergeable: used for multi-group references. Every listed provider is
//! invoked and the successful values are aggregated into a JSON array, in
//! directory order.

use std::sync::Arc;

use async_trait::async_trait;
use relay_common::Url;
use relay_rpc::{Invocation, Invoker, RpcError, RpcResult};
use serde_json::Value;
use tracing::warn;

use crate::directory::Directory;
use crate::support::Cluster;

pub struct MergeableCluster;

impl Cluster for MergeableCluster {
    fn join(&self, directory: Arc<dyn Directory>) -> Result<Arc<dyn Invoker>, RpcError> {
        Ok(Arc::new(MergeableClusterInvoker { directory }))
    }
}

struct MergeableClusterInvoker {
    directory: Arc<dyn Directory>,
}

#[async_trait]
impl Invoker for MergeableClusterInvoker {
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

        let mut merged = Vec::with_capacity(invokers.len());
        let mut failures = 0usize;
        for invoker in &invokers {
            match invoker.invoke(invocation).await {
                Ok(result) => match result.into_value() {
                    Ok(value) => merged.push(value),
                    Err(error) => {
                        failures += 1;
                        warn!(provider = %invoker.url().address(), error = %error, "merge branch completed with error");
                    }
                },
                Err(error) => {
                    failures += 1;
                    warn!(provider = %invoker.url().address(), error = %error, "merge branch failed");
                }
            }
        }
        if merged.is_empty() && failures > 0 {
            return Err(RpcError::Remote(format!(
                "all {} merge branches of {} failed",
                failures,
                self.directory.service(),
            )));
        }
        Ok(RpcResult::ok(Value::Array(merged)))
    }

    fn destroy(&self) {
        self.directory.destroy();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::directory::StaticDirectory;

    struct GroupInvoker {
        group: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl Invoker for GroupInvoker {
        fn url(&self) -> Url {
            Url::parse("x://h:1/com.example.Demo")
                .unwrap()
                .with_parameter("group", self.group)
        }
        fn service(&self) -> &str {
            "com.example.Demo"
        }
        fn is_available(&self) -> bool {
            true
        }
        async fn invoke(&self, _invocation: &Invocation) -> Result<RpcResult, RpcError> {
            if self.fail {
                Err(RpcError::Remote(format!("{} down", self.group)))
            } else {
                Ok(RpcResult::ok(json!(self.group)))
            }
        }
        fn destroy(&self) {}
    }

    fn directory(invokers: Vec<Arc<dyn Invoker>>) -> Arc<dyn Directory> {
        Arc::new(StaticDirectory::new(
            Url::parse("consumer://c/com.example.Demo").unwrap(),
            "com.example.Demo",
            invokers,
        ))
    }

    #[tokio::test]
    async fn merges_group_results_in_order() {
        let invoker = MergeableCluster
            .join(directory(vec![
                Arc::new(GroupInvoker { group: "g1", fail: false }),
                Arc::new(GroupInvoker { group: "g2", fail: false }),
            ]))
            .unwrap();
        let result = invoker.invoke(&Invocation::new("list")).await.unwrap();
        assert_eq!(result.value(), Some(&json!(["g1", "g2"])));
    }

    #[tokio::test]
    async fn failed_branches_are_dropped_from_the_merge() {
        let invoker = MergeableCluster
            .join(directory(vec![
                Arc::new(GroupInvoker { group: "g1", fail: true }),
                Arc::new(GroupInvoker { group: "g2", fail: false }),
            ]))
            .unwrap();
        let result = invoker.invoke(&Invocation::new("list")).await.unwrap();
        assert_eq!(result.value(), Some(&json!(["g2"])));
    }
}
