// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use relay_common::Url;
use relay_rpc::{Invocation, Invoker};

/// Picks one invoker among the routed candidates. Candidates are never
/// empty when `select` is called.
pub trait LoadBalance: Send + Sync {
    fn select(
        &self,
        invokers: &[Arc<dyn Invoker>],
        url: &Url,
        invocation: &Invocation,
    ) -> Arc<dyn Invoker>;
}

pub struct RandomLoadBalance;

impl LoadBalance for RandomLoadBalance {
    fn select(
        &self,
        invokers: &[Arc<dyn Invoker>],
        _url: &Url,
        _invocation: &Invocation,
    ) -> Arc<dyn Invoker> {
        let index = rand::rng().random_range(0..invokers.len());
        invokers[index].clone()
    }
}

#[derive(Default)]
pub struct RoundRobinLoadBalance {
    sequence: AtomicUsize,
}

impl LoadBalance for RoundRobinLoadBalance {
    fn select(
        &self,
        invokers: &[Arc<dyn Invoker>],
        _url: &Url,
        _invocation: &Invocation,
    ) -> Arc<dyn Invoker> {
        let index = self.sequence.fetch_add(1, Ordering::Relaxed) % invokers.len();
        invokers[index].clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use relay_rpc::{RpcError, RpcResult};

    use super::*;

    struct Fixed(u16);

    #[async_trait]
    impl Invoker for Fixed {
        fn url(&self) -> Url {
            Url::new("x", "h", self.0)
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

    fn invokers() -> Vec<Arc<dyn Invoker>> {
        (1..=3).map(|p| Arc::new(Fixed(p)) as Arc<dyn Invoker>).collect()
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let lb = RoundRobinLoadBalance::default();
        let invokers = invokers();
        let url = Url::new("x", "h", 0);
        let invocation = Invocation::new("m");
        let ports: Vec<u16> = (0..6)
            .map(|_| lb.select(&invokers, &url, &invocation).url().port())
            .collect();
        assert_eq!(ports, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn random_stays_in_bounds() {
        let lb = RandomLoadBalance;
        let invokers = invokers();
        let url = Url::new("x", "h", 0);
        let invocation = Invocation::new("m");
        for _ in 0..50 {
            let port = lb.select(&invokers, &url, &invocation).url().port();
            assert!((1..=3).contains(&port));
        }
    }
}
