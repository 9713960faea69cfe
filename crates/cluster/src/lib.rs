// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod configurator;
pub mod directory;
pub mod loadbalance;
pub mod router;
pub mod support;

pub use configurator::Configurator;
pub use directory::Directory;
pub use loadbalance::LoadBalance;
pub use router::{Router, RouterChain, RouterFactory};
pub use support::Cluster;

use std::sync::Arc;

use relay_common::extension::{Activate, ExtensionPoint, ImplSpec};
use relay_common::ExtensionRegistry;

impl ExtensionPoint for dyn Cluster {
    const NAME: &'static str = "relay.cluster.Cluster";
    const DEFAULT: Option<&'static str> = Some(relay_common::constants::DEFAULT_CLUSTER);
}

impl ExtensionPoint for dyn LoadBalance {
    const NAME: &'static str = "relay.cluster.LoadBalance";
    const DEFAULT: Option<&'static str> = Some(relay_common::constants::DEFAULT_LOADBALANCE);
}

impl ExtensionPoint for dyn RouterFactory {
    const NAME: &'static str = "relay.cluster.RouterFactory";
    const DEFAULT: Option<&'static str> = None;
}

const CLUSTER_DESCRIPTOR: &str = "\
failover=relay.cluster.FailoverCluster
failfast=relay.cluster.FailfastCluster
mergeable=relay.cluster.MergeableCluster
";

const LOADBALANCE_DESCRIPTOR: &str = "\
random=relay.cluster.RandomLoadBalance
roundrobin=relay.cluster.RoundRobinLoadBalance
";

const ROUTER_FACTORY_DESCRIPTOR: &str = "tag=relay.cluster.TagRouterFactory\n";

/// Register this crate's extension implementations and descriptors.
pub fn install(registry: &Arc<ExtensionRegistry>) {
    registry.register_impl::<dyn Cluster>(ImplSpec::<dyn Cluster>::normal(
        "relay.cluster.FailoverCluster",
        |ctx| Ok(Arc::new(support::failover::FailoverCluster::new(ctx.registry()))),
    ));
    registry.register_impl::<dyn Cluster>(ImplSpec::<dyn Cluster>::normal(
        "relay.cluster.FailfastCluster",
        |ctx| Ok(Arc::new(support::failfast::FailfastCluster::new(ctx.registry()))),
    ));
    registry.register_impl::<dyn Cluster>(ImplSpec::<dyn Cluster>::normal(
        "relay.cluster.MergeableCluster",
        |_| Ok(Arc::new(support::mergeable::MergeableCluster)),
    ));
    registry.register_descriptor::<dyn Cluster>(CLUSTER_DESCRIPTOR);

    registry.register_impl::<dyn LoadBalance>(ImplSpec::<dyn LoadBalance>::normal(
        "relay.cluster.RandomLoadBalance",
        |_| Ok(Arc::new(loadbalance::RandomLoadBalance)),
    ));
    registry.register_impl::<dyn LoadBalance>(ImplSpec::<dyn LoadBalance>::normal(
        "relay.cluster.RoundRobinLoadBalance",
        |_| Ok(Arc::new(loadbalance::RoundRobinLoadBalance::default())),
    ));
    registry.register_descriptor::<dyn LoadBalance>(LOADBALANCE_DESCRIPTOR);

    registry.register_impl::<dyn RouterFactory>(
        ImplSpec::<dyn RouterFactory>::normal("relay.cluster.TagRouterFactory", |_| {
            Ok(Arc::new(router::TagRouterFactory))
        })
        .with_activate(Activate {
            groups: &[relay_common::constants::CONSUMER_SIDE],
            keys: &[],
            order: 100,
        }),
    );
    registry.register_descriptor::<dyn RouterFactory>(ROUTER_FACTORY_DESCRIPTOR);
}
