// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod errors;
pub mod filter;
pub mod invocation;
pub mod invoker;
pub mod local;
pub mod protocol;
pub mod result;

pub use errors::RpcError;
pub use invocation::Invocation;
pub use invoker::{Invoker, Service};
pub use protocol::{Exporter, Protocol};
pub use result::RpcResult;

use std::sync::Arc;

use relay_common::extension::ImplSpec;
use relay_common::ExtensionRegistry;

const PROTOCOL_DESCRIPTOR: &str = "\
local=relay.rpc.LocalProtocol
relay.rpc.FilterProtocolWrapper
relay.rpc.AdaptiveProtocol
";

const PROXY_FACTORY_DESCRIPTOR: &str = "default=relay.rpc.ServiceProxyFactory\n";

/// Register this crate's extension implementations and descriptors.
pub fn install(registry: &Arc<ExtensionRegistry>) {
    registry.register_impl::<dyn Protocol>(ImplSpec::<dyn Protocol>::normal(
        "relay.rpc.LocalProtocol",
        |_| Ok(Arc::new(local::LocalProtocol::new())),
    ));
    registry.register_impl::<dyn Protocol>(ImplSpec::<dyn Protocol>::wrapper(
        "relay.rpc.FilterProtocolWrapper",
        |inner, ctx| {
            Ok(Arc::new(filter::FilterProtocolWrapper::new(
                inner,
                ctx.registry(),
            )))
        },
    ));
    registry.register_impl::<dyn Protocol>(ImplSpec::<dyn Protocol>::adaptive(
        "relay.rpc.AdaptiveProtocol",
        |ctx| Ok(Arc::new(protocol::AdaptiveProtocol::new(ctx.registry()))),
    ));
    registry.register_descriptor::<dyn Protocol>(PROTOCOL_DESCRIPTOR);

    registry.register_impl::<dyn invoker::ProxyFactory>(ImplSpec::<dyn invoker::ProxyFactory>::normal(
        "relay.rpc.ServiceProxyFactory",
        |_| Ok(Arc::new(invoker::ServiceProxyFactory)),
    ));
    registry.register_descriptor::<dyn invoker::ProxyFactory>(PROXY_FACTORY_DESCRIPTOR);

    filter::install(registry);
}
