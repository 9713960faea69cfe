// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! End-to-end orchestration over the in-memory backend: export with
//! simplified registration and override subscription, re-export on
//! configuration change, consumer refer with failover, empty-set handling
//! and drained unexport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_common::constants::REGISTRY_SERVICE_INTERFACE;
use relay_common::extension::ImplSpec;
use relay_common::url::encode;
use relay_common::{ExtensionRegistry, Url};
use relay_registry::integration::protocol::registered_provider_url;
use relay_registry::memory::MemoryHub;
use relay_rpc::invoker::Service;
use relay_rpc::{Exporter, Invocation, Invoker, Protocol, RpcError, RpcResult};
use serde_json::{json, Value};

struct Greeter;

#[async_trait]
impl Service for Greeter {
    async fn call(&self, _invocation: &Invocation) -> Result<Value, RpcError> {
        Ok(json!("pong"))
    }
}

fn origin_invoker(extensions: &Arc<ExtensionRegistry>, registry_url: &Url) -> Arc<dyn Invoker> {
    let proxies = extensions
        .get_default_extension::<dyn relay_rpc::invoker::ProxyFactory>()
        .unwrap();
    proxies
        .proxy_invoker(Arc::new(Greeter), "com.X", registry_url)
        .unwrap()
}

fn export_url(registry_host: &str, provider_url: &str, registry_extra: &str) -> Url {
    Url::parse(&format!(
        "registry://{registry_host}:2181/relay.registry.RegistryService?registry=memory{registry_extra}&export={}",
        encode(provider_url)
    ))
    .unwrap()
}

fn hub_for(registry_host: &str) -> Arc<MemoryHub> {
    MemoryHub::get(
        &Url::parse(&format!(
            "memory://{registry_host}:2181/relay.registry.RegistryService"
        ))
        .unwrap(),
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}

// -- provider side ---------------------------------------------------------

#[tokio::test]
async fn export_registers_simplified_url_and_subscribes_overrides() {
    let extensions = relay_registry::bootstrap();
    let protocol = extensions.get_extension::<dyn Protocol>("registry").unwrap();

    let origin_url = export_url(
        "r-simplify",
        "local://10.0.0.1:20880/com.X?application=a&.hidden=z&bind.ip=10.0.0.1&bind.port=20880",
        "",
    );
    let _exporter = protocol.export(origin_invoker(&extensions, &origin_url)).await.unwrap();

    let hub = hub_for("r-simplify");
    let registered = hub.registered_urls();
    assert_eq!(registered.len(), 1);
    let registered = &registered[0];
    assert_eq!(registered.parameter("application"), Some("a"));
    assert_eq!(registered.parameter(".hidden"), None);
    assert_eq!(registered.parameter("bind.ip"), None);
    assert_eq!(registered.parameter("bind.port"), None);

    // simplification is idempotent
    let registry_url =
        relay_registry::integration::protocol::registry_url_of(&origin_url);
    assert_eq!(
        registered_provider_url(registered, &registry_url),
        *registered
    );

    // the override subscription is established on the provider:// form
    let subscription = hub
        .subscriptions()
        .into_iter()
        .find(|s| s.protocol() == "provider")
        .expect("override subscription missing");
    assert_eq!(subscription.parameter("category"), Some("configurators"));
    assert_eq!(subscription.parameter("check"), Some("false"));
    assert_eq!(subscription.path(), "com.X");
}

#[tokio::test]
async fn override_rule_re_exports_without_touching_the_registry() {
    let extensions = relay_registry::bootstrap();
    let protocol = extensions.get_extension::<dyn Protocol>("registry").unwrap();

    // timeout is excluded from the persisted form, so overriding it must
    // swap only the local export
    let origin_url = export_url(
        "r-override",
        "local://10.0.0.1:20880/com.X?application=a",
        "&simplify.exclude=timeout",
    );
    let exporter = protocol.export(origin_invoker(&extensions, &origin_url)).await.unwrap();
    let hub = hub_for("r-override");
    assert_eq!(hub.stats.registers.load(Ordering::SeqCst), 1);

    hub.register(&Url::parse("override://0.0.0.0/com.X?category=configurators&timeout=5000").unwrap())
        .unwrap();
    settle().await;

    assert_eq!(
        exporter.invoker().url().parameter("timeout"),
        Some("5000"),
        "re-export should expose the overridden url"
    );
    // the registered simplified form did not change: no unregister/register
    assert_eq!(hub.stats.unregisters.load(Ordering::SeqCst), 0);
    assert_eq!(hub.stats.registers.load(Ordering::SeqCst), 2); // the rule itself
}

#[tokio::test]
async fn override_changing_the_simplified_form_re_registers() {
    let extensions = relay_registry::bootstrap();
    let protocol = extensions.get_extension::<dyn Protocol>("registry").unwrap();

    let origin_url = export_url("r-reregister", "local://10.0.0.1:20880/com.X?application=a", "");
    let exporter = protocol.export(origin_invoker(&extensions, &origin_url)).await.unwrap();
    let hub = hub_for("r-reregister");

    hub.register(&Url::parse("override://0.0.0.0/com.X?category=configurators&weight=9").unwrap())
        .unwrap();
    settle().await;

    assert_eq!(exporter.invoker().url().parameter("weight"), Some("9"));
    assert_eq!(hub.stats.unregisters.load(Ordering::SeqCst), 1);
    assert!(hub
        .registered_urls()
        .iter()
        .any(|u| u.protocol() == "local" && u.parameter("weight") == Some("9")));
}

#[tokio::test]
async fn repeated_export_of_an_equivalent_url_reuses_the_local_export() {
    let extensions = relay_registry::bootstrap();
    let protocol = extensions.get_extension::<dyn Protocol>("registry").unwrap();

    let origin_url = export_url("r-idempotent", "local://10.0.0.1:20880/com.X?application=a", "");
    let first = protocol.export(origin_invoker(&extensions, &origin_url)).await.unwrap();
    let second = protocol.export(origin_invoker(&extensions, &origin_url)).await.unwrap();

    let hub = hub_for("r-idempotent");
    assert_eq!(hub.stats.registers.load(Ordering::SeqCst), 1);
    // both exporters expose the same live invoker
    assert_eq!(first.invoker().url(), second.invoker().url());
}

#[tokio::test]
async fn unexport_drains_and_is_idempotent() {
    let extensions = relay_registry::bootstrap();
    let protocol = extensions.get_extension::<dyn Protocol>("registry").unwrap();

    let origin_url = export_url(
        "r-drain",
        "local://127.0.0.1/com.X?application=a&shutdown.timeout=50",
        "",
    );
    let exporter = protocol.export(origin_invoker(&extensions, &origin_url)).await.unwrap();

    // a local client observes the export lifecycle
    let local = extensions.get_extension::<dyn Protocol>("local").unwrap();
    let client = local
        .refer("com.X", &Url::parse("local://client/com.X").unwrap())
        .await
        .unwrap();
    assert!(client.is_available());

    exporter.unexport().await;
    exporter.unexport().await;

    // registry bookkeeping is done before unexport returns...
    let hub = hub_for("r-drain");
    assert_eq!(hub.stats.unregisters.load(Ordering::SeqCst), 1);
    assert!(hub.subscriptions().is_empty());
    assert!(hub.registered_urls().is_empty());
    // ...while the inner unexport waits out the drain window
    assert!(client.is_available());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!client.is_available());
}

// -- consumer side ---------------------------------------------------------

struct MockProtocol {
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Protocol for MockProtocol {
    async fn export(&self, _invoker: Arc<dyn Invoker>) -> Result<Arc<dyn Exporter>, RpcError> {
        Err(RpcError::Unsupported("mock transport cannot export".to_string()))
    }

    async fn refer(&self, service: &str, url: &Url) -> Result<Arc<dyn Invoker>, RpcError> {
        Ok(Arc::new(MockInvoker {
            url: url.clone(),
            service: service.to_string(),
            calls: self.calls.clone(),
        }))
    }
}

struct MockInvoker {
    url: Url,
    service: String,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Invoker for MockInvoker {
    fn url(&self) -> Url {
        self.url.clone()
    }

    fn service(&self) -> &str {
        &self.service
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn invoke(&self, _invocation: &Invocation) -> Result<RpcResult, RpcError> {
        self.calls.lock().push(self.url.host().to_string());
        if self.url.host() == "h1" {
            return Err(RpcError::Remote("connection refused".to_string()));
        }
        Ok(RpcResult::ok(json!({
            "host": self.url.host(),
            "timeout": self.url.parameter("timeout"),
        })))
    }

    fn destroy(&self) {}
}

fn consumer_setup(host: &str) -> (Arc<ExtensionRegistry>, Arc<Mutex<Vec<String>>>, Arc<MemoryHub>) {
    let extensions = relay_registry::bootstrap();
    let calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = calls.clone();
    extensions.register_impl::<dyn Protocol>(ImplSpec::<dyn Protocol>::normal("tests.MockProtocol", move |_| {
        Ok(Arc::new(MockProtocol {
            calls: captured.clone(),
        }))
    }));
    extensions.register_descriptor::<dyn Protocol>("mock=tests.MockProtocol\n");
    (extensions, calls, hub_for(host))
}

fn refer_url(host: &str, refer: &str) -> Url {
    Url::parse(&format!(
        "registry://{host}:2181/relay.registry.RegistryService?registry=memory&refer={}",
        encode(refer)
    ))
    .unwrap()
}

#[tokio::test]
async fn failover_retries_on_the_next_provider() {
    let (extensions, calls, hub) = consumer_setup("r-failover");
    hub.register(&Url::parse("mock://h1:1/com.X").unwrap()).unwrap();
    hub.register(&Url::parse("mock://h2:2/com.X").unwrap()).unwrap();

    let protocol = extensions.get_extension::<dyn Protocol>("registry").unwrap();
    let invoker = protocol
        .refer(
            "com.X",
            &refer_url(
                "r-failover",
                "interface=com.X&cluster=failover&loadbalance=roundrobin&retries=2",
            ),
        )
        .await
        .unwrap();

    let result = invoker.invoke(&Invocation::new("ping")).await.unwrap();
    assert_eq!(result.value().unwrap()["host"], json!("h2"));
    assert_eq!(*calls.lock(), vec!["h1".to_string(), "h2".to_string()]);

    // the simplified consumer url was registered under its category
    assert!(hub.registered_urls().iter().any(|u| {
        u.protocol() == "consumer"
            && u.parameter("category") == Some("consumers")
            && u.parameter("check") == Some("false")
    }));
}

#[tokio::test]
async fn empty_provider_set_forbids_calls_until_populated() {
    let (extensions, _calls, hub) = consumer_setup("r-empty");
    let protocol = extensions.get_extension::<dyn Protocol>("registry").unwrap();
    let invoker = protocol
        .refer("com.X", &refer_url("r-empty", "interface=com.X&cluster=failover"))
        .await
        .unwrap();

    assert!(!invoker.is_available());
    assert!(matches!(
        invoker.invoke(&Invocation::new("ping")).await,
        Err(RpcError::NoProviders(_))
    ));

    hub.register(&Url::parse("mock://h2:2/com.X").unwrap()).unwrap();
    settle().await;
    assert!(invoker.is_available());
    let result = invoker.invoke(&Invocation::new("ping")).await.unwrap();
    assert_eq!(result.value().unwrap()["host"], json!("h2"));
}

#[tokio::test]
async fn directory_tracks_provider_removal() {
    let (extensions, calls, hub) = consumer_setup("r-shrink");
    let p1 = Url::parse("mock://h2:2/com.X").unwrap();
    let p2 = Url::parse("mock://h3:3/com.X").unwrap();
    hub.register(&p1).unwrap();
    hub.register(&p2).unwrap();

    let protocol = extensions.get_extension::<dyn Protocol>("registry").unwrap();
    let invoker = protocol
        .refer(
            "com.X",
            &refer_url("r-shrink", "interface=com.X&loadbalance=roundrobin"),
        )
        .await
        .unwrap();

    hub.unregister(&p2).unwrap();
    settle().await;

    calls.lock().clear();
    for _ in 0..4 {
        invoker.invoke(&Invocation::new("ping")).await.unwrap();
    }
    assert_eq!(*calls.lock(), vec!["h2"; 4]);
}

#[tokio::test]
async fn consumer_side_configurators_re_merge_provider_urls() {
    let (extensions, _calls, hub) = consumer_setup("r-conf");
    hub.register(&Url::parse("mock://h2:2/com.X").unwrap()).unwrap();

    let protocol = extensions.get_extension::<dyn Protocol>("registry").unwrap();
    let invoker = protocol
        .refer("com.X", &refer_url("r-conf", "interface=com.X"))
        .await
        .unwrap();

    hub.register(&Url::parse("override://0.0.0.0/com.X?category=configurators&timeout=7777").unwrap())
        .unwrap();
    settle().await;

    let result = invoker.invoke(&Invocation::new("ping")).await.unwrap();
    assert_eq!(result.value().unwrap()["timeout"], json!("7777"));
}

#[tokio::test]
async fn multi_group_references_aggregate_results() {
    let (extensions, _calls, hub) = consumer_setup("r-groups");
    hub.register(&Url::parse("mock://h2:2/com.X?group=g1").unwrap()).unwrap();
    hub.register(&Url::parse("mock://h3:3/com.X?group=g2").unwrap()).unwrap();

    let protocol = extensions.get_extension::<dyn Protocol>("registry").unwrap();
    let invoker = protocol
        .refer("com.X", &refer_url("r-groups", "interface=com.X&group=g1,g2"))
        .await
        .unwrap();

    let result = invoker.invoke(&Invocation::new("list")).await.unwrap();
    let merged = result.value().unwrap().as_array().unwrap();
    assert_eq!(merged.len(), 2);
}

#[tokio::test]
async fn referring_the_registry_service_returns_a_direct_invoker() {
    let (extensions, _calls, hub) = consumer_setup("r-escape");
    let protocol = extensions.get_extension::<dyn Protocol>("registry").unwrap();
    let invoker = protocol
        .refer(
            REGISTRY_SERVICE_INTERFACE,
            &refer_url("r-escape", "interface=com.X"),
        )
        .await
        .unwrap();

    let invocation = Invocation::new("register")
        .with_argument("string", json!("mock://h9:9/com.Y"));
    invoker.invoke(&invocation).await.unwrap();
    assert!(hub
        .registered_urls()
        .iter()
        .any(|u| u.host() == "h9" && u.path() == "com.Y"));

    assert!(matches!(
        invoker.invoke(&Invocation::new("lookup")).await,
        Err(RpcError::Unsupported(_))
    ));
}

// -- dynamic configuration listeners ---------------------------------------

#[tokio::test]
async fn service_level_rules_feed_back_into_the_export() {
    use relay_registry::dynamic::{DynamicConfiguration, InMemoryDynamicConfiguration};
    use relay_registry::ApplicationConfig;

    let extensions = ExtensionRegistry::new();
    relay_rpc::install(&extensions);
    relay_cluster::install(&extensions);
    relay_registry::install(&extensions);

    let dynamic = Arc::new(InMemoryDynamicConfiguration::new());
    extensions.register_object(
        relay_registry::DYNAMIC_CONFIGURATION_OBJECT,
        dynamic.clone() as Arc<dyn DynamicConfiguration>,
    );
    extensions.register_object(
        relay_registry::APPLICATION_OBJECT,
        Arc::new(ApplicationConfig::new("demo-app")),
    );

    let protocol = extensions.get_extension::<dyn Protocol>("registry").unwrap();
    let origin_url = export_url(
        "r-dynamic",
        "local://10.0.0.1:20880/com.X?application=demo-app",
        "&simplify.exclude=timeout",
    );
    let exporter = protocol.export(origin_invoker(&extensions, &origin_url)).await.unwrap();
    assert_eq!(exporter.invoker().url().parameter("timeout"), None);

    // service-level rule: <serviceKey>.configurators
    dynamic.publish(
        "com.X.configurators",
        "override://0.0.0.0/com.X?timeout=1234",
    );
    settle().await;
    assert_eq!(exporter.invoker().url().parameter("timeout"), Some("1234"));

    // application-level rule: <application>.configurators
    dynamic.publish(
        "demo-app.configurators",
        "override://0.0.0.0/com.X?threads=8",
    );
    settle().await;
    assert_eq!(exporter.invoker().url().parameter("threads"), Some("8"));

    // deleting the service rule re-exports without the override
    dynamic.delete("com.X.configurators");
    settle().await;
    let url = exporter.invoker().url();
    assert_eq!(url.parameter("timeout"), None);
    assert_eq!(url.parameter("threads"), Some("8"));
}

// -- counters shared across tests ------------------------------------------

#[tokio::test]
async fn concurrent_unexports_release_exactly_once() {
    let extensions = relay_registry::bootstrap();
    let protocol = extensions.get_extension::<dyn Protocol>("registry").unwrap();
    let origin_url = export_url("r-once", "local://127.0.0.1/com.X?application=a", "");
    let exporter = protocol.export(origin_invoker(&extensions, &origin_url)).await.unwrap();

    let exporter = Arc::new(exporter);
    let unexports = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let exporter = exporter.clone();
        let unexports = unexports.clone();
        handles.push(tokio::spawn(async move {
            exporter.unexport().await;
            unexports.fetch_add(1, Ordering::SeqCst);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(unexports.load(Ordering::SeqCst), 8);

    // the winning caller finished the bookkeeping before its await returned
    let hub = hub_for("r-once");
    assert_eq!(hub.stats.unregisters.load(Ordering::SeqCst), 1);
    assert!(hub.subscriptions().is_empty());
}
