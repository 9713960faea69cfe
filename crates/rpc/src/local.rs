// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! In-process protocol: exports live in a table keyed by service key and
//! client invokers resolve the export at call time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use relay_common::Url;
use tracing::debug;

use crate::errors::RpcError;
use crate::invocation::Invocation;
use crate::invoker::Invoker;
use crate::protocol::{Exporter, Protocol};
use crate::result::RpcResult;

type ExporterTable = RwLock<HashMap<String, Arc<LocalExporter>>>;

pub struct LocalProtocol {
    exporters: Arc<ExporterTable>,
}

impl LocalProtocol {
    pub fn new() -> Self {
        LocalProtocol {
            exporters: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for LocalProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Protocol for LocalProtocol {
    async fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Arc<dyn Exporter>, RpcError> {
        let key = invoker.url().service_key();
        let exporter = Arc::new(LocalExporter {
            invoker,
            key: key.clone(),
            table: Arc::downgrade(&self.exporters),
            unexported: AtomicBool::new(false),
        });
        debug!(service = %key, "exported local service");
        self.exporters.write().insert(key, exporter.clone());
        Ok(exporter)
    }

    async fn refer(&self, service: &str, url: &Url) -> Result<Arc<dyn Invoker>, RpcError> {
        Ok(Arc::new(LocalInvoker {
            url: url.clone(),
            service: service.to_string(),
            key: url.service_key(),
            table: self.exporters.clone(),
            destroyed: AtomicBool::new(false),
        }))
    }

    async fn destroy(&self) {
        let exporters: Vec<_> = self.exporters.read().values().cloned().collect();
        for exporter in exporters {
            exporter.unexport().await;
        }
    }
}

struct LocalExporter {
    invoker: Arc<dyn Invoker>,
    key: String,
    table: Weak<ExporterTable>,
    unexported: AtomicBool,
}

#[async_trait]
impl Exporter for LocalExporter {
    fn invoker(&self) -> Arc<dyn Invoker> {
        self.invoker.clone()
    }

    async fn unexport(&self) {
        if self.unexported.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(table) = self.table.upgrade() {
            let mut table = table.write();
            // a re-export may already have replaced this entry
            if table
                .get(&self.key)
                .is_some_and(|current| Arc::ptr_eq(&current.invoker, &self.invoker))
            {
                table.remove(&self.key);
            }
        }
        self.invoker.destroy();
        debug!(service = %self.key, "unexported local service");
    }
}

struct LocalInvoker {
    url: Url,
    service: String,
    key: String,
    table: Arc<ExporterTable>,
    destroyed: AtomicBool,
}

#[async_trait]
impl Invoker for LocalInvoker {
    fn url(&self) -> Url {
        self.url.clone()
    }

    fn service(&self) -> &str {
        &self.service
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire) && self.table.read().contains_key(&self.key)
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult, RpcError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RpcError::Destroyed(self.service.clone()));
        }
        let exporter = self.table.read().get(&self.key).cloned();
        match exporter {
            Some(exporter) => exporter.invoker.invoke(invocation).await,
            None => Err(RpcError::Remote(format!(
                "no exported provider for {}",
                self.key
            ))),
        }
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use super::*;
    use crate::invoker::{Service, ServiceInvoker};

    struct Greeter;

    #[async_trait]
    impl Service for Greeter {
        async fn call(&self, invocation: &Invocation) -> Result<Value, RpcError> {
            match invocation.method() {
                "greet" => Ok(json!(format!(
                    "hello {}",
                    invocation.arguments()[0].as_str().unwrap_or("?")
                ))),
                other => Err(RpcError::Unsupported(other.to_string())),
            }
        }
    }

    fn provider_url() -> Url {
        Url::parse("local://127.0.0.1/com.example.Greeter?interface=com.example.Greeter").unwrap()
    }

    #[tokio::test]
    async fn export_then_refer_round_trips_a_call() {
        let protocol = LocalProtocol::new();
        let invoker = Arc::new(ServiceInvoker::new(
            Arc::new(Greeter),
            "com.example.Greeter",
            provider_url(),
        ));
        let _exporter = protocol.export(invoker).await.unwrap();

        let client = protocol
            .refer("com.example.Greeter", &provider_url())
            .await
            .unwrap();
        assert!(client.is_available());

        let invocation = Invocation::new("greet").with_argument("string", json!("relay"));
        let result = client.invoke(&invocation).await.unwrap();
        assert_eq!(result.value(), Some(&json!("hello relay")));
    }

    #[tokio::test]
    async fn unexport_is_idempotent_and_breaks_the_client() {
        let protocol = LocalProtocol::new();
        let invoker = Arc::new(ServiceInvoker::new(
            Arc::new(Greeter),
            "com.example.Greeter",
            provider_url(),
        ));
        let exporter = protocol.export(invoker).await.unwrap();
        let client = protocol
            .refer("com.example.Greeter", &provider_url())
            .await
            .unwrap();

        exporter.unexport().await;
        exporter.unexport().await;
        assert!(!client.is_available());

        let invocation = Invocation::new("greet").with_argument("string", json!("relay"));
        assert!(matches!(
            client.invoke(&invocation).await,
            Err(RpcError::Remote(_))
        ));
    }

    #[tokio::test]
    async fn service_errors_complete_as_results() {
        let protocol = LocalProtocol::new();
        let invoker = Arc::new(ServiceInvoker::new(
            Arc::new(Greeter),
            "com.example.Greeter",
            provider_url(),
        ));
        protocol.export(invoker).await.unwrap();
        let client = protocol
            .refer("com.example.Greeter", &provider_url())
            .await
            .unwrap();

        let result = client.invoke(&Invocation::new("nope")).await.unwrap();
        assert!(matches!(result.exception(), Some(RpcError::Unsupported(_))));
    }
}
