//! Upstream interface: named asynchronous field computations
//!
//! The coordinator consumes a `FieldSet`, a map from field name to a boxed
//! future producing that field's value. Producers can be ad-hoc futures,
//! already-known values, or `FieldSource` trait objects.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

/// One field's asynchronous computation
///
/// The coordinator places no constraints on how it runs; it only requires
/// that it completes at most once, which a future guarantees.
pub type FieldFuture = BoxFuture<'static, Result<Value>>;

/// Object-safe producer of a single field value
///
/// The seam for data-source implementations that carry state (clients,
/// connection pools) rather than being written as ad-hoc futures.
#[async_trait]
pub trait FieldSource: Send + Sync {
    async fn produce(&self) -> Result<Value>;
}

/// Builder for the named computations handed to `start()`
///
/// The name set must cover the coordinator's schema exactly; `start()`
/// checks this and panics on a mismatch.
#[derive(Default)]
pub struct FieldSet {
    futures: HashMap<String, FieldFuture>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field backed by a future
    pub fn field<T, F>(mut self, name: impl Into<String>, fut: F) -> Self
    where
        T: Serialize,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.futures.insert(
            name.into(),
            Box::pin(async move { Ok(serde_json::to_value(fut.await?)?) }),
        );
        self
    }

    /// Add a field whose value is already known
    ///
    /// The value still travels the normal completion path, so immediately
    /// after `start()` the field reads as pending like any other.
    pub fn ready<T: Serialize>(self, name: impl Into<String>, value: T) -> Self {
        let value = serde_json::to_value(value);
        self.field(name, async move { Ok(value?) })
    }

    /// Add a field backed by a `FieldSource`
    pub fn source(mut self, name: impl Into<String>, source: Arc<dyn FieldSource>) -> Self {
        self.futures
            .insert(name.into(), Box::pin(async move { source.produce().await }));
        self
    }

    /// Names of all fields added so far
    pub fn names(&self) -> BTreeSet<String> {
        self.futures.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.futures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    pub(crate) fn into_futures(self) -> HashMap<String, FieldFuture> {
        self.futures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedSource(Value);

    #[async_trait]
    impl FieldSource for FixedSource {
        async fn produce(&self) -> Result<Value> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn builder_collects_names_and_futures() {
        let set = FieldSet::new()
            .field("user", async { Ok("Ringo Starr") })
            .ready("user_id", 0)
            .source("posts", Arc::new(FixedSource(json!(["octopus's garden"]))));

        assert_eq!(set.len(), 3);
        let names: Vec<String> = set.names().into_iter().collect();
        assert_eq!(names, ["posts", "user", "user_id"]);

        for (name, fut) in set.into_futures() {
            let value = fut.await.unwrap();
            assert!(!value.is_null(), "{name} produced null");
        }
    }

    #[tokio::test]
    async fn field_errors_pass_through() {
        let set = FieldSet::new().field("user", async {
            Err::<u8, _>(anyhow::anyhow!("unknown user"))
        });
        let mut futures = set.into_futures();
        let fut = futures.remove("user").unwrap();
        let err = fut.await.unwrap_err();
        assert!(err.to_string().contains("unknown user"));
    }
}
