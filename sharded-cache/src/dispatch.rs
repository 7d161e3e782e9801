//! Running provider operations off the caller's task.
//!
//! Two contracts exist on purpose:
//!
//! - submit-and-await: reads (`get_async`, `try_get_async`, `get_many_async`)
//!   return a [`PendingRead`] that resolves to the same outcome as the
//!   direct call.
//! - submit-and-forget: writes (`add_async`, `remove_async`) return nothing.
//!   The caller cannot tell whether the write succeeded, failed or is still
//!   pending; failures are only logged.
//!
//! Two forgotten writes on the same key are not ordered relative to each
//! other. Dropping a `PendingRead` does not cancel the node request.
//!
//! All of these spawn onto the ambient tokio runtime. Outside one, a read
//! resolves to [`Error::Dispatch`] and a write is logged and dropped.

use crate::domain::TtlSpec;
use crate::ports::CacheCodec;
use crate::provider::CacheProvider;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug)]
enum ReadState<T> {
    Running(JoinHandle<Result<T>>),
    Rejected(Option<Error>),
}

/// Result of a read submitted with [`submit_and_await`].
#[derive(Debug)]
pub struct PendingRead<T> {
    state: ReadState<T>,
}

impl<T> Future for PendingRead<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            ReadState::Running(handle) => match ready!(Pin::new(handle).poll(cx)) {
                Ok(result) => Poll::Ready(result),
                Err(e) => Poll::Ready(Err(Error::Dispatch(e.to_string()))),
            },
            ReadState::Rejected(error) => Poll::Ready(Err(error
                .take()
                .unwrap_or_else(|| Error::Dispatch("read polled after completion".to_string())))),
        }
    }
}

pub fn submit_and_await<F, T>(operation: F) -> PendingRead<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let state = match Handle::try_current() {
        Ok(runtime) => ReadState::Running(runtime.spawn(operation)),
        Err(e) => ReadState::Rejected(Some(Error::Dispatch(e.to_string()))),
    };
    PendingRead { state }
}

pub fn submit_and_forget<F>(name: &'static str, key: String, operation: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let runtime = match Handle::try_current() {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(operation = name, key = %key, error = %e, "fire-and-forget write dropped, no runtime");
            return;
        }
    };
    runtime.spawn(async move {
        if let Err(e) = operation.await {
            warn!(operation = name, key = %key, error = %e, "fire-and-forget write failed");
        }
    });
}

impl<C: CacheCodec> CacheProvider<C> {
    pub fn get_async<T>(&self, key: &str) -> PendingRead<T>
    where
        T: DeserializeOwned + Default + Send + 'static,
    {
        let provider = self.clone();
        let key = key.to_string();
        submit_and_await(async move { provider.get(&key).await })
    }

    pub fn try_get_async<T>(&self, key: &str) -> PendingRead<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let provider = self.clone();
        let key = key.to_string();
        submit_and_await(async move { provider.try_get(&key).await })
    }

    pub fn get_many_async<T, I, K>(&self, keys: I) -> PendingRead<HashMap<String, T>>
    where
        T: DeserializeOwned + Send + 'static,
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let provider = self.clone();
        let keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
        submit_and_await(async move { provider.get_many(keys).await })
    }

    /// Fire-and-forget [`add`](CacheProvider::add). The value is encoded
    /// before this returns; an encoding failure is logged and nothing is sent.
    pub fn add_async<V>(&self, key: &str, value: &V, ttl: impl Into<TtlSpec>)
    where
        V: Serialize + ?Sized,
    {
        let bytes = match self.codec().encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "fire-and-forget add dropped");
                return;
            }
        };
        let provider = self.clone();
        let ttl = ttl.into();
        let key = key.to_string();
        submit_and_forget("add", key.clone(), async move {
            provider.add_bytes(&key, bytes, ttl).await
        });
    }

    /// Fire-and-forget [`remove`](CacheProvider::remove).
    pub fn remove_async(&self, key: &str) {
        let provider = self.clone();
        let key = key.to_string();
        submit_and_forget("remove", key.clone(), async move {
            provider.remove(&key).await
        });
    }
}
