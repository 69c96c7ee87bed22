//! Interceptor registration and dispatch
//!
//! A [`NetworkConfiguration`] plays the role of the platform's default session
//! configuration: interceptors are registered on it explicitly, and every
//! [`NetworkSession`] built from it runs requests through the registered
//! chain before they reach the [`Transport`].

use super::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::models::CachePolicy;
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};

/// A link in the request path. Implementations must call `next.run` exactly
/// once with the request they were given, unless they mean to short-circuit.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Stable identity used to deduplicate registration
    fn name(&self) -> &'static str;

    async fn intercept(
        &self,
        request: HttpRequest,
        next: Next<'_>,
    ) -> Result<HttpResponse, TransportError>;
}

/// The rest of the chain, ending at the transport
pub struct Next<'a> {
    transport: &'a dyn Transport,
    chain: &'a [Arc<dyn Interceptor>],
}

impl<'a> Next<'a> {
    pub async fn run(self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        match self.chain.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    transport: self.transport,
                    chain: rest,
                };
                current.intercept(request, next).await
            }
            None => self.transport.execute(request).await,
        }
    }
}

#[derive(Default)]
struct Registry {
    interceptors: Vec<Arc<dyn Interceptor>>,
    cache_policy: CachePolicy,
}

/// Default configuration shared by every session the host app builds
#[derive(Default)]
pub struct NetworkConfiguration {
    registry: RwLock<Registry>,
}

impl NetworkConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an interceptor at the end of the chain. Returns false if one
    /// with the same name is already installed.
    pub fn register(&self, interceptor: Arc<dyn Interceptor>) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if registry
            .interceptors
            .iter()
            .any(|existing| existing.name() == interceptor.name())
        {
            tracing::debug!("Interceptor {} already registered", interceptor.name());
            return false;
        }
        tracing::debug!("Registered interceptor {}", interceptor.name());
        registry.interceptors.push(interceptor);
        true
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let before = registry.interceptors.len();
        registry.interceptors.retain(|i| i.name() != name);
        let removed = registry.interceptors.len() != before;
        if removed {
            tracing::debug!("Unregistered interceptor {}", name);
        }
        removed
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .interceptors
            .iter()
            .any(|i| i.name() == name)
    }

    pub fn interceptor_count(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .interceptors
            .len()
    }

    pub fn set_cache_policy(&self, policy: CachePolicy) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .cache_policy = policy;
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .cache_policy
    }

    fn chain(&self) -> Vec<Arc<dyn Interceptor>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .interceptors
            .clone()
    }
}

/// A client built from a [`NetworkConfiguration`].
///
/// The cache policy is fixed when the session is built and stamped on every
/// request it sends. The interceptor chain is read per request, so
/// registering after construction still applies.
#[derive(Clone)]
pub struct NetworkSession {
    config: Arc<NetworkConfiguration>,
    transport: Arc<dyn Transport>,
    cache_policy: CachePolicy,
}

impl NetworkSession {
    pub fn new(config: Arc<NetworkConfiguration>, transport: Arc<dyn Transport>) -> Self {
        let cache_policy = config.cache_policy();
        Self {
            config,
            transport,
            cache_policy,
        }
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    pub async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse, TransportError> {
        request.set_cache_policy(self.cache_policy);
        let chain = self.config.chain();
        Next {
            transport: self.transport.as_ref(),
            chain: &chain,
        }
        .run(request)
        .await
    }
}
