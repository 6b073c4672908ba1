use crate::error::ThrottleError;
use crate::gcra::RateParams;
use crate::limiter::GcraLimiter;
use crate::store::KeyStore;
use crate::telemetry::{NullSink, TelemetrySink};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that admits each request through a [`GcraLimiter`], keyed per request.
///
/// Every request costs one unit. `key_fn` maps a request to its subject
/// (client address, API token, tenant).
pub struct RateLimitLayer<S, K, T = NullSink> {
    limiter: Arc<GcraLimiter<S, T>>,
    params: RateParams,
    key_fn: Arc<K>,
}

impl<S, K, T> Clone for RateLimitLayer<S, K, T> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), params: self.params, key_fn: self.key_fn.clone() }
    }
}

impl<S, K, T> RateLimitLayer<S, K, T> {
    /// Create a new rate limit layer.
    pub fn new(limiter: GcraLimiter<S, T>, params: RateParams, key_fn: K) -> Self {
        Self { limiter: Arc::new(limiter), params, key_fn: Arc::new(key_fn) }
    }
}

impl<Svc, S, K, T> Layer<Svc> for RateLimitLayer<S, K, T> {
    type Service = RateLimitService<Svc, S, K, T>;

    fn layer(&self, service: Svc) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: self.limiter.clone(),
            params: self.params,
            key_fn: self.key_fn.clone(),
        }
    }
}

/// Middleware service that enforces rate limits.
pub struct RateLimitService<Svc, S, K, T = NullSink> {
    inner: Svc,
    limiter: Arc<GcraLimiter<S, T>>,
    params: RateParams,
    key_fn: Arc<K>,
}

impl<Svc: Clone, S, K, T> Clone for RateLimitService<Svc, S, K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            params: self.params,
            key_fn: self.key_fn.clone(),
        }
    }
}

impl<Svc, S, K, T, Req> Service<Req> for RateLimitService<Svc, S, K, T>
where
    Svc: Service<Req> + Clone + Send + 'static,
    Svc::Future: Send + 'static,
    S: KeyStore + 'static,
    K: Fn(&Req) -> String + Send + Sync + 'static,
    T: TelemetrySink + Sync,
    T::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = Svc::Response;
    type Error = ThrottleError<Svc::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(ThrottleError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let params = self.params;
        let key = (self.key_fn)(&req);
        // Take the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let decision =
                limiter.check_params(&key, &params, 1).await.map_err(ThrottleError::Limiter)?;
            if decision.limited {
                return Err(ThrottleError::RateLimited {
                    retry_after: decision.retry_after_duration(),
                    reset_after: decision.reset_after_duration(),
                });
            }
            inner.call(req).await.map_err(ThrottleError::Inner)
        })
    }
}
