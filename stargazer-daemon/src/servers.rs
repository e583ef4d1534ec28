//! Health and metrics HTTP servers.
//!
//! Both are independent of reconciliation state. Every route has its own token
//! bucket; a request waits for a token for at most [`MAX_RATE_LIMIT_WAIT`] and
//! is then answered with `429 Too Many Requests`.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::Router;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::DaemonError;

pub const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(5);

/// Requests per second and burst size of one route's bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSpec {
    pub per_second: u32,
    pub burst: u32,
}

pub const HEALTH_RATE: RateSpec = RateSpec {
    per_second: 3,
    burst: 1,
};

pub const METRICS_RATE: RateSpec = RateSpec {
    per_second: 5,
    burst: 20,
};

/// Token bucket guarding a single route.
#[derive(Clone)]
pub struct RouteLimiter {
    route: &'static str,
    bucket: Arc<DefaultDirectRateLimiter>,
    max_wait: Duration,
}

impl RouteLimiter {
    pub fn new(route: &'static str, spec: RateSpec, max_wait: Duration) -> Result<Self, DaemonError> {
        let invalid = |reason: &str| DaemonError::RateLimit {
            route,
            reason: reason.to_string(),
        };
        let per_second = NonZeroU32::new(spec.per_second).ok_or_else(|| invalid("rate is zero"))?;
        let burst = NonZeroU32::new(spec.burst).ok_or_else(|| invalid("burst is zero"))?;

        Ok(Self {
            route,
            bucket: Arc::new(RateLimiter::direct(
                Quota::per_second(per_second).allow_burst(burst),
            )),
            max_wait,
        })
    }

    /// Build a limiter from an explicit quota. Tests use slow quotas.
    pub fn with_quota(route: &'static str, quota: Quota, max_wait: Duration) -> Self {
        Self {
            route,
            bucket: Arc::new(RateLimiter::direct(quota)),
            max_wait,
        }
    }

    fn guard<S>(self, handler: MethodRouter<S>) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        handler.layer(middleware::from_fn_with_state(self, rate_limit))
    }
}

async fn rate_limit(State(limiter): State<RouteLimiter>, request: Request, next: Next) -> Response {
    match tokio::time::timeout(limiter.max_wait, limiter.bucket.until_ready()).await {
        Ok(()) => next.run(request).await,
        Err(_) => {
            warn!(route = limiter.route, "rate limit exceeded");
            StatusCode::TOO_MANY_REQUESTS.into_response()
        }
    }
}

async fn ok() -> &'static str {
    "ok"
}

/// `/livez` and `/readyz`, each with its own bucket.
pub fn health_router(spec: RateSpec) -> Result<Router, DaemonError> {
    Ok(health_router_with(
        RouteLimiter::new("/livez", spec, MAX_RATE_LIMIT_WAIT)?,
        RouteLimiter::new("/readyz", spec, MAX_RATE_LIMIT_WAIT)?,
    ))
}

pub fn health_router_with(livez: RouteLimiter, readyz: RouteLimiter) -> Router {
    Router::new()
        .route("/livez", livez.guard(get(ok)))
        .route("/readyz", readyz.guard(get(ok)))
}

/// `/metrics` rendering the Prometheus text exposition.
pub fn metrics_router(handle: PrometheusHandle, spec: RateSpec) -> Result<Router, DaemonError> {
    let limiter = RouteLimiter::new("/metrics", spec, MAX_RATE_LIMIT_WAIT)?;
    let render = get(move || {
        let handle = handle.clone();
        async move { handle.render() }
    });
    Ok(Router::new().route("/metrics", limiter.guard(render)))
}

/// Serve `router` on `addr` until `cancel` fires, then drain connections for at
/// most `grace` before giving up on them.
pub async fn serve(
    server: &'static str,
    addr: SocketAddr,
    router: Router,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<(), DaemonError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| DaemonError::Bind {
            server,
            addr,
            source,
        })?;
    info!(server, addr = %addr, "listening");
    serve_listener(server, listener, router, cancel, grace).await
}

pub async fn serve_listener(
    server: &'static str,
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<(), DaemonError> {
    let shutdown = cancel.clone();
    let serving = axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .into_future();
    tokio::pin!(serving);

    let deadline = async {
        cancel.cancelled().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = &mut serving => {
            result.map_err(|e| crate::error::io_err(format!("{server} server"), e))?;
            info!(server, "server stopped");
        }
        _ = deadline => {
            warn!(server, grace_ms = grace.as_millis() as u64, "graceful shutdown timed out");
        }
    }
    Ok(())
}
