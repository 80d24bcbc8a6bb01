//! HTTP boundary for distinct random number sampling.
//!
//! Serves a single read-only resource built on axum:
//!
//! - `GET /randomnumbers` returns 8 distinct integers in `[1, 99]`
//! - `GET /randomnumbers/{count}` returns `count` of them (when `accept_count` is on)
//! - `GET /openapi.json` describes the above (when `openapi` is on)
//! - `GET /healthz` answers `ok`
//!
//! Responses are JSON arrays of integers; validation failures are plain text.
//! CORS is off by default and, once enabled, permits everything unless
//! narrowed by the `cors` settings.
//!
//! ```ignore
//!   use randomnumbers_http_server::{load_settings, RandomNumbersServer};
//!   let settings = load_settings(&values)?;
//!   let server = RandomNumbersServer::new(Arc::new(settings)).await?;
//!   println!("listening on {}", server.local_addr());
//! ```

use core::num::IntErrorKind;
use core::str::FromStr as _;
use core::time::Duration;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::{self, rejection::PathRejection};
use axum::response::{IntoResponse as _, Response};
use axum::routing::get;
use axum::{Json, Router};
use http::StatusCode;
use rand::Rng;
use randomnumbers_sampler::{SampleError, SampleRange, SampleRequest, SharedRng};
use tokio::task::JoinHandle;
use tokio::time;
use tower_http::cors::{self, CorsLayer};
use tracing::{debug, error, info, instrument, trace, warn};

mod openapi;
mod settings;
pub use settings::{
    default_listen_address, load_settings, AllowedOrigins, Cors, CorsOrigin, ServiceSettings,
    CORS_DEFAULT_MAX_AGE_SECS,
};

/// Errors generated while configuring this HTTP server
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("problem reading settings: {0}")]
    Settings(String),

    #[error("server startup: {0}")]
    Init(String),

    #[error("deserializing settings: {0}")]
    SettingsToml(toml::de::Error),
}

struct RequestContext<R> {
    settings: Arc<ServiceSettings>,
    rng: Arc<SharedRng<R>>,
    range: SampleRange,
}

// derived `Clone` would require `R: Clone`
impl<R> Clone for RequestContext<R> {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            rng: Arc::clone(&self.rng),
            range: self.range,
        }
    }
}

/// Map a sampling failure onto a status code and plain text body
fn sample_error_response(err: &SampleError) -> (StatusCode, String) {
    let status = match err {
        SampleError::InvalidCount { .. } => StatusCode::BAD_REQUEST,
        SampleError::RangeExhausted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SampleError::InvalidRange { .. } | SampleError::RngUnavailable => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

#[instrument(level = "debug", skip_all)]
async fn random_numbers<R: Rng + Send + 'static>(
    extract::State(cx): extract::State<RequestContext<R>>,
) -> axum::response::Result<Response> {
    generate(cx, SampleRequest::default()).await
}

#[instrument(level = "debug", skip_all)]
async fn random_numbers_with_count<R: Rng + Send + 'static>(
    extract::State(cx): extract::State<RequestContext<R>>,
    count: Result<extract::Path<String>, PathRejection>,
) -> axum::response::Result<Response> {
    let extract::Path(count) = count.map_err(|err| {
        debug!(%err, "missing count");
        (StatusCode::BAD_REQUEST, "Count must be an integer.")
    })?;
    let count = parse_count(&count)?;
    let request = SampleRequest::new(count).map_err(|err| {
        debug!(count, "rejected count");
        sample_error_response(&err)
    })?;
    generate(cx, request).await
}

/// Parse a path count. Integers too wide for `i64` are out of bounds, not malformed.
fn parse_count(count: &str) -> Result<i64, (StatusCode, String)> {
    count.parse::<i64>().map_err(|err| match err.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
            debug!(count, "count overflows");
            let count = if count.starts_with('-') {
                i64::MIN
            } else {
                i64::MAX
            };
            sample_error_response(&SampleError::InvalidCount { count })
        }
        _ => {
            debug!(count, %err, "count is not an integer");
            (
                StatusCode::BAD_REQUEST,
                "Count must be an integer.".to_string(),
            )
        }
    })
}

/// Run the sampler on the blocking pool, bounded by the configured timeout
async fn generate<R: Rng + Send + 'static>(
    RequestContext {
        settings,
        rng,
        range,
    }: RequestContext<R>,
    request: SampleRequest,
) -> axum::response::Result<Response> {
    let task = tokio::task::spawn_blocking(move || rng.sample(request, range));
    let res = if let Some(timeout) = settings.timeout_ms.map(Duration::from_millis) {
        let Ok(res) = time::timeout(timeout, task).await else {
            warn!(count = request.count(), ?timeout, "sampling timed out");
            return Err(StatusCode::REQUEST_TIMEOUT.into());
        };
        res
    } else {
        task.await
    };
    let values = res
        .map_err(|err| {
            error!(%err, "sampling task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        })?
        .map_err(|err| {
            debug!(%err, "sampling failed");
            sample_error_response(&err)
        })?;
    trace!(?values, "responding with sample");
    let mut res = Json(values).into_response();
    if let Some(cache_control) = settings.cache_control.as_ref() {
        let cache_control = http::HeaderValue::from_str(cache_control)
            .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
        res.headers_mut()
            .append(http::header::CACHE_CONTROL, cache_control);
    }
    Ok(res)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Build a CORS layer from settings. Lists that are missing or empty allow anything.
fn get_cors_layer(settings: &ServiceSettings) -> anyhow::Result<CorsLayer> {
    let cors_settings = &settings.cors;
    let allow_origin: Vec<_> = cors_settings
        .allowed_origins
        .as_ref()
        .map(|origins| {
            origins
                .iter()
                .map(AsRef::as_ref)
                .map(http::HeaderValue::from_str)
                .collect::<Result<_, _>>()
                .context("failed to parse allowed origins")
        })
        .transpose()?
        .unwrap_or_default();
    let allow_origin = if allow_origin.is_empty() {
        cors::AllowOrigin::any()
    } else {
        cors::AllowOrigin::list(allow_origin)
    };
    let allow_headers = parse_list(
        cors_settings.allowed_headers.as_deref(),
        http::HeaderName::from_str,
    )
    .context("failed to parse allowed header names")?;
    let allow_headers = if allow_headers.is_empty() {
        cors::AllowHeaders::any()
    } else {
        cors::AllowHeaders::list(allow_headers)
    };
    let allow_methods = parse_list(
        cors_settings.allowed_methods.as_deref(),
        http::Method::from_str,
    )
    .context("failed to parse allowed methods")?;
    let allow_methods = if allow_methods.is_empty() {
        cors::AllowMethods::any()
    } else {
        cors::AllowMethods::list(allow_methods)
    };
    let expose_headers = parse_list(
        cors_settings.exposed_headers.as_deref(),
        http::HeaderName::from_str,
    )
    .context("failed to parse exposed header names")?;
    let expose_headers = if expose_headers.is_empty() {
        cors::ExposeHeaders::any()
    } else {
        cors::ExposeHeaders::list(expose_headers)
    };
    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_headers(allow_headers)
        .allow_methods(allow_methods)
        .expose_headers(expose_headers)
        .max_age(Duration::from_secs(
            cors_settings
                .max_age_secs
                .unwrap_or(CORS_DEFAULT_MAX_AGE_SECS),
        )))
}

fn parse_list<T, E>(
    values: Option<&[String]>,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<Vec<T>, E> {
    values
        .unwrap_or_default()
        .iter()
        .map(|v| parse(v))
        .collect()
}

/// Build the router serving the endpoints enabled in `settings`
pub fn router<R: Rng + Send + 'static>(
    settings: Arc<ServiceSettings>,
    rng: Arc<SharedRng<R>>,
) -> anyhow::Result<Router> {
    let mut router = Router::new()
        .route("/randomnumbers", get(random_numbers::<R>))
        .route("/healthz", get(healthz));
    if settings.accept_count() {
        router = router.route(
            "/randomnumbers/{count}",
            get(random_numbers_with_count::<R>),
        );
    }
    if settings.openapi() {
        let doc = openapi::document(settings.accept_count());
        router = router.route(
            "/openapi.json",
            get(move || {
                let doc = doc.clone();
                async move { Json(doc) }
            }),
        );
    }
    if settings.cors.is_enabled() {
        router = router.layer(get_cors_layer(&settings)?);
    }
    Ok(router.with_state(RequestContext {
        settings,
        rng,
        range: SampleRange::default(),
    }))
}

/// Bind a listening socket for `addr` with `SO_REUSEADDR` set
fn get_tcp_listener(addr: SocketAddr) -> Result<std::net::TcpListener, HttpServerError> {
    let socket = match &addr {
        SocketAddr::V4(_) => tokio::net::TcpSocket::new_v4(),
        SocketAddr::V6(_) => tokio::net::TcpSocket::new_v6(),
    }
    .map_err(|err| HttpServerError::Init(format!("Unable to open socket: {err}")))?;
    socket.set_reuseaddr(!cfg!(windows)).map_err(|err| {
        HttpServerError::Init(format!("Error when setting socket to reuseaddr: {err}"))
    })?;
    socket
        .bind(addr)
        .map_err(|err| HttpServerError::Init(format!("Unable to bind to {addr}: {err}")))?;
    let listener = socket
        .listen(1024)
        .map_err(|err| HttpServerError::Init(format!("unable to listen on socket: {err}")))?;
    listener
        .into_std()
        .map_err(|err| HttpServerError::Init(format!("Unable to get listener: {err}")))
}

/// A running random numbers HTTP server
///
/// Dropping the server shuts the listener down and aborts the serving task.
pub struct RandomNumbersServer {
    /// The address the listener is bound to
    addr: SocketAddr,
    /// The handle to the server handling incoming requests
    handle: axum_server::Handle,
    /// The asynchronous task running the server
    task: JoinHandle<()>,
}

impl RandomNumbersServer {
    /// Bind the configured address and start serving in a background task
    ///
    /// Values are drawn from a [`rand::rngs::StdRng`] seeded with `seed` when
    /// configured, otherwise from OS entropy.
    #[instrument(skip(settings))]
    pub async fn new(settings: Arc<ServiceSettings>) -> anyhow::Result<Self> {
        let rng = match settings.seed {
            Some(seed) => {
                info!(seed, "using seeded random number generator");
                SharedRng::seeded(seed)
            }
            None => SharedRng::from_os_rng().context("failed to seed random number generator")?,
        };
        Self::with_rng(settings, rng).await
    }

    /// Like [`RandomNumbersServer::new`], drawing values from `rng`
    #[instrument(skip_all)]
    pub async fn with_rng<R: Rng + Send + 'static>(
        settings: Arc<ServiceSettings>,
        rng: SharedRng<R>,
    ) -> anyhow::Result<Self> {
        let addr = settings.address.unwrap_or_else(default_listen_address);
        let service = router(Arc::clone(&settings), Arc::new(rng))?;

        let listener = get_tcp_listener(addr)?;
        let addr = listener
            .local_addr()
            .context("failed to get listener address")?;
        info!(
            %addr,
            accept_count = settings.accept_count(),
            cors = settings.cors.is_enabled(),
            openapi = settings.openapi(),
            "randomnumbers starting listener",
        );

        let handle = axum_server::Handle::new();
        let task_handle = handle.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = axum_server::from_tcp(listener)
                .handle(task_handle)
                .serve(service.into_make_service())
                .await
            {
                error!(error = %e, %addr, "failed to serve HTTP");
            }
        });
        Ok(Self { addr, handle, task })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections, giving in-flight requests `grace` to finish
    pub fn shutdown(&self, grace: Option<Duration>) {
        debug!(addr = %self.addr, ?grace, "shutting down listener");
        self.handle.graceful_shutdown(grace);
    }

    /// Wait for the serving task to exit
    pub async fn stopped(&mut self) -> anyhow::Result<()> {
        (&mut self.task).await.context("server task failed")
    }
}

impl Drop for RandomNumbersServer {
    /// Does not block or fail if the server has already stopped.
    fn drop(&mut self) {
        self.handle.shutdown();
        self.task.abort();
    }
}
