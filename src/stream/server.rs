//! HTTP egress: MJPEG feed and health check

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::lifecycle::StopSignal;
use crate::store::SharedFrameStore;
use crate::stream::generator::{StreamGenerator, StreamSettings, CONTENT_TYPE};

/// Shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SharedFrameStore>,
    pub settings: StreamSettings,
    pub stop: StopSignal,
    clients: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(store: Arc<SharedFrameStore>, settings: StreamSettings, stop: StopSignal) -> Self {
        Self {
            store,
            settings,
            stop,
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of clients currently attached to the feed
    pub fn active_clients(&self) -> usize {
        self.clients.load(Ordering::Acquire)
    }
}

/// Decrements the client count when the response body is dropped
struct ClientGuard(Arc<AtomicUsize>);

impl ClientGuard {
    fn attach(clients: &Arc<AtomicUsize>) -> Self {
        let active = clients.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::counter!("lookout_stream_clients_total").increment(1);
        info!("{} stream client(s) attached", active);
        Self(clients.clone())
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let active = self.0.fetch_sub(1, Ordering::AcqRel) - 1;
        info!("Stream client detached, {} remaining", active);
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(video_feed))
        .route("/health", get(health))
        .with_state(state)
}

#[instrument(skip(state))]
async fn video_feed(State(state): State<AppState>) -> Response {
    let guard = ClientGuard::attach(&state.clients);
    let generator = StreamGenerator::new(state.store.clone(), state.settings, state.stop.clone());
    let stream = generator.into_stream().map(move |chunk| {
        let _attached = &guard;
        chunk
    });

    (
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Serve until `shutdown` resolves. Open feeds end on their own once the stop
/// signal is set.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Video feed listening on http://{}/", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
