//! HTTP endpoint serving wall-clock profiles of the current process.
//!
//! `GET /debug/tempo/wall?seconds=N` samples for `N` seconds (default 5) and
//! responds with a gzip-compressed pprof profile, readable with
//! `go tool pprof`. `format=json` returns the profile model as JSON instead.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{self, Router};
use serde::Deserialize;
use tempo::{
    serialization, BacktraceSymbolizer, Configuration, OutputFormat, Session, SnapshotSource,
    Symbolizer, ThreadSnapshot,
};
use tokio_util::sync::CancellationToken;

pub const WALL_PATH: &str = "/debug/tempo/wall";
pub const DEFAULT_SECONDS: u64 = 5;

/// Shared by all requests. Each request gets its own [`Session`].
#[derive(Clone)]
pub struct ProfilerState {
    configuration: Configuration,
    source: Arc<dyn SnapshotSource>,
    symbolizer: Arc<dyn Symbolizer>,
}

impl ProfilerState {
    pub fn new(
        configuration: Configuration,
        source: Arc<dyn SnapshotSource>,
        symbolizer: Arc<dyn Symbolizer>,
    ) -> Self {
        Self {
            configuration,
            source,
            symbolizer,
        }
    }

    pub fn for_current_process(configuration: Configuration) -> tempo::Result<Self> {
        let source = ThreadSnapshot::new(&configuration)?;
        Ok(Self::new(
            configuration,
            Arc::new(source),
            Arc::new(BacktraceSymbolizer),
        ))
    }

    fn session(&self, duration: Duration, output_format: OutputFormat) -> Session {
        let configuration = Configuration {
            duration,
            output_format,
            ..self.configuration.clone()
        };
        Session::new(
            configuration,
            Arc::clone(&self.source),
            Arc::clone(&self.symbolizer),
        )
    }
}

/// Creates a router that serves the wall-clock profiling endpoint.
pub fn router(state: ProfilerState) -> Router {
    Router::new()
        .route(WALL_PATH, routing::get(handle_wall))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct WallQuery {
    seconds: Option<String>,
    format: Option<String>,
}

async fn handle_wall(
    State(state): State<ProfilerState>,
    Query(query): Query<WallQuery>,
) -> Response {
    let seconds = match query.seconds.as_deref() {
        None | Some("") => DEFAULT_SECONDS,
        Some(seconds) => match seconds.parse::<u64>() {
            Ok(seconds) => seconds,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, format!("invalid seconds: {}", e)).into_response()
            }
        },
    };
    let format = match query.format.as_deref() {
        None | Some("") => state.configuration.output_format,
        Some(format) => match format.parse::<OutputFormat>() {
            Ok(format) => format,
            Err(()) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("invalid format: {} (expected pprof or json)", format),
                )
                    .into_response()
            }
        },
    };

    let session = state.session(Duration::from_secs(seconds), format);
    log::debug!("Starting wall-clock profile for {}s", seconds);

    // Dropping the request future (client went away) cancels the session.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let result = tokio::task::spawn_blocking(move || {
        let profile = session.run(&cancel)?;
        let mut body = vec![];
        serialization::write(&profile, format, &mut body)?;
        Ok::<_, tempo::Error>(body)
    })
    .await;
    guard.disarm();

    match result {
        Ok(Ok(body)) => (
            [
                (header::CONTENT_TYPE, format.content_type()),
                (header::CONTENT_DISPOSITION, content_disposition(format)),
            ],
            body,
        )
            .into_response(),
        Ok(Err(e)) => {
            log::warn!("Wall-clock profile failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            log::warn!("Wall-clock profile task failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn content_disposition(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Pprof => "attachment; filename=\"wall.pb.gz\"",
        OutputFormat::Json => "inline",
    }
}
