//! `/metrics`, `/healthz`, `/readyz` over a bare `hyper` server. No axum:
//! this binary already pulls in `hyper`/`hyper-util` for its watch/lease
//! traffic, so a second HTTP framework for three routes isn't worth it.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use owo_colors::OwoColorize;
use prometheus::Encoder;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::metrics::ControllerMetrics;

#[derive(Clone)]
struct ServerState {
    metrics: Arc<ControllerMetrics>,
}

/// Binds `port` and serves until `shutdown` is cancelled.
pub async fn run(port: u16, metrics: Arc<ControllerMetrics>, shutdown: CancellationToken) -> std::io::Result<()> {
    let state = ServerState { metrics };

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await.inspect_err(|e| {
        eprintln!("{}", format!("🛑 Failed to bind metrics server to {addr}: {e}").red());
    })?;
    println!("{}{}", "📈 Starting metrics server • port=".green(), port.to_string().green().dimmed());
    let started = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        eprintln!("metrics server accept error: {e}");
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let state = state.clone();
                let conn_shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(req, state.clone()));
                    let conn = ConnBuilder::new(TokioExecutor::new()).serve_connection(io, service);
                    tokio::pin!(conn);
                    tokio::select! {
                        _ = conn_shutdown.cancelled() => {}
                        res = &mut conn => {
                            if let Err(e) = res {
                                eprintln!("metrics server connection error: {e}");
                            }
                        }
                    }
                });
            }
        }
    }

    println!(
        "{} {}",
        "🛑 Metrics server stopped gracefully • uptime was".red(),
        format!("{:.2?}", started.elapsed()).red().dimmed()
    );
    Ok(())
}

async fn handle(req: Request<Incoming>, state: ServerState) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/healthz" => text(StatusCode::OK, "ok"),
        "/readyz" => text(StatusCode::OK, "ok"),
        "/metrics" => metrics_response(&state.metrics),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

fn text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body.to_owned())))
        .expect("static response is well-formed")
}

fn metrics_response(metrics: &ControllerMetrics) -> Response<Full<Bytes>> {
    let encoder = prometheus::TextEncoder::new();
    let families = metrics.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        eprintln!("failed to encode metrics: {e}");
        return text(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics");
    }
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", encoder.format_type())
        .body(Full::new(Bytes::from(buffer)))
        .expect("metrics response is well-formed")
}
