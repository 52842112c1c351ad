use crate::gui_bridge::observer::serve_observer;
use crate::workflow::runner::Runner;
use anyhow::Context;
use futures::StreamExt;
use log::{info, warn};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use trafficcore::scenario_interface::{ProgressEvent, ScenarioRequest};
use warp::http::header::{HeaderValue, CONTENT_TYPE};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::hyper::Body;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const NDJSON: &str = "application/x-ndjson";

/// HTTP and WebSocket front of the runner, mounted under `/api/scenario`.
pub struct GuiBridge {
    runner: Runner,
    allowed_origins: Vec<String>,
}

impl GuiBridge {
    pub fn new(runner: Runner, allowed_origins: Vec<String>) -> Self {
        Self {
            runner,
            allowed_origins,
        }
    }

    pub fn routes(
        &self,
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone + Send + Sync + 'static {
        let runner = self.runner.clone();
        let runner_filter = warp::any().map(move || runner.clone());

        let generate = warp::path("generate")
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::bytes())
            .and(runner_filter.clone())
            .map(|body: Bytes, runner: Runner| generate_reply(&body, &runner));

        let simulation = warp::path("ws")
            .and(warp::path("simulation"))
            .and(warp::path::end())
            .and(warp::ws())
            .and(runner_filter)
            .map(|ws: warp::ws::Ws, runner: Runner| {
                ws.on_upgrade(move |socket| serve_observer(socket, runner))
            });

        let health = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| warp::reply::json(&json!({"status": "ok"})));

        let cors = warp::cors()
            .allow_origins(self.allowed_origins.iter().map(String::as_str))
            .allow_methods(vec!["GET", "POST", "OPTIONS"])
            .allow_headers(vec!["content-type"]);

        warp::path("api")
            .and(warp::path("scenario"))
            .and(generate.or(simulation).or(health))
            .with(cors)
            .with(warp::log("simulator::http"))
    }

    /// Binds `addr` and serves until `shutdown` resolves.
    pub fn serve(
        &self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<(SocketAddr, impl Future<Output = ()>)> {
        let (bound, server) = warp::serve(self.routes())
            .try_bind_with_graceful_shutdown(addr, shutdown)
            .with_context(|| format!("binding HTTP bridge to {addr}"))?;
        info!("HTTP bridge listening on {bound}");
        Ok((bound, server))
    }
}

fn generate_reply(body: &[u8], runner: &Runner) -> Response {
    let request: ScenarioRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => return rejected(format!("Error: invalid request: {err}")),
    };
    match runner.generate(request) {
        Ok(events) => {
            let lines = events.map(|event| Ok::<_, Infallible>(event.to_line()));
            ndjson(Body::wrap_stream(lines), StatusCode::OK)
        }
        Err(err) => rejected(format!("Error: {err}")),
    }
}

fn rejected(message: String) -> Response {
    warn!("generation request rejected: {message}");
    ndjson(
        Body::from(ProgressEvent::failure(message).to_line()),
        StatusCode::BAD_REQUEST,
    )
}

fn ndjson(body: Body, status: StatusCode) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(NDJSON));
    response
}
