//! Thin HTTP/JSON request facade (spec.md §4.3, §6).
//!
//! Grounded on the actix-web app/route wiring in
//! `tos-network-tos/daemon/src/rpc/mod.rs` and
//! `tos-network-tos/common/src/rpc/server/mod.rs`; the endpoint set
//! and exact request/response shapes are a typed reimplementation of
//! `examples/original_source/service/app.py`. This module validates
//! payloads and increments metrics; all non-trivial behavior lives in
//! [`crate::server::lock_manager::LockManager`].

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use log::info;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};

use crate::error::LockError;
use crate::server::lock_manager::{metrics, LockManager, Probe, ProbeReply};

/// Maps a malformed JSON body onto the same HTTP 422 the core raises
/// for a bad request (spec.md §7: "malformed request body: rejected
/// by the facade as HTTP 422-class before reaching the core"),
/// mirroring the Pydantic-style 422-on-validation-error convention in
/// `examples/original_source/service/app.py`.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| LockError::BadRequest(err.to_string()).into())
}

#[derive(Deserialize)]
pub struct AcquireRequest {
    pub tx: String,
    pub res: String,
    /// Accepted for forward compatibility; has no effect on the core
    /// (spec.md §6, §9 open question 2).
    #[serde(default = "default_ttl_ms")]
    #[allow(dead_code)]
    pub ttl_ms: u64,
}

fn default_ttl_ms() -> u64 {
    60_000
}

#[derive(Deserialize)]
pub struct ReleaseRequest {
    pub tx: String,
    pub res: String,
}

#[derive(Deserialize)]
pub struct AbortRequest {
    pub tx: String,
}

#[derive(Serialize)]
struct AcquireResponse {
    granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    holder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocked_on: Option<String>,
}

#[derive(Serialize)]
struct ReleaseResponse {
    released: bool,
}

#[derive(Serialize)]
struct AbortResponse {
    aborted: String,
    affected: u32,
}

#[derive(Serialize)]
struct HealthResponse {
    service: String,
    status: &'static str,
}

#[derive(Serialize)]
struct WaitForGraphResponse {
    service: String,
    edges: Vec<(String, String)>,
}

async fn acquire(lm: web::Data<LockManager>, req: web::Json<AcquireRequest>) -> impl Responder {
    let outcome = lm.acquire(&req.tx, &req.res).await;
    if outcome.granted {
        HttpResponse::Ok().json(AcquireResponse {
            granted: true,
            holder: Some(req.tx.clone()),
            blocked_on: None,
        })
    } else {
        HttpResponse::Ok().json(AcquireResponse {
            granted: false,
            holder: None,
            blocked_on: outcome.holder,
        })
    }
}

async fn release(
    lm: web::Data<LockManager>,
    req: web::Json<ReleaseRequest>,
) -> Result<impl Responder, LockError> {
    if lm.release(&req.tx, &req.res) {
        Ok(HttpResponse::Ok().json(ReleaseResponse { released: true }))
    } else {
        Err(LockError::NotOwner {
            tx: req.tx.clone(),
            res: req.res.clone(),
        })
    }
}

async fn abort(lm: web::Data<LockManager>, req: web::Json<AbortRequest>) -> impl Responder {
    let affected = lm.abort(&req.tx);
    HttpResponse::Ok().json(AbortResponse {
        aborted: req.tx.clone(),
        affected,
    })
}

async fn probe(lm: web::Data<LockManager>, p: web::Json<Probe>) -> impl Responder {
    let reply: ProbeReply = lm.on_probe(p.into_inner()).await;
    if reply.deadlock {
        info!(
            "probe -> DEADLOCK: victim={:?}",
            reply.victim_tx.as_deref().unwrap_or("?")
        );
    }
    HttpResponse::Ok().json(reply)
}

async fn wait_for_graph(lm: web::Data<LockManager>) -> impl Responder {
    HttpResponse::Ok().json(WaitForGraphResponse {
        service: lm.service_name().to_string(),
        edges: lm.blocked_edges(),
    })
}

async fn health(lm: web::Data<LockManager>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        service: lm.service_name().to_string(),
        status: "ok",
    })
}

async fn metrics_endpoint() -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = metrics::registry_gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("encoding the prometheus registry should never fail");
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Builds the actix-web app, mirroring the route table in spec.md §6.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/acquire", web::post().to(acquire))
        .route("/release", web::post().to(release))
        .route("/abort", web::post().to(abort))
        .route("/probe", web::post().to(probe))
        .route("/wfg", web::get().to(wait_for_graph))
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_endpoint));
}

/// Starts the HTTP server bound to `0.0.0.0:{port}`, matching the
/// teacher's `HttpServer::new(...).bind(...).run()` pattern in
/// `daemon/src/rpc/mod.rs`.
pub async fn serve(lm: LockManager, port: u16) -> std::io::Result<()> {
    let data = web::Data::new(lm);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .app_data(json_config())
            .configure(configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
