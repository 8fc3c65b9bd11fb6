use actix_web::{get, post, web, HttpResponse, Responder};
use serde::Deserialize;
use tracing::info;

use crate::booth::{BoothCommand, BoothHandle};
use crate::config::Config;
use crate::errors::AppError;
use crate::routes::error_response;
use crate::session::ShotCount;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub shots: Option<u32>,
}

fn state_response(booth: &BoothHandle) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "state": booth.snapshot()
    }))
}

fn command_response(booth: &BoothHandle, result: Result<(), AppError>) -> HttpResponse {
    match result {
        Ok(()) => state_response(booth),
        Err(e) => error_response(&e),
    }
}

#[get("/api/state")]
pub async fn get_state(booth: web::Data<BoothHandle>) -> impl Responder {
    state_response(&booth)
}

#[post("/api/session")]
pub async fn start_session(
    booth: web::Data<BoothHandle>,
    config: web::Data<Config>,
    body: Option<web::Json<StartRequest>>,
) -> impl Responder {
    let requested = body
        .and_then(|b| b.into_inner().shots)
        .unwrap_or(config.session.shots);

    let shots = match ShotCount::try_from(requested) {
        Ok(shots) => shots,
        Err(e) => return error_response(&AppError::Config(e)),
    };

    info!("Session requested with {} shot(s)", shots.get());
    let result = booth
        .request(|reply| BoothCommand::Start(shots, reply))
        .await;
    command_response(&booth, result)
}

#[post("/api/discard")]
pub async fn discard_session(booth: web::Data<BoothHandle>) -> impl Responder {
    let result = booth.request(BoothCommand::Discard).await;
    command_response(&booth, result)
}

#[post("/api/print")]
pub async fn print_session(booth: web::Data<BoothHandle>) -> impl Responder {
    let result = booth.request(BoothCommand::Print).await;
    command_response(&booth, result)
}

#[post("/api/reprint")]
pub async fn reprint_last(booth: web::Data<BoothHandle>) -> impl Responder {
    let result = booth.request(BoothCommand::Reprint).await;
    command_response(&booth, result)
}
