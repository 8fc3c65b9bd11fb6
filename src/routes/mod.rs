// Route modules organization

pub mod base_routes;
pub mod camera_routes;
pub mod history_routes;
pub mod session_routes;

pub use base_routes::*;
pub use camera_routes::*;
pub use history_routes::*;
pub use session_routes::*;

use actix_web::{http::StatusCode, web, HttpResponse};

use crate::errors::AppError;

/// Register every kiosk route. Static session images are mounted by the caller.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(kiosk_page)
        .service(asset)
        .service(get_state)
        .service(start_session)
        .service(discard_session)
        .service(print_session)
        .service(reprint_last)
        .service(preview_stream)
        .service(camera_status)
        .service(list_sessions);
}

pub(crate) fn error_response(err: &AppError) -> HttpResponse {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(err.error_response())
}
