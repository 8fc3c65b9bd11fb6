use actix_web::{get, web, HttpResponse, Responder};
use rust_embed::RustEmbed;

// Kiosk page and its assets, embedded at compile time
#[derive(RustEmbed)]
#[folder = "html/"]
struct Assets;

const KIOSK_PAGE: &str = "kiosk.html";

fn content_type_for(file: &str) -> &'static str {
    match file.rsplit('.').next() {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn embedded(file: &str) -> HttpResponse {
    match Assets::get(file) {
        Some(content) => HttpResponse::Ok()
            .content_type(content_type_for(file))
            .body(content.data.into_owned()),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "ok": false,
            "error": format!("No such asset: {}", file)
        })),
    }
}

#[get("/")]
pub async fn kiosk_page() -> impl Responder {
    embedded(KIOSK_PAGE)
}

#[get("/assets/{file}")]
pub async fn asset(path: web::Path<String>) -> impl Responder {
    embedded(&path.into_inner())
}
