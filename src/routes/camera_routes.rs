use actix_web::{get, web, HttpResponse, Responder};
use bytes::Bytes;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::frame_slot::FrameSlot;

const BOUNDARY: &str = "frame";

/// One part of a multipart/x-mixed-replace MJPEG stream.
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let boundary_prefix = format!("--{}\r\n", BOUNDARY).into_bytes();
    let header = format!(
        "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    )
    .into_bytes();
    let tail = b"\r\n";

    let mut part =
        Vec::with_capacity(boundary_prefix.len() + header.len() + jpeg.len() + tail.len());
    part.extend_from_slice(&boundary_prefix);
    part.extend_from_slice(&header);
    part.extend_from_slice(jpeg);
    part.extend_from_slice(tail);
    Bytes::from(part)
}

#[get("/preview")]
pub async fn preview_stream(slot: web::Data<FrameSlot>) -> impl Responder {
    let mut frames = slot.subscribe();
    let first = slot.latest();

    let stream = async_stream::stream! {
        info!("Preview client connected");
        if let Some(frame) = first {
            yield Ok::<Bytes, actix_web::Error>(mjpeg_part(&frame.jpeg));
        }

        loop {
            match frames.recv().await {
                Ok(jpeg) => yield Ok(mjpeg_part(&jpeg)),
                // Slow client: skip to the newest frame
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Preview client skipped {} frames", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Preview stream ended");
    };

    HttpResponse::Ok()
        .insert_header(("Content-Type", format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)))
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream)
}

#[get("/api/camera")]
pub async fn camera_status(slot: web::Data<FrameSlot>) -> impl Responder {
    let latest = slot.latest();
    HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "has_frame": latest.is_some(),
        "width": latest.as_ref().map(|f| f.width),
        "height": latest.as_ref().map(|f| f.height),
        "fault": slot.fault()
    }))
}
