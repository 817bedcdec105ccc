use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warp::Filter;

use crate::relay::RoomTable;

pub const SERVICE_NAME: &str = "Rendezvous Relay";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: String,
    pub service: String,
    pub active_rooms: usize,
}

/// Read-only status routes: an HTML page at `/` and JSON at `/status`
pub fn status_routes(
    table: Arc<RoomTable>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    status_page(Arc::clone(&table)).or(status_json(table))
}

pub fn status_json(
    table: Arc<RoomTable>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_room_table(table))
        .and_then(|table: Arc<RoomTable>| async move {
            let report = StatusReport {
                status: "online".to_string(),
                service: SERVICE_NAME.to_string(),
                active_rooms: table.count().await,
            };
            Ok::<_, Infallible>(warp::reply::json(&report))
        })
}

pub fn status_page(
    table: Arc<RoomTable>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .and(with_room_table(table))
        .and_then(|table: Arc<RoomTable>| async move {
            let rooms = table.count().await;
            Ok::<_, Infallible>(warp::reply::html(render_page(rooms)))
        })
}

fn render_page(active_rooms: usize) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>{service}</title>
<style>
body {{ font-family: Arial, sans-serif; max-width: 600px; margin: 50px auto; padding: 20px; background: #1a1a2e; color: #eee; }}
.status {{ background: #16213e; padding: 20px; border-radius: 10px; }}
.online {{ color: #00ff88; }}
</style>
</head>
<body>
<h1>{service}</h1>
<div class="status">
<p><strong>Status:</strong> <span class="online">Online</span></p>
<p><strong>Active Rooms:</strong> {active_rooms}</p>
</div>
</body>
</html>"#,
        service = SERVICE_NAME,
        active_rooms = active_rooms,
    )
}

/// Bind the status responder on its own port.
///
/// Returns the bound address and the server future; the caller spawns it.
pub fn bind_status_server(
    addr: SocketAddr,
    table: Arc<RoomTable>,
) -> Result<(SocketAddr, impl Future<Output = ()> + Send + 'static), warp::Error> {
    warp::serve(status_routes(table)).try_bind_ephemeral(addr)
}

fn with_room_table(
    table: Arc<RoomTable>,
) -> impl Filter<Extract = (Arc<RoomTable>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&table))
}
