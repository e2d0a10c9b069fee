pub mod bot_api;
pub mod connection;
pub mod frame;
pub mod freshness;
pub mod persistence;
pub mod pipeline;
pub mod polling;
pub mod reconcile;
pub mod runtime;
pub mod scheduler;
pub mod socketio;
pub mod toast;
pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

pub const DASHBOARD_FRAME_EVENT: &str = "dashboard_frame";
pub const CONNECTION_STATUS_EVENT: &str = "connection_status";

pub fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}
