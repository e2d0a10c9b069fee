use crate::dashboard::socketio::socket_url;
use crate::dashboard::types::{
    parse_snapshot_payload, ActionEnvelope, BotStatusWire, Snapshot, SystemStatusWire,
};
use crate::error::AppError;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

const REST_TIMEOUT_MS: u64 = 10_000;

pub type BotPushStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn api_endpoint(base_url: &str, path: &str) -> String {
    format!("{}/api/{path}", base_url.trim_end_matches('/'))
}

fn status_endpoint(base_url: &str) -> String {
    api_endpoint(base_url, "status")
}

fn data_endpoint(base_url: &str) -> String {
    api_endpoint(base_url, "data")
}

fn start_endpoint(base_url: &str) -> String {
    api_endpoint(base_url, "start")
}

fn stop_endpoint(base_url: &str) -> String {
    api_endpoint(base_url, "stop")
}

fn close_position_endpoint(base_url: &str) -> String {
    api_endpoint(base_url, "close_position")
}

fn system_status_endpoint(base_url: &str) -> String {
    api_endpoint(base_url, "system_status")
}

#[derive(Debug, Serialize)]
struct ClosePositionBody<'a> {
    symbol: &'a str,
}

pub fn build_http_client() -> Result<Client, AppError> {
    Ok(Client::builder()
        .timeout(Duration::from_millis(REST_TIMEOUT_MS))
        .build()?)
}

pub async fn connect_push_stream(base_url: &str) -> Result<BotPushStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(16 << 20),
        max_frame_size: Some(4 << 20),
        ..Default::default()
    };

    let request = socket_url(base_url)?;
    let (stream, _) = connect_async_with_config(request, Some(ws_config), true).await?;
    Ok(stream)
}

pub async fn fetch_bot_status(client: &Client, base_url: &str) -> Result<BotStatusWire, AppError> {
    let response = client
        .get(status_endpoint(base_url))
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json::<BotStatusWire>().await?)
}

pub async fn fetch_snapshot(client: &Client, base_url: &str) -> Result<Option<Snapshot>, AppError> {
    let response = client
        .get(data_endpoint(base_url))
        .send()
        .await?
        .error_for_status()?;
    let mut body = response.bytes().await?.to_vec();
    parse_snapshot_payload(&mut body)
}

pub async fn fetch_system_status(
    client: &Client,
    base_url: &str,
) -> Result<SystemStatusWire, AppError> {
    let response = client
        .get(system_status_endpoint(base_url))
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json::<SystemStatusWire>().await?)
}

async fn post_action(client: &Client, endpoint: String) -> Result<ActionEnvelope, AppError> {
    let response = client
        .post(endpoint)
        .header(CONTENT_TYPE, "application/json")
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json::<ActionEnvelope>().await?)
}

pub async fn start_bot(client: &Client, base_url: &str) -> Result<ActionEnvelope, AppError> {
    post_action(client, start_endpoint(base_url)).await
}

pub async fn stop_bot(client: &Client, base_url: &str) -> Result<ActionEnvelope, AppError> {
    post_action(client, stop_endpoint(base_url)).await
}

pub async fn close_position(
    client: &Client,
    base_url: &str,
    symbol: &str,
) -> Result<ActionEnvelope, AppError> {
    let response = client
        .post(close_position_endpoint(base_url))
        .json(&ClosePositionBody { symbol })
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json::<ActionEnvelope>().await?)
}
