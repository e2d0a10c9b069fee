use crate::error::AppError;
use serde::{Deserialize, Serialize};
use simd_json::OwnedValue;

pub const SOCKET_IO_PATH: &str = "/socket.io/?EIO=4&transport=websocket";
pub const DATA_UPDATE_EVENT: &str = "data_update";
pub const DATA_PING_EVENT: &str = "data_ping";
pub const BOT_STATUS_EVENT: &str = "bot_status";
pub const START_BACKGROUND_TASK_EVENT: &str = "start_background_task";

/// Engine.IO handshake sent by the server as the first frame.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect,
    Disconnect,
    Event { name: String, payload: OwnedValue },
    Ack,
    ConnectError { message: String },
    Binary,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Upgrade,
    Noop,
}

#[derive(Debug, Deserialize)]
struct ConnectErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Builds the websocket endpoint of a Socket.IO server from its HTTP base URL.
pub fn socket_url(base_url: &str) -> Result<String, AppError> {
    let trimmed = base_url.trim().trim_end_matches('/');
    let ws_base = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(AppError::InvalidArgument(format!(
            "backend url '{base_url}' must use http or https"
        )));
    };
    Ok(format!("{ws_base}{SOCKET_IO_PATH}"))
}

pub fn decode_frame(frame: &str) -> Result<EnginePacket, AppError> {
    let mut chars = frame.chars();
    let kind = chars
        .next()
        .ok_or_else(|| AppError::Protocol("empty engine.io frame".to_string()))?;
    let body = chars.as_str();

    match kind {
        '0' => {
            let mut bytes = body.as_bytes().to_vec();
            let handshake: OpenHandshake = simd_json::serde::from_slice(&mut bytes)?;
            Ok(EnginePacket::Open(handshake))
        }
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping),
        '3' => Ok(EnginePacket::Pong),
        '4' => Ok(EnginePacket::Message(decode_socket_packet(body)?)),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(AppError::Protocol(format!(
            "unknown engine.io packet type '{other}'"
        ))),
    }
}

/// Strips the optional `/namespace,` prefix and ack id digits.
fn packet_body(raw: &str) -> &str {
    let mut body = raw;
    if body.starts_with('/') {
        body = match body.find(',') {
            Some(index) => &body[index + 1..],
            None => "",
        };
    }
    body.trim_start_matches(|character: char| character.is_ascii_digit())
}

fn decode_socket_packet(body: &str) -> Result<SocketPacket, AppError> {
    let mut chars = body.chars();
    let kind = chars
        .next()
        .ok_or_else(|| AppError::Protocol("empty socket.io packet".to_string()))?;
    let payload = packet_body(chars.as_str());

    match kind {
        '0' => Ok(SocketPacket::Connect),
        '1' => Ok(SocketPacket::Disconnect),
        '2' => decode_event(payload),
        '3' => Ok(SocketPacket::Ack),
        '4' => {
            let message = if payload.is_empty() {
                None
            } else {
                let mut bytes = payload.as_bytes().to_vec();
                simd_json::serde::from_slice::<ConnectErrorBody>(&mut bytes)
                    .ok()
                    .and_then(|body| body.message)
                    .or_else(|| Some(payload.to_string()))
            };
            Ok(SocketPacket::ConnectError {
                message: message.unwrap_or_else(|| "connection refused".to_string()),
            })
        }
        '5' | '6' => Ok(SocketPacket::Binary),
        other => Err(AppError::Protocol(format!(
            "unknown socket.io packet type '{other}'"
        ))),
    }
}

fn decode_event(payload: &str) -> Result<SocketPacket, AppError> {
    let mut bytes = payload.as_bytes().to_vec();
    let mut args: Vec<OwnedValue> = simd_json::serde::from_slice(&mut bytes)?;
    if args.is_empty() {
        return Err(AppError::Protocol("socket.io event without a name".to_string()));
    }

    let name_value = args.remove(0);
    let name: String = simd_json::serde::from_owned_value(name_value)
        .map_err(|_| AppError::Protocol("socket.io event name must be a string".to_string()))?;
    let payload = if args.is_empty() {
        OwnedValue::default()
    } else {
        args.remove(0)
    };
    Ok(SocketPacket::Event { name, payload })
}

pub fn encode_pong() -> String {
    "3".to_string()
}

pub fn encode_connect() -> String {
    "40".to_string()
}

pub fn encode_disconnect() -> String {
    "41".to_string()
}

pub fn encode_event<T: Serialize>(name: &str, payload: Option<&T>) -> Result<String, AppError> {
    let encoded_name = simd_json::serde::to_string(name)?;
    let body = match payload {
        Some(payload) => format!("[{encoded_name},{}]", simd_json::serde::to_string(payload)?),
        None => format!("[{encoded_name}]"),
    };
    Ok(format!("42{body}"))
}
