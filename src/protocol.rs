use crate::error::{HueError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// HTTP methods used by the bridge API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
            HttpMethod::Put => f.write_str("PUT"),
        }
    }
}

/// One entry of the discovery endpoint's array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: String,
    #[serde(rename = "internalipaddress")]
    pub internal_ip_address: String,
}

/// Body of `POST /api`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingRequest {
    pub devicetype: String,
}

/// Error element reported by the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub error_type: u16,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub description: String,
}

/// Documented bridge error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeErrorKind {
    UnauthorizedUser,
    InvalidJson,
    ResourceNotAvailable,
    MethodNotAvailable,
    MissingParameter,
    ParameterNotAvailable,
    InvalidValue,
    ParameterNotModifiable,
    LinkButtonNotPressed,
    DeviceOff,
    InternalError,
    Other(u16),
}

impl BridgeErrorKind {
    /// Classify a numeric error type
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => BridgeErrorKind::UnauthorizedUser,
            2 => BridgeErrorKind::InvalidJson,
            3 => BridgeErrorKind::ResourceNotAvailable,
            4 => BridgeErrorKind::MethodNotAvailable,
            5 => BridgeErrorKind::MissingParameter,
            6 => BridgeErrorKind::ParameterNotAvailable,
            7 => BridgeErrorKind::InvalidValue,
            8 => BridgeErrorKind::ParameterNotModifiable,
            101 => BridgeErrorKind::LinkButtonNotPressed,
            201 => BridgeErrorKind::DeviceOff,
            901 => BridgeErrorKind::InternalError,
            other => BridgeErrorKind::Other(other),
        }
    }

    /// Numeric error type as sent by the bridge
    pub fn code(&self) -> u16 {
        match self {
            BridgeErrorKind::UnauthorizedUser => 1,
            BridgeErrorKind::InvalidJson => 2,
            BridgeErrorKind::ResourceNotAvailable => 3,
            BridgeErrorKind::MethodNotAvailable => 4,
            BridgeErrorKind::MissingParameter => 5,
            BridgeErrorKind::ParameterNotAvailable => 6,
            BridgeErrorKind::InvalidValue => 7,
            BridgeErrorKind::ParameterNotModifiable => 8,
            BridgeErrorKind::LinkButtonNotPressed => 101,
            BridgeErrorKind::DeviceOff => 201,
            BridgeErrorKind::InternalError => 901,
            BridgeErrorKind::Other(code) => *code,
        }
    }
}

impl fmt::Display for BridgeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type {}", self.code())
    }
}

impl From<ApiError> for HueError {
    fn from(error: ApiError) -> Self {
        HueError::Bridge {
            kind: BridgeErrorKind::from_code(error.error_type),
            description: error.description,
        }
    }
}

/// One element of a bridge reply array
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyItem {
    Success(Value),
    Error(ApiError),
}

/// Parse a reply array (`[{"success": ..}, {"error": ..}]`)
///
/// Elements that are neither success nor error are a protocol error.
pub fn parse_reply(value: &Value) -> Result<Vec<ReplyItem>> {
    let items = value
        .as_array()
        .ok_or_else(|| HueError::Protocol(format!("Expected reply array, got {}", value)))?;

    items
        .iter()
        .map(|item| {
            serde_json::from_value::<ReplyItem>(item.clone())
                .map_err(|e| HueError::Protocol(format!("Unexpected reply element {}: {}", item, e)))
        })
        .collect()
}

/// Extract the issued username from a pairing reply
///
/// Only the first element is significant. An error element is returned as
/// the matching [`HueError::Bridge`] so callers can branch on its kind.
pub fn parse_pairing_reply(value: &Value) -> Result<String> {
    let first = parse_reply(value)?
        .into_iter()
        .next()
        .ok_or_else(|| HueError::Protocol("Empty pairing reply".to_string()))?;

    match first {
        ReplyItem::Error(error) => Err(error.into()),
        ReplyItem::Success(body) => body
            .get("username")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| HueError::Protocol("Pairing success without username".to_string())),
    }
}

/// Return the first error element of a reply, if any
pub fn first_error(value: &Value) -> Option<ApiError> {
    let items = value.as_array()?;
    items.iter().find_map(|item| {
        item.get("error")
            .and_then(|e| serde_json::from_value::<ApiError>(e.clone()).ok())
    })
}
