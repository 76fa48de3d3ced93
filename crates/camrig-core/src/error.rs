// ── Core error types ──
//
// Errors surfaced by the fleet core to its callers. Per-command send
// failures and per-connection receive failures never reach callers
// directly: they are reported through `FleetEvent`s and the log.

use std::net::IpAddr;

use thiserror::Error;

use crate::address_book::CameraId;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Address errors ───────────────────────────────────────────────
    #[error("Camera id {value} is out of range (expected 1..=8)")]
    InvalidCameraId { value: u16 },

    #[error("No camera is configured at address {address}")]
    UnknownAddress { address: IpAddr },

    #[error("Camera {camera} is not RAW-capable")]
    RawNotSupported { camera: CameraId },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Failed to bind {channel} listener on {address}: {source}")]
    Bind {
        channel: &'static str,
        address: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Fleet controller is already running")]
    AlreadyStarted,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A single outbound send failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("send timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u128 },

    #[error("short send: {sent} of {expected} bytes")]
    ShortSend { sent: usize, expected: usize },
}

/// A still-image connection ended without a complete capture.
#[derive(Debug, Error)]
pub enum StillError {
    #[error("connection closed after {received} of {expected} bytes of the {section} section")]
    Truncated {
        section: &'static str,
        received: usize,
        expected: usize,
    },

    #[error("{section} section length {length} exceeds the {limit} byte limit")]
    Oversized {
        section: &'static str,
        length: usize,
        limit: usize,
    },

    #[error("no data received for {timeout_secs}s")]
    Idle { timeout_secs: u64 },

    #[error("connection closed before any data arrived")]
    Empty,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
