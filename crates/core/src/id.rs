//! Identifier generation.
//!
//! Every id is a UTC timestamp prefix followed by random bits, so ids sort
//! roughly by creation time while staying unique under rapid creation.

use chrono::Utc;
use uuid::Uuid;

fn random_hex(len: usize) -> String {
    let mut hex = Uuid::new_v4().simple().to_string();
    hex.truncate(len);
    hex
}

/// Journal entry id: `YYYYMMDDHHMMSS_xxxxxxxx`.
pub fn entry_id() -> String {
    format!("{}_{}", Utc::now().format("%Y%m%d%H%M%S"), random_hex(8))
}

/// Chat session id: `chat-YYYYMMDDHHMMSS-xxxxxxxx`.
pub fn session_id() -> String {
    format!("chat-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), random_hex(8))
}

/// Chat message id: `msg-YYYYMMDDHHMMSSffffff-xxxx`.
pub fn message_id() -> String {
    format!("msg-{}-{}", Utc::now().format("%Y%m%d%H%M%S%6f"), random_hex(4))
}
