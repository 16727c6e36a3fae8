//! Chat subchannel rules: sticker validation and the SYSTEM sender.
//!
//! Chat rides the same transport as battle traffic. The chat-enabled flag is
//! a local display gate only — frames are always ACKed and processed so a
//! disabled recipient never leaves the sender retransmitting.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Decoded sticker payloads above this size are dropped.
pub const MAX_STICKER_BYTES: usize = 10 * 1024 * 1024;

/// Messages from this sender are state notifications and bypass the
/// recipient's chat-enabled gate.
pub const SYSTEM_SENDER: &str = "SYSTEM";

/// True when `data` is valid base64 whose decoded length is within the cap.
pub fn sticker_is_valid(data: &str) -> bool {
    match BASE64.decode(data) {
        Ok(decoded) => decoded.len() <= MAX_STICKER_BYTES,
        Err(_) => false,
    }
}

/// Whether a chat payload from `sender` should reach the local event stream
/// given the recipient's chat-enabled flag.
pub fn deliver_locally(sender: &str, chat_enabled: bool) -> bool {
    chat_enabled || sender == SYSTEM_SENDER
}
