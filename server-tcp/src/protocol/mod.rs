use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio_util::codec::LengthDelimitedCodec;

// Command type identifiers
pub const CMD_PING: u8 = 0x00;
pub const CMD_ADD: u8 = 0x01;
pub const CMD_GET: u8 = 0x02;
pub const CMD_REMOVE: u8 = 0x03;
pub const CMD_AUTH: u8 = 0x04;

// Response type identifiers
pub const RESP_PONG: u8 = 0x00;
pub const RESP_OK: u8 = 0x01;
pub const RESP_VALUE: u8 = 0x02;
pub const RESP_NOT_FOUND: u8 = 0x03;
pub const RESP_ERROR: u8 = 0x04;
pub const RESP_REMOVED: u8 = 0x05;

pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// 4-byte big-endian length prefix framing shared by node server and client
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// TTL as carried by `ADD`: whole milliseconds, rounded up so that a
/// non-zero TTL never reaches the node as 0, saturating at `u64::MAX`.
pub fn ttl_to_millis(ttl: Duration) -> u64 {
    let millis = ttl.as_nanos().div_ceil(1_000_000);
    u64::try_from(millis).unwrap_or(u64::MAX).max(1)
}

#[derive(Debug, Clone)]
pub enum Request {
    Ping,
    Auth { password: String },
    Add { db: u32, key: String, value: Bytes, ttl_ms: u64 },
    Get { db: u32, key: String },
    Remove { db: u32, key: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Pong,
    Ok,
    Value { value: Bytes },
    NotFound,
    Removed { existed: bool },
    Error { msg: String },
}

fn put_blob(buf: &mut BytesMut, blob: &[u8]) {
    buf.put_u32(blob.len() as u32);
    buf.put_slice(blob);
}

fn get_u32(buf: &mut Bytes, what: &str) -> Result<u32, String> {
    if buf.remaining() < 4 {
        return Err(format!("Invalid {}: missing length", what));
    }
    Ok(buf.get_u32())
}

fn get_blob(buf: &mut Bytes, what: &str) -> Result<Bytes, String> {
    let len = get_u32(buf, what)? as usize;
    if buf.remaining() < len {
        return Err(format!(
            "Invalid {}: expected {} bytes, got {}",
            what,
            len,
            buf.remaining()
        ));
    }
    Ok(buf.copy_to_bytes(len))
}

fn get_string(buf: &mut Bytes, what: &str) -> Result<String, String> {
    let bytes = get_blob(buf, what)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| format!("Invalid {} UTF-8: {}", what, e))
}

impl Request {
    /// Encode a Request into Bytes for transmission
    ///
    /// Format:
    /// - PING: [0x00]
    /// - ADD: [0x01][db: u32][key_len: u32][key][value_len: u32][value][ttl_ms: u64]
    /// - GET: [0x02][db: u32][key_len: u32][key]
    /// - REMOVE: [0x03][db: u32][key_len: u32][key]
    /// - AUTH: [0x04][password_len: u32][password]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Request::Ping => {
                buf.put_u8(CMD_PING);
            }
            Request::Auth { password } => {
                buf.put_u8(CMD_AUTH);
                put_blob(&mut buf, password.as_bytes());
            }
            Request::Add { db, key, value, ttl_ms } => {
                buf.put_u8(CMD_ADD);
                buf.put_u32(*db);
                put_blob(&mut buf, key.as_bytes());
                put_blob(&mut buf, value);
                buf.put_u64(*ttl_ms);
            }
            Request::Get { db, key } => {
                buf.put_u8(CMD_GET);
                buf.put_u32(*db);
                put_blob(&mut buf, key.as_bytes());
            }
            Request::Remove { db, key } => {
                buf.put_u8(CMD_REMOVE);
                buf.put_u32(*db);
                put_blob(&mut buf, key.as_bytes());
            }
        }

        buf.freeze()
    }

    /// Decode a Request from Bytes received from the network
    ///
    /// This is called AFTER LengthDelimitedCodec has extracted the frame,
    /// so we receive a complete message as Bytes
    pub fn decode(mut buf: Bytes) -> Result<Self, String> {
        if buf.is_empty() {
            return Err("Empty buffer".to_string());
        }

        let cmd = buf.get_u8();

        match cmd {
            CMD_PING => Ok(Request::Ping),
            CMD_AUTH => Ok(Request::Auth {
                password: get_string(&mut buf, "AUTH password")?,
            }),
            CMD_ADD => {
                let db = get_u32(&mut buf, "ADD db")?;
                let key = get_string(&mut buf, "ADD key")?;
                let value = get_blob(&mut buf, "ADD value")?;
                if buf.remaining() < 8 {
                    return Err("Invalid ADD: missing ttl".to_string());
                }
                let ttl_ms = buf.get_u64();
                Ok(Request::Add { db, key, value, ttl_ms })
            }
            CMD_GET => {
                let db = get_u32(&mut buf, "GET db")?;
                let key = get_string(&mut buf, "GET key")?;
                Ok(Request::Get { db, key })
            }
            CMD_REMOVE => {
                let db = get_u32(&mut buf, "REMOVE db")?;
                let key = get_string(&mut buf, "REMOVE key")?;
                Ok(Request::Remove { db, key })
            }
            _ => Err(format!("Unknown command: 0x{:02X}", cmd)),
        }
    }
}

impl Response {
    /// Encode a Response into Bytes for transmission
    ///
    /// Format:
    /// - PONG: [0x00]
    /// - OK: [0x01]
    /// - VALUE: [0x02][value_len: u32][value bytes]
    /// - NOT_FOUND: [0x03]
    /// - ERROR: [0x04][msg_len: u32][msg bytes]
    /// - REMOVED: [0x05][existed: u8]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Response::Pong => buf.put_u8(RESP_PONG),
            Response::Ok => buf.put_u8(RESP_OK),
            Response::Value { value } => {
                buf.put_u8(RESP_VALUE);
                put_blob(&mut buf, value);
            }
            Response::NotFound => buf.put_u8(RESP_NOT_FOUND),
            Response::Removed { existed } => {
                buf.put_u8(RESP_REMOVED);
                buf.put_u8(u8::from(*existed));
            }
            Response::Error { msg } => {
                buf.put_u8(RESP_ERROR);
                put_blob(&mut buf, msg.as_bytes());
            }
        }

        buf.freeze()
    }

    /// Decode a Response from Bytes received from the network
    pub fn decode(mut buf: Bytes) -> Result<Self, String> {
        if buf.is_empty() {
            return Err("Empty buffer".to_string());
        }

        let resp_type = buf.get_u8();

        match resp_type {
            RESP_PONG => Ok(Response::Pong),
            RESP_OK => Ok(Response::Ok),
            RESP_VALUE => Ok(Response::Value {
                value: get_blob(&mut buf, "VALUE")?,
            }),
            RESP_NOT_FOUND => Ok(Response::NotFound),
            RESP_REMOVED => {
                if !buf.has_remaining() {
                    return Err("Invalid REMOVED: missing flag".to_string());
                }
                Ok(Response::Removed {
                    existed: buf.get_u8() != 0,
                })
            }
            RESP_ERROR => {
                let msg_bytes = get_blob(&mut buf, "ERROR")?;
                let msg = String::from_utf8_lossy(&msg_bytes).to_string();
                Ok(Response::Error { msg })
            }
            _ => Err(format!("Unknown response type: 0x{:02X}", resp_type)),
        }
    }
}
