//! Fixed-layout binary frames.
//!
//! A request is a 23-byte header `{ client_id[16], version u8, code u16,
//! payload_size u32 }` followed by `payload_size` bytes; a response is a
//! 7-byte header `{ version u8, code u16, payload_size u32 }` plus its
//! payload. All multi-byte integers are little-endian. String fields are
//! fixed-width and NUL-padded, with the final byte always reserved for a
//! terminator. Everything is packed and parsed field-by-field; nothing is
//! cast over the wire.

use crate::errors::BackupError;
use crate::{
    CLIENT_ID_SIZE, ENCRYPTED_KEY_SIZE, FILENAME_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
    PUBLIC_KEY_SIZE, USERNAME_SIZE,
};

pub const REQUEST_HEADER_SIZE: usize = CLIENT_ID_SIZE + 1 + 2 + 4;
pub const RESPONSE_HEADER_SIZE: usize = 1 + 2 + 4;

/// File-transfer payload header: content_size, orig_file_size,
/// packet_number, total_packets, file_name.
pub const FILE_HEADER_SIZE: usize = 4 + 4 + 2 + 2 + FILENAME_SIZE;

/// Key-exchange response payload: client_id + encrypted session key.
pub const KEY_RESPONSE_SIZE: usize = CLIENT_ID_SIZE + ENCRYPTED_KEY_SIZE;

/// File-received response payload: client_id, content_size, file_name, crc.
pub const FILE_RECEIVED_SIZE: usize = CLIENT_ID_SIZE + 4 + FILENAME_SIZE + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RequestCode {
    Register = 1025,
    SendPublicKey = 1026,
    Reconnect = 1027,
    SendFile = 1028,
    CrcValid = 1029,
    CrcInvalidResend = 1030,
    CrcInvalidAbort = 1031,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ResponseCode {
    RegisterSuccess = 1600,
    RegisterFailed = 1601,
    PublicKeyReceived = 1602,
    FileReceived = 1603,
    GenericAck = 1604,
    ReconnectApproved = 1605,
    ReconnectDenied = 1606,
    ServerError = 1607,
}

impl ResponseCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1600 => Some(ResponseCode::RegisterSuccess),
            1601 => Some(ResponseCode::RegisterFailed),
            1602 => Some(ResponseCode::PublicKeyReceived),
            1603 => Some(ResponseCode::FileReceived),
            1604 => Some(ResponseCode::GenericAck),
            1605 => Some(ResponseCode::ReconnectApproved),
            1606 => Some(ResponseCode::ReconnectDenied),
            1607 => Some(ResponseCode::ServerError),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseHeader {
    pub code: u16,
    pub payload_size: u32,
}

/// Response to a file transfer, parsed from its 279-byte payload.
#[derive(Debug)]
pub struct FileReceived {
    pub client_id: [u8; CLIENT_ID_SIZE],
    pub content_size: u32,
    pub file_name: String,
    pub crc: u32,
}

/// Copy at most `dest.len() - 1` bytes of `src` into `dest` and NUL-fill
/// the remainder. The last byte is always a terminator.
pub fn pad_string(dest: &mut [u8], src: &str) {
    dest.fill(0);
    let bytes = src.as_bytes();
    let n = bytes.len().min(dest.len() - 1);
    dest[..n].copy_from_slice(&bytes[..n]);
}

/// Read a NUL-padded string field back out.
pub fn unpad_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Serialize a complete request frame: header plus payload in one buffer.
pub fn pack_request(
    client_id: &[u8; CLIENT_ID_SIZE],
    code: RequestCode,
    payload: &[u8],
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(REQUEST_HEADER_SIZE + payload.len());
    frame.extend_from_slice(client_id);
    frame.push(PROTOCOL_VERSION);
    frame.extend_from_slice(&(code as u16).to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Parse a response header, enforcing the protocol version and the
/// payload sanity cap.
pub fn parse_response_header(buf: &[u8; RESPONSE_HEADER_SIZE]) -> Result<ResponseHeader, BackupError> {
    let version = buf[0];
    if version != PROTOCOL_VERSION {
        return Err(BackupError::Protocol(format!(
            "version mismatch: got {version}, expected {PROTOCOL_VERSION}"
        )));
    }

    let code = u16::from_le_bytes([buf[1], buf[2]]);
    let payload_size = u32::from_le_bytes([buf[3], buf[4], buf[5], buf[6]]);
    if payload_size > MAX_PAYLOAD_SIZE {
        return Err(BackupError::Protocol(format!(
            "declared payload of {payload_size} bytes exceeds the {MAX_PAYLOAD_SIZE} byte cap"
        )));
    }

    Ok(ResponseHeader { code, payload_size })
}

pub fn register_payload(username: &str) -> Vec<u8> {
    let mut payload = vec![0u8; USERNAME_SIZE];
    pad_string(&mut payload, username);
    payload
}

pub fn reconnect_payload(username: &str) -> Vec<u8> {
    register_payload(username)
}

pub fn public_key_payload(username: &str, public_key: &[u8; PUBLIC_KEY_SIZE]) -> Vec<u8> {
    let mut payload = vec![0u8; USERNAME_SIZE + PUBLIC_KEY_SIZE];
    pad_string(&mut payload[..USERNAME_SIZE], username);
    payload[USERNAME_SIZE..].copy_from_slice(public_key);
    payload
}

/// Build the send-file payload: the 267-byte file header followed by the
/// ciphertext. `content_size` is the ciphertext length alone; the frame's
/// `payload_size` covers both. The client never splits an upload, so the
/// packet counters are fixed at 1 of 1.
pub fn file_payload(ciphertext: &[u8], orig_file_size: u32, file_name: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(FILE_HEADER_SIZE + ciphertext.len());
    payload.extend_from_slice(&(ciphertext.len() as u32).to_le_bytes());
    payload.extend_from_slice(&orig_file_size.to_le_bytes());
    payload.extend_from_slice(&1u16.to_le_bytes());
    payload.extend_from_slice(&1u16.to_le_bytes());

    let mut name_field = [0u8; FILENAME_SIZE];
    pad_string(&mut name_field, file_name);
    payload.extend_from_slice(&name_field);

    payload.extend_from_slice(ciphertext);
    payload
}

/// Parse a register-success payload: exactly one client identifier.
pub fn parse_client_id(payload: &[u8]) -> Result<[u8; CLIENT_ID_SIZE], BackupError> {
    if payload.len() != CLIENT_ID_SIZE {
        return Err(BackupError::Protocol(format!(
            "client id payload is {} bytes, expected {}",
            payload.len(),
            CLIENT_ID_SIZE
        )));
    }
    let mut id = [0u8; CLIENT_ID_SIZE];
    id.copy_from_slice(payload);
    Ok(id)
}

/// Parse a key-exchange response payload: the echoed client identifier
/// followed by the 128-byte encrypted session key.
pub fn parse_key_response(payload: &[u8]) -> Result<([u8; CLIENT_ID_SIZE], &[u8]), BackupError> {
    if payload.len() != KEY_RESPONSE_SIZE {
        return Err(BackupError::Protocol(format!(
            "key response payload is {} bytes, expected {}",
            payload.len(),
            KEY_RESPONSE_SIZE
        )));
    }
    let mut id = [0u8; CLIENT_ID_SIZE];
    id.copy_from_slice(&payload[..CLIENT_ID_SIZE]);
    Ok((id, &payload[CLIENT_ID_SIZE..]))
}

pub fn parse_file_received(payload: &[u8]) -> Result<FileReceived, BackupError> {
    if payload.len() != FILE_RECEIVED_SIZE {
        return Err(BackupError::Protocol(format!(
            "file-received payload is {} bytes, expected {}",
            payload.len(),
            FILE_RECEIVED_SIZE
        )));
    }

    let mut client_id = [0u8; CLIENT_ID_SIZE];
    client_id.copy_from_slice(&payload[..CLIENT_ID_SIZE]);

    let mut offset = CLIENT_ID_SIZE;
    let content_size = u32::from_le_bytes(payload[offset..offset + 4].try_into().unwrap());
    offset += 4;
    let file_name = unpad_string(&payload[offset..offset + FILENAME_SIZE]);
    offset += FILENAME_SIZE;
    let crc = u32::from_le_bytes(payload[offset..offset + 4].try_into().unwrap());

    Ok(FileReceived {
        client_id,
        content_size,
        file_name,
        crc,
    })
}
