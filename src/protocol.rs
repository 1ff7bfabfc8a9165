//! The connection state machine: register or reconnect, recover the
//! session key, then the CRC-checked upload loop. All operations run
//! strictly in sequence on one connection; any unexpected response code
//! for the current state is fatal.

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};

use crate::checksum::cksum;
use crate::cryptography::{IdentityKey, SessionCipher};
use crate::errors::BackupError;
use crate::frames::{self, RequestCode, ResponseCode};
use crate::identity::ClientIdentity;
use crate::networking::Connection;
use crate::{CLIENT_ID_SIZE, MAX_PAYLOAD_SIZE, MAX_UPLOAD_ATTEMPTS};

/// How long to wait for the optional acknowledgement after the final CRC
/// confirmation. The session already succeeded; the ack is only logged.
const ACK_WAIT: Duration = Duration::from_secs(5);

/// One backup session against a connected server.
pub struct Session {
    conn: Connection,
    username: String,
    client_id: [u8; CLIENT_ID_SIZE],
    identity_key: Option<IdentityKey>,
    cipher: Option<SessionCipher>,
}

impl Session {
    /// Fresh session for a client with no stored identity. The client id
    /// stays zeroed until the server assigns one during registration.
    pub fn new(conn: Connection, username: String) -> Self {
        Session {
            conn,
            username,
            client_id: [0u8; CLIENT_ID_SIZE],
            identity_key: None,
            cipher: None,
        }
    }

    /// Session for a returning client: imports the stored private key
    /// and presents the previously assigned identifier.
    pub fn resume(conn: Connection, identity: &ClientIdentity) -> Result<Self, BackupError> {
        let key = IdentityKey::from_der(&identity.private_key_der)?;
        Ok(Session {
            conn,
            username: identity.username.clone(),
            client_id: identity.client_id,
            identity_key: Some(key),
            cipher: None,
        })
    }

    /// Register with the server (1025), adopt the assigned identifier,
    /// generate the long-term key pair and persist the identity file.
    /// The identity is only written once the server has accepted us.
    pub async fn register(&mut self, identity_dir: &Path) -> Result<(), BackupError> {
        println!("Registering as {}...", self.username);
        let payload = frames::register_payload(&self.username);
        self.conn
            .send_request(&self.client_id, RequestCode::Register, &payload)
            .await?;

        let (code, payload) = self.conn.read_response().await?;
        match ResponseCode::from_u16(code) {
            Some(ResponseCode::RegisterSuccess) => {}
            Some(ResponseCode::RegisterFailed) => {
                return Err(BackupError::Rejected("registration failed"))
            }
            Some(ResponseCode::ServerError) => return Err(BackupError::Rejected("server error")),
            _ => return Err(unexpected_response(code, "registration")),
        }

        self.client_id = frames::parse_client_id(&payload)?;

        let key = IdentityKey::generate()?;
        let identity = ClientIdentity {
            username: self.username.clone(),
            client_id: self.client_id,
            private_key_der: key.to_der()?,
        };
        identity.save(identity_dir)?;
        self.identity_key = Some(key);

        println!("Registered with id {}", identity.client_id_hex());
        Ok(())
    }

    /// Send our public key (1026) and recover the session key that the
    /// server returns in the same response.
    pub async fn send_public_key(&mut self) -> Result<(), BackupError> {
        let key = self
            .identity_key
            .as_ref()
            .ok_or_else(|| BackupError::Protocol("no identity key before key exchange".into()))?;
        let spki = key.public_key_spki()?;

        println!("Sending public key...");
        let payload = frames::public_key_payload(&self.username, &spki);
        self.conn
            .send_request(&self.client_id, RequestCode::SendPublicKey, &payload)
            .await?;

        let (code, payload) = self.conn.read_response().await?;
        match ResponseCode::from_u16(code) {
            Some(ResponseCode::PublicKeyReceived) => self.adopt_session_key(&payload),
            Some(ResponseCode::ServerError) => Err(BackupError::Rejected("server error")),
            _ => Err(unexpected_response(code, "key exchange")),
        }
    }

    /// Reconnect as a known client (1027). On approval the response
    /// carries a fresh session key; on denial the session is over (the
    /// server no longer knows this client).
    pub async fn reconnect(&mut self) -> Result<(), BackupError> {
        println!("Reconnecting as {}...", self.username);
        let payload = frames::reconnect_payload(&self.username);
        self.conn
            .send_request(&self.client_id, RequestCode::Reconnect, &payload)
            .await?;

        let (code, payload) = self.conn.read_response().await?;
        match ResponseCode::from_u16(code) {
            Some(ResponseCode::ReconnectApproved) => self.adopt_session_key(&payload),
            Some(ResponseCode::ReconnectDenied) => {
                Err(BackupError::Rejected("reconnect denied, client not known"))
            }
            Some(ResponseCode::ServerError) => Err(BackupError::Rejected("server error")),
            _ => Err(unexpected_response(code, "reconnect")),
        }
    }

    /// Decrypt the session key out of a key-exchange response payload and
    /// arm the symmetric cipher. The echoed identifier must match the one
    /// we were assigned.
    fn adopt_session_key(&mut self, payload: &[u8]) -> Result<(), BackupError> {
        let (echoed_id, encrypted_key) = frames::parse_key_response(payload)?;
        if echoed_id != self.client_id {
            return Err(BackupError::Protocol(
                "server echoed a different client id in the key exchange".into(),
            ));
        }

        let key = self
            .identity_key
            .as_ref()
            .ok_or_else(|| BackupError::Protocol("no identity key before key exchange".into()))?;
        let session_key = key.decrypt_session_key(encrypted_key)?;
        self.cipher = Some(SessionCipher::new(&session_key)?);

        println!("Session key established");
        Ok(())
    }

    /// Encrypt and upload the file at `path`, then run the CRC retry
    /// loop: compare the server's checksum of the decrypted upload
    /// against ours over the plaintext, resending (1030) on mismatch up
    /// to the bound and aborting (1031) when it is exhausted.
    pub async fn upload(&mut self, path: &Path) -> Result<u32, BackupError> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| BackupError::Protocol("no session key before upload".into()))?;

        let data = fs::read(path)
            .map_err(|e| BackupError::Config(format!("cannot read {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| BackupError::Config(format!("{} has no file name", path.display())))?;

        let local_crc = cksum(&data);
        debug!("Local CRC of {file_name}: {local_crc:#010x}");

        let ciphertext = cipher.encrypt(&data);
        if ciphertext.len() + frames::FILE_HEADER_SIZE > MAX_PAYLOAD_SIZE as usize
            || data.len() > u32::MAX as usize
        {
            return Err(BackupError::Config(format!(
                "{} is too large for a single-frame upload",
                path.display()
            )));
        }
        let payload = frames::file_payload(&ciphertext, data.len() as u32, &file_name);

        for attempt in 1..=MAX_UPLOAD_ATTEMPTS {
            println!(
                "Uploading {} ({} bytes, attempt {attempt}/{MAX_UPLOAD_ATTEMPTS})...",
                file_name,
                data.len()
            );
            self.conn
                .send_request(&self.client_id, RequestCode::SendFile, &payload)
                .await?;

            let (code, response) = self.conn.read_response().await?;
            match ResponseCode::from_u16(code) {
                Some(ResponseCode::FileReceived) => {}
                Some(ResponseCode::ServerError) => {
                    return Err(BackupError::Rejected("server error"))
                }
                _ => return Err(unexpected_response(code, "file transfer")),
            }

            let received = frames::parse_file_received(&response)?;
            if received.client_id != self.client_id {
                return Err(BackupError::Protocol(
                    "server echoed a different client id in the file response".into(),
                ));
            }

            debug!(
                "Server CRC {:#010x} for {} ({} bytes received)",
                received.crc, received.file_name, received.content_size
            );

            if received.crc == local_crc {
                self.conn
                    .send_request(&self.client_id, RequestCode::CrcValid, &[])
                    .await?;
                self.await_final_ack().await;
                println!("Checksum verified, upload complete");
                return Ok(local_crc);
            }

            warn!(
                "CRC mismatch: local {local_crc:#010x}, server {:#010x}",
                received.crc
            );
            if attempt < MAX_UPLOAD_ATTEMPTS {
                self.conn
                    .send_request(&self.client_id, RequestCode::CrcInvalidResend, &[])
                    .await?;
            } else {
                self.conn
                    .send_request(&self.client_id, RequestCode::CrcInvalidAbort, &[])
                    .await?;
            }
        }

        Err(BackupError::ChecksumMismatch(MAX_UPLOAD_ATTEMPTS))
    }

    /// The server may answer the final confirmation with a generic ack.
    /// Success has already been determined, so absence is not an error.
    async fn await_final_ack(&mut self) {
        match self.conn.try_read_response(ACK_WAIT).await {
            Some((code, _)) if ResponseCode::from_u16(code) == Some(ResponseCode::GenericAck) => {
                debug!("Server acknowledged the CRC confirmation")
            }
            Some((code, _)) => debug!("Ignoring response {code} after CRC confirmation"),
            None => debug!("No acknowledgement after CRC confirmation"),
        }
    }
}

fn unexpected_response(code: u16, context: &str) -> BackupError {
    BackupError::Protocol(format!("unexpected response code {code} during {context}"))
}
