use std::time::Duration;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::errors::BackupError;
use crate::frames::{self, RequestCode, RESPONSE_HEADER_SIZE};
use crate::{CLIENT_ID_SIZE, SOCKET_TIMEOUT};

/// One byte-stream connection to the backup server. The protocol engine
/// owns it exclusively; every operation is sequential and carries the
/// per-operation deadline.
pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    pub async fn connect(host: &str, port: u16) -> Result<Self, BackupError> {
        let addr = format!("{host}:{port}");
        debug!("Connecting to {addr}");
        let stream = timeout(SOCKET_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| BackupError::Timeout(SOCKET_TIMEOUT))??;
        debug!("Connected to {addr}");
        Ok(Connection { stream })
    }

    /// Write one complete request frame: header, then payload.
    pub async fn send_request(
        &mut self,
        client_id: &[u8; CLIENT_ID_SIZE],
        code: RequestCode,
        payload: &[u8],
    ) -> Result<(), BackupError> {
        debug!("Sending {:?} with {} byte payload", code, payload.len());
        let frame = frames::pack_request(client_id, code, payload);
        timeout(SOCKET_TIMEOUT, self.stream.write_all(&frame))
            .await
            .map_err(|_| BackupError::Timeout(SOCKET_TIMEOUT))??;
        timeout(SOCKET_TIMEOUT, self.stream.flush())
            .await
            .map_err(|_| BackupError::Timeout(SOCKET_TIMEOUT))??;
        Ok(())
    }

    /// Read one complete response: the 7-byte header, then exactly the
    /// declared payload. Version mismatch, oversized payload and short
    /// reads all surface as errors.
    pub async fn read_response(&mut self) -> Result<(u16, Vec<u8>), BackupError> {
        let mut header_buf = [0u8; RESPONSE_HEADER_SIZE];
        timeout(SOCKET_TIMEOUT, self.stream.read_exact(&mut header_buf))
            .await
            .map_err(|_| BackupError::Timeout(SOCKET_TIMEOUT))??;

        let header = frames::parse_response_header(&header_buf)?;

        let mut payload = vec![0u8; header.payload_size as usize];
        if !payload.is_empty() {
            timeout(SOCKET_TIMEOUT, self.stream.read_exact(&mut payload))
                .await
                .map_err(|_| BackupError::Timeout(SOCKET_TIMEOUT))??;
        }

        debug!(
            "Received response {} with {} byte payload",
            header.code,
            payload.len()
        );
        Ok((header.code, payload))
    }

    /// Opportunistic read for responses the protocol does not require:
    /// returns `None` on timeout, EOF or any parse failure.
    pub async fn try_read_response(&mut self, wait: Duration) -> Option<(u16, Vec<u8>)> {
        match timeout(wait, self.read_response()).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(e)) => {
                debug!("No readable response: {e}");
                None
            }
            Err(_) => {
                debug!("No response within {wait:?}");
                None
            }
        }
    }
}
