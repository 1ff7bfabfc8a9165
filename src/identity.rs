use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::debug;

use crate::errors::BackupError;
use crate::CLIENT_ID_SIZE;

pub const IDENTITY_FILE: &str = "me.info";
const IDENTITY_TMP_FILE: &str = "me.info.tmp";

/// The persisted client identity: who we registered as, the identifier
/// the server assigned, and our long-term private key (PKCS#8 DER).
/// Created once on successful registration and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub username: String,
    pub client_id: [u8; CLIENT_ID_SIZE],
    pub private_key_der: Vec<u8>,
}

impl ClientIdentity {
    /// Load from `me.info` in `dir`. An absent file means first run and
    /// returns `Ok(None)`; a present-but-corrupt file is a fatal error.
    pub fn load(dir: &Path) -> Result<Option<Self>, BackupError> {
        let path = dir.join(IDENTITY_FILE);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BackupError::Config(format!(
                    "cannot open {}: {e}",
                    path.display()
                )))
            }
        };

        let lines: Vec<&str> = contents
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .collect();
        if lines.len() != 3 {
            return Err(BackupError::Config(format!(
                "{IDENTITY_FILE} is corrupt: expected 3 lines, found {}",
                lines.len()
            )));
        }

        let client_id = parse_client_id_hex(lines[1])?;
        let private_key_der = BASE64.decode(lines[2]).map_err(|e| {
            BackupError::Config(format!("{IDENTITY_FILE} private key is not valid base64: {e}"))
        })?;

        debug!("Loaded identity for {} ({})", lines[0], lines[1]);
        Ok(Some(ClientIdentity {
            username: lines[0].to_string(),
            client_id,
            private_key_der,
        }))
    }

    /// Persist to `me.info` in `dir`: write the temporary file, fsync,
    /// then rename over the real one so a crash leaves either the old
    /// file or a complete new one.
    pub fn save(&self, dir: &Path) -> Result<(), BackupError> {
        let tmp_path = dir.join(IDENTITY_TMP_FILE);
        let path = dir.join(IDENTITY_FILE);

        let contents = format!(
            "{}\n{}\n{}\n",
            self.username,
            self.client_id_hex(),
            BASE64.encode(&self.private_key_der)
        );

        let mut tmp = File::create(&tmp_path).map_err(|e| {
            BackupError::Config(format!("cannot create {}: {e}", tmp_path.display()))
        })?;
        tmp.write_all(contents.as_bytes())
            .and_then(|_| tmp.sync_all())
            .map_err(|e| BackupError::Config(format!("cannot write {}: {e}", tmp_path.display())))?;
        drop(tmp);

        fs::rename(&tmp_path, &path).map_err(|e| {
            BackupError::Config(format!("cannot rename into {}: {e}", path.display()))
        })?;

        debug!("Saved identity to {}", path.display());
        Ok(())
    }

    pub fn client_id_hex(&self) -> String {
        hex::encode(self.client_id)
    }
}

fn parse_client_id_hex(s: &str) -> Result<[u8; CLIENT_ID_SIZE], BackupError> {
    if s.len() != CLIENT_ID_SIZE * 2 {
        return Err(BackupError::Config(format!(
            "{IDENTITY_FILE} client id must be {} hex characters, found {}",
            CLIENT_ID_SIZE * 2,
            s.len()
        )));
    }
    let bytes = hex::decode(s).map_err(|e| {
        BackupError::Config(format!("{IDENTITY_FILE} client id is not valid hex: {e}"))
    })?;
    let mut id = [0u8; CLIENT_ID_SIZE];
    id.copy_from_slice(&bytes);
    Ok(id)
}
