use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::config::ServerEndpoint;
use crate::errors::BackupError;
use crate::identity::ClientIdentity;
use crate::networking::Connection;
use crate::protocol::Session;

/// Function handler to drive one backup session:
///     - Load the server endpoint from transfer.info (and port.info)
///     - Load the stored identity, if any
///     - Connect and either register + send public key, or reconnect
///     - Encrypt and upload the file, validating the server's CRC
pub async fn run(dir: &Path) -> Result<(), BackupError> {
    let endpoint = ServerEndpoint::load(dir)?;
    println!(
        "Backing up {} to {}:{}",
        endpoint.file_path.display(),
        endpoint.host,
        endpoint.port
    );

    let identity = ClientIdentity::load(dir)?;
    let file_path = resolve_file_path(dir, &endpoint.file_path);

    let conn = Connection::connect(&endpoint.host, endpoint.port).await?;

    let mut session = match &identity {
        Some(identity) => {
            // The persisted username wins over transfer.info for a
            // returning client; the server knows us by it.
            if identity.username != endpoint.username {
                warn!(
                    "transfer.info names {}, but the stored identity is {}; using the stored name",
                    endpoint.username, identity.username
                );
            }
            let mut session = Session::resume(conn, identity)?;
            session.reconnect().await?;
            session
        }
        None => {
            debug!("No identity file, registering as a new client");
            let mut session = Session::new(conn, endpoint.username.clone());
            session.register(dir).await?;
            session.send_public_key().await?;
            session
        }
    };

    let crc = session.upload(&file_path).await?;
    println!("Backup complete (CRC {crc:#010x})");
    Ok(())
}

/// A relative upload path in transfer.info is taken relative to the
/// directory the config files live in.
fn resolve_file_path(dir: &Path, file_path: &Path) -> PathBuf {
    if file_path.is_absolute() {
        file_path.to_path_buf()
    } else {
        dir.join(file_path)
    }
}
