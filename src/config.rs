use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::errors::BackupError;
use crate::{DEFAULT_PORT, USERNAME_SIZE};

pub const TRANSFER_FILE: &str = "transfer.info";
pub const PORT_FILE: &str = "port.info";

/// Where to connect and what to upload, loaded once per run from
/// `transfer.info` (and optionally `port.info`). Read-only afterwards.
#[derive(Debug, Clone)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub file_path: PathBuf,
}

impl ServerEndpoint {
    /// Load from `transfer.info` in `dir`: exactly three non-empty lines,
    /// host (optionally `host:port`), username, file path. An inline port
    /// takes precedence over `port.info`; `port.info` falls back to 1256
    /// when absent or unparseable.
    pub fn load(dir: &Path) -> Result<Self, BackupError> {
        let path = dir.join(TRANSFER_FILE);
        let contents = fs::read_to_string(&path).map_err(|e| {
            BackupError::Config(format!("cannot open {}: {e}", path.display()))
        })?;

        let lines: Vec<&str> = contents
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .collect();
        if lines.len() != 3 {
            return Err(BackupError::Config(format!(
                "{TRANSFER_FILE} must have exactly 3 non-empty lines, found {}",
                lines.len()
            )));
        }

        let (host, inline_port) = split_host_port(lines[0]);
        let username = lines[1].to_string();
        if username.len() >= USERNAME_SIZE {
            return Err(BackupError::Config(format!(
                "username is {} bytes, limit is {}",
                username.len(),
                USERNAME_SIZE - 1
            )));
        }

        let port = match inline_port {
            Some(port) => port,
            None => read_port_file(&dir.join(PORT_FILE)),
        };

        Ok(ServerEndpoint {
            host,
            port,
            username,
            file_path: PathBuf::from(lines[2]),
        })
    }
}

/// Split an optional `:port` suffix off the host line. A suffix that does
/// not parse as a port is treated as part of the host.
fn split_host_port(line: &str) -> (String, Option<u16>) {
    if let Some((host, port)) = line.rsplit_once(':') {
        if let Ok(port) = port.parse::<u16>() {
            return (host.to_string(), Some(port));
        }
    }
    (line.to_string(), None)
}

fn read_port_file(path: &Path) -> u16 {
    match fs::read_to_string(path) {
        Ok(contents) => match contents.trim().parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                warn!("{} is not a valid port, using {DEFAULT_PORT}", path.display());
                DEFAULT_PORT
            }
        },
        Err(_) => {
            debug!("no {} found, using port {DEFAULT_PORT}", path.display());
            DEFAULT_PORT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bunker_config_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_with_port_file() {
        let dir = temp_dir("portfile");
        fs::write(dir.join(TRANSFER_FILE), "backup.example.com\nalice\n/tmp/data.bin\n").unwrap();
        fs::write(dir.join(PORT_FILE), "4500\n").unwrap();

        let endpoint = ServerEndpoint::load(&dir).unwrap();
        assert_eq!(endpoint.host, "backup.example.com");
        assert_eq!(endpoint.port, 4500);
        assert_eq!(endpoint.username, "alice");
        assert_eq!(endpoint.file_path, PathBuf::from("/tmp/data.bin"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_inline_port_wins() {
        let dir = temp_dir("inline");
        fs::write(dir.join(TRANSFER_FILE), "127.0.0.1:9000\nbob\ndata.bin\n").unwrap();
        fs::write(dir.join(PORT_FILE), "4500\n").unwrap();

        let endpoint = ServerEndpoint::load(&dir).unwrap();
        assert_eq!(endpoint.host, "127.0.0.1");
        assert_eq!(endpoint.port, 9000);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_default_port() {
        let dir = temp_dir("default");
        fs::write(dir.join(TRANSFER_FILE), "localhost\ncarol\ndata.bin\n").unwrap();

        let endpoint = ServerEndpoint::load(&dir).unwrap();
        assert_eq!(endpoint.port, DEFAULT_PORT);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unparseable_port_falls_back() {
        let dir = temp_dir("badport");
        fs::write(dir.join(TRANSFER_FILE), "localhost\ncarol\ndata.bin\n").unwrap();
        fs::write(dir.join(PORT_FILE), "not-a-port\n").unwrap();

        let endpoint = ServerEndpoint::load(&dir).unwrap();
        assert_eq!(endpoint.port, DEFAULT_PORT);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_transfer_info() {
        let dir = temp_dir("missing");
        assert!(matches!(
            ServerEndpoint::load(&dir),
            Err(BackupError::Config(_))
        ));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_wrong_line_count() {
        let dir = temp_dir("lines");
        fs::write(dir.join(TRANSFER_FILE), "localhost\nalice\n").unwrap();
        assert!(ServerEndpoint::load(&dir).is_err());

        fs::write(dir.join(TRANSFER_FILE), "localhost\n\n\nalice\ndata\nextra\n").unwrap();
        assert!(ServerEndpoint::load(&dir).is_err());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_blank_lines_skipped() {
        let dir = temp_dir("blanks");
        fs::write(dir.join(TRANSFER_FILE), "localhost\n\nalice\n\ndata.bin\n").unwrap();

        let endpoint = ServerEndpoint::load(&dir).unwrap();
        assert_eq!(endpoint.username, "alice");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_overlong_username_rejected() {
        let dir = temp_dir("longname");
        let name = "x".repeat(255);
        fs::write(dir.join(TRANSFER_FILE), format!("localhost\n{name}\ndata.bin\n")).unwrap();
        assert!(ServerEndpoint::load(&dir).is_err());

        fs::remove_dir_all(&dir).unwrap();
    }
}
