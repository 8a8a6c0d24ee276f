//! Unix socket transport: bind, accept, and connect.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::connection::PeerConnection;
use crate::error::ProtocolError;

/// Listening side of the bus.
pub struct UnixTransport {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixTransport {
    /// Bind the bus socket, replacing a stale socket file at `path`.
    ///
    /// Fails if another bus is still accepting on `path`. The parent
    /// directory is created private to the user and the socket itself is
    /// made `0600`.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
            restrict(parent, 0o700);
        }
        if path.exists() {
            if std::os::unix::net::UnixStream::connect(&path).is_ok() {
                return Err(ProtocolError::Connection(format!(
                    "{}: a bus is already listening",
                    path.display()
                )));
            }
            debug!(socket = %path.display(), "removing stale socket");
            fs::remove_file(&path)?;
        }

        let listener =
            UnixListener::bind(&path).map_err(|e| ProtocolError::Connection(e.to_string()))?;
        restrict(&path, 0o600);

        info!(socket = %path.display(), "unix transport bound");
        Ok(Self { listener, path })
    }

    /// Accept an incoming connection.
    pub async fn accept(&self) -> Result<PeerConnection, ProtocolError> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        let conn = PeerConnection::new(stream);
        debug!(pid = ?conn.peer_pid(), "accepted connection");
        Ok(conn)
    }

    /// Connect to a bus socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<PeerConnection, ProtocolError> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| ProtocolError::Connection(format!("{}: {e}", path.display())))?;
        debug!(socket = %path.display(), "connected to bus");
        Ok(PeerConnection::new(stream))
    }

    /// Path of the bound socket.
    pub fn local_path(&self) -> &Path {
        &self.path
    }

    /// Remove the socket file. Established connections are unaffected.
    pub fn close(&self) {
        let _ = fs::remove_file(&self.path);
        info!(socket = %self.path.display(), "unix transport closed");
    }
}

fn restrict(path: &Path, mode: u32) {
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        warn!(
            path = %path.display(),
            mode = format_args!("{mode:o}"),
            error = %e,
            "failed to restrict permissions"
        );
    }
}
