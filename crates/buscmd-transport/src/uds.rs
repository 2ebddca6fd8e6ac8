use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::sim::SimBus;
use crate::traits::BusTransport;

/// Envelope op: master write.
pub const OP_WRITE: u8 = b'W';
/// Envelope op: master read.
pub const OP_READ: u8 = b'R';

/// Largest byte count an envelope can carry (one-byte length field).
pub const MAX_ENVELOPE_DATA: usize = u8::MAX as usize;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One bus transaction carried over the socket.
///
/// ```text
/// master -> bus : [op][address][len][bytes (len, writes only)]
/// bus -> master : [status][len][bytes (len)]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
struct Envelope {
    op: u8,
    address: u8,
    len: u8,
    data: Vec<u8>,
}

fn encode_request(op: u8, address: u8, len: usize, data: &[u8], dst: &mut BytesMut) -> Result<()> {
    if len > MAX_ENVELOPE_DATA {
        return Err(TransportError::DataTooLong {
            len,
            max: MAX_ENVELOPE_DATA,
        });
    }
    dst.reserve(3 + data.len());
    dst.put_u8(op);
    dst.put_u8(address);
    dst.put_u8(len as u8);
    dst.put_slice(data);
    Ok(())
}

fn encode_reply(status: u8, data: &[u8], dst: &mut BytesMut) {
    let len = data.len().min(MAX_ENVELOPE_DATA);
    dst.reserve(2 + len);
    dst.put_u8(status);
    dst.put_u8(len as u8);
    dst.put_slice(&data[..len]);
}

/// Read one request envelope. `Ok(None)` on clean EOF before a header.
fn read_request(stream: &mut impl Read) -> Result<Option<Envelope>> {
    let mut header = [0u8; 3];
    match stream.read_exact(&mut header) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let [op, address, len] = header;
    let data = match op {
        OP_WRITE => {
            let mut data = vec![0u8; len as usize];
            stream.read_exact(&mut data)?;
            data
        }
        OP_READ => Vec::new(),
        other => {
            return Err(TransportError::Envelope(format!(
                "unknown op 0x{other:02X}"
            )))
        }
    };
    Ok(Some(Envelope {
        op,
        address,
        len,
        data,
    }))
}

fn read_reply(stream: &mut impl Read) -> Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header)?;
    let [status, len] = header;
    let mut data = vec![0u8; len as usize];
    stream.read_exact(&mut data)?;
    Ok((status, data))
}

/// Serves a [`SimBus`] over a filesystem-path Unix domain socket.
///
/// Devices attach to [`SocketBusServer::bus`]; remote masters connect with
/// [`SocketBus::connect`]. The socket file is created with mode `0o600` and
/// removed on drop if it is still the same inode.
pub struct SocketBusServer {
    listener: UnixListener,
    path: PathBuf,
    bus: SimBus,
    created_inode: Option<(u64, u64)>,
}

impl SocketBusServer {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind a new bus at `path`.
    ///
    /// A stale socket file at `path` is removed first; any other kind of
    /// file is left alone and reported as a bind error.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_bus(path, SimBus::new())
    }

    /// Bind and serve an existing bus.
    pub fn bind_with_bus(path: impl AsRef<Path>, bus: SimBus) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(
            &path,
            std::fs::Permissions::from_mode(Self::DEFAULT_SOCKET_MODE),
        )
        .map_err(bind_err)?;
        let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "bus listening on unix domain socket");

        Ok(Self {
            listener,
            created_inode: Some((metadata.dev(), metadata.ino())),
            path,
            bus,
        })
    }

    /// The bus whose devices this server exposes.
    pub fn bus(&self) -> &SimBus {
        &self.bus
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept one master connection and serve it until it disconnects.
    pub fn serve_one(&self) -> Result<()> {
        let (stream, _addr) = self.listener.accept()?;
        debug!("master connected");
        serve_connection(stream, self.bus.clone())
    }

    /// Accept masters until `running` is cleared.
    ///
    /// Each connection is served on its own thread.
    pub fn serve(&self, running: &AtomicBool) -> Result<()> {
        self.listener.set_nonblocking(true)?;
        while running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false)?;
                    debug!("master connected");
                    let bus = self.bus.clone();
                    std::thread::spawn(move || {
                        if let Err(err) = serve_connection(stream, bus) {
                            warn!(error = %err, "bus connection ended with error");
                        }
                    });
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

fn serve_connection(mut stream: UnixStream, mut bus: SimBus) -> Result<()> {
    let mut out = BytesMut::with_capacity(64);
    while let Some(envelope) = read_request(&mut stream)? {
        out.clear();
        match envelope.op {
            OP_WRITE => {
                let status = match bus.send(envelope.address, &envelope.data) {
                    Ok(()) => 0,
                    Err(err) => {
                        trace!(address = envelope.address, error = %err, "remote write failed");
                        err.status_code()
                    }
                };
                encode_reply(status, &[], &mut out);
            }
            _ => {
                let mut buf = vec![0u8; envelope.len as usize];
                match bus.read(envelope.address, &mut buf) {
                    Ok(read) => encode_reply(0, &buf[..read], &mut out),
                    Err(err) => encode_reply(err.status_code(), &[], &mut out),
                }
            }
        }
        stream.write_all(&out)?;
        stream.flush()?;
    }
    debug!("master disconnected");
    Ok(())
}

impl Drop for SocketBusServer {
    fn drop(&mut self) {
        if let Some((expected_dev, expected_ino)) = self.created_inode {
            if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino
                {
                    debug!(path = ?self.path, "cleaning up socket file");
                    let _ = std::fs::remove_file(&self.path);
                } else {
                    debug!(
                        path = ?self.path,
                        "socket path identity changed; skipping cleanup"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for SocketBusServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketBusServer")
            .field("path", &self.path)
            .field("bus", &self.bus)
            .finish()
    }
}

/// Master-side [`BusTransport`] over a [`SocketBusServer`].
#[derive(Debug)]
pub struct SocketBus {
    stream: UnixStream,
    buf: BytesMut,
}

impl SocketBus {
    /// Default wait for replies to plain sends and reads.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Connect to a bus socket.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        stream.set_read_timeout(Some(Self::DEFAULT_TIMEOUT))?;
        stream.set_write_timeout(Some(Self::DEFAULT_TIMEOUT))?;
        debug!(?path, "connected to bus socket");
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(64),
        })
    }

    fn exchange(&mut self, op: u8, address: u8, len: usize, data: &[u8]) -> Result<Vec<u8>> {
        self.buf.clear();
        encode_request(op, address, len, data, &mut self.buf)?;
        self.stream.write_all(&self.buf)?;
        self.stream.flush()?;
        let (status, reply) = read_reply(&mut self.stream).map_err(|err| match err {
            TransportError::Io(io) if io.kind() == ErrorKind::UnexpectedEof => {
                TransportError::Shutdown
            }
            other => other,
        })?;
        let timeout = self
            .stream
            .read_timeout()?
            .unwrap_or(Self::DEFAULT_TIMEOUT);
        match TransportError::from_status(status, address, len, crate::MAX_TRANSFER, timeout) {
            Some(err) => Err(err),
            None => Ok(reply),
        }
    }
}

impl BusTransport for SocketBus {
    fn send(&mut self, address: u8, bytes: &[u8]) -> Result<()> {
        self.exchange(OP_WRITE, address, bytes.len(), bytes)?;
        Ok(())
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<usize> {
        let want = buf.len().min(MAX_ENVELOPE_DATA);
        let reply = self.exchange(OP_READ, address, want, &[])?;
        let read = reply.len().min(want);
        buf[..read].copy_from_slice(&reply[..read]);
        Ok(read)
    }

    fn request(
        &mut self,
        address: u8,
        bytes: &[u8],
        response: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        self.stream.set_read_timeout(Some(timeout))?;
        let result = self.send(address, bytes).and_then(|()| self.read(address, response));
        self.stream.set_read_timeout(Some(Self::DEFAULT_TIMEOUT))?;
        let read = result.map_err(|err| match err {
            TransportError::Io(io)
                if matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                TransportError::Timeout { address, timeout }
            }
            other => other,
        })?;
        if read == 0 {
            return Err(TransportError::Timeout { address, timeout });
        }
        Ok(read)
    }
}
