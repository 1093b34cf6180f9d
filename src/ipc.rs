// IPC protocol module
// Local control channel between the sbs CLI and the daemon

use crate::component::{CallResult, Invocation};
use crate::host::ComponentStatus;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

pub use crate::config::DEFAULT_SOCKET_PATH;

/// Frames larger than this are rejected
pub const MAX_FRAME_LEN: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IpcMessage {
    Status,
    ListComponents,
    ListProcedures,
    Call {
        procedure: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IpcResponse {
    Status(StatusInfo),
    Components(Vec<ComponentStatus>),
    Procedures(Vec<String>),
    Result(CallResult),
    /// A failed call, with the WAMP error URI it maps to
    Error { uri: String, message: String },
    Ok,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedComponent {
    pub identity: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub name: String,
    pub version: String,
    pub realm: String,
    pub listen: String,
    pub sessions: usize,
    pub components: usize,
    pub procedures: usize,
    pub skipped: Vec<SkippedComponent>,
    /// RFC 3339 start time
    pub started_at: String,
}

impl IpcMessage {
    pub fn call(procedure: impl Into<String>, invocation: Invocation) -> Self {
        IpcMessage::Call {
            procedure: procedure.into(),
            args: invocation.args,
            kwargs: invocation.kwargs,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode(self, "message")
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        decode(data, "message")
    }

    /// Send this message over a stream
    pub async fn send<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> Result<()> {
        write_frame(stream, &self.serialize()?, "message").await
    }

    /// Receive a message from a stream
    pub async fn receive<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self> {
        let data = read_frame(stream, "message").await?;
        Self::deserialize(&data)
    }
}

impl IpcResponse {
    pub fn from_error(err: &Error) -> Self {
        IpcResponse::Error {
            uri: err.wamp_uri().to_string(),
            message: err.wamp_message(),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode(self, "response")
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        decode(data, "response")
    }

    /// Send this response over a stream
    pub async fn send<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> Result<()> {
        write_frame(stream, &self.serialize()?, "response").await
    }

    /// Receive a response from a stream
    pub async fn receive<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self> {
        let data = read_frame(stream, "response").await?;
        Self::deserialize(&data)
    }
}

fn encode<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| Error::ipc_protocol(format!("Failed to serialize {}: {}", what, e)))
}

fn decode<T: DeserializeOwned>(data: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| {
        let preview = if data.len() > 100 {
            format!(
                "{}... ({} bytes)",
                String::from_utf8_lossy(&data[..100]),
                data.len()
            )
        } else {
            String::from_utf8_lossy(data).to_string()
        };
        Error::ipc_protocol(format!(
            "Failed to deserialize {}: {}. Data: {}",
            what, e, preview
        ))
    })
}

/// Write a length-prefixed frame (4-byte big-endian length, then the body)
async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, data: &[u8], what: &str) -> Result<()> {
    if data.len() > MAX_FRAME_LEN {
        return Err(Error::ipc_protocol(format!(
            "Refusing to send {} of {} bytes (max: 1MB)",
            what,
            data.len()
        )));
    }
    let len = data.len() as u32;

    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| Error::ipc_protocol(format!("Failed to write {} length: {}", what, e)))?;

    stream
        .write_all(data)
        .await
        .map_err(|e| Error::ipc_protocol(format!("Failed to write {} data: {}", what, e)))?;

    stream
        .flush()
        .await
        .map_err(|e| Error::ipc_protocol(format!("Failed to flush stream: {}", e)))?;

    Ok(())
}

async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S, what: &str) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ipc_protocol(format!(
                "Connection closed by peer while reading {} length",
                what
            ))
        } else {
            Error::ipc_protocol(format!("Failed to read {} length: {}", what, e))
        }
    })?;

    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > MAX_FRAME_LEN {
        return Err(Error::ipc_protocol(format!(
            "{} too large: {} bytes (max: 1MB). Possible protocol mismatch.",
            what, len
        )));
    }

    if len == 0 {
        return Err(Error::ipc_protocol(format!("Received zero-length {}", what)));
    }

    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ipc_protocol(format!(
                "Connection closed while reading {} data (expected {} bytes)",
                what, len
            ))
        } else {
            Error::ipc_protocol(format!("Failed to read {} data: {}", what, e))
        }
    })?;

    Ok(data)
}

/// IPC Server for handling daemon-side communication
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Create a new IPC server at the specified socket path
    pub async fn new<P: AsRef<Path>>(socket_path: P) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        // Stale socket from a previous run
        if socket_path.exists() {
            std::fs::remove_file(&socket_path).map_err(|e| {
                Error::IpcSocket(format!(
                    "Failed to remove existing socket at {:?}: {}. Try manually removing it with: rm {:?}",
                    socket_path, e, socket_path
                ))
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::IpcSocket(format!(
                        "Failed to create socket directory {:?}: {}",
                        parent, e
                    ))
                })?;
            }
        }

        let listener = UnixListener::bind(&socket_path).map_err(|e| {
            Error::IpcSocket(format!(
                "Failed to bind socket at {:?}: {}. Check permissions and ensure no other daemon is running.",
                socket_path, e
            ))
        })?;

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Accept a new connection and return the stream
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::ipc_connection(format!("Failed to accept connection: {}", e)))?;

        Ok(stream)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// IPC Client for CLI-side communication
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Connect to the daemon and send a message, returning the response
    pub async fn send_message(&self, message: &IpcMessage) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ipc_connection(format!(
                    "Socket not found at {:?}. The daemon is not running. Start it with: sbs daemon start",
                    self.socket_path
                ))
            } else if e.kind() == std::io::ErrorKind::ConnectionRefused {
                Error::ipc_connection(format!(
                    "Connection refused at {:?}. The socket file exists but daemon is not responding. Try: rm {:?} && sbs daemon start",
                    self.socket_path, self.socket_path
                ))
            } else {
                Error::ipc_connection(format!(
                    "Failed to connect to daemon at {:?}: {}",
                    self.socket_path, e
                ))
            }
        })?;

        message.send(&mut stream).await?;
        IpcResponse::receive(&mut stream).await
    }

    /// Run a procedure through the daemon's router
    pub async fn call(&self, procedure: &str, invocation: Invocation) -> Result<CallResult> {
        match self
            .send_message(&IpcMessage::call(procedure, invocation))
            .await?
        {
            IpcResponse::Result(result) => Ok(result),
            IpcResponse::Error { uri, message } => Err(Error::Remote { uri, message }),
            other => Err(Error::ipc_protocol(format!(
                "Unexpected response to call: {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::CapabilityKind;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_call_message_wire_format() {
        let msg = IpcMessage::call(
            "screen.brightness.set",
            Invocation::with_args(vec![json!(40)]),
        );
        let value: Value = serde_json::from_slice(&msg.serialize().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"Call": {"procedure": "screen.brightness.set", "args": [40], "kwargs": {}}})
        );

        // Payload fields may be left out by hand-written clients
        let parsed = IpcMessage::deserialize(br#"{"Call": {"procedure": "screen.lock"}}"#).unwrap();
        assert_eq!(parsed, IpcMessage::call("screen.lock", Invocation::default()));
    }

    #[test]
    fn test_unit_requests_wire_format() {
        assert_eq!(IpcMessage::Status.serialize().unwrap(), br#""Status""#.to_vec());
        assert_eq!(
            IpcMessage::deserialize(br#""Shutdown""#).unwrap(),
            IpcMessage::Shutdown
        );
    }

    #[test]
    fn test_error_response_from_crate_error() {
        let resp = IpcResponse::from_error(&Error::DeviceNotAvailable);
        assert_eq!(
            resp,
            IpcResponse::Error {
                uri: "wamp.error.operation_failed".to_string(),
                message: "brightness device not available".to_string(),
            }
        );
    }

    #[test]
    fn test_deserialize_garbage_is_protocol_error() {
        let err = IpcMessage::deserialize(b"{not json").unwrap_err();
        assert!(err.is_ipc_error());
    }

    #[tokio::test]
    async fn test_zero_length_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&0u32.to_be_bytes()).await.unwrap();
        let err = IpcMessage::receive(&mut b).await.unwrap_err();
        assert!(err.to_string().contains("zero-length"));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&2_000_000u32.to_be_bytes()).await.unwrap();
        let err = IpcResponse::receive(&mut b).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn test_truncated_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"{\"Ok").await.unwrap();
        drop(a);
        let err = IpcResponse::receive(&mut b).await.unwrap_err();
        assert!(err.to_string().contains("expected 10 bytes"));
    }

    #[tokio::test]
    async fn test_ipc_server_creation() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::new(&socket_path)
            .await
            .expect("Failed to create server");
        assert_eq!(server.socket_path(), socket_path);
        assert!(socket_path.exists(), "Socket file should exist");

        drop(server);
        assert!(!socket_path.exists(), "Socket file should be removed on drop");
    }

    #[tokio::test]
    async fn test_ipc_client_server_communication() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::new(&socket_path)
            .await
            .expect("Failed to create server");
        let client = IpcClient::new(&socket_path);

        let server_task = tokio::spawn(async move {
            for _ in 0..2 {
                let mut stream = server.accept().await.expect("Failed to accept connection");
                let message = IpcMessage::receive(&mut stream)
                    .await
                    .expect("Failed to receive message");

                let response = match message {
                    IpcMessage::ListComponents => IpcResponse::Components(vec![ComponentStatus {
                        identity: "ScreenLockComponent".to_string(),
                        kind: CapabilityKind::ScreenLock,
                        procedures: vec!["io.xconn.deskconn.deskconnd.screen.lock".to_string()],
                    }]),
                    IpcMessage::Call { procedure, .. } => {
                        IpcResponse::from_error(&Error::NoSuchProcedure(procedure))
                    }
                    _ => IpcResponse::Ok,
                };

                response
                    .send(&mut stream)
                    .await
                    .expect("Failed to send response");
            }
        });

        let response = timeout(
            Duration::from_secs(1),
            client.send_message(&IpcMessage::ListComponents),
        )
        .await
        .expect("Timeout waiting for response")
        .expect("Failed to send message");

        match response {
            IpcResponse::Components(components) => {
                assert_eq!(components.len(), 1);
                assert_eq!(components[0].kind, CapabilityKind::ScreenLock);
            }
            other => panic!("Expected Components response, got {:?}", other),
        }

        let err = timeout(
            Duration::from_secs(1),
            client.call("mouse.teleport", Invocation::default()),
        )
        .await
        .expect("Timeout waiting for response")
        .unwrap_err();
        assert_eq!(err.wamp_uri(), "wamp.error.no_such_procedure");

        server_task.await.expect("Server task failed");
    }

    #[tokio::test]
    async fn test_client_without_daemon() {
        let temp_dir = TempDir::new().unwrap();
        let client = IpcClient::new(temp_dir.path().join("missing.sock"));
        let err = client.send_message(&IpcMessage::Status).await.unwrap_err();
        assert!(err.is_ipc_error());
    }
}
