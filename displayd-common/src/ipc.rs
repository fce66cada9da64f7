use std::path::{Path, PathBuf};
use std::os::unix::net::UnixStream;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use serde::{Serialize, Deserialize};
use serde::de::DeserializeOwned;
use anyhow::{Result, Context};
use uuid::Uuid;

use crate::error::{DisplaydError, HelperError, IpcError, VirtualDisplayError};
use crate::recovery::{VirtualDisplayCreationResult, VirtualDisplayDriver, VirtualDisplaySpec};
use crate::request::{DisplayApplyAction, DisplayApplyRequest};
use crate::session::{RunningAppEntry, SessionDescriptor};

pub const CONTROL_SOCKET_NAME: &str = "displayd.sock";
pub const HELPER_SOCKET_NAME: &str = "displayd-helper.sock";

/// Read and write timeout applied to every request.
pub const DEFAULT_IPC_TIMEOUT: Duration = Duration::from_secs(5);

/// `$XDG_RUNTIME_DIR/<name>`, falling back to `/tmp`.
pub fn default_socket_path(name: &str) -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(name)
}

/// Messages the display helper understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HelperCommand {
    Apply { request: DisplayApplyRequest },
    Revert,
    Ping,
    CreateVirtualDisplay { spec: VirtualDisplaySpec },
    RemoveVirtualDisplay { guid: Uuid },
    QueryVirtualDisplay { guid: Uuid },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HelperResponse {
    Success { message: String },
    Error { message: String },
    Pong,
    VirtualDisplay { result: Option<VirtualDisplayCreationResult> },
}

/// Messages accepted on the daemon's control socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlCommand {
    /// `launch` registers the app the session started, keyed by its app id.
    SessionStart { session: SessionDescriptor, launch: Option<RunningAppEntry> },
    /// `app_running` keeps the slower watchdog cadence while the launched
    /// app outlives the stream.
    SessionEnd { app_running: bool },
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlResponse {
    Success { message: String },
    Error { message: String },
    Status(DaemonStatus),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub helper_ready: bool,
    pub session: Option<SessionDescriptor>,
    pub app_running: bool,
    pub last_action: Option<DisplayApplyAction>,
    pub virtual_display_guid: Option<Uuid>,
    pub virtual_display_device_id: Option<String>,
    pub recovering: bool,
    /// Recovery exhausted its attempts; a new session is needed to retry.
    #[serde(default)]
    pub virtual_display_lost: bool,
}

/// Lets the server turn a handler failure into a reply.
pub trait ErrorResponse {
    fn from_error(message: String) -> Self;
}

impl ErrorResponse for HelperResponse {
    fn from_error(message: String) -> Self {
        HelperResponse::Error { message }
    }
}

impl ErrorResponse for ControlResponse {
    fn from_error(message: String) -> Self {
        ControlResponse::Error { message }
    }
}

/// One JSON request per connection; the writer half-closes to mark the end.
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_IPC_TIMEOUT,
        }
    }

    /// Zero is rejected by the socket layer, so it is clamped to 1 ms.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn send<C, R>(&self, command: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        let mut stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            log::debug!("Connect to {:?} failed: {}", self.socket_path, e);
            IpcError::Connection { endpoint: self.endpoint() }
        })?;

        stream.set_read_timeout(Some(self.timeout))
            .with_context(|| "Failed to set socket read timeout")?;
        stream.set_write_timeout(Some(self.timeout))
            .with_context(|| "Failed to set socket write timeout")?;

        let command_json = serde_json::to_string(command)
            .with_context(|| "Failed to serialize command")?;

        stream.write_all(command_json.as_bytes())
            .map_err(|e| self.io_error(e, "Failed to send command"))?;
        stream.shutdown(std::net::Shutdown::Write)
            .with_context(|| "Failed to shutdown write stream")?;

        let mut response = String::new();
        stream.read_to_string(&mut response)
            .map_err(|e| self.io_error(e, "Failed to read response"))?;

        serde_json::from_str(&response)
            .with_context(|| "Failed to deserialize response")
    }

    fn endpoint(&self) -> String {
        self.socket_path.display().to_string()
    }

    fn io_error(&self, error: std::io::Error, context: &'static str) -> anyhow::Error {
        match error.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => IpcError::Timeout {
                endpoint: self.endpoint(),
                timeout: self.timeout,
            }
            .into(),
            _ => anyhow::Error::new(error).context(context),
        }
    }
}

pub struct IpcServer {
    socket_path: PathBuf,
}

impl IpcServer {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self { socket_path: socket_path.into() }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections forever, one thread per connection.
    pub fn start<C, R, F>(&self, handler: F) -> Result<()>
    where
        C: DeserializeOwned,
        R: Serialize + ErrorResponse,
        F: Fn(C) -> Result<R> + Send + Clone + 'static,
    {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .with_context(|| "Failed to remove existing socket")?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| "Failed to create socket directory")?;
        }

        let listener = std::os::unix::net::UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to socket {:?}", self.socket_path))?;

        log::info!("IPC server listening on {:?}", self.socket_path);

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let handler = handler.clone();
                    std::thread::spawn(move || {
                        if let Err(e) = Self::handle_connection(stream, &handler) {
                            log::error!("Error handling IPC connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    log::error!("Error accepting IPC connection: {}", e);
                }
            }
        }

        Ok(())
    }

    fn handle_connection<C, R, F>(mut stream: UnixStream, handler: &F) -> Result<()>
    where
        C: DeserializeOwned,
        R: Serialize + ErrorResponse,
        F: Fn(C) -> Result<R>,
    {
        let mut command_json = String::new();
        stream.read_to_string(&mut command_json)
            .with_context(|| "Failed to read command from client")?;

        let response = match serde_json::from_str::<C>(&command_json) {
            Ok(command) => handler(command).unwrap_or_else(|e| R::from_error(e.to_string())),
            Err(e) => R::from_error(format!("Malformed command: {}", e)),
        };

        let response_json = serde_json::to_string(&response)
            .with_context(|| "Failed to serialize response")?;

        stream.write_all(response_json.as_bytes())
            .with_context(|| "Failed to send response to client")?;

        Ok(())
    }
}

/// Typed calls against the display helper.
#[derive(Debug, Clone)]
pub struct HelperClient {
    client: IpcClient,
}

impl HelperClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self { client: IpcClient::new(socket_path) }
    }

    /// Bound every helper call so a hung helper reads as unresponsive.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { client: self.client.with_timeout(timeout) }
    }

    pub fn socket_path(&self) -> &Path {
        self.client.socket_path()
    }

    pub fn ping(&self) -> bool {
        match self.client.send::<_, HelperResponse>(&HelperCommand::Ping) {
            Ok(HelperResponse::Pong) => true,
            Ok(other) => {
                log::debug!("Unexpected ping reply: {:?}", other);
                false
            }
            Err(e) => {
                log::debug!("Helper ping failed: {:#}", e);
                false
            }
        }
    }

    pub fn apply(&self, request: &DisplayApplyRequest) -> Result<()> {
        self.expect_success(HelperCommand::Apply { request: request.clone() })
    }

    pub fn revert(&self) -> Result<()> {
        self.expect_success(HelperCommand::Revert)
    }

    pub fn query_virtual_display(&self, guid: Uuid) -> Result<Option<VirtualDisplayCreationResult>> {
        match self.client.send(&HelperCommand::QueryVirtualDisplay { guid })? {
            HelperResponse::VirtualDisplay { result } => Ok(result),
            HelperResponse::Error { message } => Err(HelperError::Rejected { message }.into()),
            other => Err(IpcError::UnexpectedResponse { response: format!("{:?}", other) }.into()),
        }
    }

    fn expect_success(&self, command: HelperCommand) -> Result<()> {
        match self.client.send(&command)? {
            HelperResponse::Success { message } => {
                log::debug!("Helper: {}", message);
                Ok(())
            }
            HelperResponse::Error { message } => Err(HelperError::Rejected { message }.into()),
            other => Err(IpcError::UnexpectedResponse { response: format!("{:?}", other) }.into()),
        }
    }
}

impl VirtualDisplayDriver for HelperClient {
    fn create(&mut self, spec: &VirtualDisplaySpec) -> crate::Result<VirtualDisplayCreationResult> {
        let response = self
            .client
            .send(&HelperCommand::CreateVirtualDisplay { spec: spec.clone() })
            .map_err(|e| VirtualDisplayError::Creation { message: format!("{:#}", e) })?;

        match response {
            HelperResponse::VirtualDisplay { result: Some(result) } => Ok(result),
            HelperResponse::VirtualDisplay { result: None } => {
                Err(VirtualDisplayError::DeviceIdUnresolved { guid: spec.guid }.into())
            }
            HelperResponse::Error { message } => Err(VirtualDisplayError::Creation { message }.into()),
            other => Err(VirtualDisplayError::Creation {
                message: format!("unexpected helper response: {:?}", other),
            }
            .into()),
        }
    }

    fn remove(&mut self, guid: Uuid) -> crate::Result<()> {
        let response = self
            .client
            .send(&HelperCommand::RemoveVirtualDisplay { guid })
            .map_err(|e| VirtualDisplayError::Removal { message: format!("{:#}", e) })?;

        match response {
            HelperResponse::Success { .. } => Ok(()),
            HelperResponse::Error { message } => Err(DisplaydError::VirtualDisplay(VirtualDisplayError::Removal { message })),
            other => Err(VirtualDisplayError::Removal {
                message: format!("unexpected helper response: {:?}", other),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ApplyRequestBuilder;
    use chrono::Utc;
    use std::os::unix::net::UnixListener;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn serve<F>(dir: &TempDir, handler: F) -> PathBuf
    where
        F: Fn(HelperCommand) -> Result<HelperResponse> + Send + Clone + 'static,
    {
        let socket_path = dir.path().join("helper.sock");
        let server = IpcServer::new(&socket_path);
        std::thread::spawn(move || {
            let _ = server.start(handler);
        });

        for _ in 0..100 {
            if UnixStream::connect(&socket_path).is_ok() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        socket_path
    }

    fn fake_helper(command: HelperCommand) -> Result<HelperResponse> {
        Ok(match command {
            HelperCommand::Ping => HelperResponse::Pong,
            HelperCommand::Apply { request } => HelperResponse::Success {
                message: format!("applied {:?}", request.action()),
            },
            HelperCommand::Revert => anyhow::bail!("nothing to revert"),
            HelperCommand::CreateVirtualDisplay { spec } => HelperResponse::VirtualDisplay {
                result: Some(VirtualDisplayCreationResult {
                    display_name: Some(spec.client_name.clone()),
                    device_id: Some("DISPLAY9".to_string()),
                    client_name: Some(spec.client_name),
                    monitor_device_path: None,
                    reused_existing: false,
                    ready_at: Utc::now(),
                }),
            },
            HelperCommand::RemoveVirtualDisplay { .. } => HelperResponse::Success {
                message: "removed".to_string(),
            },
            HelperCommand::QueryVirtualDisplay { .. } => HelperResponse::VirtualDisplay { result: None },
        })
    }

    #[test]
    fn test_helper_round_trip() {
        let dir = TempDir::new().unwrap();
        let socket_path = serve(&dir, fake_helper);
        let mut helper = HelperClient::new(&socket_path);

        assert!(helper.ping());

        let mut builder = ApplyRequestBuilder::new();
        builder.set_action(DisplayApplyAction::Apply);
        helper.apply(&builder.build()).unwrap();

        let err = helper.revert().unwrap_err();
        assert!(err.to_string().contains("nothing to revert"));

        let spec = VirtualDisplaySpec {
            guid: Uuid::nil(),
            width: 1920,
            height: 1080,
            fps: 60,
            client_name: "deck".to_string(),
            client_uuid: "c1".to_string(),
            preferred_display_name: None,
            preferred_device_id: None,
        };
        let created = helper.create(&spec).unwrap();
        assert_eq!(created.device_id(), Some("DISPLAY9"));
        helper.remove(spec.guid).unwrap();
        assert_eq!(helper.query_virtual_display(spec.guid).unwrap(), None);
    }

    #[test]
    fn test_ping_without_helper() {
        let dir = TempDir::new().unwrap();
        let helper = HelperClient::new(dir.path().join("missing.sock"));
        assert!(!helper.ping());

        let err = IpcClient::new(dir.path().join("missing.sock"))
            .send::<_, HelperResponse>(&HelperCommand::Ping)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<IpcError>(), Some(IpcError::Connection { .. })));
    }

    #[test]
    fn test_ping_gives_up_on_silent_helper() {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("silent.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        // Accepts and holds every connection without ever replying.
        std::thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming().flatten() {
                held.push(stream);
            }
        });

        let helper = HelperClient::new(&socket_path).with_timeout(Duration::from_millis(200));
        let (tx, rx) = mpsc::channel();
        let pinger = helper.clone();
        std::thread::spawn(move || {
            let _ = tx.send(pinger.ping());
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(false));

        let err = IpcClient::new(&socket_path)
            .with_timeout(Duration::from_millis(200))
            .send::<_, HelperResponse>(&HelperCommand::Ping)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<IpcError>(), Some(IpcError::Timeout { .. })));
    }

    #[test]
    fn test_unexpected_reply_is_reported() {
        let dir = TempDir::new().unwrap();
        let socket_path = serve(&dir, |_| Ok(HelperResponse::Pong));
        let helper = HelperClient::new(&socket_path);

        let err = helper.revert().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IpcError>(),
            Some(IpcError::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn test_malformed_command_gets_error_reply() {
        let dir = TempDir::new().unwrap();
        let socket_path = serve(&dir, fake_helper);

        let mut stream = UnixStream::connect(&socket_path).unwrap();
        stream.write_all(b"{\"Bogus\":1}").unwrap();
        stream.shutdown(std::net::Shutdown::Write).unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).unwrap();

        let response: HelperResponse = serde_json::from_str(&reply).unwrap();
        assert!(matches!(response, HelperResponse::Error { .. }));
    }

    #[test]
    fn test_control_messages_serialize() {
        let command = ControlCommand::SessionEnd { app_running: true };
        let json = serde_json::to_string(&command).unwrap();
        assert_eq!(serde_json::from_str::<ControlCommand>(&json).unwrap(), command);

        let status = ControlResponse::Status(DaemonStatus {
            helper_ready: true,
            ..Default::default()
        });
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(serde_json::from_str::<ControlResponse>(&json).unwrap(), status);
    }
}
