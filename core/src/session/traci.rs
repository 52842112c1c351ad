//! Client side of the engine's remote-control protocol.
//!
//! Messages are length-prefixed (big endian `u32`, including the prefix) and
//! carry one or more commands. Every request is answered by a status record
//! per command, optionally followed by a typed result.

use crate::prelude::{SessionError, SessionResult};
use crate::session::engine::{EngineInvocation, EngineLauncher, SimulationEngine, VehicleState};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

pub const CMD_GETVERSION: u8 = 0x00;
pub const CMD_SIMSTEP: u8 = 0x02;
pub const CMD_CLOSE: u8 = 0x7F;
pub const CMD_GET_VEHICLE_VARIABLE: u8 = 0xa4;
pub const CMD_GET_SIM_VARIABLE: u8 = 0xab;
pub const CMD_SET_EDGE_VARIABLE: u8 = 0xca;

pub const VAR_ID_LIST: u8 = 0x00;
pub const VAR_SPEED: u8 = 0x40;
pub const VAR_POSITION: u8 = 0x42;
pub const VAR_ANGLE: u8 = 0x43;
pub const VAR_TYPE: u8 = 0x4f;
pub const VAR_MIN_EXPECTED_VEHICLES: u8 = 0x7d;
pub const LANE_ALLOWED: u8 = 0x34;
pub const LANE_DISALLOWED: u8 = 0x35;

pub const TYPE_POSITION_2D: u8 = 0x01;
pub const TYPE_INTEGER: u8 = 0x09;
pub const TYPE_DOUBLE: u8 = 0x0B;
pub const TYPE_STRING: u8 = 0x0C;
pub const TYPE_STRINGLIST: u8 = 0x0E;

const RTYPE_OK: u8 = 0x00;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

fn protocol(reason: impl Into<String>) -> SessionError {
    SessionError::Engine(reason.into())
}

/// Builds the payload of one command.
#[derive(Debug, Default, Clone)]
pub struct CommandWriter {
    content: Vec<u8>,
}

impl CommandWriter {
    pub fn u8(mut self, value: u8) -> Self {
        self.content.push(value);
        self
    }

    pub fn i32(mut self, value: i32) -> Self {
        self.content.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn f64(mut self, value: f64) -> Self {
        self.content.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn string(mut self, value: &str) -> Self {
        self.content
            .extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.content.extend_from_slice(value.as_bytes());
        self
    }

    pub fn string_list(mut self, values: &[String]) -> Self {
        self.content
            .extend_from_slice(&(values.len() as u32).to_be_bytes());
        for value in values {
            self = self.string(value);
        }
        self
    }

    /// Frames the command: short form when it fits a one-byte length.
    pub fn finish(self, command: u8) -> Vec<u8> {
        let short_len = 2 + self.content.len();
        let mut out = Vec::with_capacity(short_len + 4);
        if short_len <= u8::MAX as usize {
            out.push(short_len as u8);
        } else {
            out.push(0);
            out.extend_from_slice(&((short_len + 4) as u32).to_be_bytes());
        }
        out.push(command);
        out.extend_from_slice(&self.content);
        out
    }
}

/// Wraps framed commands into one length-prefixed message.
pub fn encode_message(commands: &[Vec<u8>]) -> Vec<u8> {
    let body_len: usize = commands.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(body_len + 4);
    out.extend_from_slice(&((body_len + 4) as u32).to_be_bytes());
    for command in commands {
        out.extend_from_slice(command);
    }
    out
}

/// Cursor over a received message body.
#[derive(Debug)]
pub struct ResponseReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ResponseReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> SessionResult<&'a [u8]> {
        let end = self.pos + n;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| protocol(format!("truncated response at byte {}", self.pos)))?;
        self.pos = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> SessionResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn i32(&mut self) -> SessionResult<i32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(i32::from_be_bytes(raw))
    }

    fn u32(&mut self) -> SessionResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(raw))
    }

    pub fn f64(&mut self) -> SessionResult<f64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(f64::from_be_bytes(raw))
    }

    pub fn string(&mut self) -> SessionResult<String> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    pub fn string_list(&mut self) -> SessionResult<Vec<String>> {
        let count = self.u32()? as usize;
        (0..count).map(|_| self.string()).collect()
    }

    /// Reads a command header and returns the command id.
    fn command_header(&mut self) -> SessionResult<u8> {
        if self.u8()? == 0 {
            self.u32()?;
        }
        self.u8()
    }

    /// Consumes a status record; a non-OK result becomes an error.
    pub fn status(&mut self, expected: u8) -> SessionResult<()> {
        let command = self.command_header()?;
        let result = self.u8()?;
        let description = self.string()?;
        if command != expected {
            return Err(protocol(format!(
                "status for command {command:#04x}, expected {expected:#04x}"
            )));
        }
        if result != RTYPE_OK {
            return Err(protocol(format!(
                "command {command:#04x} rejected: {description}"
            )));
        }
        Ok(())
    }

    /// Consumes a get-variable response header and checks the value type.
    pub fn variable(&mut self, command: u8, variable: u8, value_type: u8) -> SessionResult<()> {
        let response = self.command_header()?;
        if response != command + 0x10 {
            return Err(protocol(format!(
                "unexpected response {response:#04x} to command {command:#04x}"
            )));
        }
        let var = self.u8()?;
        if var != variable {
            return Err(protocol(format!(
                "response for variable {var:#04x}, expected {variable:#04x}"
            )));
        }
        self.string()?;
        let actual = self.u8()?;
        if actual != value_type {
            return Err(protocol(format!(
                "value type {actual:#04x}, expected {value_type:#04x}"
            )));
        }
        Ok(())
    }
}

/// Protocol session over any byte stream.
pub struct TraciConnection<S> {
    stream: S,
}

impl<S> TraciConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Sends one command and returns the raw response body.
    pub async fn exchange(&mut self, command: Vec<u8>) -> SessionResult<Vec<u8>> {
        let message = encode_message(&[command]);
        self.stream
            .write_all(&message)
            .await
            .map_err(|e| protocol(format!("send failed: {e}")))?;
        self.stream
            .flush()
            .await
            .map_err(|e| protocol(format!("send failed: {e}")))?;

        let total = self
            .stream
            .read_u32()
            .await
            .map_err(|e| protocol(format!("receive failed: {e}")))? as usize;
        let body_len = total
            .checked_sub(4)
            .ok_or_else(|| protocol(format!("invalid message length {total}")))?;
        let mut body = vec![0u8; body_len];
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(|e| protocol(format!("receive failed: {e}")))?;
        Ok(body)
    }

    pub async fn version(&mut self) -> SessionResult<(i32, String)> {
        let body = self
            .exchange(CommandWriter::default().finish(CMD_GETVERSION))
            .await?;
        let mut reader = ResponseReader::new(&body);
        reader.status(CMD_GETVERSION)?;
        if reader.command_header()? != CMD_GETVERSION {
            return Err(protocol("malformed version response"));
        }
        let api = reader.i32()?;
        let name = reader.string()?;
        Ok((api, name))
    }

    pub async fn step(&mut self) -> SessionResult<()> {
        let body = self
            .exchange(CommandWriter::default().f64(0.0).finish(CMD_SIMSTEP))
            .await?;
        let mut reader = ResponseReader::new(&body);
        reader.status(CMD_SIMSTEP)?;
        let subscriptions = reader.i32()?;
        if subscriptions != 0 {
            debug!("ignoring {subscriptions} subscription results");
        }
        Ok(())
    }

    async fn get(
        &mut self,
        command: u8,
        variable: u8,
        object: &str,
        value_type: u8,
    ) -> SessionResult<(Vec<u8>, usize)> {
        let body = self
            .exchange(
                CommandWriter::default()
                    .u8(variable)
                    .string(object)
                    .finish(command),
            )
            .await?;
        let mut reader = ResponseReader::new(&body);
        reader.status(command)?;
        reader.variable(command, variable, value_type)?;
        let offset = reader.pos;
        Ok((body, offset))
    }

    pub async fn get_int(&mut self, command: u8, variable: u8, object: &str) -> SessionResult<i32> {
        let (body, offset) = self.get(command, variable, object, TYPE_INTEGER).await?;
        let mut reader = ResponseReader { buf: &body, pos: offset };
        reader.i32()
    }

    pub async fn get_double(&mut self, command: u8, variable: u8, object: &str) -> SessionResult<f64> {
        let (body, offset) = self.get(command, variable, object, TYPE_DOUBLE).await?;
        let mut reader = ResponseReader { buf: &body, pos: offset };
        reader.f64()
    }

    pub async fn get_string(&mut self, command: u8, variable: u8, object: &str) -> SessionResult<String> {
        let (body, offset) = self.get(command, variable, object, TYPE_STRING).await?;
        let mut reader = ResponseReader { buf: &body, pos: offset };
        reader.string()
    }

    pub async fn get_string_list(
        &mut self,
        command: u8,
        variable: u8,
        object: &str,
    ) -> SessionResult<Vec<String>> {
        let (body, offset) = self.get(command, variable, object, TYPE_STRINGLIST).await?;
        let mut reader = ResponseReader { buf: &body, pos: offset };
        reader.string_list()
    }

    pub async fn get_position(
        &mut self,
        command: u8,
        variable: u8,
        object: &str,
    ) -> SessionResult<(f64, f64)> {
        let (body, offset) = self.get(command, variable, object, TYPE_POSITION_2D).await?;
        let mut reader = ResponseReader { buf: &body, pos: offset };
        Ok((reader.f64()?, reader.f64()?))
    }

    pub async fn set_string_list(
        &mut self,
        command: u8,
        variable: u8,
        object: &str,
        values: &[String],
    ) -> SessionResult<()> {
        let body = self
            .exchange(
                CommandWriter::default()
                    .u8(variable)
                    .string(object)
                    .u8(TYPE_STRINGLIST)
                    .string_list(values)
                    .finish(command),
            )
            .await?;
        ResponseReader::new(&body).status(command)
    }

    pub async fn close(&mut self) -> SessionResult<()> {
        let body = self
            .exchange(CommandWriter::default().finish(CMD_CLOSE))
            .await?;
        ResponseReader::new(&body).status(CMD_CLOSE)
    }
}

#[async_trait]
impl<S> SimulationEngine for TraciConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn simulation_step(&mut self) -> SessionResult<()> {
        self.step().await
    }

    async fn min_expected_number(&mut self) -> SessionResult<i32> {
        self.get_int(CMD_GET_SIM_VARIABLE, VAR_MIN_EXPECTED_VEHICLES, "")
            .await
    }

    async fn vehicle_ids(&mut self) -> SessionResult<Vec<String>> {
        self.get_string_list(CMD_GET_VEHICLE_VARIABLE, VAR_ID_LIST, "")
            .await
    }

    async fn vehicle_state(&mut self, id: &str) -> SessionResult<VehicleState> {
        let query = |reason: SessionError| SessionError::EntityQuery {
            id: id.to_string(),
            reason: reason.to_string(),
        };
        let position = self
            .get_position(CMD_GET_VEHICLE_VARIABLE, VAR_POSITION, id)
            .await
            .map_err(query)?;
        let speed = self
            .get_double(CMD_GET_VEHICLE_VARIABLE, VAR_SPEED, id)
            .await
            .map_err(query)?;
        let vehicle_type = self
            .get_string(CMD_GET_VEHICLE_VARIABLE, VAR_TYPE, id)
            .await
            .map_err(query)?;
        let angle = self
            .get_double(CMD_GET_VEHICLE_VARIABLE, VAR_ANGLE, id)
            .await
            .map_err(query)?;
        Ok(VehicleState {
            position,
            speed,
            vehicle_type,
            angle,
        })
    }

    async fn set_edge_disallowed(&mut self, edge: &str, classes: &[String]) -> SessionResult<()> {
        self.set_string_list(CMD_SET_EDGE_VARIABLE, LANE_DISALLOWED, edge, classes)
            .await
    }

    async fn set_edge_allowed(&mut self, edge: &str, classes: &[String]) -> SessionResult<()> {
        self.set_string_list(CMD_SET_EDGE_VARIABLE, LANE_ALLOWED, edge, classes)
            .await
    }

    async fn close(&mut self) -> SessionResult<()> {
        TraciConnection::close(self).await
    }
}

/// Engine process plus its control connection. The process is killed if
/// this value is dropped without closing.
pub struct SumoEngine {
    connection: TraciConnection<TcpStream>,
    child: Child,
    close_timeout: Duration,
}

impl SumoEngine {
    fn new(connection: TraciConnection<TcpStream>, child: Child, close_timeout: Duration) -> Self {
        Self {
            connection,
            child,
            close_timeout,
        }
    }
}

#[async_trait]
impl SimulationEngine for SumoEngine {
    async fn simulation_step(&mut self) -> SessionResult<()> {
        self.connection.step().await
    }

    async fn min_expected_number(&mut self) -> SessionResult<i32> {
        self.connection.min_expected_number().await
    }

    async fn vehicle_ids(&mut self) -> SessionResult<Vec<String>> {
        self.connection.vehicle_ids().await
    }

    async fn vehicle_state(&mut self, id: &str) -> SessionResult<VehicleState> {
        self.connection.vehicle_state(id).await
    }

    async fn set_edge_disallowed(&mut self, edge: &str, classes: &[String]) -> SessionResult<()> {
        self.connection.set_edge_disallowed(edge, classes).await
    }

    async fn set_edge_allowed(&mut self, edge: &str, classes: &[String]) -> SessionResult<()> {
        self.connection.set_edge_allowed(edge, classes).await
    }

    async fn close(&mut self) -> SessionResult<()> {
        let closed = TraciConnection::close(&mut self.connection).await;
        match tokio::time::timeout(self.close_timeout, self.child.wait()).await {
            Ok(Ok(status)) => info!("engine exited with {status}"),
            Ok(Err(e)) => warn!("waiting for engine exit failed: {e}"),
            Err(_) => {
                warn!("engine did not exit after close, killing it");
                if let Err(e) = self.child.kill().await {
                    warn!("failed to kill engine: {e}");
                }
            }
        }
        closed
    }
}

/// Starts the engine as a child process and connects to its control port.
#[derive(Debug, Clone, Default)]
pub struct SumoLauncher;

impl SumoLauncher {
    fn free_port() -> SessionResult<u16> {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0))
            .map_err(|e| SessionError::EngineStart(format!("no free port: {e}")))?;
        listener
            .local_addr()
            .map(|addr| addr.port())
            .map_err(|e| SessionError::EngineStart(format!("no free port: {e}")))
    }
}

#[async_trait]
impl EngineLauncher for SumoLauncher {
    type Engine = SumoEngine;

    async fn launch(&self, invocation: &EngineInvocation) -> SessionResult<SumoEngine> {
        let port = Self::free_port()?;
        let mut command = Command::new(&invocation.program);
        command
            .args(invocation.args())
            .arg("--remote-port")
            .arg(port.to_string())
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|e| {
            SessionError::EngineStart(format!("cannot start {}: {e}", invocation.program))
        })?;
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        let settings = &invocation.settings;
        let mut attempt = 0;
        let stream = loop {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(stream) => break stream,
                Err(e) => {
                    if let Ok(Some(status)) = child.try_wait() {
                        return Err(SessionError::EngineStart(format!(
                            "engine exited with {status} before accepting connections"
                        )));
                    }
                    attempt += 1;
                    if attempt >= settings.connect_retries {
                        return Err(SessionError::EngineStart(format!(
                            "could not connect to port {port}: {e}"
                        )));
                    }
                    tokio::time::sleep(settings.connect_retry_delay()).await;
                }
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {e}");
        }

        let mut connection = TraciConnection::new(stream);
        let (api, name) = connection
            .version()
            .await
            .map_err(|e| SessionError::EngineStart(format!("handshake failed: {e}")))?;
        info!("connected to {name} (api {api}) on port {port}");
        Ok(SumoEngine::new(connection, child, CLOSE_TIMEOUT))
    }
}

async fn forward_output(output: impl AsyncRead + Unpin, stream: &'static str) {
    let mut lines = BufReader::new(output).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("[sumo {stream}] {line}");
    }
}
