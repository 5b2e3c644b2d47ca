//! Engine module - Command/eval protocol over an engine channel
//!
//! Every request is an Int32 opcode followed by a Text payload, answered by
//! exactly one value:
//! - COMMAND (10): run a statement, the engine answers Int32 0
//! - EVAL (11): evaluate an expression, the answer is the result
//! - ASSIGN (12): evaluate an assignment, the engine answers Int32 0
//!
//! RELEASE (-1) and TERMINATE (-2) carry no payload and get no answer.

mod launcher;

pub use launcher::*;

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitStatus;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::Child;

use crate::fish::{FileLayout, FishError, FishReader};
use crate::network::{Channel, ChannelError, ChannelId, ChannelOptions, EngineListener};
use crate::protocol::{Tag, Value};
use crate::proxy::HandleKind;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Unexpected response from engine: {0}")]
    UnexpectedResponse(Value),

    #[error("No {kind} intrinsic named '{name}'")]
    UnknownIntrinsic { kind: HandleKind, name: String },

    #[error("Proxy belongs to channel {proxy}, not {channel}")]
    ForeignProxy { proxy: ChannelId, channel: ChannelId },

    #[error("Cannot write a {0} value into an expression")]
    Unrenderable(Tag),

    #[error("Malformed handle {0:?}")]
    BadHandle(String),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("FISH file error: {0}")]
    File(#[from] FishError),

    #[error("Process error: {0}")]
    Process(#[from] std::io::Error),
}

impl EngineError {
    /// True when the channel is broken and the session must be re-established.
    /// False when only the request failed (engine-side error, bad local input).
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Channel(e) => e.is_fatal(),
            EngineError::Launch(_) => true,
            _ => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Request opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Opcode {
    Command = 10,
    Eval = 11,
    Assign = 12,
    Release = -1,
    Terminate = -2,
}

impl Opcode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Whether an expression string is sent as EVAL or ASSIGN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Eval,
    Assign,
}

impl RequestKind {
    /// Textual rule: any `=` makes it an assignment.
    ///
    /// This also catches comparisons such as `a == b`; use [`Engine::eval`] or
    /// [`Engine::call`] directly for expressions that contain `=` but assign nothing.
    pub fn classify(expression: &str) -> Self {
        if expression.contains('=') {
            RequestKind::Assign
        } else {
            RequestKind::Eval
        }
    }

    pub fn opcode(self) -> Opcode {
        match self {
            RequestKind::Eval => Opcode::Eval,
            RequestKind::Assign => Opcode::Assign,
        }
    }
}

/// A session with one engine over one channel.
///
/// Strictly request/response: each request waits for its answer before the
/// next one can be sent, which `&mut self` enforces.
pub struct Engine<S = TcpStream> {
    channel: Channel<S>,
    child: Option<Child>,
}

impl Engine {
    /// Server role with spawn: check the scenario, bind, launch the engine,
    /// then accept its connection and verify the handshake
    pub async fn launch(
        launcher: &Launcher,
        scenario: &Path,
        listen: SocketAddr,
        options: ChannelOptions,
    ) -> EngineResult<Self> {
        Launcher::check_scenario(scenario)?;
        let listener = EngineListener::bind(listen, options).await?;
        Self::launch_with(launcher, scenario, listener).await
    }

    /// Launch the engine against a listener that is already bound.
    ///
    /// If the connection or the handshake fails the engine is killed and reaped.
    pub async fn launch_with(
        launcher: &Launcher,
        scenario: &Path,
        listener: EngineListener,
    ) -> EngineResult<Self> {
        let mut child = launcher.spawn(scenario)?;

        match listener.accept().await {
            Ok(channel) => Ok(Self {
                channel,
                child: Some(child),
            }),
            Err(e) => {
                tracing::error!("Engine connection failed: {}", e);
                if let Err(kill_err) = child.kill().await {
                    tracing::warn!("Failed to stop engine process: {}", kill_err);
                }
                Err(e.into())
            }
        }
    }

    /// Attach role: the engine was started out-of-band, only accept and handshake
    pub async fn attach(listen: SocketAddr, options: ChannelOptions) -> EngineResult<Self> {
        let listener = EngineListener::bind(listen, options).await?;
        Self::attach_with(listener).await
    }

    /// Attach through a listener that is already bound
    pub async fn attach_with(listener: EngineListener) -> EngineResult<Self> {
        let channel = listener.accept().await?;
        Ok(Self::new(channel))
    }
}

impl<S> Engine<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already handshaked channel
    pub fn new(channel: Channel<S>) -> Self {
        Self {
            channel,
            child: None,
        }
    }

    pub fn channel(&self) -> &Channel<S> {
        &self.channel
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel.id()
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Run a command; anything but Int32 0 back is an engine-side failure
    pub async fn command(&mut self, command: &str) -> EngineResult<()> {
        let reply = self.request(Opcode::Command, command).await?;
        if !reply.is_ack() {
            return Err(EngineError::UnexpectedResponse(reply));
        }
        Ok(())
    }

    /// Evaluate a side-effect-free expression and return the raw result
    pub async fn eval(&mut self, expression: &str) -> EngineResult<Value> {
        self.request(Opcode::Eval, expression).await
    }

    /// Evaluate an assignment. The acknowledgement is discarded.
    pub async fn assign(&mut self, expression: &str) -> EngineResult<()> {
        let reply = self.request(Opcode::Assign, expression).await?;
        if !reply.is_ack() {
            tracing::warn!("Assignment '{}' answered with {}", expression, reply);
        }
        Ok(())
    }

    /// Send an expression as EVAL or ASSIGN depending on [`RequestKind::classify`]
    /// and return whatever the engine answered
    pub async fn execute(&mut self, expression: &str) -> EngineResult<Value> {
        let kind = RequestKind::classify(expression);
        self.request(kind.opcode(), expression).await
    }

    /// Run a command that makes the engine write a FISH file, then read it back
    pub async fn fetch_file(
        &mut self,
        command: &str,
        path: &Path,
        layout: FileLayout,
    ) -> EngineResult<Vec<Value>> {
        self.command(command).await?;
        let mut reader = FishReader::open_with_layout(path, layout)?;
        Ok(reader.read_all()?)
    }

    /// Hand control back to the engine's own UI loop. The channel is closed
    /// locally; the engine process keeps running.
    pub async fn release(&mut self) -> EngineResult<()> {
        tracing::info!("Releasing engine on channel {}", self.channel.id());
        self.channel
            .send_final(&[Value::Int(Opcode::Release.code())])
            .await?;
        Ok(())
    }

    /// Ask the engine process to exit. The channel is closed whatever happens
    /// to the socket afterwards; a launched process is waited for.
    pub async fn terminate(&mut self) -> EngineResult<()> {
        tracing::info!("Terminating engine on channel {}", self.channel.id());
        self.channel
            .send_final(&[Value::Int(Opcode::Terminate.code())])
            .await?;
        self.wait().await?;
        Ok(())
    }

    /// Wait for a launched engine process to exit; None in the attach role
    pub async fn wait(&mut self) -> EngineResult<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => {
                let status = child.wait().await?;
                tracing::info!("Engine exited with {}", status);
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Kill a launched engine process and wait for it to exit
    pub async fn kill(&mut self) -> EngineResult<()> {
        if let Some(child) = self.child.as_mut() {
            child.kill().await?;
            tracing::info!("Engine process killed");
        }
        Ok(())
    }

    /// Tear the session down after a failure: close the channel, then kill and
    /// reap a launched engine. An attached engine is left running.
    pub async fn abort(&mut self) -> EngineResult<()> {
        if let Err(e) = self.channel.close().await {
            tracing::warn!("Closing channel {} failed: {}", self.channel.id(), e);
        }
        self.kill().await
    }

    /// Whether this session spawned the engine process
    pub fn is_launched(&self) -> bool {
        self.child.is_some()
    }

    pub(crate) async fn request(&mut self, opcode: Opcode, payload: &str) -> EngineResult<Value> {
        tracing::debug!("-> {:?} {}", opcode, payload);
        self.channel
            .send_all(&[Value::Int(opcode.code()), Value::from(payload)])
            .await?;
        let reply = self.channel.recv().await?;
        tracing::debug!("<- {}", reply);
        Ok(reply)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{frames, Script};
    use super::*;
    use crate::fish::FishWriter;
    use crate::protocol::FISH_MAGIC;
    use std::time::Duration;
    use tempfile::{tempdir, NamedTempFile};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_classify() {
        assert_eq!(RequestKind::classify("1+1"), RequestKind::Eval);
        assert_eq!(RequestKind::classify("a=123.456"), RequestKind::Assign);
        assert_eq!(RequestKind::classify("cos(0)"), RequestKind::Eval);
        // comparison operators are misread as assignments
        assert_eq!(RequestKind::classify("a == b"), RequestKind::Assign);
    }

    #[tokio::test]
    async fn test_eval() {
        let mut engine = Script::new()
            .expect(Opcode::Eval, "1+1", Value::Int(2))
            .expect(Opcode::Eval, "cos(0)", Value::Float(1.0))
            .engine()
            .await;

        assert_eq!(engine.eval("1+1").await.unwrap(), Value::Int(2));
        assert_eq!(engine.eval("cos(0)").await.unwrap(), Value::Float(1.0));
    }

    #[tokio::test]
    async fn test_execute_dispatch() {
        let mut engine = Script::new()
            .expect(Opcode::Assign, "a=123.456", Value::Int(0))
            .expect(Opcode::Eval, "a", Value::Float(123.456))
            .engine()
            .await;

        assert_eq!(engine.execute("a=123.456").await.unwrap(), Value::Int(0));
        assert_eq!(engine.execute("a").await.unwrap(), Value::Float(123.456));
    }

    #[tokio::test]
    async fn test_command_failure_keeps_channel_open() {
        let mut engine = Script::new()
            .expect(Opcode::Command, "ball id 1 rad 1", Value::Int(0))
            .expect(Opcode::Command, "bogus", Value::Int(1))
            .expect(Opcode::Eval, "1+1", Value::Int(2))
            .engine()
            .await;

        engine.command("ball id 1 rad 1").await.unwrap();

        let err = engine.command("bogus").await.unwrap_err();
        assert!(matches!(err, EngineError::UnexpectedResponse(Value::Int(1))));
        assert!(!err.is_fatal());
        assert!(engine.is_open());

        assert_eq!(engine.eval("1+1").await.unwrap(), Value::Int(2));
    }

    #[tokio::test]
    async fn test_assign_ignores_reply_content() {
        let mut engine = Script::new()
            .expect(Opcode::Assign, "x=1", Value::Int(5))
            .engine()
            .await;
        engine.assign("x=1").await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_closes_channel() {
        let mut engine = Script::new()
            .expect_final(Opcode::Terminate)
            .engine()
            .await;

        engine.terminate().await.unwrap();
        assert!(!engine.is_open());

        let err = engine.eval("1+1").await.unwrap_err();
        assert!(matches!(err, EngineError::Channel(ChannelError::Closed)));
        assert!(err.is_fatal());
        assert_eq!(engine.wait().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_release() {
        let mut engine = Script::new().expect_final(Opcode::Release).engine().await;
        engine.release().await.unwrap();
        assert!(!engine.is_open());
    }

    fn loopback_options() -> ChannelOptions {
        ChannelOptions::new()
            .with_accept_timeout(Duration::from_secs(10))
            .with_read_timeout(Duration::from_secs(10))
    }

    async fn loopback_listener() -> EngineListener {
        EngineListener::bind("127.0.0.1:0".parse().unwrap(), loopback_options())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_attach_over_loopback() {
        let listener = loopback_listener().await;
        let addr = listener.local_addr();

        let fake_engine = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(&FISH_MAGIC.to_le_bytes()).await.unwrap();

            let request = frames(&[Value::Int(Opcode::Eval.code()), Value::from("1+1")]);
            let mut buf = vec![0u8; request.len()];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, request);
            stream.write_all(&frames(&[Value::Int(2)])).await.unwrap();

            let release = frames(&[Value::Int(Opcode::Release.code())]);
            let mut buf = vec![0u8; release.len()];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, release);
        });

        let mut engine = Engine::attach_with(listener).await.unwrap();
        assert!(!engine.is_launched());
        assert_eq!(engine.eval("1+1").await.unwrap(), Value::Int(2));
        engine.release().await.unwrap();
        assert_eq!(engine.wait().await.unwrap(), None);

        fake_engine.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_handshake_mismatch_stops_engine() {
        use std::io::Write;

        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("engine.pid");
        let mut scenario = NamedTempFile::new().unwrap();
        writeln!(scenario, "echo $$ > {}", pid_file.display()).unwrap();
        writeln!(scenario, "exec sleep 30").unwrap();

        // bound before the engine exists, so its connect can never be refused
        let listener = loopback_listener().await;
        let addr = listener.local_addr();

        let watched = pid_file.clone();
        let impostor = tokio::spawn(async move {
            while !watched.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(&12345i32.to_le_bytes()).await.unwrap();
            stream
        });

        let launcher = Launcher::new("sh");
        let result = Engine::launch_with(&launcher, scenario.path(), listener).await;
        match result {
            Err(EngineError::Channel(ChannelError::HandshakeMismatch { expected, .. })) => {
                assert_eq!(expected, FISH_MAGIC);
            }
            Err(e) => panic!("Expected handshake mismatch, got {}", e),
            Ok(_) => panic!("Expected handshake mismatch"),
        }
        drop(impostor.await.unwrap());

        // the engine was killed and reaped, so its pid no longer exists
        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let alive = std::process::Command::new("kill")
            .args(["-0", pid.trim()])
            .status()
            .unwrap();
        assert!(!alive.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abort_kills_launched_engine() {
        use std::io::Write;

        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("engine.pid");
        let mut scenario = NamedTempFile::new().unwrap();
        writeln!(scenario, "echo $$ > {}", pid_file.display()).unwrap();
        writeln!(scenario, "exec sleep 30").unwrap();

        let listener = loopback_listener().await;
        let addr = listener.local_addr();

        let watched = pid_file.clone();
        let stand_in = tokio::spawn(async move {
            while !watched.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(&FISH_MAGIC.to_le_bytes()).await.unwrap();
            stream
        });

        let launcher = Launcher::new("sh");
        let mut engine = Engine::launch_with(&launcher, scenario.path(), listener)
            .await
            .unwrap();
        let _stream = stand_in.await.unwrap();
        assert!(engine.is_launched());

        engine.abort().await.unwrap();
        assert!(!engine.is_open());

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let alive = std::process::Command::new("kill")
            .args(["-0", pid.trim()])
            .status()
            .unwrap();
        assert!(!alive.success());
    }

    #[tokio::test]
    async fn test_abort_leaves_attached_engine_alone() {
        let mut engine = Script::new().engine().await;
        engine.abort().await.unwrap();
        assert!(!engine.is_open());
        assert_eq!(engine.wait().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_launch_rejects_unreadable_scenario_before_binding() {
        let launcher = Launcher::new("sh");
        let result = Engine::launch(
            &launcher,
            Path::new("/no/such/scenario.dat"),
            "127.0.0.1:0".parse().unwrap(),
            ChannelOptions::new(),
        )
        .await;
        assert!(matches!(
            result,
            Err(EngineError::Launch(LaunchError::ScenarioUnreadable { .. }))
        ));
    }

    #[tokio::test]
    async fn test_fetch_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bin.fish");
        FishWriter::write_file(&path, [1.5, 2.5], FileLayout::Standard).unwrap();

        let mut engine = Script::new()
            .expect(Opcode::Command, "write_ball_radii", Value::Int(0))
            .engine()
            .await;

        let values = engine
            .fetch_file("write_ball_radii", &path, FileLayout::Standard)
            .await
            .unwrap();
        assert_eq!(values, vec![Value::Float(1.5), Value::Float(2.5)]);
    }
}
