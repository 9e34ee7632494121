//! In-memory connector processes for exercising workers without Docker.
//!
//! [`ScriptedLauncher`] plays one [`ScriptedConnector`] per role. Sources
//! print their script; destinations record what they receive on stdin, echo
//! state messages back as acks and print their script once input closes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use syncbyte_types::job::ConnectorRole;
use syncbyte_types::protocol::{parse_line, ParsedLine, ProtocolMessage};

use crate::process::{ConnectorProcess, LaunchRequest, ProcessControl, ProcessLauncher};

/// Exit code reported for killed processes.
pub const KILLED_EXIT_CODE: i32 = 137;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Behaviour of one fake connector process.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    /// Lines written to stdout.
    pub output: Vec<String>,
    pub exit_code: i32,
    /// Keep stdout open after the output until killed.
    pub hang: bool,
    /// Echo every STATE message read from stdin.
    pub ack_states: bool,
}

impl ScriptedConnector {
    pub fn emitting(messages: impl IntoIterator<Item = ProtocolMessage>) -> Self {
        Self {
            output: messages
                .into_iter()
                .map(|m| m.to_line().unwrap_or_default())
                .collect(),
            ..Self::default()
        }
    }

    /// A destination that acks every state it receives.
    #[must_use]
    pub fn acking_destination() -> Self {
        Self {
            ack_states: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.output.push(line.into());
        self
    }

    #[must_use]
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    #[must_use]
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

#[derive(Default)]
pub struct ScriptedLauncher {
    scripts: Mutex<HashMap<ConnectorRole, ScriptedConnector>>,
    launches: Mutex<Vec<LaunchRequest>>,
    received: Arc<Mutex<Vec<ProtocolMessage>>>,
    input_closed: Arc<AtomicBool>,
}

impl ScriptedLauncher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_script(self, role: ConnectorRole, script: ScriptedConnector) -> Self {
        lock(&self.scripts).insert(role, script);
        self
    }

    /// Every launch request, in order.
    pub fn launches(&self) -> Vec<LaunchRequest> {
        lock(&self.launches).clone()
    }

    pub fn launched_roles(&self) -> Vec<ConnectorRole> {
        lock(&self.launches).iter().map(|r| r.role).collect()
    }

    /// Protocol messages the destination read from stdin.
    pub fn received(&self) -> Vec<ProtocolMessage> {
        lock(&self.received).clone()
    }

    /// Whether the destination saw end of input.
    pub fn destination_input_closed(&self) -> bool {
        self.input_closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<ConnectorProcess> {
        let script = lock(&self.scripts)
            .get(&request.role)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no script for {} image '{}'", request.role, request.image))?;
        let role = request.role;
        lock(&self.launches).push(request);

        let (stdin, stdin_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout_writer, stdout) = tokio::io::duplex(PIPE_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let killed = CancellationToken::new();

        let process = FakeProcess {
            script,
            stdin: (role == ConnectorRole::Destination).then_some(stdin_reader),
            stdout: stdout_writer,
            received: Arc::clone(&self.received),
            input_closed: Arc::clone(&self.input_closed),
        };
        let token = killed.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                exit_code = process.run(&token) => {
                    let _ = exit_tx.send(exit_code);
                }
            }
        });

        Ok(ConnectorProcess {
            stdin: Some(Box::new(stdin)),
            stdout: Box::new(stdout),
            control: Box::new(FakeControl {
                exit: Some(exit_rx),
                exit_code: None,
                killed,
            }),
        })
    }
}

struct FakeProcess {
    script: ScriptedConnector,
    stdin: Option<DuplexStream>,
    stdout: DuplexStream,
    received: Arc<Mutex<Vec<ProtocolMessage>>>,
    input_closed: Arc<AtomicBool>,
}

impl FakeProcess {
    async fn run(mut self, killed: &CancellationToken) -> i32 {
        if let Some(stdin) = self.stdin.take() {
            let mut lines = BufReader::new(stdin).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(ParsedLine::Message(message)) = parse_line(&line) else {
                    continue;
                };
                let is_state = matches!(message, ProtocolMessage::State(_));
                lock(&self.received).push(message);
                if is_state && self.script.ack_states && self.write_line(&line).await.is_err() {
                    return KILLED_EXIT_CODE;
                }
            }
            self.input_closed.store(true, Ordering::SeqCst);
        }

        for line in std::mem::take(&mut self.script.output) {
            if self.write_line(&line).await.is_err() {
                return KILLED_EXIT_CODE;
            }
        }
        if self.script.hang {
            killed.cancelled().await;
        }
        drop(self.stdout);
        self.script.exit_code
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.stdout.write_all(line.as_bytes()).await?;
        self.stdout.write_all(b"\n").await
    }
}

struct FakeControl {
    exit: Option<oneshot::Receiver<i32>>,
    exit_code: Option<i32>,
    killed: CancellationToken,
}

#[async_trait]
impl ProcessControl for FakeControl {
    async fn wait(&mut self) -> Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        let code = match self.exit.take() {
            Some(rx) => rx.await.unwrap_or(KILLED_EXIT_CODE),
            None => KILLED_EXIT_CODE,
        };
        self.exit_code = Some(code);
        Ok(code)
    }

    async fn kill(&mut self) -> Result<()> {
        self.killed.cancel();
        Ok(())
    }
}

impl Drop for FakeControl {
    fn drop(&mut self) {
        self.killed.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
