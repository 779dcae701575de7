//! Streaming transform stages
//!
//! A [`Stage`] turns one byte stream into another. Starting it yields a
//! [`RunningStage`] holding the output stream, a diagnostic stream and a
//! completion handle. Stages are either external programs
//! ([`CommandStage`]) or in-process codecs ([`CodecStage`]); a
//! [`StageChain`] wires several of them together.
//!
//! Whoever starts a stage owns it: the output must be read to the end or
//! dropped, the diagnostics drained, and `wait` called before the stage's
//! resources are released.

pub mod chain;
pub mod codec;
pub mod command;
pub mod pipe;

use std::io::{BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{KeeperError, KeeperResult};

pub use chain::{ChainReport, RunningChain, StageChain};
pub use codec::CodecStage;
pub use command::CommandStage;

/// Owned byte stream passed between stages
pub type ByteStream = Box<dyn Read + Send>;

/// A transform that can be started on an input stream
pub trait Stage: Send {
    fn name(&self) -> &str;

    /// Start consuming `input`; the input is dropped if startup fails
    fn start(self: Box<Self>, input: ByteStream) -> KeeperResult<Box<dyn RunningStage>>;
}

/// A started stage
pub trait RunningStage: Send {
    fn name(&self) -> &str;

    /// Transformed bytes; `None` once taken
    fn take_output(&mut self) -> Option<ByteStream>;

    /// Human-readable diagnostics (stderr for processes); `None` once taken
    fn take_diagnostics(&mut self) -> Option<ByteStream>;

    /// Block until the stage has finished and report how it went
    ///
    /// Any output not yet taken is dropped first.
    fn wait(self: Box<Self>) -> KeeperResult<()>;
}

/// Thread forwarding a stage's diagnostic stream to the log
pub struct DiagnosticDrain {
    stage: String,
    handle: JoinHandle<usize>,
}

impl DiagnosticDrain {
    pub fn spawn(stage: &str, stream: ByteStream) -> KeeperResult<Self> {
        let name = stage.to_string();
        let handle = thread::Builder::new()
            .name(format!("{}-diag", stage))
            .spawn(move || drain_lines(&name, stream))
            .map_err(|e| KeeperError::StageStart {
                stage: stage.to_string(),
                reason: format!("cannot spawn diagnostic drain: {}", e),
            })?;

        Ok(Self {
            stage: stage.to_string(),
            handle,
        })
    }

    /// Wait for the stream to close; returns the number of lines logged
    pub fn join(self) -> usize {
        match self.handle.join() {
            Ok(lines) => lines,
            Err(_) => {
                warn!(stage = %self.stage, "diagnostic drain panicked");
                0
            }
        }
    }
}

fn drain_lines(stage: &str, stream: ByteStream) -> usize {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let mut logged = 0;

    loop {
        line.clear();
        // Keep reading past bad bytes; a stalled drain would block the stage.
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                if !text.is_empty() {
                    warn!(stage, "{}", text);
                    logged += 1;
                }
            }
            Err(e) => {
                debug!(stage, error = %e, "diagnostic stream closed");
                break;
            }
        }
    }

    logged
}
