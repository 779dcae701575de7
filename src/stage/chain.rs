//! Composition of stages into one streaming transform
//!
//! [`StageChain::start`] starts every stage before any output is consumed,
//! feeding each stage's output into the next and handing each diagnostic
//! stream to its own [`DiagnosticDrain`]. The resulting [`RunningChain`] is a
//! reader over the last stage's output.
//!
//! When that output reaches EOF, the chain awaits every stage before
//! reporting EOF to its reader. A stage that died early therefore shows up
//! as a read error instead of a clean end of stream, and a sink never
//! commits truncated output.

use std::io::{self, Read};

use tracing::{debug, warn};

use super::{ByteStream, CodecStage, CommandStage, DiagnosticDrain, RunningStage, Stage};
use crate::config::settings::{CompressionMethod, EncryptionMethod};
use crate::config::Settings;
use crate::crypto::ArchiveKey;
use crate::error::{KeeperError, KeeperResult};
use crate::sink::PayloadKind;

/// Ordered list of stages plus the kind of payload they produce
pub struct StageChain {
    stages: Vec<Box<dyn Stage>>,
    kind: PayloadKind,
}

impl Default for StageChain {
    fn default() -> Self {
        Self::new()
    }
}

impl StageChain {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            kind: PayloadKind::Compressed,
        }
    }

    /// Append a stage
    pub fn then(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Declare what the chain's output is
    pub fn producing(mut self, kind: PayloadKind) -> Self {
        self.kind = kind;
        self
    }

    /// Compression, then encryption when `settings.encrypt` is set
    ///
    /// `key` is required for builtin encryption.
    pub fn from_settings(settings: &Settings, key: Option<&ArchiveKey>) -> KeeperResult<Self> {
        let compression = &settings.compression;
        let chain = match compression.method {
            CompressionMethod::Builtin => Self::new().then(CodecStage::zstd(compression.level)),
            CompressionMethod::Command => Self::new().then(CommandStage::zstd(
                &compression.command,
                compression.level,
            )),
        };

        if !settings.encrypt {
            return Ok(chain);
        }

        match settings.encryption.method {
            EncryptionMethod::Gpg => {
                let recipient = settings.recipient.as_deref().ok_or_else(|| {
                    KeeperError::Config("encrypt is enabled but no recipient is configured".into())
                })?;
                Ok(chain
                    .then(CommandStage::gpg(&settings.encryption.gpg_command, recipient))
                    .producing(PayloadKind::GpgEncrypted))
            }
            EncryptionMethod::Builtin => {
                let key = key.ok_or_else(|| {
                    KeeperError::Encryption("builtin encryption needs a derived key".into())
                })?;
                Ok(chain
                    .then(CodecStage::seal(key.clone()))
                    .producing(PayloadKind::Sealed))
            }
        }
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Start every stage on `input`
    ///
    /// If a stage fails to start, the stages already running are torn down
    /// (input closed, awaited, drains joined) before the error is returned.
    pub fn start(self, input: ByteStream) -> KeeperResult<RunningChain> {
        let mut running: Vec<Box<dyn RunningStage>> = Vec::with_capacity(self.stages.len());
        let mut drains = Vec::with_capacity(self.stages.len());
        let mut stream = input;

        for stage in self.stages {
            let name = stage.name().to_string();
            let started = stage.start(stream).and_then(|mut handle| {
                let output = handle.take_output();
                let drain = handle
                    .take_diagnostics()
                    .map(|diag| DiagnosticDrain::spawn(&name, diag))
                    .transpose();
                match (output, drain) {
                    (Some(output), Ok(drain)) => Ok((handle, output, drain)),
                    (None, Ok(drain)) => {
                        let _ = handle.wait();
                        if let Some(drain) = drain {
                            drain.join();
                        }
                        Err(KeeperError::StageStart {
                            stage: name.clone(),
                            reason: "stage produced no output stream".into(),
                        })
                    }
                    (output, Err(e)) => {
                        drop(output);
                        let _ = handle.wait();
                        Err(e)
                    }
                }
            });

            match started {
                Ok((handle, output, drain)) => {
                    debug!(stage = %name, "stage running");
                    running.push(handle);
                    drains.extend(drain);
                    stream = output;
                }
                Err(e) => {
                    teardown(running, drains);
                    return Err(e);
                }
            }
        }

        Ok(RunningChain {
            output: stream,
            stages: running,
            drains,
            outcome: None,
        })
    }
}

fn teardown(stages: Vec<Box<dyn RunningStage>>, drains: Vec<DiagnosticDrain>) {
    for stage in stages {
        let name = stage.name().to_string();
        if let Err(e) = stage.wait() {
            debug!(stage = %name, error = %e, "stage torn down");
        }
    }
    for drain in drains {
        drain.join();
    }
}

/// Await stages in start order, keeping the first failure
fn await_all(stages: Vec<Box<dyn RunningStage>>) -> KeeperResult<()> {
    let mut first_error = None;
    for stage in stages {
        if let Err(e) = stage.wait() {
            if first_error.is_none() {
                first_error = Some(e);
            } else {
                warn!(error = %e, "additional stage failure");
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// How a chain ended
#[derive(Debug)]
pub struct ChainReport {
    /// Output bytes left unread by the consumer and discarded
    pub trailing_bytes: u64,
    /// Diagnostic lines logged across all stages
    pub diagnostic_lines: usize,
    /// First stage failure, in start order
    pub result: KeeperResult<()>,
}

/// A started chain, readable as the final stage's output
pub struct RunningChain {
    output: ByteStream,
    stages: Vec<Box<dyn RunningStage>>,
    drains: Vec<DiagnosticDrain>,
    /// Set once the output hit EOF and the stages were awaited
    outcome: Option<KeeperResult<()>>,
}

impl RunningChain {
    /// Drain unread output, await every stage and join every drain
    pub fn finish(mut self) -> ChainReport {
        let trailing_bytes = match self.outcome {
            Some(_) => 0,
            None => io::copy(&mut self.output, &mut io::sink()).unwrap_or_else(|e| {
                warn!(error = %e, "failed to drain unread stage output");
                0
            }),
        };
        drop(self.output);

        let result = match self.outcome.take() {
            Some(result) => result,
            None => await_all(std::mem::take(&mut self.stages)),
        };

        let diagnostic_lines = self.drains.into_iter().map(DiagnosticDrain::join).sum();
        ChainReport {
            trailing_bytes,
            diagnostic_lines,
            result,
        }
    }
}

fn stage_error(err: &KeeperError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

impl Read for RunningChain {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(outcome) = &self.outcome {
            return match outcome {
                Ok(()) => Ok(0),
                Err(e) => Err(stage_error(e)),
            };
        }

        let n = self.output.read(buf)?;
        if n > 0 || buf.is_empty() {
            return Ok(n);
        }

        // End of stream: only a clean exit of every stage makes it real
        let outcome = await_all(std::mem::take(&mut self.stages));
        let reply = match &outcome {
            Ok(()) => Ok(0),
            Err(e) => Err(stage_error(e)),
        };
        self.outcome = Some(outcome);
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::crypto::{ArchiveKey, KeyParams};

    fn input(data: &[u8]) -> ByteStream {
        Box::new(io::Cursor::new(data.to_vec()))
    }

    #[test]
    fn test_compress_chain_round_trip() {
        let data = b"0123456789abcdef".repeat(4096);
        let mut chain = StageChain::new()
            .then(CodecStage::zstd(3))
            .start(input(&data))
            .unwrap();

        let mut compressed = Vec::new();
        chain.read_to_end(&mut compressed).unwrap();
        let report = chain.finish();

        report.result.unwrap();
        assert_eq!(report.trailing_bytes, 0);
        assert_eq!(zstd::stream::decode_all(&compressed[..]).unwrap(), data);
    }

    #[test]
    fn test_compress_then_seal_round_trip() {
        let key = ArchiveKey::derive("hunter2", &KeyParams::fast()).unwrap();
        let data = vec![42u8; 300_000];
        let mut chain = StageChain::new()
            .then(CodecStage::zstd(1))
            .then(CodecStage::seal(key.clone()))
            .producing(PayloadKind::Sealed)
            .start(input(&data))
            .unwrap();

        let mut sealed = Vec::new();
        chain.read_to_end(&mut sealed).unwrap();
        chain.finish().result.unwrap();

        let mut compressed = Vec::new();
        crypto::open(&mut &sealed[..], &mut compressed, &key).unwrap();
        assert_eq!(zstd::stream::decode_all(&compressed[..]).unwrap(), data);
    }

    #[test]
    fn test_failed_stage_turns_eof_into_error() {
        let data = vec![1u8; 1000];
        let mut chain = StageChain::new()
            .then(CodecStage::new("half", |input, output| {
                let mut buf = [0u8; 100];
                input.read_exact(&mut buf)?;
                output.write_all(&buf)?;
                Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
            }))
            .start(input(&data))
            .unwrap();

        let mut out = Vec::new();
        let err = chain.read_to_end(&mut out).unwrap_err();
        assert!(err.to_string().contains("disk on fire"));

        let report = chain.finish();
        assert!(report.result.is_err());
        assert!(report.diagnostic_lines >= 1);
    }

    #[test]
    fn test_unread_output_is_counted_as_trailing() {
        let chain = StageChain::new()
            .then(CodecStage::new("copy", |input, output| io::copy(input, output)))
            .start(input(b"never read by anyone"))
            .unwrap();

        let report = chain.finish();
        report.result.unwrap();
        assert_eq!(report.trailing_bytes, 20);
    }

    #[cfg(unix)]
    #[test]
    fn test_start_failure_tears_down_started_stages() {
        let result = StageChain::new()
            .then(CodecStage::zstd(3))
            .then(CommandStage::new("missing", "/nonexistent/walkeeper-tool", &[]))
            .start(input(&vec![0u8; 1 << 20]));

        let err = result.err().unwrap();
        assert!(matches!(err, KeeperError::StageStart { ref stage, .. } if stage == "missing"));
    }

    #[test]
    fn test_from_settings_picks_stages() {
        let mut settings = Settings::default();
        let chain = StageChain::from_settings(&settings, None).unwrap();
        assert_eq!(chain.stage_names(), vec!["zstd"]);
        assert_eq!(chain.kind(), PayloadKind::Compressed);

        settings.encrypt = true;
        settings.recipient = Some("backup@example.com".into());
        let chain = StageChain::from_settings(&settings, None).unwrap();
        assert_eq!(chain.stage_names(), vec!["zstd", "gpg"]);
        assert_eq!(chain.kind(), PayloadKind::GpgEncrypted);

        settings.encryption.method = EncryptionMethod::Builtin;
        assert!(StageChain::from_settings(&settings, None).is_err());
    }
}
