//! In-process codec stages
//!
//! The codec runs on its own thread, reading the input stream and writing
//! into a bounded [`pipe`](super::pipe). Failures are written to the
//! diagnostic stream and returned from `wait`.

use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::pipe::{self, PipeWriter, DEFAULT_CAPACITY};
use super::{ByteStream, RunningStage, Stage};
use crate::crypto::{self, ArchiveKey};
use crate::error::{KeeperError, KeeperResult};

type Transform = Box<dyn FnOnce(&mut dyn Read, &mut dyn Write) -> io::Result<u64> + Send>;

/// A stage backed by a function running on a worker thread
pub struct CodecStage {
    name: String,
    transform: Transform,
}

impl CodecStage {
    pub fn new<F>(name: &str, transform: F) -> Self
    where
        F: FnOnce(&mut dyn Read, &mut dyn Write) -> io::Result<u64> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            transform: Box::new(transform),
        }
    }

    /// zstd compression at `level`
    pub fn zstd(level: i32) -> Self {
        Self::new("zstd", move |input, output| {
            let mut encoder = zstd::stream::Encoder::new(output, level)?;
            let read = io::copy(input, &mut encoder)?;
            encoder.finish()?;
            Ok(read)
        })
    }

    /// AES-256-GCM sealing with `key`
    pub fn seal(key: ArchiveKey) -> Self {
        Self::new("seal", move |mut input, mut output| {
            crypto::seal(&mut input, &mut output, &key)
        })
    }
}

impl Stage for CodecStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(self: Box<Self>, mut input: ByteStream) -> KeeperResult<Box<dyn RunningStage>> {
        let CodecStage { name, transform } = *self;
        let (mut out_tx, out_rx) = pipe::pipe(DEFAULT_CAPACITY);
        let (diag_tx, diag_rx) = pipe::pipe(DEFAULT_CAPACITY);

        let worker = thread::Builder::new()
            .name(format!("stage-{}", name))
            .spawn(move || {
                let result = transform(&mut input, &mut out_tx);
                report_failure(diag_tx, &result);
                result
            })
            .map_err(|e| KeeperError::StageStart {
                stage: name.clone(),
                reason: e.to_string(),
            })?;

        debug!(stage = %name, "started in-process stage");
        Ok(Box::new(RunningCodec {
            name,
            worker,
            output: Some(Box::new(out_rx)),
            diagnostics: Some(Box::new(diag_rx)),
        }))
    }
}

fn report_failure(mut diagnostics: PipeWriter, result: &io::Result<u64>) {
    if let Err(e) = result {
        // Nobody may be draining; a closed pipe is fine
        let _ = writeln!(diagnostics, "error: {}", e);
    }
}

struct RunningCodec {
    name: String,
    worker: JoinHandle<io::Result<u64>>,
    output: Option<ByteStream>,
    diagnostics: Option<ByteStream>,
}

impl RunningStage for RunningCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn take_output(&mut self) -> Option<ByteStream> {
        self.output.take()
    }

    fn take_diagnostics(&mut self) -> Option<ByteStream> {
        self.diagnostics.take()
    }

    fn wait(self: Box<Self>) -> KeeperResult<()> {
        let RunningCodec {
            name,
            worker,
            output,
            diagnostics,
        } = *self;
        // Dropping the output unblocks a worker stuck on a full pipe
        drop(output);
        drop(diagnostics);

        match worker.join() {
            Ok(Ok(read)) => {
                debug!(stage = %name, bytes_in = read, "stage finished");
                Ok(())
            }
            Ok(Err(e)) => Err(KeeperError::StageFailed {
                stage: name,
                reason: e.to_string(),
            }),
            Err(_) => Err(KeeperError::StageFailed {
                stage: name,
                reason: "worker thread panicked".into(),
            }),
        }
    }
}
