//! External program stages
//!
//! The program reads the stage input on stdin and writes its result to
//! stdout; stderr becomes the diagnostic stream. A feeder thread copies the
//! input into stdin so the caller is free to read stdout concurrently.

use std::io::{self, ErrorKind};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::{ByteStream, RunningStage, Stage};
use crate::error::{KeeperError, KeeperResult};

/// A stage that pipes data through an external program
#[derive(Debug, Clone)]
pub struct CommandStage {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandStage {
    pub fn new(name: &str, program: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// `zstd` reading stdin, writing the compressed frame to stdout
    pub fn zstd(program: &str, level: i32) -> Self {
        let level = format!("-{}", level);
        Self::new("zstd", program, &["-c", "-q", &level])
    }

    /// `gpg` encrypting stdin for `recipient`
    pub fn gpg(program: &str, recipient: &str) -> Self {
        Self::new(
            "gpg",
            program,
            &[
                "--batch",
                "--yes",
                "--encrypt",
                "--recipient",
                recipient,
                "-o",
                "-",
            ],
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Stage for CommandStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(self: Box<Self>, mut input: ByteStream) -> KeeperResult<Box<dyn RunningStage>> {
        let start_error = |reason: String| KeeperError::StageStart {
            stage: self.name.clone(),
            reason,
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| start_error(format!("cannot run '{}': {}", self.program, e)))?;

        let stdio = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (stdin, stdout, stderr) = match stdio {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                reap(&mut child);
                return Err(start_error("child stdio was not captured".into()));
            }
        };

        let feeder = thread::Builder::new()
            .name(format!("{}-feed", self.name))
            .spawn(move || {
                let mut stdin = stdin;
                // stdin closes when this returns, signalling EOF to the child
                io::copy(&mut input, &mut stdin)
            });
        let feeder = match feeder {
            Ok(handle) => handle,
            Err(e) => {
                reap(&mut child);
                return Err(start_error(format!("cannot spawn feeder: {}", e)));
            }
        };

        debug!(
            stage = %self.name,
            program = %self.program,
            pid = child.id(),
            "started external stage"
        );
        Ok(Box::new(RunningCommand {
            name: self.name.clone(),
            child,
            feeder,
            output: Some(Box::new(stdout)),
            diagnostics: Some(Box::new(stderr)),
        }))
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

struct RunningCommand {
    name: String,
    child: Child,
    feeder: JoinHandle<io::Result<u64>>,
    output: Option<ByteStream>,
    diagnostics: Option<ByteStream>,
}

impl RunningStage for RunningCommand {
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
        let RunningCommand {
            name,
            mut child,
            feeder,
            output,
            diagnostics,
        } = *self;
        drop(output);
        drop(diagnostics);

        let status = child.wait().map_err(|e| KeeperError::StageFailed {
            stage: name.clone(),
            reason: format!("cannot wait for process: {}", e),
        })?;
        let fed = feeder.join();

        if !status.success() {
            return Err(KeeperError::StageFailed {
                stage: name,
                reason: format!("process {}", status),
            });
        }

        match fed {
            Ok(Ok(bytes)) => {
                debug!(stage = %name, bytes_in = bytes, "stage finished");
                Ok(())
            }
            // The program exited cleanly without reading everything
            Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => Err(KeeperError::StageFailed {
                stage: name,
                reason: "process exited before consuming its input".into(),
            }),
            Ok(Err(e)) => Err(KeeperError::StageFailed {
                stage: name,
                reason: format!("failed to feed input: {}", e),
            }),
            Err(_) => Err(KeeperError::StageFailed {
                stage: name,
                reason: "feeder thread panicked".into(),
            }),
        }
    }
}
