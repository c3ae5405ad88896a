//! Running the external OCR binaries.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Maximum stderr kept for error messages.
const MAX_STDERR: usize = 2 * 1024;

/// Why an external command did not produce output.
#[derive(Debug)]
pub(crate) enum CommandFailure {
    /// The binary could not be started.
    Spawn(io::Error),
    /// It ran and exited unsuccessfully.
    Exit { status: ExitStatus, stderr: String },
    /// Piping data in or out failed.
    Io(io::Error),
}

impl CommandFailure {
    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, Self::Spawn(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "failed to start: {e}"),
            Self::Exit { status, stderr } if stderr.is_empty() => write!(f, "exited with {status}"),
            Self::Exit { status, stderr } => write!(f, "exited with {status}: {stderr}"),
            Self::Io(e) => write!(f, "pipe error: {e}"),
        }
    }
}

/// Run `bin args...`, optionally feeding `stdin`, and return its stdout.
pub(crate) async fn run_binary<I, A>(
    bin: &Path,
    args: I,
    stdin: Option<&[u8]>,
) -> Result<Vec<u8>, CommandFailure>
where
    I: IntoIterator<Item = A>,
    A: AsRef<OsStr>,
{
    let mut command = Command::new(bin);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(CommandFailure::Spawn)?;

    let pipe = child.stdin.take();
    let feed = async move {
        if let (Some(data), Some(mut pipe)) = (stdin, pipe) {
            pipe.write_all(data).await?;
            pipe.shutdown().await?;
        }
        Ok::<(), io::Error>(())
    };
    let (fed, output) = tokio::join!(feed, child.wait_with_output());

    let output = output.map_err(CommandFailure::Io)?;
    if !output.status.success() {
        let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.len() > MAX_STDERR {
            let mut cut = MAX_STDERR;
            while !stderr.is_char_boundary(cut) {
                cut -= 1;
            }
            stderr.truncate(cut);
        }
        return Err(CommandFailure::Exit {
            status: output.status,
            stderr,
        });
    }
    fed.map_err(CommandFailure::Io)?;
    Ok(output.stdout)
}
