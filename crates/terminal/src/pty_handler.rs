//! A single PTY process.

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::thread;
use tokio::sync::{broadcast, mpsc};

use settings::constants::pty::{OUTPUT_CHANNEL_CAPACITY, READ_BUFFER_SIZE};
use settings::Config;

use crate::types::{SpawnError, SpawnRequest, TermSize};

/// How to launch the shell inside a new PTY.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellOptions {
    pub program: String,
    pub login: bool,
    pub term: String,
}

impl ShellOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.resolve_shell(),
            login: config.login_shell,
            term: config.term.clone(),
        }
    }
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Owns one spawned shell and its PTY pair.
///
/// Output is read on a dedicated thread and fanned out over a broadcast
/// channel, so any number of consumers can tap the byte stream. Input is
/// queued to a writer thread, so a shell that stops reading never blocks the
/// caller. Dropping the handler kills and reaps the child process.
pub struct PtyHandler {
    master: Box<dyn MasterPty + Send>,
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    output_tx: broadcast::Sender<Vec<u8>>,
    child: Box<dyn Child + Send + Sync>,
    _reader_thread: thread::JoinHandle<()>,
    _writer_thread: thread::JoinHandle<()>,
}

impl PtyHandler {
    /// Spawn `shell` in a new PTY at the requested directory and geometry.
    pub fn spawn(request: &SpawnRequest, shell: &ShellOptions) -> Result<Self, SpawnError> {
        if !request.working_directory.is_dir() {
            return Err(SpawnError::MissingDirectory(
                request.working_directory.clone(),
            ));
        }

        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: request.size.rows,
                cols: request.size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SpawnError::OpenPty(format!("{e:#}")))?;

        let mut cmd = CommandBuilder::new(&shell.program);
        if shell.login {
            cmd.arg("-l");
        }
        cmd.env("TERM", &shell.term);
        cmd.cwd(&request.working_directory);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SpawnError::Command {
                shell: shell.program.clone(),
                reason: format!("{e:#}"),
            })?;

        // The child holds its own copy of the slave side.
        drop(pair.slave);

        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| SpawnError::Io(format!("take writer: {e:#}")))?;

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SpawnError::Io(format!("clone reader: {e:#}")))?;

        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let reader_tx = output_tx.clone();

        let reader_thread = thread::Builder::new()
            .name("pty-reader".to_owned())
            .spawn(move || {
                let mut buf = [0u8; READ_BUFFER_SIZE];
                loop {
                    match reader.read(&mut buf) {
                        // EOF - process exited
                        Ok(0) => break,
                        Ok(n) => {
                            // No subscribers is fine; keep draining so the
                            // child never blocks on a full PTY buffer.
                            let _ = reader_tx.send(buf[..n].to_vec());
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
            })
            .map_err(|e| SpawnError::Io(format!("reader thread: {e}")))?;

        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let writer_thread = thread::Builder::new()
            .name("pty-writer".to_owned())
            .spawn(move || {
                'input: while let Some(chunk) = input_rx.blocking_recv() {
                    // Write everything queued so far, then flush once.
                    let mut pending = Some(chunk);
                    while let Some(chunk) = pending.take().or_else(|| input_rx.try_recv().ok()) {
                        if let Err(e) = writer.write_all(&chunk) {
                            tracing::debug!("PTY input closed: {}", e);
                            break 'input;
                        }
                    }
                    if let Err(e) = writer.flush() {
                        tracing::debug!("Failed to flush PTY: {}", e);
                        break;
                    }
                }
            })
            .map_err(|e| SpawnError::Io(format!("writer thread: {e}")))?;

        Ok(Self {
            master: pair.master,
            input_tx,
            output_tx,
            child,
            _reader_thread: reader_thread,
            _writer_thread: writer_thread,
        })
    }

    /// Subscribe to output chunks produced from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.output_tx.subscribe()
    }

    /// Queue input bytes for the PTY. Fails once the writer thread is gone.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.input_tx
            .send(data.to_vec())
            .map_err(|_| anyhow::anyhow!("PTY input closed"))
    }

    /// Resize the PTY
    pub fn resize(&self, size: TermSize) -> Result<()> {
        self.master
            .resize(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to resize PTY")?;
        Ok(())
    }

    /// OS process id of the shell, if still known.
    pub fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }
}

impl Drop for PtyHandler {
    fn drop(&mut self) {
        // Kill the child process if still running
        if let Err(e) = self.child.kill() {
            // ESRCH (no such process) is expected if already exited
            tracing::debug!("Kill child process: {}", e);
        }

        // Wait for child to reap it (avoid zombie)
        if let Err(e) = self.child.wait() {
            tracing::debug!("Wait for child process: {}", e);
        }

        tracing::debug!("PTY handler dropped, child process cleaned up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_shell_options_follow_config() {
        let config = Config {
            shell: Some("/bin/sh".to_string()),
            login_shell: false,
            term: "vt100".to_string(),
            ..Config::default()
        };
        let options = ShellOptions::from_config(&config);
        assert_eq!(
            options,
            ShellOptions {
                program: "/bin/sh".to_string(),
                login: false,
                term: "vt100".to_string(),
            }
        );
    }

    #[test]
    fn test_spawn_rejects_missing_directory() {
        let request = SpawnRequest::new(PathBuf::from("/definitely/not/a/real/dir"));
        let result = PtyHandler::spawn(&request, &ShellOptions::default());
        assert!(matches!(result, Err(SpawnError::MissingDirectory(_))));
    }

    #[test]
    fn test_spawn_rejects_file_as_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let request = SpawnRequest::new(file.path());
        let result = PtyHandler::spawn(&request, &ShellOptions::default());
        assert!(matches!(result, Err(SpawnError::MissingDirectory(_))));
    }
}
