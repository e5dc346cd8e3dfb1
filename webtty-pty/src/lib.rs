//! A concrete `Backend` for `webtty-core`: a local shell under a PTY.
//!
//! Built on `portable-pty` rather than raw fork/exec/openpty, since the
//! server spawns many concurrent backends rather than wrapping its own
//! controlling terminal.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use webtty_core::backend::{Backend, BackendArgs, BackendFactory};

const READ_CHUNK: usize = 8192;

/// Spawns a shell (or an explicit command) under a fresh PTY for each
/// session.
pub struct PtyBackendFactory {
    shell: String,
    initial_cols: u16,
    initial_rows: u16,
}

impl PtyBackendFactory {
    pub fn new(shell: impl Into<String>, initial_cols: u16, initial_rows: u16) -> Self {
        Self {
            shell: shell.into(),
            initial_cols,
            initial_rows,
        }
    }

    /// Resolve the shell the way `pty-proxy` does: `$SHELL`, falling back
    /// to a sane default.
    pub fn from_env(initial_cols: u16, initial_rows: u16) -> Self {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
        Self::new(shell, initial_cols, initial_rows)
    }
}

#[async_trait]
impl BackendFactory for PtyBackendFactory {
    async fn spawn(
        &self,
        _args: &BackendArgs,
        _headers: &HashMap<String, String>,
    ) -> Result<Box<dyn Backend>, String> {
        let shell = self.shell.clone();
        let cols = self.initial_cols;
        let rows = self.initial_rows;
        tokio::task::spawn_blocking(move || PtyBackend::spawn(&shell, cols, rows))
            .await
            .map_err(|e| format!("pty spawn task panicked: {e}"))?
    }
}

/// The reader-thread channel plus any bytes from the last chunk that didn't
/// fit in the caller's buffer, carried over to the next `read()` call.
struct PtyOutput {
    rx: mpsc::Receiver<Option<Vec<u8>>>,
    pending: Vec<u8>,
}

pub struct PtyBackend {
    master: StdMutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: StdMutex<Box<dyn Child + Send + Sync>>,
    // Fed by a dedicated blocking reader thread; `None` marks EOF.
    output: Mutex<PtyOutput>,
    shell: String,
}

impl PtyBackend {
    fn spawn(shell: &str, cols: u16, rows: u16) -> Result<Box<dyn Backend>, String> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| format!("openpty failed: {e}"))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| format!("spawn {shell} failed: {e}"))?;
        // The slave fd must be dropped in this process once the child has
        // inherited it, or reads on the master never see EOF.
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| format!("clone pty reader failed: {e}"))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| format!("take pty writer failed: {e}"))?;

        let (tx, rx) = mpsc::channel(64);
        std::thread::spawn(move || loop {
            let mut buf = [0u8; READ_CHUNK];
            match reader.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.blocking_send(None);
                    break;
                }
                Ok(n) => {
                    if tx.blocking_send(Some(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "pty reader thread exiting");
                    let _ = tx.blocking_send(None);
                    break;
                }
            }
        });

        Ok(Box::new(PtyBackend {
            master: StdMutex::new(pair.master),
            writer: Mutex::new(writer),
            child: StdMutex::new(child),
            output: Mutex::new(PtyOutput {
                rx,
                pending: Vec::new(),
            }),
            shell: shell.to_string(),
        }))
    }
}

#[async_trait]
impl Backend for PtyBackend {
    async fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut output = self.output.lock().await;
        if output.pending.is_empty() {
            match output.rx.recv().await {
                None | Some(None) => return Ok(0),
                Some(Some(chunk)) => output.pending = chunk,
            }
        }
        Ok(drain_into(&mut output.pending, buf))
    }

    async fn write(&self, data: &[u8]) -> std::io::Result<()> {
        // The write itself is a blocking syscall, but pty writes don't
        // block for long; serializing through the async mutex is enough.
        let mut writer = self.writer.lock().await;
        writer.write_all(data).and_then(|_| writer.flush())
    }

    async fn close(&self) -> std::io::Result<()> {
        let mut child = self.child.lock().unwrap();
        match child.kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()), // already exited
            Err(e) => Err(e),
        }
    }

    async fn resize_terminal(&self, cols: u16, rows: u16) -> std::io::Result<()> {
        let master = self.master.lock().unwrap();
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }

    fn window_title_variables(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("Command".to_string(), self.shell.clone());
        vars
    }
}

/// Copy as much of `pending` as fits into `buf`, leaving the remainder (if
/// any) in `pending` for the next call. Never drops bytes: a chunk larger
/// than the caller's buffer is simply consumed across more than one read.
fn drain_into(pending: &mut Vec<u8>, buf: &mut [u8]) -> usize {
    let n = pending.len().min(buf.len());
    buf[..n].copy_from_slice(&pending[..n]);
    pending.drain(..n);
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_resolves_shell_from_env_var() {
        std::env::set_var("SHELL", "/bin/zsh");
        let factory = PtyBackendFactory::from_env(80, 24);
        assert_eq!(factory.shell, "/bin/zsh");
    }

    #[test]
    fn drain_into_smaller_buffer_carries_over_the_remainder() {
        let mut pending = b"0123456789".to_vec();
        let mut buf = [0u8; 4];

        let n = drain_into(&mut pending, &mut buf);
        assert_eq!(n, 4);
        assert_eq!(&buf[..n], b"0123");
        assert_eq!(pending, b"456789");

        let n = drain_into(&mut pending, &mut buf);
        assert_eq!(n, 4);
        assert_eq!(&buf[..n], b"4567");
        assert_eq!(pending, b"89");

        let n = drain_into(&mut pending, &mut buf);
        assert_eq!(n, 2);
        assert_eq!(&buf[..n], b"89");
        assert!(pending.is_empty());
    }

    #[test]
    fn drain_into_buffer_larger_than_pending_consumes_everything() {
        let mut pending = b"hi".to_vec();
        let mut buf = [0u8; 16];
        let n = drain_into(&mut pending, &mut buf);
        assert_eq!(n, 2);
        assert_eq!(&buf[..n], b"hi");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn echoes_input_back_through_the_pty() {
        let factory = PtyBackendFactory::new("/bin/sh", 80, 24);
        let backend = factory
            .spawn(&BackendArgs::new(), &HashMap::new())
            .await
            .expect("spawn /bin/sh");

        backend.write(b"echo hi\n").await.unwrap();

        let mut buf = [0u8; 4096];
        let mut collected = Vec::new();
        for _ in 0..20 {
            let n = tokio::time::timeout(std::time::Duration::from_secs(2), backend.read(&mut buf))
                .await
                .expect("pty read timed out")
                .unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
            if collected.windows(2).any(|w| w == b"hi") {
                break;
            }
        }
        assert!(String::from_utf8_lossy(&collected).contains("hi"));
        backend.close().await.unwrap();
    }
}
