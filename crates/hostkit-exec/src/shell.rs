//! Interactive shell bridged to the local terminal

use std::io::{IsTerminal, Read};

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use russh::{ChannelMsg, Pty};
use tokio::io::{AsyncWriteExt, stderr, stdout};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;
use crate::ssh::SshSession;

/// Terminal type requested for the remote pty
pub const TERM_TYPE: &str = "xterm-256color";

const FALLBACK_SIZE: (u16, u16) = (80, 24);
const STDIN_BUFFER: usize = 1024;

/// Pty modes sent with the pty request
#[must_use]
pub fn terminal_modes() -> Vec<(Pty, u32)> {
    vec![
        (Pty::ECHO, 1),
        (Pty::ECHOCTL, 0),
        (Pty::TTY_OP_ISPEED, 115_200),
        (Pty::TTY_OP_OSPEED, 115_200),
    ]
}

/// Raw mode for as long as the guard lives
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self, ExecError> {
        enable_raw_mode()
            .map_err(|e| ExecError::Terminal(format!("failed to enable raw mode: {e}")))?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!(error = %e, "failed to restore terminal mode");
        }
    }
}

/// Local terminal size changes
struct ResizeWatcher {
    #[cfg(unix)]
    signal: Option<tokio::signal::unix::Signal>,
}

impl ResizeWatcher {
    fn new() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let signal = signal(SignalKind::window_change())
                .inspect_err(|e| warn!(error = %e, "terminal resize will not be forwarded"))
                .ok();
            Self { signal }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    /// Wait for the next resize; pends forever when unsupported
    async fn changed(&mut self) -> (u16, u16) {
        #[cfg(unix)]
        {
            if let Some(signal) = self.signal.as_mut()
                && signal.recv().await.is_some()
            {
                return terminal_size();
            }
        }
        std::future::pending().await
    }
}

fn terminal_size() -> (u16, u16) {
    crossterm::terminal::size().unwrap_or(FALLBACK_SIZE)
}

/// Read stdin on a plain thread; the channel closes at EOF
///
/// The thread stays blocked in `read` after the shell exits and ends with
/// the process.
fn spawn_stdin_reader() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; STDIN_BUFFER];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
    });
    rx
}

/// Run an interactive login shell on `session`
///
/// Requests a pty sized to the local terminal, puts the terminal in raw
/// mode and relays bytes both ways until the remote side closes the
/// channel. Terminal state is restored on every exit path.
///
/// Returns the shell's exit status, if the server sent one.
///
/// # Errors
/// Returns `ExecError::Terminal` if stdin is not a terminal or raw mode
/// cannot be entered, and `ExecError::Channel` if the pty, shell or data
/// requests fail
#[instrument(skip(session), fields(host = %session.host()))]
pub async fn interactive_shell(session: &SshSession) -> Result<Option<u32>, ExecError> {
    if !std::io::stdin().is_terminal() {
        return Err(ExecError::Terminal("stdin is not a terminal".to_string()));
    }

    let (width, height) = terminal_size();

    let mut channel = session
        .handle()
        .channel_open_session()
        .await
        .map_err(|e| ExecError::Channel(e.to_string()))?;

    channel
        .request_pty(
            false,
            TERM_TYPE,
            u32::from(width),
            u32::from(height),
            0,
            0,
            &terminal_modes(),
        )
        .await
        .map_err(|e| ExecError::Channel(format!("pty request failed: {e}")))?;

    channel
        .request_shell(false)
        .await
        .map_err(|e| ExecError::Channel(format!("shell request failed: {e}")))?;

    info!(width, height, "interactive shell started");

    let _raw = RawModeGuard::enable()?;
    let mut input = spawn_stdin_reader();
    let mut resize = ResizeWatcher::new();
    let mut out = stdout();
    let mut err = stderr();
    let mut stdin_open = true;
    let mut exit_status = None;

    loop {
        tokio::select! {
            chunk = input.recv(), if stdin_open => match chunk {
                Some(bytes) => channel
                    .data(&bytes[..])
                    .await
                    .map_err(|e| ExecError::Channel(e.to_string()))?,
                None => {
                    debug!("local stdin closed");
                    stdin_open = false;
                    channel
                        .eof()
                        .await
                        .map_err(|e| ExecError::Channel(e.to_string()))?;
                }
            },
            (width, height) = resize.changed() => {
                if let Err(e) = channel
                    .window_change(u32::from(width), u32::from(height), 0, 0)
                    .await
                {
                    warn!(error = %e, "failed to forward terminal resize");
                }
            }
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    out.write_all(&data).await?;
                    out.flush().await?;
                }
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    err.write_all(&data).await?;
                    err.flush().await?;
                }
                Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                    exit_status = Some(status);
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
        }
    }

    info!(exit_status = ?exit_status, "interactive shell ended");
    Ok(exit_status)
}
