use std::process::Command;

use crate::{mlog_debug, mlog_trace, mlog_warn, Error, Result};

/// Access to the terminal multiplexer.
///
/// Read methods have no side effects and re-query the live server on every
/// call; the server's state changes externally at any time, so nothing here
/// is cached. All methods are synchronous and may block briefly on the tmux
/// binary; async callers wrap them in [`crate::util::blocking`] or
/// [`crate::util::blocking_with_timeout`] rather than calling from a tight
/// loop.
pub trait Multiplexer: Send + Sync {
    /// Names of all live sessions.
    fn sessions(&self) -> Result<Vec<String>>;

    /// `(index, name)` pairs for the windows of a session.
    fn windows(&self, session: &str) -> Result<Vec<(u32, String)>>;

    /// Most recent `lines` lines of a window's pane output.
    fn capture_tail(&self, session: &str, window: u32, lines: u16) -> Result<String>;

    /// Submit a line of text to a window's input, followed by Enter.
    fn send_line(&self, session: &str, window: u32, text: &str) -> Result<()>;

    fn session_exists(&self, session: &str) -> bool;

    fn window_exists(&self, session: &str, window: u32) -> bool {
        self.windows(session)
            .map(|ws| ws.iter().any(|(idx, _)| *idx == window))
            .unwrap_or(false)
    }
}

/// The real tmux binary.
pub struct Tmux;

/// Pane address in tmux target syntax.
pub fn target(session: &str, window: u32) -> String {
    format!("{}:{}", session, window)
}

impl Tmux {
    pub fn is_available() -> bool {
        Command::new("tmux")
            .arg("-V")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn version() -> Result<String> {
        let output = Command::new("tmux").arg("-V").output()?;
        if !output.status.success() {
            return Err(Error::Tmux("Failed to get tmux version".to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Multiplexer for Tmux {
    fn sessions(&self) -> Result<Vec<String>> {
        mlog_trace!("Tmux::sessions");
        let output = Command::new("tmux")
            .args(["list-sessions", "-F", "#{session_name}"])
            .output()?;
        if !output.status.success() {
            // tmux exits nonzero when the server is not running
            mlog_debug!("No tmux sessions found");
            return Ok(Vec::new());
        }
        let sessions: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(String::from)
            .collect();
        mlog_trace!("sessions: found {}", sessions.len());
        Ok(sessions)
    }

    fn windows(&self, session: &str) -> Result<Vec<(u32, String)>> {
        mlog_trace!("Tmux::windows session={}", session);
        let output = Command::new("tmux")
            .args([
                "list-windows",
                "-t",
                session,
                "-F",
                "#{window_index} #{window_name}",
            ])
            .output()?;
        if !output.status.success() {
            mlog_debug!("list-windows failed for '{}'", session);
            return Err(Error::SessionNotFound(session.to_string()));
        }
        let mut windows = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let mut parts = line.splitn(2, ' ');
            let index = parts
                .next()
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(|| Error::Tmux(format!("Invalid window listing: {}", line)))?;
            let name = parts.next().unwrap_or("").to_string();
            windows.push((index, name));
        }
        Ok(windows)
    }

    fn capture_tail(&self, session: &str, window: u32, lines: u16) -> Result<String> {
        let tgt = target(session, window);
        mlog_trace!("Tmux::capture_tail target={} lines={}", tgt, lines);
        if !self.window_exists(session, window) {
            return Err(Error::WindowNotFound {
                session: session.to_string(),
                window,
            });
        }
        // -S with a negative value starts N lines from the end of history
        let start = format!("-{}", lines);
        let output = Command::new("tmux")
            .args(["capture-pane", "-t", &tgt, "-p", "-S", &start])
            .output()?;
        if !output.status.success() {
            return Err(Error::Tmux(format!(
                "Failed to capture pane '{}': {}",
                tgt,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let content = String::from_utf8_lossy(&output.stdout).to_string();
        mlog_trace!("capture_tail: {} bytes", content.len());
        Ok(content)
    }

    fn send_line(&self, session: &str, window: u32, text: &str) -> Result<()> {
        let tgt = target(session, window);
        mlog_debug!("Tmux::send_line target={} len={}", tgt, text.len());
        if !self.window_exists(session, window) {
            return Err(Error::WindowNotFound {
                session: session.to_string(),
                window,
            });
        }
        let output = Command::new("tmux")
            .args(["send-keys", "-t", &tgt, text, "Enter"])
            .output()?;
        if !output.status.success() {
            mlog_warn!(
                "Failed to send keys to '{}': {}",
                tgt,
                String::from_utf8_lossy(&output.stderr)
            );
            return Err(Error::Tmux(format!(
                "Failed to send keys to '{}': {}",
                tgt,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    fn session_exists(&self, session: &str) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", session])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

/// Replace characters tmux would reject in a session name.
pub fn sanitize_session_name(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
