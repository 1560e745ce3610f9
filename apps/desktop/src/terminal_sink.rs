use std::io::Write;

use async_trait::async_trait;
use client_core::{AlertSink, DesktopAlert, DesktopPermission, Tone};
use tracing::debug;

/// Replaces control characters with their escaped form so text from peers or
/// the broker cannot inject terminal escape sequences.
pub fn escape_control(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_control() {
            out.extend(ch.escape_default());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Renders alerts in the terminal: a highlighted line for desktop
/// notifications, the bell for the tone and an xterm title sequence.
pub struct TerminalAlertSink {
    permission: DesktopPermission,
}

impl TerminalAlertSink {
    pub fn new(permission: DesktopPermission) -> Self {
        Self { permission }
    }
}

#[async_trait]
impl AlertSink for TerminalAlertSink {
    async fn request_desktop_permission(&self) -> DesktopPermission {
        self.permission
    }

    fn show_desktop(&self, alert: &DesktopAlert) {
        println!(
            "\x1b[1m[{}]\x1b[0m {}",
            escape_control(&alert.title),
            escape_control(&alert.body)
        );
    }

    fn play_tone(&self, tone: &Tone) {
        debug!(frequency_hz = tone.frequency_hz, "terminal: bell");
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(b"\x07");
        let _ = stdout.flush();
    }

    fn set_title(&self, title: &str) {
        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "\x1b]0;{}\x07", escape_control(title));
        let _ = stdout.flush();
    }
}
