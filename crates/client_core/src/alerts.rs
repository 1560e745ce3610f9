use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::info;

use crate::notifications::{DesktopAlert, DesktopPermission, Tone};

/// Host side of alerting: desktop notifications, audio and the window title.
///
/// Calls other than the permission request come from the session task and
/// must return promptly.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn request_desktop_permission(&self) -> DesktopPermission;
    fn show_desktop(&self, alert: &DesktopAlert);
    fn play_tone(&self, tone: &Tone);
    fn set_title(&self, title: &str);
}

/// Writes every alert to the log. Useful headless.
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn request_desktop_permission(&self) -> DesktopPermission {
        DesktopPermission::Granted
    }

    fn show_desktop(&self, alert: &DesktopAlert) {
        info!(title = %alert.title, body = %alert.body, tag = alert.tag, "alert: desktop");
    }

    fn play_tone(&self, tone: &Tone) {
        info!(frequency_hz = tone.frequency_hz, "alert: tone");
    }

    fn set_title(&self, title: &str) {
        info!(%title, "alert: title");
    }
}

/// Shortest accepted blink period; `interval_at` rejects zero.
pub const MIN_BLINK_PERIOD: Duration = Duration::from_millis(10);

/// Single-instance repeating timer driving the title animation.
pub struct TitleBlinker {
    period: Duration,
    task: Option<JoinHandle<()>>,
}

impl TitleBlinker {
    /// Periods below [`MIN_BLINK_PERIOD`], zero included, are raised to it.
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(MIN_BLINK_PERIOD),
            task: None,
        }
    }

    /// Call `on_tick` every period until stopped or until it returns `false`.
    /// No-op while already running.
    pub fn start<F>(&mut self, mut on_tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        if self.is_running() {
            return;
        }
        let period = self.period;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !on_tick() {
                    break;
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for TitleBlinker {
    fn drop(&mut self) {
        self.stop();
    }
}
