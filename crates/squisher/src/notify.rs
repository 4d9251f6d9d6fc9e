//! Alert sinks
//!
//! The watchdog and the CLI only know [`AlertSink`]. Desktop notifications are
//! best effort: a missing notifier binary is ignored.

use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Something that can surface an advisory message to the user.
pub trait AlertSink: Send + Sync {
    fn alert(&self, title: &str, message: &str);
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn alert(&self, title: &str, message: &str) {
        warn!(title, "{}", message);
    }
}

/// Drops alerts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AlertSink for NullSink {
    fn alert(&self, _title: &str, _message: &str) {}
}

/// Native desktop notification via the platform's notifier command.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopNotifier;

impl DesktopNotifier {
    /// Command that would show the notification on this platform.
    pub fn command(title: &str, message: &str) -> Command {
        if cfg!(target_os = "macos") {
            let mut cmd = Command::new("terminal-notifier");
            cmd.args(["-title", title, "-message", message]);
            cmd
        } else if cfg!(target_os = "windows") {
            let script = format!(
                "[Windows.UI.Notifications.ToastNotificationManager, Windows.UI.Notifications, ContentType = WindowsRuntime] | Out-Null; \
                 $t = [Windows.UI.Notifications.ToastNotificationManager]::GetTemplateContent([Windows.UI.Notifications.ToastTemplateType]::ToastText02); \
                 $x = $t.GetElementsByTagName('text'); \
                 $x.Item(0).AppendChild($t.CreateTextNode('{}')) | Out-Null; \
                 $x.Item(1).AppendChild($t.CreateTextNode('{}')) | Out-Null; \
                 [Windows.UI.Notifications.ToastNotificationManager]::CreateToastNotifier('Image Squisher').Show([Windows.UI.Notifications.ToastNotification]::new($t))",
                powershell_escape(title),
                powershell_escape(message)
            );
            let mut cmd = Command::new("powershell");
            cmd.args(["-NoProfile", "-Command", &script]);
            cmd
        } else {
            let mut cmd = Command::new("notify-send");
            cmd.args([title, message]);
            cmd
        }
    }
}

fn powershell_escape(text: &str) -> String {
    text.replace('\'', "''")
}

impl AlertSink for DesktopNotifier {
    fn alert(&self, title: &str, message: &str) {
        let mut cmd = Self::command(title, message);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Reap the notifier off the caller's thread.
        match cmd.spawn() {
            Ok(mut child) => {
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => debug!(error = %e, "desktop notification unavailable"),
        }
    }
}

/// Sends every alert to each inner sink.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl AlertSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl AlertSink for FanoutSink {
    fn alert(&self, title: &str, message: &str) {
        for sink in &self.sinks {
            sink.alert(title, message);
        }
    }
}
