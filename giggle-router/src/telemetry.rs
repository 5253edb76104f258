/**
 * TELEMETRY - Display sink for parameter and zone channels
 *
 * ROLE: Trackers and zones push their latest values here purely for display.
 * Nothing in the control path reads back from the sink.
 *
 * HOW: ConsoleDisplay keeps channels in registration order and redraws the
 * terminal from a periodic task when something changed since the last frame.
 */

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tracing::{debug, trace, warn};

const MAX_BAR_COLUMNS: usize = 60;

/// One-way telemetry sink.
pub trait Telemetry: Send + Sync {
    fn register_channel(&self, label: &str, max_scale: f32);
    fn update_channel(&self, label: &str, value: f32);
}

pub type SharedTelemetry = Arc<dyn Telemetry>;

#[derive(Debug, Clone)]
struct Channel {
    label: String,
    value: f32,
    scale: f32,
}

#[derive(Default)]
struct Channels {
    ordered: Vec<Channel>,
    index: HashMap<String, usize>,
}

/// Terminal bar display of every registered channel.
pub struct ConsoleDisplay {
    channels: Mutex<Channels>,
    header: Mutex<Vec<String>>,
    footer: Vec<String>,
    update_count: AtomicU64,
    dirty: AtomicBool,
    paint_failed: AtomicBool,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(Channels::default()),
            header: Mutex::new(Vec::new()),
            footer: vec!["To close, press Enter or Ctrl+C".to_string()],
            update_count: AtomicU64::new(0),
            dirty: AtomicBool::new(true),
            paint_failed: AtomicBool::new(false),
        }
    }

    pub fn set_header(&self, lines: Vec<String>) {
        *self.header.lock() = lines;
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn update_count(&self) -> u64 {
        self.update_count.load(Ordering::Relaxed)
    }

    /// Renders one full frame.
    pub fn render(&self, columns: usize) -> String {
        let cols = columns.min(MAX_BAR_COLUMNS);
        let mut out = String::new();
        for line in self.header.lock().iter() {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&format!("Updated {} times\n", self.update_count()));

        for ch in self.channels.lock().ordered.iter() {
            let fill = if ch.scale > 0.0 { (ch.value / ch.scale).clamp(0.0, 1.0) } else { 0.0 };
            let filled = (cols as f32 * fill).floor() as usize;
            let empty = (cols as f32 * (1.0 - fill)).ceil() as usize;
            out.push_str(&ch.label);
            out.push('\n');
            out.push_str(&format!(
                "[{}{}]: {} / {}\n",
                "#".repeat(filled),
                "-".repeat(empty),
                ch.value,
                ch.scale
            ));
        }
        out.push('\n');

        for line in &self.footer {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Redraws stdout on a fixed period, only when a channel changed.
    pub fn spawn_refresh(self: &Arc<Self>, period: Duration) {
        let display = Arc::clone(self);
        task::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if !display.dirty.swap(false, Ordering::Relaxed) {
                    continue;
                }
                let frame = display.render(MAX_BAR_COLUMNS);
                if let Err(e) = paint(&mut std::io::stdout().lock(), &frame) {
                    if display.paint_failed.swap(true, Ordering::Relaxed) {
                        debug!("display write failed: {e}");
                    } else {
                        warn!("display write failed, further failures logged at debug: {e}");
                    }
                }
            }
        });
    }
}

impl Default for ConsoleDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry for ConsoleDisplay {
    fn register_channel(&self, label: &str, max_scale: f32) {
        let mut channels = self.channels.lock();
        if channels.index.contains_key(label) {
            return;
        }
        let pos = channels.ordered.len();
        channels.ordered.push(Channel { label: label.to_string(), value: 0.0, scale: max_scale });
        channels.index.insert(label.to_string(), pos);
        self.dirty.store(true, Ordering::Relaxed);
    }

    fn update_channel(&self, label: &str, value: f32) {
        let mut channels = self.channels.lock();
        let Some(&pos) = channels.index.get(label) else {
            return;
        };
        channels.ordered[pos].value = value;
        self.update_count.fetch_add(1, Ordering::Relaxed);
        self.dirty.store(true, Ordering::Relaxed);
    }
}

/// Sink used when the console display is turned off.
pub struct TraceTelemetry;

impl Telemetry for TraceTelemetry {
    fn register_channel(&self, label: &str, max_scale: f32) {
        debug!(channel = label, max_scale, "registered telemetry channel");
    }

    fn update_channel(&self, label: &str, value: f32) {
        trace!(channel = label, value, "channel update");
    }
}

/// Clears the screen, homes the cursor and writes `frame`.
fn paint(out: &mut impl Write, frame: &str) -> io::Result<()> {
    write!(out, "\x1b[2J\x1b[H{frame}")?;
    out.flush()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_bars_in_registration_order() {
        let display = ConsoleDisplay::new();
        display.set_header(vec!["Giggle OSC Router".to_string()]);
        display.register_channel("Zone: Head", 255.0);
        display.register_channel("/avatar/parameters/prox", 1.0);
        display.update_channel("Zone: Head", 255.0);
        display.update_channel("/avatar/parameters/prox", 0.5);

        let frame = display.render(10);
        let zone_pos = frame.find("Zone: Head").unwrap();
        let prox_pos = frame.find("/avatar/parameters/prox").unwrap();
        assert!(zone_pos < prox_pos);
        assert!(frame.starts_with("Giggle OSC Router\n"));
        assert!(frame.contains("[##########]: 255 / 255"));
        assert!(frame.contains("[#####-----]: 0.5 / 1"));
        assert!(frame.contains("Updated 2 times"));
        assert!(frame.trim_end().ends_with("To close, press Enter or Ctrl+C"));
    }

    #[test]
    fn test_update_of_unknown_channel_is_ignored() {
        let display = ConsoleDisplay::new();
        display.update_channel("nope", 1.0);
        assert_eq!(display.update_count(), 0);
    }

    #[test]
    fn test_register_twice_keeps_one_channel() {
        let display = ConsoleDisplay::new();
        display.register_channel("a", 1.0);
        display.register_channel("a", 1.0);
        assert_eq!(display.render(4).matches("\na\n").count(), 1);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_paint_reports_write_failure() {
        assert_eq!(paint(&mut BrokenPipe, "frame").unwrap_err().kind(), io::ErrorKind::BrokenPipe);

        let mut screen = Vec::new();
        paint(&mut screen, "frame").unwrap();
        assert_eq!(screen, b"\x1b[2J\x1b[Hframe");
    }
}
