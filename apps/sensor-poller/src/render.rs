use crate::ingest::{format_change, ChannelSpec, DerivedSnapshot};
use crate::telemetry::Reading;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    FetchFailed,
    NoData,
}

/// Transient message for a failed poll; the scheduler clears it after `dismiss_after`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    #[serde(rename = "dismiss_after_ms", serialize_with = "serialize_millis")]
    pub dismiss_after: Duration,
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

/// Receives everything the scheduler wants shown. Calls arrive on the scheduler task and
/// should not block for long.
pub trait Renderer {
    fn on_committed(&mut self, snapshot: &DerivedSnapshot, window: &[Reading]);
    fn on_failed(&mut self, notice: &Notice);
    fn on_notice_cleared(&mut self);
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn on_committed(&mut self, snapshot: &DerivedSnapshot, window: &[Reading]) {
        (**self).on_committed(snapshot, window)
    }

    fn on_failed(&mut self, notice: &Notice) {
        (**self).on_failed(notice)
    }

    fn on_notice_cleared(&mut self) {
        (**self).on_notice_cleared()
    }
}

/// Forwards every call to each renderer in order.
#[derive(Default)]
pub struct Fanout {
    renderers: Vec<Box<dyn Renderer + Send>>,
}

impl Fanout {
    pub fn push(&mut self, renderer: impl Renderer + Send + 'static) {
        self.renderers.push(Box::new(renderer));
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }
}

impl Renderer for Fanout {
    fn on_committed(&mut self, snapshot: &DerivedSnapshot, window: &[Reading]) {
        for renderer in &mut self.renderers {
            renderer.on_committed(snapshot, window);
        }
    }

    fn on_failed(&mut self, notice: &Notice) {
        for renderer in &mut self.renderers {
            renderer.on_failed(notice);
        }
    }

    fn on_notice_cleared(&mut self) {
        for renderer in &mut self.renderers {
            renderer.on_notice_cleared();
        }
    }
}

/// Structured log lines, one per channel per commit.
pub struct LogRenderer {
    units: BTreeMap<String, String>,
}

impl LogRenderer {
    pub fn new(channels: &[ChannelSpec]) -> Self {
        Self {
            units: channels
                .iter()
                .map(|spec| (spec.name.clone(), spec.unit.clone()))
                .collect(),
        }
    }
}

impl Renderer for LogRenderer {
    fn on_committed(&mut self, snapshot: &DerivedSnapshot, window: &[Reading]) {
        tracing::info!(
            observed_at = %crate::telemetry::millis_to_dt(snapshot.timestamp),
            window_len = window.len(),
            worst_alert = snapshot.worst_alert().as_str(),
            comfort = ?snapshot.comfort,
            air_quality = ?snapshot.air_quality,
            "snapshot committed"
        );
        for (name, channel) in &snapshot.channels {
            let unit = self.units.get(name).map(String::as_str).unwrap_or("");
            let change = channel
                .delta
                .map(|delta| format_change(delta, unit))
                .unwrap_or_else(|| "n/a".to_string());
            tracing::info!(
                channel = %name,
                current = channel.current,
                average = channel.average,
                change = %change,
                alert = channel.alert.as_str(),
                "channel"
            );
        }
    }

    fn on_failed(&mut self, notice: &Notice) {
        tracing::warn!(kind = ?notice.kind, message = %notice.message, "poll notice");
    }

    fn on_notice_cleared(&mut self) {
        tracing::debug!("poll notice cleared");
    }
}

#[derive(Serialize)]
struct SnapshotDocument<'a> {
    written_at: chrono::DateTime<Utc>,
    snapshot: Option<&'a DerivedSnapshot>,
    readings: &'a [Reading],
    notice: Option<&'a Notice>,
}

/// Keeps a JSON file in sync with the latest committed view and any active notice.
pub struct SnapshotFileRenderer {
    path: PathBuf,
    snapshot: Option<DerivedSnapshot>,
    readings: Vec<Reading>,
    notice: Option<Notice>,
}

impl SnapshotFileRenderer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshot: None,
            readings: Vec::new(),
            notice: None,
        }
    }

    fn flush(&self) {
        let document = SnapshotDocument {
            written_at: Utc::now(),
            snapshot: self.snapshot.as_ref(),
            readings: &self.readings,
            notice: self.notice.as_ref(),
        };
        if let Err(err) = write_json_file_atomic(&self.path, &document) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to write snapshot file");
        }
    }
}

impl Renderer for SnapshotFileRenderer {
    fn on_committed(&mut self, snapshot: &DerivedSnapshot, window: &[Reading]) {
        self.snapshot = Some(snapshot.clone());
        self.readings = window.to_vec();
        self.flush();
    }

    fn on_failed(&mut self, notice: &Notice) {
        self.notice = Some(notice.clone());
        self.flush();
    }

    fn on_notice_cleared(&mut self) {
        if self.notice.take().is_some() {
            self.flush();
        }
    }
}

/// Writes to a sibling temp file and renames it over `path`, so readers never see a
/// partial document.
pub fn write_json_file_atomic(path: &Path, value: &impl Serialize) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let encoded = serde_json::to_vec_pretty(value)?;
    let tmp_name = format!(
        "{}.{}.tmp",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("snapshot.json"),
        Uuid::new_v4()
    );
    let tmp_path = parent.join(tmp_name);
    std::fs::write(&tmp_path, encoded)?;
    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
