use crate::error::FetchError;
use crate::ingest::{
    filter_window, normalize, ChannelSpec, DerivedSnapshot, LookbackWindow, MetricEngine,
    PipelineState, RetentionPolicy,
};
use crate::render::{Notice, NoticeKind, Renderer};
use crate::source::SourceAdapter;
use crate::telemetry::{RawRecord, Reading};
use chrono::Utc;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Fetching,
    Cooldown,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedulerState::Fetching,
            2 => SchedulerState::Cooldown,
            _ => SchedulerState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SchedulerState::Idle => 0,
            SchedulerState::Fetching => 1,
            SchedulerState::Cooldown => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Committed { readings: usize },
    Failed,
    NoData,
    /// A fetch was already in flight; nothing was queued.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub notice_duration: Duration,
    pub window: LookbackWindow,
    pub retention: RetentionPolicy,
    pub prime: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(60_000),
            notice_duration: Duration::from_millis(3_000),
            window: LookbackWindow::default(),
            retention: RetentionPolicy::default(),
            prime: true,
        }
    }
}

/// The committed view as of one moment, filtered to a lookback window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowView {
    pub window: LookbackWindow,
    pub channels: Vec<String>,
    pub snapshot: Option<DerivedSnapshot>,
    pub readings: Vec<Reading>,
}

#[derive(Debug)]
pub enum SchedulerCommand {
    Refresh(oneshot::Sender<PollOutcome>),
    SetWindow {
        label: String,
        done: oneshot::Sender<LookbackWindow>,
    },
    View {
        label: Option<String>,
        reply: oneshot::Sender<WindowView>,
    },
}

#[derive(Debug, Error)]
#[error("poll scheduler has stopped")]
pub struct SchedulerClosed;

#[derive(Clone)]
pub struct PollerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
    stats: Arc<PollStats>,
}

impl PollerHandle {
    pub fn new(tx: mpsc::Sender<SchedulerCommand>, stats: Arc<PollStats>) -> Self {
        Self { tx, stats }
    }

    pub fn stats(&self) -> Arc<PollStats> {
        self.stats.clone()
    }

    /// Polls now unless a fetch is already running, in which case the answer is
    /// [`PollOutcome::Skipped`].
    pub async fn refresh(&self) -> Result<PollOutcome, SchedulerClosed> {
        let (tx, rx) = oneshot::channel();
        self.send(SchedulerCommand::Refresh(tx)).await?;
        rx.await.map_err(|_| SchedulerClosed)
    }

    pub async fn set_window(&self, label: &str) -> Result<LookbackWindow, SchedulerClosed> {
        let (done, rx) = oneshot::channel();
        self.send(SchedulerCommand::SetWindow {
            label: label.to_string(),
            done,
        })
        .await?;
        rx.await.map_err(|_| SchedulerClosed)
    }

    /// Committed series filtered to `label`, or to the active window when `None`.
    pub async fn export(&self, label: Option<&str>) -> Result<WindowView, SchedulerClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::View {
            label: label.map(str::to_string),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SchedulerClosed)
    }

    pub async fn snapshot(&self) -> Result<WindowView, SchedulerClosed> {
        self.export(None).await
    }

    async fn send(&self, command: SchedulerCommand) -> Result<(), SchedulerClosed> {
        self.tx.send(command).await.map_err(|_| SchedulerClosed)
    }
}

#[derive(Debug)]
pub struct PollStats {
    pub polls_started: AtomicU64,
    pub polls_committed: AtomicU64,
    pub polls_failed: AtomicU64,
    pub polls_skipped: AtomicU64,
    pub records_dropped: AtomicU64,
    pub last_commit_unix_ms: AtomicU64,
    state: AtomicU8,
    last_error: Mutex<Option<String>>,
}

impl Default for PollStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PollStats {
    pub fn new() -> Self {
        Self {
            polls_started: AtomicU64::new(0),
            polls_committed: AtomicU64::new(0),
            polls_failed: AtomicU64::new(0),
            polls_skipped: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            last_commit_unix_ms: AtomicU64::new(0),
            state: AtomicU8::new(SchedulerState::Idle.as_u8()),
            last_error: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }
}

/// Committed state plus everything needed to show it.
struct Presenter<R> {
    state: PipelineState,
    window: LookbackWindow,
    channel_names: Vec<String>,
    renderer: R,
}

impl<R: Renderer> Presenter<R> {
    fn view(&self, window: LookbackWindow) -> WindowView {
        let readings = filter_window(self.state.series(), window.as_millis(), now_ms()).to_vec();
        WindowView {
            window,
            channels: self.channel_names.clone(),
            snapshot: self.state.snapshot().cloned(),
            readings,
        }
    }

    fn render(&mut self) {
        let Some(snapshot) = self.state.snapshot() else {
            return;
        };
        let visible = filter_window(self.state.series(), self.window.as_millis(), now_ms());
        self.renderer.on_committed(snapshot, visible);
    }

    /// Serves everything except a refresh, which is handed back to the caller.
    fn answer(&mut self, command: SchedulerCommand) -> Option<oneshot::Sender<PollOutcome>> {
        match command {
            SchedulerCommand::Refresh(reply) => Some(reply),
            SchedulerCommand::SetWindow { label, done } => {
                let window = LookbackWindow::from_label(&label);
                if LookbackWindow::parse(&label).is_none() {
                    tracing::warn!(label = %label, fallback = %window, "unknown window label");
                }
                self.window = window;
                self.render();
                let _ = done.send(window);
                None
            }
            SchedulerCommand::View { label, reply } => {
                let window = label
                    .as_deref()
                    .map(LookbackWindow::from_label)
                    .unwrap_or(self.window);
                let _ = reply.send(self.view(window));
                None
            }
        }
    }
}

/// Poll sources: the interval timer and the handle's command channel.
struct Triggers {
    ticker: Interval,
    commands: mpsc::Receiver<SchedulerCommand>,
    commands_open: bool,
}

pub struct PollScheduler<S, R> {
    source: S,
    channels: Vec<ChannelSpec>,
    engine: MetricEngine,
    settings: SchedulerSettings,
    stats: Arc<PollStats>,
    presenter: Presenter<R>,
    cooldown: Option<Instant>,
    primed: bool,
}

impl<S, R> PollScheduler<S, R>
where
    S: SourceAdapter + Send + 'static,
    R: Renderer + Send + 'static,
{
    pub fn new(
        source: S,
        renderer: R,
        channels: Vec<ChannelSpec>,
        engine: MetricEngine,
        settings: SchedulerSettings,
    ) -> Self {
        let channel_names = channels.iter().map(|spec| spec.name.clone()).collect();
        Self {
            source,
            channels,
            engine,
            stats: Arc::new(PollStats::new()),
            presenter: Presenter {
                state: PipelineState::new(settings.retention),
                window: settings.window,
                channel_names,
                renderer,
            },
            settings,
            cooldown: None,
            primed: false,
        }
    }

    /// Spawns the scheduler loop; it runs until every handle is dropped.
    pub fn spawn(self, queue: usize) -> (PollerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let handle = PollerHandle::new(tx, self.stats.clone());
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, commands: mpsc::Receiver<SchedulerCommand>) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut triggers = Triggers {
            ticker,
            commands,
            commands_open: true,
        };
        tracing::info!(
            source = self.source.name(),
            interval_ms = self.settings.poll_interval.as_millis() as u64,
            window = %self.presenter.window,
            "poll scheduler started"
        );

        loop {
            let deadline = self.cooldown.unwrap_or_else(Instant::now);
            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline), if self.cooldown.is_some() => {
                    self.clear_notice();
                }
                _ = triggers.ticker.tick() => {
                    self.poll(&mut triggers).await;
                }
                command = triggers.commands.recv(), if triggers.commands_open => {
                    match command {
                        Some(command) => {
                            if let Some(reply) = self.presenter.answer(command) {
                                let outcome = self.poll(&mut triggers).await;
                                let _ = reply.send(outcome);
                            }
                        }
                        None => triggers.commands_open = false,
                    }
                }
            }
            if !triggers.commands_open {
                break;
            }
        }
        tracing::info!("poll scheduler stopped");
    }

    async fn poll(&mut self, triggers: &mut Triggers) -> PollOutcome {
        self.clear_notice();
        if !self.primed {
            self.primed = true;
            if self.settings.prime {
                self.prime(triggers).await;
            }
        }

        self.stats.polls_started.fetch_add(1, Ordering::Relaxed);
        self.stats.set_state(SchedulerState::Fetching);
        let fetched = self.fetch(triggers).await;

        let raw = match fetched {
            Ok(raw) => raw,
            Err(err) => {
                self.fail(NoticeKind::FetchFailed, format!("failed to fetch data: {err}"));
                return PollOutcome::Failed;
            }
        };
        let readings = self.normalize_sorted(&raw);
        if readings.is_empty() {
            self.fail(
                NoticeKind::NoData,
                format!("no usable readings in {} records", raw.len()),
            );
            return PollOutcome::NoData;
        }

        let count = readings.len();
        if let Err(err) = self.presenter.state.commit(readings, &self.engine) {
            self.fail(NoticeKind::NoData, err.to_string());
            return PollOutcome::NoData;
        }
        self.stats.polls_committed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .last_commit_unix_ms
            .store(Utc::now().timestamp_millis().max(0) as u64, Ordering::Relaxed);
        self.stats.clear_error();
        self.stats.set_state(SchedulerState::Idle);
        tracing::debug!(readings = count, "committed poll");
        self.presenter.render();
        PollOutcome::Committed { readings: count }
    }

    /// Silent first fetch whose latest reading only seeds the delta baseline. Nothing is
    /// committed or rendered.
    async fn prime(&mut self, triggers: &mut Triggers) {
        self.stats.set_state(SchedulerState::Fetching);
        let result = self.fetch(triggers).await;
        self.stats.set_state(SchedulerState::Idle);
        match result {
            Ok(raw) => {
                match self.normalize_sorted(&raw).pop() {
                    Some(latest) => self.presenter.state.set_baseline(latest),
                    None => tracing::warn!("priming poll returned no usable readings"),
                }
            }
            Err(err) => tracing::warn!(error = %err, "priming poll failed"),
        }
    }

    /// Awaits the source while still answering the handle. Ticks that land here are
    /// dropped and refreshes are answered `Skipped`.
    async fn fetch(&mut self, triggers: &mut Triggers) -> Result<Vec<RawRecord>, FetchError> {
        let fetch = self.source.fetch_raw();
        tokio::pin!(fetch);
        loop {
            tokio::select! {
                result = &mut fetch => return result,
                _ = triggers.ticker.tick() => {
                    self.stats.polls_skipped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("tick skipped while a fetch is in flight");
                }
                command = triggers.commands.recv(), if triggers.commands_open => {
                    match command {
                        Some(command) => {
                            if let Some(reply) = self.presenter.answer(command) {
                                self.stats.polls_skipped.fetch_add(1, Ordering::Relaxed);
                                let _ = reply.send(PollOutcome::Skipped);
                            }
                        }
                        None => triggers.commands_open = false,
                    }
                }
            }
        }
    }

    fn normalize_sorted(&self, raw: &[RawRecord]) -> Vec<Reading> {
        let readings = sorted_readings(raw, &self.channels);
        let dropped = raw.len().saturating_sub(readings.len()) as u64;
        self.stats.records_dropped.fetch_add(dropped, Ordering::Relaxed);
        readings
    }

    fn fail(&mut self, kind: NoticeKind, message: String) {
        self.stats.polls_failed.fetch_add(1, Ordering::Relaxed);
        self.stats.record_error(message.clone());
        self.stats.set_state(SchedulerState::Cooldown);
        let notice = Notice {
            kind,
            message,
            dismiss_after: self.settings.notice_duration,
        };
        self.presenter.renderer.on_failed(&notice);
        self.cooldown = Some(Instant::now() + self.settings.notice_duration);
    }

    fn clear_notice(&mut self) {
        if self.cooldown.take().is_some() {
            self.presenter.renderer.on_notice_cleared();
            self.stats.set_state(SchedulerState::Idle);
        }
    }
}

/// Polls `source` without a scheduler: an optional priming fetch, then one committed
/// fetch. An all-malformed payload yields a view without a snapshot.
pub async fn collect_once<S: SourceAdapter>(
    source: &mut S,
    channels: &[ChannelSpec],
    engine: &MetricEngine,
    settings: &SchedulerSettings,
) -> Result<WindowView, FetchError> {
    let mut state = PipelineState::new(settings.retention);
    if settings.prime {
        let raw = source.fetch_raw().await?;
        match sorted_readings(&raw, channels).pop() {
            Some(latest) => state.set_baseline(latest),
            None => tracing::warn!(records = raw.len(), "priming poll returned no usable readings"),
        }
    }
    let raw = source.fetch_raw().await?;
    let readings = sorted_readings(&raw, channels);
    if readings.is_empty() {
        tracing::warn!(records = raw.len(), "poll returned no usable readings");
    } else if let Err(err) = state.commit(readings, engine) {
        tracing::warn!(error = %err, "poll could not be committed");
    }

    let readings =
        filter_window(state.series(), settings.window.as_millis(), now_ms()).to_vec();
    Ok(WindowView {
        window: settings.window,
        channels: channels.iter().map(|spec| spec.name.clone()).collect(),
        snapshot: state.snapshot().cloned(),
        readings,
    })
}

fn sorted_readings(raw: &[RawRecord], channels: &[ChannelSpec]) -> Vec<Reading> {
    let mut readings = normalize(raw, channels);
    readings.sort_by_key(|reading| reading.timestamp);
    readings
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{ChannelParser, ThresholdConfig, Trend};
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::AtomicUsize;

    type Scripted = Result<Vec<RawRecord>, FetchError>;

    struct ScriptedSource {
        script: VecDeque<Scripted>,
        delay: Duration,
        fetches: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Scripted>, delay: Duration) -> (Self, Arc<AtomicUsize>) {
            let fetches = Arc::new(AtomicUsize::new(0));
            let source = Self {
                script: script.into(),
                delay,
                fetches: fetches.clone(),
            };
            (source, fetches)
        }
    }

    impl SourceAdapter for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_raw(&mut self) -> Result<Vec<RawRecord>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Committed { temperature: f64, delta: Option<f64> },
        Failed(NoticeKind),
        Cleared,
    }

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().expect("events").clone()
        }
    }

    impl Renderer for Recorder {
        fn on_committed(&mut self, snapshot: &DerivedSnapshot, _window: &[Reading]) {
            let channel = snapshot.channel("temperature").expect("temperature");
            self.events.lock().expect("events").push(Event::Committed {
                temperature: channel.current,
                delta: channel.delta,
            });
        }

        fn on_failed(&mut self, notice: &Notice) {
            self.events.lock().expect("events").push(Event::Failed(notice.kind));
        }

        fn on_notice_cleared(&mut self) {
            self.events.lock().expect("events").push(Event::Cleared);
        }
    }

    fn payload(temperature: f64) -> Scripted {
        Ok(vec![RawRecord::new(now_ms()).with_field("t", temperature)])
    }

    fn scheduler(
        script: Vec<Scripted>,
        delay: Duration,
        prime: bool,
    ) -> (PollScheduler<ScriptedSource, Recorder>, Recorder, Arc<AtomicUsize>) {
        let (source, fetches) = ScriptedSource::new(script, delay);
        let recorder = Recorder::default();
        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            "temperature".to_string(),
            ThresholdConfig::new(10.0, 15.0, 30.0, 35.0).expect("valid bounds"),
        );
        let scheduler = PollScheduler::new(
            source,
            recorder.clone(),
            vec![ChannelSpec::new("temperature", "t", ChannelParser::Float, "°C")],
            MetricEngine {
                thresholds,
                ..MetricEngine::default()
            },
            SchedulerSettings {
                poll_interval: Duration::from_secs(60),
                notice_duration: Duration::from_secs(3),
                prime,
                ..SchedulerSettings::default()
            },
        );
        (scheduler, recorder, fetches)
    }

    #[tokio::test(start_paused = true)]
    async fn priming_poll_provides_delta_baseline() {
        let (scheduler, recorder, fetches) =
            scheduler(vec![payload(20.0), payload(24.0)], Duration::ZERO, true);
        let (handle, _task) = scheduler.spawn(8);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(
            recorder.events(),
            vec![Event::Committed {
                temperature: 24.0,
                delta: Some(4.0)
            }]
        );
        let view = handle.snapshot().await.expect("view");
        let channel = view
            .snapshot
            .as_ref()
            .and_then(|s| s.channel("temperature"))
            .cloned()
            .expect("channel");
        assert_eq!(channel.trend, Trend::Up);
        assert_eq!(view.readings.len(), 1);
        assert_eq!(handle.stats().polls_started.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_during_fetch_is_skipped() {
        let (scheduler, recorder, fetches) =
            scheduler(vec![payload(20.0)], Duration::from_secs(5), false);
        let (handle, _task) = scheduler.spawn(8);

        assert_eq!(handle.refresh().await.expect("refresh"), PollOutcome::Skipped);
        assert_eq!(handle.stats().state(), SchedulerState::Fetching);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.events().len(), 1);
        assert_eq!(handle.stats().state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_committed_state_and_clears_notice() {
        let script = vec![payload(20.0), Err(FetchError::Timeout), payload(24.0)];
        let (scheduler, recorder, _fetches) = scheduler(script, Duration::ZERO, false);
        let (handle, _task) = scheduler.spawn(8);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(
            recorder.events(),
            vec![
                Event::Committed {
                    temperature: 20.0,
                    delta: None
                },
                Event::Failed(NoticeKind::FetchFailed),
            ]
        );
        assert_eq!(handle.stats().state(), SchedulerState::Cooldown);
        assert!(handle.stats().last_error().is_some());
        let view = handle.snapshot().await.expect("view");
        assert_eq!(
            view.snapshot.and_then(|s| s.channel("temperature").map(|c| c.current)),
            Some(20.0)
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(recorder.events().last(), Some(&Event::Cleared));
        assert_eq!(handle.stats().state(), SchedulerState::Idle);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(
            recorder.events().last(),
            Some(&Event::Committed {
                temperature: 24.0,
                delta: Some(4.0)
            })
        );
        assert_eq!(handle.stats().polls_failed.load(Ordering::Relaxed), 1);
        assert_eq!(handle.stats().polls_committed.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn primed_baseline_survives_a_failed_first_poll() {
        let script = vec![payload(20.0), Err(FetchError::Timeout), payload(24.0)];
        let (scheduler, recorder, fetches) = scheduler(script, Duration::ZERO, true);
        let (handle, _task) = scheduler.spawn(8);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.events(), vec![Event::Failed(NoticeKind::FetchFailed)]);
        assert_eq!(handle.stats().polls_committed.load(Ordering::Relaxed), 0);
        let view = handle.snapshot().await.expect("view");
        assert!(view.snapshot.is_none());
        assert!(view.readings.is_empty());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(
            recorder.events().last(),
            Some(&Event::Committed {
                temperature: 24.0,
                delta: Some(4.0)
            })
        );
        assert_eq!(handle.stats().polls_committed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_during_a_slow_fetch_are_dropped() {
        let script = vec![payload(20.0), payload(24.0)];
        let (scheduler, recorder, fetches) = scheduler(script, Duration::from_secs(90), false);
        let (handle, _task) = scheduler.spawn(8);

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(handle.stats().polls_started.load(Ordering::Relaxed), 1);
        assert!(handle.stats().polls_skipped.load(Ordering::Relaxed) >= 1);
        assert_eq!(
            recorder.events(),
            vec![Event::Committed {
                temperature: 20.0,
                delta: None
            }]
        );
        assert_eq!(handle.stats().state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_during_cooldown_clears_notice_first() {
        let script = vec![Err(FetchError::Timeout), payload(21.0)];
        let (scheduler, recorder, _fetches) = scheduler(script, Duration::ZERO, false);
        let (handle, _task) = scheduler.spawn(8);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            handle.refresh().await.expect("refresh"),
            PollOutcome::Committed { readings: 1 }
        );
        assert_eq!(
            recorder.events(),
            vec![
                Event::Failed(NoticeKind::FetchFailed),
                Event::Cleared,
                Event::Committed {
                    temperature: 21.0,
                    delta: None
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_payload_is_a_no_data_notice() {
        let malformed = Ok(vec![RawRecord::new(now_ms()).with_field("t", "n/a")]);
        let (scheduler, recorder, _fetches) = scheduler(vec![malformed], Duration::ZERO, false);
        let (handle, _task) = scheduler.spawn(8);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.events(), vec![Event::Failed(NoticeKind::NoData)]);
        assert_eq!(handle.stats().records_dropped.load(Ordering::Relaxed), 1);
        let view = handle.snapshot().await.expect("view");
        assert!(view.snapshot.is_none());
        assert!(view.readings.is_empty());
    }

    #[tokio::test]
    async fn collect_once_primes_then_commits() {
        let (mut source, fetches) =
            ScriptedSource::new(vec![payload(20.0), payload(23.5)], Duration::ZERO);
        let channels = vec![ChannelSpec::new("temperature", "t", ChannelParser::Float, "°C")];
        let view = collect_once(
            &mut source,
            &channels,
            &MetricEngine::default(),
            &SchedulerSettings::default(),
        )
        .await
        .expect("view");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        let delta = view
            .snapshot
            .and_then(|s| s.channel("temperature").and_then(|c| c.delta));
        assert_eq!(delta, Some(3.5));
    }

    #[tokio::test(start_paused = true)]
    async fn set_window_rerenders_and_falls_back() {
        let (scheduler, recorder, _fetches) =
            scheduler(vec![payload(20.0)], Duration::ZERO, false);
        let (handle, _task) = scheduler.spawn(8);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            handle.set_window("24h").await.expect("window"),
            LookbackWindow::OneDay
        );
        assert_eq!(
            handle.set_window("fortnight").await.expect("window"),
            LookbackWindow::SixHours
        );
        assert_eq!(recorder.events().len(), 3);
        let view = handle.export(Some("1h")).await.expect("export");
        assert_eq!(view.window, LookbackWindow::OneHour);
        assert_eq!(view.channels, vec!["temperature".to_string()]);
    }
}
