//! Broadcast watcher task
//!
//! Owns the poll timer and both tick timers. They live only inside
//! [`BroadcastWatcher::run`], so returning drops all three.

use invigil_api::{keys, GlobalBroadcast};
use invigil_config::{ClientSettings, COUNTDOWN_STEP};
use invigil_store::{ChangeNotice, Store, StoreExt};
use invigil_util::{Clock, ClientId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{ClientView, ExamInfo, Reconciler, SharedView, SkewTracker, Transition};

/// Messages from the endpoint to the watcher task
#[derive(Debug)]
pub enum ClientCommand {
    /// Read the broadcast now instead of waiting for the next poll
    PollNow,
    /// Stop watching
    Shutdown,
}

/// Why the watcher returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Began { exam: ExamInfo, remaining: Duration },
    Ended,
    Shutdown,
}

type BeginCallback = Box<dyn FnOnce(&ExamInfo, Duration) + Send + Sync>;

/// Control side of a running watcher
#[derive(Clone)]
pub struct WatcherHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
    view: SharedView,
}

impl WatcherHandle {
    pub fn shutdown(&self) {
        let _ = self.commands.send(ClientCommand::Shutdown);
    }

    pub fn poll_now(&self) {
        let _ = self.commands.send(ClientCommand::PollNow);
    }

    pub fn view(&self) -> ClientView {
        self.view.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientView> {
        self.view.subscribe()
    }
}

/// One student endpoint's reconciliation loop
pub struct BroadcastWatcher {
    id: ClientId,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    settings: ClientSettings,
    view: SharedView,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    on_begin: Option<BeginCallback>,
}

impl BroadcastWatcher {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        settings: ClientSettings,
    ) -> (Self, WatcherHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let view = SharedView::new();

        let watcher = Self {
            id: ClientId::new(),
            store,
            clock,
            settings,
            view: view.clone(),
            commands: rx,
            on_begin: None,
        };
        let handle = WatcherHandle { commands: tx, view };
        (watcher, handle)
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Called once, when the countdown finishes
    pub fn on_exam_begins<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&ExamInfo, Duration) + Send + Sync + 'static,
    {
        self.on_begin = Some(Box::new(callback));
        self
    }

    /// Run until the exam begins, has already ended, or shutdown is requested
    pub async fn run(mut self) -> WatchOutcome {
        info!(client = %self.id, poll_ms = self.settings.poll_interval.as_millis() as u64, "Watching broadcast");

        let mut reconciler = Reconciler::new(self.settings.countdown_seconds);
        let mut skew = SkewTracker::new();
        let mut last_error: Option<String> = None;

        let mut poll = interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut countdown: Option<Interval> = None;
        let mut remaining: Option<Interval> = None;
        let mut notices = self.store.subscribe();

        loop {
            let mut poll_requested = false;
            let mut transition = Transition::Unchanged;

            tokio::select! {
                Some(cmd) = self.commands.recv() => {
                    match cmd {
                        ClientCommand::Shutdown => {
                            info!(client = %self.id, "Shutdown requested");
                            return WatchOutcome::Shutdown;
                        }
                        ClientCommand::PollNow => poll_requested = true,
                    }
                }

                _ = poll.tick() => poll_requested = true,

                _ = next_tick(&mut countdown) => {
                    transition = reconciler.countdown_tick();
                }

                _ = next_tick(&mut remaining) => {
                    reconciler.remaining_tick(self.settings.tick_interval);
                }

                notice = next_notice(&mut notices) => {
                    match notice {
                        Ok(ChangeNotice { path, .. }) if path == keys::EXAM_STATUS => {
                            debug!(client = %self.id, "Broadcast changed, polling now");
                            poll_requested = true;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            debug!(client = %self.id, missed, "Change notices lagged");
                            poll_requested = true;
                        }
                        Err(broadcast::error::RecvError::Closed) => notices = None,
                    }
                }
            }

            if poll_requested {
                transition = self
                    .poll(&mut reconciler, &mut skew, &mut last_error)
                    .await;
            }

            match transition {
                Transition::Unchanged => {}
                Transition::Waiting { hint } => {
                    debug!(
                        client = %self.id,
                        scheduled = ?hint.as_ref().map(|h| h.start_time),
                        "Waiting for exam"
                    );
                }
                Transition::CountdownStarted { ticks, remaining: left } => {
                    info!(client = %self.id, ticks, remaining_secs = left.as_secs(), "Countdown started");
                    let tick = self.settings.tick_interval;
                    countdown = Some(interval_at(Instant::now() + COUNTDOWN_STEP, COUNTDOWN_STEP));
                    remaining = Some(interval_at(Instant::now() + tick, tick));
                }
                Transition::CountdownTick { ticks_left } => {
                    debug!(client = %self.id, ticks_left, "Countdown");
                }
                Transition::CountdownAborted => {
                    warn!(client = %self.id, "Broadcast went idle during countdown");
                    countdown = None;
                    remaining = None;
                }
                Transition::ExamBegins { exam, remaining: left } => {
                    self.publish(&reconciler, &skew, &last_error);
                    info!(
                        client = %self.id,
                        exam = ?exam.exam_code,
                        remaining_secs = left.as_secs(),
                        "Exam begins"
                    );
                    if let Some(callback) = self.on_begin.take() {
                        callback(&exam, left);
                    }
                    return WatchOutcome::Began { exam, remaining: left };
                }
                Transition::Ended => {
                    self.publish(&reconciler, &skew, &last_error);
                    info!(client = %self.id, "Exam already over");
                    return WatchOutcome::Ended;
                }
            }

            self.publish(&reconciler, &skew, &last_error);
        }
    }

    async fn poll(
        &self,
        reconciler: &mut Reconciler,
        skew: &mut SkewTracker,
        last_error: &mut Option<String>,
    ) -> Transition {
        match self.store.server_time().await {
            Ok(Some(server)) => skew.record(server, self.clock.now()),
            Ok(None) => {}
            Err(e) => debug!(client = %self.id, error = %e, "Server time unavailable"),
        }

        match self.store.get_json::<GlobalBroadcast>(keys::EXAM_STATUS).await {
            Ok(doc) => {
                *last_error = None;
                let broadcast = doc.map(|d| d.value).unwrap_or_default();
                reconciler.observe(&broadcast, skew.adjust(self.clock.now()))
            }
            Err(e) => {
                warn!(client = %self.id, error = %e, "Broadcast read failed");
                *last_error = Some(e.to_string());
                Transition::Unchanged
            }
        }
    }

    fn publish(&self, reconciler: &Reconciler, skew: &SkewTracker, last_error: &Option<String>) {
        self.view
            .set(ClientView::snapshot(reconciler, skew, last_error.clone()));
    }
}

/// Tick of an optional timer; pending forever when the timer is off
async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_notice(
    notices: &mut Option<broadcast::Receiver<ChangeNotice>>,
) -> Result<ChangeNotice, broadcast::error::RecvError> {
    match notices {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
