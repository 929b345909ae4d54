//! invigil-drill - exam rehearsal harness
//!
//! Runs a complete exam against the configured store:
//! - Configuration loading
//! - Store initialization and startup recovery
//! - One admin controller creating and starting a session
//! - N simulated student endpoints watching the broadcast
//! - Submission, marking and publication for every student
//! - Stop, and a summary of what each endpoint saw

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, ValueEnum};
use invigil_api::{Mark, SubmissionKey};
use invigil_client::{BroadcastWatcher, WatchOutcome, WatcherHandle};
use invigil_config::{load_config, Settings, StoreSettings};
use invigil_core::{
    GradingCoordinator, LifecycleController, PublishOutcome, SessionDraft, SubmissionDraft,
};
use invigil_store::{MemoryStore, SqliteStore, Store};
use invigil_util::{
    default_config_path, format_countdown, format_duration, is_mock_time_active, Clock, ExamCode,
    GroupId, StudentId, SystemClock, STORE_FILENAME,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// invigil-drill - rehearse a timed exam end to end
#[derive(Parser, Debug)]
#[command(name = "invigil-drill")]
#[command(about = "Rehearse a timed exam with simulated student endpoints", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/invigil/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override for the SQLite store (or set INVIGIL_DATA_DIR)
    #[arg(short, long, env = "INVIGIL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Store backend override
    #[arg(long, value_enum)]
    store: Option<Backend>,

    /// Number of simulated students
    #[arg(short = 'n', long, default_value_t = 30)]
    students: u32,

    /// Content track for the exam
    #[arg(short, long, default_value = "math")]
    track: String,

    /// Exam duration in minutes
    #[arg(long, default_value_t = 60)]
    duration_minutes: u32,

    /// Group allowed to sit the exam
    #[arg(short, long, default_value = "drill")]
    group: String,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

/// What one endpoint saw
#[derive(Debug)]
struct StudentReport {
    student: StudentId,
    outcome: WatchOutcome,
}

struct Drill {
    settings: Settings,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    lifecycle: LifecycleController,
    grading: GradingCoordinator,
}

impl Drill {
    fn new(args: &Args) -> Result<Self> {
        let settings = if args.config.exists() {
            let settings = load_config(&args.config)
                .with_context(|| format!("Failed to load config from {:?}", args.config))?;
            info!(config_path = %args.config.display(), "Configuration loaded");
            settings
        } else {
            info!(config_path = %args.config.display(), "No configuration file, using defaults");
            Settings::default()
        };

        let store = open_store(&settings.store, args.store, args.data_dir.clone())?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let lifecycle = LifecycleController::new(store.clone(), clock.clone(), settings.admin.clone());
        let grading = GradingCoordinator::new(store.clone(), clock.clone());

        Ok(Self {
            settings,
            store,
            clock,
            lifecycle,
            grading,
        })
    }

    async fn run(self, args: &Args) -> Result<()> {
        let report = self.lifecycle.recover().await.context("Startup recovery failed")?;
        for repair in &report.repairs {
            warn!(repair = %repair, "Recovered inconsistent state");
        }

        // Enroll students before anything is announced
        let group = GroupId::new(args.group.clone());
        let mut students = Vec::with_capacity(args.students as usize);
        for _ in 0..args.students {
            let id = self
                .lifecycle
                .codes()
                .reserve_enrollment_id_now(
                    &self.settings.admin.enrollment_prefix,
                    self.settings.admin.enrollment_width,
                    Some(group.clone()),
                    self.clock.now(),
                )
                .await
                .context("Failed to enroll student")?;
            students.push(id);
        }
        info!(count = students.len(), "Students enrolled");

        // Endpoints start watching while the exam is still idle
        let mut watchers = JoinSet::new();
        let mut handles: Vec<WatcherHandle> = Vec::with_capacity(students.len());
        for student in &students {
            let (watcher, handle) = BroadcastWatcher::new(
                self.store.clone(),
                self.clock.clone(),
                self.settings.client.clone(),
            );
            let student = student.clone();
            handles.push(handle);
            watchers.spawn(async move {
                let outcome = watcher.run().await;
                StudentReport { student, outcome }
            });
        }

        let now_local = self.clock.now().with_timezone(&Local);
        let draft = SessionDraft::single_track(
            args.track.as_str(),
            now_local.date_naive(),
            now_local.format("%H:%M").to_string(),
            args.duration_minutes,
        )
        .with_groups([group.clone()])
        .with_display_name(format!("{} drill", args.track))
        .starting_now();

        let created = self.lifecycle.create(draft).await.context("Failed to create session")?;
        let code = created.code.clone();
        if let Some(reason) = created.start_refusal {
            shutdown_all(&handles);
            bail!("Session {} was created but not started: {}", code, reason);
        }
        info!(code = %code, students = students.len(), "Exam started, waiting for endpoints");

        let reports = self.collect(&mut watchers, &handles).await?;

        let began: Vec<&StudentReport> = reports
            .iter()
            .filter(|r| matches!(r.outcome, WatchOutcome::Began { .. }))
            .collect();

        let mut published = Vec::new();
        for report in &began {
            match self.sit_and_grade(&code, &report.student, &group).await {
                Ok(Some(score)) => published.push(score),
                Ok(None) => warn!(student = %report.student, "Result not published"),
                Err(e) => warn!(student = %report.student, error = %e, "Grading failed"),
            }
        }

        let stopped = self.lifecycle.stop(&code).await.context("Failed to stop session")?;
        let session = self.lifecycle.get(&code).await?;

        println!("Drill complete");
        println!();
        println!("  Exam: {} ({})", code, session.display_name);
        println!("  Endpoints: {}", reports.len());
        println!("  Began: {}", began.len());
        println!(
            "  Ended/shut down: {}",
            reports.len() - began.len()
        );
        if let Some(min_remaining) = began
            .iter()
            .filter_map(|r| match &r.outcome {
                WatchOutcome::Began { remaining, .. } => Some(*remaining),
                _ => None,
            })
            .min()
        {
            println!("  Least time remaining at start: {}", format_countdown(min_remaining));
        }
        println!(
            "  Submissions: {} total, {} graded, {} published",
            session.counters.total, session.counters.graded, session.counters.published
        );
        if !published.is_empty() {
            let mean = published.iter().sum::<u32>() as f64 / published.len() as f64;
            println!("  Mean published score: {:.1}%", mean);
        }
        if let (Some(started), Some(completed)) = (session.started_at, stopped.completed_at) {
            let ran = (completed - started).to_std().unwrap_or(Duration::ZERO);
            println!("  Ran for: {}", format_duration(ran));
        }
        println!(
            "  Stopped at: {}",
            stopped
                .completed_at
                .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "-".into())
        );

        Ok(())
    }

    /// Wait for every endpoint, aborting on SIGINT/SIGTERM or a stall
    async fn collect(
        &self,
        watchers: &mut JoinSet<StudentReport>,
        handles: &[WatcherHandle],
    ) -> Result<Vec<StudentReport>> {
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

        let client = &self.settings.client;
        let deadline = tokio::time::sleep(
            client.countdown() + client.poll_interval * 4 + Duration::from_secs(30),
        );
        tokio::pin!(deadline);

        let mut reports = Vec::with_capacity(handles.len());
        let mut stalled = false;
        loop {
            tokio::select! {
                joined = watchers.join_next() => {
                    match joined {
                        Some(Ok(report)) => reports.push(report),
                        Some(Err(e)) => warn!(error = %e, "Endpoint task failed"),
                        None => break,
                    }
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, aborting drill");
                    shutdown_all(handles);
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, aborting drill");
                    shutdown_all(handles);
                }
                _ = &mut deadline, if !stalled => {
                    stalled = true;
                    warn!(pending = watchers.len(), "Endpoints stalled, shutting them down");
                    shutdown_all(handles);
                }
            }
        }

        Ok(reports)
    }

    /// Submit a deterministic answer sheet, mark it and publish
    async fn sit_and_grade(
        &self,
        code: &ExamCode,
        student: &StudentId,
        group: &GroupId,
    ) -> Result<Option<u32>> {
        let session = self.lifecycle.get(code).await?;
        let seed: u32 = student
            .as_str()
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32))
            % 1000;

        let answers: BTreeMap<u32, String> = (1..=session.question_count)
            .filter(|q| (q + seed) % 9 != 0)
            .map(|q| (q, ["A", "B", "C", "D"][((q + seed) % 4) as usize].to_string()))
            .collect();

        self.grading
            .submit(SubmissionDraft {
                code: code.clone(),
                student: student.clone(),
                group: group.clone(),
                answers: answers.clone(),
            })
            .await?;

        let key = SubmissionKey::new(session.track_reference.clone(), code.clone(), student.clone());
        for q in 1..=session.question_count {
            let mark = match answers.get(&q).map(String::as_str) {
                Some("A") | Some("C") => Mark::Correct,
                _ => Mark::Incorrect,
            };
            self.grading.set_mark(&key, q, Some(mark)).await?;
        }

        Ok(match self.grading.publish(&key).await? {
            PublishOutcome::Published { manual_score }
            | PublishOutcome::AlreadyPublished { manual_score } => Some(manual_score),
            PublishOutcome::Rejected { unmarked } => {
                warn!(student = %student, unmarked = unmarked.len(), "Publish rejected");
                None
            }
        })
    }
}

fn shutdown_all(handles: &[WatcherHandle]) {
    for handle in handles {
        handle.shutdown();
    }
}

fn open_store(
    settings: &StoreSettings,
    backend: Option<Backend>,
    data_dir: Option<PathBuf>,
) -> Result<Arc<dyn Store>> {
    let use_memory = match backend {
        Some(Backend::Memory) => true,
        Some(Backend::Sqlite) => false,
        None => matches!(settings, StoreSettings::Memory),
    };
    if use_memory {
        info!("Using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let db_path = match (data_dir, settings) {
        (Some(dir), _) => dir.join(STORE_FILENAME),
        (None, StoreSettings::Sqlite { path }) => path.clone(),
        (None, StoreSettings::Memory) => invigil_util::default_store_path(),
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory {:?}", parent))?;
    }

    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open database {:?}", db_path))?;
    if !store.is_healthy() {
        bail!("Database {:?} is not answering queries", db_path);
    }
    info!(db_path = %db_path.display(), "Store initialized");
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }

    info!(version = env!("CARGO_PKG_VERSION"), "invigil-drill starting");

    if args.students == 0 {
        bail!("--students must be at least 1");
    }

    if is_mock_time_active() {
        warn!("Mock time is active; exam timestamps are shifted from the real clock");
    }

    let drill = Drill::new(&args)?;
    drill.run(&args).await
}
