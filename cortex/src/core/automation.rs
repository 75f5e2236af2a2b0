use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rand::Rng;
use serde::Serialize;
use sled::Db;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};

use crate::core::blogger::PostDraft;
use crate::core::config::AutomationConfig;
use crate::core::error::{PipelineError, Result};
use crate::core::history::{normalize_title, PublishHistory};
use crate::core::llm::extract_title;
use crate::core::pipeline::{self, AutomationPatch, Pipeline, SettingsPatch};
use crate::core::run_log::{RunLog, RunLogEntry, RunStatus, DEFAULT_CAPACITY};
use crate::core::trends::{blog_prompt, Topic};

const FIRST_SLOT_HOUR: u32 = 9;
const SECOND_SLOT_HOUR: u32 = 17;
const RECENT_LOGS: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Selecting,
    Generating,
    Scoring,
    Publishing,
    Skipped,
    Logging,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutomationStatus {
    pub running: bool,
    pub cycle_in_flight: bool,
    pub state: CycleState,
    pub config: AutomationConfig,
    pub recent_logs: Vec<RunLogEntry>,
    pub last_post_time: Option<DateTime<Utc>>,
    pub next_run: Option<NaiveDateTime>,
}

fn slot(hour: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Local times of day at which the timer fires.
pub fn daily_slots(posts_per_day: u32) -> Vec<NaiveTime> {
    match posts_per_day {
        0 => Vec::new(),
        1 => vec![slot(FIRST_SLOT_HOUR)],
        2 => vec![slot(FIRST_SLOT_HOUR), slot(SECOND_SLOT_HOUR)],
        n => {
            let step = 24 * 60 / i64::from(n);
            (0..i64::from(n))
                .map(|i| slot(FIRST_SLOT_HOUR) + ChronoDuration::minutes(i * step))
                .collect()
        }
    }
}

/// Latest slot in `(since, now]`, if any.
pub fn due_slot(slots: &[NaiveTime], since: NaiveDateTime, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let mut due = None;
    let mut day = since.date();
    while day <= now.date() {
        for s in slots {
            let at = day.and_time(*s);
            if since < at && at <= now && due.map_or(true, |d| at > d) {
                due = Some(at);
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    due
}

pub fn next_slot(slots: &[NaiveTime], now: NaiveDateTime) -> Option<NaiveDateTime> {
    let today = now.date();
    let tomorrow = today.succ_opt()?;
    [today, tomorrow]
        .iter()
        .flat_map(|d| slots.iter().map(move |s| d.and_time(*s)))
        .filter(|at| *at > now)
        .min()
}

/// Source of "now" for the timer, the gap check and publish timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

fn lock_state(state: &StdMutex<CycleState>) -> std::sync::MutexGuard<'_, CycleState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held for the length of a cycle. Dropping it frees the worker and returns the
/// state machine to `Idle`, including when the cycle future is dropped midway.
struct CycleGuard<'a> {
    in_flight: &'a AtomicBool,
    state: &'a StdMutex<CycleState>,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock_state(self.state);
        if *state != CycleState::Idle {
            log::warn!("Cycle abandoned in state {:?}", *state);
            *state = CycleState::Idle;
        }
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CycleContext {
    topic: Option<String>,
    seo_score: Option<u8>,
}

struct LoopHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The scheduler: one worker, one cycle at a time.
pub struct Automation {
    pipeline: Arc<Pipeline>,
    history: PublishHistory,
    run_log: RunLog,
    state: StdMutex<CycleState>,
    in_flight: AtomicBool,
    last_post_time: Mutex<Option<DateTime<Utc>>>,
    attempted: Mutex<HashSet<(NaiveDate, String)>>,
    loop_handle: Mutex<Option<LoopHandle>>,
    poll_interval: Duration,
    clock: Clock,
}

impl Automation {
    pub fn new(pipeline: Arc<Pipeline>, db: &Db) -> Result<Self> {
        let run_log = RunLog::new(db, DEFAULT_CAPACITY)?;
        let last_post_time = run_log
            .recent(DEFAULT_CAPACITY)?
            .into_iter()
            .find(|e| e.status == RunStatus::Success)
            .map(|e| e.timestamp);
        Ok(Self {
            pipeline,
            history: PublishHistory::new(db)?,
            run_log,
            state: StdMutex::new(CycleState::Idle),
            in_flight: AtomicBool::new(false),
            last_post_time: Mutex::new(last_post_time),
            attempted: Mutex::new(HashSet::new()),
            loop_handle: Mutex::new(None),
            poll_interval: Duration::from_secs(60),
            clock: Arc::new(Utc::now),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn run_log(&self) -> &RunLog {
        &self.run_log
    }

    pub fn history(&self) -> &PublishHistory {
        &self.history
    }

    pub fn state(&self) -> CycleState {
        *lock_state(&self.state)
    }

    pub fn cycle_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub async fn last_post_time(&self) -> Option<DateTime<Utc>> {
        *self.last_post_time.lock().await
    }

    fn set_state(&self, next: CycleState) {
        let mut state = lock_state(&self.state);
        if *state != next {
            log::info!("Automation state: {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    fn try_begin(&self) -> Result<CycleGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| CycleGuard {
                in_flight: &self.in_flight,
                state: &self.state,
            })
            .map_err(|_| PipelineError::AlreadyRunning)
    }

    /// Whether `min_hours_between_posts` has passed since the last publish.
    pub async fn gap_elapsed(&self, now: DateTime<Utc>) -> bool {
        let min_hours = self.pipeline.automation_config().await.min_hours_between_posts;
        match self.last_post_time().await {
            Some(last) => now - last >= ChronoDuration::hours(i64::from(min_hours)),
            None => true,
        }
    }

    /// One full cycle. Only a concurrent cycle is reported as an error;
    /// every other outcome comes back as the logged entry.
    pub async fn run_cycle(&self) -> Result<RunLogEntry> {
        let _guard = self.try_begin()?;
        log::info!("Automation cycle started");

        let mut ctx = CycleContext::default();
        let mut entry = match self.cycle(&mut ctx).await {
            Ok(entry) => entry,
            Err(e @ (PipelineError::QualityGateSkip { .. } | PipelineError::NoTopic(_))) => {
                self.set_state(CycleState::Skipped);
                log::info!("Cycle skipped: {}", e);
                RunLogEntry::new(RunStatus::Skipped, e.to_string())
            }
            Err(e) => {
                log::error!("Cycle failed ({}): {}", e.kind(), e);
                RunLogEntry::new(RunStatus::Error, e.to_string())
            }
        };
        if entry.topic.is_none() {
            entry.topic = ctx.topic;
        }
        if entry.seo_score.is_none() {
            entry.seo_score = ctx.seo_score;
        }

        self.set_state(CycleState::Logging);
        if let Err(e) = self.run_log.append(&entry) {
            log::error!("Failed to write run log entry: {}", e);
        }
        self.set_state(CycleState::Idle);
        Ok(entry)
    }

    /// On-demand cycle; ignores the minimum gap between posts. The cycle runs on
    /// its own task, so dropping the returned future does not cancel it.
    pub async fn run_now(self: &Arc<Self>) -> Result<RunLogEntry> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_cycle().await }).await?
    }

    async fn cycle(&self, ctx: &mut CycleContext) -> Result<RunLogEntry> {
        if let Err(e) = self.history.prune(self.now()) {
            log::warn!("History prune failed: {}", e);
        }
        let settings = self.pipeline.settings().await;
        let automation = &settings.automation;

        self.set_state(CycleState::Selecting);
        let topic = self.select_topic(automation).await?;
        ctx.topic = Some(topic.title.clone());
        log::info!("Selected topic '{}' from {}", topic.title, topic.source);

        self.set_state(CycleState::Generating);
        let content = self.pipeline.generate(&blog_prompt(&topic)).await?;

        self.set_state(CycleState::Scoring);
        let report = self.pipeline.analyze(&content).await;
        ctx.seo_score = Some(report.score);
        if report.score < automation.min_seo_score {
            return Err(PipelineError::QualityGateSkip {
                score: report.score,
                min: automation.min_seo_score,
            });
        }

        self.set_state(CycleState::Publishing);
        let title = extract_title(&content).unwrap_or_else(|| format!("Latest Trends: {}", topic.title));
        let image = self.pipeline.image(&pipeline::image_prompt(&topic)).await;
        let (ads, _) = self
            .pipeline
            .add_affiliate_ads(&content, settings.affiliate.max_affiliate_ads, None)
            .await?;
        let draft = PostDraft {
            title,
            content: ads.content,
            image_path: image.path,
            image_url: image.url,
            labels: pipeline::labels(&topic, &report, self.now().with_timezone(&Local)),
        };
        let post = self.pipeline.publish(&draft).await?;

        let now = self.now();
        self.history.record_at(&topic, now)?;
        *self.last_post_time.lock().await = Some(now);

        Ok(RunLogEntry::new(
            RunStatus::Success,
            format!("Published '{}' with {} affiliate blocks", post.title, ads.products_used),
        )
        .topic(topic.title)
        .seo_score(report.score)
        .post_url(post.url))
    }

    /// Fetch candidates, drop duplicates and today's earlier attempts, pick one at random.
    async fn select_topic(&self, automation: &AutomationConfig) -> Result<Topic> {
        let candidates = self
            .pipeline
            .trending(None, automation.candidate_count)
            .await?;
        if candidates.is_empty() {
            return Err(PipelineError::NoTopic("no trending topics found".to_string()));
        }

        let now = self.now().with_timezone(&Local);
        let today = now.date_naive();
        let mut attempted = self.attempted.lock().await;
        attempted.retain(|(day, _)| *day == today);

        let mut remaining = Vec::new();
        for topic in candidates {
            let key = attempt_key(&topic);
            if attempted.contains(&(today, key)) {
                log::info!("Rejecting '{}': already attempted today", topic.title);
                continue;
            }
            match self.history.is_duplicate_at(&topic, now)? {
                Some(reason) => log::info!("Rejecting '{}': {}", topic.title, reason),
                None => remaining.push(topic),
            }
        }
        if remaining.is_empty() {
            return Err(PipelineError::NoTopic(
                "every candidate was a duplicate or already attempted".to_string(),
            ));
        }

        let idx = rand::thread_rng().gen_range(0..remaining.len());
        let topic = remaining.swap_remove(idx);
        attempted.insert((today, attempt_key(&topic)));
        Ok(topic)
    }

    pub async fn is_running(&self) -> bool {
        self.loop_handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Spawn the timer loop unless one is already running. Returns whether it was started.
    pub async fn start(self: &Arc<Self>, patch: Option<&AutomationPatch>) -> Result<bool> {
        if let Some(patch) = patch {
            self.pipeline
                .apply_patch(&SettingsPatch {
                    automation: Some(patch.clone()),
                    ..Default::default()
                })
                .await?;
        }

        let mut handle = self.loop_handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.task.is_finished()) {
            log::info!("Automation loop already running");
            return Ok(false);
        }
        let (stop, rx) = watch::channel(false);
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.run_loop(rx).await });
        *handle = Some(LoopHandle { stop, task });
        log::info!("Automation loop started");
        Ok(true)
    }

    /// Ask the loop to exit. A cycle already in flight runs to completion.
    pub async fn stop(&self) -> bool {
        match self.loop_handle.lock().await.take() {
            Some(handle) => {
                let _ = handle.stop.send(true);
                log::info!("Automation loop stopping");
                true
            }
            None => false,
        }
    }

    async fn run_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_check = self.now().with_timezone(&Local).naive_local();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }

            let now = self.now().with_timezone(&Local).naive_local();
            let posts_per_day = self.pipeline.automation_config().await.posts_per_day;
            let due = due_slot(&daily_slots(posts_per_day), last_check, now);
            last_check = now;
            let Some(slot) = due else {
                continue;
            };

            if !self.gap_elapsed(self.now()).await {
                log::info!("Slot {} reached but the minimum gap since the last post has not passed", slot);
                continue;
            }
            log::info!("Slot {} due, running cycle", slot);
            match self.run_cycle().await {
                Ok(entry) => log::info!("Scheduled cycle finished: {:?}", entry.status),
                Err(e) => log::warn!("Scheduled cycle not run: {}", e),
            }
        }
        log::info!("Automation loop stopped");
    }

    pub async fn status(&self) -> Result<AutomationStatus> {
        let config = self.pipeline.automation_config().await;
        let next_run = next_slot(
            &daily_slots(config.posts_per_day),
            self.now().with_timezone(&Local).naive_local(),
        );
        Ok(AutomationStatus {
            running: self.is_running().await,
            cycle_in_flight: self.cycle_in_flight(),
            state: self.state(),
            recent_logs: self.run_log.recent(RECENT_LOGS)?,
            last_post_time: self.last_post_time().await,
            next_run,
            config,
        })
    }
}

fn attempt_key(topic: &Topic) -> String {
    let tokens = normalize_title(&topic.title);
    if tokens.is_empty() {
        return topic.title.trim().to_lowercase();
    }
    tokens.into_iter().collect::<Vec<_>>().join(" ")
}
