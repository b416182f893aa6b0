//! The rotation coordinator: owns the active file, serializes trigger checks
//! with appends behind a single mutex, and orchestrates the close → name →
//! rename → reopen handoff when a trigger fires. Compression and retention
//! run on the background maintenance worker and never block the write path.

use {
    chrono::{DateTime, FixedOffset, Utc},
    std::{
        fs, io,
        path::{Path, PathBuf},
        sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
        thread,
        time::Duration,
    },
    tracing::{info, warn},
};

use crate::{
    compress::{MaintenanceTask, MaintenanceWorker},
    config::RotationConfig,
    error::{Error, Result},
    namer::{ArchiveNamer, NamedArchive},
    pattern::Granularity,
    retention::RetentionSweeper,
    trigger::{TriggerCause, TriggerEvaluator},
    writer::ActiveFile,
};

/// Emitted once per completed rotation.
#[derive(Debug, Clone)]
pub struct RotationEvent {
    pub timestamp: DateTime<FixedOffset>,
    pub cause: TriggerCause,
    /// The active path the sealed file was rotated away from.
    pub source: PathBuf,
    /// The final archive path; `None` when archiving is disabled and the
    /// sealed file was discarded.
    pub destination: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Idle,
    Rotating,
    /// A rotation could not complete and no fallback was possible. All
    /// writes fail until the engine is reconstructed; nothing is ever
    /// written into a closed or missing file.
    Degraded,
}

/// Mutable engine state, guarded by the single write-path mutex.
struct Core {
    state: EngineState,
    active: Option<ActiveFile>,
    /// Rendered time bucket the active file belongs to; `None` when
    /// archiving is disabled.
    bucket: Option<String>,
    /// Next sequence index within the current bucket.
    seq: u64,
}

struct Shared {
    config: RotationConfig,
    trigger: TriggerEvaluator,
    namer: Option<ArchiveNamer>,
    worker: Option<Mutex<MaintenanceWorker>>,
    core: Mutex<Core>,
}

fn degraded_error() -> Error {
    Error::RotationFailed("engine is degraded; reconstruct it to resume logging".into())
}

impl Shared {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.config.time_zone)
    }

    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_record(&self, record: &[u8]) -> Result<usize> {
        let mut core = self.lock_core();
        if core.state == EngineState::Degraded {
            return Err(degraded_error());
        }
        let now = self.now();
        let current_size = core.active.as_ref().map(ActiveFile::len).unwrap_or(0);
        if let Some(cause) =
            self.trigger
                .evaluate(core.bucket.as_deref(), current_size, record.len() as u64, &now)
        {
            if let Err(err) = self.rotate_locked(&mut core, now, cause) {
                if matches!(err, Error::RotationFailed(_)) {
                    return Err(err);
                }
                warn!(%err, "rotation aborted; will retry on the next trigger");
            }
        }
        match core.active.as_mut() {
            Some(active) => active.append(record),
            None => {
                core.state = EngineState::Degraded;
                Err(degraded_error())
            }
        }
    }

    fn flush(&self) -> Result<()> {
        let mut core = self.lock_core();
        match core.active.as_mut() {
            Some(active) => active.flush(),
            None => Err(degraded_error()),
        }
    }

    /// Lazy time-trigger evaluation without a write. Called by the optional
    /// ticker so long-idle processes still rotate promptly at the boundary.
    fn tick(&self) {
        let mut core = self.lock_core();
        if core.state == EngineState::Degraded {
            return;
        }
        let now = self.now();
        let current_size = core.active.as_ref().map(ActiveFile::len).unwrap_or(0);
        if let Some(cause) = self.trigger.evaluate(core.bucket.as_deref(), current_size, 0, &now) {
            if let Err(err) = self.rotate_locked(&mut core, now, cause) {
                warn!(%err, "rotation during tick did not complete");
            }
        }
    }

    fn rotate_now(&self) -> Result<Option<RotationEvent>> {
        let mut core = self.lock_core();
        if core.state == EngineState::Degraded {
            return Err(degraded_error());
        }
        let now = self.now();
        self.rotate_locked(&mut core, now, TriggerCause::Manual)
    }

    /// The `Idle → Rotating → Idle` state machine. Any step failing aborts
    /// the rotation; step 1 (close) or step 4 (reopen) failing with no
    /// fallback leaves the engine `Degraded`.
    fn rotate_locked(
        &self,
        core: &mut Core,
        now: DateTime<FixedOffset>,
        cause: TriggerCause,
    ) -> Result<Option<RotationEvent>> {
        let Some(mut active) = core.active.take() else {
            core.state = EngineState::Degraded;
            return Err(Error::RotationFailed("active file handle is missing".into()));
        };
        core.state = EngineState::Rotating;

        // Step 1: flush and close the active handle.
        if let Err(err) = active.flush() {
            core.state = EngineState::Degraded;
            return Err(Error::RotationFailed(format!(
                "flush before rotation failed: {err}"
            )));
        }
        drop(active);

        let source = self.config.active_path.clone();
        let handoff = if self.config.archive {
            self.stage_archive(core, &source).map(Some)
        } else {
            // Pure rotation without archival: drop the sealed file so the
            // fresh active file starts empty.
            fs::remove_file(&source)
                .map(|()| None)
                .map_err(|err| Error::io(&source, err))
        };

        match handoff {
            Ok(staged) => {
                // Step 4: open the fresh active file before any compression
                // begins, so new writes are never blocked on it.
                let active = match ActiveFile::open(&source, self.config.file_mode, now) {
                    Ok(file) => file,
                    Err(err) => {
                        core.state = EngineState::Degraded;
                        return Err(Error::RotationFailed(format!(
                            "could not open new active file: {err}"
                        )));
                    }
                };
                core.active = Some(active);

                let new_bucket = self.config.pattern.as_ref().map(|p| p.format_bucket(&now));
                core.seq = match &staged {
                    // Same bucket: the sequence keeps climbing. A new bucket
                    // restarts it at 0.
                    Some(named) if new_bucket == core.bucket => named.seq + 1,
                    _ => 0,
                };
                core.bucket = new_bucket;
                core.state = EngineState::Idle;

                let destination = staged.as_ref().map(|named| named.final_path.clone());
                info!(
                    source = %source.display(),
                    ?destination,
                    ?cause,
                    "rotated log file"
                );
                if let (Some(named), Some(worker)) = (staged, &self.worker) {
                    worker
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .submit(MaintenanceTask {
                            staging_path: named.staging_path,
                            final_path: named.final_path,
                            format: self.config.pattern.as_ref().and_then(|p| p.compression()),
                            file_mode: self.config.file_mode,
                        });
                }
                Ok(Some(RotationEvent {
                    timestamp: now,
                    cause,
                    source,
                    destination,
                }))
            }
            Err(err) => {
                // Step 2/3 failed: the sealed file is still in place under
                // its active name. Reopen it and retry rotation on the next
                // trigger evaluation; no data is lost.
                match ActiveFile::open(&source, self.config.file_mode, now) {
                    Ok(file) => {
                        core.active = Some(file);
                        core.state = EngineState::Idle;
                        Err(err)
                    }
                    Err(reopen_err) => {
                        core.state = EngineState::Degraded;
                        Err(Error::RotationFailed(format!(
                            "rotation failed ({err}) and the active file could not be reopened: {reopen_err}"
                        )))
                    }
                }
            }
        }
    }

    /// Steps 2 and 3: compute the destination for the pre-boundary bucket
    /// and rename the sealed file to its staging location.
    fn stage_archive(&self, core: &Core, source: &Path) -> Result<NamedArchive> {
        let namer = self
            .namer
            .as_ref()
            .ok_or_else(|| Error::Config("archiving enabled without a namer".into()))?;
        let bucket = core
            .bucket
            .as_deref()
            .ok_or_else(|| Error::Config("archiving enabled without a time bucket".into()))?;
        let named = namer.next_archive_name(bucket, core.seq)?;
        fs::rename(source, &named.staging_path)
            .map_err(|err| Error::io(&named.staging_path, err))?;
        Ok(named)
    }

    fn shutdown_worker(&self, grace: Duration) {
        if let Some(worker) = &self.worker {
            worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .shutdown(grace);
        }
    }
}

/// Background thread that periodically evaluates the time trigger.
struct Ticker {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Ticker {
    fn spawn(shared: &Arc<Shared>, interval: Duration) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let weak = Arc::downgrade(shared);
        let handle = thread::spawn({
            let stop = Arc::clone(&stop);
            move || {
                let (flag, signal) = &*stop;
                let mut stopped = flag.lock().unwrap_or_else(PoisonError::into_inner);
                loop {
                    let (guard, _) = signal
                        .wait_timeout(stopped, interval)
                        .unwrap_or_else(PoisonError::into_inner);
                    stopped = guard;
                    if *stopped {
                        break;
                    }
                    match weak.upgrade() {
                        Some(shared) => shared.tick(),
                        None => break,
                    }
                }
            }
        });
        Ticker {
            stop,
            handle: Some(handle),
        }
    }

    fn stop(&mut self) {
        let (flag, signal) = &*self.stop;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        signal.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A log-file rotation and archival engine.
///
/// Appends byte records to the active file; on each write (and on periodic
/// ticks, if configured) evaluates the size and calendar-boundary triggers
/// and, when one fires, seals the file into an archive named from the
/// configured pattern, compresses it in the background, and prunes the
/// oldest archives beyond the retention count.
///
/// One logical writer stream is assumed; concurrent threads may share the
/// engine and contend briefly on the internal write-path mutex. If multiple
/// *processes* write to the same active path, behavior is undefined.
pub struct RollingEngine {
    shared: Arc<Shared>,
    ticker: Option<Ticker>,
}

impl RollingEngine {
    pub(crate) fn new(config: RotationConfig) -> Result<Self> {
        config.validate()?;
        let now = Utc::now().with_timezone(&config.time_zone);
        let base_dir = config
            .active_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let trigger = TriggerEvaluator::new(
            config.pattern.as_ref().map(|p| p.date_format().to_string()),
            config.max_active_size,
        );

        let (namer, sweeper) = match (config.archive, &config.pattern) {
            (true, Some(pattern)) => {
                let namer = ArchiveNamer::new(pattern.clone(), &base_dir);
                fs::create_dir_all(namer.archive_dir())
                    .map_err(|err| Error::io(namer.archive_dir(), err))?;
                let sweeper =
                    RetentionSweeper::new(pattern.clone(), &base_dir, config.max_archive_count);
                (Some(namer), Some(sweeper))
            }
            _ => (None, None),
        };

        // A pre-existing non-empty active file belongs to the bucket of its
        // last modification, so a stale file rotates on the first write or
        // tick after a boundary.
        let opened_ts = fs::metadata(&config.active_path)
            .ok()
            .filter(|meta| meta.is_file() && meta.len() > 0)
            .and_then(|meta| meta.modified().ok())
            .map(|mtime| DateTime::<Utc>::from(mtime).with_timezone(&config.time_zone))
            .unwrap_or(now);
        let bucket = config.pattern.as_ref().map(|p| p.format_bucket(&opened_ts));

        // Resume the per-bucket sequence counter from existing archives.
        let seq = match (&bucket, &config.pattern, &sweeper) {
            (Some(bucket), Some(pattern), Some(sweeper)) => pattern
                .bucket_key(bucket)
                .and_then(|key| sweeper.max_seq_in_bucket(key))
                .map(|max| max + 1)
                .unwrap_or(0),
            _ => 0,
        };

        let active = ActiveFile::open(&config.active_path, config.file_mode, now)?;
        let worker = sweeper.map(|sweeper| Mutex::new(MaintenanceWorker::spawn(sweeper)));
        let tick_interval = config.tick_interval;

        let shared = Arc::new(Shared {
            config,
            trigger,
            namer,
            worker,
            core: Mutex::new(Core {
                state: EngineState::Idle,
                active: Some(active),
                bucket,
                seq,
            }),
        });
        let ticker = tick_interval.map(|interval| Ticker::spawn(&shared, interval));

        Ok(RollingEngine { shared, ticker })
    }

    /// Append one encoded record. The trigger check and any resulting
    /// rotation happen atomically before the bytes land, so the triggering
    /// write goes into the fresh file. I/O failures on the append are
    /// returned to the caller, never silently dropped.
    pub fn write_record(&self, record: &[u8]) -> Result<usize> {
        self.shared.write_record(record)
    }

    /// Flush the active file.
    pub fn flush(&self) -> Result<()> {
        self.shared.flush()
    }

    /// Rotate immediately regardless of triggers.
    pub fn rotate_now(&self) -> Result<Option<RotationEvent>> {
        self.shared.rotate_now()
    }

    /// Evaluate the time trigger without writing. Cheap; safe to call from a
    /// timer. Not needed for correctness - an overdue boundary is also
    /// caught lazily by the next write.
    pub fn tick(&self) {
        self.shared.tick()
    }

    /// Whether a failed rotation has put the engine into its terminal
    /// degraded state.
    pub fn is_degraded(&self) -> bool {
        self.shared.lock_core().state == EngineState::Degraded
    }

    /// Current byte length of the active file.
    pub fn active_size(&self) -> u64 {
        self.shared
            .lock_core()
            .active
            .as_ref()
            .map(ActiveFile::len)
            .unwrap_or(0)
    }

    /// How long the current active file has been open.
    pub fn active_age(&self) -> Option<chrono::Duration> {
        let now = self.shared.now();
        self.shared
            .lock_core()
            .active
            .as_ref()
            .map(|active| active.age_since_open(now))
    }

    /// The minimum rotation granularity derived from the archive pattern's
    /// date placeholder, if archiving is configured.
    pub fn granularity(&self) -> Option<Granularity> {
        self.shared.config.pattern.as_ref().map(|p| p.granularity())
    }

    /// Stop the ticker, close the maintenance queue, and wait up to `grace`
    /// for in-flight compression to finish. If the grace period expires the
    /// partially compressed archive is discarded and the uncompressed
    /// original retained.
    pub fn shutdown(mut self, grace: Duration) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
        self.shared.shutdown_worker(grace);
    }
}

impl Drop for RollingEngine {
    fn drop(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
        // The maintenance worker drains with a default grace when the last
        // reference to the shared state is dropped.
    }
}

impl io::Write for RollingEngine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.shared.write_record(buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.shared.flush().map_err(io::Error::other)
    }
}

impl io::Write for &RollingEngine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.shared.write_record(buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.shared.flush().map_err(io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::TimeZone, pattern::ArchivePattern};
    use tempfile::tempdir;

    fn config(dir: &Path, pattern: Option<&str>, max_size: Option<u64>) -> RotationConfig {
        RotationConfig {
            active_path: dir.join("app.log"),
            archive: pattern.is_some(),
            pattern: pattern.map(|p| ArchivePattern::parse(p).unwrap()),
            // High enough that retention never interferes; pruning has its
            // own tests.
            max_archive_count: 100,
            max_active_size: max_size,
            time_zone: TimeZone::UTC.fixed_offset(),
            file_mode: None,
            tick_interval: None,
        }
    }

    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    #[test]
    fn size_rotation_seals_before_the_triggering_write() {
        let dir = tempdir().unwrap();
        let engine =
            RollingEngine::new(config(dir.path(), Some("app-%d.%i.log"), Some(100))).unwrap();

        for _ in 0..3 {
            engine.write_record(&[b'a'; 50]).unwrap();
        }
        engine.flush().unwrap();

        // 100 + 50 > 100: the third write rotated first.
        assert_eq!(engine.active_size(), 50);
        let archive = dir.path().join(format!("app-{}.0.log", today()));
        assert_eq!(fs::read(&archive).unwrap().len(), 100);
        assert_eq!(fs::read(dir.path().join("app.log")).unwrap().len(), 50);
    }

    #[test]
    fn sequence_indices_are_gapless_within_a_bucket() {
        let dir = tempdir().unwrap();
        let engine =
            RollingEngine::new(config(dir.path(), Some("app-%d.%i.log"), Some(10))).unwrap();

        for _ in 0..8 {
            engine.write_record(&[b'x'; 8]).unwrap();
        }
        engine.shutdown(Duration::from_secs(10));

        let today = today();
        for seq in 0..7 {
            assert!(
                dir.path().join(format!("app-{today}.{seq}.log")).exists(),
                "missing sequence {seq}"
            );
        }
        assert!(!dir.path().join(format!("app-{today}.7.log")).exists());
    }

    #[test]
    fn manual_rotation_emits_an_event() {
        let dir = tempdir().unwrap();
        let engine = RollingEngine::new(config(dir.path(), Some("app-%d.%i.log"), None)).unwrap();
        engine.write_record(b"before rotation\n").unwrap();

        let event = engine.rotate_now().unwrap().unwrap();
        assert_eq!(event.cause, TriggerCause::Manual);
        assert_eq!(event.source, dir.path().join("app.log"));
        let destination = event.destination.unwrap();
        assert!(destination.ends_with(format!("app-{}.0.log", today())));

        engine.write_record(b"after rotation\n").unwrap();
        engine.shutdown(Duration::from_secs(10));
        assert_eq!(fs::read(destination).unwrap(), b"before rotation\n");
        assert_eq!(
            fs::read(dir.path().join("app.log")).unwrap(),
            b"after rotation\n"
        );
    }

    #[test]
    fn no_archive_rotation_truncates() {
        let dir = tempdir().unwrap();
        let engine = RollingEngine::new(config(dir.path(), None, Some(100))).unwrap();

        for _ in 0..3 {
            engine.write_record(&[b'z'; 50]).unwrap();
        }
        engine.flush().unwrap();

        assert_eq!(fs::read(dir.path().join("app.log")).unwrap().len(), 50);
        // Nothing else was left behind.
        let files = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[test]
    fn startup_resumes_the_sequence_counter() {
        let dir = tempdir().unwrap();
        let today = today();
        fs::write(dir.path().join(format!("app-{today}.0.log")), b"old").unwrap();
        fs::write(dir.path().join(format!("app-{today}.1.log")), b"old").unwrap();

        let engine =
            RollingEngine::new(config(dir.path(), Some("app-%d.%i.log"), Some(100))).unwrap();
        engine.write_record(&[b'q'; 100]).unwrap();
        engine.write_record(&[b'q'; 50]).unwrap();
        engine.shutdown(Duration::from_secs(10));

        assert!(dir.path().join(format!("app-{today}.2.log")).exists());
    }

    #[test]
    fn reopens_existing_active_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.log"), b"carried over\n").unwrap();

        let engine = RollingEngine::new(config(dir.path(), Some("app-%d.%i.log"), None)).unwrap();
        engine.write_record(b"appended\n").unwrap();
        engine.flush().unwrap();

        assert_eq!(
            fs::read(dir.path().join("app.log")).unwrap(),
            b"carried over\nappended\n"
        );
        assert_eq!(engine.active_size(), 22);
    }

    #[test]
    fn granularity_follows_the_pattern() {
        let dir = tempdir().unwrap();
        let engine =
            RollingEngine::new(config(dir.path(), Some("app-%d{%Y-%m-%d-%H}.log"), None)).unwrap();
        assert_eq!(engine.granularity(), Some(Granularity::Hour));
        assert!(engine.active_age().is_some());
        assert!(!engine.is_degraded());
    }

    #[test]
    fn shared_engine_accepts_concurrent_writers() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(
            RollingEngine::new(config(dir.path(), Some("app-%d.%i.log"), Some(256))).unwrap(),
        );

        let mut handles = Vec::new();
        for _ in 0..4 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    engine.write_record(&[b'w'; 16]).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Every record landed exactly once across the active file and the
        // archives.
        let mut total = fs::read(dir.path().join("app.log")).unwrap().len();
        for entry in fs::read_dir(dir.path()).unwrap().flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("app-") {
                total += fs::metadata(entry.path()).unwrap().len() as usize;
            }
        }
        assert_eq!(total, 4 * 50 * 16);
    }
}
