//! Background maintenance: compression of just-rotated files and the
//! retention sweep. Runs on a dedicated worker thread so the write path is
//! never blocked on compression.

use {
    flate2::write::GzEncoder,
    std::{
        fs::{self, File},
        io::{self, Write as _},
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicBool, Ordering},
            mpsc, Arc, Condvar, Mutex, PoisonError,
        },
        thread,
        time::{Duration, Instant},
    },
    tracing::{debug, warn},
    zip::{write::SimpleFileOptions, ZipWriter},
};

use crate::{
    error::{Error, Result},
    pattern::CompressionFormat,
    retention::RetentionSweeper,
    writer::set_permissions,
};

const COPY_CHUNK: usize = 64 * 1024;

/// Compress `source` into `target` atomically: the output is written to a
/// `.tmp` sibling first, then renamed over the target and the source removed.
/// On failure or cancellation the temporary is deleted and the source left in
/// place uncompressed, where the retention sweeper still sees it.
pub(crate) fn compress_file(
    source: &Path,
    target: &Path,
    format: CompressionFormat,
    cancel: &AtomicBool,
) -> Result<()> {
    let tmp = temp_path(target);
    match write_compressed(source, &tmp, format, cancel) {
        Ok(()) => {
            fs::rename(&tmp, target).map_err(|err| Error::io(target, err))?;
            fs::remove_file(source).map_err(|err| Error::io(source, err))?;
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            Err(err)
        }
    }
}

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    target.with_file_name(name)
}

fn write_compressed(
    source: &Path,
    tmp: &Path,
    format: CompressionFormat,
    cancel: &AtomicBool,
) -> Result<()> {
    let infile = File::open(source).map_err(|err| Error::io(source, err))?;
    let mut reader = io::BufReader::new(infile);
    let outfile = File::create(tmp).map_err(|err| Error::io(tmp, err))?;

    match format {
        CompressionFormat::Gzip => {
            let writer = io::BufWriter::new(outfile);
            let mut encoder = GzEncoder::new(writer, flate2::Compression::default());
            copy_cancellable(&mut reader, &mut encoder, cancel, source, tmp)?;
            let mut writer = encoder.finish().map_err(|err| Error::io(tmp, err))?;
            writer.flush().map_err(|err| Error::io(tmp, err))?;
        }
        CompressionFormat::Zip => {
            let mut zip = ZipWriter::new(outfile);
            let entry = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "log".to_string());
            zip.start_file(entry, SimpleFileOptions::default())
                .map_err(|err| Error::io(tmp, io::Error::other(err)))?;
            copy_cancellable(&mut reader, &mut zip, cancel, source, tmp)?;
            zip.finish().map_err(|err| Error::io(tmp, io::Error::other(err)))?;
        }
    }
    Ok(())
}

/// Chunked copy that checks the cancellation flag between chunks, so a
/// shutdown whose grace period expired can abandon a half-written archive.
fn copy_cancellable<R: io::Read, W: io::Write>(
    reader: &mut R,
    writer: &mut W,
    cancel: &AtomicBool,
    source: &Path,
    tmp: &Path,
) -> Result<()> {
    let mut buf = [0u8; COPY_CHUNK];
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::io(
                tmp,
                io::Error::new(io::ErrorKind::Interrupted, "compression cancelled at shutdown"),
            ));
        }
        let n = reader.read(&mut buf).map_err(|err| Error::io(source, err))?;
        if n == 0 {
            return Ok(());
        }
        writer
            .write_all(&buf[..n])
            .map_err(|err| Error::io(tmp, err))?;
    }
}

/// One unit of post-rotation work handed off by the coordinator.
#[derive(Debug)]
pub(crate) struct MaintenanceTask {
    pub staging_path: PathBuf,
    pub final_path: PathBuf,
    pub format: Option<CompressionFormat>,
    pub file_mode: Option<u32>,
}

/// The background worker thread. Tasks are independent and individually
/// atomic; errors are logged at warn level and never reach the write path.
pub(crate) struct MaintenanceWorker {
    sender: Option<mpsc::Sender<MaintenanceTask>>,
    handle: Option<thread::JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    drained: Arc<(Mutex<bool>, Condvar)>,
}

impl MaintenanceWorker {
    pub fn spawn(sweeper: RetentionSweeper) -> Self {
        let (sender, receiver) = mpsc::channel::<MaintenanceTask>();
        let cancel = Arc::new(AtomicBool::new(false));
        let drained = Arc::new((Mutex::new(false), Condvar::new()));

        let handle = thread::spawn({
            let cancel = Arc::clone(&cancel);
            let drained = Arc::clone(&drained);
            move || {
                while let Ok(task) = receiver.recv() {
                    run_task(&task, &sweeper, &cancel);
                }
                let (done, signal) = &*drained;
                *done.lock().unwrap_or_else(PoisonError::into_inner) = true;
                signal.notify_all();
            }
        });

        MaintenanceWorker {
            sender: Some(sender),
            handle: Some(handle),
            cancel,
            drained,
        }
    }

    pub fn submit(&self, task: MaintenanceTask) {
        if let Some(sender) = &self.sender {
            // Send only fails if the worker already exited, in which case the
            // staging file simply stays uncompressed.
            let _ = sender.send(task);
        }
    }

    /// Close the queue and wait up to `grace` for in-flight work to finish.
    /// If the grace period expires, the cancellation flag is raised: the
    /// compressor discards its partial output and the uncompressed staging
    /// file is retained as the archive.
    pub fn shutdown(&mut self, grace: Duration) {
        self.sender.take();

        let deadline = Instant::now() + grace;
        let (done, signal) = &*self.drained;
        let mut finished = done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*finished {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let (guard, _) = signal
                .wait_timeout(finished, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            finished = guard;
        }
        let completed = *finished;
        drop(finished);

        if completed {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        } else {
            self.cancel.store(true, Ordering::Relaxed);
            warn!("shutdown grace period expired; abandoning in-flight compression");
        }
    }
}

impl Drop for MaintenanceWorker {
    fn drop(&mut self) {
        if self.sender.is_some() {
            self.shutdown(Duration::from_secs(5));
        }
    }
}

fn run_task(task: &MaintenanceTask, sweeper: &RetentionSweeper, cancel: &AtomicBool) {
    if let Some(format) = task.format {
        match compress_file(&task.staging_path, &task.final_path, format, cancel) {
            Ok(()) => {
                debug!(path = %task.final_path.display(), "compressed rotated log file");
                if let Err(err) = set_permissions(&task.final_path, task.file_mode) {
                    warn!(path = %task.final_path.display(), %err, "failed to set archive permissions");
                }
            }
            Err(err) => {
                warn!(
                    path = %task.staging_path.display(),
                    %err,
                    "failed to compress rotated log file; keeping it uncompressed"
                );
            }
        }
    }
    for path in sweeper.prune() {
        debug!(path = %path.display(), "pruned old archive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn gzip_round_trip() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("app-2024-01-15.0.log");
        let target = dir.path().join("app-2024-01-15.0.log.gz");
        let content = b"line one\nline two\nline three\n".repeat(500);
        fs::write(&source, &content).unwrap();

        compress_file(&source, &target, CompressionFormat::Gzip, &AtomicBool::new(false)).unwrap();
        assert!(!source.exists());
        assert!(!dir.path().join("app-2024-01-15.0.log.gz.tmp").exists());

        let mut decoder = flate2::read::GzDecoder::new(File::open(&target).unwrap());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, content);
    }

    #[test]
    fn zip_round_trip() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("app-2024-01-15.0.log");
        let target = dir.path().join("app-2024-01-15.0.log.zip");
        let content = b"zipped log content\n".repeat(200);
        fs::write(&source, &content).unwrap();

        compress_file(&source, &target, CompressionFormat::Zip, &AtomicBool::new(false)).unwrap();
        assert!(!source.exists());

        let mut archive = zip::ZipArchive::new(File::open(&target).unwrap()).unwrap();
        let mut entry = archive.by_index(0).unwrap();
        assert_eq!(entry.name(), "app-2024-01-15.0.log");
        let mut decompressed = Vec::new();
        entry.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, content);
    }

    #[test]
    fn missing_source_leaves_no_temporary() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("gone.log");
        let target = dir.path().join("gone.log.gz");

        let err =
            compress_file(&source, &target, CompressionFormat::Gzip, &AtomicBool::new(false))
                .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(!target.exists());
        assert!(!dir.path().join("gone.log.gz.tmp").exists());
    }

    #[test]
    fn cancellation_keeps_the_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("app.log");
        let target = dir.path().join("app.log.gz");
        fs::write(&source, b"data that will never be compressed").unwrap();

        let err = compress_file(&source, &target, CompressionFormat::Gzip, &AtomicBool::new(true))
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(source.exists());
        assert!(!target.exists());
        assert!(!dir.path().join("app.log.gz.tmp").exists());
    }

    #[test]
    fn worker_compresses_and_prunes() {
        let dir = tempdir().unwrap();
        let pattern = crate::pattern::ArchivePattern::parse("app-%d.%i.log.gz").unwrap();
        let sweeper = RetentionSweeper::new(pattern, dir.path(), 1);

        for (bucket, seq) in [("2024-01-14", 0), ("2024-01-15", 0)] {
            fs::write(
                dir.path().join(format!("app-{bucket}.{seq}.log")),
                format!("content for {bucket}").as_bytes(),
            )
            .unwrap();
        }

        let mut worker = MaintenanceWorker::spawn(sweeper);
        for bucket in ["2024-01-14", "2024-01-15"] {
            worker.submit(MaintenanceTask {
                staging_path: dir.path().join(format!("app-{bucket}.0.log")),
                final_path: dir.path().join(format!("app-{bucket}.0.log.gz")),
                format: Some(CompressionFormat::Gzip),
                file_mode: None,
            });
        }
        worker.shutdown(Duration::from_secs(10));

        // Newest archive compressed and kept; older one pruned by the sweep.
        assert!(dir.path().join("app-2024-01-15.0.log.gz").exists());
        assert!(!dir.path().join("app-2024-01-14.0.log.gz").exists());
        assert!(!dir.path().join("app-2024-01-14.0.log").exists());
    }
}
