//! Sessions-directory watcher.
//!
//! Observes one directory and turns bursts of file events into a single
//! payload-free "changed" signal. Subscribers always do a full reload, so the
//! signal only has to say *that* something changed.
//!
//! # Debounce
//!
//! The first relevant event opens a window of `debounce`; events inside the
//! window are absorbed; when it closes, exactly one signal fires.
//!
//! # Re-arming
//!
//! OS watch primitives can error out under load, and a watch on a directory
//! that is deleted and recreated silently goes dead. Either way the watch is
//! torn down and re-created after `rearm_delay`. Every successful arm,
//! including the first, fires one signal so subscribers reconcile whatever
//! happened while nothing was watching. The loop only ends when the notifier
//! is stopped or the subscriber goes away.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::{FocusError, Result};
use crate::store::session_file_stem;

/// Upper bound on how long the loop blocks before re-checking the stop flag.
const IDLE_TICK: Duration = Duration::from_millis(250);

/// Fixed-window debounce: the first event schedules a fire `quiet` later.
#[derive(Debug, Clone)]
pub struct Debouncer {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            deadline: None,
        }
    }

    pub fn record(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.quiet);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// True exactly once per window, when `now` has reached its end.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Background watch on a sessions directory. Stops when dropped.
pub struct DirectoryNotifier {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DirectoryNotifier {
    /// Starts watching `dir`. `on_change` runs on the watcher thread once per
    /// debounced burst; returning `false` ends the watch.
    pub fn spawn<F>(
        dir: PathBuf,
        debounce: Duration,
        rearm_delay: Duration,
        on_change: F,
    ) -> Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("focus-watcher".to_string())
            .spawn(move || watch_loop(&dir, debounce, rearm_delay, &thread_stop, on_change))
            .map_err(|err| FocusError::io("Failed to spawn watcher thread", err))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DirectoryNotifier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn watch_loop<F>(
    dir: &Path,
    debounce: Duration,
    rearm_delay: Duration,
    stop: &AtomicBool,
    mut on_change: F,
) where
    F: FnMut() -> bool,
{
    while !stop.load(Ordering::SeqCst) {
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let (watcher, armed) = match arm(dir, tx) {
            Ok(armed) => armed,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "Failed to arm directory watch; retrying");
                sleep_unless_stopped(rearm_delay, stop);
                continue;
            }
        };
        info!(dir = %dir.display(), "Watching sessions directory");

        // Anything may have changed while the watch was not armed.
        if !on_change() {
            return;
        }

        let mut debouncer = Debouncer::new(debounce);
        loop {
            if stop.load(Ordering::SeqCst) {
                return;
            }

            let timeout = debouncer
                .deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_TICK)
                .min(IDLE_TICK);

            match rx.recv_timeout(timeout) {
                Ok(Ok(event)) => {
                    if removes_dir(&event, dir) {
                        warn!(dir = %dir.display(), "Watched directory removed; re-arming");
                        break;
                    }
                    if is_relevant(&event) {
                        debouncer.record(Instant::now());
                    }
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "Directory watch errored; re-arming");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Directory watch channel closed; re-arming");
                    break;
                }
            }

            // inotify drops a watch on a deleted directory without reporting an error
            if dir_identity(dir) != Some(armed) {
                warn!(dir = %dir.display(), "Watched directory replaced; re-arming");
                break;
            }

            if debouncer.take_due(Instant::now()) && !on_change() {
                debug!("Change subscriber gone; stopping watcher");
                return;
            }
        }

        drop(watcher);
        sleep_unless_stopped(rearm_delay, stop);
    }
}

/// Device and inode of a directory; constant while the same directory exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DirIdentity {
    dev: u64,
    ino: u64,
}

fn dir_identity(dir: &Path) -> Option<DirIdentity> {
    let metadata = std::fs::metadata(dir).ok().filter(|metadata| metadata.is_dir())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Some(DirIdentity {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        Some(DirIdentity { dev: 0, ino: 0 })
    }
}

/// Arms a watch on `dir` and returns it with the identity of the directory it
/// is attached to. The identity is taken before the watch so a replacement in
/// between is caught by the next identity check.
fn arm(
    dir: &Path,
    tx: mpsc::Sender<notify::Result<Event>>,
) -> Result<(RecommendedWatcher, DirIdentity)> {
    fs_err::create_dir_all(dir)
        .map_err(|err| FocusError::io("Failed to create watched directory", err))?;
    let identity = dir_identity(dir).ok_or_else(|| {
        FocusError::io(
            "Watched directory vanished while arming",
            io::Error::from(io::ErrorKind::NotFound),
        )
    })?;
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok((watcher, identity))
}

fn removes_dir(event: &Event, dir: &Path) -> bool {
    matches!(event.kind, EventKind::Remove(_)) && event.paths.iter().any(|path| path == dir)
}

/// Create/modify/remove of a `<id>.json` file. Temp files and access events
/// are noise.
fn is_relevant(event: &Event) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    );
    kind_matches
        && event
            .paths
            .iter()
            .any(|path| session_file_stem(path).is_some())
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        thread::sleep(remaining.min(IDLE_TICK));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};
    use std::sync::mpsc::Receiver;
    use tempfile::tempdir;

    #[test]
    fn debouncer_fires_once_per_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        assert!(!debouncer.take_due(start));

        debouncer.record(start);
        debouncer.record(start + Duration::from_millis(10));
        debouncer.record(start + Duration::from_millis(40));
        assert!(!debouncer.take_due(start + Duration::from_millis(49)));
        assert!(debouncer.take_due(start + Duration::from_millis(50)));
        assert!(!debouncer.take_due(start + Duration::from_millis(60)));
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn only_session_files_are_relevant() {
        let session = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/s/ppid-1.json"));
        let temp = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/s/.tmpX1y2"));
        let access = Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("/s/ppid-1.json"));
        let rename = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/s/.tmpX1y2"))
            .add_path(PathBuf::from("/s/ppid-2.json"));

        assert!(is_relevant(&session));
        assert!(!is_relevant(&temp));
        assert!(!is_relevant(&access));
        assert!(is_relevant(&rename));
    }

    fn spawn_counting(dir: PathBuf) -> (DirectoryNotifier, Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        let notifier = DirectoryNotifier::spawn(
            dir,
            Duration::from_millis(50),
            Duration::from_millis(100),
            move || tx.send(()).is_ok(),
        )
        .unwrap();
        (notifier, rx)
    }

    /// Waits for the signal every arm fires, then lets trailing signals drain.
    fn wait_until_armed(rx: &Receiver<()>) {
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        while rx.recv_timeout(Duration::from_millis(200)).is_ok() {}
    }

    #[test]
    fn first_arm_fires_one_catch_up_signal() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("sessions");
        fs_err::create_dir_all(&dir).unwrap();
        fs_err::write(dir.join("ppid-1.json"), "{}").unwrap();

        let (notifier, rx) = spawn_counting(dir);
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        notifier.stop();
    }

    #[test]
    fn burst_of_writes_produces_exactly_one_signal() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("sessions");
        let (notifier, rx) = spawn_counting(dir.clone());
        wait_until_armed(&rx);

        for i in 0..5 {
            fs_err::write(dir.join(format!("ppid-{}.json", i)), "{}").unwrap();
        }

        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        notifier.stop();
    }

    #[test]
    fn recreated_directory_is_watched_again() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("sessions");
        let (notifier, rx) = spawn_counting(dir.clone());
        wait_until_armed(&rx);

        fs_err::write(dir.join("ppid-1.json"), "{}").unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());

        fs_err::remove_dir_all(&dir).unwrap();
        fs_err::create_dir_all(&dir).unwrap();
        // the re-arm announces itself with a catch-up signal
        wait_until_armed(&rx);

        fs_err::write(dir.join("ppid-2.json"), "{}").unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        notifier.stop();
    }

    #[test]
    fn directory_identity_changes_when_recreated() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("sessions");
        fs_err::create_dir_all(&dir).unwrap();
        let before = dir_identity(&dir).unwrap();
        assert_eq!(dir_identity(&dir), Some(before));

        fs_err::remove_dir_all(&dir).unwrap();
        assert!(dir_identity(&dir).is_none());
    }

    #[test]
    fn removal_of_the_watched_directory_is_recognised() {
        let dir = PathBuf::from("/s");
        let gone = Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(dir.clone());
        let file = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("/s/ppid-1.json"));
        assert!(removes_dir(&gone, &dir));
        assert!(!removes_dir(&file, &dir));
    }

    #[test]
    fn creates_missing_directory() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("not-yet");
        let (notifier, _rx) = spawn_counting(dir.clone());
        thread::sleep(Duration::from_millis(300));
        assert!(dir.is_dir());
        notifier.stop();
    }
}
