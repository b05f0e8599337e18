//! Background proxy build job.
//!
//! Proxies are pre-scaled JPEG frame sequences written next to the source
//! media (or into a user-chosen directory) so scrubbing can decode small
//! files instead of full-resolution media. A build runs on one named worker
//! thread over a shared worklist; the owning timeline keeps a [`ProxyJob`]
//! handle and polls it from its own thread. At most one job runs per
//! timeline; submitting more work while one runs appends to its worklist.
//!
//! Cancellation is cooperative and checked between frames, so a cancel lands
//! mid-item; the partially written size directory is removed rather than
//! left half-built on disk.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use image::codecs::jpeg::JpegEncoder;
use log::{debug, info, warn};

use crate::config::DEFAULT_DIM;
use crate::entities::editing::Editing;
use crate::entities::frame::ImageBuffer;
use crate::entities::strip::{ProxySize, Strip, StripId, StripOps};
use crate::error::Result;
use crate::events::EditEvent;

use super::decode::Decoder;

/// Why a strip was left out of a submitted build. Skips are reported back to
/// the caller, never errors; the rest of the batch proceeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxySkip {
    /// The kind has no proxy support, or proxies are switched off on the strip.
    Disabled,
    /// Proxy generation is on but no output size is selected.
    NoSizes,
    /// An earlier queued strip already builds from the same media file.
    DuplicateSource(PathBuf),
}

impl fmt::Display for ProxySkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxySkip::Disabled => write!(f, "proxy generation disabled"),
            ProxySkip::NoSizes => write!(f, "no proxy sizes selected"),
            ProxySkip::DuplicateSource(p) => {
                write!(f, "already queued for source {}", p.display())
            }
        }
    }
}

/// One work item, snapshotted at submit time so the worker never reads the
/// live graph.
#[derive(Debug, Clone)]
pub struct ProxyItem {
    pub strip_id: StripId,
    strip: Strip,
    pub source: PathBuf,
    pub sizes: Vec<ProxySize>,
    pub quality: u8,
    out_root: PathBuf,
}

impl ProxyItem {
    /// Output directory for one proxy size: `<root>/<file name>_<percent>`.
    pub fn proxy_dir(&self, size: ProxySize) -> PathBuf {
        let file = self
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());
        self.out_root.join(format!("{}_{}", file, size.percent()))
    }

    fn frame_path(dir: &Path, frame: i64) -> PathBuf {
        dir.join(format!("{frame:06}.jpg"))
    }

    fn content_frames(&self) -> i64 {
        self.strip.len().max(0)
    }
}

/// Decide whether (and how) a strip joins a build. `seen` carries the
/// source files already claimed by earlier items of the same worklist.
pub fn plan_item(
    strip: &Strip,
    seen: &mut HashSet<PathBuf>,
) -> std::result::Result<ProxyItem, ProxySkip> {
    if !strip.kind().supports_proxy() {
        return Err(ProxySkip::Disabled);
    }
    let settings = strip.proxy().ok_or(ProxySkip::Disabled)?;
    if !settings.enabled {
        return Err(ProxySkip::Disabled);
    }
    if settings.sizes.is_empty() {
        return Err(ProxySkip::NoSizes);
    }
    let source = strip
        .kind()
        .source_path()
        .ok_or(ProxySkip::Disabled)?
        .to_path_buf();
    if !seen.insert(source.clone()) {
        return Err(ProxySkip::DuplicateSource(source));
    }

    let out_root = settings.custom_dir.clone().unwrap_or_else(|| {
        source
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("proxy")
    });
    Ok(ProxyItem {
        strip_id: strip.id(),
        strip: strip.clone(),
        source,
        sizes: settings.sizes.clone(),
        quality: settings.quality,
        out_root,
    })
}

/// Frame counters shared between the worker and the owning thread.
#[derive(Debug, Default)]
pub struct ProxyProgress {
    done: AtomicU64,
    total: AtomicU64,
}

impl ProxyProgress {
    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.done() as f64 / total as f64
        }
    }

    fn add_total(&self, frames: u64) {
        self.total.fetch_add(frames, Ordering::Relaxed);
    }

    /// Drop frames that will never tick, so `fraction` can still reach 1.0.
    fn retract(&self, frames: u64) {
        self.total.fetch_sub(frames, Ordering::Relaxed);
    }

    fn tick(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }
}

/// What one worklist run produced.
#[derive(Debug, Clone, Default)]
pub struct ProxyReport {
    pub items_built: usize,
    /// Items dropped mid-run because their media went missing.
    pub items_skipped: usize,
    pub frames_written: u64,
    pub cancelled: bool,
    /// Strips whose cached frames are dropped once, when the report is
    /// collected: every built item, plus on cancel the interrupted item and
    /// everything still queued behind it.
    pub strips: Vec<StripId>,
}

/// Shared worklist. The `open` flag is flipped by the worker under the same
/// lock it pops under, so an append can always tell whether its items will
/// still be seen.
#[derive(Debug, Default)]
pub struct Worklist {
    queue: VecDeque<ProxyItem>,
    open: bool,
}

impl Worklist {
    pub fn new(items: Vec<ProxyItem>) -> Self {
        Self {
            queue: items.into(),
            open: true,
        }
    }
}

pub type ProxyWorklist = Arc<Mutex<Worklist>>;

/// Drain a worklist, writing proxy frame sequences until it is empty or
/// `cancel` is raised. Runs on the worker thread; tests call it directly.
pub fn run_worklist(
    worklist: &Mutex<Worklist>,
    cancel: &AtomicBool,
    progress: &ProxyProgress,
    decoder: &dyn Decoder,
) -> ProxyReport {
    let mut report = ProxyReport::default();

    loop {
        let item = {
            let mut list = worklist.lock().unwrap_or_else(|e| e.into_inner());
            let next = list.queue.pop_front();
            if next.is_none() {
                list.open = false;
            }
            next
        };
        let Some(item) = item else {
            break;
        };

        let frames = item.content_frames();
        progress.add_total(frames as u64 * item.sizes.len() as u64);
        info!(
            "proxy: building {} ({} frames, {} sizes)",
            item.source.display(),
            frames,
            item.sizes.len()
        );

        match build_item(&item, cancel, progress, decoder, &mut report) {
            Ok(BuildOutcome::Built) => {
                report.items_built += 1;
                report.strips.push(item.strip_id);
            }
            Ok(BuildOutcome::SkippedMissing) => {
                report.items_skipped += 1;
            }
            Ok(BuildOutcome::Cancelled) => {
                report.cancelled = true;
                // The interrupted item and everything still queued had
                // cache entries riding on a build that never happened.
                report.strips.push(item.strip_id);
                let mut list = worklist.lock().unwrap_or_else(|e| e.into_inner());
                list.open = false;
                report.strips.extend(list.queue.iter().map(|i| i.strip_id));
                return report;
            }
            Err(err) => {
                warn!("proxy: {} failed: {err}", item.source.display());
            }
        }
    }
    report
}

enum BuildOutcome {
    Built,
    /// Media went missing mid-build; every size directory was removed.
    SkippedMissing,
    /// Cancel landed mid-item; the partial output was removed.
    Cancelled,
}

/// Build every size of one item.
fn build_item(
    item: &ProxyItem,
    cancel: &AtomicBool,
    progress: &ProxyProgress,
    decoder: &dyn Decoder,
    report: &mut ProxyReport,
) -> Result<BuildOutcome> {
    let expected = item.content_frames() as u64 * item.sizes.len() as u64;
    let mut ticked: u64 = 0;
    for size in &item.sizes {
        let dir = item.proxy_dir(*size);
        fs::create_dir_all(&dir)?;

        for frame in 0..item.content_frames() {
            if cancel.load(Ordering::Relaxed) {
                debug!("proxy: cancelled, removing partial {}", dir.display());
                let _ = fs::remove_dir_all(&dir);
                return Ok(BuildOutcome::Cancelled);
            }

            let Some(decoded) = decoder.decode(&item.strip, frame, DEFAULT_DIM) else {
                warn!(
                    "proxy: no frame {frame} from {}, skipping item",
                    item.source.display()
                );
                for s in &item.sizes {
                    let _ = fs::remove_dir_all(item.proxy_dir(*s));
                }
                report.frames_written -= ticked;
                progress.retract(expected - ticked);
                return Ok(BuildOutcome::SkippedMissing);
            };
            let (w, h) = decoded.dim();
            let target = (
                ((w as f64 * size.fraction()) as usize).max(1),
                ((h as f64 * size.fraction()) as usize).max(1),
            );
            let scaled = decoded.scaled_to(target.0, target.1);
            write_jpeg(&ProxyItem::frame_path(&dir, frame), &scaled, item.quality)?;
            report.frames_written += 1;
            ticked += 1;
            progress.tick();
        }
    }
    Ok(BuildOutcome::Built)
}

fn write_jpeg(path: &Path, buf: &ImageBuffer, quality: u8) -> Result<()> {
    let (w, h) = buf.dim();
    // JPEG carries no alpha.
    let mut rgb = Vec::with_capacity(w * h * 3);
    for px in buf.data().chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }
    let writer = BufWriter::new(fs::File::create(path)?);
    JpegEncoder::new_with_quality(writer, quality)
        .encode(&rgb, w as u32, h as u32, image::ExtendedColorType::Rgb8)
        .map_err(|e| anyhow::anyhow!("jpeg encode {}: {e}", path.display()))?;
    Ok(())
}

/// Handle to a running build, owned by the timeline.
#[derive(Debug)]
pub struct ProxyJob {
    worklist: ProxyWorklist,
    cancel: Arc<AtomicBool>,
    progress: Arc<ProxyProgress>,
    report_rx: Receiver<ProxyReport>,
    handle: Option<JoinHandle<()>>,
}

impl ProxyJob {
    fn spawn(items: Vec<ProxyItem>, decoder: Arc<dyn Decoder>) -> Self {
        let worklist: ProxyWorklist = Arc::new(Mutex::new(Worklist::new(items)));
        let cancel = Arc::new(AtomicBool::new(false));
        let progress = Arc::new(ProxyProgress::default());
        let (report_tx, report_rx) = crossbeam_channel::bounded(1);

        let handle = {
            let worklist = Arc::clone(&worklist);
            let cancel = Arc::clone(&cancel);
            let progress = Arc::clone(&progress);
            std::thread::Builder::new()
                .name("splice-proxy".to_string())
                .spawn(move || {
                    let report = run_worklist(&worklist, &cancel, &progress, &decoder);
                    let _ = report_tx.send(report);
                })
                .ok()
        };

        Self {
            worklist,
            cancel,
            progress,
            report_rx,
            handle,
        }
    }

    /// Queue more items onto the running build. Returns the items back when
    /// the worker already decided to exit; the caller spawns a fresh job
    /// with them.
    fn append(&self, items: Vec<ProxyItem>) -> Option<Vec<ProxyItem>> {
        let mut list = self.worklist.lock().unwrap_or_else(|e| e.into_inner());
        if !list.open {
            return Some(items);
        }
        list.queue.extend(items);
        None
    }

    pub fn queued_sources(&self) -> HashSet<PathBuf> {
        let list = self.worklist.lock().unwrap_or_else(|e| e.into_inner());
        list.queue.iter().map(|i| i.source.clone()).collect()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    pub fn progress(&self) -> (u64, u64) {
        (self.progress.done(), self.progress.total())
    }

    fn try_report(&self) -> Option<ProxyReport> {
        self.report_rx.try_recv().ok()
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProxyJob {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}

/// What a submission did: which strips joined the worklist and which were
/// skipped, with reasons.
#[derive(Debug, Default)]
pub struct ProxySubmission {
    pub queued: Vec<StripId>,
    pub skipped: Vec<(StripId, ProxySkip)>,
}

impl Editing {
    /// Queue a proxy build for the given strips. Ineligible strips are
    /// reported as skips; when a job is already running the new items join
    /// its worklist (deduplicated against what it still has queued).
    pub fn submit_proxy_build(
        &mut self,
        ids: &[StripId],
        decoder: Arc<dyn Decoder>,
    ) -> Result<ProxySubmission> {
        // Flush a finished-but-uncollected job first so its report (and
        // cache invalidation) is not lost when the slot is reused.
        self.poll_proxy();

        let mut seen = match self.proxy_slot() {
            Some(job) if !job.is_finished() => job.queued_sources(),
            _ => HashSet::new(),
        };

        let mut submission = ProxySubmission::default();
        let mut items = Vec::new();
        for id in ids {
            let strip = self.strip(*id)?;
            match plan_item(strip, &mut seen) {
                Ok(item) => {
                    submission.queued.push(*id);
                    items.push(item);
                }
                Err(skip) => {
                    warn!("proxy: skipping '{}': {skip}", strip.name());
                    submission.skipped.push((*id, skip));
                }
            }
        }
        if items.is_empty() {
            return Ok(submission);
        }

        let slot = self.proxy_slot();
        if let Some(job) = slot.as_ref() {
            if !job.is_finished() {
                match job.append(items) {
                    None => return Ok(submission),
                    // The worker drained the queue and exited between the
                    // finished check and the append.
                    Some(back) => items = back,
                }
            }
        }
        *slot = Some(ProxyJob::spawn(items, decoder));
        Ok(submission)
    }

    /// Raise the cancel flag on the running build, if any. The worker stops
    /// between frames; collect the report through [`Editing::poll_proxy`].
    pub fn cancel_proxy(&mut self) {
        if let Some(job) = self.proxy_slot() {
            job.cancel();
        }
    }

    pub fn proxy_progress(&mut self) -> Option<(u64, u64)> {
        self.proxy_slot().as_ref().map(|job| job.progress())
    }

    /// Collect a finished build. On the first poll that sees the report the
    /// built strips' cached frames are dropped (exactly once) and
    /// [`EditEvent::ProxyFinished`] fires.
    pub fn poll_proxy(&mut self) -> Option<ProxyReport> {
        let report = self.proxy_slot().as_ref().and_then(|job| job.try_report())?;
        if let Some(mut job) = self.proxy_slot().take() {
            job.join();
        }
        for id in &report.strips {
            self.invalidate_strip_caches(*id);
        }
        self.events().emit(EditEvent::ProxyFinished {
            items_built: report.items_built,
            cancelled: report.cancelled,
        });
        Some(report)
    }
}
