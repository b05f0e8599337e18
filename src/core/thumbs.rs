//! Thumbnail cache with background decode.
//!
//! Thumbnails are bucketed per strip (one thumbnail stands in for
//! [`THUMB_FRAME_STEP`] consecutive frames). A query that misses exactly
//! returns the nearest cached frame for that strip, if any, while the exact
//! frame is decoded in the background. Completed decodes come back through a
//! channel and are merged into the map by [`ThumbCache::drain_completed`] on
//! the owning thread; workers never touch the map.
//!
//! Requests are deduplicated per key and carry a cancel flag, so scrolling
//! the timeline can drop decode work that fell out of view before a worker
//! picks it up.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};
use indexmap::IndexSet;
use log::debug;

use crate::config::{THUMB_CACHE_ENTRIES, THUMB_FRAME_STEP, THUMB_MAX_DIM};
use crate::core::decode::Decoder;
use crate::core::workers::Workers;
use crate::entities::frame::ImageBuffer;
use crate::entities::strip::{Strip, StripId};

pub type ThumbKey = (StripId, i64);

struct ThumbResult {
    key: ThumbKey,
    thumb: Option<ImageBuffer>,
    /// The request's cancel flag; checked again at merge time so a result
    /// sent just before an invalidation is not resurrected.
    cancel: Arc<AtomicBool>,
}

pub struct ThumbCache {
    entries: HashMap<ThumbKey, ImageBuffer>,
    /// Recency order for eviction; front = oldest.
    order: IndexSet<ThumbKey>,
    /// In-flight decode requests with their cancel flags.
    in_flight: HashMap<ThumbKey, Arc<AtomicBool>>,
    capacity: usize,
    results_tx: Sender<ThumbResult>,
    results_rx: Receiver<ThumbResult>,
    /// Spawned on the first request; headless editing never pays for it.
    pool: Option<Workers>,
}

impl ThumbCache {
    pub fn new(capacity: usize) -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            entries: HashMap::new(),
            order: IndexSet::new(),
            in_flight: HashMap::new(),
            capacity: capacity.max(1),
            results_tx,
            results_rx,
            pool: None,
        }
    }

    /// Frame bucket this timeline frame belongs to.
    pub fn bucket_of(frame: i64) -> i64 {
        frame.div_euclid(THUMB_FRAME_STEP) * THUMB_FRAME_STEP
    }

    /// Exact thumbnail, or the nearest cached one for the strip while the
    /// exact frame decodes in the background. `None` means nothing is cached
    /// for this strip yet (a request is still enqueued).
    pub fn get_or_request(
        &mut self,
        strip: &Strip,
        frame: i64,
        decoder: &Arc<dyn Decoder>,
    ) -> Option<ImageBuffer> {
        self.drain_completed();

        let key = (strip.id(), Self::bucket_of(frame));
        if let Some(thumb) = self.entries.get(&key) {
            let thumb = thumb.clone();
            self.touch(key);
            return Some(thumb);
        }

        self.request(strip, key, decoder);
        self.nearest(strip.id(), key.1)
    }

    fn request(&mut self, strip: &Strip, key: ThumbKey, decoder: &Arc<dyn Decoder>) {
        if self.in_flight.contains_key(&key) {
            return; // Already decoding this bucket.
        }

        let cancel = Arc::new(AtomicBool::new(false));
        self.in_flight.insert(key, Arc::clone(&cancel));

        let strip = strip.clone();
        let decoder = Arc::clone(decoder);
        let tx = self.results_tx.clone();
        let pool = self
            .pool
            .get_or_insert_with(Workers::with_default_size);
        pool.execute(move || {
            if cancel.load(Ordering::Relaxed) {
                return; // Discarded before we got to it.
            }
            let thumb = decoder
                .decode(&strip, key.1, (THUMB_MAX_DIM, THUMB_MAX_DIM))
                .map(|buf| buf.thumbnail(THUMB_MAX_DIM));
            if cancel.load(Ordering::Relaxed) {
                return;
            }
            let _ = tx.send(ThumbResult { key, thumb, cancel });
        });
    }

    /// Merge completed background decodes into the map. Called on the owning
    /// thread; returns immediately when nothing arrived.
    pub fn drain_completed(&mut self) {
        while let Ok(result) = self.results_rx.try_recv() {
            if result.cancel.load(Ordering::Relaxed) {
                // Invalidated after the worker sent it; the in-flight entry
                // is already gone.
                continue;
            }
            self.in_flight.remove(&result.key);
            let Some(thumb) = result.thumb else {
                continue; // Missing media: no thumbnail, presence cache reports it.
            };
            self.insert(result.key, thumb);
        }
    }

    fn insert(&mut self, key: ThumbKey, thumb: ImageBuffer) {
        self.entries.insert(key, thumb);
        self.touch(key);
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.shift_remove_index(0) else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    fn touch(&mut self, key: ThumbKey) {
        self.order.shift_remove(&key);
        self.order.insert(key);
    }

    /// Nearest cached bucket for the strip, by frame distance.
    fn nearest(&self, strip: StripId, bucket: i64) -> Option<ImageBuffer> {
        self.entries
            .iter()
            .filter(|((id, _), _)| *id == strip)
            .min_by_key(|((_, b), _)| (b - bucket).abs())
            .map(|(_, thumb)| thumb.clone())
    }

    /// Cancel in-flight requests that fell out of the visible timeline
    /// rectangle: a strip no longer on screen, or a frame outside the view's
    /// frame range.
    pub fn discard_requests_outside(&mut self, visible: &[StripId], frames: (i64, i64)) {
        let before = self.in_flight.len();
        self.in_flight.retain(|(strip, bucket), cancel| {
            let keep = visible.contains(strip) && *bucket >= frames.0 && *bucket < frames.1;
            if !keep {
                cancel.store(true, Ordering::Relaxed);
            }
            keep
        });
        let dropped = before - self.in_flight.len();
        if dropped > 0 {
            debug!("thumbs: discarded {dropped} stale requests");
        }
    }

    /// Drop cached thumbnails (and cancel pending decodes) for one strip.
    pub fn invalidate_strip(&mut self, strip: StripId) {
        self.entries.retain(|(id, _), _| *id != strip);
        self.order.retain(|(id, _)| *id != strip);
        self.in_flight.retain(|(id, _), cancel| {
            if *id == strip {
                cancel.store(true, Ordering::Relaxed);
                return false;
            }
            true
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        for cancel in self.in_flight.values() {
            cancel.store(true, Ordering::Relaxed);
        }
        self.in_flight.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

impl Default for ThumbCache {
    fn default() -> Self {
        Self::new(THUMB_CACHE_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    /// Decoder stub producing solids and counting calls.
    struct CountingDecoder {
        calls: AtomicUsize,
    }

    impl CountingDecoder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Decoder for CountingDecoder {
        fn decode(&self, _strip: &Strip, _frame: i64, size: (usize, usize)) -> Option<ImageBuffer> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(ImageBuffer::solid(size.0, size.1, [50, 50, 50, 255]))
        }
    }

    fn decoder_arc(d: &Arc<CountingDecoder>) -> Arc<dyn Decoder> {
        Arc::clone(d) as Arc<dyn Decoder>
    }

    fn clip() -> Strip {
        Strip::movie("clip", "/media/a.mp4", 1, 0, 200)
    }

    fn wait_for_thumbs(cache: &mut ThumbCache) {
        for _ in 0..200 {
            cache.drain_completed();
            if cache.in_flight_count() == 0 {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("thumbnail decodes did not complete");
    }

    #[test]
    fn miss_requests_then_hit_after_drain() {
        let mut cache = ThumbCache::new(16);
        let decoder = CountingDecoder::new();
        let strip = clip();

        assert!(cache.get_or_request(&strip, 30, &decoder_arc(&decoder)).is_none());
        assert_eq!(cache.in_flight_count(), 1);
        wait_for_thumbs(&mut cache);

        let hit = cache.get_or_request(&strip, 30, &decoder_arc(&decoder));
        assert!(hit.is_some());
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frames_in_one_bucket_share_a_request() {
        let mut cache = ThumbCache::new(16);
        let decoder = CountingDecoder::new();
        let strip = clip();

        // Same bucket, repeated queries: at most one in-flight request.
        for frame in [25, 26, 49] {
            let _ = cache.get_or_request(&strip, frame, &decoder_arc(&decoder));
        }
        assert_eq!(cache.in_flight_count(), 1);
        wait_for_thumbs(&mut cache);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nearest_cached_frame_substitutes() {
        let mut cache = ThumbCache::new(16);
        let decoder = CountingDecoder::new();
        let strip = clip();

        let _ = cache.get_or_request(&strip, 0, &decoder_arc(&decoder));
        wait_for_thumbs(&mut cache);

        // Exact miss at a far bucket returns the frame-0 thumbnail while the
        // new decode is in flight.
        let fallback = cache.get_or_request(&strip, 150, &decoder_arc(&decoder));
        assert!(fallback.is_some());
        assert_eq!(cache.in_flight_count(), 1);
    }

    #[test]
    fn discard_outside_view_cancels_requests() {
        let mut cache = ThumbCache::new(16);
        let decoder = CountingDecoder::new();
        let strip = clip();

        let _ = cache.get_or_request(&strip, 0, &decoder_arc(&decoder));
        let _ = cache.get_or_request(&strip, 100, &decoder_arc(&decoder));
        assert_eq!(cache.in_flight_count(), 2);

        // View shows only frames [0, 50); the frame-100 request is dropped.
        cache.discard_requests_outside(&[strip.id()], (0, 50));
        assert_eq!(cache.in_flight_count(), 1);

        // A strip scrolled fully out of view loses all its requests.
        cache.discard_requests_outside(&[], (0, 50));
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[test]
    fn eviction_keeps_recent_entries() {
        let mut cache = ThumbCache::new(2);
        let decoder = CountingDecoder::new();
        let strip = clip();

        for frame in [0, 25, 50] {
            let _ = cache.get_or_request(&strip, frame, &decoder_arc(&decoder));
            wait_for_thumbs(&mut cache);
        }
        assert_eq!(cache.len(), 2);
        // Oldest bucket evicted; most recent two remain.
        assert!(!cache.entries.contains_key(&(strip.id(), 0)));
        assert!(cache.entries.contains_key(&(strip.id(), 50)));
    }

    #[test]
    fn invalidate_strip_drops_entries_and_requests() {
        let mut cache = ThumbCache::new(16);
        let decoder = CountingDecoder::new();
        let strip = clip();
        let other = clip();

        let _ = cache.get_or_request(&strip, 0, &decoder_arc(&decoder));
        let _ = cache.get_or_request(&other, 0, &decoder_arc(&decoder));
        wait_for_thumbs(&mut cache);
        let _ = cache.get_or_request(&strip, 100, &decoder_arc(&decoder));

        cache.invalidate_strip(strip.id());
        assert_eq!(cache.in_flight_count(), 0);
        assert!(cache.get_or_request(&other, 0, &decoder_arc(&decoder)).is_some());
    }

    #[test]
    fn invalidation_discards_results_already_decoded() {
        let mut cache = ThumbCache::new(16);
        let decoder = CountingDecoder::new();
        let strip = clip();

        let _ = cache.get_or_request(&strip, 0, &decoder_arc(&decoder));
        // Let the decode finish and its result land in the channel.
        while decoder.calls.load(Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(2));
        }
        std::thread::sleep(Duration::from_millis(20));

        cache.invalidate_strip(strip.id());
        cache.drain_completed();
        assert!(cache.is_empty());
        // The stale request no longer blocks a fresh one for the same bucket.
        let _ = cache.get_or_request(&strip, 0, &decoder_arc(&decoder));
        assert_eq!(cache.in_flight_count(), 1);
    }

    #[test]
    fn missing_media_yields_no_thumbnail() {
        struct MissingDecoder;
        impl Decoder for MissingDecoder {
            fn decode(&self, _: &Strip, _: i64, _: (usize, usize)) -> Option<ImageBuffer> {
                None
            }
        }

        let mut cache = ThumbCache::new(16);
        let decoder: Arc<dyn Decoder> = Arc::new(MissingDecoder);
        let strip = clip();

        assert!(cache.get_or_request(&strip, 0, &decoder).is_none());
        wait_for_thumbs(&mut cache);
        assert!(cache.is_empty());
        // Retry is allowed once the failed request has drained.
        let _ = cache.get_or_request(&strip, 0, &decoder);
        assert_eq!(cache.in_flight_count(), 1);
    }
}
