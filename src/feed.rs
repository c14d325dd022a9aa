//! Paced frame feeding from a still group into an encode session.
//!
//! The feeder walks the group's stills in timestamp order, composes each one
//! into a pooled buffer, and hands the frame to the session once the writer
//! is ready. An in-flight gate bounds how many composed frames can exist at
//! the same time, so memory use stays flat no matter how large the group is.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::catalog::{FrameGroup, StillImage};
use crate::compose::Compositor;
use crate::core::CancelToken;
use crate::encode::{CompositedFrame, EncodeSession};
use crate::error::{LapseError, LapseResult};
use crate::pool::{FrameBuffer, FrameBufferPool};

/// What a feed does when a single still fails to compose.
///
/// Buffer allocation failures are always fatal regardless of policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameErrorPolicy {
    /// Stop the export on the first still that fails.
    #[default]
    Abort,
    /// Log the failure and continue without the still.
    Skip,
}

/// Counters reported by a completed [`FrameFeeder::feed`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// Stills composed into canvas frames.
    pub frames_composed: u64,
    /// Frames appended to the session.
    pub frames_appended: u64,
    /// Stills dropped under [`FrameErrorPolicy::Skip`].
    pub frames_skipped: u64,
}

/// Why a feed stopped before processing every still.
#[derive(Debug)]
pub enum FeedInterrupt {
    /// The cancel token was observed between frames.
    Cancelled,
    /// A frame failed and the policy stops the export there.
    Fatal(LapseError),
}

#[derive(Default)]
struct GateState {
    held: usize,
    max_held: usize,
}

/// Counting permits over composed-but-not-yet-appended frames.
///
/// `acquire` blocks on a condvar until a permit is free; dropping the permit
/// releases it. `max_held` records the high-water mark for reporting.
pub struct InflightGate {
    capacity: usize,
    state: Mutex<GateState>,
    freed: Condvar,
}

impl InflightGate {
    /// Create a gate with the given capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(GateState::default()),
            freed: Condvar::new(),
        }
    }

    /// Number of permits the gate hands out.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks until a permit is free, then takes it.
    pub fn acquire(&self) -> InflightPermit<'_> {
        let mut state = self.lock();
        while state.held >= self.capacity {
            state = self
                .freed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.held += 1;
        state.max_held = state.max_held.max(state.held);
        InflightPermit { gate: self }
    }

    /// Highest number of permits held at once so far.
    pub fn max_held(&self) -> usize {
        self.lock().max_held
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        let mut state = self.lock();
        state.held = state.held.saturating_sub(1);
        self.freed.notify_one();
    }
}

impl Default for InflightGate {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Permit taken from an [`InflightGate`]; dropping it frees the slot.
pub struct InflightPermit<'a> {
    gate: &'a InflightGate,
}

impl Drop for InflightPermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// Streams one frame group into an encode session at a fixed cadence.
pub struct FrameFeeder<'a> {
    compositor: &'a Compositor,
    pool: &'a FrameBufferPool,
    gate: &'a InflightGate,
    frame_duration: Duration,
    policy: FrameErrorPolicy,
}

impl<'a> FrameFeeder<'a> {
    /// Create a feeder over the given compositor, pool, and gate.
    pub fn new(
        compositor: &'a Compositor,
        pool: &'a FrameBufferPool,
        gate: &'a InflightGate,
        frame_duration: Duration,
    ) -> Self {
        Self {
            compositor,
            pool,
            gate,
            frame_duration,
            policy: FrameErrorPolicy::default(),
        }
    }

    /// Replace the per-still error policy (defaults to abort).
    pub fn with_policy(mut self, policy: FrameErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Composes and appends every still in ascending timestamp order.
    ///
    /// Presentation times advance by one frame duration per appended frame,
    /// so a skipped still leaves no gap in the track. Cancellation is
    /// observed between frames only; a frame in flight is always carried to
    /// its append. `on_progress` receives `(processed, total)` after each
    /// still.
    ///
    /// The session is left open: the caller finishes or aborts it.
    pub fn feed(
        &self,
        group: &FrameGroup,
        session: &mut EncodeSession,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(u64, u64),
    ) -> Result<FeedStats, FeedInterrupt> {
        let ordered = group.sorted();
        let total = ordered.len() as u64;
        let mut stats = FeedStats::default();

        for (done, still) in ordered.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(
                    appended = stats.frames_appended,
                    total,
                    "feed cancelled"
                );
                return Err(FeedInterrupt::Cancelled);
            }

            let permit = self.gate.acquire();
            let frame = match self.compose_still(still) {
                Ok(buffer) => buffer,
                Err(e) => {
                    let fatal = self.policy == FrameErrorPolicy::Abort
                        || matches!(e, LapseError::Allocation(_));
                    if fatal {
                        return Err(FeedInterrupt::Fatal(e));
                    }
                    stats.frames_skipped += 1;
                    tracing::warn!(id = still.id.0, error = %e, "skipping still");
                    drop(permit);
                    on_progress(done as u64 + 1, total);
                    continue;
                }
            };
            stats.frames_composed += 1;

            let pts = self.frame_duration * stats.frames_appended as u32;
            if let Err(e) = session.wait_until_ready() {
                return Err(FeedInterrupt::Fatal(e));
            }
            if let Err(e) = session.append(CompositedFrame::new(frame, pts)) {
                return Err(FeedInterrupt::Fatal(e));
            }
            stats.frames_appended += 1;
            drop(permit);
            on_progress(done as u64 + 1, total);
        }

        tracing::debug!(
            composed = stats.frames_composed,
            appended = stats.frames_appended,
            skipped = stats.frames_skipped,
            "feed complete"
        );
        Ok(stats)
    }

    fn compose_still(&self, still: &StillImage) -> LapseResult<FrameBuffer> {
        let mut buffer = self.pool.allocate()?;
        self.compositor.compose(still, &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StillSource;
    use crate::core::CanvasSpec;
    use crate::encode::MemorySink;

    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{Local, TimeZone};

    const FRAME: Duration = Duration::from_millis(250);

    fn canvas() -> CanvasSpec {
        CanvasSpec::new(2, 2)
    }

    fn raw_still(shade: u8) -> StillSource {
        let px = [shade, shade, shade, 255];
        StillSource::Raw {
            width: 2,
            height: 2,
            rgba: Arc::from(px.repeat(4)),
        }
    }

    fn group_of(shades: &[u8]) -> FrameGroup {
        let mut group = FrameGroup::new("test");
        for (i, &shade) in shades.iter().enumerate() {
            let ts = Local.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap();
            group.push(ts, raw_still(shade));
        }
        group
    }

    fn start_session(name: &str) -> (EncodeSession, crate::encode::MemoryTap, PathBuf) {
        let sink = MemorySink::new();
        let tap = sink.tap();
        let dest =
            std::env::temp_dir().join(format!("lapse_feed_{}_{}.mp4", name, std::process::id()));
        let session = EncodeSession::start(Box::new(sink), &dest, canvas(), FRAME).unwrap();
        (session, tap, dest)
    }

    #[test]
    fn gate_never_exceeds_capacity() {
        let gate = Arc::new(InflightGate::new(1));
        let busy = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            let busy = Arc::clone(&busy);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let _permit = gate.acquire();
                    assert_eq!(busy.fetch_add(1, Ordering::SeqCst), 0);
                    std::thread::yield_now();
                    busy.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(gate.max_held(), 1);
    }

    #[test]
    fn feeds_in_timestamp_order_with_paced_pts() {
        // Insertion order deliberately disagrees with timestamp order.
        let mut group = FrameGroup::new("test");
        let base = 1_700_000_000;
        for (offset, shade) in [(2i64, 30u8), (0, 10), (1, 20)] {
            let ts = Local.timestamp_opt(base + offset, 0).unwrap();
            group.push(ts, raw_still(shade));
        }

        let compositor = Compositor::new(canvas());
        let pool = FrameBufferPool::new(canvas());
        let gate = InflightGate::new(1);
        let feeder = FrameFeeder::new(&compositor, &pool, &gate, FRAME);
        let (mut session, tap, _dest) = start_session("order");

        let cancel = CancelToken::new();
        let mut seen = Vec::new();
        let stats = feeder
            .feed(&group, &mut session, &cancel, |done, total| {
                seen.push((done, total))
            })
            .unwrap();
        session.finish().unwrap();

        assert_eq!(stats.frames_appended, 3);
        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(
            tap.presentation_times(),
            vec![FRAME * 0, FRAME * 1, FRAME * 2]
        );
        // First byte of each frame is the shade, so order is observable.
        let shades: Vec<u8> = tap.frames().iter().map(|(_, data)| data[0]).collect();
        assert_eq!(shades, vec![10, 20, 30]);
        assert_eq!(gate.max_held(), 1);
    }

    #[test]
    fn skip_policy_drops_bad_stills_without_pts_gaps() {
        let mut group = group_of(&[10, 20]);
        // A source that cannot be decoded, timestamped between the two.
        let ts = Local.timestamp_opt(1_700_000_000, 500_000_000).unwrap();
        group.push(ts, StillSource::Encoded(Arc::from(b"not an image".to_vec())));

        let compositor = Compositor::new(canvas());
        let pool = FrameBufferPool::new(canvas());
        let gate = InflightGate::new(1);
        let feeder =
            FrameFeeder::new(&compositor, &pool, &gate, FRAME).with_policy(FrameErrorPolicy::Skip);
        let (mut session, tap, _dest) = start_session("skip");

        let stats = feeder
            .feed(&group, &mut session, &CancelToken::new(), |_, _| {})
            .unwrap();
        session.finish().unwrap();

        assert_eq!(stats.frames_composed, 2);
        assert_eq!(stats.frames_appended, 2);
        assert_eq!(stats.frames_skipped, 1);
        assert_eq!(tap.presentation_times(), vec![FRAME * 0, FRAME * 1]);
    }

    #[test]
    fn abort_policy_stops_on_first_bad_still() {
        let mut group = group_of(&[10]);
        let ts = Local.timestamp_opt(1_700_000_010, 0).unwrap();
        group.push(ts, StillSource::Encoded(Arc::from(b"not an image".to_vec())));

        let compositor = Compositor::new(canvas());
        let pool = FrameBufferPool::new(canvas());
        let gate = InflightGate::new(1);
        let feeder = FrameFeeder::new(&compositor, &pool, &gate, FRAME);
        let (mut session, tap, _dest) = start_session("abort");

        let interrupt = feeder
            .feed(&group, &mut session, &CancelToken::new(), |_, _| {})
            .unwrap_err();
        assert!(matches!(
            interrupt,
            FeedInterrupt::Fatal(LapseError::Composition(_))
        ));

        session.abort();
        assert!(tap.discarded());
    }

    #[test]
    fn cancellation_is_observed_between_frames() {
        let group = group_of(&[1, 2, 3, 4, 5]);
        let compositor = Compositor::new(canvas());
        let pool = FrameBufferPool::new(canvas());
        let gate = InflightGate::new(1);
        let feeder = FrameFeeder::new(&compositor, &pool, &gate, FRAME);
        let (mut session, tap, _dest) = start_session("cancel");

        let cancel = CancelToken::new();
        let trip = cancel.clone();
        let interrupt = feeder
            .feed(&group, &mut session, &cancel, |done, _| {
                if done == 2 {
                    trip.cancel();
                }
            })
            .unwrap_err();
        assert!(matches!(interrupt, FeedInterrupt::Cancelled));

        // The permit cap held and the interrupted feed released its permit;
        // a fresh acquire must not block.
        assert_eq!(gate.max_held(), 1);
        drop(gate.acquire());

        session.abort();
        // Both frames processed before the trip were fully appended.
        assert_eq!(tap.frame_count(), 2);
    }
}
