//! Session support types used by the drone session
//!
//! These are currently all crate-private; some might be useful for user code
//! as well, lets make them public when needed.

use crate::{Error, Result};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

/// A FLIGHT_DATA gap longer than this counts as a lost connection.
pub(crate) const LIVENESS_WINDOW: Duration = Duration::from_secs(3);

const ACK_SPACE: usize = 1 << 16;
const WORD_BITS: usize = 64;

/// Acknowledgement bookkeeping for the full 16-bit sequence space
///
/// A dense bit-set instead of a map: constant-time lookup, no allocation per
/// command, and no stale-key cleanup since the sequence counter wraps over
/// the same slots. Waiters park on a [Notify] and re-check their bit on every
/// transition.
pub(crate) struct AckRegistry {
    bits: Mutex<Box<[u64]>>,
    notify: Notify,
}

impl AckRegistry {
    pub(crate) fn new() -> Self {
        Self {
            bits: Mutex::new(vec![0u64; ACK_SPACE / WORD_BITS].into_boxed_slice()),
            notify: Notify::new(),
        }
    }

    /// Clear the slot for a freshly assigned sequence number
    pub(crate) fn mark_pending(&self, seq_num: u16) {
        let mut bits = self.bits.lock().unwrap();
        bits[seq_num as usize / WORD_BITS] &= !(1u64 << (seq_num as usize % WORD_BITS));
    }

    /// Record an acknowledgement and wake every waiter
    pub(crate) fn mark_acked(&self, seq_num: u16) {
        {
            let mut bits = self.bits.lock().unwrap();
            bits[seq_num as usize / WORD_BITS] |= 1u64 << (seq_num as usize % WORD_BITS);
        }
        self.notify.notify_waiters();
    }

    fn is_acked(&self, seq_num: u16) -> bool {
        let bits = self.bits.lock().unwrap();
        bits[seq_num as usize / WORD_BITS] & (1u64 << (seq_num as usize % WORD_BITS)) != 0
    }

    /// Wait until `seq_num` is acknowledged or the deadline passes
    ///
    /// An acknowledgement recorded before the call completes immediately.
    pub(crate) async fn wait_acked(&self, seq_num: u16, deadline: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + deadline;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for wakeups before checking, so a mark_acked between
            // the check and the await cannot be missed.
            notified.as_mut().enable();

            if self.is_acked(seq_num) {
                return Ok(());
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(Error::AckTimeout);
            }
        }
    }
}

/// What a FLIGHT_DATA arrival meant for the connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LivenessEdge {
    /// disconnected -> connected; the caller runs the initialization sequence
    Connected,
    /// Already connected, timestamp refreshed
    Refreshed,
    /// The gap since the previous packet exceeded the liveness window; the
    /// next packet will reconnect
    Dropped,
}

/// Connection liveness driven by FLIGHT_DATA arrivals
///
/// The flag is only re-evaluated when a packet arrives; in a total blackout
/// it keeps its last value until traffic resumes.
pub(crate) struct ConnectionTracker {
    connected: bool,
    last_update: Option<Instant>,
}

impl ConnectionTracker {
    pub(crate) fn new() -> Self {
        Self {
            connected: false,
            last_update: None,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn on_flight_data(&mut self, now: Instant) -> LivenessEdge {
        let edge = match self.last_update {
            Some(previous) if now.saturating_duration_since(previous) > LIVENESS_WINDOW => {
                self.connected = false;
                LivenessEdge::Dropped
            }
            _ => {
                if self.connected {
                    LivenessEdge::Refreshed
                } else {
                    self.connected = true;
                    LivenessEdge::Connected
                }
            }
        };
        self.last_update = Some(now);
        edge
    }
}

/// Wall-clock time of day, as the control packet carries it
pub(crate) struct TimeOfDay {
    pub(crate) hours: u8,
    pub(crate) minutes: u8,
    pub(crate) seconds: u8,
    pub(crate) millis: u16,
}

pub(crate) fn time_of_day() -> TimeOfDay {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    let day_seconds = since_epoch.as_secs() % 86_400;

    TimeOfDay {
        hours: (day_seconds / 3_600) as u8,
        minutes: (day_seconds % 3_600 / 60) as u8,
        seconds: (day_seconds % 60) as u8,
        millis: since_epoch.subsec_millis() as u16,
    }
}

/// Calendar date and time of day, for GET_CURRENT_TIME replies
pub(crate) struct CivilDateTime {
    pub(crate) year: u16,
    pub(crate) month: u16,
    pub(crate) day: u16,
    pub(crate) time: TimeOfDay,
}

pub(crate) fn civil_date_time() -> CivilDateTime {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    let (year, month, day) = civil_from_days((since_epoch.as_secs() / 86_400) as i64);

    CivilDateTime {
        year: year as u16,
        month: month as u16,
        day: day as u16,
        time: time_of_day(),
    }
}

// Days-since-epoch to Gregorian date (Hinnant's civil_from_days).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;

    (if month <= 2 { year + 1 } else { year }, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn ack_recorded_before_wait_completes_immediately() {
        let acks = AckRegistry::new();
        acks.mark_pending(42);
        acks.mark_acked(42);

        acks.wait_acked(42, Duration::from_secs(10)).await.unwrap();
    }

    #[tokio::test]
    async fn waiter_is_woken_by_later_ack() {
        let acks = Arc::new(AckRegistry::new());
        acks.mark_pending(7);

        let waiter = {
            let acks = acks.clone();
            tokio::spawn(async move { acks.wait_acked(7, Duration::from_secs(10)).await })
        };

        tokio::task::yield_now().await;
        acks.mark_acked(7);

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_times_out() {
        let acks = AckRegistry::new();
        acks.mark_pending(9);

        let result = acks.wait_acked(9, Duration::from_secs(10)).await;
        assert!(matches!(result, Err(Error::AckTimeout)));
    }

    #[tokio::test]
    async fn reassigned_sequence_number_becomes_pending_again() {
        let acks = AckRegistry::new();
        acks.mark_pending(3);
        acks.mark_acked(3);
        acks.mark_pending(3);

        let result = acks.wait_acked(3, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::AckTimeout)));
    }

    #[test]
    fn first_flight_data_connects() {
        let mut tracker = ConnectionTracker::new();
        assert!(!tracker.is_connected());

        let edge = tracker.on_flight_data(Instant::now());
        assert_eq!(edge, LivenessEdge::Connected);
        assert!(tracker.is_connected());
    }

    #[test]
    fn gap_beyond_window_drops_and_next_packet_reconnects() {
        let mut tracker = ConnectionTracker::new();
        let t0 = Instant::now();

        assert_eq!(tracker.on_flight_data(t0), LivenessEdge::Connected);

        // 4 s of silence: the flag clears, and only the packet after the
        // stale one re-triggers the connected edge.
        let t1 = t0 + Duration::from_secs(4);
        assert_eq!(tracker.on_flight_data(t1), LivenessEdge::Dropped);
        assert!(!tracker.is_connected());

        let t2 = t1 + Duration::from_millis(500);
        assert_eq!(tracker.on_flight_data(t2), LivenessEdge::Connected);
        assert!(tracker.is_connected());
    }

    #[test]
    fn steady_traffic_refreshes() {
        let mut tracker = ConnectionTracker::new();
        let t0 = Instant::now();

        tracker.on_flight_data(t0);
        for i in 1..5 {
            let edge = tracker.on_flight_data(t0 + Duration::from_secs(i));
            assert_eq!(edge, LivenessEdge::Refreshed);
        }
    }

    #[test]
    fn civil_from_days_matches_known_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(18_262), (2020, 1, 1));
        assert_eq!(civil_from_days(19_789), (2024, 3, 7));
        assert_eq!(civil_from_days(11_016), (2000, 2, 29));
    }
}
