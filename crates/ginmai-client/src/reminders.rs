//! "Running late?" reminders, delivered by the platform's local scheduler.
//!
//! At most one reminder is pending per moment. Scheduling is best-effort:
//! a platform failure is logged and never surfaces to the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ginmai_shared::notify::Notification;
use ginmai_shared::types::{MomentId, MomentStatus};
use ginmai_shared::GinmaiError;
use ginmai_store::Moment;

use crate::config::ClientConfig;

/// Platform handle for a scheduled local notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReminderHandle(pub u64);

/// The platform's local notification scheduler.
pub trait LocalScheduler: Send + Sync {
    fn schedule_at(&self, at: DateTime<Utc>, notification: Notification) -> Result<ReminderHandle, GinmaiError>;
    fn cancel(&self, handle: ReminderHandle);
}

/// [`LocalScheduler`] backed by tokio timers. Fired notifications are
/// delivered on the receiver returned by [`TokioScheduler::new`].
pub struct TokioScheduler {
    next_id: AtomicU64,
    timers: Mutex<HashMap<u64, JoinHandle<()>>>,
    fired: mpsc::UnboundedSender<Notification>,
}

impl TokioScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            next_id: AtomicU64::new(1),
            timers: Mutex::new(HashMap::new()),
            fired,
        };
        (scheduler, rx)
    }
}

impl LocalScheduler for TokioScheduler {
    fn schedule_at(&self, at: DateTime<Utc>, notification: Notification) -> Result<ReminderHandle, GinmaiError> {
        let delay = (at - Utc::now())
            .to_std()
            .map_err(|_| GinmaiError::validation("reminder time is in the past"))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let fired = self.fired.clone();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if fired.send(notification).is_err() {
                debug!("reminder fired with nobody listening");
            }
        });

        let mut timers = self
            .timers
            .lock()
            .map_err(|_| GinmaiError::unavailable("scheduler lock poisoned"))?;
        timers.retain(|_, t| !t.is_finished());
        timers.insert(id, timer);
        Ok(ReminderHandle(id))
    }

    fn cancel(&self, handle: ReminderHandle) {
        match self.timers.lock() {
            Ok(mut timers) => {
                if let Some(timer) = timers.remove(&handle.0) {
                    timer.abort();
                }
            }
            Err(_) => warn!("scheduler lock poisoned, reminder not cancelled"),
        }
    }
}

/// Why [`ReminderScheduler::sync_moment`] did not leave a reminder pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotInvolved,
    Cancelled,
    AlreadyStarted,
    TooSoon,
    SchedulerFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderOutcome {
    Scheduled(DateTime<Utc>),
    Skipped(SkipReason),
}

pub struct ReminderScheduler {
    platform: Arc<dyn LocalScheduler>,
    pending: HashMap<MomentId, ReminderHandle>,
    lead: chrono::Duration,
    min_delay: chrono::Duration,
}

impl ReminderScheduler {
    pub fn new(platform: Arc<dyn LocalScheduler>, config: &ClientConfig) -> Self {
        Self {
            platform,
            pending: HashMap::new(),
            lead: config.reminder_lead,
            min_delay: config.reminder_min_delay,
        }
    }

    /// Bring the reminder for `moment` in line with its current state.
    ///
    /// Any earlier reminder for the same moment is cancelled first, so a
    /// moment whose start time moved never fires twice.
    pub fn sync_moment(&mut self, moment: &Moment, involved: bool, now: DateTime<Utc>) -> ReminderOutcome {
        self.cancel(moment.id);

        let skip = if !involved {
            Some(SkipReason::NotInvolved)
        } else if moment.status == MomentStatus::Cancelled {
            Some(SkipReason::Cancelled)
        } else if moment.starts_at <= now {
            Some(SkipReason::AlreadyStarted)
        } else if moment.starts_at - self.lead - now <= self.min_delay {
            Some(SkipReason::TooSoon)
        } else {
            None
        };
        if let Some(reason) = skip {
            debug!(moment = %moment.id, ?reason, "no reminder");
            return ReminderOutcome::Skipped(reason);
        }

        let fire_at = moment.starts_at - self.lead;
        let notification = Notification::running_late_reminder(moment.id, moment.place_label());
        match self.platform.schedule_at(fire_at, notification) {
            Ok(handle) => {
                self.pending.insert(moment.id, handle);
                debug!(moment = %moment.id, %fire_at, "reminder scheduled");
                ReminderOutcome::Scheduled(fire_at)
            }
            Err(e) => {
                warn!(moment = %moment.id, error = %e, "could not schedule reminder");
                ReminderOutcome::Skipped(SkipReason::SchedulerFailed)
            }
        }
    }

    /// Sync every moment in `moments` and drop reminders for any other.
    pub fn reconcile<F>(&mut self, moments: &[Moment], involved: F, now: DateTime<Utc>)
    where
        F: Fn(&Moment) -> bool,
    {
        let stale: Vec<MomentId> = self
            .pending
            .keys()
            .filter(|id| !moments.iter().any(|m| m.id == **id))
            .copied()
            .collect();
        for id in stale {
            self.cancel(id);
        }
        for m in moments {
            self.sync_moment(m, involved(m), now);
        }
    }

    pub fn cancel(&mut self, moment: MomentId) -> bool {
        match self.pending.remove(&moment) {
            Some(handle) => {
                self.platform.cancel(handle);
                true
            }
            None => false,
        }
    }

    /// Drop every pending reminder, e.g. on logout.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.pending.drain() {
            self.platform.cancel(handle);
        }
    }

    pub fn is_scheduled(&self, moment: MomentId) -> bool {
        self.pending.contains_key(&moment)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{Duration, TimeZone};
    use ginmai_shared::types::{DurationClass, UserId};
    use ginmai_shared::GeoPoint;

    use super::*;

    /// Records every call instead of touching a real timer.
    #[derive(Default)]
    pub(crate) struct RecordingScheduler {
        pub scheduled: Mutex<Vec<(ReminderHandle, DateTime<Utc>, Notification)>>,
        pub cancelled: Mutex<Vec<ReminderHandle>>,
        pub fail: bool,
    }

    impl LocalScheduler for RecordingScheduler {
        fn schedule_at(&self, at: DateTime<Utc>, notification: Notification) -> Result<ReminderHandle, GinmaiError> {
            if self.fail {
                return Err(GinmaiError::unavailable("notifications disabled"));
            }
            let mut scheduled = self.scheduled.lock().unwrap();
            let handle = ReminderHandle(scheduled.len() as u64 + 1);
            scheduled.push((handle, at, notification));
            Ok(handle)
        }

        fn cancel(&self, handle: ReminderHandle) {
            self.cancelled.lock().unwrap().push(handle);
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 11, 0, 0).unwrap()
    }

    fn moment_starting_in(minutes: i64) -> Moment {
        let starts_at = now() + Duration::minutes(minutes);
        Moment {
            id: MomentId::new(),
            host_id: Some(UserId::new()),
            host_name: "Nok".into(),
            starts_at,
            duration: DurationClass::Normal,
            expires_at: starts_at + Duration::minutes(75),
            location: GeoPoint::new(13.7563, 100.5018),
            place_name: Some("Jay Fai".into()),
            area_name: None,
            seats_total: 2,
            seats_taken: 1,
            note: None,
            status: MomentStatus::Active,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn scheduler(platform: Arc<RecordingScheduler>) -> ReminderScheduler {
        ReminderScheduler::new(platform, &ClientConfig::default())
    }

    #[test]
    fn test_fires_ten_minutes_before_start() {
        let platform = Arc::new(RecordingScheduler::default());
        let mut reminders = scheduler(platform.clone());
        let m = moment_starting_in(60);

        let outcome = reminders.sync_moment(&m, true, now());
        assert_eq!(outcome, ReminderOutcome::Scheduled(now() + Duration::minutes(50)));

        let scheduled = platform.scheduled.lock().unwrap();
        assert!(scheduled[0].2.body.contains("Jay Fai"));
    }

    #[test]
    fn test_too_close_to_start_is_skipped() {
        let mut reminders = scheduler(Arc::new(RecordingScheduler::default()));
        // Fire time would be 20 seconds from now.
        let mut m = moment_starting_in(10);
        m.starts_at += Duration::seconds(20);

        assert_eq!(
            reminders.sync_moment(&m, true, now()),
            ReminderOutcome::Skipped(SkipReason::TooSoon)
        );
        assert_eq!(
            reminders.sync_moment(&moment_starting_in(-5), true, now()),
            ReminderOutcome::Skipped(SkipReason::AlreadyStarted)
        );
    }

    #[test]
    fn test_reschedule_cancels_previous() {
        let platform = Arc::new(RecordingScheduler::default());
        let mut reminders = scheduler(platform.clone());
        let mut m = moment_starting_in(60);

        reminders.sync_moment(&m, true, now());
        m.starts_at += Duration::minutes(30);
        reminders.sync_moment(&m, true, now());

        assert_eq!(reminders.pending(), 1);
        assert_eq!(*platform.cancelled.lock().unwrap(), vec![ReminderHandle(1)]);
    }

    #[test]
    fn test_cancelled_moment_drops_reminder() {
        let platform = Arc::new(RecordingScheduler::default());
        let mut reminders = scheduler(platform.clone());
        let mut m = moment_starting_in(60);

        reminders.sync_moment(&m, true, now());
        m.status = MomentStatus::Cancelled;
        assert_eq!(
            reminders.sync_moment(&m, true, now()),
            ReminderOutcome::Skipped(SkipReason::Cancelled)
        );
        assert!(!reminders.is_scheduled(m.id));
    }

    #[test]
    fn test_platform_failure_is_swallowed() {
        let platform = Arc::new(RecordingScheduler {
            fail: true,
            ..RecordingScheduler::default()
        });
        let mut reminders = scheduler(platform);
        assert_eq!(
            reminders.sync_moment(&moment_starting_in(60), true, now()),
            ReminderOutcome::Skipped(SkipReason::SchedulerFailed)
        );
    }

    #[test]
    fn test_reconcile_and_logout() {
        let platform = Arc::new(RecordingScheduler::default());
        let mut reminders = scheduler(platform.clone());
        let kept = moment_starting_in(60);
        let dropped = moment_starting_in(90);

        reminders.reconcile(&[kept.clone(), dropped.clone()], |_| true, now());
        assert_eq!(reminders.pending(), 2);

        reminders.reconcile(&[kept.clone()], |_| true, now());
        assert!(reminders.is_scheduled(kept.id));
        assert!(!reminders.is_scheduled(dropped.id));

        reminders.cancel_all();
        assert_eq!(reminders.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_fires_and_cancels() {
        let (platform, mut fired) = TokioScheduler::new();
        let at = Utc::now() + Duration::seconds(60);
        platform
            .schedule_at(at, Notification::running_late_reminder(MomentId::new(), "Jay Fai"))
            .unwrap();
        let dropped = platform
            .schedule_at(at, Notification::running_late_reminder(MomentId::new(), "Thipsamai"))
            .unwrap();
        platform.cancel(dropped);

        tokio::time::advance(std::time::Duration::from_secs(61)).await;
        let n = fired.recv().await.unwrap();
        assert!(n.body.contains("Jay Fai"));
        assert!(fired.try_recv().is_err());
    }
}
