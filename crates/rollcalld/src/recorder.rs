//! Daily attendance recording.
//!
//! Per (identity, date) the only transition is `Unmarked -> Present`. The
//! store's uniqueness constraint decides races; the pre-check merely avoids
//! a pointless write.

use chrono::NaiveDate;
use rollcall_core::Identity;
use rollcall_store::{
    AttendanceRecord, AttendanceStatus, AttendanceStore, InsertOutcome, NewAttendance, StoreError,
};

#[derive(Debug, Clone, PartialEq)]
pub enum MarkDecision {
    Recorded(AttendanceRecord),
    AlreadyMarked,
}

pub struct Recorder {
    store: Box<dyn AttendanceStore>,
}

impl Recorder {
    pub fn new(store: Box<dyn AttendanceStore>) -> Self {
        Self { store }
    }

    /// Record `identity` present on `date`, at most once.
    pub fn mark_present(
        &self,
        identity: &Identity,
        date: NaiveDate,
        remarks: Option<&str>,
    ) -> Result<MarkDecision, StoreError> {
        if self.store.is_marked(identity, date)? {
            tracing::debug!(identity = %identity, %date, "already marked");
            return Ok(MarkDecision::AlreadyMarked);
        }

        let outcome = self.store.insert(NewAttendance {
            identity,
            date,
            status: AttendanceStatus::Present,
            remarks,
        })?;

        match outcome {
            InsertOutcome::Inserted(record) => {
                tracing::info!(identity = %identity, %date, id = record.id, "attendance recorded");
                Ok(MarkDecision::Recorded(record))
            }
            InsertOutcome::Duplicate => {
                tracing::warn!(identity = %identity, %date, "concurrent mark won the insert");
                Ok(MarkDecision::AlreadyMarked)
            }
        }
    }

    pub fn records(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.store.records(from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::id;
    use rollcall_store::SqliteAttendanceStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_mark_twice_same_day() {
        let recorder = Recorder::new(Box::new(SqliteAttendanceStore::open_in_memory().unwrap()));
        let alice = id("alice");

        let first = recorder.mark_present(&alice, date("2024-01-10"), None).unwrap();
        assert!(matches!(first, MarkDecision::Recorded(_)));
        let second = recorder.mark_present(&alice, date("2024-01-10"), None).unwrap();
        assert_eq!(second, MarkDecision::AlreadyMarked);

        assert_eq!(recorder.records(None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_next_day_is_a_new_state() {
        let recorder = Recorder::new(Box::new(SqliteAttendanceStore::open_in_memory().unwrap()));
        let alice = id("alice");
        recorder.mark_present(&alice, date("2024-01-10"), None).unwrap();
        let next = recorder.mark_present(&alice, date("2024-01-11"), None).unwrap();
        assert!(matches!(next, MarkDecision::Recorded(_)));
    }

    /// Store whose pre-check always misses, as when a concurrent request
    /// inserts between the check and the insert.
    struct RacingStore {
        inner: SqliteAttendanceStore,
        inserts: Arc<AtomicUsize>,
    }

    impl AttendanceStore for RacingStore {
        fn is_marked(&self, _: &Identity, _: NaiveDate) -> Result<bool, StoreError> {
            Ok(false)
        }

        fn insert(&self, record: NewAttendance<'_>) -> Result<InsertOutcome, StoreError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.inner.insert(record)
        }

        fn records(
            &self,
            from: Option<NaiveDate>,
            to: Option<NaiveDate>,
        ) -> Result<Vec<AttendanceRecord>, StoreError> {
            self.inner.records(from, to)
        }
    }

    #[test]
    fn test_lost_race_reports_already_marked() {
        let inserts = Arc::new(AtomicUsize::new(0));
        let recorder = Recorder::new(Box::new(RacingStore {
            inner: SqliteAttendanceStore::open_in_memory().unwrap(),
            inserts: inserts.clone(),
        }));
        let alice = id("alice");

        recorder.mark_present(&alice, date("2024-01-10"), None).unwrap();
        let second = recorder.mark_present(&alice, date("2024-01-10"), None).unwrap();

        assert_eq!(second, MarkDecision::AlreadyMarked);
        assert_eq!(inserts.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.records(None, None).unwrap().len(), 1);
    }
}
