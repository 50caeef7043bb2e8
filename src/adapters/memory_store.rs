use crate::domain::model::{
    BookingRequest, CancelOutcome, DietitianId, InsertOutcome, PatientId, Reservation,
    ReservationEvent, ReservationId, ReservationStatus, SlotKey,
};
use crate::domain::ports::{ReservationEvents, ReservationStore};
use crate::utils::error::{BookingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, Mutex};

const EVENT_CAPACITY: usize = 256;

#[derive(Default)]
struct MemoryState {
    reservations: HashMap<ReservationId, Reservation>,
    /// 未取消預約的唯一性索引
    active: HashMap<SlotKey, ReservationId>,
}

/// 行程內的預約儲存；條件插入在鎖內完成，因此是原子性的
pub struct MemoryReservationStore {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<ReservationEvent>,
    offline: AtomicBool,
}

impl MemoryReservationStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            events,
            offline: AtomicBool::new(false),
        }
    }

    /// 模擬儲存層中斷，之後所有操作回傳 StorageUnavailable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.reservations.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BookingError::StorageUnavailable {
                message: "in-memory store is offline".to_string(),
            });
        }
        Ok(())
    }

    fn publish(&self, event: ReservationEvent) {
        // 沒有訂閱者時 send 會失敗，可忽略
        let _ = self.events.send(event);
    }
}

impl Default for MemoryReservationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReservationStore for MemoryReservationStore {
    async fn insert_if_absent(
        &self,
        request: &BookingRequest,
        created_at: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        self.ensure_online()?;
        let key = request.slot_key();

        let reservation = {
            let mut state = self.state.lock().await;
            if state.active.contains_key(&key) {
                return Ok(InsertOutcome::Conflict);
            }

            let reservation = Reservation {
                id: ReservationId::generate(),
                dietitian_id: request.dietitian_id.clone(),
                patient_id: request.patient_id.clone(),
                date: request.date,
                slot_time: request.slot_time,
                status: ReservationStatus::Confirmed,
                created_at,
                cancelled_at: None,
            };
            state.active.insert(key.clone(), reservation.id);
            state
                .reservations
                .insert(reservation.id, reservation.clone());
            reservation
        };

        self.publish(ReservationEvent::Booked(key));
        Ok(InsertOutcome::Inserted(reservation))
    }

    async fn list_active(
        &self,
        dietitian: &DietitianId,
        date: NaiveDate,
    ) -> Result<BTreeSet<NaiveTime>> {
        self.ensure_online()?;
        let state = self.state.lock().await;
        Ok(state
            .active
            .keys()
            .filter(|key| &key.dietitian_id == dietitian && key.date == date)
            .map(|key| key.slot_time)
            .collect())
    }

    async fn cancel(&self, id: ReservationId, cancelled_at: DateTime<Utc>) -> Result<CancelOutcome> {
        self.ensure_online()?;

        let reservation = {
            let mut state = self.state.lock().await;
            let Some(reservation) = state.reservations.get_mut(&id) else {
                return Ok(CancelOutcome::NotFound);
            };
            if !reservation.status.is_active() {
                return Ok(CancelOutcome::AlreadyCancelled(reservation.clone()));
            }

            reservation.status = ReservationStatus::Cancelled;
            reservation.cancelled_at = Some(cancelled_at);
            let reservation = reservation.clone();
            state.active.remove(&reservation.slot_key());
            reservation
        };

        self.publish(ReservationEvent::Cancelled(reservation.slot_key()));
        Ok(CancelOutcome::Cancelled(reservation))
    }

    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>> {
        self.ensure_online()?;
        Ok(self.state.lock().await.reservations.get(&id).cloned())
    }

    async fn count_active_for_patient_between(
        &self,
        patient: &PatientId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<u32> {
        self.ensure_online()?;
        let state = self.state.lock().await;
        let count = state
            .reservations
            .values()
            .filter(|r| {
                r.status.is_active() && &r.patient_id == patient && r.date >= from && r.date <= to
            })
            .count();
        Ok(count as u32)
    }

    async fn list_for_dietitian(
        &self,
        dietitian: &DietitianId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>> {
        self.ensure_online()?;
        let state = self.state.lock().await;
        let mut reservations: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| &r.dietitian_id == dietitian && r.date >= from && r.date <= to)
            .cloned()
            .collect();
        reservations.sort_by(|a, b| {
            (a.date, a.slot_time, a.created_at).cmp(&(b.date, b.slot_time, b.created_at))
        });
        Ok(reservations)
    }
}

#[async_trait]
impl ReservationEvents for MemoryReservationStore {
    async fn subscribe(&self) -> Result<broadcast::Receiver<ReservationEvent>> {
        self.ensure_online()?;
        Ok(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn request(slot: (u32, u32), patient: &str) -> BookingRequest {
        BookingRequest::new(
            DietitianId::new("D1"),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            NaiveTime::from_hms_opt(slot.0, slot.1, 0).unwrap(),
            PatientId::new(patient),
        )
    }

    #[tokio::test]
    async fn test_insert_then_conflict() {
        let store = MemoryReservationStore::new();

        let first = store.insert_if_absent(&request((10, 0), "P1"), Utc::now()).await.unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));

        let second = store.insert_if_absent(&request((10, 0), "P2"), Utc::now()).await.unwrap();
        assert_eq!(second, InsertOutcome::Conflict);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_frees_slot_for_reuse() {
        let store = MemoryReservationStore::new();
        let InsertOutcome::Inserted(first) =
            store.insert_if_absent(&request((10, 0), "P1"), Utc::now()).await.unwrap()
        else {
            panic!("expected insert");
        };

        let outcome = store.cancel(first.id, Utc::now()).await.unwrap();
        assert!(matches!(outcome, CancelOutcome::Cancelled(ref r) if r.status == ReservationStatus::Cancelled));

        let again = store.cancel(first.id, Utc::now()).await.unwrap();
        assert!(matches!(again, CancelOutcome::AlreadyCancelled(_)));

        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert!(store.list_active(&DietitianId::new("D1"), date).await.unwrap().is_empty());

        let rebooked = store.insert_if_absent(&request((10, 0), "P2"), Utc::now()).await.unwrap();
        assert!(matches!(rebooked, InsertOutcome::Inserted(_)));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_cancel_unknown_reservation() {
        let store = MemoryReservationStore::new();
        let outcome = store.cancel(ReservationId::generate(), Utc::now()).await.unwrap();
        assert_eq!(outcome, CancelOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_offline_store_reports_unavailable() {
        let store = MemoryReservationStore::new();
        store.set_offline(true);

        let err = store
            .insert_if_absent(&request((10, 0), "P1"), Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(store.subscribe().await.is_err());

        store.set_offline(false);
        assert!(store.insert_if_absent(&request((10, 0), "P1"), Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_publishes_events() {
        let store = MemoryReservationStore::new();
        let mut events = store.subscribe().await.unwrap();

        let InsertOutcome::Inserted(reservation) =
            store.insert_if_absent(&request((9, 30), "P1"), Utc::now()).await.unwrap()
        else {
            panic!("expected insert");
        };
        store.cancel(reservation.id, Utc::now()).await.unwrap();

        assert_eq!(events.recv().await.unwrap(), ReservationEvent::Booked(reservation.slot_key()));
        assert_eq!(
            events.recv().await.unwrap(),
            ReservationEvent::Cancelled(reservation.slot_key())
        );
    }

    #[tokio::test]
    async fn test_concurrent_inserts_admit_exactly_one() {
        let store = Arc::new(MemoryReservationStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_if_absent(&request((11, 0), &format!("P{}", i)), Utc::now())
                    .await
                    .unwrap()
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), InsertOutcome::Inserted(_)) {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }
}
