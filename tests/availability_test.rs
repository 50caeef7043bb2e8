use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use diet_booking::adapters::Leave;
use diet_booking::core::availability::AvailabilityCalculator;
use diet_booking::core::rules::BookingRules;
use diet_booking::core::{
    AvailabilityQuery, BookingRequest, DietitianId, InsertOutcome, PatientId, ReservationStore,
    TimeRange,
};
use diet_booking::{MemoryReservationStore, SlotGrid, WeeklyCalendar};
use std::sync::Arc;

type Calculator = AvailabilityCalculator<MemoryReservationStore, WeeklyCalendar>;

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn may(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
}

fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
    date.and_time(t(h, m))
}

fn small_grid() -> SlotGrid {
    SlotGrid::new(vec![t(9, 0), t(9, 30), t(10, 0)], Duration::minutes(30)).unwrap()
}

fn calculator_with(
    grid: SlotGrid,
    store: Arc<MemoryReservationStore>,
    calendar: WeeklyCalendar,
) -> Calculator {
    AvailabilityCalculator::new(
        Arc::new(grid),
        BookingRules::default(),
        store,
        Arc::new(calendar),
    )
}

async fn reserve(store: &MemoryReservationStore, dietitian: &str, date: NaiveDate, time: NaiveTime) {
    let request = BookingRequest::new(
        DietitianId::new(dietitian),
        date,
        time,
        PatientId::new("P-existing"),
    );
    let outcome = store.insert_if_absent(&request, Utc::now()).await.unwrap();
    assert!(matches!(outcome, InsertOutcome::Inserted(_)));
}

#[tokio::test]
async fn test_buffer_excludes_slots_about_to_start() {
    // grid = [09:00, 09:30, 10:00], now = 09:05, buffer = 30min
    let store = Arc::new(MemoryReservationStore::new());
    let calculator = calculator_with(small_grid(), store, WeeklyCalendar::default());

    let result = calculator
        .available_slots(&DietitianId::new("D1"), may(1), at(may(1), 9, 5))
        .await
        .unwrap();

    assert_eq!(result.slots, vec![t(10, 0)]);
    assert_eq!(result.iso_slots(), vec!["10:00".to_string()]);
}

#[tokio::test]
async fn test_slot_exactly_at_buffer_edge_is_bookable() {
    let store = Arc::new(MemoryReservationStore::new());
    let calculator = calculator_with(small_grid(), store, WeeklyCalendar::default());

    let result = calculator
        .available_slots(&DietitianId::new("D1"), may(1), at(may(1), 9, 0))
        .await
        .unwrap();

    assert_eq!(result.slots, vec![t(9, 30), t(10, 0)]);
}

#[tokio::test]
async fn test_never_returns_slot_inside_buffer_for_today() {
    let store = Arc::new(MemoryReservationStore::new());
    let grid = SlotGrid::default();
    let calculator = calculator_with(grid, store, WeeklyCalendar::default());
    let dietitian = DietitianId::new("D1");

    let mut now = at(may(1), 7, 0);
    while now < at(may(1), 19, 0) {
        let result = calculator.available_slots(&dietitian, may(1), now).await.unwrap();
        let cutoff = now + Duration::minutes(30);
        assert!(result.slots.iter().all(|slot| may(1).and_time(*slot) >= cutoff));
        assert!(result.slots.windows(2).all(|w| w[0] < w[1]));
        now += Duration::minutes(7);
    }
}

#[tokio::test]
async fn test_future_date_ignores_time_of_day() {
    let store = Arc::new(MemoryReservationStore::new());
    let calculator = calculator_with(small_grid(), store, WeeklyCalendar::default());

    let result = calculator
        .available_slots(&DietitianId::new("D1"), may(2), at(may(1), 17, 45))
        .await
        .unwrap();

    assert_eq!(result.slots, vec![t(9, 0), t(9, 30), t(10, 0)]);
}

#[tokio::test]
async fn test_past_date_is_empty() {
    let store = Arc::new(MemoryReservationStore::new());
    let calculator = calculator_with(small_grid(), store, WeeklyCalendar::default());

    let result = calculator
        .available_slots(&DietitianId::new("D1"), may(1), at(may(2), 8, 0))
        .await
        .unwrap();

    assert!(result.slots.is_empty());
}

#[tokio::test]
async fn test_reserved_slots_are_excluded_per_dietitian() {
    let store = Arc::new(MemoryReservationStore::new());
    reserve(&store, "D1", may(2), t(9, 30)).await;
    reserve(&store, "D2", may(2), t(10, 0)).await;
    let calculator = calculator_with(small_grid(), store, WeeklyCalendar::default());

    let query = AvailabilityQuery {
        dietitian_id: DietitianId::new("D1"),
        date: may(2),
        now: at(may(1), 12, 0),
    };
    let result = calculator.query(&query).await.unwrap();

    assert_eq!(result.slots, vec![t(9, 0), t(10, 0)]);
    assert!(!result.contains(t(9, 30)));
}

#[tokio::test]
async fn test_reservation_on_other_date_does_not_block() {
    let store = Arc::new(MemoryReservationStore::new());
    reserve(&store, "D1", may(3), t(9, 0)).await;
    let calculator = calculator_with(small_grid(), store, WeeklyCalendar::default());

    let result = calculator
        .available_slots(&DietitianId::new("D1"), may(2), at(may(1), 12, 0))
        .await
        .unwrap();

    assert_eq!(result.slots.len(), 3);
}

#[tokio::test]
async fn test_closed_weekday_and_leave_empty_the_grid() {
    // 2024-05-05 是星期日
    let store = Arc::new(MemoryReservationStore::new());
    let calendar = WeeklyCalendar::new([Weekday::Sun])
        .with_leave(Leave::full_day(DietitianId::new("D1"), may(7), may(8)).unwrap());
    let calculator = calculator_with(small_grid(), store, calendar);
    let now = at(may(1), 12, 0);

    let sunday = calculator
        .available_slots(&DietitianId::new("D1"), may(5), now)
        .await
        .unwrap();
    assert!(sunday.slots.is_empty());

    let on_leave = calculator
        .available_slots(&DietitianId::new("D1"), may(7), now)
        .await
        .unwrap();
    assert!(on_leave.slots.is_empty());

    let colleague = calculator
        .available_slots(&DietitianId::new("D2"), may(7), now)
        .await
        .unwrap();
    assert_eq!(colleague.slots.len(), 3);
}

#[tokio::test]
async fn test_hourly_leave_removes_overlapping_slots() {
    let store = Arc::new(MemoryReservationStore::new());
    let calendar = WeeklyCalendar::default().with_leave(
        Leave::hourly(
            DietitianId::new("D1"),
            may(2),
            may(2),
            TimeRange::new(t(9, 15), t(9, 45)),
        )
        .unwrap(),
    );
    let calculator = calculator_with(small_grid(), store, calendar);

    let result = calculator
        .available_slots(&DietitianId::new("D1"), may(2), at(may(1), 12, 0))
        .await
        .unwrap();

    assert_eq!(result.slots, vec![t(10, 0)]);
}

#[tokio::test]
async fn test_dates_beyond_booking_window_are_empty() {
    let store = Arc::new(MemoryReservationStore::new());
    let calculator = calculator_with(small_grid(), store, WeeklyCalendar::default());
    let now = at(may(1), 12, 0);

    let last_day = now.date() + Duration::days(90);
    let inside = calculator
        .available_slots(&DietitianId::new("D1"), last_day, now)
        .await
        .unwrap();
    assert_eq!(inside.slots.len(), 3);

    let outside = calculator
        .available_slots(&DietitianId::new("D1"), last_day + Duration::days(1), now)
        .await
        .unwrap();
    assert!(outside.slots.is_empty());
}

#[tokio::test]
async fn test_cancellation_restores_slot_exactly_once() {
    let store = Arc::new(MemoryReservationStore::new());
    let request = BookingRequest::new(DietitianId::new("D1"), may(2), t(9, 30), PatientId::new("P1"));
    let InsertOutcome::Inserted(reservation) =
        store.insert_if_absent(&request, Utc::now()).await.unwrap()
    else {
        panic!("expected insert");
    };
    let calculator = calculator_with(small_grid(), store.clone(), WeeklyCalendar::default());
    let now = at(may(1), 12, 0);

    let before = calculator
        .available_slots(&DietitianId::new("D1"), may(2), now)
        .await
        .unwrap();
    assert!(!before.contains(t(9, 30)));

    store.cancel(reservation.id, Utc::now()).await.unwrap();
    store.cancel(reservation.id, Utc::now()).await.unwrap();

    let after = calculator
        .available_slots(&DietitianId::new("D1"), may(2), now)
        .await
        .unwrap();
    assert_eq!(after.slots, vec![t(9, 0), t(9, 30), t(10, 0)]);
}

#[tokio::test]
async fn test_storage_outage_surfaces_as_retryable_error() {
    let store = Arc::new(MemoryReservationStore::new());
    store.set_offline(true);
    let calculator = calculator_with(small_grid(), store, WeeklyCalendar::default());

    let err = calculator
        .available_slots(&DietitianId::new("D1"), may(2), at(may(1), 12, 0))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(err.http_status(), 503);
}

#[tokio::test]
async fn test_buffer_reaches_past_midnight() {
    // now = 23:50，緩衝 30 分鐘，隔天 00:00 仍在緩衝內
    let store = Arc::new(MemoryReservationStore::new());
    let grid = SlotGrid::new(vec![t(0, 0), t(0, 30), t(9, 0)], Duration::minutes(30)).unwrap();
    let calculator = calculator_with(grid, store, WeeklyCalendar::default());

    let result = calculator
        .available_slots(&DietitianId::new("D1"), may(2), at(may(1), 23, 50))
        .await
        .unwrap();

    assert_eq!(result.slots, vec![t(0, 30), t(9, 0)]);

    let day_after = calculator
        .available_slots(&DietitianId::new("D1"), may(3), at(may(1), 23, 50))
        .await
        .unwrap();
    assert_eq!(day_after.slots, vec![t(0, 0), t(0, 30), t(9, 0)]);
}
