use crate::core::availability::AvailabilityCalculator;
use crate::core::{Clock, DietitianId, ReservationEvents, ReservationStore, WorkingCalendar};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// 重新訂閱與輪詢的策略
#[derive(Debug, Clone)]
pub struct FeedPolicy {
    /// 訂閱中斷後固定等待的時間
    pub reconnect_delay: Duration,
    /// 連續訂閱失敗幾次後改為輪詢
    pub max_reconnect_attempts: usize,
    pub poll_interval: Duration,
}

impl FeedPolicy {
    pub fn new(reconnect_delay: Duration, max_reconnect_attempts: usize, poll_interval: Duration) -> Self {
        Self {
            reconnect_delay,
            max_reconnect_attempts: max_reconnect_attempts.max(1),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }
}

impl Default for FeedPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), 5, Duration::from_secs(30))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    Connecting,
    Live,
    Polling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub mode: FeedMode,
    pub slots: Vec<NaiveTime>,
    pub refreshed_at: Option<NaiveDateTime>,
}

impl FeedSnapshot {
    fn connecting() -> Self {
        Self {
            mode: FeedMode::Connecting,
            slots: Vec::new(),
            refreshed_at: None,
        }
    }
}

pub struct FeedHandle {
    snapshots: watch::Receiver<FeedSnapshot>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> FeedSnapshot {
        self.snapshots.borrow().clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Availability feed task ended abnormally: {}", e);
        }
    }
}

/// 單一營養師、單一日期的即時可用時段推播。
/// 訂閱中斷時以固定延遲重新訂閱；無法建立訂閱時改為定期輪詢。
pub struct AvailabilityFeed<S: ?Sized, C: ?Sized> {
    calculator: Arc<AvailabilityCalculator<S, C>>,
    events: Option<Arc<dyn ReservationEvents>>,
    clock: Arc<dyn Clock>,
    dietitian: DietitianId,
    date: NaiveDate,
    policy: FeedPolicy,
}

impl<S, C> AvailabilityFeed<S, C>
where
    S: ReservationStore + ?Sized + 'static,
    C: WorkingCalendar + ?Sized + 'static,
{
    pub fn new(
        calculator: Arc<AvailabilityCalculator<S, C>>,
        events: Option<Arc<dyn ReservationEvents>>,
        clock: Arc<dyn Clock>,
        dietitian: DietitianId,
        date: NaiveDate,
        policy: FeedPolicy,
    ) -> Self {
        Self {
            calculator,
            events,
            clock,
            dietitian,
            date,
            policy,
        }
    }

    pub fn spawn(self) -> FeedHandle {
        let (tx, snapshots) = watch::channel(FeedSnapshot::connecting());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(tx, shutdown_rx));
        FeedHandle {
            snapshots,
            shutdown,
            task,
        }
    }

    async fn run(self, tx: watch::Sender<FeedSnapshot>, mut shutdown: watch::Receiver<bool>) {
        let Some(events) = self.events.clone() else {
            tracing::info!("📡 No live event source for {} on {}, polling", self.dietitian, self.date);
            self.poll(&tx, &mut shutdown).await;
            return;
        };

        let mut failures = 0;
        loop {
            if *shutdown.borrow() {
                return;
            }

            match events.subscribe().await {
                Ok(mut rx) => {
                    failures = 0;
                    tracing::info!("📡 Live availability feed connected for {} on {}", self.dietitian, self.date);
                    self.refresh(&tx, FeedMode::Live).await;

                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            received = rx.recv() => match received {
                                Ok(event) => {
                                    if event.affects(&self.dietitian, self.date) {
                                        self.refresh(&tx, FeedMode::Live).await;
                                    }
                                }
                                Err(RecvError::Lagged(skipped)) => {
                                    tracing::warn!("Feed lagged by {} events, resynchronising", skipped);
                                    self.refresh(&tx, FeedMode::Live).await;
                                }
                                Err(RecvError::Closed) => {
                                    tracing::warn!("⚠️ Live availability feed disconnected");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        "⚠️ Subscribing to reservation events failed ({}/{}): {}",
                        failures,
                        self.policy.max_reconnect_attempts,
                        e
                    );
                    if failures >= self.policy.max_reconnect_attempts {
                        tracing::warn!("Falling back to polling every {:?}", self.policy.poll_interval);
                        self.poll(&tx, &mut shutdown).await;
                        return;
                    }
                }
            }

            tx.send_modify(|snapshot| snapshot.mode = FeedMode::Connecting);
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(self.policy.reconnect_delay) => {}
            }
        }
    }

    async fn poll(&self, tx: &watch::Sender<FeedSnapshot>, shutdown: &mut watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.policy.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => self.refresh(tx, FeedMode::Polling).await,
            }
        }
    }

    async fn refresh(&self, tx: &watch::Sender<FeedSnapshot>, mode: FeedMode) {
        let now = self.clock.now();
        match self
            .calculator
            .available_slots(&self.dietitian, self.date, now)
            .await
        {
            Ok(result) => {
                tx.send_replace(FeedSnapshot {
                    mode,
                    slots: result.slots,
                    refreshed_at: Some(now),
                });
            }
            Err(e) => {
                // 保留上一次的結果
                tracing::warn!("Availability refresh failed: {}", e);
                tx.send_modify(|snapshot| snapshot.mode = mode);
            }
        }
    }
}
