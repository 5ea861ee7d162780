mod conflict;
mod error;
pub mod lifecycle;
mod mutations;
pub mod pricing;
mod queries;

pub use error::{EngineError, ErrorKind};

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::error;
use ulid::Ulid;

use crate::catalog::{validate_offer, validate_property, Catalog};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<CalendarState>>;

/// Knobs the host passes in. No process-wide state.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound on every catalog read and WAL append.
    pub io_timeout: Duration,
    /// Let owners place test bookings that skip the reservation-overlap check.
    pub owner_test_bookings: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(5),
            owner_test_bookings: false,
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

const OPEN: u8 = 0;
const CLAIMED: u8 = 1;
const ABANDONED: u8 = 2;

/// Hand-off state of one append. The writer claims it before writing; a caller
/// whose deadline passes may abandon it only while it is still open.
#[derive(Debug, Default)]
pub(super) struct AppendClaim(AtomicU8);

impl AppendClaim {
    /// Writer side. False if the caller already gave up.
    fn claim(&self) -> bool {
        self.0
            .compare_exchange(OPEN, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Caller side. False once the writer owns the record.
    fn abandon(&self) -> bool {
        self.0
            .compare_exchange(OPEN, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub(super) enum WalCommand {
    /// Events of one request. Written as one record, flushed with the rest of the batch.
    Append {
        events: Vec<Event>,
        claim: Arc<AppendClaim>,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Snapshot records, one per calendar.
    Compact {
        records: Vec<Vec<Event>>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

struct PendingAppend {
    events: Vec<Event>,
    claim: Arc<AppendClaim>,
    response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. Claim each append, then a single flush_sync for the whole batch.
/// 4. Respond to every claimed sender with its own outcome.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append {
                events,
                claim,
                response,
            } => {
                let mut batch = vec![PendingAppend {
                    events,
                    claim,
                    response,
                }];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append {
                            events,
                            claim,
                            response,
                        }) => {
                            batch.push(PendingAppend {
                                events,
                                claim,
                                response,
                            });
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            commit_batch(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    commit_batch(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    // Abandoned appends were already reported as timed out and must not land.
    batch.retain(|p| !p.response.is_closed() && p.claim.claim());
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let results = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (pending, result) in batch.drain(..).zip(results) {
        let _ = pending.response.send(result);
    }
}

/// One result per append. A record that fails to encode fails alone. An I/O failure
/// rolls the whole batch back, so no record reported as failed stays on disk.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> Vec<io::Result<()>> {
    let mut results = Vec::with_capacity(batch.len());
    let mut io_err = None;
    for pending in batch {
        let frame = match Wal::encode(&pending.events) {
            Ok(frame) => frame,
            Err(e) => {
                results.push(Err(e));
                continue;
            }
        };
        if let Err(e) = wal.append_frame(&frame) {
            io_err = Some(e);
            break;
        }
        results.push(Ok(()));
    }

    let outcome = match io_err {
        Some(e) => Err(e),
        None => wal.flush_sync(),
    };
    match outcome {
        Ok(()) => results,
        Err(e) => {
            error!("WAL batch of {} failed, rolling back: {e}", batch.len());
            if let Err(rb) = wal.rollback() {
                error!("WAL rollback failed: {rb}");
            }
            batch
                .iter()
                .map(|_| Err(io::Error::new(e.kind(), e.to_string())))
                .collect()
        }
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    /// property id → calendar
    pub state: DashMap<Ulid, SharedCalendar>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) catalog: Arc<dyn Catalog>,
    pub(super) settings: EngineSettings,
    /// Reverse lookup: reservation id → property id
    pub(super) reservation_to_property: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a calendar. Caller holds the lock.
fn apply_to_calendar(cal: &mut CalendarState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::DateBlocked { date, .. } => {
            cal.blocked.insert(*date);
        }
        Event::DateUnblocked { date, .. } => {
            cal.blocked.remove(date);
        }
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.property_id);
            cal.insert_reservation(reservation.as_ref().clone());
        }
        Event::ReservationStatusChanged {
            id,
            status,
            payment_status,
            payment_method,
            transaction_id,
            at,
            ..
        } => {
            if let Some(r) = cal.reservation_mut(id) {
                lifecycle::apply_change(
                    r,
                    *status,
                    *payment_status,
                    payment_method,
                    transaction_id,
                    *at,
                );
            }
        }
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        catalog: Arc<dyn Catalog>,
        notify: Arc<NotifyHub>,
        settings: EngineSettings,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            catalog,
            settings,
            reservation_to_property: DashMap::new(),
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never blocking_write here: this may run inside an async context.
        for event in &events {
            let cal = engine.calendar_or_create(event.property_id());
            let mut guard = cal.try_write().expect("replay: uncontended write");
            apply_to_calendar(&mut guard, event, &engine.reservation_to_property);
        }

        Ok(engine)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Write events to the WAL via the background group-commit writer.
    ///
    /// The I/O timeout covers queueing and waiting. Once the writer has claimed the
    /// record its outcome is decided, so the caller waits for it instead of giving up.
    async fn wal_append(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let deadline = tokio::time::Instant::now() + self.settings.io_timeout;
        let claim = Arc::new(AppendClaim::default());
        let (tx, mut rx) = oneshot::channel();
        let cmd = WalCommand::Append {
            events,
            claim: claim.clone(),
            response: tx,
        };
        match tokio::time::timeout_at(deadline, self.wal_tx.send(cmd)).await {
            Err(_) => return Err(EngineError::Timeout("wal append")),
            Ok(Err(_)) => return Err(EngineError::WalError("WAL writer shut down".into())),
            Ok(Ok(())) => {}
        }
        let outcome = match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(outcome) => outcome,
            Err(_) if claim.abandon() => return Err(EngineError::Timeout("wal append")),
            Err(_) => rx.await,
        };
        outcome
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Run a storage call under the configured I/O timeout.
    pub(super) async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        tokio::time::timeout(self.settings.io_timeout, fut)
            .await
            .map_err(|_| EngineError::Timeout(op))?
    }

    pub fn get_calendar(&self, property_id: &Ulid) -> Option<SharedCalendar> {
        self.state.get(property_id).map(|e| e.value().clone())
    }

    pub(super) fn calendar_or_create(&self, property_id: Ulid) -> SharedCalendar {
        self.state
            .entry(property_id)
            .or_insert_with(|| Arc::new(RwLock::new(CalendarState::new(property_id))))
            .value()
            .clone()
    }

    pub fn get_property_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_property
            .get(reservation_id)
            .map(|e| *e.value())
    }

    /// Fetch and sanity-check a property from the catalog.
    pub(super) async fn fetch_property(&self, id: Ulid) -> Result<Property, EngineError> {
        let property = self
            .bounded("catalog property", self.catalog.property(id))
            .await?
            .ok_or(EngineError::PropertyNotFound(id))?;
        validate_property(&property)?;
        Ok(property)
    }

    /// Active offers for the property, each sanity-checked like a property record.
    pub(super) async fn fetch_offers(
        &self,
        property_id: Ulid,
    ) -> Result<Vec<SpecialOffer>, EngineError> {
        let offers = self
            .bounded("catalog offers", self.catalog.special_offers(property_id))
            .await?;
        for offer in offers.iter().filter(|o| o.active && o.property_id == property_id) {
            validate_offer(offer)?;
        }
        Ok(offers)
    }

    /// WAL-append + apply + notify in one call. Nothing is applied unless the WAL write succeeded.
    pub(super) async fn persist_and_apply(
        &self,
        cal: &mut CalendarState,
        events: Vec<Event>,
    ) -> Result<(), EngineError> {
        self.wal_append(events.clone()).await?;
        for event in &events {
            apply_to_calendar(cal, event, &self.reservation_to_property);
            self.notify.send(event);
        }
        Ok(())
    }

    /// Lookup reservation → property, get calendar, acquire write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<CalendarState>), EngineError> {
        let property_id = self
            .get_property_for_reservation(reservation_id)
            .ok_or(EngineError::ReservationNotFound(*reservation_id))?;
        let cal = self
            .get_calendar(&property_id)
            .ok_or(EngineError::ReservationNotFound(*reservation_id))?;
        let guard = cal.write_owned().await;
        Ok((property_id, guard))
    }
}
