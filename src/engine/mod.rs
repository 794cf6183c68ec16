mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;

pub use error::EngineError;
pub use mutations::{NewPayment, NewReservation, NewServiceLine};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{CALENDAR_CHANNEL, NotifyHub};
use crate::wal::Wal;

pub type SharedVenueState = Arc<RwLock<VenueState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The scheduling engine for one venue. Owns the reservation set, the
/// catalog registries used for reference validation, and the WAL channel.
/// Constructed with an explicit WAL path — no process-global state.
pub struct Engine {
    pub venue: SharedVenueState,
    pub(super) clients: DashMap<Ulid, String>,
    pub(super) packages: DashMap<Ulid, String>,
    pub(super) services: DashMap<Ulid, String>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

/// Apply a reservation event directly to the VenueState (no locking —
/// caller holds the lock). Catalog events are handled at the Engine level.
fn apply_to_venue(vs: &mut VenueState, event: &Event) {
    match event {
        Event::ReservationCreated { reservation } => {
            vs.insert_reservation(reservation.clone());
        }
        Event::ReservationUpdated {
            id,
            client_id,
            date,
            span,
            status,
            attendees,
            total,
            deposit,
            package_id,
            notes,
            updated_at,
        } => {
            // Remove and reinsert — the span may have moved.
            if let Some(mut r) = vs.remove_reservation(*id) {
                r.client_id = *client_id;
                r.date = *date;
                r.span = *span;
                r.status = *status;
                r.attendees = *attendees;
                r.total = *total;
                r.deposit = *deposit;
                r.package_id = *package_id;
                r.notes = notes.clone();
                r.updated_at = *updated_at;
                vs.insert_reservation(r);
            }
        }
        Event::ReservationDeleted { id } => {
            // Dependents live inside the record and go with it.
            vs.remove_reservation(*id);
        }
        Event::ServiceLineAdded {
            reservation_id,
            line,
            updated_at,
        } => {
            if let Some(r) = vs.get_mut(*reservation_id) {
                r.services.push(line.clone());
                r.updated_at = *updated_at;
            }
        }
        Event::PaymentRecorded {
            reservation_id,
            payment,
            updated_at,
        } => {
            if let Some(r) = vs.get_mut(*reservation_id) {
                r.payments.push(payment.clone());
                r.updated_at = *updated_at;
            }
        }
        Event::ClientRegistered { .. }
        | Event::PackageRegistered { .. }
        | Event::ServiceRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            venue: Arc::new(RwLock::new(VenueState::new())),
            clients: DashMap::new(),
            packages: DashMap::new(),
            services: DashMap::new(),
            wal_tx,
            notify,
        };

        // Replay events — we're the sole owner of the lock here, so try_write
        // always succeeds instantly. Never use blocking_write: this may run
        // inside an async context.
        for event in &events {
            match event {
                Event::ClientRegistered { id, name } => {
                    engine.clients.insert(*id, name.clone());
                }
                Event::PackageRegistered { id, name } => {
                    engine.packages.insert(*id, name.clone());
                }
                Event::ServiceRegistered { id, name } => {
                    engine.services.insert(*id, name.clone());
                }
                other => {
                    let venue = engine.venue.clone();
                    let mut guard = venue.try_write().expect("replay: uncontended write");
                    apply_to_venue(&mut guard, other);
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply + notify in one call. The WAL append completes
    /// before the in-memory apply; on failure nothing is applied.
    pub(super) async fn persist_and_apply(
        &self,
        vs: &mut VenueState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_venue(vs, event);
        self.notify.send(CALENDAR_CHANNEL, event);
        Ok(())
    }

    /// WAL-append + notify for catalog events that don't touch the venue set.
    pub(super) async fn persist_catalog(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.notify.send(CALENDAR_CHANNEL, event);
        Ok(())
    }
}
