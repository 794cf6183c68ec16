use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::lifecycle::{check_editable, check_transition};
use super::{Engine, EngineError, WalCommand};

/// Input for `create_reservation`. Absent optionals take the documented
/// defaults (status Held, total/deposit 0).
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub id: Ulid,
    pub client_id: Ulid,
    pub date: Ms,
    pub start: Ms,
    pub end: Ms,
    pub status: Option<ReservationStatus>,
    pub attendees: Option<u32>,
    pub total: Option<Cents>,
    pub deposit: Option<Cents>,
    pub package_id: Option<Ulid>,
    pub notes: Option<String>,
    pub services: Vec<NewServiceLine>,
    pub payments: Vec<NewPayment>,
}

#[derive(Debug, Clone)]
pub struct NewServiceLine {
    pub service_id: Ulid,
    pub quantity: u32,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub amount: Cents,
    pub method: PaymentMethod,
    pub reference: Option<String>,
}

fn validate_money(amount: Cents, field: &'static str) -> Result<(), EngineError> {
    if amount < 0 {
        return Err(EngineError::Validation(field));
    }
    if amount > MAX_AMOUNT_CENTS {
        return Err(EngineError::LimitExceeded("amount too large"));
    }
    Ok(())
}

fn validate_date(date: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&date) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

fn validate_notes(notes: &str) -> Result<(), EngineError> {
    if notes.len() > MAX_NOTES_LEN {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

fn validate_reference(reference: Option<&str>) -> Result<(), EngineError> {
    if let Some(r) = reference
        && r.len() > MAX_REFERENCE_LEN
    {
        return Err(EngineError::LimitExceeded("payment reference too long"));
    }
    Ok(())
}

impl Engine {
    /// Create a reservation. Reference validation happens at commit time,
    /// under the venue write lock, together with the conflict check — the
    /// lock is the transaction boundary: two concurrent overlapping
    /// proposals serialize, and the loser sees the winner's commit.
    pub async fn create_reservation(
        &self,
        input: NewReservation,
    ) -> Result<Reservation, EngineError> {
        let span = validate_span(input.start, input.end)?;
        validate_date(input.date)?;
        let total = input.total.unwrap_or(0);
        let deposit = input.deposit.unwrap_or(0);
        validate_money(total, "total must be non-negative")?;
        validate_money(deposit, "deposit must be non-negative")?;
        if let Some(ref n) = input.notes {
            validate_notes(n)?;
        }
        if input.services.len() > MAX_SERVICE_LINES_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many service lines"));
        }
        if input.payments.len() > MAX_PAYMENTS_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many payments"));
        }
        for line in &input.services {
            if line.quantity == 0 {
                return Err(EngineError::Validation("service line quantity must be positive"));
            }
        }
        for payment in &input.payments {
            if payment.amount <= 0 {
                return Err(EngineError::Validation("payment amount must be positive"));
            }
            validate_money(payment.amount, "payment amount must be positive")?;
            validate_reference(payment.reference.as_deref())?;
        }
        let status = input.status.unwrap_or(ReservationStatus::Held);

        let venue = self.venue.clone();
        let mut guard = venue.write().await;
        if guard.len() >= MAX_RESERVATIONS {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }
        if guard.contains(input.id) {
            return Err(EngineError::AlreadyExists(input.id));
        }
        if !self.clients.contains_key(&input.client_id) {
            return Err(EngineError::ReferenceNotFound {
                kind: "client",
                id: input.client_id,
            });
        }
        if let Some(pid) = input.package_id
            && !self.packages.contains_key(&pid)
        {
            return Err(EngineError::ReferenceNotFound {
                kind: "package",
                id: pid,
            });
        }
        for line in &input.services {
            if !self.services.contains_key(&line.service_id) {
                return Err(EngineError::ReferenceNotFound {
                    kind: "service",
                    id: line.service_id,
                });
            }
        }

        check_no_conflict(&guard, &span, None)?;

        let now = now_ms();
        let reservation = Reservation {
            id: input.id,
            client_id: input.client_id,
            date: input.date,
            span,
            status,
            attendees: input.attendees,
            total,
            deposit,
            package_id: input.package_id,
            notes: input.notes,
            services: input
                .services
                .into_iter()
                .map(|l| ServiceLine {
                    id: Ulid::new(),
                    service_id: l.service_id,
                    quantity: l.quantity,
                })
                .collect(),
            payments: input
                .payments
                .into_iter()
                .map(|p| Payment {
                    id: Ulid::new(),
                    amount: p.amount,
                    method: p.method,
                    reference: p.reference,
                    paid_at: now,
                })
                .collect(),
            created_at: now,
            updated_at: now,
        };

        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(reservation)
    }

    /// Partial update. An empty patch is a no-op and returns the stored
    /// record unchanged, whatever its status. A non-empty patch against a
    /// Cancelled reservation is rejected before anything else — terminal
    /// records are read-only.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        let venue = self.venue.clone();
        let mut guard = venue.write().await;
        let current = guard.get(id).ok_or(EngineError::NotFound(id))?.clone();
        if patch.is_empty() {
            return Ok(current);
        }
        check_editable(current.status)?;

        let client_id = match patch.client_id {
            Patch::Keep => current.client_id,
            Patch::Set(v) => v,
            Patch::Clear => return Err(EngineError::Validation("client_id cannot be null")),
        };
        let date = match patch.date {
            Patch::Keep => current.date,
            Patch::Set(v) => {
                validate_date(v)?;
                v
            }
            Patch::Clear => return Err(EngineError::Validation("date cannot be null")),
        };
        let status = match patch.status {
            Patch::Keep => current.status,
            Patch::Set(v) => v,
            Patch::Clear => return Err(EngineError::Validation("status cannot be null")),
        };
        let total = match patch.total {
            Patch::Keep => current.total,
            Patch::Set(v) => v,
            Patch::Clear => return Err(EngineError::Validation("total cannot be null")),
        };
        validate_money(total, "total must be non-negative")?;
        let deposit = match patch.deposit {
            Patch::Keep => current.deposit,
            Patch::Set(v) => v,
            Patch::Clear => return Err(EngineError::Validation("deposit cannot be null")),
        };
        validate_money(deposit, "deposit must be non-negative")?;
        let attendees = match patch.attendees {
            Patch::Keep => current.attendees,
            Patch::Set(v) => Some(v),
            Patch::Clear => None,
        };
        let package_id = match patch.package_id {
            Patch::Keep => current.package_id,
            Patch::Set(v) => Some(v),
            Patch::Clear => None,
        };
        let notes = match patch.notes {
            Patch::Keep => current.notes.clone(),
            Patch::Set(v) => {
                validate_notes(&v)?;
                Some(v)
            }
            Patch::Clear => None,
        };

        // The interval is re-validated and re-checked against the active
        // set whenever either endpoint is supplied, with the missing
        // endpoint inherited from the stored record.
        let interval_changed = !patch.start.is_keep() || !patch.end.is_keep();
        let start = match patch.start {
            Patch::Keep => current.span.start,
            Patch::Set(v) => v,
            Patch::Clear => return Err(EngineError::Validation("start cannot be null")),
        };
        let end = match patch.end {
            Patch::Keep => current.span.end,
            Patch::Set(v) => v,
            Patch::Clear => return Err(EngineError::Validation("end cannot be null")),
        };
        let span = if interval_changed {
            validate_span(start, end)?
        } else {
            current.span
        };
        if interval_changed {
            check_no_conflict(&guard, &span, Some(id))?;
        }

        check_transition(current.status, status)?;

        if !self.clients.contains_key(&client_id) {
            return Err(EngineError::ReferenceNotFound {
                kind: "client",
                id: client_id,
            });
        }
        if let Some(pid) = package_id
            && !self.packages.contains_key(&pid)
        {
            return Err(EngineError::ReferenceNotFound {
                kind: "package",
                id: pid,
            });
        }

        let updated_at = now_ms();
        let event = Event::ReservationUpdated {
            id,
            client_id,
            date,
            span,
            status,
            attendees,
            total,
            deposit,
            package_id,
            notes: notes.clone(),
            updated_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let mut updated = current;
        updated.client_id = client_id;
        updated.date = date;
        updated.span = span;
        updated.status = status;
        updated.attendees = attendees;
        updated.total = total;
        updated.deposit = deposit;
        updated.package_id = package_id;
        updated.notes = notes;
        updated.updated_at = updated_at;
        Ok(updated)
    }

    /// Hard delete: the record and its service lines and payments go in one
    /// atomic operation.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let venue = self.venue.clone();
        let mut guard = venue.write().await;
        if !guard.contains(id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ReservationDeleted { id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Append a service line to a live reservation. Lines are not
    /// independently addressable — this is the only way in, and deletion of
    /// the parent is the only way out.
    pub async fn add_service_line(
        &self,
        reservation_id: Ulid,
        service_id: Ulid,
        quantity: u32,
    ) -> Result<ServiceLine, EngineError> {
        if quantity == 0 {
            return Err(EngineError::Validation("service line quantity must be positive"));
        }
        let venue = self.venue.clone();
        let mut guard = venue.write().await;
        let current = guard
            .get(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        check_editable(current.status)?;
        if current.services.len() >= MAX_SERVICE_LINES_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many service lines"));
        }
        if !self.services.contains_key(&service_id) {
            return Err(EngineError::ReferenceNotFound {
                kind: "service",
                id: service_id,
            });
        }

        let line = ServiceLine {
            id: Ulid::new(),
            service_id,
            quantity,
        };
        let event = Event::ServiceLineAdded {
            reservation_id,
            line: line.clone(),
            updated_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(line)
    }

    /// Record a payment. Append-only: payments are never updated or
    /// deleted, and recording one is allowed on any stored reservation
    /// (a forfeited deposit on a cancelled event is still a payment).
    pub async fn record_payment(
        &self,
        reservation_id: Ulid,
        amount: Cents,
        method: PaymentMethod,
        reference: Option<String>,
    ) -> Result<Payment, EngineError> {
        if amount <= 0 {
            return Err(EngineError::Validation("payment amount must be positive"));
        }
        validate_money(amount, "payment amount must be positive")?;
        validate_reference(reference.as_deref())?;
        let venue = self.venue.clone();
        let mut guard = venue.write().await;
        let current = guard
            .get(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        if current.payments.len() >= MAX_PAYMENTS_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many payments"));
        }

        let payment = Payment {
            id: Ulid::new(),
            amount,
            method,
            reference,
            paid_at: now_ms(),
        };
        let event = Event::PaymentRecorded {
            reservation_id,
            payment: payment.clone(),
            updated_at: payment.paid_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(payment)
    }

    // ── Catalog registration ─────────────────────────────────

    pub async fn register_client(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        self.register_catalog_entry(&self.clients, id, name, |id, name| {
            Event::ClientRegistered { id, name }
        })
        .await
    }

    pub async fn register_package(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        self.register_catalog_entry(&self.packages, id, name, |id, name| {
            Event::PackageRegistered { id, name }
        })
        .await
    }

    pub async fn register_service(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        self.register_catalog_entry(&self.services, id, name, |id, name| {
            Event::ServiceRegistered { id, name }
        })
        .await
    }

    async fn register_catalog_entry(
        &self,
        registry: &dashmap::DashMap<Ulid, String>,
        id: Ulid,
        name: String,
        make_event: fn(Ulid, String) -> Event,
    ) -> Result<(), EngineError> {
        if name.is_empty() {
            return Err(EngineError::Validation("name is required"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        if registry.len() >= MAX_CATALOG_ENTRIES {
            return Err(EngineError::LimitExceeded("too many catalog entries"));
        }
        if registry.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = make_event(id, name.clone());
        self.persist_catalog(&event).await?;
        registry.insert(id, name);
        Ok(())
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: catalog registrations first, then one
    /// creation snapshot per reservation.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        for entry in self.clients.iter() {
            events.push(Event::ClientRegistered {
                id: *entry.key(),
                name: entry.value().clone(),
            });
        }
        for entry in self.packages.iter() {
            events.push(Event::PackageRegistered {
                id: *entry.key(),
                name: entry.value().clone(),
            });
        }
        for entry in self.services.iter() {
            events.push(Event::ServiceRegistered {
                id: *entry.key(),
                name: entry.value().clone(),
            });
        }
        {
            let guard = self.venue.read().await;
            for reservation in &guard.reservations {
                events.push(Event::ReservationCreated {
                    reservation: reservation.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
