use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Integer cents — the only money type.
pub type Cents = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Half-open semantics: touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Reservation lifecycle. `Held` is the initial state; `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Held,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    /// Only Held and Confirmed reservations occupy their timeslot.
    pub fn occupies_slot(&self) -> bool {
        matches!(self, ReservationStatus::Held | ReservationStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Held => "HELD",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "HELD" => Some(ReservationStatus::Held),
            "CONFIRMED" => Some(ReservationStatus::Confirmed),
            "CANCELLED" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Transfer => "TRANSFER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CASH" => Some(PaymentMethod::Cash),
            "CARD" => Some(PaymentMethod::Card),
            "TRANSFER" => Some(PaymentMethod::Transfer),
            _ => None,
        }
    }
}

/// A catalog service booked for a reservation. Lives and dies with its
/// parent — there is no standalone update or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLine {
    pub id: Ulid,
    pub service_id: Ulid,
    pub quantity: u32,
}

/// A recorded payment against a reservation. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub amount: Cents,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub paid_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub client_id: Ulid,
    /// The event's nominal date. Informational; scheduling uses `span`.
    pub date: Ms,
    pub span: Span,
    pub status: ReservationStatus,
    pub attendees: Option<u32>,
    pub total: Cents,
    pub deposit: Cents,
    pub package_id: Option<Ulid>,
    pub notes: Option<String>,
    pub services: Vec<ServiceLine>,
    pub payments: Vec<Payment>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn occupies_slot(&self) -> bool {
        self.status.occupies_slot()
    }
}

/// All reservations of the one venue, sorted by `span.start` (ties keep
/// insertion order). This is the single shared mutable resource; every
/// mutation goes through the engine's write lock.
#[derive(Debug, Default)]
pub struct VenueState {
    pub reservations: Vec<Reservation>,
}

impl VenueState {
    pub fn new() -> Self {
        Self {
            reservations: Vec::new(),
        }
    }

    /// Insert keeping sort order by span.start; equal starts go after
    /// existing entries, so ties preserve insertion order.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        if let Some(pos) = self.reservations.iter().position(|r| r.id == id) {
            Some(self.reservations.remove(pos))
        } else {
            None
        }
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    pub fn contains(&self, id: Ulid) -> bool {
        self.reservations.iter().any(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// The event types — this is the WAL record format. Update events carry the
/// full post-merge value, so replay is a plain re-apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ClientRegistered {
        id: Ulid,
        name: String,
    },
    PackageRegistered {
        id: Ulid,
        name: String,
    },
    ServiceRegistered {
        id: Ulid,
        name: String,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationUpdated {
        id: Ulid,
        client_id: Ulid,
        date: Ms,
        span: Span,
        status: ReservationStatus,
        attendees: Option<u32>,
        total: Cents,
        deposit: Cents,
        package_id: Option<Ulid>,
        notes: Option<String>,
        updated_at: Ms,
    },
    ReservationDeleted {
        id: Ulid,
    },
    ServiceLineAdded {
        reservation_id: Ulid,
        line: ServiceLine,
        updated_at: Ms,
    },
    PaymentRecorded {
        reservation_id: Ulid,
        payment: Payment,
        updated_at: Ms,
    },
}

// ── Partial-update inputs ────────────────────────────────────────

/// Tri-state field update: an omitted field (`Keep`) is untouched, `Set`
/// replaces the value, `Clear` is an explicit null. Distinguishing Keep
/// from Clear at the boundary is the whole point — the two collapse only
/// once the merged record is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Patch<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReservationPatch {
    pub client_id: Patch<Ulid>,
    pub date: Patch<Ms>,
    pub start: Patch<Ms>,
    pub end: Patch<Ms>,
    pub status: Patch<ReservationStatus>,
    pub attendees: Patch<u32>,
    pub total: Patch<Cents>,
    pub deposit: Patch<Cents>,
    pub package_id: Patch<Ulid>,
    pub notes: Patch<String>,
}

impl ReservationPatch {
    pub fn is_empty(&self) -> bool {
        self.client_id.is_keep()
            && self.date.is_keep()
            && self.start.is_keep()
            && self.end.is_keep()
            && self.status.is_keep()
            && self.attendees.is_keep()
            && self.total.is_keep()
            && self.deposit.is_keep()
            && self.package_id.is_keep()
            && self.notes.is_keep()
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: Ulid,
    pub name: String,
}
