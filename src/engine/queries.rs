use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// List reservations, ordered by start ascending (ties keep creation
    /// order). A window selects by **intersection**: every reservation
    /// sharing at least one instant with `[start, end)` is returned,
    /// including events that straddle a window boundary.
    pub async fn list_reservations(
        &self,
        window: Option<(Ms, Ms)>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let window = match window {
            None => None,
            Some((start, end)) => {
                if end <= start {
                    return Err(EngineError::InvalidInterval { start, end });
                }
                if end - start > MAX_QUERY_WINDOW_MS {
                    return Err(EngineError::LimitExceeded("query window too wide"));
                }
                Some(Span::new(start, end))
            }
        };

        let guard = self.venue.read().await;
        match window {
            None => Ok(guard.reservations.clone()),
            Some(w) => Ok(guard.overlapping(&w).cloned().collect()),
        }
    }

    /// Fetch one reservation with its nested service lines and payments.
    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        self.venue.read().await.get(id).cloned()
    }

    pub fn list_clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .clients
            .iter()
            .map(|entry| ClientInfo {
                id: *entry.key(),
                name: entry.value().clone(),
            })
            .collect();
        clients.sort_by_key(|c| c.id);
        clients
    }
}
