//! Append-only transition history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{HistoryEntryId, LoanRequestId, PartyId};

use crate::request::{Actor, RequestStatus, Role};
use crate::workflow::action::ActionId;

/// One accepted transition of a loan request
///
/// Written in the same unit of work as the status change it describes and
/// never updated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryEntryId,
    pub request_id: LoanRequestId,
    pub action: ActionId,
    pub actor_id: PartyId,
    pub actor_role: Role,
    /// `None` only for the submission entry
    pub prior_status: Option<RequestStatus>,
    pub next_status: RequestStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl HistoryEntry {
    pub fn new(
        request_id: LoanRequestId,
        action: ActionId,
        actor: &Actor,
        prior_status: Option<RequestStatus>,
        next_status: RequestStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HistoryEntryId::new_v7(),
            request_id,
            action,
            actor_id: actor.id,
            actor_role: actor.role,
            prior_status,
            next_status,
            timestamp,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
