//! Audit entries emitted alongside every financial write and state transition.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{CompanyId, Timestamp};

/// Actor recorded for writes made by background jobs and callbacks.
pub const SYSTEM_ACTOR: &str = "system";

/// One structured audit event.
///
/// Stores persist these in the same transaction as the mutation they describe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub company_id: CompanyId,
    pub metadata: JsonValue,
    pub occurred_at: Timestamp,
}

impl AuditEntry {
    /// Creates an entry attributed to the system actor.
    pub fn system(
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl ToString,
        company_id: CompanyId,
    ) -> Self {
        Self {
            actor: SYSTEM_ACTOR.to_string(),
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            company_id,
            metadata: JsonValue::Object(Default::default()),
            occurred_at: Timestamp::now(),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn at(mut self, occurred_at: Timestamp) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}
