//! Proposed changes to records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A client-proposed change to one record.
///
/// `base_version` is the version the client believed was current when
/// it authored the change. The idempotency token makes retried
/// submissions safe: a token the server has already resolved returns
/// the prior event instead of applying again.
///
/// A mutation is submitted once and resolved exactly once (accepted,
/// rejected, or superseded); it is never modified after resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Target record.
    pub record_id: Uuid,
    /// The list the target record belongs to.
    pub list_id: Uuid,
    /// Version the client based this change on.
    pub base_version: u64,
    /// New field values.
    pub fields: Map<String, Value>,
    /// The account proposing the change.
    pub acting_user: Uuid,
    /// Client-generated token identifying this submission.
    pub idempotency_token: Uuid,
}

impl Mutation {
    /// Creates a mutation with a fresh idempotency token.
    pub fn new(
        record_id: Uuid,
        list_id: Uuid,
        base_version: u64,
        fields: Map<String, Value>,
        acting_user: Uuid,
    ) -> Self {
        Self {
            record_id,
            list_id,
            base_version,
            fields,
            acting_user,
            idempotency_token: Uuid::new_v4(),
        }
    }

    /// Rebases the mutation onto a newer observed version.
    ///
    /// Used by offline replay: the token is preserved so a rebased
    /// resubmission still deduplicates against earlier attempts.
    pub fn rebased(mut self, base_version: u64) -> Self {
        self.base_version = base_version;
        self
    }
}
