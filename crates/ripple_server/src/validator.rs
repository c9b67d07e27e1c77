//! Mutation validation.

use crate::error::ServerError;
use ripple_protocol::{Mutation, Record};

/// Outcome of validating a mutation against current record state.
#[derive(Debug)]
pub enum Decision {
    /// The base version matches; apply at the next version.
    Accept {
        /// Version the mutation will produce.
        new_version: u64,
    },
    /// The base version is stale. Last-write-wins in acceptance order:
    /// the arriving mutation still applies at the next version, and an
    /// audit event records the overwrite.
    Conflict {
        /// The version being overwritten.
        superseded_version: u64,
        /// Version the mutation will produce.
        new_version: u64,
    },
    /// The mutation must not be applied.
    Reject(ServerError),
}

/// Decides the outcome of a mutation.
///
/// Pure with respect to the store: the caller reads the current record
/// inside the per-record critical section and passes it in, so no two
/// decisions for one record ever interleave.
pub fn validate(mutation: &Mutation, current: Option<&Record>) -> Decision {
    let record = match current {
        Some(record) => record,
        None => return Decision::Reject(ServerError::NotFound(mutation.record_id)),
    };

    if record.list_id != mutation.list_id {
        return Decision::Reject(ServerError::InvalidRequest(format!(
            "record {} does not belong to list {}",
            mutation.record_id, mutation.list_id
        )));
    }

    if !record.can_write(mutation.acting_user) {
        return Decision::Reject(ServerError::PermissionDenied {
            user: mutation.acting_user,
            record_id: mutation.record_id,
        });
    }

    if mutation.base_version == record.version {
        Decision::Accept {
            new_version: record.version + 1,
        }
    } else if mutation.base_version < record.version {
        Decision::Conflict {
            superseded_version: record.version,
            new_version: record.version + 1,
        }
    } else {
        // A base the server never assigned: the client's cache is not
        // from this history. Force a resnapshot instead of guessing.
        Decision::Reject(ServerError::InvalidRequest(format!(
            "base_version {} is ahead of current version {}",
            mutation.base_version, record.version
        )))
    }
}
