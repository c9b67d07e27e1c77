//! Versioned records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Permission level granted to a user a record is shared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// May observe the record.
    Read,
    /// May observe and mutate the record.
    Write,
}

/// A versioned record (a list or one of its items).
///
/// Every accepted mutation bumps `version` by exactly one, so versions
/// are strictly increasing and gapless per record. The version is the
/// optimistic-concurrency token clients echo back as `base_version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable record identifier.
    pub record_id: Uuid,
    /// The list this record belongs to (a list record names itself).
    pub list_id: Uuid,
    /// Current version, bumped on every accepted mutation.
    pub version: u64,
    /// Unix-millisecond timestamp of the last accepted mutation.
    pub updated_at_ms: u64,
    /// Owning account.
    pub owner: Uuid,
    /// Accounts the record is shared with, and their permission level.
    #[serde(default)]
    pub shares: HashMap<Uuid, Permission>,
    /// Field values.
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates a record at version 1.
    pub fn new(
        record_id: Uuid,
        list_id: Uuid,
        owner: Uuid,
        fields: Map<String, Value>,
        now_ms: u64,
    ) -> Self {
        Self {
            record_id,
            list_id,
            version: 1,
            updated_at_ms: now_ms,
            owner,
            shares: HashMap::new(),
            fields,
        }
    }

    /// Shares the record with another account.
    pub fn share_with(mut self, user: Uuid, permission: Permission) -> Self {
        self.shares.insert(user, permission);
        self
    }

    /// Returns true if `user` may mutate this record.
    pub fn can_write(&self, user: Uuid) -> bool {
        self.owner == user || self.shares.get(&user) == Some(&Permission::Write)
    }

    /// Applies new field values at the given version.
    ///
    /// Named fields are upserted; resolution is whole-record, so the
    /// caller decides the winner before applying.
    pub fn apply_fields(&mut self, fields: &Map<String, Value>, version: u64, now_ms: u64) {
        for (key, value) in fields {
            self.fields.insert(key.clone(), value.clone());
        }
        self.version = version;
        self.updated_at_ms = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(title: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("title".into(), json!(title));
        map
    }

    #[test]
    fn new_record_starts_at_version_one() {
        let record = Record::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), fields("a"), 10);
        assert_eq!(record.version, 1);
        assert_eq!(record.updated_at_ms, 10);
    }

    #[test]
    fn write_permission() {
        let owner = Uuid::new_v4();
        let writer = Uuid::new_v4();
        let reader = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        let record = Record::new(Uuid::new_v4(), Uuid::new_v4(), owner, fields("a"), 0)
            .share_with(writer, Permission::Write)
            .share_with(reader, Permission::Read);

        assert!(record.can_write(owner));
        assert!(record.can_write(writer));
        assert!(!record.can_write(reader));
        assert!(!record.can_write(stranger));
    }

    #[test]
    fn apply_fields_upserts_and_bumps() {
        let mut record =
            Record::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), fields("a"), 0);

        let mut update = Map::new();
        update.insert("title".into(), json!("b"));
        update.insert("done".into(), json!(true));
        record.apply_fields(&update, 2, 99);

        assert_eq!(record.version, 2);
        assert_eq!(record.updated_at_ms, 99);
        assert_eq!(record.fields.get("title"), Some(&json!("b")));
        assert_eq!(record.fields.get("done"), Some(&json!(true)));
    }

    #[test]
    fn permission_serde_names() {
        assert_eq!(serde_json::to_string(&Permission::Read).unwrap(), "\"read\"");
        assert_eq!(serde_json::to_string(&Permission::Write).unwrap(), "\"write\"");
    }
}
