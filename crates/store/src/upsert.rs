//! Guarded upserts.
//!
//! An [`Upsert`] describes an `INSERT .. ON CONFLICT .. DO UPDATE` whose
//! update only applies when the incoming row is at least as new as the stored
//! one. The guard column is part of the description, so every upsert in the
//! store enforces last-writer-wins by event time, never by arrival order.

use std::sync::LazyLock;

/// Outcome of a guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Write {
    /// Inserted, or updated because the incoming event is not older.
    Applied(i64),
    /// The stored row is newer; nothing changed.
    Stale(i64),
    /// The write was invalid (e.g. an untaggable version); nothing changed.
    Rejected,
}
impl Write {
    /// Row id, unless the write was rejected.
    pub fn id(&self) -> Option<i64> {
        match self {
            Self::Applied(id) | Self::Stale(id) => Some(*id),
            Self::Rejected => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Description of a guarded upsert against one table.
#[derive(Debug, Clone, Copy)]
pub struct Upsert {
    pub table: &'static str,
    /// Inserted columns, in bind order.
    pub columns: &'static [&'static str],
    /// Columns of the unique constraint that decides "same row".
    pub conflict: &'static [&'static str],
    /// Monotonic column: the update only applies if the incoming value is
    /// greater than or equal to the stored one.
    pub guard: &'static str,
    /// Columns overwritten when the guard passes.
    pub updates: &'static [&'static str],
}

impl Upsert {
    /// `INSERT .. RETURNING id`, returning no row when the guard rejects the update.
    pub fn sql(&self) -> String {
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        let updates = self
            .updates
            .iter()
            .map(|column| format!("{column} = excluded.{column}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {table} ({columns}) VALUES ({placeholders}) \
             ON CONFLICT ({conflict}) DO UPDATE SET {updates} \
             WHERE excluded.{guard} >= {table}.{guard} \
             RETURNING id",
            table = self.table,
            columns = self.columns.join(", "),
            conflict = self.conflict.join(", "),
            guard = self.guard,
        )
    }

    /// `SELECT id` by the conflict key; binds the conflict columns in order.
    pub fn lookup_sql(&self) -> String {
        let conditions = self.conflict.iter().map(|column| format!("{column} = ?")).collect::<Vec<_>>().join(" AND ");
        format!("SELECT id FROM {table} WHERE {conditions}", table = self.table)
    }
}

pub(crate) const ENTRY: Upsert = Upsert {
    table: "entries",
    columns: &["name", "source", "homepage", "updated"],
    conflict: &["name", "source"],
    guard: "updated",
    updates: &["homepage", "updated"],
};

pub(crate) const VERSION: Upsert = Upsert {
    table: "versions",
    columns: &["entry_id", "version", "tag", "compiler", "location", "description", "updated"],
    conflict: &["entry_id", "tag"],
    guard: "updated",
    // `deprecated` is never touched by an upsert, it only moves forward
    // through deprecation.
    updates: &["version", "compiler", "location", "description", "updated"],
};

pub(crate) static ENTRY_SQL: LazyLock<(String, String)> = LazyLock::new(|| (ENTRY.sql(), ENTRY.lookup_sql()));
pub(crate) static VERSION_SQL: LazyLock<(String, String)> = LazyLock::new(|| (VERSION.sql(), VERSION.lookup_sql()));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_sql() {
        assert_eq!(
            ENTRY.sql(),
            "INSERT INTO entries (name, source, homepage, updated) VALUES (?, ?, ?, ?) \
             ON CONFLICT (name, source) DO UPDATE SET homepage = excluded.homepage, updated = excluded.updated \
             WHERE excluded.updated >= entries.updated \
             RETURNING id"
        );
        assert_eq!(ENTRY.lookup_sql(), "SELECT id FROM entries WHERE name = ? AND source = ?");
    }

    #[test]
    fn test_guard_is_part_of_every_upsert() {
        for upsert in [ENTRY, VERSION] {
            let sql = upsert.sql();
            assert!(sql.contains(&format!("WHERE excluded.{0} >= {1}.{0}", upsert.guard, upsert.table)));
            assert!(upsert.columns.contains(&upsert.guard));
            assert!(!upsert.updates.contains(&"deprecated"));
        }
    }

    #[test]
    fn test_write_id() {
        assert_eq!(Write::Applied(3).id(), Some(3));
        assert_eq!(Write::Stale(4).id(), Some(4));
        assert_eq!(Write::Rejected.id(), None);
        assert!(!Write::Stale(4).is_applied());
    }
}
