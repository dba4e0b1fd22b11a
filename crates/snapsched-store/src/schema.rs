//! Database schema

/// Object-store key holding the dump of a filesystem's schedule database
pub const DB_OBJECT_NAME: &str = "snap_db_v0";

/// Tables that must exist for a database to be usable
pub(crate) const REQUIRED_TABLES: [&str; 2] = ["schedules", "schedules_meta"];

/// Schedule paths and their rules.
///
/// Rules are unique per path on (start, repeat), where `repeat` is the
/// interval length in seconds. Deleting a path deletes its rules.
pub(crate) const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS schedules (
        id INTEGER PRIMARY KEY ASC,
        path TEXT NOT NULL UNIQUE,
        subvol TEXT,
        active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS schedules_meta (
        id INTEGER PRIMARY KEY ASC,
        schedule_id INTEGER NOT NULL,
        start TEXT NOT NULL,
        first TEXT,
        last TEXT,
        last_pruned TEXT,
        created TEXT NOT NULL,
        repeat INTEGER NOT NULL,
        schedule TEXT NOT NULL,
        created_count INTEGER NOT NULL DEFAULT 0,
        pruned_count INTEGER NOT NULL DEFAULT 0,
        retention TEXT NOT NULL DEFAULT '',
        FOREIGN KEY (schedule_id) REFERENCES schedules(id) ON DELETE CASCADE,
        UNIQUE (schedule_id, start, repeat)
    );
"#;
