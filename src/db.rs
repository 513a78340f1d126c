use rusqlite::{Connection, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type DbConnection = Arc<Mutex<Connection>>;

/// Opens the account store at `path` (`:memory:` for a throwaway store) and
/// makes sure the schema exists.
pub fn establish_connection(path: &str) -> Result<DbConnection> {
    let conn = if path == ":memory:" {
        Connection::open_in_memory()?
    } else {
        Connection::open(path)?
    };

    init_schema(&conn)?;

    Ok(Arc::new(Mutex::new(conn)))
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            is_email_verified INTEGER NOT NULL DEFAULT 0,
            otp_hash TEXT,
            otp_expires TEXT,
            last_login TEXT,
            created_at TEXT NOT NULL,
            generate_counts TEXT NOT NULL,
            refactor_counts TEXT NOT NULL,
            run_counts TEXT NOT NULL,
            CHECK ((otp_hash IS NULL) = (otp_expires IS NULL))
        );

        CREATE TABLE IF NOT EXISTS shared_links (
            share_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            expiry_time TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS shared_links_user_id ON shared_links (user_id);

        CREATE TABLE IF NOT EXISTS user_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            username TEXT NOT NULL,
            email TEXT NOT NULL,
            last_login TEXT,
            created_at TEXT NOT NULL,
            generate_counts TEXT NOT NULL,
            refactor_counts TEXT NOT NULL,
            run_counts TEXT NOT NULL,
            shared_links TEXT NOT NULL,
            action_type TEXT NOT NULL,
            logged_at TEXT NOT NULL
        );",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_is_idempotent() {
        let db = establish_connection(":memory:").unwrap();
        let conn = db.lock().await;
        init_schema(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('users', 'shared_links', 'user_logs')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }

    #[tokio::test]
    async fn otp_columns_must_be_set_together() {
        let db = establish_connection(":memory:").unwrap();
        let conn = db.lock().await;
        let result = conn.execute(
            "INSERT INTO users (id, username, email, password_hash, otp_hash, created_at, generate_counts, refactor_counts, run_counts)
             VALUES ('1', 'alice123', 'a@example.com', 'h', 'otp', '2024-01-01T00:00:00Z', '{}', '{}', '{}')",
            [],
        );
        assert!(result.is_err());
    }
}
