//! Account store: user records, their shared links and the append-only log.
//!
//! Writes are field-scoped: each one touches only the columns or link rows
//! it owns, so concurrent requests for the same user do not overwrite each
//! other. Writes never log implicitly; every mutation site calls
//! [`append_log`] itself with the record the write returned.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use uuid::Uuid;

use crate::db::DbConnection;
use crate::error::StoreError;
use crate::models::{ActionType, CounterKind, Language, LanguageCounts, SharedLink, User};

const USER_COLUMNS: &str = "id, username, email, password_hash, is_email_verified, otp_hash, otp_expires, \
     last_login, created_at, generate_counts, refactor_counts, run_counts";

/// Columns as stored, before the JSON counter blobs are decoded.
struct UserRow {
    id: String,
    username: String,
    email: String,
    password_hash: String,
    is_email_verified: bool,
    otp_hash: Option<String>,
    otp_expires: Option<DateTime<Utc>>,
    last_login: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    generate_counts: String,
    refactor_counts: String,
    run_counts: String,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            is_email_verified: row.get(4)?,
            otp_hash: row.get(5)?,
            otp_expires: row.get(6)?,
            last_login: row.get(7)?,
            created_at: row.get(8)?,
            generate_counts: row.get(9)?,
            refactor_counts: row.get(10)?,
            run_counts: row.get(11)?,
        })
    }

    fn into_user(self, shared_links: Vec<SharedLink>) -> Result<User, StoreError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| StoreError::Corrupt(format!("user id {:?}: {e}", self.id)))?;

        Ok(User {
            id,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            is_email_verified: self.is_email_verified,
            otp_hash: self.otp_hash,
            otp_expires: self.otp_expires,
            last_login: self.last_login,
            created_at: self.created_at,
            generate_counts: serde_json::from_str(&self.generate_counts)?,
            refactor_counts: serde_json::from_str(&self.refactor_counts)?,
            run_counts: serde_json::from_str(&self.run_counts)?,
            shared_links,
        })
    }
}

fn load_links(conn: &Connection, user_id: &str) -> Result<Vec<SharedLink>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT share_id, title, expiry_time FROM shared_links WHERE user_id = ? ORDER BY rowid",
    )?;
    let links = stmt
        .query_map([user_id], |row| {
            Ok(SharedLink {
                share_id: row.get(0)?,
                title: row.get(1)?,
                expiry_time: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(links)
}

fn find_one(conn: &Connection, filter: &str, value: &str) -> Result<Option<User>, StoreError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {filter} = ?");
    let row = conn
        .query_row(&sql, [value], UserRow::from_row)
        .optional()?;

    match row {
        Some(row) => {
            let links = load_links(conn, &row.id)?;
            row.into_user(links).map(Some)
        }
        None => Ok(None),
    }
}

fn counts_json(counts: &LanguageCounts) -> Result<String, StoreError> {
    Ok(serde_json::to_string(counts)?)
}

fn insert_links(conn: &Connection, user: &User) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "INSERT INTO shared_links (share_id, user_id, title, expiry_time) VALUES (?, ?, ?, ?)",
    )?;
    for link in &user.shared_links {
        stmt.execute(params![
            link.share_id,
            user.id.to_string(),
            link.title,
            link.expiry_time
        ])
        .map_err(StoreError::from_sqlite)?;
    }
    Ok(())
}

pub async fn insert_user(conn: &DbConnection, user: &User) -> Result<(), StoreError> {
    let mut conn = conn.lock().await;
    let tx = conn.transaction()?;

    tx.execute(
        &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
        params![
            user.id.to_string(),
            user.username,
            user.email,
            user.password_hash,
            user.is_email_verified,
            user.otp_hash,
            user.otp_expires,
            user.last_login,
            user.created_at,
            counts_json(&user.generate_counts)?,
            counts_json(&user.refactor_counts)?,
            counts_json(&user.run_counts)?,
        ],
    )
    .map_err(StoreError::from_sqlite)?;
    insert_links(&tx, user)?;

    tx.commit()?;
    Ok(())
}

/// Runs a single-row UPDATE and reads the record back under the same lock.
/// `Ok(None)` when the WHERE clause matched nothing.
async fn update_where<P: Params + Send>(
    conn: &DbConnection,
    id: Uuid,
    sql: &str,
    params: P,
) -> Result<Option<User>, StoreError> {
    let conn = conn.lock().await;
    let changed = conn.execute(sql, params).map_err(StoreError::from_sqlite)?;
    if changed == 0 {
        return Ok(None);
    }
    reload(&conn, id).map(Some)
}

fn reload(conn: &Connection, id: Uuid) -> Result<User, StoreError> {
    find_one(conn, "id", &id.to_string())?.ok_or(StoreError::Missing)
}

pub async fn set_otp(
    conn: &DbConnection,
    id: Uuid,
    otp_hash: &str,
    otp_expires: DateTime<Utc>,
) -> Result<User, StoreError> {
    update_where(
        conn,
        id,
        "UPDATE users SET otp_hash = ?, otp_expires = ? WHERE id = ?",
        (otp_hash, otp_expires, id.to_string()),
    )
    .await?
    .ok_or(StoreError::Missing)
}

/// Marks the email verified, installs the password and consumes the OTP.
/// `Ok(None)` if `checked_otp_hash` is no longer the stored one.
pub async fn verify_email(
    conn: &DbConnection,
    id: Uuid,
    checked_otp_hash: &str,
    password_hash: &str,
) -> Result<Option<User>, StoreError> {
    update_where(
        conn,
        id,
        "UPDATE users SET password_hash = ?, is_email_verified = 1, otp_hash = NULL, otp_expires = NULL
         WHERE id = ? AND otp_hash = ?",
        (password_hash, id.to_string(), checked_otp_hash),
    )
    .await
}

/// Installs a new password and consumes the OTP it was authorised by.
/// `Ok(None)` if `checked_otp_hash` is no longer the stored one.
pub async fn reset_password(
    conn: &DbConnection,
    id: Uuid,
    checked_otp_hash: &str,
    password_hash: &str,
) -> Result<Option<User>, StoreError> {
    update_where(
        conn,
        id,
        "UPDATE users SET password_hash = ?, otp_hash = NULL, otp_expires = NULL
         WHERE id = ? AND otp_hash = ?",
        (password_hash, id.to_string(), checked_otp_hash),
    )
    .await
}

pub async fn set_password(
    conn: &DbConnection,
    id: Uuid,
    password_hash: &str,
) -> Result<User, StoreError> {
    update_where(
        conn,
        id,
        "UPDATE users SET password_hash = ? WHERE id = ?",
        (password_hash, id.to_string()),
    )
    .await?
    .ok_or(StoreError::Missing)
}

pub async fn set_username(conn: &DbConnection, id: Uuid, username: &str) -> Result<User, StoreError> {
    update_where(
        conn,
        id,
        "UPDATE users SET username = ? WHERE id = ?",
        (username, id.to_string()),
    )
    .await?
    .ok_or(StoreError::Missing)
}

pub async fn set_email(conn: &DbConnection, id: Uuid, email: &str) -> Result<User, StoreError> {
    update_where(
        conn,
        id,
        "UPDATE users SET email = ? WHERE id = ?",
        (email, id.to_string()),
    )
    .await?
    .ok_or(StoreError::Missing)
}

pub async fn set_last_login(
    conn: &DbConnection,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<User, StoreError> {
    update_where(
        conn,
        id,
        "UPDATE users SET last_login = ? WHERE id = ?",
        (at, id.to_string()),
    )
    .await?
    .ok_or(StoreError::Missing)
}

/// Stamps `last_login = now` only if it is unset or older than `stale_before`.
/// `Ok(None)` when the stamp was still fresh.
///
/// Timestamps are all written in UTC by the same `ToSql` impl, so text
/// order in SQL is time order.
pub async fn refresh_last_login(
    conn: &DbConnection,
    id: Uuid,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
) -> Result<Option<User>, StoreError> {
    update_where(
        conn,
        id,
        "UPDATE users SET last_login = ? WHERE id = ? AND (last_login IS NULL OR last_login < ?)",
        (now, id.to_string(), stale_before),
    )
    .await
}

fn counts_column(kind: CounterKind) -> &'static str {
    match kind {
        CounterKind::Generate => "generate_counts",
        CounterKind::Refactor => "refactor_counts",
        CounterKind::Run => "run_counts",
    }
}

/// Bumps one usage counter. The read and write happen under one lock hold.
pub async fn increment_usage(
    conn: &DbConnection,
    id: Uuid,
    kind: CounterKind,
    language: Language,
) -> Result<User, StoreError> {
    let mut conn = conn.lock().await;
    let tx = conn.transaction()?;
    let column = counts_column(kind);

    let raw: String = tx
        .query_row(
            &format!("SELECT {column} FROM users WHERE id = ?"),
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(StoreError::Missing)?;
    let mut counts: LanguageCounts = serde_json::from_str(&raw)?;
    counts.increment(language);
    tx.execute(
        &format!("UPDATE users SET {column} = ? WHERE id = ?"),
        params![counts_json(&counts)?, id.to_string()],
    )?;

    let user = reload(&tx, id)?;
    tx.commit()?;
    Ok(user)
}

/// Adds a link unless the user already has this `shareId`, in which case
/// `Ok(None)` and nothing is written. A `shareId` owned by someone else is a
/// conflict.
pub async fn add_shared_link(
    conn: &DbConnection,
    id: Uuid,
    link: &SharedLink,
) -> Result<Option<User>, StoreError> {
    let conn = conn.lock().await;
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM users WHERE id = ?)",
        [id.to_string()],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(StoreError::Missing);
    }

    let owner: Option<String> = conn
        .query_row(
            "SELECT user_id FROM shared_links WHERE share_id = ?",
            [&link.share_id],
            |row| row.get(0),
        )
        .optional()?;

    match owner {
        Some(owner) if owner == id.to_string() => Ok(None),
        Some(_) => Err(StoreError::Conflict("shareId")),
        None => {
            conn.execute(
                "INSERT INTO shared_links (share_id, user_id, title, expiry_time) VALUES (?, ?, ?, ?)",
                params![link.share_id, id.to_string(), link.title, link.expiry_time],
            )
            .map_err(StoreError::from_sqlite)?;
            reload(&conn, id).map(Some)
        }
    }
}

/// `Ok(None)` if the user has no link with this id.
pub async fn remove_shared_link(
    conn: &DbConnection,
    id: Uuid,
    share_id: &str,
) -> Result<Option<User>, StoreError> {
    update_where(
        conn,
        id,
        "DELETE FROM shared_links WHERE share_id = ? AND user_id = ?",
        (share_id, id.to_string()),
    )
    .await
}

/// Deletes the user's links that expire at or before `now`. Returns how many
/// went away and the remaining record.
pub async fn prune_expired_links(
    conn: &DbConnection,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<(usize, User), StoreError> {
    let conn = conn.lock().await;
    let pruned = conn.execute(
        "DELETE FROM shared_links WHERE user_id = ? AND expiry_time <= ?",
        params![id.to_string(), now],
    )?;
    Ok((pruned, reload(&conn, id)?))
}

/// Removes the user and, by cascade, their shared links. Returns `true` if a row went away.
pub async fn delete_user(conn: &DbConnection, id: Uuid) -> Result<bool, StoreError> {
    let deleted = conn
        .lock()
        .await
        .execute("DELETE FROM users WHERE id = ?", [id.to_string()])?;
    Ok(deleted > 0)
}

pub async fn find_by_id(conn: &DbConnection, id: Uuid) -> Result<Option<User>, StoreError> {
    find_one(&*conn.lock().await, "id", &id.to_string())
}

pub async fn find_by_email(conn: &DbConnection, email: &str) -> Result<Option<User>, StoreError> {
    find_one(&*conn.lock().await, "email", email)
}

pub async fn find_by_username(
    conn: &DbConnection,
    username: &str,
) -> Result<Option<User>, StoreError> {
    find_one(&*conn.lock().await, "username", username)
}

/// Finds the owner of a shared link without knowing who they are.
pub async fn find_by_share_id(
    conn: &DbConnection,
    share_id: &str,
) -> Result<Option<User>, StoreError> {
    let conn = conn.lock().await;
    let owner: Option<String> = conn
        .query_row(
            "SELECT user_id FROM shared_links WHERE share_id = ?",
            [share_id],
            |row| row.get(0),
        )
        .optional()?;

    match owner {
        Some(user_id) => find_one(&conn, "id", &user_id),
        None => Ok(None),
    }
}

/// Appends a snapshot of the user's mutable fields to the log.
pub async fn append_log(
    conn: &DbConnection,
    user: &User,
    action: ActionType,
) -> Result<(), StoreError> {
    let shared_links = serde_json::to_string(&user.shared_links)?;

    conn.lock().await.execute(
        "INSERT INTO user_logs (user_id, username, email, last_login, created_at, generate_counts,
            refactor_counts, run_counts, shared_links, action_type, logged_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            user.id.to_string(),
            user.username,
            user.email,
            user.last_login,
            user.created_at,
            counts_json(&user.generate_counts)?,
            counts_json(&user.refactor_counts)?,
            counts_json(&user.run_counts)?,
            shared_links,
            action.as_str(),
            Utc::now(),
        ],
    )?;
    Ok(())
}

/// Number of log entries written for a user. The service itself never reads logs back.
pub async fn log_count(conn: &DbConnection, user_id: Uuid) -> Result<i64, StoreError> {
    let count = conn.lock().await.query_row(
        "SELECT COUNT(*) FROM user_logs WHERE user_id = ?",
        [user_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}
