//! SQLite-based mail storage

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use super::traits::MailStore;
use crate::models::{
    Category, EmailAddress, MailAccount, Message, UnsubscribeAttempt, UnsubscribeMethod,
    UnsubscribeStatus,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks
/// which migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        -- Connected mailboxes
        CREATE TABLE accounts (
            id INTEGER PRIMARY KEY,
            owner_id INTEGER NOT NULL,
            provider_uid TEXT NOT NULL,
            email TEXT NOT NULL,
            access_token TEXT NOT NULL,
            refresh_token TEXT NOT NULL,
            token_expires_at TEXT,
            scopes TEXT NOT NULL DEFAULT '[]',
            last_history_id TEXT,
            UNIQUE (owner_id, provider_uid),
            UNIQUE (owner_id, email)
        );

        -- User-defined mail categories
        CREATE TABLE categories (
            id INTEGER PRIMARY KEY,
            owner_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            description TEXT
        );

        CREATE INDEX idx_categories_owner ON categories(owner_id);

        -- Normalized mailbox items. (account_id, gmail_id) uniqueness is
        -- the sole de-duplication guarantee in the system.
        CREATE TABLE messages (
            id INTEGER PRIMARY KEY,
            account_id INTEGER NOT NULL,
            owner_id INTEGER NOT NULL,
            gmail_id TEXT NOT NULL,
            thread_id TEXT NOT NULL,
            subject TEXT NOT NULL DEFAULT '',
            body TEXT,
            preview TEXT NOT NULL DEFAULT '',
            from_name TEXT,
            from_email TEXT,
            to_addrs TEXT NOT NULL DEFAULT '[]',
            cc_addrs TEXT NOT NULL DEFAULT '[]',
            label_ids TEXT NOT NULL DEFAULT '[]',
            category_id INTEGER,
            summary TEXT,
            received_at TEXT,
            archived_at TEXT,
            internal_date INTEGER NOT NULL DEFAULT 0,
            unsub_link TEXT,
            unsub_method TEXT,
            unsub_status TEXT NOT NULL DEFAULT 'pending',
            unsub_attempted_at TEXT,
            unsub_completed_at TEXT,
            unsub_error TEXT,
            UNIQUE (account_id, gmail_id),
            FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_messages_account ON messages(account_id);
        CREATE INDEX idx_messages_received_at ON messages(received_at DESC);
        "#,
    )])
}

/// SQLite-backed mail storage
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) the store at the given path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL for concurrent readers during writes; NORMAL sync is safe
        // with WAL; foreign_keys required for ON DELETE CASCADE.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn to_json(addrs: &[EmailAddress]) -> String {
    serde_json::to_string(addrs).unwrap_or_else(|_| "[]".to_string())
}

fn labels_json(labels: &[String]) -> String {
    serde_json::to_string(labels).unwrap_or_else(|_| "[]".to_string())
}

fn datetime_to_sql(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(|d| d.to_rfc3339())
}

fn datetime_from_sql(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref()
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<MailAccount> {
    let scopes: String = row.get("scopes")?;
    let expires_at: Option<String> = row.get("token_expires_at")?;
    Ok(MailAccount {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        provider_uid: row.get("provider_uid")?,
        email: row.get("email")?,
        access_token: row.get("access_token")?,
        refresh_token: row.get("refresh_token")?,
        token_expires_at: datetime_from_sql(expires_at),
        scopes: serde_json::from_str(&scopes).unwrap_or_default(),
        last_history_id: row.get("last_history_id")?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let to_addrs: String = row.get("to_addrs")?;
    let cc_addrs: String = row.get("cc_addrs")?;
    let label_ids: String = row.get("label_ids")?;
    let received_at: Option<String> = row.get("received_at")?;
    let archived_at: Option<String> = row.get("archived_at")?;
    let unsub_status: String = row.get("unsub_status")?;
    let unsub_method: Option<String> = row.get("unsub_method")?;
    let unsub_attempted_at: Option<String> = row.get("unsub_attempted_at")?;
    let unsub_completed_at: Option<String> = row.get("unsub_completed_at")?;

    Ok(Message {
        id: row.get("id")?,
        account_id: row.get("account_id")?,
        owner_id: row.get("owner_id")?,
        gmail_id: row.get("gmail_id")?,
        thread_id: row.get("thread_id")?,
        subject: row.get("subject")?,
        body: row.get("body")?,
        preview: row.get("preview")?,
        from_name: row.get("from_name")?,
        from_email: row.get("from_email")?,
        to: serde_json::from_str(&to_addrs).unwrap_or_default(),
        cc: serde_json::from_str(&cc_addrs).unwrap_or_default(),
        label_ids: serde_json::from_str(&label_ids).unwrap_or_default(),
        category_id: row.get("category_id")?,
        summary: row.get("summary")?,
        received_at: datetime_from_sql(received_at),
        archived_at: datetime_from_sql(archived_at),
        internal_date: row.get("internal_date")?,
        unsubscribe: UnsubscribeAttempt {
            link: row.get("unsub_link")?,
            method: unsub_method.as_deref().and_then(UnsubscribeMethod::parse),
            status: UnsubscribeStatus::parse(&unsub_status).unwrap_or(UnsubscribeStatus::Pending),
            attempted_at: datetime_from_sql(unsub_attempted_at),
            completed_at: datetime_from_sql(unsub_completed_at),
            error: row.get("unsub_error")?,
        },
    })
}

impl MailStore for SqliteMailStore {
    fn insert_account(&self, mut account: MailAccount) -> Result<MailAccount> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO accounts (owner_id, provider_uid, email, access_token, refresh_token,
                                   token_expires_at, scopes, last_history_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                account.owner_id,
                account.provider_uid,
                account.email,
                account.access_token,
                account.refresh_token,
                datetime_to_sql(account.token_expires_at),
                serde_json::to_string(&account.scopes)?,
                account.last_history_id,
            ],
        )
        .context("Failed to insert account")?;
        account.id = conn.last_insert_rowid();
        Ok(account)
    }

    fn get_account(&self, id: i64) -> Result<Option<MailAccount>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM accounts WHERE id = ?1", [id], account_from_row)
            .optional()
            .context("Failed to query account")
    }

    fn get_account_by_email(&self, email: &str) -> Result<Option<MailAccount>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM accounts WHERE email = ?1",
            [email],
            account_from_row,
        )
        .optional()
        .context("Failed to query account by email")
    }

    fn update_account_tokens(
        &self,
        id: i64,
        access_token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET access_token = ?2, token_expires_at = ?3 WHERE id = ?1",
            params![id, access_token, datetime_to_sql(expires_at)],
        )?;
        Ok(())
    }

    fn advance_history_cursor(&self, id: i64, history_id: &str) -> Result<bool> {
        let _: u64 = history_id
            .parse()
            .with_context(|| format!("non-numeric history cursor: {}", history_id))?;

        let conn = self.conn.lock().unwrap();
        // Greater-than guard: racing notifications can never move the
        // cursor backwards.
        let changed = conn.execute(
            "UPDATE accounts SET last_history_id = ?2
             WHERE id = ?1
               AND (last_history_id IS NULL
                    OR CAST(last_history_id AS INTEGER) < CAST(?2 AS INTEGER))",
            params![id, history_id],
        )?;
        Ok(changed > 0)
    }

    fn delete_account(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM accounts WHERE id = ?1", [id])?;
        Ok(())
    }

    fn insert_message(&self, mut message: Message) -> Result<Option<Message>> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "INSERT INTO messages (account_id, owner_id, gmail_id, thread_id, subject, body,
                                   preview, from_name, from_email, to_addrs, cc_addrs, label_ids,
                                   category_id, summary, received_at, archived_at, internal_date,
                                   unsub_link, unsub_method, unsub_status, unsub_attempted_at,
                                   unsub_completed_at, unsub_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, ?19, ?20, ?21, ?22, ?23)
             ON CONFLICT (account_id, gmail_id) DO NOTHING",
            params![
                message.account_id,
                message.owner_id,
                message.gmail_id,
                message.thread_id,
                message.subject,
                message.body,
                message.preview,
                message.from_name,
                message.from_email,
                to_json(&message.to),
                to_json(&message.cc),
                labels_json(&message.label_ids),
                message.category_id,
                message.summary,
                datetime_to_sql(message.received_at),
                datetime_to_sql(message.archived_at),
                message.internal_date,
                message.unsubscribe.link,
                message.unsubscribe.method.map(|m| m.as_str()),
                message.unsubscribe.status.as_str(),
                datetime_to_sql(message.unsubscribe.attempted_at),
                datetime_to_sql(message.unsubscribe.completed_at),
                message.unsubscribe.error,
            ],
        )?;

        if changed == 0 {
            // Re-delivery of an already-stored provider id: swallowed no-op
            return Ok(None);
        }
        message.id = conn.last_insert_rowid();
        Ok(Some(message))
    }

    fn has_message(&self, account_id: i64, gmail_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE account_id = ?1 AND gmail_id = ?2",
            params![account_id, gmail_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn get_message(&self, id: i64) -> Result<Option<Message>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM messages WHERE id = ?1", [id], message_from_row)
            .optional()
            .context("Failed to query message")
    }

    fn list_messages_for_account(&self, account_id: i64) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM messages WHERE account_id = ?1
             ORDER BY received_at IS NULL, received_at DESC",
        )?;
        let messages = stmt
            .query_map([account_id], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    fn set_message_archived(&self, id: i64, archived_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE messages SET archived_at = ?2 WHERE id = ?1",
            params![id, archived_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn update_message_enrichment(
        &self,
        id: i64,
        category_id: Option<i64>,
        summary: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE messages SET
                 category_id = COALESCE(?2, category_id),
                 summary = COALESCE(?3, summary)
             WHERE id = ?1",
            params![id, category_id, summary],
        )?;
        Ok(())
    }

    fn set_unsubscribe_attempt(&self, id: i64, attempt: &UnsubscribeAttempt) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        // The whole tuple is written in one statement; a new attempt can
        // never leave a partial mix of old and new fields behind.
        conn.execute(
            "UPDATE messages SET
                 unsub_link = ?2,
                 unsub_method = ?3,
                 unsub_status = ?4,
                 unsub_attempted_at = ?5,
                 unsub_completed_at = ?6,
                 unsub_error = ?7
             WHERE id = ?1",
            params![
                id,
                attempt.link,
                attempt.method.map(|m| m.as_str()),
                attempt.status.as_str(),
                datetime_to_sql(attempt.attempted_at),
                datetime_to_sql(attempt.completed_at),
                attempt.error,
            ],
        )?;
        Ok(())
    }

    fn delete_message(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
        Ok(())
    }

    fn insert_category(&self, mut category: Category) -> Result<Category> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO categories (owner_id, name, description) VALUES (?1, ?2, ?3)",
            params![category.owner_id, category.name, category.description],
        )?;
        category.id = conn.last_insert_rowid();
        Ok(category)
    }

    fn list_categories(&self, owner_id: i64) -> Result<Vec<Category>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, name, description FROM categories
             WHERE owner_id = ?1 ORDER BY id",
        )?;
        let categories = stmt
            .query_map([owner_id], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }
}
