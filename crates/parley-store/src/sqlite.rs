//! SQLite-backed implementation of [`ChatStore`].
//!
//! Wraps a single rusqlite Connection in a Mutex, configures WAL mode on
//! open, and emits the same change-notification events as the in-memory
//! store. Keyword lists are stored as JSON arrays; settings as one JSON
//! document per tenant.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use parley_core::error::{ParleyError, Result};
use parley_core::events::ChatEvent;
use parley_core::types::{
    MatchType, Message, MessageStatus, OperatorMode, Rule, RuleKind, Sender, Session,
    SessionStatus, VisitorId, WidgetSettings,
};

use crate::store::{ChatStore, EventReceiver, EVENT_CHANNEL_CAPACITY};

/// Thread-safe SQLite chat store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    events: broadcast::Sender<ChatEvent>,
}

impl SqliteStore {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, and foreign keys, and
    /// creates the schema when missing.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| ParleyError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| ParleyError::Storage(format!("Failed to set pragmas: {}", e)))?;

        Self::init_schema(&conn)?;
        info!("Chat store opened at {}", path.display());

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            events,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rules (
                 id          TEXT PRIMARY KEY,
                 tenant      TEXT NOT NULL,
                 kind        TEXT NOT NULL,
                 position    INTEGER NOT NULL,
                 keywords    TEXT NOT NULL,
                 match_type  TEXT NOT NULL,
                 response    TEXT NOT NULL,
                 is_html     INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX IF NOT EXISTS idx_rules_tenant_kind
                 ON rules (tenant, kind, position);

             CREATE TABLE IF NOT EXISTS settings (
                 tenant      TEXT PRIMARY KEY,
                 data        TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS sessions (
                 id           TEXT PRIMARY KEY,
                 tenant       TEXT NOT NULL,
                 visitor_id   TEXT NOT NULL,
                 status       TEXT NOT NULL,
                 created_at   INTEGER NOT NULL,
                 visitor_name TEXT,
                 pinned       INTEGER NOT NULL DEFAULT 0,
                 notes        TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_sessions_visitor
                 ON sessions (tenant, visitor_id, created_at);

             CREATE TABLE IF NOT EXISTS messages (
                 id          TEXT PRIMARY KEY,
                 session_id  TEXT NOT NULL,
                 content     TEXT NOT NULL,
                 sender      TEXT NOT NULL,
                 is_html     INTEGER NOT NULL DEFAULT 0,
                 created_at  INTEGER NOT NULL,
                 status      TEXT,
                 read_at     INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_messages_session
                 ON messages (session_id, created_at);",
        )
        .map_err(|e| ParleyError::Storage(format!("Failed to create schema: {}", e)))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ParleyError::Storage(format!("connection lock poisoned: {}", e)))?;
        f(&conn)
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn rules(&self, tenant: &str, kind: RuleKind) -> Result<Vec<Rule>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, keywords, match_type, response, is_html
                     FROM rules WHERE tenant = ?1 AND kind = ?2
                     ORDER BY position ASC",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map(rusqlite::params![tenant, kind.as_str()], row_to_rule)
                .map_err(storage_err)?;

            let mut rules = Vec::new();
            for row in rows {
                rules.push(row.map_err(storage_err)?);
            }
            Ok(rules)
        })
    }

    async fn put_rules(&self, tenant: &str, kind: RuleKind, rules: Vec<Rule>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM rules WHERE tenant = ?1 AND kind = ?2",
                rusqlite::params![tenant, kind.as_str()],
            )
            .map_err(storage_err)?;

            for (position, rule) in rules.iter().enumerate() {
                let keywords = serde_json::to_string(&rule.keywords)?;
                conn.execute(
                    "INSERT INTO rules (id, tenant, kind, position, keywords, match_type, response, is_html)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        rule.id.to_string(),
                        tenant,
                        kind.as_str(),
                        position as i64,
                        keywords,
                        rule.match_type.as_str(),
                        rule.response,
                        rule.is_html as i32,
                    ],
                )
                .map_err(storage_err)?;
            }
            Ok(())
        })?;

        self.emit(ChatEvent::RulesChanged {
            tenant: tenant.to_string(),
            kind,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn settings(&self, tenant: &str) -> Result<WidgetSettings> {
        self.with_conn(|conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM settings WHERE tenant = ?1",
                    rusqlite::params![tenant],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err)?;

            match data {
                Some(json) => Ok(serde_json::from_str(&json)?),
                None => Ok(WidgetSettings::default()),
            }
        })
    }

    async fn update_settings(&self, tenant: &str, settings: WidgetSettings) -> Result<()> {
        let json = serde_json::to_string(&settings)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (tenant, data) VALUES (?1, ?2)
                 ON CONFLICT (tenant) DO UPDATE SET data = excluded.data",
                rusqlite::params![tenant, json],
            )
            .map_err(storage_err)?;
            Ok(())
        })?;

        self.emit(ChatEvent::SettingsUpdated {
            tenant: tenant.to_string(),
            settings,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn set_operator_mode(&self, tenant: &str, mode: OperatorMode) -> Result<()> {
        let mut settings = self.settings(tenant).await?;
        settings.operator_mode = mode;
        self.update_settings(tenant, settings).await
    }

    async fn set_online(&self, tenant: &str, online: bool) -> Result<()> {
        let mut settings = self.settings(tenant).await?;
        settings.is_online = online;
        self.update_settings(tenant, settings).await
    }

    async fn find_or_create_session(&self, tenant: &str, visitor: &VisitorId) -> Result<Session> {
        self.with_conn(|conn| {
            let existing = conn
                .query_row(
                    "SELECT id, visitor_id, status, created_at, visitor_name, pinned, notes
                     FROM sessions WHERE tenant = ?1 AND visitor_id = ?2
                     ORDER BY created_at DESC LIMIT 1",
                    rusqlite::params![tenant, visitor.as_str()],
                    row_to_session,
                )
                .optional()
                .map_err(storage_err)?;

            if let Some(session) = existing {
                return Ok(session);
            }

            let session = Session::new(visitor.clone());
            conn.execute(
                "INSERT INTO sessions (id, tenant, visitor_id, status, created_at, visitor_name, pinned, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    session.id.to_string(),
                    tenant,
                    session.visitor_id.as_str(),
                    session.status.as_str(),
                    session.created_at.timestamp_millis(),
                    session.visitor_name,
                    session.pinned as i32,
                    session.notes,
                ],
            )
            .map_err(storage_err)?;
            Ok(session)
        })
    }

    async fn update_session_status(&self, session_id: Uuid, status: SessionStatus) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET status = ?2 WHERE id = ?1",
                rusqlite::params![session_id.to_string(), status.as_str()],
            )
            .map_err(storage_err)?;
            Ok(())
        })?;

        self.emit(ChatEvent::SessionStatusChanged {
            session_id,
            status,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        let stored = self.with_conn(|conn| {
            // Keep per-session timestamps strictly increasing so append
            // order and created_at order always agree.
            let last: Option<i64> = conn
                .query_row(
                    "SELECT MAX(created_at) FROM messages WHERE session_id = ?1",
                    rusqlite::params![message.session_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;

            let mut stored = message.clone();
            if let Some(last_ms) = last {
                let floor = DateTime::from_timestamp_millis(last_ms).unwrap_or_else(Utc::now)
                    + Duration::milliseconds(1);
                if stored.created_at < floor {
                    stored.created_at = floor;
                }
            }

            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO messages
                         (id, session_id, content, sender, is_html, created_at, status, read_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        stored.id.to_string(),
                        stored.session_id.to_string(),
                        stored.content,
                        stored.sender.as_str(),
                        stored.is_html as i32,
                        stored.created_at.timestamp_millis(),
                        stored.status.map(status_to_str),
                        stored.read_at.map(|t| t.timestamp_millis()),
                    ],
                )
                .map_err(storage_err)?;

            // Id is the dedup key; a re-insert changes nothing and emits
            // no event.
            Ok((inserted > 0).then_some(stored))
        })?;

        if let Some(message) = stored {
            self.emit(ChatEvent::MessageInserted { message });
        }
        Ok(())
    }

    async fn mark_read(&self, message_id: Uuid) -> Result<()> {
        let now = Utc::now();
        let session_id = self.with_conn(|conn| {
            let session: Option<String> = conn
                .query_row(
                    "SELECT session_id FROM messages WHERE id = ?1",
                    rusqlite::params![message_id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err)?;

            if session.is_some() {
                conn.execute(
                    "UPDATE messages SET status = 'read', read_at = ?2 WHERE id = ?1",
                    rusqlite::params![message_id.to_string(), now.timestamp_millis()],
                )
                .map_err(storage_err)?;
            }
            Ok(session)
        })?;

        if let Some(sid) = session_id {
            let session_id = parse_uuid(&sid)?;
            self.emit(ChatEvent::MessageStatusChanged {
                message_id,
                session_id,
                status: MessageStatus::Read,
                read_at: Some(now),
                timestamp: now,
            });
        }
        Ok(())
    }

    async fn messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, session_id, content, sender, is_html, created_at, status, read_at
                     FROM messages WHERE session_id = ?1
                     ORDER BY created_at ASC, id ASC",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map(rusqlite::params![session_id.to_string()], row_to_message)
                .map_err(storage_err)?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row.map_err(storage_err)?);
            }
            Ok(messages)
        })
    }

    fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn storage_err(e: rusqlite::Error) -> ParleyError {
    ParleyError::Storage(e.to_string())
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| ParleyError::Storage(format!("invalid uuid: {}", e)))
}

fn status_to_str(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Sent => "sent",
        MessageStatus::Delivered => "delivered",
        MessageStatus::Read => "read",
    }
}

fn status_from_str(value: &str) -> Option<MessageStatus> {
    match value {
        "sent" => Some(MessageStatus::Sent),
        "delivered" => Some(MessageStatus::Delivered),
        "read" => Some(MessageStatus::Read),
        _ => None,
    }
}

fn sender_from_str(value: &str) -> Sender {
    match value {
        "user" => Sender::User,
        "bot" => Sender::Bot,
        "ai" => Sender::Ai,
        "agent" => Sender::Agent,
        "system" => Sender::System,
        other => {
            warn!(sender = other, "Unknown sender in message row");
            Sender::System
        }
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Rule> {
    let id: String = row.get(0)?;
    let keywords: String = row.get(1)?;
    let match_type: String = row.get(2)?;
    Ok(Rule {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        match_type: MatchType::from_store(&match_type),
        response: row.get(3)?,
        is_html: row.get::<_, i32>(4)? != 0,
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let id: String = row.get(0)?;
    let visitor: String = row.get(1)?;
    let status: String = row.get(2)?;
    Ok(Session {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        visitor_id: VisitorId(visitor),
        status: if status == "closed" {
            SessionStatus::Closed
        } else {
            SessionStatus::Active
        },
        created_at: millis_to_datetime(row.get(3)?),
        visitor_name: row.get(4)?,
        pinned: row.get::<_, i32>(5)? != 0,
        notes: row.get(6)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let sender: String = row.get(3)?;
    let status: Option<String> = row.get(6)?;
    let read_at: Option<i64> = row.get(7)?;
    Ok(Message {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        session_id: Uuid::parse_str(&session_id).unwrap_or_default(),
        content: row.get(2)?,
        sender: sender_from_str(&sender),
        is_html: row.get::<_, i32>(4)? != 0,
        created_at: millis_to_datetime(row.get(5)?),
        status: status.as_deref().and_then(status_from_str),
        read_at: read_at.map(millis_to_datetime),
    })
}

// =============================================================================
// Tests
// =============================================================================
