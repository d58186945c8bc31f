use std::{
    path::Path,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use manifold_protocol::ChannelKind;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ── Records ──────────────────────────────────────────────────────────────────

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// The durable row for one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    /// Internal record id, referenced by messages.
    pub id: i64,
    /// Opaque public handle, the `sessionId` the rest of the system sees.
    pub public_id: String,
    pub user_id: i64,
    pub channel: ChannelKind,
    pub active: bool,
    pub created_at: i64,
}

/// One stored chat message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub metadata: Option<Value>,
    pub created_at: i64,
}

// ── Store trait ──────────────────────────────────────────────────────────────

/// Durable store contract. Point lookups and writes only.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a session row. Returns the internal record id.
    async fn insert_session(
        &self,
        user_id: i64,
        channel: ChannelKind,
        public_id: &str,
    ) -> Result<i64>;

    /// Flip a session inactive. Unknown ids are a no-op.
    async fn mark_session_inactive(&self, public_id: &str) -> Result<()>;

    /// Append a message to a session. Returns the message id.
    async fn insert_message(
        &self,
        session_record_id: i64,
        role: MessageRole,
        content: &str,
        metadata: Option<&Value>,
    ) -> Result<i64>;

    async fn get_session_by_public_id(&self, public_id: &str) -> Result<Option<SessionRecord>>;

    /// Oldest-first message history, capped at `limit`.
    async fn list_messages(&self, session_record_id: i64, limit: u32) -> Result<Vec<MessageRecord>>;
}

// ── SQLite implementation ────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    public_id: String,
    user_id: i64,
    channel: String,
    active: i64,
    created_at: i64,
}

impl SessionRow {
    fn into_record(self) -> Result<SessionRecord> {
        Ok(SessionRecord {
            id: self.id,
            public_id: self.public_id,
            user_id: self.user_id,
            channel: ChannelKind::from_str(&self.channel)
                .map_err(|e| anyhow::anyhow!("corrupt session row: {e}"))?,
            active: self.active != 0,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    session_id: i64,
    role: String,
    content: String,
    metadata: Option<String>,
    created_at: i64,
}

impl MessageRow {
    fn into_record(self) -> MessageRecord {
        let role = match self.role.as_str() {
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::User,
        };
        MessageRecord {
            id: self.id,
            session_id: self.session_id,
            role,
            content: self.content,
            metadata: self.metadata.and_then(|m| serde_json::from_str(&m).ok()),
            created_at: self.created_at,
        }
    }
}

/// SQLite-backed session store.
pub struct SqliteStore {
    pool: sqlx::SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and initialise the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = sqlx::SqlitePool::connect(&url).await?;
        Self::init(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Create tables if they don't exist.
    pub async fn init(pool: &sqlx::SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sessions (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                public_id  TEXT NOT NULL UNIQUE,
                user_id    INTEGER NOT NULL,
                channel    TEXT NOT NULL,
                active     INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS messages (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES sessions(id),
                role       TEXT NOT NULL,
                content    TEXT NOT NULL,
                metadata   TEXT,
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id)")
            .execute(pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert_session(
        &self,
        user_id: i64,
        channel: ChannelKind,
        public_id: &str,
    ) -> Result<i64> {
        let res = sqlx::query(
            "INSERT INTO sessions (public_id, user_id, channel, active, created_at)
             VALUES (?, ?, ?, 1, ?)",
        )
        .bind(public_id)
        .bind(user_id)
        .bind(channel.as_str())
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(res.last_insert_rowid())
    }

    async fn mark_session_inactive(&self, public_id: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET active = 0 WHERE public_id = ?")
            .bind(public_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_message(
        &self,
        session_record_id: i64,
        role: MessageRole,
        content: &str,
        metadata: Option<&Value>,
    ) -> Result<i64> {
        let meta = metadata.map(|m| m.to_string());
        let res = sqlx::query(
            "INSERT INTO messages (session_id, role, content, metadata, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_record_id)
        .bind(role.as_str())
        .bind(content)
        .bind(meta)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(res.last_insert_rowid())
    }

    async fn get_session_by_public_id(&self, public_id: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE public_id = ?")
            .bind(public_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SessionRow::into_record).transpose()
    }

    async fn list_messages(
        &self,
        session_record_id: i64,
        limit: u32,
    ) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE session_id = ? ORDER BY id ASC LIMIT ?",
        )
        .bind(session_record_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MessageRow::into_record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteStore::init(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    #[tokio::test]
    async fn test_insert_and_lookup_session() {
        let store = store().await;
        let id = store
            .insert_session(42, ChannelKind::Webchat, "S1")
            .await
            .unwrap();
        assert!(id > 0);

        let rec = store.get_session_by_public_id("S1").await.unwrap().unwrap();
        assert_eq!(rec.id, id);
        assert_eq!(rec.user_id, 42);
        assert_eq!(rec.channel, ChannelKind::Webchat);
        assert!(rec.active);
    }

    #[tokio::test]
    async fn test_mark_inactive() {
        let store = store().await;
        store
            .insert_session(42, ChannelKind::Whatsapp, "S1")
            .await
            .unwrap();
        store.mark_session_inactive("S1").await.unwrap();
        let rec = store.get_session_by_public_id("S1").await.unwrap().unwrap();
        assert!(!rec.active);

        // Unknown id is a no-op, not an error.
        store.mark_session_inactive("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_session_is_none() {
        let store = store().await;
        assert!(store.get_session_by_public_id("S9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_messages_ordered_and_limited() {
        let store = store().await;
        let sid = store
            .insert_session(7, ChannelKind::Webchat, "S1")
            .await
            .unwrap();

        store
            .insert_message(sid, MessageRole::User, "first", None)
            .await
            .unwrap();
        store
            .insert_message(sid, MessageRole::Assistant, "second", None)
            .await
            .unwrap();
        store
            .insert_message(sid, MessageRole::User, "third", None)
            .await
            .unwrap();

        let all = store.list_messages(sid, 50).await.unwrap();
        let contents: Vec<&str> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second", "third"]);
        assert_eq!(all[1].role, MessageRole::Assistant);

        let capped = store.list_messages(sid, 2).await.unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn test_message_metadata_round_trip() {
        let store = store().await;
        let sid = store
            .insert_session(7, ChannelKind::Slack, "S1")
            .await
            .unwrap();
        let meta = serde_json::json!({ "model": "m1", "latencyMs": 120 });
        store
            .insert_message(sid, MessageRole::Assistant, "hi", Some(&meta))
            .await
            .unwrap();

        let msgs = store.list_messages(sid, 10).await.unwrap();
        assert_eq!(msgs[0].metadata.as_ref().unwrap()["model"], "m1");
    }

    #[tokio::test]
    async fn test_duplicate_public_id_rejected() {
        let store = store().await;
        store
            .insert_session(1, ChannelKind::Webchat, "S1")
            .await
            .unwrap();
        assert!(
            store
                .insert_session(2, ChannelKind::Webchat, "S1")
                .await
                .is_err()
        );
    }
}
