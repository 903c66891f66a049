//! Persistent bot storage using SQLite
//!
//! Holds servers, their members, per-module key/value data and an append-only
//! event log. Timestamps are RFC 3339 UTC strings with microsecond precision,
//! which sort correctly as text.

use chrono::{Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn days_ago(days: u32) -> String {
    (Utc::now() - Duration::days(i64::from(days))).to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_json(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| json!({}))
}

/// Server details to upsert
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    pub owner_id: Option<String>,
    pub member_count: i64,
    pub created_at: Option<String>,
    /// Extra attributes (icon, etc.)
    pub data: Value,
}

/// A stored server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerRecord {
    pub id: String,
    pub name: String,
    pub owner_id: Option<String>,
    pub member_count: i64,
    pub created_at: Option<String>,
    pub first_seen: String,
    pub last_seen: String,
    pub data: Value,
}

type ServerRow = (String, String, Option<String>, i64, Option<String>, String, String, String);

impl From<ServerRow> for ServerRecord {
    fn from(row: ServerRow) -> Self {
        let (id, name, owner_id, member_count, created_at, first_seen, last_seen, data) = row;
        Self {
            id,
            name,
            owner_id,
            member_count,
            created_at,
            first_seen,
            last_seen,
            data: parse_json(&data),
        }
    }
}

/// Member details to upsert
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: String,
    pub server_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub is_bot: bool,
    pub joined_at: Option<String>,
    pub data: Value,
}

/// A stored member
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberRecord {
    pub id: String,
    pub server_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub is_bot: bool,
    pub joined_at: Option<String>,
    pub first_seen: String,
    pub last_seen: String,
    pub data: Value,
}

type MemberRow = (
    String,
    String,
    String,
    Option<String>,
    bool,
    Option<String>,
    String,
    String,
    String,
);

impl From<MemberRow> for MemberRecord {
    fn from(row: MemberRow) -> Self {
        let (id, server_id, username, display_name, is_bot, joined_at, first_seen, last_seen, data) =
            row;
        Self {
            id,
            server_id,
            username,
            display_name,
            is_bot,
            joined_at,
            first_seen,
            last_seen,
            data: parse_json(&data),
        }
    }
}

/// A logged event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub id: i64,
    pub server_id: Option<String>,
    pub event_type: String,
    pub data: Value,
    pub timestamp: String,
}

/// Event count for one type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityCount {
    pub event_type: String,
    pub count: i64,
}

/// Summary of a server's members and recent activity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerStats {
    pub server: ServerRecord,
    pub total_members: i64,
    pub bot_count: i64,
    pub human_count: i64,
    /// Events of the last 7 days by type, most frequent first
    pub recent_activity: Vec<ActivityCount>,
}

const SERVER_COLUMNS: &str =
    "id, name, owner_id, member_count, created_at, first_seen, last_seen, data";
const MEMBER_COLUMNS: &str =
    "id, server_id, username, display_name, is_bot, joined_at, first_seen, last_seen, data";

/// SQLite-backed store
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open (or create) the database at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self, sqlx::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create an in-memory store asynchronously
    pub async fn new_in_memory_async() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS servers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                owner_id TEXT,
                member_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS members (
                id TEXT NOT NULL,
                server_id TEXT NOT NULL,
                username TEXT NOT NULL,
                display_name TEXT,
                is_bot INTEGER NOT NULL DEFAULT 0,
                joined_at TEXT,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (id, server_id),
                FOREIGN KEY (server_id) REFERENCES servers(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS module_data (
                module_name TEXT NOT NULL,
                server_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (module_name, server_id, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                server_id TEXT,
                event_type TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}',
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_members_server ON members(server_id)",
            "CREATE INDEX IF NOT EXISTS idx_events_server ON events(server_id)",
            "CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type)",
            "CREATE INDEX IF NOT EXISTS idx_module_data_lookup ON module_data(module_name, server_id)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }

        Ok(())
    }

    // Servers

    /// Insert or update a server, keeping its first-seen time
    pub async fn upsert_server(&self, server: &ServerInfo) -> Result<(), sqlx::Error> {
        let now = now();
        sqlx::query(
            r#"
            INSERT INTO servers (id, name, owner_id, member_count, created_at, first_seen, last_seen, data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                owner_id = excluded.owner_id,
                member_count = excluded.member_count,
                last_seen = excluded.last_seen,
                data = excluded.data
            "#,
        )
        .bind(&server.id)
        .bind(&server.name)
        .bind(&server.owner_id)
        .bind(server.member_count)
        .bind(&server.created_at)
        .bind(&now)
        .bind(data_text(&server.data))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_server(&self, server_id: &str) -> Result<Option<ServerRecord>, sqlx::Error> {
        let row: Option<ServerRow> =
            sqlx::query_as(&format!("SELECT {} FROM servers WHERE id = ?", SERVER_COLUMNS))
                .bind(server_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(ServerRecord::from))
    }

    /// All servers, most recently seen first
    pub async fn get_all_servers(&self) -> Result<Vec<ServerRecord>, sqlx::Error> {
        let rows: Vec<ServerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM servers ORDER BY last_seen DESC",
            SERVER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ServerRecord::from).collect())
    }

    /// Remove a server and, by cascade, its members
    pub async fn delete_server(&self, server_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM servers WHERE id = ?")
            .bind(server_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // Members

    /// Insert or update a member; the server must already exist
    pub async fn upsert_member(&self, member: &MemberInfo) -> Result<(), sqlx::Error> {
        let now = now();
        sqlx::query(
            r#"
            INSERT INTO members (id, server_id, username, display_name, is_bot, joined_at, first_seen, last_seen, data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)
            ON CONFLICT(id, server_id) DO UPDATE SET
                username = excluded.username,
                display_name = excluded.display_name,
                is_bot = excluded.is_bot,
                joined_at = excluded.joined_at,
                last_seen = excluded.last_seen,
                data = excluded.data
            "#,
        )
        .bind(&member.id)
        .bind(&member.server_id)
        .bind(&member.username)
        .bind(&member.display_name)
        .bind(member.is_bot)
        .bind(&member.joined_at)
        .bind(&now)
        .bind(data_text(&member.data))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_member(
        &self,
        member_id: &str,
        server_id: &str,
    ) -> Result<Option<MemberRecord>, sqlx::Error> {
        let row: Option<MemberRow> = sqlx::query_as(&format!(
            "SELECT {} FROM members WHERE id = ? AND server_id = ?",
            MEMBER_COLUMNS
        ))
        .bind(member_id)
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(MemberRecord::from))
    }

    /// Members of a server ordered by username
    pub async fn get_server_members(&self, server_id: &str) -> Result<Vec<MemberRecord>, sqlx::Error> {
        let rows: Vec<MemberRow> = sqlx::query_as(&format!(
            "SELECT {} FROM members WHERE server_id = ? ORDER BY username",
            MEMBER_COLUMNS
        ))
        .bind(server_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MemberRecord::from).collect())
    }

    // Module data

    pub async fn set_module_data(
        &self,
        module_name: &str,
        server_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO module_data (module_name, server_id, key, value, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(module_name, server_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(module_name)
        .bind(server_id)
        .bind(key)
        .bind(value.to_string())
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_module_data(
        &self,
        module_name: &str,
        server_id: &str,
        key: &str,
    ) -> Result<Option<Value>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM module_data WHERE module_name = ? AND server_id = ? AND key = ?",
        )
        .bind(module_name)
        .bind(server_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(value,)| stored_value(value)))
    }

    /// Every key stored by a module for a server
    pub async fn get_all_module_data(
        &self,
        module_name: &str,
        server_id: &str,
    ) -> Result<Map<String, Value>, sqlx::Error> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM module_data WHERE module_name = ? AND server_id = ? ORDER BY key",
        )
        .bind(module_name)
        .bind(server_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(key, value)| (key, stored_value(value)))
            .collect())
    }

    /// Delete one key, or every key when `key` is `None`; returns rows removed
    pub async fn delete_module_data(
        &self,
        module_name: &str,
        server_id: &str,
        key: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM module_data WHERE module_name = ?1 AND server_id = ?2 AND (?3 IS NULL OR key = ?3)",
        )
        .bind(module_name)
        .bind(server_id)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // Events

    /// Append an event, returning its id
    pub async fn log_event(
        &self,
        server_id: Option<&str>,
        event_type: &str,
        data: &Value,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO events (server_id, event_type, data, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(server_id)
        .bind(event_type)
        .bind(data_text(data))
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Newest events first, optionally filtered by server and type
    pub async fn get_events(
        &self,
        server_id: Option<&str>,
        event_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<EventRecord>, sqlx::Error> {
        let rows: Vec<(i64, Option<String>, String, String, String)> = sqlx::query_as(
            r#"
            SELECT id, server_id, event_type, data, timestamp
            FROM events
            WHERE (?1 IS NULL OR server_id = ?1)
              AND (?2 IS NULL OR event_type = ?2)
            ORDER BY timestamp DESC, id DESC
            LIMIT ?3
            "#,
        )
        .bind(server_id)
        .bind(event_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, server_id, event_type, data, timestamp)| EventRecord {
                id,
                server_id,
                event_type,
                data: parse_json(&data),
                timestamp,
            })
            .collect())
    }

    /// Member counts and the last week's activity; `None` for unknown servers
    pub async fn get_server_stats(&self, server_id: &str) -> Result<Option<ServerStats>, sqlx::Error> {
        let Some(server) = self.get_server(server_id).await? else {
            return Ok(None);
        };

        let (total_members, bot_count, human_count): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN is_bot = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN is_bot = 0 THEN 1 ELSE 0 END), 0)
            FROM members WHERE server_id = ?
            "#,
        )
        .bind(server_id)
        .fetch_one(&self.pool)
        .await?;

        let activity: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT event_type, COUNT(*) AS count
            FROM events
            WHERE server_id = ? AND timestamp > ?
            GROUP BY event_type
            ORDER BY count DESC, event_type
            "#,
        )
        .bind(server_id)
        .bind(days_ago(7))
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(ServerStats {
            server,
            total_members,
            bot_count,
            human_count,
            recent_activity: activity
                .into_iter()
                .map(|(event_type, count)| ActivityCount { event_type, count })
                .collect(),
        }))
    }

    // Maintenance

    /// Delete events older than `days`, returning how many were removed
    pub async fn cleanup_old_events(&self, days: u32) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM events WHERE timestamp < ?")
            .bind(days_ago(days))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn vacuum(&self) -> Result<(), sqlx::Error> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    async fn backdate_events(&self, days: u32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE events SET timestamp = ?")
            .bind(days_ago(days))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn data_text(data: &Value) -> String {
    if data.is_null() {
        "{}".to_string()
    } else {
        data.to_string()
    }
}

/// Module values are JSON; anything else comes back as a plain string
fn stored_value(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    async fn store() -> Storage {
        Storage::new_in_memory_async().await.unwrap()
    }

    fn server(id: &str, name: &str) -> ServerInfo {
        ServerInfo {
            id: id.into(),
            name: name.into(),
            member_count: 2,
            ..ServerInfo::default()
        }
    }

    fn member(id: &str, server_id: &str, username: &str, is_bot: bool) -> MemberInfo {
        MemberInfo {
            id: id.into(),
            server_id: server_id.into(),
            username: username.into(),
            is_bot,
            ..MemberInfo::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_server_keeps_first_seen() {
        let store = store().await;
        store.upsert_server(&server("1", "Old Name")).await.unwrap();
        let first = store.get_server("1").await.unwrap().unwrap();
        assert_eq!(first.data, json!({}));

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.upsert_server(&server("1", "New Name")).await.unwrap();
        let second = store.get_server("1").await.unwrap().unwrap();

        assert_eq!(second.name, "New Name");
        assert_eq!(second.first_seen, first.first_seen);
        assert!(second.last_seen > first.last_seen);
        assert!(store.get_server("2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_all_servers_by_last_seen() {
        let store = store().await;
        assert_ok!(store.upsert_server(&server("1", "A")).await);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_ok!(store.upsert_server(&server("2", "B")).await);

        let ids: Vec<String> = store
            .get_all_servers()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[tokio::test]
    async fn test_members_and_cascade() {
        let store = store().await;
        store.upsert_server(&server("1", "Guild")).await.unwrap();
        store.upsert_member(&member("b", "1", "zed", false)).await.unwrap();
        store.upsert_member(&member("a", "1", "amy", false)).await.unwrap();
        store.upsert_member(&member("c", "1", "robo", true)).await.unwrap();

        let names: Vec<String> = store
            .get_server_members("1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.username)
            .collect();
        assert_eq!(names, vec!["amy", "robo", "zed"]);

        let robo = store.get_member("c", "1").await.unwrap().unwrap();
        assert!(robo.is_bot);

        // Members need an existing server
        assert!(store.upsert_member(&member("x", "404", "ghost", false)).await.is_err());

        assert!(store.delete_server("1").await.unwrap());
        assert!(store.get_server_members("1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_module_data() {
        let store = store().await;
        store
            .set_module_data("hello", "1", "greetings", &json!(1))
            .await
            .unwrap();
        store
            .set_module_data("hello", "1", "greetings", &json!(2))
            .await
            .unwrap();
        store
            .set_module_data("hello", "1", "last", &json!({ "by": "amy" }))
            .await
            .unwrap();

        assert_eq!(
            store.get_module_data("hello", "1", "greetings").await.unwrap(),
            Some(json!(2))
        );
        assert_eq!(store.get_module_data("other", "1", "greetings").await.unwrap(), None);

        let all = store.get_all_module_data("hello", "1").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["last"], json!({ "by": "amy" }));

        assert_eq!(store.delete_module_data("hello", "1", Some("last")).await.unwrap(), 1);
        assert_eq!(store.delete_module_data("hello", "1", None).await.unwrap(), 1);
        assert!(store.get_all_module_data("hello", "1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_newest_first() {
        let store = store().await;
        store.log_event(Some("1"), "member_join", &json!({ "id": "a" })).await.unwrap();
        store.log_event(Some("1"), "hello_greeted", &Value::Null).await.unwrap();
        store.log_event(None, "startup", &json!({})).await.unwrap();

        let all = store.get_events(None, None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].event_type, "startup");
        assert_eq!(all[0].server_id, None);

        let joins = store.get_events(Some("1"), Some("member_join"), 10).await.unwrap();
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].data, json!({ "id": "a" }));

        assert_eq!(store.get_events(Some("1"), None, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_server_stats() {
        let store = store().await;
        assert!(store.get_server_stats("1").await.unwrap().is_none());

        store.upsert_server(&server("1", "Guild")).await.unwrap();
        let empty = store.get_server_stats("1").await.unwrap().unwrap();
        assert_eq!(empty.total_members, 0);
        assert_eq!(empty.bot_count, 0);

        store.upsert_member(&member("a", "1", "amy", false)).await.unwrap();
        store.upsert_member(&member("c", "1", "robo", true)).await.unwrap();
        store.log_event(Some("1"), "member_join", &json!({})).await.unwrap();
        store.log_event(Some("1"), "member_join", &json!({})).await.unwrap();
        store.log_event(Some("1"), "hello_greeted", &json!({})).await.unwrap();

        let stats = store.get_server_stats("1").await.unwrap().unwrap();
        assert_eq!(stats.total_members, 2);
        assert_eq!(stats.bot_count, 1);
        assert_eq!(stats.human_count, 1);
        assert_eq!(
            stats.recent_activity,
            vec![
                ActivityCount { event_type: "member_join".into(), count: 2 },
                ActivityCount { event_type: "hello_greeted".into(), count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_cleanup_old_events() {
        let store = store().await;
        store.log_event(Some("1"), "old", &json!({})).await.unwrap();
        store.log_event(Some("1"), "old", &json!({})).await.unwrap();
        store.backdate_events(40).await.unwrap();
        store.log_event(Some("1"), "fresh", &json!({})).await.unwrap();

        assert_eq!(store.cleanup_old_events(30).await.unwrap(), 2);
        let remaining = store.get_events(None, None, 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].event_type, "fresh");

        store.vacuum().await.unwrap();
    }
}
