//! Session credential store
//!
//! `wacore::store::Backend` over a single SQLite file inside the configured
//! session directory. Deleting that directory is how a session is wiped, so
//! nothing here ever outlives it.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::str::FromStr;

use wacore::appstate::hash::HashState;
use wacore::appstate::processor::AppStateMutationMAC;
use wacore::store::Device;
use wacore::store::error::{Result, StoreError, db_err};
use wacore::store::traits::{
    AppStateSyncKey, AppSyncStore, DeviceListRecord, DeviceStore, LidPnMappingEntry, ProtocolStore,
    SignalStore,
};

/// File name of the credential database inside the session directory.
pub const STORE_FILE: &str = "session.db";

/// Single-device store; every row is keyed by this id.
const DEVICE_ID: i32 = 1;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS device (
        id INTEGER PRIMARY KEY,
        data BLOB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS identities (
        address TEXT NOT NULL, device_id INTEGER NOT NULL, value BLOB NOT NULL,
        PRIMARY KEY (address, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS signal_sessions (
        address TEXT NOT NULL, device_id INTEGER NOT NULL, value BLOB NOT NULL,
        PRIMARY KEY (address, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS sender_keys (
        address TEXT NOT NULL, device_id INTEGER NOT NULL, value BLOB NOT NULL,
        PRIMARY KEY (address, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS prekeys (
        id INTEGER NOT NULL, device_id INTEGER NOT NULL, value BLOB NOT NULL,
        uploaded INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (id, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS signed_prekeys (
        id INTEGER NOT NULL, device_id INTEGER NOT NULL, value BLOB NOT NULL,
        PRIMARY KEY (id, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS sync_keys (
        key_id BLOB NOT NULL, device_id INTEGER NOT NULL, value TEXT NOT NULL,
        PRIMARY KEY (key_id, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS sync_versions (
        name TEXT NOT NULL, device_id INTEGER NOT NULL, value TEXT NOT NULL,
        PRIMARY KEY (name, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS mutation_macs (
        name TEXT NOT NULL, version INTEGER NOT NULL, index_mac BLOB NOT NULL,
        value_mac BLOB NOT NULL, device_id INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS mutation_macs_lookup ON mutation_macs (name, index_mac, device_id)",
    "CREATE TABLE IF NOT EXISTS skdm_recipients (
        group_jid TEXT NOT NULL, device_jid TEXT NOT NULL, device_id INTEGER NOT NULL,
        PRIMARY KEY (group_jid, device_jid, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS lid_mappings (
        lid TEXT NOT NULL, phone_number TEXT NOT NULL, created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL, learning_source TEXT NOT NULL DEFAULT '',
        device_id INTEGER NOT NULL,
        PRIMARY KEY (lid, device_id)
    )",
    "CREATE INDEX IF NOT EXISTS lid_mappings_phone ON lid_mappings (phone_number, device_id)",
    "CREATE TABLE IF NOT EXISTS base_keys (
        address TEXT NOT NULL, message_id TEXT NOT NULL, base_key BLOB NOT NULL,
        device_id INTEGER NOT NULL,
        PRIMARY KEY (address, message_id, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS device_lists (
        user TEXT NOT NULL, device_id INTEGER NOT NULL, value TEXT NOT NULL,
        PRIMARY KEY (user, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS sender_key_forget (
        group_jid TEXT NOT NULL, participant TEXT NOT NULL, device_id INTEGER NOT NULL,
        PRIMARY KEY (group_jid, participant, device_id)
    )",
];

/// Tables holding one blob per text address.
#[derive(Clone, Copy)]
enum AddressTable {
    Identities,
    SignalSessions,
    SenderKeys,
}

impl AddressTable {
    fn name(self) -> &'static str {
        match self {
            Self::Identities => "identities",
            Self::SignalSessions => "signal_sessions",
            Self::SenderKeys => "sender_keys",
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn lid_entry(row: SqliteRow) -> LidPnMappingEntry {
    LidPnMappingEntry {
        lid: row.get("lid"),
        phone_number: row.get("phone_number"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        learning_source: row.get("learning_source"),
    }
}

/// SQLite-backed credentials for one linked device.
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open (or create) `<dir>/session.db`, creating `dir` when missing.
    pub async fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::Connection(e.to_string()))?;
        let options = SqliteConnectOptions::new()
            .filename(Self::file_in(dir))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        Self::connect(options).await
    }

    /// Throwaway store for tests.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::connect(options).await
    }

    pub fn file_in(dir: &Path) -> PathBuf {
        dir.join(STORE_FILE)
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        // A single connection keeps in-memory test stores coherent too
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&pool)
                .await
                .map_err(db_err)?;
        }
        Ok(Self { pool })
    }

    /// Whether a decodable paired-device record is present.
    pub async fn is_paired(&self) -> Result<bool> {
        Ok(self.load().await?.is_some())
    }

    /// Release the file so the session directory can be removed.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn get_by_address(&self, table: AddressTable, address: &str) -> Result<Option<Vec<u8>>> {
        let sql = format!(
            "SELECT value FROM {} WHERE address = ? AND device_id = ?",
            table.name()
        );
        let row = sqlx::query(&sql)
            .bind(address)
            .bind(DEVICE_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn put_by_address(&self, table: AddressTable, address: &str, value: &[u8]) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (address, device_id, value) VALUES (?, ?, ?)
             ON CONFLICT(address, device_id) DO UPDATE SET value = excluded.value",
            table.name()
        );
        sqlx::query(&sql)
            .bind(address)
            .bind(DEVICE_ID)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_by_address(&self, table: AddressTable, address: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE address = ? AND device_id = ?",
            table.name()
        );
        sqlx::query(&sql)
            .bind(address)
            .bind(DEVICE_ID)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_by_id(&self, table: &str, id: u32) -> Result<Option<Vec<u8>>> {
        let sql = format!("SELECT value FROM {} WHERE id = ? AND device_id = ?", table);
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(DEVICE_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn delete_by_id(&self, table: &str, id: u32) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = ? AND device_id = ?", table);
        sqlx::query(&sql)
            .bind(id)
            .bind(DEVICE_ID)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl SignalStore for SessionStore {
    async fn put_identity(&self, address: &str, key: [u8; 32]) -> Result<()> {
        self.put_by_address(AddressTable::Identities, address, &key).await
    }

    async fn load_identity(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.get_by_address(AddressTable::Identities, address).await
    }

    async fn delete_identity(&self, address: &str) -> Result<()> {
        self.delete_by_address(AddressTable::Identities, address).await
    }

    async fn get_session(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.get_by_address(AddressTable::SignalSessions, address).await
    }

    async fn put_session(&self, address: &str, session: &[u8]) -> Result<()> {
        self.put_by_address(AddressTable::SignalSessions, address, session).await
    }

    async fn delete_session(&self, address: &str) -> Result<()> {
        self.delete_by_address(AddressTable::SignalSessions, address).await
    }

    async fn store_prekey(&self, id: u32, record: &[u8], uploaded: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO prekeys (id, device_id, value, uploaded) VALUES (?, ?, ?, ?)
             ON CONFLICT(id, device_id) DO UPDATE SET value = excluded.value, uploaded = excluded.uploaded",
        )
        .bind(id)
        .bind(DEVICE_ID)
        .bind(record)
        .bind(uploaded)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.get_by_id("prekeys", id).await
    }

    async fn remove_prekey(&self, id: u32) -> Result<()> {
        self.delete_by_id("prekeys", id).await
    }

    async fn store_signed_prekey(&self, id: u32, record: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO signed_prekeys (id, device_id, value) VALUES (?, ?, ?)
             ON CONFLICT(id, device_id) DO UPDATE SET value = excluded.value",
        )
        .bind(id)
        .bind(DEVICE_ID)
        .bind(record)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_signed_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.get_by_id("signed_prekeys", id).await
    }

    async fn load_all_signed_prekeys(&self) -> Result<Vec<(u32, Vec<u8>)>> {
        let rows = sqlx::query("SELECT id, value FROM signed_prekeys WHERE device_id = ? ORDER BY id")
            .bind(DEVICE_ID)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<i64, _>("id") as u32, r.get("value")))
            .collect())
    }

    async fn remove_signed_prekey(&self, id: u32) -> Result<()> {
        self.delete_by_id("signed_prekeys", id).await
    }

    async fn put_sender_key(&self, address: &str, record: &[u8]) -> Result<()> {
        self.put_by_address(AddressTable::SenderKeys, address, record).await
    }

    async fn get_sender_key(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.get_by_address(AddressTable::SenderKeys, address).await
    }

    async fn delete_sender_key(&self, address: &str) -> Result<()> {
        self.delete_by_address(AddressTable::SenderKeys, address).await
    }
}

#[async_trait]
impl AppSyncStore for SessionStore {
    async fn get_sync_key(&self, key_id: &[u8]) -> Result<Option<AppStateSyncKey>> {
        let row = sqlx::query("SELECT value FROM sync_keys WHERE key_id = ? AND device_id = ?")
            .bind(key_id)
            .bind(DEVICE_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| from_json(&r.get::<String, _>("value"))).transpose()
    }

    async fn set_sync_key(&self, key_id: &[u8], key: AppStateSyncKey) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_keys (key_id, device_id, value) VALUES (?, ?, ?)
             ON CONFLICT(key_id, device_id) DO UPDATE SET value = excluded.value",
        )
        .bind(key_id)
        .bind(DEVICE_ID)
        .bind(to_json(&key)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_version(&self, name: &str) -> Result<HashState> {
        let row = sqlx::query("SELECT value FROM sync_versions WHERE name = ? AND device_id = ?")
            .bind(name)
            .bind(DEVICE_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(r) => from_json(&r.get::<String, _>("value")),
            None => Ok(HashState::default()),
        }
    }

    async fn set_version(&self, name: &str, state: HashState) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_versions (name, device_id, value) VALUES (?, ?, ?)
             ON CONFLICT(name, device_id) DO UPDATE SET value = excluded.value",
        )
        .bind(name)
        .bind(DEVICE_ID)
        .bind(to_json(&state)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn put_mutation_macs(
        &self,
        name: &str,
        version: u64,
        mutations: &[AppStateMutationMAC],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for mac in mutations {
            sqlx::query(
                "INSERT INTO mutation_macs (name, version, index_mac, value_mac, device_id)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(name)
            .bind(version as i64)
            .bind(&mac.index_mac)
            .bind(&mac.value_mac)
            .bind(DEVICE_ID)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get_mutation_mac(&self, name: &str, index_mac: &[u8]) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query(
            "SELECT value_mac FROM mutation_macs WHERE name = ? AND index_mac = ? AND device_id = ?",
        )
        .bind(name)
        .bind(index_mac)
        .bind(DEVICE_ID)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|r| r.get("value_mac")))
    }

    async fn delete_mutation_macs(&self, name: &str, index_macs: &[Vec<u8>]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for mac in index_macs {
            sqlx::query("DELETE FROM mutation_macs WHERE name = ? AND index_mac = ? AND device_id = ?")
                .bind(name)
                .bind(mac.as_slice())
                .bind(DEVICE_ID)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl ProtocolStore for SessionStore {
    async fn get_skdm_recipients(&self, group_jid: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT device_jid FROM skdm_recipients WHERE group_jid = ? AND device_id = ?")
            .bind(group_jid)
            .bind(DEVICE_ID)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(|r| r.get("device_jid")).collect())
    }

    async fn add_skdm_recipients(&self, group_jid: &str, device_jids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for jid in device_jids {
            sqlx::query(
                "INSERT OR IGNORE INTO skdm_recipients (group_jid, device_jid, device_id) VALUES (?, ?, ?)",
            )
            .bind(group_jid)
            .bind(jid)
            .bind(DEVICE_ID)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn clear_skdm_recipients(&self, group_jid: &str) -> Result<()> {
        sqlx::query("DELETE FROM skdm_recipients WHERE group_jid = ? AND device_id = ?")
            .bind(group_jid)
            .bind(DEVICE_ID)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_lid_mapping(&self, lid: &str) -> Result<Option<LidPnMappingEntry>> {
        let row = sqlx::query(
            "SELECT lid, phone_number, created_at, updated_at, learning_source
             FROM lid_mappings WHERE lid = ? AND device_id = ?",
        )
        .bind(lid)
        .bind(DEVICE_ID)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(lid_entry))
    }

    async fn get_pn_mapping(&self, phone: &str) -> Result<Option<LidPnMappingEntry>> {
        let row = sqlx::query(
            "SELECT lid, phone_number, created_at, updated_at, learning_source
             FROM lid_mappings WHERE phone_number = ? AND device_id = ?
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(phone)
        .bind(DEVICE_ID)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(lid_entry))
    }

    async fn put_lid_mapping(&self, entry: &LidPnMappingEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO lid_mappings (lid, phone_number, created_at, updated_at, learning_source, device_id)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(lid, device_id) DO UPDATE SET
                phone_number = excluded.phone_number,
                updated_at = excluded.updated_at,
                learning_source = excluded.learning_source",
        )
        .bind(&entry.lid)
        .bind(&entry.phone_number)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .bind(&entry.learning_source)
        .bind(DEVICE_ID)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_all_lid_mappings(&self) -> Result<Vec<LidPnMappingEntry>> {
        let rows = sqlx::query(
            "SELECT lid, phone_number, created_at, updated_at, learning_source
             FROM lid_mappings WHERE device_id = ?",
        )
        .bind(DEVICE_ID)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(lid_entry).collect())
    }

    async fn save_base_key(&self, address: &str, message_id: &str, base_key: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO base_keys (address, message_id, base_key, device_id) VALUES (?, ?, ?, ?)
             ON CONFLICT(address, message_id, device_id) DO UPDATE SET base_key = excluded.base_key",
        )
        .bind(address)
        .bind(message_id)
        .bind(base_key)
        .bind(DEVICE_ID)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn has_same_base_key(
        &self,
        address: &str,
        message_id: &str,
        current_base_key: &[u8],
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM base_keys
             WHERE address = ? AND message_id = ? AND device_id = ? AND base_key = ?",
        )
        .bind(address)
        .bind(message_id)
        .bind(DEVICE_ID)
        .bind(current_base_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.is_some())
    }

    async fn delete_base_key(&self, address: &str, message_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM base_keys WHERE address = ? AND message_id = ? AND device_id = ?")
            .bind(address)
            .bind(message_id)
            .bind(DEVICE_ID)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn update_device_list(&self, record: DeviceListRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO device_lists (user, device_id, value) VALUES (?, ?, ?)
             ON CONFLICT(user, device_id) DO UPDATE SET value = excluded.value",
        )
        .bind(&record.user)
        .bind(DEVICE_ID)
        .bind(to_json(&record)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_devices(&self, user: &str) -> Result<Option<DeviceListRecord>> {
        let row = sqlx::query("SELECT value FROM device_lists WHERE user = ? AND device_id = ?")
            .bind(user)
            .bind(DEVICE_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| from_json(&r.get::<String, _>("value"))).transpose()
    }

    async fn mark_forget_sender_key(&self, group_jid: &str, participant: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO sender_key_forget (group_jid, participant, device_id) VALUES (?, ?, ?)",
        )
        .bind(group_jid)
        .bind(participant)
        .bind(DEVICE_ID)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn consume_forget_marks(&self, group_jid: &str) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let rows = sqlx::query("SELECT participant FROM sender_key_forget WHERE group_jid = ? AND device_id = ?")
            .bind(group_jid)
            .bind(DEVICE_ID)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM sender_key_forget WHERE group_jid = ? AND device_id = ?")
            .bind(group_jid)
            .bind(DEVICE_ID)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(rows.into_iter().map(|r| r.get("participant")).collect())
    }
}

#[async_trait]
impl DeviceStore for SessionStore {
    async fn save(&self, device: &Device) -> Result<()> {
        let bytes = rmp_serde::to_vec(device).map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO device (id, data) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(DEVICE_ID)
        .bind(bytes)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<Device>> {
        let row = sqlx::query("SELECT data FROM device WHERE id = ?")
            .bind(DEVICE_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let data: Vec<u8> = row.get("data");
        match rmp_serde::from_slice(&data) {
            Ok(device) => Ok(Some(device)),
            Err(e) => {
                // An unreadable record is treated as unpaired so a fresh QR is issued
                tracing::warn!("WhatsApp store: discarding undecodable device record: {}", e);
                sqlx::query("DELETE FROM device WHERE id = ?")
                    .bind(DEVICE_ID)
                    .execute(&self.pool)
                    .await
                    .map_err(db_err)?;
                Ok(None)
            }
        }
    }

    async fn exists(&self) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM device WHERE id = ?")
            .bind(DEVICE_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.is_some())
    }

    async fn create(&self) -> Result<i32> {
        Ok(DEVICE_ID)
    }
}
