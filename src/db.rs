//! SQLite database for the service registry and request log
//!
//! This module provides durable storage for registered services and the
//! append-only log of forwarded requests that survives restarts.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Current schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Column list shared by every service query
const SERVICE_COLUMNS: &str =
    "id, name, type, target_url, path_prefix, enabled, auth_required, rate_limit, created_at";

/// Illustrative services inserted into an empty registry:
/// (name, type, target_url, path_prefix, enabled, auth_required, rate_limit)
const SAMPLE_SERVICES: &[(&str, &str, &str, &str, bool, bool, i64)] = &[
    (
        "E-commerce API",
        "api",
        "https://api.ecommerce.example.com",
        "/api/ecommerce",
        true,
        false,
        1000,
    ),
    (
        "AI Chat Service",
        "api",
        "https://chat-api.example.com",
        "/api/chat",
        true,
        true,
        500,
    ),
    (
        "Analytics Service",
        "api",
        "https://analytics-api.example.com",
        "/api/analytics",
        true,
        true,
        200,
    ),
    (
        "IoT Data Collector",
        "api",
        "https://iot-api.example.com",
        "/api/iot",
        true,
        false,
        2000,
    ),
    (
        "Crypto Wallet API",
        "api",
        "https://wallet-api.example.com",
        "/api/wallet",
        true,
        true,
        100,
    ),
    (
        "Video Processing",
        "api",
        "https://video-api.example.com",
        "/api/video",
        true,
        false,
        50,
    ),
];

/// Database connection wrapper with thread-safe access
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path).context("Failed to open database")?;

        // WAL lets readers proceed while a log row is being appended
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;
        Ok(db)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < SCHEMA_VERSION {
            info!("Running migrations from v{} to v{}", current_version, SCHEMA_VERSION);

            if current_version < 1 {
                Self::migrate_v1(&conn)?;
            }
        }

        Ok(())
    }

    /// Migration v1: Initial schema
    fn migrate_v1(conn: &Connection) -> Result<()> {
        debug!("Applying migration v1: initial schema");

        conn.execute_batch(r#"
            -- Registered services
            CREATE TABLE IF NOT EXISTS services (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                target_url TEXT NOT NULL,
                path_prefix TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                auth_required INTEGER NOT NULL DEFAULT 0,
                rate_limit INTEGER NOT NULL DEFAULT 100,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Forwarded request log (append-only)
            CREATE TABLE IF NOT EXISTS request_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                service_id INTEGER,
                method TEXT NOT NULL,
                path TEXT NOT NULL,
                status_code INTEGER,
                response_time REAL,
                user_agent TEXT,
                ip_address TEXT,
                timestamp TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (service_id) REFERENCES services(id)
            );

            CREATE INDEX IF NOT EXISTS idx_request_logs_timestamp ON request_logs(timestamp);
            CREATE INDEX IF NOT EXISTS idx_request_logs_service ON request_logs(service_id);

            -- Record migration
            INSERT INTO schema_migrations (version) VALUES (1);
        "#)?;

        Ok(())
    }

    // ==================== Service Operations ====================

    /// Insert the sample services if the registry is empty.
    /// Returns the number of services inserted.
    pub fn seed_sample_services(&self) -> Result<usize> {
        let mut conn = self.conn.lock();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM services", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(0);
        }

        let tx = conn.transaction()?;
        for (name, service_type, target_url, path_prefix, enabled, auth_required, rate_limit) in
            SAMPLE_SERVICES
        {
            tx.execute(
                "INSERT INTO services (name, type, target_url, path_prefix, enabled, auth_required, rate_limit)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    name,
                    service_type,
                    target_url,
                    path_prefix,
                    enabled,
                    auth_required,
                    rate_limit
                ],
            )?;
        }
        tx.commit()?;

        Ok(SAMPLE_SERVICES.len())
    }

    /// Register a new service, returning its id
    pub fn create_service(&self, service: &NewService) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO services (name, type, target_url, path_prefix, enabled, auth_required, rate_limit)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                service.name,
                service.service_type,
                service.target_url,
                service.path_prefix,
                service.enabled,
                service.auth_required,
                service.rate_limit
            ],
        )
        .context("Failed to create service")?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a service by id
    pub fn get_service(&self, id: i64) -> Result<Option<ServiceRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM services WHERE id = ?1", SERVICE_COLUMNS),
            params![id],
            service_from_row,
        )
        .optional()
        .context("Failed to get service")
    }

    /// List all services ordered by name
    pub fn list_services(&self) -> Result<Vec<ServiceRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM services ORDER BY name",
            SERVICE_COLUMNS
        ))?;

        let services = stmt
            .query_map([], service_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(services)
    }

    /// List enabled services, the candidate set for prefix matching
    pub fn list_enabled_services(&self) -> Result<Vec<ServiceRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM services WHERE enabled = 1 ORDER BY id",
            SERVICE_COLUMNS
        ))?;

        let services = stmt
            .query_map([], service_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(services)
    }

    /// Apply a partial update. Returns false if the service does not exist.
    pub fn update_service(&self, id: i64, update: &ServiceUpdate) -> Result<bool> {
        let conn = self.conn.lock();

        let exists = conn
            .query_row("SELECT 1 FROM services WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Ok(false);
        }

        let mut assignments: Vec<&str> = Vec::new();
        let mut values: Vec<&dyn ToSql> = Vec::new();

        if let Some(ref name) = update.name {
            assignments.push("name = ?");
            values.push(name);
        }
        if let Some(ref service_type) = update.service_type {
            assignments.push("type = ?");
            values.push(service_type);
        }
        if let Some(ref target_url) = update.target_url {
            assignments.push("target_url = ?");
            values.push(target_url);
        }
        if let Some(ref path_prefix) = update.path_prefix {
            assignments.push("path_prefix = ?");
            values.push(path_prefix);
        }
        if let Some(ref enabled) = update.enabled {
            assignments.push("enabled = ?");
            values.push(enabled);
        }
        if let Some(ref auth_required) = update.auth_required {
            assignments.push("auth_required = ?");
            values.push(auth_required);
        }
        if let Some(ref rate_limit) = update.rate_limit {
            assignments.push("rate_limit = ?");
            values.push(rate_limit);
        }

        if assignments.is_empty() {
            return Ok(true);
        }

        values.push(&id);
        let sql = format!("UPDATE services SET {} WHERE id = ?", assignments.join(", "));
        conn.execute(&sql, params_from_iter(values))
            .context("Failed to update service")?;

        Ok(true)
    }

    // ==================== Request Log Operations ====================

    /// Append a request log entry
    pub fn insert_request_log(&self, entry: &NewRequestLog) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO request_logs (service_id, method, path, status_code, response_time, user_agent, ip_address)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.service_id,
                entry.method,
                entry.path,
                entry.status_code,
                entry.response_time,
                entry.user_agent,
                entry.ip_address
            ],
        )
        .context("Failed to insert request log")?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent request log entries, newest first
    pub fn recent_request_logs(&self, limit: usize) -> Result<Vec<RequestLogRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, service_id, method, path, status_code, response_time, user_agent, ip_address, timestamp
             FROM request_logs ORDER BY id DESC LIMIT ?1",
        )?;

        let records = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RequestLogRecord {
                    id: row.get(0)?,
                    service_id: row.get(1)?,
                    method: row.get(2)?,
                    path: row.get(3)?,
                    status_code: row.get(4)?,
                    response_time: row.get(5)?,
                    user_agent: row.get(6)?,
                    ip_address: row.get(7)?,
                    timestamp: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    // ==================== Stats Operations ====================

    /// Aggregate registry and traffic statistics over the trailing 24 hours
    pub fn bridge_stats(&self) -> Result<BridgeStats> {
        let conn = self.conn.lock();

        let total_services: i64 =
            conn.query_row("SELECT COUNT(*) FROM services", [], |row| row.get(0))?;

        let active_services: i64 = conn.query_row(
            "SELECT COUNT(*) FROM services WHERE enabled = 1",
            [],
            |row| row.get(0),
        )?;

        let requests_24h: i64 = conn.query_row(
            "SELECT COUNT(*) FROM request_logs WHERE timestamp > datetime('now', '-1 day')",
            [],
            |row| row.get(0),
        )?;

        let average_response_time: Option<f64> = conn.query_row(
            "SELECT AVG(response_time) FROM request_logs
             WHERE timestamp > datetime('now', '-1 day') AND response_time IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT s.name, COUNT(r.id) AS request_count
             FROM services s
             LEFT JOIN request_logs r ON s.id = r.service_id
                AND r.timestamp > datetime('now', '-1 day')
             GROUP BY s.id, s.name
             ORDER BY request_count DESC, s.id",
        )?;

        let requests_by_service = stmt
            .query_map([], |row| {
                Ok(ServiceRequestCount {
                    service: row.get(0)?,
                    requests: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BridgeStats {
            total_services,
            active_services,
            requests_24h,
            average_response_time,
            requests_by_service,
        })
    }
}

fn service_from_row(row: &Row<'_>) -> rusqlite::Result<ServiceRecord> {
    Ok(ServiceRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        service_type: row.get(2)?,
        target_url: row.get(3)?,
        path_prefix: row.get(4)?,
        enabled: row.get(5)?,
        auth_required: row.get(6)?,
        rate_limit: row.get(7)?,
        created_at: row.get(8)?,
    })
}

// ==================== Record Types ====================

/// Service record from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub target_url: String,
    pub path_prefix: String,
    pub enabled: bool,
    /// Advisory only; the forwarder does not enforce it
    pub auth_required: bool,
    /// Stored and returned, never enforced
    pub rate_limit: i64,
    pub created_at: String,
}

/// Fields for registering a service
#[derive(Debug, Clone)]
pub struct NewService {
    pub name: String,
    pub service_type: String,
    pub target_url: String,
    pub path_prefix: String,
    pub enabled: bool,
    pub auth_required: bool,
    pub rate_limit: i64,
}

/// Partial service update; `None` leaves the column untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceUpdate {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub service_type: Option<String>,
    pub target_url: Option<String>,
    pub path_prefix: Option<String>,
    pub enabled: Option<bool>,
    pub auth_required: Option<bool>,
    pub rate_limit: Option<i64>,
}

/// Request log entry to append
#[derive(Debug, Clone)]
pub struct NewRequestLog {
    pub service_id: Option<i64>,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub response_time: Option<f64>,
    pub user_agent: String,
    pub ip_address: Option<String>,
}

/// Request log record from database
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogRecord {
    pub id: i64,
    pub service_id: Option<i64>,
    pub method: String,
    pub path: String,
    pub status_code: Option<u16>,
    pub response_time: Option<f64>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp: String,
}

/// Aggregated bridge statistics
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub total_services: i64,
    pub active_services: i64,
    pub requests_24h: i64,
    pub average_response_time: Option<f64>,
    pub requests_by_service: Vec<ServiceRequestCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRequestCount {
    pub service: String,
    pub requests: i64,
}
