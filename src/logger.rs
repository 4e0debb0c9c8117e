//! Best-effort request logging
//!
//! Every forwarded request produces one append to the request log store and
//! one structured tracing event. A failed append is reported and dropped; it
//! never affects the response relayed to the caller.

use crate::db::{Database, NewRequestLog};
use std::sync::Arc;
use tracing::{info, warn};

/// Append-only sink for request log entries
pub trait RequestLogStore: Send + Sync {
    fn append(&self, entry: &NewRequestLog) -> anyhow::Result<()>;
}

impl RequestLogStore for Database {
    fn append(&self, entry: &NewRequestLog) -> anyhow::Result<()> {
        self.insert_request_log(entry).map(|_| ())
    }
}

pub struct RequestLogger {
    store: Arc<dyn RequestLogStore>,
}

impl RequestLogger {
    pub fn new(store: Arc<dyn RequestLogStore>) -> Self {
        Self { store }
    }

    /// Record one forwarded request. Never fails.
    pub fn record(&self, entry: NewRequestLog) {
        info!(
            service_id = ?entry.service_id,
            method = %entry.method,
            path = %entry.path,
            status = entry.status_code,
            response_time_secs = ?entry.response_time,
            ip = ?entry.ip_address,
            "Request forwarded"
        );

        if let Err(e) = self.store.append(&entry) {
            warn!(
                method = %entry.method,
                path = %entry.path,
                error = %e,
                "Failed to write request log entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FailingStore;

    impl RequestLogStore for FailingStore {
        fn append(&self, _entry: &NewRequestLog) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        entries: Mutex<Vec<NewRequestLog>>,
    }

    impl RequestLogStore for MemoryStore {
        fn append(&self, entry: &NewRequestLog) -> anyhow::Result<()> {
            self.entries.lock().push(entry.clone());
            Ok(())
        }
    }

    fn entry(status_code: u16) -> NewRequestLog {
        NewRequestLog {
            service_id: Some(1),
            method: "POST".to_string(),
            path: "/api/chat/send".to_string(),
            status_code,
            response_time: Some(0.05),
            user_agent: "curl/8".to_string(),
            ip_address: Some("10.0.0.1".to_string()),
        }
    }

    #[test]
    fn test_record_appends_entry() {
        let store = Arc::new(MemoryStore::default());
        let logger = RequestLogger::new(store.clone());

        logger.record(entry(201));
        logger.record(entry(504));

        let entries = store.entries.lock();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status_code, 201);
        assert_eq!(entries[1].status_code, 504);
    }

    #[test]
    fn test_record_swallows_store_failure() {
        let logger = RequestLogger::new(Arc::new(FailingStore));
        logger.record(entry(200));
    }

    #[test]
    fn test_record_into_database() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let logger = RequestLogger::new(db.clone());

        let mut unmatched = entry(502);
        unmatched.service_id = None;
        logger.record(unmatched);

        let logs = db.recent_request_logs(1).unwrap();
        assert_eq!(logs[0].status_code, Some(502));
        assert!(logs[0].service_id.is_none());
    }
}
