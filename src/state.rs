use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::services::email::EmailSender;
use crate::services::payments::PaymentProcessor;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub payments: Box<dyn PaymentProcessor>,
    pub mailer: Box<dyn EmailSender>,
}

impl AppState {
    /// Locks the connection. A poisoned lock still hands back the connection;
    /// every write path is a single statement or its own transaction.
    pub fn db(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}
