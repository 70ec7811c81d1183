//! Projects listed by a connection.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use stevedore_types::ProjectRecord;

/// A project owned by exactly one connection.
///
/// Identity is the backend's project id; a refresh updates the record in place
/// so holders of an `Arc<Project>` keep seeing the same project.
#[derive(Debug)]
pub struct Project {
    id: String,
    connection_id: String,
    record: Mutex<ProjectRecord>,
    disposed: AtomicBool,
}

impl Project {
    pub fn new(connection_id: impl Into<String>, record: ProjectRecord) -> Self {
        Self {
            id: record.id.clone(),
            connection_id: connection_id.into(),
            record: Mutex::new(record),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn record(&self) -> ProjectRecord {
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn name(&self) -> String {
        self.record().name
    }

    pub(crate) fn update(&self, record: ProjectRecord) {
        *self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = record;
    }

    pub(crate) fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}
