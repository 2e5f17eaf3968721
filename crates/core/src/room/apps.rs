use std::collections::HashMap;

use crate::error::SignalError;

/// Upper bound for a single CRDT update or awareness payload.
pub const MAX_APP_UPDATE_LEN: usize = 256 * 1024;

#[derive(Default)]
struct AppDoc {
    /// Merged update log. Updates are opaque and idempotent on the client
    /// CRDT, so replaying the whole log is a valid sync diff.
    updates: Vec<Vec<u8>>,
    /// Last-writer awareness payload per origin connection.
    awareness: HashMap<String, Vec<u8>>,
}

/// Shared-app ("tunneled" collaborative document) state of a room.
///
/// The server never interprets doc bytes; it stores, gates, and routes them.
/// Closing an app clears awareness but retains the doc so reopening the same
/// `appId` resumes where it left off.
#[derive(Default)]
pub struct SharedApps {
    pub active_app_id: Option<String>,
    pub locked: bool,
    docs: HashMap<String, AppDoc>,
}

impl SharedApps {
    pub fn open(&mut self, app_id: &str) {
        self.docs.entry(app_id.to_string()).or_default();
        self.active_app_id = Some(app_id.to_string());
    }

    pub fn close(&mut self) {
        if let Some(app_id) = self.active_app_id.take() {
            if let Some(doc) = self.docs.get_mut(&app_id) {
                doc.awareness.clear();
            }
        }
    }

    pub fn is_active(&self, app_id: &str) -> bool {
        self.active_app_id.as_deref() == Some(app_id)
    }

    pub fn apply_update(&mut self, app_id: &str, update: Vec<u8>) -> Result<(), SignalError> {
        validate_payload(&update)?;
        let doc = self
            .docs
            .get_mut(app_id)
            .ok_or_else(|| SignalError::BadRequest("unknown app".to_string()))?;
        doc.updates.push(update);
        Ok(())
    }

    /// Full update log plus the current awareness payloads for a doc.
    pub fn sync(&self, app_id: &str) -> Result<(Vec<&[u8]>, Vec<&[u8]>), SignalError> {
        let doc = self
            .docs
            .get(app_id)
            .ok_or_else(|| SignalError::BadRequest("unknown app".to_string()))?;
        let updates = doc.updates.iter().map(|u| u.as_slice()).collect();
        let awareness = doc.awareness.values().map(|u| u.as_slice()).collect();
        Ok((updates, awareness))
    }

    pub fn set_awareness(
        &mut self,
        app_id: &str,
        origin: &str,
        update: Vec<u8>,
    ) -> Result<(), SignalError> {
        validate_payload(&update)?;
        let doc = self
            .docs
            .get_mut(app_id)
            .ok_or_else(|| SignalError::BadRequest("unknown app".to_string()))?;
        doc.awareness.insert(origin.to_string(), update);
        Ok(())
    }

    /// Drops a departed connection's awareness from every doc.
    pub fn forget_connection(&mut self, connection_id: &str) {
        for doc in self.docs.values_mut() {
            doc.awareness.remove(connection_id);
        }
    }

    pub fn has_doc(&self, app_id: &str) -> bool {
        self.docs.contains_key(app_id)
    }
}

fn validate_payload(update: &[u8]) -> Result<(), SignalError> {
    if update.is_empty() {
        return Err(SignalError::BadRequest("empty app payload".to_string()));
    }
    if update.len() > MAX_APP_UPDATE_LEN {
        return Err(SignalError::BadRequest("app payload too large".to_string()));
    }
    Ok(())
}
