use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::SignalError;
use crate::events::EventPayload;
use crate::room::Room;
use crate::room::state::RoomState;

impl Room {
    pub async fn open_app(&self, connection_id: &str, app_id: &str) -> Result<(), SignalError> {
        if app_id.is_empty() || app_id.len() > 128 {
            return Err(SignalError::BadRequest("invalid app id".to_string()));
        }
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        st.apps.open(app_id);
        st.touch();
        self.emit_apps_state(&st);
        Ok(())
    }

    pub async fn close_app(&self, connection_id: &str) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        st.apps.close();
        st.touch();
        self.emit_apps_state(&st);
        Ok(())
    }

    pub async fn lock_apps(&self, connection_id: &str, locked: bool) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        if st.apps.locked == locked {
            return Ok(());
        }
        st.apps.locked = locked;
        st.touch();
        self.emit_apps_state(&st);
        Ok(())
    }

    /// Applies one opaque CRDT update and forwards it to the other members.
    /// Locked apps still broadcast to non-hosts; they just refuse their writes.
    pub async fn apply_app_update(
        &self,
        connection_id: &str,
        app_id: &str,
        update_b64: &str,
    ) -> Result<(), SignalError> {
        let update = decode_payload(update_b64)?;

        let mut st = self.state.lock().await;
        self.check_app_writer(&st, connection_id, app_id)?;
        st.apps.apply_update(app_id, update)?;
        st.touch();
        self.emit(
            &st,
            EventPayload::AppsYjsUpdate {
                app_id: app_id.to_string(),
                update: update_b64.to_string(),
                origin: connection_id.to_string(),
            },
            Some(connection_id),
        );
        Ok(())
    }

    /// Full-state sync: the update log as the diff plus an awareness snapshot.
    pub async fn sync_app(
        &self,
        connection_id: &str,
        app_id: &str,
    ) -> Result<serde_json::Value, SignalError> {
        let st = self.state.lock().await;
        if !st.participants.contains_key(connection_id) {
            return Err(SignalError::NotInRoom);
        }
        let (updates, awareness) = st.apps.sync(app_id)?;
        Ok(serde_json::json!({
            "appId": app_id,
            "updates": updates.iter().map(|u| BASE64.encode(u)).collect::<Vec<_>>(),
            "awareness": awareness.iter().map(|u| BASE64.encode(u)).collect::<Vec<_>>(),
        }))
    }

    pub async fn set_app_awareness(
        &self,
        connection_id: &str,
        app_id: &str,
        update_b64: &str,
    ) -> Result<(), SignalError> {
        let update = decode_payload(update_b64)?;

        let mut st = self.state.lock().await;
        self.check_app_writer(&st, connection_id, app_id)?;
        st.apps.set_awareness(app_id, connection_id, update)?;
        self.emit(
            &st,
            EventPayload::AppsAwareness {
                app_id: app_id.to_string(),
                update: update_b64.to_string(),
                origin: connection_id.to_string(),
            },
            Some(connection_id),
        );
        Ok(())
    }

    fn check_app_writer(
        &self,
        st: &RoomState,
        connection_id: &str,
        app_id: &str,
    ) -> Result<(), SignalError> {
        let p = st
            .participants
            .get(connection_id)
            .ok_or(SignalError::NotInRoom)?;
        if p.is_observer() {
            return Err(SignalError::ObserverReadonly);
        }
        if st.apps.locked && !p.is_host() {
            return Err(SignalError::Forbidden("apps are locked".to_string()));
        }
        if !st.apps.is_active(app_id) {
            return Err(SignalError::Forbidden("app is not active".to_string()));
        }
        Ok(())
    }

    fn emit_apps_state(&self, st: &RoomState) {
        self.emit(
            st,
            EventPayload::AppsState {
                active_app_id: st.apps.active_app_id.clone(),
                locked: st.apps.locked,
            },
            None,
        );
    }
}

/// Decodes and bounds-checks an app payload at the edge; handlers past this
/// point only ever see raw bytes.
fn decode_payload(update_b64: &str) -> Result<Vec<u8>, SignalError> {
    if update_b64.is_empty() {
        return Err(SignalError::BadRequest("empty app payload".to_string()));
    }
    BASE64
        .decode(update_b64)
        .map_err(|_| SignalError::BadRequest("malformed app payload".to_string()))
}
