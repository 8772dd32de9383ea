//! Admin policy
//!
//! A user is an admin only when `Admins/{uid}` carries `isAdmin: true` as a
//! boolean. A document without the field, or with a string or number in it,
//! grants nothing.

use tracing::debug;

use crate::store::{DocumentStore, FsValue};

pub async fn is_admin(store: &dyn DocumentStore, uid: &str) -> bool {
    if uid.is_empty() || uid.contains('/') {
        return false;
    }
    let granted = store
        .get(&format!("Admins/{}", uid))
        .await
        .and_then(|doc| doc.get("isAdmin").and_then(FsValue::as_bool))
        .unwrap_or(false);
    debug!(uid, granted, "Admin check");
    granted
}
