//! Routes a request to the correct store. The portal store serves every v2
//! endpoint; the atlas store only the legacy efinance lookups.

use sqlx::{MySqlPool, PgPool};

#[derive(Clone)]
pub struct DatabaseRouter {
    portal: PgPool,
    atlas: Option<MySqlPool>,
}

/// Handle for one request's store choice.
pub enum BackendHandle<'a> {
    Portal(&'a PgPool),
    Atlas(&'a MySqlPool),
}

impl DatabaseRouter {
    pub fn new(portal: PgPool, atlas: Option<MySqlPool>) -> Self {
        DatabaseRouter { portal, atlas }
    }

    pub fn portal(&self) -> &PgPool {
        &self.portal
    }

    pub fn atlas(&self) -> Option<&MySqlPool> {
        self.atlas.as_ref()
    }

    /// Idempotent per-request selection. Falls back to the portal store when
    /// the legacy store is not configured.
    pub fn select(&self, use_legacy: bool) -> BackendHandle<'_> {
        if use_legacy {
            if let Some(atlas) = &self.atlas {
                return BackendHandle::Atlas(atlas);
            }
        }
        BackendHandle::Portal(&self.portal)
    }

    pub fn has_atlas(&self) -> bool {
        self.atlas.is_some()
    }
}
