//! Manual trigger for the updates processor.
//!
//! Meant for testing. It runs a full cycle, cursor claim included, and must
//! not be invoked while the scheduled cycle or another manual run is active.

use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::db::{self, Pool};
use crate::error::{DigestError, DigestResult};
use crate::updates::{CycleOutcome, UpdatesProcessor};

pub const SUPER_ADMIN: &str = "super-admin";

/// Answers "does this user hold one of these roles".
#[async_trait]
pub trait Authority: Send + Sync {
    async fn has_any_role(&self, user_id: &str, roles: &[&str]) -> DigestResult<bool>;
}

#[async_trait]
impl Authority for Pool {
    async fn has_any_role(&self, user_id: &str, roles: &[&str]) -> DigestResult<bool> {
        let Some(user) = db::fetch_user(self, user_id).await? else {
            return Ok(false);
        };
        Ok(user.roles.iter().any(|r| roles.contains(&r.as_str())))
    }
}

/// Run one update cycle on behalf of `caller` (None when not signed in).
#[instrument(skip_all, fields(caller = caller.unwrap_or("-")))]
pub async fn run_updates_now(
    processor: &UpdatesProcessor,
    authority: &dyn Authority,
    caller: Option<&str>,
) -> DigestResult<CycleOutcome> {
    let Some(caller) = caller else {
        return Err(DigestError::Forbidden(
            "You must be logged in to perform this function",
        ));
    };
    if !authority.has_any_role(caller, &[SUPER_ADMIN]).await? {
        return Err(DigestError::Forbidden("Not authorised to perform this method"));
    }
    warn!(caller, "manual trigger of updates processor");
    processor.process().await
}
