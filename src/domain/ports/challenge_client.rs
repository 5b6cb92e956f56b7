//! Challenge-catalog port, consumed by the Recovery Orchestrator (§6).

use async_trait::async_trait;

use crate::domain::error::RecoveryError;
use crate::domain::models::CatalogPhase;

/// `GET /phases/active` on the challenge service.
#[async_trait]
pub trait ChallengeClient: Send + Sync {
    async fn fetch_active_phases(&self) -> Result<Vec<CatalogPhase>, RecoveryError>;
}
