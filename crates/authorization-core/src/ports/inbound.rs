//! The driving API transports call into the core through. Both the IPC
//! Query Adapter and the NIP-46 envelope handler depend only on this
//! trait, never on the concrete `AuthorizationEngine`.

use async_trait::async_trait;
use authority_types::{CallerIdentity, Request};

use crate::domain::engine::Decision;
use crate::ports::outbound::Approver;

#[async_trait]
pub trait AuthorizationPort: Send + Sync {
    /// Runs the full decision pipeline for one inbound request (§4.1).
    async fn authorize(
        &self,
        request: Request,
        caller: CallerIdentity,
        is_connect: bool,
        approver: &(dyn Approver + Sync),
    ) -> Decision;
}
