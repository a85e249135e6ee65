//! Hexagonal seams. `outbound` holds the capabilities the core borrows
//! from the rest of the process (Signer, BunkerHandler, Approver); `inbound`
//! holds the driving API transports call into the core through.

pub mod inbound;
pub mod outbound;

pub use inbound::AuthorizationPort;
pub use outbound::{Approver, BunkerHandler, Signer};
