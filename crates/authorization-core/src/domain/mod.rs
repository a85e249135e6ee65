//! # Domain Layer
//!
//! Pure business logic for the remote-signing authorization core.
//!
//! ## Components
//!
//! - `errors`: `CoreError`, the engine-level error taxonomy (§7)
//! - `permission`: Permission Store (§4.2)
//! - `audit`: tamper-evident Audit Chain (§4.3)
//! - `rate_limit`: Rate Limiter (§4.4)
//! - `velocity`: Velocity Tracker (§4.5)
//! - `caller_verifier`: Caller Verifier + nonce issuance (§4.6)
//! - `risk`: Risk Assessor (§4.7)
//! - `approval`: Approval Registry (§4.8)
//! - `nip46`: NIP-46 Session Manager (§4.9)
//! - `config`: Configuration state (§3, §6)
//! - `engine`: Authorization Engine, the pipeline orchestrator (§4.1)

pub mod approval;
pub mod audit;
pub mod caller_verifier;
pub mod config;
pub mod engine;
pub mod errors;
pub mod nip46;
pub mod permission;
pub mod rate_limit;
pub mod risk;
pub mod velocity;

pub use approval::*;
pub use audit::*;
pub use caller_verifier::*;
pub use config::*;
pub use engine::*;
pub use errors::*;
pub use nip46::*;
pub use permission::*;
pub use rate_limit::*;
pub use risk::*;
pub use velocity::*;
