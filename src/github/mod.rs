//! GitHub collaborators
//!
//! REST access for phase detection and the attestation creator built on it.

pub mod attestation;
pub mod client;

pub use attestation::{BuildEnvironment, CosignAttestationCreator, npm_purl};
pub use client::GithubClient;
