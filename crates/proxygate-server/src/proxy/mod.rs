//! Tunnel access control and the CONNECT listener.

pub mod access;
pub mod server;
pub mod verifier;

pub use access::{AccessDecision, AccessPolicy, AccessRule, AllowList, Grant};
pub use server::{ProxyError, TunnelServer};
pub use verifier::{
    BasicCredentials, CredentialVerifier, StaticCredentialVerifier, StoreCredentialVerifier,
    VerifiedIdentity,
};
