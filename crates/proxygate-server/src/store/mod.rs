//! Credential store collaborator.
//!
//! Users, refresh sessions and request logs live in a relational store. The
//! access-control core only talks to it through [`CredentialStore`], so any
//! backend that can answer these queries can sit behind the gateway.

pub mod memory;
pub mod postgres;
pub mod r#trait;
pub mod types;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use r#trait::{CredentialStore, StoreError, StoreResult};
pub use types::{
    CountBy, LogQuery, LogStats, NewSession, NewUser, Page, PageRequest, RequestLog, Role, Session,
    StoredRequestLog, User, UserQuery, UserUpdate,
};
