//! # a3s-session
//!
//! Server-side session state for web requests identified by a signed
//! client id cookie.
//!
//! ## Overview
//!
//! `a3s-session` keeps per-browser data in a two-level map
//! (client id -> namespace -> key/value data). Client ids are
//! self-authenticating: a forged or tampered cookie is treated as absent
//! and a fresh id is minted. Data lives in a durable store plus a
//! per-worker volatile tier, so sessions that are only read never cost a
//! store write. Stale entries are evicted lazily by a sweep triggered from
//! ordinary reads.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_session::{CookieExchange, SessionConfig, SessionMap, SessionRegistry, Session, WorkerCache};
//!
//! # fn example() -> a3s_session::Result<()> {
//! let registry = SessionRegistry::in_memory(&SessionConfig::generate())?;
//! let mut worker = WorkerCache::new();
//!
//! // First request: no cookie yet, so an id is minted and staged
//! let mut request = CookieExchange::new();
//! let session = Session::new(&registry, &mut request);
//!
//! let mut tx = worker.begin();
//! session.get(&registry, &mut tx, "products.cart")?.set("items", 3)?;
//! tx.commit()?;
//!
//! // Next request carries the cookie back
//! let mut next = request.replay();
//! let session = Session::new(&registry, &mut next);
//! let mut tx = worker.begin();
//! let cart = session.get(&registry, &mut tx, "products.cart")?;
//! assert_eq!(cart.get_as::<u32>("items")?, 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Stores
//!
//! - **memory**: process-shared store for tests and single-process use
//! - **file**: JSON file rewritten atomically on every commit
//!
//! ## Architecture
//!
//! - **ClientIdManager**: mints, signs, and authenticates client ids
//! - **SessionDataContainer**: durable + volatile tiers with lazy sweep
//! - **Transaction**: unit of work; the only path to a durable write
//! - **SessionStore** trait: core abstraction all durable backends implement
//! - **Session**: per-request facade indexed by namespace

pub mod clock;
pub mod codec;
pub mod config;
pub mod container;
pub mod data;
pub mod error;
pub mod http;
pub mod id;
pub mod registry;
pub mod session;
pub mod store;
pub mod transaction;
pub mod worker;

// Re-export core types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientIdConfig, ContainerConfig, SessionConfig};
pub use container::{SessionDataContainer, SessionHandle};
pub use data::{SessionData, SessionEntry, SessionMap};
pub use error::{Result, SessionError};
pub use http::{CookieExchange, CookieTransport, ResponseCookie};
pub use id::{ClientId, ClientIdManager};
pub use registry::SessionRegistry;
pub use session::Session;
pub use store::{CommitSummary, SessionStore, StoreInfo, WriteBatch};
pub use transaction::{Tier, Transaction};
pub use worker::WorkerCache;

// Re-export stores for convenience
pub use store::file::FileSessionStore;
pub use store::memory::{MemorySessionStore, StoreStats};
