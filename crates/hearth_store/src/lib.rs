//! `hearth_store`: the engine's only door to durable state.
//!
//! The store is a schemaless JSON document database spoken to over HTTP
//! (ArangoDB's REST dialect). Layers, leaves first:
//! - [`transport`]: one request in, status + JSON body out (`reqwest` in production),
//! - [`client`]: bearer-token lifecycle and the raw document/collection/cursor calls,
//! - [`cursor`]: lazy batched streaming of one query's results,
//! - [`proxy`]: tag-driven hydration of records into typed handles,
//! - [`collection`]: per-collection provisioning and creation.
//!
//! Handles never cache document content: every read is a round trip.

pub mod client;
pub mod collection;
pub mod cursor;
pub mod error;
pub mod id;
pub mod proxy;
pub mod token;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{DatabaseManager, StoreConfig};
pub use collection::{CollectionManager, CollectionSpec, Created};
pub use cursor::Cursor;
pub use error::{Result, StoreError};
pub use id::DocumentId;
pub use proxy::{DocumentProxy, PROXY_FIELD, ProxyConstructor, ProxyRegistry, ProxyStore};
pub use token::BearerToken;
pub use transport::{HttpTransport, Method, StoreRequest, StoreResponse, Transport};
