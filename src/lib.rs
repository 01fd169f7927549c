//! Rust support for [collectd], a daemon that collects, transfers and stores
//! performance data.
//!
//! The crate is split along the same lines as collectd itself:
//!
//! - [`api`](api/index.html) holds the core data model: values, identifiers
//!   and value lists.
//! - [`network`](network/index.html) implements collectd's binary network
//!   protocol, both the client side (a state-compressing encoder feeding a
//!   UDP socket) and the server side (a cancellable listener that parses
//!   datagrams and fans the results out to a writer). Datagrams may be
//!   signed with HMAC-SHA256 or encrypted with AES-256-OFB.
//! - [`meta`](meta/index.html) models the metadata map that can accompany a
//!   value list.
//! - [`typesdb`](typesdb/index.html) parses collectd's `types.db` data-set
//!   registry.
//!
//! [collectd]: https://collectd.org
#[macro_use]
extern crate failure;

pub mod api;
pub mod errors;
pub mod meta;
pub mod network;
pub mod typesdb;

pub use crate::api::{Cdtime, Identifier, Value, ValueList, ValueListBuilder, Writer};
