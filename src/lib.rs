//! ## WebDAV protocol engine
//!
//! [`Webdav`] (RFC4918) extends HTTP with methods to inspect and manage
//! collections of resources: PROPFIND, PROPPATCH, MKCOL, COPY, MOVE, LOCK
//! and UNLOCK. This library is the protocol half of a WebDAV server. It
//! takes a `http::Request`, interprets the WebDAV part of it and produces
//! a `http::Response`, while the resources themselves live in a storage
//! backend that you supply.
//!
//! What the engine does:
//!
//! - resolves properties through a [registry][PropertyRegistry] of typed
//!   live properties, with everything else stored as opaque dead properties.
//! - renders and parses property values through [widgets][props::widgets::DavWidget].
//! - builds `207 Multi-Status` documents ([`MultiStatus`]).
//! - hands out and enforces write locks through a [locksystem][DavLockSystem].
//! - evaluates the `If` header, both its entity tags and its state tokens.
//!
//! GET, PUT, DELETE and friends are not handled here.
//!
//! ## Backend interfaces.
//!
//! - you supply a [store][DavStore] that knows about resources, their
//!   properties and how to create, copy and move them.
//! - you can supply a [locksystem][DavLockSystem] that keeps the lock table.
//!
//! Included are an in-memory store ([`MemStore`]) and an in-memory
//! locksystem ([`MemLs`]).
//!
//! ## Example.
//!
//! ```no_run
//! use dav_engine::{DavHandler, LockSystem, MemStore};
//!
//! # async fn run(req: http::Request<dav_engine::body::Body>) {
//! let store = MemStore::new();
//! store.add_collection("/docs").unwrap();
//!
//! let dav = DavHandler::builder(store)
//!     .strip_prefix("/dav")
//!     .locksystem(LockSystem::Mem)
//!     .build();
//!
//! let resp = dav.handle(req).await;
//! println!("{}", resp.status());
//! # }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davhandler;
mod davheaders;
mod errors;
mod locking;
mod util;
mod xmltree_ext;

pub mod body;
pub mod davpath;
pub mod ls;
pub mod multistatus;
pub mod props;
pub mod store;

pub use crate::davhandler::{DavBuilder, DavHandler, LockSystem, DEFAULT_MAX_BODY_SIZE};
pub use crate::errors::{DavError, DavResult};
pub use crate::ls::memls::MemLs;
pub use crate::ls::DavLockSystem;
pub use crate::multistatus::{DavResponse, MultiStatus};
pub use crate::props::{DavProperty, FieldKind, PropValue, PropertyRegistry};
pub use crate::store::{DavStore, ResourceMeta, StoreError};
pub use crate::util::{DavMethod, DavMethodSet};

#[cfg(any(docsrs, feature = "memstore"))]
pub use crate::store::memstore::MemStore;
