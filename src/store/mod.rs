//! Contains the structs and traits that define the storage backend.
//!
//! The engine never owns resources. Everything it knows about them comes
//! through a [`DavStore`]: metadata, children, typed (live) property values,
//! the opaque (dead) property store, and the create/copy/move capabilities.
//!
//! Every call may be refused with [`StoreError::Forbidden`] (policy says no)
//! or [`StoreError::Unauthorized`] (no identity, the client should
//! re-authenticate). The engine treats these two differently, so a
//! backend must not fold one into the other.
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

use crate::davpath::DavPath;
use crate::props::PropValue;

#[cfg(any(docsrs, feature = "memstore"))]
#[cfg_attr(docsrs, doc(cfg(feature = "memstore")))]
pub mod memstore;

/// Future returned by the storage methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Result type of the storage methods.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a storage call that did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Resource does not exist.
    NotFound,
    /// Access denied by policy.
    Forbidden,
    /// No (valid) credentials presented.
    Unauthorized,
    /// The change conflicts with the current state (for example a missing parent).
    Conflict,
    /// Resource already exists.
    Exists,
    /// The backend does not offer this capability.
    NotImplemented,
    /// Anything else.
    GeneralFailure,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for StoreError {}

/// What the engine needs to know about a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMeta {
    /// Folder-like, can have children.
    pub collection: bool,
    /// Entity tag including quotes, optionally `W/` prefixed.
    pub etag: Option<String>,
}

impl ResourceMeta {
    pub fn collection() -> ResourceMeta {
        ResourceMeta {
            collection: true,
            etag: None,
        }
    }

    pub fn leaf(etag: Option<String>) -> ResourceMeta {
        ResourceMeta {
            collection: false,
            etag,
        }
    }
}

/// The storage collaborator.
pub trait DavStore: Debug + Send + Sync {
    /// Metadata of a resource. `NotFound` if it does not exist.
    fn metadata<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, ResourceMeta>;

    /// Children of a collection, in a stable enumeration order.
    fn list_children<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, Vec<DavPath>>;

    /// Value of a live property. `Ok(None)` if the field is unset.
    fn read_property<'a>(
        &'a self,
        path: &'a DavPath,
        tag: &'a str,
    ) -> StoreFuture<'a, Option<PropValue>>;

    /// Store the value of a live property.
    fn write_property<'a>(
        &'a self,
        path: &'a DavPath,
        tag: &'a str,
        value: PropValue,
    ) -> StoreFuture<'a, ()>;

    /// Unset a live property, so that it reads back as `None`.
    #[allow(unused_variables)]
    fn clear_property<'a>(&'a self, path: &'a DavPath, tag: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async { Err(StoreError::NotImplemented) })
    }

    /// Does this resource have an opaque property store.
    #[allow(unused_variables)]
    fn have_opaque_properties<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, bool> {
        Box::pin(async { Ok(false) })
    }

    /// Serialized XML of a dead property.
    #[allow(unused_variables)]
    fn get_opaque_property<'a>(
        &'a self,
        path: &'a DavPath,
        tag: &'a str,
    ) -> StoreFuture<'a, Option<String>> {
        Box::pin(async { Ok(None) })
    }

    /// Set (or replace) a dead property. `xml` is the complete property element.
    #[allow(unused_variables)]
    fn set_opaque_property<'a>(
        &'a self,
        path: &'a DavPath,
        tag: &'a str,
        xml: String,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async { Err(StoreError::NotImplemented) })
    }

    /// Remove a dead property. Removing one that does not exist is not an error.
    #[allow(unused_variables)]
    fn remove_opaque_property<'a>(
        &'a self,
        path: &'a DavPath,
        tag: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async { Err(StoreError::NotImplemented) })
    }

    /// All dead properties as (tag, xml), in insertion order.
    #[allow(unused_variables)]
    fn list_opaque_properties<'a>(
        &'a self,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Vec<(String, String)>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    /// Absolute path of the resource, URL encoded, including the mount prefix.
    fn resolve_url(&self, path: &DavPath) -> String {
        path.as_url_string_with_prefix()
    }

    /// Create collection `name` inside `parent`.
    #[allow(unused_variables)]
    fn create_collection<'a>(
        &'a self,
        parent: &'a DavPath,
        name: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async { Err(StoreError::NotImplemented) })
    }

    /// Copy `src` to `name` inside `target_parent`, replacing what is there.
    /// With `deep` false only the resource itself (and its properties) is copied.
    #[allow(unused_variables)]
    fn copy_to<'a>(
        &'a self,
        src: &'a DavPath,
        target_parent: &'a DavPath,
        name: &'a str,
        deep: bool,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async { Err(StoreError::NotImplemented) })
    }

    /// Move `src` to `name` inside `target_parent`, replacing what is there.
    #[allow(unused_variables)]
    fn move_to<'a>(
        &'a self,
        src: &'a DavPath,
        target_parent: &'a DavPath,
        name: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async { Err(StoreError::NotImplemented) })
    }
}
