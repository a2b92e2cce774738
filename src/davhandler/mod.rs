//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use bytes::{self, buf::Buf};
use futures_util::stream::Stream;
use headers::HeaderMapExt;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::{Body, StreamBody};
use crate::conditional::{matches_if_header, IfRecord};
use crate::davheaders;
use crate::davpath::DavPath;
use crate::ls::memls::MemLs;
use crate::ls::*;
use crate::props::PropertyRegistry;
use crate::store::{DavStore, ResourceMeta};
use crate::util::{dav_method, DavMethod, DavMethodSet};

use crate::errors::DavError;
use crate::DavResult;

pub mod handle_copymove;
pub mod handle_lock;
pub mod handle_mkcol;
pub mod handle_options;
pub mod handle_props;

/// Request bodies larger than this are refused, unless configured otherwise.
pub const DEFAULT_MAX_BODY_SIZE: usize = 65536;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Storage backend.
    store: Arc<dyn DavStore>,
    /// Locksystem backend.
    ls: Option<LockSystem>,
    /// The live properties.
    registry: PropertyRegistry,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethodSet,
    /// Principal is webdav speak for "user", used to give locks an owner (if a locksystem is
    /// active).
    principal: Option<String>,
    /// Host part of generated lock tokens.
    host_id: Option<String>,
    /// Maximum size of a request body.
    max_body_size: usize,
}

/// Lock system backend.
#[derive(Clone)]
pub enum LockSystem {
    /// A fresh in-memory lock table for this handler.
    Mem,
    /// Bring your own, or share one `MemLs` between handlers.
    Custom(Arc<dyn DavLockSystem>),
}

impl LockSystem {
    fn build(self) -> Arc<dyn DavLockSystem> {
        match self {
            LockSystem::Mem => MemLs::new(),
            LockSystem::Custom(ls) => ls,
        }
    }
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(store: Arc<dyn DavStore>) -> DavBuilder {
        Self {
            prefix: String::new(),
            store,
            ls: None,
            registry: PropertyRegistry::webdav(),
            allow: DavMethodSet::all(),
            principal: None,
            host_id: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Use the configuration that was built to generate a DavConfig.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a resource path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Set the locksystem to use. Without one, LOCK and UNLOCK are refused.
    pub fn locksystem(self, ls: LockSystem) -> Self {
        let mut this = self;
        this.ls = Some(ls);
        this
    }

    /// The live properties (default is `PropertyRegistry::webdav()`).
    pub fn registry(self, registry: PropertyRegistry) -> Self {
        let mut this = self;
        this.registry = registry;
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Set the name of the "webdav principal". This will be the owner of any created locks.
    pub fn principal(self, principal: impl Into<String>) -> Self {
        let mut this = self;
        this.principal = Some(principal.into());
        this
    }

    /// Host id used in generated lock tokens (default is random).
    pub fn host_id(self, host_id: impl Into<String>) -> Self {
        let mut this = self;
        this.host_id = Some(host_id.into());
        this
    }

    /// Maximum size of a request body in bytes.
    pub fn max_body_size(self, size: usize) -> Self {
        let mut this = self;
        this.max_body_size = size;
        this
    }
}

/// The webdav handler struct.
///
/// The `new` and `build` etc methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) store: Arc<dyn DavStore>,
    pub(crate) ls: Option<Arc<dyn DavLockSystem>>,
    pub(crate) registry: Arc<PropertyRegistry>,
    pub(crate) allow: DavMethodSet,
    pub(crate) principal: Option<Arc<String>>,
    pub(crate) host_id: Arc<String>,
    pub(crate) max_body_size: usize,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        Self {
            prefix: Arc::new(cfg.prefix),
            store: cfg.store,
            ls: cfg.ls.map(|ls| ls.build()),
            registry: Arc::new(cfg.registry),
            allow: cfg.allow,
            principal: cfg.principal.map(Arc::new),
            host_id: Arc::new(cfg.host_id.unwrap_or_else(random_host_id)),
            max_body_size: cfg.max_body_size,
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(store: Arc<dyn DavStore>) -> DavBuilder {
        DavBuilder::new(store)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// For example, the `principal` can be set for this request, or the
    /// request can be mounted below an extra prefix.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                this.prefix.strip_suffix('/').unwrap_or(&this.prefix),
                prefix.strip_prefix('/').unwrap_or(&prefix)
            ));
        }
        if let Some(principal) = principal {
            this.principal = Some(Arc::new(principal));
        }
        this.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    /// Used with webserver frameworks that have not
    /// opted to use the `http_body` crate just yet.
    #[doc(hidden)]
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.handle_inner(req).await
    }
}

impl DavHandler {
    pub(crate) fn ls_ref(&self) -> Option<&dyn DavLockSystem> {
        self.ls.as_deref()
    }

    // helper.
    pub(crate) async fn has_parent(&self, path: &DavPath) -> bool {
        let p = path.parent();
        self.store
            .metadata(&p)
            .await
            .map(|m| m.collection)
            .unwrap_or(false)
    }

    // helper.
    pub(crate) fn path(&self, req: &Request<()>) -> DavResult<DavPath> {
        Ok(DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?)
    }

    // See if this is a collection and if so, if we have
    // to fixup the path by adding a slash at the end.
    pub(crate) fn fixpath(&self, res: &mut Response<Body>, path: &mut DavPath, meta: &ResourceMeta) {
        if meta.collection && !path.is_collection() {
            path.add_slash();
            let newloc = path.as_url_string_with_prefix();
            res.headers_mut()
                .typed_insert(davheaders::ContentLocation(newloc));
        }
    }

    // a locked resource may only be changed by whoever holds the lock.
    pub(crate) fn check_lock(&self, record: &IfRecord, path: &DavPath) -> DavResult<()> {
        if matches_if_header(record, self.ls_ref(), path) {
            Ok(())
        } else {
            debug!("{} is locked and no matching token was submitted", path);
            Err(DavError::Locked)
        }
    }

    // drain request body and return length.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(DavError::PayloadTooLarge);
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let is_ms = req
            .headers()
            .get("user-agent")
            .and_then(|s| s.to_str().ok())
            .map(|s| s.contains("Microsoft"))
            .unwrap_or(false);

        // Turn any DavError results into a HTTP error response.
        match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result OK");
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                error_response(&err, is_ms)
            }
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // debug when running the webdav litmus tests.
        if log_enabled!(log::Level::Debug) {
            if let Some(t) = req.headers().typed_get::<davheaders::XLitmus>() {
                debug!("X-Litmus: {:?}", t);
            }
        }

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // see if method is allowed.
        if !self.allow.contains(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::MethodNotAllowed);
        }

        // make sure the request path is valid.
        let path = self.path(&req)?;

        let body_data = self.read_request(body, self.max_body_size).await?;

        // Not all methods accept a body.
        if !DavMethod::WEBDAV_BODY.contains(method) && !body_data.is_empty() {
            return Err(DavError::UnsupportedMediaType);
        }

        // no locking without a locksystem.
        if (method == DavMethod::LOCK || method == DavMethod::UNLOCK) && self.ls.is_none() {
            return Err(DavError::MethodNotAllowed);
        }

        debug!("== START REQUEST {:?} {}", method, path);

        match method {
            DavMethod::OPTIONS => self.handle_options(&req).await,
            DavMethod::PROPFIND => self.handle_propfind(&req, &body_data).await,
            DavMethod::PROPPATCH => self.handle_proppatch(&req, &body_data).await,
            DavMethod::MKCOL => self.handle_mkcol(&req).await,
            DavMethod::LOCK => self.handle_lock(&req, &body_data).await,
            DavMethod::UNLOCK => self.handle_unlock(&req).await,
            DavMethod::COPY | DavMethod::MOVE => self.handle_copymove(&req, method).await,
            _ => Err(DavError::UnknownDavMethod),
        }
    }
}

// build the response for a failed request.
fn error_response(err: &DavError, is_ms: bool) -> Response<Body> {
    let body = match err.message() {
        Some(msg) => Body::from(msg),
        None => Body::empty(),
    };
    let len = body.len();
    let mut resp = Response::new(body);
    *resp.status_mut() = err.statuscode();
    let h = resp.headers_mut();
    if is_ms && err.statuscode() == StatusCode::NOT_FOUND {
        // This is an attempt to convince Windows to not
        // cache a 404 NOT_FOUND for 30-60 seconds.
        //
        // That is a problem since windows caches the NOT_FOUND in a
        // case-insensitive way. So if "www" does not exist, but "WWW" does,
        // and you do a "dir www" and then a "dir WWW" the second one
        // will fail.
        h.insert("Cache-Control", HeaderValue::from_static("no-store, no-cache, must-revalidate"));
        h.insert("Pragma", HeaderValue::from_static("no-cache"));
        h.insert("Expires", HeaderValue::from_static("0"));
        h.insert("Vary", HeaderValue::from_static("*"));
    }
    if len > 0 {
        h.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    }
    h.insert(CONTENT_LENGTH, HeaderValue::from(len));
    if err.must_close() {
        h.insert("connection", HeaderValue::from_static("close"));
    }
    resp
}
