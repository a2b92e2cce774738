use std::time::SystemTime;

use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::conditional::{if_match, matches_if_header};
use crate::davheaders::{self, Depth, LockTokenHdr};
use crate::locking::{self, LockRequest};
use crate::ls::*;
use crate::multistatus::{render_document, xml_response, DavResponse, MultiStatus};
use crate::store::StoreError;
use crate::xmltree_ext::{ElementExt, NS_DAV_URI};
use crate::{DavError, DavResult};

// <D:prop><D:lockdiscovery> document for a LOCK response.
fn lockdiscovery_response(lock: &DavLock) -> DavResult<Response<Body>> {
    let prop = Element::new2("D:prop").child(
        Element::new2("D:lockdiscovery").child(locking::activelock_element(lock, SystemTime::now())),
    );
    let body = render_document(&prop)?;
    debug!(target: "xml", "lock response:\n{}", String::from_utf8_lossy(&body));
    Ok(xml_response(StatusCode::OK, body))
}

// scope, type and owner out of a DAV:lockinfo body.
fn parse_lockinfo(xmldata: &[u8]) -> DavResult<(LockScope, LockType, Option<String>)> {
    let tree = Element::parse(xmldata)?;
    if !tree.is(NS_DAV_URI, "lockinfo") {
        return Err(DavError::Unprocessable(
            "Request body must be a DAV:lockinfo element".to_string(),
        ));
    }

    let scope = tree
        .get_child_ns(NS_DAV_URI, "lockscope")
        .and_then(|s| s.child_elems_iter().next())
        .ok_or_else(|| DavError::Unprocessable("DAV:lockinfo needs a lockscope".to_string()))?;
    let scope = if scope.is(NS_DAV_URI, "exclusive") {
        LockScope::Exclusive
    } else if scope.is(NS_DAV_URI, "shared") {
        LockScope::Shared
    } else {
        return Err(DavError::Unprocessable(format!("Unknown lockscope {}", scope.name)));
    };

    let locktype = tree
        .get_child_ns(NS_DAV_URI, "locktype")
        .and_then(|t| t.child_elems_iter().next())
        .ok_or_else(|| DavError::Unprocessable("DAV:lockinfo needs a locktype".to_string()))?;
    let locktype = if locktype.is(NS_DAV_URI, "write") {
        LockType::Write
    } else {
        return Err(DavError::Unprocessable(format!("Unknown locktype {}", locktype.name)));
    };

    let owner = tree
        .get_child_ns(NS_DAV_URI, "owner")
        .map(|o| o.to_xml_string())
        .transpose()?;
    Ok((scope, locktype, owner))
}

impl crate::DavHandler {
    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        // must have a locksystem or bail
        let ls = match self.ls_ref() {
            Some(ls) => ls,
            None => return Err(DavError::MethodNotAllowed),
        };

        let mut res = Response::new(Body::empty());
        let mut path = self.path(req)?;
        let meta = match self.store.metadata(&path).await {
            Ok(meta) => meta,
            Err(StoreError::NotFound) => {
                debug!("lock: {} is not mapped", path);
                return Err(DavError::NotFound);
            }
            Err(e) => return Err(e.into()),
        };
        self.fixpath(&mut res, &mut path, &meta);

        let timeout = match req.headers().typed_try_get::<davheaders::Timeout>() {
            Ok(t) => locking::lock_timeout(t.as_ref()),
            Err(_) => return Err(DavError::BadRequest("Invalid Timeout header".to_string())),
        };

        let record = if_match(req, &*self.store, Some(ls), &self.prefix, &path).await?;

        // An empty body means refresh.
        if xmldata.is_empty() {
            let lt = match ls.lock_token(&path) {
                Some(lt) => lt,
                None => {
                    debug!("lock refresh: {} is not locked", path);
                    return Err(DavError::PreconditionFailed);
                }
            };
            if !matches_if_header(&record, Some(ls), &path) {
                debug!("lock refresh: no token for {} in If header", path);
                return Err(DavError::PreconditionFailed);
            }
            let token = lt.lock.token().ok_or(DavError::PreconditionFailed)?;
            let lock = locking::refresh(ls, &lt.lock.root, token, timeout)?;
            let mut resp = lockdiscovery_response(&lock)?;
            resp.headers_mut().extend(res.headers().clone());
            return Ok(resp);
        }

        let depth = match req.headers().typed_try_get::<Depth>() {
            Ok(None) | Ok(Some(Depth::Infinity)) => LockDepth::Infinity,
            Ok(Some(Depth::Zero)) => LockDepth::Zero,
            _ => {
                return Err(DavError::BadRequest(
                    "Depth must be 0 or infinity for LOCK".to_string(),
                ))
            }
        };

        debug!(target: "xml", "lock input:\n{}]\n", String::from_utf8_lossy(xmldata));
        let (scope, locktype, owner) = parse_lockinfo(xmldata)?;
        if !ls.supported().contains(&(scope, locktype)) {
            return Err(DavError::Unprocessable(format!(
                "Lock {:?}/{:?} is not supported",
                scope, locktype
            )));
        }

        let lreq = LockRequest {
            scope,
            locktype,
            owner,
            depth,
            timeout,
            principal: self.principal.as_ref().map(|p| p.to_string()),
        };
        match locking::lock(&*self.store, ls, &path, &meta, lreq, &self.host_id).await {
            Ok(lock) => {
                debug!("lock {} granted on {}", lock.id, path);
                let mut resp = lockdiscovery_response(&lock)?;
                resp.headers_mut().extend(res.headers().clone());
                if let Some(token) = lock.token() {
                    resp.headers_mut()
                        .typed_insert(LockTokenHdr(token.to_string()));
                }
                Ok(resp)
            }
            Err(DavError::AlreadyLocked(locked)) => {
                if locked.iter().any(|p| p.same_resource(&path)) {
                    return Err(DavError::Locked);
                }
                // members are in the way.
                let mut ms = MultiStatus::new();
                for p in &locked {
                    ms.push(DavResponse::with_status(
                        self.store.resolve_url(p),
                        StatusCode::LOCKED,
                    ));
                }
                ms.push(DavResponse::with_status(
                    self.store.resolve_url(&path),
                    StatusCode::FAILED_DEPENDENCY,
                ));
                ms.into_response()
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        // must have a locksystem or bail
        let ls = match self.ls_ref() {
            Some(ls) => ls,
            None => return Err(DavError::MethodNotAllowed),
        };

        let token = match req.headers().typed_try_get::<LockTokenHdr>() {
            Ok(Some(t)) => t.0,
            Ok(None) => return Err(DavError::BadRequest("Missing Lock-Token header".to_string())),
            Err(_) => return Err(DavError::BadRequest("Invalid Lock-Token header".to_string())),
        };

        let mut path = self.path(req)?;
        if let Ok(meta) = self.store.metadata(&path).await {
            if meta.collection {
                path.add_slash();
            }
        }

        locking::unlock(ls, &path, &token)?;
        debug!("unlocked {} on {}", token, path);

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockinfo_parsing() {
        let body = br#"<?xml version="1.0" encoding="utf-8" ?>
            <D:lockinfo xmlns:D="DAV:">
              <D:lockscope><D:exclusive/></D:lockscope>
              <D:locktype><D:write/></D:locktype>
              <D:owner><D:href>http://example.org/~ejw/contact.html</D:href></D:owner>
            </D:lockinfo>"#;
        let (scope, locktype, owner) = parse_lockinfo(body).unwrap();
        assert_eq!(scope, LockScope::Exclusive);
        assert_eq!(locktype, LockType::Write);
        let owner = Element::parse(owner.unwrap().as_bytes()).unwrap();
        assert!(owner.is(NS_DAV_URI, "owner"));
        assert!(owner.get_child_ns(NS_DAV_URI, "href").is_some());

        let body = br#"<lockinfo xmlns="DAV:"><lockscope><shared/></lockscope><locktype><write/></locktype></lockinfo>"#;
        let (scope, _, owner) = parse_lockinfo(body).unwrap();
        assert_eq!(scope, LockScope::Shared);
        assert!(owner.is_none());
    }

    #[test]
    fn lockinfo_errors() {
        let e = parse_lockinfo(br#"<D:propfind xmlns:D="DAV:"/>"#).unwrap_err();
        assert_eq!(e.statuscode(), StatusCode::UNPROCESSABLE_ENTITY);
        let e = parse_lockinfo(br#"<D:lockinfo xmlns:D="DAV:"><D:locktype><D:write/></D:locktype></D:lockinfo>"#)
            .unwrap_err();
        assert_eq!(e.statuscode(), StatusCode::UNPROCESSABLE_ENTITY);
        let e = parse_lockinfo(b"<D:lockinfo").unwrap_err();
        assert_eq!(e.statuscode(), StatusCode::BAD_REQUEST);
    }
}
