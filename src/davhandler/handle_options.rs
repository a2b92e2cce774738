use headers::HeaderMapExt;
use http::header::HeaderValue;
use http::{Request, Response};

use crate::body::Body;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_options(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let h = res.headers_mut();

        // level 2 means locking, so only with a locksystem.
        let dav = if self.ls.is_some() { "1,2" } else { "1" };
        h.insert("DAV", HeaderValue::from_static(dav));
        h.insert("MS-Author-Via", HeaderValue::from_static("DAV"));
        h.typed_insert(headers::ContentLength(0));

        // Helper to add method to array if method is in fact allowed.
        let islock = |m| m == DavMethod::LOCK || m == DavMethod::UNLOCK;
        let mm = |v: &mut Vec<&'static str>, m: &'static str, y: DavMethod| {
            if (!islock(y) || self.ls.is_some()) && self.allow.contains(y) {
                v.push(m);
            }
        };

        let path = self.path(req)?;
        let meta = self.store.metadata(&path).await;
        let is_unmapped = meta.is_err();
        let is_star = path.is_star();

        let mut v = Vec::new();
        if is_unmapped && !is_star {
            mm(&mut v, "OPTIONS", DavMethod::OPTIONS);
            mm(&mut v, "MKCOL", DavMethod::MKCOL);
        } else {
            mm(&mut v, "OPTIONS", DavMethod::OPTIONS);
            mm(&mut v, "PROPFIND", DavMethod::PROPFIND);
            mm(&mut v, "PROPPATCH", DavMethod::PROPPATCH);
            mm(&mut v, "COPY", DavMethod::COPY);
            if !path.is_root() {
                mm(&mut v, "MOVE", DavMethod::MOVE);
            }
            mm(&mut v, "LOCK", DavMethod::LOCK);
            mm(&mut v, "UNLOCK", DavMethod::UNLOCK);
        }

        let a = HeaderValue::from_str(&v.join(",")).map_err(|_| crate::DavError::ContractViolation("allow header"))?;
        res.headers_mut().insert("allow", a);

        Ok(res)
    }
}
