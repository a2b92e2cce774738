use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::{if_match, IfRecord};
use crate::davheaders::{self, Depth, Destination, Overwrite};
use crate::davpath::DavPath;
use crate::locking;
use crate::store::{ResourceMeta, StoreError};
use crate::util::DavMethod;
use crate::{DavError, DavResult};

// map a store error from copy_to / move_to.
fn transfer_error(e: StoreError) -> DavError {
    match e {
        StoreError::Forbidden => {
            DavError::Forbidden("Cannot copy or move a collection into itself".to_string())
        }
        StoreError::Conflict => DavError::Conflict("Destination parent does not exist".to_string()),
        e => e.into(),
    }
}

impl crate::DavHandler {
    // the resource and, for a collection, every member must be unlocked
    // or have its token in the If header.
    async fn check_lock_tree(
        &self,
        record: &IfRecord,
        path: &DavPath,
        meta: &ResourceMeta,
    ) -> DavResult<()> {
        self.check_lock(record, path)?;
        if meta.collection && self.ls.is_some() {
            for p in locking::descendants(&*self.store, path).await? {
                self.check_lock(record, &p)?;
            }
        }
        Ok(())
    }

    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;
        let meta = self.store.metadata(&path).await?;
        if meta.collection {
            path.add_slash();
        }

        // COPY may be shallow, MOVE always takes the whole tree.
        let depth = match req.headers().typed_try_get::<Depth>() {
            Ok(d) => d,
            Err(_) => {
                return Err(DavError::BadRequest(
                    "Invalid Depth header supplied".to_string(),
                ))
            }
        };
        let deep = match (method, depth) {
            (_, None) | (_, Some(Depth::Infinity)) => true,
            (DavMethod::COPY, Some(Depth::Zero)) => false,
            _ => {
                return Err(DavError::BadRequest(format!(
                    "Depth {:?} not allowed for {:?}",
                    depth, method
                )))
            }
        };

        let dest = match req.headers().typed_try_get::<Destination>() {
            Ok(Some(d)) => d.0,
            _ => {
                return Err(DavError::BadRequest(
                    "Missing or invalid Destination header".to_string(),
                ))
            }
        };
        let host = req
            .headers()
            .get(http::header::HOST)
            .and_then(|h| h.to_str().ok());
        let mut dest = davheaders::url_to_path(&dest, host, &self.prefix)?;

        let overwrite = match req.headers().typed_try_get::<Overwrite>() {
            Ok(o) => o.map(|o| o.0).unwrap_or(true),
            Err(_) => return Err(DavError::BadRequest("Invalid Overwrite header".to_string())),
        };

        let dest_meta = match self.store.metadata(&dest).await {
            Ok(m) => Some(m),
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        if dest_meta.is_some() && !overwrite {
            debug!("{:?}: {} exists and Overwrite is F", method, dest);
            return Err(DavError::PreconditionFailed);
        }
        if dest.same_resource(&path) {
            return Err(DavError::Forbidden(
                "Source and destination are the same resource".to_string(),
            ));
        }
        if method == DavMethod::MOVE && path.is_root() {
            return Err(DavError::Forbidden("Cannot move the root".to_string()));
        }
        if dest.is_root() {
            return Err(DavError::Forbidden("Cannot replace the root".to_string()));
        }
        if !self.has_parent(&dest).await {
            return Err(DavError::Conflict(
                "Destination parent does not exist".to_string(),
            ));
        }

        if meta.collection {
            dest.add_slash();
        }

        let record = if_match(req, &*self.store, self.ls_ref(), &self.prefix, &path).await?;

        // a new member of a locked collection needs the collection's token.
        self.check_lock(&record, &dest.parent())?;
        match dest_meta {
            Some(ref m) => self.check_lock_tree(&record, &dest, m).await?,
            None => self.check_lock(&record, &dest)?,
        }
        if method == DavMethod::MOVE {
            self.check_lock(&record, &path.parent())?;
            self.check_lock_tree(&record, &path, &meta).await?;
        }

        let dparent = dest.parent();
        let name = dest.file_name();
        if method == DavMethod::COPY {
            self.store
                .copy_to(&path, &dparent, &name, deep)
                .await
                .map_err(transfer_error)?;
        } else {
            self.store
                .move_to(&path, &dparent, &name)
                .await
                .map_err(transfer_error)?;
        }

        // locks do not travel with the resource, and replaced ones are gone.
        if let Some(ls) = self.ls_ref() {
            if dest_meta.is_some() {
                ls.delete(&dest);
            }
            if method == DavMethod::MOVE {
                ls.delete(&path);
            }
        }

        let mut res = Response::new(Body::empty());
        if dest_meta.is_some() {
            *res.status_mut() = StatusCode::NO_CONTENT;
        } else {
            *res.status_mut() = StatusCode::CREATED;
            if let Ok(loc) = http::HeaderValue::from_str(&dest.as_url_string_with_prefix()) {
                res.headers_mut().insert(http::header::LOCATION, loc);
            }
        }
        Ok(res)
    }
}
