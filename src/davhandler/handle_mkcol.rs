use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::if_match;
use crate::store::StoreError;
use crate::{DavError, DavResult};

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;

        match self.store.metadata(&path).await {
            Ok(_) => return Err(DavError::MethodNotAllowed),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        if path.is_root() {
            return Err(DavError::MethodNotAllowed);
        }
        if !self.has_parent(&path).await {
            return Err(DavError::Conflict("Parent collection does not exist".to_string()));
        }

        let parent = path.parent();
        let record = if_match(req, &*self.store, self.ls_ref(), &self.prefix, &path).await?;
        self.check_lock(&record, &parent)?;

        let name = path.file_name();
        match self.store.create_collection(&parent, &name).await {
            Ok(()) => {}
            Err(StoreError::Forbidden) => {
                return Err(DavError::Forbidden("Collection creation denied".to_string()))
            }
            Err(StoreError::NotImplemented) => {
                return Err(DavError::Forbidden("Store cannot create collections".to_string()))
            }
            Err(StoreError::Exists) => return Err(DavError::MethodNotAllowed),
            Err(StoreError::Conflict) => {
                return Err(DavError::Conflict("Parent collection does not exist".to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        debug!("mkcol: created {}", path);

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::CREATED;
        path.add_slash();
        if let Ok(loc) = http::HeaderValue::from_str(&path.as_url_string_with_prefix()) {
            res.headers_mut().insert(http::header::LOCATION, loc);
        }
        Ok(res)
    }
}
