use headers::HeaderMapExt;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::conditional::if_match;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::multistatus::{element_for_tag, element_tag, DavResponse, MultiStatus};
use crate::props::widgets::WidgetError;
use crate::props::{DavProperty, PropContext, PropFailure, PropValue, Resolved, Scope};
use crate::store::{ResourceMeta, StoreError};
use crate::xmltree_ext::{ElementExt, NS_DAV_URI};
use crate::{DavError, DavResult};

// what a PROPFIND asks for.
#[derive(Debug)]
enum PropfindMode {
    PropName,
    // tags named in <include>.
    AllProp(Vec<String>),
    Prop(Vec<String>),
}

fn is_xml_content_type(req: &Request<()>) -> bool {
    let ct = match req.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        Some(ct) => ct,
        None => return true,
    };
    let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    mime == "application/xml" || mime == "text/xml"
}

fn child_tags(elem: &Element) -> Vec<String> {
    elem.child_elems_iter().map(element_tag).collect()
}

fn parse_propfind(xmldata: &[u8]) -> DavResult<PropfindMode> {
    if xmldata.is_empty() {
        return Ok(PropfindMode::AllProp(Vec::new()));
    }
    let root = Element::parse(xmldata)?;
    if !root.is(NS_DAV_URI, "propfind") {
        return Err(DavError::Unprocessable(
            "Request body must be a DAV:propfind element".to_string(),
        ));
    }
    let include = root
        .get_child_ns(NS_DAV_URI, "include")
        .map(child_tags)
        .unwrap_or_default();
    for elem in root.child_elems_iter() {
        if elem.is(NS_DAV_URI, "propname") {
            return Ok(PropfindMode::PropName);
        }
        if elem.is(NS_DAV_URI, "allprop") {
            return Ok(PropfindMode::AllProp(include));
        }
        if elem.is(NS_DAV_URI, "prop") {
            return Ok(PropfindMode::Prop(child_tags(elem)));
        }
    }
    Err(DavError::Unprocessable(
        "DAV:propfind must contain prop, propname or allprop".to_string(),
    ))
}

// status for a property that could not be looked up at all.
fn lookup_failure(e: DavError, tag: &str, scope: Scope) -> DavResult<StatusCode> {
    match e {
        DavError::Unauthorized if scope == Scope::Root => Err(DavError::Unauthorized),
        DavError::Unauthorized => Ok(StatusCode::UNAUTHORIZED),
        DavError::PropertyNotFound(_) => Ok(StatusCode::NOT_FOUND),
        e => {
            debug!("property {}: {}", tag, e);
            Ok(e.statuscode())
        }
    }
}

fn add_failure(resp: &mut DavResponse, tag: &str, failure: PropFailure) {
    let ps = resp.propstat_mut(failure.status);
    ps.properties.push(element_for_tag(tag));
    if failure.description.is_some() {
        ps.description = failure.description;
    }
}

// one planned PROPPATCH change, with what to restore if a later one fails.
enum Change<'r> {
    SetLive {
        prop: &'r DavProperty,
        value: PropValue,
        previous: Option<PropValue>,
    },
    SetDead {
        tag: String,
        xml: String,
        previous: Option<String>,
    },
    RemoveDead {
        tag: String,
        previous: Option<String>,
    },
    // value is already what was asked for.
    Unchanged,
}

fn widget_failure(e: WidgetError) -> DavResult<PropFailure> {
    match e {
        WidgetError::Unauthorized => Err(DavError::Unauthorized),
        WidgetError::Forbidden => Ok(PropFailure::new(StatusCode::FORBIDDEN)),
        WidgetError::Invalid(msg) => Ok(PropFailure::new(StatusCode::CONFLICT).describe(msg)),
    }
}

fn patch_store_failure(e: StoreError) -> DavResult<PropFailure> {
    match e {
        StoreError::Unauthorized => Err(DavError::Unauthorized),
        StoreError::Forbidden => Ok(PropFailure::new(StatusCode::FORBIDDEN)),
        StoreError::Conflict => Ok(PropFailure::new(StatusCode::CONFLICT)),
        e => {
            warn!("proppatch: {:?}", e);
            Ok(PropFailure::new(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

impl crate::DavHandler {
    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        // No checks on If: and If-* headers here, reading does not need a lock.
        let mut res = Response::new(Body::empty());

        if !xmldata.is_empty() && !is_xml_content_type(req) {
            return Err(DavError::BadRequest("Invalid Content-Type".to_string()));
        }

        let depth = match req.headers().typed_try_get::<Depth>() {
            Ok(Some(d)) => d,
            Ok(None) => Depth::Infinity,
            Err(_) => {
                return Err(DavError::BadRequest(
                    "Invalid Depth header supplied".to_string(),
                ))
            }
        };

        let mut path = self.path(req)?;
        let meta = self.store.metadata(&path).await?;
        self.fixpath(&mut res, &mut path, &meta);

        let mode = parse_propfind(xmldata)?;
        debug!("propfind: {:?} depth {:?} on {}", mode, depth, path);

        let mut ms = MultiStatus::new();
        self.propfind_resource(&mode, &path, &meta, Scope::Root, &mut ms)
            .await?;

        if meta.collection && depth != Depth::Zero {
            self.propfind_directory(&mode, &path, depth, &mut ms).await?;
        }

        let mut resp = ms.into_response()?;
        let h = resp.headers_mut();
        h.insert("Cache-Control", HeaderValue::from_static("no-store, no-cache, must-revalidate"));
        h.insert("Pragma", HeaderValue::from_static("no-cache"));
        if let Some(cl) = res.headers().get(http::header::CONTENT_LOCATION) {
            h.insert(http::header::CONTENT_LOCATION, cl.clone());
        }
        Ok(resp)
    }

    // members of the root collection, depth-first, each before its own members.
    async fn propfind_directory(
        &self,
        mode: &PropfindMode,
        root: &DavPath,
        depth: Depth,
        ms: &mut MultiStatus,
    ) -> DavResult<()> {
        let mut stack = match self.store.list_children(root).await {
            Ok(children) => children,
            Err(StoreError::Forbidden) => {
                debug!("propfind: listing {} forbidden", root);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        stack.reverse();

        while let Some(mut path) = stack.pop() {
            let meta = match self.store.metadata(&path).await {
                Ok(meta) => meta,
                Err(e) => {
                    debug!("propfind: skipping {}: {:?}", path, e);
                    continue;
                }
            };
            if meta.collection {
                path.add_slash();
            }
            self.propfind_resource(mode, &path, &meta, Scope::Nested, ms)
                .await?;

            if meta.collection && depth == Depth::Infinity {
                match self.store.list_children(&path).await {
                    Ok(children) => stack.extend(children.into_iter().rev()),
                    // if we cannot list it, just skip it.
                    Err(e) => warn!("propfind: cannot list {}: {:?}", path, e),
                }
            }
        }
        Ok(())
    }

    // properties of one resource.
    async fn propfind_resource(
        &self,
        mode: &PropfindMode,
        path: &DavPath,
        meta: &ResourceMeta,
        scope: Scope,
        ms: &mut MultiStatus,
    ) -> DavResult<()> {
        let ctx = PropContext {
            registry: &self.registry,
            store: &*self.store,
            ls: self.ls_ref(),
            path,
            meta,
        };
        let href = self.store.resolve_url(path);
        let mut resp = DavResponse::new(href.clone());

        let (props, names_only) = match mode {
            PropfindMode::PropName | PropfindMode::AllProp(_) => {
                let all = match ctx.get_all_properties().await {
                    Ok(all) => all,
                    Err(StoreError::Unauthorized) if scope == Scope::Root => {
                        return Err(DavError::Unauthorized)
                    }
                    Err(e) => {
                        debug!("propfind: properties of {}: {:?}", path, e);
                        ms.push(DavResponse::with_status(href, DavError::from(e).statuscode()));
                        return Ok(());
                    }
                };
                match mode {
                    PropfindMode::AllProp(include) => {
                        let mut v = Vec::new();
                        for r in all {
                            let hidden = match r {
                                Resolved::Live(p) => p.restricted && !include.contains(&p.tag),
                                Resolved::Dead(..) => false,
                            };
                            if !hidden {
                                v.push(r);
                            }
                        }
                        // included tags that are not part of allprop at all.
                        for tag in include {
                            if v.iter().any(|r| r.tag() == tag.as_str()) {
                                continue;
                            }
                            match ctx.get_property(tag, false).await {
                                Ok(r) => v.push(r),
                                Err(e) => {
                                    let status = lookup_failure(e, tag, scope)?;
                                    add_failure(&mut resp, tag, PropFailure::new(status));
                                }
                            }
                        }
                        (v, false)
                    }
                    _ => (all, true),
                }
            }
            PropfindMode::Prop(tags) => {
                let mut v = Vec::new();
                for tag in tags {
                    match ctx.get_property(tag, false).await {
                        Ok(r) => v.push(r),
                        Err(e) => {
                            let status = lookup_failure(e, tag, scope)?;
                            add_failure(&mut resp, tag, PropFailure::new(status));
                        }
                    }
                }
                (v, false)
            }
        };

        for r in &props {
            match ctx.render(r, scope, names_only).await? {
                Ok(elem) => resp.add_property(StatusCode::OK, elem),
                Err(failure) => add_failure(&mut resp, r.tag(), failure),
            }
        }
        ms.push(resp);
        Ok(())
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let mut path = self.path(req)?;
        let meta = self.store.metadata(&path).await?;
        self.fixpath(&mut res, &mut path, &meta);

        let record = if_match(req, &*self.store, self.ls_ref(), &self.prefix, &path).await?;
        self.check_lock(&record, &path)?;

        debug!(target: "xml", "proppatch input:\n{}]\n", String::from_utf8_lossy(xmldata));

        let tree = Element::parse(xmldata)?;
        if !tree.is(NS_DAV_URI, "propertyupdate") {
            return Err(DavError::Unprocessable(
                "Request body must be a DAV:propertyupdate element".to_string(),
            ));
        }

        // set and remove instructions, in document order.
        let mut ops = Vec::new();
        for elem in tree.child_elems_iter() {
            let set = if elem.is(NS_DAV_URI, "set") {
                true
            } else if elem.is(NS_DAV_URI, "remove") {
                false
            } else {
                continue;
            };
            if let Some(prop) = elem.get_child_ns(NS_DAV_URI, "prop") {
                for p in prop.child_elems_iter() {
                    ops.push((set, p));
                }
            }
        }
        if ops.is_empty() {
            return Err(DavError::Unprocessable(
                "DAV:propertyupdate contains no properties".to_string(),
            ));
        }

        let ctx = PropContext {
            registry: &self.registry,
            store: &*self.store,
            ls: self.ls_ref(),
            path: &path,
            meta: &meta,
        };

        // First validate everything, no changes yet.
        let mut planned = Vec::new();
        for (set, elem) in ops {
            let tag = element_tag(elem);
            let change = self.plan_change(&ctx, set, &tag, elem).await?;
            planned.push((tag, change));
        }

        let failed = planned.iter().any(|(_, c)| c.is_err());
        let mut resp = DavResponse::new(self.store.resolve_url(&path));

        if failed {
            for (tag, change) in planned {
                match change {
                    Ok(_) => resp.add_property(StatusCode::FAILED_DEPENDENCY, element_for_tag(&tag)),
                    Err(failure) => add_failure(&mut resp, &tag, failure),
                }
            }
        } else {
            let changes = planned
                .into_iter()
                .filter_map(|(tag, c)| c.ok().map(|c| (tag, c)))
                .collect::<Vec<_>>();
            match self.commit_changes(&path, &changes).await {
                Ok(()) => {
                    for (tag, _) in &changes {
                        resp.add_property(StatusCode::OK, element_for_tag(tag));
                    }
                }
                Err((idx, e)) => {
                    self.rollback_changes(&path, &changes[..idx]).await;
                    let failure = patch_store_failure(e)?;
                    for (i, (tag, _)) in changes.iter().enumerate() {
                        if i == idx {
                            add_failure(&mut resp, tag, failure.clone());
                        } else {
                            resp.add_property(StatusCode::FAILED_DEPENDENCY, element_for_tag(tag));
                        }
                    }
                }
            }
        }

        let mut ms = MultiStatus::new();
        ms.push(resp);
        let mut out = ms.into_response()?;
        if let Some(cl) = res.headers().get(http::header::CONTENT_LOCATION) {
            out.headers_mut()
                .insert(http::header::CONTENT_LOCATION, cl.clone());
        }
        Ok(out)
    }

    // validate one instruction, and find out what it would change.
    async fn plan_change<'r>(
        &'r self,
        ctx: &PropContext<'_>,
        set: bool,
        tag: &str,
        elem: &Element,
    ) -> DavResult<Result<Change<'r>, PropFailure>> {
        if let Some(prop) = self.registry.lookup(tag) {
            if !set {
                return Ok(Err(PropFailure::new(StatusCode::CONFLICT)
                    .describe("Live properties cannot be removed")));
            }
            if prop.readonly {
                return Ok(Err(PropFailure::new(StatusCode::FORBIDDEN)
                    .describe("Property is read-only")));
            }
            if !prop.resolves(ctx.meta, ctx.ls.is_some()) {
                return Ok(Err(PropFailure::new(StatusCode::FORBIDDEN)
                    .describe("Property does not apply to this resource")));
            }
            let value = match prop.get_widget().parse(prop, elem) {
                Ok(v) => v,
                Err(e) => return widget_failure(e).map(Err),
            };
            let previous = match ctx.read_value(prop).await {
                Ok(v) => v,
                Err(e) => return patch_store_failure(e).map(Err),
            };
            if previous.as_ref() == Some(&value) {
                return Ok(Ok(Change::Unchanged));
            }
            return Ok(Ok(Change::SetLive {
                prop,
                value,
                previous,
            }));
        }

        let path = ctx.path;
        match self.store.have_opaque_properties(path).await {
            Ok(true) => {}
            Ok(false) => {
                return Ok(Err(PropFailure::new(StatusCode::FORBIDDEN)
                    .describe("Resource does not store dead properties")))
            }
            Err(e) => return patch_store_failure(e).map(Err),
        }
        let previous = match self.store.get_opaque_property(path, tag).await {
            Ok(v) => v,
            Err(e) => return patch_store_failure(e).map(Err),
        };
        if !set {
            return Ok(Ok(Change::RemoveDead {
                tag: tag.to_string(),
                previous,
            }));
        }
        let xml = elem.to_xml_string()?;
        if previous.as_deref() == Some(xml.as_str()) {
            return Ok(Ok(Change::Unchanged));
        }
        Ok(Ok(Change::SetDead {
            tag: tag.to_string(),
            xml,
            previous,
        }))
    }

    // apply in order. on failure, the index of the change that failed.
    async fn commit_changes(
        &self,
        path: &DavPath,
        changes: &[(String, Change<'_>)],
    ) -> Result<(), (usize, StoreError)> {
        for (idx, (_, change)) in changes.iter().enumerate() {
            let r = match change {
                Change::SetLive { prop, value, .. } => {
                    self.store
                        .write_property(path, &prop.tag, value.clone())
                        .await
                }
                Change::SetDead { tag, xml, .. } => {
                    self.store
                        .set_opaque_property(path, tag, xml.clone())
                        .await
                }
                Change::RemoveDead { tag, .. } => self.store.remove_opaque_property(path, tag).await,
                Change::Unchanged => Ok(()),
            };
            r.map_err(|e| (idx, e))?;
        }
        Ok(())
    }

    // undo applied changes, last first.
    async fn rollback_changes(&self, path: &DavPath, changes: &[(String, Change<'_>)]) {
        for (tag, change) in changes.iter().rev() {
            let r = match change {
                Change::SetLive {
                    prop,
                    previous: Some(previous),
                    ..
                } => {
                    self.store
                        .write_property(path, &prop.tag, previous.clone())
                        .await
                }
                Change::SetLive {
                    prop,
                    previous: None,
                    ..
                } => self.store.clear_property(path, &prop.tag).await,
                Change::SetDead {
                    previous: Some(previous),
                    ..
                }
                | Change::RemoveDead {
                    previous: Some(previous),
                    ..
                } => {
                    self.store
                        .set_opaque_property(path, tag, previous.clone())
                        .await
                }
                Change::SetDead { previous: None, .. } => {
                    self.store.remove_opaque_property(path, tag).await
                }
                Change::RemoveDead { previous: None, .. } | Change::Unchanged => Ok(()),
            };
            if let Err(e) = r {
                error!("proppatch: rollback of {} on {} failed: {:?}", tag, path, e);
            }
        }
    }
}
