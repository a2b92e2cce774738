//! Property registry and the property resolution pipeline.
//!
//! A *live* property is registered in the [`PropertyRegistry`] with a typed
//! [`FieldKind`]; its value is read from and written to the store (or
//! computed by the engine, see [`PropSource`]) and converted to and from
//! XML by a widget. Any tag that is not registered is a *dead* property:
//! an XML fragment kept verbatim in the store's opaque property store.
use std::fmt::Debug;
use std::sync::Arc;

use http::StatusCode;
use xmltree::{Element, XMLNode};

use crate::davpath::DavPath;
use crate::ls::DavLockSystem;
use crate::multistatus::element_for_tag;
use crate::store::{DavStore, ResourceMeta, StoreError};
use crate::{DavError, DavResult};

pub mod widgets;

use widgets::{builtin_widget, DavWidget, WidgetError};

/// Which textual date representation a date-time field uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// `Sun, 06 Nov 1994 08:49:37 GMT`
    Rfc1123,
    /// `1994-11-06T08:49:37Z`
    Iso8601,
}

/// The semantic type of a live property.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text,
    Int,
    Float,
    Date,
    DateTime(DateFormat),
    /// A sequence of `item_tag` elements, each holding one `item` value.
    List { item_tag: String, item: Box<FieldKind> },
    /// A fixed set of named sub-fields.
    Object(Vec<SubField>),
    /// Arbitrary XML content, not validated.
    Opaque,
}

/// One sub-field of a [`FieldKind::Object`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubField {
    pub tag: String,
    pub kind: FieldKind,
}

impl SubField {
    pub fn new(tag: impl Into<String>, kind: FieldKind) -> SubField {
        SubField {
            tag: tag.into(),
            kind,
        }
    }
}

/// Native value of a live property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Text(String),
    Int(i64),
    Float(f64),
    Date(time::Date),
    DateTime(time::OffsetDateTime),
    List(Vec<PropValue>),
    /// Sub-field values by tag. Unset sub-fields are absent.
    Object(Vec<(String, PropValue)>),
    /// Content nodes of an opaque field.
    Xml(Vec<XMLNode>),
}

/// Where the value of a live property comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropSource {
    /// `DavStore::read_property` / `write_property`.
    Store,
    /// Derived from the resource metadata (`DAV:resourcetype`).
    ResourceType,
    /// Derived from the lock table (`DAV:lockdiscovery`).
    LockDiscovery,
    /// The lock kinds the lock system offers (`DAV:supportedlock`).
    SupportedLock,
}

/// Which resources a live property exists on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliesTo {
    All,
    Collections,
    Leaves,
}

/// A registered live property.
#[derive(Clone)]
pub struct DavProperty {
    pub tag: String,
    pub kind: FieldKind,
    pub readonly: bool,
    /// Left out of `allprop` unless named in `include`.
    pub restricted: bool,
    pub applies_to: AppliesTo,
    pub source: PropSource,
    /// Replaces the built-in widget for `kind`.
    pub widget: Option<Arc<dyn DavWidget>>,
}

impl Debug for DavProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("DavProperty")
            .field("tag", &self.tag)
            .field("kind", &self.kind)
            .field("readonly", &self.readonly)
            .field("restricted", &self.restricted)
            .finish()
    }
}

impl DavProperty {
    pub fn new(tag: impl Into<String>, kind: FieldKind) -> DavProperty {
        DavProperty {
            tag: tag.into(),
            kind,
            readonly: false,
            restricted: false,
            applies_to: AppliesTo::All,
            source: PropSource::Store,
            widget: None,
        }
    }

    pub fn readonly(self) -> Self {
        let mut this = self;
        this.readonly = true;
        this
    }

    pub fn restricted(self) -> Self {
        let mut this = self;
        this.restricted = true;
        this
    }

    pub fn applies_to(self, applies_to: AppliesTo) -> Self {
        let mut this = self;
        this.applies_to = applies_to;
        this
    }

    pub fn source(self, source: PropSource) -> Self {
        let mut this = self;
        this.source = source;
        this
    }

    pub fn widget(self, widget: Arc<dyn DavWidget>) -> Self {
        let mut this = self;
        this.widget = Some(widget);
        this
    }

    /// The widget that renders and parses this property.
    pub fn get_widget(&self) -> &dyn DavWidget {
        match self.widget {
            Some(ref w) => w.as_ref(),
            None => builtin_widget(&self.kind),
        }
    }

    // does an adapter resolve for this resource.
    pub(crate) fn resolves(&self, meta: &ResourceMeta, locking: bool) -> bool {
        let kind_ok = match self.applies_to {
            AppliesTo::All => true,
            AppliesTo::Collections => meta.collection,
            AppliesTo::Leaves => !meta.collection,
        };
        let source_ok = match self.source {
            PropSource::LockDiscovery | PropSource::SupportedLock => locking,
            _ => true,
        };
        kind_ok && source_ok
    }
}

/// The set of live properties, built once and shared by every request.
#[derive(Debug, Clone, Default)]
pub struct PropertyRegistry {
    props: Vec<DavProperty>,
}

impl PropertyRegistry {
    /// An empty registry: every property is dead.
    pub fn new() -> PropertyRegistry {
        PropertyRegistry::default()
    }

    /// The live properties of RFC4918.
    pub fn webdav() -> PropertyRegistry {
        let dt = FieldKind::DateTime;
        PropertyRegistry::new()
            .with(DavProperty::new("{DAV:}creationdate", dt(DateFormat::Iso8601)).readonly())
            .with(DavProperty::new("{DAV:}displayname", FieldKind::Text))
            .with(DavProperty::new("{DAV:}getcontentlanguage", FieldKind::Text).applies_to(AppliesTo::Leaves))
            .with(
                DavProperty::new("{DAV:}getcontentlength", FieldKind::Int)
                    .readonly()
                    .applies_to(AppliesTo::Leaves),
            )
            .with(DavProperty::new("{DAV:}getcontenttype", FieldKind::Text).applies_to(AppliesTo::Leaves))
            .with(
                DavProperty::new("{DAV:}getetag", FieldKind::Text)
                    .readonly()
                    .applies_to(AppliesTo::Leaves),
            )
            .with(DavProperty::new("{DAV:}getlastmodified", dt(DateFormat::Rfc1123)).readonly())
            .with(
                DavProperty::new("{DAV:}resourcetype", FieldKind::Opaque)
                    .readonly()
                    .source(PropSource::ResourceType),
            )
            .with(
                DavProperty::new("{DAV:}lockdiscovery", FieldKind::Opaque)
                    .readonly()
                    .source(PropSource::LockDiscovery),
            )
            .with(
                DavProperty::new("{DAV:}supportedlock", FieldKind::Opaque)
                    .readonly()
                    .source(PropSource::SupportedLock),
            )
    }

    /// Builder: add a property.
    pub fn with(self, prop: DavProperty) -> Self {
        let mut this = self;
        this.register(prop);
        this
    }

    /// Add a property. A later registration of the same tag replaces the earlier one.
    pub fn register(&mut self, prop: DavProperty) {
        match self.props.iter_mut().find(|p| p.tag == prop.tag) {
            Some(p) => *p = prop,
            None => self.props.push(prop),
        }
    }

    pub fn lookup(&self, tag: &str) -> Option<&DavProperty> {
        self.props.iter().find(|p| p.tag == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DavProperty> {
        self.props.iter()
    }
}

/// A property as resolved for one resource.
#[derive(Debug, Clone)]
pub(crate) enum Resolved<'r> {
    Live(&'r DavProperty),
    /// Tag plus the stored XML, if it was loaded.
    Dead(String, Option<String>),
}

impl<'r> Resolved<'r> {
    pub(crate) fn tag(&self) -> &str {
        match self {
            Resolved::Live(p) => &p.tag,
            Resolved::Dead(t, _) => t,
        }
    }
}

/// Recursion level at which a property is rendered. Decides whether an
/// `Unauthorized` aborts the request or stays local to the property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    /// The directly addressed resource.
    Root,
    /// A member reached through `Depth`.
    Nested,
}

/// A failure that stays local to one property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PropFailure {
    pub status: StatusCode,
    pub description: Option<String>,
}

impl PropFailure {
    pub(crate) fn new(status: StatusCode) -> PropFailure {
        PropFailure {
            status,
            description: None,
        }
    }

    pub(crate) fn describe(self, d: impl Into<String>) -> PropFailure {
        PropFailure {
            description: Some(d.into()),
            ..self
        }
    }
}

/// Outcome for one property: rendered, or failed locally.
/// The outer `DavResult` aborts the whole request.
pub(crate) type PropOutcome = DavResult<Result<Element, PropFailure>>;

/// Everything needed to resolve and render properties of one resource.
pub(crate) struct PropContext<'a> {
    pub registry: &'a PropertyRegistry,
    pub store: &'a dyn DavStore,
    pub ls: Option<&'a dyn DavLockSystem>,
    pub path: &'a DavPath,
    pub meta: &'a ResourceMeta,
}

impl<'a> PropContext<'a> {
    /// All properties of the resource: applicable live properties in
    /// registration order, then dead properties in insertion order.
    pub(crate) async fn get_all_properties(&self) -> Result<Vec<Resolved<'a>>, StoreError> {
        let locking = self.ls.is_some();
        let mut v = self
            .registry
            .iter()
            .filter(|p| p.resolves(self.meta, locking))
            .map(Resolved::Live)
            .collect::<Vec<_>>();
        if self.store.have_opaque_properties(self.path).await? {
            for (tag, xml) in self.store.list_opaque_properties(self.path).await? {
                // a registered tag is never served from the opaque store.
                if self.registry.lookup(&tag).is_none() {
                    v.push(Resolved::Dead(tag, Some(xml)));
                }
            }
        }
        Ok(v)
    }

    /// Live lookup first, then the opaque store. With `exists` the
    /// property must have a stored value.
    pub(crate) async fn get_property(&self, tag: &str, exists: bool) -> DavResult<Resolved<'a>> {
        if let Some(prop) = self.registry.lookup(tag) {
            if !prop.resolves(self.meta, self.ls.is_some()) {
                return Err(DavError::PropertyNotFound(tag.to_string()));
            }
            if exists && self.read_value(prop).await?.is_none() {
                return Err(DavError::PropertyNotFound(tag.to_string()));
            }
            return Ok(Resolved::Live(prop));
        }
        let xml = match self.store.have_opaque_properties(self.path).await? {
            true => self.store.get_opaque_property(self.path, tag).await?,
            false => None,
        };
        match xml {
            Some(xml) => Ok(Resolved::Dead(tag.to_string(), Some(xml))),
            None if !exists => Ok(Resolved::Dead(tag.to_string(), None)),
            None => Err(DavError::PropertyNotFound(tag.to_string())),
        }
    }

    /// Current native value of a live property.
    pub(crate) async fn read_value(&self, prop: &DavProperty) -> Result<Option<PropValue>, StoreError> {
        let value = match prop.source {
            PropSource::Store => match self.store.read_property(self.path, &prop.tag).await {
                Err(StoreError::NotFound) => None,
                other => other?,
            },
            PropSource::ResourceType => {
                let mut v = Vec::new();
                if self.meta.collection {
                    v.push(XMLNode::Element(element_for_tag("{DAV:}collection")));
                }
                Some(PropValue::Xml(v))
            }
            PropSource::LockDiscovery => {
                let v = match self.ls {
                    Some(ls) => crate::locking::lockdiscovery_content(ls, self.path),
                    None => Vec::new(),
                };
                Some(PropValue::Xml(v))
            }
            PropSource::SupportedLock => {
                let v = match self.ls {
                    Some(ls) => crate::locking::supportedlock_content(ls),
                    None => Vec::new(),
                };
                Some(PropValue::Xml(v))
            }
        };
        Ok(value)
    }

    /// Render one property. With `names_only` the element stays empty.
    pub(crate) async fn render(&self, resolved: &Resolved<'_>, scope: Scope, names_only: bool) -> PropOutcome {
        let tag = resolved.tag();
        if names_only {
            return Ok(Ok(element_for_tag(tag)));
        }
        match resolved {
            Resolved::Live(prop) => {
                let value = match self.read_value(prop).await {
                    Ok(v) => v,
                    Err(e) => return store_failure(e, tag, scope),
                };
                match prop.get_widget().render(prop, value.as_ref()) {
                    Ok(elem) => Ok(Ok(elem)),
                    Err(WidgetError::Unauthorized) => {
                        store_failure(StoreError::Unauthorized, tag, scope)
                    }
                    Err(WidgetError::Forbidden) => {
                        store_failure(StoreError::Forbidden, tag, scope)
                    }
                    Err(WidgetError::Invalid(msg)) => {
                        warn!("render {}: {}", tag, msg);
                        Ok(Err(PropFailure::new(StatusCode::INTERNAL_SERVER_ERROR)))
                    }
                }
            }
            Resolved::Dead(_, Some(xml)) => match Element::parse(xml.as_bytes()) {
                Ok(elem) => Ok(Ok(elem)),
                Err(_) => {
                    warn!("stored dead property {} is not valid XML", tag);
                    Ok(Err(PropFailure::new(StatusCode::INTERNAL_SERVER_ERROR)))
                }
            },
            Resolved::Dead(_, None) => Ok(Err(PropFailure::new(StatusCode::NOT_FOUND))),
        }
    }
}

/// Turn a failed store call for one property into a local failure, or
/// into a request-level error for `Unauthorized` at the root.
pub(crate) fn store_failure(e: StoreError, tag: &str, scope: Scope) -> PropOutcome {
    match (e, scope) {
        (StoreError::Unauthorized, Scope::Root) => Err(DavError::Unauthorized),
        (StoreError::Unauthorized, Scope::Nested) => {
            debug!("property {}: unauthorized below the request root", tag);
            Ok(Err(PropFailure::new(StatusCode::UNAUTHORIZED)))
        }
        (StoreError::Forbidden, _) => Ok(Err(PropFailure::new(StatusCode::FORBIDDEN))),
        (StoreError::NotFound, _) => Ok(Err(PropFailure::new(StatusCode::NOT_FOUND))),
        (e, _) => {
            warn!("property {}: {:?}", tag, e);
            Ok(Err(PropFailure::new(StatusCode::INTERNAL_SERVER_ERROR)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_replaces_same_tag() {
        let mut reg = PropertyRegistry::webdav();
        let n = reg.iter().count();
        reg.register(DavProperty::new("{DAV:}displayname", FieldKind::Text).readonly());
        assert_eq!(reg.iter().count(), n);
        assert!(reg.lookup("{DAV:}displayname").unwrap().readonly);
        assert!(reg.lookup("{urn:x}nope").is_none());
    }

    #[test]
    fn resolves_by_resource_kind() {
        let reg = PropertyRegistry::webdav();
        let len = reg.lookup("{DAV:}getcontentlength").unwrap();
        assert!(len.resolves(&ResourceMeta::leaf(None), false));
        assert!(!len.resolves(&ResourceMeta::collection(), false));
        let ld = reg.lookup("{DAV:}lockdiscovery").unwrap();
        assert!(!ld.resolves(&ResourceMeta::collection(), false));
        assert!(ld.resolves(&ResourceMeta::collection(), true));
    }

    #[test]
    fn unauthorized_at_root_aborts() {
        assert!(matches!(
            store_failure(StoreError::Unauthorized, "{urn:x}a", Scope::Root),
            Err(DavError::Unauthorized)
        ));
        let nested = store_failure(StoreError::Unauthorized, "{urn:x}a", Scope::Nested).unwrap();
        assert_eq!(nested.unwrap_err().status, StatusCode::UNAUTHORIZED);
        let forbidden = store_failure(StoreError::Forbidden, "{urn:x}a", Scope::Root).unwrap();
        assert_eq!(forbidden.unwrap_err().status, StatusCode::FORBIDDEN);
    }
}
