//! Widgets convert between the native value of a live property and its
//! XML form.
//!
//! The built-in widgets cover the closed set of [`FieldKind`]s; a property
//! may carry its own widget instead (see [`DavProperty::widget`]).
use std::fmt::Debug;

use time::macros::format_description;
use xmltree::{Element, XMLNode};

use super::{DateFormat, DavProperty, FieldKind, PropValue};
use crate::multistatus::element_for_tag;
use crate::util::{
    httpdate_to_systemtime, rfc3339_to_offsetdatetime, systemtime_to_httpdate,
    systemtime_to_offsetdatetime, systemtime_to_rfc3339,
};
use crate::xmltree_ext::ElementExt;

/// Failure of a widget to render or to parse a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetError {
    /// The submitted XML is not a valid value for the field.
    Invalid(String),
    /// Reading or writing this value is denied by policy.
    Forbidden,
    /// Reading or writing this value needs credentials.
    Unauthorized,
}

impl std::fmt::Display for WidgetError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            WidgetError::Invalid(msg) => write!(f, "invalid value: {}", msg),
            WidgetError::Forbidden => write!(f, "forbidden"),
            WidgetError::Unauthorized => write!(f, "unauthorized"),
        }
    }
}

impl std::error::Error for WidgetError {}

fn invalid(msg: impl Into<String>) -> WidgetError {
    WidgetError::Invalid(msg.into())
}

/// Render / parse pair for one property.
pub trait DavWidget: Debug + Send + Sync {
    /// The complete property element. A missing value renders as an empty element.
    fn render(&self, prop: &DavProperty, value: Option<&PropValue>) -> Result<Element, WidgetError> {
        let mut elem = element_for_tag(&prop.tag);
        if let Some(value) = value {
            elem.children = self.encode(&prop.kind, value)?;
        }
        Ok(elem)
    }

    /// Native value from a property element out of a PROPPATCH body.
    fn parse(&self, prop: &DavProperty, elem: &Element) -> Result<PropValue, WidgetError> {
        self.decode(&prop.kind, elem)
    }

    /// Content of the property element.
    fn encode(&self, kind: &FieldKind, value: &PropValue) -> Result<Vec<XMLNode>, WidgetError>;

    /// Value from the content of `elem`.
    fn decode(&self, kind: &FieldKind, elem: &Element) -> Result<PropValue, WidgetError>;
}

/// Widget for the given field kind.
pub fn builtin_widget(kind: &FieldKind) -> &'static dyn DavWidget {
    match kind {
        FieldKind::Text => &TextWidget,
        FieldKind::Int => &IntWidget,
        FieldKind::Float => &FloatWidget,
        FieldKind::Date => &DateWidget,
        FieldKind::DateTime(_) => &DateTimeWidget,
        FieldKind::List { .. } => &ListWidget,
        FieldKind::Object(_) => &ObjectWidget,
        FieldKind::Opaque => &OpaqueWidget,
    }
}

// A simple value is a single text node, no child elements.
fn simple_text(elem: &Element) -> Result<String, WidgetError> {
    if elem.has_child_elems() {
        return Err(invalid(format!("{} must not have child elements", elem.name)));
    }
    Ok(elem.text_content())
}

fn mismatch(kind: &FieldKind) -> WidgetError {
    invalid(format!("value does not match field type {:?}", kind))
}

#[derive(Debug)]
pub struct TextWidget;

impl DavWidget for TextWidget {
    fn encode(&self, kind: &FieldKind, value: &PropValue) -> Result<Vec<XMLNode>, WidgetError> {
        match value {
            PropValue::Text(s) if s.is_empty() => Ok(Vec::new()),
            PropValue::Text(s) => Ok(vec![XMLNode::Text(s.clone())]),
            _ => Err(mismatch(kind)),
        }
    }

    fn decode(&self, _kind: &FieldKind, elem: &Element) -> Result<PropValue, WidgetError> {
        if elem.has_child_elems() {
            return Err(invalid(format!("{} must be text", elem.name)));
        }
        // text is taken as-is, surrounding whitespace included.
        Ok(PropValue::Text(
            elem.get_text().map(|t| t.into_owned()).unwrap_or_default(),
        ))
    }
}

#[derive(Debug)]
pub struct IntWidget;

impl DavWidget for IntWidget {
    fn encode(&self, kind: &FieldKind, value: &PropValue) -> Result<Vec<XMLNode>, WidgetError> {
        match value {
            PropValue::Int(i) => Ok(vec![XMLNode::Text(i.to_string())]),
            _ => Err(mismatch(kind)),
        }
    }

    fn decode(&self, _kind: &FieldKind, elem: &Element) -> Result<PropValue, WidgetError> {
        let s = simple_text(elem)?;
        s.parse::<i64>()
            .map(PropValue::Int)
            .map_err(|_| invalid(format!("{:?} is not an integer", s)))
    }
}

#[derive(Debug)]
pub struct FloatWidget;

impl DavWidget for FloatWidget {
    fn encode(&self, kind: &FieldKind, value: &PropValue) -> Result<Vec<XMLNode>, WidgetError> {
        match value {
            PropValue::Float(f) => Ok(vec![XMLNode::Text(f.to_string())]),
            _ => Err(mismatch(kind)),
        }
    }

    fn decode(&self, _kind: &FieldKind, elem: &Element) -> Result<PropValue, WidgetError> {
        let s = simple_text(elem)?;
        match s.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(PropValue::Float(f)),
            _ => Err(invalid(format!("{:?} is not a number", s))),
        }
    }
}

#[derive(Debug)]
pub struct DateWidget;

impl DavWidget for DateWidget {
    fn encode(&self, kind: &FieldKind, value: &PropValue) -> Result<Vec<XMLNode>, WidgetError> {
        let fmt = format_description!("[year]-[month]-[day]");
        match value {
            PropValue::Date(d) => d
                .format(&fmt)
                .map(|s| vec![XMLNode::Text(s)])
                .map_err(|e| invalid(e.to_string())),
            _ => Err(mismatch(kind)),
        }
    }

    fn decode(&self, _kind: &FieldKind, elem: &Element) -> Result<PropValue, WidgetError> {
        let fmt = format_description!("[year]-[month]-[day]");
        let s = simple_text(elem)?;
        time::Date::parse(&s, &fmt)
            .map(PropValue::Date)
            .map_err(|_| invalid(format!("{:?} is not a date", s)))
    }
}

#[derive(Debug)]
pub struct DateTimeWidget;

impl DavWidget for DateTimeWidget {
    fn encode(&self, kind: &FieldKind, value: &PropValue) -> Result<Vec<XMLNode>, WidgetError> {
        let t = match value {
            PropValue::DateTime(t) => *t,
            _ => return Err(mismatch(kind)),
        };
        let s = match kind {
            FieldKind::DateTime(DateFormat::Rfc1123) => systemtime_to_httpdate(t.into()),
            _ => systemtime_to_rfc3339(t.into()),
        };
        Ok(vec![XMLNode::Text(s)])
    }

    fn decode(&self, kind: &FieldKind, elem: &Element) -> Result<PropValue, WidgetError> {
        let s = simple_text(elem)?;
        let t = match kind {
            FieldKind::DateTime(DateFormat::Rfc1123) => {
                httpdate_to_systemtime(&s).map(systemtime_to_offsetdatetime)
            }
            _ => rfc3339_to_offsetdatetime(&s),
        };
        t.map(PropValue::DateTime)
            .ok_or_else(|| invalid(format!("{:?} is not a valid date", s)))
    }
}

#[derive(Debug)]
pub struct ListWidget;

impl DavWidget for ListWidget {
    fn encode(&self, kind: &FieldKind, value: &PropValue) -> Result<Vec<XMLNode>, WidgetError> {
        let (item_tag, item_kind) = match kind {
            FieldKind::List { item_tag, item } => (item_tag, item.as_ref()),
            _ => return Err(mismatch(kind)),
        };
        let items = match value {
            PropValue::List(items) => items,
            _ => return Err(mismatch(kind)),
        };
        let widget = builtin_widget(item_kind);
        let mut nodes = Vec::with_capacity(items.len());
        for item in items {
            let mut e = element_for_tag(item_tag);
            e.children = widget.encode(item_kind, item)?;
            nodes.push(XMLNode::Element(e));
        }
        Ok(nodes)
    }

    fn decode(&self, kind: &FieldKind, elem: &Element) -> Result<PropValue, WidgetError> {
        let (item_tag, item_kind) = match kind {
            FieldKind::List { item_tag, item } => (item_tag, item.as_ref()),
            _ => return Err(mismatch(kind)),
        };
        let widget = builtin_widget(item_kind);
        let mut items = Vec::new();
        for child in elem.child_elems_iter() {
            if &crate::multistatus::element_tag(child) != item_tag {
                return Err(invalid(format!("unexpected list item {}", child.name)));
            }
            items.push(widget.decode(item_kind, child)?);
        }
        Ok(PropValue::List(items))
    }
}

#[derive(Debug)]
pub struct ObjectWidget;

impl DavWidget for ObjectWidget {
    fn encode(&self, kind: &FieldKind, value: &PropValue) -> Result<Vec<XMLNode>, WidgetError> {
        let fields = match kind {
            FieldKind::Object(fields) => fields,
            _ => return Err(mismatch(kind)),
        };
        let values = match value {
            PropValue::Object(values) => values,
            _ => return Err(mismatch(kind)),
        };
        let mut nodes = Vec::with_capacity(fields.len());
        for field in fields {
            let mut e = element_for_tag(&field.tag);
            // unset fields still get their (empty) element.
            if let Some((_, v)) = values.iter().find(|(t, _)| t == &field.tag) {
                e.children = builtin_widget(&field.kind).encode(&field.kind, v)?;
            }
            nodes.push(XMLNode::Element(e));
        }
        Ok(nodes)
    }

    fn decode(&self, kind: &FieldKind, elem: &Element) -> Result<PropValue, WidgetError> {
        let fields = match kind {
            FieldKind::Object(fields) => fields,
            _ => return Err(mismatch(kind)),
        };
        let mut values = Vec::new();
        for child in elem.child_elems_iter() {
            let tag = crate::multistatus::element_tag(child);
            let field = fields
                .iter()
                .find(|f| f.tag == tag)
                .ok_or_else(|| invalid(format!("unknown field {}", tag)))?;
            // an empty sub-element leaves the field unset.
            if child.children.is_empty() {
                continue;
            }
            values.push((tag, builtin_widget(&field.kind).decode(&field.kind, child)?));
        }
        Ok(PropValue::Object(values))
    }
}

#[derive(Debug)]
pub struct OpaqueWidget;

impl DavWidget for OpaqueWidget {
    fn encode(&self, kind: &FieldKind, value: &PropValue) -> Result<Vec<XMLNode>, WidgetError> {
        match value {
            PropValue::Xml(nodes) => Ok(nodes.clone()),
            PropValue::Text(s) => Ok(vec![XMLNode::Text(s.clone())]),
            _ => Err(mismatch(kind)),
        }
    }

    fn decode(&self, _kind: &FieldKind, elem: &Element) -> Result<PropValue, WidgetError> {
        Ok(PropValue::Xml(elem.children.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::SubField;

    fn prop(kind: FieldKind) -> DavProperty {
        DavProperty::new("{urn:test}p", kind)
    }

    fn xml(s: &str) -> Element {
        Element::parse(s.as_bytes()).unwrap()
    }

    #[test]
    fn text_render_and_missing_value() {
        let p = prop(FieldKind::Text);
        let w = builtin_widget(&p.kind);
        let e = w.render(&p, Some(&PropValue::Text("hello".into()))).unwrap();
        assert_eq!(e.text_content(), "hello");
        assert_eq!(e.namespace.as_deref(), Some("urn:test"));
        let e = w.render(&p, None).unwrap();
        assert!(e.children.is_empty());
    }

    #[test]
    fn int_parse_rejects_garbage() {
        let p = prop(FieldKind::Int);
        let w = builtin_widget(&p.kind);
        assert_eq!(
            w.parse(&p, &xml(r#"<p xmlns="urn:test"> 42 </p>"#)).unwrap(),
            PropValue::Int(42)
        );
        assert!(matches!(
            w.parse(&p, &xml(r#"<p xmlns="urn:test">forty</p>"#)),
            Err(WidgetError::Invalid(_))
        ));
        assert!(w.parse(&p, &xml(r#"<p xmlns="urn:test"><x/></p>"#)).is_err());
    }

    #[test]
    fn datetime_formats() {
        let t = time::OffsetDateTime::from_unix_timestamp(784111777).unwrap();
        let rfc1123 = prop(FieldKind::DateTime(DateFormat::Rfc1123));
        let e = builtin_widget(&rfc1123.kind)
            .render(&rfc1123, Some(&PropValue::DateTime(t)))
            .unwrap();
        assert_eq!(e.text_content(), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(
            builtin_widget(&rfc1123.kind).parse(&rfc1123, &e).unwrap(),
            PropValue::DateTime(t)
        );

        let iso = prop(FieldKind::DateTime(DateFormat::Iso8601));
        let e = builtin_widget(&iso.kind)
            .render(&iso, Some(&PropValue::DateTime(t)))
            .unwrap();
        assert_eq!(e.text_content(), "1994-11-06T08:49:37Z");
    }

    #[test]
    fn date_widget() {
        let p = prop(FieldKind::Date);
        let v = builtin_widget(&p.kind)
            .parse(&p, &xml(r#"<p xmlns="urn:test">2004-02-29</p>"#))
            .unwrap();
        let e = builtin_widget(&p.kind).render(&p, Some(&v)).unwrap();
        assert_eq!(e.text_content(), "2004-02-29");
    }

    #[test]
    fn list_items() {
        let p = prop(FieldKind::List {
            item_tag: "{urn:test}author".into(),
            item: Box::new(FieldKind::Text),
        });
        let w = builtin_widget(&p.kind);
        let v = w
            .parse(
                &p,
                &xml(r#"<p xmlns="urn:test"><author>Jim</author><author>Roy</author></p>"#),
            )
            .unwrap();
        assert_eq!(
            v,
            PropValue::List(vec![PropValue::Text("Jim".into()), PropValue::Text("Roy".into())])
        );
        let e = w.render(&p, Some(&v)).unwrap();
        assert_eq!(e.child_elems_iter().count(), 2);
        assert!(w
            .parse(&p, &xml(r#"<p xmlns="urn:test"><editor>x</editor></p>"#))
            .is_err());
    }

    #[test]
    fn object_renders_missing_fields_empty() {
        let p = prop(FieldKind::Object(vec![
            SubField::new("{urn:test}name", FieldKind::Text),
            SubField::new("{urn:test}age", FieldKind::Int),
        ]));
        let w = builtin_widget(&p.kind);
        let v = PropValue::Object(vec![("{urn:test}name".into(), PropValue::Text("Ann".into()))]);
        let e = w.render(&p, Some(&v)).unwrap();
        let kids = e.child_elems_iter().collect::<Vec<_>>();
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].text_content(), "Ann");
        assert!(kids[1].children.is_empty());
        assert_eq!(w.parse(&p, &e).unwrap(), v);
    }

    #[test]
    fn type_mismatch_is_invalid() {
        let p = prop(FieldKind::Int);
        assert!(builtin_widget(&p.kind)
            .render(&p, Some(&PropValue::Text("x".into())))
            .is_err());
    }
}
