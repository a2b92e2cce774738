//! The WebDAV request headers, as `headers::Header` implementations,
//! plus the parser for the `If` header grammar.
use std::fmt;

use headers::Header;
use http::header::{HeaderName, HeaderValue};
use regex::Regex;

use crate::davpath::{DavPath, ParseError};
use crate::{DavError, DavResult};

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref CONTENT_LOCATION: HeaderName = HeaderName::from_static("content-location");
    static ref X_LITMUS: HeaderName = HeaderName::from_static("x-litmus");
    static ref RE_SECOND: Regex = Regex::new(r"^(?i)second-(.*)$").unwrap();
}

/// Name of the `If` header. It is not a typed header, since a parse
/// error has to report where it went wrong.
pub(crate) const IF: &str = "if";

// helper: exactly one header value, as a trimmed string.
fn one<'i, I>(values: &mut I) -> Result<&'i str, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(headers::Error::invalid)?;
    if values.next().is_some() {
        return Err(headers::Error::invalid());
    }
    v.to_str()
        .map(|s| s.trim())
        .map_err(|_| headers::Error::invalid())
}

fn encode_str<E: Extend<HeaderValue>>(s: &str, values: &mut E) {
    if let Ok(v) = HeaderValue::from_str(s) {
        values.extend(std::iter::once(v));
    }
}

/// `Depth:` header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)? {
            "0" => Ok(Depth::Zero),
            "1" => Ok(Depth::One),
            s if s.eq_ignore_ascii_case("infinity") => Ok(Depth::Infinity),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        encode_str(s, values);
    }
}

/// One entry of a `Timeout:` header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DavTimeout {
    Seconds(u64),
    Infinite,
}

/// `Timeout:` header: candidates in order of preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout(pub Vec<DavTimeout>);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut v = Vec::new();
        for value in values {
            let value = value.to_str().map_err(|_| headers::Error::invalid())?;
            for word in value.split(',').map(|w| w.trim()) {
                if word.eq_ignore_ascii_case("infinite") || word.eq_ignore_ascii_case("infinity") {
                    v.push(DavTimeout::Infinite);
                } else if let Some(caps) = RE_SECOND.captures(word) {
                    let num = &caps[1];
                    if num.is_empty() || !num.bytes().all(|b| b.is_ascii_digit()) {
                        return Err(headers::Error::invalid());
                    }
                    // too many digits for a u64 is just a very large value.
                    let secs = num.parse::<u64>().unwrap_or(u64::MAX);
                    v.push(DavTimeout::Seconds(secs));
                }
                // anything else is an extension we do not know, skip it.
            }
        }
        Ok(Timeout(v))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = self
            .0
            .iter()
            .map(|t| match t {
                DavTimeout::Seconds(n) => format!("Second-{}", n),
                DavTimeout::Infinite => "Infinite".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        encode_str(&s, values);
    }
}

/// `Overwrite:` header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)? {
            "T" | "t" => Ok(Overwrite(true)),
            "F" | "f" => Ok(Overwrite(false)),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(if self.0 { "T" } else { "F" }, values);
    }
}

/// `Destination:` header, the raw URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)? {
            "" => Err(headers::Error::invalid()),
            s => Ok(Destination(s.to_string())),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&self.0, values);
    }
}

/// `Lock-Token:` header, without the angle brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTokenHdr(pub String);

impl Header for LockTokenHdr {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?;
        match s.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
            Some(t) if !t.is_empty() => Ok(LockTokenHdr(t.to_string())),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&format!("<{}>", self.0), values);
    }
}

/// `Content-Location:` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLocation(pub String);

impl Header for ContentLocation {
    fn name() -> &'static HeaderName {
        &CONTENT_LOCATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        one(values).map(|s| ContentLocation(s.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&self.0, values);
    }
}

/// `X-Litmus:` header, sent by the litmus test suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XLitmus(pub String);

impl Header for XLitmus {
    fn name() -> &'static HeaderName {
        &X_LITMUS
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        one(values).map(|s| XLitmus(s.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&self.0, values);
    }
}

/// A parsed `If` header: a list of (optionally tagged) condition lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfHeader(pub Vec<IfList>);

/// One parenthesized list, with the resource tag that precedes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfList {
    pub resource_tag: Option<String>,
    pub conditions: Vec<IfCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfCondition {
    pub not: bool,
    pub item: IfItem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfItem {
    StateToken(String),
    ETag(String),
}

/// Syntax error in an `If` header. `pos` is a byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfParseError {
    pub pos: usize,
    pub msg: &'static str,
}

impl fmt::Display for IfParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Invalid If header at position {}: {}", self.pos, self.msg)
    }
}

impl std::error::Error for IfParseError {}

struct Scanner<'a> {
    s: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.s.len() && self.s[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.s.get(self.pos).copied()
    }

    fn err(&self, msg: &'static str) -> IfParseError {
        IfParseError { pos: self.pos, msg }
    }

    // read up to (not including) `end`, and skip over it.
    fn until(&mut self, end: u8, msg: &'static str) -> Result<String, IfParseError> {
        let start = self.pos;
        match self.s[start..].iter().position(|&c| c == end) {
            Some(n) => {
                self.pos = start + n + 1;
                Ok(String::from_utf8_lossy(&self.s[start..start + n]).into_owned())
            }
            None => {
                self.pos = self.s.len();
                Err(self.err(msg))
            }
        }
    }

    fn at_not(&self) -> bool {
        let rest = &self.s[self.pos..];
        rest.len() > 3
            && rest[..3].eq_ignore_ascii_case(b"not")
            && (rest[3].is_ascii_whitespace() || rest[3] == b'<' || rest[3] == b'[')
    }

    fn list(&mut self) -> Result<Vec<IfCondition>, IfParseError> {
        if self.peek() != Some(b'(') {
            return Err(self.err("expected '('"));
        }
        self.pos += 1;
        let mut conditions = Vec::new();
        loop {
            self.skip_ws();
            let not = self.at_not();
            if not {
                self.pos += 3;
                self.skip_ws();
            }
            let item = match self.peek() {
                Some(b')') if !not => {
                    if conditions.is_empty() {
                        return Err(self.err("empty condition list"));
                    }
                    self.pos += 1;
                    return Ok(conditions);
                }
                Some(b'<') => {
                    self.pos += 1;
                    IfItem::StateToken(self.until(b'>', "unterminated state token")?)
                }
                Some(b'[') => {
                    self.pos += 1;
                    IfItem::ETag(self.until(b']', "unterminated entity tag")?)
                }
                None => return Err(self.err("unclosed list")),
                Some(_) => return Err(self.err("expected state token or entity tag")),
            };
            conditions.push(IfCondition { not, item });
        }
    }
}

impl IfHeader {
    /// Parse the complete header. Nothing is evaluated if any part is malformed.
    pub fn parse(s: &str) -> Result<IfHeader, IfParseError> {
        let mut sc = Scanner {
            s: s.as_bytes(),
            pos: 0,
        };
        let mut lists = Vec::new();
        loop {
            sc.skip_ws();
            let resource_tag = match sc.peek() {
                None => break,
                Some(b'<') => {
                    sc.pos += 1;
                    let tag = sc.until(b'>', "unterminated resource tag")?;
                    sc.skip_ws();
                    Some(tag)
                }
                Some(_) => None,
            };
            let conditions = sc.list()?;
            lists.push(IfList {
                resource_tag,
                conditions,
            });
        }
        if lists.is_empty() {
            return Err(sc.err("empty header"));
        }
        Ok(IfHeader(lists))
    }
}

/// Turn a URL from a `Destination` or `If` header into a path below our prefix.
/// `host` is the `Host` header of the request, if there was one.
pub(crate) fn url_to_path(s: &str, host: Option<&str>, prefix: &str) -> DavResult<DavPath> {
    let path = if s.starts_with('/') {
        s.to_string()
    } else {
        let url = url::Url::parse(s).map_err(|_| DavError::BadRequest(format!("Invalid URL: {}", s)))?;
        if let (Some(want), Some(h)) = (host, url.host_str()) {
            let have = match url.port() {
                Some(p) => format!("{}:{}", h, p),
                None => h.to_string(),
            };
            if !have.eq_ignore_ascii_case(want) {
                return Err(DavError::BadGateway);
            }
        }
        url.path().to_string()
    };
    DavPath::from_str_and_prefix(&path, prefix).map_err(|e| match e {
        ParseError::PrefixMismatch => DavError::BadGateway,
        e => e.into(),
    })
}
