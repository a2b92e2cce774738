//! Utility module to handle the path part of an URL as a resource path.
//!
//! A `DavPath` is the percent-decoded, normalized request path with the
//! mount prefix split off. Collections carry a trailing slash once the
//! handler knows they are collections; lookups in the stores and in the
//! lock table ignore that slash (see [`DavPath::key`]).
use std::error::Error;

use percent_encoding::{percent_decode, percent_encode, AsciiSet, CONTROLS};

use crate::DavError;

// Characters that are escaped in a path segment when the path is turned
// back into an URL.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Path information relative to a prefix.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DavPath {
    fullpath: Vec<u8>,
    pfxlen: usize,
}

/// Error returned by some of the DavPath methods.
#[derive(Debug)]
pub enum ParseError {
    /// cannot parse
    InvalidPath,
    /// outside of prefix
    PrefixMismatch,
    /// too many dotdots
    ForbiddenPath,
}

impl Error for ParseError {}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<ParseError> for DavError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidPath => DavError::InvalidPath,
            ParseError::PrefixMismatch => DavError::NotFound,
            ParseError::ForbiddenPath => DavError::Forbidden("path escapes the root".to_string()),
        }
    }
}

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_url_string())
    }
}

impl std::fmt::Debug for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.as_url_string_with_prefix())
    }
}

// decode and normalize path. returns raw bytes.
fn normalize_path(rp: &[u8]) -> Result<Vec<u8>, ParseError> {
    // must consist of printable ASCII.
    if rp.iter().any(|&x| x < 32 || x > 126) {
        return Err(ParseError::InvalidPath);
    }

    // don't allow fragments. query part gets deleted.
    let mut rawpath = rp;
    if let Some(pos) = rawpath.iter().position(|&x| x == b'?' || x == b'#') {
        if rawpath[pos] == b'#' {
            return Err(ParseError::InvalidPath);
        }
        rawpath = &rawpath[..pos];
    }

    // must start with "/"
    if rawpath.is_empty() || rawpath[0] != b'/' {
        return Err(ParseError::InvalidPath);
    }

    // split up in segments
    let isdir = matches!(rawpath.last(), Some(x) if *x == b'/');
    let segments = rawpath.split(|c| *c == b'/');
    let mut v: Vec<Vec<u8>> = Vec::new();
    for segment in segments {
        match segment {
            b"." | b"" => {}
            b".." => {
                if v.len() < 2 {
                    return Err(ParseError::ForbiddenPath);
                }
                v.pop();
                v.pop();
            }
            s => {
                let s: Vec<u8> = percent_decode(s).collect();
                if s.contains(&b'/') || s.contains(&0) {
                    return Err(ParseError::InvalidPath);
                }
                v.push(b"/".to_vec());
                v.push(s);
            }
        }
    }
    if isdir || v.is_empty() {
        v.push(b"/".to_vec());
    }
    Ok(v.into_iter().flatten().collect())
}

impl DavPath {
    /// from URL encoded string, no prefix.
    pub fn new(src: &str) -> Result<DavPath, ParseError> {
        let path = normalize_path(src.as_bytes())?;
        Ok(DavPath {
            fullpath: path,
            pfxlen: 0,
        })
    }

    /// from URL encoded string, with a prefix that is split off.
    pub fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let path = normalize_path(src.as_bytes())?;
        let mut davpath = DavPath {
            fullpath: path,
            pfxlen: 0,
        };
        davpath.set_prefix(prefix)?;
        Ok(davpath)
    }

    /// from request.uri
    pub(crate) fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> Result<Self, ParseError> {
        match uri.path() {
            "*" => Ok(DavPath {
                fullpath: b"*".to_vec(),
                pfxlen: 0,
            }),
            path if path.starts_with('/') => DavPath::from_str_and_prefix(path, prefix),
            _ => Err(ParseError::InvalidPath),
        }
    }

    // set prefix.
    fn set_prefix(&mut self, prefix: &str) -> Result<(), ParseError> {
        let mut pfx = prefix.trim_end_matches('/').as_bytes();
        if pfx == b"/" {
            pfx = b"";
        }
        if !self.fullpath.starts_with(pfx) {
            return Err(ParseError::PrefixMismatch);
        }
        // the prefix must end at a segment boundary.
        match self.fullpath.get(pfx.len()) {
            None | Some(b'/') => {}
            _ => return Err(ParseError::PrefixMismatch),
        }
        self.pfxlen = pfx.len();
        if self.fullpath.len() == self.pfxlen {
            self.fullpath.push(b'/');
        }
        Ok(())
    }

    /// return the prefix.
    pub fn prefix(&self) -> &str {
        std::str::from_utf8(&self.fullpath[..self.pfxlen]).unwrap_or("")
    }

    /// Is this the '*' path from an `OPTIONS *` request.
    pub(crate) fn is_star(&self) -> bool {
        self.fullpath == b"*"
    }

    /// as raw bytes, not encoded, no prefix.
    pub fn as_bytes(&self) -> &[u8] {
        &self.fullpath[self.pfxlen..]
    }

    /// as URL encoded string, no prefix.
    pub fn as_url_string(&self) -> String {
        encode_path(self.as_bytes())
    }

    /// as URL encoded string, with prefix.
    pub fn as_url_string_with_prefix(&self) -> String {
        encode_path(&self.fullpath)
    }

    /// Key used by stores and the lock table: decoded, no prefix,
    /// no trailing slash (except for the root itself).
    pub fn key(&self) -> String {
        let b = self.as_bytes();
        let b = if b.len() > 1 && b.ends_with(b"/") {
            &b[..b.len() - 1]
        } else {
            b
        };
        String::from_utf8_lossy(b).into_owned()
    }

    /// is this a collection i.e. does the original URL path end in "/".
    pub fn is_collection(&self) -> bool {
        self.fullpath.last() == Some(&b'/')
    }

    /// is this the root of the mount.
    pub fn is_root(&self) -> bool {
        self.as_bytes() == b"/"
    }

    /// add a slash to the end of the path (if not already present).
    pub fn add_slash(&mut self) {
        if !self.is_collection() {
            self.fullpath.push(b'/');
        }
    }

    /// remove a trailing slash (if present, and if not the root).
    pub fn remove_slash(&mut self) {
        if self.as_bytes().len() > 1 && self.is_collection() {
            self.fullpath.pop();
        }
    }

    /// Add a segment to the end of the path.
    pub fn push_segment(&mut self, b: &[u8]) {
        if !self.is_collection() {
            self.fullpath.push(b'/');
        }
        self.fullpath.extend_from_slice(b);
    }

    /// Return the parent directory, with trailing slash.
    pub fn parent(&self) -> DavPath {
        let mut segs = self
            .fullpath
            .split(|&c| c == b'/')
            .filter(|e| !e.is_empty())
            .collect::<Vec<&[u8]>>();
        // don't climb above the prefix.
        let pfxsegs = self.fullpath[..self.pfxlen]
            .split(|&c| c == b'/')
            .filter(|e| !e.is_empty())
            .count();
        if segs.len() > pfxsegs {
            segs.pop();
        }
        let mut p = Vec::new();
        for s in segs {
            p.push(b'/');
            p.extend_from_slice(s);
        }
        p.push(b'/');
        DavPath {
            fullpath: p,
            pfxlen: self.pfxlen,
        }
    }

    /// The filename is the last segment of the path. Can be empty.
    pub fn file_name_bytes(&self) -> &[u8] {
        let segs = self
            .as_bytes()
            .split(|&c| c == b'/')
            .filter(|e| !e.is_empty())
            .collect::<Vec<&[u8]>>();
        match segs.last() {
            Some(s) => s,
            None => b"",
        }
    }

    /// The filename as a string, lossy.
    pub fn file_name(&self) -> String {
        String::from_utf8_lossy(self.file_name_bytes()).into_owned()
    }

    /// Is `self` a strict ancestor of `other` (slashes ignored).
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        let me = self.key();
        let them = other.key();
        if me == them {
            return false;
        }
        if me == "/" {
            return true;
        }
        them.starts_with(&me) && them.as_bytes().get(me.len()) == Some(&b'/')
    }

    /// Same resource, ignoring a trailing slash.
    pub fn same_resource(&self, other: &DavPath) -> bool {
        self.key() == other.key()
    }

    /// All ancestors, nearest first, ending with the root.
    pub fn ancestors(&self) -> Vec<DavPath> {
        let mut v = Vec::new();
        let mut p = self.clone();
        while !p.is_root() {
            p = p.parent();
            v.push(p.clone());
        }
        v
    }
}

fn encode_path(src: &[u8]) -> String {
    percent_encode(src, PATH_ENCODE_SET).to_string()
}
