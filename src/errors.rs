use std::error::Error;
use std::io::{self, ErrorKind};

use http::StatusCode;

use crate::davpath::DavPath;
use crate::store::StoreError;

/// Result type of request handling.
pub type DavResult<T> = Result<T, DavError>;

/// Request-level error. Maps onto a single HTTP status.
#[derive(Debug)]
pub enum DavError {
    // malformed header or body. the message is sent to the client.
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    Conflict(String),
    PreconditionFailed,
    UnsupportedMediaType,
    // well-formed xml, but it makes no sense for this method.
    Unprocessable(String),
    // a LOCK that ran into existing locks. lists the locked paths.
    AlreadyLocked(Vec<DavPath>),
    // resource is locked and no matching token was submitted.
    Locked,
    PropertyNotFound(String),
    FailedDependency,
    // destination on another server.
    BadGateway,
    NotFound,
    MethodNotAllowed,
    PayloadTooLarge,
    UnknownDavMethod,
    InvalidPath,
    XmlReadError,
    XmlWriteError(xml::writer::Error),
    IoError(io::Error),
    StoreError(StoreError),
    // misuse of the response model, a bug in the caller.
    ContractViolation(&'static str),
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::XmlWriteError(e) => Some(e),
            DavError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DavError::BadRequest(msg) => write!(f, "bad request: {}", msg),
            DavError::Unauthorized => write!(f, "unauthorized"),
            DavError::Forbidden(msg) => write!(f, "forbidden: {}", msg),
            DavError::Conflict(msg) => write!(f, "conflict: {}", msg),
            DavError::PreconditionFailed => write!(f, "precondition failed"),
            DavError::UnsupportedMediaType => write!(f, "unsupported media type"),
            DavError::Unprocessable(msg) => write!(f, "unprocessable entity: {}", msg),
            DavError::AlreadyLocked(v) => write!(f, "already locked ({} resources)", v.len()),
            DavError::Locked => write!(f, "resource is locked"),
            DavError::PropertyNotFound(tag) => write!(f, "property not found: {}", tag),
            DavError::FailedDependency => write!(f, "failed dependency"),
            DavError::BadGateway => write!(f, "destination is on another server"),
            DavError::NotFound => write!(f, "not found"),
            DavError::MethodNotAllowed => write!(f, "method not allowed"),
            DavError::PayloadTooLarge => write!(f, "request body too large"),
            DavError::UnknownDavMethod => write!(f, "unknown HTTP method"),
            DavError::InvalidPath => write!(f, "invalid path"),
            DavError::XmlReadError => write!(f, "XML parse error"),
            DavError::XmlWriteError(_) => write!(f, "XML generate error"),
            DavError::IoError(_) => write!(f, "I/O error"),
            DavError::StoreError(e) => write!(f, "storage error: {:?}", e),
            DavError::ContractViolation(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl From<StoreError> for DavError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unauthorized => DavError::Unauthorized,
            e => DavError::StoreError(e),
        }
    }
}

impl From<DavError> for io::Error {
    fn from(e: DavError) -> Self {
        match e {
            DavError::IoError(e) => e,
            DavError::StoreError(e) => e.into(),
            _ => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}

impl From<StoreError> for io::Error {
    fn from(e: StoreError) -> Self {
        io::Error::new(io::ErrorKind::Other, format!("{:?}", e))
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<xml::writer::Error> for DavError {
    fn from(e: xml::writer::Error) -> Self {
        DavError::XmlWriteError(e)
    }
}

impl From<xmltree::ParseError> for DavError {
    fn from(_e: xmltree::ParseError) -> Self {
        DavError::XmlReadError
    }
}

fn storeerror_to_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::Forbidden => StatusCode::FORBIDDEN,
        StoreError::Unauthorized => StatusCode::UNAUTHORIZED,
        StoreError::Conflict => StatusCode::CONFLICT,
        StoreError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        StoreError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        StoreError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ioerror_to_status(ioerror: &io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl DavError {
    pub fn statuscode(&self) -> StatusCode {
        match self {
            DavError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DavError::Unauthorized => StatusCode::UNAUTHORIZED,
            DavError::Forbidden(_) => StatusCode::FORBIDDEN,
            DavError::Conflict(_) => StatusCode::CONFLICT,
            DavError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            DavError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DavError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DavError::AlreadyLocked(_) => StatusCode::LOCKED,
            DavError::Locked => StatusCode::LOCKED,
            DavError::PropertyNotFound(_) => StatusCode::NOT_FOUND,
            DavError::FailedDependency => StatusCode::FAILED_DEPENDENCY,
            DavError::BadGateway => StatusCode::BAD_GATEWAY,
            DavError::NotFound => StatusCode::NOT_FOUND,
            DavError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            DavError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::XmlReadError => StatusCode::BAD_REQUEST,
            DavError::XmlWriteError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::IoError(e) => ioerror_to_status(e),
            DavError::StoreError(e) => storeerror_to_status(e),
            DavError::ContractViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn must_close(&self) -> bool {
        !matches!(
            self,
            &DavError::BadRequest(_)
                | &DavError::Unauthorized
                | &DavError::Forbidden(_)
                | &DavError::Conflict(_)
                | &DavError::PreconditionFailed
                | &DavError::UnsupportedMediaType
                | &DavError::Unprocessable(_)
                | &DavError::AlreadyLocked(_)
                | &DavError::Locked
                | &DavError::PropertyNotFound(_)
                | &DavError::FailedDependency
                | &DavError::BadGateway
                | &DavError::NotFound
                | &DavError::MethodNotAllowed
                | &DavError::UnknownDavMethod
                | &DavError::StoreError(_)
        )
    }

    /// Text sent back to the client, if any.
    pub fn message(&self) -> Option<String> {
        match self {
            DavError::BadRequest(msg)
            | DavError::Forbidden(msg)
            | DavError::Conflict(msg)
            | DavError::Unprocessable(msg) => Some(msg.clone()),
            DavError::PropertyNotFound(tag) => Some(format!("Property not found: {}", tag)),
            DavError::XmlReadError => Some("Request body is not well-formed XML".to_string()),
            DavError::BadGateway => {
                Some("Destination is not located on this server".to_string())
            }
            _ => None,
        }
    }
}
