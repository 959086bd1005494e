//! Bluescan errors

use num_enum::TryFromPrimitive;

/// The error type for GATT session operations
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    message: String,
}

impl Error {
    pub(crate) fn new(
        kind: ErrorKind,
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
        message: impl Into<String>,
    ) -> Self {
        Error {
            kind,
            source,
            message: message.into(),
        }
    }

    /// Creates an error with the given `kind` and `message`.
    ///
    /// Intended for [`Transport`][crate::Transport] implementations reporting a refused request.
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error::new(kind, None, message)
    }

    /// Creates an error of `kind` wrapping a platform-specific `source` error.
    pub fn with_source(kind: ErrorKind, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::new(kind, Some(Box::new(source)), String::new())
    }

    /// Returns the corresponding [ErrorKind] for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message for this error.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.message.is_empty(), &self.source) {
            (true, None) => write!(f, "{}", &self.kind),
            (false, None) => write!(f, "{}: {}", &self.kind, &self.message),
            (true, Some(err)) => write!(f, "{}: {}", &self.kind, err),
            (false, Some(err)) => write!(f, "{}: {} ({})", &self.kind, &self.message, err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|x| {
            let x: &(dyn std::error::Error + 'static) = &**x;
            x
        })
    }
}

/// A list of general categories of session error.
///
/// Every operation started through a [`Session`][crate::Session] ends in exactly one of these (or success).
#[non_exhaustive]
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// the session is not ready for characteristic operations
    NotReady,
    /// the characteristic does not support the requested operation
    UnsupportedOperation,
    /// transport failure: {0}
    Transport(AttError),
    /// timed out
    Timeout,
    /// cancelled by session teardown
    Cancelled,
    /// malformed input
    MalformedInput,
    /// the session is already bound to a different peripheral
    AlreadyConnectedElsewhere,
    /// connection failed
    ConnectionFailed,
    /// the peripheral isn't connected
    NotConnected,
    /// an internal error has occured
    Internal,
    /// error
    Other,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            kind,
            source: None,
            message: String::new(),
        }
    }
}

impl From<AttError> for Error {
    fn from(err: AttError) -> Self {
        ErrorKind::Transport(err).into()
    }
}

/// Status codes defined by the Attribute Protocol (Core Specification Vol 3, Part F, 3.4.1.1).
///
/// `0xfc..=0xff` are the common profile codes from the Core Specification Supplement.
#[repr(u8)]
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive)]
pub enum AttErrorCode {
    /// success
    Success = 0x00,
    /// invalid attribute handle
    InvalidHandle = 0x01,
    /// read not permitted
    ReadNotPermitted = 0x02,
    /// write not permitted
    WriteNotPermitted = 0x03,
    /// invalid PDU
    InvalidPdu = 0x04,
    /// insufficient authentication
    InsufficientAuthentication = 0x05,
    /// request not supported by the server
    RequestNotSupported = 0x06,
    /// offset past the end of the value
    InvalidOffset = 0x07,
    /// insufficient authorization
    InsufficientAuthorization = 0x08,
    /// prepare queue full
    PrepareQueueFull = 0x09,
    /// attribute not found
    AttributeNotFound = 0x0a,
    /// attribute is not long
    AttributeNotLong = 0x0b,
    /// encryption key size too small
    InsufficientEncryptionKeySize = 0x0c,
    /// invalid value length
    InvalidAttributeValueLength = 0x0d,
    /// unlikely error
    UnlikelyError = 0x0e,
    /// insufficient encryption
    InsufficientEncryption = 0x0f,
    /// unsupported group type
    UnsupportedGroupType = 0x10,
    /// insufficient resources
    InsufficientResources = 0x11,
    /// database out of sync
    DatabaseOutOfSync = 0x12,
    /// value not allowed
    ValueNotAllowed = 0x13,
    /// write request rejected
    WriteRequestRejected = 0xfc,
    /// client characteristic configuration descriptor improperly configured
    CccdImproperlyConfigured = 0xfd,
    /// procedure already in progress
    ProcedureAlreadyInProgress = 0xfe,
    /// value out of range
    OutOfRange = 0xff,
}

/// A failed status reported by the transport, classified by range.
///
/// Platform stacks report vendor codes (e.g. Android's `GATT_ERROR`, 133) in the application range; the raw
/// value is always recoverable through [`AttError::code`].
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttError {
    /// {0}
    Known(AttErrorCode),
    /// application specific error: {0}
    Application(u8),
    /// unknown error: {0}
    Reserved(u8),
}

impl AttError {
    /// The raw status code as reported by the transport.
    pub fn code(self) -> u8 {
        match self {
            AttError::Known(code) => code as u8,
            AttError::Application(code) | AttError::Reserved(code) => code,
        }
    }
}

impl From<u8> for AttError {
    fn from(number: u8) -> Self {
        match AttErrorCode::try_from(number) {
            Ok(code) => AttError::Known(code),
            Err(_) => {
                if (0x80..0xa0).contains(&number) {
                    AttError::Application(number)
                } else {
                    AttError::Reserved(number)
                }
            }
        }
    }
}

/// Converts a transport status code into a result; `0` is success.
///
/// Codes that do not fit in an octet are reported as [`AttErrorCode::UnlikelyError`].
pub(crate) fn status_check(status: i32) -> Result<(), AttError> {
    if status == AttErrorCode::Success as i32 {
        Ok(())
    } else if let Ok(status) = u8::try_from(status) {
        Err(AttError::from(status))
    } else {
        Err(AttError::Known(AttErrorCode::UnlikelyError))
    }
}
