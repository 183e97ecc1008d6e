//! Operation result structures and helpers.
//!
//! Most LDAP operations return a [`LdapResult`](struct.LdapResult.html). This module
//! contains its definition, as well as that of a number of wrapper structs and
//! helper methods, which adapt LDAP result and error handling to be a closer
//! match to Rust conventions.

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::controls::Control;
use crate::exop::Exop;
use crate::search::ResultEntry;
use crate::RequestId;

/// Type alias for the result of LDAP operations.
pub type Result<T> = std::result::Result<T, LdapError>;

/// Error variants recognized by the connection machinery.
///
/// A connection-fatal variant is distributed to every operation pending on
/// the connection at the time of failure, hence the `Clone` bound and the
/// `Arc`-wrapped sources.
#[derive(Clone, Debug, Error)]
pub enum LdapError {
    /// Transport failure.
    #[error("I/O error: {source}")]
    Io { source: Arc<io::Error> },

    /// The server side closed the byte stream.
    #[error("end of LDAP stream")]
    EndOfStream,

    /// Structurally invalid BER data. Fatal: the stream can't be
    /// resynchronized past it.
    #[error("malformed BER encoding: {reason}")]
    MalformedBer { reason: &'static str },

    /// A complete TLV which doesn't form an LDAPMessage. Also fatal.
    #[error("malformed PDU: {reason}")]
    MalformedPdu { reason: &'static str },

    /// A response with a message ID that no pending operation claims.
    #[error("unsolicited response, msgid {id}")]
    UnsolicitedResponse { id: RequestId },

    /// The operation was submitted after the connection was closed, or the
    /// connection went away underneath it.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server answered a single-response operation with a result code
    /// other than success/compareFalse/compareTrue.
    #[error("operation failed: {result}")]
    OperationFailed { result: LdapResult },

    /// A local Abandon resolved the operation.
    #[error("operation abandoned, msgid {id}")]
    Abandoned { id: RequestId },

    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: &'static str },

    /// The per-operation deadline expired before the terminating response.
    #[error("operation timed out")]
    Timeout,

    /// Empty value set passed to an Add operation or modification.
    #[error("empty value set for Add")]
    AddNoValues,

    #[error("cannot parse LDAP URL: {source}")]
    UrlParsing {
        #[from]
        source: url::ParseError,
    },

    #[error("unknown LDAP URL scheme: {0}")]
    UnknownScheme(String),

    #[cfg(feature = "tls")]
    #[error("TLS error: {source}")]
    NativeTLS { source: Arc<native_tls::Error> },
}

impl From<io::Error> for LdapError {
    fn from(source: io::Error) -> Self {
        LdapError::Io {
            source: Arc::new(source),
        }
    }
}

#[cfg(feature = "tls")]
impl From<native_tls::Error> for LdapError {
    fn from(source: native_tls::Error) -> Self {
        LdapError::NativeTLS {
            source: Arc::new(source),
        }
    }
}

impl From<tokio::time::error::Elapsed> for LdapError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        LdapError::Timeout
    }
}

/// Common components of an LDAP operation result.
///
/// This structure faithfully replicates the components dictated by the
/// standard, and is distinctly C-like with its reliance on numeric codes
/// for the indication of outcome. The driver resolves single-response
/// operations with non-success codes into [`LdapError::OperationFailed`],
/// but the Search result attached to a finished stream is reported as-is;
/// the helper methods [`success()`](#method.success) and
/// [`non_error()`](#method.non_error) cover that case.
#[derive(Clone, Debug)]
pub struct LdapResult {
    /// Result code.
    ///
    /// Generally, the value of zero indicates successful completion, but there's
    /// a number of other non-error codes arising as a result of various operations.
    /// See [Section A.1 of RFC 4511](https://tools.ietf.org/html/rfc4511#appendix-A.1).
    pub rc: u32,
    /// Matched component DN, where applicable.
    pub matched: String,
    /// Additional diagnostic text.
    pub text: String,
    /// Referrals.
    pub refs: Vec<String>,
    /// Response controls.
    ///
    /// Missing and empty controls are both represented by an empty vector.
    pub ctrls: Vec<Control>,
}

impl LdapResult {
    fn description(&self) -> &'static str {
        match self.rc {
            0 => "success",
            1 => "operationsError",
            2 => "protocolError",
            3 => "timeLimitExceeded",
            4 => "sizeLimitExceeded",
            5 => "compareFalse",
            6 => "compareTrue",
            7 => "authMethodNotSupported",
            8 => "strongerAuthRequired",
            10 => "referral",
            11 => "adminLimitExceeded",
            12 => "unavailableCriticalExtension",
            13 => "confidentialityRequired",
            14 => "saslBindInProgress",
            16 => "noSuchAttribute",
            17 => "undefinedAttributeType",
            18 => "inappropriateMatching",
            19 => "constraintViolation",
            20 => "attributeOrValueExists",
            21 => "invalidAttributeSyntax",
            32 => "noSuchObject",
            33 => "aliasProblem",
            34 => "invalidDNSyntax",
            36 => "aliasDereferencingProblem",
            48 => "inappropriateAuthentication",
            49 => "invalidCredentials",
            50 => "insufficientAccessRights",
            51 => "busy",
            52 => "unavailable",
            53 => "unwillingToPerform",
            54 => "loopDetect",
            64 => "namingViolation",
            65 => "objectClassViolation",
            66 => "notAllowedOnNonLeaf",
            67 => "notAllowedOnRDN",
            68 => "entryAlreadyExists",
            69 => "objectClassModsProhibited",
            71 => "affectsMultipleDSAs",
            80 => "other",
            88 => "abandoned",
            _ => "unknown",
        }
    }

    /// If the result code is zero, return the instance itself wrapped
    /// in `Ok()`, otherwise wrap the instance in an `OperationFailed` error.
    pub fn success(self) -> Result<Self> {
        if self.rc == 0 {
            Ok(self)
        } else {
            Err(LdapError::OperationFailed { result: self })
        }
    }

    /// If the result code is 0 or 10 (referral), return the instance
    /// itself wrapped in `Ok()`, otherwise wrap the instance in an
    /// `OperationFailed` error.
    pub fn non_error(self) -> Result<Self> {
        if self.rc == 0 || self.rc == 10 {
            Ok(self)
        } else {
            Err(LdapError::OperationFailed { result: self })
        }
    }
}

impl fmt::Display for LdapResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::result::Result<(), fmt::Error> {
        write!(
            f,
            "rc={} ({}), dn: \"{}\", text: \"{}\"",
            self.rc,
            self.description(),
            self.matched,
            self.text
        )
    }
}

/// Wrapper for results of a Search operation which returns all entries at once.
///
/// The wrapper exists so that methods [`success()`](#method.success) and
/// [`non_error()`](#method.non_error) can be called on an instance. Those methods
/// destructure the wrapper and return its components as elements of an anonymous
/// tuple.
#[derive(Clone, Debug)]
pub struct SearchResult(pub Vec<ResultEntry>, pub LdapResult);

impl SearchResult {
    /// If the result code is zero, return an anonymous tuple of component structs
    /// wrapped in `Ok()`, otherwise wrap the `LdapResult` part in an error.
    pub fn success(self) -> Result<(Vec<ResultEntry>, LdapResult)> {
        let result = self.1.success()?;
        Ok((self.0, result))
    }

    /// If the result code is 0 or 10 (referral), return an anonymous tuple of
    /// component structs wrapped in `Ok()`, otherwise wrap the `LdapResult`
    /// part in an error.
    pub fn non_error(self) -> Result<(Vec<ResultEntry>, LdapResult)> {
        let result = self.1.non_error()?;
        Ok((self.0, result))
    }
}

/// Wrapper for the result of a Compare operation.
///
/// Compare uniquely has two non-zero return codes to indicate the outcome of a
/// successful comparison, while other return codes indicate errors, as usual
/// (except 10 for referral). The [`equal()`](#method.equal) method optimizes
/// for the expected case of ignoring referrals; [`non_error()`](#method.non_error)
/// can be used when that's not possible.
#[derive(Clone, Debug)]
pub struct CompareResult(pub LdapResult);

impl CompareResult {
    /// If the result code is 5 (compareFalse) or 6 (compareTrue), return the
    /// corresponding boolean value wrapped in `Ok()`, otherwise wrap the
    /// `LdapResult` part in an error.
    pub fn equal(self) -> Result<bool> {
        match self.0.rc {
            5 => Ok(false),
            6 => Ok(true),
            _ => Err(LdapError::OperationFailed { result: self.0 }),
        }
    }

    /// If the result code is 5 (compareFalse), 6 (compareTrue), or 10 (referral),
    /// return the inner `LdapResult`, otherwise rewrap it in an error.
    pub fn non_error(self) -> Result<LdapResult> {
        if self.0.rc == 5 || self.0.rc == 6 || self.0.rc == 10 {
            Ok(self.0)
        } else {
            Err(LdapError::OperationFailed { result: self.0 })
        }
    }
}

/// Wrapper for the result of an Extended operation.
#[derive(Clone, Debug)]
pub struct ExopResult(pub Exop, pub LdapResult);

impl ExopResult {
    /// If the result code is zero, return an anonymous tuple of component structs
    /// wrapped in `Ok()`, otherwise wrap the `LdapResult` part in an error.
    pub fn success(self) -> Result<(Exop, LdapResult)> {
        let result = self.1.success()?;
        Ok((self.0, result))
    }
}
