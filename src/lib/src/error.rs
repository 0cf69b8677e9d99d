use crate::verifier::VerificationFailure;

/// The depverify error type.
#[derive(Debug, thiserror::Error)]
pub enum DVError {
    #[error("Internal error: [{0}]")]
    InternalError(String),

    #[error("Parse error")]
    ParseError,

    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("UTF-8 error")]
    UTF8Error(#[from] std::str::Utf8Error),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Malformed OpenPGP packet: {0}")]
    MalformedPacket(String),

    #[error("Malformed verification metadata: {0}")]
    PolicyParseError(String),

    #[error("Keyring error: {0}")]
    KeyringError(String),

    #[error("Key server error: {0}")]
    KeyServerError(String),

    #[error("Usage error: {0}")]
    UsageError(&'static str),

    #[error("Invalid argument")]
    InvalidArgument,

    #[error("Verification cancelled")]
    Cancelled,

    #[error("{0}")]
    VerificationFailed(VerificationFailure),
}

impl From<quick_xml::Error> for DVError {
    fn from(e: quick_xml::Error) -> Self {
        DVError::PolicyParseError(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for DVError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        DVError::PolicyParseError(e.to_string())
    }
}
