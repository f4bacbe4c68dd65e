use crate::transport::PeerId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of package at byte {position}")]
    UnexpectedEof { position: usize },
    #[error("invalid utf-8 in string at byte {position}")]
    InvalidUtf8 { position: usize },
    #[error("negative length {length} at byte {position}")]
    NegativeLength { length: i32, position: usize },
    #[error("got unexpected type {received} for field {field}, expecting {expected}")]
    TypeMismatch {
        expected: String,
        received: String,
        field: String,
    },
    #[error("unknown type name {0}")]
    UnknownType(String),
    #[error("value does not match declared type {expected}")]
    ValueShape { expected: String },
}

impl CodecError {
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, CodecError::TypeMismatch { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("deflate failed: {0}")]
    Deflate(std::io::Error),
    #[error("inflate failed: {0}")]
    Inflate(std::io::Error),
    #[error("decompressed size exceeded limit of {limit} bytes")]
    SizeExceeded { limit: usize },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("config entry {section}.{key} is already registered")]
    DuplicateEntry { section: String, key: String },
    #[error("cannot have multiple settings with the same name or with a reserved name ({0})")]
    DuplicateCustomValue(String),
    #[error("cannot initialize locking config entry twice")]
    LockingEntryAlreadySet,
    #[error("value for {name} does not match declared type {expected}")]
    WrongType { name: String, expected: String },
    #[error("unknown config entry id {0}")]
    UnknownEntry(usize),
}

/// Per-package failures. None of these escape the engine as process errors;
/// they are reported in [`crate::ApplyOutcome`] and logged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("type mismatch for {key} in section {section}: {reason}")]
    TypeMismatch {
        section: String,
        key: String,
        reason: String,
    },
    #[error("malformed package: {0}")]
    MalformedPackage(String),
    #[error("sender {0} is not allowed to push config while locked")]
    UnauthorizedSender(PeerId),
    #[error("peer {0} send queue did not drain in time")]
    PeerTimeout(PeerId),
    #[error("received unknown config entry {key} in section {section}")]
    UnknownEntry { section: String, key: String },
}

impl From<CodecError> for SyncError {
    fn from(error: CodecError) -> Self {
        SyncError::MalformedPackage(error.to_string())
    }
}

impl From<CompressionError> for SyncError {
    fn from(error: CompressionError) -> Self {
        SyncError::MalformedPackage(error.to_string())
    }
}
