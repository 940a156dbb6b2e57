use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },
    #[error("request to {address} timed out")]
    Timeout { address: String },
    #[error("controller answered with HTTP {0}")]
    Status(u16),
    #[error("malformed controller response: {0}")]
    MalformedBody(String),
    #[error("controller did not acknowledge the command: {0}")]
    Rejected(String),
    #[error("zone {0} missing from controller status")]
    ZoneMissing(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("color value {value} at position {position} is outside 0-255")]
    ColorOutOfRange { position: usize, value: String },
    #[error("{triplets} color triplets declared but {values} values supplied")]
    TripletMismatch { triplets: usize, values: usize },
    #[error("zone {0} is outside 1-6")]
    ZoneOutOfRange(u8),
    #[error("num_zones must be 1, got {0}")]
    ZoneCountNotOne(u8),
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),
    #[error("direction must be F or R, got '{0}'")]
    InvalidDirection(String),
    #[error("parameter '{name}' is not a number: '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("all {0} pattern slots are in use")]
    Capacity(usize),
    #[error("pattern name '{0}' is already used by another pattern")]
    NameTaken(String),
    #[error("no pattern named '{0}'")]
    NotFound(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("no controller address configured; run discovery or set one")]
    NoController,
    #[error("no stored patterns to turn on")]
    NoPatterns,
    #[error("{0} already in progress")]
    Busy(&'static str),
}
