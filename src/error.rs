use thiserror::Error;

/// Reasons a candidate query is rejected.
///
/// The taxonomy is closed: every rejection maps to exactly one of these
/// variants, so callers can branch on [`GuardError::code`] without parsing
/// display messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("empty SQL is not allowed")]
    EmptyInput,

    #[error("multiple statements are not allowed (a single trailing ';' is tolerated)")]
    MultiStatement,

    #[error("only SELECT statements are allowed")]
    NotASelect,

    #[error("JOIN is not allowed (use a predefined view instead)")]
    JoinNotAllowed,

    #[error("blocked keyword detected: {keyword}")]
    BlockedKeyword { keyword: String },

    #[error("a FROM clause is required")]
    MissingSource,

    #[error("access to table '{table}' is not allowed")]
    TableNotAllowed { table: String },

    #[error("too many unknown column tokens: {tokens:?}")]
    TooManyUnknownColumns { tokens: Vec<String> },
}

impl GuardError {
    /// Stable machine-readable reason code (the variant name).
    pub fn code(&self) -> &'static str {
        match self {
            GuardError::EmptyInput => "EmptyInput",
            GuardError::MultiStatement => "MultiStatement",
            GuardError::NotASelect => "NotASelect",
            GuardError::JoinNotAllowed => "JoinNotAllowed",
            GuardError::BlockedKeyword { .. } => "BlockedKeyword",
            GuardError::MissingSource => "MissingSource",
            GuardError::TableNotAllowed { .. } => "TableNotAllowed",
            GuardError::TooManyUnknownColumns { .. } => "TooManyUnknownColumns",
        }
    }
}

/// Failures while loading or compiling a policy.
///
/// These happen at startup, not per query, so they are kept out of the
/// closed [`GuardError`] taxonomy.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse policy JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid block pattern '{pattern}': {source}")]
    BadBlockPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Failures from the text-to-SQL generator client.
#[derive(Error, Debug)]
pub enum Text2SqlError {
    #[error("OPENAI_API_KEY is not set (check your .env)")]
    MissingApiKey,

    #[error("LLM API call failed: {0}")]
    Http(String),

    #[error("unexpected LLM response: {0}")]
    BadResponse(String),
}

pub type Result<T> = std::result::Result<T, GuardError>;
