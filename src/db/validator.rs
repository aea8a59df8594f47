//! SQL statement validation.
//!
//! Every statement is screened here before it reaches a connection. The
//! statement is tokenized with [sqlparser](https://docs.rs/sqlparser/) so that
//! keyword detection works on whole tokens: string literals, quoted
//! identifiers and comments never contribute keywords, and an identifier such
//! as `dropped_at` never matches the keyword `DROP`.
//!
//! Validation is a pure function of the SQL text, the [`SecurityConfig`] the
//! validator was built from and the requested [`ValidationMode`].

use crate::config::SecurityConfig;
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::collections::BTreeSet;

/// Leading verb of a SQL statement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Verb {
    Select,
    Insert,
    Update,
    Delete,
    With,
    Explain,
    Show,
    Describe,
    Pragma,
    Values,
    Create,
    Drop,
    Alter,
    Truncate,
    Merge,
    Replace,
    Grant,
    Revoke,
    Call,
    Begin,
    Commit,
    Rollback,
    Set,
    Use,
    /// Any other leading word, upper-cased
    Other(String),
}

impl Verb {
    /// Parse a verb from a leading word (case-insensitive).
    pub fn parse(word: &str) -> Self {
        match word.to_ascii_uppercase().as_str() {
            "SELECT" => Self::Select,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "WITH" => Self::With,
            "EXPLAIN" => Self::Explain,
            "SHOW" => Self::Show,
            "DESCRIBE" | "DESC" => Self::Describe,
            "PRAGMA" => Self::Pragma,
            "VALUES" => Self::Values,
            "CREATE" => Self::Create,
            "DROP" => Self::Drop,
            "ALTER" => Self::Alter,
            "TRUNCATE" => Self::Truncate,
            "MERGE" => Self::Merge,
            "REPLACE" => Self::Replace,
            "GRANT" => Self::Grant,
            "REVOKE" => Self::Revoke,
            "CALL" => Self::Call,
            "BEGIN" | "START" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ROLLBACK" => Self::Rollback,
            "SET" => Self::Set,
            "USE" => Self::Use,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::With => "WITH",
            Self::Explain => "EXPLAIN",
            Self::Show => "SHOW",
            Self::Describe => "DESCRIBE",
            Self::Pragma => "PRAGMA",
            Self::Values => "VALUES",
            Self::Create => "CREATE",
            Self::Drop => "DROP",
            Self::Alter => "ALTER",
            Self::Truncate => "TRUNCATE",
            Self::Merge => "MERGE",
            Self::Replace => "REPLACE",
            Self::Grant => "GRANT",
            Self::Revoke => "REVOKE",
            Self::Call => "CALL",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
            Self::Set => "SET",
            Self::Use => "USE",
            Self::Other(word) => word,
        }
    }

    /// Verbs admitted in read-only mode.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Select | Self::With | Self::Explain)
    }

    /// Verbs whose statements produce a result set.
    pub fn returns_rows(&self) -> bool {
        matches!(
            self,
            Self::Select
                | Self::With
                | Self::Explain
                | Self::Show
                | Self::Describe
                | Self::Pragma
                | Self::Values
        )
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Verb {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<&str> for Verb {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<Verb> for String {
    fn from(v: Verb) -> Self {
        v.as_str().to_string()
    }
}

impl std::str::FromStr for Verb {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s.trim()))
    }
}

/// An unquoted word token, upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Keyword(String);

impl Keyword {
    pub fn new(word: impl AsRef<str>) -> Self {
        Self(word.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Keyword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Keyword {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Keyword {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<Keyword> for String {
    fn from(k: Keyword) -> Self {
        k.0
    }
}

/// The rule a statement violated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationRule {
    Empty,
    TooLong { limit: usize, actual: usize },
    Unparseable(String),
    MultipleStatements,
    MissingVerb,
    OperationNotAllowed(Verb),
    ReadOnlyViolation(Verb),
    BlockedKeyword(Keyword),
    InvalidIdentifier(String),
}

impl std::fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "SQL statement is empty"),
            Self::TooLong { limit, actual } => write!(
                f,
                "SQL statement is {actual} characters, exceeding the limit of {limit}"
            ),
            Self::Unparseable(reason) => write!(f, "SQL statement could not be tokenized: {reason}"),
            Self::MultipleStatements => write!(f, "Multiple statements are not allowed"),
            Self::MissingVerb => write!(f, "SQL statement has no leading verb"),
            Self::OperationNotAllowed(verb) => write!(f, "Operation {verb} is not allowed"),
            Self::ReadOnlyViolation(verb) => {
                write!(f, "Read-only mode: {verb} statement may modify data")
            }
            Self::BlockedKeyword(kw) => write!(f, "Blocked keyword: {kw}"),
            Self::InvalidIdentifier(name) => write!(f, "Invalid identifier: '{name}'"),
        }
    }
}

/// Whether writes are acceptable for this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl ValidationMode {
    /// Read-only if any of the given flags is set.
    pub fn from_read_only(read_only: bool) -> Self {
        if read_only {
            Self::ReadOnly
        } else {
            Self::ReadWrite
        }
    }
}

/// A statement that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedStatement {
    pub verb: Verb,
    /// All unquoted word tokens, upper-cased
    pub keywords: BTreeSet<Keyword>,
    /// Length in characters
    pub length: usize,
}

impl ValidatedStatement {
    pub fn has_keyword(&self, word: &str) -> bool {
        self.keywords.contains(&Keyword::new(word))
    }

    /// Whether running the statement can change data, including writes led
    /// by a read verb: data-modifying CTEs and `SELECT ... INTO`.
    pub fn modifies_data(&self) -> bool {
        check_read_only(&self.verb, &self.keywords).is_err()
    }
}

/// Keywords that make a WITH/EXPLAIN statement a write.
const DATA_MODIFYING: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "TRUNCATE", "DROP", "CREATE", "ALTER",
];

/// Screens SQL text against a [`SecurityConfig`].
#[derive(Debug, Clone)]
pub struct QueryValidator {
    allowed: BTreeSet<Verb>,
    blocked: BTreeSet<Keyword>,
    max_length: usize,
    read_only: bool,
}

impl QueryValidator {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            allowed: config.allowed_operations.clone(),
            blocked: config.blocked_keywords.clone(),
            max_length: config.max_query_length,
            read_only: config.read_only,
        }
    }

    /// Validate a statement.
    ///
    /// The effective mode is read-only if either the configuration or `mode`
    /// asks for it. Rules are checked in a fixed order and the first violation
    /// is returned.
    pub fn validate(&self, sql: &str, mode: ValidationMode) -> DbResult<ValidatedStatement> {
        self.check(sql, mode).map_err(DbError::security)
    }

    fn check(&self, sql: &str, mode: ValidationMode) -> Result<ValidatedStatement, ValidationRule> {
        if sql.trim().is_empty() {
            return Err(ValidationRule::Empty);
        }

        let length = sql.chars().count();
        if length > self.max_length {
            return Err(ValidationRule::TooLong {
                limit: self.max_length,
                actual: length,
            });
        }

        let scanned = scan(sql)?;
        let verb = scanned.verb.ok_or(ValidationRule::MissingVerb)?;

        if !self.allowed.contains(&verb) {
            return Err(ValidationRule::OperationNotAllowed(verb));
        }

        if self.read_only || mode == ValidationMode::ReadOnly {
            check_read_only(&verb, &scanned.keywords)?;
        }

        if let Some(kw) = scanned.keywords.iter().find(|kw| self.blocked.contains(*kw)) {
            return Err(ValidationRule::BlockedKeyword(kw.clone()));
        }

        Ok(ValidatedStatement {
            verb,
            keywords: scanned.keywords,
            length,
        })
    }
}

fn check_read_only(verb: &Verb, keywords: &BTreeSet<Keyword>) -> Result<(), ValidationRule> {
    if !verb.is_read_only() {
        return Err(ValidationRule::ReadOnlyViolation(verb.clone()));
    }
    let modifies = match verb {
        Verb::With | Verb::Explain => DATA_MODIFYING
            .iter()
            .any(|w| keywords.contains(&Keyword::new(w))),
        // SELECT ... INTO creates a table (PostgreSQL) or writes a file (MySQL)
        Verb::Select => keywords.contains(&Keyword::new("INTO")),
        _ => false,
    };
    if modifies {
        return Err(ValidationRule::ReadOnlyViolation(verb.clone()));
    }
    Ok(())
}

struct Scanned {
    verb: Option<Verb>,
    keywords: BTreeSet<Keyword>,
}

/// Tokenize and collect the leading verb plus every unquoted word.
fn scan(sql: &str) -> Result<Scanned, ValidationRule> {
    let tokens = Tokenizer::new(&GenericDialect {}, sql)
        .tokenize()
        .map_err(|e| ValidationRule::Unparseable(e.to_string()))?;

    let mut verb = None;
    let mut started = false;
    let mut keywords = BTreeSet::new();
    let mut terminated = false;

    for token in &tokens {
        match token {
            Token::Whitespace(_) => continue,
            Token::SemiColon => {
                terminated = true;
                continue;
            }
            // Anything after a terminator is a second statement
            _ if terminated => return Err(ValidationRule::MultipleStatements),
            // "(SELECT 1)" leads with a parenthesis
            Token::LParen if !started => continue,
            Token::Word(word) if word.quote_style.is_none() => {
                if !started {
                    verb = Some(Verb::parse(&word.value));
                }
                keywords.insert(Keyword::new(&word.value));
            }
            _ => {}
        }
        started = true;
    }

    Ok(Scanned { verb, keywords })
}

/// Check whether a statement only reads data.
///
/// True for SELECT/WITH/EXPLAIN statements that carry no data-modifying
/// keyword. Unparseable SQL is never considered read-only.
pub fn is_read_only_query(sql: &str) -> bool {
    match scan(sql) {
        Ok(Scanned {
            verb: Some(verb),
            keywords,
        }) => check_read_only(&verb, &keywords).is_ok(),
        _ => false,
    }
}

/// Maximum identifier length accepted for catalog lookups.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a table or schema name before it is used in catalog SQL.
///
/// Accepts `[A-Za-z_][A-Za-z0-9_$]*`, at most 63 characters.
pub fn validate_identifier(name: &str) -> DbResult<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');

    if valid_start && valid_rest && name.len() <= MAX_IDENTIFIER_LEN {
        Ok(())
    } else {
        Err(DbError::security(ValidationRule::InvalidIdentifier(
            name.to_string(),
        )))
    }
}
