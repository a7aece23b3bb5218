use std::fmt;

/// One unit of a tokenized path template: a literal fragment or a
/// parameter descriptor. Tokens are ordered and append-only during
/// compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Verbatim text between parameters
    Literal(String),
    /// A capturing parameter
    Param(ParamToken),
}

/// Key of a parameter token: named (`:id`) or positional (anonymous
/// capture groups are numbered in order of appearance).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamKey {
    Name(String),
    Index(usize),
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKey::Name(name) => f.write_str(name),
            ParamKey::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Descriptor for one captured parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamToken {
    /// Parameter key; the params mapping is filled under this key
    pub name: ParamKey,
    /// Literal that introduced the capture (usually `/`)
    pub prefix: String,
    /// Separator between repeated occurrences
    pub delimiter: String,
    /// `?` or `*` suffix: the capture may be absent
    pub optional: bool,
    /// `+` or `*` suffix: the capture may repeat
    pub repeat: bool,
    /// Sub-pattern one occurrence must satisfy
    pub pattern: String,
}
