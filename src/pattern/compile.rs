use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::debug;

use super::token::{ParamKey, ParamToken, Token};
use crate::error::RouterError;

/// Grammar for one template token. Alternatives, in order: an escaped
/// literal character, then a parameter form (optional `/` or `.`
/// prefix followed by a named capture with an optional inline pattern,
/// an anonymous capture group, or a bare `*`) with an optional `? + *`
/// suffix on the capture.
static TOKEN_GRAMMAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(\\.)",
        r"|([/.])?(?:(?::(\w+)(?:\(((?:\\.|[^()])+)\))?|\(((?:\\.|[^()])+)\))([+*?])?|(\*))"
    ))
    .expect("token grammar regex is valid")
});

/// Matching options for [`compile`].
#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    /// Case-sensitive matching (default false)
    pub sensitive: bool,
    /// Strict trailing-slash handling; when false a single trailing
    /// slash is optional and ignored (default false)
    pub strict: bool,
    /// Whether the match must consume the whole input; when false the
    /// matcher stops at a segment boundary so prefix routes compose
    /// (default true)
    pub end: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        MatchOptions {
            sensitive: false,
            strict: false,
            end: true,
        }
    }
}

/// Closed set of inputs the compiler accepts.
#[derive(Debug, Clone)]
pub enum PathSpec {
    /// A string template such as `/user/:id`
    Literal(String),
    /// A pre-built regex; anonymous capturing groups become positional keys
    Compiled(Regex),
    /// Several templates unioned with alternation
    Alternatives(Vec<String>),
}

impl From<&str> for PathSpec {
    fn from(template: &str) -> Self {
        PathSpec::Literal(template.to_string())
    }
}

/// A compiled path pattern: the matcher plus the ordered parameter
/// keys. Immutable once built.
///
/// Invariant: `keys.len()` equals the matcher's capturing-group count,
/// in order, so capture `i + 1` always belongs to `keys[i]`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    /// Compiled matcher
    pub regex: Regex,
    /// Parameter descriptors, one per capture group
    pub keys: Vec<ParamToken>,
}

/// Compile a path spec into a [`PathPattern`].
///
/// # Arguments
///
/// * `spec` - Template string, pre-built regex, or template alternatives
/// * `options` - Case/strictness/anchoring flags
///
/// # Errors
///
/// Returns [`RouterError::Pattern`] when the generated matcher fails to
/// compile (malformed inline pattern, unbalanced custom group).
pub fn compile(spec: &PathSpec, options: &MatchOptions) -> Result<PathPattern, RouterError> {
    match spec {
        PathSpec::Literal(template) => {
            let tokens = tokenize(template);
            let source = tokens_to_source(&tokens, options);
            let keys = param_tokens(tokens);
            let regex = build_regex(&source, template, options)?;
            debug_assert_eq!(keys.len(), regex.captures_len() - 1);
            debug!(template = %template, pattern = %source, keys = keys.len(), "template compiled");
            Ok(PathPattern { regex, keys })
        }
        PathSpec::Compiled(regex) => {
            // Anonymous capturing groups become positional keys so the
            // group/key invariant holds for caller-supplied matchers too.
            let keys = (0..regex.captures_len().saturating_sub(1))
                .map(|i| ParamToken {
                    name: ParamKey::Index(i),
                    prefix: String::new(),
                    delimiter: String::new(),
                    optional: false,
                    repeat: false,
                    pattern: String::new(),
                })
                .collect();
            Ok(PathPattern {
                regex: regex.clone(),
                keys,
            })
        }
        PathSpec::Alternatives(templates) => {
            let mut sources = Vec::with_capacity(templates.len());
            let mut keys = Vec::new();
            for template in templates {
                let tokens = tokenize(template);
                sources.push(format!("^{}", tokens_to_source(&tokens, options)));
                keys.extend(param_tokens(tokens));
            }
            let source = format!("(?:{})", sources.join("|"));
            let regex = RegexBuilder::new(&source)
                .case_insensitive(!options.sensitive)
                .build()
                .map_err(|e| RouterError::Pattern {
                    template: templates.join("|"),
                    reason: e.to_string(),
                })?;
            debug_assert_eq!(keys.len(), regex.captures_len() - 1);
            Ok(PathPattern { regex, keys })
        }
    }
}

fn build_regex(
    source: &str,
    template: &str,
    options: &MatchOptions,
) -> Result<Regex, RouterError> {
    RegexBuilder::new(&format!("^{}", source))
        .case_insensitive(!options.sensitive)
        .build()
        .map_err(|e| RouterError::Pattern {
            template: template.to_string(),
            reason: e.to_string(),
        })
}

fn param_tokens(tokens: Vec<Token>) -> Vec<ParamToken> {
    tokens
        .into_iter()
        .filter_map(|t| match t {
            Token::Param(p) => Some(p),
            Token::Literal(_) => None,
        })
        .collect()
}

/// Tokenize a template into literal and parameter tokens.
pub(crate) fn tokenize(template: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut anon_key = 0usize;
    let mut index = 0usize;
    let mut literal = String::new();

    for caps in TOKEN_GRAMMAR.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        literal.push_str(&template[index..whole.start()]);
        index = whole.end();

        // An escaped sequence collapses to its literal character.
        if let Some(escaped) = caps.get(1) {
            if let Some(ch) = escaped.as_str().chars().nth(1) {
                literal.push(ch);
            }
            continue;
        }

        if !literal.is_empty() {
            tokens.push(Token::Literal(std::mem::take(&mut literal)));
        }

        let prefix = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let name = caps.get(3).map(|m| m.as_str());
        let capture = caps.get(4).map(|m| m.as_str());
        let group = caps.get(5).map(|m| m.as_str());
        let suffix = caps.get(6).map(|m| m.as_str());
        let asterisk = caps.get(7).is_some();

        let repeat = matches!(suffix, Some("+") | Some("*"));
        let optional = matches!(suffix, Some("?") | Some("*"));
        let delimiter = if prefix.is_empty() { "/" } else { prefix };
        let pattern = capture
            .or(group)
            .map(str::to_string)
            .unwrap_or_else(|| {
                if asterisk {
                    ".*".to_string()
                } else {
                    format!("[^{}]+?", delimiter)
                }
            });

        let name = match name {
            Some(n) => ParamKey::Name(n.to_string()),
            None => {
                let key = ParamKey::Index(anon_key);
                anon_key += 1;
                key
            }
        };

        tokens.push(Token::Param(ParamToken {
            name,
            prefix: prefix.to_string(),
            delimiter: delimiter.to_string(),
            optional,
            repeat,
            pattern: escape_group(&pattern),
        }));
    }

    if index < template.len() {
        literal.push_str(&template[index..]);
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }

    tokens
}

/// Render tokens into a regex source string (without the `^` anchor).
fn tokens_to_source(tokens: &[Token], options: &MatchOptions) -> String {
    let ends_with_slash = matches!(
        tokens.last(),
        Some(Token::Literal(lit)) if lit.ends_with('/')
    );

    let mut source = String::new();
    for token in tokens {
        match token {
            Token::Literal(lit) => source.push_str(&escape_string(lit)),
            Token::Param(param) => {
                let prefix = escape_string(&param.prefix);
                let mut capture = param.pattern.clone();
                if param.repeat {
                    capture = format!("{}(?:{}{})*", capture, prefix, param.pattern);
                }
                let capture = if param.optional {
                    if prefix.is_empty() {
                        format!("({})?", capture)
                    } else {
                        format!("(?:{}({}))?", prefix, capture)
                    }
                } else {
                    format!("{}({})", prefix, capture)
                };
                source.push_str(&capture);
            }
        }
    }

    // In non-strict mode a lone trailing slash is optional: drop the
    // literal one so `//` can never be required.
    if !options.strict && ends_with_slash && source.ends_with(r"\/") {
        source.truncate(source.len() - 2);
    }

    if options.end {
        if options.strict {
            source.push('$');
        } else {
            source.push_str("/?$");
        }
    } else if !(options.strict && ends_with_slash) {
        // Stop at a segment boundary so prefix routes compose.
        source.push_str("(?:/|$)");
    }

    source
}

/// Escape a literal fragment for embedding in a regex.
fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(
            c,
            '.' | '+' | '*' | '?' | '=' | '^' | '!' | ':' | '$' | '{' | '}' | '(' | ')' | '['
                | ']' | '|' | '/'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape a capturing group's special characters so an inline pattern
/// cannot introduce extra capture groups.
fn escape_group(group: &str) -> String {
    let mut out = String::with_capacity(group.len());
    for c in group.chars() {
        if matches!(c, '=' | '!' | ':' | '$' | '/' | '(' | ')') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
