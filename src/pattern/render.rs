use regex::Regex;
use serde_json::{Map, Value};

use super::compile::tokenize;
use super::token::Token;
use crate::error::RouterError;

/// Re-renders a path template from a data mapping; the reverse
/// direction of the compiler.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use waypoint::pattern::PathRenderer;
///
/// let renderer = PathRenderer::new("/user/:id").unwrap();
/// let data = json!({"id": "42"});
/// assert_eq!(renderer.render(data.as_object().unwrap()).unwrap(), "/user/42");
/// ```
#[derive(Debug, Clone)]
pub struct PathRenderer {
    tokens: Vec<Token>,
    /// Anchored validator per token; `None` for literals
    validators: Vec<Option<Regex>>,
}

impl PathRenderer {
    /// Tokenize `template` and compile one anchored validator per
    /// parameter token.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Pattern`] when a parameter's inline
    /// pattern fails to compile.
    pub fn new(template: &str) -> Result<Self, RouterError> {
        let tokens = tokenize(template);
        let mut validators = Vec::with_capacity(tokens.len());
        for token in &tokens {
            match token {
                Token::Literal(_) => validators.push(None),
                Token::Param(param) => {
                    let validator = Regex::new(&format!("^{}$", param.pattern)).map_err(|e| {
                        RouterError::Pattern {
                            template: template.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                    validators.push(Some(validator));
                }
            }
        }
        Ok(PathRenderer { tokens, validators })
    }

    /// Render the template against `data`.
    ///
    /// Literal tokens are emitted verbatim. Each parameter token looks
    /// up `data[name]`: a missing or null value on a required parameter
    /// fails, repeated parameters must be supplied as a sequence and are
    /// joined with the parameter's delimiter after the first occurrence
    /// uses its prefix, and every segment is percent-encoded before it
    /// is checked against the parameter's own pattern.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Validation`] naming the offending
    /// parameter.
    pub fn render(&self, data: &Map<String, Value>) -> Result<String, RouterError> {
        let mut path = String::new();

        for (token, validator) in self.tokens.iter().zip(&self.validators) {
            let param = match token {
                Token::Literal(lit) => {
                    path.push_str(lit);
                    continue;
                }
                Token::Param(param) => param,
            };
            let name = param.name.to_string();
            let value = data.get(&name);

            let value = match value {
                None | Some(Value::Null) => {
                    if param.optional {
                        continue;
                    }
                    return Err(RouterError::validation(name, "required parameter is missing"));
                }
                Some(v) => v,
            };

            if let Value::Array(items) = value {
                if !param.repeat {
                    return Err(RouterError::validation(
                        name,
                        "parameter does not repeat but a sequence was supplied",
                    ));
                }
                if items.is_empty() {
                    if param.optional {
                        continue;
                    }
                    return Err(RouterError::validation(name, "sequence must not be empty"));
                }
                for (i, item) in items.iter().enumerate() {
                    let segment = encode_segment(item, &name)?;
                    check_segment(&segment, validator, &name, &param.pattern)?;
                    path.push_str(if i == 0 { &param.prefix } else { &param.delimiter });
                    path.push_str(&segment);
                }
                continue;
            }

            let segment = encode_segment(value, &name)?;
            check_segment(&segment, validator, &name, &param.pattern)?;
            path.push_str(&param.prefix);
            path.push_str(&segment);
        }

        Ok(path)
    }
}

fn encode_segment(value: &Value, name: &str) -> Result<String, RouterError> {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => {
            return Err(RouterError::validation(
                name,
                "value must be a string, number, or boolean",
            ))
        }
    };
    Ok(urlencoding::encode(&raw).into_owned())
}

fn check_segment(
    segment: &str,
    validator: &Option<Regex>,
    name: &str,
    pattern: &str,
) -> Result<(), RouterError> {
    let ok = validator.as_ref().map(|v| v.is_match(segment)).unwrap_or(true);
    if ok {
        Ok(())
    } else {
        Err(RouterError::validation(
            name,
            format!("'{}' does not match '{}'", segment, pattern),
        ))
    }
}
