//! Code tokenization seam.
//!
//! The parser's transition system owns the real grammar. The reranker only
//! needs two things from it: a token count per hypothesis, and a signal that
//! a hypothesis is malformed so it can be dropped before scoring.
//!
//! [`SimpleCodeTokenizer`] is a grammar-free fallback for Python-like code:
//! a regex lexer plus bracket and quote balancing. It accepts more than a
//! real parser would, but rejects the usual decoder failure modes
//! (truncated calls, unterminated strings).

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Raised when code cannot be turned into tokens.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("untokenizable code: {reason}")]
pub struct TokenizeError {
    pub reason: String,
}

impl TokenizeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Tokenizer interface of the external transition system.
pub trait TransitionSystem: Send + Sync {
    /// Stable identifier, persisted alongside saved rerankers.
    fn name(&self) -> &str;

    fn tokenize_code(&self, code: &str) -> Result<Vec<String>, TokenizeError>;
}

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"[A-Za-z_][A-Za-z0-9_]*|\d+(?:\.\d+)?|"(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'|==|!=|<=|>=|\*\*|//|->|\S"#,
    )
    .expect("token regex")
});

/// Regex lexer with bracket and string balancing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleCodeTokenizer;

impl SimpleCodeTokenizer {
    pub const NAME: &'static str = "simple";
}

impl TransitionSystem for SimpleCodeTokenizer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn tokenize_code(&self, code: &str) -> Result<Vec<String>, TokenizeError> {
        let mut tokens = Vec::new();
        let mut open: Vec<char> = Vec::new();

        for m in TOKEN.find_iter(code) {
            let tok = m.as_str();
            match tok {
                "\"" | "'" => {
                    return Err(TokenizeError::new(format!(
                        "unterminated string at byte {}",
                        m.start()
                    )));
                }
                "(" | "[" | "{" => open.extend(tok.chars()),
                ")" | "]" | "}" => {
                    let expected = match tok {
                        ")" => '(',
                        "]" => '[',
                        _ => '{',
                    };
                    if open.pop() != Some(expected) {
                        return Err(TokenizeError::new(format!(
                            "unbalanced `{}` at byte {}",
                            tok,
                            m.start()
                        )));
                    }
                }
                _ => {}
            }
            tokens.push(tok.to_string());
        }

        if let Some(c) = open.last() {
            return Err(TokenizeError::new(format!("unclosed `{}`", c)));
        }

        Ok(tokens)
    }
}

type TransitionCtor = fn() -> Arc<dyn TransitionSystem>;

static TRANSITION_SYSTEMS: Lazy<HashMap<&'static str, TransitionCtor>> = Lazy::new(|| {
    let mut table: HashMap<&'static str, TransitionCtor> = HashMap::new();
    table.insert(SimpleCodeTokenizer::NAME, || Arc::new(SimpleCodeTokenizer));
    table
});

/// Resolve a built-in transition system by its persisted name.
pub fn transition_system_by_name(name: &str) -> Option<Arc<dyn TransitionSystem>> {
    TRANSITION_SYSTEMS.get(name).map(|ctor| ctor())
}
