//! IR Lexer

use logos::{self, Logos};

#[derive(Logos, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Token {
    // Program constructs
    #[token(b"(")]
    Open,
    #[token(b")")]
    Close,

    // Literals
    #[regex(br"-?[0-9]+", priority = 2)]
    Int,
    #[regex(br"#x[0-9a-fA-F]+")]
    Hex,
    #[regex(br"#b[01]+")]
    Bin,
    #[regex(br"#f-?([0-9]+|x[0-9a-fA-F]+)(m[0-9]+)?")]
    Field,

    // Identifiers
    #[regex(br"#t|#a|#l|[^()0-9#; \t\r\n\f][^(); \t\r\n\f#]*")]
    Ident,

    #[error]
    // Skip space
    #[regex(br"[ \t\r\n\f]+", logos::skip)]
    // Skip comments
    #[regex(br";[^\n]*", logos::skip)]
    Error,
}
