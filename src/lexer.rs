use logos::Logos;

use crate::error::{Result, VelaError};

/// Words with a grammatical meaning. They lex as identifiers and are
/// recognized by the parser, case-insensitively.
const KEYWORDS: &[&str] = &[
    "AND", "OR", "XOR", "NOT", "IN", "IS", "IF", "THEN", "ELSE", "WHEN", "WHILE", "FUNCTION",
    "TRUE", "FALSE", "Λ",
];

pub fn is_keyword(text: &str) -> bool {
    let upper = text.to_uppercase();
    KEYWORDS.contains(&upper.as_str())
}

#[derive(Debug, Clone, PartialEq, Logos)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token<'a> {
    #[token("(")]
    LeftParen,

    #[token(")")]
    RightParen,

    #[token("[")]
    LeftBracket,

    #[token("]")]
    RightBracket,

    #[token("{")]
    LeftBrace,

    #[token("}")]
    RightBrace,

    #[token(":")]
    Colon,

    #[token("<-")]
    LeftArrow,

    #[token("->")]
    RightArrow,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("^")]
    Caret,

    #[token("=")]
    Equal,

    #[token("<>")]
    NotEqual,

    #[token("<")]
    Less,

    #[token(">")]
    Greater,

    #[token("<=")]
    LessEqual,

    #[token(">=")]
    GreaterEqual,

    #[token("=~")]
    Approximately,

    #[token("<<")]
    ShiftLeft,

    #[token(">>")]
    ShiftRight,

    #[regex(r"0[xX][0-9a-fA-F]+|0[bB][01]+|[0-9]+", |lex| lex.slice())]
    Integer(&'a str),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?|\.[0-9]+([eE][+-]?[0-9]+)?|[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice())]
    Real(&'a str),

    // No escapes, the contents are taken verbatim
    #[regex(r#""[^"]*""#, |lex| lex.slice())]
    String(&'a str),

    #[regex(r"[\p{L}_][\p{L}\p{N}_]*", |lex| lex.slice())]
    Identifier(&'a str),

    // Produced by `lexer` for `<< ... >>` in doc string position
    Doc(&'a str),
}

impl<'a> Token<'a> {
    pub fn text(&self) -> &'a str {
        match self {
            Self::LeftParen => "(",
            Self::RightParen => ")",
            Self::LeftBracket => "[",
            Self::RightBracket => "]",
            Self::LeftBrace => "{",
            Self::RightBrace => "}",
            Self::Colon => ":",
            Self::LeftArrow => "<-",
            Self::RightArrow => "->",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Caret => "^",
            Self::Equal => "=",
            Self::NotEqual => "<>",
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessEqual => "<=",
            Self::GreaterEqual => ">=",
            Self::Approximately => "=~",
            Self::ShiftLeft => "<<",
            Self::ShiftRight => ">>",
            Self::Integer(text)
            | Self::Real(text)
            | Self::String(text)
            | Self::Identifier(text)
            | Self::Doc(text) => text,
        }
    }

    /// Identifier with the given (case-insensitive) keyword text
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Self::Identifier(text) if text.to_uppercase() == keyword)
    }

    fn ends_operand(&self) -> bool {
        match self {
            Self::Integer(_) | Self::Real(_) | Self::String(_) | Self::RightParen | Self::RightBracket => true,
            Self::Identifier(text) => !is_keyword(text) || matches!(text.to_uppercase().as_str(), "TRUE" | "FALSE"),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme<'a> {
    pub token: Token<'a>,
    pub line: usize,
    pub column: usize,
}

// 1-based line and column, tracked forward from the last offset asked for
struct Cursor<'a> {
    input: &'a str,
    offset: usize,
    line: usize,
    column: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, offset: 0, line: 1, column: 1 }
    }

    // Offsets must not move backwards
    fn advance_to(&mut self, offset: usize) -> (usize, usize) {
        for ch in self.input[self.offset..offset].chars() {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.offset = offset;
        (self.line, self.column)
    }
}

pub fn lexer(input: &str) -> Result<Vec<Lexeme<'_>>> {
    let mut lexemes: Vec<Lexeme> = vec![];
    let mut tokenizer = Token::lexer(input);
    let mut cursor = Cursor::new(input);
    let mut previous_end = 0;

    while let Some(result) = tokenizer.next() {
        let span = tokenizer.span();
        let (line, column) = cursor.advance_to(span.start);

        let token = match result {
            Ok(token) => token,
            Err(_) => {
                return Err(VelaError::parse(
                    format!("unrecognized input '{}'", tokenizer.slice()),
                    line,
                    column,
                ))
            }
        };

        // A doc string opens where an operand can't have just ended, or on a new line
        let token = match token {
            Token::ShiftLeft => {
                let after_operand = lexemes.last()
                    .map(|lexeme| lexeme.token.ends_operand())
                    .unwrap_or(false);
                let on_new_line = input[previous_end..span.start].contains('\n');

                match tokenizer.remainder().find(">>") {
                    Some(length) if !after_operand || on_new_line => {
                        let text = &tokenizer.remainder()[..length];
                        tokenizer.bump(length + 2);
                        Token::Doc(text.trim())
                    }
                    _ => Token::ShiftLeft,
                }
            }
            token => token,
        };

        previous_end = tokenizer.span().end;
        lexemes.push(Lexeme { token, line, column });
    }

    Ok(lexemes)
}

/// Cache key for a token stream. Whitespace and comments are already gone;
/// everything but string literals and doc strings is upper-cased.
pub fn canonical(lexemes: &[Lexeme]) -> String {
    let mut key = String::new();
    for (index, lexeme) in lexemes.iter().enumerate() {
        if index > 0 {
            key.push(' ');
        }
        match &lexeme.token {
            Token::String(text) => key.push_str(text),
            Token::Doc(text) => {
                key.push_str("<<");
                key.push_str(text);
                key.push_str(">>");
            }
            other => key.push_str(&other.text().to_uppercase()),
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn tokens(input: &str) -> Vec<Token<'_>> {
        lexer(input).unwrap().into_iter().map(|lexeme| lexeme.token).collect()
    }

    #[test]
    fn numbers() {
        assert_eq!(
            tokens("42 0xA 0b10 12.5 .5 1e3 2.5E-1"),
            vec![
                Token::Integer("42"),
                Token::Integer("0xA"),
                Token::Integer("0b10"),
                Token::Real("12.5"),
                Token::Real(".5"),
                Token::Real("1e3"),
                Token::Real("2.5E-1"),
            ]
        );
    }

    #[test]
    fn operators_and_unicode_identifiers() {
        assert_eq!(
            tokens("x <- λ(n:ℤ) <> =~ >= π"),
            vec![
                Token::Identifier("x"),
                Token::LeftArrow,
                Token::Identifier("λ"),
                Token::LeftParen,
                Token::Identifier("n"),
                Token::Colon,
                Token::Identifier("ℤ"),
                Token::RightParen,
                Token::NotEqual,
                Token::Approximately,
                Token::GreaterEqual,
                Token::Identifier("π"),
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(tokens("1 # one\n2"), vec![Token::Integer("1"), Token::Integer("2")]);
        assert!(tokens("# only a comment").is_empty());
    }

    #[test]
    fn doc_strings_and_shifts() {
        assert_eq!(
            tokens("<< squares a number >>\nsquare(n:integer):integer { n*n }")[0],
            Token::Doc("squares a number")
        );
        assert_eq!(tokens("1 << 2"), vec![Token::Integer("1"), Token::ShiftLeft, Token::Integer("2")]);
        assert_eq!(
            tokens("[1 2] << [3 4] >> 1")[4],
            Token::ShiftLeft
        );
    }

    #[test]
    fn strings_are_verbatim() {
        assert_eq!(tokens(r#""a\d+ b""#), vec![Token::String(r#""a\d+ b""#)]);
    }

    #[test]
    fn lexemes_carry_their_positions() {
        let lexemes = lexer("π <- 1\n<< doc >> f(x:ℤ)\n  λ").unwrap();
        let positions = lexemes.iter().map(|lexeme| (lexeme.line, lexeme.column)).collect::<Vec<_>>();
        assert_eq!(
            positions,
            vec![(1, 1), (1, 3), (1, 6), (2, 1), (2, 11), (2, 12), (2, 13), (2, 14), (2, 15), (2, 16), (3, 3)]
        );
        assert_eq!(lexemes[3].token, Token::Doc("doc"));
    }

    #[test]
    fn unrecognized_input_has_a_position() {
        let error = lexer("x <- 1\n  2 & 3").unwrap_err();
        assert_eq!(error, VelaError::parse("unrecognized input '&'", 2, 5));
    }

    #[test]
    fn canonical_form() {
        let a = lexer("x  <- \"Abc\"   +  1 # note").unwrap();
        let b = lexer("X<-\"Abc\"+1").unwrap();
        assert_eq!(canonical(&a), canonical(&b));

        let c = lexer("X<-\"ABC\"+1").unwrap();
        assert_ne!(canonical(&a), canonical(&c));

        let d = lexer("1 2").unwrap();
        let e = lexer("12").unwrap();
        assert_ne!(canonical(&d), canonical(&e));
    }
}
