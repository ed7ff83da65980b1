//! Expression tokenizer
//!
//! Converts expression strings like `round({price} * 1.2, 2)` into a
//! sequence of positioned tokens. Column references become
//! [`Token::ColumnRef`] and are replaced by [`Token::Resolved`] values
//! before parsing.

use crate::core::value::Value;
use crate::error::EvalError;
use std::iter::Peekable;
use std::str::Chars;

/// A token in an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A numeric literal (e.g., 123, 45.67, 1.5e10)
    Number(f64),
    /// A string literal (e.g., "hello" or 'world')
    Text(String),
    /// `true` / `false`
    Bool(bool),
    /// `null`
    Null,
    /// A bare name; only valid as a function name
    Identifier(String),
    /// `{column name}`, name trimmed
    ColumnRef(String),
    /// A column reference already replaced by the row's value
    Resolved(Value),
    /// Arithmetic/comparison operators: + - * / = == != <> < <= > >=
    Operator(String),
    OpenParen,
    CloseParen,
    Comma,
}

/// A token and the character offset it starts at
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub position: usize,
}

/// Tokenizer for expressions
pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(expression: &'a str) -> Self {
        Self {
            chars: expression.chars().peekable(),
            position: 0,
        }
    }

    /// Tokenize the entire expression
    pub fn tokenize(mut self) -> Result<Vec<Lexeme>, EvalError> {
        let mut lexemes = Vec::new();
        loop {
            self.skip_whitespace();
            let position = self.position;
            match self.next_token()? {
                Some(token) => lexemes.push(Lexeme { token, position }),
                None => break,
            }
        }
        Ok(lexemes)
    }

    fn next_token(&mut self) -> Result<Option<Token>, EvalError> {
        let Some(c) = self.peek() else {
            return Ok(None);
        };
        let token = match c {
            '"' | '\'' => self.read_string()?,
            '{' => self.read_column_ref()?,

            '(' => self.single(Token::OpenParen),
            ')' => self.single(Token::CloseParen),
            ',' => self.single(Token::Comma),

            '+' | '-' | '*' | '/' => {
                self.advance();
                Token::Operator(c.to_string())
            }
            '=' => self.read_operator('=', &['='])?,
            '<' => self.read_operator('<', &['=', '>'])?,
            '>' => self.read_operator('>', &['='])?,
            '!' => {
                let start = self.position;
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    Token::Operator("!=".to_string())
                } else {
                    return Err(EvalError::syntax("Expected '=' after '!'", start));
                }
            }

            c if c.is_ascii_digit() || c == '.' => self.read_number()?,
            c if c.is_alphabetic() || c == '_' => self.read_identifier(),

            '}' => {
                return Err(EvalError::syntax(
                    "Unmatched '}' outside a column reference",
                    self.position,
                ))
            }
            c => {
                return Err(EvalError::syntax(
                    format!("Unexpected character: '{}'", c),
                    self.position,
                ))
            }
        };
        Ok(Some(token))
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// `first` optionally followed by one of `seconds`
    fn read_operator(&mut self, first: char, seconds: &[char]) -> Result<Token, EvalError> {
        self.advance();
        let mut op = first.to_string();
        if let Some(next) = self.peek() {
            if seconds.contains(&next) {
                self.advance();
                op.push(next);
            }
        }
        Ok(Token::Operator(op))
    }

    /// String literal with backslash escapes
    fn read_string(&mut self) -> Result<Token, EvalError> {
        let start = self.position;
        let quote = self.advance();
        let mut value = String::new();

        loop {
            match self.advance() {
                None => return Err(EvalError::syntax("Unterminated string literal", start)),
                Some('\\') => match self.advance() {
                    None => return Err(EvalError::syntax("Unterminated string literal", start)),
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some(other) => value.push(other),
                },
                Some(c) if Some(c) == quote => break,
                Some(c) => value.push(c),
            }
        }

        Ok(Token::Text(value))
    }

    fn read_column_ref(&mut self) -> Result<Token, EvalError> {
        let start = self.position;
        self.advance(); // consume '{'
        let mut name = String::new();

        loop {
            match self.advance() {
                None => return Err(EvalError::syntax("Unterminated column reference", start)),
                Some('}') => break,
                Some('{') => {
                    return Err(EvalError::syntax(
                        "Nested '{' inside a column reference",
                        self.position - 1,
                    ))
                }
                Some(c) => name.push(c),
            }
        }

        let name = name.trim();
        if name.is_empty() {
            return Err(EvalError::syntax("Empty column reference", start));
        }
        Ok(Token::ColumnRef(name.to_string()))
    }

    fn read_number(&mut self) -> Result<Token, EvalError> {
        let start = self.position;
        let mut literal = String::new();

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' {
                literal.push(c);
                self.advance();
            } else {
                break;
            }
        }

        // Exponent: e / E, optional sign, digits
        if matches!(self.peek(), Some('e') | Some('E')) {
            literal.push('e');
            self.advance();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                literal.push(sign);
                self.advance();
            }
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    literal.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        literal
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Token::Number)
            .ok_or_else(|| EvalError::syntax(format!("Invalid number: {}", literal), start))
    }

    fn read_identifier(&mut self) -> Token {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }

        match name.to_ascii_lowercase().as_str() {
            "true" => Token::Bool(true),
            "false" => Token::Bool(false),
            "null" => Token::Null,
            _ => Token::Identifier(name),
        }
    }
}

/// Tokenize an expression.
pub fn tokenize(expression: &str) -> Result<Vec<Lexeme>, EvalError> {
    Tokenizer::new(expression).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(expr: &str) -> Vec<Token> {
        tokenize(expr)
            .unwrap()
            .into_iter()
            .map(|l| l.token)
            .collect()
    }

    #[test]
    fn test_tokenize_arithmetic() {
        assert_eq!(
            tokens("2 + 3.5 * 1e2"),
            vec![
                Token::Number(2.0),
                Token::Operator("+".to_string()),
                Token::Number(3.5),
                Token::Operator("*".to_string()),
                Token::Number(100.0),
            ]
        );
    }

    #[test]
    fn test_tokenize_column_refs() {
        assert_eq!(
            tokens("{ unit price }*{qty}"),
            vec![
                Token::ColumnRef("unit price".to_string()),
                Token::Operator("*".to_string()),
                Token::ColumnRef("qty".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_function_call() {
        assert_eq!(
            tokens("upper('a', \"b\")"),
            vec![
                Token::Identifier("upper".to_string()),
                Token::OpenParen,
                Token::Text("a".to_string()),
                Token::Comma,
                Token::Text("b".to_string()),
                Token::CloseParen,
            ]
        );
    }

    #[test]
    fn test_tokenize_string_escapes() {
        assert_eq!(
            tokens(r#""say \"hi\"\n""#),
            vec![Token::Text("say \"hi\"\n".to_string())]
        );
        assert_eq!(tokens(r"'it\'s'"), vec![Token::Text("it's".to_string())]);
    }

    #[test]
    fn test_tokenize_literals() {
        assert_eq!(
            tokens("true FALSE null"),
            vec![Token::Bool(true), Token::Bool(false), Token::Null]
        );
    }

    #[test]
    fn test_tokenize_comparison_operators() {
        let ops: Vec<Token> = ["=", "==", "!=", "<>", "<", "<=", ">", ">="]
            .iter()
            .map(|s| Token::Operator(s.to_string()))
            .collect();
        assert_eq!(tokens("= == != <> < <= > >="), ops);
    }

    #[test]
    fn test_positions() {
        let lexemes = tokenize("ab + {c}").unwrap();
        let positions: Vec<usize> = lexemes.iter().map(|l| l.position).collect();
        assert_eq!(positions, vec![0, 3, 5]);
    }

    #[test]
    fn test_tokenize_errors() {
        assert!(matches!(
            tokenize("'open"),
            Err(EvalError::Syntax { position: 0, .. })
        ));
        assert!(matches!(
            tokenize("1 + {open"),
            Err(EvalError::Syntax { position: 4, .. })
        ));
        assert!(tokenize("{}").is_err());
        assert!(tokenize("1 ; 2").is_err());
        assert!(tokenize("1 ! 2").is_err());
        assert!(tokenize("1.2.3").is_err());
    }
}
