//! Single-pass lexer for CTilde source. Works over a char vector with one
//! character of lookahead and a tracked line/column cursor. Unrecognized
//! characters become [TokenKind::Unknown] tokens rather than being dropped,
//! so the parser can report them in context.

use crate::token::{Token, TokenKind};
use log::debug;

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consumes whitespace and `//` comments. Returns once the cursor sits on
    /// the start of the next token (or the end of input).
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn identifier(&mut self, line: usize, column: usize) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = TokenKind::keyword(&text).unwrap_or(TokenKind::Ident);
        Token::new(kind, text, line, column)
    }

    fn number(&mut self, line: usize, column: usize) -> Token {
        let mut text = String::new();
        // Hex literals keep their 0x prefix in the token text; the parser
        // converts to a value.
        if self.peek() == Some('0')
            && matches!(self.peek_next(), Some('x') | Some('X'))
        {
            for _ in 0..2 {
                if let Some(c) = self.advance() {
                    text.push(c);
                }
            }
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        } else {
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        Token::new(TokenKind::IntLit, text, line, column)
    }

    fn string(&mut self, line: usize, column: usize) -> Token {
        self.advance(); // opening quote
        let mut text = String::new();
        while let Some(c) = self.peek() {
            match c {
                '"' => {
                    self.advance();
                    break;
                }
                '\\' => {
                    self.advance();
                    match self.advance() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('\\') => text.push('\\'),
                        Some('"') => text.push('"'),
                        // Unknown escapes are retained verbatim after the
                        // backslash.
                        Some(other) => {
                            text.push('\\');
                            text.push(other);
                        }
                        None => break,
                    }
                }
                _ => {
                    text.push(c);
                    self.advance();
                }
            }
        }
        Token::new(TokenKind::StrLit, text, line, column)
    }

    /// Matches punctuation and operators. Digraphs (`==`, `!=`, `->`, `::`)
    /// are tried before their single-character counterparts.
    fn punct(&mut self, line: usize, column: usize) -> Token {
        let c = match self.advance() {
            Some(c) => c,
            None => return Token::synthetic(TokenKind::Eof, line, column),
        };
        let (kind, text) = match (c, self.peek()) {
            ('=', Some('=')) => {
                self.advance();
                (TokenKind::EqEq, "==".to_string())
            }
            ('!', Some('=')) => {
                self.advance();
                (TokenKind::NotEq, "!=".to_string())
            }
            ('-', Some('>')) => {
                self.advance();
                (TokenKind::Arrow, "->".to_string())
            }
            (':', Some(':')) => {
                self.advance();
                (TokenKind::ColonColon, "::".to_string())
            }
            ('=', _) => (TokenKind::Assign, c.to_string()),
            (';', _) => (TokenKind::Semi, c.to_string()),
            (',', _) => (TokenKind::Comma, c.to_string()),
            ('.', _) => (TokenKind::Dot, c.to_string()),
            (':', _) => (TokenKind::Colon, c.to_string()),
            ('~', _) => (TokenKind::Tilde, c.to_string()),
            ('#', _) => (TokenKind::Hash, c.to_string()),
            ('(', _) => (TokenKind::LParen, c.to_string()),
            (')', _) => (TokenKind::RParen, c.to_string()),
            ('{', _) => (TokenKind::LBrace, c.to_string()),
            ('}', _) => (TokenKind::RBrace, c.to_string()),
            ('<', _) => (TokenKind::Lt, c.to_string()),
            ('>', _) => (TokenKind::Gt, c.to_string()),
            ('+', _) => (TokenKind::Plus, c.to_string()),
            ('-', _) => (TokenKind::Minus, c.to_string()),
            ('*', _) => (TokenKind::Star, c.to_string()),
            ('/', _) => (TokenKind::Slash, c.to_string()),
            ('&', _) => (TokenKind::Amp, c.to_string()),
            _ => (TokenKind::Unknown, c.to_string()),
        };
        Token::new(kind, text, line, column)
    }
}

/// Lexes a full source file into a token sequence. Always terminated by an
/// [TokenKind::Eof] sentinel.
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        lexer.skip_trivia();
        let (line, column) = (lexer.line, lexer.column);
        let token = match lexer.peek() {
            None => break,
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                lexer.identifier(line, column)
            }
            Some(c) if c.is_ascii_digit() => lexer.number(line, column),
            Some('"') => lexer.string(line, column),
            Some(_) => lexer.punct(line, column),
        };
        tokens.push(token);
    }
    tokens.push(Token::synthetic(TokenKind::Eof, lexer.line, lexer.column));
    debug!("lexed {} tokens", tokens.len());
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
        assert_eq!(kinds("   \n\t "), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_keywords_and_idents() {
        assert_eq!(
            kinds("int main virtual foo_1"),
            vec![
                TokenKind::Int,
                TokenKind::Ident,
                TokenKind::Virtual,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_digraphs_before_singles() {
        assert_eq!(
            kinds("== = != -> - :: :"),
            vec![
                TokenKind::EqEq,
                TokenKind::Assign,
                TokenKind::NotEq,
                TokenKind::Arrow,
                TokenKind::Minus,
                TokenKind::ColonColon,
                TokenKind::Colon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("int x;\n  x = 1;");
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (1, 5));
        assert_eq!((tokens[3].line, tokens[3].column), (2, 3));
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("x // the rest is ignored\ny"),
            vec![TokenKind::Ident, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn test_int_literals() {
        let tokens = tokenize("42 0x2A 0");
        assert_eq!(tokens[0].text, "42");
        assert_eq!(tokens[1].text, "0x2A");
        assert_eq!(tokens[2].text, "0");
        assert!(tokens.iter().take(3).all(|t| t.kind == TokenKind::IntLit));
    }

    #[test]
    fn test_string_escapes() {
        let tokens = tokenize(r#""a\nb\t\"q\\" "\z""#);
        assert_eq!(tokens[0].kind, TokenKind::StrLit);
        assert_eq!(tokens[0].text, "a\nb\t\"q\\");
        // Unknown escape kept verbatim after the backslash
        assert_eq!(tokens[1].text, "\\z");
    }

    #[test]
    fn test_unknown_character_not_dropped() {
        let tokens = tokenize("a @ b");
        assert_eq!(tokens[1].kind, TokenKind::Unknown);
        assert_eq!(tokens[1].text, "@");
        assert_eq!(tokens.len(), 4);
    }

    #[test]
    fn test_division_vs_comment() {
        assert_eq!(
            kinds("a / b"),
            vec![
                TokenKind::Ident,
                TokenKind::Slash,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }
}
