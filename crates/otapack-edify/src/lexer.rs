use crate::parser::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Str(String),
    If,
    Then,
    Else,
    Endif,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Plus,
    Bang,
    Semi,
    Comma,
    LParen,
    RParen,
    Eof,
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Str(value) => format!("string \"{value}\""),
            Self::If => "'if'".to_string(),
            Self::Then => "'then'".to_string(),
            Self::Else => "'else'".to_string(),
            Self::Endif => "'endif'".to_string(),
            Self::AndAnd => "'&&'".to_string(),
            Self::OrOr => "'||'".to_string(),
            Self::EqEq => "'=='".to_string(),
            Self::NotEq => "'!='".to_string(),
            Self::Plus => "'+'".to_string(),
            Self::Bang => "'!'".to_string(),
            Self::Semi => "';'".to_string(),
            Self::Comma => "','".to_string(),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
            Self::Eof => "end of input".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | ':' | '/' | '.')
}

struct Lexer<'s> {
    source: &'s str,
    chars: std::iter::Peekable<std::str::CharIndices<'s>>,
    line: usize,
    column: usize,
}

impl<'s> Lexer<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next()?;
        if next.1 == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(next)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn offset(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(offset, _)| *offset)
            .unwrap_or(self.source.len())
    }

    fn error(&self, line: usize, column: usize, message: impl Into<String>) -> ParseError {
        ParseError {
            line,
            column,
            message: message.into(),
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.bump();
            } else if ch == '#' {
                while let Some(ch) = self.peek_char() {
                    if ch == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia();
        let (line, column) = (self.line, self.column);
        let start = self.offset();

        let Some((_, ch)) = self.bump() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                start,
                end: start,
                line,
                column,
            });
        };

        let kind = match ch {
            '"' => TokenKind::Str(self.quoted(line, column)?),
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semi,
            '+' => TokenKind::Plus,
            '&' if self.peek_char() == Some('&') => {
                self.bump();
                TokenKind::AndAnd
            }
            '|' if self.peek_char() == Some('|') => {
                self.bump();
                TokenKind::OrOr
            }
            '=' if self.peek_char() == Some('=') => {
                self.bump();
                TokenKind::EqEq
            }
            '!' if self.peek_char() == Some('=') => {
                self.bump();
                TokenKind::NotEq
            }
            '!' => TokenKind::Bang,
            ch if is_word_char(ch) => {
                let mut word = String::from(ch);
                while let Some(next) = self.peek_char() {
                    if !is_word_char(next) {
                        break;
                    }
                    word.push(next);
                    self.bump();
                }
                match word.as_str() {
                    "if" => TokenKind::If,
                    "then" => TokenKind::Then,
                    "else" => TokenKind::Else,
                    "endif" => TokenKind::Endif,
                    _ => TokenKind::Str(word),
                }
            }
            other => {
                return Err(self.error(line, column, format!("unexpected character '{other}'")));
            }
        };

        Ok(Token {
            kind,
            start,
            end: self.offset(),
            line,
            column,
        })
    }

    fn quoted(&mut self, line: usize, column: usize) -> Result<String, ParseError> {
        let mut value = String::new();
        loop {
            let Some((_, ch)) = self.bump() else {
                return Err(self.error(line, column, "unterminated string"));
            };
            match ch {
                '"' => return Ok(value),
                '\\' => {
                    let (escape_line, escape_column) = (self.line, self.column);
                    let Some((_, escaped)) = self.bump() else {
                        return Err(self.error(line, column, "unterminated string"));
                    };
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        '"' => value.push('"'),
                        '\\' => value.push('\\'),
                        'x' => {
                            let mut digits = String::new();
                            for _ in 0..2 {
                                match self.peek_char() {
                                    Some(digit) if digit.is_ascii_hexdigit() => {
                                        digits.push(digit);
                                        self.bump();
                                    }
                                    _ => break,
                                }
                            }
                            if digits.len() != 2 {
                                return Err(self.error(
                                    escape_line,
                                    escape_column,
                                    "\\x escape needs two hex digits",
                                ));
                            }
                            let byte = u8::from_str_radix(&digits, 16).unwrap_or_default();
                            value.push(char::from(byte));
                        }
                        other => {
                            return Err(self.error(
                                escape_line,
                                escape_column,
                                format!("invalid escape '\\{other}'"),
                            ));
                        }
                    }
                }
                other => value.push(other),
            }
        }
    }
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}
