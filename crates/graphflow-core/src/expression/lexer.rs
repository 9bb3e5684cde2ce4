//! Tokenizer for the expression language.

use super::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    /// Bare or backtick-quoted name.
    Ident(String),
    /// `$name`, or `$` alone (empty string) for the root binding.
    Variable(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    In,
    Function,
    Dot,
    Comma,
    Colon,
    Question,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// A token with the byte offset it started at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn tokenize(src: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let two = chars.get(i + 1).map(|&(_, n)| n);
        let simple = match c {
            '.' => Some(Token::Dot),
            ',' => Some(Token::Comma),
            ':' => Some(Token::Colon),
            '?' => Some(Token::Question),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '&' if two == Some('&') => {
                i += 1;
                Some(Token::And)
            }
            '&' => Some(Token::Amp),
            '|' if two == Some('|') => {
                i += 1;
                Some(Token::Or)
            }
            '=' => {
                if two == Some('=') {
                    i += 1;
                }
                Some(Token::Eq)
            }
            '!' if two == Some('=') => {
                i += 1;
                Some(Token::NotEq)
            }
            '<' if two == Some('=') => {
                i += 1;
                Some(Token::LtEq)
            }
            '<' => Some(Token::Lt),
            '>' if two == Some('=') => {
                i += 1;
                Some(Token::GtEq)
            }
            '>' => Some(Token::Gt),
            _ => None,
        };
        if let Some(token) = simple {
            tokens.push(Spanned { token, pos });
            i += 1;
            continue;
        }

        if c == '"' || c == '\'' {
            let (s, next) = read_string(&chars, i, c)?;
            tokens.push(Spanned {
                token: Token::Str(s),
                pos,
            });
            i = next;
            continue;
        }

        if c == '`' {
            let mut name = String::new();
            let mut j = i + 1;
            loop {
                match chars.get(j) {
                    Some(&(_, '`')) => break,
                    Some(&(_, ch)) => name.push(ch),
                    None => return Err(SyntaxError::new(pos, "unterminated quoted name")),
                }
                j += 1;
            }
            tokens.push(Spanned {
                token: Token::Ident(name),
                pos,
            });
            i = j + 1;
            continue;
        }

        if c.is_ascii_digit() {
            let mut j = i;
            while j < chars.len() && chars[j].1.is_ascii_digit() {
                j += 1;
            }
            if j + 1 < chars.len() && chars[j].1 == '.' && chars[j + 1].1.is_ascii_digit() {
                j += 1;
                while j < chars.len() && chars[j].1.is_ascii_digit() {
                    j += 1;
                }
            }
            if j < chars.len() && matches!(chars[j].1, 'e' | 'E') {
                let mut k = j + 1;
                if k < chars.len() && matches!(chars[k].1, '+' | '-') {
                    k += 1;
                }
                if k < chars.len() && chars[k].1.is_ascii_digit() {
                    while k < chars.len() && chars[k].1.is_ascii_digit() {
                        k += 1;
                    }
                    j = k;
                }
            }
            let end = chars.get(j).map(|&(p, _)| p).unwrap_or(src.len());
            let text = &src[pos..end];
            let n: f64 = text
                .parse()
                .map_err(|_| SyntaxError::new(pos, format!("invalid number '{text}'")))?;
            tokens.push(Spanned {
                token: Token::Number(n),
                pos,
            });
            i = j;
            continue;
        }

        if c == '$' {
            let mut j = i + 1;
            while j < chars.len() && is_name_char(chars[j].1) {
                j += 1;
            }
            let end = chars.get(j).map(|&(p, _)| p).unwrap_or(src.len());
            tokens.push(Spanned {
                token: Token::Variable(src[pos + 1..end].to_string()),
                pos,
            });
            i = j;
            continue;
        }

        if is_name_start(c) {
            let mut j = i;
            while j < chars.len() && is_name_char(chars[j].1) {
                j += 1;
            }
            let end = chars.get(j).map(|&(p, _)| p).unwrap_or(src.len());
            let word = &src[pos..end];
            let token = match word {
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                "in" => Token::In,
                "function" => Token::Function,
                _ => Token::Ident(word.to_string()),
            };
            tokens.push(Spanned { token, pos });
            i = j;
            continue;
        }

        return Err(SyntaxError::new(pos, format!("unexpected character '{c}'")));
    }

    Ok(tokens)
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn read_string(
    chars: &[(usize, char)],
    start: usize,
    quote: char,
) -> Result<(String, usize), SyntaxError> {
    let mut out = String::new();
    let mut j = start + 1;
    loop {
        let Some(&(pos, ch)) = chars.get(j) else {
            return Err(SyntaxError::new(chars[start].0, "unterminated string literal"));
        };
        if ch == quote {
            return Ok((out, j + 1));
        }
        if ch == '\\' {
            let Some(&(_, esc)) = chars.get(j + 1) else {
                return Err(SyntaxError::new(pos, "unterminated escape sequence"));
            };
            match esc {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '\\' => out.push('\\'),
                '"' => out.push('"'),
                '\'' => out.push('\''),
                '`' => out.push('`'),
                'u' => {
                    let hex: String = chars
                        .iter()
                        .skip(j + 2)
                        .take(4)
                        .map(|&(_, h)| h)
                        .collect();
                    let decoded = u32::from_str_radix(&hex, 16)
                        .ok()
                        .filter(|_| hex.len() == 4)
                        .and_then(char::from_u32)
                        .ok_or_else(|| SyntaxError::new(pos, "invalid unicode escape"))?;
                    out.push(decoded);
                    j += 4;
                }
                other => {
                    return Err(SyntaxError::new(pos, format!("unknown escape '\\{other}'")));
                }
            }
            j += 2;
            continue;
        }
        out.push(ch);
        j += 1;
    }
}
