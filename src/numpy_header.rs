/*! A small parser for the numpy-style header text carried by a `DTYPE`
descriptor item: a Python dict literal with exactly the keys `descr`,
`fortran_order` and `shape`.

This is not a general Python literal parser -- it accepts exactly the
grammar numpy's `format.header_data_from_array_1_0` produces, since that's
the only thing a conforming SPEAD sender emits into this field. Anything
else is a malformed header.
*/
use crate::error::DescriptorError;

/// The `descr` field of a numpy header: either a single dtype string, or a
/// compound dtype spelled out as a list of `(field name, dtype string)`
/// pairs (numpy's structured-array syntax, e.g. `[('f0', '<f4'), ('f1', '|O')]`).
#[derive(Debug, Clone, PartialEq)]
pub enum DescrSpec {
    Scalar(String),
    Fields(Vec<(String, String)>),
}

/// One dict literal, decoded just enough to check its key set and pull out
/// the three values this crate cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct NumpyHeader {
    pub descr: DescrSpec,
    pub fortran_order: bool,
    pub shape: Vec<i64>,
}

struct Tokenizer<'a> {
    rest: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
    Comma,
    Str(String),
    Ident(String),
    Int(i64),
}

impl<'a> Tokenizer<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s.trim() }
    }

    fn next(&mut self) -> Option<Token> {
        self.rest = self.rest.trim_start();
        let mut chars = self.rest.char_indices();
        let (_, c) = chars.next()?;
        match c {
            '{' => {
                self.advance(1);
                Some(Token::LBrace)
            }
            '}' => {
                self.advance(1);
                Some(Token::RBrace)
            }
            '(' => {
                self.advance(1);
                Some(Token::LParen)
            }
            ')' => {
                self.advance(1);
                Some(Token::RParen)
            }
            '[' => {
                self.advance(1);
                Some(Token::LBracket)
            }
            ']' => {
                self.advance(1);
                Some(Token::RBracket)
            }
            ':' => {
                self.advance(1);
                Some(Token::Colon)
            }
            ',' => {
                self.advance(1);
                Some(Token::Comma)
            }
            '\'' | '"' => {
                let quote = c;
                let end = self.rest[1..].find(quote)? + 1;
                let value = self.rest[1..end].to_string();
                self.advance(end + 1);
                Some(Token::Str(value))
            }
            c if c.is_ascii_digit() || c == '-' => {
                let end = self
                    .rest
                    .find(|c: char| !(c.is_ascii_digit() || c == '-'))
                    .unwrap_or(self.rest.len());
                let value = self.rest[..end].parse().ok()?;
                self.advance(end);
                Some(Token::Int(value))
            }
            c if c.is_alphabetic() || c == '_' => {
                let end = self
                    .rest
                    .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                    .unwrap_or(self.rest.len());
                let value = self.rest[..end].to_string();
                self.advance(end);
                Some(Token::Ident(value))
            }
            _ => None,
        }
    }

    fn advance(&mut self, n: usize) {
        self.rest = &self.rest[n..];
    }
}

/// Parse the value of the `descr` key: either a plain dtype string, or a
/// compound dtype's list of `(field name, dtype string)` tuples.
fn parse_descr_value(tok: &mut Tokenizer<'_>, text: &str) -> Result<DescrSpec, DescriptorError> {
    match tok.next() {
        Some(Token::Str(v)) => Ok(DescrSpec::Scalar(v)),
        Some(Token::LBracket) => {
            let mut fields = Vec::new();
            loop {
                match tok.next() {
                    Some(Token::RBracket) => break,
                    Some(Token::LParen) => {
                        let name = match tok.next() {
                            Some(Token::Str(s)) => s,
                            _ => return Err(DescriptorError::InvalidDtypeString(text.to_string())),
                        };
                        if tok.next() != Some(Token::Comma) {
                            return Err(DescriptorError::InvalidDtypeString(text.to_string()));
                        }
                        let field_descr = match tok.next() {
                            Some(Token::Str(s)) => s,
                            _ => return Err(DescriptorError::InvalidDtypeString(text.to_string())),
                        };
                        // Trailing comma before the closing paren, as numpy emits.
                        match tok.next() {
                            Some(Token::RParen) => {}
                            Some(Token::Comma) => {
                                if tok.next() != Some(Token::RParen) {
                                    return Err(DescriptorError::InvalidDtypeString(
                                        text.to_string(),
                                    ));
                                }
                            }
                            _ => return Err(DescriptorError::InvalidDtypeString(text.to_string())),
                        }
                        fields.push((name, field_descr));
                    }
                    Some(Token::Comma) => {}
                    _ => return Err(DescriptorError::InvalidDtypeString(text.to_string())),
                }
            }
            Ok(DescrSpec::Fields(fields))
        }
        _ => Err(DescriptorError::InvalidDtypeString(text.to_string())),
    }
}

/// Parse a numpy array-interface header dict literal.
pub fn parse(text: &str) -> Result<NumpyHeader, DescriptorError> {
    let err = || DescriptorError::InvalidNumpyHeader(text.to_string());
    let mut tok = Tokenizer::new(text);

    if tok.next() != Some(Token::LBrace) {
        return Err(err());
    }

    let mut descr: Option<DescrSpec> = None;
    let mut fortran_order: Option<bool> = None;
    let mut shape: Option<Vec<i64>> = None;
    let mut keys = Vec::new();

    loop {
        match tok.next() {
            Some(Token::RBrace) => break,
            Some(Token::Str(key)) => {
                if tok.next() != Some(Token::Colon) {
                    return Err(err());
                }
                keys.push(key.clone());
                match key.as_str() {
                    "descr" => descr = Some(parse_descr_value(&mut tok, text)?),
                    "fortran_order" => match tok.next() {
                        Some(Token::Ident(v)) if v == "True" => fortran_order = Some(true),
                        Some(Token::Ident(v)) if v == "False" => fortran_order = Some(false),
                        _ => {
                            return Err(DescriptorError::InvalidFortranOrder(text.to_string()));
                        }
                    },
                    "shape" => {
                        if tok.next() != Some(Token::LParen) {
                            return Err(DescriptorError::InvalidShape(text.to_string()));
                        }
                        let mut dims = Vec::new();
                        loop {
                            match tok.next() {
                                Some(Token::RParen) => break,
                                Some(Token::Int(n)) => {
                                    if n < 0 {
                                        return Err(DescriptorError::InvalidShape(
                                            text.to_string(),
                                        ));
                                    }
                                    dims.push(n);
                                }
                                Some(Token::Comma) => {}
                                _ => return Err(DescriptorError::InvalidShape(text.to_string())),
                            }
                        }
                        shape = Some(dims);
                    }
                    _ => return Err(err()),
                }
                match tok.next() {
                    Some(Token::Comma) => {}
                    Some(Token::RBrace) => break,
                    _ => return Err(err()),
                }
            }
            _ => return Err(err()),
        }
    }

    let mut sorted_keys = keys.clone();
    sorted_keys.sort();
    if sorted_keys != ["descr", "fortran_order", "shape"] {
        return Err(DescriptorError::WrongKeySet(keys));
    }

    Ok(NumpyHeader {
        descr: descr.ok_or_else(err)?,
        fortran_order: fortran_order.ok_or_else(err)?,
        shape: shape.ok_or_else(err)?,
    })
}
