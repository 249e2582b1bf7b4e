use crate::error::NotationParseError;
use crate::notation::ast::{Accidental, BarKind, NoteName};

/// Token types for one line of tune body
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Pitch
    Accidental(Accidental), // ^ ^^ _ __ =
    Note { name: NoteName, lower: bool },
    Octave(i8), // net count of ' (up) and , (down)

    // Length multiplier: 2, /, //, /4, 3/2
    Length { num: u32, den: u32 },

    // Rests
    Rest { invisible: bool }, // z, x
    MultiRest,                // Z, X

    // Chords and inline fields
    ChordStart, // [
    ChordEnd,   // ]
    InlineField { field: char, value: String },

    // Structure
    Bar(BarKind),
    Ending(u8), // [1, |1, :|2

    // Phrasing
    Tie,       // -
    SlurStart, // (
    SlurEnd,   // )
    Tuplet { p: u8, q: Option<u8>, r: Option<u8> },
    Broken(i8), // > (positive) or < (negative), repeated for dotted-dotted

    // Quoted chord symbol or annotation
    Annotation(String),

    // Beam break
    Space,
}

/// A token with its position in the source
#[derive(Debug, Clone)]
pub struct LocatedToken {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

/// Lexer for one music line of a voice
pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    input: &'a str,
    line: usize,
    column: usize,
    voice: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str, line: usize, voice: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            input,
            line,
            column: 1,
            voice,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        self.column += 1;
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next().map(|(_, c)| c)
    }

    fn remaining(&mut self) -> &'a str {
        match self.chars.peek() {
            Some((idx, _)) => &self.input[*idx..],
            None => "",
        }
    }

    fn syntax_error(&self, column: usize, message: impl Into<String>) -> NotationParseError {
        NotationParseError::Syntax {
            line: self.line,
            column,
            message: message.into(),
        }
    }

    fn unbalanced(&self, column: usize, message: impl Into<String>) -> NotationParseError {
        NotationParseError::UnbalancedVoice {
            voice: self.voice.to_string(),
            line: self.line,
            column,
            message: message.into(),
        }
    }

    /// Consume characters up to and including `close`, returning what was between.
    fn read_delimited(&mut self, close: char, column: usize, what: &str) -> Result<String, NotationParseError> {
        let mut content = String::new();
        loop {
            match self.advance() {
                Some(c) if c == close => return Ok(content),
                Some(c) => content.push(c),
                None => {
                    return Err(self.unbalanced(column, format!("Unterminated {} (missing '{}')", what, close)))
                }
            }
        }
    }

    fn read_number(&mut self) -> Option<u32> {
        let mut value: Option<u32> = None;
        while let Some(c) = self.peek() {
            let Some(digit) = c.to_digit(10) else { break };
            self.advance();
            value = Some(value.unwrap_or(0).saturating_mul(10).saturating_add(digit));
        }
        value
    }

    fn read_length(&mut self) -> Token {
        let num = self.read_number().unwrap_or(1);
        let mut den = 1u32;
        while let Some('/') = self.peek() {
            self.advance();
            match self.read_number() {
                Some(d) => den = den.saturating_mul(d),
                None => den = den.saturating_mul(2),
            }
        }
        Token::Length { num, den }
    }

    fn read_bar(&mut self, column: usize) -> Result<Vec<Token>, NotationParseError> {
        let mut run = String::new();
        while let Some(c) = self.peek() {
            if c == '|' || c == ':' {
                run.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let has_pipe = run.contains('|');
        let mut final_bar = false;
        if has_pipe && self.peek() == Some(']') {
            self.advance();
            final_bar = true;
        }

        let leading = run.chars().take_while(|c| *c == ':').count();
        let trailing = run.chars().rev().take_while(|c| *c == ':').count();
        let pipes = run.chars().filter(|c| *c == '|').count();

        let kind = if !has_pipe {
            if run.len() >= 2 {
                BarKind::RepeatBoth
            } else {
                return Err(self.syntax_error(column, "Unexpected ':'. Did you mean ':|' or '|:'?"));
            }
        } else if leading > 0 && trailing > 0 {
            BarKind::RepeatBoth
        } else if leading > 0 {
            BarKind::RepeatEnd
        } else if trailing > 0 {
            BarKind::RepeatStart
        } else if final_bar {
            BarKind::Final
        } else if pipes >= 2 {
            BarKind::Double
        } else {
            BarKind::Single
        };

        let mut tokens = vec![Token::Bar(kind)];

        // Volta number directly after the bar: |1 or :|2 or |[2
        if self.peek().is_some_and(|c| c.is_ascii_digit()) {
            let n = self.read_number().unwrap_or(1);
            tokens.push(Token::Ending(n.min(u8::MAX as u32) as u8));
        } else if self.peek() == Some('[') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            let n = self.read_number().unwrap_or(1);
            tokens.push(Token::Ending(n.min(u8::MAX as u32) as u8));
        }
        Ok(tokens)
    }

    fn read_tuplet(&mut self) -> Token {
        let p = self.read_number().unwrap_or(3).min(u8::MAX as u32) as u8;
        let mut q = None;
        let mut r = None;
        if self.peek() == Some(':') {
            self.advance();
            q = self.read_number().map(|n| n.min(u8::MAX as u32) as u8);
            if self.peek() == Some(':') {
                self.advance();
                r = self.read_number().map(|n| n.min(u8::MAX as u32) as u8);
            }
        }
        Token::Tuplet { p, q, r }
    }

    pub fn tokenize(&mut self) -> Result<Vec<LocatedToken>, NotationParseError> {
        let mut tokens = Vec::new();

        while let Some(c) = self.peek() {
            let line = self.line;
            let column = self.column;
            let mut push = |token: Token| tokens.push(LocatedToken { token, line, column });

            match c {
                // Comment runs to end of line
                '%' => break,
                // `$` is a score line-break; systems follow source lines here
                ' ' | '\t' | '$' => {
                    self.advance();
                    push(Token::Space);
                }
                '`' | 'y' | '\\' | '\r' => {
                    self.advance();
                }
                // Single-character decorations
                '.' | '~' | 'H' | 'L' | 'M' | 'O' | 'P' | 'S' | 'T' | 'u' | 'v' => {
                    self.advance();
                }
                '!' | '+' => {
                    self.advance();
                    self.read_delimited(c, column, "decoration")?;
                }
                '{' => {
                    // Grace notes are drawn small and take no time; they are not timed here
                    self.advance();
                    self.read_delimited('}', column, "grace note group")?;
                }
                '"' => {
                    self.advance();
                    let text = self.read_delimited('"', column, "annotation")?;
                    push(Token::Annotation(text));
                }
                '^' => {
                    self.advance();
                    if self.peek() == Some('^') {
                        self.advance();
                        push(Token::Accidental(Accidental::DoubleSharp));
                    } else {
                        push(Token::Accidental(Accidental::Sharp));
                    }
                }
                '_' => {
                    self.advance();
                    if self.peek() == Some('_') {
                        self.advance();
                        push(Token::Accidental(Accidental::DoubleFlat));
                    } else {
                        push(Token::Accidental(Accidental::Flat));
                    }
                }
                '=' => {
                    self.advance();
                    push(Token::Accidental(Accidental::Natural));
                }
                'A'..='G' | 'a'..='g' => {
                    self.advance();
                    let name = NoteName::from_char(c).unwrap_or_default();
                    push(Token::Note {
                        name,
                        lower: c.is_ascii_lowercase(),
                    });
                    let mut octave = 0i8;
                    let mut seen = false;
                    while let Some(mark) = self.peek() {
                        match mark {
                            '\'' => octave = octave.saturating_add(1),
                            ',' => octave = octave.saturating_sub(1),
                            _ => break,
                        }
                        seen = true;
                        self.advance();
                    }
                    if seen {
                        tokens.push(LocatedToken {
                            token: Token::Octave(octave),
                            line: self.line,
                            column,
                        });
                    }
                }
                'z' | 'x' => {
                    self.advance();
                    push(Token::Rest { invisible: c == 'x' });
                }
                'Z' | 'X' => {
                    self.advance();
                    push(Token::MultiRest);
                }
                '0'..='9' | '/' => {
                    let token = self.read_length();
                    tokens.push(LocatedToken {
                        token,
                        line: self.line,
                        column,
                    });
                }
                '-' => {
                    self.advance();
                    push(Token::Tie);
                }
                '(' => {
                    self.advance();
                    if self.peek().is_some_and(|d| d.is_ascii_digit()) {
                        let token = self.read_tuplet();
                        tokens.push(LocatedToken {
                            token,
                            line: self.line,
                            column,
                        });
                    } else {
                        push(Token::SlurStart);
                    }
                }
                ')' => {
                    self.advance();
                    push(Token::SlurEnd);
                }
                '>' | '<' => {
                    let mut count = 0i8;
                    while self.peek() == Some(c) {
                        self.advance();
                        count += 1;
                    }
                    push(Token::Broken(if c == '>' { count } else { -count }));
                }
                '|' | ':' => {
                    let bar_tokens = self.read_bar(column)?;
                    for token in bar_tokens {
                        tokens.push(LocatedToken {
                            token,
                            line: self.line,
                            column,
                        });
                    }
                }
                '[' => {
                    let rest = self.remaining();
                    let mut ahead = rest.chars().skip(1);
                    let next = ahead.next();
                    let after = ahead.next();
                    match (next, after) {
                        (Some('|'), _) => {
                            self.advance();
                            self.advance();
                            push(Token::Bar(BarKind::Start));
                        }
                        (Some(d), _) if d.is_ascii_digit() => {
                            self.advance();
                            let n = self.read_number().unwrap_or(1);
                            tokens.push(LocatedToken {
                                token: Token::Ending(n.min(u8::MAX as u32) as u8),
                                line: self.line,
                                column,
                            });
                        }
                        (Some(field), Some(':')) if field.is_ascii_alphabetic() => {
                            self.advance();
                            self.advance();
                            self.advance();
                            let value = self.read_delimited(']', column, "inline field")?;
                            tokens.push(LocatedToken {
                                token: Token::InlineField {
                                    field,
                                    value: value.trim().to_string(),
                                },
                                line: self.line,
                                column,
                            });
                        }
                        _ => {
                            self.advance();
                            push(Token::ChordStart);
                        }
                    }
                }
                ']' => {
                    self.advance();
                    push(Token::ChordEnd);
                }
                '&' => {
                    return Err(self.syntax_error(column, "Voice overlay '&' is not supported; use a separate V: voice"));
                }
                other => {
                    return Err(self.syntax_error(column, format!("Unexpected character '{}'", other)));
                }
            }
        }

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        Lexer::new(input, 1, "1")
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .filter(|t| *t != Token::Space)
            .collect()
    }

    #[test]
    fn test_notes_and_lengths() {
        let tokens = lex("C2 d/ ^F,3/2");
        assert_eq!(tokens[0], Token::Note { name: NoteName::C, lower: false });
        assert_eq!(tokens[1], Token::Length { num: 2, den: 1 });
        assert_eq!(tokens[2], Token::Note { name: NoteName::D, lower: true });
        assert_eq!(tokens[3], Token::Length { num: 1, den: 2 });
        assert_eq!(tokens[4], Token::Accidental(Accidental::Sharp));
        assert_eq!(tokens[5], Token::Note { name: NoteName::F, lower: false });
        assert_eq!(tokens[6], Token::Octave(-1));
        assert_eq!(tokens[7], Token::Length { num: 3, den: 2 });
    }

    #[test]
    fn test_double_slash_length() {
        assert_eq!(lex("C//")[1], Token::Length { num: 1, den: 4 });
    }

    #[test]
    fn test_bar_lines() {
        assert_eq!(lex("|")[0], Token::Bar(BarKind::Single));
        assert_eq!(lex("||")[0], Token::Bar(BarKind::Double));
        assert_eq!(lex("|]")[0], Token::Bar(BarKind::Final));
        assert_eq!(lex("|:")[0], Token::Bar(BarKind::RepeatStart));
        assert_eq!(lex(":|")[0], Token::Bar(BarKind::RepeatEnd));
        assert_eq!(lex("::")[0], Token::Bar(BarKind::RepeatBoth));
        assert_eq!(lex("[|")[0], Token::Bar(BarKind::Start));
        assert_eq!(lex(":|2"), vec![Token::Bar(BarKind::RepeatEnd), Token::Ending(2)]);
        assert_eq!(lex("|[1"), vec![Token::Bar(BarKind::Single), Token::Ending(1)]);
    }

    #[test]
    fn test_chord_and_inline_field() {
        let tokens = lex("[CEG]2 [K:G]");
        assert_eq!(tokens[0], Token::ChordStart);
        assert_eq!(tokens[4], Token::ChordEnd);
        assert_eq!(tokens[5], Token::Length { num: 2, den: 1 });
        assert_eq!(
            tokens[6],
            Token::InlineField { field: 'K', value: "G".to_string() }
        );
    }

    #[test]
    fn test_tuplet_and_slur() {
        let tokens = lex("(3abc (DE)");
        assert_eq!(tokens[0], Token::Tuplet { p: 3, q: None, r: None });
        assert_eq!(tokens[4], Token::SlurStart);
        assert_eq!(tokens[7], Token::SlurEnd);
        assert_eq!(lex("(3:2:4")[0], Token::Tuplet { p: 3, q: Some(2), r: Some(4) });
    }

    #[test]
    fn test_annotations_and_decorations_skip() {
        let tokens = lex("\"Am\"!trill!.A {g}B");
        assert_eq!(tokens[0], Token::Annotation("Am".to_string()));
        assert_eq!(tokens[1], Token::Note { name: NoteName::A, lower: false });
        assert_eq!(tokens[2], Token::Note { name: NoteName::B, lower: false });
    }

    #[test]
    fn test_comment_ends_line() {
        assert_eq!(lex("C D % E F").len(), 2);
    }

    #[test]
    fn test_unterminated_annotation_is_unbalanced() {
        let err = Lexer::new("\"Am C D", 4, "T1").tokenize().unwrap_err();
        assert!(matches!(
            err,
            NotationParseError::UnbalancedVoice { ref voice, line: 4, column: 1, .. } if voice == "T1"
        ));
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("C D # E", 2, "1").tokenize().unwrap_err();
        assert_eq!(
            err,
            NotationParseError::Syntax {
                line: 2,
                column: 5,
                message: "Unexpected character '#'".to_string()
            }
        );
    }
}
