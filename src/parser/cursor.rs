use crate::parser::QueryParseError;

/// Clause keywords that never parse as bare identifiers.
const RESERVED: &[&str] = &[
    "select", "from", "where", "group", "by", "having", "order", "top", "distinct", "inner",
    "left", "outer", "join", "on", "and", "or", "not", "is", "null", "like", "in", "as",
    "update", "set", "delete", "insert", "into", "values", "case", "when", "then", "else",
    "end", "offset", "fetch", "rows", "row", "next", "only", "with", "asc", "desc", "percent",
    "ties",
];

/// Character cursor over the SQL text. Keyword matches are
/// case-insensitive and word-bounded; identifier quoting follows the
/// `[bracketed]` form always and the `"quoted"` form when enabled.
#[derive(Debug)]
pub struct SqlCursor {
    pub position: usize,
    chars: Vec<char>,
    pub text: String,
    quoted_identifiers: bool,
}

impl SqlCursor {
    pub fn new(text: &str, quoted_identifiers: bool) -> Self {
        SqlCursor {
            position: 0,
            chars: text.chars().collect(),
            text: text.to_string(),
            quoted_identifiers,
        }
    }

    pub fn eof(&self) -> bool {
        self.position >= self.chars.len()
    }

    pub fn current(&self) -> char {
        *self.chars.get(self.position).unwrap_or(&'\0')
    }

    pub fn peek(&self, ahead: usize) -> char {
        *self.chars.get(self.position + ahead).unwrap_or(&'\0')
    }

    pub fn advance(&mut self) {
        self.position += 1;
    }

    /// Skip whitespace plus `--` and `/* */` comments.
    pub fn skip_whitespace(&mut self) {
        loop {
            while self.current().is_whitespace() {
                self.advance();
            }
            if self.current() == '-' && self.peek(1) == '-' {
                while !self.eof() && self.current() != '\n' {
                    self.advance();
                }
                continue;
            }
            if self.current() == '/' && self.peek(1) == '*' {
                self.advance();
                self.advance();
                while !self.eof() && !(self.current() == '*' && self.peek(1) == '/') {
                    self.advance();
                }
                self.advance();
                self.advance();
                continue;
            }
            break;
        }
    }

    fn is_ident_start(c: char) -> bool {
        c.is_alphabetic() || c == '_' || c == '@' || c == '#'
    }

    fn is_ident_char(c: char) -> bool {
        c.is_alphanumeric() || c == '_' || c == '@' || c == '#' || c == '$'
    }

    pub fn line_col(&self, position: usize) -> (u32, u32) {
        let mut line = 1;
        let mut col = 1;
        for c in self.chars.iter().take(position) {
            if *c == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }

    pub fn error(&self, message: impl Into<String>) -> QueryParseError {
        let (line, col) = self.line_col(self.position);
        QueryParseError { line, col, message: message.into() }
    }

    pub fn error_at(&self, position: usize, message: impl Into<String>) -> QueryParseError {
        let (line, col) = self.line_col(position);
        QueryParseError { line, col, message: message.into() }
    }

    /// True when the upcoming word is `keyword` (word-bounded).
    pub fn match_keyword(&self, keyword: &str) -> bool {
        let kw: Vec<char> = keyword.chars().collect();
        for (i, k) in kw.iter().enumerate() {
            let c = self.peek(i);
            if c.to_ascii_uppercase() != k.to_ascii_uppercase() {
                return false;
            }
        }
        !Self::is_ident_char(self.peek(kw.len()))
    }

    /// Consume `keyword` if present; skips trailing whitespace.
    pub fn take_keyword(&mut self, keyword: &str) -> bool {
        if self.match_keyword(keyword) {
            self.position += keyword.chars().count();
            self.skip_whitespace();
            true
        } else {
            false
        }
    }

    pub fn expect_keyword(&mut self, keyword: &str) -> Result<(), QueryParseError> {
        if self.take_keyword(keyword) {
            Ok(())
        } else {
            self.error(format!("expected {}", keyword.to_uppercase())).err()
        }
    }

    /// Consume a punctuation sequence if present; skips trailing whitespace.
    pub fn take_symbol(&mut self, symbol: &str) -> bool {
        let sym: Vec<char> = symbol.chars().collect();
        for (i, s) in sym.iter().enumerate() {
            if self.peek(i) != *s {
                return false;
            }
        }
        self.position += sym.len();
        self.skip_whitespace();
        true
    }

    pub fn expect_symbol(&mut self, symbol: &str) -> Result<(), QueryParseError> {
        if self.take_symbol(symbol) {
            Ok(())
        } else {
            self.error(format!("expected '{symbol}'")).err()
        }
    }

    /// One identifier part: bare word, `[bracketed]`, or `"quoted"`.
    pub fn take_identifier(&mut self) -> Result<String, QueryParseError> {
        let pivot = self.position;
        if self.current() == '[' {
            self.advance();
            let start = self.position;
            while !self.eof() && self.current() != ']' {
                self.advance();
            }
            if self.eof() {
                return self.error_at(pivot, "unterminated [identifier]").err();
            }
            let name: String = self.chars[start..self.position].iter().collect();
            self.advance();
            self.skip_whitespace();
            return Ok(name);
        }
        if self.quoted_identifiers && self.current() == '"' {
            self.advance();
            let start = self.position;
            while !self.eof() && self.current() != '"' {
                self.advance();
            }
            if self.eof() {
                return self.error_at(pivot, "unterminated \"identifier\"").err();
            }
            let name: String = self.chars[start..self.position].iter().collect();
            self.advance();
            self.skip_whitespace();
            return Ok(name);
        }
        if !Self::is_ident_start(self.current()) {
            return self.error("expected identifier").err();
        }
        let start = self.position;
        while Self::is_ident_char(self.current()) {
            self.advance();
        }
        let name: String = self.chars[start..self.position].iter().collect();
        // a reserved word directly followed by '(' is a function name
        // (LEFT, RIGHT), not a clause keyword
        if RESERVED.contains(&name.to_lowercase().as_str()) && self.current() != '(' {
            self.position = pivot;
            return self.error(format!("unexpected keyword {}", name.to_uppercase())).err();
        }
        self.skip_whitespace();
        Ok(name)
    }

    /// A bare word regardless of reservation, for symbol positions like
    /// date parts and hint names.
    pub fn take_word(&mut self) -> Result<String, QueryParseError> {
        if !Self::is_ident_start(self.current()) {
            return self.error("expected word").err();
        }
        let start = self.position;
        while Self::is_ident_char(self.current()) {
            self.advance();
        }
        let word: String = self.chars[start..self.position].iter().collect();
        self.skip_whitespace();
        Ok(word)
    }

    /// True when the next token opens an identifier.
    pub fn at_identifier(&self) -> bool {
        Self::is_ident_start(self.current())
            || self.current() == '['
            || (self.quoted_identifiers && self.current() == '"')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_word_bounded() {
        let cursor = SqlCursor::new("fromage", false);
        assert!(!cursor.match_keyword("from"));
        let cursor = SqlCursor::new("from t", false);
        assert!(cursor.match_keyword("FROM"));
    }

    #[test]
    fn bracketed_identifiers_allow_keywords() {
        let mut cursor = SqlCursor::new("[from]", false);
        assert_eq!(cursor.take_identifier().unwrap(), "from");
    }

    #[test]
    fn quoted_identifiers_honor_the_flag() {
        let mut cursor = SqlCursor::new("\"name\"", true);
        assert_eq!(cursor.take_identifier().unwrap(), "name");
        let mut cursor = SqlCursor::new("\"name\"", false);
        assert!(cursor.take_identifier().is_err());
    }

    #[test]
    fn reserved_words_do_not_parse_as_identifiers() {
        let mut cursor = SqlCursor::new("select", false);
        assert!(cursor.take_identifier().is_err());
        assert_eq!(cursor.position, 0);
    }

    #[test]
    fn comments_are_whitespace() {
        let mut cursor = SqlCursor::new("-- hi\n  /* x */ name", false);
        cursor.skip_whitespace();
        assert_eq!(cursor.take_identifier().unwrap(), "name");
    }

    #[test]
    fn line_col_tracks_newlines() {
        let cursor = SqlCursor::new("a\nbc", false);
        assert_eq!(cursor.line_col(0), (1, 1));
        assert_eq!(cursor.line_col(2), (2, 1));
        assert_eq!(cursor.line_col(3), (2, 2));
    }
}
