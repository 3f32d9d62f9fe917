//! Splits a raw input line into the word tokens consumed by the execution core.
//!
//! Words are separated by blanks. Single and double quotes group characters into one
//! word and are removed; a backslash outside single quotes takes the next character
//! literally. The unquoted operators `<`, `>` and `&` always form tokens of their own,
//! so `echo hi>out` and `echo hi > out` tokenize the same way.

use crate::error::TokenizeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
    ReadingDoubleQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
        }
    }

    /// Run the machine over the whole line.
    ///
    /// Returns `TokenizeError::UnfinishedQuote` when the line ends inside a quote.
    fn make_tokens(&mut self) -> Result<Vec<String>, TokenizeError> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start | LexingState::ReadingWord => self.handle_word(ch, &mut out),
                LexingState::ReadingSingleQuote => self.handle_single_quote(ch),
                LexingState::ReadingDoubleQuote => self.handle_double_quote(ch),
            }
        }

        match self.state {
            LexingState::ReadingSingleQuote | LexingState::ReadingDoubleQuote => {
                return Err(TokenizeError::UnfinishedQuote);
            }
            LexingState::ReadingWord => self.finish_word(&mut out),
            LexingState::Start => {}
        }

        Ok(out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<String>) {
        match ch {
            ' ' | '\t' | '\n' | '\r' => {
                if self.state == LexingState::ReadingWord {
                    self.finish_word(out);
                }
            }
            '<' | '>' | '&' => {
                if self.state == LexingState::ReadingWord {
                    self.finish_word(out);
                }
                out.push(ch.to_string());
            }
            '\'' => self.state = LexingState::ReadingSingleQuote,
            '"' => self.state = LexingState::ReadingDoubleQuote,
            '\\' => {
                // A trailing backslash is kept as-is.
                let escaped = self.read_char().unwrap_or('\\');
                self.buffer.push(escaped);
                self.state = LexingState::ReadingWord;
            }
            c => {
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::ReadingWord,
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) {
        match ch {
            '"' => self.state = LexingState::ReadingWord,
            '\\' if matches!(self.input.get(self.pos), Some('"' | '\\')) => {
                if let Some(escaped) = self.read_char() {
                    self.buffer.push(escaped);
                }
            }
            c => self.buffer.push(c),
        }
    }

    fn finish_word(&mut self, out: &mut Vec<String>) {
        out.push(std::mem::take(&mut self.buffer));
        self.state = LexingState::Start;
    }
}

/// Tokenize one input line.
pub fn tokenize(line: &str) -> Result<Vec<String>, TokenizeError> {
    LexingFSM::new(line).make_tokens()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(line: &str) -> Vec<String> {
        tokenize(line).unwrap()
    }

    #[test]
    fn test_splits_on_blanks() {
        assert_eq!(toks("  ls   -l\t/tmp \n"), vec!["ls", "-l", "/tmp"]);
        assert!(toks("   ").is_empty());
    }

    #[test]
    fn test_quotes_group_words() {
        assert_eq!(toks("echo 'a b' \"c d\""), vec!["echo", "a b", "c d"]);
        assert_eq!(toks("echo pre'fix'\"ed\""), vec!["echo", "prefixed"]);
        assert_eq!(toks("echo ''"), vec!["echo", ""]);
    }

    #[test]
    fn test_operators_stand_alone() {
        assert_eq!(toks("echo hi>out.txt"), vec!["echo", "hi", ">", "out.txt"]);
        assert_eq!(toks("cat<in"), vec!["cat", "<", "in"]);
        assert_eq!(toks("sleep 1&"), vec!["sleep", "1", "&"]);
    }

    #[test]
    fn test_quoted_operators_are_words() {
        assert_eq!(toks("echo 'a>b'"), vec!["echo", "a>b"]);
    }

    #[test]
    fn test_backslash_escapes() {
        assert_eq!(toks(r"echo a\ b"), vec!["echo", "a b"]);
        assert_eq!(toks(r#"echo "say \"hi\"""#), vec!["echo", "say \"hi\""]);
        assert_eq!(toks(r"echo \>"), vec!["echo", ">"]);
    }

    #[test]
    fn test_unterminated_quote_is_an_error() {
        assert_eq!(tokenize("echo 'oops"), Err(TokenizeError::UnfinishedQuote));
        assert_eq!(tokenize("echo \"oops"), Err(TokenizeError::UnfinishedQuote));
    }
}
