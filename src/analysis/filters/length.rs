use crate::analysis::filter::TokenFilter;
use crate::analysis::token::Token;

/// Drops tokens longer than `max` bytes
pub struct LengthFilter {
    pub max: usize,
}

impl Default for LengthFilter {
    fn default() -> Self {
        LengthFilter { max: 128 }
    }
}

impl TokenFilter for LengthFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens.into_iter()
            .filter(|token| token.length <= self.max)
            .collect()
    }

    fn name(&self) -> &str {
        "length"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tokenizer::{Tokenizer, WhitespaceTokenizer};

    #[test]
    fn long_words_are_dropped() {
        let tokens = WhitespaceTokenizer.tokenize("tiny enormous ok");
        let tokens = LengthFilter { max: 4 }.filter(tokens);
        let words: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(words, vec!["tiny", "ok"]);
        assert_eq!(tokens[1].position, 2);
    }
}
