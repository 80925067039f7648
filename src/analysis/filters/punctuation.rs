use crate::analysis::filter::TokenFilter;
use crate::analysis::token::Token;

/// Splits tokens on every non-alphanumeric character, dropping the punctuation
pub struct PunctuationFilter;

impl TokenFilter for PunctuationFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        let mut result = Vec::new();

        for token in tokens {
            let mut start: Option<usize> = None;
            let text = token.text.as_str();
            for (i, c) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
                match (c.is_alphanumeric(), start) {
                    (true, None) => start = Some(i),
                    (false, Some(begin)) => {
                        result.push(Token::new(text[begin..i].to_string(), token.position, token.offset + begin));
                        start = None;
                    }
                    _ => {}
                }
            }
        }

        result
    }

    fn name(&self) -> &str {
        "punctuation"
    }
}
