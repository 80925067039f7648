use crate::analysis::filter::TokenFilter;
use crate::analysis::token::Token;

pub struct NGramFilter {
    pub min_gram: usize,
    pub max_gram: usize,
}

impl NGramFilter {
    pub fn new(min_gram: usize, max_gram: usize) -> Self {
        NGramFilter { min_gram: min_gram.max(1), max_gram }
    }
}

impl TokenFilter for NGramFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        let mut result = Vec::new();

        for token in tokens {
            let chars: Vec<(usize, char)> = token.text.char_indices().collect();

            for n in self.min_gram..=self.max_gram.min(chars.len()) {
                for i in 0..=chars.len() - n {
                    let ngram: String = chars[i..i + n].iter().map(|&(_, c)| c).collect();
                    let length = ngram.len();

                    result.push(Token {
                        text: ngram,
                        position: token.position,
                        offset: token.offset + chars[i].0,
                        length,
                    });
                }
            }
        }

        result
    }

    fn name(&self) -> &str {
        "ngram"
    }
}
