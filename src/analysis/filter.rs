use crate::analysis::token::Token;

/// Rewrites raw text before tokenization
pub trait CharFilter: Send + Sync {
    fn filter(&self, text: &str) -> String;

    fn name(&self) -> &str;
}

pub trait TokenFilter: Send + Sync {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token>;

    fn name(&self) -> &str;
}
