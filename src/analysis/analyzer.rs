use std::collections::{BTreeMap, BTreeSet};
use crate::analysis::filter::{CharFilter, TokenFilter};
use crate::analysis::filters::length::LengthFilter;
use crate::analysis::filters::lowercase::LowercaseFilter;
use crate::analysis::filters::markup::MarkupStripFilter;
use crate::analysis::filters::ngram::NGramFilter;
use crate::analysis::filters::punctuation::PunctuationFilter;
use crate::analysis::filters::stopword::StopWordFilter;
use crate::analysis::token::Token;
use crate::analysis::tokenizer::{KeywordTokenizer, Tokenizer, WhitespaceTokenizer};

/// Text analysis pipeline: char filters, then a tokenizer, then token filters
pub struct Analyzer {
    pub char_filters: Vec<Box<dyn CharFilter>>,
    pub tokenizer: Box<dyn Tokenizer>,
    pub filters: Vec<Box<dyn TokenFilter>>,
    pub name: String,
}

impl Analyzer {
    pub fn new(name: String, tokenizer: Box<dyn Tokenizer>) -> Self {
        Analyzer {
            char_filters: Vec::new(),
            tokenizer,
            filters: Vec::new(),
            name,
        }
    }

    pub fn add_char_filter(mut self, filter: Box<dyn CharFilter>) -> Self {
        self.char_filters.push(filter);
        self
    }

    pub fn add_filter(mut self, filter: Box<dyn TokenFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn analyze(&self, text: &str) -> Vec<Token> {
        let mut text = text.to_string();
        for filter in &self.char_filters {
            text = filter.filter(&text);
        }

        let mut tokens = self.tokenizer.tokenize(&text);
        for filter in &self.filters {
            tokens = filter.filter(tokens);
        }

        tokens
    }

    /// Distinct analysed terms, sorted
    pub fn terms(&self, text: &str) -> BTreeSet<String> {
        self.analyze(text).into_iter().map(|t| t.text).collect()
    }

    /// Term frequency of every analysed term
    pub fn term_frequencies(&self, text: &str) -> BTreeMap<String, u32> {
        let mut counts = BTreeMap::new();
        for token in self.analyze(text) {
            *counts.entry(token.text).or_insert(0) += 1;
        }
        counts
    }

    /// Free-text fields: markup stripped, split on whitespace and punctuation,
    /// words over 128 bytes dropped, lowercased, English stop words dropped
    pub fn full_text() -> Self {
        Analyzer::new("full_text".to_string(), Box::new(WhitespaceTokenizer))
            .add_char_filter(Box::new(MarkupStripFilter))
            .add_filter(Box::new(PunctuationFilter))
            .add_filter(Box::new(LengthFilter::default()))
            .add_filter(Box::new(LowercaseFilter))
            .add_filter(Box::new(StopWordFilter::english()))
    }

    /// `like` postings: every character of the lowercased value
    pub fn like() -> Self {
        Analyzer::new("like".to_string(), Box::new(KeywordTokenizer))
            .add_filter(Box::new(LowercaseFilter))
            .add_filter(Box::new(NGramFilter::new(1, 1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_text_pipeline() {
        let analyzer = Analyzer::full_text();
        let counts = analyzer.term_frequencies(
            "<p>The <b>Quick</b> fox &amp; the lazy-dog.</p> Quick, QUICK!",
        );

        let expected: BTreeMap<String, u32> = [("quick", 3), ("fox", 1), ("lazy", 1), ("dog", 1)]
            .into_iter()
            .map(|(w, n)| (w.to_string(), n))
            .collect();
        assert_eq!(counts, expected);
    }

    #[test]
    fn full_text_terms_are_path_safe() {
        let terms = Analyzer::full_text().terms("../etc/passwd a.b C:\\x");
        assert!(terms.iter().all(|t| t.chars().all(char::is_alphanumeric)));
        assert!(terms.contains("etc") && terms.contains("passwd") && terms.contains("x"));
    }

    #[test]
    fn length_cap_applies_to_words_after_punctuation_split() {
        let joined = (0..100).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(",");
        assert!(joined.len() > 128);
        let long_word = "x".repeat(129);
        let terms = Analyzer::full_text().terms(&format!("{} {} fox", joined, long_word));

        assert!(terms.contains("w0") && terms.contains("w99") && terms.contains("fox"));
        assert!(!terms.contains(&long_word));
    }

    #[test]
    fn like_pipeline_yields_distinct_lowercase_chars() {
        let terms = Analyzer::like().terms("AbbA.");
        let expected: BTreeSet<String> = ["a", "b", "."].into_iter().map(String::from).collect();
        assert_eq!(terms, expected);
        assert!(Analyzer::like().terms("").is_empty());
    }
}
