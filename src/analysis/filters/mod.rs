pub mod length;
pub mod lowercase;
pub mod markup;
pub mod ngram;
pub mod punctuation;
pub mod stopword;
