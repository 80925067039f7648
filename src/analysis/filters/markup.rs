use std::sync::LazyLock;
use regex::Regex;
use crate::analysis::filter::CharFilter;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern compiles"));
static ENTITY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"&(#?[A-Za-z0-9]+);").expect("entity pattern compiles"));

/// Replaces markup tags with spaces and decodes the common character entities
pub struct MarkupStripFilter;

impl CharFilter for MarkupStripFilter {
    fn filter(&self, text: &str) -> String {
        let stripped = TAG.replace_all(text, " ");
        ENTITY.replace_all(&stripped, |caps: &regex::Captures| {
            match &caps[1] {
                "amp" => "&".to_string(),
                "lt" => "<".to_string(),
                "gt" => ">".to_string(),
                "quot" => "\"".to_string(),
                "apos" | "#39" => "'".to_string(),
                _ => " ".to_string(),
            }
        })
        .into_owned()
    }

    fn name(&self) -> &str {
        "markup_strip"
    }
}
