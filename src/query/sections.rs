use crate::core::error::{Error, Result};

/// One `name:` section of a statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section<'a> {
    pub name: &'a str,
    pub inline: &'a str,       // Text after `name:` on the same line
    pub lines: Vec<&'a str>,   // Trimmed body lines of a block section
}

/// Which section names a grammar accepts, and which of them are `::`-terminated blocks
pub struct Grammar {
    pub inline: &'static [&'static str],
    pub blocks: &'static [&'static str],
}

/// Split statement text into sections. Blank lines are ignored everywhere.
pub fn split_sections<'a>(input: &'a str, grammar: &Grammar) -> Result<Vec<Section<'a>>> {
    let mut sections: Vec<Section<'a>> = Vec::new();
    let mut open_block: Option<Section<'a>> = None;

    for (number, raw) in input.lines().enumerate() {
        let line = raw.trim();

        if open_block.is_some() {
            if line == "::" {
                if let Some(block) = open_block.take() {
                    sections.push(block);
                }
            } else if !line.is_empty() {
                if let Some(block) = open_block.as_mut() {
                    block.lines.push(line);
                }
            }
            continue;
        }

        if line.is_empty() {
            continue;
        }
        if line == "::" {
            return Err(Error::validation(format!("line {}: '::' outside of a section", number + 1)));
        }

        let Some((name, rest)) = line.split_once(':') else {
            return Err(Error::validation(format!(
                "line {}: expected 'section: ...', found '{}'", number + 1, line
            )));
        };
        let name = name.trim();
        let rest = rest.trim();

        if sections.iter().any(|s| s.name == name) {
            return Err(Error::validation(format!("{}: section appears twice", name)));
        }

        if grammar.blocks.contains(&name) {
            if !rest.is_empty() {
                return Err(Error::validation(format!(
                    "{}: content goes on the following lines, terminated by '::'", name
                )));
            }
            open_block = Some(Section { name, inline: "", lines: Vec::new() });
        } else if grammar.inline.contains(&name) {
            sections.push(Section { name, inline: rest, lines: Vec::new() });
        } else {
            return Err(Error::validation(format!("line {}: unknown section '{}'", number + 1, name)));
        }
    }

    if let Some(block) = open_block {
        return Err(Error::validation(format!("{}: section is not terminated by '::'", block.name)));
    }

    Ok(sections)
}

pub fn find<'s, 'a>(sections: &'s [Section<'a>], name: &str) -> Option<&'s Section<'a>> {
    sections.iter().find(|s| s.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAMMAR: Grammar = Grammar {
        inline: &["table", "limit"],
        blocks: &["where"],
    };

    #[test]
    fn blocks_and_inline_sections() {
        let text = "table: users\n\nwhere:\n  a = 'x:y'\n\n  and b = 2\n::\nlimit: 3\n";
        let sections = split_sections(text, &GRAMMAR).unwrap();

        assert_eq!(sections.len(), 3);
        assert_eq!(find(&sections, "table").unwrap().inline, "users");
        assert_eq!(find(&sections, "where").unwrap().lines, vec!["a = 'x:y'", "and b = 2"]);
        assert_eq!(find(&sections, "limit").unwrap().inline, "3");
    }

    #[test]
    fn errors_name_the_section() {
        let unterminated = split_sections("table: t\nwhere:\n a = 1\n", &GRAMMAR).unwrap_err();
        assert!(unterminated.context.contains("where"));

        let unknown = split_sections("table: t\ncolumns: a\n", &GRAMMAR).unwrap_err();
        assert!(unknown.context.contains("columns"));

        let twice = split_sections("table: t\ntable: u\n", &GRAMMAR).unwrap_err();
        assert!(twice.context.contains("table"));

        assert!(split_sections("table: t\n::\n", &GRAMMAR).is_err());
        assert!(split_sections("where: a = 1\n::\n", &GRAMMAR).is_err());
    }
}
