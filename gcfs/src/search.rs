use regex::RegexBuilder;

use crate::error::Result;
use crate::tree::{EntryId, Tree};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub case_sensitive: bool,
    /// Match the whole name instead of any part of it.
    pub whole_name: bool,
    /// Treat the pattern as a regular expression.
    pub regex: bool,
    pub files: bool,
    pub directories: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            case_sensitive: false,
            whole_name: false,
            regex: false,
            files: true,
            directories: true,
        }
    }
}

enum Matcher {
    Regex(regex::Regex),
    Text { pattern: String, options: SearchOptions },
}

impl Matcher {
    fn new(pattern: &str, options: &SearchOptions) -> Result<Matcher> {
        if options.regex {
            let source = if options.whole_name {
                format!("^(?:{pattern})$")
            } else {
                pattern.to_string()
            };
            let re = RegexBuilder::new(&source)
                .case_insensitive(!options.case_sensitive)
                .build()?;
            return Ok(Matcher::Regex(re));
        }
        let pattern = if options.case_sensitive {
            pattern.to_string()
        } else {
            pattern.to_lowercase()
        };
        Ok(Matcher::Text {
            pattern,
            options: options.clone(),
        })
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Matcher::Regex(re) => re.is_match(name),
            Matcher::Text { pattern, options } => {
                let folded;
                let name = if options.case_sensitive {
                    name
                } else {
                    folded = name.to_lowercase();
                    &folded
                };
                if options.whole_name {
                    name == pattern
                } else {
                    name.contains(pattern.as_str())
                }
            }
        }
    }
}

/// Entries below `start` whose names match `pattern`, in walk order.
pub fn search(tree: &Tree, start: EntryId, pattern: &str, options: &SearchOptions) -> Result<Vec<EntryId>> {
    let matcher = Matcher::new(pattern, options)?;
    let mut found = Vec::new();
    for id in tree.walk_from(start).into_iter().skip(1) {
        let entry = tree.get(id)?;
        let wanted = if entry.is_dir() {
            options.directories
        } else {
            options.files
        };
        if wanted && matcher.matches(entry.name()) {
            found.push(id);
        }
    }
    Ok(found)
}
