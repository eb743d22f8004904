// src/tree/pattern.rs

//! Test-name patterns.
//!
//! The worker filters tests by matching a regex against the full runtime
//! name of a test: its ancestor labels joined by spaces, with a leading space
//! coming from the unnamed root suite. The same patterns identify dynamic
//! templates when matching runtime instances.

/// One label on the path to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Matched verbatim.
    Literal(&'a str),
    /// Table-driven label whose placeholders match any concrete value.
    Template(&'a str),
}

/// Build the name pattern for a node given the labels from the outermost
/// suite down to the node itself.
///
/// Leaves are anchored at both ends (`^\s?a b c$`); suites only at the start,
/// so they select every test inside.
pub fn name_pattern(segments: &[Segment<'_>], leaf: bool) -> String {
    let body: Vec<String> = segments
        .iter()
        .map(|segment| match segment {
            Segment::Literal(label) => regex::escape(label),
            Segment::Template(label) => template_regex(label),
        })
        .collect();

    let mut pattern = String::from(r"^\s?");
    pattern.push_str(&body.join(" "));
    if leaf {
        pattern.push('$');
    }
    pattern
}

/// Union of several name patterns, or `None` when there are none.
pub fn union_patterns<I, S>(patterns: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let patterns: Vec<String> = patterns
        .into_iter()
        .map(|p| p.as_ref().to_string())
        .collect();
    match patterns.len() {
        0 => None,
        1 => patterns.into_iter().next(),
        _ => Some(
            patterns
                .iter()
                .map(|p| format!("(?:{p})"))
                .collect::<Vec<_>>()
                .join("|"),
        ),
    }
}

/// The full runtime name the worker matches patterns against.
pub fn runtime_name<S: AsRef<str>>(labels: &[S]) -> String {
    let mut name = String::new();
    for label in labels {
        name.push(' ');
        name.push_str(label.as_ref());
    }
    name
}

/// Convert a table-driven label into a regex fragment.
///
/// - `%i`, `%d`, `%#`, `%$` match an integer
/// - `%f` matches a float
/// - `%s`, `%j`, `%o`, `%O`, `%p` and `$key` / `$key.path` match anything
/// - `%%` is a literal percent sign
///
/// Everything else is escaped.
pub fn template_regex(label: &str) -> String {
    let mut out = String::new();
    let mut literal = String::new();
    let chars: Vec<char> = label.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        let token = match (c, next) {
            ('%', Some('i' | 'd' | '#' | '$')) => Some((r"\d+?", 2)),
            ('%', Some('f')) => Some((r"[\d.eE+-]+?", 2)),
            ('%', Some('s' | 'j' | 'o' | 'O' | 'p')) => Some((".+?", 2)),
            ('%', Some('%')) => Some(("%", 2)),
            ('$', Some(n)) if is_key_start(n) => {
                let mut end = i + 1;
                while end < chars.len() && is_key_char(chars[end]) {
                    end += 1;
                }
                Some((".+?", end - i))
            }
            _ => None,
        };

        match token {
            Some((fragment, width)) => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(fragment);
                i += width;
            }
            None => {
                literal.push(c);
                i += 1;
            }
        }
    }

    out.push_str(&regex::escape(&literal));
    out
}

/// Whether a label contains any placeholder.
pub fn has_placeholders(label: &str) -> bool {
    template_regex(label) != regex::escape(label)
}

fn is_key_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}
