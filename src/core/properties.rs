//! Line-oriented `key=value` encoding shared by the file endpoint and the
//! client's disk snapshots.

use std::collections::BTreeMap;

/// Render properties as `key=value` lines, sorted by key.
///
/// Separators, backslashes and control characters are escaped so that
/// [`parse`] reads back exactly the same map.
pub fn render(properties: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in properties {
        escape_into(&mut out, key, true);
        out.push('=');
        escape_into(&mut out, value, false);
        out.push('\n');
    }
    out
}

/// Parse `key=value` (or `key:value`) lines.
///
/// Blank lines and lines starting with `#` or `!` are skipped. A line without
/// a separator is a key with an empty value.
pub fn parse(text: &str) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let split = find_separator(line);
        let (raw_key, raw_value) = match split {
            Some(index) => (&line[..index], &line[index + 1..]),
            None => (line, ""),
        };

        properties.insert(
            unescape(raw_key.trim_end()),
            unescape(raw_value.trim_start()),
        );
    }
    properties
}

fn escape_into(out: &mut String, text: &str, is_key: bool) {
    for (index, ch) in text.chars().enumerate() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '=' | ':' | '#' | '!' if is_key => {
                out.push('\\');
                out.push(ch);
            }
            ' ' if is_key || index == 0 => out.push_str("\\ "),
            _ => out.push(ch),
        }
    }
}

fn find_separator(line: &str) -> Option<usize> {
    let mut escaped = false;
    for (index, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '=' | ':' => return Some(index),
            _ => {}
        }
    }
    None
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_sorted_lines() {
        let mut props = BTreeMap::new();
        props.insert("timeout".to_string(), "30".to_string());
        props.insert("host".to_string(), "db.internal".to_string());

        assert_eq!(render(&props), "host=db.internal\ntimeout=30\n");
    }

    #[test]
    fn test_special_characters_survive() {
        let mut props = BTreeMap::new();
        props.insert("url:primary".to_string(), "jdbc:mysql://h/db?a=b".to_string());
        props.insert("multi line".to_string(), " leading\nnext\\end".to_string());

        assert_eq!(parse(&render(&props)), props);
    }

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let text = "# generated\n\n! legacy comment\nkey = value\nflag\nother:1\n";
        let props = parse(text);

        assert_eq!(props.len(), 3);
        assert_eq!(props["key"], "value");
        assert_eq!(props["flag"], "");
        assert_eq!(props["other"], "1");
    }
}
