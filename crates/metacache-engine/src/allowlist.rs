//! Allow-list normalisation
//!
//! Queries are compared by signature: the GraphQL token stream with
//! insignificant characters removed, `__typename` selections stripped and
//! fragment names replaced by their definition index, hashed with SHA-256.
//! Tokenisation never fails; unrecognised characters become single-character
//! tokens so that a malformed query still gets a stable signature.

use metacache_core::AllowlistCollection;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Name(String),
    Punct(String),
    Literal(String),
}

impl Token {
    fn text(&self) -> &str {
        match self {
            Self::Name(s) | Self::Punct(s) | Self::Literal(s) => s,
        }
    }

    fn is_name(&self, name: &str) -> bool {
        matches!(self, Self::Name(n) if n == name)
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self, Self::Punct(p) if p == punct)
    }
}

fn is_name_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_name_continue(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

fn is_number_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-')
}

fn block_quote_at(chars: &[char], at: usize) -> bool {
    chars.get(at..).is_some_and(|rest| rest.starts_with(&['"'; 3]))
}

fn tokenize(query: &str) -> Vec<Token> {
    let chars: Vec<char> = query.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() || c == ',' || c == '\u{feff}' => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '"' => {
                let start = i;
                if block_quote_at(&chars, i) {
                    i += 3;
                    while i < chars.len() && !block_quote_at(&chars, i) {
                        i += if chars[i] == '\\' { 2 } else { 1 };
                    }
                    i = (i + 3).min(chars.len());
                } else {
                    i += 1;
                    while i < chars.len() && chars[i] != '"' && chars[i] != '\n' {
                        i += if chars[i] == '\\' { 2 } else { 1 };
                    }
                    i = (i + 1).min(chars.len());
                }
                tokens.push(Token::Literal(chars[start..i].iter().collect()));
            }
            '.' if chars.get(i + 1) == Some(&'.') && chars.get(i + 2) == Some(&'.') => {
                tokens.push(Token::Punct("...".to_string()));
                i += 3;
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_continue(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            c if c == '-' || c.is_ascii_digit() => {
                let start = i;
                i += 1;
                while i < chars.len() && is_number_continue(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Literal(chars[start..i].iter().collect()));
            }
            other => {
                tokens.push(Token::Punct(other.to_string()));
                i += 1;
            }
        }
    }
    tokens
}

/// Drop `__typename` and `alias: __typename` selections outside arguments
fn strip_typename(tokens: Vec<Token>) -> Vec<Token> {
    let mut kept: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut paren_depth = 0usize;

    for token in tokens {
        if token.is_punct("(") {
            paren_depth += 1;
        } else if token.is_punct(")") {
            paren_depth = paren_depth.saturating_sub(1);
        }

        if paren_depth == 0 && token.is_name("__typename") {
            let n = kept.len();
            let aliased =
                n >= 2 && kept[n - 1].is_punct(":") && matches!(kept[n - 2], Token::Name(_));
            if aliased {
                kept.truncate(n - 2);
            }
            continue;
        }
        kept.push(token);
    }
    kept
}

/// Replace fragment names with their position in definition order
fn canonicalize_fragments(mut tokens: Vec<Token>) -> Vec<Token> {
    let mut names: BTreeMap<String, String> = BTreeMap::new();
    let mut brace_depth = 0usize;

    for window in tokens.windows(2) {
        if window[0].is_punct("{") {
            brace_depth += 1;
        } else if window[0].is_punct("}") {
            brace_depth = brace_depth.saturating_sub(1);
        }
        if brace_depth == 0 && window[0].is_name("fragment") {
            if let Token::Name(name) = &window[1] {
                let canonical = format!("f{}", names.len());
                names.entry(name.clone()).or_insert(canonical);
            }
        }
    }
    if names.is_empty() {
        return tokens;
    }

    let mut previous: Option<Token> = None;
    for token in tokens.iter_mut() {
        let follows_keyword = previous
            .as_ref()
            .is_some_and(|p| p.is_name("fragment") || p.is_punct("..."));
        let current = token.clone();
        if follows_keyword {
            if let Token::Name(name) = token {
                if let Some(canonical) = names.get(name.as_str()) {
                    *name = canonical.clone();
                }
            }
        }
        previous = Some(current);
    }
    tokens
}

/// Normalised form of a query document
pub fn normalize_query(query: &str) -> String {
    let tokens = canonicalize_fragments(strip_typename(tokenize(query)));
    tokens.iter().map(Token::text).collect::<Vec<_>>().join(" ")
}

/// SHA-256 hex digest of the normalised query
pub fn query_signature(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(query).as_bytes());
    hex::encode(hasher.finalize())
}

/// Deduplicated signatures of every query in every collection
pub fn build_allowlist(collections: &[AllowlistCollection]) -> BTreeSet<String> {
    collections
        .iter()
        .flat_map(|collection| collection.queries.iter())
        .map(|listed| query_signature(&listed.query))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use metacache_core::ListedQuery;
    use pretty_assertions::assert_eq;

    #[test]
    fn whitespace_commas_and_comments_are_insignificant() {
        let a = "query Posts { posts(limit: 10, offset: 0) { id title } }";
        let b = "query Posts {\n  # all posts\n  posts(limit: 10 offset: 0) {\n    \
                 id,\n    title\n  }\n}";
        assert_eq!(normalize_query(a), normalize_query(b));
        assert_eq!(query_signature(a), query_signature(b));
    }

    #[test]
    fn string_contents_are_preserved() {
        let a = r#"{ posts(where: {title: {_eq: "a  b"}}) { id } }"#;
        let b = r#"{ posts(where: {title: {_eq: "a b"}}) { id } }"#;
        assert_ne!(query_signature(a), query_signature(b));
        assert!(normalize_query(a).contains("\"a  b\""));
    }

    #[test]
    fn typename_selections_are_stripped() {
        let plain = "{ users { id name } }";
        let with_typename = "{ __typename users { id kind: __typename name } }";
        assert_eq!(normalize_query(plain), normalize_query(with_typename));
    }

    #[test]
    fn fragment_names_are_canonical() {
        let a = "query { users { ...UserFields } } fragment UserFields on users { id }";
        let b = "query { users { ...U } } fragment U on users { id }";
        assert_eq!(normalize_query(a), normalize_query(b));
        assert_eq!(
            normalize_query(b),
            "query { users { ... f0 } } fragment f0 on users { id }"
        );
    }

    #[test]
    fn field_named_fragment_is_untouched() {
        let query = "{ notes { fragment } }";
        assert_eq!(normalize_query(query), "{ notes { fragment } }");
    }

    fn listed(name: &str, query: &str) -> ListedQuery {
        ListedQuery { name: name.to_string(), query: query.to_string() }
    }

    #[test]
    fn allowlist_deduplicates_across_collections() {
        let collections = vec![
            AllowlistCollection {
                name: "web".to_string(),
                queries: vec![
                    listed("users", "{ users { id } }"),
                    listed("posts", "{ posts { id } }"),
                ],

            },
            AllowlistCollection {
                name: "mobile".to_string(),
                queries: vec![listed("users", "{users{id}}")],
            },
        ];
        let allowlist = build_allowlist(&collections);
        assert_eq!(allowlist.len(), 2);
        assert!(allowlist.contains(&query_signature("{ users { id } }")));
    }

    #[test]
    fn unterminated_input_still_has_a_signature() {
        let unterminated = "{ users(name: \"open";
        assert_eq!(query_signature(unterminated), query_signature(unterminated));

        assert!(!normalize_query("{ users ~ }").is_empty());
    }
}
