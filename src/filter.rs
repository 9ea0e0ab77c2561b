//! A minimal LDAP search filter: parser, AST, and entry matching.
//!
//! Scope is deliberately narrow — the subsystem only ever needs to evaluate
//! filters against in-memory [`Entry`](crate::host::Entry) implementations,
//! never to round-trip arbitrary RFC 4515 filters back to the wire. Supported
//! grammar:
//!
//! ```text
//! filter     = '(' filtercomp ')'
//! filtercomp = and / or / not / item
//! and        = '&' filter+
//! or         = '|' filter+
//! not        = '!' filter
//! item       = attr '=' value        (equality)
//!            / attr '=*'             (presence)
//!            / attr '=' value '*' value   (substrings, one '*' supported)
//! ```

use std::fmt;

use thiserror::Error;

use crate::host::{Dn, Entry};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("empty filter")]
    Empty,
    #[error("unbalanced parentheses in filter: {0}")]
    Unbalanced(String),
    #[error("malformed filter item: {0}")]
    MalformedItem(String),
}

/// A parsed LDAP search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal { attr: String, value: String },
    Present { attr: String },
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        final_: Option<String>,
    },
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(subs) => {
                write!(f, "(&")?;
                for s in subs {
                    write!(f, "{s}")?;
                }
                write!(f, ")")
            }
            Filter::Or(subs) => {
                write!(f, "(|")?;
                for s in subs {
                    write!(f, "{s}")?;
                }
                write!(f, ")")
            }
            Filter::Not(inner) => write!(f, "(!{inner})"),
            Filter::Equal { attr, value } => write!(f, "({attr}={value})"),
            Filter::Present { attr } => write!(f, "({attr}=*)"),
            Filter::Substring { attr, initial, any, final_ } => {
                write!(f, "({attr}=")?;
                if let Some(i) = initial {
                    write!(f, "{i}")?;
                }
                write!(f, "*")?;
                for a in any {
                    write!(f, "{a}*")?;
                }
                if let Some(fin) = final_ {
                    write!(f, "{fin}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl Filter {
    pub fn parse(s: &str) -> Result<Filter, FilterParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(FilterParseError::Empty);
        }
        let (filter, rest) = parse_filter(s)?;
        if !rest.trim().is_empty() {
            return Err(FilterParseError::Unbalanced(s.to_string()));
        }
        Ok(filter)
    }

    /// Every attribute type name referenced anywhere in this filter, lowercased.
    pub fn referenced_attrs(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_attrs(&mut out);
        out
    }

    fn collect_attrs(&self, out: &mut Vec<String>) {
        match self {
            Filter::And(subs) | Filter::Or(subs) => {
                for s in subs {
                    s.collect_attrs(out);
                }
            }
            Filter::Not(inner) => inner.collect_attrs(out),
            Filter::Equal { attr, .. }
            | Filter::Present { attr }
            | Filter::Substring { attr, .. } => out.push(attr.to_ascii_lowercase()),
        }
    }

    /// True if the filter would ever consult `attr_name` (case-insensitive).
    pub fn references_attr(&self, attr_name: &str) -> bool {
        let needle = attr_name.to_ascii_lowercase();
        self.referenced_attrs().iter().any(|a| a == &needle)
    }

    pub fn matches(&self, entry: &dyn Entry) -> bool {
        match self {
            Filter::And(subs) => subs.iter().all(|s| s.matches(entry)),
            Filter::Or(subs) => subs.iter().any(|s| s.matches(entry)),
            Filter::Not(inner) => !inner.matches(entry),
            Filter::Present { attr } => entry
                .get_attribute(attr)
                .map(|vs| !vs.is_empty())
                .unwrap_or(false),
            // `entrydn`/`parentdn` are operational pseudo-attributes, not
            // stored values: they match the entry's own DN / its DN's
            // parent rather than going through `get_attribute` (used by the
            // views search rewriter for parent-id-style scoping).
            Filter::Equal { attr, value } if attr.eq_ignore_ascii_case("entrydn") => entry.dn().is_equal(&Dn::new(value.clone())),
            Filter::Equal { attr, value } if attr.eq_ignore_ascii_case("parentdn") => entry
                .dn()
                .parent()
                .map(|p| p.is_equal(&Dn::new(value.clone())))
                .unwrap_or(false),
            Filter::Equal { attr, value } => entry
                .get_attribute(attr)
                .map(|vs| vs.iter().any(|v| v.eq_ignore_ascii_case(value)))
                .unwrap_or(false),
            Filter::Substring { attr, initial, any, final_ } => entry
                .get_attribute(attr)
                .map(|vs| vs.iter().any(|v| substring_matches(v, initial, any, final_)))
                .unwrap_or(false),
        }
    }
}

fn substring_matches(value: &str, initial: &Option<String>, any: &[String], final_: &Option<String>) -> bool {
    let hay = value.to_ascii_lowercase();
    let mut cursor = 0usize;
    if let Some(i) = initial {
        let i = i.to_ascii_lowercase();
        if !hay[cursor..].starts_with(&i) {
            return false;
        }
        cursor += i.len();
    }
    for a in any {
        let a = a.to_ascii_lowercase();
        match hay[cursor..].find(&a) {
            Some(pos) => cursor += pos + a.len(),
            None => return false,
        }
    }
    if let Some(fin) = final_ {
        let fin = fin.to_ascii_lowercase();
        return hay[cursor..].ends_with(&fin);
    }
    true
}

fn parse_filter(s: &str) -> Result<(Filter, &str), FilterParseError> {
    let s = s.trim_start();
    let rest = s
        .strip_prefix('(')
        .ok_or_else(|| FilterParseError::Unbalanced(s.to_string()))?;
    let (filter, rest) = parse_filtercomp(rest)?;
    let rest = rest
        .strip_prefix(')')
        .ok_or_else(|| FilterParseError::Unbalanced(s.to_string()))?;
    Ok((filter, rest))
}

fn parse_filtercomp(s: &str) -> Result<(Filter, &str), FilterParseError> {
    match s.chars().next() {
        Some('&') => {
            let (subs, rest) = parse_filter_list(&s[1..])?;
            Ok((Filter::And(subs), rest))
        }
        Some('|') => {
            let (subs, rest) = parse_filter_list(&s[1..])?;
            Ok((Filter::Or(subs), rest))
        }
        Some('!') => {
            let (inner, rest) = parse_filter(&s[1..])?;
            Ok((Filter::Not(Box::new(inner)), rest))
        }
        Some(_) => parse_item(s),
        None => Err(FilterParseError::Unbalanced(s.to_string())),
    }
}

fn parse_filter_list(mut s: &str) -> Result<(Vec<Filter>, &str), FilterParseError> {
    let mut subs = Vec::new();
    while s.trim_start().starts_with('(') {
        let (f, rest) = parse_filter(s.trim_start())?;
        subs.push(f);
        s = rest;
    }
    Ok((subs, s))
}

fn parse_item(s: &str) -> Result<(Filter, &str), FilterParseError> {
    let end = s
        .find(')')
        .ok_or_else(|| FilterParseError::MalformedItem(s.to_string()))?;
    let item = &s[..end];
    let rest = &s[end..];
    let eq = item
        .find('=')
        .ok_or_else(|| FilterParseError::MalformedItem(item.to_string()))?;
    let attr = item[..eq].trim().to_string();
    let value = &item[eq + 1..];
    if attr.is_empty() {
        return Err(FilterParseError::MalformedItem(item.to_string()));
    }
    if value == "*" {
        return Ok((Filter::Present { attr }, rest));
    }
    if value.contains('*') {
        let parts: Vec<&str> = value.split('*').collect();
        let initial = (!parts[0].is_empty()).then(|| parts[0].to_string());
        let final_ = (!parts[parts.len() - 1].is_empty())
            .then(|| parts[parts.len() - 1].to_string());
        let any = parts[1..parts.len() - 1]
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string())
            .collect();
        return Ok((
            Filter::Substring {
                attr,
                initial,
                any,
                final_,
            },
            rest,
        ));
    }
    Ok((
        Filter::Equal {
            attr,
            value: value.to_string(),
        },
        rest,
    ))
}
