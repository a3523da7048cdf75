//! Template resolution for step arguments.
//!
//! String values in a step's argument map may carry `{{expr}}` tokens where
//! `expr` is a dotted/indexed path rooted at `payload` (the trigger payload)
//! or `steps` (earlier step contexts, e.g. `steps[0].result.id`).
//!
//! A string that is exactly one token substitutes the value at the path
//! with its JSON type preserved; a string with embedded tokens concatenates
//! their string forms. A path that does not resolve leaves the token text
//! in place, so a missing key stays visible in the persisted step record
//! instead of silently vanishing. Nested maps and arrays are recursed into.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

/// What a step's templates resolve against.
pub struct ResolutionContext<'a> {
    /// The trigger payload.
    pub payload: &'a Value,
    /// One context object per completed step, in step order. The engine
    /// stores each step's parsed result under a `result` key.
    pub steps: &'a [Value],
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("static regex"))
}

/// Resolve every template in an argument map.
pub fn resolve_arguments(arguments: &Map<String, Value>, ctx: &ResolutionContext<'_>) -> Map<String, Value> {
    arguments
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, ctx)))
        .collect()
}

fn resolve_value(value: &Value, ctx: &ResolutionContext<'_>) -> Value {
    match value {
        Value::String(text) => resolve_string(text, ctx),
        Value::Object(map) => Value::Object(resolve_arguments(map, ctx)),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, ctx)).collect()),
        other => other.clone(),
    }
}

fn resolve_string(text: &str, ctx: &ResolutionContext<'_>) -> Value {
    let regex = token_regex();

    // Whole-string token: substitute with full type preservation.
    if let Some(captures) = regex.captures(text) {
        let full = captures.get(0).expect("match exists");
        if full.start() == 0 && full.end() == text.len() {
            let expr = captures.get(1).expect("capture exists").as_str();
            return match lookup(expr, ctx) {
                Some(value) => value,
                None => Value::String(text.to_string()),
            };
        }
    }

    // Embedded tokens: concatenate string forms, keeping unresolved tokens.
    let replaced = regex.replace_all(text, |captures: &regex::Captures<'_>| {
        let expr = captures.get(1).expect("capture exists").as_str();
        match lookup(expr, ctx) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => captures.get(0).expect("match exists").as_str().to_string(),
        }
    });
    Value::String(replaced.into_owned())
}

#[derive(Debug, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Parse `root.key[3].other` into a root name and segments.
fn parse_path(expr: &str) -> Option<(String, Vec<Segment>)> {
    let mut chars = expr.chars().peekable();
    let root = scan_ident(&mut chars)?;

    let mut segments = Vec::new();
    while let Some(&c) = chars.peek() {
        match c {
            '.' => {
                chars.next();
                segments.push(Segment::Key(scan_ident(&mut chars)?));
            }
            '[' => {
                chars.next();
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if chars.next() != Some(']') || digits.is_empty() {
                    return None;
                }
                segments.push(Segment::Index(digits.parse().ok()?));
            }
            _ => return None,
        }
    }
    Some((root, segments))
}

fn scan_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<String> {
    let mut ident = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if ident.is_empty() {
        None
    } else {
        Some(ident)
    }
}

/// Walk a path against the context. `None` when any hop misses.
fn lookup(expr: &str, ctx: &ResolutionContext<'_>) -> Option<Value> {
    let (root, segments) = parse_path(expr)?;

    let mut segments = segments.into_iter();
    let mut current: &Value = match root.as_str() {
        "payload" => ctx.payload,
        "steps" => match segments.next() {
            Some(Segment::Index(i)) => ctx.steps.get(i)?,
            _ => return None,
        },
        _ => return None,
    };

    for segment in segments {
        current = match segment {
            Segment::Key(key) => current.as_object()?.get(&key)?,
            Segment::Index(index) => current.as_array()?.get(index)?,
        };
    }
    Some(current.clone())
}
