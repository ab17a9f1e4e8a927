//! Regex repairs for literal mistakes language models make in style objects
//! and member chains. Runs after preprocessing and before the real parser.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Style keys whose numeric-looking values must stay strings.
const STRING_VALUED_NUMERIC_KEYS: &[&str] = &["fontWeight"];

static TRAILING_QUOTE_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"((?:^|[{,\n])[ \t]*)([A-Za-z_$][\w$]*)\s*:\s*(-?\d+(?:\.\d+)?)["']([ \t]*(?:[,}\r\n]|$))"#)
        .expect("trailing quote number regex")
});
static UNQUOTED_FONT_WEIGHT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bfontWeight\s*:\s*(\d{3}|bold|normal|bolder|lighter)\b")
        .expect("unquoted font weight regex")
});
static MISSING_OPEN_SQ_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"((?:^|[{,\n])[ \t]*[A-Za-z_$][\w$]*\s*:\s*)(#[0-9A-Fa-f]{3,8}|[A-Za-z][\w-]*)'([ \t]*(?:[,}\r\n]|$))")
        .expect("missing single quote regex")
});
static MISSING_OPEN_DQ_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"((?:^|[{,\n])[ \t]*[A-Za-z_$][\w$]*\s*:\s*)(#[0-9A-Fa-f]{3,8}|[A-Za-z][\w-]*)"([ \t]*(?:[,}\r\n]|$))"#)
        .expect("missing double quote regex")
});
static DANGLING_ACCESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([\w$)\]])(?:\?\.|\.)([ \t]*[)\]},;])").expect("dangling access regex")
});
static DANGLING_ACCESS_EOL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([\w$)\]])(?:\?\.|\.)[ \t]*(\r?\n\s*[)\]},;])").expect("dangling access eol regex")
});

/// Number of repairs each pass made.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AutofixReport {
    pub trailing_quote_numbers: usize,
    pub unquoted_font_weights: usize,
    pub missing_open_quotes: usize,
    pub dangling_member_access: usize,
}

impl AutofixReport {
    pub fn total(&self) -> usize {
        self.trailing_quote_numbers
            + self.unquoted_font_weights
            + self.missing_open_quotes
            + self.dangling_member_access
    }
}

pub fn autofix(src: &str) -> String {
    autofix_with_report(src).0
}

pub fn autofix_with_report(src: &str) -> (String, AutofixReport) {
    let mut report = AutofixReport::default();

    let (code, n) = replace_counting(src, &TRAILING_QUOTE_NUMBER_RE, |caps| {
        let key = &caps[2];
        let value = &caps[3];
        if STRING_VALUED_NUMERIC_KEYS.contains(&key) {
            format!("{}{key}: '{value}'{}", &caps[1], &caps[4])
        } else {
            format!("{}{key}: {value}{}", &caps[1], &caps[4])
        }
    });
    report.trailing_quote_numbers = n;

    let (code, n) = replace_counting(&code, &UNQUOTED_FONT_WEIGHT_RE, |caps| {
        format!("fontWeight: '{}'", &caps[1])
    });
    report.unquoted_font_weights = n;

    let (code, a) = replace_counting(&code, &MISSING_OPEN_SQ_RE, |caps| {
        format!("{}'{}'{}", &caps[1], &caps[2], &caps[3])
    });
    let (code, b) = replace_counting(&code, &MISSING_OPEN_DQ_RE, |caps| {
        format!("{}\"{}\"{}", &caps[1], &caps[2], &caps[3])
    });
    report.missing_open_quotes = a + b;

    let (code, a) = replace_counting(&code, &DANGLING_ACCESS_RE, |caps| {
        format!("{}{}", &caps[1], &caps[2])
    });
    let (code, b) = replace_counting(&code, &DANGLING_ACCESS_EOL_RE, |caps| {
        format!("{}{}", &caps[1], &caps[2])
    });
    report.dangling_member_access = a + b;

    if report.total() > 0 {
        tracing::debug!(target = "oracle", ?report, "autofix repaired literals");
    }
    (code, report)
}

/// Patterns consume the delimiter that follows a match, so adjacent matches
/// (`a: 1', b: 2'`) need another sweep. Every rewrite removes its own match.
fn replace_counting<F>(src: &str, re: &Regex, mut rewrite: F) -> (String, usize)
where
    F: FnMut(&Captures<'_>) -> String,
{
    let mut count = 0usize;
    let mut out = src.to_string();
    for _ in 0..MAX_SWEEPS {
        let mut swept = 0usize;
        let next = re.replace_all(&out, |caps: &Captures<'_>| {
            swept += 1;
            rewrite(caps)
        });
        if swept == 0 {
            break;
        }
        out = next.into_owned();
        count += swept;
    }
    (out, count)
}

const MAX_SWEEPS: usize = 16;
