//! Text clean-up applied to raw model output before anything tries to parse it.
//!
//! Every rule is a plain regex pass; the order matters because later rules
//! clean up what earlier removals leave behind. Nothing here can fail.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::limits::TRIMMED_PREFIX_LOG_CHARS;

static FENCE_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+.-]*[ \t]*\r?\n(.*?)\r?\n?[ \t]*```").expect("fence block regex")
});
static FENCE_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*```[A-Za-z0-9_+.-]*[ \t]*$\n?").expect("fence line regex")
});
static SERVICE_CONFIG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)(?:export\s+)?(?:const|let|var)\s+[A-Za-z_$]*(?i:firebase)[A-Za-z0-9_$]*(?i:config)[A-Za-z0-9_$]*\s*(?::\s*[A-Za-z_$][\w$.<>]*\s*)?=\s*\{.*?\}\s*;?",
    )
    .expect("service config regex")
});
static INIT_DECL_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:export\s+)?(?:const|let|var)\s+[A-Za-z_$][\w$]*\s*=[^\n]*\b(?:firebase\s*\.\s*)?initializeApp\s*\([^\n]*$\n?",
    )
    .expect("init declaration regex")
});
static INIT_CALL_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:firebase\s*\.\s*)?initializeApp\s*\([^\n]*\)\s*;?[ \t]*$\n?")
        .expect("init call regex")
});
static PLATFORM_ID_DQ_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""\d+:\d+:(?:android|ios|web)(?::[0-9A-Za-z]*)*""#).expect("platform id regex")
});
static PLATFORM_ID_SQ_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"'\d+:\d+:(?:android|ios|web)(?::[0-9A-Za-z]*)*'").expect("platform id regex")
});
static PLACEHOLDER_DQ_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#""(?:YOUR_[A-Z0-9_]+|<[A-Za-z0-9_ -]*(?:YOUR|your)[A-Za-z0-9_ -]*>|your[-_][a-z0-9_-]+|x{6,}|X{6,})""#,
    )
    .expect("placeholder regex")
});
static PLACEHOLDER_SQ_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"'(?:YOUR_[A-Z0-9_]+|<[A-Za-z0-9_ -]*(?:YOUR|your)[A-Za-z0-9_ -]*>|your[-_][a-z0-9_-]+|x{6,}|X{6,})'",
    )
    .expect("placeholder regex")
});
static DANGLING_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[ \t]*(?:export\s+)?(?:const|let|var)\s+[A-Za-z_$][\w$]*\s*=\s*(;)?\s*$")
        .expect("dangling declaration regex")
});
static STATEMENT_START_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:const|let|var|function|async\s+function|export|import|class|interface|type\s|\}|//|/\*)")
        .expect("statement start regex")
});
static REPEATED_COMMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(?:\s*,)+").expect("repeated comma regex"));
static COMMA_BEFORE_CLOSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*[}\]])").expect("comma before close regex"));
static OPEN_BRACE_COMMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\s*,").expect("open brace comma regex"));
static BLANK_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n(?:[ \t]*\r?\n){3,}").expect("blank run regex"));
static ANCHOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*(?:export\s+default\b|export\s+(?:const|let|var|function|async\s+function|class|interface|type|enum)\b|import\s*[\w${*'"]|(?:const|let|var)\s+(?:[A-Za-z_$][\w$]*\s*(?::[^=\n]+)?=|[\[{])|(?:async\s+)?function\b|class\s+[A-Za-z_$][\w$]*\s+extends\b|(?:interface|enum)\s+[A-Za-z_$]|type\s+[A-Za-z_$][\w$]*\s*(?:<[^>\n]*>)?\s*=)"#,
    )
    .expect("anchor regex")
});

/// What the preprocessor changed, for diagnostics only.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PreprocessReport {
    pub rules_applied: Vec<&'static str>,
    /// Text dropped ahead of the first definition anchor.
    pub trimmed_prefix: Option<String>,
}

pub fn preprocess(raw: &str) -> String {
    preprocess_with_report(raw).0
}

pub fn preprocess_with_report(raw: &str) -> (String, PreprocessReport) {
    let mut report = PreprocessReport::default();
    let mut code = strip_fences(raw, &mut report);

    apply(&mut code, &SERVICE_CONFIG_RE, "", "service-config", &mut report);
    apply(&mut code, &INIT_DECL_LINE_RE, "", "init-declaration", &mut report);
    apply(&mut code, &INIT_CALL_LINE_RE, "", "init-call", &mut report);
    apply(&mut code, &PLATFORM_ID_DQ_RE, "\"\"", "platform-id", &mut report);
    apply(&mut code, &PLATFORM_ID_SQ_RE, "''", "platform-id", &mut report);
    apply(&mut code, &PLACEHOLDER_DQ_RE, "\"\"", "placeholder-credential", &mut report);
    apply(&mut code, &PLACEHOLDER_SQ_RE, "''", "placeholder-credential", &mut report);

    let without_dangling = remove_dangling_declarations(&code);
    if without_dangling != code {
        report.rules_applied.push("dangling-declaration");
        code = without_dangling;
    }

    normalize_punctuation(&mut code, &mut report);
    apply(&mut code, &BLANK_RUN_RE, "\n\n\n", "blank-lines", &mut report);

    let code = trim_to_anchor(&code, &mut report);

    if !report.rules_applied.is_empty() {
        tracing::debug!(
            target = "oracle",
            rules = ?report.rules_applied,
            trimmed = report.trimmed_prefix.is_some(),
            "preprocess applied rules"
        );
    }
    (code, report)
}

fn apply(
    code: &mut String,
    re: &Regex,
    replacement: &str,
    rule: &'static str,
    report: &mut PreprocessReport,
) {
    if re.is_match(code) {
        *code = re.replace_all(code, replacement).into_owned();
        if !report.rules_applied.contains(&rule) {
            report.rules_applied.push(rule);
        }
    }
}

fn strip_fences(raw: &str, report: &mut PreprocessReport) -> String {
    if let Some(caps) = FENCE_BLOCK_RE.captures(raw) {
        report.rules_applied.push("markdown-fence");
        return caps.get(1).map(|m| m.as_str()).unwrap_or_default().to_string();
    }
    if FENCE_LINE_RE.is_match(raw) {
        report.rules_applied.push("markdown-fence");
        return FENCE_LINE_RE.replace_all(raw, "").into_owned();
    }
    raw.to_string()
}

/// Drops `const x =` lines whose right-hand side was removed. A bare `=` at the
/// end of a line survives when the next line continues the expression.
fn remove_dangling_declarations(code: &str) -> String {
    let lines: Vec<&str> = code.split('\n').collect();
    let mut kept = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        if let Some(caps) = DANGLING_DECL_RE.captures(line) {
            let terminated = caps.get(1).is_some();
            let next = lines[idx + 1..].iter().find(|l| !l.trim().is_empty());
            let continues = next.is_some_and(|l| !STATEMENT_START_RE.is_match(l));
            if terminated || !continues {
                continue;
            }
        }
        kept.push(*line);
    }
    kept.join("\n")
}

fn normalize_punctuation(code: &mut String, report: &mut PreprocessReport) {
    loop {
        let before = code.clone();
        apply(code, &REPEATED_COMMA_RE, ",", "punctuation", report);
        apply(code, &OPEN_BRACE_COMMA_RE, "{", "punctuation", report);
        apply(code, &COMMA_BEFORE_CLOSE_RE, "$1", "punctuation", report);
        if *code == before {
            break;
        }
    }
}

fn trim_to_anchor(code: &str, report: &mut PreprocessReport) -> String {
    let Some(found) = ANCHOR_RE.find(code) else {
        return code.trim().to_string();
    };
    let prefix = &code[..found.start()];
    if !prefix.trim().is_empty() {
        let shown: String = prefix.trim().chars().take(TRIMMED_PREFIX_LOG_CHARS).collect();
        tracing::debug!(target = "oracle", prefix = %shown, "trimmed text before first definition");
        report.trimmed_prefix = Some(prefix.trim().to_string());
        report.rules_applied.push("leading-text");
    }
    code[found.start()..].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPONENT: &str = "export default function App() {\n  return <Text>hi</Text>;\n}";

    #[test]
    fn strips_firebase_config_and_platform_ids() {
        let raw = format!(
            "const firebaseConfig = {{ apiKey: \"x\", appId: \"1:206306883902:android:1878b63e74585e92abd46f\" }};\n{COMPONENT}"
        );
        let out = preprocess(&raw);
        assert!(!out.contains("firebaseConfig"), "{out}");
        assert!(!out.contains("206306883902"), "{out}");
        assert!(out.contains("export default function App()"));
    }

    #[test]
    fn removes_init_declarations_without_leaving_dangling_equals() {
        let raw = format!(
            "import {{ initializeApp }} from 'firebase/app';\nconst firebaseConfig = {{\n  apiKey: \"YOUR_API_KEY\",\n}};\nconst app = initializeApp(firebaseConfig);\ninitializeApp(firebaseConfig);\n{COMPONENT}"
        );
        let out = preprocess(&raw);
        assert!(!out.contains("initializeApp(firebaseConfig)"), "{out}");
        assert!(!out.contains("const app ="), "{out}");
        assert!(out.starts_with("import { initializeApp }"));
    }

    #[test]
    fn replaces_placeholder_credentials() {
        let out = preprocess("const settings = { key: 'YOUR_API_KEY', project: \"your-project-id\" };");
        assert_eq!(out, "const settings = { key: '', project: \"\" };");
    }

    #[test]
    fn drops_dangling_declarations_but_keeps_multiline_initializers() {
        let out = preprocess("const orphan =\nconst styles =\n  StyleSheet.create({});\nconst gone = ;\nfunction App() {}");
        assert_eq!(out, "const styles =\n  StyleSheet.create({});\nfunction App() {}");
    }

    #[test]
    fn normalizes_comma_debris() {
        let out = preprocess("const a = { , x: 1,, y: 2, };\nconst b = [1, 2,];");
        assert_eq!(out, "const a = { x: 1, y: 2 };\nconst b = [1, 2];");
    }

    #[test]
    fn trims_leading_prose_and_fences() {
        let raw = format!("Here is your tracker!\n\n```tsx\n{COMPONENT}\n```\nEnjoy.");
        let (out, report) = preprocess_with_report(&raw);
        assert_eq!(out, COMPONENT);
        assert!(report.rules_applied.contains(&"markdown-fence"));

        let (out, report) = preprocess_with_report(&format!("Sure, here you go:\n{COMPONENT}"));
        assert_eq!(out, COMPONENT);
        assert_eq!(report.trimmed_prefix.as_deref(), Some("Sure, here you go:"));
    }

    #[test]
    fn collapses_blank_runs() {
        let out = preprocess("const a = 1;\n\n\n\n\n\nconst b = 2;");
        assert_eq!(out, "const a = 1;\n\n\nconst b = 2;");
    }

    #[test]
    fn returns_input_when_no_anchor() {
        assert_eq!(preprocess("just words"), "just words");
    }

    #[test]
    fn is_idempotent_on_realistic_output() {
        let raw = "Okay!\n```jsx\nimport React, { useState } from 'react';\nconst firebaseConfig = { apiKey: 'xxxxxxxx', };\nconst app = initializeApp(firebaseConfig);\n\n\n\n\nconst KEY = 'water';\nexport default function Tracker() {\n  const [n, setN] = useState(0);\n  return <Text>{n}</Text>;\n}\n```";
        let once = preprocess(raw);
        assert_eq!(preprocess(&once), once);
        assert!(once.contains("const KEY = 'water';"));
    }
}
