//! Content scanner: regex pattern tables plus malicious-content heuristics,
//! with an optional ML classifier and a best-effort sanitizer.
//!
//! Severity escalation: PII → medium; SQL injection or XSS → high; command
//! injection, any malicious heuristic, or an ML flag above threshold →
//! critical. The reported severity is the maximum across hits.

use crate::models::{PatternType, ProhibitedPattern, ScanResult, Severity};
use crate::PdpError;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;
use warden_core::{put_json, scan_json, Store};

/// Optional ML content classifier. Returns `(label, score)` in [0, 1] or
/// `None` when the classifier has nothing to say. Errors degrade the scan to
/// regex-only.
pub trait MlClassifier: Send + Sync {
    fn classify(&self, content: &str) -> Result<Option<(String, f64)>, String>;
}

type PatternTable = Vec<(String, Regex)>;

fn compile_table(entries: &[(&str, &str)]) -> PatternTable {
    entries
        .iter()
        .filter_map(|(name, pattern)| {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(regex) => Some((name.to_string(), regex)),
                Err(err) => {
                    warn!(target: "warden::scanner", pattern = name, error = %err, "invalid builtin pattern skipped");
                    None
                }
            }
        })
        .collect()
}

static PII_PATTERNS: Lazy<PatternTable> = Lazy::new(|| {
    compile_table(&[
        ("ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
        ("credit_card", r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b"),
        (
            "email",
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        ),
        ("phone", r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b"),
        ("password", r"password\s*[:=]\s*\S+"),
        ("api_key", r#"(api[_-]?key|apikey)\s*[:=]\s*['"]?[\w\-]+['"]?"#),
        (
            "token",
            r#"(access[_-]?token|bearer)\s*[:=]\s*['"]?[\w\-\.]+['"]?"#,
        ),
    ])
});

static SQL_PATTERNS: Lazy<PatternTable> = Lazy::new(|| {
    compile_table(&[
        ("union_select", r"\b(union|union\s+all)\s+select\b"),
        (
            "sql_keywords",
            r"\b(drop|delete|insert|update)\s+(table|database|from)\b",
        ),
        ("sql_comment", r"(--|#|/\*|\*/)"),
        ("sql_quotes", r"'[\s]*or[\s]*'[\s]*=[\s]*'"),
        ("sql_semicolon", r";[\s]*(drop|delete|insert|update)"),
    ])
});

static XSS_PATTERNS: Lazy<PatternTable> = Lazy::new(|| {
    compile_table(&[
        ("script_tag", r"(?s)<script[^>]*>.*?<\s*/\s*script[^>]*>"),
        ("javascript", r"javascript:"),
        ("event_handler", r"on\w+\s*="),
        ("iframe", r"<iframe[^>]*>"),
        ("object_tag", r"<object[^>]*>"),
        ("embed_tag", r"<embed[^>]*>"),
    ])
});

static CMD_PATTERNS: Lazy<PatternTable> = Lazy::new(|| {
    compile_table(&[
        (
            "shell_commands",
            r";\s*(rm|wget|curl|bash|sh|cat|ls|chmod|chown)\b",
        ),
        ("pipe_commands", r"\|[\s]*(rm|wget|curl|bash|sh|cat)"),
        ("redirect", r">[\s]*/"),
        ("backticks", r"`[^`]+`"),
        ("eval", r"\beval\s*\("),
    ])
});

static URL_ENCODED: Lazy<Regex> = Lazy::new(|| Regex::new(r"%[0-9A-Fa-f]{2}").unwrap());

static BASE64_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[A-Za-z0-9+/]{4}){10,}(?:[A-Za-z0-9+/]{2}==|[A-Za-z0-9+/]{3}=)?").unwrap()
});

static SANITIZE_STEPS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?is)<script[^>]*>.*?<\s*/\s*script[^>]*>",
        r#"(?i)on\w+\s*=\s*["']?[^"']*["']?"#,
        r"(?i)javascript:",
        r"(--|#|/\*|\*/)",
        r"(?is)<iframe[^>]*>.*?<\s*/\s*iframe[^>]*>",
        r"(?is)<object[^>]*>.*?<\s*/\s*object[^>]*>",
        r"(?is)<embed[^>]*>.*?<\s*/\s*embed[^>]*>",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Repository for runtime-managed prohibited patterns.
pub struct PatternRepo {
    store: Store,
}

impl PatternRepo {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Validate and persist a new pattern. Invalid regexes are rejected.
    pub fn add(
        &self,
        pattern_type: PatternType,
        pattern_regex: &str,
        severity: Severity,
        description: Option<String>,
    ) -> Result<ProhibitedPattern, PdpError> {
        Regex::new(pattern_regex)
            .map_err(|err| PdpError::InvalidInput(format!("invalid pattern regex: {err}")))?;
        let id = self.store.next_id("prohibited_patterns")?;
        let pattern = ProhibitedPattern {
            id,
            pattern_type,
            pattern_regex: pattern_regex.to_string(),
            severity,
            enabled: true,
            description,
        };
        let tree = self.store.tree("prohibited_patterns")?;
        put_json(&tree, id.to_be_bytes(), &pattern)?;
        Ok(pattern)
    }

    pub fn list(&self) -> Result<Vec<ProhibitedPattern>, PdpError> {
        let tree = self.store.tree("prohibited_patterns")?;
        Ok(scan_json(&tree, [])?)
    }

    pub fn list_enabled(&self) -> Result<Vec<ProhibitedPattern>, PdpError> {
        Ok(self.list()?.into_iter().filter(|p| p.enabled).collect())
    }
}

/// Scans content for prohibited patterns and malicious payloads.
pub struct ContentScanner {
    extra_patterns: HashMap<PatternType, PatternTable>,
    ml: Option<Arc<dyn MlClassifier>>,
    ml_threshold: f64,
}

impl Default for ContentScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentScanner {
    pub fn new() -> Self {
        Self {
            extra_patterns: HashMap::new(),
            ml: None,
            ml_threshold: 0.8,
        }
    }

    /// Attach the optional ML classifier.
    pub fn with_ml(mut self, classifier: Arc<dyn MlClassifier>, threshold: f64) -> Self {
        self.ml = Some(classifier);
        self.ml_threshold = threshold;
        self
    }

    /// Merge enabled database patterns into the builtin tables, grouped by
    /// type. Rows with invalid regexes are skipped with a warning.
    pub fn load_patterns(&mut self, repo: &PatternRepo) -> Result<usize, PdpError> {
        let mut merged = 0;
        for row in repo.list_enabled()? {
            match RegexBuilder::new(&row.pattern_regex)
                .case_insensitive(true)
                .build()
            {
                Ok(regex) => {
                    let name = row
                        .description
                        .clone()
                        .unwrap_or_else(|| format!("pattern_{}", row.id));
                    self.extra_patterns
                        .entry(row.pattern_type)
                        .or_default()
                        .push((name, regex));
                    merged += 1;
                }
                Err(err) => {
                    warn!(
                        target: "warden::scanner",
                        pattern_id = row.id,
                        error = %err,
                        "ignoring prohibited pattern with invalid regex"
                    );
                }
            }
        }
        Ok(merged)
    }

    /// Scan `content` against all pattern families.
    pub fn scan(&self, content: &str) -> ScanResult {
        if content.is_empty() {
            return ScanResult {
                safe: true,
                violations: Vec::new(),
                severity: Severity::Low,
                sanitized_text: None,
                details: BTreeMap::new(),
            };
        }

        let mut violations = Vec::new();
        let mut severity = Severity::Low;
        let mut details = BTreeMap::new();

        let pii = self.check_category(content, PatternType::Pii, &PII_PATTERNS);
        if !pii.is_empty() {
            violations.extend(pii.iter().map(|v| format!("PII: {v}")));
            details.insert("pii".to_string(), pii.join(", "));
            severity = severity.max(Severity::Medium);
        }

        let sql = self.check_category(content, PatternType::SqlInjection, &SQL_PATTERNS);
        if !sql.is_empty() {
            violations.extend(sql.iter().map(|v| format!("SQL Injection: {v}")));
            details.insert("sql_injection".to_string(), sql.join(", "));
            severity = severity.max(Severity::High);
        }

        let xss = self.check_category(content, PatternType::Xss, &XSS_PATTERNS);
        if !xss.is_empty() {
            violations.extend(xss.iter().map(|v| format!("XSS: {v}")));
            details.insert("xss".to_string(), xss.join(", "));
            severity = severity.max(Severity::High);
        }

        let cmd = self.check_category(content, PatternType::CommandInjection, &CMD_PATTERNS);
        if !cmd.is_empty() {
            violations.extend(cmd.iter().map(|v| format!("Command Injection: {v}")));
            details.insert("command_injection".to_string(), cmd.join(", "));
            severity = severity.max(Severity::Critical);
        }

        let malicious = check_malicious(content);
        if !malicious.is_empty() {
            violations.extend(malicious.iter().map(|v| format!("Malicious: {v}")));
            details.insert("malicious".to_string(), malicious.join(", "));
            severity = severity.max(Severity::Critical);
        }

        if let Some((label, score)) = self.check_ml(content) {
            violations.push(format!("ML: {label}"));
            details.insert("ml".to_string(), format!("{label} ({score:.2})"));
            severity = severity.max(Severity::Critical);
        }

        let safe = violations.is_empty();
        ScanResult {
            safe,
            sanitized_text: if safe {
                None
            } else {
                Some(self.sanitize(content))
            },
            violations,
            severity,
            details,
        }
    }

    fn check_category(
        &self,
        content: &str,
        pattern_type: PatternType,
        builtin: &PatternTable,
    ) -> Vec<String> {
        let mut hits = Vec::new();
        for (name, regex) in builtin {
            if regex.is_match(content) {
                hits.push(name.clone());
            }
        }
        if let Some(extra) = self.extra_patterns.get(&pattern_type) {
            for (name, regex) in extra {
                if regex.is_match(content) {
                    hits.push(name.clone());
                }
            }
        }
        hits
    }

    fn check_ml(&self, content: &str) -> Option<(String, f64)> {
        let classifier = self.ml.as_ref()?;
        match classifier.classify(content) {
            Ok(Some((label, score))) if score >= self.ml_threshold => Some((label, score)),
            Ok(_) => None,
            Err(err) => {
                warn!(target: "warden::scanner", error = %err, "ML content scan failed; regex-only result");
                None
            }
        }
    }

    /// Best-effort cleaned copy: strips script blocks, event handlers,
    /// `javascript:`, SQL comment tokens, iframe/object/embed blocks, and
    /// null bytes. Idempotent.
    pub fn sanitize(&self, content: &str) -> String {
        let mut sanitized = content.to_string();
        for step in SANITIZE_STEPS.iter() {
            sanitized = step.replace_all(&sanitized, "").into_owned();
        }
        sanitized.replace('\0', "")
    }
}

fn check_malicious(content: &str) -> Vec<String> {
    let mut violations = Vec::new();

    let total = content.chars().count().max(1);
    let special = content
        .chars()
        .filter(|c| !c.is_ascii_alphanumeric() && !c.is_whitespace())
        .count();
    if special as f64 / total as f64 > 0.3 {
        violations.push("excessive_special_chars".to_string());
    }

    if content.contains('\0') {
        violations.push("null_bytes".to_string());
    }

    if URL_ENCODED.find_iter(content).count() > 10 {
        violations.push("excessive_url_encoding".to_string());
    }

    if BASE64_RUN.is_match(content) {
        violations.push("base64_payload".to_string());
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_is_safe_low() {
        let result = ContentScanner::new().scan("");
        assert!(result.safe);
        assert!(result.violations.is_empty());
        assert_eq!(result.severity, Severity::Low);
        assert!(result.sanitized_text.is_none());
    }

    #[test]
    fn plain_text_is_safe_with_no_sanitized_copy() {
        let result = ContentScanner::new().scan("The concrete pour is scheduled for Monday.");
        assert!(result.safe);
        assert!(result.sanitized_text.is_none());
    }

    #[test]
    fn sql_injection_scores_high() {
        let result = ContentScanner::new().scan("'; DROP TABLE users;--");
        assert!(!result.safe);
        assert!(result.severity >= Severity::High);
        assert!(result
            .violations
            .iter()
            .any(|v| v.starts_with("SQL Injection")));
        assert!(result.sanitized_text.is_some());
    }

    #[test]
    fn pii_scores_medium() {
        let result = ContentScanner::new().scan("My SSN is 123-45-6789 thanks");
        assert!(!result.safe);
        assert_eq!(result.severity, Severity::Medium);
        assert!(result.violations.iter().any(|v| v.contains("ssn")));
    }

    #[test]
    fn command_injection_scores_critical() {
        let result = ContentScanner::new().scan("nice file; rm -rf /tmp/x");
        assert!(!result.safe);
        assert_eq!(result.severity, Severity::Critical);
    }

    #[test]
    fn sanitizer_strips_dangerous_fragments_and_is_idempotent() {
        let scanner = ContentScanner::new();
        let nasty = "<script>alert(1)</script> click <a onclick=\"x()\">here</a> javascript:void -- \0";
        let once = scanner.sanitize(nasty);
        assert!(!once.contains("<script>"));
        assert!(!once.to_lowercase().contains("javascript:"));
        assert!(!once.contains("onclick"));
        assert!(!once.contains("--"));
        assert!(!once.contains('\0'));
        assert_eq!(scanner.sanitize(&once), once);
    }

    #[test]
    fn merged_db_patterns_fire_and_invalid_rows_are_skipped() {
        let store = Store::temp().unwrap();
        let repo = PatternRepo::new(store);
        repo.add(
            PatternType::Pii,
            r"\bbadge-\d{4}\b",
            Severity::Medium,
            Some("badge_number".into()),
        )
        .unwrap();
        assert!(matches!(
            repo.add(PatternType::Xss, r"([unclosed", Severity::High, None),
            Err(PdpError::InvalidInput(_))
        ));

        let mut scanner = ContentScanner::new();
        let merged = scanner.load_patterns(&repo).unwrap();
        assert_eq!(merged, 1);
        let result = scanner.scan("operator badge-1234 reported it");
        assert!(result.violations.iter().any(|v| v.contains("badge_number")));
    }

    struct AlwaysToxic;

    impl MlClassifier for AlwaysToxic {
        fn classify(&self, _content: &str) -> Result<Option<(String, f64)>, String> {
            Ok(Some(("toxic".into(), 0.99)))
        }
    }

    struct Broken;

    impl MlClassifier for Broken {
        fn classify(&self, _content: &str) -> Result<Option<(String, f64)>, String> {
            Err("model not loaded".into())
        }
    }

    #[test]
    fn ml_flag_above_threshold_is_critical() {
        let scanner = ContentScanner::new().with_ml(Arc::new(AlwaysToxic), 0.8);
        let result = scanner.scan("totally ordinary text");
        assert!(!result.safe);
        assert_eq!(result.severity, Severity::Critical);
        assert!(result.violations.iter().any(|v| v.starts_with("ML:")));
    }

    #[test]
    fn ml_failure_degrades_to_regex_only() {
        let scanner = ContentScanner::new().with_ml(Arc::new(Broken), 0.8);
        let result = scanner.scan("totally ordinary text");
        assert!(result.safe);
    }
}
