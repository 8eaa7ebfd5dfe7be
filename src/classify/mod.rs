//! Keyword-driven task classification and followup detection.
//!
//! Classification is an ordered rule table, not control flow: each rule is a
//! category plus trigger phrases, evaluated first-match-wins so the policy
//! can be audited and tuned in one place. A fixed trusted-only category is
//! always checked first. Deterministic and idempotent — identical input
//! always yields the identical result.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Confidence assigned to a direct trigger match.
const MATCH_CONFIDENCE: f64 = 0.9;

/// Confidence for self-referential messages (about the local project).
const SELF_REF_CONFIDENCE: f64 = 0.6;

/// Confidence when nothing matched — explicitly ambiguous.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Task category resolved by the classifier. The router maps non-trusted
/// categories onto backends through registry strength tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    /// Strategy, security, tooling, injection-shaped input — never leaves
    /// the trusted lane.
    TrustedOnly,
    Research,
    Code,
    Reasoning,
    LargeContext,
    Simple,
    Privacy,
    /// Nothing matched; general-purpose default.
    General,
}

impl TaskCategory {
    /// The registry strength tag this category routes through. `None`
    /// means the trusted backend.
    pub fn strength_tag(self) -> Option<&'static str> {
        match self {
            Self::TrustedOnly => None,
            Self::Research => Some("research"),
            Self::Code => Some("code"),
            Self::Reasoning => Some("reasoning"),
            Self::LargeContext => Some("large_context"),
            Self::Simple => Some("simple"),
            Self::Privacy => Some("privacy"),
            Self::General => Some("large_context"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrustedOnly => "trusted_only",
            Self::Research => "research",
            Self::Code => "code",
            Self::Reasoning => "reasoning",
            Self::LargeContext => "large_context",
            Self::Simple => "simple",
            Self::Privacy => "privacy",
            Self::General => "general",
        }
    }
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: TaskCategory,
    pub confidence: f64,
    /// The trigger phrase that fired, for the route reason / audit line.
    pub matched: Option<&'static str>,
}

// ── Rule table ──────────────────────────────────────────────────

/// One row of the ordered classification policy.
struct Rule {
    category: TaskCategory,
    triggers: &'static [&'static str],
}

/// Ordered policy: trusted-only first, then domain categories. First rule
/// whose any trigger matches wins.
const RULES: &[Rule] = &[
    Rule {
        category: TaskCategory::TrustedOnly,
        triggers: &[
            r"ignore\s+(?:all\s+)?(?:previous|prior)\s+instructions",
            "system prompt",
            "jailbreak",
            "strategy",
            "roadmap",
            "plan",
            "prioritize",
            "security",
            "vulnerability",
            "credentials",
            "threat model",
            "deploy",
            "infrastructure",
            "which tool",
            "orchestrate",
        ],
    },
    Rule {
        category: TaskCategory::Research,
        triggers: &[
            "research",
            "summarize",
            "summary of",
            "articles",
            "sources",
            "literature",
            "look up",
            "compare papers",
        ],
    },
    Rule {
        category: TaskCategory::Code,
        triggers: &[
            "write a function",
            "write code",
            "refactor",
            "debug",
            "implement",
            "unit test",
            "stack trace",
            "compile error",
            "code review",
        ],
    },
    Rule {
        category: TaskCategory::Reasoning,
        triggers: &[
            "prove",
            "step by step",
            "reason through",
            "logic puzzle",
            "math problem",
            "derive",
            "theorem",
        ],
    },
    Rule {
        category: TaskCategory::LargeContext,
        triggers: &[
            "entire file",
            "whole document",
            "full transcript",
            "long document",
            "all of these files",
        ],
    },
    Rule {
        category: TaskCategory::Simple,
        triggers: &[
            "quick question",
            "one sentence",
            "briefly",
            "in a word",
            "yes or no",
        ],
    },
    Rule {
        category: TaskCategory::Privacy,
        triggers: &[
            "confidential",
            "internal only",
            "do not share",
            "proprietary",
            "keep this private",
        ],
    },
];

/// Self-referential phrases: the message is about the local project, which
/// only the trusted backend can see.
const SELF_REFERENTIAL: &[&str] = &[
    "this codebase",
    "my project",
    "our repo",
    "this repository",
    "my setup",
    "our codebase",
];

/// Whether a trigger phrase carries regex metacharacters and should be
/// compiled verbatim instead of word-boundary-wrapped.
fn is_verbatim_pattern(trigger: &str) -> bool {
    trigger
        .chars()
        .any(|c| matches!(c, '\\' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '?' | '*' | '+' | '^' | '$'))
}

/// Compile a trigger: plain phrases get word-boundary semantics so "plan"
/// cannot match inside "explanation"; regex-bearing phrases are trusted
/// as written.
fn compile_trigger(trigger: &str) -> Regex {
    let pattern = if is_verbatim_pattern(trigger) {
        format!("(?i){trigger}")
    } else {
        format!(r"(?i)\b{}\b", regex::escape(trigger))
    };
    Regex::new(&pattern).unwrap()
}

struct CompiledRule {
    category: TaskCategory,
    triggers: Vec<(&'static str, Regex)>,
}

static COMPILED_RULES: LazyLock<Vec<CompiledRule>> = LazyLock::new(|| {
    RULES
        .iter()
        .map(|rule| CompiledRule {
            category: rule.category,
            triggers: rule
                .triggers
                .iter()
                .map(|t| (*t, compile_trigger(t)))
                .collect(),
        })
        .collect()
});

static SELF_REFERENTIAL_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    SELF_REFERENTIAL
        .iter()
        .map(|t| (*t, compile_trigger(t)))
        .collect()
});

/// Classify a message against the rule table.
pub fn classify(message: &str) -> Classification {
    for rule in COMPILED_RULES.iter() {
        for (phrase, re) in &rule.triggers {
            if re.is_match(message) {
                return Classification {
                    category: rule.category,
                    confidence: MATCH_CONFIDENCE,
                    matched: Some(phrase),
                };
            }
        }
    }

    for (phrase, re) in SELF_REFERENTIAL_RES.iter() {
        if re.is_match(message) {
            return Classification {
                category: TaskCategory::TrustedOnly,
                confidence: SELF_REF_CONFIDENCE,
                matched: Some(phrase),
            };
        }
    }

    Classification {
        category: TaskCategory::General,
        confidence: DEFAULT_CONFIDENCE,
        matched: None,
    }
}

// ── Followup detection ──────────────────────────────────────────

/// Leading-phrase and back-reference shapes of a conversational
/// continuation.
static FOLLOWUP_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*(?:now|also|and|then|next)[,\s]",
        r"(?i)^\s*(?:continue|again|keep going)\b",
        r"(?i)\bwhat about\b",
        r"(?i)\bthe previous\b",
        r"(?i)\bthat (?:result|answer|output|response)\b",
        r"(?i)\bsame as before\b",
        r"(?i)\btry (?:that )?again\b",
        r"(?i)\bas you (?:said|mentioned)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Whether the message reads as a continuation of the previous exchange.
pub fn is_followup(message: &str) -> bool {
    FOLLOWUP_RES.iter().any(|re| re.is_match(message))
}
