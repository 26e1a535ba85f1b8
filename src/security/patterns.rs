//! Static detection tables.
//!
//! Every table here is data: `(pattern, category, severity, description)`
//! rows and character lookup lists. Control flow lives in the scanner and
//! sanitizer. Regexes compile once, case-insensitively, on first use.

use std::sync::OnceLock;

use regex::RegexBuilder;

use super::detectors::{CompiledPattern, DetectionPattern, Severity};

// ---------------------------------------------------------------------------
// Tool description patterns
// ---------------------------------------------------------------------------

/// Cross-tool chaining, privilege escalation and exfiltration cues.
pub const TOOL_CRITICAL_PATTERNS: &[DetectionPattern] = &[
    // Cross-tool chaining
    DetectionPattern {
        pattern: r"\bbefore\s+using\s+this\s+tool\b",
        category: "cross_tool_instruction",
        severity: Severity::Critical,
        description: "Instructs the agent to act before using this tool",
    },
    DetectionPattern {
        pattern: r"\byou\s+must\s+(?:first\s+|also\s+)?(?:call|invoke|run|use)\b",
        category: "cross_tool_instruction",
        severity: Severity::Critical,
        description: "Mandates calling another tool",
    },
    DetectionPattern {
        pattern: r"\bfirst\s+(?:call|invoke|run)\b",
        category: "cross_tool_instruction",
        severity: Severity::Critical,
        description: "Orders a tool call ahead of this one",
    },
    DetectionPattern {
        pattern: r"\bthen\s+(?:execute|call|invoke|run)\b",
        category: "cross_tool_instruction",
        severity: Severity::Critical,
        description: "Chains a follow-up tool call",
    },
    DetectionPattern {
        pattern: r"\b(?:always|must)\s+(?:call|invoke|run)\s+[\w.-]+\s+(?:first|before)\b",
        category: "cross_tool_instruction",
        severity: Severity::Critical,
        description: "Forces a tool to run first",
    },
    DetectionPattern {
        pattern: r"\bafter\s+(?:calling|using|running)\s+this\s+tool,?\s+(?:call|invoke|run|execute)\b",
        category: "cross_tool_instruction",
        severity: Severity::Critical,
        description: "Chains a tool call after this one",
    },
    DetectionPattern {
        pattern: r"\binstead\s+of\s+this\s+tool,?\s+(?:call|invoke|use)\b",
        category: "cross_tool_instruction",
        severity: Severity::Critical,
        description: "Redirects the agent to another tool",
    },
    // Privilege escalation
    DetectionPattern {
        pattern: r"\bignore\s+(?:all\s+)?(?:previous|prior|above|earlier)\s+(?:instructions?|prompts?|rules)",
        category: "privilege_escalation",
        severity: Severity::Critical,
        description: "Instruction override attempt",
    },
    DetectionPattern {
        pattern: r"\byou\s+are\s+now\b",
        category: "privilege_escalation",
        severity: Severity::Critical,
        description: "Role reassignment attempt",
    },
    DetectionPattern {
        pattern: r"\bnew\s+system\s+prompt\b",
        category: "privilege_escalation",
        severity: Severity::Critical,
        description: "System prompt replacement",
    },
    DetectionPattern {
        pattern: r"\bdisregard\s+(?:all\s+)?(?:previous|prior|above|earlier)\b",
        category: "privilege_escalation",
        severity: Severity::Critical,
        description: "Instruction disregard attempt",
    },
    DetectionPattern {
        pattern: r"\bforget\s+(?:all\s+)?(?:previous|prior|your)\s+(?:instructions?|rules)",
        category: "privilege_escalation",
        severity: Severity::Critical,
        description: "Instruction reset attempt",
    },
    DetectionPattern {
        pattern: r"\boverride\s+(?:your|the|all)\s+(?:instructions?|rules|restrictions|safety)",
        category: "privilege_escalation",
        severity: Severity::Critical,
        description: "Safety override attempt",
    },
    DetectionPattern {
        pattern: r"\b(?:act|execute|run)\s+as\s+(?:an?\s+)?(?:admin|administrator|root|system)\b",
        category: "privilege_escalation",
        severity: Severity::Critical,
        description: "Elevated identity claim",
    },
    DetectionPattern {
        pattern: r"\b(?:do\s+not|don't|never)\s+(?:tell|inform|notify|alert)\s+the\s+user\b",
        category: "privilege_escalation",
        severity: Severity::Critical,
        description: "Concealment from the user",
    },
    DetectionPattern {
        pattern: r"<\s*/?\s*(?:system|important|instructions?)\s*>",
        category: "privilege_escalation",
        severity: Severity::Critical,
        description: "Embedded instruction markup",
    },
    // Exfiltration
    DetectionPattern {
        pattern: r#"\bhttps?://[^\s<>"'`)\]]+"#,
        category: "exfiltration",
        severity: Severity::Critical,
        description: "Embedded URL",
    },
    DetectionPattern {
        pattern: r"\b(?:send|post|forward|upload|transmit)\s+(?:(?:it|them|this|everything)\s+|(?:(?:the|all|any|your|user|session)\s+){0,2}(?:data|contents?|cookies|credentials|passwords?|tokens?|secrets?|keys?|history|conversation)\s+)?to\b",
        category: "exfiltration",
        severity: Severity::Critical,
        description: "Data transfer instruction",
    },
    DetectionPattern {
        pattern: r"\bexfiltrat\w*",
        category: "exfiltration",
        severity: Severity::Critical,
        description: "Explicit exfiltration",
    },
];

/// Sensitive paths and encoded content. Both have legitimate uses.
pub const TOOL_WARNING_PATTERNS: &[DetectionPattern] = &[
    DetectionPattern {
        pattern: r"~/\.ssh\b",
        category: "sensitive_path",
        severity: Severity::Warning,
        description: "SSH key directory",
    },
    DetectionPattern {
        pattern: r"~/\.aws\b",
        category: "sensitive_path",
        severity: Severity::Warning,
        description: "AWS credentials directory",
    },
    DetectionPattern {
        pattern: r"~/\.gnupg\b",
        category: "sensitive_path",
        severity: Severity::Warning,
        description: "GnuPG keyring directory",
    },
    DetectionPattern {
        pattern: r"\B\.env\b",
        category: "sensitive_path",
        severity: Severity::Warning,
        description: "Environment file",
    },
    DetectionPattern {
        pattern: r"\bprivate[_\s-]?key\b",
        category: "sensitive_path",
        severity: Severity::Warning,
        description: "Private key reference",
    },
    DetectionPattern {
        pattern: r"\bid_(?:rsa|ed25519|ecdsa)\b",
        category: "sensitive_path",
        severity: Severity::Warning,
        description: "SSH private key file",
    },
    DetectionPattern {
        pattern: r"/etc/(?:passwd|shadow)\b",
        category: "sensitive_path",
        severity: Severity::Warning,
        description: "System account database",
    },
    DetectionPattern {
        pattern: r"[A-Za-z0-9+/]{20,}={0,2}",
        category: "encoded_content",
        severity: Severity::Warning,
        description: "Base64-like run",
    },
    DetectionPattern {
        pattern: r"(?:\\u[0-9a-f]{4})+",
        category: "encoded_content",
        severity: Severity::Warning,
        description: "Unicode escape sequence",
    },
    DetectionPattern {
        pattern: r"(?:\\x[0-9a-f]{2})+",
        category: "encoded_content",
        severity: Severity::Warning,
        description: "Hex escape sequence",
    },
];

// ---------------------------------------------------------------------------
// Extracted content patterns
// ---------------------------------------------------------------------------

/// Agent-identity and jailbreak phrasing in extracted page text.
pub const OUTPUT_INJECTION_PATTERNS: &[DetectionPattern] = &[
    DetectionPattern {
        pattern: r"\bignore\s+(?:(?:all|any|previous|prior|above|earlier|your|the|these|those)\s+)*(?:instructions?|prompts?|rules|directions)",
        category: "prompt_injection",
        severity: Severity::Critical,
        description: "Instruction override attempt",
    },
    DetectionPattern {
        pattern: r"\byou\s+are\s+now\s+(?:a|an|the|in)\b",
        category: "prompt_injection",
        severity: Severity::Critical,
        description: "Role reassignment attempt",
    },
    DetectionPattern {
        pattern: r"\bpretend\s+(?:to\s+be|you\s+are)\b",
        category: "prompt_injection",
        severity: Severity::Critical,
        description: "Impersonation request",
    },
    DetectionPattern {
        pattern: r"\bbypass\s+(?:(?:all|any|your|the|safety|content)\s+)*(?:restrictions|filters|safety|security|guardrails|rules)",
        category: "prompt_injection",
        severity: Severity::Critical,
        description: "Restriction bypass attempt",
    },
    DetectionPattern {
        pattern: r"\bdisregard\s+(?:all\s+|any\s+)?(?:previous|prior|above|earlier|your)\b",
        category: "prompt_injection",
        severity: Severity::Critical,
        description: "Instruction disregard attempt",
    },
    DetectionPattern {
        pattern: r"\bnew\s+(?:system\s+)?instructions?\s*:",
        category: "prompt_injection",
        severity: Severity::Critical,
        description: "New instruction injection",
    },
    DetectionPattern {
        pattern: r"\[(?:system|assistant|inst)\]|<<\s*sys(?:tem)?\s*>>",
        category: "prompt_injection",
        severity: Severity::Critical,
        description: "Message role marker",
    },
    DetectionPattern {
        pattern: r"\b(?:jailbreak|dan\s+mode|developer\s+mode)\b",
        category: "prompt_injection",
        severity: Severity::Critical,
        description: "Known jailbreak phrasing",
    },
    DetectionPattern {
        pattern: r"\b(?:reveal|print|output|show)\s+(?:your\s+|the\s+)?(?:system\s+prompt|hidden\s+instructions)",
        category: "prompt_injection",
        severity: Severity::Critical,
        description: "Prompt exfiltration attempt",
    },
    DetectionPattern {
        pattern: r"\b(?:do\s+not|don't)\s+(?:tell|inform|alert)\s+the\s+user\b",
        category: "prompt_injection",
        severity: Severity::Critical,
        description: "Concealment from the user",
    },
    DetectionPattern {
        pattern: r"\bact\s+as\s+(?:if\s+you\s+(?:are|were)\s+)?(?:an?\s+)?(?:unrestricted|jailbroken|different)\b",
        category: "prompt_injection",
        severity: Severity::Warning,
        description: "Role play instruction",
    },
];

/// Copies of the untrusted-content markers inside page text.
pub const OUTPUT_DELIMITER_PATTERNS: &[DetectionPattern] = &[DetectionPattern {
    pattern: r"\[\s*/?\s*extracted[\s_-]*content[\s_-]*(?:start|end)\s*\]",
    category: "delimiter_spoofing",
    severity: Severity::Critical,
    description: "Embedded untrusted-content marker",
}];

/// Long escape runs and base64-like runs in extracted page text.
pub const OUTPUT_ENCODED_PATTERNS: &[DetectionPattern] = &[
    DetectionPattern {
        pattern: r"(?:\\x[0-9a-f]{2}){4,}",
        category: "encoded_content",
        severity: Severity::Warning,
        description: "Hex escape run",
    },
    DetectionPattern {
        pattern: r"(?:\\u[0-9a-f]{4}){2,}",
        category: "encoded_content",
        severity: Severity::Warning,
        description: "Unicode escape run",
    },
    DetectionPattern {
        pattern: r"(?:%[0-9a-f]{2}){6,}",
        category: "encoded_content",
        severity: Severity::Warning,
        description: "Percent-encoded run",
    },
    DetectionPattern {
        pattern: r"[A-Za-z0-9+/]{20,}={0,2}",
        category: "encoded_content",
        severity: Severity::Warning,
        description: "Base64-like run",
    },
];

// ---------------------------------------------------------------------------
// Hidden characters
// ---------------------------------------------------------------------------

/// Zero-width and invisible formatting characters.
pub const ZERO_WIDTH_CHARS: &[(char, &str)] = &[
    ('\u{200B}', "zero width space"),
    ('\u{200C}', "zero width non-joiner"),
    ('\u{200D}', "zero width joiner"),
    ('\u{FEFF}', "zero width no-break space"),
    ('\u{00AD}', "soft hyphen"),
    ('\u{180E}', "mongolian vowel separator"),
    ('\u{2060}', "word joiner"),
    ('\u{2061}', "function application"),
    ('\u{2062}', "invisible times"),
    ('\u{2063}', "invisible separator"),
    ('\u{2064}', "invisible plus"),
];

/// Bidirectional embedding, override and isolate controls.
pub const BIDI_CONTROL_CHARS: &[(char, &str)] = &[
    ('\u{202A}', "left-to-right embedding"),
    ('\u{202B}', "right-to-left embedding"),
    ('\u{202C}', "pop directional formatting"),
    ('\u{202D}', "left-to-right override"),
    ('\u{202E}', "right-to-left override"),
    ('\u{2066}', "left-to-right isolate"),
    ('\u{2067}', "right-to-left isolate"),
    ('\u{2068}', "first strong isolate"),
    ('\u{2069}', "pop directional isolate"),
];

/// Cyrillic and Greek letters that render like Latin ones:
/// `(look-alike, latin, script)`.
pub const HOMOGLYPHS: &[(char, char, &str)] = &[
    // Cyrillic uppercase
    ('\u{0410}', 'A', "cyrillic"),
    ('\u{0412}', 'B', "cyrillic"),
    ('\u{0415}', 'E', "cyrillic"),
    ('\u{041A}', 'K', "cyrillic"),
    ('\u{041C}', 'M', "cyrillic"),
    ('\u{041D}', 'H', "cyrillic"),
    ('\u{041E}', 'O', "cyrillic"),
    ('\u{0420}', 'P', "cyrillic"),
    ('\u{0421}', 'C', "cyrillic"),
    ('\u{0422}', 'T', "cyrillic"),
    ('\u{0425}', 'X', "cyrillic"),
    ('\u{0405}', 'S', "cyrillic"),
    ('\u{0406}', 'I', "cyrillic"),
    ('\u{0408}', 'J', "cyrillic"),
    // Cyrillic lowercase
    ('\u{0430}', 'a', "cyrillic"),
    ('\u{0435}', 'e', "cyrillic"),
    ('\u{043E}', 'o', "cyrillic"),
    ('\u{0440}', 'p', "cyrillic"),
    ('\u{0441}', 'c', "cyrillic"),
    ('\u{0443}', 'y', "cyrillic"),
    ('\u{0445}', 'x', "cyrillic"),
    ('\u{0455}', 's', "cyrillic"),
    ('\u{0456}', 'i', "cyrillic"),
    ('\u{0458}', 'j', "cyrillic"),
    ('\u{04BB}', 'h', "cyrillic"),
    // Greek uppercase
    ('\u{0391}', 'A', "greek"),
    ('\u{0392}', 'B', "greek"),
    ('\u{0395}', 'E', "greek"),
    ('\u{0396}', 'Z', "greek"),
    ('\u{0397}', 'H', "greek"),
    ('\u{0399}', 'I', "greek"),
    ('\u{039A}', 'K', "greek"),
    ('\u{039C}', 'M', "greek"),
    ('\u{039D}', 'N', "greek"),
    ('\u{039F}', 'O', "greek"),
    ('\u{03A1}', 'P', "greek"),
    ('\u{03A4}', 'T', "greek"),
    ('\u{03A5}', 'Y', "greek"),
    ('\u{03A7}', 'X', "greek"),
    // Greek lowercase
    ('\u{03BF}', 'o', "greek"),
    ('\u{03BD}', 'v', "greek"),
];

/// Zero-width or bidi description for `c`, if it is hidden.
pub fn hidden_char_name(c: char) -> Option<(&'static str, HiddenKind)> {
    if let Some((_, name)) = ZERO_WIDTH_CHARS.iter().find(|(z, _)| *z == c) {
        return Some((name, HiddenKind::ZeroWidth));
    }
    BIDI_CONTROL_CHARS
        .iter()
        .find(|(b, _)| *b == c)
        .map(|(_, name)| (*name, HiddenKind::DirectionOverride))
}

/// Whether `c` is stripped from extracted content.
pub fn is_hidden_char(c: char) -> bool {
    hidden_char_name(c).is_some()
}

/// Latin look-alike and script for `c`, if it is a known homoglyph.
pub fn homoglyph(c: char) -> Option<(char, &'static str)> {
    HOMOGLYPHS
        .iter()
        .find(|(h, _, _)| *h == c)
        .map(|(_, latin, script)| (*latin, *script))
}

/// Which hidden-character table a character came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiddenKind {
    /// Zero-width or invisible formatting character.
    ZeroWidth,
    /// Bidirectional control character.
    DirectionOverride,
}

// ---------------------------------------------------------------------------
// Compiled tables
// ---------------------------------------------------------------------------

/// Critical then warning tool-description patterns, compiled.
pub fn tool_description_patterns() -> &'static [CompiledPattern] {
    static PATTERNS: OnceLock<Vec<CompiledPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let mut compiled = compile_all(TOOL_CRITICAL_PATTERNS);
        compiled.extend(compile_all(TOOL_WARNING_PATTERNS));
        compiled
    })
}

/// Content marker patterns, compiled.
pub fn output_delimiter_patterns() -> &'static [CompiledPattern] {
    static PATTERNS: OnceLock<Vec<CompiledPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| compile_all(OUTPUT_DELIMITER_PATTERNS))
}

/// Injection patterns for extracted content, compiled.
pub fn output_injection_patterns() -> &'static [CompiledPattern] {
    static PATTERNS: OnceLock<Vec<CompiledPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| compile_all(OUTPUT_INJECTION_PATTERNS))
}

/// Encoded-content patterns for extracted content, compiled.
pub fn output_encoded_patterns() -> &'static [CompiledPattern] {
    static PATTERNS: OnceLock<Vec<CompiledPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| compile_all(OUTPUT_ENCODED_PATTERNS))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn compile_all(table: &[DetectionPattern]) -> Vec<CompiledPattern> {
    table
        .iter()
        .filter_map(|row| {
            match RegexBuilder::new(row.pattern).case_insensitive(true).build() {
                Ok(regex) => Some(CompiledPattern {
                    regex,
                    source: *row,
                }),
                Err(e) => {
                    tracing::warn!("Failed to compile security pattern '{}': {}", row.pattern, e);
                    None
                }
            }
        })
        .collect()
}
