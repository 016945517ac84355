//! Built-in detection patterns.
//!
//! These are the patterns a rule set starts from when it does not define
//! its own. They are plain data; compilation happens once, when the rule
//! set is loaded.

use super::PatternDef;
use crate::types::EntityCategory;

/// PII pattern families.
pub fn pii_patterns() -> Vec<PatternDef> {
    vec![
        // Email address (RFC 5322 simplified)
        PatternDef::new(
            "pii.email",
            EntityCategory::Email,
            r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
            0.95,
            0.6,
        ),
        // US phone number with optional country code
        PatternDef::new(
            "pii.phone",
            EntityCategory::Phone,
            r"(?:\+?1[-.\s]?)?(?:\([0-9]{3}\)\s?|\b[0-9]{3}[-.\s])[0-9]{3}[-.\s][0-9]{4}\b",
            0.7,
            0.5,
        ),
        // Social Security Number, separators required
        PatternDef::new(
            "pii.ssn",
            EntityCategory::Ssn,
            r"\b\d{3}[-\s]\d{2}[-\s]\d{4}\b",
            0.85,
            1.0,
        ),
        // Payment card candidates (13-19 digits); confirmed by Luhn
        PatternDef::new(
            "pii.credit_card",
            EntityCategory::CreditCard,
            r"\b(?:\d[ -]?){12,18}\d\b",
            0.95,
            1.0,
        ),
        // IBAN candidates; confirmed by ISO 7064 mod-97
        PatternDef::new(
            "pii.iban",
            EntityCategory::Iban,
            r"\b[A-Z]{2}\d{2}(?: ?[A-Z0-9]{4}){2,7}(?: ?[A-Z0-9]{1,4})?\b",
            0.9,
            0.9,
        ),
        // IPv4 address
        PatternDef::new(
            "pii.ipv4",
            EntityCategory::IpAddress,
            r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b",
            0.6,
            0.3,
        ),
        // API key / secret / token assignment
        PatternDef::new(
            "pii.credential",
            EntityCategory::Credential,
            r#"(?i)\b(api[_-]?key|secret[_-]?key|access[_-]?token|auth[_-]?token|password|secret|token)[\s:=]+['"]?[a-zA-Z0-9_\-]{16,}['"]?"#,
            0.8,
            0.9,
        ),
    ]
}

/// Prompt-injection techniques.
pub fn injection_patterns() -> Vec<PatternDef> {
    vec![
        PatternDef::new(
            "injection.override_previous",
            EntityCategory::InjectionDirect,
            r"(?i)\b(ignore|disregard|forget|override|bypass)\b[\w\s,]{0,30}\b(previous|prior|above|earlier|all|any|your)\b[\w\s,]{0,20}\b(instructions?|prompts?|rules|directions|guidelines|constraints)\b",
            0.9,
            1.0,
        ),
        PatternDef::new(
            "injection.new_instructions",
            EntityCategory::InjectionDirect,
            r"(?i)\b(new|updated|real|actual)\s+(system\s+)?instructions?\s*:",
            0.75,
            1.0,
        ),
        PatternDef::new(
            "injection.roleplay_unrestricted",
            EntityCategory::InjectionJailbreak,
            r"(?i)\b(you are now|act as|pretend (to be|you are)|roleplay as|from now on,? you)\b[^.\n]{0,60}\b(unrestricted|unfiltered|uncensored|jailbroken|without (any )?(restrictions|limits|filters|rules))",
            0.85,
            1.0,
        ),
        PatternDef::new(
            "injection.dan",
            EntityCategory::InjectionJailbreak,
            r"(?i)\bdo anything now\b|\bDAN mode\b",
            0.8,
            1.0,
        ),
        PatternDef::new(
            "injection.privileged_mode",
            EntityCategory::InjectionJailbreak,
            r"(?i)\b(developer|god|admin|debug) mode\b\s*(enabled|on|activated)?",
            0.7,
            1.0,
        ),
        PatternDef::new(
            "injection.chat_template_tokens",
            EntityCategory::InjectionDelimiter,
            r"(?i)(<\|im_(start|end)\|>|\[/?INST\]|<\|(system|assistant)\|>|<</?SYS>>)",
            0.8,
            1.0,
        ),
        PatternDef::new(
            "injection.fake_section",
            EntityCategory::InjectionDelimiter,
            r"(?im)^\s*(#{2,}|-{3,}|={3,})\s*(system|instructions?|admin)\b",
            0.7,
            1.0,
        ),
        PatternDef::new(
            "injection.prompt_extraction",
            EntityCategory::InjectionExtraction,
            r"(?i)\b(reveal|show|print|display|repeat|output|tell me|what (is|are))\b[\w\s]{0,20}\b(your|the)\s+(system\s+prompt|initial\s+(instructions|prompt)|hidden\s+(instructions|prompt)|original\s+instructions)",
            0.85,
            1.0,
        ),
    ]
}

/// Credential and secret leaks in agent output.
pub fn leak_patterns() -> Vec<PatternDef> {
    vec![
        PatternDef::new(
            "leak.api_key",
            EntityCategory::DataLeak,
            r#"(?i)\b(api[_-]?key|secret[_-]?key|access[_-]?token|auth[_-]?token|bearer|password|secret|token)[\s:=]+['"]?[a-zA-Z0-9_\-]{16,}['"]?"#,
            0.9,
            1.0,
        ),
        // All AWS access key prefixes
        PatternDef::new(
            "leak.aws_access_key",
            EntityCategory::DataLeak,
            r"\b(AKIA|ABIA|ACCA|AGPA|AIDA|AIPA|ANPA|ANVA|AROA|ASCA|ASIA)[A-Z0-9]{16}\b",
            0.95,
            1.0,
        ),
        PatternDef::new(
            "leak.private_key",
            EntityCategory::DataLeak,
            r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |ENCRYPTED )?PRIVATE KEY-----",
            0.98,
            1.0,
        ),
        PatternDef::new(
            "leak.connection_string",
            EntityCategory::DataLeak,
            r"(?i)\b(postgres(?:ql)?|mysql|mongodb(?:\+srv)?|redis|amqp)://[^\s:@/]+:[^\s@/]+@",
            0.9,
            1.0,
        ),
        PatternDef::new(
            "leak.jwt",
            EntityCategory::DataLeak,
            r"\beyJ[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}",
            0.8,
            1.0,
        ),
    ]
}
