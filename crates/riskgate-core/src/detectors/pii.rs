//! PII detection and redaction.

use crate::rules::CompiledPattern;
use crate::types::{clamp_unit, Entity, EntityCategory, Span};

use super::checksum::{iban_valid, LuhnCache};
use super::{check_size, Detector, DetectorError};

/// Pattern-based PII detector with checksum confirmation.
#[derive(Debug, Clone)]
pub struct PiiDetector {
    patterns: Vec<CompiledPattern>,
    luhn: LuhnCache,
    max_text_bytes: usize,
}

impl PiiDetector {
    pub fn new(patterns: Vec<CompiledPattern>, luhn: LuhnCache, max_text_bytes: usize) -> Self {
        Self {
            patterns,
            luhn,
            max_text_bytes,
        }
    }

    pub fn luhn_cache(&self) -> &LuhnCache {
        &self.luhn
    }

    fn confirmed(&self, category: EntityCategory, matched: &str) -> bool {
        match category {
            EntityCategory::CreditCard => self.luhn.check(matched),
            EntityCategory::Iban => iban_valid(matched),
            _ => true,
        }
    }
}

impl Detector for PiiDetector {
    fn name(&self) -> &'static str {
        "pii"
    }

    fn detect(&self, text: &str) -> Result<Vec<Entity>, DetectorError> {
        check_size(text, self.max_text_bytes)?;

        let mut candidates = Vec::new();
        for pattern in &self.patterns {
            for m in pattern.regex.find_iter(text) {
                if !self.confirmed(pattern.category, m.as_str()) {
                    continue;
                }
                candidates.push(Entity::new(
                    pattern.category,
                    Span::new(m.start(), m.end()),
                    pattern.confidence,
                    pattern.severity,
                    pattern.id.clone(),
                ));
            }
        }
        Ok(resolve_overlaps(candidates))
    }
}

/// Keep the most severe finding wherever spans overlap.
///
/// Ties go to higher confidence, then the longer span, then the earlier
/// one, so the result does not depend on pattern order.
pub fn resolve_overlaps(mut candidates: Vec<Entity>) -> Vec<Entity> {
    candidates.sort_by(|a, b| {
        b.severity
            .total_cmp(&a.severity)
            .then(b.confidence.total_cmp(&a.confidence))
            .then(b.span.len().cmp(&a.span.len()))
            .then(a.span.start.cmp(&b.span.start))
            .then(a.rule_id.cmp(&b.rule_id))
    });

    let mut kept: Vec<Entity> = Vec::with_capacity(candidates.len());
    for entity in candidates {
        if kept.iter().all(|k| !k.span.overlaps(&entity.span)) {
            kept.push(entity);
        }
    }
    kept.sort_by_key(|e| (e.span.start, e.span.end));
    kept
}

/// `min(1, Σ severity·confidence / normalization)` over PII findings.
pub fn pii_risk(entities: &[Entity], normalization: f64) -> f64 {
    if normalization <= 0.0 {
        return 0.0;
    }
    let total: f64 = entities
        .iter()
        .filter(|e| e.category.is_pii())
        .map(Entity::weight)
        .sum();
    clamp_unit(total / normalization)
}

/// Replace each finding's span with its redaction label.
///
/// Findings must not overlap; spans outside the text are skipped.
pub fn redact(text: &str, entities: &[Entity]) -> String {
    let mut spans: Vec<&Entity> = entities.iter().collect();
    spans.sort_by_key(|e| e.span.start);

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for entity in spans {
        let Span { start, end } = entity.span;
        if start < cursor || end > text.len() || !text.is_char_boundary(start) || !text.is_char_boundary(end) {
            continue;
        }
        out.push_str(&text[cursor..start]);
        out.push_str(&entity.category.redaction_label());
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}
