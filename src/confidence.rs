//! Post-hoc confidence scoring of final text.
//!
//! A coarse trust signal, not a probability: start at 100, subtract a fixed
//! penalty per hedging phrase occurrence and a larger one per refusal
//! phrase, floor at 0. Scores below the annotation threshold are surfaced
//! to the caller but never trigger re-dispatch — that trade (latency and
//! spend for a phrase count) is deliberately not taken.

/// Penalty per hedging phrase occurrence.
const HEDGE_PENALTY: u32 = 5;

/// Penalty per refusal phrase occurrence.
const REFUSAL_PENALTY: u32 = 20;

/// Below this the caller gets an annotation on the final text.
pub const ANNOTATION_THRESHOLD: u32 = 60;

const HEDGING_PHRASES: &[&str] = &[
    "i think",
    "probably",
    "not certain",
    "not sure",
    "i believe",
    "it seems",
    "might be",
    "possibly",
    "i guess",
];

const REFUSAL_PHRASES: &[&str] = &[
    "i can't",
    "i cannot",
    "i'm unable",
    "outside my",
    "i won't",
    "as an ai",
    "i am not able",
];

/// Score text in [0, 100]. Occurrences are counted, not deduplicated —
/// three "probably"s cost three penalties.
pub fn score(text: &str) -> u32 {
    let lower = text.to_lowercase();
    let mut penalty: u32 = 0;
    for phrase in HEDGING_PHRASES {
        penalty += lower.matches(phrase).count() as u32 * HEDGE_PENALTY;
    }
    for phrase in REFUSAL_PHRASES {
        penalty += lower.matches(phrase).count() as u32 * REFUSAL_PENALTY;
    }
    100u32.saturating_sub(penalty)
}

/// Append the low-confidence annotation when the score warrants one.
pub fn annotate(text: &str) -> (String, u32) {
    let s = score(text);
    if s < ANNOTATION_THRESHOLD {
        (format!("{text}\n\n[low-confidence: {s}]"), s)
    } else {
        (text.to_string(), s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confident_text_scores_full() {
        assert_eq!(score("The answer is 42. The tail decays in 2.3 seconds."), 100);
    }

    #[test]
    fn hedging_costs_five_each() {
        assert_eq!(score("It is probably fine."), 95);
        assert_eq!(score("Probably fine, probably safe, probably done."), 85);
    }

    #[test]
    fn refusals_cost_more() {
        assert_eq!(score("I can't help with that."), 80);
    }

    #[test]
    fn occurrences_are_not_deduplicated() {
        let text = "I think this works. I think it compiles. I think it ships.";
        assert_eq!(score(text), 85);
    }

    #[test]
    fn score_floors_at_zero() {
        let text = "I can't. ".repeat(10);
        assert_eq!(score(&text), 0);
    }

    #[test]
    fn mixed_phrases_accumulate() {
        // one hedge (5) + one refusal (20)
        assert_eq!(score("I think I cannot do this."), 75);
    }

    #[test]
    fn annotation_added_below_threshold() {
        let text = "I can't. I cannot. I won't.";
        let (annotated, s) = annotate(text);
        assert!(s < ANNOTATION_THRESHOLD);
        assert!(annotated.contains("[low-confidence:"));
    }

    #[test]
    fn no_annotation_at_or_above_threshold() {
        let (annotated, s) = annotate("All good here, fully verified output.");
        assert_eq!(s, 100);
        assert!(!annotated.contains("[low-confidence:"));
    }

    #[test]
    fn scoring_is_case_insensitive() {
        assert_eq!(score("PROBABLY fine"), 95);
    }
}
