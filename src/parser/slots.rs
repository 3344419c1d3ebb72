/// How a box header is turned into a slot name. Rules are tried top to
/// bottom and the first one that produces a name wins.
#[derive(Debug)]
pub enum SlotRule {
    /// Header contains any of the patterns.
    Contains {
        patterns: &'static [&'static str],
        slot: &'static str,
    },
    /// Slot name derived from the header text itself. Always matches.
    Derived,
}

pub const DEFINITION: &str = "definition";
pub const USAGE_GUIDANCE: &str = "usage_guidance";
pub const IMPACT_CATEGORIES: &str = "impact_categories";
pub const SDG_GOALS: &str = "sdg_goals";
pub const METRIC_HISTORY: &str = "metric_history";
pub const RELATED_METRICS: &str = "related_metrics";

pub static RULES: &[SlotRule] = &[
    SlotRule::Contains {
        patterns: &["Account Value", "(PI", "(FP", "(OI", "(PD", "(OD"],
        slot: DEFINITION,
    },
    SlotRule::Contains { patterns: &["Usage Guidance"], slot: USAGE_GUIDANCE },
    SlotRule::Contains { patterns: &["Impact Categories"], slot: IMPACT_CATEGORIES },
    SlotRule::Contains { patterns: &["SDG Goals"], slot: SDG_GOALS },
    SlotRule::Contains { patterns: &["Metric History"], slot: METRIC_HISTORY },
    SlotRule::Contains { patterns: &["Related metrics"], slot: RELATED_METRICS },
    SlotRule::Derived,
];

impl SlotRule {
    fn apply(&self, header: &str) -> Option<String> {
        match self {
            SlotRule::Contains { patterns, slot } => patterns
                .iter()
                .any(|p| header.contains(p))
                .then(|| slot.to_string()),
            SlotRule::Derived => Some(derive_slot(header)),
        }
    }
}

/// Slot for a box header text.
pub fn classify(header: &str) -> String {
    RULES
        .iter()
        .find_map(|rule| rule.apply(header))
        .unwrap_or_else(|| derive_slot(header))
}

fn derive_slot(header: &str) -> String {
    header.to_lowercase().replace(' ', "_").replace('&', "and")
}
