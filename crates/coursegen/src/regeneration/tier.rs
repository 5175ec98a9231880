//! Instruction scope classification.
//!
//! An edit instruction is matched against one pattern group per tier, in the
//! fixed order atomic, local, structural, global. The first group with any
//! matching pattern decides the tier, so "fix the typo and expand the
//! explanation" stays atomic. Instructions that match nothing fall back to
//! `local`.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Scope of a regeneration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextTier {
    Atomic,
    Local,
    Structural,
    Global,
}

impl ContextTier {
    /// All tiers in classification priority order.
    pub const ALL: [ContextTier; 4] = [
        ContextTier::Atomic,
        ContextTier::Local,
        ContextTier::Structural,
        ContextTier::Global,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextTier::Atomic => "atomic",
            ContextTier::Local => "local",
            ContextTier::Structural => "structural",
            ContextTier::Global => "global",
        }
    }

    /// Token budget handed to the generation call for this tier.
    pub fn budget(&self) -> TokenBudget {
        match self {
            ContextTier::Atomic => TokenBudget::new(200, 100),
            ContextTier::Local => TokenBudget::new(500, 500),
            ContextTier::Structural => TokenBudget::new(1000, 1500),
            ContextTier::Global => TokenBudget::new(2000, 3000),
        }
    }
}

impl std::fmt::Display for ContextTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContextTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "atomic" => Ok(ContextTier::Atomic),
            "local" => Ok(ContextTier::Local),
            "structural" => Ok(ContextTier::Structural),
            "global" => Ok(ContextTier::Global),
            other => Err(format!("unknown context tier '{}'", other)),
        }
    }
}

/// Token allowance for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Tokens the generated text may use.
    pub target: u32,
    /// Tokens of surrounding document passed as context.
    pub context: u32,
    pub total: u32,
}

impl TokenBudget {
    pub const fn new(target: u32, context: u32) -> Self {
        Self {
            target,
            context,
            total: target + context,
        }
    }
}

/// Returns the budget for `tier`.
pub fn token_budget(tier: ContextTier) -> TokenBudget {
    tier.budget()
}

const ATOMIC_PATTERNS: &[&str] = &[
    r"\btypos?\b",
    r"\bspelling\b",
    r"\bmisspell",
    r"\bgrammar\b",
    r"\bgrammatical",
    r"\bpunctuation\b",
    r"\bcomma\b",
    r"\bcapitali[sz]",
    r"\bfix (?:the |a |this )?(?:word|name|number|date|link|term)\b",
    r"\breplace (?:the |this )?word\b",
    r"\bwrong (?:word|number|date)\b",
    r"опечат",
    r"орфограф",
    r"граммат",
    r"пунктуац",
    r"запят",
    r"исправ\w* (?:слово|ошибку|дату|число)",
];

const LOCAL_PATTERNS: &[&str] = &[
    r"\bparagraph",
    r"\bsentence",
    r"\brephrase",
    r"\breword",
    r"\bclarify",
    r"\bsimplify",
    r"\bshorten",
    r"\bmore concise\b",
    r"\bthis (?:part|passage|bit|line)\b",
    r"абзац",
    r"предложени",
    r"перефраз",
    r"упрост",
    r"сократи",
    r"поясни",
    r"понятнее",
];

const STRUCTURAL_PATTERNS: &[&str] = &[
    r"\bsections?\b",
    r"\bsubsections?\b",
    r"\brestructur",
    r"\breorganiz",
    r"\breorder",
    r"\badd (?:an? |more |some )?examples?\b",
    r"\bbullet",
    r"\btables?\b",
    r"\bheadings?\b",
    r"раздел",
    r"структур",
    r"пример",
    r"список",
    r"таблиц",
    r"заголов",
];

const GLOBAL_PATTERNS: &[&str] = &[
    r"\bentire\b",
    r"\bwhole\b",
    r"\ball sections\b",
    r"\btone\b",
    r"\bstyle\b",
    r"\bexpand",
    r"\brewrite everything\b",
    r"\btranslat",
    r"\baudience\b",
    r"\bfrom scratch\b",
    r"\bcompletely\b",
    r"весь урок",
    r"всего урока",
    r"целиком",
    r"полностью",
    r"\bтон\b",
    r"стиль",
    r"расшир",
    r"перевед",
    r"аудитори",
];

/// Ordered, precompiled pattern table.
pub struct TierClassifier {
    groups: Vec<(ContextTier, Vec<Regex>)>,
}

impl TierClassifier {
    pub fn new() -> Self {
        let table: [(ContextTier, &[&str]); 4] = [
            (ContextTier::Atomic, ATOMIC_PATTERNS),
            (ContextTier::Local, LOCAL_PATTERNS),
            (ContextTier::Structural, STRUCTURAL_PATTERNS),
            (ContextTier::Global, GLOBAL_PATTERNS),
        ];

        let groups = table
            .iter()
            .map(|(tier, patterns)| {
                let compiled = patterns
                    .iter()
                    .filter_map(|p| match Regex::new(&format!("(?i){}", p)) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            log::warn!("Invalid {} tier pattern '{}': {}", tier, p, e);
                            None
                        }
                    })
                    .collect();
                (*tier, compiled)
            })
            .collect();

        Self { groups }
    }

    /// Classifies an instruction. Empty or unmatched input is `local`.
    pub fn detect_tier(&self, instruction: &str) -> ContextTier {
        let text = instruction.trim();
        if text.is_empty() {
            return ContextTier::Local;
        }

        self.groups
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(text)))
            .map(|(tier, _)| *tier)
            .unwrap_or(ContextTier::Local)
    }
}

impl Default for TierClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(text: &str) -> ContextTier {
        TierClassifier::new().detect_tier(text)
    }

    #[test]
    fn test_atomic_wins_over_global() {
        assert_eq!(detect("Fix typo and expand explanation"), ContextTier::Atomic);
    }

    #[test]
    fn test_each_tier() {
        assert_eq!(detect("Fix the spelling of 'recieve'"), ContextTier::Atomic);
        assert_eq!(detect("Rephrase this paragraph"), ContextTier::Local);
        assert_eq!(detect("Add more examples to the lesson"), ContextTier::Structural);
        assert_eq!(detect("Make the whole lesson more formal"), ContextTier::Global);
    }

    #[test]
    fn test_russian_patterns() {
        assert_eq!(detect("Исправь опечатку"), ContextTier::Atomic);
        assert_eq!(detect("Перефразируй этот абзац"), ContextTier::Local);
        assert_eq!(detect("Добавь раздел про циклы"), ContextTier::Structural);
        assert_eq!(detect("Перепиши весь урок в другом стиле"), ContextTier::Global);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(detect("FIX TYPO"), ContextTier::Atomic);
        assert_eq!(detect("ОПЕЧАТКА в заголовке"), ContextTier::Atomic);
    }

    #[test]
    fn test_empty_and_unmatched_default_to_local() {
        assert_eq!(detect(""), ContextTier::Local);
        assert_eq!(detect("   \n\t"), ContextTier::Local);
        assert_eq!(detect("make it better"), ContextTier::Local);
    }

    #[test]
    fn test_budget_table() {
        let expected = [
            (ContextTier::Atomic, 200, 100, 300),
            (ContextTier::Local, 500, 500, 1000),
            (ContextTier::Structural, 1000, 1500, 2500),
            (ContextTier::Global, 2000, 3000, 5000),
        ];
        for (tier, target, context, total) in expected {
            let budget = token_budget(tier);
            assert_eq!(budget.target, target);
            assert_eq!(budget.context, context);
            assert_eq!(budget.total, total);
            assert_eq!(budget.total, budget.target + budget.context);
        }
    }

    #[test]
    fn test_budgets_increase_with_scope() {
        let totals: Vec<u32> = ContextTier::ALL.iter().map(|t| t.budget().total).collect();
        assert!(totals.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_tier_parse_and_display() {
        for tier in ContextTier::ALL {
            assert_eq!(tier.to_string().parse::<ContextTier>().unwrap(), tier);
        }
        assert!("huge".parse::<ContextTier>().is_err());
    }
}
