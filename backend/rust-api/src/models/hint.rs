use serde::{Deserialize, Serialize};

pub const MAX_HINT_LEVEL: u8 = 4;

/// One rung of the hint ladder. `policy` is the instruction the tutor prompt
/// attaches to the numeric level; it is not enforced anywhere in code.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HintLevelInfo {
    pub level: u8,
    pub label: &'static str,
    pub description: &'static str,
    pub policy: &'static str,
}

pub static HINT_LEVELS: [HintLevelInfo; 5] = [
    HintLevelInfo {
        level: 0,
        label: "Start",
        description: "Zacznij od analizy zadania",
        policy: "Pytania naprowadzające, zero konkretów",
    },
    HintLevelInfo {
        level: 1,
        label: "Ogólne pytanie",
        description: "Co jest dane w zadaniu?",
        policy: "Delikatne sugestie kierunku myślenia",
    },
    HintLevelInfo {
        level: 2,
        label: "Naprowadzenie",
        description: "Jaką metodę możesz zastosować?",
        policy: "Konkretne wskazówki co do metody",
    },
    HintLevelInfo {
        level: 3,
        label: "Konkretna wskazówka",
        description: "Spróbuj użyć tego wzoru...",
        policy: "Częściowe rozwiązanie z wyjaśnieniem",
    },
    HintLevelInfo {
        level: 4,
        label: "Krok po kroku",
        description: "Rozwiążmy to razem",
        policy: "Pełne rozwiązanie krok po kroku",
    },
];

/// Ordered ladder, easiest rung first.
pub fn levels() -> &'static [HintLevelInfo] {
    &HINT_LEVELS
}

/// Current position on the ladder. Always within `0..=MAX_HINT_LEVEL`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct HintLevel(u8);

impl HintLevel {
    pub const START: HintLevel = HintLevel(0);
    pub const MAX: HintLevel = HintLevel(MAX_HINT_LEVEL);

    pub fn new(level: u8) -> Option<Self> {
        (level <= MAX_HINT_LEVEL).then_some(HintLevel(level))
    }

    /// Clamps an untrusted number (e.g. a client-supplied `hintLevel`) onto the ladder.
    pub fn from_raw(raw: i64) -> Self {
        HintLevel(raw.clamp(0, MAX_HINT_LEVEL as i64) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Next rung, saturating at the top. Callers check `is_max` first when
    /// they need to know whether anything changed.
    pub fn advance(self) -> Self {
        HintLevel((self.0 + 1).min(MAX_HINT_LEVEL))
    }

    pub fn reset() -> Self {
        Self::START
    }

    pub fn is_max(self) -> bool {
        self.0 >= MAX_HINT_LEVEL
    }

    pub fn info(self) -> &'static HintLevelInfo {
        &HINT_LEVELS[self.0 as usize]
    }
}

impl TryFrom<u8> for HintLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        HintLevel::new(value).ok_or_else(|| {
            format!(
                "hint level {} out of range 0..={}",
                value, MAX_HINT_LEVEL
            )
        })
    }
}

impl From<HintLevel> for u8 {
    fn from(level: HintLevel) -> Self {
        level.0
    }
}

impl std::fmt::Display for HintLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize)]
pub struct HintLevelsResponse {
    pub levels: &'static [HintLevelInfo],
    pub max_level: u8,
}

#[derive(Debug, Serialize)]
pub struct RequestHintResponse {
    pub advanced: bool,
    pub hint_level: u8,
    pub label: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announcement: Option<super::message::Message>,
    /// Absent when the progress store could not be reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints_used_total: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_has_five_ordered_rungs() {
        let ladder = levels();
        assert_eq!(ladder.len(), 5);
        for (index, rung) in ladder.iter().enumerate() {
            assert_eq!(rung.level as usize, index);
        }
        assert_eq!(ladder[0].label, "Start");
        assert_eq!(ladder[4].label, "Krok po kroku");
    }

    #[test]
    fn advance_steps_by_one_and_saturates() {
        let mut level = HintLevel::reset();
        for expected in 1..=4 {
            level = level.advance();
            assert_eq!(level.value(), expected);
        }
        assert!(level.is_max());
        assert_eq!(level.advance(), HintLevel::MAX);
    }

    #[test]
    fn from_raw_clamps_out_of_range_values() {
        assert_eq!(HintLevel::from_raw(-3), HintLevel::START);
        assert_eq!(HintLevel::from_raw(2).value(), 2);
        assert_eq!(HintLevel::from_raw(99), HintLevel::MAX);
    }

    #[test]
    fn deserialization_rejects_levels_above_ladder() {
        let ok: HintLevel = serde_json::from_str("3").unwrap();
        assert_eq!(ok.value(), 3);
        assert!(serde_json::from_str::<HintLevel>("5").is_err());
    }
}
