use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Text,
    Image,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// A submitted math problem. Immutable once created.
///
/// `answer` and `solution` ground the tutor prompt and must never reach the
/// learner; anything leaving the service goes through [`TaskSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub content: String,
    pub kind: TaskKind,
    pub image_url: Option<String>,
    pub ocr_text: Option<String>,
    pub answer: Option<String>,
    pub solution: Option<String>,
    pub subject: String,
    pub difficulty: Option<Difficulty>,
    pub created_at: DateTime<Utc>,
}

/// Learner-visible projection of a [`Task`]. Also the persisted history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: String,
    pub content: String,
    pub kind: TaskKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn from_request(req: NewTaskRequest) -> Self {
        let content = req.content.trim().to_string();
        let kind = match (content.is_empty(), req.image_url.is_some()) {
            (_, false) => TaskKind::Text,
            (true, true) => TaskKind::Image,
            (false, true) => TaskKind::Mixed,
        };
        let classified_text = match &req.ocr_text {
            Some(ocr) if content.is_empty() => ocr.clone(),
            _ => content.clone(),
        };
        let subject = req
            .subject
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| detect_math_subject(&classified_text).to_string());
        let difficulty = req
            .difficulty
            .or_else(|| Some(estimate_difficulty(&classified_text)));

        Task {
            id: generate_task_id(),
            content,
            kind,
            image_url: req.image_url,
            ocr_text: req.ocr_text.filter(|t| !t.trim().is_empty()),
            answer: req.answer.filter(|a| !a.trim().is_empty()),
            solution: req.solution.filter(|s| !s.trim().is_empty()),
            subject,
            difficulty,
            created_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id.clone(),
            content: self.content.clone(),
            kind: self.kind,
            image_url: self.image_url.clone(),
            ocr_text: self.ocr_text.clone(),
            subject: self.subject.clone(),
            difficulty: self.difficulty,
            created_at: self.created_at,
        }
    }
}

/// `task_<unix millis>_<9 lowercase alphanumerics>`
pub fn generate_task_id() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("task_{}_{}", Utc::now().timestamp_millis(), suffix)
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_task_has_body"))]
pub struct NewTaskRequest {
    #[serde(default)]
    #[validate(length(max = 20000, message = "Task content is too long"))]
    pub content: String,
    pub image_url: Option<String>,
    #[validate(length(max = 20000))]
    pub ocr_text: Option<String>,
    pub answer: Option<String>,
    pub solution: Option<String>,
    #[validate(length(max = 64))]
    pub subject: Option<String>,
    pub difficulty: Option<Difficulty>,
}

fn validate_task_has_body(req: &NewTaskRequest) -> Result<(), ValidationError> {
    if req.content.trim().is_empty() && req.image_url.is_none() {
        let mut err = ValidationError::new("empty_task");
        err.message = Some("Task needs text content or an image".into());
        return Err(err);
    }
    Ok(())
}

const SUBJECT_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "algebra",
        &["równanie", "wielomian", "funkcja", "dziedzina", "zbiór", "nierówność"],
    ),
    (
        "analiza",
        &["pochodna", "całka", "granica", "ciągłość", "ekstremum", "asymptota"],
    ),
    (
        "geometria",
        &["trójkąt", "okrąg", "prosta", "płaszczyzna", "wektor", "kąt"],
    ),
    (
        "trygonometria",
        &["sinus", "cosinus", "tangens", "cotangens", "sin", "cos", "tan", "ctg"],
    ),
    (
        "prawdopodobieństwo",
        &["prawdopodobieństwo", "zdarzenie", "losowy", "kombinatoryka", "permutacja"],
    ),
    (
        "statystyka",
        &["średnia", "mediana", "odchylenie", "wariancja", "histogram", "wykres"],
    ),
];

pub const DEFAULT_SUBJECT: &str = "matematyka";

/// Picks the subject whose keyword list has the most hits; ties keep the
/// earlier subject.
pub fn detect_math_subject(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    let mut best = DEFAULT_SUBJECT;
    let mut best_hits = 0;

    for (subject, keywords) in SUBJECT_KEYWORDS {
        let hits = keywords.iter().filter(|k| lowered.contains(*k)).count();
        if hits > best_hits {
            best_hits = hits;
            best = subject;
        }
    }

    best
}

const HARD_INDICATORS: &[&str] = &[
    "całka",
    "pochodna cząstkowa",
    "szereg",
    "przestrzeń",
    "dowód",
    "udowodnij",
];
const MEDIUM_INDICATORS: &[&str] = &[
    "pochodna",
    "granica",
    "równanie różniczkowe",
    "macierz",
    "wyznacznik",
];

pub fn estimate_difficulty(text: &str) -> Difficulty {
    let lowered = text.to_lowercase();
    if HARD_INDICATORS.iter().any(|k| lowered.contains(k)) {
        Difficulty::Hard
    } else if MEDIUM_INDICATORS.iter().any(|k| lowered.contains(k)) {
        Difficulty::Medium
    } else {
        Difficulty::Easy
    }
}
