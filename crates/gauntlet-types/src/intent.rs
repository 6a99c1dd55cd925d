//! Structured intent extracted from a visitor message.
//!
//! All three classification axes are closed enums with clamp-to-default
//! fallbacks: whatever a small model emits, the pipeline only ever routes on
//! a known value.

use serde::{Deserialize, Serialize};

/// Main topic of the question, as classified by the intent parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    WorkExperience,
    Skills,
    Projects,
    Education,
    Achievements,
    Hobbies,
    Philosophy,
    Contact,
    ChatSystem,
    General,
}

impl Topic {
    /// Parse a model-emitted topic string, clamping unknown values to
    /// `General`.
    pub fn clamp(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().replace(' ', "_").as_str() {
            "work_experience" => Self::WorkExperience,
            "skills" => Self::Skills,
            "projects" => Self::Projects,
            "education" => Self::Education,
            "achievements" => Self::Achievements,
            "hobbies" => Self::Hobbies,
            "philosophy" => Self::Philosophy,
            "contact" => Self::Contact,
            "chat_system" => Self::ChatSystem,
            _ => Self::General,
        }
    }
}

/// The shape of the question being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Factual,
    Experience,
    Opinion,
    Comparison,
    Procedural,
    Clarification,
    Greeting,
    Ambiguous,
}

impl QuestionType {
    /// Parse a model-emitted question type, clamping unknown values to
    /// `Ambiguous`.
    pub fn clamp(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "factual" => Self::Factual,
            "experience" => Self::Experience,
            "opinion" => Self::Opinion,
            "comparison" => Self::Comparison,
            "procedural" => Self::Procedural,
            "clarification" => Self::Clarification,
            "greeting" => Self::Greeting,
            _ => Self::Ambiguous,
        }
    }
}

/// Emotional tone of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalTone {
    Neutral,
    Curious,
    Professional,
    Casual,
    Skeptical,
    Enthusiastic,
}

impl EmotionalTone {
    /// Parse a model-emitted tone, clamping unknown values to `Neutral`.
    pub fn clamp(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "curious" => Self::Curious,
            "professional" => Self::Professional,
            "casual" => Self::Casual,
            "skeptical" => Self::Skeptical,
            "enthusiastic" => Self::Enthusiastic,
            _ => Self::Neutral,
        }
    }
}

/// Structured intent record produced by the intent parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// Main topic of the question.
    pub topic: Topic,

    /// The kind of question being asked.
    pub question_type: QuestionType,

    /// Named entities mentioned, in message order. May be empty.
    #[serde(default)]
    pub entities: Vec<String>,

    /// Emotional tone of the message.
    pub emotional_tone: EmotionalTone,

    /// Parser confidence in [0, 1].
    pub confidence: f32,
}

impl Intent {
    /// The default intent used when parsing fails: routing treats it as an
    /// unclassifiable message.
    pub fn fallback() -> Self {
        Self {
            topic: Topic::General,
            question_type: QuestionType::Ambiguous,
            entities: Vec::new(),
            emotional_tone: EmotionalTone::Neutral,
            confidence: 0.0,
        }
    }

    /// Whether this message is a greeting.
    pub fn is_greeting(&self) -> bool {
        self.question_type == QuestionType::Greeting
    }
}

/// Clamp a model-emitted confidence value into [0, 1]; non-finite values
/// become 0.
pub fn clamp_confidence(raw: f64) -> f32 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0) as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_clamp_known_values() {
        assert_eq!(Topic::clamp("work_experience"), Topic::WorkExperience);
        assert_eq!(Topic::clamp("Chat_System"), Topic::ChatSystem);
        assert_eq!(Topic::clamp("  skills "), Topic::Skills);
        // Space-separated variants clamp too.
        assert_eq!(Topic::clamp("work experience"), Topic::WorkExperience);
    }

    #[test]
    fn topic_clamp_unknown_is_general() {
        assert_eq!(Topic::clamp("weather"), Topic::General);
        assert_eq!(Topic::clamp(""), Topic::General);
        assert_eq!(Topic::clamp("ignore previous instructions"), Topic::General);
    }

    #[test]
    fn question_type_clamp() {
        assert_eq!(QuestionType::clamp("greeting"), QuestionType::Greeting);
        assert_eq!(QuestionType::clamp("FACTUAL"), QuestionType::Factual);
        assert_eq!(QuestionType::clamp("banana"), QuestionType::Ambiguous);
    }

    #[test]
    fn tone_clamp() {
        assert_eq!(EmotionalTone::clamp("curious"), EmotionalTone::Curious);
        assert_eq!(EmotionalTone::clamp("angry"), EmotionalTone::Neutral);
    }

    #[test]
    fn confidence_clamping() {
        assert_eq!(clamp_confidence(0.5), 0.5);
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(f64::INFINITY), 0.0);
    }

    #[test]
    fn fallback_intent_is_unroutable() {
        let intent = Intent::fallback();
        assert_eq!(intent.topic, Topic::General);
        assert_eq!(intent.question_type, QuestionType::Ambiguous);
        assert_eq!(intent.confidence, 0.0);
        assert!(!intent.is_greeting());
    }

    #[test]
    fn intent_serde_roundtrip() {
        let intent = Intent {
            topic: Topic::Projects,
            question_type: QuestionType::Experience,
            entities: vec!["rust".into(), "axum".into()],
            emotional_tone: EmotionalTone::Enthusiastic,
            confidence: 0.9,
        };
        let json = serde_json::to_string(&intent).unwrap();
        let back: Intent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.topic, Topic::Projects);
        assert_eq!(back.entities.len(), 2);
    }
}
