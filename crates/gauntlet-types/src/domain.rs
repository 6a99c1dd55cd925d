//! The closed domain enum that selects which static context is injected.

use serde::{Deserialize, Serialize};

/// Coarse topic class a request is routed to.
///
/// Produced by the domain router from the parsed intent. `OutOfScope` is a
/// terminal verdict; every other variant has a context mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Domain {
    /// Work history, skills, education, achievements.
    Professional,
    /// Portfolio work, technical projects.
    Projects,
    /// Personal interests, volunteering.
    Hobbies,
    /// Problem-solving approach, values, working style.
    Philosophy,
    /// Reaching the site owner, leaving a message.
    Contact,
    /// Questions about the chat system itself; greetings land here too.
    Meta,
    /// Anything the gateway refuses to answer.
    OutOfScope,
}

impl Domain {
    /// The wire representation (`PROFESSIONAL`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Professional => "PROFESSIONAL",
            Self::Projects => "PROJECTS",
            Self::Hobbies => "HOBBIES",
            Self::Philosophy => "PHILOSOPHY",
            Self::Contact => "CONTACT",
            Self::Meta => "META",
            Self::OutOfScope => "OUT_OF_SCOPE",
        }
    }

    /// All domains that carry context (everything except `OutOfScope`).
    pub fn context_domains() -> [Domain; 6] {
        [
            Self::Professional,
            Self::Projects,
            Self::Hobbies,
            Self::Philosophy,
            Self::Contact,
            Self::Meta,
        ]
    }

    /// Short human-readable description, used in prompt templating.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Professional => "professional background, work experience, and skills",
            Self::Projects => "projects, portfolio work, and technical implementations",
            Self::Hobbies => "hobbies, volunteering, and personal interests",
            Self::Philosophy => "problem-solving approach and working philosophy",
            Self::Contact => "professional networking and contact information",
            Self::Meta => "this chat system",
            Self::OutOfScope => "topics outside my knowledge area",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
