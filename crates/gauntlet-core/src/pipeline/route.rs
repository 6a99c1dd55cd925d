//! L4 -- domain router.
//!
//! A fixed table from intent topic to domain; no model call (the intent call
//! already paid for the decision). Greetings always land in `Meta`; unknown
//! or low-confidence intents fall out of scope.

use gauntlet_types::{Domain, Intent, Topic};

/// Intents below this confidence route out of scope unless they are
/// greetings.
const MIN_ROUTE_CONFIDENCE: f32 = 0.3;

/// The routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteOutcome {
    pub domain: Domain,
}

impl RouteOutcome {
    pub fn out_of_scope(&self) -> bool {
        self.domain == Domain::OutOfScope
    }
}

/// Map an intent to its domain.
pub fn route(intent: &Intent) -> RouteOutcome {
    // Greetings are always in scope, whatever the parser's confidence.
    if intent.is_greeting() {
        return RouteOutcome {
            domain: Domain::Meta,
        };
    }

    if intent.confidence < MIN_ROUTE_CONFIDENCE {
        return RouteOutcome {
            domain: Domain::OutOfScope,
        };
    }

    let domain = match intent.topic {
        Topic::WorkExperience | Topic::Skills | Topic::Education | Topic::Achievements => {
            Domain::Professional
        }
        Topic::Projects => Domain::Projects,
        Topic::Hobbies => Domain::Hobbies,
        Topic::Philosophy => Domain::Philosophy,
        Topic::Contact => Domain::Contact,
        Topic::ChatSystem => Domain::Meta,
        Topic::General => Domain::OutOfScope,
    };

    RouteOutcome { domain }
}
