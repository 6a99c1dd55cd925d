//! L5 -- static context registry.
//!
//! Curated markdown documents keyed by domain, loaded once at process start.
//! No user text influences which documents are chosen beyond the resolved
//! domain. Hot reload replaces the whole snapshot atomically; readers see
//! either the old or the new registry, never a partial state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use gauntlet_types::Domain;

use crate::estimate_tokens;

/// Declaration of one context document.
#[derive(Debug, Clone)]
pub struct ContextSource {
    /// Internal identifier.
    pub name: &'static str,
    /// Section heading used in the assembled blob.
    pub display_name: &'static str,
    /// Path relative to the context directory.
    pub file: &'static str,
    pub domain: Domain,
    /// Required documents load before optional ones.
    pub required: bool,
    /// Higher loads first within the required/optional groups.
    pub priority: i32,
}

/// The full source table. Which files exist on disk can vary per deploy;
/// missing files are recorded and skipped.
pub const CONTEXT_SOURCES: &[ContextSource] = &[
    ContextSource {
        name: "skills",
        display_name: "Skills",
        file: "professional/skills.md",
        domain: Domain::Professional,
        required: true,
        priority: 10,
    },
    ContextSource {
        name: "resume",
        display_name: "Resume",
        file: "professional/resume.md",
        domain: Domain::Professional,
        required: true,
        priority: 8,
    },
    ContextSource {
        name: "achievements",
        display_name: "Achievements",
        file: "professional/achievements.md",
        domain: Domain::Professional,
        required: false,
        priority: 3,
    },
    ContextSource {
        name: "projects_overview",
        display_name: "Projects Overview",
        file: "projects/overview.md",
        domain: Domain::Projects,
        required: true,
        priority: 10,
    },
    ContextSource {
        name: "project_details",
        display_name: "Project Details",
        file: "projects/details.md",
        domain: Domain::Projects,
        required: false,
        priority: 5,
    },
    ContextSource {
        name: "hobbies",
        display_name: "Hobbies & Interests",
        file: "hobbies/hobbies.md",
        domain: Domain::Hobbies,
        required: true,
        priority: 10,
    },
    ContextSource {
        name: "volunteering",
        display_name: "Volunteering",
        file: "hobbies/volunteering.md",
        domain: Domain::Hobbies,
        required: false,
        priority: 5,
    },
    ContextSource {
        name: "ethos",
        display_name: "Problem Solving Ethos",
        file: "philosophy/ethos.md",
        domain: Domain::Philosophy,
        required: true,
        priority: 10,
    },
    ContextSource {
        name: "values",
        display_name: "Professional Philosophy",
        file: "philosophy/values.md",
        domain: Domain::Philosophy,
        required: false,
        priority: 5,
    },
    ContextSource {
        name: "contact",
        display_name: "Contact Info",
        file: "meta/contact.md",
        domain: Domain::Contact,
        required: true,
        priority: 10,
    },
    ContextSource {
        name: "contact_resume",
        display_name: "Resume",
        file: "professional/resume.md",
        domain: Domain::Contact,
        required: false,
        priority: 5,
    },
    ContextSource {
        name: "about_chat",
        display_name: "About This Chat",
        file: "meta/about_chat.md",
        domain: Domain::Meta,
        required: true,
        priority: 10,
    },
    ContextSource {
        name: "site_overview",
        display_name: "Portfolio Overview",
        file: "meta/overview.md",
        domain: Domain::Meta,
        required: false,
        priority: 5,
    },
];

/// Immutable snapshot of loaded context, shared across requests.
struct Snapshot {
    /// Assembled blob per domain, already budget-bounded.
    blobs: HashMap<Domain, AssembledContext>,
}

/// Assembled context for one domain.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub text: String,
    pub sources_loaded: Vec<&'static str>,
    pub sources_missing: Vec<&'static str>,
    pub truncated: bool,
}

/// The process-wide context registry.
pub struct ContextRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
    max_tokens: usize,
}

impl ContextRegistry {
    /// Load all sources from `context_dir` and assemble per-domain blobs.
    pub fn load(context_dir: &Path, max_tokens: usize) -> Self {
        let snapshot = Arc::new(Self::build_snapshot(context_dir, max_tokens));
        Self {
            snapshot: RwLock::new(snapshot),
            max_tokens,
        }
    }

    /// An empty registry; every domain resolves to an empty blob. Used in
    /// tests and when no context directory is deployed.
    pub fn empty() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot {
                blobs: HashMap::new(),
            })),
            max_tokens: 0,
        }
    }

    /// Retrieve the assembled context for a domain. Pure lookup; never
    /// touches the filesystem.
    pub fn retrieve(&self, domain: Domain) -> AssembledContext {
        if domain == Domain::OutOfScope {
            return AssembledContext::default();
        }
        let snapshot = self.snapshot.read().unwrap();
        snapshot.blobs.get(&domain).cloned().unwrap_or_default()
    }

    /// Replace the whole registry from disk. Readers mid-request keep the
    /// snapshot they already resolved.
    pub fn reload(&self, context_dir: &Path) {
        let fresh = Arc::new(Self::build_snapshot(context_dir, self.max_tokens));
        *self.snapshot.write().unwrap() = fresh;
    }

    fn build_snapshot(context_dir: &Path, max_tokens: usize) -> Snapshot {
        let mut blobs = HashMap::new();
        for domain in Domain::context_domains() {
            blobs.insert(domain, Self::assemble(context_dir, domain, max_tokens));
        }
        Snapshot { blobs }
    }

    /// Concatenate the domain's documents (required first, then by
    /// priority), bounded by the token budget. Truncation is
    /// document-aligned: whole trailing documents are dropped, and the
    /// document that crosses the budget is cut at the budget with a marker.
    fn assemble(context_dir: &Path, domain: Domain, max_tokens: usize) -> AssembledContext {
        let mut sources: Vec<&ContextSource> = CONTEXT_SOURCES
            .iter()
            .filter(|s| s.domain == domain)
            .collect();
        sources.sort_by_key(|s| (!s.required, -s.priority));

        let mut parts: Vec<String> = Vec::new();
        let mut loaded = Vec::new();
        let mut missing = Vec::new();
        let mut used_tokens = 0usize;
        let mut truncated = false;

        for source in sources {
            if used_tokens >= max_tokens {
                truncated = true;
                break;
            }

            let path = context_dir.join(source.file);
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content.trim().to_string(),
                Err(err) => {
                    debug!(file = source.file, %err, "context file not loaded");
                    missing.push(source.name);
                    continue;
                }
            };
            if content.is_empty() {
                missing.push(source.name);
                continue;
            }

            let section = format!("## {}\n\n{}", source.display_name, content);
            let section_tokens = estimate_tokens(&section);

            if used_tokens + section_tokens > max_tokens {
                let remaining_chars = (max_tokens - used_tokens) * 4;
                let cut: String = section.chars().take(remaining_chars).collect();
                parts.push(format!("{cut}\n[truncated]"));
                loaded.push(source.name);
                truncated = true;
                used_tokens = max_tokens;
                continue;
            }

            used_tokens += section_tokens;
            parts.push(section);
            loaded.push(source.name);
        }

        if !missing.is_empty() {
            warn!(domain = %domain, missing = ?missing, "context sources missing");
        }

        AssembledContext {
            text: parts.join("\n\n---\n\n"),
            sources_loaded: loaded,
            sources_missing: missing,
            truncated,
        }
    }
}
