//! Robots.txt rule matching
//!
//! Wraps the robotstxt crate's matcher. A body is matched on demand rather
//! than pre-compiled, so an entry is just its raw text.

use robotstxt::DefaultMatcher;

/// Rule group applicable to one `scheme://host`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsRules {
    /// Raw robots.txt body; empty means everything is allowed
    body: String,
}

impl RobotsRules {
    pub fn parse(body: &str) -> Self {
        Self {
            body: body.to_string(),
        }
    }

    /// Whether `url` may be fetched by `agent`
    ///
    /// `agent` is matched against `User-agent` lines; when no group names it
    /// the `*` group applies.
    pub fn allows(&self, url: &str, agent: &str) -> bool {
        if self.body.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.body, agent, url)
    }
}
