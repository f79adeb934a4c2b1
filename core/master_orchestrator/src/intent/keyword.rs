//! Keyword-scoring fallback used whenever the LLM oracle is unreachable,
//! returns garbage, or is rate limited. Deliberately dumb: a lowercase
//! substring count, no stemming, no weighting.

use shared_types::{AgentDescriptor, AgentId};

/// Count how many of an agent's declared keywords appear as a substring of
/// the (already lowercased) query.
fn hits_for(query_lower: &str, agent: &AgentDescriptor) -> u32 {
    agent
        .keywords
        .iter()
        .filter(|k| !k.is_empty() && query_lower.contains(&k.to_lowercase()))
        .count() as u32
}

/// Highest-scoring agent and its hit count, if any agent scored at least
/// one hit.
pub fn score(query: &str, agents: &[AgentDescriptor]) -> Option<(AgentId, u32)> {
    let query_lower = query.to_lowercase();
    agents
        .iter()
        .map(|a| (a.id.clone(), hits_for(&query_lower, a)))
        .filter(|(_, hits)| *hits > 0)
        .max_by_key(|(_, hits)| *hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::AgentStatus;

    fn agent(id: &str, keywords: &[&str]) -> AgentDescriptor {
        AgentDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            url: "http://localhost:9000".to_string(),
            description: String::new(),
            capabilities: vec![],
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            required_params: vec![],
            aliases: vec![],
            alternate_endpoint: None,
            status: AgentStatus::Unknown,
            last_checked_at: None,
        }
    }

    #[test]
    fn top_scorer_wins_on_more_hits() {
        let agents = vec![
            agent("quiz_generator_agent", &["quiz", "test"]),
            agent("research_finder_agent", &["paper"]),
        ];
        let (winner, hits) = score("quiz me with a practice test", &agents).unwrap();
        assert_eq!(winner, "quiz_generator_agent");
        assert_eq!(hits, 2);
    }

    #[test]
    fn no_keyword_matches_returns_none() {
        let agents = vec![agent("quiz_generator_agent", &["quiz"])];
        assert!(score("tell me a joke", &agents).is_none());
    }
}
