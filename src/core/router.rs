use regex::Regex;

use crate::core::settings::{AgentConfig, TeamConfig};

/// Resolution of a leading `@ident` in an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRoute {
    /// Routed to one agent. `team` is set when a team was addressed (the
    /// agent is that team's leader).
    Agent {
        agent_id: String,
        team: Option<TeamConfig>,
    },
    /// Several distinct agents were mentioned at once. The message is
    /// returned to the sender unchanged.
    MultiAgentError,
    /// No `@` prefix; the caller falls back to the default agent.
    None,
}

/// A `[@teammate: …]` hand-off extracted from an agent response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeammateMention {
    pub agent_id: String,
    pub text: String,
}

pub struct Router {
    agents: Vec<AgentConfig>,
    teams: Vec<TeamConfig>,
    mention_re: Regex,
    token_re: Regex,
}

impl Router {
    pub fn new(agents: Vec<AgentConfig>, teams: Vec<TeamConfig>) -> Self {
        Self {
            agents,
            teams,
            // Non-greedy across newlines.
            mention_re: Regex::new(r"(?s)\[@([A-Za-z0-9_-]+):\s*(.*?)\]").unwrap(),
            token_re: Regex::new(r"@([A-Za-z0-9_-]+)").unwrap(),
        }
    }

    pub fn has_agent(&self, agent_id: &str) -> bool {
        self.agents.iter().any(|a| a.id == agent_id)
    }

    fn has_team(&self, team_id: &str) -> bool {
        self.teams.iter().any(|t| t.id == team_id)
    }

    fn team(&self, team_id: &str) -> Option<&TeamConfig> {
        self.teams.iter().find(|t| t.id == team_id)
    }

    /// The team context for an agent: the team it leads, else the first
    /// team that lists it as a member.
    pub fn team_for_agent(&self, agent_id: &str) -> Option<&TeamConfig> {
        self.teams
            .iter()
            .find(|t| t.leader == agent_id)
            .or_else(|| self.teams.iter().find(|t| t.members.iter().any(|m| m == agent_id)))
    }

    /// Parse the leading `@ident` of an inbound message. Tokens inside
    /// `[ ... ]` brackets do not count (those are hand-off syntax, not
    /// addressing).
    pub fn parse_route(&self, message: &str) -> ParsedRoute {
        let trimmed = message.trim_start();
        if !trimmed.starts_with('@') {
            return ParsedRoute::None;
        }

        let agent_tokens = self.agent_tokens_outside_brackets(message);
        if agent_tokens.len() > 1 {
            return ParsedRoute::MultiAgentError;
        }

        let Some(caps) = self.token_re.captures(trimmed) else {
            return ParsedRoute::None;
        };
        let ident = caps.get(1).map(|m| m.as_str()).unwrap_or_default();

        if self.has_team(ident) {
            let team = self.team(ident).cloned();
            let leader = team.as_ref().map(|t| t.leader.clone()).unwrap_or_default();
            return ParsedRoute::Agent {
                agent_id: leader,
                team,
            };
        }
        if self.has_agent(ident) {
            return ParsedRoute::Agent {
                agent_id: ident.to_string(),
                team: None,
            };
        }
        ParsedRoute::None
    }

    /// Distinct known-agent tokens in the message, skipping any that sit
    /// inside square brackets.
    fn agent_tokens_outside_brackets(&self, message: &str) -> Vec<String> {
        let mut tokens: Vec<String> = Vec::new();
        for caps in self.token_re.captures_iter(message) {
            let whole = caps.get(0).unwrap();
            if inside_brackets(message, whole.start()) {
                continue;
            }
            let ident = caps.get(1).unwrap().as_str();
            if self.has_agent(ident) && !tokens.iter().any(|t| t == ident) {
                tokens.push(ident.to_string());
            }
        }
        tokens
    }

    /// Extract teammate hand-offs from a response. A mention is dropped
    /// when it re-mentions the sender or names an agent outside the team.
    pub fn extract_mentions(
        &self,
        response: &str,
        team: &TeamConfig,
        sender_agent: &str,
    ) -> Vec<TeammateMention> {
        let mut out = Vec::new();
        for caps in self.mention_re.captures_iter(response) {
            let agent_id = caps.get(1).unwrap().as_str();
            let text = caps.get(2).unwrap().as_str().trim();
            if agent_id == sender_agent {
                continue;
            }
            let in_team =
                team.leader == agent_id || team.members.iter().any(|m| m == agent_id);
            if !in_team || !self.has_agent(agent_id) {
                continue;
            }
            out.push(TeammateMention {
                agent_id: agent_id.to_string(),
                text: text.to_string(),
            });
        }
        out
    }
}

/// Whether byte offset `pos` falls inside a `[ ... ]` bracket pair.
fn inside_brackets(text: &str, pos: usize) -> bool {
    let mut depth = 0i32;
    for (i, c) in text.char_indices() {
        if i >= pos {
            break;
        }
        match c {
            '[' => depth += 1,
            ']' => depth = (depth - 1).max(0),
            _ => {}
        }
    }
    depth > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::RunnerConfig;

    fn agent(id: &str) -> AgentConfig {
        AgentConfig {
            id: id.to_string(),
            name: None,
            runner: RunnerConfig::default(),
        }
    }

    fn router() -> Router {
        Router::new(
            vec![agent("default"), agent("alpha"), agent("beta"), agent("gamma")],
            vec![TeamConfig {
                id: "research".to_string(),
                name: None,
                leader: "alpha".to_string(),
                members: vec!["beta".to_string(), "gamma".to_string()],
            }],
        )
    }

    #[test]
    fn leading_agent_mention_routes_to_agent() {
        let r = router();
        assert_eq!(
            r.parse_route("@beta summarize the doc"),
            ParsedRoute::Agent {
                agent_id: "beta".to_string(),
                team: None
            }
        );
    }

    #[test]
    fn team_mention_routes_to_leader_with_context() {
        let r = router();
        match r.parse_route("@research plan the launch") {
            ParsedRoute::Agent { agent_id, team } => {
                assert_eq!(agent_id, "alpha");
                assert_eq!(team.unwrap().id, "research");
            }
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[test]
    fn several_distinct_agents_is_the_error_sentinel() {
        let r = router();
        assert_eq!(
            r.parse_route("@alpha and @beta please fight"),
            ParsedRoute::MultiAgentError
        );
    }

    #[test]
    fn bracketed_mentions_do_not_count_as_addressing() {
        let r = router();
        // The leading token addresses alpha; the hand-off inside brackets
        // is not a second addressee.
        assert_eq!(
            r.parse_route("@alpha relay this [@beta: hello]"),
            ParsedRoute::Agent {
                agent_id: "alpha".to_string(),
                team: None
            }
        );
    }

    #[test]
    fn no_prefix_falls_through() {
        let r = router();
        assert_eq!(r.parse_route("just a plain message"), ParsedRoute::None);
        assert_eq!(r.parse_route("email me at x@example.com"), ParsedRoute::None);
    }

    #[test]
    fn mentions_are_extracted_non_greedily_across_lines() {
        let r = router();
        let team = r.team("research").unwrap().clone();
        let response =
            "Done.\n[@beta: check the numbers\non page 2] and [@gamma: draft the summary]";
        let mentions = r.extract_mentions(response, &team, "alpha");
        assert_eq!(mentions.len(), 2);
        assert_eq!(mentions[0].agent_id, "beta");
        assert!(mentions[0].text.contains("page 2"));
        assert_eq!(mentions[1].agent_id, "gamma");
    }

    #[test]
    fn mentions_of_sender_or_outsiders_are_dropped() {
        let r = router();
        let team = r.team("research").unwrap().clone();
        let response = "[@alpha: echo] [@default: not in team] [@beta: ok]";
        let mentions = r.extract_mentions(response, &team, "alpha");
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].agent_id, "beta");
    }

    #[test]
    fn team_lookup_prefers_leadership() {
        let r = router();
        assert_eq!(r.team_for_agent("alpha").unwrap().id, "research");
        assert_eq!(r.team_for_agent("gamma").unwrap().id, "research");
        assert!(r.team_for_agent("default").is_none());
    }
}
