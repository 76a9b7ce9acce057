//! Mention extraction and turn-dispatch rules (C7): pure functions over message text
//! and agent state, with no I/O or bus access.

use crate::world::bus::WorldMessageEvent;
use crate::world::types::{Agent, World, HUMAN_SENDER};

/// Extract, in order of first appearance and de-duplicated, every `@<agent-id>` token
/// that begins a paragraph (a maximal newline-delimited block) in `text`. Trailing
/// punctuation on the token is stripped before comparison.
pub fn extract_paragraph_beginning_mentions(text: &str) -> Vec<String> {
    let mut mentions = Vec::new();
    for paragraph in text.split('\n') {
        let trimmed = paragraph.trim_start();
        if !trimmed.starts_with('@') {
            continue;
        }
        let token: String = trimmed[1..]
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if token.is_empty() {
            continue;
        }
        if !mentions.contains(&token) {
            mentions.push(token);
        }
    }
    mentions
}

/// True iff `agent` should dispatch an orchestrator turn in response to `event`,
/// per the three conditions in `SPEC_FULL.md` §4.C7.
pub fn should_agent_respond(world: &World, agent: &Agent, event: &WorldMessageEvent) -> bool {
    if event.sender.eq_ignore_ascii_case(&agent.id) {
        return false;
    }

    let mentions = extract_paragraph_beginning_mentions(&event.content);
    let addressed = if mentions.is_empty() {
        event.sender.eq_ignore_ascii_case(HUMAN_SENDER) && agent.auto_reply
    } else {
        mentions.iter().any(|m| m.eq_ignore_ascii_case(&agent.id))
    };
    if !addressed {
        return false;
    }

    agent.consecutive_trailing_assistant_rows() < world.turn_limit
}

/// Idempotently prepend `@<agent_id>, ` to `text` unless it already carries that exact
/// paragraph-beginning mention. Used for both main-agent routing injection and the
/// auto-mention rule on published assistant text.
pub fn inject_leading_mention(text: &str, agent_id: &str) -> String {
    let already_present = extract_paragraph_beginning_mentions(text)
        .iter()
        .any(|m| m.eq_ignore_ascii_case(agent_id));
    if already_present {
        return text.to_string();
    }
    format!("@{}, {}", agent_id, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::bus::WorldMessageEvent;
    use chrono::Utc;

    fn event(content: &str, sender: &str) -> WorldMessageEvent {
        WorldMessageEvent {
            content: content.to_string(),
            sender: sender.to_string(),
            message_id: "m1".to_string(),
            timestamp: Utc::now(),
            chat_id: "c1".to_string(),
            reply_to_message_id: None,
        }
    }

    #[test]
    fn extracts_only_paragraph_beginning_mentions() {
        let text = "@a1, hello\n\nsome text @a2 not at start\n@a3 ok.";
        let mentions = extract_paragraph_beginning_mentions(text);
        assert_eq!(mentions, vec!["a1".to_string(), "a3".to_string()]);
    }

    #[test]
    fn strips_trailing_punctuation_and_dedupes() {
        let text = "@a1, hi\n@a1: again";
        assert_eq!(
            extract_paragraph_beginning_mentions(text),
            vec!["a1".to_string()]
        );
    }

    #[test]
    fn unmentioned_human_message_dispatches_when_auto_reply() {
        let world = World::new("w1", "World");
        let agent = Agent::new("a1", "w1", "Agent One");
        let evt = event("hello everyone", HUMAN_SENDER);
        assert!(should_agent_respond(&world, &agent, &evt));
    }

    #[test]
    fn unmentioned_human_message_skipped_when_auto_reply_false() {
        let world = World::new("w1", "World");
        let agent = Agent::new("a1", "w1", "Agent One").with_auto_reply(false);
        let evt = event("hello everyone", HUMAN_SENDER);
        assert!(!should_agent_respond(&world, &agent, &evt));
    }

    #[test]
    fn unmentioned_agent_message_is_never_dispatched() {
        let world = World::new("w1", "World");
        let agent = Agent::new("a1", "w1", "Agent One");
        let evt = event("hello everyone", "a2");
        assert!(!should_agent_respond(&world, &agent, &evt));
    }

    #[test]
    fn mentioned_agent_dispatches_regardless_of_auto_reply() {
        let world = World::new("w1", "World");
        let agent = Agent::new("a1", "w1", "Agent One").with_auto_reply(false);
        let evt = event("@a1 please help", "a2");
        assert!(should_agent_respond(&world, &agent, &evt));
    }

    #[test]
    fn agent_never_responds_to_its_own_message() {
        let world = World::new("w1", "World");
        let agent = Agent::new("a1", "w1", "Agent One");
        let evt = event("@a1 hi", "a1");
        assert!(!should_agent_respond(&world, &agent, &evt));
    }

    #[test]
    fn turn_limit_blocks_fourth_consecutive_reply() {
        let world = World::new("w1", "World");
        let mut agent = Agent::new("a1", "w1", "Agent One");
        for _ in 0..world.turn_limit {
            agent
                .memory
                .push(crate::world::types::ChatMessage::assistant("reply", "a1"));
        }
        let evt = event("@a1 again", "HUMAN");
        assert!(!should_agent_respond(&world, &agent, &evt));
    }

    #[test]
    fn inject_leading_mention_is_idempotent() {
        let once = inject_leading_mention("hello", "a1");
        assert_eq!(once, "@a1, hello");
        let twice = inject_leading_mention(&once, "a1");
        assert_eq!(twice, once);
    }
}
