//! History windowing
//!
//! When the history no longer fits the token budget, the oldest messages are
//! dropped first. Earlier turns go whole, cut in front of a user message, so
//! the view sent to the model still opens with a user turn. If the current
//! turn alone is over budget, its oldest tool rounds (an assistant message
//! and the tool results answering it) go next. The opening user message and
//! the latest round are always kept, so a `tool_use` never loses its
//! `tool_result` and the latest thinking block is still echoed.

use std::ops::Range;

use tracing::{debug, warn};

use super::types::{Message, Role};
use crate::context::TokenCounter;

/// Select the messages to send to the model
pub fn select(messages: &[Message], budget: usize, counter: &TokenCounter) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }

    let sizes: Vec<usize> = messages.iter().map(|m| counter.count_message(m)).collect();
    let total: usize = sizes.iter().sum();
    if total <= budget {
        return messages.to_vec();
    }

    let cut_points: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::User)
        .map(|(i, _)| i)
        .collect();

    let Some(&last_cut) = cut_points.last() else {
        warn!(total, budget, "History exceeds budget but has no user message to cut at");
        return messages.to_vec();
    };

    let mut dropped = 0;
    let mut start = 0;
    for &cut in &cut_points {
        dropped += sizes[start..cut].iter().sum::<usize>();
        start = cut;
        if total - dropped <= budget {
            debug!(dropped_messages = cut, kept_tokens = total - dropped, "Windowed history");
            return messages[cut..].to_vec();
        }
    }

    trim_current_turn(messages, &sizes, last_cut, total - dropped, budget)
}

/// Drop the oldest rounds of the turn starting at `opening`
fn trim_current_turn(
    messages: &[Message],
    sizes: &[usize],
    opening: usize,
    mut kept: usize,
    budget: usize,
) -> Vec<Message> {
    let rounds = rounds(messages, opening + 1);
    let mut first_kept = 0;
    while kept > budget && first_kept + 1 < rounds.len() {
        kept -= sizes[rounds[first_kept].clone()].iter().sum::<usize>();
        first_kept += 1;
    }

    if kept > budget {
        warn!(kept_tokens = kept, budget, "Current turn exceeds the history budget after trimming");
    } else {
        debug!(dropped_rounds = first_kept, kept_tokens = kept, "Trimmed current turn");
    }

    let mut view = Vec::with_capacity(messages.len() - opening);
    view.push(messages[opening].clone());
    if let Some(range) = rounds.get(first_kept) {
        view.extend_from_slice(&messages[range.start..]);
    }
    view
}

/// Split `messages[from..]` into rounds: an assistant message plus the tool
/// message answering it, or any other single message
fn rounds(messages: &[Message], from: usize) -> Vec<Range<usize>> {
    let mut rounds = Vec::new();
    let mut i = from;
    while i < messages.len() {
        let answered = messages[i].role == Role::Assistant
            && messages.get(i + 1).is_some_and(|m| m.role == Role::Tool);
        let end = if answered { i + 2 } else { i + 1 };
        rounds.push(i..end);
        i = end;
    }
    rounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ContentBlock, ToolResult};
    use serde_json::json;

    fn history() -> Vec<Message> {
        let mut messages = vec![
            Message::user("first question ".repeat(50)),
            Message::assistant(vec![ContentBlock::tool_use("a", "search_web", json!({"query": "q"}))]),
            Message::tool_results(vec![ToolResult::success("a", "result ".repeat(50))]),
            Message::assistant(vec![ContentBlock::text("first answer")]),
            Message::user("second question"),
            Message::assistant(vec![ContentBlock::text("second answer")]),
            Message::user("third question"),
        ];
        for (i, m) in messages.iter_mut().enumerate() {
            m.turn_index = i as u64;
        }
        messages
    }

    #[test]
    fn test_fits_budget_untouched() {
        let counter = TokenCounter::new();
        let messages = history();
        assert_eq!(select(&messages, usize::MAX, &counter).len(), messages.len());
    }

    #[test]
    fn test_drops_oldest_turn_whole() {
        let counter = TokenCounter::new();
        let messages = history();
        let tail = counter.count_messages(&messages[4..]);

        let view = select(&messages, tail, &counter);
        assert_eq!(view.len(), 3);
        assert_eq!(view[0].role, Role::User);
        assert_eq!(view[0].text(), "second question");
    }

    #[test]
    fn test_never_splits_tool_round() {
        let counter = TokenCounter::new();
        let messages = history();
        for budget in [0, 10, 50, 100, 200, 400] {
            let view = select(&messages, budget, &counter);
            assert_eq!(view[0].role, Role::User);
            let has_use = view.iter().any(|m| m.has_tool_use());
            let has_result = view.iter().any(|m| m.tool_results_iter().next().is_some());
            assert_eq!(has_use, has_result);
        }
    }

    /// A single turn that has run many tool rounds
    fn long_turn(rounds: usize) -> Vec<Message> {
        let mut messages = vec![Message::user("research this")];
        for r in 0..rounds {
            let id = format!("call_{}", r);
            messages.push(Message::assistant(vec![
                ContentBlock::Thinking {
                    thinking: format!("step {}", r),
                    signature: Some(format!("sig{}", r)),
                },
                ContentBlock::tool_use(id.as_str(), "search_web", json!({"query": r})),
            ]));
            messages.push(Message::tool_results(vec![ToolResult::success(
                id.as_str(),
                "lorem ipsum dolor sit amet ".repeat(80),
            )]));
        }
        for (i, m) in messages.iter_mut().enumerate() {
            m.turn_index = i as u64;
        }
        messages
    }

    #[test]
    fn test_trims_rounds_within_current_turn() {
        let counter = TokenCounter::new();
        let messages = long_turn(6);
        let total = counter.count_messages(&messages);
        let budget = total / 3;

        let view = select(&messages, budget, &counter);
        assert!(counter.count_messages(&view) <= budget);
        assert!(view.len() < messages.len());

        // opens with the user message and ends with the latest round intact
        assert_eq!(view[0].text(), "research this");
        assert_eq!(view[view.len() - 2], messages[messages.len() - 2]);
        assert_eq!(view[view.len() - 1], messages[messages.len() - 1]);
        for pair in view[1..].chunks(2) {
            assert_eq!(pair[0].role, Role::Assistant);
            assert_eq!(pair[1].role, Role::Tool);
        }
    }

    #[test]
    fn test_latest_round_kept_even_if_too_large() {
        let counter = TokenCounter::new();
        let messages = long_turn(3);
        let view = select(&messages, 0, &counter);
        assert_eq!(view.len(), 3);
        assert_eq!(view[0].role, Role::User);
        assert_eq!(view[1], messages[5]);
        assert_eq!(view[2], messages[6]);
    }

    #[test]
    fn test_keeps_current_turn_even_if_too_large() {
        let counter = TokenCounter::new();
        let messages = history();
        let view = select(&messages, 0, &counter);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].text(), "third question");
    }
}
