use std::collections::VecDeque;

use dtpc_core::TopicId;
use tracing::info;

use crate::error::EngineError;
use crate::state::{DeliveredItem, EngineState};

/// Opens a delivery queue for `topic`. Each topic has at most one subscriber.
pub fn open_topic(state: &mut EngineState, topic: TopicId) -> Result<(), EngineError> {
    if is_open(state, topic) {
        return Err(EngineError::TopicInUse(topic));
    }
    state.topics.insert(topic, VecDeque::new());
    info!(topic, "opened topic");
    Ok(())
}

/// Closes a topic and discards items nobody will receive.
///
/// Returns how many undelivered items were dropped.
pub fn close_topic(state: &mut EngineState, topic: TopicId) -> usize {
    let dropped = state.topics.remove(&topic).map_or(0, |queue| queue.len());
    state.wakeups.topics.remove(&topic);
    info!(topic, dropped, "closed topic");
    dropped
}

pub fn is_open(state: &EngineState, topic: TopicId) -> bool {
    state.topics.contains_key(&topic)
}

/// Takes the oldest delivered item of an open topic.
pub fn pop_item(state: &mut EngineState, topic: TopicId) -> Option<DeliveredItem> {
    state.topics.get_mut(&topic)?.pop_front()
}
