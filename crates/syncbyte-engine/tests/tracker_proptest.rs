use std::collections::HashMap;

use proptest::prelude::*;
use serde_json::json;
use syncbyte_engine::mapper::NamespacingMapper;
use syncbyte_engine::tracker::MessageTracker;
use syncbyte_types::protocol::ProtocolMessage;

fn message_strategy() -> impl Strategy<Value = ProtocolMessage> {
    prop_oneof![
        (prop::sample::select(vec!["users", "orders", "events"]), any::<i64>())
            .prop_map(|(stream, id)| ProtocolMessage::record(stream, json!({ "id": id }), 0)),
        any::<u32>().prop_map(|checkpoint| ProtocolMessage::state(json!({ "checkpoint": checkpoint }))),
    ]
}

proptest! {
    #[test]
    fn record_counts_match_observed_records(messages in prop::collection::vec(message_strategy(), 0..64)) {
        let mut tracker = MessageTracker::new();
        let mut expected: HashMap<String, u64> = HashMap::new();
        for message in &messages {
            tracker.observe(message);
            if let ProtocolMessage::Record(record) = message {
                *expected.entry(record.stream.clone()).or_default() += 1;
            }
        }

        let last_state = messages.iter().rev().find_map(|m| match m {
            ProtocolMessage::State(state) => Some(state.clone()),
            _ => None,
        });
        let (state, stats) = tracker.finalize();

        prop_assert_eq!(state, last_state);
        for stream in ["users", "orders", "events"] {
            prop_assert_eq!(stats.records(stream), expected.get(stream).copied().unwrap_or(0));
        }
        prop_assert_eq!(stats.records_synced, expected.values().sum::<u64>());
    }

    #[test]
    fn mapping_preserves_order_and_payload(
        prefix in "[a-z]{0,4}_?",
        messages in prop::collection::vec(message_strategy(), 0..32),
    ) {
        let mapper = NamespacingMapper::new(Some(prefix.clone()));
        let mapped: Vec<ProtocolMessage> = messages
            .iter()
            .map(|m| mapper.map_message(m).into_owned())
            .collect();

        prop_assert_eq!(mapped.len(), messages.len());
        for (original, mapped) in messages.iter().zip(&mapped) {
            match (original, mapped) {
                (ProtocolMessage::Record(a), ProtocolMessage::Record(b)) => {
                    prop_assert_eq!(&b.stream, &format!("{prefix}{}", a.stream));
                    prop_assert_eq!(&a.data, &b.data);
                }
                (a, b) => {
                    prop_assert_eq!(a, b);
                }
            }
        }
    }
}
