//! Property-based tests for identifier invariants: UUIDv7 timestamp
//! monotonicity and AGNTCY schema identifier round-tripping.

use amtp_gateway::identifiers::SchemaId;
use proptest::prelude::*;

prop_compose! {
    fn arb_schema_part()(part in "[A-Za-z0-9_-]{1,32}") -> String {
        part
    }
}

prop_compose! {
    fn arb_schema_id()(domain in arb_schema_part(), entity in arb_schema_part(), version in 0u64..1_000_000) -> SchemaId {
        SchemaId::new(domain, entity, version)
    }
}

proptest! {
    #[test]
    fn schema_id_round_trips_through_its_wire_form(id in arb_schema_id()) {
        let rendered = id.to_string();
        let parsed = SchemaId::parse(&rendered).unwrap();
        prop_assert_eq!(&id, &parsed);
        prop_assert_eq!(parsed.domain(), id.domain());
        prop_assert_eq!(parsed.entity(), id.entity());
        prop_assert_eq!(parsed.version(), id.version());
    }

    #[test]
    fn schema_id_parse_recovers_exactly_the_parts_it_was_built_from(
        domain in arb_schema_part(),
        entity in arb_schema_part(),
        version in 0u64..1_000_000,
    ) {
        let input = format!("agntcy:{domain}.{entity}.v{version}");
        let parsed = SchemaId::parse(&input).unwrap();
        prop_assert_eq!(parsed.domain(), domain.as_str());
        prop_assert_eq!(parsed.entity(), entity.as_str());
        prop_assert_eq!(parsed.version(), version);
    }

    #[test]
    fn uuidv7_timestamps_are_non_decreasing_for_sequential_generation(delays in prop::collection::vec(0u64..5, 2..8)) {
        use amtp_gateway::identifiers::MessageId;

        let mut last = None;
        for delay_ms in delays {
            std::thread::sleep(std::time::Duration::from_millis(delay_ms));
            let id = MessageId::generate();
            let ts = id.extract_timestamp().unwrap();
            if let Some(prev) = last {
                prop_assert!(prev <= ts);
            }
            last = Some(ts);
        }
    }
}
