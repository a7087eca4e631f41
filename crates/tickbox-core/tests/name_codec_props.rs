//! Property tests for ticket-name and tag normalization grammar.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tickbox_core::codec::{self, SUFFIX_BOUND};
use tickbox_core::tracker::normalize_tags;

fn is_clean_slug(slug: &str) -> bool {
    slug.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(2000))]

    #[test]
    fn slug_only_uses_allowed_characters(title in "\\PC{0,60}") {
        prop_assert!(is_clean_slug(&codec::slug(&title)));
    }

    #[test]
    fn slug_is_idempotent(title in "\\PC{0,60}") {
        let once = codec::slug(&title);
        prop_assert_eq!(codec::slug(&once), once);
    }

    #[test]
    fn ticket_name_matches_grammar(
        title in "[A-Za-z0-9 !?,._/-]{1,40}",
        epoch in 0i64..4_000_000_000,
        seed in any::<u64>(),
    ) {
        let now = Utc.timestamp_opt(epoch, 0).single().expect("epoch in range");
        let mut rng = StdRng::seed_from_u64(seed);
        let name = codec::create_ticket_name(&title, now, &mut rng);

        let parsed = codec::parse_ticket_name(&name).expect("generated names parse");
        prop_assert_eq!(parsed.epoch, epoch);
        prop_assert!(parsed.suffix < SUFFIX_BOUND);
        prop_assert!(is_clean_slug(&parsed.slug));
        prop_assert_eq!(&parsed.slug, &codec::slug(&title));
        prop_assert_eq!(parsed.humanized_title(), parsed.slug.replace('-', " "));
        prop_assert_eq!(parsed.opened(), Some(now));
    }

    #[test]
    fn humanized_title_matches_lowercased_words(words in prop::collection::vec("[a-z0-9]{1,8}", 1..6)) {
        let title = words.join(" ");
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("epoch in range");
        let mut rng = StdRng::seed_from_u64(1);
        let name = codec::create_ticket_name(&title.to_uppercase(), now, &mut rng);
        let parsed = codec::parse_ticket_name(&name).expect("generated names parse");
        prop_assert_eq!(parsed.humanized_title(), title);
    }

    #[test]
    fn normalized_tags_are_unique_slugs(csv in "[ A-Za-z0-9,!-]{0,60}") {
        let tags = normalize_tags(csv.split(','));
        let mut deduped = tags.clone();
        deduped.sort();
        deduped.dedup();
        prop_assert_eq!(deduped.len(), tags.len());
        for tag in &tags {
            prop_assert!(!tag.is_empty());
            prop_assert!(is_clean_slug(tag));
        }
    }
}
