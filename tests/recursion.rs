use std::time::Duration;

use lorebook_core::activation::{
    run_recursion, ApproxTokenCounter, Candidate, KeyMatcher, MatchOptions, RecursionLimits,
    ScanBuffer,
};
use lorebook_core::lorebook::{ActiveLorebook, Entry, EntryId, Lorebook, LorebookId};
use lorebook_core::types::{ActivationResult, ChatMessage};
use lorebook_core::{ActivationEngine, ActivationRequest, ActivationSettings, ChatSession};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn make_entry(id: i64, keys: &[&str], content: &str) -> Entry {
    Entry {
        id,
        ..Entry::new(keys.iter().copied(), content)
    }
}

fn recursive_book(entries: Vec<Entry>) -> Lorebook {
    let mut lorebook = Lorebook::new(LorebookId::new(1), "recursion");
    lorebook.recursive_scanning = true;
    lorebook.entries = entries;
    lorebook
}

fn id(entry: i64) -> EntryId {
    EntryId::new(LorebookId::new(1), entry)
}

fn activate(lorebook: &Lorebook, settings: ActivationSettings, lines: &[&str]) -> ActivationResult {
    let messages: Vec<ChatMessage> = lines.iter().map(|l| ChatMessage::new("User", *l)).collect();
    let engine = ActivationEngine::new(ApproxTokenCounter, settings);
    let request = ActivationRequest {
        lorebooks: vec![ActiveLorebook::global(lorebook)],
        messages: &messages,
        turn_index: 0,
    };
    engine.activate(&request, &mut ChatSession::new()).unwrap()
}

fn dragon_and_fire() -> (Entry, Entry) {
    (
        make_entry(1, &["dragon"], "Dragons breathe fire."),
        make_entry(2, &["fire"], "Fire burns."),
    )
}

#[test]
fn activated_content_triggers_the_next_round() {
    let (dragon, fire) = dragon_and_fire();
    let lorebook = recursive_book(vec![dragon, fire]);

    let result = activate(&lorebook, ActivationSettings::default(), &["The dragon roared"]);

    assert!(result.is_activated(&id(1)));
    assert!(result.is_activated(&id(2)), "round 1 sees 'Dragons breathe fire.'");
    // Round 0, round 1, then an empty round 2.
    assert_eq!(result.metadata.recursion_rounds, 3);
    assert!(!result.metadata.recursion_truncated);
}

#[test]
fn recursion_disabled_in_settings_runs_a_single_pass() {
    let (dragon, fire) = dragon_and_fire();
    let lorebook = recursive_book(vec![dragon, fire]);
    let settings = ActivationSettings {
        recursive_scanning: false,
        ..ActivationSettings::default()
    };

    let result = activate(&lorebook, settings, &["The dragon roared"]);

    assert!(result.is_activated(&id(1)));
    assert!(!result.is_activated(&id(2)));
    assert_eq!(result.metadata.recursion_rounds, 1);
}

#[test]
fn non_recursive_lorebook_does_not_feed_its_content_back() {
    let (dragon, fire) = dragon_and_fire();
    let mut lorebook = recursive_book(vec![dragon, fire]);
    lorebook.recursive_scanning = false;

    let result = activate(&lorebook, ActivationSettings::default(), &["The dragon roared"]);

    assert!(result.is_activated(&id(1)));
    assert!(!result.is_activated(&id(2)));
}

#[test]
fn prevent_recursion_keeps_content_out_of_the_buffer() {
    let (mut dragon, fire) = dragon_and_fire();
    dragon.prevent_recursion = true;
    let lorebook = recursive_book(vec![dragon, fire]);

    let result = activate(&lorebook, ActivationSettings::default(), &["The dragon roared"]);

    assert!(result.is_activated(&id(1)));
    assert!(!result.is_activated(&id(2)));
}

#[test]
fn exclude_recursion_keeps_content_out_of_the_buffer() {
    let (mut dragon, fire) = dragon_and_fire();
    dragon.exclude_recursion = true;
    let lorebook = recursive_book(vec![dragon, fire]);

    let result = activate(&lorebook, ActivationSettings::default(), &["The dragon roared"]);

    assert!(!result.is_activated(&id(2)));
}

#[test]
fn exclude_recursion_entry_only_matches_chat_text() {
    let (dragon, mut fire) = dragon_and_fire();
    fire.exclude_recursion = true;
    let lorebook = recursive_book(vec![dragon, fire]);

    let result = activate(&lorebook, ActivationSettings::default(), &["The dragon roared"]);
    assert!(!result.is_activated(&id(2)));

    let result = activate(&lorebook, ActivationSettings::default(), &["The dragon roared by the fire"]);
    assert!(result.is_activated(&id(2)));
}

#[test]
fn delay_until_recursion_waits_for_round_one() {
    let (dragon, fire) = dragon_and_fire();
    let lair = Entry {
        delay_until_recursion: true,
        ..make_entry(3, &["dragon"], "The lair is deep.")
    };
    let lorebook = recursive_book(vec![dragon, fire, lair]);

    let result = activate(&lorebook, ActivationSettings::default(), &["The dragon roared"]);
    assert!(result.is_activated(&id(3)));

    // Alone, nothing activates on round 0, so there is no round 1.
    let lair_only = recursive_book(vec![Entry {
        delay_until_recursion: true,
        ..make_entry(3, &["dragon"], "The lair is deep.")
    }]);
    let result = activate(&lair_only, ActivationSettings::default(), &["The dragon roared"]);
    assert!(!result.is_activated(&id(3)));
}

#[test]
fn pathological_chain_stops_at_round_limit() {
    // Entry i is triggered by "k{i}" and mentions "k{i+1}".
    let entries: Vec<Entry> = (0..50)
        .map(|i| make_entry(i, &[format!("k{i}").as_str()], &format!("k{}", i + 1)))
        .collect();
    let lorebook = recursive_book(entries);
    let settings = ActivationSettings {
        max_recursion_rounds: 10,
        ..ActivationSettings::default()
    };

    let result = activate(&lorebook, settings, &["k0"]);

    assert_eq!(result.activated_entry_ids.len(), 10);
    assert_eq!(result.metadata.recursion_rounds, 10);
    assert!(result.metadata.recursion_truncated);
    assert!(result.injections.len() <= 10);
}

#[test]
fn mutually_referencing_entries_terminate() {
    // Every entry's content carries every other entry's key.
    let keys: Vec<String> = (0..5).map(|i| format!("word{i}")).collect();
    let entries: Vec<Entry> = (0..5)
        .map(|i| {
            let others: Vec<&str> = keys
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, k)| k.as_str())
                .collect();
            make_entry(i as i64, &[keys[i].as_str()], &others.join(" "))
        })
        .collect();
    let lorebook = recursive_book(entries);

    let result = activate(&lorebook, ActivationSettings::default(), &["word0"]);

    assert_eq!(result.activated_entry_ids.len(), 5);
    assert_eq!(result.injections.len(), 5);
    assert!(!result.metadata.recursion_truncated);
    assert!(result.metadata.recursion_rounds <= 5);
}

#[test]
fn zero_round_limit_still_runs_round_zero() {
    let (dragon, fire) = dragon_and_fire();
    let lorebook = recursive_book(vec![dragon, fire]);
    let settings = ActivationSettings {
        max_recursion_rounds: 0,
        ..ActivationSettings::default()
    };

    let result = activate(&lorebook, settings, &["The dragon roared"]);

    assert!(result.is_activated(&id(1)));
    assert!(!result.is_activated(&id(2)));
    assert!(result.metadata.recursion_truncated);
}

#[test]
fn elapsed_timeout_truncates_with_partial_results() {
    let (dragon, fire) = dragon_and_fire();
    let lorebook = recursive_book(vec![dragon, fire]);
    let candidates: Vec<Candidate<'_>> = lorebook
        .entries
        .iter()
        .enumerate()
        .map(|(rank, entry)| Candidate {
            id: EntryId::new(lorebook.id, entry.id),
            entry,
            lorebook: &lorebook,
            rank,
            forced: false,
            matcher: KeyMatcher::compile(entry, MatchOptions::resolve(entry, &lorebook)),
        })
        .collect();
    let messages = vec![ChatMessage::new("User", "The dragon roared")];
    let mut buffer = ScanBuffer::new(&messages);
    let limits = RecursionLimits {
        recursive: true,
        max_rounds: 100,
        timeout: Some(Duration::ZERO),
    };

    let outcome = run_recursion(&candidates, &mut buffer, limits, &mut StdRng::seed_from_u64(1));

    assert_eq!(outcome.activated, vec![0], "round 0 results are kept");
    assert_eq!(outcome.rounds, 1);
    assert!(outcome.truncated);
    assert_eq!(buffer.recursion_text(), "Dragons breathe fire.");
}
