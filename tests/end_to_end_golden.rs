use lorebook_core::activation::ApproxTokenCounter;
use lorebook_core::lorebook::{ActiveLorebook, Entry, Lorebook, LorebookId};
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

#[test]
fn golden_dragon_scenario() {
    // ------------------------------------------------------------
    // 1. A recursive lorebook where one entry's content names another's key
    // ------------------------------------------------------------
    let mut lorebook = Lorebook::new(LorebookId::new(1), "Bestiary");
    lorebook.recursive_scanning = true;
    lorebook.entries = vec![
        make_entry(1, &["dragon"], "Dragons breathe fire."),
        make_entry(2, &["fire"], "Fire burns."),
    ];

    let messages = vec![ChatMessage::new("User", "The dragon roared")];
    let request = ActivationRequest {
        lorebooks: vec![ActiveLorebook::global(&lorebook)],
        messages: &messages,
        turn_index: 0,
    };

    // ------------------------------------------------------------
    // 2. Activate
    // ------------------------------------------------------------
    let engine = ActivationEngine::default();
    let result = engine.activate(&request, &mut ChatSession::new()).unwrap();

    // ------------------------------------------------------------
    // 3. Snapshot assertion (freeze contract)
    // ------------------------------------------------------------
    let json = serde_json::to_string_pretty(&result).unwrap();
    let expected = r#"{
  "injections": [
    {
      "position": "before_char",
      "depth": null,
      "text": "Dragons breathe fire.",
      "source_entry_id": "1/1",
      "tokens": 6
    },
    {
      "position": "before_char",
      "depth": null,
      "text": "Fire burns.",
      "source_entry_id": "1/2",
      "tokens": 3
    }
  ],
  "overflowed": false,
  "activated_entry_ids": [
    "1/1",
    "1/2"
  ],
  "metadata": {
    "budget": 2048,
    "tokens_used": 9,
    "entries_considered": 2,
    "entries_skipped_as_duplicate": 0,
    "entries_activated": 2,
    "entries_dropped_by_group": 0,
    "entries_excluded_by_budget": 0,
    "recursion_rounds": 3,
    "recursion_truncated": false
  }
}"#;

    assert_eq!(json.trim(), expected.trim(), "Golden snapshot mismatch");

    let restored: ActivationResult = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, result);
}

#[test]
fn include_names_puts_speakers_in_the_window() {
    let mut lorebook = Lorebook::new(LorebookId::new(1), "Cast");
    lorebook.entries = vec![make_entry(1, &["Seraphina"], "Seraphina is a forest guardian.")];
    let messages = vec![ChatMessage::new("Seraphina", "Welcome, traveler.")];

    let run = |lorebook: &Lorebook| {
        let request = ActivationRequest {
            lorebooks: vec![ActiveLorebook::global(lorebook)],
            messages: &messages,
            turn_index: 0,
        };
        ActivationEngine::default()
            .activate(&request, &mut ChatSession::new())
            .unwrap()
    };

    assert_eq!(run(&lorebook).activated_entry_ids.len(), 1);

    lorebook.include_names = false;
    assert!(run(&lorebook).activated_entry_ids.is_empty());
}

#[test]
fn scan_depth_limits_the_window() {
    let mut lorebook = Lorebook::new(LorebookId::new(1), "Depth");
    lorebook.scan_depth = 1;
    lorebook.entries = vec![
        make_entry(1, &["harbor"], "The harbor is busy."),
        Entry {
            scan_depth: Some(3),
            ..make_entry(2, &["harbor"], "Ships crowd the harbor.")
        },
    ];
    let messages = vec![
        ChatMessage::new("User", "We sail into the harbor"),
        ChatMessage::new("Guide", "Mind the rocks"),
        ChatMessage::new("User", "Onward"),
    ];
    let request = ActivationRequest {
        lorebooks: vec![ActiveLorebook::global(&lorebook)],
        messages: &messages,
        turn_index: 0,
    };

    let result = ActivationEngine::default()
        .activate(&request, &mut ChatSession::new())
        .unwrap();

    let ids: Vec<&str> = result.activated_entry_ids.iter().map(|id| id.as_str()).collect();
    assert_eq!(ids, vec!["1/2"], "only the entry with a deeper override sees the harbor");
}

#[test]
fn seeded_probability_is_deterministic() {
    let mut lorebook = Lorebook::new(LorebookId::new(1), "Chance");
    lorebook.entries = (0..20)
        .map(|i| Entry {
            use_probability: true,
            probability: 50,
            ..make_entry(i, &["coin"], &format!("Outcome {i}."))
        })
        .collect();
    let messages = vec![ChatMessage::new("User", "I flip a coin")];
    let request = ActivationRequest {
        lorebooks: vec![ActiveLorebook::global(&lorebook)],
        messages: &messages,
        turn_index: 0,
    };
    let engine = ActivationEngine::new(
        ApproxTokenCounter,
        ActivationSettings {
            recursive_scanning: false,
            ..ActivationSettings::default()
        },
    );

    let first = engine
        .activate_with_rng(&request, &mut ChatSession::new(), &mut StdRng::seed_from_u64(11))
        .unwrap();
    let second = engine
        .activate_with_rng(&request, &mut ChatSession::new(), &mut StdRng::seed_from_u64(11))
        .unwrap();

    assert_eq!(
        serde_json::to_string_pretty(&first).unwrap(),
        serde_json::to_string_pretty(&second).unwrap(),
        "Activation output is not deterministic"
    );
    assert!(first.activated_entry_ids.len() < 20);
    assert!(!first.activated_entry_ids.is_empty());
}

#[test]
fn repeated_lorebook_is_evaluated_once() {
    let mut lorebook = Lorebook::new(LorebookId::new(1), "Twice");
    lorebook.entries = vec![
        make_entry(1, &["moon"], "A moon."),
        make_entry(2, &["moon"], "Another moon."),
    ];
    let messages = vec![ChatMessage::new("User", "Look at the moon")];
    let request = ActivationRequest {
        lorebooks: vec![ActiveLorebook::global(&lorebook), ActiveLorebook::global(&lorebook)],
        messages: &messages,
        turn_index: 0,
    };

    let result = ActivationEngine::default()
        .activate(&request, &mut ChatSession::new())
        .unwrap();

    assert_eq!(result.injections.len(), 2);
    assert_eq!(result.metadata.entries_considered, 2);
    assert_eq!(result.metadata.entries_skipped_as_duplicate, 2);
}
