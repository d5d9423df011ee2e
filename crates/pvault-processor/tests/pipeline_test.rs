//! End-to-end batch scenarios through `VaultProcessor::process_batch`.

use pvault_cas::{Reference, FS_URI_PREFIX, HASH_URI_PREFIX};
use pvault_config::VaultMode;
use pvault_processor::testing::{first_span, single_span_traces, span, traces_of, TestEnvironment};
use pvault_processor::{AttributeValue, SpanEvent};

const MESSAGES: &str = "gen_ai.input.messages";
const SENSITIVE: &str = "hello world, this is sensitive";

fn retrieve(env: &TestEnvironment, encoded: &str) -> Vec<u8> {
    let processor = env
        .processor(&[MESSAGES], 0, VaultMode::ReplaceWithRef)
        .unwrap();
    let reference = Reference::decode(encoded).unwrap();
    processor.store().retrieve(&reference).unwrap()
}

#[test]
fn test_replace_with_ref() {
    let env = TestEnvironment::new().unwrap();
    let processor = env.processor(&[MESSAGES], 0, VaultMode::ReplaceWithRef).unwrap();

    processor
        .process_batch(single_span_traces(&[(MESSAGES, SENSITIVE)]))
        .unwrap();

    let out = env.forwarded().unwrap();
    let attrs = &first_span(&out).unwrap().attributes;
    let replaced = attrs.get_str(MESSAGES).unwrap();
    let vault_ref = attrs.get_str("gen_ai.input.messages.vault_ref").unwrap();

    assert_eq!(replaced, vault_ref);
    let reference = Reference::decode(replaced).unwrap();
    assert!(reference.uri.starts_with(FS_URI_PREFIX));
    assert_eq!(reference.size_bytes, SENSITIVE.len() as i64);
    assert!(!reference.encrypted);
    assert_eq!(retrieve(&env, replaced), SENSITIVE.as_bytes());
}

#[test]
fn test_remove() {
    let env = TestEnvironment::new().unwrap();
    let processor = env.processor(&[MESSAGES], 0, VaultMode::Remove).unwrap();

    processor
        .process_batch(single_span_traces(&[(MESSAGES, SENSITIVE), ("http.method", "POST")]))
        .unwrap();

    let out = env.forwarded().unwrap();
    let attrs = &first_span(&out).unwrap().attributes;
    assert!(!attrs.contains_key(MESSAGES));
    assert_eq!(attrs.get_str("http.method"), Some("POST"));

    let vault_ref = attrs.get_str("gen_ai.input.messages.vault_ref").unwrap();
    assert_eq!(retrieve(&env, vault_ref), SENSITIVE.as_bytes());
}

#[test]
fn test_drop_alias_behaves_like_remove() {
    let mode: VaultMode = "drop".parse().unwrap();
    assert_eq!(mode, VaultMode::Remove);
}

#[test]
fn test_keep_and_ref() {
    let env = TestEnvironment::new().unwrap();
    let processor = env.processor(&[MESSAGES], 0, VaultMode::KeepAndRef).unwrap();

    processor
        .process_batch(single_span_traces(&[(MESSAGES, SENSITIVE)]))
        .unwrap();

    let out = env.forwarded().unwrap();
    let attrs = &first_span(&out).unwrap().attributes;
    assert_eq!(attrs.get_str(MESSAGES), Some(SENSITIVE));

    let vault_ref = attrs.get_str("gen_ai.input.messages.vault_ref").unwrap();
    assert_eq!(retrieve(&env, vault_ref), SENSITIVE.as_bytes());
}

#[test]
fn test_threshold_boundary() {
    let env = TestEnvironment::new().unwrap();
    let processor = env
        .processor(&["gen_ai.prompt", "gen_ai.completion"], 50, VaultMode::ReplaceWithRef)
        .unwrap();

    let short = "x".repeat(49);
    let exact = "y".repeat(50);
    processor
        .process_batch(single_span_traces(&[
            ("gen_ai.prompt", short.as_str()),
            ("gen_ai.completion", exact.as_str()),
        ]))
        .unwrap();

    let out = env.forwarded().unwrap();
    let attrs = &first_span(&out).unwrap().attributes;
    assert_eq!(attrs.get_str("gen_ai.prompt"), Some(short.as_str()));
    assert!(!attrs.contains_key("gen_ai.prompt.vault_ref"));

    let replaced = attrs.get_str("gen_ai.completion").unwrap();
    assert!(Reference::decode(replaced).is_ok());
    assert_eq!(env.stored_file_count(), 1);
}

#[test]
fn test_non_eligible_attributes_pass_through() {
    let env = TestEnvironment::new().unwrap();
    let processor = env.processor(&["gen_ai.prompt"], 0, VaultMode::Remove).unwrap();

    let large = "z".repeat(100_000);
    let mut input = span(&[("http.url", large.as_str()), ("gen_ai.system", "openai")]);
    input.attributes.insert("gen_ai.usage.input_tokens", 1234i64);
    input.attributes.insert("gen_ai.prompt", AttributeValue::Int(7));
    let before = input.clone();

    processor.process_batch(traces_of(vec![input])).unwrap();

    let out = env.forwarded().unwrap();
    assert_eq!(first_span(&out).unwrap(), &before);
    assert_eq!(env.stored_file_count(), 0);
}

#[test]
fn test_pii_prompt_is_removed_from_record() {
    let env = TestEnvironment::new().unwrap();
    let processor = env
        .processor(&["gen_ai.prompt", "gen_ai.completion"], 0, VaultMode::ReplaceWithRef)
        .unwrap();

    let prompt = "My SSN is 123-45-6789 and my card is 4111-1111-1111-1111";
    processor
        .process_batch(single_span_traces(&[("gen_ai.prompt", prompt)]))
        .unwrap();

    let out = env.forwarded().unwrap();
    let serialized = serde_json::to_string(&out).unwrap();
    assert!(!serialized.contains("123-45-6789"));

    let vault_ref = first_span(&out).unwrap().attributes.get_str("gen_ai.prompt.vault_ref").unwrap();
    let reference = Reference::decode(vault_ref).unwrap();
    let processor_store = processor.store();
    assert_eq!(processor_store.retrieve(&reference).unwrap(), prompt.as_bytes());
}

#[test]
fn test_large_payload() {
    let env = TestEnvironment::new().unwrap();
    let processor = env.processor(&["gen_ai.completion"], 1024, VaultMode::ReplaceWithRef).unwrap();

    let completion: String = "The quick brown fox jumps over the lazy dog. "
        .chars()
        .cycle()
        .take(50 * 1024)
        .collect();
    processor
        .process_batch(single_span_traces(&[("gen_ai.completion", completion.as_str())]))
        .unwrap();

    let out = env.forwarded().unwrap();
    let encoded = first_span(&out).unwrap().attributes.get_str("gen_ai.completion").unwrap();
    assert!(encoded.len() < 512);

    let reference = Reference::decode(encoded).unwrap();
    assert_eq!(reference.size_bytes, 50 * 1024);
    assert_eq!(processor.store().retrieve(&reference).unwrap(), completion.as_bytes());
}

#[test]
fn test_event_scoped_offload_is_retrievable() {
    let env = TestEnvironment::new().unwrap();
    let processor = env.processor(&["gen_ai.prompt"], 0, VaultMode::ReplaceWithRef).unwrap();

    let mut input = span(&[("gen_ai.system", "openai")]);
    input.events.push(SpanEvent {
        name: "gen_ai.user.message".to_string(),
        attributes: [("role", "user")].into_iter().collect(),
    });
    input.events.push(SpanEvent {
        name: "gen_ai.user.message".to_string(),
        attributes: [("gen_ai.prompt", "deeply nested prompt"), ("role", "user")]
            .into_iter()
            .collect(),
    });
    let span_id = input.span_id.to_string();
    let trace_id = input.trace_id.to_string();

    processor.process_batch(traces_of(vec![input])).unwrap();

    let out = env.forwarded().unwrap();
    let event = &first_span(&out).unwrap().events[1];
    assert_eq!(event.attributes.get_str("role"), Some("user"));

    let reference = Reference::decode(event.attributes.get_str("gen_ai.prompt").unwrap()).unwrap();
    assert_eq!(
        reference.uri,
        format!("{}{}/{}/event_1/gen_ai.prompt", FS_URI_PREFIX, trace_id, span_id)
    );

    let on_disk = env
        .base_path
        .join(&trace_id)
        .join(&span_id)
        .join("event_1")
        .join("gen_ai.prompt");
    assert_eq!(std::fs::read(on_disk).unwrap(), b"deeply nested prompt");
    assert_eq!(
        processor.store().retrieve(&reference).unwrap(),
        b"deeply nested prompt"
    );
}

#[test]
fn test_record_count_and_order_preserved() {
    let env = TestEnvironment::new().unwrap();
    let processor = env.processor(&["gen_ai.prompt"], 0, VaultMode::Remove).unwrap();

    let spans: Vec<_> = (0..20)
        .map(|i| {
            let prompt = format!("prompt number {}", i);
            let seq = i.to_string();
            span(&[("gen_ai.prompt", prompt.as_str()), ("seq", seq.as_str())])
        })
        .collect();
    let ids: Vec<_> = spans.iter().map(|s| s.span_id).collect();

    processor.process_batch(traces_of(spans)).unwrap();

    let out = env.forwarded().unwrap();
    assert_eq!(out.span_count(), 20);
    for (i, (span, id)) in out.spans().zip(&ids).enumerate() {
        assert_eq!(&span.span_id, id);
        assert_eq!(span.attributes.get_str("seq"), Some(i.to_string().as_str()));
        assert!(span.attributes.contains_key("gen_ai.prompt.vault_ref"));
    }
}

#[test]
fn test_hash_layout_dedups_identical_content() {
    let env = TestEnvironment::new().unwrap();
    let processor = env
        .hash_processor(&["gen_ai.prompt"], 0, VaultMode::ReplaceWithRef)
        .unwrap();

    let traces = traces_of(vec![
        span(&[("gen_ai.prompt", "same system prompt")]),
        span(&[("gen_ai.prompt", "same system prompt")]),
    ]);
    processor.process_batch(traces).unwrap();

    let out = env.forwarded().unwrap();
    let refs: Vec<Reference> = out
        .spans()
        .map(|s| Reference::decode(s.attributes.get_str("gen_ai.prompt").unwrap()).unwrap())
        .collect();

    assert!(refs[0].uri.starts_with(HASH_URI_PREFIX));
    assert_eq!(refs[0], refs[1]);
    assert_eq!(env.stored_file_count(), 1);
    assert_eq!(
        processor.store().retrieve(&refs[0]).unwrap(),
        b"same system prompt"
    );
}

#[test]
fn test_reprocessing_forwarded_batch_is_stable() {
    let env = TestEnvironment::new().unwrap();
    let processor = env.processor(&["gen_ai.prompt"], 0, VaultMode::ReplaceWithRef).unwrap();

    processor
        .process_batch(single_span_traces(&[("gen_ai.prompt", "once only")]))
        .unwrap();
    let first = env.forwarded().unwrap();
    env.sink.reset();

    processor.process_batch(first.clone()).unwrap();
    assert_eq!(env.forwarded().unwrap(), first);
}

#[test]
fn test_raw_sibling_does_not_suppress_offload() {
    let ssn = "My SSN is 123-45-6789";

    for mode in [VaultMode::Remove, VaultMode::ReplaceWithRef] {
        let env = TestEnvironment::new().unwrap();
        let processor = env.processor(&["gen_ai.prompt"], 0, mode).unwrap();

        processor
            .process_batch(single_span_traces(&[
                ("gen_ai.prompt", ssn),
                ("gen_ai.prompt.vault_ref", ssn),
            ]))
            .unwrap();

        let out = env.forwarded().unwrap();
        let attrs = &first_span(&out).unwrap().attributes;
        assert!(!serde_json::to_string(&out).unwrap().contains("123-45-6789"), "mode {}", mode);
        if mode == VaultMode::Remove {
            assert!(!attrs.contains_key("gen_ai.prompt"));
        }

        let reference =
            Reference::decode(attrs.get_str("gen_ai.prompt.vault_ref").unwrap()).unwrap();
        assert_eq!(processor.store().retrieve(&reference).unwrap(), ssn.as_bytes());
        assert_eq!(env.stored_file_count(), 1);
    }
}
