use proptest::collection::vec;
use proptest::prelude::*;
use scriptdesk_common::delta::{attributes, AttributeMap, Delta};
use scriptdesk_common::normalize::{normalize, normalize_str};
use serde_json::{json, Map, Value};

fn interesting_char() -> impl Strategy<Value = char> {
    prop_oneof![
        (b'a'..=b'z').prop_map(char::from),
        (b'A'..=b'Z').prop_map(char::from),
        Just(' '),
        Just('\n'),
        Just('.'),
        Just(':'),
        Just('🙂'),
        Just('中'),
        Just('é'),
        Just('ש'),
    ]
}

fn run_text(max_len: usize) -> impl Strategy<Value = String> {
    vec(interesting_char(), 1..max_len).prop_map(|chars| chars.into_iter().collect())
}

fn run_attributes() -> impl Strategy<Value = Option<AttributeMap>> {
    prop_oneof![
        3 => Just(None),
        1 => Just(Some(attributes([("bold", json!(true))]))),
        1 => Just(Some(attributes([("italic", json!(true))]))),
        1 => Just(Some(attributes([("bold", json!(true)), ("italic", json!(true))]))),
    ]
}

#[derive(Debug, Clone)]
enum Segment {
    Text(String, Option<AttributeMap>),
    Embed(String),
}

fn segment() -> impl Strategy<Value = Segment> {
    prop_oneof![
        6 => (run_text(24), run_attributes()).prop_map(|(text, attrs)| Segment::Text(text, attrs)),
        1 => prop_oneof![Just("a.png"), Just("b.png")].prop_map(|name| Segment::Embed(name.to_owned())),
    ]
}

fn document() -> impl Strategy<Value = Delta> {
    vec(segment(), 0..8).prop_map(|segments| {
        let mut document = Delta::new();
        for segment in segments {
            document = match segment {
                Segment::Text(text, attrs) => document.insert(text, attrs),
                Segment::Embed(name) => {
                    let mut embed = Map::new();
                    embed.insert("image".into(), Value::String(name));
                    document.insert_embed(embed, None)
                }
            };
        }
        document.insert("\n", None)
    })
}

fn format_patch(doc_len: usize, start: usize, span: usize, value: Value) -> Delta {
    let start = start % doc_len.max(1);
    let span = span.min(doc_len - start).max(1);
    Delta::new().retain(start, None).retain(span, Some(attributes([("bold", value)])))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn compose_with_diff_reaches_the_target(before in document(), after in document()) {
        let patch = before.diff(&after).expect("documents should diff");
        prop_assert_eq!(before.compose(&patch), after);
    }

    #[test]
    fn compose_is_associative(
        a in document(),
        target in document(),
        start in 0usize..64,
        span in 1usize..16,
        bold in prop_oneof![Just(json!(true)), Just(Value::Null)],
    ) {
        let b = a.diff(&target).expect("documents should diff");
        let c = format_patch(target.length(), start, span, bold);

        let left = a.compose(&b).compose(&c);
        let right = a.compose(&b.compose(&c));
        prop_assert_eq!(left, right);
    }

    #[test]
    fn serialized_documents_normalize_back_to_themselves(doc in document()) {
        prop_assert_eq!(normalize_str(&doc.to_json()), doc.clone());

        let value = serde_json::to_value(&doc).expect("document should serialise");
        prop_assert_eq!(normalize(&value), doc);
    }

    #[test]
    fn diff_of_identical_documents_is_empty(doc in document()) {
        let patch = doc.diff(&doc).expect("documents should diff");
        prop_assert!(patch.ops().is_empty());
    }
}

#[test]
fn diff_handles_large_scripts_with_scattered_rewrites() {
    let mut before = String::new();
    for scene in 0..300 {
        before.push_str(&format!("INT. LOCATION {scene} - DAY\n"));
        before.push_str("A character crosses the room and sits.\n\n");
    }
    let mut after = before.clone();
    for scene in [3, 97, 150, 281] {
        after = after.replacen(
            &format!("INT. LOCATION {scene} - DAY\n"),
            &format!("EXT. LOCATION {scene} - NIGHT\nRain.\n"),
            1,
        );
    }

    let before = Delta::new().insert(before, None);
    let after = Delta::new().insert(after, None);
    let patch = before.diff(&after).expect("documents should diff");
    assert_eq!(before.compose(&patch), after);
    assert!(patch.ops().iter().filter(|op| op.is_insert()).count() >= 4);
}
