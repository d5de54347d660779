use mediaflow::trigger::{Asset, Predicate, PredicateSpec, Trigger};
use serde_json::json;

fn video(name: &str) -> Asset {
    Asset::new("video", name)
}

#[test]
fn test_role_and_extension() {
    let trigger = Trigger::from_yaml(
        r#"
- role: { is: video }
- extension: { is: mp4 }
"#,
    )
    .expect("Failed to parse trigger");

    assert_eq!(trigger.len(), 2);
    assert!(trigger.evaluate(&video("talk.mp4")));
    assert!(!trigger.evaluate(&video("talk.mov")));
    assert!(!trigger.evaluate(&Asset::new("image", "talk.mp4")));
}

#[test]
fn test_combinators() {
    let trigger = Trigger::from_yaml(
        r#"
- any:
    - extension: { is: mp4 }
    - extension: { is: mov }
- not:
    role: { is: thumbnail }
"#,
    )
    .unwrap();

    assert!(trigger.evaluate(&video("a.mp4")));
    assert!(trigger.evaluate(&video("a.mov")));
    assert!(!trigger.evaluate(&video("a.avi")));
    assert!(!trigger.evaluate(&Asset::new("thumbnail", "a.mp4")));
}

#[test]
fn test_and_or_aliases() {
    let trigger = Trigger::from_yaml(
        r#"
- or:
    - and:
        - role: { is: video }
        - extension: { is: flv }
    - role: { is: audio }
"#,
    )
    .unwrap();

    assert!(trigger.evaluate(&video("a.flv")));
    assert!(trigger.evaluate(&Asset::new("audio", "a.ogg")));
    assert!(!trigger.evaluate(&video("a.mp4")));
}

#[test]
fn test_empty_trigger_matches_everything() {
    let trigger = Trigger::parse(&[]).unwrap();
    assert!(trigger.is_empty());
    assert!(trigger.evaluate(&Asset::new("anything", "x.bin")));

    // An empty `all` is vacuously true, an empty `any` never matches.
    assert!(Trigger::parse(&[PredicateSpec::All(vec![])]).unwrap().evaluate(&video("a.mp4")));
    assert!(!Trigger::parse(&[PredicateSpec::Any(vec![])]).unwrap().evaluate(&video("a.mp4")));
}

#[test]
fn test_extension_with_leading_dot() {
    let predicate = Predicate::parse(&PredicateSpec::extension(".mp4")).unwrap();
    assert!(predicate.evaluate(&video("a.mp4")));
}

#[test]
fn test_attribute_predicate() {
    let asset = video("a.mp4").with_attribute("height", 720).with_attribute("codec", "h264");

    let trigger = Trigger::parse(&[
        PredicateSpec::attribute("codec", "h264"),
        PredicateSpec::attribute("height", "720"),
    ])
    .unwrap();
    assert!(trigger.evaluate(&asset));

    let missing = Trigger::parse(&[PredicateSpec::attribute("lang", "en")]).unwrap();
    assert!(!missing.evaluate(&asset));
}

#[test]
fn test_expression_predicate() {
    let trigger = Trigger::from_yaml(
        r#"
- expression: "${height} >= 720 && role == \"video\""
"#,
    )
    .unwrap();

    assert!(trigger.evaluate(&video("a.mp4").with_attribute("height", 1080)));
    assert!(!trigger.evaluate(&video("a.mp4").with_attribute("height", 480)));
    // Unknown variable: evaluation fails and the predicate does not match.
    assert!(!trigger.evaluate(&video("a.mp4")));
}

#[test]
fn test_invalid_expression_is_rejected() {
    let err = Trigger::parse(&[PredicateSpec::Expression("(height == 1".to_string())]).unwrap_err();
    assert!(err.to_string().contains("Invalid trigger expression"));
}

#[test]
fn test_not_takes_exactly_one_operand() {
    let result = Trigger::from_yaml(
        r#"
- not:
    - role: { is: video }
    - role: { is: audio }
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_unknown_predicate_is_rejected() {
    let result = Trigger::from_yaml("- colour: { is: red }\n");
    assert!(result.is_err());
}

#[test]
fn test_json_form() {
    let specs: Vec<PredicateSpec> = serde_json::from_value(json!([
        { "role": { "is": "video" } },
        { "not": { "extension": { "is": "avi" } } }
    ]))
    .unwrap();
    let trigger = Trigger::parse(&specs).unwrap();
    assert!(trigger.evaluate(&video("a.mkv")));
    assert!(!trigger.evaluate(&video("a.avi")));
}
