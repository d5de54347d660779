use mediaflow::actions::RunnerRegistry;
use mediaflow::compiler::core::Compiler;
use mediaflow::compiler::loader;
use mediaflow::dsl::builder::WorkflowBuilder;
use mediaflow::runtime::catalog::Catalog;
use mediaflow::trigger::{Asset, PredicateSpec};
use std::fs;

const VIDEO_WORKFLOW: &str = r#"
id: "archive-video"
name: "Video archiving"
trigger:
  - role: { is: video }
  - any:
      - extension: { is: mp4 }
      - extension: { is: mov }
tasks:
  - name: encode
    run: command
    params:
      program: ffmpeg
      args: ["-i", "in.mp4", "out.flv"]
  - name: notify
    run: log
    params:
      msg: "encoded"
    depends-on: [encode]
"#;

#[test]
fn test_load_simple_yaml_workflow() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("video.yaml");
    fs::write(&file_path, VIDEO_WORKFLOW).expect("Failed to write temp file");

    let loaded_workflow = loader::load_workflow_from_yaml(&file_path)
        .expect("Failed to load workflow from YAML");

    let expected_workflow = WorkflowBuilder::new("archive-video")
        .name("Video archiving")
        .when(PredicateSpec::role("video"))
        .when(PredicateSpec::Any(vec![
            PredicateSpec::extension("mp4"),
            PredicateSpec::extension("mov"),
        ]))
        .task("encode", "command")
            .param("program", "ffmpeg")
            .param("args", serde_json::json!(["-i", "in.mp4", "out.flv"]))
            .build()
        .task("notify", "log")
            .param("msg", "encoded")
            .after("encode")
            .build()
        .build();

    assert_eq!(loaded_workflow, expected_workflow);
}

#[test]
fn test_compile_resolves_dependencies() {
    let document = loader::parse_workflow(VIDEO_WORKFLOW).unwrap();
    let registry = RunnerRegistry::with_builtins();
    let definition = Compiler::with_registry(&registry).compile(document).unwrap();

    assert_eq!(definition.id, "archive-video");
    assert_eq!(definition.name, "Video archiving");
    assert_eq!(definition.tasks.len(), 2);
    assert_eq!(definition.task("notify").unwrap().depends_on, vec![0]);
    assert_eq!(definition.roots().collect::<Vec<_>>(), vec![0]);
    assert!(definition.matches(&Asset::new("video", "talk.mov")));
    assert!(!definition.matches(&Asset::new("video", "talk.avi")));
}

#[test]
fn test_name_defaults_to_id() {
    let document = loader::parse_workflow("id: bare\ntasks: []\n").unwrap();
    let definition = Compiler::new().compile(document).unwrap();
    assert_eq!(definition.name, "bare");
    assert!(definition.trigger.is_empty());
}

fn compile_error(yaml: &str) -> String {
    let registry = RunnerRegistry::with_builtins();
    let result = loader::parse_workflow(yaml)
        .and_then(|document| Compiler::with_registry(&registry).compile(document));
    match result {
        Ok(_) => panic!("workflow should have been rejected:\n{}", yaml),
        Err(e) => format!("{:#}", e),
    }
}

#[test]
fn test_invalid_documents_are_rejected() {
    let err = compile_error(
        "id: dup\ntasks:\n  - { name: a, run: log }\n  - { name: a, run: log }\n",
    );
    assert!(err.contains("Duplicate task name"), "{}", err);

    let err = compile_error("id: unknown-dep\ntasks:\n  - { name: a, run: log, depends-on: [ghost] }\n");
    assert!(err.contains("ghost"), "{}", err);

    let err = compile_error("id: self\ntasks:\n  - { name: a, run: log, depends-on: [a] }\n");
    assert!(err.contains("depends on itself"), "{}", err);

    let err = compile_error(
        "id: cycle\ntasks:\n  - { name: a, run: log, depends-on: [b] }\n  - { name: b, run: log, depends-on: [a] }\n",
    );
    assert!(err.contains("cycle"), "{}", err);

    let err = compile_error("id: impl\ntasks:\n  - { name: a, run: teleport }\n");
    assert!(err.contains("Unknown implementation"), "{}", err);

    let err = compile_error("id: params\ntasks:\n  - { name: a, run: delay }\n");
    assert!(err.contains("seconds"), "{}", err);

    let err = compile_error("id: fields\ntasks:\n  - { name: a, run: log, retries: 3 }\n");
    assert!(err.contains("retries"), "{}", err);

    let err = compile_error("id: \"\"\ntasks: []\n");
    assert!(err.contains("id"), "{}", err);
}

#[test]
fn test_load_dir_skips_invalid_files() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::write(temp_dir.path().join("a-video.yaml"), VIDEO_WORKFLOW).unwrap();
    fs::write(
        temp_dir.path().join("b-images.yml"),
        "id: images\ntrigger:\n  - role: { is: image }\ntasks:\n  - { name: log, run: log }\n",
    )
    .unwrap();
    fs::write(temp_dir.path().join("c-broken.yaml"), "id: broken\ntasks: [").unwrap();
    fs::write(
        temp_dir.path().join("d-cycle.yaml"),
        "id: cycle\ntasks:\n  - { name: a, run: log, depends-on: [a] }\n",
    )
    .unwrap();
    fs::write(temp_dir.path().join("notes.txt"), "not a workflow").unwrap();

    let registry = RunnerRegistry::with_builtins();
    let definitions = loader::load_workflow_dir(temp_dir.path(), &registry).unwrap();
    let ids: Vec<&str> = definitions.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["archive-video", "images"]);

    let catalog = Catalog::new();
    assert_eq!(catalog.load_dir(temp_dir.path(), &registry).unwrap(), 2);
    assert_eq!(catalog.ids(), vec!["archive-video", "images"]);

    let matching = catalog.matching(&Asset::new("image", "cover.png"));
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0].id, "images");
}

#[test]
fn test_missing_dir_is_an_error() {
    let registry = RunnerRegistry::with_builtins();
    assert!(loader::load_workflow_dir("/definitely/not/here", &registry).is_err());
}
