/// Script sandbox behaviour seen through the engine: failures, timeouts,
/// batch isolation and catalog lookups.

use std::time::{Duration, Instant};

use arborist::application::Job;
use arborist::formats::{NESTED, NEWICK, TREE};
use arborist::infrastructure::config::{EngineConfig, PoolConfig, RuntimeConfig};
use arborist::ports::MemoryCatalog;
use arborist::{AnalysisSpec, Binding, Data, Engine, EngineError, ExecutionMode, Inputs, OutputRequest, OutputRequests, PortSpec};

fn analysis(name: &str, script: &str, format: &str) -> AnalysisSpec {
    AnalysisSpec::new(
        name,
        vec![PortSpec::new("a", TREE, format)],
        vec![PortSpec::new("b", TREE, format)],
        script,
        None,
    )
    .unwrap()
}

fn inputs(newick: &str) -> Inputs {
    let mut inputs = Inputs::new();
    inputs.insert("a".to_string(), Binding::new(NEWICK, newick));
    inputs
}

fn want_newick() -> OutputRequests {
    let mut outputs = OutputRequests::new();
    outputs.insert("b".to_string(), OutputRequest::new(NEWICK));
    outputs
}

#[test]
fn test_script_error_is_surfaced_with_diagnostic() {
    let engine = Engine::default();
    let err = engine
        .run(&analysis("fails", "error('tree rejected')", NEWICK), &inputs("(a,b);"), &want_newick())
        .unwrap_err();
    match err {
        EngineError::ScriptExecution { mode, diagnostic } => {
            assert_eq!(mode, ExecutionMode::Native);
            assert!(diagnostic.contains("tree rejected"), "diagnostic: {diagnostic}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_script_can_edit_nested_tree() {
    let engine = Engine::default();
    let script = "a.children[1].node_data['node name'] = 'renamed'\nb = a";
    let out = engine
        .run(&analysis("rename", script, NESTED), &inputs("(x:1,y:2);"), &want_newick())
        .unwrap();
    assert_eq!(out["b"].data, Data::from("(renamed:1,y:2);"));
}

#[test]
fn test_missing_output_is_an_error() {
    let engine = Engine::default();
    let err = engine
        .run(&analysis("silent", "c = a", NEWICK), &inputs("(a,b);"), &want_newick())
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingOutput(name) if name == "b"));
}

#[test]
fn test_output_of_wrong_shape_fails_conversion() {
    let engine = Engine::default();
    let err = engine
        .run(&analysis("garbage", "b = 42", NESTED), &inputs("(a,b);"), &want_newick())
        .unwrap_err();
    assert!(matches!(err, EngineError::Conversion { ref from, .. } if from == NESTED));
}

#[test]
fn test_timeout_terminates_runaway_script() {
    let engine = Engine::default();
    let started = Instant::now();
    let err = engine
        .run_with_timeout(
            &analysis("spin", "while true do end", NEWICK),
            &inputs("(a,b);"),
            &want_newick(),
            Some(Duration::from_millis(100)),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::ScriptTimeout { mode: ExecutionMode::Native, .. }));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_caught_deadline_still_times_out() {
    let engine = Engine::default();
    let script = "ok = pcall(function() while true do end end)\nb = a";
    let err = engine
        .run_with_timeout(
            &analysis("swallow", script, NEWICK),
            &inputs("(a:1,b:2);"),
            &want_newick(),
            Some(Duration::from_millis(100)),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ScriptTimeout { .. } | EngineError::ScriptExecution { .. }
    ));
}

#[test]
fn test_huge_timeout_is_unbounded() {
    let engine = Engine::default();
    let out = engine
        .run_with_timeout(&analysis("copy", "b = a", NEWICK), &inputs("(a:1,b:2);"), &want_newick(), Some(Duration::MAX))
        .unwrap();
    assert_eq!(out["b"].data, Data::from("(a:1,b:2);"));
}

#[test]
fn test_batch_runs_are_isolated() {
    let engine = Engine::new(EngineConfig {
        runtime: RuntimeConfig {
            timeout_secs: Some(5.0),
            rscript: None,
        },
        pool: PoolConfig { workers: Some(4) },
    });

    let mut jobs = Vec::new();
    for i in 0..16 {
        // Each job leaves a global behind; no other job may observe it.
        let script = format!("assert(marker == nil, 'saw another run')\nmarker = {i}\nb = a");
        jobs.push(Job {
            analysis: analysis(&format!("copy{i}"), &script, NESTED),
            inputs: inputs(&format!("(leaf{i}:1,other:2);")),
            outputs: want_newick(),
        });
    }
    jobs.push(Job {
        analysis: analysis("broken", "error('boom')", NEWICK),
        inputs: inputs("(a,b);"),
        outputs: want_newick(),
    });

    let results = engine.run_batch(&jobs).unwrap();
    assert_eq!(results.len(), 17);
    for (i, result) in results.iter().take(16).enumerate() {
        let out = result.as_ref().unwrap();
        assert_eq!(out["b"].data, Data::Text(format!("(leaf{i}:1,other:2);")));
    }
    assert!(matches!(results[16], Err(EngineError::ScriptExecution { .. })));
}

#[test]
fn test_run_named_uses_catalog() {
    let engine = Engine::default();
    let catalog = MemoryCatalog::new();
    catalog.insert(analysis("tree_copy", "b = a", NEWICK));

    let out = engine
        .run_named(&catalog, "tree_copy", &inputs("(a:1,b:1);"), &want_newick())
        .unwrap();
    assert_eq!(out["b"].data, Data::from("(a:1,b:1);"));

    let err = engine
        .run_named(&catalog, "nope", &inputs("(a,b);"), &want_newick())
        .unwrap_err();
    assert!(matches!(err, EngineError::AnalysisNotFound(_)));
}

#[test]
fn test_unknown_mode_is_rejected_up_front() {
    let err = AnalysisSpec::new("x", vec![], vec![], "", Some("python")).unwrap_err();
    assert!(matches!(err, EngineError::UnknownMode(tag) if tag == "python"));
}
