/// End-to-end copy analyses over the anoles tree.
/// The script `b = a` runs with both ports declared in one format while the
/// caller always speaks Newick.

use arborist::domain::tree::NestedTree;
use arborist::formats::{treestore, APETREE, NESTED, NEWICK, NEXUS, TREE, TREESTORE, VTKTREE};
use arborist::{AnalysisSpec, Binding, Data, Engine, Inputs, OutputRequest, OutputRequests, PortSpec};
use pretty_assertions::assert_eq;
use serde_json::json;

const ANOLES: &str = "((ahli:0,allogus:1):2,rubribarbus:3);";

const FOUR_TAXA_NEXUS: &str = "#NEXUS


BEGIN TAXA;
    DIMENSIONS NTAX = 4;
    TAXLABELS
        A
        B
        C
        D
    ;
END;
BEGIN TREES;
    TRANSLATE
        1   A,
        2   B,
        3   C,
        4   D
    ;
    TREE * UNTITLED = [&R] ((1:1,2:1):1,(3:1,4:1):1);
END;";

/// Drop the first two lines (header and generator comment) and collapse
/// whitespace.
fn nexus_tail(text: &str) -> String {
    let tail = text.lines().skip(2).collect::<Vec<_>>().join("\n");
    tail.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn copy_analysis(format: &str) -> AnalysisSpec {
    AnalysisSpec::new(
        &format!("copy_{}", format),
        vec![PortSpec::new("a", TREE, format)],
        vec![PortSpec::new("b", TREE, format)],
        "b = a",
        None,
    )
    .unwrap()
}

fn run_copy(engine: &Engine, port_format: &str, out_format: &str) -> Binding {
    let mut inputs = Inputs::new();
    inputs.insert("a".to_string(), Binding::new(NEWICK, ANOLES));
    let mut outputs = OutputRequests::new();
    outputs.insert("b".to_string(), OutputRequest::new(out_format));
    let mut result = engine.run(&copy_analysis(port_format), &inputs, &outputs).unwrap();
    result.remove("b").unwrap()
}

#[test]
fn test_newick_copy_is_identity() {
    let engine = Engine::default();
    let out = run_copy(&engine, NEWICK, NEWICK);
    assert_eq!(out, Binding::new(NEWICK, ANOLES));
}

#[test]
fn test_nested_copy_matches_canonical_structure() {
    let engine = Engine::default();
    let out = run_copy(&engine, NESTED, NESTED);
    assert_eq!(out.format, NESTED);

    let expected = json!({
        "edge_fields": ["weight"],
        "node_fields": ["node name", "node weight"],
        "node_data": {"node name": "", "node weight": 0.0},
        "children": [
            {
                "edge_data": {"weight": 2.0},
                "node_data": {"node name": "", "node weight": 2.0},
                "children": [
                    {
                        "edge_data": {"weight": 0.0},
                        "node_data": {"node name": "ahli", "node weight": 2.0}
                    },
                    {
                        "edge_data": {"weight": 1.0},
                        "node_data": {"node name": "allogus", "node weight": 3.0}
                    }
                ]
            },
            {
                "edge_data": {"weight": 3.0},
                "node_data": {"node name": "rubribarbus", "node weight": 3.0}
            }
        ]
    });

    let actual = out.data.as_json().unwrap();
    let tree = NestedTree::from_value(actual).unwrap();
    assert!(tree.structurally_equal(&NestedTree::from_value(&expected).unwrap()));

    let internal = &actual["children"][0];
    assert_eq!(actual["node_data"]["node name"], json!(""));
    assert_eq!(actual["node_data"]["node weight"].as_f64(), Some(0.0));
    assert!(actual.get("edge_data").is_none());
    assert_eq!(internal["node_data"]["node weight"].as_f64(), Some(2.0));
    assert_eq!(internal["children"][1]["node_data"]["node name"], json!("allogus"));
    assert_eq!(internal["children"][1]["node_data"]["node weight"].as_f64(), Some(3.0));
    assert_eq!(actual["children"][1]["edge_data"]["weight"].as_f64(), Some(3.0));
}

#[test]
fn test_direct_conversion_to_nested_is_exact() {
    let engine = Engine::default();
    let out = engine
        .convert(TREE, &Binding::new(NEWICK, ANOLES), &OutputRequest::new(NESTED))
        .unwrap();
    let expected = json!({
        "node_fields": ["node name", "node weight"],
        "edge_fields": ["weight"],
        "node_data": {"node name": "", "node weight": 0.0},
        "children": [
            {
                "node_data": {"node name": "", "node weight": 2.0},
                "edge_data": {"weight": 2.0},
                "children": [
                    {"node_data": {"node name": "ahli", "node weight": 2.0}, "edge_data": {"weight": 0.0}},
                    {"node_data": {"node name": "allogus", "node weight": 3.0}, "edge_data": {"weight": 1.0}}
                ]
            },
            {"node_data": {"node name": "rubribarbus", "node weight": 3.0}, "edge_data": {"weight": 3.0}}
        ]
    });
    assert_eq!(out.data, Data::Json(expected));
}

#[test]
fn test_foreign_object_copies_preserve_newick() {
    let engine = Engine::default();
    for format in [VTKTREE, APETREE] {
        let out = run_copy(&engine, format, NEWICK);
        assert_eq!(out.data, Data::from(ANOLES), "copy through {format}");
    }
}

#[test]
fn test_phylo_output_prints_like_ape() {
    let engine = Engine::default();
    let out = run_copy(&engine, APETREE, APETREE);
    let Data::ApeTree(phylo) = out.data else {
        panic!("expected a phylo object");
    };
    assert!(phylo
        .to_string()
        .starts_with("\nPhylogenetic tree with 3 tips and 2 internal nodes.\n\nTip labels:\n"));
}

#[test]
fn test_graph_tree_to_treestore_layout() {
    let engine = Engine::default();
    let graph = run_copy(&engine, VTKTREE, VTKTREE);
    let stored = engine.convert(TREE, &graph, &OutputRequest::new(TREESTORE)).unwrap();
    let docs = treestore::decode_documents(stored.data.as_bytes().unwrap()).unwrap();

    let find = |id: u64| docs.iter().find(|d| d.id == id).unwrap();
    let roots: Vec<_> = docs.iter().filter(|d| d.rooted.is_some()).collect();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].clades.len(), 1);

    let top = find(roots[0].clades[0]);
    assert_eq!(top.clades.len(), 2);

    let internal = find(top.clades[0]);
    assert_eq!(internal.branch_length, Some(2.0));
    assert_eq!(internal.clades.len(), 2);
    let ahli = find(internal.clades[0]);
    let allogus = find(internal.clades[1]);
    assert_eq!((ahli.name.as_deref(), ahli.branch_length), (Some("ahli"), Some(0.0)));
    assert_eq!((allogus.name.as_deref(), allogus.branch_length), (Some("allogus"), Some(1.0)));
    assert!(ahli.clades.is_empty() && allogus.clades.is_empty());

    let rubribarbus = find(top.clades[1]);
    assert_eq!(rubribarbus.name.as_deref(), Some("rubribarbus"));
    assert_eq!(rubribarbus.branch_length, Some(3.0));
}

#[test]
fn test_nexus_copy_through_foreign_objects() {
    let engine = Engine::default();
    for port_format in [VTKTREE, APETREE] {
        let mut inputs = Inputs::new();
        inputs.insert("a".to_string(), Binding::new(NEXUS, FOUR_TAXA_NEXUS));
        let mut outputs = OutputRequests::new();
        outputs.insert("b".to_string(), OutputRequest::new(NEXUS));

        let out = engine.run(&copy_analysis(port_format), &inputs, &outputs).unwrap();
        assert_eq!(out["b"].format, NEXUS);
        assert_eq!(
            nexus_tail(out["b"].data.as_text().unwrap()),
            nexus_tail(FOUR_TAXA_NEXUS),
            "copy through {port_format}"
        );
    }
}
