/// Cross-format properties of the built-in tree converters.

use arborist::domain::tree::{Clade, NestedTree};
use arborist::formats::{nexus, treestore, NESTED, NEWICK, NEXUS, TREE, TREESTORE};
use arborist::{Binding, ConverterRegistry, Data, Engine, EngineError, OutputRequest};

fn nested_of(newick: &str) -> NestedTree {
    NestedTree::from_clade(&arborist::formats::newick::parse(newick).unwrap())
}

#[test]
fn test_minimal_newick_round_trips_exactly() {
    let registry = ConverterRegistry::global();
    for text in [
        "((ahli:0,allogus:1):2,rubribarbus:3);",
        "(a:0.1,(b:0.25,c:1.5)inner:0.75)top;",
        "(x:12.5,y:0.001);",
    ] {
        let nested = registry.convert(TREE, NEWICK, NESTED, &Data::from(text)).unwrap();
        let back = registry.convert(TREE, NESTED, NEWICK, &nested).unwrap();
        assert_eq!(back, Data::from(text));
    }
}

#[test]
fn test_absent_lengths_come_back_as_zero() {
    let registry = ConverterRegistry::global();
    let nested = registry
        .convert(TREE, NEWICK, NESTED, &Data::from("((((a,b),c),d),e);"))
        .unwrap();
    let back = registry.convert(TREE, NESTED, NEWICK, &nested).unwrap();
    assert_eq!(back, Data::from("((((a:0,b:0):0,c:0):0,d:0):0,e:0);"));
}

#[test]
fn test_hostile_input_fails_as_conversion_error() {
    let engine = Engine::default();
    let mut forged = vec![0u8; 8];
    forged.extend_from_slice(&[0, 1]);
    forged.extend_from_slice(&(1u64 << 62).to_le_bytes());
    let deep = format!("{}a{};", "(".repeat(200_000), ")".repeat(200_000));

    let cases = [
        (NEXUS, Data::from("a\u{e9}\u{e9}\u{e9}\u{e9};")),
        (TREESTORE, Data::Bytes(forged)),
        (NEWICK, Data::Text(deep)),
    ];
    for (format, data) in cases {
        let err = engine
            .convert(TREE, &Binding::new(format, data), &OutputRequest::new(NESTED))
            .unwrap_err();
        assert!(
            matches!(err, EngineError::Conversion { ref from, .. } if from == format),
            "unexpected error for {format}: {err}"
        );
    }
}

#[test]
fn test_nexus_round_trip_preserves_taxa_topology_and_lengths() {
    let engine = Engine::default();
    let newick = "((ahli:0,allogus:1):2,rubribarbus:3);";
    let nexus_text = engine
        .convert(TREE, &Binding::new(NEWICK, newick), &OutputRequest::new(NEXUS))
        .unwrap();

    let parsed = nexus::parse(nexus_text.data.as_text().unwrap()).unwrap();
    assert_eq!(parsed.taxa, vec!["ahli", "allogus", "rubribarbus"]);

    let rewritten = nexus::write(&parsed).unwrap();
    let normalize = |text: &str| {
        text.lines()
            .skip(2)
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ")
    };
    assert_eq!(normalize(&rewritten), normalize(nexus_text.data.as_text().unwrap()));

    let back = engine.convert(TREE, &nexus_text, &OutputRequest::new(NEWICK)).unwrap();
    assert_eq!(back.data, Data::from(newick));
}

#[test]
fn test_row_store_structural_law() {
    for text in [
        "((ahli:0,allogus:1):2,rubribarbus:3);",
        "(a:1,b:2,c:3,d:4);",
        "((a:1,(b:1,c:1)bc:2)abc:0.5,(d:1,e:1):0.25);",
    ] {
        let tree = nested_of(text);
        let docs = treestore::to_documents(&tree);
        assert_eq!(docs.len(), tree.node_count() + 1);

        let wrapper = docs.iter().find(|d| d.rooted.is_some()).unwrap();
        assert_eq!(wrapper.clades.len(), 1);
        for doc in docs.iter().filter(|d| d.rooted.is_none() && d.clades.is_empty()) {
            assert!(doc.name.is_some(), "leaf document {} has no name", doc.id);
        }

        let back = treestore::from_documents(&docs).unwrap();
        assert!(back.structurally_equal(&tree), "round trip of {text}");
    }
}

#[test]
fn test_internal_documents_carry_incoming_edge_weight() {
    let tree = nested_of("((a:1,b:1):2.5,(c:1,d:1):0.5);");
    let docs = treestore::to_documents(&tree);
    let top = docs.iter().find(|d| d.id == docs[0].clades[0]).unwrap();
    let lengths: Vec<Option<f64>> = top
        .clades
        .iter()
        .map(|id| docs.iter().find(|d| d.id == *id).unwrap().branch_length)
        .collect();
    assert_eq!(lengths, vec![Some(2.5), Some(0.5)]);
}

#[test]
fn test_unsupported_format_pair() {
    let engine = Engine::default();
    let err = engine
        .convert(TREE, &Binding::new(NEWICK, "(a,b);"), &OutputRequest::new("phyloxml"))
        .unwrap_err();
    match err {
        EngineError::UnsupportedConversion { data_type, from, to } => {
            assert_eq!((data_type.as_str(), from.as_str(), to.as_str()), (TREE, NEWICK, "phyloxml"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Formats of one type are never reachable from another type.
    let err = engine
        .convert("table", &Binding::new(NEWICK, "(a,b);"), &OutputRequest::new(NESTED))
        .unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedConversion { .. }));
}

#[test]
fn test_conversion_errors_name_the_failing_hop() {
    let engine = Engine::default();
    let cases = [
        (NEWICK, Data::from("((a,b);")),
        (NEXUS, Data::from("#NEXUS BEGIN TREES; TRANSLATE 1 a; TREE t = (1,7); END;")),
        (TREESTORE, Data::Bytes(vec![1, 2, 3])),
    ];
    for (format, data) in cases {
        let err = engine
            .convert(TREE, &Binding::new(format, data), &OutputRequest::new(NESTED))
            .unwrap_err();
        match err {
            EngineError::Conversion { data_type, from, to, .. } => {
                assert_eq!(data_type, TREE);
                assert_eq!(from, format);
                assert_eq!(to, NESTED);
            }
            other => panic!("unexpected error for {format}: {other}"),
        }
    }
}

#[test]
fn test_same_format_is_identity_even_for_invalid_data() {
    let engine = Engine::default();
    let out = engine
        .convert(TREE, &Binding::new(NEWICK, "not newick"), &OutputRequest::new(NEWICK))
        .unwrap();
    assert_eq!(out.data, Data::from("not newick"));
}

#[test]
fn test_single_leaf_cannot_become_phylo() {
    let registry = ConverterRegistry::global();
    let leaf = NestedTree::from_clade(&Clade::leaf("solo", 0.0)).to_value();
    assert!(registry
        .convert(TREE, NESTED, arborist::formats::APETREE, &Data::Json(leaf))
        .is_err());
}
