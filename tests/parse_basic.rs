//! Integration tests for the parser and graph builder.

mod helpers;

use flowc::parse::{self, EdgeSemantics, NodeKind, NodePayload, WorkflowGraph};
use helpers::ProjectBuilder;
use serde_json::json;

fn build_graph(project: &ProjectBuilder) -> Result<WorkflowGraph, flowc::CompilationError> {
    let parsed = parse::parse_project(&project.snapshot())?;
    WorkflowGraph::build(&parsed)
}

fn semantics(graph: &WorkflowGraph, source: &str, target: &str) -> EdgeSemantics {
    graph
        .outgoing(source)
        .into_iter()
        .find(|e| e.target == target)
        .map(|e| e.semantics)
        .unwrap_or_else(|| panic!("no edge {} -> {}", source, target))
}

#[test]
fn parse_typed_payloads() {
    let project = ProjectBuilder::new("p")
        .node("a", "agent", 0.0, json!({"name": "Writer", "tools": ["search"], "outputKey": "draft"}))
        .node("l", "loop", 1.0, json!({"maxIterations": 3}))
        .node("v", "variable", 2.0, json!({"values": {"x": 1, "y": "two"}}));
    let parsed = parse::parse_project(&project.snapshot()).expect("Should parse");

    assert_eq!(parsed.regions, vec!["main".to_string()]);
    assert_eq!(parsed.nodes.len(), 3);

    match &parsed.nodes[0].payload {
        NodePayload::Agent(agent) => {
            assert_eq!(agent.name.as_deref(), Some("Writer"));
            assert_eq!(agent.tools, vec!["search".to_string()]);
            assert_eq!(agent.output_key.as_deref(), Some("draft"));
        }
        other => panic!("Expected agent payload, got {:?}", other),
    }
    assert_eq!(parsed.nodes[0].label(), "Writer");

    match &parsed.nodes[1].payload {
        NodePayload::Loop(data) => assert_eq!(data.max_iterations, Some(3)),
        other => panic!("Expected loop payload, got {:?}", other),
    }
    assert_eq!(parsed.nodes[1].label(), "l");

    match &parsed.nodes[2].payload {
        NodePayload::Variable(data) => assert_eq!(data.entries().len(), 2),
        other => panic!("Expected variable payload, got {:?}", other),
    }
}

#[test]
fn p001_unknown_node_type_is_fatal() {
    let project = ProjectBuilder::new("p")
        .agent("a", 0.0)
        .node("w", "webhook", 1.0, json!({}));
    let err = parse::parse_project(&project.snapshot()).unwrap_err();
    assert_eq!(err.code, "P001");
    assert_eq!(err.location.node.as_deref(), Some("w"));
}

#[test]
fn p002_empty_teleporter_channel() {
    let project = ProjectBuilder::new("p").node("t", "teleporter-out", 0.0, json!({"channel": "  "}));
    let err = parse::parse_project(&project.snapshot()).unwrap_err();
    assert_eq!(err.code, "P002");
}

#[test]
fn p002_custom_node_without_content() {
    let project = ProjectBuilder::new("p").node("c", "custom", 0.0, json!({"resource": "instruction"}));
    let err = parse::parse_project(&project.snapshot()).unwrap_err();
    assert_eq!(err.code, "P002");
}

#[test]
fn p003_duplicate_node_id_across_regions() {
    let project = ProjectBuilder::new("p")
        .tab("one")
        .agent("a", 0.0)
        .tab("two")
        .agent("a", 0.0);
    let err = parse::parse_project(&project.snapshot()).unwrap_err();
    assert_eq!(err.code, "P003");
    assert_eq!(err.location.region.as_deref(), Some("two"));
}

#[test]
fn classify_control_and_data_edges() {
    let project = ProjectBuilder::new("p")
        .start("s", 0.0)
        .agent("a", 1.0)
        .agent_at("b", 0.0, 2.0)
        .agent_at("c", 100.0, 2.0)
        .node("ask", "user-input", 3.0, json!({"prompt": "Continue?"}))
        .agent("d", 4.0)
        .agent("r", 5.0)
        .agent("f", 6.0)
        .node("v", "variable", 7.0, json!({"name": "tone", "value": "dry"}))
        .edge("s", "a")
        .edge("a", "b")
        .edge("a", "c")
        .edge("b", "ask")
        .edge("ask", "d")
        .edge_ports("d", Some("route:retry"), "r", None)
        .edge("c", "f")
        .edge_ports("v", None, "f", Some("context"))
        .edge_ports("r", None, "f", Some("instruction"));
    let graph = build_graph(&project).expect("Should build graph");

    assert_eq!(semantics(&graph, "s", "a"), EdgeSemantics::Sequential);
    assert_eq!(semantics(&graph, "a", "b"), EdgeSemantics::ParallelBranch);
    assert_eq!(semantics(&graph, "a", "c"), EdgeSemantics::ParallelBranch);
    assert_eq!(semantics(&graph, "ask", "d"), EdgeSemantics::Conditional);
    assert_eq!(semantics(&graph, "d", "r"), EdgeSemantics::Conditional);
    assert_eq!(semantics(&graph, "v", "f"), EdgeSemantics::Data);
    assert_eq!(semantics(&graph, "r", "f"), EdgeSemantics::Data);

    // r feeds f only through a configuration port, so it stays a leaf of
    // the control flow and f keeps its single control predecessor.
    assert_eq!(graph.incoming_control("f").len(), 1);
    assert_eq!(graph.data_inputs("f").len(), 2);
    assert_eq!(graph.entries(), ["s".to_string()]);
}

#[test]
fn entries_are_sorted_by_layout() {
    let project = ProjectBuilder::new("p")
        .agent_at("right", 200.0, 0.0)
        .agent_at("left", 0.0, 0.0)
        .agent("below", 50.0)
        .start("top", -10.0);
    let graph = build_graph(&project).unwrap();
    assert_eq!(graph.entries(), ["top", "left", "right", "below"].map(String::from));
    assert_eq!(graph.node("top").unwrap().kind(), NodeKind::Start);
}

#[test]
fn teleporter_pair_links_regions() {
    let project = ProjectBuilder::new("p")
        .tab("one")
        .agent("a", 0.0)
        .node("out", "teleporter-out", 1.0, json!({"channel": "handoff"}))
        .edge("a", "out")
        .tab("two")
        .node("in", "teleporter-in", 0.0, json!({"channel": "handoff"}))
        .agent("b", 1.0)
        .edge("in", "b");
    let graph = build_graph(&project).unwrap();

    assert!(graph.contains("in"));
    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.edge_count(), 3);
    assert_eq!(graph.pairs().len(), 1);
    assert_eq!(graph.pairs()[0].out_node, "out");
    assert_eq!(graph.pairs()[0].in_node, "in");
    assert_eq!(semantics(&graph, "out", "in"), EdgeSemantics::Teleport);
    assert_eq!(graph.entries(), ["a".to_string()]);
}

#[test]
fn t001_channel_without_counterpart() {
    let project = ProjectBuilder::new("p").node("out", "teleporter-out", 0.0, json!({"channel": "lonely"}));
    let err = build_graph(&project).err().expect("Should fail");
    assert_eq!(err.code, "T001");
}

#[test]
fn t002_two_outs_on_one_channel() {
    let project = ProjectBuilder::new("p")
        .node("out1", "teleporter-out", 0.0, json!({"channel": "x"}))
        .node("out2", "teleporter-out", 1.0, json!({"channel": "x"}))
        .node("in", "teleporter-in", 2.0, json!({"channel": "x"}));
    let err = build_graph(&project).err().expect("Should fail");
    assert_eq!(err.code, "T002");
    assert!(err.message.contains("out1") && err.message.contains("out2"), "{}", err);
}

#[test]
fn t003_edge_between_different_channels() {
    let project = ProjectBuilder::new("p")
        .node("out", "teleporter-out", 0.0, json!({"channel": "x"}))
        .node("in", "teleporter-in", 1.0, json!({"channel": "y"}))
        .edge("out", "in");
    let err = build_graph(&project).err().expect("Should fail");
    assert_eq!(err.code, "T003");
}

#[test]
fn g001_dangling_edge() {
    let project = ProjectBuilder::new("p").agent("a", 0.0).edge("a", "ghost");
    let err = build_graph(&project).err().expect("Should fail");
    assert_eq!(err.code, "G001");
    assert!(err.message.contains("ghost"));
}
