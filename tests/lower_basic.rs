//! Integration tests for the resolvers and the IR transformer.

mod helpers;

use flowc::CompileError;
use flowc::compile::CompilerOptions;
use flowc::ir::types::{AgentKind, WorkflowIR};
use flowc::parse::{CallbackPhase, SchemaDirection};
use flowc::registry::{
    CallbackDefinition, CapabilityRegistry, PromptDefinition, RegistryScope, SchemaDefinition, ToolDefinition,
};
use helpers::{ProjectBuilder, compile_with};
use serde_json::json;

fn registry() -> CapabilityRegistry {
    let mut fetch = ToolDefinition::new("fetch");
    fetch.name = Some("Fetch URL".into());
    CapabilityRegistry::new(vec![
        RegistryScope::new("global")
            .with_tools([ToolDefinition::new("search"), fetch])
            .with_prompts([PromptDefinition {
                id: "concise".into(),
                text: "Be concise.".into(),
            }])
            .with_schemas([SchemaDefinition {
                id: "report".into(),
                schema: json!({"type": "object", "required": ["summary"]}),
            }])
            .with_callbacks([
                CallbackDefinition::new("guard", "hooks.guard", 1),
                CallbackDefinition::new("trace", "hooks.trace", 10),
                CallbackDefinition::new("audit", "hooks.audit", 5),
            ]),
    ])
}

fn compile(project: &ProjectBuilder) -> Result<WorkflowIR, CompileError> {
    compile_with(project, &registry(), &CompilerOptions::default())
}

fn compile_ok(project: &ProjectBuilder) -> WorkflowIR {
    compile(project).unwrap_or_else(|e| panic!("expected a successful compile, got: {}", e))
}

fn compile_err(project: &ProjectBuilder) -> CompileError {
    compile(project).err().expect("expected a compile error")
}

/// A start node followed by one writer agent.
fn writer(data: serde_json::Value) -> ProjectBuilder {
    ProjectBuilder::new("p")
        .start("s", 0.0)
        .node("w", "agent", 1.0, data)
        .edge("s", "w")
}

#[test]
fn leaf_config_from_inline_data_and_neighbours() {
    let project = writer(json!({
        "name": "Writer",
        "model": "large",
        "description": "Drafts the answer",
        "instruction": "Inline.",
        "promptRef": "concise",
        "tools": ["search"],
        "callbacks": [
            {"id": "trace", "phase": "before_model"},
            {"id": "audit", "phase": "after_model"}
        ],
        "outputKey": "draft",
        "context": {"audience": "devs"}
    }))
    .node_at("instr", "custom", 300.0, 0.0, json!({"resource": "instruction", "text": "From neighbour."}))
    .node_at("fetch", "custom", 300.0, 1.0, json!({"resource": "tool", "toolId": "fetch"}))
    .node_at("again", "custom", 300.0, 2.0, json!({"resource": "tool", "toolId": "search"}))
    .node_at("guard", "custom", 300.0, 3.0, json!({"resource": "callback", "callbackId": "guard", "phase": "before_model"}))
    .node_at("tone", "variable", 300.0, 4.0, json!({"name": "tone", "value": "dry"}))
    .node_at("out", "custom", 300.0, 5.0, json!({"resource": "schema", "schema": {"type": "string"}}))
    .edge_ports("instr", None, "w", Some("instruction"))
    .edge_ports("fetch", None, "w", Some("tools"))
    .edge_ports("again", None, "w", Some("tools"))
    .edge_ports("guard", None, "w", Some("callbacks"))
    .edge_ports("tone", None, "w", Some("context"))
    .edge_ports("out", None, "w", Some("output-schema"));
    let ir = compile_ok(&project);
    let agent = ir.agent("w").expect("writer agent");

    assert_eq!(agent.kind, AgentKind::Llm);
    assert_eq!(agent.name, "Writer");
    assert_eq!(agent.model.as_deref(), Some("large"));
    assert_eq!(agent.description.as_deref(), Some("Drafts the answer"));
    assert_eq!(agent.output_key.as_deref(), Some("draft"));
    assert_eq!(agent.source_node.as_deref(), Some("w"));
    assert_eq!(
        agent.instruction.as_deref(),
        Some("Inline.\n\nBe concise.\n\nFrom neighbour.")
    );

    let tools: Vec<(&str, &str)> = agent.tools.iter().map(|t| (t.id.as_str(), t.name.as_str())).collect();
    assert_eq!(tools, vec![("search", "search"), ("fetch", "Fetch URL")]);

    let callbacks: Vec<(&str, CallbackPhase)> = agent.callbacks.iter().map(|c| (c.id.as_str(), c.phase)).collect();
    assert_eq!(
        callbacks,
        vec![
            ("guard", CallbackPhase::BeforeModel),
            ("trace", CallbackPhase::BeforeModel),
            ("audit", CallbackPhase::AfterModel),
        ]
    );

    let output = agent.output_schema.as_ref().expect("output schema");
    assert_eq!(output.direction, SchemaDirection::Output);
    assert_eq!(output.schema, json!({"type": "string"}));
    assert!(agent.input_schema.is_none());

    assert_eq!(agent.context_variables["audience"], json!("devs"));
    assert_eq!(agent.context_variables["tone"], json!("dry"));
    assert_eq!(ir.session_seed["w"], agent.context_variables);
}

#[test]
fn schema_from_registry_with_declared_direction() {
    let project = writer(json!({}))
        .node_at("in", "custom", 300.0, 0.0, json!({"resource": "schema", "schemaId": "report", "direction": "input"}))
        .edge_ports("in", None, "w", None);
    let ir = compile_ok(&project);
    let agent = ir.agent("w").unwrap();

    let input = agent.input_schema.as_ref().expect("input schema");
    assert_eq!(input.id.as_deref(), Some("report"));
    assert_eq!(input.direction, SchemaDirection::Input);
    assert_eq!(input.schema["required"], json!(["summary"]));
    assert!(agent.output_schema.is_none());
}

#[test]
fn agent_without_configuration_has_no_instruction() {
    let ir = compile_ok(&writer(json!({"instruction": "   "})));
    let agent = ir.agent("w").unwrap();
    assert_eq!(agent.instruction, None);
    assert!(agent.tools.is_empty());
    assert!(ir.session_seed.is_empty());
}

#[test]
fn instruction_file_is_read_from_the_snapshot() {
    let project = writer(json!({"instructionFile": "prompts/w.md"})).file("prompts/w.md", "Write for {audience}.");
    let ir = compile_ok(&project);
    assert_eq!(ir.agent("w").unwrap().instruction.as_deref(), Some("Write for {audience}."));
}

#[test]
fn r001_instruction_wired_into_tools_port() {
    let project = writer(json!({}))
        .node_at("instr", "custom", 300.0, 0.0, json!({"resource": "instruction", "text": "hi"}))
        .edge_ports("instr", None, "w", Some("tools"));
    let err = compile_err(&project);
    assert_eq!(err.code(), "R001");
    assert!(err.to_string().contains("port 'tools'"), "{}", err);
}

#[test]
fn r002_missing_instruction_file() {
    let err = compile_err(&writer(json!({"instructionFile": "prompts/missing.md"})));
    assert_eq!(err.code(), "R002");
}

#[test]
fn r003_tool_wired_into_callbacks_port() {
    let project = writer(json!({}))
        .node_at("t", "custom", 300.0, 0.0, json!({"resource": "tool", "toolId": "search"}))
        .edge_ports("t", None, "w", Some("callbacks"));
    assert_eq!(compile_err(&project).code(), "R003");
}

#[test]
fn r004_two_output_schemas() {
    let project = writer(json!({}))
        .node_at("a", "custom", 300.0, 0.0, json!({"resource": "schema", "schema": {"type": "string"}}))
        .node_at("b", "custom", 300.0, 1.0, json!({"resource": "schema", "schemaId": "report"}))
        .edge_ports("a", None, "w", Some("output-schema"))
        .edge_ports("b", None, "w", Some("output-schema"));
    let err = compile_err(&project);
    assert_eq!(err.code(), "R004");
    assert!(err.to_string().contains("more than one output schema"), "{}", err);
}

#[test]
fn r005_agent_wired_into_context_port() {
    let project = writer(json!({}))
        .agent_at("helper", 300.0, 0.0)
        .edge_ports("helper", None, "w", Some("context"));
    assert_eq!(compile_err(&project).code(), "R005");
}

#[test]
fn context_sources_agreeing_are_merged() {
    let project = writer(json!({"context": {"tone": "dry"}}))
        .node_at("v", "variable", 300.0, 0.0, json!({"values": {"tone": "dry", "length": 200}}))
        .edge_ports("v", None, "w", Some("context"));
    let ir = compile_ok(&project);

    let seed = &ir.session_seed["w"];
    assert_eq!(seed.len(), 2);
    assert_eq!(seed["length"], json!(200));
}

#[test]
fn s001_conflicting_context_values_list_every_source() {
    let project = writer(json!({}))
        .node_at("V1", "variable", 300.0, 10.0, json!({"name": "tone", "value": "formal"}))
        .node_at("V2", "variable", 300.0, 11.0, json!({"name": "tone", "value": "casual"}))
        .edge_ports("V2", None, "w", Some("context"))
        .edge_ports("V1", None, "w", Some("context"));

    match compile_err(&project) {
        CompileError::Seeding(e) => {
            assert_eq!(e.conflicts.len(), 1);
            let conflict = &e.conflicts[0];
            assert_eq!(conflict.agent_id, "w");
            assert_eq!(conflict.variable, "tone");
            assert_eq!(
                conflict.sources,
                vec![("V1".to_string(), json!("formal")), ("V2".to_string(), json!("casual"))]
            );
        }
        other => panic!("Expected seeding error, got {:?}", other),
    }
}

#[test]
fn loop_agent_carries_marker_configuration() {
    let project = ProjectBuilder::new("p")
        .node("L", "loop", 0.0, json!({"name": "Polish", "maxIterations": 2}))
        .agent("edit", 1.0)
        .edge_ports("L", Some("body"), "edit", None)
        .edge("edit", "L");
    let ir = compile_ok(&project);

    let lp = ir.agent("L").unwrap();
    assert_eq!(lp.kind, AgentKind::Loop);
    assert_eq!(lp.name, "Polish");
    assert_eq!(lp.max_iterations, Some(2));
    assert_eq!(lp.source_node.as_deref(), Some("L"));
    assert_eq!(lp.subagents.len(), 1);
    assert!(lp.instruction.is_none());
}

#[test]
fn composites_are_named_after_their_ids() {
    let project = ProjectBuilder::new("p")
        .start("s", 0.0)
        .agent_at("a", 0.0, 1.0)
        .agent_at("b", 100.0, 1.0)
        .agent("c", 2.0)
        .edge("s", "a")
        .edge("s", "b")
        .edge("a", "c")
        .edge("b", "c");
    let ir = compile_ok(&project);

    let par = ir.agent("s__parallel").unwrap();
    assert_eq!(par.name, "s__parallel");
    assert_eq!(par.region, "main");
    assert_eq!(par.source_node, None);
    assert_eq!(ir.all_agents.len(), 5);
}
