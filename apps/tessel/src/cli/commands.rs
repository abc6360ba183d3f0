//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use std::path::{Path, PathBuf};
use tessel_core::{
    Edge, Entity, EntityId, Graph, GroupedNodes, Node, NodeId, PropertyMap, RedbStorage,
    TesselError, Value, entity::validate_prop_name, export_snapshot, import_snapshot,
    primitives::MAX_SNAPSHOT_PAYLOAD_SIZE, snapshot_digest,
};

/// The graph every command works on.
pub type CliGraph = Graph<RedbStorage>;

/// Where and how a command runs.
#[derive(Debug, Clone)]
pub struct Context {
    pub database: PathBuf,
    pub graph: String,
    pub json_mode: bool,
}

/// Which way `cmd_walk` traverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkKind {
    Descendants,
    Ancestors,
}

// =============================================================================
// FILE VALIDATION
// =============================================================================

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), TesselError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| TesselError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(TesselError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path to an existing regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, TesselError> {
    let canonical = path.canonicalize().map_err(|e| {
        TesselError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(TesselError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path whose parent directory must already exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, TesselError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        TesselError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(TesselError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| TesselError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// VALUE PARSING & RENDERING
// =============================================================================

/// Interpret a command-line value: booleans, then integers, else text.
pub fn parse_value(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => raw
            .parse::<i64>()
            .map_or_else(|_| Value::from(raw), Value::Int),
    }
}

/// Split a `name=value` argument.
pub fn parse_prop(raw: &str) -> Result<(String, Value), TesselError> {
    let (name, value) = raw.split_once('=').ok_or_else(|| {
        TesselError::IllegalArgument(format!("property '{raw}' is not name=value"))
    })?;
    if name.is_empty() {
        return Err(TesselError::IllegalArgument(format!(
            "property '{raw}' has an empty name"
        )));
    }
    validate_prop_name(name)?;
    Ok((name.to_string(), parse_value(value)))
}

/// JSON rendering of a property value.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(bytes) => serde_json::Value::from(bytes.clone()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => props_to_json(entries),
    }
}

fn props_to_json(props: &PropertyMap) -> serde_json::Value {
    serde_json::Value::Object(
        props
            .iter()
            .map(|(name, value)| (name.clone(), value_to_json(value)))
            .collect(),
    )
}

fn print_json(output: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(output).unwrap_or_default()
    );
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the configured graph over an existing database.
pub fn open_graph(ctx: &Context) -> Result<CliGraph, TesselError> {
    if !ctx.database.exists() {
        return Err(TesselError::IoError(format!(
            "Database {:?} does not exist. Run `tessel init` first.",
            ctx.database
        )));
    }
    let storage = RedbStorage::open(&ctx.database)?;
    Graph::open(storage, ctx.graph.clone())
}

fn require_node(graph: &CliGraph, id: &str) -> Result<Node, TesselError> {
    let id = NodeId::new(id);
    graph
        .get_node(&id)?
        .ok_or_else(|| TesselError::node_not_exist(&id))
}

fn snapshot_all(graph: &CliGraph) -> Result<Vec<u8>, TesselError> {
    export_snapshot(graph.storage(), &|_: &EntityId| true)
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database.
pub fn cmd_init(ctx: &Context, force: bool) -> Result<(), TesselError> {
    if ctx.database.exists() {
        if !force {
            return Err(TesselError::IllegalArgument(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(&ctx.database)
            .map_err(|e| TesselError::IoError(format!("Remove database: {}", e)))?;
    }

    let storage = RedbStorage::open(&ctx.database)?;
    let graph: CliGraph = Graph::new(storage, ctx.graph.clone())?;
    tracing::info!(database = ?ctx.database, graph = graph.name(), "database initialized");

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "database": ctx.database.to_string_lossy(),
            "graph": graph.name(),
        }));
    } else {
        println!("Initialized new database at {:?}", ctx.database);
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show graph status.
pub fn cmd_status(ctx: &Context) -> Result<(), TesselError> {
    let graph = open_graph(ctx)?;
    let node_count = graph.node_count()?;
    let edge_count = graph.edge_count()?;

    let mut groups = Vec::new();
    for group in graph.groups()? {
        let counter = graph.group_counter(&group)?.unwrap_or(0);
        groups.push((group, counter));
    }

    if ctx.json_mode {
        let groups: serde_json::Map<String, serde_json::Value> = groups
            .into_iter()
            .map(|(group, counter)| (group, serde_json::Value::from(counter)))
            .collect();
        print_json(&serde_json::json!({
            "database": ctx.database.to_string_lossy(),
            "graph": graph.name(),
            "node_count": node_count,
            "edge_count": edge_count,
            "groups": groups,
        }));
        return Ok(());
    }

    println!("Tessel Graph Status");
    println!("===================");
    println!("Database: {:?}", ctx.database);
    println!("Graph:    {}", graph.name());
    println!();
    println!("Nodes:    {}", node_count);
    println!("Edges:    {}", edge_count);
    if !groups.is_empty() {
        println!();
        println!("Groups:");
        for (group, counter) in &groups {
            println!("  {:<16} last suffix {}", group, counter);
        }
    }

    Ok(())
}

// =============================================================================
// EDIT COMMANDS
// =============================================================================

/// Create a node with optional `name=value` properties.
pub fn cmd_add_node(ctx: &Context, id: &str, props: &[String]) -> Result<(), TesselError> {
    let properties = props
        .iter()
        .map(|raw| parse_prop(raw))
        .collect::<Result<PropertyMap, _>>()?;

    let mut graph = open_graph(ctx)?;
    let node = graph.add_node_with(id, properties)?;
    tracing::info!(node = %node, "node created");

    if ctx.json_mode {
        print_json(&serde_json::json!({ "node": node.id().as_str() }));
    } else {
        println!("Created node {}", node);
    }
    Ok(())
}

/// Create an edge; both endpoints must exist.
pub fn cmd_add_edge(
    ctx: &Context,
    from: &str,
    to: &str,
    edge_type: Option<&str>,
) -> Result<(), TesselError> {
    let mut graph = open_graph(ctx)?;
    let from = NodeId::new(from);
    let to = NodeId::new(to);

    let edge = match edge_type {
        Some(edge_type) => graph.add_typed_edge(&from, &to, edge_type)?,
        None => graph.add_edge(&from, &to)?,
    };
    tracing::info!(edge = %edge.id(), "edge created");

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "edge": edge.id().to_string(),
            "source": edge.id().src.as_str(),
            "destination": edge.id().dst.as_str(),
            "type": edge.type_name(),
        }));
    } else {
        println!("Created edge {}", edge.id());
    }
    Ok(())
}

/// Delete a node and its edges.
pub fn cmd_del_node(ctx: &Context, id: &str) -> Result<(), TesselError> {
    let mut graph = open_graph(ctx)?;
    let node = require_node(&graph, id)?;
    let incident = graph.get_incoming_edges(node.id())?.len()
        + graph.get_outgoing_edges(node.id())?.len();

    graph.del_node(node.id())?;
    tracing::info!(node = %node, incident, "node deleted");

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "deleted": node.id().as_str(),
            "incident_edges": incident,
        }));
    } else {
        println!("Deleted node {} ({} incident edges)", node, incident);
    }
    Ok(())
}

// =============================================================================
// PROPERTY COMMANDS
// =============================================================================

/// Show the properties of a node.
pub fn cmd_props(ctx: &Context, id: &str) -> Result<(), TesselError> {
    let graph = open_graph(ctx)?;
    let node = require_node(&graph, id)?;
    let node_type = node.node_type(graph.storage())?;
    let props = node.properties(graph.storage())?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "node": node.id().as_str(),
            "type": node_type,
            "properties": props_to_json(&props),
        }));
        return Ok(());
    }

    println!("Node {} ({})", node, node_type);
    if props.is_empty() {
        println!("  (no properties)");
    }
    for (name, value) in &props {
        println!("  {} = {}", name, value);
    }
    Ok(())
}

/// Set a node property, or remove it when `value` is `None`.
pub fn cmd_set_prop(
    ctx: &Context,
    id: &str,
    name: &str,
    value: Option<&str>,
) -> Result<(), TesselError> {
    let mut graph = open_graph(ctx)?;
    let node = require_node(&graph, id)?;

    match value {
        Some(raw) => node.set(graph.storage_mut(), name, parse_value(raw))?,
        None => node.remove(graph.storage_mut(), name)?,
    }
    tracing::info!(node = %node, property = name, removed = value.is_none(), "property written");

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "node": node.id().as_str(),
            "property": name,
            "value": value.map(|raw| value_to_json(&parse_value(raw))),
        }));
    } else if value.is_some() {
        println!("Set {} on {}", name, node);
    } else {
        println!("Removed {} from {}", name, node);
    }
    Ok(())
}

// =============================================================================
// TRAVERSAL COMMANDS
// =============================================================================

/// List descendants or ancestors, optionally following one edge type only.
pub fn cmd_walk(
    ctx: &Context,
    id: &str,
    edge_type: Option<&str>,
    kind: WalkKind,
) -> Result<(), TesselError> {
    let graph = open_graph(ctx)?;
    let start = require_node(&graph, id)?;

    let cond = |edge: &Edge| edge_type.is_none_or(|wanted| edge.type_name() == wanted);
    let walk = match kind {
        WalkKind::Descendants => graph.get_descendants(start.id(), cond),
        WalkKind::Ancestors => graph.get_ancestors(start.id(), cond),
    };
    let nodes = walk.collect::<Result<Vec<Node>, _>>()?;

    if ctx.json_mode {
        let ids: Vec<&str> = nodes.iter().map(|node| node.id().as_str()).collect();
        print_json(&serde_json::json!({ "start": start.id().as_str(), "nodes": ids }));
        return Ok(());
    }

    let label = match kind {
        WalkKind::Descendants => "Descendants",
        WalkKind::Ancestors => "Ancestors",
    };
    println!("{} of {} ({}):", label, start, nodes.len());
    for node in &nodes {
        println!("  {}", node);
    }
    Ok(())
}

// =============================================================================
// GROUP COMMANDS
// =============================================================================

/// Register a node group.
pub fn cmd_register_group(ctx: &Context, group: &str) -> Result<(), TesselError> {
    let mut graph = open_graph(ctx)?;
    graph.register_group(group)?;
    let counter = graph.group_counter(group)?.unwrap_or(0);

    if ctx.json_mode {
        print_json(&serde_json::json!({ "group": group, "counter": counter }));
    } else {
        println!("Registered group {} (last suffix {})", group, counter);
    }
    Ok(())
}

/// Create a node in a registered group.
pub fn cmd_group_node(ctx: &Context, group: &str, suffix: Option<&str>) -> Result<(), TesselError> {
    let mut graph = open_graph(ctx)?;
    let node = graph.add_group_node(group, suffix)?;

    if ctx.json_mode {
        print_json(&serde_json::json!({ "group": group, "node": node.id().as_str() }));
    } else {
        println!("Created node {}", node);
    }
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT / HASH COMMANDS
// =============================================================================

/// Export every node, edge and metadata slot of the database.
pub fn cmd_export(ctx: &Context, output: &Path) -> Result<(), TesselError> {
    let validated_output = validate_output_path(output)?;
    let graph = open_graph(ctx)?;
    let data = snapshot_all(&graph)?;

    std::fs::write(&validated_output, &data)
        .map_err(|e| TesselError::IoError(format!("Write file: {}", e)))?;
    tracing::info!(path = ?validated_output, bytes = data.len(), "snapshot exported");

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "output": validated_output.to_string_lossy(),
            "bytes": data.len(),
            "blake3": snapshot_digest(&data),
        }));
    } else {
        println!("Exported {} bytes to {:?}", data.len(), validated_output);
        println!("BLAKE3: {}", snapshot_digest(&data));
    }
    Ok(())
}

/// Import a snapshot. Existing ids get their properties updated.
pub fn cmd_import(ctx: &Context, input: &Path) -> Result<(), TesselError> {
    let validated_path = validate_file_path(input)?;
    validate_file_size(&validated_path, MAX_SNAPSHOT_PAYLOAD_SIZE as u64)?;

    let data = std::fs::read(&validated_path)
        .map_err(|e| TesselError::IoError(format!("Read file: {}", e)))?;

    let mut graph = open_graph(ctx)?;
    let summary = import_snapshot(graph.storage_mut(), &data, &|_: &EntityId| true)?;
    graph.refresh_cache()?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "nodes_created": summary.nodes_created,
            "nodes_updated": summary.nodes_updated,
            "edges_created": summary.edges_created,
            "edges_updated": summary.edges_updated,
            "edges_skipped": summary.edges_skipped,
        }));
        return Ok(());
    }

    println!(
        "Imported {} new nodes ({} updated), {} new edges ({} updated, {} skipped)",
        summary.nodes_created,
        summary.nodes_updated,
        summary.edges_created,
        summary.edges_updated,
        summary.edges_skipped
    );
    println!(
        "Graph now has {} nodes, {} edges",
        graph.node_count()?,
        graph.edge_count()?
    );
    Ok(())
}

/// Compute the BLAKE3 digest of the database snapshot.
pub fn cmd_hash(ctx: &Context) -> Result<(), TesselError> {
    let graph = open_graph(ctx)?;
    let data = snapshot_all(&graph)?;
    let digest = snapshot_digest(&data);

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "blake3": digest,
            "bytes": data.len(),
        }));
    } else {
        println!("BLAKE3: {}", digest);
    }
    Ok(())
}
