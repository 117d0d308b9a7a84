//! Traversable graph built from a [`WorkflowSchema`].
//!
//! Every container (the workflow root and each node with `blocks`) owns
//! its child nodes and the edges declared alongside them. Edges only
//! connect nodes of the same container.

use crate::error::WorkflowError;
use crate::schema::{node_types, EdgeSchema, JsonSchema, NodeData, NodeSchema, WorkflowSchema};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

pub const ROOT_CONTAINER: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPort {
    /// Port id from the edge, or the node id for the default port
    pub id: String,
    pub port_type: PortType,
    pub node_id: String,
    pub edges: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEdge {
    pub id: String,
    pub from: String,
    pub from_port: Option<String>,
    pub to: String,
    pub to_port: Option<String>,
}

impl From<&EdgeSchema> for FlowEdge {
    fn from(edge: &EdgeSchema) -> Self {
        Self {
            id: edge.id(),
            from: edge.source_node_id.clone(),
            from_port: edge.source_port_id.clone(),
            to: edge.target_node_id.clone(),
            to_port: edge.target_port_id.clone(),
        }
    }
}

#[derive(Debug)]
pub struct FlowNode {
    pub id: String,
    pub node_type: String,
    pub data: NodeData,
    /// Id of the enclosing container node, `None` at the root
    pub parent: Option<String>,
    pub ports: Vec<FlowPort>,
    pub body: Option<Container>,
}

impl FlowNode {
    pub fn title(&self) -> &str {
        self.data.title.as_deref().unwrap_or(&self.id)
    }

    pub fn is_container(&self) -> bool {
        self.body.is_some()
    }

    pub fn output_ports(&self) -> impl Iterator<Item = &FlowPort> {
        self.ports.iter().filter(|p| p.port_type == PortType::Output)
    }

    pub fn input_ports(&self) -> impl Iterator<Item = &FlowPort> {
        self.ports.iter().filter(|p| p.port_type == PortType::Input)
    }

    pub fn outputs_schema(&self) -> Option<&JsonSchema> {
        self.data.outputs.as_ref()
    }
}

/// Nodes and edges scoped to one container
#[derive(Debug, Clone)]
pub struct Container {
    pub id: String,
    pub nodes: Vec<Arc<FlowNode>>,
    pub edges: Vec<FlowEdge>,
}

impl Container {
    pub fn node(&self, id: &str) -> Option<&Arc<FlowNode>> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a FlowEdge> + 'a {
        self.edges.iter().filter(move |e| e.to == node_id)
    }

    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a FlowEdge> + 'a {
        self.edges.iter().filter(move |e| e.from == node_id)
    }

    /// Nodes without inbound edges inside this container
    pub fn entry_nodes(&self) -> Vec<Arc<FlowNode>> {
        self.nodes
            .iter()
            .filter(|n| self.incoming(&n.id).next().is_none())
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
pub struct WorkflowDocument {
    root: Container,
    index: HashMap<String, Arc<FlowNode>>,
    global_variable: Option<JsonSchema>,
}

impl WorkflowDocument {
    /// Build the document. Pure function of the schema; node types are not
    /// checked against any registry here.
    pub fn build(schema: &WorkflowSchema) -> Result<Self, WorkflowError> {
        let mut index = HashMap::new();
        let root = build_container(ROOT_CONTAINER, None, &schema.nodes, &schema.edges, &mut index)?;
        tracing::debug!(nodes = index.len(), edges = root.edges.len(), "Built workflow document");
        Ok(Self {
            root,
            index,
            global_variable: schema.global_variable.clone(),
        })
    }

    pub fn root(&self) -> &Container {
        &self.root
    }

    pub fn node(&self, id: &str) -> Option<&Arc<FlowNode>> {
        self.index.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<FlowNode>> {
        self.index.values()
    }

    pub fn global_variable(&self) -> Option<&JsonSchema> {
        self.global_variable.as_ref()
    }

    /// Root-level nodes of the given type
    pub fn root_nodes_of_type(&self, node_type: &str) -> Vec<Arc<FlowNode>> {
        self.root
            .nodes
            .iter()
            .filter(|n| n.node_type == node_type)
            .cloned()
            .collect()
    }

    pub fn start(&self) -> Option<Arc<FlowNode>> {
        self.root_nodes_of_type(node_types::START).into_iter().next()
    }
}

#[derive(Deserialize)]
struct ConditionKeys {
    #[serde(default)]
    conditions: Vec<ConditionKey>,
}

#[derive(Deserialize)]
struct ConditionKey {
    key: String,
}

fn condition_keys(data: &NodeData) -> HashSet<String> {
    data.config::<ConditionKeys>()
        .map(|c| c.conditions.into_iter().map(|k| k.key).collect())
        .unwrap_or_default()
}

fn build_container(
    owner: &str,
    parent: Option<&str>,
    nodes: &[NodeSchema],
    edges: &[EdgeSchema],
    index: &mut HashMap<String, Arc<FlowNode>>,
) -> Result<Container, WorkflowError> {
    let mut local_ids = HashSet::new();
    for node in nodes {
        if index.contains_key(&node.id) || !local_ids.insert(node.id.as_str()) {
            return Err(WorkflowError::DuplicateNode(node.id.clone()));
        }
    }

    let by_id: HashMap<&str, &NodeSchema> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut flow_edges = Vec::with_capacity(edges.len());
    for edge in edges {
        let flow_edge = FlowEdge::from(edge);
        for endpoint in [&edge.source_node_id, &edge.target_node_id] {
            if !local_ids.contains(endpoint.as_str()) {
                return Err(WorkflowError::DanglingEdge {
                    edge: flow_edge.id.clone(),
                    node: endpoint.clone(),
                });
            }
        }
        if let Some(source) = by_id.get(edge.source_node_id.as_str()) {
            if source.node_type == node_types::CONDITION {
                let port = edge.source_port_id.clone().unwrap_or_default();
                if !condition_keys(&source.data).contains(&port) {
                    return Err(WorkflowError::UnknownPort {
                        edge: flow_edge.id.clone(),
                        node: source.id.clone(),
                        port,
                    });
                }
            }
        }
        flow_edges.push(flow_edge);
    }

    check_acyclic(owner, nodes, &flow_edges)?;

    let mut container_nodes = Vec::with_capacity(nodes.len());
    for schema in nodes {
        let body = if schema.is_container() {
            Some(build_container(
                &schema.id,
                Some(&schema.id),
                &schema.blocks,
                &schema.edges,
                index,
            )?)
        } else {
            None
        };
        let node = Arc::new(FlowNode {
            id: schema.id.clone(),
            node_type: schema.node_type.clone(),
            data: schema.data.clone(),
            parent: parent.map(str::to_string),
            ports: build_ports(&schema.id, &flow_edges),
            body,
        });
        index.insert(node.id.clone(), node.clone());
        container_nodes.push(node);
    }

    Ok(Container {
        id: owner.to_string(),
        nodes: container_nodes,
        edges: flow_edges,
    })
}

/// One port per distinct port id on each side; edges without a port id
/// attach to the node's default port
fn build_ports(node_id: &str, edges: &[FlowEdge]) -> Vec<FlowPort> {
    let mut ports: Vec<FlowPort> = Vec::new();
    let mut attach = |port_id: &str, port_type: PortType, edge_id: &str| {
        match ports
            .iter_mut()
            .find(|p| p.id == port_id && p.port_type == port_type)
        {
            Some(port) => port.edges.push(edge_id.to_string()),
            None => ports.push(FlowPort {
                id: port_id.to_string(),
                port_type,
                node_id: node_id.to_string(),
                edges: vec![edge_id.to_string()],
            }),
        }
    };
    for edge in edges {
        if edge.from == node_id {
            attach(edge.from_port.as_deref().unwrap_or(node_id), PortType::Output, &edge.id);
        }
        if edge.to == node_id {
            attach(edge.to_port.as_deref().unwrap_or(node_id), PortType::Input, &edge.id);
        }
    }
    ports
}

fn check_acyclic(owner: &str, nodes: &[NodeSchema], edges: &[FlowEdge]) -> Result<(), WorkflowError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, _> = nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
        .collect();
    let mut seen = BTreeSet::new();
    for edge in edges {
        if !seen.insert((edge.from.as_str(), edge.to.as_str())) {
            continue;
        }
        if let (Some(from), Some(to)) = (indices.get(edge.from.as_str()), indices.get(edge.to.as_str())) {
            graph.add_edge(*from, *to, ());
        }
    }
    toposort(&graph, None)
        .map(|_| ())
        .map_err(|_| WorkflowError::CyclicDependency(owner.to_string()))
}
