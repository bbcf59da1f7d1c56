use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::Node;

/// Formal parameter of an operator schema
#[derive(Debug, Clone, PartialEq)]
pub struct FormalParameter {
    pub name: String,
    pub type_name: String,
    /// Keyword-only arguments follow the `*` marker in the canonical form
    pub kwarg_only: bool,
}

impl FormalParameter {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            kwarg_only: false,
        }
    }

    pub fn kwarg(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            kwarg_only: true,
        }
    }
}

/// One overload of an operator. Operators with several overloads register
/// one schema per overload; the out-variant is the overload taking a
/// caller-provided output buffer named `out`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpSchema {
    /// Operator name, e.g. `nn.conv2d`
    pub name: String,
    /// Overload name, empty for the default overload
    pub overload: String,
    pub arguments: Vec<FormalParameter>,
    /// Return type names
    pub returns: Vec<String>,
}

impl OpSchema {
    pub fn new(name: &str, overload: &str, arguments: Vec<FormalParameter>, returns: Vec<&str>) -> Self {
        Self {
            name: name.to_string(),
            overload: overload.to_string(),
            arguments,
            returns: returns.into_iter().map(|r| r.to_string()).collect(),
        }
    }

    /// Whether this overload writes into a caller-supplied `out` buffer
    pub fn has_out_argument(&self) -> bool {
        self.arguments.iter().any(|arg| arg.name == "out")
    }

    /// Canonical string form of the schema. Two textually distinct schemas
    /// that canonicalize identically are the same operator; trace-mode
    /// planning matches recorded headers against this form.
    pub fn canonical_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.name);
        if !self.overload.is_empty() {
            out.push('.');
            out.push_str(&self.overload);
        }
        out.push('(');
        let mut wrote_star = false;
        for (i, arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            if arg.kwarg_only && !wrote_star {
                out.push_str("*, ");
                wrote_star = true;
            }
            out.push_str(&arg.type_name);
            out.push(' ');
            out.push_str(&arg.name);
        }
        out.push_str(") -> ");
        if self.returns.len() == 1 {
            out.push_str(&self.returns[0]);
        } else {
            out.push('(');
            out.push_str(&self.returns.join(", "));
            out.push(')');
        }
        out
    }
}

/// Registry of operator schemas, keyed by operator name
#[derive(Debug, Default)]
pub struct OperatorRegistry {
    schemas: HashMap<String, Vec<OpSchema>>,
}

impl OperatorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    /// Register a schema overload for its operator
    pub fn register(&mut self, schema: OpSchema) {
        self.schemas.entry(schema.name.clone()).or_default().push(schema);
    }

    /// All overloads registered for an operator name
    pub fn all_operators_for(&self, op_type: &str) -> &[OpSchema] {
        self.schemas.get(op_type).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Whether any overload of the node's operator accepts an `out`
    /// argument. Only such nodes have outputs the planner may redirect
    /// into the arena.
    pub fn has_out_variant(&self, node: &Node) -> bool {
        self.all_operators_for(&node.op_type)
            .iter()
            .any(|schema| schema.has_out_argument())
    }

    /// Canonical header string for a node, from its default overload.
    /// Nodes with no registered schema (e.g. planner-inserted allocation
    /// nodes) get an opaque header that never matches a recorded one.
    pub fn node_header(&self, node: &Node) -> String {
        let overloads = self.all_operators_for(&node.op_type);
        match overloads.iter().find(|s| s.overload.is_empty()).or_else(|| overloads.first()) {
            Some(schema) => schema.canonical_string(),
            None => format!("{}()", node.op_type),
        }
    }

    /// Same as `node_header` but an error for unregistered operators
    pub fn require_header(&self, node: &Node) -> Result<String> {
        if self.all_operators_for(&node.op_type).is_empty() {
            return Err(Error::InvalidOperator(format!(
                "no schema registered for operator {}",
                node.op_type
            )));
        }
        Ok(self.node_header(node))
    }

    /// Registry seeded with the standard tensor operators used throughout
    /// the tests and demos
    pub fn with_standard_operators() -> Self {
        let mut registry = Self::new();

        registry.register(OpSchema::new(
            "nn.conv2d",
            "",
            vec![
                FormalParameter::new("input", "Tensor"),
                FormalParameter::new("weight", "Tensor"),
            ],
            vec!["Tensor"],
        ));
        registry.register(OpSchema::new(
            "nn.conv2d",
            "out",
            vec![
                FormalParameter::new("input", "Tensor"),
                FormalParameter::new("weight", "Tensor"),
                FormalParameter::kwarg("out", "Tensor"),
            ],
            vec!["Tensor"],
        ));

        registry.register(OpSchema::new(
            "nn.relu",
            "",
            vec![FormalParameter::new("input", "Tensor")],
            vec!["Tensor"],
        ));
        registry.register(OpSchema::new(
            "nn.relu",
            "out",
            vec![
                FormalParameter::new("input", "Tensor"),
                FormalParameter::kwarg("out", "Tensor"),
            ],
            vec!["Tensor"],
        ));

        registry.register(OpSchema::new(
            "nn.max_pool2d",
            "",
            vec![FormalParameter::new("input", "Tensor")],
            vec!["Tensor"],
        ));
        registry.register(OpSchema::new(
            "nn.max_pool2d",
            "out",
            vec![
                FormalParameter::new("input", "Tensor"),
                FormalParameter::kwarg("out", "Tensor"),
            ],
            vec!["Tensor"],
        ));

        registry.register(OpSchema::new(
            "math.matmul",
            "",
            vec![
                FormalParameter::new("self", "Tensor"),
                FormalParameter::new("other", "Tensor"),
            ],
            vec!["Tensor"],
        ));
        registry.register(OpSchema::new(
            "math.matmul",
            "out",
            vec![
                FormalParameter::new("self", "Tensor"),
                FormalParameter::new("other", "Tensor"),
                FormalParameter::kwarg("out", "Tensor"),
            ],
            vec!["Tensor"],
        ));

        registry.register(OpSchema::new(
            "math.add",
            "",
            vec![
                FormalParameter::new("self", "Tensor"),
                FormalParameter::new("other", "Tensor"),
            ],
            vec!["Tensor"],
        ));
        registry.register(OpSchema::new(
            "math.add",
            "out",
            vec![
                FormalParameter::new("self", "Tensor"),
                FormalParameter::new("other", "Tensor"),
                FormalParameter::kwarg("out", "Tensor"),
            ],
            vec!["Tensor"],
        ));

        // Structural operators have no out-variant; their outputs stay with
        // the default allocator.
        registry.register(OpSchema::new(
            "list.construct",
            "",
            vec![FormalParameter::new("inputs", "Tensor[]")],
            vec!["Tensor[]"],
        ));
        registry.register(OpSchema::new(
            "shape.view",
            "",
            vec![
                FormalParameter::new("self", "Tensor"),
                FormalParameter::new("shape", "int[]"),
            ],
            vec!["Tensor"],
        ));

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_string_marks_kwargs() {
        let schema = OpSchema::new(
            "math.add",
            "out",
            vec![
                FormalParameter::new("self", "Tensor"),
                FormalParameter::new("other", "Tensor"),
                FormalParameter::kwarg("out", "Tensor"),
            ],
            vec!["Tensor"],
        );
        assert_eq!(
            schema.canonical_string(),
            "math.add.out(Tensor self, Tensor other, *, Tensor out) -> Tensor"
        );
    }

    #[test]
    fn test_out_variant_detection() {
        let registry = OperatorRegistry::with_standard_operators();
        let mut graph = crate::model::Graph::new("g");
        let conv = graph.add_node("nn.conv2d", vec![], vec!["y".to_string()]);
        let view = graph.add_node("shape.view", vec![], vec!["v".to_string()]);
        assert!(registry.has_out_variant(graph.node(conv).unwrap()));
        assert!(!registry.has_out_variant(graph.node(view).unwrap()));
    }
}
