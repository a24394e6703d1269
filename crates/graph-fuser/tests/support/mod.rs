#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use graph_fuser::ir::{
    parse_graph, Attr, Attributes, Graph, NodeId, NodeKind, TensorType, ValueId,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Dense row-major tensor used by the reference evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub sizes: Vec<usize>,
    pub data: Vec<f64>,
}

impl Tensor {
    pub fn new(sizes: &[usize], data: Vec<f64>) -> Self {
        assert_eq!(
            sizes.iter().product::<usize>(),
            data.len(),
            "data does not match sizes {sizes:?}"
        );
        Self {
            sizes: sizes.to_vec(),
            data,
        }
    }

    pub fn filled(sizes: &[usize], value: f64) -> Self {
        Self::new(sizes, vec![value; sizes.iter().product()])
    }

    /// Deterministic, non-constant contents in roughly [-1.5, 1.5].
    pub fn ramp(sizes: &[usize], seed: usize) -> Self {
        let numel: usize = sizes.iter().product();
        let data = (0..numel)
            .map(|i| ((i + 7 * seed) as f64 * 0.37 + 0.11).sin() * 1.5)
            .collect();
        Self::new(sizes, data)
    }

    /// Bitwise comparison that treats any two NaNs as equal.
    pub fn same_as(&self, other: &Tensor) -> bool {
        self.sizes == other.sizes
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()))
    }
}

/// Inputs matching the declared sizes of every graph input.
pub fn sample_inputs(graph: &Graph) -> Vec<Tensor> {
    graph
        .inputs()
        .iter()
        .enumerate()
        .map(|(seed, input)| {
            let ty = graph
                .value_type(*input)
                .expect("sample inputs need typed graph inputs");
            Tensor::ramp(&ty.sizes, seed)
        })
        .collect()
}

/// Interprets `graph` on concrete data, descending into fusion groups.
pub fn evaluate(graph: &Graph, inputs: &[Tensor]) -> Vec<Tensor> {
    assert_eq!(graph.inputs().len(), inputs.len(), "input arity");
    let mut env: HashMap<ValueId, Tensor> = graph
        .inputs()
        .iter()
        .copied()
        .zip(inputs.iter().cloned())
        .collect();

    for node_id in graph.nodes() {
        let node = graph.node(node_id);
        let args: Vec<Tensor> = node
            .inputs()
            .iter()
            .map(|value| env[value].clone())
            .collect();
        let results = match node.kind() {
            NodeKind::FusionGroup => evaluate(graph.subgraph(node_id), &args),
            NodeKind::Split => split(
                &args[0],
                attr(graph, node_id, "split_size"),
                attr(graph, node_id, "dim"),
            ),
            NodeKind::Cat => vec![cat(&args, attr(graph, node_id, "dim"))],
            NodeKind::Sum => vec![Tensor::new(&[1], vec![args[0].data.iter().sum()])],
            NodeKind::Zeros | NodeKind::Ones => {
                let ty = output_type(graph, node.output());
                let fill = if node.kind() == NodeKind::Ones { 1.0 } else { 0.0 };
                vec![Tensor::filled(&ty.sizes, fill)]
            }
            kind => vec![map(kind, &args)],
        };
        assert_eq!(results.len(), node.outputs().len(), "{} arity", node.kind());
        for (output, tensor) in node.outputs().iter().zip(results) {
            env.insert(*output, tensor);
        }
    }

    graph
        .outputs()
        .iter()
        .map(|value| env[value].clone())
        .collect()
}

fn attr(graph: &Graph, node: NodeId, name: &str) -> usize {
    let value = graph
        .node(node)
        .attr_int(name)
        .unwrap_or_else(|| panic!("node #{} needs integer attribute `{name}`", node.0));
    usize::try_from(value).expect("non-negative attribute")
}

fn output_type(graph: &Graph, value: ValueId) -> TensorType {
    graph.value_type(value).cloned().expect("typed output")
}

fn outer_inner(sizes: &[usize], dim: usize) -> (usize, usize) {
    let outer = sizes[..dim].iter().product();
    let inner = sizes[dim + 1..].iter().product();
    (outer, inner)
}

fn split(input: &Tensor, split_size: usize, dim: usize) -> Vec<Tensor> {
    let (outer, inner) = outer_inner(&input.sizes, dim);
    let len = input.sizes[dim];
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < len {
        let width = split_size.min(len - start);
        let mut data = Vec::with_capacity(outer * width * inner);
        for o in 0..outer {
            for i in start..start + width {
                let base = (o * len + i) * inner;
                data.extend_from_slice(&input.data[base..base + inner]);
            }
        }
        let mut sizes = input.sizes.clone();
        sizes[dim] = width;
        pieces.push(Tensor::new(&sizes, data));
        start += width;
    }
    pieces
}

fn cat(inputs: &[Tensor], dim: usize) -> Tensor {
    let first = &inputs[0];
    let (outer, inner) = outer_inner(&first.sizes, dim);
    let mut sizes = first.sizes.clone();
    sizes[dim] = inputs.iter().map(|t| t.sizes[dim]).sum();
    let mut data = Vec::with_capacity(sizes.iter().product());
    for o in 0..outer {
        for tensor in inputs {
            let chunk = tensor.sizes[dim] * inner;
            data.extend_from_slice(&tensor.data[o * chunk..(o + 1) * chunk]);
        }
    }
    Tensor::new(&sizes, data)
}

fn map(kind: NodeKind, args: &[Tensor]) -> Tensor {
    let unary = |f: fn(f64) -> f64| {
        let [x] = args else {
            panic!("{kind} expects one operand, got {}", args.len())
        };
        Tensor::new(&x.sizes, x.data.iter().map(|v| f(*v)).collect())
    };
    let binary = |f: fn(f64, f64) -> f64| {
        let [x, y] = args else {
            panic!("{kind} expects two operands, got {}", args.len())
        };
        assert_eq!(x.sizes, y.sizes, "{kind} operands must share sizes");
        Tensor::new(
            &x.sizes,
            x.data.iter().zip(&y.data).map(|(a, b)| f(*a, *b)).collect(),
        )
    };
    match kind {
        NodeKind::Add => binary(|a, b| a + b),
        NodeKind::Sub => binary(|a, b| a - b),
        NodeKind::Mul => binary(|a, b| a * b),
        NodeKind::Div => binary(|a, b| a / b),
        NodeKind::Max => binary(f64::max),
        NodeKind::Min => binary(f64::min),
        NodeKind::Atan2 => binary(f64::atan2),
        NodeKind::Pow => binary(f64::powf),
        NodeKind::Neg => unary(|a| -a),
        NodeKind::Abs => unary(f64::abs),
        NodeKind::Exp => unary(f64::exp),
        NodeKind::Log => unary(f64::ln),
        NodeKind::Sin => unary(f64::sin),
        NodeKind::Cos => unary(f64::cos),
        NodeKind::Tanh => unary(f64::tanh),
        NodeKind::Sqrt => unary(f64::sqrt),
        NodeKind::Floor => unary(f64::floor),
        NodeKind::Ceil => unary(f64::ceil),
        NodeKind::Reciprocal => unary(f64::recip),
        // Opaque to the fuser; any deterministic stand-in will do.
        NodeKind::Mm => binary(|a, b| a * b + a),
        NodeKind::Sigmoid => unary(|a| 1.0 / (1.0 + (-a).exp())),
        other => panic!("reference evaluator does not implement {other}"),
    }
}

/// Creates a node of `kind`, links it at the end of the body, and returns its output.
pub fn push(
    graph: &mut Graph,
    kind: NodeKind,
    inputs: &[ValueId],
    ty: TensorType,
    stage: usize,
) -> ValueId {
    push_with(graph, kind, Attributes::new(), inputs, vec![ty], stage)[0]
}

pub fn push_with(
    graph: &mut Graph,
    kind: NodeKind,
    attrs: Attributes,
    inputs: &[ValueId],
    types: Vec<TensorType>,
    stage: usize,
) -> Vec<ValueId> {
    let node = graph.create(kind, attrs);
    for input in inputs {
        graph.add_node_input(node, *input);
    }
    let outputs = types
        .into_iter()
        .map(|ty| graph.add_node_output(node, Some(ty)))
        .collect();
    graph.set_node_stage(node, stage);
    graph.append(node);
    outputs
}

pub fn split_attrs(split_size: i64, dim: i64) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("split_size".to_string(), Attr::Int(split_size));
    attrs.insert("dim".to_string(), Attr::Int(dim));
    attrs
}

pub fn cat_attrs(dim: i64) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("dim".to_string(), Attr::Int(dim));
    attrs
}

/// Body nodes that are fusion groups, in order.
pub fn fusion_groups(graph: &Graph) -> Vec<NodeId> {
    graph
        .nodes()
        .filter(|node| graph.node(*node).is_fusion_group())
        .collect()
}

/// Kinds of the body nodes, in order.
pub fn kinds(graph: &Graph) -> Vec<NodeKind> {
    graph.nodes().map(|node| graph.kind(node)).collect()
}

/// Re-renders `src` so expectations written with readable names compare against printed
/// graphs.
pub fn canonical(src: &str) -> String {
    parse_graph(src)
        .unwrap_or_else(|err| panic!("fixture does not parse: {err}\n{src}"))
        .to_text()
}

pub struct Case {
    pub name: String,
    pub input: String,
    pub expected: String,
}

/// Fixture format:
/// INPUT:
/// <graph text>
/// EXPECTED:
/// <graph text>
/// run_test
/// (repeat)
pub fn load_cases(fixture_rel: &str) -> Vec<Case> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(fixture_rel);
    let contents =
        fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {:?}: {}", path, e));
    let mut cases = Vec::new();
    let mut name = String::new();
    let mut input = String::new();
    let mut expected = String::new();
    let mut section: Option<&str> = None;
    for line in contents.lines() {
        match line.trim_end() {
            "INPUT:" => {
                section = Some("input");
                input.clear();
            }
            "EXPECTED:" => {
                section = Some("expected");
                expected.clear();
            }
            "run_test" => {
                cases.push(Case {
                    name: if name.is_empty() {
                        format!("case_{}", cases.len() + 1)
                    } else {
                        std::mem::take(&mut name)
                    },
                    input: input.clone(),
                    expected: expected.clone(),
                });
                section = None;
            }
            other if section.is_none() && other.starts_with("# ") => {
                name = other[2..].trim().to_string();
            }
            other => match section {
                Some("input") => {
                    input.push_str(other);
                    input.push('\n');
                }
                Some("expected") => {
                    expected.push_str(other);
                    expected.push('\n');
                }
                _ => {}
            },
        }
    }
    cases
}
