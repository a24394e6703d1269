mod support;

use graph_fuser::fusion::is_simple_map;
use graph_fuser::ir::{cpu_f32, cuda_f32, verify, Graph, NodeKind, ValueId};
use graph_fuser::{FuserConfig, GraphFusionPass, GraphPass};
use proptest::prelude::*;
use support::{cat_attrs, evaluate, push, push_with, sample_inputs, split_attrs};

// Each stage draws from its own kinds so fused groups can be traced back to a stage.
const EARLY_UNARY: [NodeKind; 4] = [
    NodeKind::Neg,
    NodeKind::Tanh,
    NodeKind::Sigmoid,
    NodeKind::Abs,
];
const EARLY_BINARY: [NodeKind; 3] = [NodeKind::Add, NodeKind::Mul, NodeKind::Min];
const LATE_UNARY: [NodeKind; 2] = [NodeKind::Sin, NodeKind::Cos];
const LATE_BINARY: [NodeKind; 2] = [NodeKind::Sub, NodeKind::Max];

fn stage_of_kind(kind: NodeKind) -> Option<usize> {
    if EARLY_UNARY.contains(&kind) || EARLY_BINARY.contains(&kind) {
        Some(0)
    } else if LATE_UNARY.contains(&kind) || LATE_BINARY.contains(&kind) {
        Some(1)
    } else {
        None
    }
}

type Step = (u8, u8, usize, usize, bool);

fn step_lists() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        (0u8..5, any::<u8>(), any::<usize>(), any::<usize>(), any::<bool>()),
        1..24,
    )
}

/// Random elementwise DAG over full `[4]` and half `[2]` accelerator tensors, with splits,
/// cats, host-typed barriers, and two stages. Every value left without a reader is returned.
fn build(steps: &[Step]) -> Graph {
    let full = cuda_f32(&[4]);
    let half = cuda_f32(&[2]);
    let mut graph = Graph::new();
    let mut fulls: Vec<ValueId> = (0..3).map(|_| graph.add_input(Some(full.clone()))).collect();
    let mut halves: Vec<ValueId> = vec![graph.add_input(Some(half.clone()))];
    let mut produced = Vec::new();

    for &(category, op, a, b, late) in steps {
        let stage = usize::from(late);
        let (unary, binary): (&[NodeKind], &[NodeKind]) = if late {
            (&LATE_UNARY[..], &LATE_BINARY[..])
        } else {
            (&EARLY_UNARY[..], &EARLY_BINARY[..])
        };
        let use_half = op % 2 == 1;
        let (pool, ty) = if use_half {
            (&mut halves, half.clone())
        } else {
            (&mut fulls, full.clone())
        };
        let len = pool.len();
        match category {
            0 => {
                let kind = unary[usize::from(op / 2) % unary.len()];
                let out = push(&mut graph, kind, &[pool[a % len]], ty, stage);
                pool.push(out);
                produced.push(out);
            }
            1 => {
                let kind = binary[usize::from(op / 2) % binary.len()];
                let out = push(&mut graph, kind, &[pool[a % len], pool[b % len]], ty, stage);
                pool.push(out);
                produced.push(out);
            }
            2 => {
                let source = fulls[a % fulls.len()];
                let pieces = push_with(
                    &mut graph,
                    NodeKind::Split,
                    split_attrs(2, 0),
                    &[source],
                    vec![half.clone(), half.clone()],
                    stage,
                );
                halves.extend(pieces.iter().copied());
                produced.extend(pieces);
            }
            3 => {
                let lhs = halves[a % halves.len()];
                let rhs = halves[b % halves.len()];
                let out = push_with(
                    &mut graph,
                    NodeKind::Cat,
                    cat_attrs(0),
                    &[lhs, rhs],
                    vec![full.clone()],
                    stage,
                )[0];
                fulls.push(out);
                produced.push(out);
            }
            _ => {
                let host = if use_half { cpu_f32(&[2]) } else { cpu_f32(&[4]) };
                let out = push(&mut graph, NodeKind::Exp, &[pool[a % len]], host, stage);
                let kind = unary[usize::from(op / 2) % unary.len()];
                let back = push(&mut graph, kind, &[out], ty, stage);
                pool.push(back);
                produced.push(out);
                produced.push(back);
            }
        }
    }

    for value in produced {
        if graph.uses(value).is_empty() {
            graph.register_output(value);
        }
    }
    graph
}

fn check_stages(graph: &Graph) -> Result<(), TestCaseError> {
    for node in graph.nodes() {
        let stage = graph.node(node).stage();
        if graph.node(node).is_fusion_group() {
            let subgraph = graph.subgraph(node);
            for inner in subgraph.nodes() {
                let kind = subgraph.kind(inner);
                prop_assert!(
                    kind == NodeKind::Cat || is_simple_map(subgraph, inner),
                    "{kind} ended up inside a fusion group"
                );
                if let Some(expected) = stage_of_kind(kind) {
                    prop_assert_eq!(expected, stage, "{} fused across stages", kind);
                }
                for input in subgraph.node(inner).inputs() {
                    let source = subgraph.kind(subgraph.producer(*input));
                    prop_assert!(source != NodeKind::Cat, "{kind} reads a cat inside its group");
                }
            }
        } else if let Some(expected) = stage_of_kind(graph.kind(node)) {
            prop_assert_eq!(expected, stage);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn fusion_preserves_structure_and_results(steps in step_lists()) {
        let mut graph = build(&steps);
        let inputs = sample_inputs(&graph);
        let before = evaluate(&graph, &inputs);
        let pass = GraphFusionPass::new(FuserConfig::default());

        pass.run(&mut graph);

        prop_assert!(verify(&graph).is_ok(), "{:?}\n{}", verify(&graph), graph);
        let after = evaluate(&graph, &inputs);
        prop_assert_eq!(before.len(), after.len());
        for (lhs, rhs) in before.iter().zip(&after) {
            prop_assert!(lhs.same_as(rhs), "expected {:?}, got {:?}\n{}", lhs, rhs, graph);
        }
        check_stages(&graph)?;

        let fused = graph.to_text();
        let again = pass.run(&mut graph);
        prop_assert!(!again.changed, "second run changed\n{}", fused);
        prop_assert_eq!(graph.to_text(), fused);
    }
}
