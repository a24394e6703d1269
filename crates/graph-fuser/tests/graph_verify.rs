mod support;

use graph_fuser::ir::{cuda_f32, parse_graph, verify, Attributes, Graph, GraphError, NodeKind};
use support::push;

#[test]
fn accepts_well_formed_nested_graphs() {
    let graph = parse_graph(
        r#"
        graph(%a: f32[4]@cuda:0, %b: f32[4]@cuda:0) {
          %g0, %g1 = FusionGroup(%a, %b) : f32[4]@cuda:0, f32[4]@cuda:0 {
            graph(%x: f32[4]@cuda:0, %y: f32[4]@cuda:0) {
              %s = add(%x, %y) : f32[4]@cuda:0
              %n = neg(%s) : f32[4]@cuda:0
              return(%n, %s)
            }
          }
          %m = mm(%g0, %g1) : f32[4]@cuda:0
          return(%m)
        }
        "#,
    )
    .expect("parse");
    verify(&graph).expect("graph is well formed");
}

#[test]
fn rejects_use_before_definition() {
    let mut graph = Graph::new();
    let a = graph.add_input(Some(cuda_f32(&[2])));
    let producer = graph.create(NodeKind::Exp, Attributes::new());
    graph.add_node_input(producer, a);
    let produced = graph.add_node_output(producer, Some(cuda_f32(&[2])));
    let consumer = push(&mut graph, NodeKind::Neg, &[produced], cuda_f32(&[2]), 0);
    graph.append(producer);
    graph.register_output(consumer);

    let err = verify(&graph).expect_err("consumer precedes producer");
    assert_eq!(
        err,
        GraphError::UseBeforeDefinition {
            value: produced.0,
            user: graph.producer(consumer).0,
        }
    );
}

#[test]
fn rejects_group_arity_mismatch() {
    let graph = parse_graph(
        r#"
        graph(%a: f32[4]@cuda:0, %b: f32[4]@cuda:0) {
          %g = FusionGroup(%a, %b) : f32[4]@cuda:0 {
            graph(%x: f32[4]@cuda:0) {
              %n = neg(%x) : f32[4]@cuda:0
              return(%n)
            }
          }
          return(%g)
        }
        "#,
    )
    .expect("parse");
    let err = verify(&graph).expect_err("arity");
    assert!(
        matches!(
            err,
            GraphError::GroupArity {
                what: "inputs",
                outer: 2,
                inner: 1,
                ..
            }
        ),
        "{err:?}"
    );
}

#[test]
fn rejects_group_type_mismatch() {
    let graph = parse_graph(
        r#"
        graph(%a: f32[4]@cuda:0) {
          %g = FusionGroup(%a) : f32[4]@cuda:0 {
            graph(%x: f32[4]@cuda:0) {
              %n = neg(%x) : f32[3]@cuda:0
              return(%n)
            }
          }
          return(%g)
        }
        "#,
    )
    .expect("parse");
    let err = verify(&graph).expect_err("output type");
    assert!(
        matches!(
            err,
            GraphError::GroupType {
                what: "outputs",
                index: 0,
                ..
            }
        ),
        "{err:?}"
    );
}

#[test]
fn rejects_empty_groups_at_any_depth() {
    let graph = parse_graph(
        r#"
        graph(%a: f32[4]@cuda:0) {
          %g = FusionGroup(%a) : f32[4]@cuda:0 {
            graph(%x: f32[4]@cuda:0) {
              %inner = FusionGroup(%x) : f32[4]@cuda:0 {
                graph(%y: f32[4]@cuda:0) {
                  return(%y)
                }
              }
              return(%inner)
            }
          }
          return(%g)
        }
        "#,
    )
    .expect("parse");
    let err = verify(&graph).expect_err("empty nested group");
    let GraphError::Nested { source, .. } = &err else {
        panic!("expected nested error, got {err:?}");
    };
    assert!(matches!(**source, GraphError::EmptyGroup { .. }), "{source:?}");
    assert!(err.to_string().starts_with("inside fusion group"), "{err}");
}
