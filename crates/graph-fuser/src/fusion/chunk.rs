use log::debug;

use crate::ir::{NodeId, NodeKind, TensorType, ValueId};

use super::classify::is_fusable;
use super::topo::all_users_are_this_consumer;
use super::FusionContext;

impl FusionContext<'_> {
    /// Pushes a `split` feeding `consumer` above the map that produces its operand.
    ///
    /// ```text
    /// a, b = split(op(x, y))
    /// ```
    /// becomes
    /// ```text
    /// x0, x1 = split(x)
    /// y0, y1 = split(y)
    /// a = op(x0, y0)
    /// b = op(x1, y1)
    /// ```
    /// Each piece of an operand keeps the operand's scalar kind and device but takes the
    /// geometry of the matching split output. The replicas produce contiguous results.
    /// Returns `false` without touching the graph when the pattern does not apply.
    pub fn try_to_move_chunk(&mut self, consumer: NodeId, producer: ValueId) -> bool {
        let graph = &*self.graph;
        let chunk = graph.producer(producer);
        if graph.kind(chunk) != NodeKind::Split {
            return false;
        }
        let &[operand_value] = graph.node(chunk).inputs() else {
            return false;
        };
        let operand = graph.producer(operand_value);
        if !is_fusable(graph, operand) || !all_users_are_this_consumer(graph, chunk, operand_value)
        {
            return false;
        }
        let chunk_outputs = graph.node(chunk).outputs().to_vec();
        let only_consumer = chunk_outputs
            .iter()
            .all(|piece| all_users_are_this_consumer(graph, consumer, *piece));
        if !only_consumer {
            return false;
        }
        let operand_node = graph.node(operand);
        if operand_node.is_fusion_group()
            || operand_node.outputs().len() != 1
            || operand_node.stage() != graph.node(chunk).stage()
        {
            return false;
        }

        let chunk_attrs = graph.node(chunk).attrs().cloned().unwrap_or_default();
        let piece_types: Vec<Option<TensorType>> = chunk_outputs
            .iter()
            .map(|piece| graph.value_type(*piece).cloned())
            .collect();
        let template = graph.template(operand);
        let operand_attrs = template.payload.attrs().cloned().unwrap_or_default();

        let mut insertion_point = chunk;
        let mut chunked_inputs: Vec<Vec<ValueId>> = Vec::with_capacity(template.inputs.len());
        for input in &template.inputs {
            let input_type = self.graph.value_type(*input).cloned();
            let input_chunk = self.graph.create(NodeKind::Split, chunk_attrs.clone());
            self.graph.add_node_input(input_chunk, *input);
            self.insert_at(&mut insertion_point, input_chunk);

            let pieces = piece_types
                .iter()
                .map(|piece_type| {
                    let ty = match (&input_type, piece_type) {
                        (Some(input_type), Some(piece_type)) => Some(
                            input_type.with_sizes_strides(&piece_type.sizes, &piece_type.strides),
                        ),
                        _ => None,
                    };
                    self.graph.add_node_output(input_chunk, ty)
                })
                .collect();
            chunked_inputs.push(pieces);
        }

        for (offset, (piece, piece_type)) in chunk_outputs.iter().zip(&piece_types).enumerate() {
            let replica = self.graph.create(template.kind, operand_attrs.clone());
            let replica_output = self
                .graph
                .add_node_output(replica, piece_type.as_ref().map(TensorType::contiguous));
            for pieces in &chunked_inputs {
                self.graph.add_node_input(replica, pieces[offset]);
            }
            self.insert_at(&mut insertion_point, replica);
            self.graph.replace_all_uses_with(*piece, replica_output);
        }

        self.destroy(chunk);
        self.destroy(operand);
        self.stats.chunks_distributed += 1;
        debug!(
            "distributed split #{} over {} #{} for consumer #{}",
            chunk.0, template.kind, operand.0, consumer.0
        );
        true
    }
}
