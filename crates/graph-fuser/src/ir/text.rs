use std::collections::HashMap;
use std::fmt::{self, Write as _};

use thiserror::Error;

use super::graph::Graph;
use super::node::{Attr, Attributes, NodeId, NodeKind, NodePayload, ValueId};
use super::types::{Device, ScalarType, TensorType};

/// Errors raised while parsing the compact graph text format.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextIrError {
    #[error("{message} (at byte {offset})")]
    Syntax { message: String, offset: usize },
    #[error("unknown operator `{0}`")]
    UnknownKind(String),
    #[error("value `%{0}` is used before it is defined")]
    UnknownValue(String),
    #[error("value `%{0}` is defined twice")]
    DuplicateValue(String),
    #[error("node defines {names} value(s) but declares {types} type(s)")]
    ArityMismatch { names: usize, types: usize },
}

/// Parses a graph written in the text format.
///
/// # Example
/// ```
/// use graph_fuser::ir::text::parse_graph;
///
/// let graph = parse_graph(r#"
/// graph(%a: f32[4]@cuda:0, %b: f32[4]@cuda:0) {
///   %t = add(%a, %b) : f32[4]@cuda:0
///   return(%t)
/// }
/// "#).expect("valid graph");
/// assert_eq!(graph.len(), 1);
/// assert_eq!(graph.inputs().len(), 2);
/// ```
pub fn parse_graph(src: &str) -> Result<Graph, TextIrError> {
    parse_graph_with_symbols(src).map(|parsed| parsed.graph)
}

/// Parses a graph and keeps the mapping from top-level value names to value ids.
pub fn parse_graph_with_symbols(src: &str) -> Result<ParsedGraph, TextIrError> {
    let mut cursor = Cursor::new(src);
    let parsed = cursor.graph()?;
    cursor.skip_ws();
    if cursor.pos < src.len() {
        return Err(cursor.error("trailing input after graph"));
    }
    Ok(parsed)
}

/// Graph paired with the names its values had in the source text.
#[derive(Debug, Clone)]
pub struct ParsedGraph {
    pub graph: Graph,
    pub values: HashMap<String, ValueId>,
}

impl ParsedGraph {
    /// Looks up a value by its textual name, without the leading `%`.
    pub fn value(&self, name: &str) -> ValueId {
        *self
            .values
            .get(name)
            .unwrap_or_else(|| panic!("no value named %{name}"))
    }

    /// Node producing the named value.
    pub fn node(&self, name: &str) -> NodeId {
        self.graph.producer(self.value(name))
    }
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> TextIrError {
        TextIrError::Syntax {
            message: message.into(),
            offset: self.pos,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            if trimmed.starts_with("//") {
                let line_end = trimmed.find('\n').unwrap_or(trimmed.len());
                self.pos += line_end;
                continue;
            }
            break;
        }
    }

    fn peek_raw(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.peek_raw()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), TextIrError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{expected}`")))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        self.skip_ws();
        let rest = self.rest();
        if !rest.starts_with(keyword) {
            return false;
        }
        let boundary = rest[keyword.len()..]
            .chars()
            .next()
            .map(|c| !is_ident_char(c))
            .unwrap_or(true);
        if boundary {
            self.pos += keyword.len();
        }
        boundary
    }

    fn ident(&mut self) -> Result<&'a str, TextIrError> {
        self.skip_ws();
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !is_ident_char(*c))
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected identifier"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn value_name(&mut self) -> Result<&'a str, TextIrError> {
        self.expect('%')?;
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !is_ident_char(*c))
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected value name after `%`"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn number(&mut self) -> Result<&'a str, TextIrError> {
        self.skip_ws();
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')))
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected number"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn usize(&mut self) -> Result<usize, TextIrError> {
        let token = self.number()?;
        token
            .parse()
            .map_err(|_| self.error(format!("`{token}` is not a non-negative integer")))
    }

    fn usize_list(&mut self, close: char) -> Result<Vec<usize>, TextIrError> {
        let mut out = Vec::new();
        if self.eat(close) {
            return Ok(out);
        }
        loop {
            out.push(self.usize()?);
            if self.eat(close) {
                return Ok(out);
            }
            self.expect(',')?;
        }
    }

    fn graph(&mut self) -> Result<ParsedGraph, TextIrError> {
        if !self.eat_keyword("graph") {
            return Err(self.error("graph must start with `graph`"));
        }
        let mut graph = Graph::new();
        let mut values: HashMap<String, ValueId> = HashMap::new();

        self.expect('(')?;
        if !self.eat(')') {
            loop {
                let name = self.value_name()?;
                self.expect(':')?;
                let ty = self.value_type()?;
                let id = graph.add_input(ty);
                define(&mut values, name, id)?;
                if self.eat(')') {
                    break;
                }
                self.expect(',')?;
            }
        }
        self.expect('{')?;

        loop {
            if self.eat_keyword("return") {
                self.expect('(')?;
                for name in self.operand_names()? {
                    graph.register_output(lookup(&values, name)?);
                }
                self.expect('}')?;
                return Ok(ParsedGraph { graph, values });
            }
            self.statement(&mut graph, &mut values)?;
        }
    }

    fn operand_names(&mut self) -> Result<Vec<&'a str>, TextIrError> {
        let mut names = Vec::new();
        if self.eat(')') {
            return Ok(names);
        }
        loop {
            names.push(self.value_name()?);
            if self.eat(')') {
                return Ok(names);
            }
            self.expect(',')?;
        }
    }

    fn statement(
        &mut self,
        graph: &mut Graph,
        values: &mut HashMap<String, ValueId>,
    ) -> Result<(), TextIrError> {
        let mut names = vec![self.value_name()?];
        while self.eat(',') {
            names.push(self.value_name()?);
        }
        self.expect('=')?;

        let kind_name = self.ident()?;
        let kind = NodeKind::from_name(kind_name)
            .ok_or_else(|| TextIrError::UnknownKind(kind_name.to_string()))?;
        if matches!(kind, NodeKind::Param | NodeKind::Return) {
            return Err(TextIrError::UnknownKind(kind_name.to_string()));
        }
        let attrs = if self.peek() == Some('[') {
            self.pos += 1;
            self.attributes()?
        } else {
            Attributes::new()
        };

        self.expect('(')?;
        let operands = self
            .operand_names()?
            .into_iter()
            .map(|name| lookup(values, name))
            .collect::<Result<Vec<_>, _>>()?;

        self.expect(':')?;
        let mut types = vec![self.value_type()?];
        while self.eat(',') {
            types.push(self.value_type()?);
        }
        if types.len() != names.len() {
            return Err(TextIrError::ArityMismatch {
                names: names.len(),
                types: types.len(),
            });
        }

        let node = if kind == NodeKind::FusionGroup {
            graph.create_fusion_group()
        } else {
            graph.create(kind, attrs)
        };
        for operand in operands {
            graph.add_node_input(node, operand);
        }
        for (name, ty) in names.into_iter().zip(types) {
            let id = graph.add_node_output(node, ty);
            define(values, name, id)?;
        }

        if self.eat('!') {
            let key = self.ident()?;
            if key != "stage" {
                return Err(self.error(format!("unknown node annotation `{key}`")));
            }
            self.expect('=')?;
            let stage = self.usize()?;
            graph.set_node_stage(node, stage);
        }

        if kind == NodeKind::FusionGroup {
            self.expect('{')?;
            let nested = self.graph()?;
            self.expect('}')?;
            *graph.subgraph_mut(node) = nested.graph;
        }

        graph.append(node);
        Ok(())
    }

    fn attributes(&mut self) -> Result<Attributes, TextIrError> {
        let mut attrs = Attributes::new();
        if self.eat(']') {
            return Ok(attrs);
        }
        loop {
            let key = self.ident()?.to_string();
            self.expect('=')?;
            let value = match self.peek() {
                Some('[') => {
                    self.pos += 1;
                    let mut items = Vec::new();
                    if !self.eat(']') {
                        loop {
                            let token = self.number()?;
                            items.push(token.parse::<i64>().map_err(|_| {
                                self.error(format!("`{token}` is not an integer"))
                            })?);
                            if self.eat(']') {
                                break;
                            }
                            self.expect(',')?;
                        }
                    }
                    Attr::Ints(items)
                }
                Some(c) if c.is_ascii_digit() || c == '-' => {
                    let token = self.number()?;
                    if let Ok(int) = token.parse::<i64>() {
                        Attr::Int(int)
                    } else {
                        Attr::Float(token.parse::<f64>().map_err(|_| {
                            self.error(format!("`{token}` is not a number"))
                        })?)
                    }
                }
                _ => Attr::Str(self.ident()?.to_string()),
            };
            attrs.insert(key, value);
            if self.eat(']') {
                return Ok(attrs);
            }
            self.expect(',')?;
        }
    }

    fn value_type(&mut self) -> Result<Option<TensorType>, TextIrError> {
        if self.eat('?') {
            return Ok(None);
        }
        let scalar_name = self.ident()?;
        let scalar = ScalarType::from_name(scalar_name)
            .ok_or_else(|| self.error(format!("unknown scalar type `{scalar_name}`")))?;
        self.expect('[')?;
        let sizes = self.usize_list(']')?;
        let strides = if self.peek_raw() == Some('{') {
            self.pos += 1;
            Some(self.usize_list('}')?)
        } else {
            None
        };
        let device = if self.peek_raw() == Some('@') {
            self.pos += 1;
            if !self.eat_keyword("cuda") {
                return Err(self.error("expected `cuda` device"));
            }
            self.expect(':')?;
            let ordinal = self.usize()?;
            let ordinal = u32::try_from(ordinal)
                .map_err(|_| self.error(format!("device ordinal {ordinal} is out of range")))?;
            Device::Cuda(ordinal)
        } else {
            Device::Cpu
        };
        Ok(Some(match strides {
            Some(strides) => {
                if strides.len() != sizes.len() {
                    return Err(self.error("strides must have the same rank as sizes"));
                }
                TensorType::with_strides(scalar, device, sizes, strides)
            }
            None => TensorType::new(scalar, device, sizes),
        }))
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn define(
    values: &mut HashMap<String, ValueId>,
    name: &str,
    id: ValueId,
) -> Result<(), TextIrError> {
    if values.insert(name.to_string(), id).is_some() {
        return Err(TextIrError::DuplicateValue(name.to_string()));
    }
    Ok(())
}

fn lookup(values: &HashMap<String, ValueId>, name: &str) -> Result<ValueId, TextIrError> {
    values
        .get(name)
        .copied()
        .ok_or_else(|| TextIrError::UnknownValue(name.to_string()))
}

impl Graph {
    /// Renders the graph in the text format. Values are renumbered in definition order so
    /// structurally identical graphs render identically.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        write_graph(self, &mut out, 0);
        out
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

fn write_graph(graph: &Graph, out: &mut String, indent: usize) {
    let pad = " ".repeat(indent);
    let mut names: HashMap<ValueId, usize> = HashMap::new();

    let params = graph
        .inputs()
        .iter()
        .map(|input| {
            format!(
                "{}: {}",
                name_of(*input, &mut names),
                type_text(graph, *input)
            )
        })
        .collect::<Vec<_>>();
    let _ = writeln!(out, "{pad}graph({}) {{", params.join(", "));

    for node_id in graph.nodes() {
        let node = graph.node(node_id);
        let operands = node
            .inputs()
            .iter()
            .map(|input| name_of(*input, &mut names))
            .collect::<Vec<_>>();
        let results = node
            .outputs()
            .iter()
            .map(|output| name_of(*output, &mut names))
            .collect::<Vec<_>>();
        let types = node
            .outputs()
            .iter()
            .map(|output| type_text(graph, *output))
            .collect::<Vec<_>>();
        let attrs = match node.payload() {
            NodePayload::Op(attrs) if !attrs.is_empty() => format!(
                "[{}]",
                attrs
                    .iter()
                    .map(|(key, value)| format!("{key}={}", attr_text(value)))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            _ => String::new(),
        };
        let _ = write!(
            out,
            "{pad}  {} = {}{}({}) : {}",
            results.join(", "),
            node.kind(),
            attrs,
            operands.join(", "),
            types.join(", ")
        );
        if node.stage() != 0 {
            let _ = write!(out, " !stage={}", node.stage());
        }
        if let Some(subgraph) = node.subgraph() {
            out.push_str(" {\n");
            write_graph(subgraph, out, indent + 4);
            let _ = write!(out, "{pad}  }}");
        }
        out.push('\n');
    }

    let returns = graph
        .outputs()
        .iter()
        .map(|output| name_of(*output, &mut names))
        .collect::<Vec<_>>();
    let _ = writeln!(out, "{pad}  return({})", returns.join(", "));
    let _ = writeln!(out, "{pad}}}");
}

fn name_of(value: ValueId, names: &mut HashMap<ValueId, usize>) -> String {
    let next = names.len();
    format!("%{}", names.entry(value).or_insert(next))
}

fn type_text(graph: &Graph, value: ValueId) -> String {
    match graph.value_type(value) {
        Some(ty) => ty.to_string(),
        None => "?".to_string(),
    }
}

fn attr_text(attr: &Attr) -> String {
    match attr {
        Attr::Int(value) => value.to_string(),
        Attr::Float(value) => format!("{value:?}"),
        Attr::Ints(values) => format!(
            "[{}]",
            values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(",")
        ),
        Attr::Str(value) => value.clone(),
    }
}
