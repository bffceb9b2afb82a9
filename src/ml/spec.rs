// ============================================================
// Layer 5 — Network Description Parser
// ============================================================
// Networks are described in a plain option file: a list of
// named sections, each a bag of key=value pairs. A section is
// either a NODE (a set of feature maps) or an EDGE (an operation
// connecting two nodes).
//
//   # comments and blank lines are ignored
//   [input]
//   type=input
//   size=1
//
//   [conv1]
//   type=conv
//   init=xavier
//   size=1,3,3          # kernel, z,y,x
//   input=input
//   output=nl1
//
//   [nl1]
//   type=transfer
//   function=rectify_linear
//   size=12
//
//   [pool1]
//   type=max_filter
//   size=1,2,2          # window
//   stride=1,2,2        # sparseness multiplier for later layers
//   input=nl1
//   output=mp1
//   ...
//   [output]
//   type=transfer
//   function=logistic
//   size=3
//
// Node types:  input, sum, transfer
// Edge types:  conv, max_filter
//
// Filters are applied densely (sliding window, no subsampling).
// A max_filter with stride s instead makes every later filter
// sparse by s, which keeps the output dense while growing the
// field of view. Per axis:
//
//     fov = 1 + Σ (k - 1) * sparseness
//
// Only chains are supported: input → edge → node → edge → … → output.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};
use thiserror::Error;

use crate::domain::volume::Vec3;

// ─── Errors ───────────────────────────────────────────────────────────────────
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("cannot read network spec: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("section [{0}] is defined twice")]
    DuplicateSection(String),

    #[error("section [{section}] is missing required key '{key}'")]
    MissingKey { section: String, key: String },

    #[error("section [{section}]: invalid value '{value}' for '{key}'")]
    InvalidValue { section: String, key: String, value: String },

    #[error("section [{section}] has unknown type '{kind}'")]
    UnknownType { section: String, kind: String },

    #[error("edge [{edge}] refers to unknown node '{node}'")]
    UnknownNode { edge: String, node: String },

    #[error("network has no node named '{0}'")]
    MissingNode(String),

    #[error("unsupported topology: {0}")]
    Unsupported(String),
}

// ─── Parsed model description ────────────────────────────────────────────────

/// Element-wise non-linearity applied by a transfer node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Transfer {
    /// a * x + b
    Linear { a: f32, b: f32 },
    /// a * tanh(b * x)
    Tanh { a: f32, b: f32 },
    Logistic,
    RectifyLinear,
}

impl Transfer {
    pub const IDENTITY: Transfer = Transfer::Linear { a: 1.0, b: 0.0 };
}

/// Weight initialisation for a conv edge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Init {
    Uniform { min: f64, max: f64 },
    Gaussian { mean: f64, std: f64 },
    Xavier,
    Constant { value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageKind {
    Conv { kernel: Vec3, init: Init },
    MaxFilter { window: Vec3 },
}

/// One edge of the chain together with the node it feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Edge section name
    pub name:       String,
    pub kind:       StageKind,
    pub in_maps:    usize,
    pub out_maps:   usize,
    /// Spacing between filter taps (dilation)
    pub sparseness: Vec3,
    /// Non-linearity of the node this edge feeds
    pub transfer:   Transfer,
    /// Whether the fed node carries a bias (transfer nodes do)
    pub bias:       bool,
}

impl StageSpec {
    /// Filter extent along each axis
    pub fn extent(&self) -> Vec3 {
        match self.kind {
            StageKind::Conv { kernel, .. } => kernel,
            StageKind::MaxFilter { window } => window,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetSpec {
    pub stages:      Vec<StageSpec>,
    pub input_maps:  usize,
    pub output_maps: usize,
}

impl NetSpec {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Field of view, (z, y, x)
    pub fn fov(&self) -> Vec3 {
        let mut fov = [1usize; 3];
        for stage in &self.stages {
            let k = stage.extent();
            for axis in 0..3 {
                fov[axis] += (k[axis] - 1) * stage.sparseness[axis];
            }
        }
        fov
    }

    /// Input patch needed to produce an `outsz` output patch
    pub fn input_size(&self, outsz: Vec3) -> Vec3 {
        let fov = self.fov();
        [
            fov[0] + outsz[0] - 1,
            fov[1] + outsz[1] - 1,
            fov[2] + outsz[2] - 1,
        ]
    }

    /// Parse the option-file text into a chain of stages.
    pub fn parse(text: &str) -> Result<Self, SpecError> {
        let sections = parse_sections(text)?;

        let mut nodes: HashMap<&str, Node> = HashMap::new();
        let mut edges: Vec<Edge> = Vec::new();

        for s in &sections {
            match s.require("type")? {
                "input" | "sum" | "transfer" => {
                    nodes.insert(s.name.as_str(), Node::from_section(s)?);
                }
                "conv" | "max_filter" => edges.push(Edge::from_section(s)?),
                other => {
                    return Err(SpecError::UnknownType {
                        section: s.name.clone(),
                        kind:    other.to_string(),
                    })
                }
            }
        }

        let input = nodes
            .get("input")
            .ok_or_else(|| SpecError::MissingNode("input".into()))?;
        if !nodes.contains_key("output") {
            return Err(SpecError::MissingNode("output".into()));
        }
        if input.maps != 1 {
            return Err(SpecError::Unsupported(format!(
                "input node has {} maps; only single-channel input is supported",
                input.maps
            )));
        }

        for e in &edges {
            for node in [&e.input, &e.output] {
                if !nodes.contains_key(node.as_str()) {
                    return Err(SpecError::UnknownNode {
                        edge: e.name.clone(),
                        node: node.clone(),
                    });
                }
            }
        }
        for name in nodes.keys() {
            if edges.iter().filter(|e| e.output == *name).count() > 1 {
                return Err(SpecError::Unsupported(format!(
                    "node '{name}' has more than one incoming edge"
                )));
            }
        }

        // ── Walk the chain from input to output ──────────────────────────────
        let mut stages = Vec::with_capacity(edges.len());
        let mut current = "input";
        let mut sparseness = [1usize; 3];

        while current != "output" {
            let mut outgoing = edges.iter().filter(|e| e.input == current);
            let edge = outgoing.next().ok_or_else(|| {
                SpecError::Unsupported(format!("node '{current}' does not lead to 'output'"))
            })?;
            if outgoing.next().is_some() {
                return Err(SpecError::Unsupported(format!(
                    "node '{current}' has more than one outgoing edge"
                )));
            }
            if stages.len() == edges.len() {
                return Err(SpecError::Unsupported("edges form a cycle".into()));
            }

            let from = &nodes[current];
            let to = &nodes[edge.output.as_str()];

            let (kind, stage_sparseness) = match edge.op {
                EdgeOp::Conv { kernel, stride, init } => (
                    StageKind::Conv { kernel, init },
                    mul3(sparseness, stride),
                ),
                EdgeOp::MaxFilter { window, stride } => {
                    if from.maps != to.maps {
                        return Err(SpecError::Unsupported(format!(
                            "max_filter [{}] joins {} maps to {} maps",
                            edge.name, from.maps, to.maps
                        )));
                    }
                    let here = sparseness;
                    sparseness = mul3(sparseness, stride);
                    (StageKind::MaxFilter { window }, here)
                }
            };

            stages.push(StageSpec {
                name:       edge.name.clone(),
                kind,
                in_maps:    from.maps,
                out_maps:   to.maps,
                sparseness: stage_sparseness,
                transfer:   to.transfer,
                bias:       to.bias,
            });
            current = edge.output.as_str();
        }

        if edges.iter().any(|e| e.input == "output") {
            return Err(SpecError::Unsupported("'output' has an outgoing edge".into()));
        }
        if stages.len() != edges.len() {
            return Err(SpecError::Unsupported(format!(
                "{} edge(s) are not on the input → output chain",
                edges.len() - stages.len()
            )));
        }
        if stages.is_empty() {
            return Err(SpecError::Unsupported("network has no edges".into()));
        }

        let output_maps = nodes["output"].maps;
        tracing::debug!("Parsed network: {} stages, {} output maps", stages.len(), output_maps);
        Ok(NetSpec { stages, input_maps: 1, output_maps })
    }
}

fn mul3(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] * b[0], a[1] * b[1], a[2] * b[2]]
}

// ─── Sections ─────────────────────────────────────────────────────────────────
struct Section {
    name:    String,
    entries: HashMap<String, String>,
}

impl Section {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn require(&self, key: &str) -> Result<&str, SpecError> {
        self.get(key).ok_or_else(|| SpecError::MissingKey {
            section: self.name.clone(),
            key:     key.to_string(),
        })
    }

    fn invalid(&self, key: &str, value: &str) -> SpecError {
        SpecError::InvalidValue {
            section: self.name.clone(),
            key:     key.to_string(),
            value:   value.to_string(),
        }
    }

    fn usize_of(&self, key: &str) -> Result<usize, SpecError> {
        let v = self.require(key)?;
        match v.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(self.invalid(key, v)),
        }
    }

    fn vec3_of(&self, key: &str) -> Result<Option<Vec3>, SpecError> {
        let Some(v) = self.get(key) else { return Ok(None) };
        let parts: Vec<usize> = v
            .split(',')
            .map(|p| p.trim().parse::<usize>())
            .collect::<Result<_, _>>()
            .map_err(|_| self.invalid(key, v))?;
        match parts.as_slice() {
            [z, y, x] if *z > 0 && *y > 0 && *x > 0 => Ok(Some([*z, *y, *x])),
            _ => Err(self.invalid(key, v)),
        }
    }

    fn floats_of(&self, key: &str) -> Result<Option<Vec<f64>>, SpecError> {
        let Some(v) = self.get(key) else { return Ok(None) };
        v.split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
            .map_err(|_| self.invalid(key, v))
    }

    /// Exactly two floats, or the given defaults when the key is absent
    fn pair_of(&self, key: &str, default: (f64, f64)) -> Result<(f64, f64), SpecError> {
        match self.floats_of(key)? {
            None => Ok(default),
            Some(v) if v.len() == 2 => Ok((v[0], v[1])),
            Some(_) => Err(self.invalid(key, self.get(key).unwrap_or_default())),
        }
    }
}

fn parse_sections(text: &str) -> Result<Vec<Section>, SpecError> {
    let mut sections: Vec<Section> = Vec::new();

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let name = rest
                .strip_suffix(']')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| SpecError::Syntax {
                    line:    line_no,
                    message: format!("malformed section header '{line}'"),
                })?;
            if sections.iter().any(|s| s.name == name) {
                return Err(SpecError::DuplicateSection(name.to_string()));
            }
            sections.push(Section { name: name.to_string(), entries: HashMap::new() });
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| SpecError::Syntax {
            line:    line_no,
            message: format!("expected key=value, found '{line}'"),
        })?;
        let section = sections.last_mut().ok_or_else(|| SpecError::Syntax {
            line:    line_no,
            message: "key=value before the first [section]".into(),
        })?;
        section
            .entries
            .insert(key.trim().to_string(), value.trim().to_string());
    }

    Ok(sections)
}

// ─── Nodes and edges ──────────────────────────────────────────────────────────
struct Node {
    maps:     usize,
    transfer: Transfer,
    bias:     bool,
}

impl Node {
    fn from_section(s: &Section) -> Result<Self, SpecError> {
        let maps = s.usize_of("size")?;
        let (transfer, bias) = match s.require("type")? {
            "transfer" => (parse_transfer(s)?, true),
            _ => (Transfer::IDENTITY, false),
        };
        Ok(Node { maps, transfer, bias })
    }
}

fn parse_transfer(s: &Section) -> Result<Transfer, SpecError> {
    let f = s.require("function")?;
    match f {
        "linear" => {
            let (a, b) = s.pair_of("function_args", (1.0, 0.0))?;
            Ok(Transfer::Linear { a: a as f32, b: b as f32 })
        }
        "tanh" => {
            let (a, b) = s.pair_of("function_args", (1.0, 1.0))?;
            Ok(Transfer::Tanh { a: a as f32, b: b as f32 })
        }
        "logistic" => Ok(Transfer::Logistic),
        "rectify_linear" => Ok(Transfer::RectifyLinear),
        _ => Err(s.invalid("function", f)),
    }
}

enum EdgeOp {
    Conv { kernel: Vec3, stride: Vec3, init: Init },
    MaxFilter { window: Vec3, stride: Vec3 },
}

struct Edge {
    name:   String,
    input:  String,
    output: String,
    op:     EdgeOp,
}

impl Edge {
    fn from_section(s: &Section) -> Result<Self, SpecError> {
        let size = s.vec3_of("size")?.ok_or_else(|| SpecError::MissingKey {
            section: s.name.clone(),
            key:     "size".into(),
        })?;
        let stride = s.vec3_of("stride")?;

        let op = match s.require("type")? {
            "conv" => EdgeOp::Conv {
                kernel: size,
                stride: stride.unwrap_or([1, 1, 1]),
                init:   parse_init(s)?,
            },
            _ => EdgeOp::MaxFilter {
                window: size,
                stride: stride.unwrap_or(size),
            },
        };

        Ok(Edge {
            name:   s.name.clone(),
            input:  s.require("input")?.to_string(),
            output: s.require("output")?.to_string(),
            op,
        })
    }
}

fn parse_init(s: &Section) -> Result<Init, SpecError> {
    match s.get("init").unwrap_or("xavier") {
        "xavier" => Ok(Init::Xavier),
        "uniform" => {
            let (min, max) = s.pair_of("init_args", (-0.1, 0.1))?;
            if min >= max {
                return Err(s.invalid("init_args", s.get("init_args").unwrap_or_default()));
            }
            Ok(Init::Uniform { min, max })
        }
        "gaussian" => {
            let (mean, std) = s.pair_of("init_args", (0.0, 0.01))?;
            Ok(Init::Gaussian { mean, std })
        }
        "constant" => {
            let value = match s.floats_of("init_args")? {
                None => 0.0,
                Some(v) if v.len() == 1 => v[0],
                Some(_) => return Err(s.invalid("init_args", s.get("init_args").unwrap_or_default())),
            };
            Ok(Init::Constant { value })
        }
        other => Err(s.invalid("init", other)),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = "
        # two conv layers with a pooling filter in between
        [input]
        type=input
        size=1

        [conv1]
        type=conv
        init=uniform
        init_args=-0.05,0.05
        size=1,3,3
        input=input
        output=nl1

        [nl1]
        type=transfer
        function=tanh
        function_args=1.7159,0.6666
        size=4

        [pool1]
        type=max_filter
        size=1,2,2
        input=nl1
        output=mp1

        [mp1]
        type=sum
        size=4

        [conv2]
        type=conv
        size=1,3,3
        input=mp1
        output=output

        [output]
        type=transfer
        function=logistic
        size=3
    ";

    #[test]
    fn test_parses_chain_in_order() {
        let spec = NetSpec::parse(SMALL).unwrap();
        let names: Vec<_> = spec.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["conv1", "pool1", "conv2"]);
        assert_eq!(spec.output_maps, 3);
        match spec.stages[0].transfer {
            Transfer::Tanh { a, b } => {
                assert!((a - 1.7159).abs() < 1e-6);
                assert!((b - 0.6666).abs() < 1e-6);
            }
            other => panic!("expected tanh, got {other:?}"),
        }
        assert_eq!(spec.stages[1].transfer, Transfer::IDENTITY);
        assert!(!spec.stages[1].bias);
    }

    #[test]
    fn test_pooling_makes_later_filters_sparse() {
        let spec = NetSpec::parse(SMALL).unwrap();
        assert_eq!(spec.stages[0].sparseness, [1, 1, 1]);
        assert_eq!(spec.stages[1].sparseness, [1, 1, 1]);
        assert_eq!(spec.stages[2].sparseness, [1, 2, 2]);
    }

    #[test]
    fn test_fov_and_input_size() {
        let spec = NetSpec::parse(SMALL).unwrap();
        // y/x: 1 + 2*1 + 1*1 + 2*2 = 8
        assert_eq!(spec.fov(), [1, 8, 8]);
        assert_eq!(spec.input_size([1, 20, 20]), [1, 27, 27]);
    }

    #[test]
    fn test_unknown_type() {
        let text = "[input]\ntype=input\nsize=1\n[x]\ntype=dropout\n";
        assert!(matches!(NetSpec::parse(text), Err(SpecError::UnknownType { .. })));
    }

    #[test]
    fn test_missing_output_node() {
        let text = "[input]\ntype=input\nsize=1\n";
        assert!(matches!(NetSpec::parse(text), Err(SpecError::MissingNode(n)) if n == "output"));
    }

    #[test]
    fn test_entry_before_section() {
        let err = NetSpec::parse("type=input\n").unwrap_err();
        assert!(matches!(err, SpecError::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_duplicate_section() {
        let text = "[input]\ntype=input\nsize=1\n[input]\ntype=input\nsize=1\n";
        assert!(matches!(NetSpec::parse(text), Err(SpecError::DuplicateSection(_))));
    }

    #[test]
    fn test_bad_kernel_size() {
        let text = SMALL.replace("size=1,3,3\n        input=input", "size=1,0,3\n        input=input");
        assert!(matches!(NetSpec::parse(&text), Err(SpecError::InvalidValue { .. })));
    }

    #[test]
    fn test_edge_to_unknown_node() {
        let text = SMALL.replace("output=nl1", "output=nowhere");
        assert!(matches!(NetSpec::parse(&text), Err(SpecError::UnknownNode { .. })));
    }

    #[test]
    fn test_branching_is_unsupported() {
        let extra = "
        [conv3]
        type=conv
        size=1,1,1
        input=nl1
        output=side

        [side]
        type=sum
        size=2
        ";
        let text = format!("{SMALL}{extra}");
        assert!(matches!(NetSpec::parse(&text), Err(SpecError::Unsupported(_))));
    }

    #[test]
    fn test_multi_channel_input_is_unsupported() {
        let text = SMALL.replacen("size=1\n", "size=2\n", 1);
        assert!(matches!(NetSpec::parse(&text), Err(SpecError::Unsupported(_))));
    }

    #[test]
    fn test_pool_must_keep_map_count() {
        let text = SMALL.replace("[mp1]\n        type=sum\n        size=4", "[mp1]\n        type=sum\n        size=5");
        assert!(matches!(NetSpec::parse(&text), Err(SpecError::Unsupported(_))));
    }

    #[test]
    fn test_bundled_network_file() {
        let spec = NetSpec::parse(include_str!("../../networks/srini2d.znn")).unwrap();
        assert_eq!(spec.stages.len(), 8);
        assert_eq!(spec.output_maps, 3);
        assert_eq!(spec.fov(), [1, 55, 55]);
        assert_eq!(spec.input_size([1, 20, 20]), [1, 74, 74]);
    }
}
