//! Connections: the acyclic device graph (§4.C).
//!
//! Slotmap-keyed nodes and Kahn's-algorithm topological sort generalized
//! from a plain patch bay into the path-keyed, cycle-checked, post-order-
//! mixed device graph described by `original_source/src/lib/Connections.c`:
//! nodes are addressed by `ins_XX/gen_YY/...`-style paths instead of
//! arbitrary names, edges are validated against that path grammar, and
//! mixing is a tri-state-coloured post-order walk rather than a flat
//! Kahn's-order tick.

use crate::buffer::AudioBuffer;
use crate::device::Device;
use crate::error::EngineError;
use crate::limits::{MAX_DSPS, MAX_EFFECTS, MAX_GENERATORS, MAX_INSTRUMENTS, MAX_PORTS};
use crate::port::PortIndex;
use std::collections::{HashMap, VecDeque};
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Stable identity for a node in a [`Connections`] graph.
    pub struct NodeKey;
}

/// A reference to a specific port on a specific node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub node: NodeKey,
    pub port: PortIndex,
}

/// Which namespace a `Connections` instance operates in. The root graph
/// wires the master output and top-level instruments/effects; an
/// instrument's internal graph wires its generators and effects; an
/// effect's internal graph wires its DSPs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLevel {
    Root,
    Instrument,
    Effect,
}

/// Whether a path is being validated as the sending or receiving end of an
/// edge (`original_source`'s `Device_port_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeRole {
    Src,
    Dst,
}

/// The node path and port index a connection path resolves to, with the
/// port-type directory suffix stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    pub node_path: String,
    pub port: PortIndex,
}

fn read_hex2(s: &str) -> Option<(u8, &str)> {
    if s.len() < 2 || !s.is_char_boundary(2) {
        return None;
    }
    let (digits, rest) = s.split_at(2);
    if !digits.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    let value = u8::from_str_radix(digits, 16).ok()?;
    Some((value, rest))
}

/// Validate and canonicalise one endpoint of a connection edge, per §6's
/// path grammar. Returns the node's canonical path (directory prefix with
/// the port suffix trimmed) and the port index.
fn parse_connection_path(
    raw: &str,
    level: ConnectionLevel,
    role: EdgeRole,
) -> Result<ParsedPath, EngineError> {
    let fmt_err = |msg: String| EngineError::Format(msg);

    let mut node_path = String::new();
    let mut rest = raw;
    let mut root = true;
    let mut addresses_instrument_or_generator = false;

    if let Some(after) = rest.strip_prefix("ins_") {
        if level != ConnectionLevel::Root {
            return Err(fmt_err(format!(
                "instrument directory in a deep-level connection: \"{}\"",
                raw
            )));
        }
        let (idx, after) = read_hex2(after)
            .ok_or_else(|| fmt_err(format!("invalid instrument number in the connection: \"{}\"", raw)))?;
        if idx as usize >= MAX_INSTRUMENTS {
            return Err(fmt_err(format!(
                "invalid instrument number in the connection: \"{}\"",
                raw
            )));
        }
        let after = after
            .strip_prefix('/')
            .ok_or_else(|| fmt_err(format!("malformed instrument path: \"{}\"", raw)))?;
        node_path = format!("ins_{:02x}", idx);
        rest = after;
        root = false;
        addresses_instrument_or_generator = true;
    } else if let Some(after) = rest.strip_prefix("eff_") {
        if level == ConnectionLevel::Effect {
            return Err(fmt_err(format!(
                "effect directory in an effect-level connection: \"{}\"",
                raw
            )));
        }
        let (idx, after) = read_hex2(after)
            .ok_or_else(|| fmt_err(format!("invalid effect number in the connection: \"{}\"", raw)))?;
        if idx as usize >= MAX_EFFECTS {
            return Err(fmt_err(format!("invalid effect number in the connection: \"{}\"", raw)));
        }
        let after = after
            .strip_prefix('/')
            .ok_or_else(|| fmt_err(format!("malformed effect path: \"{}\"", raw)))?;
        node_path = format!("eff_{:02x}", idx);
        rest = after;
        root = false;
    } else if let Some(after) = rest.strip_prefix("gen_") {
        if level != ConnectionLevel::Instrument {
            return Err(fmt_err(format!(
                "generator directory outside an instrument: \"{}\"",
                raw
            )));
        }
        let (idx, after) = read_hex2(after)
            .ok_or_else(|| fmt_err(format!("invalid generator number in the connection: \"{}\"", raw)))?;
        if idx as usize >= MAX_GENERATORS {
            return Err(fmt_err(format!(
                "invalid generator number in the connection: \"{}\"",
                raw
            )));
        }
        let after = after
            .strip_prefix("C/")
            .or_else(|| after.strip_prefix('/').and_then(|a| a.strip_prefix("C/")))
            .ok_or_else(|| fmt_err(format!("invalid generator parameter directory: \"{}\"", raw)))?;
        node_path = format!("gen_{:02x}", idx);
        rest = after;
        root = false;
        addresses_instrument_or_generator = true;
    } else if let Some(after) = rest.strip_prefix("dsp_") {
        if level != ConnectionLevel::Effect {
            return Err(fmt_err(format!("DSP directory outside an effect: \"{}\"", raw)));
        }
        let (idx, after) = read_hex2(after)
            .ok_or_else(|| fmt_err(format!("invalid DSP number in the connection: \"{}\"", raw)))?;
        if idx as usize >= MAX_DSPS {
            return Err(fmt_err(format!("invalid DSP number in the connection: \"{}\"", raw)));
        }
        let after = after
            .strip_prefix("C/")
            .or_else(|| after.strip_prefix('/').and_then(|a| a.strip_prefix("C/")))
            .ok_or_else(|| fmt_err(format!("invalid DSP parameter directory: \"{}\"", raw)))?;
        node_path = format!("dsp_{:02x}", idx);
        rest = after;
        root = false;
    }

    let (is_input, port_str) = if let Some(after) = rest.strip_prefix("in_") {
        (true, after)
    } else if let Some(after) = rest.strip_prefix("out_") {
        (false, after)
    } else {
        return Err(fmt_err(format!("invalid connection: \"{}\"", raw)));
    };

    if is_input && addresses_instrument_or_generator {
        return Err(fmt_err(format!(
            "input ports are not allowed for instruments or generators: \"{}\"",
            raw
        )));
    }
    if is_input && root && level == ConnectionLevel::Root {
        return Err(fmt_err(format!("input ports are not allowed for master: \"{}\"", raw)));
    }

    match role {
        EdgeRole::Dst => {
            let can_receive = (!root && is_input) || (root && !is_input);
            if !can_receive {
                return Err(fmt_err(format!(
                    "destination port is not for receiving data: \"{}\"",
                    raw
                )));
            }
        }
        EdgeRole::Src => {
            let can_send = (!is_input && !root) || (is_input && root);
            if !can_send {
                return Err(fmt_err(format!("source port is not for sending data: \"{}\"", raw)));
            }
        }
    }

    let (port, trailing) =
        read_hex2(port_str).ok_or_else(|| fmt_err(format!("invalid port number: \"{}\"", raw)))?;
    if port as usize >= MAX_PORTS {
        return Err(fmt_err(format!("invalid port number: \"{}\"", raw)));
    }
    if !trailing.is_empty() {
        return Err(fmt_err(format!(
            "connection path contains garbage after the port specification: \"{}\"",
            raw
        )));
    }

    // Within an instrument or effect's own internal graph, a bare path (no
    // directory prefix) addresses one of two distinct interface nodes: "Iin"
    // is the container's incoming signal (source-only, fed externally by the
    // wrapping device), "Iout" is its final mix (destination-only, collected
    // by the wrapping device after mixing). Keeping them distinct nodes
    // matters: a filter effect routing "in_00" into its first dsp and its
    // last dsp's output to "out_00" would otherwise close a 2-cycle through
    // a single shared node.
    if node_path.is_empty() && level != ConnectionLevel::Root {
        node_path = if is_input { "Iin" } else { "Iout" }.to_string();
    }

    Ok(ParsedPath { node_path, port })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeColor {
    New,
    Reached,
    Finished,
}

struct DeviceNode {
    device: Box<dyn Device>,
    color: NodeColor,
    /// Edges landing on each input port, by port index.
    input_sources: HashMap<PortIndex, Vec<PortRef>>,
    /// Output buffers, allocated once per registered output port.
    output_buffers: HashMap<PortIndex, AudioBuffer>,
}

impl DeviceNode {
    fn new(device: Box<dyn Device>) -> Self {
        DeviceNode {
            device,
            color: NodeColor::New,
            input_sources: HashMap::new(),
            output_buffers: HashMap::new(),
        }
    }
}

/// The acyclic device graph. One instance wires the master root; a
/// separate instance (at `ConnectionLevel::Instrument`/`Effect`) wires each
/// instrument's or effect's internal devices.
pub struct Connections {
    nodes: SlotMap<NodeKey, DeviceNode>,
    by_path: HashMap<String, NodeKey>,
    master: NodeKey,
    level: ConnectionLevel,
    cables: Vec<(PortRef, PortRef)>,
    sample_rate: f64,
    buffer_size: usize,
}

impl Connections {
    /// Create an empty graph rooted at `master` (path `""` at the root
    /// level, or the container's output interface otherwise).
    pub fn new(
        master: Box<dyn Device>,
        level: ConnectionLevel,
        sample_rate: f64,
        buffer_size: usize,
    ) -> Self {
        let mut nodes = SlotMap::with_key();
        let master_key = nodes.insert(DeviceNode::new(master));
        let mut by_path = HashMap::new();
        by_path.insert(String::new(), master_key);
        Connections {
            nodes,
            by_path,
            master: master_key,
            level,
            cables: Vec::new(),
            sample_rate,
            buffer_size,
        }
    }

    pub fn master(&self) -> NodeKey {
        self.master
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn cable_count(&self) -> usize {
        self.cables.len()
    }

    /// Look up a node's key by its canonical path: `""` for this graph's
    /// `master`, `"Iin"`/`"Iout"` for a non-root graph's own incoming/
    /// outgoing interface (only present once some edge has referenced a bare
    /// `in_*`/`out_*` path), or `"gen_00"`/`"eff_00"`/etc for a registered
    /// child. A parent graph uses this to feed a child graph's `"Iin"` and
    /// read its `"Iout"` after wrapping it as a single [`Device`].
    pub fn node_key(&self, path: &str) -> Option<NodeKey> {
        self.by_path.get(path).copied()
    }

    /// Mutable access to a registered node's device, for dispatching a
    /// note-on/note-off/release call into a generator (or a parameter
    /// change into a DSP) once its [`NodeKey`] has been resolved.
    pub fn device_mut(&mut self, key: NodeKey) -> Option<&mut dyn Device> {
        self.nodes.get_mut(key).map(|node| node.device.as_mut())
    }

    fn get_or_insert(
        &mut self,
        path: &str,
        resolve: &mut dyn FnMut(&str) -> Result<Box<dyn Device>, EngineError>,
    ) -> Result<NodeKey, EngineError> {
        if let Some(&key) = self.by_path.get(path) {
            return Ok(key);
        }
        let device = resolve(path)?;
        let key = self.nodes.insert(DeviceNode::new(device));
        self.by_path.insert(path.to_string(), key);
        Ok(key)
    }

    /// Parse `[[src_path, dst_path], ...]` edges, creating nodes on demand
    /// via `resolve` (looked up by canonical node path, e.g. `"ins_01"`),
    /// validating each path against §6's grammar, and rejecting the whole
    /// batch with a `Format` error naming the offending path or cycle.
    pub fn connect_from_edges(
        &mut self,
        edges: &[(String, String)],
        mut resolve: impl FnMut(&str) -> Result<Box<dyn Device>, EngineError>,
    ) -> Result<(), EngineError> {
        for (src_raw, dst_raw) in edges {
            let src = parse_connection_path(src_raw, self.level, EdgeRole::Src)?;
            let dst = parse_connection_path(dst_raw, self.level, EdgeRole::Dst)?;

            let src_key = self.get_or_insert(&src.node_path, &mut resolve)?;
            let dst_key = self.get_or_insert(&dst.node_path, &mut resolve)?;

            let src_ref = PortRef {
                node: src_key,
                port: src.port,
            };
            let dst_ref = PortRef {
                node: dst_key,
                port: dst.port,
            };

            if !self.nodes[src_key].device.port_spec().is_registered(
                crate::port::PortDirection::Out,
                src.port,
            ) {
                return Err(EngineError::Format(format!(
                    "connecting to unregistered output port: \"{}\"",
                    src_raw
                )));
            }
            if !self.nodes[dst_key].device.port_spec().is_registered(
                crate::port::PortDirection::In,
                dst.port,
            ) {
                return Err(EngineError::Format(format!(
                    "connecting to unregistered input port: \"{}\"",
                    dst_raw
                )));
            }

            self.cables.push((src_ref, dst_ref));
        }

        self.rebuild_input_sources();

        if let Some(cycle_path) = self.find_cycle() {
            return Err(EngineError::Format(format!(
                "the connection graph contains a cycle (path length {})",
                cycle_path.len()
            )));
        }

        Ok(())
    }

    fn rebuild_input_sources(&mut self) {
        for node in self.nodes.values_mut() {
            node.input_sources.clear();
        }
        for &(src, dst) in &self.cables {
            self.nodes
                .get_mut(dst.node)
                .expect("dst node exists")
                .input_sources
                .entry(dst.port)
                .or_default()
                .push(src);
        }
    }

    fn reset_colors(&mut self) {
        for node in self.nodes.values_mut() {
            node.color = NodeColor::New;
        }
    }

    /// Tri-state-coloured depth-first cycle check (white/grey/black). Runs
    /// at parse time; `mix` also defends against the same condition in case
    /// the graph was mutated after `prepare` without reparsing.
    fn find_cycle(&mut self) -> Option<Vec<NodeKey>> {
        self.reset_colors();
        let keys: Vec<NodeKey> = self.nodes.keys().collect();
        for key in keys {
            if self.nodes[key].color == NodeColor::New {
                let mut stack = Vec::new();
                if self.cycle_in_path(key, &mut stack) {
                    return Some(stack);
                }
            }
        }
        None
    }

    fn cycle_in_path(&mut self, key: NodeKey, stack: &mut Vec<NodeKey>) -> bool {
        match self.nodes[key].color {
            NodeColor::Reached => return true,
            NodeColor::Finished => return false,
            NodeColor::New => {}
        }
        self.nodes.get_mut(key).unwrap().color = NodeColor::Reached;
        stack.push(key);

        let sources: Vec<NodeKey> = self.nodes[key]
            .input_sources
            .values()
            .flatten()
            .map(|p| p.node)
            .collect();
        for src in sources {
            if self.cycle_in_path(src, stack) {
                return true;
            }
        }

        self.nodes.get_mut(key).unwrap().color = NodeColor::Finished;
        stack.pop();
        false
    }

    /// Prepare buffers for rendering: size every registered output port's
    /// buffer to the current buffer size (the suggestion pass collapses to
    /// this directly since the engine has one uniform buffer size), and
    /// propagate `set_buffer_size`/`set_audio_rate` to every device.
    pub fn prepare(&mut self) -> Result<(), EngineError> {
        if self.find_cycle().is_some() {
            return Err(EngineError::Format(
                "the connection graph contains a cycle".to_string(),
            ));
        }

        for node in self.nodes.values_mut() {
            node.device.set_audio_rate(self.sample_rate);
            node.device.set_buffer_size(self.buffer_size);
            for port in node.device.port_spec().registered_outputs() {
                node.output_buffers
                    .entry(port)
                    .or_insert_with(|| AudioBuffer::new(self.buffer_size));
                let buf = node.output_buffers.get_mut(&port).unwrap();
                if buf.len() != self.buffer_size {
                    buf.resize(self.buffer_size);
                }
            }
        }
        Ok(())
    }

    /// Topological order via Kahn's algorithm, used to clear buffers in
    /// dependency order. Assumes the graph is already known acyclic.
    fn topological_order(&self) -> Vec<NodeKey> {
        let mut in_degree: HashMap<NodeKey, usize> = self.nodes.keys().map(|k| (k, 0)).collect();
        let mut successors: HashMap<NodeKey, Vec<NodeKey>> =
            self.nodes.keys().map(|k| (k, Vec::new())).collect();

        for &(src, dst) in &self.cables {
            *in_degree.entry(dst.node).or_insert(0) += 1;
            successors.entry(src.node).or_default().push(dst.node);
        }

        let mut queue: VecDeque<NodeKey> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node) = queue.pop_front() {
            order.push(node);
            if let Some(succs) = successors.get(&node) {
                for &succ in succs {
                    let deg = in_degree.get_mut(&succ).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(succ);
                    }
                }
            }
        }
        order
    }

    /// Zero all output buffers in the active render window, in topological
    /// order (invariant 5).
    pub fn clear(&mut self, start: usize, stop: usize) {
        if start >= stop {
            return;
        }
        for key in self.topological_order() {
            for buf in self.nodes[key].output_buffers.values_mut() {
                buf.clear(start, stop);
            }
        }
    }

    /// Render `[start, stop)` by visiting nodes in post-order from the
    /// graph's exit node, pulling each node's inputs from its sources
    /// (recursing, memoised by tri-state colour) before calling its
    /// `process`. At root level the exit node is `master`; at instrument or
    /// effect level it is `"Iout"` (the root-level `master` device a non-root
    /// graph is constructed with is never wired to anything: bare `out_XX`
    /// paths resolve to `"Iout"`, not `""`, so walking from it would never
    /// reach anything its children wrote). A non-root graph with nothing
    /// ever wired to `out_XX` has no `"Iout"` node yet and mixes nothing,
    /// leaving its reader's output silent.
    pub fn mix(&mut self, start: usize, stop: usize, rate: f64, tempo: f64) {
        if start >= stop {
            return;
        }
        let entry = match self.level {
            ConnectionLevel::Root => Some(self.master),
            ConnectionLevel::Instrument | ConnectionLevel::Effect => self.by_path.get("Iout").copied(),
        };
        let Some(entry) = entry else { return };
        self.reset_colors();
        self.mix_node(entry, start, stop, rate, tempo);
    }

    fn mix_node(&mut self, key: NodeKey, start: usize, stop: usize, rate: f64, tempo: f64) {
        match self.nodes[key].color {
            NodeColor::Finished => return,
            NodeColor::Reached => return, // cycle guard; parse-time check prevents this
            NodeColor::New => {}
        }
        self.nodes.get_mut(key).unwrap().color = NodeColor::Reached;

        let sources: Vec<NodeKey> = self.nodes[key]
            .input_sources
            .values()
            .flatten()
            .map(|p| p.node)
            .collect();
        for src in sources {
            self.mix_node(src, start, stop, rate, tempo);
        }

        self.process_node(key, start, stop, rate, tempo);
        self.nodes.get_mut(key).unwrap().color = NodeColor::Finished;
    }

    fn process_node(&mut self, key: NodeKey, start: usize, stop: usize, rate: f64, tempo: f64) {
        let registered_inputs: Vec<PortIndex> = self.nodes[key]
            .device
            .port_spec()
            .registered_inputs()
            .collect();

        // Gather each input port's contribution: sum of every connected
        // source's output buffer over [start, stop). Built as owned buffers
        // since Rust can't alias the source's buffer and the destination's
        // input simultaneously while both live in the same slotmap.
        let mut gathered: Vec<(PortIndex, AudioBuffer)> = Vec::new();
        for port in registered_inputs {
            let mut acc = AudioBuffer::new(self.buffer_size);
            if let Some(sources) = self.nodes[key].input_sources.get(&port).cloned() {
                for src in &sources {
                    if let Some(src_buf) = self.nodes[src.node].output_buffers.get(&src.port) {
                        acc.mix_from(src_buf, start, stop);
                    }
                }
            }
            gathered.push((port, acc));
        }

        let input_refs: Vec<Option<&AudioBuffer>> =
            gathered.iter().map(|(_, buf)| Some(buf)).collect();

        let node = self.nodes.get_mut(key).unwrap();
        let output_ports: Vec<PortIndex> = node.device.port_spec().registered_outputs().collect();
        let mut outputs: Vec<AudioBuffer> = output_ports
            .iter()
            .map(|_| AudioBuffer::new(self.buffer_size))
            .collect();

        node.device
            .process(&input_refs, &mut outputs, start, stop, rate, tempo);

        for (port, buf) in output_ports.into_iter().zip(outputs.into_iter()) {
            node.output_buffers.insert(port, buf);
        }
    }

    pub fn output_buffer(&self, node: NodeKey, port: PortIndex) -> Option<&AudioBuffer> {
        self.nodes.get(node)?.output_buffers.get(&port)
    }

    pub fn reset(&mut self) {
        for node in self.nodes.values_mut() {
            node.device.reset();
            for buf in node.output_buffers.values_mut() {
                buf.clear(0, buf.len());
            }
        }
    }
}

/// The node a non-root graph's bare `in_XX` paths resolve to (`"Iin"`):
/// a pure source carrying the container's incoming signal. A parent wraps
/// the graph as a single [`Device`] via [`SubgraphDevice`], which copies its
/// own input into this node's buffer before every `mix`; nothing can
/// connect an edge *into* `"Iin"` (`parse_connection_path` rejects a bare
/// `in_XX` destination), so it only ever has children reading from it.
/// Kept distinct from `"Iout"` (see [`SubgraphDevice`]) so a straight-through
/// effect chain (`in_00 -> dsp_00 -> ... -> out_00`) doesn't close a cycle
/// through a single shared interface node.
pub struct InterfaceNode {
    spec: PortSpec,
    external: AudioBuffer,
}

impl InterfaceNode {
    pub fn new(buffer_size: usize) -> Self {
        let mut spec = PortSpec::new();
        spec.register_output(0, crate::port::SignalKind::Audio);
        InterfaceNode {
            spec,
            external: AudioBuffer::new(buffer_size),
        }
    }

    /// Record the parent graph's incoming signal for `[start, stop)`.
    pub fn set_external(&mut self, start: usize, stop: usize, source: &AudioBuffer) {
        for i in start..stop.min(source.len()).min(self.external.len()) {
            let (l, r) = source.get(i);
            self.external.set(i, l, r);
        }
    }
}

impl Device for InterfaceNode {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
    fn set_audio_rate(&mut self, _rate: f64) {}
    fn set_buffer_size(&mut self, size: usize) {
        self.external.resize(size);
    }
    fn set_tempo(&mut self, _tempo: f64) {}

    fn reset(&mut self) {
        let len = self.external.len();
        self.external.clear(0, len);
    }

    fn process(
        &mut self,
        _inputs: &[Option<&AudioBuffer>],
        outputs: &mut [AudioBuffer],
        start: usize,
        stop: usize,
        _rate: f64,
        _tempo: f64,
    ) {
        for i in start..stop {
            let (l, r) = self.external.get(i);
            outputs[0].set(i, l, r);
        }
    }
}

/// Wraps one instrument's or effect's internal [`Connections`] graph
/// (built at [`ConnectionLevel::Instrument`] or [`ConnectionLevel::Effect`])
/// as a single [`Device`] node in its parent's graph, the way
/// `original_source/src/lib/Instrument.c`'s `Instrument` and
/// `Effect.c`'s `Effect` each own a nested `Connections` the root graph
/// treats as one opaque processing unit.
///
/// The inner graph's bare-path interface is two nodes, not one: `"Iin"`
/// ([`InterfaceNode`], source-only) carries this device's own input into the
/// inner graph, and `"Iout"` (an ordinary identity-gain sink, destination
/// only) collects whatever the inner graph's children wrote to a bare
/// `out_XX`. This device reads `"Iout"` for its own output every `mix`;
/// `"Iin"` is only present, and only fed, when the inner graph actually uses
/// it (an instrument's generators never do).
pub struct SubgraphDevice {
    graph: Connections,
    spec: PortSpec,
    has_input: bool,
}

impl SubgraphDevice {
    /// `has_input` should be `true` for an effect (its `"Iin"` carries the
    /// upstream dry signal into its dsp chain) and `false` for an instrument
    /// (which has no audio input, only generators inside).
    pub fn new(graph: Connections, has_input: bool) -> Self {
        let mut spec = PortSpec::new();
        if has_input {
            spec.register_input(0, crate::port::SignalKind::Audio);
        }
        spec.register_output(0, crate::port::SignalKind::Audio);
        SubgraphDevice { graph, spec, has_input }
    }

    pub fn inner(&self) -> &Connections {
        &self.graph
    }

    pub fn inner_mut(&mut self) -> &mut Connections {
        &mut self.graph
    }
}

impl Device for SubgraphDevice {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    /// No-op: the inner graph's rate/buffer size are fixed at construction.
    /// A rate or buffer-size change rebuilds the whole device tree rather
    /// than propagating into already-built sub-graphs.
    fn set_audio_rate(&mut self, _rate: f64) {}
    fn set_buffer_size(&mut self, _size: usize) {}
    fn set_tempo(&mut self, _tempo: f64) {}

    fn reset(&mut self) {
        self.graph.reset();
    }

    fn process(
        &mut self,
        inputs: &[Option<&AudioBuffer>],
        outputs: &mut [AudioBuffer],
        start: usize,
        stop: usize,
        rate: f64,
        tempo: f64,
    ) {
        if self.has_input {
            if let Some(Some(input)) = inputs.first() {
                if let Some(key) = self.graph.node_key("Iin") {
                    if let Some(iface) = self
                        .graph
                        .device_mut(key)
                        .and_then(|d| d.as_any_mut().downcast_mut::<InterfaceNode>())
                    {
                        iface.set_external(start, stop, input);
                    }
                }
            }
        }

        self.graph.clear(start, stop);
        self.graph.mix(start, stop, rate, tempo);

        let iout = self.graph.node_key("Iout");
        for i in start..stop {
            let sample = iout.and_then(|key| self.graph.output_buffer(key, 0)).map(|b| b.get(i));
            let (l, r) = sample.unwrap_or((0.0, 0.0));
            outputs[0].set(i, l, r);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{PortDirection, PortSpec, SignalKind};

    struct Gain {
        spec: PortSpec,
        gain: f64,
    }

    impl Gain {
        fn new(gain: f64) -> Self {
            let mut spec = PortSpec::new();
            spec.register_input(0, SignalKind::Audio);
            spec.register_output(0, SignalKind::Audio);
            Gain { spec, gain }
        }
    }

    impl Device for Gain {
        fn port_spec(&self) -> &PortSpec {
            &self.spec
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
        fn set_audio_rate(&mut self, _rate: f64) {}
        fn set_buffer_size(&mut self, _size: usize) {}
        fn set_tempo(&mut self, _tempo: f64) {}
        fn reset(&mut self) {}

        fn process(
            &mut self,
            inputs: &[Option<&AudioBuffer>],
            outputs: &mut [AudioBuffer],
            start: usize,
            stop: usize,
            _rate: f64,
            _tempo: f64,
        ) {
            if let Some(Some(input)) = inputs.first() {
                for i in start..stop {
                    let (l, r) = input.get(i);
                    outputs[0].set(i, l * self.gain, r * self.gain);
                }
            }
        }
    }

    struct Source {
        spec: PortSpec,
        value: f64,
    }

    impl Source {
        fn new(value: f64) -> Self {
            let mut spec = PortSpec::new();
            spec.register_output(0, SignalKind::Audio);
            Source { spec, value }
        }
    }

    impl Device for Source {
        fn port_spec(&self) -> &PortSpec {
            &self.spec
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
        fn set_audio_rate(&mut self, _rate: f64) {}
        fn set_buffer_size(&mut self, _size: usize) {}
        fn set_tempo(&mut self, _tempo: f64) {}
        fn reset(&mut self) {}

        fn process(
            &mut self,
            _inputs: &[Option<&AudioBuffer>],
            outputs: &mut [AudioBuffer],
            start: usize,
            stop: usize,
            _rate: f64,
            _tempo: f64,
        ) {
            for i in start..stop {
                outputs[0].set(i, self.value, self.value);
            }
        }
    }

    struct Sink {
        spec: PortSpec,
    }

    impl Sink {
        fn new() -> Self {
            let mut spec = PortSpec::new();
            spec.register_input(0, SignalKind::Audio);
            Sink { spec }
        }
    }

    impl Device for Sink {
        fn port_spec(&self) -> &PortSpec {
            &self.spec
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
        fn set_audio_rate(&mut self, _rate: f64) {}
        fn set_buffer_size(&mut self, _size: usize) {}
        fn set_tempo(&mut self, _tempo: f64) {}
        fn reset(&mut self) {}

        fn process(
            &mut self,
            inputs: &[Option<&AudioBuffer>],
            outputs: &mut [AudioBuffer],
            start: usize,
            stop: usize,
            _rate: f64,
            _tempo: f64,
        ) {
            if let Some(Some(input)) = inputs.first() {
                for i in start..stop {
                    let (l, r) = input.get(i);
                    outputs[0].set(i, l, r);
                }
            }
        }
    }

    fn device_for(path: &str) -> Result<Box<dyn Device>, EngineError> {
        match path {
            "ins_00" => Ok(Box::new(Source::new(1.0))),
            "ins_01" => Ok(Box::new(Gain::new(0.5))),
            _ => Err(EngineError::Format(format!("unknown device path: {}", path))),
        }
    }

    #[test]
    fn parses_and_mixes_simple_chain() {
        let mut graph = Connections::new(Box::new(Sink::new()), ConnectionLevel::Root, 48000.0, 4);
        let edges = vec![("ins_00/out_00".to_string(), "out_00".to_string())];
        graph.connect_from_edges(&edges, device_for).unwrap();
        graph.prepare().unwrap();
        graph.clear(0, 4);
        graph.mix(0, 4, 48000.0, 120.0);

        let out = graph.output_buffer(graph.master(), 0).unwrap();
        assert_eq!(out.get(0), (1.0, 1.0));
    }

    #[test]
    fn detects_cycle() {
        let mut graph = Connections::new(Box::new(Sink::new()), ConnectionLevel::Root, 48000.0, 4);
        let edges = vec![
            ("ins_00/out_00".to_string(), "ins_01/in_00".to_string()),
            ("ins_01/out_00".to_string(), "ins_00/in_00".to_string()),
        ];

        fn cyclic_device_for(path: &str) -> Result<Box<dyn Device>, EngineError> {
            match path {
                "ins_00" | "ins_01" => Ok(Box::new(Gain::new(1.0))),
                _ => Err(EngineError::Format("unknown".to_string())),
            }
        }

        let err = graph.connect_from_edges(&edges, cyclic_device_for).unwrap_err();
        match err {
            EngineError::Format(msg) => assert!(msg.contains("cycle")),
            other => panic!("expected Format error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unregistered_port() {
        let mut graph = Connections::new(Box::new(Sink::new()), ConnectionLevel::Root, 48000.0, 4);
        let edges = vec![("ins_00/out_05".to_string(), "out_00".to_string())];
        let err = graph.connect_from_edges(&edges, device_for).unwrap_err();
        assert!(matches!(err, EngineError::Format(_)));
    }

    #[test]
    fn rejects_input_port_on_master_at_root_level() {
        let result = parse_connection_path("in_00", ConnectionLevel::Root, EdgeRole::Dst);
        assert!(result.is_err());
    }

    #[test]
    fn path_with_instrument_prefix_parses() {
        let parsed = parse_connection_path("ins_01/out_00", ConnectionLevel::Root, EdgeRole::Src).unwrap();
        assert_eq!(parsed.node_path, "ins_01");
        assert_eq!(parsed.port, 0);
    }

    #[test]
    fn bare_port_in_instrument_level_targets_input_interface() {
        let parsed = parse_connection_path("in_00", ConnectionLevel::Instrument, EdgeRole::Src).unwrap();
        assert_eq!(parsed.node_path, "Iin");
    }

    #[test]
    fn bare_out_port_at_instrument_level_targets_output_interface() {
        let parsed = parse_connection_path("out_00", ConnectionLevel::Instrument, EdgeRole::Dst).unwrap();
        assert_eq!(parsed.node_path, "Iout");
    }

    #[test]
    fn invalid_hex_index_is_rejected() {
        let result = parse_connection_path("ins_zz/out_00", ConnectionLevel::Root, EdgeRole::Src);
        assert!(result.is_err());
    }

    #[test]
    fn node_key_resolves_master_and_child_paths() {
        let mut graph = Connections::new(Box::new(Sink::new()), ConnectionLevel::Root, 48000.0, 4);
        assert_eq!(graph.node_key(""), Some(graph.master()));
        assert!(graph.node_key("ins_00").is_none());
        let edges = vec![("ins_00/out_00".to_string(), "out_00".to_string())];
        graph.connect_from_edges(&edges, device_for).unwrap();
        assert!(graph.node_key("ins_00").is_some());
    }

    #[test]
    fn chained_devices_mix_in_post_order() {
        let mut graph = Connections::new(Box::new(Sink::new()), ConnectionLevel::Root, 48000.0, 4);
        let edges = vec![
            ("ins_00/out_00".to_string(), "ins_01/in_00".to_string()),
            ("ins_01/out_00".to_string(), "out_00".to_string()),
        ];
        graph.connect_from_edges(&edges, device_for).unwrap();
        graph.prepare().unwrap();
        graph.clear(0, 4);
        graph.mix(0, 4, 48000.0, 120.0);

        let out = graph.output_buffer(graph.master(), 0).unwrap();
        assert_eq!(out.get(0), (0.5, 0.5));
    }

    #[test]
    fn subgraph_device_mixes_a_generator_into_its_iout_node() {
        let mut inner = Connections::new(Box::new(Sink::new()), ConnectionLevel::Instrument, 48000.0, 4);
        let edges = vec![("gen_00/C/out_00".to_string(), "out_00".to_string())];
        inner
            .connect_from_edges(&edges, |path| match path {
                "gen_00" => Ok(Box::new(Source::new(1.0)) as Box<dyn Device>),
                "Iout" => Ok(Box::new(Gain::new(1.0))),
                other => Err(EngineError::Format(format!("unknown path: {}", other))),
            })
            .unwrap();
        inner.prepare().unwrap();

        let mut wrapper = SubgraphDevice::new(inner, false);
        let mut out = vec![AudioBuffer::new(4)];
        wrapper.process(&[], &mut out, 0, 4, 48000.0, 120.0);
        assert_eq!(out[0].get(0), (1.0, 1.0));
    }

    #[test]
    fn subgraph_device_with_input_feeds_external_signal_through_iin() {
        let mut inner = Connections::new(Box::new(Sink::new()), ConnectionLevel::Effect, 48000.0, 4);
        let edges = vec![
            ("in_00".to_string(), "dsp_00/C/in_00".to_string()),
            ("dsp_00/C/out_00".to_string(), "out_00".to_string()),
        ];
        inner
            .connect_from_edges(&edges, |path| match path {
                "dsp_00" => Ok(Box::new(Gain::new(2.0)) as Box<dyn Device>),
                "Iin" => Ok(Box::new(InterfaceNode::new(4))),
                "Iout" => Ok(Box::new(Gain::new(1.0))),
                other => Err(EngineError::Format(format!("unknown path: {}", other))),
            })
            .unwrap();
        inner.prepare().unwrap();

        let mut wrapper = SubgraphDevice::new(inner, true);
        let mut dry = AudioBuffer::new(4);
        dry.set(0, 1.0, 1.0);
        let mut out = vec![AudioBuffer::new(4)];
        wrapper.process(&[Some(&dry)], &mut out, 0, 4, 48000.0, 120.0);
        // Iin carries the dry signal to dsp_00 (gain 2x), whose output lands
        // on Iout (identity gain); the wrapper reads Iout alone, so the
        // sample at 0 is 1.0 * 2.0 = 2.0, not the dry signal itself.
        assert_eq!(out[0].get(0), (2.0, 2.0));
    }
}
