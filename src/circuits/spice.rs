//! SPICE netlist writer for extracted traces, vias, nets and coupled pairs.
//!
//! Values are written in SI units: per-meter R/L/C and lengths in meters.
//! Delays in comments are in seconds.

use std::collections::HashMap;
use std::fmt;

use crate::circuits::coupled::CoupledSegment;
use crate::circuits::transmission::{LineModel, SegmentDescriptor, RLGC};
use crate::extraction::{CoupledModel, CoupledNetsModel, NetModel, TraceModel};
use crate::math::{Scalar, R2};
use crate::vias::ViaModel;

/// Replaces every character SPICE may reject with `_`.
#[must_use]
pub fn format_token(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Subcircuit name of a net.
#[must_use]
pub fn format_net_name(net: &str) -> String {
    format!("NET_{}", format_token(net))
}

/// Subcircuit name of a single trace.
#[must_use]
pub fn trace_subckt_name(trace: &str) -> String {
    format!("ZO{}", format_token(trace))
}

/// Subcircuit name of a coupled pair.
#[must_use]
pub fn coupled_subckt_name(pair: &str) -> String {
    format!("CPL{}", format_token(pair))
}

/// Subcircuit name of a via.
#[must_use]
pub fn via_subckt_name(via: &str) -> String {
    format!("VIA{}", format_token(via))
}

/// Node name of a board position on `layer`, in whole micrometers.
#[must_use]
pub fn node_name(point: R2, layer: &str) -> String {
    format!(
        "{}_{}{}",
        (point.x * 1.0e6).round() as i64,
        (point.y * 1.0e6).round() as i64,
        format_token(layer)
    )
}

/// Engineering-free exponent notation, e.g. `3e-7`.
struct Num(Scalar);

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:e}", self.0)
    }
}

/// One line primitive between two local nodes.
struct Primitive<'a> {
    index: usize,
    from: &'a str,
    to: &'a str,
    model: LineModel,
    rlgc: &'a RLGC,
    length: Scalar,
}

impl fmt::Display for Primitive<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            index: k,
            from: a,
            to: b,
            ..
        } = *self;
        let (r, l, c) = (Num(self.rlgc.r_per_m), Num(self.rlgc.l_per_m), Num(self.rlgc.c_per_m));
        let len = Num(self.length);
        match self.model {
            LineModel::Txl => {
                writeln!(f, "Y{k} {a} 0 {b} 0 ymod{k} LEN={len}")?;
                writeln!(f, ".MODEL ymod{k} txl R={r} L={l} G=0 C={c} length=1")
            }
            LineModel::Ltra => {
                writeln!(f, "O{k} {a} 0 {b} 0 ltra{k}")?;
                writeln!(f, ".MODEL ltra{k} LTRA R={r} L={l} G=0 C={c} LEN={len}")
            }
        }
    }
}

struct TraceSubckt<'a> {
    name: &'a str,
    segments: &'a [SegmentDescriptor],
}

impl fmt::Display for TraceSubckt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = trace_subckt_name(self.name);
        let Some(last) = self.segments.last() else {
            return write!(f, ".subckt {name} pin1 pin2\nR1 pin1 pin2 0\n.ends\n");
        };
        writeln!(f, ".subckt {name} pin1 pin{}", last.end_pin)?;
        for (i, seg) in self.segments.iter().enumerate() {
            let (from, to) = (format!("pin{}", seg.start_pin), format!("pin{}", seg.end_pin));
            writeln!(f, "***Z0:{:.3} TD:{}***", seg.z0, Num(seg.delay))?;
            let line = Primitive {
                index: i + 1,
                from: &from,
                to: &to,
                model: seg.model,
                rlgc: &seg.rlgc,
                length: seg.length(),
            };
            write!(f, "{line}")?;
        }
        f.write_str(".ends\n")
    }
}

struct ViaSubckt<'a>(&'a ViaModel);

impl fmt::Display for ViaSubckt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let via = self.0;
        write!(f, ".subckt {}", via_subckt_name(&via.name))?;
        for port in &via.ports {
            write!(f, " {}", format_token(port))?;
        }
        f.write_str("\n")?;
        for (i, span) in via.spans.iter().enumerate() {
            let (from, to) = (format_token(&span.from), format_token(&span.to));
            writeln!(f, "***Z0:{:.3} TD:{}***", span.z0, Num(span.delay))?;
            let line = Primitive {
                index: i + 1,
                from: &from,
                to: &to,
                model: span.model,
                rlgc: &span.rlgc,
                length: span.length,
            };
            write!(f, "{line}")?;
        }
        f.write_str(".ends\n")
    }
}

struct CoupledSubckt<'a>(&'a CoupledSegment);

impl fmt::Display for CoupledSubckt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seg = self.0;
        writeln!(f, ".subckt {} pin1 pin2 pin3 pin4", coupled_subckt_name(&seg.name))?;
        writeln!(
            f,
            "***Zodd:{:.3} Zeven:{:.3} Zdiff:{:.3} Zcomm:{:.3}***",
            seg.z_odd,
            seg.z_even,
            seg.z_diff(),
            seg.z_common()
        )?;
        f.write_str("P1 pin1 pin3 0 pin2 pin4 0 PLINE\n")?;
        writeln!(f, ".model PLINE CPL length={}", Num(seg.length))?;
        writeln!(f, "+R={} 0 {}", Num(seg.r[(0, 0)]), Num(seg.r[(1, 1)]))?;
        writeln!(
            f,
            "+L={} {} {}",
            Num(seg.l[(0, 0)]),
            Num(seg.l[(0, 1)]),
            Num(seg.l[(1, 1)])
        )?;
        f.write_str("+G=0 0 0\n")?;
        writeln!(
            f,
            "+C={} {} {}",
            Num(seg.c[(0, 0)]),
            Num(seg.c[(0, 1)]),
            Num(seg.c[(1, 1)])
        )?;
        f.write_str(".ends\n")
    }
}

/// Zero-ohm link standing in for a trace too short to model.
#[must_use]
pub fn zero_link_subckt(trace: &str) -> String {
    trace_subckt(trace, &[])
}

/// Subcircuit `ZO<trace>` chaining one line primitive per segment.
#[must_use]
pub fn trace_subckt(trace: &str, segments: &[SegmentDescriptor]) -> String {
    TraceSubckt {
        name: trace,
        segments,
    }
    .to_string()
}

/// Subcircuit `VIA<via>` with one line per span; pins are the port layers.
#[must_use]
pub fn via_subckt(via: &ViaModel) -> String {
    ViaSubckt(via).to_string()
}

/// Subcircuit `CPL<pair>`; pins 1/2 are the first line, 3/4 the second.
#[must_use]
pub fn coupled_subckt(seg: &CoupledSegment) -> String {
    CoupledSubckt(seg).to_string()
}

/// Subcircuit call inside a net, with the definition it refers to.
struct Instance {
    label: String,
    nodes: Vec<String>,
    subckt: String,
    body: String,
}

impl Instance {
    fn trace(t: &TraceModel) -> Self {
        Self {
            label: format_token(&t.name),
            nodes: vec![node_name(t.start, &t.layer), node_name(t.end, &t.layer)],
            subckt: trace_subckt_name(&t.name),
            body: trace_subckt(&t.name, &t.segments),
        }
    }

    fn via(v: &ViaModel) -> Self {
        Self {
            label: via_subckt_name(&v.name),
            nodes: v.ports.iter().map(|l| node_name(v.at, l)).collect(),
            subckt: via_subckt_name(&v.name),
            body: via_subckt(v),
        }
    }

    fn pair(p: &CoupledModel) -> Self {
        Self {
            label: format_token(&p.segment.name),
            nodes: p
                .ends
                .iter()
                .flatten()
                .map(|&point| node_name(point, &p.layer))
                .collect(),
            subckt: coupled_subckt_name(&p.segment.name),
            body: coupled_subckt(&p.segment),
        }
    }
}

/// Top-level subcircuit of one or more nets, followed by every definition.
///
/// External pins are nodes used by exactly one instance.
struct Netlist {
    name: String,
    instances: Vec<Instance>,
}

impl fmt::Display for Netlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut uses: HashMap<&str, usize> = HashMap::new();
        for node in self.instances.iter().flat_map(|i| &i.nodes) {
            *uses.entry(node.as_str()).or_default() += 1;
        }
        write!(f, ".subckt {}", self.name)?;
        let mut pins: Vec<&str> = Vec::new();
        for node in self.instances.iter().flat_map(|i| &i.nodes) {
            let node = node.as_str();
            if uses.get(node) == Some(&1) && !pins.contains(&node) {
                pins.push(node);
                write!(f, " {node}")?;
            }
        }
        f.write_str("\n")?;
        for i in &self.instances {
            write!(f, "X{}", i.label)?;
            for node in &i.nodes {
                write!(f, " {node}")?;
            }
            writeln!(f, " {}", i.subckt)?;
        }
        f.write_str(".ends\n\n")?;
        for i in &self.instances {
            writeln!(f, "{}", i.body)?;
        }
        Ok(())
    }
}

/// Net subcircuit instantiating every trace and via, followed by their
/// subcircuits.
///
/// External pins are endpoints not shared with another trace or via of the net.
#[must_use]
pub fn net_netlist(net: &NetModel) -> String {
    let instances = net
        .traces
        .iter()
        .map(Instance::trace)
        .chain(net.vias.iter().map(Instance::via))
        .collect();
    Netlist {
        name: format_net_name(&net.name),
        instances,
    }
    .to_string()
}

/// Combined subcircuit `NET_<a>NET_<b>` of two nets extracted together.
///
/// Coupled stretches are `CPL` instances wired to both nets; leftover traces
/// and vias follow, first net first.
#[must_use]
pub fn coupled_nets_netlist(model: &CoupledNetsModel) -> String {
    let [a, b] = &model.nets;
    let instances = model
        .pairs
        .iter()
        .map(Instance::pair)
        .chain(a.traces.iter().chain(&b.traces).map(Instance::trace))
        .chain(a.vias.iter().chain(&b.vias).map(Instance::via))
        .collect();
    Netlist {
        name: format!("{}{}", format_net_name(&a.name), format_net_name(&b.name)),
        instances,
    }
    .to_string()
}
