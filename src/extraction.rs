//! Net, via and coupled-pair extraction on a worker pool.
//!
//! Every worker owns its own [`ImpedanceBackend`], created by the extractor's
//! factory; backends are never shared between threads. Results come back in
//! input order regardless of which worker produced them.

use std::fmt;
use std::sync::Arc;

use log::{info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::circuits::coupled::{CoupledPairSolver, CoupledSegment};
use crate::circuits::merge::{SegmentMerger, DEFAULT_TD_THRESHOLD, DEFAULT_Z0_THRESHOLD};
use crate::circuits::transmission::{LineModel, SegmentDescriptor};
use crate::constants::COPPER_CONDUCTIVITY;
use crate::errors::ExtractError;
use crate::fields::DEFAULT_MAX_SWEEPS;
use crate::geometry::{detect_coupling, CoupledPair, CouplingSplit, Stackup, Trace, Via};
use crate::impedance::{CrossSectionBuilder, ImpedanceBackend};
use crate::math::{Scalar, R2};
use crate::planes::ReferencePlanes;
use crate::sampler::{ImpedanceSampler, SamplerConfig};
use crate::vias::{ViaModel, ViaModeler};

/// Knobs of an extraction run. Lengths in meters, times in seconds.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionConfig {
    /// Sample spacing along a trace.
    pub step: Scalar,
    /// Cross-section width over trace width.
    pub w_ratio: Scalar,
    /// Cross-section height over thinnest copper.
    pub h_ratio: Scalar,
    /// Impedance change that starts a new segment (Ω).
    pub z0_threshold: Scalar,
    /// Segments with a shorter delay are modelled lossless.
    pub td_threshold: Scalar,
    /// Traces shorter than this become a zero-ohm link.
    pub min_segment_len: Scalar,
    /// Drop series resistance everywhere.
    pub force_lossless: bool,
    /// Line primitive written to netlists.
    pub model: LineModel,
    /// Trace copper conductivity (S/m).
    pub conductivity: Scalar,
    /// Resolution of the reference-plane scan.
    pub scan_step: Scalar,
    /// Largest edge gap at which two traces couple.
    pub coupled_max_gap: Scalar,
    /// Shortest overlap worth a coupled model.
    pub coupled_min_len: Scalar,
    /// Relaxation sweep ceiling per solve.
    pub max_sweeps: usize,
    /// Worker count; `None` uses one per hardware thread.
    pub threads: Option<usize>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let sampler = SamplerConfig::default();
        Self {
            step: sampler.step,
            w_ratio: sampler.w_ratio,
            h_ratio: sampler.h_ratio,
            z0_threshold: DEFAULT_Z0_THRESHOLD,
            td_threshold: DEFAULT_TD_THRESHOLD,
            min_segment_len: 10e-6,
            force_lossless: true,
            model: LineModel::Ltra,
            conductivity: COPPER_CONDUCTIVITY,
            scan_step: sampler.scan_step,
            coupled_max_gap: 2e-3,
            coupled_min_len: 0.2e-3,
            max_sweeps: DEFAULT_MAX_SWEEPS,
            threads: None,
        }
    }
}

impl ExtractionConfig {
    /// Sets the sample spacing.
    #[must_use]
    pub fn with_step(mut self, step: Scalar) -> Self {
        self.step = step;
        self
    }

    /// Sets the cross-section size ratios.
    #[must_use]
    pub fn with_ratios(mut self, w_ratio: Scalar, h_ratio: Scalar) -> Self {
        self.w_ratio = w_ratio;
        self.h_ratio = h_ratio;
        self
    }

    /// Sets the segment split threshold.
    #[must_use]
    pub fn with_z0_threshold(mut self, ohms: Scalar) -> Self {
        self.z0_threshold = ohms;
        self
    }

    /// Keeps or drops series resistance.
    #[must_use]
    pub fn with_lossless(mut self, lossless: bool) -> Self {
        self.force_lossless = lossless;
        self
    }

    /// Selects the netlist primitive.
    #[must_use]
    pub fn with_model(mut self, model: LineModel) -> Self {
        self.model = model;
        self
    }

    /// Sets the relaxation sweep ceiling.
    #[must_use]
    pub fn with_max_sweeps(mut self, max_sweeps: usize) -> Self {
        self.max_sweeps = max_sweeps;
        self
    }

    /// Pins the worker count.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Rejects values that would make sampling or solving meaningless.
    pub fn validate(&self) -> Result<(), ExtractError> {
        let positive = [
            ("step", self.step),
            ("w_ratio", self.w_ratio),
            ("h_ratio", self.h_ratio),
            ("conductivity", self.conductivity),
            ("scan_step", self.scan_step),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ExtractError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        let non_negative = [
            ("z0_threshold", self.z0_threshold),
            ("td_threshold", self.td_threshold),
            ("min_segment_len", self.min_segment_len),
            ("coupled_max_gap", self.coupled_max_gap),
            ("coupled_min_len", self.coupled_min_len),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0) {
                return Err(ExtractError::InvalidConfig(format!(
                    "{name} must not be negative, got {value}"
                )));
            }
        }
        if self.max_sweeps == 0 {
            return Err(ExtractError::InvalidConfig("max_sweeps must be at least 1".into()));
        }
        if self.threads == Some(0) {
            return Err(ExtractError::InvalidConfig("threads must be at least 1".into()));
        }
        Ok(())
    }

    /// Sampler parameters derived from this configuration.
    #[must_use]
    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            step: self.step,
            w_ratio: self.w_ratio,
            h_ratio: self.h_ratio,
            scan_step: self.scan_step,
            conductivity: self.conductivity,
        }
    }

    /// Merger parameters derived from this configuration.
    #[must_use]
    pub fn merger(&self) -> SegmentMerger {
        SegmentMerger {
            z0_threshold: self.z0_threshold,
            td_threshold: self.td_threshold,
            force_lossless: self.force_lossless,
            model: self.model,
        }
    }

    /// Splits `a` and `b` around their coupled overlap, if they couple.
    #[must_use]
    pub fn detect_coupling(&self, a: &Trace, b: &Trace) -> Option<CouplingSplit> {
        detect_coupling(a, b, self.coupled_max_gap, self.coupled_min_len)
    }

    /// Repeatedly splits coupled overlaps out of two trace sets.
    ///
    /// Leftover pieces go back into their set and may couple again.
    #[must_use]
    pub fn split_coupled(&self, first: &[Trace], second: &[Trace]) -> CoupledSplitSet {
        let mut set = CoupledSplitSet {
            pairs: Vec::new(),
            first: first.to_vec(),
            second: second.to_vec(),
        };
        'search: loop {
            for i in 0..set.first.len() {
                for j in 0..set.second.len() {
                    if let Some(split) = self.detect_coupling(&set.first[i], &set.second[j]) {
                        set.first.remove(i);
                        set.second.remove(j);
                        set.first.extend(split.first_rest);
                        set.second.extend(split.second_rest);
                        set.pairs.push(split.pair);
                        continue 'search;
                    }
                }
            }
            break;
        }
        set
    }

    /// Via modeler derived from this configuration.
    #[must_use]
    pub fn via_modeler<'a>(&self, board: &'a Board) -> ViaModeler<'a> {
        ViaModeler::new(&board.stackup, &board.planes, &board.ground_vias)
            .with_scan_step(self.scan_step)
            .with_conductivity(self.conductivity)
            .with_model(self.model)
    }
}

/// Stack and reference copper of a board.
#[derive(Debug, Clone, Default)]
pub struct Board {
    /// Layer stack.
    pub stackup: Stackup,
    /// Reference copper per layer.
    pub planes: ReferencePlanes,
    /// Vias of the reference nets.
    pub ground_vias: Vec<Via>,
}

impl Board {
    /// Board from its stack and planes.
    #[must_use]
    pub fn new(stackup: Stackup, planes: ReferencePlanes) -> Self {
        Self {
            stackup,
            planes,
            ground_vias: Vec::new(),
        }
    }

    /// Adds the reference-net vias that surround signal vias.
    #[must_use]
    pub fn with_ground_vias(mut self, vias: Vec<Via>) -> Self {
        self.ground_vias = vias;
        self
    }
}

/// Named set of traces and vias.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Net {
    /// Net name.
    pub name: String,
    /// Routed pieces.
    pub traces: Vec<Trace>,
    /// Layer changes.
    pub vias: Vec<Via>,
}

impl Net {
    /// Net from its traces.
    #[must_use]
    pub fn new(name: impl Into<String>, traces: Vec<Trace>) -> Self {
        Self {
            name: name.into(),
            traces,
            vias: Vec::new(),
        }
    }

    /// Adds the net's vias.
    #[must_use]
    pub fn with_vias(mut self, vias: Vec<Via>) -> Self {
        self.vias = vias;
        self
    }

    /// Layers on which a trace of this net ends at `via`.
    #[must_use]
    pub fn layers_at(&self, via: &Via) -> Vec<&str> {
        let mut layers: Vec<&str> = Vec::new();
        for t in &self.traces {
            let touches = via.touches(t.path.start()) || via.touches(t.path.end());
            if touches && !layers.contains(&t.layer.as_str()) {
                layers.push(&t.layer);
            }
        }
        layers
    }
}

/// Aggregate impedance of several lines in series.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NetSummary {
    /// Total length (m).
    pub length: Scalar,
    /// Total delay (s).
    pub td_sum: Scalar,
    /// Σ Z0·td² / Σ td²; zero without delay.
    pub z0_avg: Scalar,
    /// `length / td_sum`; zero without delay.
    pub velocity_avg: Scalar,
}

impl NetSummary {
    /// Summary of `(z0, td)` pieces over a total `length`.
    #[must_use]
    pub fn from_parts(parts: impl IntoIterator<Item = (Scalar, Scalar)>, length: Scalar) -> Self {
        let (mut td_sum, mut weight, mut weighted) = (0.0, 0.0, 0.0);
        for (z0, td) in parts {
            td_sum += td;
            weight += td * td;
            weighted += z0 * td * td;
        }
        Self {
            length,
            td_sum,
            z0_avg: if weight > 0.0 { weighted / weight } else { 0.0 },
            velocity_avg: if td_sum > 0.0 { length / td_sum } else { 0.0 },
        }
    }

    /// Adds series pieces that count toward delay and length but not
    /// toward the impedance average, e.g. vias.
    #[must_use]
    pub fn with_lumped(mut self, td: Scalar, length: Scalar) -> Self {
        self.td_sum += td;
        self.length += length;
        self.velocity_avg = if self.td_sum > 0.0 {
            self.length / self.td_sum
        } else {
            0.0
        };
        self
    }
}

/// Extracted model of one trace.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct TraceModel {
    /// Trace name.
    pub name: String,
    /// Copper layer.
    pub layer: String,
    /// First point on the board.
    pub start: R2,
    /// Last point on the board.
    pub end: R2,
    /// Path length (m).
    pub length: Scalar,
    /// Segments in path order; empty for a zero-ohm link.
    pub segments: Vec<SegmentDescriptor>,
    /// Samples skipped after a local solve failure.
    pub rejected: usize,
}

impl TraceModel {
    /// Modelled as a plain link.
    #[must_use]
    pub fn is_link(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total delay.
    #[must_use]
    pub fn delay(&self) -> Scalar {
        self.segments.iter().map(|s| s.delay).sum()
    }
}

/// Extracted model of a net.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct NetModel {
    /// Net name.
    pub name: String,
    /// One model per input trace, in input order.
    pub traces: Vec<TraceModel>,
    /// One model per via, in input order.
    pub vias: Vec<ViaModel>,
    /// Whole-net averages.
    pub summary: NetSummary,
}

/// Extracted model of a coupled pair.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CoupledModel {
    /// Averaged coupled line.
    pub segment: CoupledSegment,
    /// Copper layer of both lines.
    pub layer: String,
    /// Start and end of the first line, then of the second, on the board.
    pub ends: [[R2; 2]; 2],
    /// Path length of each line (m).
    pub lengths: [Scalar; 2],
    /// Per-line summaries from the diagonal terms.
    pub lines: [NetSummary; 2],
    /// Odd-mode summary.
    pub odd: NetSummary,
    /// Even-mode summary.
    pub even: NetSummary,
    /// Samples skipped after a local solve failure.
    pub rejected: usize,
}

/// Two nets extracted together, coupled stretches modelled as pairs.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CoupledNetsModel {
    /// Coupled stretches, first net's piece first.
    pub pairs: Vec<CoupledModel>,
    /// Uncoupled traces and vias of each net; the summaries cover the
    /// coupled stretches too.
    pub nets: [NetModel; 2],
    /// Odd-mode average over the coupled stretches.
    pub odd: NetSummary,
    /// Even-mode average over the coupled stretches.
    pub even: NetSummary,
}

/// Coupled stretches of two trace sets and what is left of each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoupledSplitSet {
    /// Coupled pieces.
    pub pairs: Vec<CoupledPair>,
    /// Uncoupled pieces of the first set.
    pub first: Vec<Trace>,
    /// Uncoupled pieces of the second set.
    pub second: Vec<Trace>,
}

/// Produces a fresh backend for one worker.
pub type BackendFactory = Arc<dyn Fn() -> Box<dyn ImpedanceBackend> + Send + Sync>;

/// Runs extractions on a private thread pool.
pub struct Extractor {
    config: ExtractionConfig,
    pool: ThreadPool,
    factory: BackendFactory,
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extractor")
            .field("config", &self.config)
            .field("threads", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl Extractor {
    /// Extractor using the raster cross-section backend.
    pub fn new(config: ExtractionConfig) -> Result<Self, ExtractError> {
        let sweeps = config.max_sweeps;
        let factory: BackendFactory = Arc::new(move || {
            Box::new(CrossSectionBuilder::new().with_max_sweeps(sweeps)) as Box<dyn ImpedanceBackend>
        });
        Self::with_backend_factory(config, factory)
    }

    /// Extractor creating each worker's backend with `factory`.
    pub fn with_backend_factory(config: ExtractionConfig, factory: BackendFactory) -> Result<Self, ExtractError> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads.unwrap_or(0))
            .thread_name(|i| format!("trace-z0-{i}"))
            .build()
            .map_err(|e| ExtractError::InvalidConfig(format!("worker pool: {e}")))?;
        Ok(Self {
            config,
            pool,
            factory,
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn model_trace(
        &self,
        sampler: &ImpedanceSampler<'_>,
        trace: &Trace,
        backend: &mut dyn ImpedanceBackend,
    ) -> Result<TraceModel, ExtractError> {
        let length = trace.length();
        let mut model = TraceModel {
            name: trace.name.clone(),
            layer: trace.layer.clone(),
            start: trace.path.start(),
            end: trace.path.end(),
            length,
            segments: Vec::new(),
            rejected: 0,
        };
        if length < self.config.min_segment_len {
            warn!(
                "{}: {length:.3e} m is below the {:.3e} m minimum, modelled as a link",
                trace.name, self.config.min_segment_len
            );
            return Ok(model);
        }
        let series = sampler.sample_trace(trace, backend)?;
        if series.samples.is_empty() {
            return Err(ExtractError::NoValidSamples {
                trace: trace.name.clone(),
            });
        }
        model.segments = self.config.merger().merge(&series.samples, series.length);
        model.rejected = series.rejected;
        Ok(model)
    }

    /// Extracts a single trace on the calling thread.
    pub fn extract_trace(&self, board: &Board, trace: &Trace) -> Result<TraceModel, ExtractError> {
        let sampler = ImpedanceSampler::new(&board.stackup, &board.planes, self.config.sampler_config());
        let mut backend = (self.factory)();
        self.model_trace(&sampler, trace, backend.as_mut())
    }

    fn model_traces(&self, board: &Board, traces: &[Trace]) -> Result<Vec<TraceModel>, ExtractError> {
        let sampler = ImpedanceSampler::new(&board.stackup, &board.planes, self.config.sampler_config());
        let results: Vec<Result<TraceModel, ExtractError>> = self.pool.install(|| {
            traces
                .par_iter()
                .map_init(
                    || (self.factory)(),
                    |backend, trace| self.model_trace(&sampler, trace, backend.as_mut()),
                )
                .collect()
        });
        results.into_iter().collect()
    }

    /// Models the vias of `net`; pins follow the layers its traces reach.
    fn model_vias(&self, board: &Board, net: &Net) -> Result<Vec<ViaModel>, ExtractError> {
        let modeler = self.config.via_modeler(board);
        let results: Vec<Result<ViaModel, ExtractError>> = self.pool.install(|| {
            net.vias
                .par_iter()
                .map_init(
                    || (self.factory)(),
                    |backend, via| modeler.model(via, &net.layers_at(via), backend.as_mut()),
                )
                .collect()
        });
        results.into_iter().collect()
    }

    /// Extracts a single via on the calling thread.
    pub fn extract_via(&self, board: &Board, via: &Via, connected: &[&str]) -> Result<ViaModel, ExtractError> {
        let mut backend = (self.factory)();
        self.config.via_modeler(board).model(via, connected, backend.as_mut())
    }

    /// `coupled` holds `(z0, td, length)` of this net's side of each coupled stretch.
    fn summarize(
        name: &str,
        traces: &[TraceModel],
        vias: &[ViaModel],
        coupled: &[(Scalar, Scalar, Scalar)],
    ) -> NetSummary {
        let length = traces.iter().map(|t| t.length).sum::<Scalar>()
            + coupled.iter().map(|&(_, _, len)| len).sum::<Scalar>();
        let parts = traces
            .iter()
            .flat_map(|t| t.segments.iter().map(|s| (s.z0, s.delay)))
            .chain(coupled.iter().map(|&(z0, td, _)| (z0, td)));
        let summary = NetSummary::from_parts(parts, length).with_lumped(
            vias.iter().map(ViaModel::delay).sum(),
            vias.iter().map(|v| v.connected_length).sum(),
        );
        info!(
            "net {name}: {} traces, {} vias, {:.3e} m, td {:.3e} s, Z0 avg {:.2} ohm, v avg {:.3e} m/s",
            traces.len(),
            vias.len(),
            summary.length,
            summary.td_sum,
            summary.z0_avg,
            summary.velocity_avg
        );
        summary
    }

    /// Extracts every trace and via of `net` in parallel.
    pub fn extract_net(&self, board: &Board, net: &Net) -> Result<NetModel, ExtractError> {
        let traces = self.model_traces(board, &net.traces)?;
        let vias = self.model_vias(board, net)?;
        let summary = Self::summarize(&net.name, &traces, &vias, &[]);
        Ok(NetModel {
            name: net.name.clone(),
            traces,
            vias,
            summary,
        })
    }

    fn model_pair(
        &self,
        sampler: &ImpedanceSampler<'_>,
        pair: &CoupledPair,
        backend: &mut dyn ImpedanceBackend,
    ) -> Result<CoupledModel, ExtractError> {
        let name = format!("{}_{}", pair.first.name, pair.second.name);
        let series = sampler.sample_pair(pair, backend)?;
        let segment = CoupledPairSolver::new(self.config.force_lossless).reduce(&name, &series.samples, series.length)?;
        let len = segment.length;
        let model = CoupledModel {
            layer: pair.first.layer.clone(),
            ends: [&pair.first, &pair.second].map(|t| [t.path.start(), t.path.end()]),
            lengths: [pair.first.length(), pair.second.length()],
            lines: [0, 1].map(|i| NetSummary::from_parts([(segment.z0[i], segment.td[i])], len)),
            odd: NetSummary::from_parts([(segment.z_odd, segment.td_odd)], len),
            even: NetSummary::from_parts([(segment.z_even, segment.td_even)], len),
            rejected: series.rejected,
            segment,
        };
        info!(
            "pair {name}: {len:.3e} m, Zodd {:.2} Zeven {:.2} Zdiff {:.2} ohm",
            model.segment.z_odd,
            model.segment.z_even,
            model.segment.z_diff()
        );
        Ok(model)
    }

    /// Extracts one coupled pair on the calling thread.
    pub fn extract_coupled(&self, board: &Board, pair: &CoupledPair) -> Result<CoupledModel, ExtractError> {
        let sampler = ImpedanceSampler::new(&board.stackup, &board.planes, self.config.sampler_config());
        let mut backend = (self.factory)();
        self.model_pair(&sampler, pair, backend.as_mut())
    }

    /// Extracts several coupled pairs in parallel, in input order.
    pub fn extract_pairs(&self, board: &Board, pairs: &[CoupledPair]) -> Result<Vec<CoupledModel>, ExtractError> {
        let sampler = ImpedanceSampler::new(&board.stackup, &board.planes, self.config.sampler_config());
        let results: Vec<Result<CoupledModel, ExtractError>> = self.pool.install(|| {
            pairs
                .par_iter()
                .map_init(
                    || (self.factory)(),
                    |backend, pair| self.model_pair(&sampler, pair, backend.as_mut()),
                )
                .collect()
        });
        results.into_iter().collect()
    }

    /// Extracts two nets together: coupled stretches become pair models,
    /// the rest single-ended traces, plus each net's vias.
    pub fn extract_coupled_nets(&self, board: &Board, a: &Net, b: &Net) -> Result<CoupledNetsModel, ExtractError> {
        let split = self.config.split_coupled(&a.traces, &b.traces);
        info!(
            "nets {} / {}: {} coupled stretches",
            a.name,
            b.name,
            split.pairs.len()
        );
        let pairs = self.extract_pairs(board, &split.pairs)?;

        let nets = [
            self.coupled_side(board, a, &split.first, &pairs, 0)?,
            self.coupled_side(board, b, &split.second, &pairs, 1)?,
        ];

        let coupled_len = pairs.iter().map(|p| p.segment.length).sum();
        let odd = NetSummary::from_parts(pairs.iter().map(|p| (p.segment.z_odd, p.segment.td_odd)), coupled_len);
        let even = NetSummary::from_parts(pairs.iter().map(|p| (p.segment.z_even, p.segment.td_even)), coupled_len);
        info!(
            "nets {} / {}: Zodd avg {:.2} ohm, Zeven avg {:.2} ohm",
            a.name, b.name, odd.z0_avg, even.z0_avg
        );
        Ok(CoupledNetsModel {
            pairs,
            nets,
            odd,
            even,
        })
    }

    /// Net `side` of a coupled extraction: its leftover traces, its vias and
    /// its lines of every pair.
    fn coupled_side(
        &self,
        board: &Board,
        net: &Net,
        rest: &[Trace],
        pairs: &[CoupledModel],
        side: usize,
    ) -> Result<NetModel, ExtractError> {
        let traces = self.model_traces(board, rest)?;
        let vias = self.model_vias(board, net)?;
        let coupled: Vec<_> = pairs
            .iter()
            .map(|p| (p.segment.z0[side], p.segment.td[side], p.lengths[side]))
            .collect();
        let summary = Self::summarize(&net.name, &traces, &vias, &coupled);
        Ok(NetModel {
            name: net.name.clone(),
            traces,
            vias,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use approx::assert_relative_eq;

    use super::*;
    use crate::circuits::transmission::RLGC;
    use crate::fields::SolverError;
    use crate::geometry::{Layer, TracePath};
    use crate::impedance::{CoupledSolution, LineSolution};
    use crate::math::M2;

    /// Impedance grows with trace width; fails everything on "bad" layers.
    struct WidthBackend {
        width: Scalar,
        broken: bool,
    }

    impl ImpedanceBackend for WidthBackend {
        fn set_precision(&mut self, _p: Scalar) -> Result<(), ExtractError> {
            Ok(())
        }
        fn set_box_size(&mut self, _w: Scalar, _h: Scalar) -> Result<(), ExtractError> {
            Ok(())
        }
        fn add_ground(&mut self, _x: Scalar, _y: Scalar, _w: Scalar, _t: Scalar) {}
        fn add_wire(&mut self, _x: Scalar, _y: Scalar, width: Scalar, _t: Scalar, _s: Scalar) {
            self.width = width;
        }
        fn add_coupler(&mut self, _x: Scalar, _y: Scalar, _w: Scalar, _t: Scalar, _s: Scalar) {}
        fn add_dielectric(&mut self, _x: Scalar, _y: Scalar, _w: Scalar, _t: Scalar, _e: Scalar) {}
        fn add_ring_ground(&mut self, _x: Scalar, _y: Scalar, _r: Scalar, _t: Scalar) {}
        fn add_ring_wire(&mut self, _x: Scalar, _y: Scalar, radius: Scalar, _t: Scalar, _s: Scalar) {
            self.width = radius * 2.0;
        }
        fn calc_z0(&mut self) -> Result<LineSolution, ExtractError> {
            if self.broken {
                return Err(SolverError::DidNotConverge {
                    sweeps: 1,
                    residual: 1.0,
                }
                .into());
            }
            let z0 = self.width * 2.5e5;
            let v = 1.5e8;
            Ok(LineSolution {
                z0,
                velocity: v,
                rlgc: RLGC::lossless(z0 / v, 1.0 / (z0 * v)),
                cache_hit: false,
            })
        }
        fn calc_coupled_z0(&mut self) -> Result<CoupledSolution, ExtractError> {
            let l = M2::new(300e-9, 60e-9, 60e-9, 300e-9);
            let c = M2::new(120e-12, -20e-12, -20e-12, 120e-12);
            let (z_odd, z_even) = crate::impedance::mode_impedances(&l, &c);
            Ok(CoupledSolution {
                z_odd,
                z_even,
                c,
                l,
                r: M2::zeros(),
                g: M2::zeros(),
                cache_hit: false,
            })
        }
        fn clean(&mut self) {}
        fn clean_all(&mut self) {}
    }

    fn board() -> Board {
        Board::new(
            Stackup::new(vec![
                Layer::copper("F.Cu", 35e-6),
                Layer::dielectric("core", 0.2e-3, 4.3),
                Layer::copper("B.Cu", 35e-6),
            ]),
            ReferencePlanes::new(),
        )
    }

    fn extractor(broken: bool, created: Arc<AtomicUsize>) -> Extractor {
        let factory: BackendFactory = Arc::new(move || {
            created.fetch_add(1, Ordering::SeqCst);
            Box::new(WidthBackend { width: 0.0, broken }) as Box<dyn ImpedanceBackend>
        });
        Extractor::with_backend_factory(ExtractionConfig::default().with_threads(2), factory).unwrap()
    }

    fn line(name: &str, x0: Scalar, x1: Scalar, width: Scalar) -> Trace {
        Trace::new(name, TracePath::line(R2::new(x0, 0.0), R2::new(x1, 0.0)), width, "F.Cu")
    }

    fn line_at(name: &str, x0: Scalar, x1: Scalar, y: Scalar) -> Trace {
        Trace::new(name, TracePath::line(R2::new(x0, y), R2::new(x1, y)), 0.2e-3, "F.Cu")
    }

    #[test]
    fn net_traces_keep_input_order() {
        let created = Arc::new(AtomicUsize::new(0));
        let ex = extractor(false, created.clone());
        let traces: Vec<_> = (0..8)
            .map(|i| line(&format!("t{i}"), i as Scalar * 1e-3, (i + 1) as Scalar * 1e-3, 0.1e-3 + i as Scalar * 0.02e-3))
            .collect();
        let model = ex.extract_net(&board(), &Net::new("N", traces)).unwrap();
        let names: Vec<_> = model.traces.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7"]);
        for w in model.traces.windows(2) {
            assert!(w[1].segments[0].z0 > w[0].segments[0].z0);
        }
        assert!(created.load(Ordering::SeqCst) >= 1);
        assert_relative_eq!(model.summary.length, 8e-3, max_relative = 1e-12);
        assert_relative_eq!(model.summary.velocity_avg, 1.5e8, max_relative = 1e-9);
    }

    #[test]
    fn tiny_trace_becomes_a_link() {
        let ex = extractor(false, Arc::new(AtomicUsize::new(0)));
        let model = ex.extract_trace(&board(), &line("stub", 0.0, 5e-6, 0.2e-3)).unwrap();
        assert!(model.is_link());
        assert_relative_eq!(model.delay(), 0.0);
    }

    #[test]
    fn all_samples_failing_is_an_error() {
        let ex = extractor(true, Arc::new(AtomicUsize::new(0)));
        let err = ex
            .extract_net(&board(), &Net::new("N", vec![line("t", 0.0, 1e-3, 0.2e-3)]))
            .unwrap_err();
        assert!(matches!(err, ExtractError::NoValidSamples { ref trace } if trace == "t"));
    }

    #[test]
    fn summary_weights_by_squared_delay() {
        let s = NetSummary::from_parts([(50.0, 1e-12), (60.0, 3e-12)], 1e-3);
        assert_relative_eq!(s.z0_avg, (50.0 + 60.0 * 9.0) / 10.0, max_relative = 1e-12);
        assert_relative_eq!(s.td_sum, 4e-12, max_relative = 1e-12);
        assert_eq!(NetSummary::from_parts(Vec::<(Scalar, Scalar)>::new(), 1e-3).velocity_avg, 0.0);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let bad = ExtractionConfig::default().with_step(0.0);
        assert!(matches!(Extractor::new(bad), Err(ExtractError::InvalidConfig(_))));
        let bad = ExtractionConfig {
            threads: Some(0),
            ..ExtractionConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn vias_add_delay_and_length_but_no_impedance_weight() {
        let ex = extractor(false, Arc::new(AtomicUsize::new(0)));
        let mut bottom = line("bottom", 1e-3, 2e-3, 0.2e-3);
        bottom.layer = "B.Cu".into();
        let via = Via::new("v1", R2::new(1e-3, 0.0), 0.6e-3, 0.3e-3, "F.Cu", "B.Cu");
        let net = Net::new("N", vec![line("top", 0.0, 1e-3, 0.2e-3), bottom]).with_vias(vec![via]);
        assert_eq!(net.layers_at(&net.vias[0]), ["F.Cu", "B.Cu"]);

        let model = ex.extract_net(&board(), &net).unwrap();
        assert_eq!(model.vias.len(), 1);
        let v = &model.vias[0];
        assert_eq!(v.spans.len(), 1);
        assert_relative_eq!(v.spans[0].z0, 75.0, max_relative = 1e-12);
        assert_relative_eq!(v.delay(), 0.2e-3 / 1.5e8, max_relative = 1e-12);
        assert_relative_eq!(v.connected_length, 0.235e-3, max_relative = 1e-12);

        let s = model.summary;
        assert_relative_eq!(s.z0_avg, 50.0, max_relative = 1e-9);
        assert_relative_eq!(s.length, 2.235e-3, max_relative = 1e-12);
        assert_relative_eq!(s.td_sum, 2.2e-3 / 1.5e8, max_relative = 1e-9);
        assert_relative_eq!(s.velocity_avg, s.length / s.td_sum, max_relative = 1e-12);
    }

    #[test]
    fn lumped_pieces_only_move_delay_and_length() {
        let s = NetSummary::from_parts([(50.0, 1e-12)], 1e-3).with_lumped(1e-12, 1e-3);
        assert_relative_eq!(s.z0_avg, 50.0);
        assert_relative_eq!(s.td_sum, 2e-12);
        assert_relative_eq!(s.velocity_avg, 1e9, max_relative = 1e-12);
    }

    #[test]
    fn split_reinserts_leftovers() {
        let config = ExtractionConfig::default();
        let first = [line_at("p1", 0.0, 2e-3, 0.0), line_at("p2", 2e-3, 4e-3, 0.0)];
        let second = [line_at("n", 0.0, 4e-3, 0.4e-3), line_at("far", 0.0, 4e-3, 9e-3)];
        let set = config.split_coupled(&first, &second);
        assert_eq!(set.pairs.len(), 2);
        assert!(set.first.is_empty());
        let rest: Vec<_> = set.second.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(rest, ["far"]);
        let coupled: Scalar = set.pairs.iter().map(CoupledPair::length).sum();
        assert_relative_eq!(coupled, 4e-3, max_relative = 1e-9);
    }

    #[test]
    fn coupled_nets_carry_both_summaries() {
        let ex = extractor(false, Arc::new(AtomicUsize::new(0)));
        let p = Net::new("P", vec![line_at("p", 0.0, 4e-3, 0.0)]);
        let n = Net::new("N", vec![line_at("n", 1e-3, 3e-3, 0.4e-3)]);
        let model = ex.extract_coupled_nets(&board(), &p, &n).unwrap();

        assert_eq!(model.pairs.len(), 1);
        let pair = &model.pairs[0];
        assert_relative_eq!(pair.lengths[0], 2e-3, max_relative = 1e-9);
        assert_eq!(pair.layer, "F.Cu");
        let [np, nn] = &model.nets;
        assert_eq!((np.name.as_str(), nn.name.as_str()), ("P", "N"));
        assert_eq!(np.traces.len(), 2);
        assert!(nn.traces.is_empty());

        assert_relative_eq!(np.summary.length, 4e-3, max_relative = 1e-9);
        assert_relative_eq!(nn.summary.length, 2e-3, max_relative = 1e-9);
        assert_relative_eq!(nn.summary.z0_avg, pair.segment.z0[1], max_relative = 1e-12);
        assert_relative_eq!(nn.summary.td_sum, pair.segment.td[1], max_relative = 1e-12);
        let uncoupled: Scalar = np.traces.iter().map(TraceModel::delay).sum();
        assert_relative_eq!(np.summary.td_sum, uncoupled + pair.segment.td[0], max_relative = 1e-12);

        assert_relative_eq!(model.odd.z0_avg, pair.segment.z_odd, max_relative = 1e-12);
        assert_relative_eq!(model.even.z0_avg, pair.segment.z_even, max_relative = 1e-12);
        assert!(model.even.z0_avg > model.odd.z0_avg);
    }

    #[test]
    fn pairs_are_summarised() {
        let ex = extractor(false, Arc::new(AtomicUsize::new(0)));
        let a = line("a", 0.0, 2e-3, 0.2e-3);
        let mut b = line("b", 0.0, 2e-3, 0.2e-3);
        b.path = TracePath::line(R2::new(0.0, 0.4e-3), R2::new(2e-3, 0.4e-3));
        let pair = CoupledPair::new(a, b).unwrap();
        let models = ex.extract_pairs(&board(), &[pair.clone(), pair]).unwrap();
        assert_eq!(models.len(), 2);
        let m = &models[0];
        assert_eq!(m.segment.name, "a_b");
        assert!(m.even.z0_avg > m.odd.z0_avg);
        assert_relative_eq!(m.lines[0].velocity_avg, m.lines[1].velocity_avg, max_relative = 1e-12);
        assert!(m.segment.lossless);
    }
}
