// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The execution graph: operator recording, scratch planning, finalization,
//! and submission.

use crate::ops::{
    ConcatConvChwOp, ConcatConvHwcOp, ConvOp, InputProcessOp, Node, OutputProcessOp, PoolOp,
    UpsampleOp,
};
use crate::repack::{is_weight_repack_supported, repack_bias, repack_weight};
use crate::{GraphError, Weights};
use compute_engine::{Activation, Buffer, Device, Engine, PostOp, Progress, TensorView, TransferFunc};
use memory_planner::{plan_offsets, AllocArena, AllocId};
use std::sync::Arc;
use tensor_core::{round_up, DType, HostTensor, TensorDesc, TensorDims, TensorLayout,
    BUFFER_ALIGNMENT};

/// Handle to an operator inside one [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpId(usize);

/// One input-channel slice copied by a weight repack.
struct RepackPart {
    src_begin_i: usize,
    src_i: usize,
    dst_begin_i: usize,
    dst_i: usize,
}

/// Deferred initialization steps, applied in insertion order by `finalize`
/// once the scratch buffer exists.
enum LazyInit {
    BindSrc { op: usize, alloc: AllocId },
    BindSrc2 { op: usize, alloc: AllocId },
    BindDst { op: usize, alloc: AllocId },
    RepackWeight {
        op: usize,
        key: String,
        desc: TensorDesc,
        secondary: bool,
        parts: Vec<RepackPart>,
    },
    RepackBias {
        op: usize,
        key: String,
        desc: TensorDesc,
    },
}

/// The operator graph for one engine.
///
/// See the crate docs for the lifecycle. All `add_*` methods fail once the
/// graph is finalized.
pub struct Graph {
    device: Arc<dyn Device>,
    engine: Arc<dyn Engine>,
    weights: Weights,

    ops: Vec<Node>,
    scratch: Option<Buffer>,
    op_scratch_byte_size: usize,
    tensor_scratch_byte_size: usize,
    const_byte_size: usize,
    dirty: bool,
    finalized: bool,

    // Builder-only state, dropped at finalization.
    arena: AllocArena,
    alloc_descs: Vec<TensorDesc>,
    alloc_by_op: Vec<Option<AllocId>>,
    lazy_inits: Vec<LazyInit>,
}

impl Graph {
    /// Creates an empty graph bound to engine `engine_index` of `device`,
    /// reading convolution weights from `weights`.
    pub fn new(device: Arc<dyn Device>, engine_index: usize, weights: Weights) -> Self {
        let engine = device.engine(engine_index);
        Self {
            device,
            engine,
            weights,
            ops: Vec::new(),
            scratch: None,
            op_scratch_byte_size: 0,
            tensor_scratch_byte_size: 0,
            const_byte_size: 0,
            dirty: false,
            finalized: false,
            arena: AllocArena::new(),
            alloc_descs: Vec::new(),
            alloc_by_op: Vec::new(),
            lazy_inits: Vec::new(),
        }
    }

    // ── Builder operations ─────────────────────────────────────

    /// Adds the source-less image-gathering op. `src_dims` is the logical
    /// `(C, H, W)` of one tile buffer.
    pub fn add_input_process(
        &mut self,
        name: &str,
        src_dims: &TensorDims,
        alignment: usize,
        transfer: Arc<TransferFunc>,
        hdr: bool,
        snorm: bool,
    ) -> Result<OpId, GraphError> {
        self.ensure_building()?;
        let op = InputProcessOp::new(
            name.to_string(),
            src_dims,
            alignment,
            transfer,
            hdr,
            snorm,
            &*self.device,
        )?;
        let id = self.push_node(Node::InputProcess(op), &[], false)?;
        self.lazy_inits.push(LazyInit::BindDst {
            op: id.0,
            alloc: self.alloc_by_op[id.0].expect("input process has a destination"),
        });
        Ok(id)
    }

    /// Adds the terminal image-scattering op consuming `src`.
    pub fn add_output_process(
        &mut self,
        name: &str,
        src: OpId,
        transfer: Arc<TransferFunc>,
        hdr: bool,
        snorm: bool,
    ) -> Result<OpId, GraphError> {
        self.ensure_building()?;
        self.dst_desc_of(src)?;
        let op = OutputProcessOp::new(name.to_string(), transfer, hdr, snorm);
        let id = self.push_node(Node::OutputProcess(op), &[src], false)?;
        self.lazy_inits.push(LazyInit::BindSrc {
            op: id.0,
            alloc: self.alloc_by_op[src.0].expect("source has a destination"),
        });
        Ok(id)
    }

    /// Adds a convolution reading `<name>.weight` / `<name>.bias` from the
    /// weight map.
    ///
    /// When the device cannot fuse the requested post-op, the call degrades
    /// into an unfused convolution followed by a separate `<name>_pool` or
    /// `<name>_upsample` op, and the returned ID is the trailing op's.
    pub fn add_conv(
        &mut self,
        name: &str,
        src: OpId,
        activation: Activation,
        post_op: Option<PostOp>,
    ) -> Result<OpId, GraphError> {
        self.ensure_building()?;
        if let Some(post) = post_op {
            if !self.device.is_conv_post_op_supported(post) {
                let conv = self.add_conv(name, src, activation, None)?;
                return match post {
                    PostOp::Pool => self.add_pool(&format!("{name}_pool"), conv),
                    PostOp::Upsample => self.add_upsample(&format!("{name}_upsample"), conv),
                };
            }
        }

        let src_desc = self.dst_desc_of(src)?.clone();
        let (weight_desc, bias_desc) = self.conv_weight_descs(name, &[&src_desc])?;

        let op = ConvOp::new(
            name.to_string(),
            &src_desc,
            weight_desc,
            bias_desc,
            activation,
            post_op,
            &*self.device,
        )?;
        let id = self.push_node(Node::Conv(op), &[src], false)?;
        self.push_conv_inits(id, name, src);
        Ok(id)
    }

    /// Adds a convolution over the channel concatenation of two sources.
    pub fn add_concat_conv(
        &mut self,
        name: &str,
        src1: OpId,
        src2: OpId,
        activation: Activation,
    ) -> Result<OpId, GraphError> {
        self.ensure_building()?;
        let src1_desc = self.dst_desc_of(src1)?.clone();
        let src2_desc = self.dst_desc_of(src2)?.clone();
        let weight = self.weights.conv_weight(name)?;
        let bias = self.weights.conv_bias(name)?;
        let (o, i) = (weight.desc().o(), weight.desc().i());
        let (kh, kw) = (weight.desc().h(), weight.desc().w());
        if bias.desc().x() != o {
            return Err(GraphError::InvalidArgument(format!(
                "op '{name}': bias length {} does not match {o} output channels",
                bias.desc().x()
            )));
        }
        if i != src1_desc.c() + src2_desc.c() {
            return Err(GraphError::InvalidArgument(format!(
                "op '{name}': weight expects {i} input channels, sources have {} + {}",
                src1_desc.c(),
                src2_desc.c()
            )));
        }

        let block_c = self.device.tensor_block_c();
        let dtype = self.device.tensor_dtype();
        let weight_layout = self.device.weight_layout();
        self.check_repack(weight_layout, dtype)?;
        let bias_desc = TensorDesc::padded(
            TensorDims::new(vec![o]),
            TensorDims::new(vec![round_up(o, block_c)]),
            TensorLayout::x,
            dtype,
        )?;

        if self.device.tensor_layout() == TensorLayout::hwc {
            // Channel-minor flavor: two independent weight sub-tensors, the
            // sources stay ordinary siblings.
            let weight1_desc = TensorDesc::padded(
                TensorDims::new(vec![o, src1_desc.c(), kh, kw]),
                TensorDims::new(vec![round_up(o, block_c), src1_desc.padded_c(), kh, kw]),
                weight_layout,
                dtype,
            )?;
            let weight2_desc = TensorDesc::padded(
                TensorDims::new(vec![o, src2_desc.c(), kh, kw]),
                TensorDims::new(vec![round_up(o, block_c), src2_desc.padded_c(), kh, kw]),
                weight_layout,
                dtype,
            )?;
            self.const_byte_size += weight1_desc.aligned_byte_size()
                + weight2_desc.aligned_byte_size()
                + bias_desc.aligned_byte_size();

            let op = ConcatConvHwcOp::new(
                name.to_string(),
                &src1_desc,
                &src2_desc,
                &weight1_desc,
                activation,
                &*self.device,
            )?;
            let id = self.push_node(Node::ConcatConvHwc(op), &[src1, src2], false)?;
            self.lazy_inits.push(LazyInit::BindSrc {
                op: id.0,
                alloc: self.alloc_by_op[src1.0].expect("source has a destination"),
            });
            self.lazy_inits.push(LazyInit::BindSrc2 {
                op: id.0,
                alloc: self.alloc_by_op[src2.0].expect("source has a destination"),
            });
            self.lazy_inits.push(LazyInit::BindDst {
                op: id.0,
                alloc: self.alloc_by_op[id.0].expect("concat conv has a destination"),
            });
            self.lazy_inits.push(LazyInit::RepackWeight {
                op: id.0,
                key: name.to_string(),
                desc: weight1_desc,
                secondary: false,
                parts: vec![RepackPart {
                    src_begin_i: 0,
                    src_i: src1_desc.c(),
                    dst_begin_i: 0,
                    dst_i: src1_desc.padded_c(),
                }],
            });
            self.lazy_inits.push(LazyInit::RepackWeight {
                op: id.0,
                key: name.to_string(),
                desc: weight2_desc,
                secondary: true,
                parts: vec![RepackPart {
                    src_begin_i: src1_desc.c(),
                    src_i: src2_desc.c(),
                    dst_begin_i: 0,
                    dst_i: src2_desc.padded_c(),
                }],
            });
            self.lazy_inits.push(LazyInit::RepackBias {
                op: id.0,
                key: name.to_string(),
                desc: bias_desc,
            });
            Ok(id)
        } else {
            // Channel-major flavor: one combined weight tensor; the two
            // source allocations must be chained adjacent.
            let weight_desc = TensorDesc::padded(
                TensorDims::new(vec![o, i, kh, kw]),
                TensorDims::new(vec![
                    round_up(o, block_c),
                    src1_desc.padded_c() + src2_desc.padded_c(),
                    kh,
                    kw,
                ]),
                weight_layout,
                dtype,
            )?;
            self.const_byte_size +=
                weight_desc.aligned_byte_size() + bias_desc.aligned_byte_size();

            let op = ConcatConvChwOp::new(
                name.to_string(),
                &src1_desc,
                &src2_desc,
                &weight_desc,
                activation,
                &*self.device,
            )?;
            let id = self.push_node(Node::ConcatConvChw(op), &[src1, src2], true)?;
            self.lazy_inits.push(LazyInit::BindSrc {
                op: id.0,
                alloc: self.alloc_by_op[src1.0].expect("source has a destination"),
            });
            self.lazy_inits.push(LazyInit::BindSrc2 {
                op: id.0,
                alloc: self.alloc_by_op[src2.0].expect("source has a destination"),
            });
            self.lazy_inits.push(LazyInit::BindDst {
                op: id.0,
                alloc: self.alloc_by_op[id.0].expect("concat conv has a destination"),
            });
            self.lazy_inits.push(LazyInit::RepackWeight {
                op: id.0,
                key: name.to_string(),
                desc: weight_desc,
                secondary: false,
                parts: vec![
                    RepackPart {
                        src_begin_i: 0,
                        src_i: src1_desc.c(),
                        dst_begin_i: 0,
                        dst_i: src1_desc.padded_c(),
                    },
                    RepackPart {
                        src_begin_i: src1_desc.c(),
                        src_i: src2_desc.c(),
                        dst_begin_i: src1_desc.padded_c(),
                        dst_i: src2_desc.padded_c(),
                    },
                ],
            });
            self.lazy_inits.push(LazyInit::RepackBias {
                op: id.0,
                key: name.to_string(),
                desc: bias_desc,
            });
            Ok(id)
        }
    }

    /// Adds a standalone 2×2 max-pool consuming `src`.
    pub fn add_pool(&mut self, name: &str, src: OpId) -> Result<OpId, GraphError> {
        self.ensure_building()?;
        let src_desc = self.dst_desc_of(src)?.clone();
        let op = PoolOp::new(name.to_string(), &src_desc, &*self.device)?;
        let id = self.push_node(Node::Pool(op), &[src], false)?;
        self.push_straight_inits(id, src);
        Ok(id)
    }

    /// Adds a standalone 2× upsample consuming `src`.
    pub fn add_upsample(&mut self, name: &str, src: OpId) -> Result<OpId, GraphError> {
        self.ensure_building()?;
        let src_desc = self.dst_desc_of(src)?.clone();
        let op = UpsampleOp::new(name.to_string(), &src_desc, &*self.device)?;
        let id = self.push_node(Node::Upsample(op), &[src], false)?;
        self.push_straight_inits(id, src);
        Ok(id)
    }

    // ── Queries ────────────────────────────────────────────────

    /// Number of operators recorded so far.
    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    /// Work units one full run reports to the progress tracker.
    pub fn work_amount(&self) -> f64 {
        self.ops.len() as f64
    }

    /// Returns `true` if the backend supports every recorded op.
    pub fn is_supported(&self) -> bool {
        self.ops.iter().all(|op| op.is_supported())
    }

    /// Total bytes of constant (weight/bias) tensors this graph will
    /// allocate at finalization.
    pub fn const_byte_size(&self) -> usize {
        self.const_byte_size
    }

    /// Name of an operator, for logs and tests.
    pub fn op_name(&self, id: OpId) -> Option<&str> {
        self.ops.get(id.0).map(|op| op.name())
    }

    /// Typed access to an input-process op.
    pub fn input_process_mut(&mut self, id: OpId) -> Option<&mut InputProcessOp> {
        match self.ops.get_mut(id.0) {
            Some(Node::InputProcess(op)) => Some(op),
            _ => None,
        }
    }

    /// Typed access to an output-process op.
    pub fn output_process_mut(&mut self, id: OpId) -> Option<&mut OutputProcessOp> {
        match self.ops.get_mut(id.0) {
            Some(Node::OutputProcess(op)) => Some(op),
            _ => None,
        }
    }

    /// Scratch bytes this graph needs: the planned transient-tensor layout
    /// plus the largest per-op workspace. Re-plans if the graph changed.
    pub fn scratch_aligned_size(&mut self) -> usize {
        if self.dirty {
            self.plan_allocations();
        }
        self.op_scratch_byte_size + self.tensor_scratch_byte_size
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Registers the backing scratch buffer. Must be at least
    /// [`scratch_aligned_size`](Self::scratch_aligned_size) bytes.
    pub fn set_scratch(&mut self, buffer: Buffer) -> Result<(), GraphError> {
        let required = self.scratch_aligned_size();
        if buffer.byte_size() < required {
            return Err(GraphError::ScratchTooSmall {
                size: buffer.byte_size(),
                required,
            });
        }
        self.scratch = Some(buffer);
        Ok(())
    }

    /// Plans (if needed), materializes every transient tensor on the
    /// scratch buffer, applies the deferred initializers (binding sources
    /// and destinations, repacking weights into freshly allocated constant
    /// tensors), finalizes each op, and drops the builder-only state.
    pub fn finalize(&mut self) -> Result<(), GraphError> {
        if self.finalized {
            return Err(GraphError::Frozen);
        }
        if self.dirty {
            self.plan_allocations();
        }
        let required = self.op_scratch_byte_size + self.tensor_scratch_byte_size;
        let scratch = match &self.scratch {
            Some(buffer) if buffer.byte_size() >= required => buffer.clone(),
            Some(buffer) => {
                return Err(GraphError::ScratchTooSmall {
                    size: buffer.byte_size(),
                    required,
                })
            }
            None => {
                return Err(GraphError::ScratchTooSmall {
                    size: 0,
                    required,
                })
            }
        };

        // Op scratch sits at the bottom of the buffer, tensors above it.
        let mut alloc_tensors: Vec<TensorView> = Vec::with_capacity(self.arena.len());
        for (id, record) in self.arena.iter() {
            let desc = self.alloc_descs[id.index()].clone();
            let view =
                scratch.tensor_view(desc, self.op_scratch_byte_size + record.byte_offset)?;
            alloc_tensors.push(view);
        }

        for init in std::mem::take(&mut self.lazy_inits) {
            match init {
                LazyInit::BindSrc { op, alloc } => {
                    self.ops[op].bind_src(alloc_tensors[alloc.index()].clone());
                }
                LazyInit::BindSrc2 { op, alloc } => {
                    self.ops[op].bind_src2(alloc_tensors[alloc.index()].clone());
                }
                LazyInit::BindDst { op, alloc } => {
                    self.ops[op].bind_dst(alloc_tensors[alloc.index()].clone());
                }
                LazyInit::RepackWeight {
                    op,
                    key,
                    desc,
                    secondary,
                    parts,
                } => {
                    let src = self.weights.conv_weight(&key)?;
                    let mut staged = HostTensor::zeros(desc.clone());
                    for part in &parts {
                        repack_weight(
                            src,
                            part.src_begin_i,
                            part.src_i,
                            &mut staged,
                            part.dst_begin_i,
                            part.dst_i,
                        )?;
                    }
                    let buffer = self.engine.new_buffer(desc.aligned_byte_size())?;
                    let view = buffer.tensor_view(desc, 0)?;
                    view.write_f32(&staged.to_f32_vec())?;
                    self.ops[op].bind_weight(secondary, view);
                }
                LazyInit::RepackBias { op, key, desc } => {
                    let src = self.weights.conv_bias(&key)?;
                    let mut staged = HostTensor::zeros(desc.clone());
                    repack_bias(src, &mut staged)?;
                    let buffer = self.engine.new_buffer(desc.aligned_byte_size())?;
                    let view = buffer.tensor_view(desc, 0)?;
                    view.write_f32(&staged.to_f32_vec())?;
                    self.ops[op].bind_bias(view);
                }
            }
        }

        for op in &mut self.ops {
            op.finalize()?;
        }

        // Drop the builder-only state and the weight map.
        self.arena.clear();
        self.alloc_descs.clear();
        self.alloc_by_op.clear();
        self.weights = Weights::new();
        self.finalized = true;

        tracing::debug!(
            ops = self.ops.len(),
            tensor_scratch = self.tensor_scratch_byte_size,
            op_scratch = self.op_scratch_byte_size,
            const_bytes = self.const_byte_size,
            "graph finalized"
        );
        Ok(())
    }

    /// Submits every op in insertion order, reporting one work unit after
    /// each submission.
    pub fn run(&self, progress: &Progress) -> Result<(), GraphError> {
        if !self.finalized {
            return Err(GraphError::NotFinalized);
        }
        for op in &self.ops {
            op.submit(&*self.engine)?;
            progress.update(1.0)?;
        }
        Ok(())
    }

    /// Drops all ops, allocations, initializers, and scratch; returns the
    /// graph to the building state. The weight map is left untouched so a
    /// never-finalized graph can be rebuilt (the tile planner does this on
    /// every subdivision step).
    pub fn clear(&mut self) {
        self.ops.clear();
        self.lazy_inits.clear();
        self.arena.clear();
        self.alloc_descs.clear();
        self.alloc_by_op.clear();
        self.scratch = None;
        self.op_scratch_byte_size = 0;
        self.tensor_scratch_byte_size = 0;
        self.const_byte_size = 0;
        self.dirty = false;
        self.finalized = false;
    }

    // ── Internals ──────────────────────────────────────────────

    fn ensure_building(&self) -> Result<(), GraphError> {
        if self.finalized {
            Err(GraphError::Frozen)
        } else {
            Ok(())
        }
    }

    fn dst_desc_of(&self, id: OpId) -> Result<&TensorDesc, GraphError> {
        self.ops
            .get(id.0)
            .ok_or_else(|| GraphError::InvalidArgument(format!("unknown op id {id:?}")))?
            .dst_desc()
            .ok_or_else(|| {
                GraphError::InvalidArgument(format!("op {id:?} has no destination tensor"))
            })
    }

    fn check_repack(&self, weight_layout: TensorLayout, dtype: DType) -> Result<(), GraphError> {
        if !is_weight_repack_supported(DType::F16, dtype, TensorLayout::oihw, weight_layout) {
            return Err(GraphError::UnsupportedRepack {
                src_dtype: DType::F16,
                src_layout: TensorLayout::oihw,
                dst_dtype: dtype,
                dst_layout: weight_layout,
            });
        }
        Ok(())
    }

    /// Derives the final weight/bias descriptors for a plain convolution,
    /// checking the weight against the source channel counts.
    fn conv_weight_descs(
        &mut self,
        name: &str,
        srcs: &[&TensorDesc],
    ) -> Result<(TensorDesc, TensorDesc), GraphError> {
        let weight = self.weights.conv_weight(name)?;
        let bias = self.weights.conv_bias(name)?;
        let (o, i) = (weight.desc().o(), weight.desc().i());
        let (kh, kw) = (weight.desc().h(), weight.desc().w());
        if bias.desc().x() != o {
            return Err(GraphError::InvalidArgument(format!(
                "op '{name}': bias length {} does not match {o} output channels",
                bias.desc().x()
            )));
        }
        let src_c: usize = srcs.iter().map(|s| s.c()).sum();
        if i != src_c {
            return Err(GraphError::InvalidArgument(format!(
                "op '{name}': weight expects {i} input channels, sources have {src_c}"
            )));
        }
        let block_c = self.device.tensor_block_c();
        let dtype = self.device.tensor_dtype();
        let weight_layout = self.device.weight_layout();
        self.check_repack(weight_layout, dtype)?;

        let padded_i = srcs
            .iter()
            .map(|s| s.padded_c())
            .sum::<usize>()
            .max(round_up(i, block_c));
        let weight_desc = TensorDesc::padded(
            TensorDims::new(vec![o, i, kh, kw]),
            TensorDims::new(vec![round_up(o, block_c), padded_i, kh, kw]),
            weight_layout,
            dtype,
        )?;
        let bias_desc = TensorDesc::padded(
            TensorDims::new(vec![o]),
            TensorDims::new(vec![round_up(o, block_c)]),
            TensorLayout::x,
            dtype,
        )?;
        self.const_byte_size +=
            weight_desc.aligned_byte_size() + bias_desc.aligned_byte_size();
        Ok((weight_desc, bias_desc))
    }

    /// Records the lazy inits for a plain convolution.
    fn push_conv_inits(&mut self, id: OpId, name: &str, src: OpId) {
        let src_alloc = self.alloc_by_op[src.0].expect("source has a destination");
        let dst_alloc = self.alloc_by_op[id.0].expect("conv has a destination");
        let (weight_desc, bias_desc) = match &self.ops[id.0] {
            Node::Conv(op) => (op.weight_desc().clone(), op.bias_desc().clone()),
            _ => unreachable!("push_conv_inits on non-conv"),
        };
        let src_i = weight_desc.i();
        let dst_i = weight_desc.padded_i();
        self.lazy_inits.push(LazyInit::BindSrc {
            op: id.0,
            alloc: src_alloc,
        });
        self.lazy_inits.push(LazyInit::BindDst {
            op: id.0,
            alloc: dst_alloc,
        });
        self.lazy_inits.push(LazyInit::RepackWeight {
            op: id.0,
            key: name.to_string(),
            desc: weight_desc,
            secondary: false,
            parts: vec![RepackPart {
                src_begin_i: 0,
                src_i,
                dst_begin_i: 0,
                dst_i,
            }],
        });
        self.lazy_inits.push(LazyInit::RepackBias {
            op: id.0,
            key: name.to_string(),
            desc: bias_desc,
        });
    }

    /// Records the lazy inits for a straight-through op (pool/upsample).
    fn push_straight_inits(&mut self, id: OpId, src: OpId) {
        self.lazy_inits.push(LazyInit::BindSrc {
            op: id.0,
            alloc: self.alloc_by_op[src.0].expect("source has a destination"),
        });
        self.lazy_inits.push(LazyInit::BindDst {
            op: id.0,
            alloc: self.alloc_by_op[id.0].expect("op has a destination"),
        });
    }

    /// Appends the node, extending source lifetimes and (for concatenation)
    /// chaining the source allocations adjacent.
    fn push_node(
        &mut self,
        node: Node,
        srcs: &[OpId],
        concat_srcs: bool,
    ) -> Result<OpId, GraphError> {
        let op_id = self.ops.len();

        let mut prev: Option<AllocId> = None;
        for &src in srcs {
            let alloc = self.alloc_by_op[src.0].ok_or_else(|| {
                GraphError::InvalidArgument(format!("source op {src:?} has no destination"))
            })?;
            self.arena.extend_lifetime(alloc, op_id);
            if concat_srcs {
                if let Some(p) = prev {
                    self.arena.chain(p, alloc)?;
                }
            }
            prev = Some(alloc);
        }

        let dst_alloc = node.dst_desc().map(|desc| {
            let id = self.arena.push(desc.aligned_byte_size(), op_id);
            self.alloc_descs.push(desc.clone());
            id
        });
        self.alloc_by_op.push(dst_alloc);
        self.ops.push(node);
        self.dirty = true;
        Ok(OpId(op_id))
    }

    fn plan_allocations(&mut self) {
        self.tensor_scratch_byte_size = plan_offsets(&mut self.arena);
        self.op_scratch_byte_size = self
            .ops
            .iter()
            .map(|op| round_up(op.scratch_byte_size(), BUFFER_ALIGNMENT))
            .max()
            .unwrap_or(0);
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compute_engine::cpu::{CpuDevice, CpuDeviceOptions};
    use compute_engine::{Image, ImageDesc, ImageFormat, TransferKind};
    use half::f16;

    /// Deterministic little weight map for a given conv channel plan.
    fn make_weights(plan: &[(&str, usize, usize)]) -> Weights {
        let mut weights = Weights::new();
        for &(name, out_c, in_c) in plan {
            let wdesc = TensorDesc::new(
                TensorDims::new(vec![out_c, in_c, 3, 3]),
                TensorLayout::oihw,
                DType::F16,
            )
            .unwrap();
            let n = wdesc.num_padded_elements();
            let values: Vec<f16> = (0..n)
                .map(|k| f16::from_f32(((k * 31 + name.len() * 7) % 13) as f32 * 0.02 - 0.12))
                .collect();
            weights.insert(format!("{name}.weight"), HostTensor::from_f16(wdesc, &values).unwrap());

            let bdesc = TensorDesc::new(
                TensorDims::new(vec![out_c]),
                TensorLayout::x,
                DType::F16,
            )
            .unwrap();
            let bias: Vec<f16> = (0..out_c)
                .map(|k| f16::from_f32((k % 5) as f32 * 0.01))
                .collect();
            weights.insert(format!("{name}.bias"), HostTensor::from_f16(bdesc, &bias).unwrap());
        }
        weights
    }

    fn transfer() -> Arc<TransferFunc> {
        Arc::new(TransferFunc::new(TransferKind::Srgb))
    }

    /// Builds a tiny encoder/decoder graph exercising conv, pool, upsample,
    /// and concat, then runs it on a full-image tile.
    fn build_and_run(device: Arc<dyn Device>) -> Vec<f32> {
        let weights = make_weights(&[
            ("enc0", 4, 3),
            ("enc1", 6, 4),
            ("dec0", 4, 10),
            ("dec1", 3, 4),
        ]);
        let mut graph = Graph::new(device, 0, weights);

        let input = graph
            .add_input_process("input", &TensorDims::new(vec![3, 16, 16]), 16, transfer(), false, false)
            .unwrap();
        let enc0 = graph
            .add_conv("enc0", input, Activation::ReLU, None)
            .unwrap();
        let pool1 = graph
            .add_conv("enc1", enc0, Activation::ReLU, Some(PostOp::Pool))
            .unwrap();
        let up = graph.add_upsample("up", pool1).unwrap();
        let dec0 = graph
            .add_concat_conv("dec0", up, enc0, Activation::ReLU)
            .unwrap();
        let dec1 = graph.add_conv("dec1", dec0, Activation::None, None).unwrap();
        let output = graph
            .add_output_process("output", dec1, transfer(), false, false)
            .unwrap();

        assert!(graph.is_supported());
        let scratch_size = graph.scratch_aligned_size();
        assert!(scratch_size > 0);
        let scratch = Buffer::new(scratch_size);
        graph.set_scratch(scratch).unwrap();
        graph.finalize().unwrap();

        // Bind a real image and run the whole thing as one tile.
        let desc = ImageDesc::new(ImageFormat::Float3, 16, 16);
        let data: Vec<f32> = (0..16 * 16 * 3).map(|k| (k as f32 * 0.013).fract()).collect();
        let color = Image::from_f32(desc, &data).unwrap();
        let out = Image::new(desc);

        let ip = graph.input_process_mut(input).unwrap();
        ip.set_images(Some(color), None, None);
        ip.set_tile(0, 0, 0, 0, 16, 16);
        let op = graph.output_process_mut(output).unwrap();
        op.set_dst_image(out.clone());
        op.set_tile(0, 0, 0, 0, 16, 16);

        graph.run(&Progress::default()).unwrap();
        out.to_f32_vec()
    }

    fn cpu() -> Arc<dyn Device> {
        CpuDevice::new(1)
    }

    #[test]
    fn test_end_to_end_graph() {
        let out = build_and_run(cpu());
        assert!(out.iter().all(|v| v.is_finite()));
        // The synthetic weights are non-trivial, so the output is not
        // identically zero.
        assert!(out.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_missing_weights() {
        let mut graph = Graph::new(cpu(), 0, Weights::new());
        let input = graph
            .add_input_process("input", &TensorDims::new(vec![3, 16, 16]), 16, transfer(), false, false)
            .unwrap();
        assert!(matches!(
            graph.add_conv("nope", input, Activation::ReLU, None),
            Err(GraphError::MissingWeight(_))
        ));
    }

    #[test]
    fn test_channel_mismatch() {
        let weights = make_weights(&[("c", 4, 5)]); // expects 5 input channels
        let mut graph = Graph::new(cpu(), 0, weights);
        let input = graph
            .add_input_process("input", &TensorDims::new(vec![3, 16, 16]), 16, transfer(), false, false)
            .unwrap();
        assert!(matches!(
            graph.add_conv("c", input, Activation::ReLU, None),
            Err(GraphError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unfused_fallback_produces_two_ops() {
        // The default CPU device reports no fused post-op support, so the
        // builder splits the conv+pool request.
        let weights = make_weights(&[("c1", 4, 3)]);
        let mut graph = Graph::new(cpu(), 0, weights);
        let input = graph
            .add_input_process("input", &TensorDims::new(vec![3, 16, 16]), 16, transfer(), false, false)
            .unwrap();
        let tail = graph
            .add_conv("c1", input, Activation::ReLU, Some(PostOp::Pool))
            .unwrap();

        assert_eq!(graph.num_ops(), 3);
        assert_eq!(graph.op_name(OpId(1)), Some("c1"));
        assert_eq!(graph.op_name(tail), Some("c1_pool"));
    }

    #[test]
    fn test_fused_and_split_agree() {
        let fused_device: Arc<dyn Device> = CpuDevice::with_options(CpuDeviceOptions {
            num_engines: 1,
            tensor_layout: TensorLayout::chw,
            fused_conv: true,
        })
        .unwrap();
        let out_fused = run_pool_net(fused_device);
        let out_split = run_pool_net(cpu());
        assert_eq!(out_fused.len(), out_split.len());
        for (a, b) in out_fused.iter().zip(&out_split) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    /// input -> conv+pool -> upsample -> conv3 -> output, fused or split per
    /// the device's capabilities.
    fn run_pool_net(device: Arc<dyn Device>) -> Vec<f32> {
        let weights = make_weights(&[("c1", 4, 3), ("c2", 3, 4)]);
        let mut graph = Graph::new(device, 0, weights);
        let input = graph
            .add_input_process("input", &TensorDims::new(vec![3, 16, 16]), 16, transfer(), false, false)
            .unwrap();
        let pooled = graph
            .add_conv("c1", input, Activation::ReLU, Some(PostOp::Pool))
            .unwrap();
        let up = graph.add_upsample("up", pooled).unwrap();
        let dec = graph.add_conv("c2", up, Activation::None, None).unwrap();
        let output = graph
            .add_output_process("output", dec, transfer(), false, false)
            .unwrap();

        let size = graph.scratch_aligned_size();
        graph.set_scratch(Buffer::new(size)).unwrap();
        graph.finalize().unwrap();

        let desc = ImageDesc::new(ImageFormat::Float3, 16, 16);
        let data: Vec<f32> = (0..16 * 16 * 3).map(|k| ((k * 17 % 97) as f32) / 97.0).collect();
        let color = Image::from_f32(desc, &data).unwrap();
        let out = Image::new(desc);
        let ip = graph.input_process_mut(input).unwrap();
        ip.set_images(Some(color), None, None);
        ip.set_tile(0, 0, 0, 0, 16, 16);
        let op = graph.output_process_mut(output).unwrap();
        op.set_dst_image(out.clone());
        op.set_tile(0, 0, 0, 0, 16, 16);
        graph.run(&Progress::default()).unwrap();
        out.to_f32_vec()
    }

    #[test]
    fn test_hwc_concat_matches_chw() {
        let out_chw = build_and_run(cpu());
        let hwc: Arc<dyn Device> = CpuDevice::with_options(CpuDeviceOptions {
            num_engines: 1,
            tensor_layout: TensorLayout::hwc,
            fused_conv: false,
        })
        .unwrap();
        let out_hwc = build_and_run(hwc);
        for (a, b) in out_chw.iter().zip(&out_hwc) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn test_add_after_finalize_fails() {
        let weights = make_weights(&[("c", 4, 3)]);
        let mut graph = Graph::new(cpu(), 0, weights);
        let input = graph
            .add_input_process("input", &TensorDims::new(vec![3, 16, 16]), 16, transfer(), false, false)
            .unwrap();
        let size = graph.scratch_aligned_size();
        graph.set_scratch(Buffer::new(size)).unwrap();
        graph.finalize().unwrap();

        assert!(matches!(
            graph.add_conv("c", input, Activation::ReLU, None),
            Err(GraphError::Frozen)
        ));
    }

    #[test]
    fn test_scratch_too_small() {
        let weights = make_weights(&[("c", 4, 3)]);
        let mut graph = Graph::new(cpu(), 0, weights);
        let input = graph
            .add_input_process("input", &TensorDims::new(vec![3, 16, 16]), 16, transfer(), false, false)
            .unwrap();
        graph.add_conv("c", input, Activation::ReLU, None).unwrap();

        let size = graph.scratch_aligned_size();
        assert!(matches!(
            graph.set_scratch(Buffer::new(size - 1)),
            Err(GraphError::ScratchTooSmall { .. })
        ));
    }

    #[test]
    fn test_run_before_finalize() {
        let graph = Graph::new(cpu(), 0, Weights::new());
        assert!(matches!(
            graph.run(&Progress::default()),
            Err(GraphError::NotFinalized)
        ));
    }

    #[test]
    fn test_clear_returns_to_building() {
        let weights = make_weights(&[("c", 4, 3)]);
        let mut graph = Graph::new(cpu(), 0, weights);
        let input = graph
            .add_input_process("input", &TensorDims::new(vec![3, 16, 16]), 16, transfer(), false, false)
            .unwrap();
        graph.add_conv("c", input, Activation::ReLU, None).unwrap();
        let size = graph.scratch_aligned_size();
        graph.set_scratch(Buffer::new(size)).unwrap();
        graph.finalize().unwrap();

        graph.clear();
        assert_eq!(graph.num_ops(), 0);
        assert_eq!(graph.const_byte_size(), 0);
        // Building works again (weights were dropped at finalize, so only
        // weight-less ops can be added now).
        graph
            .add_input_process("input", &TensorDims::new(vec![3, 16, 16]), 16, transfer(), false, false)
            .unwrap();
    }
}
