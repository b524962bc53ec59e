// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The U-Net denoising filter orchestrator.
//!
//! Lifecycle: set parameters, [`commit`](UNetFilter::commit) (validates and
//! rebuilds the model when parameters changed), then
//! [`execute`](UNetFilter::execute) any number of times. Committing is
//! idempotent while nothing is dirty.

use crate::tile::{plan_tiles, TileGrid};
use crate::weights::{builtin_weights, select_blob, unet_input_channels};
use crate::FilterError;
use compute_engine::{
    Activation, Device, Engine, Image, ImageDesc, PostOp, Progress, ProgressCallback, SyncMode,
    TransferFunc, TransferKind,
};
use net_graph::{AutoexposureOp, Graph, ImageCopyOp, OpId, Weights};
use std::sync::Arc;
use tensor_core::TensorDims;

/// Tile-corner granularity required by the input-process kernels; also
/// guarantees tiles stay divisible through the four pooling levels.
const ALIGNMENT: usize = 16;
/// Tile halo thickness: the network's receptive-field radius rounded up to
/// the alignment.
const OVERLAP: usize = 32;
/// Default memory ceiling per element byte of the device tensor type.
const MAX_MEMORY_MB_PER_BYTE: usize = 600;

/// One per-engine model instance.
struct Instance {
    graph: Graph,
    input: OpId,
    output: OpId,
}

/// The tiled U-Net denoising filter.
///
/// See the crate docs for a usage sketch. Unknown parameter names on the
/// setters are logged and ignored; structural problems surface from
/// [`commit`](Self::commit).
pub struct UNetFilter {
    device: Arc<dyn Device>,

    // Parameters.
    color: Option<Image>,
    albedo: Option<Image>,
    normal: Option<Image>,
    output: Option<Image>,
    hdr: bool,
    srgb: bool,
    directional: bool,
    clean_aux: bool,
    input_scale: f32,
    max_memory_mb: usize,
    user_weights: Option<Weights>,
    progress: Progress,

    // Derived state, rebuilt by `init`.
    instances: Vec<Instance>,
    transfer: Option<Arc<TransferFunc>>,
    autoexposure: Option<AutoexposureOp>,
    image_copy: Option<ImageCopyOp>,
    output_temp: Option<Image>,
    grid: Option<TileGrid>,
    h: usize,
    w: usize,
    total_memory_byte_size: usize,
    inplace: bool,
    dirty: bool,
    dirty_param: bool,
}

impl UNetFilter {
    /// Creates an uncommitted filter on `device`.
    pub fn new(device: Arc<dyn Device>) -> Self {
        let max_memory_mb = MAX_MEMORY_MB_PER_BYTE * device.tensor_dtype().size_bytes();
        Self {
            device,
            color: None,
            albedo: None,
            normal: None,
            output: None,
            hdr: false,
            srgb: false,
            directional: false,
            clean_aux: false,
            input_scale: f32::NAN,
            max_memory_mb,
            user_weights: None,
            progress: Progress::default(),
            instances: Vec::new(),
            transfer: None,
            autoexposure: None,
            image_copy: None,
            output_temp: None,
            grid: None,
            h: 0,
            w: 0,
            total_memory_byte_size: 0,
            inplace: false,
            dirty: true,
            dirty_param: true,
        }
    }

    // ── Parameter surface ──────────────────────────────────────

    /// Sets or clears an image parameter: `"color"`, `"albedo"`,
    /// `"normal"`, or `"output"`.
    pub fn set_image(&mut self, name: &str, image: Option<Image>) {
        match name {
            "color" => self.color = image,
            "albedo" => self.albedo = image,
            "normal" => self.normal = image,
            "output" => self.output = image,
            _ => {
                tracing::warn!("unknown filter parameter or type mismatch: '{name}'");
                return;
            }
        }
        self.dirty = true;
        self.dirty_param = true;
    }

    /// Sets a float parameter: `"inputScale"` (alias `"hdrScale"`), where
    /// NaN requests automatic exposure estimation in HDR mode.
    pub fn set_float(&mut self, name: &str, value: f32) {
        match name {
            "inputScale" | "hdrScale" => {
                self.input_scale = value;
                self.dirty = true;
            }
            _ => tracing::warn!("unknown filter parameter or type mismatch: '{name}'"),
        }
    }

    /// Reads a float parameter back.
    pub fn get_float(&self, name: &str) -> Result<f32, FilterError> {
        match name {
            "inputScale" | "hdrScale" => Ok(self.input_scale),
            _ => Err(FilterError::InvalidArgument(format!(
                "unknown filter parameter or type mismatch: '{name}'"
            ))),
        }
    }

    /// Sets a boolean mode flag: `"hdr"`, `"srgb"`, `"directional"`, or
    /// `"cleanAux"`.
    pub fn set_bool(&mut self, name: &str, value: bool) {
        match name {
            "hdr" => self.hdr = value,
            "srgb" => self.srgb = value,
            "directional" => self.directional = value,
            "cleanAux" => self.clean_aux = value,
            _ => {
                tracing::warn!("unknown filter parameter or type mismatch: '{name}'");
                return;
            }
        }
        self.dirty = true;
        self.dirty_param = true;
    }

    /// Sets an integer parameter: `"maxMemoryMB"`.
    pub fn set_int(&mut self, name: &str, value: usize) {
        match name {
            "maxMemoryMB" => self.max_memory_mb = value,
            _ => {
                tracing::warn!("unknown filter parameter or type mismatch: '{name}'");
                return;
            }
        }
        self.dirty = true;
        self.dirty_param = true;
    }

    /// Supplies a user weight blob, overriding the built-in selection;
    /// `None` restores the built-ins.
    pub fn set_weights(&mut self, weights: Option<Weights>) {
        self.user_weights = weights;
        self.dirty = true;
        self.dirty_param = true;
    }

    /// Installs a progress callback; it receives the completed fraction and
    /// may request abortion by returning `false`.
    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress = Progress::new(Some(callback));
    }

    // ── Introspection ──────────────────────────────────────────

    /// The committed tile decomposition.
    pub fn tile_grid(&self) -> Option<&TileGrid> {
        self.grid.as_ref()
    }

    /// Whether the committed filter runs in place (output aliases an input).
    pub fn is_inplace(&self) -> bool {
        self.inplace
    }

    /// Whether in-place tiled filtering routed the output through a
    /// temporary image in engine-0 scratch.
    pub fn has_output_temp(&self) -> bool {
        self.output_temp.is_some()
    }

    /// Estimated total device memory of the committed model, in bytes.
    pub fn total_memory_byte_size(&self) -> usize {
        self.total_memory_byte_size
    }

    /// One-line description of the committed filter.
    pub fn summary(&self) -> String {
        match &self.grid {
            Some(grid) => format!(
                "UNetFilter: image {}x{}, tile {}x{}, count {}x{}, inplace {}, {:.1} MB",
                self.w,
                self.h,
                grid.tile_w,
                grid.tile_h,
                grid.count_w,
                grid.count_h,
                self.inplace,
                self.total_memory_byte_size as f64 / (1024.0 * 1024.0),
            ),
            None => "UNetFilter: not committed".to_string(),
        }
    }

    // ── Commit ─────────────────────────────────────────────────

    /// Validates parameters and (re)builds the model if anything relevant
    /// changed. Idempotent when nothing is dirty.
    pub fn commit(&mut self) -> Result<(), FilterError> {
        if !self.dirty && !self.dirty_param {
            return Ok(());
        }

        // In-place filtering is required when the output aliases an input.
        let inplace = match &self.output {
            Some(output) => {
                [&self.color, &self.albedo, &self.normal]
                    .into_iter()
                    .flatten()
                    .any(|input| output.overlaps(input))
            }
            None => false,
        };
        if inplace != self.inplace {
            self.inplace = inplace;
            self.dirty_param = true;
        }

        if self.dirty_param {
            // Drain in-flight work before tearing the model down, then
            // rebuild synchronously.
            self.device.wait()?;
            self.init()?;
            self.device.wait()?;
        }

        self.dirty = false;
        self.dirty_param = false;
        Ok(())
    }

    // ── Execute ────────────────────────────────────────────────

    /// Runs the committed filter over the whole image.
    ///
    /// With [`SyncMode::Async`] this returns once all work is submitted;
    /// kernel failures then surface at the next synchronization point.
    pub fn execute(&mut self, sync: SyncMode) -> Result<(), FilterError> {
        if self.dirty || self.dirty_param {
            return Err(FilterError::InvalidOperation(
                "changes to the filter are not committed".into(),
            ));
        }
        if self.h == 0 || self.w == 0 {
            return Ok(());
        }
        let grid = *self.grid.as_ref().expect("committed filter has a grid");
        let num_engines = self.device.num_engines();
        let engine0 = self.device.engine(0);

        let result = (|| -> Result<(), FilterError> {
            // Total work: all tiles, plus the autoexposure pre-pass and the
            // final copy when present.
            let auto_exposure_runs = self.hdr && self.input_scale.is_nan();
            let mut work_amount =
                grid.num_tiles() as f64 * self.instances[0].graph.work_amount();
            if auto_exposure_runs {
                work_amount += 1.0;
            }
            if self.output_temp.is_some() {
                work_amount += 1.0;
            }
            self.progress.start(work_amount)?;

            // Resolve the input scale.
            let transfer = self.transfer.as_ref().expect("committed filter has a transfer");
            if self.input_scale.is_nan() {
                if auto_exposure_runs {
                    let autoexposure = self
                        .autoexposure
                        .as_mut()
                        .expect("hdr filter has autoexposure");
                    autoexposure.set_src(
                        self.color.clone().expect("hdr filtering requires color"),
                    );
                    autoexposure.submit(&*engine0)?;
                    self.progress.update(1.0)?;
                    if num_engines > 1 {
                        // Other engines' input kernels are not ordered after
                        // the autoexposure kernel; drain so every engine
                        // observes the published scale.
                        engine0.wait()?;
                    }
                } else {
                    transfer.set_input_scale(1.0);
                }
            } else {
                transfer.set_input_scale(self.input_scale);
            }

            // Bind the images into every instance.
            let dst_image = self
                .output_temp
                .clone()
                .unwrap_or_else(|| self.output.clone().expect("committed filter has output"));
            for instance in &mut self.instances {
                instance
                    .graph
                    .input_process_mut(instance.input)
                    .expect("instance input op")
                    .set_images(self.color.clone(), self.albedo.clone(), self.normal.clone());
                instance
                    .graph
                    .output_process_mut(instance.output)
                    .expect("instance output op")
                    .set_dst_image(dst_image.clone());
            }

            // Walk the tile grid in row-major order, round-robining tiles
            // across engines.
            let (h, w) = (self.h, self.w);
            let instances = &mut self.instances;
            let progress = &self.progress;
            let mut tile_index = 0usize;
            for i in 0..grid.count_h {
                for j in 0..grid.count_w {
                    let rect = grid.tile_rect(i, j, h, w);
                    let instance = &mut instances[tile_index % num_engines];

                    instance
                        .graph
                        .input_process_mut(instance.input)
                        .expect("instance input op")
                        .set_tile(
                            rect.in_h,
                            rect.in_w,
                            rect.align_offset_h,
                            rect.align_offset_w,
                            rect.in_size_h,
                            rect.in_size_w,
                        );
                    instance
                        .graph
                        .output_process_mut(instance.output)
                        .expect("instance output op")
                        .set_tile(
                            rect.out_src_h,
                            rect.out_src_w,
                            rect.out_dst_h,
                            rect.out_dst_w,
                            rect.out_size_h,
                            rect.out_size_w,
                        );

                    instance.graph.run(progress)?;
                    tile_index += 1;
                }
            }

            // All tiles must land before the copy reads the temporary.
            self.device.submit_barrier();
            if let Some(image_copy) = &mut self.image_copy {
                image_copy.set_dst(self.output.clone().expect("committed filter has output"));
                image_copy.submit(&*engine0)?;
                self.progress.update(1.0)?;
            }
            self.progress.finish()?;
            Ok(())
        })();

        match result {
            Ok(()) => {}
            Err(FilterError::Aborted) => {
                // Stop submitting and drain what is already in flight.
                let _ = self.device.wait();
                return Err(FilterError::Aborted);
            }
            Err(other) => return Err(other),
        }

        if sync == SyncMode::Sync {
            self.device.wait()?;
        }
        Ok(())
    }

    // ── Model construction ─────────────────────────────────────

    /// Tears down and rebuilds the whole model: parameter validation, weight
    /// selection, transfer function, and tile planning.
    fn init(&mut self) -> Result<(), FilterError> {
        self.cleanup();
        self.check_params()?;

        let output = self.output.clone().expect("checked by check_params");
        self.h = output.h();
        self.w = output.w();
        if self.h == 0 || self.w == 0 {
            return Ok(());
        }

        let weights = match &self.user_weights {
            Some(user) => user.clone(),
            None => {
                let blob = select_blob(
                    self.color.is_some(),
                    self.albedo.is_some(),
                    self.normal.is_some(),
                    self.hdr,
                    self.directional,
                    self.clean_aux,
                )?;
                tracing::debug!(blob, "selected built-in weights");
                builtin_weights(
                    blob,
                    unet_input_channels(
                        self.color.is_some(),
                        self.albedo.is_some(),
                        self.normal.is_some(),
                    ),
                )
            }
        };

        let kind = if self.hdr {
            TransferKind::Pu
        } else if self.srgb || self.directional {
            TransferKind::Linear
        } else {
            TransferKind::Srgb
        };
        let transfer = Arc::new(TransferFunc::new(kind));

        let max_memory = self.max_memory_mb * 1024 * 1024;
        let (h, w) = (self.h, self.w);
        let num_engines = self.device.num_engines();
        let grid = plan_tiles(h, w, OVERLAP, ALIGNMENT, num_engines, max_memory, |grid, budget| {
            self.build_model(grid, budget, &weights, &transfer)
        })?;

        tracing::info!(
            image = format!("{w}x{h}"),
            tile = format!("{}x{}", grid.tile_w, grid.tile_h),
            count = format!("{}x{}", grid.count_w, grid.count_h),
            inplace = self.inplace,
            "filter initialized"
        );
        self.grid = Some(grid);
        self.transfer = Some(transfer);
        Ok(())
    }

    /// Attempts to build one graph per engine for the candidate grid within
    /// `budget` bytes. `Ok(false)` means "does not fit, subdivide further".
    fn build_model(
        &mut self,
        grid: &TileGrid,
        budget: Option<usize>,
        weights: &Weights,
        transfer: &Arc<TransferFunc>,
    ) -> Result<bool, FilterError> {
        self.reset_model();

        let input_c = unet_input_channels(
            self.color.is_some(),
            self.albedo.is_some(),
            self.normal.is_some(),
        );
        let snorm = self.directional || (self.color.is_none() && self.normal.is_some());
        let output = self.output.as_ref().expect("checked by check_params");
        let output_temp_desc = ImageDesc::new(output.format(), self.w, self.h);
        let num_engines = self.device.num_engines();

        let mut autoexposure = if self.hdr {
            let color = self.color.as_ref().ok_or_else(|| {
                FilterError::InvalidOperation("hdr filtering requires a color image".into())
            })?;
            Some(AutoexposureOp::new(*color.desc(), Arc::clone(transfer)))
        } else {
            None
        };

        for engine_index in 0..num_engines {
            let mut graph = Graph::new(self.device.clone(), engine_index, weights.clone());
            let input_dims = TensorDims::new(vec![input_c, grid.tile_h, grid.tile_w]);

            let input = graph.add_input_process(
                "input",
                &input_dims,
                ALIGNMENT,
                Arc::clone(transfer),
                self.hdr,
                snorm,
            )?;
            let enc0 = graph.add_conv("enc_conv0", input, Activation::ReLU, None)?;
            let pool1 = graph.add_conv("enc_conv1", enc0, Activation::ReLU, Some(PostOp::Pool))?;
            let pool2 = graph.add_conv("enc_conv2", pool1, Activation::ReLU, Some(PostOp::Pool))?;
            let pool3 = graph.add_conv("enc_conv3", pool2, Activation::ReLU, Some(PostOp::Pool))?;
            let pool4 = graph.add_conv("enc_conv4", pool3, Activation::ReLU, Some(PostOp::Pool))?;
            let enc5a = graph.add_conv("enc_conv5a", pool4, Activation::ReLU, None)?;
            let up4 =
                graph.add_conv("enc_conv5b", enc5a, Activation::ReLU, Some(PostOp::Upsample))?;
            let dec4a = graph.add_concat_conv("dec_conv4a", up4, pool3, Activation::ReLU)?;
            let up3 =
                graph.add_conv("dec_conv4b", dec4a, Activation::ReLU, Some(PostOp::Upsample))?;
            let dec3a = graph.add_concat_conv("dec_conv3a", up3, pool2, Activation::ReLU)?;
            let up2 =
                graph.add_conv("dec_conv3b", dec3a, Activation::ReLU, Some(PostOp::Upsample))?;
            let dec2a = graph.add_concat_conv("dec_conv2a", up2, pool1, Activation::ReLU)?;
            let up1 =
                graph.add_conv("dec_conv2b", dec2a, Activation::ReLU, Some(PostOp::Upsample))?;
            let dec1a = graph.add_concat_conv("dec_conv1a", up1, input, Activation::ReLU)?;
            let dec1b = graph.add_conv("dec_conv1b", dec1a, Activation::ReLU, None)?;
            let dec0 = graph.add_conv("dec_conv0", dec1b, Activation::None, None)?;
            let output_op = graph.add_output_process(
                "output",
                dec0,
                Arc::clone(transfer),
                self.hdr,
                snorm,
            )?;

            if !graph.is_supported() {
                self.reset_model();
                return Ok(false);
            }

            let graph_scratch = graph.scratch_aligned_size();
            let mut scratch_byte_size = graph_scratch;

            // Engine 0 additionally hosts the global ops: autoexposure
            // scratch and, for in-place tiled filtering, the temporary
            // output image above the graph scratch.
            let mut output_temp_offset = None;
            if engine_index == 0 {
                if let Some(autoexposure) = &autoexposure {
                    scratch_byte_size = scratch_byte_size.max(autoexposure.scratch_aligned_size());
                }
                if self.inplace && grid.num_tiles() > 1 {
                    output_temp_offset = Some(scratch_byte_size);
                    scratch_byte_size += output_temp_desc.aligned_byte_size();
                }

                let total = scratch_byte_size
                    + graph.const_byte_size()
                    + (graph_scratch + graph.const_byte_size()) * (num_engines - 1);
                if let Some(budget) = budget {
                    if total > budget {
                        self.reset_model();
                        return Ok(false);
                    }
                }
                self.total_memory_byte_size = total;
            }

            let scratch = self.device.engine(engine_index).new_buffer(scratch_byte_size)?;
            graph.set_scratch(scratch.clone())?;
            if engine_index == 0 {
                if let Some(autoexposure) = &mut autoexposure {
                    autoexposure.set_scratch(scratch.clone());
                }
            }
            graph.finalize()?;

            if let Some(offset) = output_temp_offset {
                self.output_temp = Some(Image::view(scratch, output_temp_desc, offset)?);
            }

            self.instances.push(Instance {
                graph,
                input,
                output: output_op,
            });
        }

        if let Some(autoexposure) = &autoexposure {
            autoexposure.finalize()?;
        }
        self.autoexposure = autoexposure;

        if let Some(output_temp) = &self.output_temp {
            let mut image_copy = ImageCopyOp::new();
            image_copy.set_src(output_temp.clone());
            self.image_copy = Some(image_copy);
        }

        tracing::debug!(
            bytes = self.total_memory_byte_size,
            tiles = grid.num_tiles(),
            "model built"
        );
        Ok(true)
    }

    fn reset_model(&mut self) {
        self.instances.clear();
        self.autoexposure = None;
        self.image_copy = None;
        self.output_temp = None;
        self.total_memory_byte_size = 0;
    }

    fn cleanup(&mut self) {
        self.reset_model();
        self.transfer = None;
        self.grid = None;
        self.h = 0;
        self.w = 0;
    }

    fn check_params(&self) -> Result<(), FilterError> {
        if self.color.is_none() && self.albedo.is_none() && self.normal.is_none() {
            return Err(FilterError::InvalidOperation(
                "input image not specified".into(),
            ));
        }
        let output = self.output.as_ref().ok_or_else(|| {
            FilterError::InvalidOperation("output image not specified".into())
        })?;

        let mut input_format = None;
        for image in [&self.color, &self.albedo, &self.normal]
            .into_iter()
            .flatten()
        {
            match input_format {
                None => input_format = Some(image.format()),
                Some(format) if format == image.format() => {}
                Some(_) => {
                    return Err(FilterError::InvalidOperation(
                        "unsupported combination of input image formats".into(),
                    ))
                }
            }
            if image.h() != output.h() || image.w() != output.w() {
                return Err(FilterError::InvalidOperation("image size mismatch".into()));
            }
        }

        if self.directional && (self.hdr || self.srgb) {
            return Err(FilterError::InvalidOperation(
                "directional and hdr/srgb modes cannot be enabled at the same time".into(),
            ));
        }
        if self.hdr && self.srgb {
            return Err(FilterError::InvalidOperation(
                "hdr and srgb modes cannot be enabled at the same time".into(),
            ));
        }
        Ok(())
    }
}
