// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Portable CPU reference backend.
//!
//! One worker thread per engine drains a FIFO queue of [`Kernel`]s. A
//! submitted kernel runs asynchronously; errors are parked and surfaced at
//! the next `wait`. [`Device::submit_barrier`] enqueues a shared
//! [`std::sync::Barrier`] on every engine, so later submissions on any
//! engine run strictly after earlier submissions on all engines.
//!
//! The kernels themselves are straightforward portable loops — correct and
//! cache-friendly, not SIMD-optimized.

mod kernels;

use crate::{Buffer, Device, Engine, EngineError, Kernel, PostOp};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Condvar, Mutex};
use tensor_core::{DType, TensorLayout};

/// Construction options for [`CpuDevice`].
#[derive(Debug, Clone)]
pub struct CpuDeviceOptions {
    /// Number of worker engines (each with its own submission queue).
    pub num_engines: usize,
    /// Feature-map layout: [`TensorLayout::chw`] or [`TensorLayout::hwc`].
    pub tensor_layout: TensorLayout,
    /// Whether convolutions accept fused pool/upsample post-ops. Off by
    /// default; the graph builder then splits fused requests.
    pub fused_conv: bool,
}

impl Default for CpuDeviceOptions {
    fn default() -> Self {
        Self {
            num_engines: 1,
            tensor_layout: TensorLayout::chw,
            fused_conv: false,
        }
    }
}

/// The CPU reference device.
pub struct CpuDevice {
    engines: Vec<Arc<CpuEngine>>,
    tensor_layout: TensorLayout,
    weight_layout: TensorLayout,
    fused_conv: bool,
}

impl CpuDevice {
    /// Creates a device with `num_engines` engines and default options.
    pub fn new(num_engines: usize) -> Arc<Self> {
        Self::with_options(CpuDeviceOptions {
            num_engines,
            ..Default::default()
        })
        .expect("default options are valid")
    }

    /// Creates a device from explicit options.
    pub fn with_options(options: CpuDeviceOptions) -> Result<Arc<Self>, EngineError> {
        let weight_layout = match options.tensor_layout {
            TensorLayout::chw => TensorLayout::oihw,
            TensorLayout::hwc => TensorLayout::ohwi,
            other => {
                return Err(EngineError::Kernel {
                    kernel: "device",
                    detail: format!("unsupported cpu tensor layout {other}"),
                })
            }
        };
        let num_engines = options.num_engines.max(1);
        let engines = (0..num_engines).map(CpuEngine::spawn).collect();
        tracing::debug!(
            num_engines,
            layout = %options.tensor_layout,
            fused_conv = options.fused_conv,
            "cpu device created"
        );
        Ok(Arc::new(Self {
            engines,
            tensor_layout: options.tensor_layout,
            weight_layout,
            fused_conv: options.fused_conv,
        }))
    }
}

impl Device for CpuDevice {
    fn tensor_layout(&self) -> TensorLayout {
        self.tensor_layout
    }

    fn weight_layout(&self) -> TensorLayout {
        self.weight_layout
    }

    fn tensor_dtype(&self) -> DType {
        DType::F32
    }

    fn tensor_block_c(&self) -> usize {
        1
    }

    fn is_conv_post_op_supported(&self, _post_op: PostOp) -> bool {
        self.fused_conv
    }

    fn num_engines(&self) -> usize {
        self.engines.len()
    }

    fn engine(&self, index: usize) -> Arc<dyn Engine> {
        self.engines[index].clone()
    }

    fn submit_barrier(&self) {
        let barrier = Arc::new(Barrier::new(self.engines.len()));
        for engine in &self.engines {
            engine.submit_task(Task::Barrier(Arc::clone(&barrier)));
        }
    }

    fn wait(&self) -> Result<(), EngineError> {
        // Drain everything first, then surface the first error.
        let mut first_error = None;
        for engine in &self.engines {
            if let Err(e) = engine.wait() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

enum Task {
    Kernel(Kernel),
    Barrier(Arc<Barrier>),
}

struct EngineShared {
    pending: Mutex<usize>,
    idle: Condvar,
    error: Mutex<Option<EngineError>>,
}

/// One FIFO submission stream backed by a worker thread.
pub struct CpuEngine {
    sender: Mutex<mpsc::Sender<Task>>,
    shared: Arc<EngineShared>,
}

impl CpuEngine {
    fn spawn(index: usize) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let shared = Arc::new(EngineShared {
            pending: Mutex::new(0),
            idle: Condvar::new(),
            error: Mutex::new(None),
        });
        let worker_shared = Arc::clone(&shared);

        std::thread::Builder::new()
            .name(format!("cpu-engine-{index}"))
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    match task {
                        Task::Kernel(kernel) => {
                            let name = kernel.name();
                            // Skip further work once a kernel has failed; the
                            // error surfaces at the next synchronization.
                            let failed = worker_shared
                                .error
                                .lock()
                                .expect("error lock poisoned")
                                .is_some();
                            if !failed {
                                if let Err(e) = kernels::execute(kernel) {
                                    tracing::error!("kernel '{name}' failed: {e}");
                                    *worker_shared.error.lock().expect("error lock poisoned") =
                                        Some(e);
                                }
                            }
                        }
                        Task::Barrier(barrier) => {
                            barrier.wait();
                        }
                    }
                    let mut pending =
                        worker_shared.pending.lock().expect("pending lock poisoned");
                    *pending -= 1;
                    if *pending == 0 {
                        worker_shared.idle.notify_all();
                    }
                }
            })
            .expect("failed to spawn engine worker");

        Arc::new(Self {
            sender: Mutex::new(sender),
            shared,
        })
    }

    fn submit_task(&self, task: Task) {
        {
            let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
            *pending += 1;
        }
        let result = self
            .sender
            .lock()
            .expect("sender lock poisoned")
            .send(task);
        if result.is_err() {
            // Worker is gone; undo the accounting and park the error.
            let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
            *pending -= 1;
            self.shared
                .error
                .lock()
                .expect("error lock poisoned")
                .get_or_insert(EngineError::Disconnected);
        }
    }
}

impl Engine for CpuEngine {
    fn new_buffer(&self, byte_size: usize) -> Result<Buffer, EngineError> {
        Ok(Buffer::new(byte_size))
    }

    fn submit(&self, kernel: Kernel) -> Result<(), EngineError> {
        self.submit_task(Task::Kernel(kernel));
        Ok(())
    }

    fn wait(&self) -> Result<(), EngineError> {
        let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
        while *pending > 0 {
            pending = self
                .shared
                .idle
                .wait(pending)
                .expect("pending lock poisoned");
        }
        drop(pending);
        match self
            .shared
            .error
            .lock()
            .expect("error lock poisoned")
            .take()
        {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
