//! An in-memory [`ComputeBackend`] that records every call.
//!
//! Used by the unit tests and the demo binary to inspect the exact command
//! stream, descriptor contents and pool usage without a GPU. Outside of the
//! crate's own tests it is only built with the `testing` feature.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    mem::size_of,
};

use parking_lot::Mutex;

use crate::{
    backend::{ComputeBackend, DescriptorWrite, ImageBarrier, PipelineStage},
    resources::{
        BindingSlots, ClearPipeline, ComputeResources, DISTORTION_IMAGES_PER_VIEW,
        DistortionPipelines, DistortionResources, LayerPipelines, RenderResources, Samplers,
    },
    timewarp::Fov,
    uniform::{DistortionUboData, MAX_VIEWS, NormalizedRect, UniformBuffer},
};

/// Opaque handle minted by [`RecordingBackend::create_handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MockHandle(pub u64);

/// Host operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `allocate_descriptor_set`.
    AllocateDescriptorSet,
    /// `reset_command_pool`.
    ResetCommandPool,
    /// `begin_command_buffer`.
    BeginCommandBuffer,
    /// `end_command_buffer`.
    EndCommandBuffer,
}

/// Errors produced by [`RecordingBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MockError {
    /// The operation was configured to fail with [`RecordingBackend::fail_on`].
    #[error("injected failure at {0:?}")]
    Injected(FailPoint),
    /// The pool's capacity set by [`RecordingBackend::set_pool_capacity`] is used up.
    #[error("descriptor pool {0:?} is out of memory")]
    OutOfPoolMemory(MockHandle),
}

/// One array element of a descriptor binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundResource {
    /// Combined image sampler.
    SampledImage {
        /// Sampler handle.
        sampler: MockHandle,
        /// Image view handle.
        view: MockHandle,
    },
    /// Storage image view.
    StorageImage(MockHandle),
    /// Uniform buffer.
    UniformBuffer(MockHandle),
}

/// One binding of a recorded descriptor update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    /// Binding slot.
    pub binding: u32,
    /// Elements written, starting at zero.
    pub resources: Vec<BoundResource>,
}

/// A backend call, in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    /// Batched descriptor update.
    UpdateDescriptorSet {
        /// Target set.
        set: MockHandle,
        /// Writes in call order.
        writes: Vec<RecordedWrite>,
    },
    /// Command pool reset.
    ResetCommandPool(MockHandle),
    /// Command buffer opened.
    BeginCommandBuffer(MockHandle),
    /// Command buffer closed.
    EndCommandBuffer(MockHandle),
    /// Query reset.
    ResetQueryPool {
        /// Query pool.
        pool: MockHandle,
        /// First query.
        first: u32,
        /// Number of queries.
        count: u32,
    },
    /// Timestamp write.
    WriteTimestamp {
        /// Stage the timestamp waits for.
        stage: PipelineStage,
        /// Query pool.
        pool: MockHandle,
        /// Query index.
        query: u32,
    },
    /// Image barrier.
    ImageBarrier(ImageBarrier<MockHandle>),
    /// Pipeline bind.
    BindPipeline(MockHandle),
    /// Descriptor set bind.
    BindDescriptorSet {
        /// Pipeline layout.
        layout: MockHandle,
        /// Descriptor set.
        set: MockHandle,
    },
    /// Dispatch with group counts.
    Dispatch {
        /// Groups along x.
        x: u32,
        /// Groups along y.
        y: u32,
        /// Groups along z.
        z: u32,
    },
}

#[derive(Default)]
struct State {
    next_handle: u64,
    commands: Vec<RecordedCommand>,
    recording: Option<MockHandle>,
    failures: HashSet<FailPoint>,
    pool_capacity: HashMap<MockHandle, usize>,
    allocated: HashMap<MockHandle, Vec<MockHandle>>,
    sets: HashMap<MockHandle, BTreeMap<u32, Vec<BoundResource>>>,
}

impl State {
    fn fail(&self, point: FailPoint) -> Result<(), MockError> {
        if self.failures.contains(&point) {
            Err(MockError::Injected(point))
        } else {
            Ok(())
        }
    }

    fn record(&mut self, command: RecordedCommand) {
        assert!(
            self.recording.is_some(),
            "{command:?} recorded outside of begin/end"
        );
        self.commands.push(command);
    }
}

/// Records calls instead of talking to a GPU.
#[derive(Default)]
pub struct RecordingBackend {
    state: Mutex<State>,
}

impl RecordingBackend {
    /// Creates a backend with unlimited pools and no injected failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a fresh handle.
    pub fn create_handle(&self) -> MockHandle {
        let mut state = self.state.lock();
        state.next_handle += 1;
        MockHandle(state.next_handle)
    }

    /// Makes `point` fail until [`RecordingBackend::clear_failures`].
    pub fn fail_on(&self, point: FailPoint) {
        self.state.lock().failures.insert(point);
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Limits how many sets `pool` can hold at once.
    pub fn set_pool_capacity(&self, pool: MockHandle, capacity: usize) {
        self.state.lock().pool_capacity.insert(pool, capacity);
    }

    /// Number of sets currently allocated from `pool`.
    pub fn allocated_descriptor_sets(&self, pool: MockHandle) -> usize {
        self.state.lock().allocated.get(&pool).map_or(0, Vec::len)
    }

    /// Snapshot of the recorded calls.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.state.lock().commands.clone()
    }

    /// Forgets every recorded call.
    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Current contents of `set`, keyed by binding slot.
    pub fn descriptor_set_contents(&self, set: MockHandle) -> BTreeMap<u32, Vec<BoundResource>> {
        self.state.lock().sets.get(&set).cloned().unwrap_or_default()
    }

    /// Returns `true` while a command buffer is open.
    pub fn is_recording(&self) -> bool {
        self.state.lock().recording.is_some()
    }
}

impl ComputeBackend for RecordingBackend {
    type Image = MockHandle;
    type ImageView = MockHandle;
    type Sampler = MockHandle;
    type Buffer = MockHandle;
    type Pipeline = MockHandle;
    type PipelineLayout = MockHandle;
    type DescriptorSetLayout = MockHandle;
    type DescriptorPool = MockHandle;
    type DescriptorSet = MockHandle;
    type CommandPool = MockHandle;
    type CommandBuffer = MockHandle;
    type QueryPool = MockHandle;
    type Mapping = Vec<u8>;
    type Error = MockError;

    fn allocate_descriptor_set(
        &self,
        pool: MockHandle,
        _layout: MockHandle,
    ) -> Result<MockHandle, MockError> {
        let mut state = self.state.lock();
        state.fail(FailPoint::AllocateDescriptorSet)?;

        let in_use = state.allocated.get(&pool).map_or(0, Vec::len);
        if state
            .pool_capacity
            .get(&pool)
            .is_some_and(|&capacity| in_use >= capacity)
        {
            return Err(MockError::OutOfPoolMemory(pool));
        }

        state.next_handle += 1;
        let set = MockHandle(state.next_handle);
        state.allocated.entry(pool).or_default().push(set);
        state.sets.insert(set, BTreeMap::new());
        Ok(set)
    }

    fn reset_descriptor_pool(&self, pool: MockHandle) -> Result<(), MockError> {
        let mut state = self.state.lock();
        let freed = state.allocated.remove(&pool).unwrap_or_default();
        for set in freed {
            state.sets.remove(&set);
        }
        Ok(())
    }

    fn update_descriptor_set(&self, set: MockHandle, writes: &[DescriptorWrite<'_, Self>]) {
        let recorded: Vec<RecordedWrite> = writes
            .iter()
            .map(|write| RecordedWrite {
                binding: write.binding(),
                resources: match write {
                    DescriptorWrite::SampledImages { images, .. } => images
                        .iter()
                        .map(|image| BoundResource::SampledImage {
                            sampler: image.sampler,
                            view: image.view,
                        })
                        .collect(),
                    DescriptorWrite::StorageImage { view, .. } => {
                        vec![BoundResource::StorageImage(*view)]
                    }
                    DescriptorWrite::UniformBuffer { buffer, .. } => {
                        vec![BoundResource::UniformBuffer(*buffer)]
                    }
                },
            })
            .collect();

        let mut state = self.state.lock();
        let contents = state
            .sets
            .get_mut(&set)
            .unwrap_or_else(|| panic!("{set:?} is not an allocated descriptor set"));
        // Like the real API, a write only replaces the elements it covers.
        for write in &recorded {
            let slot = contents.entry(write.binding).or_default();
            for (i, resource) in write.resources.iter().enumerate() {
                if i < slot.len() {
                    slot[i] = *resource;
                } else {
                    slot.push(*resource);
                }
            }
        }

        state.commands.push(RecordedCommand::UpdateDescriptorSet {
            set,
            writes: recorded,
        });
    }

    fn reset_command_pool(&self, pool: MockHandle) -> Result<(), MockError> {
        let mut state = self.state.lock();
        state.fail(FailPoint::ResetCommandPool)?;
        state.recording = None;
        state.commands.push(RecordedCommand::ResetCommandPool(pool));
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: MockHandle) -> Result<(), MockError> {
        let mut state = self.state.lock();
        state.fail(FailPoint::BeginCommandBuffer)?;
        assert!(state.recording.is_none(), "{cmd:?} is already recording");
        state.recording = Some(cmd);
        state.commands.push(RecordedCommand::BeginCommandBuffer(cmd));
        Ok(())
    }

    fn end_command_buffer(&self, cmd: MockHandle) -> Result<(), MockError> {
        let mut state = self.state.lock();
        state.fail(FailPoint::EndCommandBuffer)?;
        assert_eq!(state.recording, Some(cmd), "{cmd:?} is not recording");
        state.recording = None;
        state.commands.push(RecordedCommand::EndCommandBuffer(cmd));
        Ok(())
    }

    fn cmd_reset_query_pool(&self, _cmd: MockHandle, pool: MockHandle, first: u32, count: u32) {
        self.state
            .lock()
            .record(RecordedCommand::ResetQueryPool { pool, first, count });
    }

    fn cmd_write_timestamp(
        &self,
        _cmd: MockHandle,
        stage: PipelineStage,
        pool: MockHandle,
        query: u32,
    ) {
        self.state
            .lock()
            .record(RecordedCommand::WriteTimestamp { stage, pool, query });
    }

    fn cmd_image_barrier(&self, _cmd: MockHandle, barrier: &ImageBarrier<MockHandle>) {
        self.state
            .lock()
            .record(RecordedCommand::ImageBarrier(*barrier));
    }

    fn cmd_bind_pipeline(&self, _cmd: MockHandle, pipeline: MockHandle) {
        self.state
            .lock()
            .record(RecordedCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_set(&self, _cmd: MockHandle, layout: MockHandle, set: MockHandle) {
        self.state
            .lock()
            .record(RecordedCommand::BindDescriptorSet { layout, set });
    }

    fn cmd_dispatch(&self, _cmd: MockHandle, x: u32, y: u32, z: u32) {
        self.state
            .lock()
            .record(RecordedCommand::Dispatch { x, y, z });
    }
}

/// Builds a complete set of resources on a [`RecordingBackend`], with fresh
/// handles everywhere and zeroed uniform mappings.
pub fn mock_resources(view_count: u32) -> RenderResources<RecordingBackend> {
    let backend = RecordingBackend::new();
    let h = || backend.create_handle();
    let ubo = || UniformBuffer::new(h(), vec![0u8; size_of::<DistortionUboData>()]);

    let fov = Fov::symmetric(0.8, 0.75);
    RenderResources {
        view_count,
        cmd_pool: h(),
        cmd: h(),
        query_pool: h(),
        samplers: Samplers {
            clamp_to_edge: h(),
            mock: h(),
        },
        mock_color_view: h(),
        distortion: DistortionResources {
            uv_to_tanangle: [NormalizedRect::uv_to_tangent_lengths(&fov); MAX_VIEWS],
            image_views: std::array::from_fn::<_, { DISTORTION_IMAGES_PER_VIEW * MAX_VIEWS }, _>(
                |_| h(),
            ),
        },
        compute: ComputeResources {
            descriptor_pool: h(),
            bindings: BindingSlots::default(),
            layer: LayerPipelines {
                descriptor_set_layout: h(),
                pipeline_layout: h(),
                non_timewarp_pipeline: h(),
                timewarp_pipeline: h(),
            },
            distortion: DistortionPipelines {
                descriptor_set_layout: h(),
                pipeline_layout: h(),
                pipeline: h(),
                timewarp_pipeline: h(),
                ubo: ubo(),
            },
            clear: ClearPipeline {
                pipeline: h(),
                ubo: ubo(),
            },
        },
        backend,
    }
}
