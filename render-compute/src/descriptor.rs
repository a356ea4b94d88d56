//! Descriptor set contents for the three binding shapes the compute shaders
//! declare.
//!
//! Every update rewrites all slots of its shape in one batched call. Callers
//! pass the complete set of images valid for the pass; nothing from an
//! earlier update is relied upon.

use crate::{
    backend::{ComputeBackend, DescriptorWrite, SampledImage},
    bounded::BoundedVec,
    resources::{BindingSlots, DISTORTION_IMAGES_PER_VIEW, MAX_IMAGES},
    uniform::MAX_VIEWS,
};

/// Source images for one layer dispatch.
pub type LayerImages<B> = BoundedVec<SampledImage<B>, MAX_IMAGES>;

/// One source image per view.
pub type ViewImages<B> = BoundedVec<SampledImage<B>, MAX_VIEWS>;

/// Distortion lookup images, [`DISTORTION_IMAGES_PER_VIEW`] per view.
pub type DistortionImages<B> =
    BoundedVec<SampledImage<B>, { DISTORTION_IMAGES_PER_VIEW * MAX_VIEWS }>;

/// Writes the layer shape: `sources`, the storage `target` and `ubo`.
///
/// # Panics
///
/// Panics if `sources` is empty.
pub fn update_compute_layer_descriptor_set<B: ComputeBackend>(
    backend: &B,
    bindings: &BindingSlots,
    sources: &LayerImages<B>,
    target: B::ImageView,
    ubo: B::Buffer,
    set: B::DescriptorSet,
) {
    assert!(
        !sources.is_empty(),
        "layer descriptor set needs at least one source image"
    );

    let writes = [
        DescriptorWrite::SampledImages {
            binding: bindings.src,
            images: sources.as_slice(),
        },
        DescriptorWrite::StorageImage {
            binding: bindings.target,
            view: target,
        },
        DescriptorWrite::UniformBuffer {
            binding: bindings.ubo,
            buffer: ubo,
        },
    ];

    backend.update_descriptor_set(set, &writes);
}

/// Writes the shared distortion shape: per-view `sources`, their
/// `distortion` lookups, the storage `target` and `ubo`.
///
/// # Panics
///
/// Panics unless there are exactly [`DISTORTION_IMAGES_PER_VIEW`] distortion
/// images per source.
pub fn update_compute_shared_descriptor_set<B: ComputeBackend>(
    backend: &B,
    bindings: &BindingSlots,
    sources: &ViewImages<B>,
    distortion: &DistortionImages<B>,
    target: B::ImageView,
    ubo: B::Buffer,
    set: B::DescriptorSet,
) {
    assert_eq!(
        distortion.len(),
        DISTORTION_IMAGES_PER_VIEW * sources.len(),
        "distortion images must cover every channel of every view"
    );

    let writes = [
        DescriptorWrite::SampledImages {
            binding: bindings.src,
            images: sources.as_slice(),
        },
        DescriptorWrite::SampledImages {
            binding: bindings.distortion,
            images: distortion.as_slice(),
        },
        DescriptorWrite::StorageImage {
            binding: bindings.target,
            view: target,
        },
        DescriptorWrite::UniformBuffer {
            binding: bindings.ubo,
            buffer: ubo,
        },
    ];

    backend.update_descriptor_set(set, &writes);
}

/// Writes only the storage `target` and `ubo`, for sets whose sampled
/// bindings are already current.
pub fn update_compute_descriptor_set_target<B: ComputeBackend>(
    backend: &B,
    bindings: &BindingSlots,
    target: B::ImageView,
    ubo: B::Buffer,
    set: B::DescriptorSet,
) {
    let writes = [
        DescriptorWrite::StorageImage {
            binding: bindings.target,
            view: target,
        },
        DescriptorWrite::UniformBuffer {
            binding: bindings.ubo,
            buffer: ubo,
        },
    ];

    backend.update_descriptor_set(set, &writes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BoundResource, MockHandle, RecordedCommand, RecordingBackend};

    fn sampled(backend: &RecordingBackend) -> SampledImage<RecordingBackend> {
        SampledImage::new(backend.create_handle(), backend.create_handle())
    }

    fn allocated_set(backend: &RecordingBackend) -> MockHandle {
        backend
            .allocate_descriptor_set(backend.create_handle(), backend.create_handle())
            .unwrap()
    }

    #[test]
    fn layer_shape_binds_exactly_n_images() {
        let backend = RecordingBackend::new();
        let slots = BindingSlots::default();
        let set = allocated_set(&backend);
        let target = backend.create_handle();
        let ubo = backend.create_handle();

        for n in [1usize, 5, MAX_IMAGES] {
            backend.clear_commands();
            let sources =
                LayerImages::try_from_iter((0..n).map(|_| sampled(&backend))).unwrap();
            update_compute_layer_descriptor_set(&backend, &slots, &sources, target, ubo, set);

            let commands = backend.commands();
            assert_eq!(commands.len(), 1, "one batched update");
            let RecordedCommand::UpdateDescriptorSet { writes, .. } = &commands[0] else {
                panic!("expected a descriptor update, got {:?}", commands[0]);
            };
            assert_eq!(writes.len(), 3);

            let images: usize = writes
                .iter()
                .filter(|w| w.binding == slots.src)
                .map(|w| w.resources.len())
                .sum();
            assert_eq!(images, n);
            assert_eq!(
                writes
                    .iter()
                    .filter(|w| matches!(w.resources.as_slice(), [BoundResource::StorageImage(_)]))
                    .count(),
                1
            );
            assert_eq!(
                writes
                    .iter()
                    .filter(|w| matches!(w.resources.as_slice(), [BoundResource::UniformBuffer(_)]))
                    .count(),
                1
            );
        }
    }

    #[test]
    fn shared_shape_binds_three_lookups_per_view() {
        let backend = RecordingBackend::new();
        let slots = BindingSlots::default();
        let set = allocated_set(&backend);

        let sources = ViewImages::try_from_iter((0..2).map(|_| sampled(&backend))).unwrap();
        let distortion =
            DistortionImages::try_from_iter((0..6).map(|_| sampled(&backend))).unwrap();
        update_compute_shared_descriptor_set(
            &backend,
            &slots,
            &sources,
            &distortion,
            backend.create_handle(),
            backend.create_handle(),
            set,
        );

        let contents = backend.descriptor_set_contents(set);
        assert_eq!(contents[&slots.src].len(), 2);
        assert_eq!(contents[&slots.distortion].len(), 6);
        assert_eq!(contents[&slots.target].len(), 1);
        assert_eq!(contents[&slots.ubo].len(), 1);
    }

    #[test]
    #[should_panic(expected = "every channel of every view")]
    fn shared_shape_rejects_mismatched_lookups() {
        let backend = RecordingBackend::new();
        let sources = ViewImages::try_from_iter((0..2).map(|_| sampled(&backend))).unwrap();
        let distortion =
            DistortionImages::try_from_iter((0..3).map(|_| sampled(&backend))).unwrap();
        update_compute_shared_descriptor_set(
            &backend,
            &BindingSlots::default(),
            &sources,
            &distortion,
            backend.create_handle(),
            backend.create_handle(),
            backend.create_handle(),
        );
    }

    #[test]
    fn target_only_shape_keeps_sampled_bindings() {
        let backend = RecordingBackend::new();
        let slots = BindingSlots::default();
        let set = allocated_set(&backend);

        let sources = LayerImages::try_from_iter((0..3).map(|_| sampled(&backend))).unwrap();
        update_compute_layer_descriptor_set(
            &backend,
            &slots,
            &sources,
            backend.create_handle(),
            backend.create_handle(),
            set,
        );

        let new_target = backend.create_handle();
        let new_ubo = backend.create_handle();
        update_compute_descriptor_set_target(&backend, &slots, new_target, new_ubo, set);

        let contents = backend.descriptor_set_contents(set);
        assert_eq!(contents[&slots.src].len(), 3);
        assert_eq!(
            contents[&slots.target],
            vec![BoundResource::StorageImage(new_target)]
        );
        assert_eq!(
            contents[&slots.ubo],
            vec![BoundResource::UniformBuffer(new_ubo)]
        );
    }

    #[test]
    #[should_panic(expected = "at least one source image")]
    fn layer_shape_rejects_empty_sources() {
        let backend = RecordingBackend::new();
        update_compute_layer_descriptor_set(
            &backend,
            &BindingSlots::default(),
            &LayerImages::new(),
            backend.create_handle(),
            backend.create_handle(),
            allocated_set(&backend),
        );
    }

    #[test]
    fn update_lands_in_the_allocated_set_only() {
        let backend = RecordingBackend::new();
        let set = allocated_set(&backend);
        let sources = LayerImages::try_from_iter([sampled(&backend)]).unwrap();
        update_compute_layer_descriptor_set(
            &backend,
            &BindingSlots::default(),
            &sources,
            backend.create_handle(),
            backend.create_handle(),
            set,
        );
        assert_eq!(backend.descriptor_set_contents(set).len(), 3);
        assert!(backend.descriptor_set_contents(backend.create_handle()).is_empty());
    }

    #[test]
    fn too_many_layer_images_is_rejected() {
        let backend = RecordingBackend::new();
        let err = LayerImages::try_from_iter((0..MAX_IMAGES + 1).map(|_| sampled(&backend)))
            .unwrap_err();
        assert_eq!(err.capacity, MAX_IMAGES);
    }
}
