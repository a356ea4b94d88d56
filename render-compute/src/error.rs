//! Errors reported by the compute context.

use thiserror::Error;

/// A backend call failed while attaching or recording.
///
/// `E` is the backend's own error type, kept as the source.
#[derive(Debug, Error)]
pub enum ComputeError<E: std::error::Error + 'static> {
    /// Allocating a descriptor set from the compute pool failed.
    #[error("failed to allocate the {what} descriptor set")]
    DescriptorAllocation {
        /// Which set was being allocated.
        what: &'static str,
        /// Backend error.
        #[source]
        source: E,
    },
    /// Resetting the command pool at the start of a frame failed.
    #[error("failed to reset the command pool")]
    ResetCommandPool(#[source] E),
    /// Opening the command buffer failed.
    #[error("failed to begin the command buffer")]
    BeginCommandBuffer(#[source] E),
    /// Closing the command buffer failed.
    #[error("failed to end the command buffer")]
    EndCommandBuffer(#[source] E),
}
