//! Fixed-capacity containers for per-view and per-image argument lists.
//!
//! Anything the GPU side sizes at compile time (descriptor array lengths, view
//! counts) is carried in a [`BoundedVec`], which refuses to grow past its
//! capacity instead of silently spilling.

use std::ops::Deref;

use smallvec::SmallVec;

/// Returned when an operation would push a [`BoundedVec`] past its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{requested} elements requested but capacity is {capacity}")]
pub struct CapacityError {
    /// Number of elements the caller tried to store.
    pub requested: usize,
    /// Compile-time capacity of the container.
    pub capacity: usize,
}

/// A vector with a hard upper bound of `N` elements, stored inline.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedVec<T, const N: usize> {
    items: SmallVec<[T; N]>,
}

impl<T, const N: usize> Default for BoundedVec<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> BoundedVec<T, N> {
    /// The maximum number of elements.
    pub const CAPACITY: usize = N;

    /// Creates an empty container.
    pub fn new() -> Self {
        Self {
            items: SmallVec::new(),
        }
    }

    /// Appends `value`, failing if the container is already full.
    pub fn try_push(&mut self, value: T) -> Result<(), CapacityError> {
        if self.items.len() >= N {
            return Err(CapacityError {
                requested: self.items.len() + 1,
                capacity: N,
            });
        }
        self.items.push(value);
        Ok(())
    }

    /// Collects an iterator, failing if it yields more than `N` elements.
    pub fn try_from_iter<I>(iter: I) -> Result<Self, CapacityError>
    where
        I: IntoIterator<Item = T>,
    {
        let mut out = Self::new();
        let mut iter = iter.into_iter();
        for value in iter.by_ref() {
            if let Err(mut err) = out.try_push(value) {
                err.requested += iter.count();
                return Err(err);
            }
        }
        Ok(out)
    }

    /// Returns the stored elements.
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<T: Clone, const N: usize> BoundedVec<T, N> {
    /// Copies `slice`, failing if it is longer than `N`.
    pub fn try_from_slice(slice: &[T]) -> Result<Self, CapacityError> {
        if slice.len() > N {
            return Err(CapacityError {
                requested: slice.len(),
                capacity: N,
            });
        }
        Ok(Self {
            items: SmallVec::from(slice),
        })
    }
}

impl<T, const N: usize> Deref for BoundedVec<T, N> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T, const N: usize> TryFrom<Vec<T>> for BoundedVec<T, N> {
    type Error = CapacityError;

    fn try_from(value: Vec<T>) -> Result<Self, Self::Error> {
        Self::try_from_iter(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_until_full() {
        let mut v: BoundedVec<u32, 2> = BoundedVec::new();
        assert!(v.try_push(1).is_ok());
        assert!(v.try_push(2).is_ok());
        assert_eq!(
            v.try_push(3),
            Err(CapacityError {
                requested: 3,
                capacity: 2
            })
        );
        assert_eq!(v.as_slice(), &[1, 2]);
    }

    #[test]
    fn from_slice_rejects_overflow() {
        let err = BoundedVec::<u8, 3>::try_from_slice(&[0; 5]).unwrap_err();
        assert_eq!(err.requested, 5);
        assert_eq!(err.capacity, 3);

        let ok = BoundedVec::<u8, 3>::try_from_slice(&[7, 8]).unwrap();
        assert_eq!(ok.len(), 2);
    }

    #[test]
    fn from_iter_reports_total_requested() {
        let err = BoundedVec::<u32, 4>::try_from_iter(0..10).unwrap_err();
        assert_eq!(err.requested, 10);
    }
}
