//! Batched row-major buffers.
//!
//! Every batched numeric buffer in the crate is a flat `Vec` logically shaped
//! `(batch_capacity, feature_count)`:
//!
//! - `index = batch_row * feature_count + feature_col`
//! - a [`Slice2D`] borrows a contiguous range of batch rows, never a range of
//!   features.
//!
//! Storage sits behind an `Arc<RwLock<_>>` so scheduled tasks can hold on to
//! the rows they read or write after the scheduling call has returned. The
//! dependency chain between tasks keeps the locks uncontended; the lock only
//! makes the sharing sound.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{Error, Result};

/// Flat storage shared between a buffer's owner and in-flight tasks.
pub struct SharedVec<T> {
    inner: Arc<RwLock<Vec<T>>>,
}

impl<T> SharedVec<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(data)),
        }
    }

    /// Another handle to the same storage, for a task that outlives the call
    /// scheduling it.
    #[inline]
    pub(crate) fn share(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Lock for reading.
    ///
    /// A task that panicked while holding the lock already failed its handle,
    /// so poisoning is ignored here.
    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn same_storage(&self, other: &SharedVec<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone> SharedVec<T> {
    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<T> {
        self.read().clone()
    }
}

impl<T> fmt::Debug for SharedVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedVec")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish_non_exhaustive()
    }
}

/// A `(batch_capacity, feature_count)` row-major buffer.
#[derive(Debug)]
pub struct Batched2DBuffer<T> {
    storage: SharedVec<T>,
    capacity: usize,
    feature_count: usize,
}

impl<T: Copy + Default> Batched2DBuffer<T> {
    /// Allocate a zero-filled buffer. It is never resized afterwards.
    pub fn new(capacity: usize, feature_count: usize) -> Self {
        Self {
            storage: SharedVec::new(vec![T::default(); capacity * feature_count]),
            capacity,
            feature_count,
        }
    }
}

impl<T> Batched2DBuffer<T> {
    /// Wrap an existing flat buffer with shape `(data.len() / feature_count, feature_count)`.
    pub fn from_vec(data: Vec<T>, feature_count: usize) -> Result<Self> {
        if feature_count == 0 {
            return Err(Error::InvalidData("feature_count must be > 0".to_owned()));
        }
        if !data.len().is_multiple_of(feature_count) {
            return Err(Error::InvalidData(format!(
                "buffer length {} is not divisible by feature_count {}",
                data.len(),
                feature_count
            )));
        }

        let capacity = data.len() / feature_count;
        Ok(Self {
            storage: SharedVec::new(data),
            capacity,
            feature_count,
        })
    }

    /// Number of batch rows the buffer holds.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    /// Borrow rows `start..start + count` without copying.
    pub fn slice(&self, start: usize, count: usize) -> Result<Slice2D<T>> {
        check_row_range(start, count, self.capacity)?;
        Ok(Slice2D {
            storage: self.storage.share(),
            row_offset: start,
            rows: count,
            feature_count: self.feature_count,
        })
    }

    /// Borrow every row.
    pub fn as_slice(&self) -> Slice2D<T> {
        Slice2D {
            storage: self.storage.share(),
            row_offset: 0,
            rows: self.capacity,
            feature_count: self.feature_count,
        }
    }

    #[inline]
    pub(crate) fn storage(&self) -> &SharedVec<T> {
        &self.storage
    }
}

impl<T: Clone> Batched2DBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.storage.snapshot()
    }
}

/// A view over a contiguous range of rows of a [`Batched2DBuffer`].
///
/// `(row_offset, rows)` select the rows, and `feature_count` is the row stride.
/// The source buffer may be dropped while slices of it are alive; the rows
/// stay valid until the last slice goes away.
pub struct Slice2D<T> {
    storage: SharedVec<T>,
    row_offset: usize,
    rows: usize,
    feature_count: usize,
}

impl<T> Clone for Slice2D<T> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.share(),
            row_offset: self.row_offset,
            rows: self.rows,
            feature_count: self.feature_count,
        }
    }
}

impl<T> fmt::Debug for Slice2D<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slice2D")
            .field("row_offset", &self.row_offset)
            .field("rows", &self.rows)
            .field("feature_count", &self.feature_count)
            .finish()
    }
}

impl<T> Slice2D<T> {
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    /// First row of the source buffer covered by this slice.
    #[inline]
    pub fn row_offset(&self) -> usize {
        self.row_offset
    }

    /// Flat index into the source storage.
    ///
    /// Panics if `row` or `col` is out of range for this slice.
    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        assert!(
            row < self.rows && col < self.feature_count,
            "index ({row}, {col}) out of range for slice of shape ({}, {})",
            self.rows,
            self.feature_count
        );
        (self.row_offset + row) * self.feature_count + col
    }

    /// Sub-range of this slice's rows.
    pub fn slice(&self, start: usize, count: usize) -> Result<Slice2D<T>> {
        check_row_range(start, count, self.rows)?;
        Ok(Slice2D {
            storage: self.storage.share(),
            row_offset: self.row_offset + start,
            rows: count,
            feature_count: self.feature_count,
        })
    }

    /// First `count` rows. Panics if `count > rows`.
    #[inline]
    pub(crate) fn head(&self, count: usize) -> Slice2D<T> {
        self.range(0, count)
    }

    /// Rows `start..start + count`, for ranges already known to fit.
    pub(crate) fn range(&self, start: usize, count: usize) -> Slice2D<T> {
        assert!(
            start + count <= self.rows,
            "requested rows {start}..{} from a slice of {} rows",
            start + count,
            self.rows
        );
        Slice2D {
            storage: self.storage.share(),
            row_offset: self.row_offset + start,
            rows: count,
            feature_count: self.feature_count,
        }
    }

    /// Lock the source storage for reading and view this slice's rows.
    pub fn read(&self) -> SliceRead<'_, T> {
        SliceRead {
            guard: self.storage.read(),
            start: self.row_offset * self.feature_count,
            len: self.rows * self.feature_count,
            feature_count: self.feature_count,
        }
    }

    /// Lock the source storage for writing and view this slice's rows.
    pub fn write(&self) -> SliceWrite<'_, T> {
        SliceWrite {
            guard: self.storage.write(),
            start: self.row_offset * self.feature_count,
            len: self.rows * self.feature_count,
            feature_count: self.feature_count,
        }
    }

    /// True when both slices view the same underlying buffer (overlapping or not).
    #[inline]
    pub fn shares_storage_with(&self, other: &Slice2D<T>) -> bool {
        self.storage.same_storage(&other.storage)
    }

    #[inline]
    pub(crate) fn storage(&self) -> &SharedVec<T> {
        &self.storage
    }
}

impl<T: Copy> Slice2D<T> {
    pub fn get(&self, row: usize, col: usize) -> T {
        let idx = self.index(row, col);
        self.storage.read()[idx]
    }

    pub fn set(&self, row: usize, col: usize, value: T) {
        let idx = self.index(row, col);
        self.storage.write()[idx] = value;
    }

    /// Copy of one row.
    pub fn row(&self, row: usize) -> Vec<T> {
        self.read().row(row).to_vec()
    }

    /// Copy of all rows, row-major.
    pub fn to_vec(&self) -> Vec<T> {
        self.read().to_vec()
    }
}

/// Read-locked view of a slice's rows.
pub struct SliceRead<'a, T> {
    guard: RwLockReadGuard<'a, Vec<T>>,
    start: usize,
    len: usize,
    feature_count: usize,
}

impl<T> SliceRead<'_, T> {
    #[inline]
    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[T] {
        let start = row * self.feature_count;
        &self[start..start + self.feature_count]
    }
}

impl<T> Deref for SliceRead<'_, T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        &self.guard[self.start..self.start + self.len]
    }
}

/// Write-locked view of a slice's rows.
pub struct SliceWrite<'a, T> {
    guard: RwLockWriteGuard<'a, Vec<T>>,
    start: usize,
    len: usize,
    feature_count: usize,
}

impl<T> SliceWrite<'_, T> {
    #[inline]
    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    #[inline]
    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        let start = row * self.feature_count;
        let fc = self.feature_count;
        &mut self[start..start + fc]
    }
}

impl<T> Deref for SliceWrite<'_, T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        &self.guard[self.start..self.start + self.len]
    }
}

impl<T> DerefMut for SliceWrite<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [T] {
        let (start, len) = (self.start, self.len);
        &mut self.guard[start..start + len]
    }
}

fn check_row_range(start: usize, count: usize, available: usize) -> Result<()> {
    let end = start
        .checked_add(count)
        .ok_or_else(|| Error::ShapeMismatch("row range overflow".to_owned()))?;
    if end > available {
        return Err(Error::ShapeMismatch(format!(
            "rows {start}..{end} exceed the {available} rows available"
        )));
    }
    Ok(())
}
