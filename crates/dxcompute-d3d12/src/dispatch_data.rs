//! Per-dispatch packing of resource handles and constant-buffer words.

use std::mem;

use bytemuck::Pod;

use crate::array_pool::ArrayPool;

/// The shared pools [`DispatchData`] rents from.
#[derive(Default)]
pub struct DispatchArrays {
    pub handles: ArrayPool<u64>,
    pub words: ArrayPool<u32>,
}

impl DispatchArrays {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resource handles and constant words for one dispatch.
///
/// Both arrays are rented from `DispatchArrays` and handed back exactly once on drop.
pub struct DispatchData<'pool> {
    arrays: &'pool DispatchArrays,
    resources: Vec<u64>,
    variables: Vec<u32>,
    variable_bytes: usize,
}

impl<'pool> DispatchData<'pool> {
    pub fn rent(arrays: &'pool DispatchArrays, resource_count: usize, variable_bytes: usize) -> Self {
        Self {
            arrays,
            resources: arrays.handles.rent(resource_count),
            variables: arrays.words.rent(variable_bytes.div_ceil(4)),
            variable_bytes,
        }
    }

    /// Resource handles in binding order.
    pub fn resources(&self) -> &[u64] {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut [u64] {
        &mut self.resources
    }

    /// Constant buffer as 32-bit words, zero padded to a whole word.
    pub fn variables(&self) -> &[u32] {
        &self.variables
    }

    pub fn variable_bytes(&self) -> usize {
        self.variable_bytes
    }

    /// Copies `bytes` into the constant buffer at byte `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range extends past the rented variable size.
    pub fn write_variable(&mut self, offset: usize, bytes: &[u8]) {
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= self.variable_bytes)
            .unwrap_or_else(|| {
                panic!(
                    "constant write {offset}..{} out of range (rented {} bytes)",
                    offset.saturating_add(bytes.len()),
                    self.variable_bytes
                )
            });
        bytemuck::cast_slice_mut::<u32, u8>(&mut self.variables)[offset..end].copy_from_slice(bytes);
    }

    pub fn write_value<T: Pod>(&mut self, offset: usize, value: &T) {
        self.write_variable(offset, bytemuck::bytes_of(value));
    }
}

impl Drop for DispatchData<'_> {
    fn drop(&mut self) {
        self.arrays.handles.give_back(mem::take(&mut self.resources));
        self.arrays.words.give_back(mem::take(&mut self.variables));
    }
}
