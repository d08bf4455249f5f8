//! Uniform arena for per-frame shader constants.
//!
//! The arena is a CPU-side byte region mirrored by one GPU buffer. Each frame
//! the scene opens a write session with [`UniformBuffer::map`], appends the
//! global block followed by one block per entity, and closes the session with
//! [`UniformWriter::unmap`], which uploads the written bytes. Draw calls then
//! bind `(offset, size)` ranges of the buffer.
//!
//! # Layout rules
//!
//! Values follow the WGSL uniform/storage layout:
//! - `u32` and `f32` align to 4 bytes
//! - `vec3` and `vec4` align to 16 bytes (a `vec3` occupies 12 bytes)
//! - `mat4x4` aligns to 16 bytes and occupies 64 bytes, column-major
//!
//! Every write is bounds-checked against the capacity; overruns return
//! [`EngineError::UniformBufferOverflow`] and leave the head untouched.

use crate::backend::{BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend};
use crate::error::{EngineError, EngineResult};
use bytemuck::Pod;
use glam::{Mat4, Vec3, Vec4};

/// Round `value` up to the next multiple of `alignment` (a power of two).
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// A `(offset, size)` range inside the arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct UniformSpan {
    pub offset: u64,
    pub size: u64,
}

impl UniformSpan {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Byte arena backed by a GPU buffer.
pub struct UniformBuffer {
    handle: BufferHandle,
    data: Vec<u8>,
    head: u64,
}

impl UniformBuffer {
    /// Create the arena and its GPU buffer.
    ///
    /// The buffer is bindable both as a uniform and as a read-only storage
    /// buffer, so the light array of the global block can be runtime sized.
    pub fn create<B: GraphicsBackend>(backend: &mut B, capacity: u64) -> EngineResult<Self> {
        if capacity == 0 {
            return Err(EngineError::UniformBufferOverflow {
                requested: 0,
                capacity: 0,
            });
        }
        let capacity = align_up(capacity, 4);
        let handle = backend.create_buffer(&BufferDescriptor {
            label: Some("Uniform Arena".to_string()),
            size: capacity,
            usage: BufferUsage::UNIFORM | BufferUsage::STORAGE | BufferUsage::COPY_DST,
        })?;
        log::debug!("Created uniform arena of {} bytes", capacity);

        Ok(Self {
            handle,
            data: vec![0; capacity as usize],
            head: 0,
        })
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    /// Bytes written by the last session.
    pub fn used(&self) -> u64 {
        self.head
    }

    /// Start a write session. The head is reset to zero.
    #[must_use = "a mapped arena must be unmapped to upload its contents"]
    pub fn map(&mut self) -> UniformWriter<'_> {
        self.head = 0;
        UniformWriter { buffer: self }
    }

    /// The CPU copy of the arena.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Read a value back using the same layout it was written with.
    pub fn read<T: Pod>(&self, offset: u64) -> Option<T> {
        let start = offset as usize;
        let end = start.checked_add(std::mem::size_of::<T>())?;
        self.data
            .get(start..end)
            .map(bytemuck::pod_read_unaligned)
    }

    pub fn read_u32(&self, offset: u64) -> Option<u32> {
        self.read(offset)
    }

    pub fn read_vec3(&self, offset: u64) -> Option<Vec3> {
        self.read::<[f32; 3]>(offset).map(Vec3::from_array)
    }

    pub fn read_mat4(&self, offset: u64) -> Option<Mat4> {
        self.read::<[f32; 16]>(offset).map(|cols| Mat4::from_cols_array(&cols))
    }
}

/// Exclusive write session on a [`UniformBuffer`].
pub struct UniformWriter<'a> {
    buffer: &'a mut UniformBuffer,
}

impl<'a> UniformWriter<'a> {
    /// Current write offset.
    pub fn head(&self) -> u64 {
        self.buffer.head
    }

    pub fn capacity(&self) -> u64 {
        self.buffer.capacity()
    }

    fn check(&self, end: u64) -> EngineResult<()> {
        if end > self.capacity() {
            return Err(EngineError::UniformBufferOverflow {
                requested: end,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    /// Round the head up to a multiple of `boundary`.
    pub fn align(&mut self, boundary: u64) -> EngineResult<u64> {
        if !boundary.is_power_of_two() {
            return Err(EngineError::InvalidAlignment(boundary));
        }
        let aligned = align_up(self.buffer.head, boundary);
        self.check(aligned)?;
        self.buffer.head = aligned;
        Ok(aligned)
    }

    /// Skip `bytes` without writing them, returning where the range starts.
    pub fn reserve(&mut self, bytes: u64) -> EngineResult<u64> {
        let start = self.buffer.head;
        self.check(start + bytes)?;
        self.buffer.head = start + bytes;
        Ok(start)
    }

    /// Append the raw bytes of `value` at the head without padding.
    pub fn write<T: Pod>(&mut self, value: &T) -> EngineResult<u64> {
        let bytes = bytemuck::bytes_of(value);
        let start = self.reserve(bytes.len() as u64)? as usize;
        self.buffer.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(start as u64)
    }

    pub fn push_u32(&mut self, value: u32) -> EngineResult<u64> {
        self.align(4)?;
        self.write(&value)
    }

    pub fn push_f32(&mut self, value: f32) -> EngineResult<u64> {
        self.align(4)?;
        self.write(&value)
    }

    pub fn push_vec3(&mut self, value: Vec3) -> EngineResult<u64> {
        self.align(16)?;
        self.write(&value.to_array())
    }

    pub fn push_vec4(&mut self, value: Vec4) -> EngineResult<u64> {
        self.align(16)?;
        self.write(&value.to_array())
    }

    pub fn push_mat4(&mut self, value: &Mat4) -> EngineResult<u64> {
        self.align(16)?;
        self.write(&value.to_cols_array())
    }

    /// Close the session and upload everything written to the GPU buffer.
    pub fn unmap<B: GraphicsBackend>(self, backend: &mut B) -> u64 {
        let used = self.buffer.head;
        if used > 0 {
            backend.write_buffer(self.buffer.handle, 0, &self.buffer.data[..used as usize]);
        }
        log::trace!("Uniform arena unmapped with {} bytes", used);
        used
    }

    /// Close the session without uploading.
    ///
    /// The GPU buffer keeps the contents of the last successful upload.
    pub fn abandon(self) {
        log::trace!(
            "Uniform arena session abandoned at {} bytes",
            self.buffer.head
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    fn arena(capacity: u64) -> (HeadlessBackend, UniformBuffer) {
        let mut backend = HeadlessBackend::new(64, 64);
        let buffer = UniformBuffer::create(&mut backend, capacity).unwrap();
        (backend, buffer)
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(12, 16), 16);
        assert_eq!(align_up(13, 4), 16);
    }

    #[test]
    fn test_scalar_then_vec3_alignment() {
        let (mut backend, mut buffer) = arena(256);
        let mut writer = buffer.map();
        assert_eq!(writer.push_u32(7).unwrap(), 0);
        assert_eq!(writer.push_vec3(Vec3::new(1.0, 2.0, 3.0)).unwrap(), 16);
        assert_eq!(writer.head(), 28);
        assert_eq!(writer.push_u32(9).unwrap(), 28);
        writer.unmap(&mut backend);

        assert_eq!(buffer.read_u32(0), Some(7));
        assert_eq!(buffer.read_vec3(16), Some(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(buffer.read_u32(28), Some(9));
    }

    #[test]
    fn test_vec3_header_packs_count_in_padding() {
        let (mut backend, mut buffer) = arena(64);
        let mut writer = buffer.map();
        writer.push_vec3(Vec3::ONE).unwrap();
        assert_eq!(writer.push_u32(2).unwrap(), 12);
        assert_eq!(writer.head(), 16);
        writer.unmap(&mut backend);
    }

    #[test]
    fn test_mat4_round_trip() {
        let (mut backend, mut buffer) = arena(512);
        let matrix = Mat4::from_cols_array(&[
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0,
        ]);

        let mut writer = buffer.map();
        writer.push_u32(1).unwrap();
        writer.align(256).unwrap();
        let offset = writer.push_mat4(&matrix).unwrap();
        writer.unmap(&mut backend);

        assert_eq!(offset, 256);
        assert_eq!(buffer.read_mat4(offset), Some(matrix));
    }

    #[test]
    fn test_unmap_uploads_written_bytes() {
        let (mut backend, mut buffer) = arena(64);
        let mut writer = buffer.map();
        writer.push_vec4(Vec4::new(1.0, 2.0, 3.0, 4.0)).unwrap();
        assert_eq!(writer.unmap(&mut backend), 16);

        let gpu = backend.buffer_contents(buffer.handle()).unwrap();
        assert_eq!(&gpu[..16], &buffer.bytes()[..16]);
        assert_eq!(buffer.used(), 16);
    }

    #[test]
    fn test_abandon_skips_upload() {
        let (backend, mut buffer) = arena(64);
        let mut writer = buffer.map();
        writer.push_vec4(Vec4::ONE).unwrap();
        writer.abandon();

        let gpu = backend.buffer_contents(buffer.handle()).unwrap();
        assert!(gpu.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_map_resets_head() {
        let (mut backend, mut buffer) = arena(64);
        let mut writer = buffer.map();
        writer.push_vec4(Vec4::ONE).unwrap();
        writer.unmap(&mut backend);

        let writer = buffer.map();
        assert_eq!(writer.head(), 0);
        writer.unmap(&mut backend);
    }

    #[test]
    fn test_capacity_overrun_is_an_error() {
        let (mut backend, mut buffer) = arena(64);
        let mut writer = buffer.map();
        writer.push_mat4(&Mat4::IDENTITY).unwrap();

        let err = writer.push_vec3(Vec3::ONE).unwrap_err();
        assert!(matches!(
            err,
            EngineError::UniformBufferOverflow {
                requested: 76,
                capacity: 64
            }
        ));
        // A failed write leaves the head in place.
        assert_eq!(writer.head(), 64);
        writer.unmap(&mut backend);
    }

    #[test]
    fn test_alignment_past_capacity_is_an_error() {
        let (mut backend, mut buffer) = arena(100);
        let mut writer = buffer.map();
        writer.push_u32(1).unwrap();
        assert!(writer.align(256).is_err());
        assert!(writer.reserve(200).is_err());
        assert_eq!(writer.reserve(96).unwrap(), 4);
        writer.unmap(&mut backend);
    }

    #[test]
    fn test_non_power_of_two_alignment_rejected() {
        let (mut backend, mut buffer) = arena(64);
        let mut writer = buffer.map();
        assert!(matches!(writer.align(24), Err(EngineError::InvalidAlignment(24))));
        writer.unmap(&mut backend);
    }
}
