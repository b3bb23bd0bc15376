//! GPU buffers and the copies between them
//!
//! A [`Buffer`] owns its `VkBuffer` and the `VkDeviceMemory` bound to it;
//! the two are created and destroyed together. Host access goes through a
//! [`MemoryMapping`] guard that unmaps on every exit path.
//!
//! Device-local data is uploaded with the staging pattern: a host-visible
//! scratch buffer is filled through a mapping, then copied on the transfer
//! queue into the destination, and the call returns only after that queue
//! is idle.

use ash::{vk, Device};

use crate::render::vulkan::{DeviceContext, QueueRole, VulkanError, VulkanResult};

/// Buffer wrapper with its bound memory
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    memory_type_index: u32,
    memory_properties: vk::MemoryPropertyFlags,
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory to it.
    ///
    /// The memory type is the first one allowed for the buffer whose flags
    /// contain `properties`. Buffers are shared concurrently between the
    /// graphics and transfer families when those differ.
    pub fn new(
        context: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "buffer size must be non-zero".to_string(),
            });
        }

        let device = context.device().clone();
        let families = context.queue_families();
        let family_indices = [families.graphics, families.transfer];

        let mut buffer_info = vk::BufferCreateInfo::builder().size(size).usage(usage);
        buffer_info = if families.is_shared() {
            buffer_info.sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            buffer_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let buffer = unsafe {
            device
                .create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let Some(memory_type_index) =
            context.find_memory_type(requirements.memory_type_bits, properties)
        else {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(VulkanError::NoSuitableMemoryType);
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(VulkanError::Api(e));
            }
        };

        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(VulkanError::Api(e));
        }

        let memory_properties =
            context.memory_properties().memory_types[memory_type_index as usize].property_flags;

        Ok(Self {
            device,
            buffer,
            memory,
            size,
            memory_type_index,
            memory_properties,
        })
    }

    /// Create a device-local buffer holding `data`, uploaded through a
    /// staging buffer on the transfer queue.
    ///
    /// `TRANSFER_DST` is added to `usage`. The staging buffer is released
    /// before returning.
    pub fn new_local_with_data(
        context: &DeviceContext,
        usage: vk::BufferUsageFlags,
        data: &[u8],
    ) -> VulkanResult<Self> {
        let size = data.len() as vk::DeviceSize;

        let staging = Self::new(
            context,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.copy_from_host(data)?;

        let local = Self::new(
            context,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        staging.copy_to_buffer(context, &local, size)?;

        log::debug!("Uploaded {size} bytes to device-local buffer");
        Ok(local)
    }

    /// Map the whole buffer; the mapping ends when the guard drops
    pub fn map(&self) -> VulkanResult<MemoryMapping<'_>> {
        if !self
            .memory_properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            return Err(VulkanError::InvalidOperation {
                reason: "cannot map memory that is not host visible".to_string(),
            });
        }

        let ptr = unsafe {
            self.device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?
        };

        Ok(MemoryMapping {
            buffer: self,
            ptr: ptr.cast::<u8>(),
            len: self.size as usize,
        })
    }

    /// Copy host bytes into the start of the buffer
    pub fn copy_from_host(&self, data: &[u8]) -> VulkanResult<()> {
        let mut mapping = self.map()?;
        mapping.write(0, data)
    }

    /// Copy the start of the buffer into `out`
    pub fn copy_to_host(&self, out: &mut [u8]) -> VulkanResult<()> {
        let mapping = self.map()?;
        mapping.read(0, out)
    }

    /// Copy `size` bytes into `dst` with a one-shot command on the transfer
    /// queue, waiting for completion
    pub fn copy_to_buffer(
        &self,
        context: &DeviceContext,
        dst: &Self,
        size: vk::DeviceSize,
    ) -> VulkanResult<()> {
        if size > self.size || size > dst.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "copy of {size} bytes exceeds source ({}) or destination ({})",
                    self.size, dst.size
                ),
            });
        }

        let region = vk::BufferCopy::builder().size(size).build();
        context.execute_on_queue(QueueRole::Transfer, |command_buffer| unsafe {
            context
                .device()
                .cmd_copy_buffer(command_buffer, self.buffer, dst.buffer, &[region]);
        })
    }

    /// Get buffer handle
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Requested size in bytes
    pub const fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Index of the memory type backing the buffer
    pub const fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    /// Property flags of the memory type backing the buffer
    pub const fn memory_properties(&self) -> vk::MemoryPropertyFlags {
        self.memory_properties
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Host mapping of a buffer's memory, unmapped on drop
pub struct MemoryMapping<'a> {
    buffer: &'a Buffer,
    ptr: *mut u8,
    len: usize,
}

impl MemoryMapping<'_> {
    fn check_range(&self, offset: usize, count: usize) -> VulkanResult<()> {
        match offset.checked_add(count) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(VulkanError::InvalidOperation {
                reason: format!(
                    "range {offset}..{} outside mapped {} bytes",
                    offset.saturating_add(count),
                    self.len
                ),
            }),
        }
    }

    /// Write bytes at `offset`
    pub fn write(&mut self, offset: usize, data: &[u8]) -> VulkanResult<()> {
        self.check_range(offset, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len());
        }
        Ok(())
    }

    /// Read bytes at `offset` into `out`
    pub fn read(&self, offset: usize, out: &mut [u8]) -> VulkanResult<()> {
        self.check_range(offset, out.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.add(offset), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    /// Mapped length in bytes
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MemoryMapping<'_> {
    fn drop(&mut self) {
        unsafe { self.buffer.device.unmap_memory(self.buffer.memory) };
    }
}
