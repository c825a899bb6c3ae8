//! Synchronous staging uploads for buffers and images.
//!
//! These are one-shot, blocking transfers: allocate a host-visible
//! staging buffer, memcpy into it, record and submit a single-use
//! command buffer on the transfer queue, wait, then tear the staging
//! buffer down.

use ash::vk;

use crate::rg::allocator::{Allocator, MemoryClass};
use crate::rg::buffer::{Buffer, BufferUsage};
use crate::rg::commands::CmdBuffer;
use crate::rg::error::RgResult;
use crate::rg::image::Image;

const ONE_SECOND_NS: u64 = 1_000_000_000;

fn one_shot<F>(device: &ash::Device, queue: vk::Queue, queue_family_index: u32, record: F) -> RgResult<()>
where
    F: FnOnce(&mut CmdBuffer),
{
    let mut cmd = CmdBuffer::new(device.clone(), queue_family_index)?;
    cmd.begin()?;
    record(&mut cmd);
    cmd.end()?;
    cmd.submit(queue)?;
    cmd.wait_and_reset(ONE_SECOND_NS)?;
    Ok(())
}

/// Upload `data` into `dst` at `dst_offset`, via a temporary staging
/// buffer sized exactly to `data`.
pub fn buffer_upload(
    device: &ash::Device,
    allocator: &mut Allocator,
    queue: vk::Queue,
    queue_family_index: u32,
    dst: &Buffer,
    dst_offset: vk::DeviceSize,
    data: &[u8],
) -> RgResult<()> {
    let staging = Buffer::new(
        device.clone(),
        allocator,
        data.len() as vk::DeviceSize,
        BufferUsage::TRANSFER_SRC,
        MemoryClass::Host,
    )?;
    if let Some(ptr) = staging.map(allocator) {
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
        }
    }

    one_shot(device, queue, queue_family_index, |cmd| {
        let region = vk::BufferCopy { src_offset: 0, dst_offset, size: data.len() as vk::DeviceSize };
        unsafe {
            device.cmd_copy_buffer(cmd.handle(), staging.handle(), dst.handle(), &[region]);
        }
    })?;

    staging.destroy(allocator);
    Ok(())
}

/// Upload `data` (tightly packed, one mip/layer) into `dst`, leaving it
/// in `SHADER_READ_ONLY_OPTIMAL`.
pub fn image_upload(
    device: &ash::Device,
    allocator: &mut Allocator,
    queue: vk::Queue,
    queue_family_index: u32,
    dst: &Image,
    data: &[u8],
) -> RgResult<()> {
    let staging = Buffer::new(
        device.clone(),
        allocator,
        data.len() as vk::DeviceSize,
        BufferUsage::TRANSFER_SRC,
        MemoryClass::Host,
    )?;
    if let Some(ptr) = staging.map(allocator) {
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
        }
    }

    let extent = dst.extent();

    one_shot(device, queue, queue_family_index, |cmd| {
        cmd.image_barrier(
            dst.handle(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        );

        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: dst.layer_count(),
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D { width: extent.width, height: extent.height, depth: extent.depth },
        };
        unsafe {
            device.cmd_copy_buffer_to_image(
                cmd.handle(),
                staging.handle(),
                dst.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        cmd.image_barrier(
            dst.handle(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        );
    })?;

    staging.destroy(allocator);
    Ok(())
}
