//! Swapchain creation, acquire/present, and out-of-date recovery.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;

use crate::rg::error::{RgError, RgResult};
use crate::rg::image::{Extent3d, Image, ImageUsage};
use crate::rg::render_pass::RenderPass;

/// What `acquire` or `present` reported about swapchain validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented cleanly.
    Ok,
    /// Presented, but the surface is suboptimal; the caller should
    /// `rebuild` before the next frame.
    Suboptimal,
}

/// Owns the `VkSwapchainKHR`, its images/views, per-image synchronization
/// primitives, an optional depth image, and an embedded [`RenderPass`]
/// whose current framebuffer tracks the acquired image index.
pub struct Swapchain {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    loader: SwapchainLoader,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    vk_swapchain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: Option<Image>,
    render_pass: RenderPass,
    image_available: Vec<vk::Semaphore>,
    render_finished: Vec<vk::Semaphore>,
    frame_index: usize,
    acquired_image_index: Option<u32>,
    pending_wait_semaphores: Vec<vk::Semaphore>,
    pending_wait_fences: Vec<vk::Fence>,
    vsync: bool,
    with_depth: bool,
}

fn choose_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .find(|f| f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .copied()
        .unwrap_or(formats[0])
}

fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else if !vsync && modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::FIFO
    }
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_width: u32, window_height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
            height: window_height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
        }
    }
}

impl Swapchain {
    /// Create a swapchain for `surface`, sized to `window_width` x
    /// `window_height`, with an owned depth image when `with_depth`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entry: &ash::Entry,
        device: ash::Device,
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        allocator: &mut crate::rg::allocator::Allocator,
        surface: vk::SurfaceKHR,
        window_width: u32,
        window_height: u32,
        vsync: bool,
        with_depth: bool,
    ) -> RgResult<Self> {
        let surface_loader = Surface::new(entry, instance);
        let loader = SwapchainLoader::new(instance, &device);

        let (vk_swapchain, format, extent, images, views, old) = Self::create_swapchain(
            &device,
            &loader,
            &surface_loader,
            physical_device,
            surface,
            window_width,
            window_height,
            vsync,
            None,
        )?;
        let _ = old;

        let depth = if with_depth {
            Some(Image::new(
                device.clone(),
                allocator,
                Extent3d { width: extent.width, height: extent.height, depth: 1 },
                vk::Format::D32_SFLOAT,
                ImageUsage::DEPTH_STENCIL_ATTACHMENT,
                1,
                1,
                vk::SampleCountFlags::TYPE_1,
            )?)
        } else {
            None
        };

        let render_pass = Self::build_render_pass(device.clone(), format, extent, &views, depth.as_ref())?;

        let mut image_available = Vec::with_capacity(images.len());
        let mut render_finished = Vec::with_capacity(images.len());
        for _ in 0..images.len() {
            let sem_info = vk::SemaphoreCreateInfo::builder();
            image_available.push(unsafe { device.create_semaphore(&sem_info, None)? });
            render_finished.push(unsafe { device.create_semaphore(&sem_info, None)? });
        }

        Ok(Self {
            device,
            physical_device,
            loader,
            surface,
            surface_loader,
            vk_swapchain,
            format,
            extent,
            images,
            views,
            depth,
            render_pass,
            image_available,
            render_finished,
            frame_index: 0,
            acquired_image_index: None,
            pending_wait_semaphores: Vec::new(),
            pending_wait_fences: Vec::new(),
            vsync,
            with_depth,
        })
    }

    /// Recreate the swapchain, image views, depth image, and render
    /// pass at the current surface size -- called after `acquire` or
    /// `present` report `SwapchainOutOfDate`/`Suboptimal`. Old
    /// per-image synchronization objects and the old `VkSwapchainKHR`
    /// are destroyed only after the replacement is live, to avoid
    /// transiently losing the handles on a failed recreation.
    pub fn rebuild(&mut self, allocator: &mut crate::rg::allocator::Allocator, window_width: u32, window_height: u32) -> RgResult<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }

        let (vk_swapchain, format, extent, images, views, _old) = Self::create_swapchain(
            &self.device,
            &self.loader,
            &self.surface_loader,
            self.physical_device,
            self.surface,
            window_width,
            window_height,
            self.vsync,
            Some(self.vk_swapchain),
        )?;

        let depth = if self.with_depth {
            Some(Image::new(
                self.device.clone(),
                allocator,
                Extent3d { width: extent.width, height: extent.height, depth: 1 },
                vk::Format::D32_SFLOAT,
                ImageUsage::DEPTH_STENCIL_ATTACHMENT,
                1,
                1,
                vk::SampleCountFlags::TYPE_1,
            )?)
        } else {
            None
        };
        let render_pass = Self::build_render_pass(self.device.clone(), format, extent, &views, depth.as_ref())?;

        let mut image_available = Vec::with_capacity(images.len());
        let mut render_finished = Vec::with_capacity(images.len());
        for _ in 0..images.len() {
            let sem_info = vk::SemaphoreCreateInfo::builder();
            image_available.push(unsafe { self.device.create_semaphore(&sem_info, None)? });
            render_finished.push(unsafe { self.device.create_semaphore(&sem_info, None)? });
        }

        unsafe {
            for &s in self.image_available.iter().chain(self.render_finished.iter()) {
                self.device.destroy_semaphore(s, None);
            }
            for &v in &self.views {
                self.device.destroy_image_view(v, None);
            }
            self.loader.destroy_swapchain(self.vk_swapchain, None);
        }

        self.vk_swapchain = vk_swapchain;
        self.format = format;
        self.extent = extent;
        self.images = images;
        self.views = views;
        self.depth = depth;
        self.render_pass = render_pass;
        self.image_available = image_available;
        self.render_finished = render_finished;
        self.frame_index = 0;
        self.acquired_image_index = None;
        self.pending_wait_semaphores.clear();
        self.pending_wait_fences.clear();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn create_swapchain(
        device: &ash::Device,
        loader: &SwapchainLoader,
        surface_loader: &Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        window_width: u32,
        window_height: u32,
        vsync: bool,
        old: Option<vk::SwapchainKHR>,
    ) -> RgResult<(vk::SwapchainKHR, vk::Format, vk::Extent2D, Vec<vk::Image>, Vec<vk::ImageView>, Option<vk::SwapchainKHR>)> {
        let capabilities = unsafe { surface_loader.get_physical_device_surface_capabilities(physical_device, surface)? };
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(physical_device, surface)? };
        let present_modes = unsafe { surface_loader.get_physical_device_surface_present_modes(physical_device, surface)? };

        let surface_format = choose_format(&formats);
        let present_mode = choose_present_mode(&present_modes, vsync);
        let extent = choose_extent(&capabilities, window_width, window_height);

        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let mut image_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        if capabilities.supported_usage_flags.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
            image_usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if capabilities.supported_usage_flags.contains(vk::ImageUsageFlags::TRANSFER_DST) {
            image_usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(image_usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        if let Some(old) = old {
            create_info = create_info.old_swapchain(old);
        }

        let vk_swapchain = unsafe { loader.create_swapchain(&create_info, None)? };
        let images = unsafe { loader.get_swapchain_images(&vk_swapchain)? };

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            let subresource = vk::ImageSubresourceRange::builder()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1)
                .build();
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(subresource);
            views.push(unsafe { device.create_image_view(&view_info, None)? });
        }

        Ok((vk_swapchain, surface_format.format, extent, images, views, old))
    }

    fn build_render_pass(
        device: ash::Device,
        format: vk::Format,
        extent: vk::Extent2D,
        views: &[vk::ImageView],
        depth: Option<&Image>,
    ) -> RgResult<RenderPass> {
        let framebuffer_views: Vec<Vec<vk::ImageView>> = views
            .iter()
            .map(|&v| match depth {
                Some(d) => vec![v, d.view()],
                None => vec![v],
            })
            .collect();
        RenderPass::for_swapchain(device, format, depth.map(|d| d.format()), extent.width, extent.height, &framebuffer_views)
    }

    /// Current image extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Current surface format.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// The embedded render pass (its current framebuffer tracks the
    /// most recently acquired image).
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Acquire the next image, signalling `image_available` for this
    /// frame slot. `RgError::SwapchainOutOfDate` means `rebuild` must
    /// be called before the caller can proceed.
    pub fn acquire(&mut self, timeout_ns: u64) -> RgResult<(u32, vk::Semaphore)> {
        let semaphore = self.image_available[self.frame_index];
        let result = unsafe { self.loader.acquire_next_image(self.vk_swapchain, timeout_ns, semaphore, vk::Fence::null()) };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::warn!("swapchain suboptimal at acquire");
                }
                self.acquired_image_index = Some(index);
                self.render_pass.set_current_framebuffer(index as usize);
                Ok((index, semaphore))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RgError::SwapchainOutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// The present-complete semaphore signalled by the most recent
    /// `acquire` for this frame slot, for a command buffer's
    /// `wait_for_present` to wait on before writing the image.
    pub fn present_complete_semaphore(&self) -> vk::Semaphore {
        self.image_available[self.frame_index]
    }

    /// Register a command submission's signal semaphore and fence as
    /// something the next `present` must wait for before displaying
    /// this frame.
    pub fn defer_present_wait(&mut self, semaphore: vk::Semaphore, fence: vk::Fence) {
        self.pending_wait_semaphores.push(semaphore);
        self.pending_wait_fences.push(fence);
    }

    /// Present the acquired image on `queue`, waiting on the
    /// semaphores deferred by prior submissions via
    /// `defer_present_wait`. Advances the frame index.
    pub fn present(&mut self, queue: vk::Queue) -> RgResult<PresentOutcome> {
        let image_index = self.acquired_image_index.take().expect("present() called without a prior acquire()");
        let swapchains = [self.vk_swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&self.pending_wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        let result = unsafe { self.loader.queue_present(queue, &present_info) };
        self.frame_index = (self.frame_index + 1) % self.images.len();

        if !self.pending_wait_fences.is_empty() {
            let wait_result = unsafe { self.device.wait_for_fences(&self.pending_wait_fences, true, 1_000_000_000) };
            match wait_result {
                Ok(()) => {}
                Err(vk::Result::TIMEOUT) => return Err(RgError::FenceTimeout),
                Err(e) => return Err(e.into()),
            }
            unsafe { self.device.reset_fences(&self.pending_wait_fences)? };
        }
        self.pending_wait_semaphores.clear();
        self.pending_wait_fences.clear();

        match result {
            Ok(false) => Ok(PresentOutcome::Ok),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RgError::SwapchainOutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// The semaphore `render_finished` submissions must signal this
    /// frame, so `present` can wait on it.
    pub fn render_finished_semaphore(&self) -> vk::Semaphore {
        self.render_finished[self.frame_index]
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &s in self.image_available.iter().chain(self.render_finished.iter()) {
                self.device.destroy_semaphore(s, None);
            }
            for &v in &self.views {
                self.device.destroy_image_view(v, None);
            }
            self.loader.destroy_swapchain(self.vk_swapchain, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
