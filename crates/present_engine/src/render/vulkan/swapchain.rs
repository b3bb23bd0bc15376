//! Swapchain management
//!
//! [`Swapchain::new`] picks the surface format, present mode and sharing
//! mode once. [`Swapchain::create_swap_chain`] builds the chain and its image
//! views and may be called again to rebuild it after the surface goes out of
//! date; the old chain is destroyed first since a surface supports only one
//! live chain. Image, view and extent state is always replaced wholesale.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use crate::render::vulkan::{DeviceContext, QueueFamilyIndices, VulkanError, VulkanResult};

/// Format used when the surface accepts anything or offers it
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Result of asking the chain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is available once the semaphore signals
    Acquired {
        /// Index into the chain's images
        image_index: u32,
        /// Chain still works but no longer matches the surface exactly
        suboptimal: bool,
    },
    /// The surface changed; the chain must be rebuilt before rendering
    OutOfDate,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented and the chain matches the surface
    Presented,
    /// Presented, but the chain should be rebuilt
    Suboptimal,
    /// Not presented; the chain must be rebuilt
    OutOfDate,
}

/// Result of building the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    /// A new chain and its image views replaced the old ones
    Created,
    /// The surface currently has no area; the old chain was left untouched
    ZeroExtent,
}

impl PresentOutcome {
    /// Whether the chain should be rebuilt before the next frame
    pub const fn needs_recreate(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// Pick the preferred BGRA sRGB-nonlinear format, else the first offered.
///
/// A single `UNDEFINED` entry means the surface has no preference.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    match formats {
        [] => None,
        [only] if only.format == vk::Format::UNDEFINED => Some(PREFERRED_SURFACE_FORMAT),
        _ => Some(
            formats
                .iter()
                .copied()
                .find(|f| {
                    f.format == PREFERRED_SURFACE_FORMAT.format
                        && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
                })
                .unwrap_or(formats[0]),
        ),
    }
}

/// Mailbox, then immediate, then FIFO (always available)
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Clamp `target` to the surface's image count bounds; a max of 0 is unbounded
pub fn choose_image_count(target: u32, capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = target.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Use the surface's current extent, or the framebuffer size clamped to
/// the allowed range when the surface leaves it to the swapchain
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, framebuffer_size: (u32, u32)) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (width, height) = framebuffer_size;
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Whether a chain can be built at `extent`
pub const fn extent_has_area(extent: vk::Extent2D) -> bool {
    extent.width > 0 && extent.height > 0
}

/// Concurrent sharing across both families when they differ
pub fn choose_sharing(families: QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.transfer],
        )
    }
}

/// Choices made once per surface
#[derive(Debug, Clone)]
pub struct SwapchainSettings {
    /// Image format and color space
    pub surface_format: vk::SurfaceFormatKHR,
    /// Presentation mode
    pub present_mode: vk::PresentModeKHR,
    /// Requested image count before clamping
    pub target_image_count: u32,
    /// Image sharing mode
    pub sharing_mode: vk::SharingMode,
    /// Families listed for concurrent sharing
    pub queue_family_indices: Vec<u32>,
}

/// Owner of the presentable image chain
pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    settings: SwapchainSettings,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Choose format, present mode and sharing for the context's surface.
    ///
    /// No chain exists until [`Self::create_swap_chain`] is called.
    pub fn new(context: &DeviceContext, target_image_count: u32) -> VulkanResult<Self> {
        let (formats, present_modes) = unsafe {
            (
                context
                    .surface_loader()
                    .get_physical_device_surface_formats(context.physical_device(), context.surface())
                    .map_err(VulkanError::Api)?,
                context
                    .surface_loader()
                    .get_physical_device_surface_present_modes(context.physical_device(), context.surface())
                    .map_err(VulkanError::Api)?,
            )
        };

        let surface_format = choose_surface_format(&formats).ok_or_else(|| {
            VulkanError::InitializationFailed("surface reports no formats".to_string())
        })?;
        let present_mode = choose_present_mode(&present_modes);
        let (sharing_mode, queue_family_indices) = choose_sharing(context.queue_families());

        log::info!(
            "Swapchain format {:?}/{:?}, present mode {:?}, sharing {:?}",
            surface_format.format,
            surface_format.color_space,
            present_mode,
            sharing_mode
        );

        Ok(Self {
            device: context.device().clone(),
            loader: SwapchainLoader::new(context.instance(), context.device()),
            settings: SwapchainSettings {
                surface_format,
                present_mode,
                target_image_count,
                sharing_mode,
                queue_family_indices,
            },
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            extent: vk::Extent2D::default(),
        })
    }

    /// Build (or rebuild) the chain for the current surface state.
    ///
    /// The caller must ensure no GPU work still references the old images.
    /// A minimized surface reports a zero extent; nothing is built then and
    /// [`ChainStatus::ZeroExtent`] is returned.
    pub fn create_swap_chain(
        &mut self,
        context: &DeviceContext,
        framebuffer_size: (u32, u32),
    ) -> VulkanResult<ChainStatus> {
        let capabilities = unsafe {
            context
                .surface_loader()
                .get_physical_device_surface_capabilities(context.physical_device(), context.surface())
                .map_err(VulkanError::Api)?
        };

        let extent = choose_extent(&capabilities, framebuffer_size);
        if !extent_has_area(extent) {
            log::debug!("Surface extent is {}x{}, not building a swapchain", extent.width, extent.height);
            return Ok(ChainStatus::ZeroExtent);
        }
        let image_count = choose_image_count(self.settings.target_image_count, &capabilities);

        self.destroy_chain();

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface())
            .min_image_count(image_count)
            .image_format(self.settings.surface_format.format)
            .image_color_space(self.settings.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(self.settings.sharing_mode)
            .queue_family_indices(&self.settings.queue_family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.settings.present_mode)
            .clipped(true);

        let swapchain = unsafe {
            self.loader
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        self.swapchain = swapchain;

        let images = unsafe {
            self.loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)?
        };
        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            match self.create_image_view(image) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    self.image_views = image_views;
                    return Err(e);
                }
            }
        }

        self.images = images;
        self.image_views = image_views;
        self.extent = extent;

        log::info!(
            "Created swapchain: {} images (requested {}), extent {}x{}",
            self.images.len(),
            image_count,
            extent.width,
            extent.height
        );
        Ok(ChainStatus::Created)
    }

    fn create_image_view(&self, image: vk::Image) -> VulkanResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.settings.surface_format.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            self.device
                .create_image_view(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_chain(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
            }
        }
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
        self.extent = vk::Extent2D::default();
    }

    /// Request the next image, signaling `semaphore` when it is ready.
    ///
    /// Waits without timeout. Out-of-date is reported as a status; other
    /// failures are errors.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> VulkanResult<AcquireOutcome> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Queue `image_index` for presentation once `wait_semaphores` signal
    pub fn present(
        &self,
        context: &DeviceContext,
        wait_semaphores: &[vk::Semaphore],
        image_index: u32,
    ) -> VulkanResult<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        context.present(&self.loader, &present_info)
    }

    /// Current extent; zero before the first chain exists
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Image format of the chain
    pub const fn format(&self) -> vk::Format {
        self.settings.surface_format.format
    }

    /// Number of images in the live chain
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Views matching the chain's images, in order
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Chosen presentation mode
    pub const fn present_mode(&self) -> vk::PresentModeKHR {
        self.settings.present_mode
    }

    /// Settings chosen at construction
    pub const fn settings(&self) -> &SwapchainSettings {
        &self.settings
    }

    /// Raw swapchain handle; null while no chain exists
    pub const fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_chain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn chosen(formats: &[vk::SurfaceFormatKHR]) -> Option<(vk::Format, vk::ColorSpaceKHR)> {
        choose_surface_format(formats).map(|f| (f.format, f.color_space))
    }

    const PREFERRED: Option<(vk::Format, vk::ColorSpaceKHR)> = Some((
        PREFERRED_SURFACE_FORMAT.format,
        PREFERRED_SURFACE_FORMAT.color_space,
    ));

    fn capabilities(min: u32, max: u32, current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        }
    }

    const UNDEFINED_EXTENT: vk::Extent2D = vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
    };

    #[test]
    fn test_present_mode_prefers_mailbox() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_present_mode_falls_back_to_immediate() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::IMMEDIATE);
    }

    #[test]
    fn test_present_mode_fifo_only() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_surface_format_prefers_bgra_srgb() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            PREFERRED_SURFACE_FORMAT,
        ];
        assert_eq!(chosen(&formats), PREFERRED);
    }

    #[test]
    fn test_surface_format_falls_back_to_first() {
        let first = format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let formats = [
            first,
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        assert_eq!(chosen(&formats), Some((first.format, first.color_space)));
    }

    #[test]
    fn test_surface_format_undefined_means_preferred() {
        let formats = [format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert_eq!(chosen(&formats), PREFERRED);
        assert_eq!(chosen(&[]), None);
    }

    #[test]
    fn test_image_count_clamped_to_bounds() {
        assert_eq!(choose_image_count(3, &capabilities(2, 8, UNDEFINED_EXTENT)), 3);
        assert_eq!(choose_image_count(3, &capabilities(4, 8, UNDEFINED_EXTENT)), 4);
        assert_eq!(choose_image_count(3, &capabilities(1, 2, UNDEFINED_EXTENT)), 2);
    }

    #[test]
    fn test_image_count_unbounded_max() {
        assert_eq!(choose_image_count(3, &capabilities(2, 0, UNDEFINED_EXTENT)), 3);
        assert_eq!(choose_image_count(3, &capabilities(5, 0, UNDEFINED_EXTENT)), 5);
    }

    #[test]
    fn test_extent_uses_current_when_defined() {
        let current = vk::Extent2D { width: 800, height: 600 };
        let extent = choose_extent(&capabilities(2, 8, current), (1920, 1080));
        assert_eq!(extent, current);
    }

    #[test]
    fn test_extent_from_framebuffer_when_undefined() {
        let caps = capabilities(2, 8, UNDEFINED_EXTENT);
        assert_eq!(
            choose_extent(&caps, (1920, 1080)),
            vk::Extent2D { width: 1920, height: 1080 }
        );
        assert_eq!(
            choose_extent(&caps, (8000, 0)),
            vk::Extent2D { width: 4096, height: 1 }
        );
    }

    #[test]
    fn test_minimized_surface_extent_has_no_area() {
        let minimized = capabilities(2, 8, vk::Extent2D { width: 0, height: 0 });
        let extent = choose_extent(&minimized, (1920, 1080));
        assert_eq!(extent, vk::Extent2D { width: 0, height: 0 });
        assert!(!extent_has_area(extent));

        assert!(!extent_has_area(vk::Extent2D { width: 640, height: 0 }));
        assert!(extent_has_area(vk::Extent2D { width: 640, height: 480 }));
    }

    #[test]
    fn test_sharing_mode() {
        let shared = QueueFamilyIndices { graphics: 0, transfer: 0 };
        assert_eq!(choose_sharing(shared), (vk::SharingMode::EXCLUSIVE, vec![]));

        let split = QueueFamilyIndices { graphics: 0, transfer: 1 };
        assert_eq!(choose_sharing(split), (vk::SharingMode::CONCURRENT, vec![0, 1]));
    }

    #[test]
    fn test_present_outcome_recreate() {
        assert!(!PresentOutcome::Presented.needs_recreate());
        assert!(PresentOutcome::Suboptimal.needs_recreate());
        assert!(PresentOutcome::OutOfDate.needs_recreate());
    }
}
