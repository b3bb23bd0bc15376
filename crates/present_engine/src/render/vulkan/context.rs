//! Vulkan device context
//!
//! Owns the instance, the presentation surface, the selected physical device,
//! the logical device with its graphics and transfer queues, and one command
//! pool per queue role. Queue family indices are resolved once here and never
//! change for the lifetime of the context.
//!
//! The context is created before anything else and destroyed last. Its `Drop`
//! waits for the device to go idle, then tears down pools, device, surface,
//! debug messenger and instance in that order (field declaration order).

use std::borrow::Cow;
use std::ffi::{c_char, CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use thiserror::Error;

use crate::config::{DeviceRequirements, RendererConfig};
use crate::render::vulkan::commands::{CommandPool, ScopedCommandBuffer};
use crate::render::vulkan::shader::{ShaderError, ShaderModule};
use crate::render::vulkan::swapchain::PresentOutcome;
use crate::render::vulkan::sync::{Fence, Semaphore};
use crate::render::vulkan::window::{SurfaceProvider, WindowError};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &str = "present_engine";

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No physical device met the feature, extension and queue requirements
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Requested instance layers are not installed
    #[error("Unsupported layers: {0:?}")]
    MissingLayers(Vec<String>),

    /// Requested instance extensions are not available
    #[error("Unsupported extensions: {0:?}")]
    MissingExtensions(Vec<String>),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Shader bytecode could not be loaded
    #[error(transparent)]
    Shader(#[from] ShaderError),

    /// Windowing collaborator failed
    #[error(transparent)]
    Window(#[from] WindowError),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Which queue a command buffer or submission targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    /// Graphics and presentation work
    Graphics,
    /// Buffer copies and uploads
    Transfer,
}

/// Resolved queue family indices; equal when one family serves both roles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family supporting graphics and presentation
    pub graphics: u32,
    /// Family supporting transfer
    pub transfer: u32,
}

impl QueueFamilyIndices {
    /// Whether graphics and transfer share one family
    pub const fn is_shared(&self) -> bool {
        self.graphics == self.transfer
    }

    /// Family index for a role
    pub const fn get(&self, role: QueueRole) -> u32 {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Transfer => self.transfer,
        }
    }
}

/// Capabilities of one queue family as seen during device selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyCaps {
    /// Reported queue flags
    pub flags: vk::QueueFlags,
    /// Number of queues in the family
    pub queue_count: u32,
    /// Whether the family can present to the target surface
    pub supports_present: bool,
}

impl QueueFamilyCaps {
    fn renders(&self) -> bool {
        self.queue_count > 0 && self.supports_present && self.flags.contains(vk::QueueFlags::GRAPHICS)
    }

    fn transfers(&self) -> bool {
        self.queue_count > 0 && self.flags.contains(vk::QueueFlags::TRANSFER)
    }
}

/// Pick the graphics+present and transfer families.
///
/// A single family serving both roles wins over a split pair. Returns `None`
/// when either role has no candidate.
pub fn select_queue_families(families: &[QueueFamilyCaps]) -> Option<QueueFamilyIndices> {
    if let Some(shared) = families.iter().position(|f| f.renders() && f.transfers()) {
        let index = shared as u32;
        return Some(QueueFamilyIndices { graphics: index, transfer: index });
    }

    let graphics = families.iter().position(QueueFamilyCaps::renders)?;
    let transfer = families.iter().position(QueueFamilyCaps::transfers)?;
    Some(QueueFamilyIndices {
        graphics: graphics as u32,
        transfer: transfer as u32,
    })
}

/// Queues to request at device creation and where each role lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePlan {
    /// `(family, queue count)` pairs for `VkDeviceQueueCreateInfo`
    pub requests: Vec<(u32, u32)>,
    /// `(family, queue index)` of the graphics queue
    pub graphics: (u32, u32),
    /// `(family, queue index)` of the transfer queue
    pub transfer: (u32, u32),
}

impl QueuePlan {
    /// Plan queue creation for the selected families.
    ///
    /// A shared family with at least two queues gives transfer its own queue
    /// at index 1; with a single queue both roles use queue 0.
    pub fn new(indices: QueueFamilyIndices, families: &[QueueFamilyCaps]) -> Self {
        let graphics = indices.graphics;
        if !indices.is_shared() {
            return Self {
                requests: vec![(graphics, 1), (indices.transfer, 1)],
                graphics: (graphics, 0),
                transfer: (indices.transfer, 0),
            };
        }

        let available = families
            .get(graphics as usize)
            .map_or(1, |family| family.queue_count);
        if available >= 2 {
            Self {
                requests: vec![(graphics, 2)],
                graphics: (graphics, 0),
                transfer: (graphics, 1),
            }
        } else {
            Self {
                requests: vec![(graphics, 1)],
                graphics: (graphics, 0),
                transfer: (graphics, 0),
            }
        }
    }
}

/// List the requirements a physical device fails to meet
pub fn unmet_device_requirements(
    requirements: &DeviceRequirements,
    device_type: vk::PhysicalDeviceType,
    features: &vk::PhysicalDeviceFeatures,
) -> Vec<&'static str> {
    let mut unmet = Vec::new();
    if requirements.require_discrete_gpu && device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
        unmet.push("not a discrete GPU");
    }
    if requirements.require_geometry_shader && features.geometry_shader != vk::TRUE {
        unmet.push("no geometry shader support");
    }
    if requirements.require_vertex_pipeline_stores_and_atomics
        && features.vertex_pipeline_stores_and_atomics != vk::TRUE
    {
        unmet.push("no vertex pipeline stores and atomics");
    }
    unmet
}

/// First memory type allowed by `type_filter` whose flags contain `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_filter & (1 << index) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(index, _)| index as u32)
}

/// Names in `required` that are absent from `available`
pub fn unsupported_names(required: &[&CStr], available: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !available.contains(name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

fn to_cstrings(names: &[String]) -> VulkanResult<Vec<CString>> {
    names
        .iter()
        .map(|name| {
            CString::new(name.as_str()).map_err(|e| {
                VulkanError::InitializationFailed(format!("Invalid name {name:?}: {e}"))
            })
        })
        .collect()
}

/// Vulkan instance with an optional validation messenger
pub struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance with the window's required extensions.
    ///
    /// With `enable_validation` the Khronos validation layer and the debug
    /// utils extension are requested; both must be installed.
    pub fn new(
        surface_provider: &impl SurfaceProvider,
        app_name: &str,
        enable_validation: bool,
    ) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name = CString::new(app_name)
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {e}")))?;
        let engine_name = CString::new(ENGINE_NAME)
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions = to_cstrings(&surface_provider.required_instance_extensions()?)?;
        let mut layers = Vec::new();
        if enable_validation {
            extensions.push(DebugUtils::name().to_owned());
            layers.push(
                CString::new(VALIDATION_LAYER)
                    .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?,
            );
        }
        Self::check_support(&entry, &layers, &extensions)?;

        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        // Chained so instance creation and destruction are also reported
        let mut instance_debug_info = debug_messenger_info();
        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);
        if enable_validation {
            create_info = create_info.push_next(&mut instance_debug_info);
        }

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger_info = debug_messenger_info();
            match unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(VulkanError::Api(e));
                }
            }
        } else {
            None
        };

        log::debug!(
            "Created Vulkan instance (validation {})",
            if enable_validation { "on" } else { "off" }
        );
        Ok(Self { entry, instance, debug })
    }

    fn check_support(entry: &Entry, layers: &[CString], extensions: &[CString]) -> VulkanResult<()> {
        let available_layers = entry
            .enumerate_instance_layer_properties()
            .map_err(VulkanError::Api)?;
        let layer_names: Vec<&CStr> = available_layers
            .iter()
            .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
            .collect();
        let required: Vec<&CStr> = layers.iter().map(CString::as_c_str).collect();
        let missing = unsupported_names(&required, &layer_names);
        if !missing.is_empty() {
            return Err(VulkanError::MissingLayers(missing));
        }

        let available_extensions = entry
            .enumerate_instance_extension_properties(None)
            .map_err(VulkanError::Api)?;
        let extension_names: Vec<&CStr> = available_extensions
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();
        let required: Vec<&CStr> = extensions.iter().map(CString::as_c_str).collect();
        let missing = unsupported_names(&required, &extension_names);
        if !missing.is_empty() {
            return Err(VulkanError::MissingExtensions(missing));
        }
        Ok(())
    }

    /// Raw instance
    pub const fn handle(&self) -> &Instance {
        &self.instance
    }

    /// Loader entry
    pub const fn entry(&self) -> &Entry {
        &self.entry
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

unsafe fn lossy<'a>(ptr: *const c_char) -> Cow<'a, str> {
    if ptr.is_null() {
        Cow::Borrowed("")
    } else {
        CStr::from_ptr(ptr).to_string_lossy()
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() {
        return vk::FALSE;
    }
    let data = &*callback_data;
    let id_name = lossy(data.p_message_id_name);
    let message = lossy(data.p_message);

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[Vulkan] {}:{}:{}", data.message_id_number, id_name, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[Vulkan] {}:{}:{}", data.message_id_number, id_name, message);
    } else {
        log::debug!("[Vulkan] {}:{}:{}", data.message_id_number, id_name, message);
    }

    vk::FALSE
}

struct PresentationSurface {
    loader: Surface,
    surface: vk::SurfaceKHR,
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

/// Physical device selection result
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Per-family capabilities
    pub queue_families: Vec<QueueFamilyCaps>,
    /// Chosen families
    pub indices: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Name reported by the driver
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// Select the first device that satisfies every requirement
    pub fn select(
        instance: &Instance,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
        requirements: &DeviceRequirements,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };

        for device in devices {
            if let Some(info) = Self::evaluate(instance, surface_loader, surface, device, requirements)? {
                log::info!("Selected GPU: {}", info.name());
                return Ok(info);
            }
        }
        Err(VulkanError::NoSuitableDevice)
    }

    fn evaluate(
        instance: &Instance,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
        requirements: &DeviceRequirements,
    ) -> VulkanResult<Option<Self>> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let available: Vec<&CStr> = extensions
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();
        let missing = unsupported_names(&[SwapchainLoader::name()], &available);
        if !missing.is_empty() {
            log::debug!("Rejected GPU {name}: missing extensions {missing:?}");
            return Ok(None);
        }

        let (formats, present_modes) = unsafe {
            (
                surface_loader
                    .get_physical_device_surface_formats(device, surface)
                    .map_err(VulkanError::Api)?,
                surface_loader
                    .get_physical_device_surface_present_modes(device, surface)
                    .map_err(VulkanError::Api)?,
            )
        };
        if formats.is_empty() || present_modes.is_empty() {
            log::debug!("Rejected GPU {name}: no surface formats or present modes");
            return Ok(None);
        }

        let features = unsafe { instance.get_physical_device_features(device) };
        let unmet = unmet_device_requirements(requirements, properties.device_type, &features);
        if !unmet.is_empty() {
            log::debug!("Rejected GPU {name}: {}", unmet.join(", "));
            return Ok(None);
        }

        let family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(device) };
        let mut queue_families = Vec::with_capacity(family_properties.len());
        for (index, family) in family_properties.iter().enumerate() {
            let supports_present = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index as u32, surface)
                    .map_err(VulkanError::Api)?
            };
            queue_families.push(QueueFamilyCaps {
                flags: family.queue_flags,
                queue_count: family.queue_count,
                supports_present,
            });
        }

        let Some(indices) = select_queue_families(&queue_families) else {
            log::debug!("Rejected GPU {name}: no graphics+present and transfer queue families");
            return Ok(None);
        };

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        Ok(Some(Self {
            device,
            properties,
            memory_properties,
            queue_families,
            indices,
        }))
    }
}

struct LogicalDevice {
    device: Device,
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

/// Instance, device, queues and command pools for one surface
pub struct DeviceContext {
    graphics_pool: CommandPool,
    transfer_pool: CommandPool,
    graphics_queue: vk::Queue,
    transfer_queue: vk::Queue,
    physical: PhysicalDeviceInfo,
    device: LogicalDevice,
    surface: PresentationSurface,
    instance: VulkanInstance,
}

impl DeviceContext {
    /// Create the full context for a window.
    ///
    /// Fails when no device qualifies, a layer or extension is missing, or
    /// the surface cannot be created. None of these are recoverable.
    pub fn new(window: &mut impl SurfaceProvider, config: &RendererConfig) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(
            &*window,
            &config.application_name,
            config.validation_enabled(),
        )?;

        let surface = PresentationSurface {
            loader: Surface::new(instance.entry(), instance.handle()),
            surface: window.create_surface(instance.handle())?,
        };

        let physical = PhysicalDeviceInfo::select(
            instance.handle(),
            &surface.loader,
            surface.surface,
            &config.device,
        )?;
        let indices = physical.indices;
        log::info!(
            "Queue families: graphics={} transfer={} ({})",
            indices.graphics,
            indices.transfer,
            if indices.is_shared() { "shared" } else { "split" }
        );

        let plan = QueuePlan::new(indices, &physical.queue_families);
        let device = Self::create_logical_device(instance.handle(), &physical, &plan, &config.device)?;

        let graphics_queue = unsafe { device.device.get_device_queue(plan.graphics.0, plan.graphics.1) };
        let transfer_queue = unsafe { device.device.get_device_queue(plan.transfer.0, plan.transfer.1) };

        let graphics_pool = CommandPool::new(
            device.device.clone(),
            indices.graphics,
            vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let transfer_pool = CommandPool::new(
            device.device.clone(),
            indices.transfer,
            vk::CommandPoolCreateFlags::empty(),
        )?;

        Ok(Self {
            graphics_pool,
            transfer_pool,
            graphics_queue,
            transfer_queue,
            physical,
            device,
            surface,
            instance,
        })
    }

    fn create_logical_device(
        instance: &Instance,
        physical: &PhysicalDeviceInfo,
        plan: &QueuePlan,
        requirements: &DeviceRequirements,
    ) -> VulkanResult<LogicalDevice> {
        let priorities: Vec<Vec<f32>> = plan
            .requests
            .iter()
            .map(|&(_, count)| vec![1.0; count as usize])
            .collect();
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = plan
            .requests
            .iter()
            .zip(&priorities)
            .map(|(&(family, _), priorities)| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(priorities)
                    .build()
            })
            .collect();

        let extensions = [SwapchainLoader::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::builder()
            .geometry_shader(requirements.require_geometry_shader)
            .vertex_pipeline_stores_and_atomics(requirements.require_vertex_pipeline_stores_and_atomics)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .create_device(physical.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };
        log::debug!("Created logical device with queue requests {:?}", plan.requests);
        Ok(LogicalDevice { device })
    }

    /// Raw instance
    pub const fn instance(&self) -> &Instance {
        self.instance.handle()
    }

    /// Logical device
    pub const fn device(&self) -> &Device {
        &self.device.device
    }

    /// Selected physical device
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical.device
    }

    /// Name of the selected GPU
    pub fn device_name(&self) -> String {
        self.physical.name()
    }

    /// Presentation surface
    pub const fn surface(&self) -> vk::SurfaceKHR {
        self.surface.surface
    }

    /// Surface extension loader
    pub const fn surface_loader(&self) -> &Surface {
        &self.surface.loader
    }

    /// Resolved queue family indices
    pub const fn queue_families(&self) -> QueueFamilyIndices {
        self.physical.indices
    }

    /// Queue family index for a role
    pub const fn queue_family(&self, role: QueueRole) -> u32 {
        self.physical.indices.get(role)
    }

    /// Queue for a role
    pub const fn queue(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Graphics => self.graphics_queue,
            QueueRole::Transfer => self.transfer_queue,
        }
    }

    /// Command pool for a role
    pub const fn command_pool(&self, role: QueueRole) -> &CommandPool {
        match role {
            QueueRole::Graphics => &self.graphics_pool,
            QueueRole::Transfer => &self.transfer_pool,
        }
    }

    /// Memory type lookup against the selected device
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> Option<u32> {
        find_memory_type(&self.physical.memory_properties, type_filter, properties)
    }

    /// Memory heaps and types of the selected device
    pub const fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.physical.memory_properties
    }

    /// Create a shader module from SPIR-V bytes
    pub fn create_shader_module(&self, bytecode: &[u8]) -> VulkanResult<ShaderModule> {
        ShaderModule::from_bytes(self.device().clone(), bytecode)
    }

    /// Create a binary semaphore
    pub fn create_semaphore(&self) -> VulkanResult<Semaphore> {
        Semaphore::new(self.device().clone())
    }

    /// Create a fence, optionally already signaled
    pub fn create_fence(&self, signaled: bool) -> VulkanResult<Fence> {
        Fence::new(self.device().clone(), signaled)
    }

    /// Allocate command buffers from the pool of a role
    pub fn allocate_command_buffers(
        &self,
        role: QueueRole,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> VulkanResult<Vec<vk::CommandBuffer>> {
        self.command_pool(role).allocate_command_buffers(level, count)
    }

    /// Return command buffers to the pool of a role
    pub fn free_command_buffers(&self, role: QueueRole, buffers: &[vk::CommandBuffer]) {
        self.command_pool(role).free_command_buffers(buffers);
    }

    /// Submit work to the queue of a role, signaling `fence` on completion
    pub fn submit(&self, role: QueueRole, submits: &[vk::SubmitInfo], fence: vk::Fence) -> VulkanResult<()> {
        unsafe {
            self.device()
                .queue_submit(self.queue(role), submits, fence)
                .map_err(VulkanError::Api)
        }
    }

    /// Present on the graphics queue.
    ///
    /// Surface invalidation comes back as a status; anything else is an error.
    pub fn present(
        &self,
        loader: &SwapchainLoader,
        present_info: &vk::PresentInfoKHR,
    ) -> VulkanResult<PresentOutcome> {
        match unsafe { loader.queue_present(self.graphics_queue, present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Block until a fence signals
    pub fn wait_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        unsafe {
            self.device()
                .wait_for_fences(&[fence], true, u64::MAX)
                .map_err(VulkanError::Api)
        }
    }

    /// Return a fence to the unsignaled state
    pub fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        unsafe { self.device().reset_fences(&[fence]).map_err(VulkanError::Api) }
    }

    /// Block until the queue of a role is idle
    pub fn wait_queue_idle(&self, role: QueueRole) -> VulkanResult<()> {
        unsafe {
            self.device()
                .queue_wait_idle(self.queue(role))
                .map_err(VulkanError::Api)
        }
    }

    /// Block until every queue on the device is idle
    pub fn wait_device_idle(&self) -> VulkanResult<()> {
        unsafe { self.device().device_wait_idle().map_err(VulkanError::Api) }
    }

    /// Write descriptor sets
    pub fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        unsafe { self.device().update_descriptor_sets(writes, &[]) };
    }

    /// Record and run a one-time command buffer on a queue, then wait for the
    /// queue to go idle. The buffer is freed on every exit path.
    pub fn execute_on_queue<F>(&self, role: QueueRole, record: F) -> VulkanResult<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let command_buffer = ScopedCommandBuffer::allocate(self.command_pool(role))?;
        let handle = command_buffer.handle();

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device()
                .begin_command_buffer(handle, &begin_info)
                .map_err(VulkanError::Api)?;
        }
        record(handle);
        unsafe {
            self.device()
                .end_command_buffer(handle)
                .map_err(VulkanError::Api)?;
        }

        let command_buffers = [handle];
        let submit = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
        self.submit(role, &[submit], vk::Fence::null())?;
        self.wait_queue_idle(role)
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if let Err(e) = self.wait_device_idle() {
            log::error!("Device idle wait failed during shutdown: {e}");
        }
        log::debug!("Destroying device context");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, queue_count: u32, supports_present: bool) -> QueueFamilyCaps {
        QueueFamilyCaps { flags, queue_count, supports_present }
    }

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in props.memory_types.iter_mut().zip(flags) {
            slot.property_flags = property_flags;
        }
        props
    }

    #[test]
    fn test_shared_family_preferred() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 2, false),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 16, true),
        ];
        let indices = select_queue_families(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, transfer: 1 });
        assert!(indices.is_shared());
    }

    #[test]
    fn test_split_families_when_graphics_lacks_transfer() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1, true),
            family(vk::QueueFlags::TRANSFER, 1, false),
        ];
        let indices = select_queue_families(&families).unwrap();
        assert_eq!(indices.get(QueueRole::Graphics), 0);
        assert_eq!(indices.get(QueueRole::Transfer), 1);
        assert!(!indices.is_shared());
    }

    #[test]
    fn test_no_family_without_present() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 4, false)];
        assert!(select_queue_families(&families).is_none());
        assert!(select_queue_families(&[]).is_none());
    }

    #[test]
    fn test_queue_plan_shared_family_with_two_queues() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 2, true)];
        let plan = QueuePlan::new(QueueFamilyIndices { graphics: 0, transfer: 0 }, &families);
        assert_eq!(plan.requests, vec![(0, 2)]);
        assert_eq!(plan.graphics, (0, 0));
        assert_eq!(plan.transfer, (0, 1));
    }

    #[test]
    fn test_queue_plan_shared_single_queue() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1, true)];
        let plan = QueuePlan::new(QueueFamilyIndices { graphics: 0, transfer: 0 }, &families);
        assert_eq!(plan.requests, vec![(0, 1)]);
        assert_eq!(plan.graphics, plan.transfer);
    }

    #[test]
    fn test_queue_plan_split() {
        let plan = QueuePlan::new(QueueFamilyIndices { graphics: 0, transfer: 2 }, &[]);
        assert_eq!(plan.requests, vec![(0, 1), (2, 1)]);
        assert_eq!(plan.transfer, (2, 0));
    }

    #[test]
    fn test_memory_type_requires_superset() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b111, wanted), Some(2));
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(1)
        );
    }

    #[test]
    fn test_memory_type_respects_filter() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        assert_eq!(
            find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(1)
        );
        assert_eq!(
            find_memory_type(&props, 0b01, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }

    #[test]
    fn test_memory_type_ignores_entries_past_count() {
        let mut props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(
            find_memory_type(&props, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }

    #[test]
    fn test_device_requirements() {
        let requirements = DeviceRequirements::default();
        let mut features = vk::PhysicalDeviceFeatures {
            geometry_shader: vk::TRUE,
            vertex_pipeline_stores_and_atomics: vk::TRUE,
            ..Default::default()
        };
        assert!(unmet_device_requirements(
            &requirements,
            vk::PhysicalDeviceType::DISCRETE_GPU,
            &features
        )
        .is_empty());

        features.geometry_shader = vk::FALSE;
        let unmet =
            unmet_device_requirements(&requirements, vk::PhysicalDeviceType::INTEGRATED_GPU, &features);
        assert_eq!(unmet.len(), 2);

        let relaxed = DeviceRequirements {
            require_discrete_gpu: false,
            require_geometry_shader: false,
            require_vertex_pipeline_stores_and_atomics: true,
        };
        assert!(unmet_device_requirements(&relaxed, vk::PhysicalDeviceType::INTEGRATED_GPU, &features)
            .is_empty());
    }

    #[test]
    fn test_unsupported_names() {
        let swapchain = CString::new("VK_KHR_swapchain").unwrap();
        let surface = CString::new("VK_KHR_surface").unwrap();
        let available = [surface.as_c_str()];
        assert_eq!(
            unsupported_names(&[swapchain.as_c_str(), surface.as_c_str()], &available),
            vec!["VK_KHR_swapchain".to_string()]
        );
        assert!(unsupported_names(&[surface.as_c_str()], &available).is_empty());
    }
}
