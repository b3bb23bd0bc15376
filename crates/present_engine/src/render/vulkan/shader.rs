//! Shader bytecode store and shader modules

use std::io::Cursor;
use std::path::{Path, PathBuf};

use ash::{vk, Device};
use thiserror::Error;

use crate::render::vulkan::{VulkanError, VulkanResult};

/// Shader loading errors
#[derive(Error, Debug)]
pub enum ShaderError {
    /// No `<name>.spv` in any searched directory
    #[error("Shader '{name}' not found (searched {searched:?})")]
    NotFound {
        /// Logical shader name
        name: String,
        /// Directories that were searched
        searched: Vec<PathBuf>,
    },

    /// Reading the file failed
    #[error("Failed to read shader '{name}': {source}")]
    Io {
        /// Logical shader name
        name: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Bytecode is not a whole number of 32-bit words
    #[error("Shader bytecode of {len} bytes is not a multiple of 4")]
    Misaligned {
        /// Length of the rejected blob
        len: usize,
    },
}

/// Source of compiled shader bytecode, looked up by logical name
pub trait ShaderStore {
    /// Raw SPIR-V bytes for `name`
    fn load(&self, name: &str) -> Result<Vec<u8>, ShaderError>;
}

/// Loads `<dir>/<name>.spv` from the first directory that has it
#[derive(Debug, Clone)]
pub struct FileShaderStore {
    search_dirs: Vec<PathBuf>,
}

impl FileShaderStore {
    /// Store that only searches `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            search_dirs: vec![dir.into()],
        }
    }

    /// Store that searches `dir`, then the build script's output directory
    pub fn with_fallbacks(dir: impl Into<PathBuf>) -> Self {
        let mut store = Self::new(dir);
        for fallback in ["target/shaders", "../target/shaders"] {
            let fallback = PathBuf::from(fallback);
            if !store.search_dirs.contains(&fallback) {
                store.search_dirs.push(fallback);
            }
        }
        store
    }

    /// Directories searched in order
    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    fn candidate(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.spv"))
    }
}

impl ShaderStore for FileShaderStore {
    fn load(&self, name: &str) -> Result<Vec<u8>, ShaderError> {
        let Some(path) = self
            .search_dirs
            .iter()
            .map(|dir| Self::candidate(dir, name))
            .find(|path| path.is_file())
        else {
            return Err(ShaderError::NotFound {
                name: name.to_string(),
                searched: self.search_dirs.clone(),
            });
        };

        log::debug!("Loading shader '{}' from {}", name, path.display());
        std::fs::read(&path).map_err(|source| ShaderError::Io {
            name: name.to_string(),
            source,
        })
    }
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(device: Device, bytes: &[u8]) -> VulkanResult<Self> {
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return Err(ShaderError::Misaligned { len: bytes.len() }.into());
        }

        // Copies into u32 words so the source slice needs no alignment
        let code = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid SPIR-V: {e}")))?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let module = unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, module })
    }

    /// Get shader module handle
    pub const fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}
