// Shader module loading
//
// Precompiled SPIR-V is read from disk at startup. A missing or malformed
// file is fatal to pipeline construction.

use anyhow::Result;
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;
use crate::error::RendererError;

/// Read a SPIR-V file into aligned words
pub fn load_spirv(path: &Path) -> Result<Vec<u32>, RendererError> {
    let shader_load = |source| RendererError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    };

    let bytes = std::fs::read(path).map_err(shader_load)?;
    let code = parse_spirv(&bytes).map_err(shader_load)?;
    log::debug!("Loaded {:?} ({} words)", path, code.len());
    Ok(code)
}

/// Split little-endian bytes into SPIR-V words
pub fn parse_spirv(bytes: &[u8]) -> std::io::Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    let module = unsafe { device.device.create_shader_module(&create_info, None) }
        .map_err(RendererError::creating("shader module"))?;
    Ok(module)
}
