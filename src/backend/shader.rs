// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. build.rs compiles the GLSL under
// shaders/ with glslc; these helpers turn the result into shader modules.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytes into aligned words and check the magic number
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).context("Malformed SPIR-V")?;
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(other) => anyhow::bail!("Not SPIR-V (magic {:#010x})", other),
        None => anyhow::bail!("Empty SPIR-V module"),
    }
}

/// Load SPIR-V shader from bytes and create a shader module
pub fn create_shader_module(device: &VulkanDevice, code: &[u8]) -> Result<vk::ShaderModule> {
    let words = spirv_words(code)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

/// Read a compiled `.spv` file and create a shader module from it
pub fn load_shader_module<P: AsRef<Path>>(device: &VulkanDevice, path: P) -> Result<vk::ShaderModule> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader {:?} (is glslc installed?)", path))?;
    create_shader_module(device, &bytes)
        .with_context(|| format!("Failed to load shader {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn accepts_spirv_header() {
        let bytes = module(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = spirv_words(&bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[1], 0x0001_0000);
    }

    #[test]
    fn rejects_wrong_magic() {
        assert!(spirv_words(&module(&[0xdead_beef, 0])).is_err());
    }

    #[test]
    fn rejects_truncated_words() {
        let mut bytes = module(&[SPIRV_MAGIC]);
        bytes.push(0);
        assert!(spirv_words(&bytes).is_err());
    }

    #[test]
    fn rejects_empty_input() {
        assert!(spirv_words(&[]).is_err());
    }
}
