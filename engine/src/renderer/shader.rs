use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{RenderError, Result};

/// Source of SPIR-V words for a shader stage.
pub trait ShaderLoader {
    fn load(&self, path: &Path) -> Result<Vec<u32>>;
}

/// Loads shaders from disk, relative to `root`.
///
/// `.spv` files are read as-is. GLSL sources (`.vert`, `.frag`, `.comp`) are
/// compiled with naga on every load, so edits are picked up whenever the
/// pipelines are rebuilt.
#[derive(Debug, Clone, Default)]
pub struct FileShaderLoader {
    root: PathBuf,
}

impl FileShaderLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl ShaderLoader for FileShaderLoader {
    fn load(&self, path: &Path) -> Result<Vec<u32>> {
        let full_path = self.resolve(path);
        let io_error = |source| RenderError::ShaderIo {
            path: full_path.clone(),
            source,
        };

        let words = if full_path.extension().is_some_and(|ext| ext == "spv") {
            let bytes = fs::read(&full_path).map_err(io_error)?;
            ash::util::read_spv(&mut Cursor::new(bytes)).map_err(io_error)?
        } else {
            let stage = shader_stage(&full_path)?;
            let source = fs::read_to_string(&full_path).map_err(io_error)?;
            compile_glsl(&full_path, &source, stage)?
        };

        debug!(path = %full_path.display(), words = words.len(), "shader loaded");
        Ok(words)
    }
}

fn shader_stage(path: &Path) -> Result<naga::ShaderStage> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("vert") => Ok(naga::ShaderStage::Vertex),
        Some("frag") => Ok(naga::ShaderStage::Fragment),
        Some("comp") => Ok(naga::ShaderStage::Compute),
        _ => Err(RenderError::ShaderCompile {
            path: path.to_path_buf(),
            message: "unknown shader stage; expected .vert, .frag, .comp or .spv".to_string(),
        }),
    }
}

/// GLSL -> naga IR -> validated SPIR-V.
pub fn compile_glsl(path: &Path, source: &str, stage: naga::ShaderStage) -> Result<Vec<u32>> {
    let compile_error = |message: String| RenderError::ShaderCompile {
        path: path.to_path_buf(),
        message,
    };

    let module = naga::front::glsl::Frontend::default()
        .parse(&naga::front::glsl::Options::from(stage), source)
        .map_err(|e| compile_error(format!("{e:?}")))?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| compile_error(format!("{e:?}")))?;

    // sources are written for Vulkan clip space already
    let mut options = naga::back::spv::Options::default();
    options
        .flags
        .remove(naga::back::spv::WriterFlags::ADJUST_COORDINATE_SPACE);

    naga::back::spv::write_vec(&module, &info, &options, None)
        .map_err(|e| compile_error(format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn repo_shaders() -> FileShaderLoader {
        FileShaderLoader::new(concat!(env!("CARGO_MANIFEST_DIR"), "/.."))
    }

    #[test]
    fn compiles_bundled_glsl() {
        let loader = repo_shaders();
        let vert = loader.load(Path::new("shaders/shader.vert")).unwrap();
        let frag = loader.load(Path::new("shaders/shader.frag")).unwrap();
        assert_eq!(vert[0], SPIRV_MAGIC);
        assert_eq!(frag[0], SPIRV_MAGIC);
    }

    #[test]
    fn reads_precompiled_spirv() {
        let loader = repo_shaders();
        let words = loader.load(Path::new("shaders/shader.frag")).unwrap();

        let dir = std::env::temp_dir().join("galaxy-engine-shader-test");
        fs::create_dir_all(&dir).unwrap();
        let spv_path = dir.join("shader.frag.spv");
        fs::write(&spv_path, bytemuck::cast_slice::<u32, u8>(&words)).unwrap();

        let loaded = FileShaderLoader::default().load(&spv_path).unwrap();
        assert_eq!(loaded, words);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = repo_shaders().load(Path::new("shaders/missing.vert"));
        assert!(matches!(result, Err(RenderError::ShaderIo { .. })));
    }

    #[test]
    fn invalid_glsl_is_a_compile_error() {
        let result = compile_glsl(
            Path::new("broken.frag"),
            "#version 450\nvoid main() { undefined_call(); }\n",
            naga::ShaderStage::Fragment,
        );
        assert!(matches!(result, Err(RenderError::ShaderCompile { .. })));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let result = repo_shaders().load(Path::new("shaders/shader.glsl"));
        assert!(matches!(result, Err(RenderError::ShaderCompile { .. })));
    }
}
