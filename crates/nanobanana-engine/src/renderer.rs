use std::path::{Path, PathBuf};

use crate::raster::RasterImage;

/// Renderer settings the capture strategies may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    pub resolution_x: u32,
    pub resolution_y: u32,
    pub resolution_percentage: u32,
    pub engine: String,
    pub output_path: Option<PathBuf>,
    pub file_format: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            resolution_x: 1920,
            resolution_y: 1080,
            resolution_percentage: 100,
            engine: "BLENDER_EEVEE".to_string(),
            output_path: None,
            file_format: "PNG".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Mesh,
    Light,
    Camera,
}

/// Host renderer seen by the capture chain.
///
/// Configuration is only mutated through a [`ConfigGuard`], which puts the
/// original settings back when it is released or dropped.
pub trait Renderer {
    fn config(&self) -> RendererConfig;
    fn set_config(&mut self, config: &RendererConfig) -> anyhow::Result<()>;
    fn render_to_file(&mut self, path: &Path, width: u32, height: u32) -> anyhow::Result<()>;
    fn in_memory_result(&self) -> Option<&RasterImage>;
    fn count_objects(&self, kind: ObjectKind) -> usize;

    fn has_world_lighting(&self) -> bool {
        false
    }
}

/// Scoped exclusive access to the renderer configuration.
pub struct ConfigGuard<'a> {
    renderer: &'a mut dyn Renderer,
    snapshot: RendererConfig,
    released: bool,
}

impl<'a> ConfigGuard<'a> {
    pub fn acquire(renderer: &'a mut dyn Renderer) -> Self {
        let snapshot = renderer.config();
        Self {
            renderer,
            snapshot,
            released: false,
        }
    }

    pub fn snapshot(&self) -> &RendererConfig {
        &self.snapshot
    }

    pub fn renderer(&mut self) -> &mut dyn Renderer {
        &mut *self.renderer
    }

    pub fn release(mut self) -> anyhow::Result<()> {
        self.released = true;
        self.restore()
    }

    fn restore(&mut self) -> anyhow::Result<()> {
        if self.renderer.config() == self.snapshot {
            return Ok(());
        }
        self.renderer.set_config(&self.snapshot)
    }
}

impl Drop for ConfigGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.restore() {
            tracing::error!("failed to restore renderer configuration: {err:#}");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SceneSummary {
    pub meshes: usize,
    pub lights: usize,
    pub cameras: usize,
    pub world_lighting: bool,
}

impl SceneSummary {
    pub fn from_renderer(renderer: &dyn Renderer) -> Self {
        Self {
            meshes: renderer.count_objects(ObjectKind::Mesh),
            lights: renderer.count_objects(ObjectKind::Light),
            cameras: renderer.count_objects(ObjectKind::Camera),
            world_lighting: renderer.has_world_lighting(),
        }
    }

    pub fn describe(&self) -> String {
        let mut text = format!(
            "Scene with {} meshes, {} lights, {} cameras",
            self.meshes, self.lights, self.cameras
        );
        if self.world_lighting {
            text.push_str(", world lighting enabled");
        }
        text
    }
}
