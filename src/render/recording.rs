use log::debug;

use super::{
    DrawCommand, FrameUniforms, MeshHandle, PassKind, RenderBackend, Viewport, WaterUniforms,
};
use crate::error::RenderError;
use crate::mesh::{MeshBuffer, Topology};
use crate::water::WaterMaps;

/// Summary of one backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Upload { label: String, handle: MeshHandle },
    Replace { handle: MeshHandle },
    WaterMaps { dudv: (u32, u32), normal: (u32, u32) },
    ResizeTargets(Viewport),
    BeginFrame,
    Pass { kind: PassKind, frame: FrameUniforms, draws: usize },
    Water { mesh: MeshHandle, water: WaterUniforms },
    EndFrame,
    AbortFrame,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMesh {
    pub label: String,
    pub vertices: usize,
    pub triangles: usize,
    pub topology: Topology,
}

/// Backend that keeps a log of every call instead of drawing.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    meshes: Vec<RecordedMesh>,
    calls: Vec<RecordedCall>,
    targets: Option<Viewport>,
    /// Fails the next target allocation, for exercising error paths.
    fail_next_resize: bool,
    fail_next_replace: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }

    pub fn meshes(&self) -> &[RecordedMesh] {
        &self.meshes
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&RecordedMesh> {
        self.meshes.get(handle.index())
    }

    pub fn targets(&self) -> Option<Viewport> {
        self.targets
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn fail_next_resize(&mut self) {
        self.fail_next_resize = true;
    }

    pub fn fail_next_replace(&mut self) {
        self.fail_next_replace = true;
    }

    /// `"begin"`, `"end"` and `"abort"` for each frame bracket, in order.
    pub fn frame_brackets(&self) -> Vec<&'static str> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                RecordedCall::BeginFrame => Some("begin"),
                RecordedCall::EndFrame => Some("end"),
                RecordedCall::AbortFrame => Some("abort"),
                _ => None,
            })
            .collect()
    }

    /// Passes of the recorded frames, in order, with water composites as `"water"`.
    pub fn pass_sequence(&self) -> Vec<&'static str> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Pass { kind, .. } => Some(kind.label()),
                RecordedCall::Water { .. } => Some("water"),
                _ => None,
            })
            .collect()
    }

    fn record_mesh(label: &str, mesh: &MeshBuffer, topology: Topology) -> RecordedMesh {
        let triangles = match topology {
            Topology::Triangles => mesh.triangle_count(),
            Topology::Strips { strips, strip_len } => {
                strips as usize * (strip_len as usize).saturating_sub(2)
            }
        };
        RecordedMesh {
            label: label.to_string(),
            vertices: mesh.vertices.len(),
            triangles,
            topology,
        }
    }
}

impl RenderBackend for RecordingBackend {
    fn upload_mesh(
        &mut self,
        label: &str,
        mesh: &MeshBuffer,
        topology: Topology,
    ) -> Result<MeshHandle, RenderError> {
        let handle = MeshHandle::new(self.meshes.len());
        self.meshes.push(Self::record_mesh(label, mesh, topology));
        self.calls.push(RecordedCall::Upload {
            label: label.to_string(),
            handle,
        });
        Ok(handle)
    }

    fn replace_mesh(
        &mut self,
        handle: MeshHandle,
        mesh: &MeshBuffer,
        topology: Topology,
    ) -> Result<(), RenderError> {
        if std::mem::take(&mut self.fail_next_replace) {
            return Err(RenderError::Backend(format!(
                "refused to replace mesh {}",
                handle.index()
            )));
        }
        let slot = self
            .meshes
            .get_mut(handle.index())
            .ok_or(RenderError::UnknownMesh(handle.index()))?;
        let label = std::mem::take(&mut slot.label);
        *slot = Self::record_mesh(&label, mesh, topology);
        self.calls.push(RecordedCall::Replace { handle });
        Ok(())
    }

    fn upload_water_maps(&mut self, maps: &WaterMaps) -> Result<(), RenderError> {
        self.calls.push(RecordedCall::WaterMaps {
            dudv: maps.dudv.dimensions(),
            normal: maps.normal.dimensions(),
        });
        Ok(())
    }

    fn resize_targets(&mut self, viewport: Viewport) -> Result<(), RenderError> {
        if std::mem::take(&mut self.fail_next_resize) {
            return Err(RenderError::TargetAllocation {
                label: "reflection-target",
                width: viewport.width,
                height: viewport.height,
                message: "allocation refused".to_string(),
            });
        }
        debug!("recording target resize to {}x{}", viewport.width, viewport.height);
        self.targets = Some(viewport);
        self.calls.push(RecordedCall::ResizeTargets(viewport));
        Ok(())
    }

    fn begin_frame(&mut self) -> Result<(), RenderError> {
        self.calls.push(RecordedCall::BeginFrame);
        Ok(())
    }

    fn render_pass(
        &mut self,
        pass: PassKind,
        frame: &FrameUniforms,
        draws: &[DrawCommand],
    ) -> Result<(), RenderError> {
        if let Some(draw) = draws.iter().find(|d| d.mesh.index() >= self.meshes.len()) {
            return Err(RenderError::UnknownMesh(draw.mesh.index()));
        }
        self.calls.push(RecordedCall::Pass {
            kind: pass,
            frame: *frame,
            draws: draws.len(),
        });
        Ok(())
    }

    fn composite_water(
        &mut self,
        mesh: MeshHandle,
        _frame: &FrameUniforms,
        water: &WaterUniforms,
    ) -> Result<(), RenderError> {
        if mesh.index() >= self.meshes.len() {
            return Err(RenderError::UnknownMesh(mesh.index()));
        }
        self.calls.push(RecordedCall::Water {
            mesh,
            water: *water,
        });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), RenderError> {
        self.calls.push(RecordedCall::EndFrame);
        Ok(())
    }

    fn abort_frame(&mut self) {
        self.calls.push(RecordedCall::AbortFrame);
    }
}
