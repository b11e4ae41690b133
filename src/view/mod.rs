// VIEW: Camera and the render boundary
pub mod camera;
pub mod render;

pub use camera::Camera;
pub use render::{DrawBody, RecordingRenderer, RenderOrchestrator, RenderStats, Renderer, TracingRenderer};
