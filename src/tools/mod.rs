pub mod handler;
pub mod pipeline;
pub mod registry;

pub use handler::{ToolDef, ToolHandler};
pub use pipeline::ToolPipeline;
pub use registry::ToolRegistry;
