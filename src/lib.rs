pub mod compile;
pub mod error;
pub mod ir;
pub mod load;
pub mod lower;
pub mod parse;
pub mod registry;
pub mod substitute;
pub mod validate;
pub mod wasm;

pub use compile::{CompileContext, CompilerOptions, compile_project, compile_snapshot, validate_snapshot};
pub use error::{CompilationError, CompileError, SeedingError};
pub use ir::types::{AgentIR, AgentKind, WorkflowIR};
pub use load::{ProjectBundle, ProjectSnapshot};
pub use registry::CapabilityRegistry;
