//! Conduit kernel: workflow coordination, configuration loading, logging
//! setup and the bootstrap that wires them to the runtime.

pub mod config;
pub mod error;
pub mod kernel;
pub mod logging;
pub mod workflow;

pub use error::{KernelError, KernelResult};
pub use kernel::{ConduitKernel, ConduitKernelBuilder};
pub use workflow::{CompensatingAction, WorkflowCoordinator, WorkflowCoordinatorBuilder};
