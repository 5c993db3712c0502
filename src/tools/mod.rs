//! 工具层：Tool trait、注册表、带超时的执行器与重复调用熔断

pub mod breaker;
pub mod executor;
pub mod registry;

pub use breaker::{BreakerConfig, CallBreaker, GuardedExecutor, ToolOutcome, DEFAULT_READ_ONLY_TOOLS};
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
