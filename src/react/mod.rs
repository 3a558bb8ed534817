//! 认知层：Planner 与 ReAct 主循环

pub mod events;
pub mod loop_;
pub mod planner;

pub use events::ReactEvent;
pub use loop_::{ReactResult, ReactSession};
pub use planner::{parse_llm_output, Planner, PlannerOutput, ToolCall};
