//! 终端界面：行输入、渲染与 REPL 状态机

pub mod input;
pub mod render;
pub mod repl;

pub use input::{EditorInput, InputEvent, LineSource, ScriptedInput};
pub use render::{color_enabled, Renderer};
pub use repl::{
    classify, run_repl, run_repl_with_interrupts, spawn_interrupt_listener, InputAction, ReplState,
    ReplSummary,
};
