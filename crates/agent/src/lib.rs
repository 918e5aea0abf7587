//! Request routing and admission for the concierge assistant.
//!
//! Every inbound message goes through the same constrained loop:
//! 1. **Admission** (`guard`): allowlist, then the per-user sliding window.
//! 2. **Planning** (`planner`): slash commands, then the ordered routing
//!    table, else the generative fallback.
//! 3. **Execution**: built-in command, capability dispatch (`tools`,
//!    `capabilities`) or a generative backend (`llm`).
//! 4. **Rendering** (`replies`): every branch ends in reply text.
//!
//! `runtime::AgentRuntime` is the composition of all of the above.

pub mod capabilities;
pub mod guard;
pub mod llm;
pub mod planner;
pub mod replies;
pub mod runtime;
pub mod tools;

pub use guard::{AdmissionError, Clock, ManualClock, SecurityGuard, SystemClock};
pub use llm::{BackendError, GenerativeBackend};
pub use planner::{BuiltinCommand, Plan, Planner};
pub use runtime::{AgentReply, AgentRuntime, ReplyOutcome};
pub use tools::{Capability, CapabilityDescriptor, CapabilityResult, Dispatcher, ToolArguments};
