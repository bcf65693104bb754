//! Narrow async traits over the four external collaborators: calendar,
//! task manager, document workspace, and LLM. Each has a `reqwest`-backed
//! implementation (not wired to any particular vendor's exact wire format,
//! since that's out of scope) and, in `providers::fakes`, an in-memory
//! fake used by the handler tests under `tests/`.
pub mod calendar;
pub mod docs;
pub mod fakes;
pub mod llm;
pub mod tasks;

pub use calendar::CalendarClient;
pub use docs::DocsClient;
pub use llm::LlmClient;
pub use tasks::TaskClient;
