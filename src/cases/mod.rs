pub mod registry;
pub mod zero_for_small_for;

pub use registry::{CaseRegistry, TestCase};
pub use zero_for_small_for::{ScenarioFlags, ZeroForSmallFor};
