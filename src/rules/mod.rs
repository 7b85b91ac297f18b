pub mod group;
pub mod render;

pub use group::{format_duration, Rule, RuleFile, RuleGroup};
pub use render::{AnnotationRenderer, FixtureRenderer};
