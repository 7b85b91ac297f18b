pub mod check;
pub mod window;

pub use check::{
    alerts_match, check_expected_alerts, check_expected_rule_group, check_expected_samples,
    values_match, within,
};
pub use window::{elapsed_ms, Window, WindowSet};
