// =============================================================================
// Analysis over stored snapshot history
// =============================================================================
//
// `evaluator` applies the tiered OI/funding alert rule to the newest window of
// each symbol. `report` ranks first-to-last changes over a trailing window.

pub mod evaluator;
pub mod report;

pub use evaluator::{AlertEvent, AlertRule, Evaluator};
pub use report::ChangeReport;
