// Lookup entities referenced by programming and procurement records.
//
// Both are keyed by a natural code and created lazily during imports:
// `find_or_create_*` is the only write path and never duplicates a code.

pub mod goal;
pub mod unit;

pub use goal::{count_goals, find_goal_by_code, find_or_create_goal, list_goals, BudgetGoal};
pub use unit::{
    count_units, find_or_create_unit, find_unit_by_code, list_units,
    OrganizationalUnit,
};
