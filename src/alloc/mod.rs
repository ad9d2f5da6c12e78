pub mod counters;
pub mod manual;
pub mod registry;
pub mod tracker;
