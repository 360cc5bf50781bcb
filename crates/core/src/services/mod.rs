pub mod fetchers;
pub mod join;
pub mod merge;
pub mod reactive;
pub mod refresh;
pub mod scenario_service;
pub mod shares;
pub mod staleness;
pub mod sync_unit;
pub mod valuation_graph;
