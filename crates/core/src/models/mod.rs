pub mod scenario;
pub mod series;
pub mod settings;
pub mod sync;
pub mod valuation;
