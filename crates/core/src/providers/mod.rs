pub mod traits;

// Remote source implementations
pub mod alphavantage;
pub mod frankfurter;

pub use traits::MarketDataSource;
