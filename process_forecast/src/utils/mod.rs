/// Cooperative cancellation of long-running computations
pub mod cancellation;
