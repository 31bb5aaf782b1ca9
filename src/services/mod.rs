pub mod ai_gateway;
pub mod favorites;
pub mod listings;
pub mod metrics;
pub mod quota;
pub mod sweeper;
pub mod uploads;

pub use ai_gateway::*;
pub use favorites::*;
pub use listings::*;
pub use metrics::*;
pub use quota::*;
pub use sweeper::*;
pub use uploads::*;
