//! Two simulated clients sharing an in-memory chain and peer hub, and the helpers that drive them through channel
//! and transfer lifecycles.

pub mod fixtures;
pub mod mock_client;

pub use fixtures::TestNetwork;
pub use mock_client::MockClient;
