//! Room membership and the per-peer session lifecycle.

pub mod arbiter;
pub mod buffer;
pub mod manager;
pub mod monitor;
pub mod registry;
pub mod retry;
pub mod session;
pub mod state;

pub use arbiter::{is_initiator, role, Role};
pub use buffer::IceCandidateBuffer;
pub use manager::LifecycleManager;
pub use monitor::{MeshMonitor, MeshStatus};
pub use registry::SessionRegistry;
pub use retry::{RetryDecision, RetryLedger};
pub use session::{PeerSession, SessionState};
pub use state::RoomState;
