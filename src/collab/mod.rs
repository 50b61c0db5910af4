//! Collaborative editing engine
//!
//! Block-level pessimistic locking with rank-based preemption, a document
//! approval workflow, and the coordinator that ties sessions to transports.

pub mod coordinator;
pub mod lock;
pub mod participant;
pub mod protocol;
pub mod session;
pub mod workflow;

pub use coordinator::{Coordinator, Statistics};
pub use lock::{LockEvent, LockOutcome, LockPolicy, LockTable, Requester};
pub use participant::{Connection, Participant};
pub use protocol::{ClientMessage, DocumentState, Envelope, ServerEvent};
pub use session::{DocumentSession, SessionInfo};
pub use workflow::{ApprovalAction, Workflow};
