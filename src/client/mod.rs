//! Debugger-side client
//!
//! `Dispatcher` is the transport-agnostic correlator; `Session` runs it over
//! TCP. Updates land in a `TargetModel`.

pub mod command;
pub mod dispatcher;
pub mod model;
pub mod parsers;
pub mod session;

pub use command::{CommandId, MemorySlot, RemoteCommand, FIRST_COMMAND_ID};
pub use dispatcher::{BreakpointFlags, Dispatcher, Transport};
pub use model::{TargetEvent, TargetModel, TargetState};
pub use parsers::{parse_response, Update};
pub use session::{LinkEvent, Session, TcpTransport};
