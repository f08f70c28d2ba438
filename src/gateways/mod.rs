//! Ports to the systems the engine consumes but does not own.

pub mod content;
pub mod ledger;
pub mod messaging;
pub mod rooms;

pub use content::{ContentCatalog, ContentProvider};
pub use ledger::{LedgerGateway, StoreLedger};
pub use messaging::{HubMessenger, MessagingGateway, OpenPrompts, RecordingMessenger};
pub use rooms::{MemoryRooms, RoomDirectory};
