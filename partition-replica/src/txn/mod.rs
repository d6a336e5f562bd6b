//! Transaction lifecycle: volatile/durable metadata (§4.5, §4.6), state
//! resolution for readers that hit an unresolved write intent (§4.8), scan
//! cursors (§4.3), and orphan recovery (§4.9).

pub mod cleanup;
pub mod cursor;
pub mod cursor_registry;
pub mod recovery;
pub mod state;
pub mod state_resolver;

pub use cleanup::TxCleanup;
pub use cursor::ScanCursor;
pub use cursor_registry::CursorRegistry;
pub use recovery::RecoveryCoordinator;
pub use state::{DurableTxMeta, TransactionResult, TxState, VolatileTxMeta};
pub use state_resolver::{TransactionStateResolver, TransactionStateTracker};
