//! Cellforge - networked spreadsheet engine
//!
//! Named cells hold literal text or formulas over other cells. Reads compute
//! results on demand; writes are validated against every dependent formula
//! before they are stored, then pushed to live subscribers.
//!
//! # Features
//!
//! - Formula language with `+ - * /`, parentheses, unary signs and the
//!   built-ins `SUM`, `AVG`, `MIN`, `MAX`, `EXTERNAL_REF`
//! - Exact integer arithmetic, float promotion on division or float operands
//! - Cycle detection, reported as the `ERROR` result instead of a failure
//! - Change notification through per-cell subscriptions
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cellforge::core::SheetEngine;
//! use cellforge::external::NoExternalRef;
//! use cellforge::store::MemoryStore;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), cellforge::error::StoreError> {
//! let engine = SheetEngine::new(Arc::new(MemoryStore::new()), Arc::new(NoExternalRef));
//! let cancel = CancellationToken::new();
//!
//! engine.upsert("sheet1", "var1", "1", &cancel).await?;
//! engine.upsert("sheet1", "var2", "=var1 * 2", &cancel).await?;
//!
//! let cell = engine.get_cell("sheet1", "var2", &cancel).await?;
//! assert_eq!(cell.result, "2");
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod core;
pub mod error;
pub mod external;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{EvalError, FormulaError, StoreError, StoreResult};
pub use types::{CellResponse, SheetResponse, SubscriptionRecord};
