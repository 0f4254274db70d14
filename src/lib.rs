//! # Store Triggers
//!
//! A keyed publish/subscribe dispatch engine. Stores publish changes to named
//! keys; listeners subscribe to keys and receive batched, deduplicated,
//! optionally delayed notifications.
//!
//! ## Core Concepts
//!
//! - **Stores**: Publishers that own per-key subscription lists and call `trigger`
//! - **Listeners**: Callbacks with a stable identity, invoked with the keys that changed
//! - **Dispatch context**: Shared pending table that merges deliveries per listener
//!   across every store on the context
//! - **Throttling**: Per-store coalescing windows that delay and batch deliveries
//! - **Trigger blocks**: A nesting counter that pauses delivery for every store
//!
//! ## Example
//!
//! ```ignore
//! use store_triggers::{Changed, DispatchConfig, DispatchContext, Listener, Store};
//!
//! let context = DispatchContext::new(DispatchConfig::default());
//! let store = Store::new(&context);
//!
//! let listener = Listener::new(|changed| match changed {
//!     Changed::All => println!("everything changed"),
//!     Changed::Keys(keys) => println!("changed: {:?}", keys),
//! });
//! store.subscribe(&listener, "user:42")?;
//!
//! // Batch several changes into one delivery
//! {
//!     let _block = context.block();
//!     store.trigger("user:42");
//!     store.trigger_keys(["user:42", "user:7"]);
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod pending;
pub mod probe;
pub mod scheduler;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use config::{DispatchConfig, StoreOptions};
pub use context::{DispatchContext, DispatchStats, TriggerBlockGuard};
pub use error::{DispatchError, Result};
pub use pending::PendingKeys;
pub use probe::{DispatchProbe, NoopProbe, TracingProbe};
pub use scheduler::{ManualScheduler, Scheduler, ThreadScheduler, TimerHandle, TimerTask};
pub use store::Store;
pub use subscriptions::{AutoSubscription, Changed, Listener, NoopHooks, TrackingHooks};
pub use types::*;
