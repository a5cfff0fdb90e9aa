//! # Curio analysis sync (curio-sync)
//!
//! Client-side job state synchronization for the analysis surfaces.
//!
//! **Purpose:** Keep each project criterion's run state in step with the
//! server: optimistic local transitions on user intent, fire-and-forget job
//! commands over the surface's WebSocket, and full snapshot refetches on
//! every server push.
//!
//! **Architecture:** one [`CriteriaJobController`] per job kind, parameterized
//! by its [`JobCapabilities`]; a [`Surface`] routes one notification channel
//! to its controllers; a single [`TopicBroker`] multiplexes MQTT topics for
//! long-running visualization jobs.

pub mod broker;
pub mod channel;
pub mod controller;
pub mod error;
pub mod http_store;
pub mod store;
pub mod surface;

pub use broker::{handler, TopicBroker, TopicHandler};
pub use channel::NotificationChannel;
pub use controller::{CriteriaJobController, Transition};
pub use error::{BrokerError, ChannelError, Result, SyncError};
pub use http_store::{ApiClient, HttpStore};
pub use store::{CommandSender, CriterionStore, JobCapabilities, ResultStore};
pub use surface::Surface;
