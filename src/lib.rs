//! A feature flag and experimentation decision engine with contextual bandit support.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that decides feature flags for users, where each user is
//! described by a [`UserContext`]: a unique id and key-value attributes. Deciding a flag results
//! in a [`Decision`] telling whether the flag is enabled for the user, which variation and rule
//! were selected, the typed variable values, and why.
//!
//! Flags are decided against a datafile downloaded from the CDN and refreshed by a background
//! thread. A decision runs holdouts first, then the experiments attached to the flag, then its
//! rollout rules. Experiments are bucketed deterministically, except contextual multi-armed bandit
//! (CMAB) experiments, which consult a remote prediction endpoint and cache its answers.
//!
//! An [`EventProcessor`] should be provided to forward impression and conversion events to your
//! analytics pipeline.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! [`Client::decide`] never fails: failures are reported in [`Decision::reasons`] and the flag is
//! disabled. In production, it is recommended to treat errors as "flag off", as feature flag
//! evaluation should not be critical enough to cause system crashes. However, the errors are
//! valuable for debugging and usually indicate that developer's attention is needed.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages
//! under the `optiflag` target. Consider integrating a `log`-compatible logger implementation for
//! better visibility into SDK operations.
//!
//! # Examples
//!
//! ```no_run
//! # use optiflag::{Attributes, ClientConfig, UserContext};
//! let client = ClientConfig::from_sdk_key("sdk-key")
//!     .event_processor(|event| println!("{:?}", event))
//!     .to_client();
//! client.wait_for_configuration().unwrap();
//!
//! let mut user = UserContext::new("user-id", Attributes::new());
//! user.set_attribute("country", "us");
//! let decision = client.decide(&user, "checkout_flow", &[]);
//! println!("{} -> {:?}", decision.flag_key, decision.variation_key);
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod attributes;
pub mod audience;
pub mod bucketer;
mod client;
pub mod cmab;
mod config;
pub mod config_manager;
pub mod configuration_fetcher;
mod configuration_store;
pub mod decision;
mod error;
pub mod events;
pub mod notification;
mod options;
pub mod poller_thread;
pub mod project_config;
pub mod reasons;
mod user_context;
pub mod user_profile;

pub use attributes::{AttributeValue, Attributes};
pub use client::{Client, Decision};
pub use config::{ClientConfig, CmabConfig, RetryConfig};
pub use decision::DecisionSource;
pub use error::{Error, Result};
pub use events::{EventProcessor, UserEvent};
pub use notification::{Notification, NotificationCenter, NotificationType};
pub use options::{DecideOption, DecideOptions};
pub use user_context::{DecisionContext, UserContext};
