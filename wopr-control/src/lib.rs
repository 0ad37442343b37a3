// Copyright 2025 The Wopr Control Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command-to-topic mapping and broker session management for the JBWopr
//! W.O.P.R. display device.
//!
//! Publishes device-control commands to the firmware's fixed topic scheme
//! (`wopr/<device-id>/<entity>/<subentity>/set`) and relays everything the
//! device reports back through a registered handler.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wopr_control::{command_topic, Command, DeviceId, SessionConfig, SessionManager};
//!
//! let device = DeviceId::new("wopr-461da0d8")?;
//! let config = SessionConfig::builder("broker.local")
//!     .port(1883)
//!     .username("mqttclient")
//!     .password("secret")
//!     .build();
//!
//! let session = SessionManager::new(config, device.clone());
//! session.on_message(Arc::new(MyHandler));
//!
//! let topic = command_topic(&device, Command::DisplayText);
//! session.publish(&topic, "HELLO WORLD").await?;
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod session;

pub use command::{command_topic, subscription_topic, Command, DeviceId};
pub use config::{SessionConfig, SessionConfigBuilder};
pub use error::{ConnectError, InvalidDeviceId, PublishError, UnknownCommand};
pub use session::{ConnectionState, MessageHandler, SessionManager, SessionStats};
