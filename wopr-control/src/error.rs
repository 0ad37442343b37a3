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

//! Error taxonomy for the resolver and the session manager.
//!
//! None of these terminate the process. `UnknownCommand` is reported and the
//! loop continues; connection and publish failures are surfaced to the caller,
//! which owns the retry policy.

use std::time::Duration;

use rumqttc::ConnectReturnCode;
use thiserror::Error;

/// The supplied command name is not in the resolver table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command: {0}")]
pub struct UnknownCommand(pub String);

/// A device identifier must be non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("device id must not be empty")]
pub struct InvalidDeviceId;

/// Failure to establish or authenticate a broker session.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Broker answered CONNECT with a non-success reason code
    /// (bad credentials, rejected client id, server unavailable).
    #[error("broker refused connection: {0:?}")]
    Refused(ConnectReturnCode),

    /// No CONNACK arrived within the configured connect timeout.
    #[error("no CONNACK from broker within {0:?}")]
    Timeout(Duration),

    /// Network-level failure while reaching the broker.
    ///
    /// Boxed: `rumqttc::ConnectionError` is large and would bloat the enum.
    #[error("transport error: {0}")]
    Transport(#[from] Box<rumqttc::ConnectionError>),

    /// The wildcard subscription request could not be queued.
    #[error("subscribe failed: {0}")]
    Subscribe(#[source] rumqttc::ClientError),
}

impl From<rumqttc::ConnectionError> for ConnectError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        ConnectError::Transport(Box::new(err))
    }
}

/// Failure to hand a message to the at-least-once delivery machinery.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The reconnect performed on behalf of this publish failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The client rejected the publish request.
    #[error("publish rejected: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// The session was torn down between the reconnect and the publish.
    #[error("connection lost before publish")]
    NotConnected,
}
