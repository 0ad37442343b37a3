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

//! Configuration for the broker session.
//!
//! Always supplied by the caller. Nothing in this crate hardcodes broker
//! addresses or credentials.

use serde::Deserialize;

/// Broker endpoint and credentials for one session manager instance.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// MQTT broker hostname or IP.
    pub broker_host: String,
    /// MQTT broker port (default: 1883).
    pub port: u16,
    /// MQTT client ID. Defaults to `"wopr-ctl-{uuid}"`.
    pub client_id: String,
    /// Optional MQTT username for authentication.
    pub username: Option<String>,
    /// Optional MQTT password for authentication.
    pub password: Option<String>,
    /// Keep-alive interval in seconds (default: 30).
    pub keep_alive_secs: u64,
    /// Bound on the wait for the broker's CONNACK, in seconds (default: 10).
    pub connect_timeout_secs: u64,
}

impl SessionConfig {
    /// Start building a new config with the required fields.
    pub fn builder(broker_host: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder {
            broker_host: broker_host.into(),
            port: 1883,
            client_id: format!("wopr-ctl-{}", uuid::Uuid::new_v4()),
            username: None,
            password: None,
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

/// Builder for [`SessionConfig`].
pub struct SessionConfigBuilder {
    broker_host: String,
    port: u16,
    client_id: String,
    username: Option<String>,
    password: Option<String>,
    keep_alive_secs: u64,
    connect_timeout_secs: u64,
}

impl SessionConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn keep_alive_secs(mut self, secs: u64) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Build the config.
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            broker_host: self.broker_host,
            port: self.port,
            client_id: self.client_id,
            username: self.username,
            password: self.password,
            keep_alive_secs: self.keep_alive_secs,
            connect_timeout_secs: self.connect_timeout_secs,
        }
    }
}
