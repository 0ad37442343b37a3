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

//! Interactive test console for the W.O.P.R. device.
//!
//! Reads command/data pairs from stdin, maps them to publish topics and
//! prints everything the device answers on its wildcard subscription.
//! Broker address, credentials and device id come from the environment;
//! nothing is compiled in.

use std::env;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use tokio::signal;
use tokio::sync::mpsc;

use wopr_control::{
    command_topic, Command, DeviceId, MessageHandler, SessionConfig, SessionManager,
};

mod source;
use source::{CommandRequest, CommandSource, StdinSource};

/// Environment-supplied configuration.
#[derive(Debug, Clone)]
struct CliConfig {
    device_id: String,
    broker_host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    client_id: Option<String>,
}

impl CliConfig {
    fn from_env() -> Result<Self> {
        let device_id = env::var("WOPR_DEVICE_ID").context("WOPR_DEVICE_ID not set")?;
        let broker_host = env::var("WOPR_BROKER_HOST").context("WOPR_BROKER_HOST not set")?;
        let port = match env::var("WOPR_BROKER_PORT") {
            Ok(raw) => raw.parse::<u16>().context("Invalid WOPR_BROKER_PORT")?,
            Err(_) => 1883,
        };
        Ok(Self {
            device_id,
            broker_host,
            port,
            username: env::var("WOPR_USERNAME").ok(),
            password: env::var("WOPR_PASSWORD").ok(),
            client_id: env::var("WOPR_CLIENT_ID").ok(),
        })
    }
}

/// What the loop should do with one request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Publish { topic: String, payload: String },
    Invalid(String),
}

/// Map a request onto an action. Pure; the loop and the tests share it.
fn plan(device: &DeviceId, request: &CommandRequest) -> Action {
    let command = match request.command.parse::<Command>() {
        Ok(command) => command,
        Err(_) => return Action::Invalid("Invalid command".to_string()),
    };
    if command.expects_json()
        && serde_json::from_str::<serde_json::Value>(&request.data).is_err()
    {
        return Action::Invalid(format!("{} expects a JSON payload", command.name()));
    }
    Action::Publish {
        topic: command_topic(device, command),
        payload: request.data.clone(),
    }
}

/// Prints every inbound message the way the device console always has.
struct PrintHandler;

#[async_trait]
impl MessageHandler for PrintHandler {
    async fn on_message(&self, topic: &str, payload: &[u8]) {
        println!("< {} {}", topic, String::from_utf8_lossy(payload));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliConfig::from_env()?;
    let device = DeviceId::new(&cli.device_id)?;

    let mut builder = SessionConfig::builder(&cli.broker_host).port(cli.port);
    if let Some(username) = &cli.username {
        builder = builder.username(username);
    }
    if let Some(password) = &cli.password {
        builder = builder.password(password);
    }
    if let Some(client_id) = &cli.client_id {
        builder = builder.client_id(client_id);
    }

    let session = SessionManager::new(builder.build(), device.clone());
    session.on_message(Arc::new(PrintHandler));

    // Best effort; publish reconnects on demand if this fails.
    if let Err(e) = session.connect().await {
        warn!("Initial connect failed: {e}");
    }

    let names: Vec<&str> = Command::all().map(Command::name).collect();
    let (tx, mut rx) = mpsc::channel::<CommandRequest>(8);
    thread::spawn(move || {
        let mut source = StdinSource::new(&names);
        while let Some(request) = source.next_request() {
            if tx.blocking_send(request).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
            request = rx.recv() => {
                let Some(request) = request else { break };
                match plan(&device, &request) {
                    Action::Invalid(reason) => println!("{reason}"),
                    Action::Publish { topic, payload } => {
                        println!("> {topic} {payload}");
                        if let Err(e) = session.publish(&topic, payload).await {
                            warn!("Publish failed: {e}");
                        }
                    }
                }
            }
        }
    }

    session.disconnect().await;
    Ok(())
}
