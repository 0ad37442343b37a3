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

//! Command-to-topic mapping for the W.O.P.R. control protocol.
//!
//! The firmware listens on `wopr/<device-id>/<entity>/<subentity>/set` and
//! reports state changes under the same prefix, so a single wildcard
//! subscription `wopr/<device-id>/#` covers everything it says back.

use std::fmt;
use std::str::FromStr;

use crate::error::{InvalidDeviceId, UnknownCommand};

/// Identifier of the target device, e.g. `wopr-461da0d8`.
///
/// Forms the second topic level of every publish and subscription. Immutable
/// once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device id. Empty input is rejected.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidDeviceId> {
        let id = id.into();
        if id.is_empty() {
            return Err(InvalidDeviceId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Device-control commands understood by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    DisplayState,
    DisplayText,
    DisplayScrollText,
    DisplayBrightness,
    DefconState,
    DefconLevel,
    DefconBrightness,
    DefconColor,
    EffectState,
    EffectName,
    Config,
}

/// The command table: (variant, prompt name, topic path).
///
/// Single source of truth. Parsing, topic building and the prompt help text
/// all read this table, so a new command is one new row here.
const COMMAND_TABLE: &[(Command, &str, &str)] = &[
    (Command::DisplayState, "DisplayState", "display/state"),
    (Command::DisplayText, "DisplayText", "display/text"),
    (Command::DisplayScrollText, "DisplayScrollText", "display/scrolltext"),
    (Command::DisplayBrightness, "DisplayBrightness", "display/brightness"),
    (Command::DefconState, "DefconState", "defcon/state"),
    (Command::DefconLevel, "DefconLevel", "defcon/level"),
    (Command::DefconBrightness, "DefconBrightness", "defcon/brightness"),
    (Command::DefconColor, "DefconColor", "defcon/color"),
    (Command::EffectState, "EffectState", "effect/state"),
    (Command::EffectName, "EffectName", "effect/name"),
    (Command::Config, "Config", "config"),
];

impl Command {
    /// All supported commands, in prompt order.
    pub fn all() -> impl Iterator<Item = Command> {
        COMMAND_TABLE.iter().map(|(command, _, _)| *command)
    }

    /// Command name as typed at the prompt.
    pub fn name(self) -> &'static str {
        self.entry().1
    }

    /// Topic path between the device id and the `/set` suffix.
    pub fn path(self) -> &'static str {
        self.entry().2
    }

    /// Whether the firmware parses this command's payload as a JSON document.
    pub fn expects_json(self) -> bool {
        matches!(self, Command::Config)
    }

    fn entry(self) -> &'static (Command, &'static str, &'static str) {
        // Every variant has exactly one row; the round-trip test pins this.
        COMMAND_TABLE
            .iter()
            .find(|(command, _, _)| *command == self)
            .expect("command table covers every variant")
    }
}

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        COMMAND_TABLE
            .iter()
            .find(|(_, name, _)| *name == s)
            .map(|(command, _, _)| *command)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fully qualified publish topic for `command` on `device`.
pub fn command_topic(device: &DeviceId, command: Command) -> String {
    format!("wopr/{}/{}/set", device, command.path())
}

/// Wildcard subscription covering every topic the device publishes.
pub fn subscription_topic(device: &DeviceId) -> String {
    format!("wopr/{device}/#")
}
