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

//! Command input sources for the prompt loop.
//!
//! The session manager and resolver never touch a terminal; anything that
//! yields command/data pairs can drive them.

use std::io::{self, Write};

/// One command/data pair as entered at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    pub data: String,
}

/// Anything that yields command requests: a terminal, a script, a test.
pub trait CommandSource: Send {
    /// Next request, or `None` when the source is exhausted.
    fn next_request(&mut self) -> Option<CommandRequest>;
}

/// Interactive source reading from standard input, two prompts per request.
pub struct StdinSource {
    prompt: String,
}

impl StdinSource {
    pub fn new(command_names: &[&str]) -> Self {
        Self {
            prompt: format!("Enter command ({}): ", command_names.join(", ")),
        }
    }

    fn read_line(&self, prompt: &str) -> Option<String> {
        print!("{prompt}");
        io::stdout().flush().ok()?;
        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) => None, // EOF
            Ok(_) => Some(line.trim().to_string()),
            Err(_) => None,
        }
    }
}

impl CommandSource for StdinSource {
    fn next_request(&mut self) -> Option<CommandRequest> {
        let command = self.read_line(&self.prompt)?;
        let data = self.read_line("Enter data: ")?;
        Some(CommandRequest { command, data })
    }
}

/// Scripted source for tests: feeds a fixed sequence of requests.
#[cfg(test)]
pub struct ScriptedSource {
    requests: std::collections::VecDeque<CommandRequest>,
}

#[cfg(test)]
impl ScriptedSource {
    pub fn new(requests: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            requests: requests
                .into_iter()
                .map(|(command, data)| CommandRequest { command, data })
                .collect(),
        }
    }
}

#[cfg(test)]
impl CommandSource for ScriptedSource {
    fn next_request(&mut self) -> Option<CommandRequest> {
        self.requests.pop_front()
    }
}
