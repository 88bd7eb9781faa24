//! Store commands grouped into atomic units.

/// A single mutation against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set a string key.
    Set {
        /// Target key.
        key: String,
        /// New value.
        value: Vec<u8>,
    },
    /// Delete a key of any shape.
    Del {
        /// Target key.
        key: String,
    },
    /// Set fields on a hash key, creating it if needed.
    HSet {
        /// Target key.
        key: String,
        /// Field/value pairs.
        fields: Vec<(String, Vec<u8>)>,
    },
    /// Remove fields from a hash key.
    HDel {
        /// Target key.
        key: String,
        /// Fields to remove.
        fields: Vec<String>,
    },
    /// Add members to a set key, creating it if needed.
    SAdd {
        /// Target key.
        key: String,
        /// Members to add.
        members: Vec<String>,
    },
    /// Remove members from a set key.
    SRem {
        /// Target key.
        key: String,
        /// Members to remove.
        members: Vec<String>,
    },
    /// Delete every key matching a glob pattern, evaluated server-side
    /// at the point the command runs inside the unit.
    DelPattern {
        /// Glob pattern.
        pattern: String,
    },
}

impl Command {
    /// Returns the command name as sent on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "SET",
            Command::Del { .. } => "DEL",
            Command::HSet { .. } => "HSET",
            Command::HDel { .. } => "HDEL",
            Command::SAdd { .. } => "SADD",
            Command::SRem { .. } => "SREM",
            Command::DelPattern { .. } => "EVAL",
        }
    }

    /// Returns the key (or pattern) the command touches.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Command::Set { key, .. }
            | Command::Del { key }
            | Command::HSet { key, .. }
            | Command::HDel { key, .. }
            | Command::SAdd { key, .. }
            | Command::SRem { key, .. } => key,
            Command::DelPattern { pattern } => pattern,
        }
    }
}

/// An ordered list of commands submitted as one atomic unit.
///
/// Builder methods silently skip commands that would carry no arguments,
/// since an empty `HSET`/`SADD` is a protocol error on real servers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw command.
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Appends a `SET`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.commands.push(Command::Set {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Appends a `DEL`.
    pub fn del(&mut self, key: impl Into<String>) {
        self.commands.push(Command::Del { key: key.into() });
    }

    /// Appends an `HSET`.
    pub fn hset(&mut self, key: impl Into<String>, fields: Vec<(String, Vec<u8>)>) {
        if !fields.is_empty() {
            self.commands.push(Command::HSet {
                key: key.into(),
                fields,
            });
        }
    }

    /// Appends an `HDEL`.
    pub fn hdel(&mut self, key: impl Into<String>, fields: Vec<String>) {
        if !fields.is_empty() {
            self.commands.push(Command::HDel {
                key: key.into(),
                fields,
            });
        }
    }

    /// Appends an `SADD`.
    pub fn sadd(&mut self, key: impl Into<String>, members: Vec<String>) {
        if !members.is_empty() {
            self.commands.push(Command::SAdd {
                key: key.into(),
                members,
            });
        }
    }

    /// Appends an `SREM`.
    pub fn srem(&mut self, key: impl Into<String>, members: Vec<String>) {
        if !members.is_empty() {
            self.commands.push(Command::SRem {
                key: key.into(),
                members,
            });
        }
    }

    /// Appends a delete-by-pattern script invocation.
    pub fn del_pattern(&mut self, pattern: impl Into<String>) {
        self.commands.push(Command::DelPattern {
            pattern: pattern.into(),
        });
    }

    /// Moves every command of `other` to the end of this batch.
    pub fn append(&mut self, other: &mut Batch) {
        self.commands.append(&mut other.commands);
    }

    /// Returns the queued commands.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Consumes the batch, returning its commands.
    #[must_use]
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    /// Returns the number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if no command is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_argument_lists_are_skipped() {
        let mut batch = Batch::new();
        batch.hset("h", Vec::new());
        batch.hdel("h", Vec::new());
        batch.sadd("s", Vec::new());
        batch.srem("s", Vec::new());
        assert!(batch.is_empty());
    }

    #[test]
    fn append_preserves_order() {
        let mut first = Batch::new();
        first.del("a");
        let mut second = Batch::new();
        second.set("b", b"1".to_vec());
        second.del_pattern("c:*");

        first.append(&mut second);

        assert!(second.is_empty());
        let names: Vec<_> = first.commands().iter().map(Command::name).collect();
        assert_eq!(names, vec!["DEL", "SET", "EVAL"]);
        assert_eq!(first.commands()[2].key(), "c:*");
    }
}
