//! Blocking RESP2 client store.

use crate::backend::{KeyValueStore, StoreRead};
use crate::batch::{Batch, Command};
use crate::config::RedisConfig;
use crate::error::{StoreError, StoreResult};
use crate::resp::{encode_command, write_all, Frame, FrameReader};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io::BufReader;
use std::net::{TcpStream, ToSocketAddrs};

/// Server-side script deleting every key that matches `ARGV[1]`.
///
/// Runs as a single command, so it is atomic with respect to other clients
/// and can be queued inside `MULTI`.
pub const DELETE_PATTERN_SCRIPT: &str = "\
local keys = redis.call('KEYS', ARGV[1])
for i = 1, #keys, 5000 do
  redis.call('DEL', unpack(keys, i, math.min(i + 4999, #keys)))
end
return #keys";

/// A store backed by a Redis-compatible server.
///
/// The store owns one connection, opened lazily and reopened after any
/// transport failure. Calls are serialized on that connection.
///
/// # Atomic units
///
/// [`KeyValueStore::atomic`] maps onto `WATCH` / `MULTI` / `EXEC`. A nil
/// `EXEC` reply surfaces as [`StoreError::Conflict`]; the unit is never
/// retried here.
pub struct RedisStore {
    config: RedisConfig,
    conn: Mutex<Option<Connection>>,
}

impl RedisStore {
    /// Creates a store that connects on first use.
    #[must_use]
    pub fn new(config: RedisConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    /// Creates a store and verifies the server answers `PING`.
    ///
    /// # Errors
    ///
    /// Returns the connection or authentication failure.
    pub fn connect(config: RedisConfig) -> StoreResult<Self> {
        let store = Self::new(config);
        store.ping()?;
        Ok(store)
    }

    /// Connects using a `redis://` URL.
    pub fn from_url(url: &str) -> StoreResult<Self> {
        Self::connect(RedisConfig::from_url(url)?)
    }

    /// Returns the connection settings.
    #[must_use]
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Sends `PING`.
    pub fn ping(&self) -> StoreResult<()> {
        self.with_connection(|conn| conn.call(&["PING"])?.expect_ok())
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(Connection::open(&self.config)?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(StoreError::connection("connection unavailable"));
        };
        let result = f(conn);
        if conn.broken {
            tracing::warn!(address = %self.config.address(), "dropping broken connection");
            *guard = None;
        }
        result
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("address", &self.config.address())
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

struct Connection {
    reader: FrameReader<BufReader<TcpStream>>,
    scan_count: u32,
    broken: bool,
}

impl Connection {
    fn open(config: &RedisConfig) -> StoreResult<Self> {
        let address = config.address();
        let addrs = address
            .to_socket_addrs()
            .map_err(|err| StoreError::connection(format!("cannot resolve {address}: {err}")))?;

        let mut last_error = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(err) => last_error = Some(err),
            }
        }
        let stream = match (stream, last_error) {
            (Some(stream), _) => stream,
            (None, Some(err)) if err.kind() == std::io::ErrorKind::TimedOut => {
                return Err(StoreError::Timeout)
            }
            (None, Some(err)) => {
                return Err(StoreError::connection(format!("cannot connect to {address}: {err}")))
            }
            (None, None) => {
                return Err(StoreError::connection(format!("no address for {address}")))
            }
        };

        let io_timeout = Some(config.io_timeout).filter(|d| !d.is_zero());
        stream.set_read_timeout(io_timeout).map_err(StoreError::from_io)?;
        stream.set_write_timeout(io_timeout).map_err(StoreError::from_io)?;
        stream.set_nodelay(true).map_err(StoreError::from_io)?;

        let mut conn = Self {
            reader: FrameReader::new(BufReader::new(stream)),
            scan_count: config.scan_count.max(1),
            broken: false,
        };

        if let Some(password) = &config.password {
            let reply = match &config.username {
                Some(user) => conn.call(&["AUTH", user.as_str(), password.as_str()])?,
                None => conn.call(&["AUTH", password.as_str()])?,
            };
            reply.expect_ok().map_err(|err| match err {
                StoreError::Server { message } => {
                    StoreError::connection(format!("authentication failed: {message}"))
                }
                other => other,
            })?;
        }
        if config.database != 0 {
            let database = config.database.to_string();
            conn.call(&["SELECT", database.as_str()])?.expect_ok()?;
        }

        tracing::debug!(%address, database = config.database, "connected");
        Ok(conn)
    }

    fn send(&mut self, buf: &[u8]) -> StoreResult<()> {
        let result = write_all(self.reader.get_mut().get_mut(), buf);
        self.mark(result)
    }

    fn receive(&mut self) -> StoreResult<Frame> {
        let result = self.reader.read_frame();
        self.mark(result)
    }

    fn mark<T>(&mut self, result: StoreResult<T>) -> StoreResult<T> {
        if let Err(err) = &result {
            if err.is_transport() {
                self.broken = true;
            }
        }
        result
    }

    fn call<A: AsRef<[u8]>>(&mut self, args: &[A]) -> StoreResult<Frame> {
        let mut buf = Vec::new();
        encode_command(args, &mut buf);
        self.send(&buf)?;
        self.receive()
    }

    fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.call(&["GET", key])?.into_bulk().map_err(|err| keyed(err, key))
    }

    fn hgetall(&mut self, key: &str) -> StoreResult<Option<BTreeMap<String, Vec<u8>>>> {
        let items = self
            .call(&["HGETALL", key])?
            .into_array()
            .map_err(|err| keyed(err, key))?
            .unwrap_or_default();
        if items.is_empty() {
            return Ok(None);
        }
        let mut fields = BTreeMap::new();
        let mut items = items.into_iter();
        while let (Some(name), Some(value)) = (items.next(), items.next()) {
            let name = name
                .into_bulk()?
                .ok_or_else(|| StoreError::protocol("nil hash field name"))?;
            let name = String::from_utf8(name)
                .map_err(|_| StoreError::protocol("non UTF-8 hash field name"))?;
            let value = value.into_bulk()?.unwrap_or_default();
            fields.insert(name, value);
        }
        Ok(Some(fields))
    }

    fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        self.call(&["HGET", key, field])?
            .into_bulk()
            .map_err(|err| keyed(err, key))
    }

    fn smembers(&mut self, key: &str) -> StoreResult<BTreeSet<String>> {
        let members = self
            .call(&["SMEMBERS", key])?
            .into_strings()
            .map_err(|err| keyed(err, key))?;
        Ok(members.into_iter().collect())
    }

    fn scard(&mut self, key: &str) -> StoreResult<u64> {
        let n = self
            .call(&["SCARD", key])?
            .into_integer()
            .map_err(|err| keyed(err, key))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    fn exists(&mut self, key: &str) -> StoreResult<bool> {
        Ok(self.call(&["EXISTS", key])?.into_integer()? > 0)
    }

    fn scan_keys(&mut self, pattern: &str) -> StoreResult<Vec<String>> {
        let count = self.scan_count.to_string();
        let mut cursor = "0".to_string();
        let mut keys = BTreeSet::new();
        loop {
            let reply = self
                .call(&["SCAN", cursor.as_str(), "MATCH", pattern, "COUNT", count.as_str()])?
                .into_array()?
                .unwrap_or_default();
            let mut parts = reply.into_iter();
            let (Some(next), Some(batch)) = (parts.next(), parts.next()) else {
                return Err(StoreError::protocol("SCAN reply must have two elements"));
            };
            let next = next
                .into_bulk()?
                .ok_or_else(|| StoreError::protocol("nil SCAN cursor"))?;
            cursor = String::from_utf8(next)
                .map_err(|_| StoreError::protocol("non UTF-8 SCAN cursor"))?;
            keys.extend(batch.into_strings()?);
            if cursor == "0" {
                break;
            }
        }
        Ok(keys.into_iter().collect())
    }

    fn incr(&mut self, key: &str) -> StoreResult<i64> {
        match self.call(&["INCR", key])? {
            Frame::Error(message) if message.contains("not an integer") => {
                Err(StoreError::InvalidValue {
                    key: key.to_string(),
                    message,
                })
            }
            other => other.into_integer().map_err(|err| keyed(err, key)),
        }
    }

    fn unwatch(&mut self) -> StoreResult<()> {
        self.call(&["UNWATCH"])?.expect_ok()
    }

    /// Pipelines `MULTI`, the queued commands and `EXEC`, then reads every reply.
    fn exec(&mut self, batch: Batch) -> StoreResult<()> {
        let commands = batch.into_commands();
        let mut buf = Vec::new();
        encode_command(&["MULTI"], &mut buf);
        for command in &commands {
            encode_command(&command_args(command), &mut buf);
        }
        encode_command(&["EXEC"], &mut buf);
        self.send(&buf)?;

        self.receive()?.expect_ok()?;
        // Queueing errors are remembered; the server then aborts EXEC.
        let mut queue_error = None;
        for command in &commands {
            if let Err(err) = self.receive()?.into_result() {
                tracing::debug!(command = command.name(), key = command.key(), error = %err, "command rejected while queueing");
                queue_error.get_or_insert(err);
            }
        }
        let reply = self.receive()?;
        if let Some(err) = queue_error {
            return Err(err);
        }
        let Some(results) = reply.into_array()? else {
            return Err(StoreError::Conflict);
        };
        for (command, result) in commands.iter().zip(results) {
            if let Frame::Error(message) = result {
                return Err(keyed(StoreError::server(message), command.key()));
            }
        }
        tracing::trace!(commands = commands.len(), "executed atomic unit");
        Ok(())
    }
}

/// Attaches the key to a `WRONGTYPE` error.
fn keyed(err: StoreError, key: &str) -> StoreError {
    match err {
        StoreError::WrongType { key: k, expected } if k.is_empty() => StoreError::WrongType {
            key: key.to_string(),
            expected,
        },
        other => other,
    }
}

/// Builds the wire arguments for one queued command.
fn command_args(command: &Command) -> Vec<Vec<u8>> {
    let name = command.name().as_bytes().to_vec();
    match command {
        Command::Set { key, value } => vec![name, key.clone().into_bytes(), value.clone()],
        Command::Del { key } => vec![name, key.clone().into_bytes()],
        Command::HSet { key, fields } => {
            let mut args = Vec::with_capacity(2 + fields.len() * 2);
            args.push(name);
            args.push(key.clone().into_bytes());
            for (field, value) in fields {
                args.push(field.clone().into_bytes());
                args.push(value.clone());
            }
            args
        }
        Command::HDel { key, fields: items }
        | Command::SAdd { key, members: items }
        | Command::SRem { key, members: items } => {
            let mut args = Vec::with_capacity(2 + items.len());
            args.push(name);
            args.push(key.clone().into_bytes());
            args.extend(items.iter().map(|item| item.clone().into_bytes()));
            args
        }
        Command::DelPattern { pattern } => vec![
            name,
            DELETE_PATTERN_SCRIPT.as_bytes().to_vec(),
            b"0".to_vec(),
            pattern.clone().into_bytes(),
        ],
    }
}

/// Reader bound to the connection holding the current `WATCH`.
struct Session<'a> {
    conn: RefCell<&'a mut Connection>,
}

impl StoreRead for Session<'_> {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.conn.borrow_mut().get(key)
    }

    fn hgetall(&self, key: &str) -> StoreResult<Option<BTreeMap<String, Vec<u8>>>> {
        self.conn.borrow_mut().hgetall(key)
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        self.conn.borrow_mut().hget(key, field)
    }

    fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        self.conn.borrow_mut().smembers(key)
    }

    fn scard(&self, key: &str) -> StoreResult<u64> {
        self.conn.borrow_mut().scard(key)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.conn.borrow_mut().exists(key)
    }

    fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.conn.borrow_mut().scan_keys(pattern)
    }
}

impl StoreRead for RedisStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.with_connection(|conn| conn.get(key))
    }

    fn hgetall(&self, key: &str) -> StoreResult<Option<BTreeMap<String, Vec<u8>>>> {
        self.with_connection(|conn| conn.hgetall(key))
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        self.with_connection(|conn| conn.hget(key, field))
    }

    fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        self.with_connection(|conn| conn.smembers(key))
    }

    fn scard(&self, key: &str) -> StoreResult<u64> {
        self.with_connection(|conn| conn.scard(key))
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.with_connection(|conn| conn.exists(key))
    }

    fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.with_connection(|conn| conn.scan_keys(pattern))
    }
}

impl KeyValueStore for RedisStore {
    fn as_read(&self) -> &dyn StoreRead {
        self
    }

    fn incr(&self, key: &str) -> StoreResult<i64> {
        self.with_connection(|conn| conn.incr(key))
    }

    fn atomic(
        &self,
        watch: &[String],
        build: &mut dyn FnMut(&dyn StoreRead) -> StoreResult<Batch>,
    ) -> StoreResult<()> {
        self.with_connection(|conn| {
            if !watch.is_empty() {
                let mut args = Vec::with_capacity(watch.len() + 1);
                args.push("WATCH");
                args.extend(watch.iter().map(String::as_str));
                conn.call(&args)?.expect_ok()?;
            }

            let built = {
                let session = Session {
                    conn: RefCell::new(&mut *conn),
                };
                build(&session)
            };

            let batch = match built {
                Ok(batch) => batch,
                Err(err) => {
                    if !watch.is_empty() && !conn.broken {
                        if let Err(unwatch_err) = conn.unwatch() {
                            tracing::debug!(error = %unwatch_err, "UNWATCH failed");
                        }
                    }
                    return Err(err);
                }
            };
            if batch.is_empty() {
                if !watch.is_empty() {
                    conn.unwatch()?;
                }
                return Ok(());
            }
            conn.exec(batch)
        })
    }

    fn snapshot(
        &self,
        watch: &[String],
        read: &mut dyn FnMut(&dyn StoreRead) -> StoreResult<()>,
    ) -> StoreResult<()> {
        self.with_connection(|conn| {
            if !watch.is_empty() {
                let mut args = Vec::with_capacity(watch.len() + 1);
                args.push("WATCH");
                args.extend(watch.iter().map(String::as_str));
                conn.call(&args)?.expect_ok()?;
            }

            let outcome = {
                let session = Session {
                    conn: RefCell::new(&mut *conn),
                };
                read(&session)
            };

            if let Err(err) = outcome {
                if !watch.is_empty() && !conn.broken {
                    if let Err(unwatch_err) = conn.unwatch() {
                        tracing::debug!(error = %unwatch_err, "UNWATCH failed");
                    }
                }
                return Err(err);
            }
            if watch.is_empty() {
                return Ok(());
            }
            // An empty MULTI/EXEC answers nil when a watched key changed.
            conn.exec(Batch::new())
        })
    }
}
