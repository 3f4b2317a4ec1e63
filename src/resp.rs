//! Minimal RESP2 client used for pipelined command dispatch.
//!
//! The harness only needs two things from the wire protocol: issuing N
//! encoded commands in one round trip and draining N replies afterwards.
//! Connection pooling and cluster topology stay outside this module; a
//! cluster deployment is addressed through a single entry-point address.

use anyhow::{bail, Context, Result};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

/// A parsed RESP2 reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

/// Encode one command as a RESP array of bulk strings.
pub fn encode_command(buf: &mut Vec<u8>, args: &[String]) {
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
}

/// A blocking RESP connection supporting pipelined execution.
pub struct RespClient {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl RespClient {
    /// Connect to `addr` (`host:port`).
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .with_context(|| format!("cannot connect to target at {}", addr))?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            writer: stream,
            reader,
        })
    }

    /// Issue a single command and return its reply.
    pub fn command(&mut self, args: &[&str]) -> Result<Reply> {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut buf = Vec::new();
        encode_command(&mut buf, &owned);
        self.writer.write_all(&buf)?;
        self.writer.flush()?;
        self.read_reply()
    }

    /// Execute all commands as one pipelined round trip.
    ///
    /// Commands are written back to back in a single buffer, then one reply
    /// per command is drained off the socket. If any reply is an error, the
    /// first one is surfaced after every reply has been consumed, so the
    /// connection stays usable for the next flush.
    pub fn execute_pipeline<'a, I>(&mut self, commands: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a [String]>,
    {
        let mut buf = Vec::new();
        let mut count = 0usize;
        for args in commands {
            encode_command(&mut buf, args);
            count += 1;
        }
        if count == 0 {
            return Ok(());
        }

        self.writer.write_all(&buf)?;
        self.writer.flush()?;

        let mut first_error: Option<String> = None;
        for _ in 0..count {
            if let Reply::Error(msg) = self.read_reply()? {
                first_error.get_or_insert(msg);
            }
        }
        if let Some(msg) = first_error {
            bail!("target returned error reply: {}", msg);
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            bail!("connection closed by target");
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    fn read_reply(&mut self) -> Result<Reply> {
        let line = self.read_line()?;
        if line.is_empty() {
            bail!("empty reply line");
        }
        let kind = line.as_bytes()[0];
        let rest = &line[1..];

        match kind {
            b'+' => Ok(Reply::Simple(rest.to_string())),
            b'-' => Ok(Reply::Error(rest.to_string())),
            b':' => Ok(Reply::Integer(rest.parse()?)),
            b'$' => {
                let len: i64 = rest.parse()?;
                if len < 0 {
                    return Ok(Reply::Bulk(None));
                }
                let mut data = vec![0u8; len as usize + 2];
                std::io::Read::read_exact(&mut self.reader, &mut data)?;
                data.truncate(len as usize);
                Ok(Reply::Bulk(Some(data)))
            }
            b'*' => {
                let len: i64 = rest.parse()?;
                if len < 0 {
                    return Ok(Reply::Array(None));
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(self.read_reply()?);
                }
                Ok(Reply::Array(Some(items)))
            }
            other => bail!("unexpected reply type byte {:?}", other as char),
        }
    }
}

/// Database-lifecycle operations against the target search index.
///
/// Index creation itself rides in the input stream as setup-write records;
/// the lifecycle client only checks existence and drops a stale index before
/// the run starts.
pub struct IndexLifecycle {
    client: RespClient,
}

impl IndexLifecycle {
    /// Connect and verify the target answers a PING.
    pub fn connect(addr: &str) -> Result<Self> {
        let mut client = RespClient::connect(addr)?;
        match client.command(&["PING"])? {
            Reply::Simple(s) if s == "PONG" => Ok(Self { client }),
            other => bail!("unexpected PING reply from target: {:?}", other),
        }
    }

    /// Whether an index with the given name exists.
    ///
    /// An error reply to `FT.INFO` means the index is unknown.
    pub fn index_exists(&mut self, name: &str) -> Result<bool> {
        Ok(!self.client.command(&["FT.INFO", name])?.is_error())
    }

    /// Drop an existing index.
    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        match self.client.command(&["FT.DROP", name])? {
            Reply::Error(msg) => bail!("cannot drop index {:?}: {}", name, msg),
            _ => Ok(()),
        }
    }
}
