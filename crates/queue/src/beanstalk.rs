//! Minimal beanstalkd client
//!
//! Speaks just enough of the beanstalkd text protocol for the benchmark:
//! `use`, `watch`, `ignore`, `put`, `reserve-with-timeout`, `delete` and
//! `release`. One command is in flight per connection.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::client::{Job, JobId, PutParams, QueueConnection, QueueConnector};
use crate::error::QueueError;

/// Tube every beanstalkd connection starts out using and watching
pub const DEFAULT_TUBE: &str = "default";

/// Pause between `reserve-with-timeout 0` polls inside a sub-second window
const SUB_SECOND_POLL: Duration = Duration::from_millis(10);

/// Largest job body accepted from the server
pub const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

/// Dials beanstalkd over TCP
#[derive(Debug, Clone)]
pub struct BeanstalkConnector {
    connect_timeout: Duration,
}

impl Default for BeanstalkConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl BeanstalkConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TCP connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl QueueConnector for BeanstalkConnector {
    async fn connect(
        &self,
        host: &str,
        tube: &str,
    ) -> Result<Box<dyn QueueConnection>, QueueError> {
        let connect_error = |source| QueueError::Connect {
            host: host.to_string(),
            source,
        };

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(host))
            .await
            .map_err(|_| {
                connect_error(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))
            })?
            .map_err(connect_error)?;
        stream.set_nodelay(true).ok();

        let mut conn = BeanstalkConnection::new(stream);
        if tube != DEFAULT_TUBE {
            conn.use_tube(tube).await?;
            conn.watch(tube).await?;
            conn.ignore(DEFAULT_TUBE).await?;
        }

        debug!(%host, %tube, "Connected to beanstalkd");
        Ok(Box::new(conn))
    }
}

/// A parsed beanstalkd response line
#[derive(Debug, Clone, PartialEq, Eq)]
enum Response {
    Inserted(JobId),
    Buried(Option<JobId>),
    Reserved { id: JobId, len: usize },
    TimedOut,
    DeadlineSoon,
    Deleted,
    Released,
    Using(String),
    Watching(u32),
    NotFound,
    Error(String),
}

fn parse_response(line: &str) -> Result<Response, QueueError> {
    let mut parts = line.split_ascii_whitespace();
    let keyword = parts
        .next()
        .ok_or_else(|| QueueError::Protocol("empty response".into()))?;
    let mut number = |what: &str| -> Result<u64, QueueError> {
        parts
            .next()
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| QueueError::Protocol(format!("missing {what} in '{line}'")))
    };

    let response = match keyword {
        "INSERTED" => Response::Inserted(number("job id")?),
        "BURIED" => Response::Buried(number("job id").ok()),
        "RESERVED" => {
            let id = number("job id")?;
            let len = usize::try_from(number("body length")?)
                .ok()
                .filter(|len| *len <= MAX_BODY_LEN)
                .ok_or_else(|| QueueError::Protocol(format!("body length too large in '{line}'")))?;
            Response::Reserved { id, len }
        }
        "TIMED_OUT" => Response::TimedOut,
        "DEADLINE_SOON" => Response::DeadlineSoon,
        "DELETED" => Response::Deleted,
        "RELEASED" => Response::Released,
        "NOT_FOUND" => Response::NotFound,
        "USING" => Response::Using(
            line.strip_prefix("USING ")
                .ok_or_else(|| QueueError::Protocol(line.to_string()))?
                .to_string(),
        ),
        "WATCHING" => Response::Watching(number("watch count")? as u32),
        "OUT_OF_MEMORY" | "INTERNAL_ERROR" | "BAD_FORMAT" | "UNKNOWN_COMMAND"
        | "EXPECTED_CRLF" | "JOB_TOO_BIG" | "DRAINING" | "NOT_IGNORED" => {
            Response::Error(keyword.to_string())
        }
        _ => return Err(QueueError::Protocol(line.to_string())),
    };

    Ok(response)
}

fn unexpected(response: Response) -> QueueError {
    match response {
        Response::Error(keyword) => QueueError::Server(keyword),
        other => QueueError::Protocol(format!("{other:?}")),
    }
}

/// One TCP connection to beanstalkd
pub struct BeanstalkConnection {
    stream: BufStream<TcpStream>,
    line: String,
    /// Set while a command awaits its response; still set on entry means the
    /// previous command's future was dropped mid-flight
    in_command: bool,
    broken: bool,
}

impl BeanstalkConnection {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream: BufStream::new(stream),
            line: String::with_capacity(64),
            in_command: false,
            broken: false,
        }
    }

    async fn use_tube(&mut self, tube: &str) -> Result<(), QueueError> {
        match self.command(&format!("use {tube}"), None).await? {
            (Response::Using(_), _) => Ok(()),
            (other, _) => Err(unexpected(other)),
        }
    }

    async fn watch(&mut self, tube: &str) -> Result<(), QueueError> {
        match self.command(&format!("watch {tube}"), None).await? {
            (Response::Watching(_), _) => Ok(()),
            (other, _) => Err(unexpected(other)),
        }
    }

    async fn ignore(&mut self, tube: &str) -> Result<(), QueueError> {
        match self.command(&format!("ignore {tube}"), None).await? {
            (Response::Watching(_), _) => Ok(()),
            (other, _) => Err(unexpected(other)),
        }
    }

    async fn command(
        &mut self,
        line: &str,
        body: Option<&[u8]>,
    ) -> Result<(Response, Option<Vec<u8>>), QueueError> {
        if self.broken || self.in_command {
            self.broken = true;
            return Err(QueueError::Desynced);
        }

        self.in_command = true;
        let result = self.round_trip(line, body).await;
        self.in_command = false;

        if let Err(e) = &result {
            if e.is_connection_fatal() {
                self.broken = true;
            }
        }
        result
    }

    async fn round_trip(
        &mut self,
        line: &str,
        body: Option<&[u8]>,
    ) -> Result<(Response, Option<Vec<u8>>), QueueError> {
        trace!(command = line, "beanstalkd >");
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        if let Some(body) = body {
            self.stream.write_all(body).await?;
            self.stream.write_all(b"\r\n").await?;
        }
        self.stream.flush().await?;

        self.line.clear();
        if self.stream.read_line(&mut self.line).await? == 0 {
            return Err(QueueError::Closed);
        }
        let reply = self.line.trim_end_matches(['\r', '\n']);
        trace!(reply, "beanstalkd <");
        let response = parse_response(reply)?;

        let payload = match response {
            Response::Reserved { len, .. } => {
                let framed = len
                    .checked_add(2)
                    .ok_or_else(|| QueueError::Protocol(format!("body length {len} overflows")))?;
                let mut buf = vec![0u8; framed];
                self.stream.read_exact(&mut buf).await?;
                if !buf.ends_with(b"\r\n") {
                    return Err(QueueError::Protocol("job body not terminated by CRLF".into()));
                }
                buf.truncate(len);
                Some(buf)
            }
            _ => None,
        };

        Ok((response, payload))
    }
}

#[async_trait]
impl QueueConnection for BeanstalkConnection {
    async fn put(&mut self, body: &[u8], params: &PutParams) -> Result<JobId, QueueError> {
        let line = format!(
            "put {} {} {} {}",
            params.priority,
            params.delay.as_secs(),
            params.ttr.as_secs(),
            body.len()
        );
        match self.command(&line, Some(body)).await? {
            (Response::Inserted(id), _) => Ok(id),
            (Response::Buried(Some(id)), _) => Err(QueueError::Buried(id)),
            (other, _) => Err(unexpected(other)),
        }
    }

    async fn reserve(&mut self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        // The server counts whole seconds. Each attempt asks only for the whole
        // seconds still left, and the sub-second tail is polled with a zero timeout.
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = format!("reserve-with-timeout {}", remaining.as_secs());
            match self.command(&line, None).await? {
                (Response::Reserved { id, .. }, body) => {
                    return Ok(Some(Job {
                        id,
                        body: body.unwrap_or_default(),
                    }));
                }
                (Response::TimedOut | Response::DeadlineSoon, _) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    tokio::time::sleep(SUB_SECOND_POLL.min(deadline - now)).await;
                }
                (other, _) => return Err(unexpected(other)),
            }
        }
    }

    async fn delete(&mut self, id: JobId) -> Result<(), QueueError> {
        match self.command(&format!("delete {id}"), None).await? {
            (Response::Deleted, _) => Ok(()),
            (Response::NotFound, _) => Err(QueueError::NotFound(id)),
            (other, _) => Err(unexpected(other)),
        }
    }

    async fn release(&mut self, id: JobId, priority: u32) -> Result<(), QueueError> {
        match self
            .command(&format!("release {id} {priority} 0"), None)
            .await?
        {
            (Response::Released, _) => Ok(()),
            (Response::Buried(_), _) => Err(QueueError::Buried(id)),
            (Response::NotFound, _) => Err(QueueError::NotFound(id)),
            (other, _) => Err(unexpected(other)),
        }
    }

    fn is_healthy(&self) -> bool {
        !self.broken && !self.in_command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_responses() {
        assert_eq!(parse_response("INSERTED 42").unwrap(), Response::Inserted(42));
        assert_eq!(parse_response("BURIED 7").unwrap(), Response::Buried(Some(7)));
        assert_eq!(parse_response("BURIED").unwrap(), Response::Buried(None));
        assert_eq!(
            parse_response("RESERVED 9 256").unwrap(),
            Response::Reserved { id: 9, len: 256 }
        );
        assert_eq!(parse_response("DELETED").unwrap(), Response::Deleted);
        assert_eq!(parse_response("RELEASED").unwrap(), Response::Released);
        assert_eq!(parse_response("NOT_FOUND").unwrap(), Response::NotFound);
    }

    #[test]
    fn test_parse_timeouts_and_tubes() {
        assert_eq!(parse_response("TIMED_OUT").unwrap(), Response::TimedOut);
        assert_eq!(parse_response("DEADLINE_SOON").unwrap(), Response::DeadlineSoon);
        assert_eq!(
            parse_response("USING bench").unwrap(),
            Response::Using("bench".into())
        );
        assert_eq!(parse_response("WATCHING 2").unwrap(), Response::Watching(2));
    }

    #[test]
    fn test_parse_server_errors() {
        for keyword in ["OUT_OF_MEMORY", "JOB_TOO_BIG", "DRAINING", "BAD_FORMAT"] {
            assert_eq!(
                parse_response(keyword).unwrap(),
                Response::Error(keyword.to_string())
            );
        }
        assert!(matches!(
            unexpected(Response::Error("DRAINING".into())),
            QueueError::Server(k) if k == "DRAINING"
        ));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(parse_response(""), Err(QueueError::Protocol(_))));
        assert!(matches!(parse_response("INSERTED"), Err(QueueError::Protocol(_))));
        assert!(matches!(
            parse_response("RESERVED 1 lots"),
            Err(QueueError::Protocol(_))
        ));
        assert!(matches!(parse_response("HELLO 1"), Err(QueueError::Protocol(_))));
    }

    #[test]
    fn test_parse_rejects_oversized_body() {
        assert!(matches!(
            parse_response("RESERVED 1 18446744073709551615"),
            Err(QueueError::Protocol(_))
        ));
        assert!(matches!(
            parse_response(&format!("RESERVED 1 {}", MAX_BODY_LEN + 1)),
            Err(QueueError::Protocol(_))
        ));
        assert_eq!(
            parse_response(&format!("RESERVED 1 {MAX_BODY_LEN}")).unwrap(),
            Response::Reserved { id: 1, len: MAX_BODY_LEN }
        );
    }
}
