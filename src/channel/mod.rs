//! Command channel: serialized AT command execution over one line.
//!
//! A [`CommandChannel`] is a background task that owns the byte stream, the
//! [`LineParser`], the FIFO command queue and the deadline of the command in
//! flight. Callers talk to it through a [`ChannelHandle`]; every request is a
//! message, so the task is the single writer of all channel state.
//!
//! Only one command is ever in flight. The next one is written when the
//! previous one completed, timed out, or was cancelled. Unsolicited groups
//! go to the registered [`UnsolicitedHandler`] regardless of queue state.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::protocol::command::{CTRL_Z, Command, Response};
use crate::protocol::parser::{LineParser, Parsed, ParserConfig};
use crate::transport::{ByteStream, Transport};
use crate::unsolicited::UnsolicitedHandler;

/// Default timeout for commands without a built-in or explicit one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Handshake attempts before the line is reopened.
pub const DEFAULT_HANDSHAKE_ATTEMPTS: u32 = 5;

/// Handshake attempts before opening fails.
pub const DEFAULT_MAX_HANDSHAKE_ATTEMPTS: u32 = 10;

/// How long to wait for an answer to the wake sequence.
pub const DEFAULT_HANDSHAKE_WAIT: Duration = Duration::from_millis(500);

/// Written to wake the modem during the handshake.
pub const DEFAULT_WAKE_SEQUENCE: &[u8] = b"\x1a\r\n";

/// Pause between a hang-up and the attempt to reopen the line.
pub const DEFAULT_REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Configuration for a command channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Channel name used in logs and events.
    pub name: String,
    /// Timeout for commands that have neither a built-in nor an explicit one.
    pub default_timeout: Duration,
    /// Failed handshake attempts after which the line is reopened.
    pub handshake_attempts: u32,
    /// Failed handshake attempts after which opening fails.
    pub max_handshake_attempts: u32,
    /// Time to wait for an answer to each wake sequence.
    pub handshake_wait: Duration,
    /// Pause before reopening a line that hung up.
    pub reopen_delay: Duration,
    /// Bytes written to wake the modem.
    pub wake_sequence: Bytes,
    /// Bytes written to abort a command that timed out or was cancelled.
    pub abort_sequence: Option<Bytes>,
    /// Parser settings for this line.
    pub parser: ParserConfig,
}

impl ChannelConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_timeout: DEFAULT_TIMEOUT,
            handshake_attempts: DEFAULT_HANDSHAKE_ATTEMPTS,
            max_handshake_attempts: DEFAULT_MAX_HANDSHAKE_ATTEMPTS,
            handshake_wait: DEFAULT_HANDSHAKE_WAIT,
            reopen_delay: DEFAULT_REOPEN_DELAY,
            wake_sequence: Bytes::from_static(DEFAULT_WAKE_SEQUENCE),
            abort_sequence: Some(Bytes::from_static(&[CTRL_Z])),
            parser: ParserConfig::default(),
        }
    }

    /// Sets the default command timeout.
    #[must_use]
    pub const fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the handshake attempt limits.
    #[must_use]
    pub const fn handshake_attempts(mut self, reopen_after: u32, give_up_after: u32) -> Self {
        self.handshake_attempts = reopen_after;
        self.max_handshake_attempts = give_up_after;
        self
    }

    /// Sets the per-attempt handshake wait.
    #[must_use]
    pub const fn handshake_wait(mut self, wait: Duration) -> Self {
        self.handshake_wait = wait;
        self
    }

    /// Sets the pause before reopening a line that hung up.
    #[must_use]
    pub const fn reopen_delay(mut self, delay: Duration) -> Self {
        self.reopen_delay = delay;
        self
    }

    /// Sets the wake sequence.
    #[must_use]
    pub fn wake_sequence(mut self, sequence: impl Into<Bytes>) -> Self {
        self.wake_sequence = sequence.into();
        self
    }

    /// Sets the abort sequence; `None` writes nothing on timeout or cancel.
    #[must_use]
    pub fn abort_sequence(mut self, sequence: Option<Bytes>) -> Self {
        self.abort_sequence = sequence;
        self
    }

    /// Sets the parser configuration.
    #[must_use]
    pub fn parser(mut self, parser: ParserConfig) -> Self {
        self.parser = parser;
        self
    }
}

/// Snapshot of a channel's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    /// The line is open.
    pub is_open: bool,
    /// Commands not yet completed, including the one in flight.
    pub pending_commands: usize,
    /// A command was written and waits for its response.
    pub waiting_for_response: bool,
}

type Responder = oneshot::Sender<Result<Response>>;

struct Queued {
    command: Command,
    responder: Option<Responder>,
}

struct InFlight {
    queued: Queued,
    deadline: Instant,
    timeout: Duration,
}

enum Request {
    Enqueue(Queued),
    Open(oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<()>),
    CancelCurrent(oneshot::Sender<bool>),
    Status(oneshot::Sender<ChannelStatus>),
}

/// The response to an enqueued command.
///
/// Resolves to the response, or to the error the command ended with.
/// Dropping it does not withdraw the command; it is still sent and its
/// response discarded.
#[must_use = "the response is discarded unless awaited"]
pub struct PendingResponse {
    command: String,
    rx: oneshot::Receiver<Result<Response>>,
}

impl PendingResponse {
    /// Returns the text of the command this response belongs to.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Future for PendingResponse {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // a dropped responder means the command was cancelled
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(Error::Cancelled)))
    }
}

/// Cheap, cloneable access to a running [`CommandChannel`].
#[derive(Clone)]
pub struct ChannelHandle {
    name: String,
    tx: mpsc::UnboundedSender<Request>,
}

impl ChannelHandle {
    /// Returns the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a command to the queue.
    ///
    /// If the channel is open and idle the command is written right away.
    /// After a hang-up the line could not recover from, it fails with
    /// [`Error::NotConnected`] until the channel is opened again.
    pub fn enqueue(&self, command: Command) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let text = command.text().to_owned();
        let request = Request::Enqueue(Queued {
            command,
            responder: Some(tx),
        });

        if let Err(mpsc::error::SendError(Request::Enqueue(Queued {
            responder: Some(tx),
            ..
        }))) = self.tx.send(request)
        {
            let _ = tx.send(Err(Error::ChannelClosed));
        }

        PendingResponse { command: text, rx }
    }

    /// Enqueues a command and waits for its response.
    pub async fn send(&self, command: Command) -> Result<Response> {
        self.enqueue(command).await
    }

    /// Opens the line and performs the handshake. Opening an open channel
    /// succeeds immediately.
    pub async fn open(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::Open(tx))?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Closes the line. The command in flight fails with
    /// [`Error::ChannelClosed`]; queued commands are kept for the next open.
    pub async fn close(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::Close(tx))?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Drops the command in flight without completing it.
    ///
    /// Returns false if nothing was in flight.
    pub async fn cancel_current(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::CancelCurrent(tx))?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Returns a snapshot of the queue.
    pub async fn status(&self) -> Result<ChannelStatus> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::Status(tx))?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Returns the number of commands not yet completed.
    pub async fn pending_commands(&self) -> Result<usize> {
        Ok(self.status().await?.pending_commands)
    }

    /// Returns true while a command waits for its response.
    pub async fn is_waiting_for_response(&self) -> Result<bool> {
        Ok(self.status().await?.waiting_for_response)
    }

    /// Returns true if the line is open.
    pub async fn is_open(&self) -> Result<bool> {
        Ok(self.status().await?.is_open)
    }

    fn request(&self, request: Request) -> Result<()> {
        self.tx.send(request).map_err(|_| Error::ChannelClosed)
    }
}

/// A command channel and its background task.
///
/// The task stops when this value is dropped.
pub struct CommandChannel {
    handle: ChannelHandle,
    task: Option<JoinHandle<()>>,
}

impl CommandChannel {
    /// Spawns the channel task. The line stays closed until
    /// [`ChannelHandle::open`] is called.
    pub fn new<T, H>(config: ChannelConfig, transport: T, handler: H, events: EventDispatcher) -> Self
    where
        T: Transport + 'static,
        H: UnsolicitedHandler + 'static,
    {
        Self::with_handler(config, transport, events, |_| handler)
    }

    /// Like [`CommandChannel::new`], for handlers that enqueue commands on
    /// the channel they are registered with.
    pub fn with_handler<T, H, F>(
        config: ChannelConfig,
        transport: T,
        events: EventDispatcher,
        make_handler: F,
    ) -> Self
    where
        T: Transport + 'static,
        H: UnsolicitedHandler + 'static,
        F: FnOnce(&ChannelHandle) -> H,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ChannelHandle {
            name: config.name.clone(),
            tx,
        };
        let handler = make_handler(&handle);

        let task = ChannelTask {
            parser: LineParser::new(config.parser.clone()),
            config,
            transport: Box::new(transport),
            handler: Box::new(handler),
            events,
            queue: VecDeque::new(),
            in_flight: None,
            reader: None,
            writer: None,
            lost: false,
        };
        let task = tokio::spawn(task.run(rx));

        Self {
            handle,
            task: Some(task),
        }
    }

    /// Returns a handle to this channel.
    #[must_use]
    pub fn handle(&self) -> ChannelHandle {
        self.handle.clone()
    }

    /// Closes the line and waits for the task to stop.
    pub async fn shutdown(mut self) {
        let _ = self.handle.close().await;
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct ChannelTask {
    config: ChannelConfig,
    transport: Box<dyn Transport>,
    handler: Box<dyn UnsolicitedHandler>,
    events: EventDispatcher,
    parser: LineParser,
    queue: VecDeque<Queued>,
    in_flight: Option<InFlight>,
    reader: Option<ReadHalf<Box<dyn ByteStream>>>,
    writer: Option<WriteHalf<Box<dyn ByteStream>>>,
    /// The line hung up and could not be reopened.
    lost: bool,
}

impl ChannelTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Request>) {
        let mut buf = vec![0u8; 1024];

        loop {
            let deadline = self.in_flight.as_ref().map(|f| f.deadline);

            tokio::select! {
                request = rx.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
                read = read_some(self.reader.as_mut(), &mut buf) => match read {
                    Ok(0) => {
                        tracing::warn!("{}: line hung up", self.config.name);
                        self.hang_up().await;
                    }
                    Ok(n) => self.received(&buf[..n]).await,
                    Err(e) => {
                        tracing::error!("{}: read error: {}", self.config.name, e);
                        self.hang_up().await;
                    }
                },
                () = sleep_until(deadline) => self.expire().await,
            }
        }

        tracing::debug!("{}: all handles dropped, stopping", self.config.name);
        self.close().await;
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Enqueue(queued) => {
                let Queued { command, responder } = queued;
                if self.lost {
                    tracing::debug!("{}: line lost, rejecting {:?}", self.config.name, command.text());
                    if let Some(responder) = responder {
                        let _ = responder.send(Err(Error::NotConnected));
                    }
                    return;
                }
                let (head, body) = command.into_parts();
                if let Some(head) = head {
                    self.queue.push_back(Queued {
                        command: head,
                        responder: None,
                    });
                }
                self.queue.push_back(Queued {
                    command: body,
                    responder,
                });
                self.send_next().await;
            }
            Request::Open(reply) => {
                let result = self.open().await;
                let _ = reply.send(result);
            }
            Request::Close(reply) => {
                self.close().await;
                self.lost = false;
                let _ = reply.send(());
            }
            Request::CancelCurrent(reply) => {
                let cancelled = self.cancel_current().await;
                let _ = reply.send(cancelled);
            }
            Request::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn status(&self) -> ChannelStatus {
        ChannelStatus {
            is_open: self.writer.is_some(),
            pending_commands: self.queue.len() + usize::from(self.in_flight.is_some()),
            waiting_for_response: self.in_flight.is_some(),
        }
    }

    async fn open(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }

        let stream = handshake(self.transport.as_mut(), &self.config).await?;
        let (reader, writer) = tokio::io::split(stream);
        self.reader = Some(reader);
        self.writer = Some(writer);
        self.parser.reset();
        self.lost = false;

        tracing::info!(
            "{}: channel open on {}",
            self.config.name,
            self.transport.name()
        );
        self.events.dispatch(Event::ChannelOpened {
            channel: self.config.name.clone(),
        });

        self.send_next().await;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            tracing::debug!(
                "{}: closing with {:?} in flight",
                self.config.name,
                in_flight.queued.command.text()
            );
            if let Some(responder) = in_flight.queued.responder {
                let _ = responder.send(Err(Error::ChannelClosed));
            }
        }
        self.parser.reset();

        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
            tracing::info!("{}: channel closed", self.config.name);
            self.events.dispatch(Event::ChannelClosed {
                channel: self.config.name.clone(),
            });
        }
    }

    /// Closes the line after the device went away and tries to reopen it.
    /// If that fails, queued commands fail with [`Error::NotConnected`], as do
    /// new ones until the channel is opened again.
    async fn hang_up(&mut self) {
        self.close().await;
        tokio::time::sleep(self.config.reopen_delay).await;

        match self.open().await {
            Ok(()) => tracing::info!("{}: recovered from hang-up", self.config.name),
            Err(e) => {
                tracing::error!("{}: reopen after hang-up failed: {}", self.config.name, e);
                self.lost = true;
                for queued in self.queue.drain(..) {
                    if let Some(responder) = queued.responder {
                        let _ = responder.send(Err(Error::NotConnected));
                    }
                }
            }
        }
    }

    async fn cancel_current(&mut self) -> bool {
        let Some(in_flight) = self.in_flight.take() else {
            return false;
        };

        tracing::info!(
            "{}: cancelling {:?}",
            self.config.name,
            in_flight.queued.command.text()
        );
        // the responder is dropped unanswered
        drop(in_flight);
        self.abort().await;
        self.send_next().await;
        true
    }

    async fn expire(&mut self) {
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };

        let command = in_flight.queued.command.text().to_owned();
        tracing::warn!(
            "{}: {:?} timed out after {:?}",
            self.config.name,
            command,
            in_flight.timeout
        );
        self.abort().await;

        if let Some(responder) = in_flight.queued.responder {
            let _ = responder.send(Err(Error::Timeout {
                command,
                timeout_ms: u64::try_from(in_flight.timeout.as_millis()).unwrap_or(u64::MAX),
            }));
        }
        self.send_next().await;
    }

    /// Writes the abort sequence so a late reply is not taken for the next
    /// command's response, and forgets any partial input.
    async fn abort(&mut self) {
        if let Some(sequence) = self.config.abort_sequence.clone() {
            if let Err(e) = self.write(&sequence).await {
                tracing::warn!("{}: failed to write abort sequence: {}", self.config.name, e);
            }
        }
        self.parser.reset();
    }

    async fn received(&mut self, data: &[u8]) {
        tracing::trace!("{}: received {:?}", self.config.name, Bytes::copy_from_slice(data));

        let prefixes = self.in_flight.as_ref().map(|f| f.queued.command.prefixes());
        let parsed = self.parser.feed(data, prefixes);

        for group in parsed {
            match group {
                Parsed::Response(response) => self.complete(response),
                Parsed::Unsolicited(urc) => {
                    tracing::debug!("{}: unsolicited {:?}", self.config.name, urc.lines());
                    self.handler.handle_unsolicited(urc);
                }
            }
        }

        self.send_next().await;
    }

    fn complete(&mut self, response: Response) {
        let Some(in_flight) = self.in_flight.take() else {
            tracing::warn!("{}: response {:?} with nothing in flight", self.config.name, response);
            return;
        };

        let command = in_flight.queued.command.text();
        tracing::debug!(
            "{}: completed {:?} => {:?}",
            self.config.name,
            command,
            response.lines()
        );
        if let Some(responder) = in_flight.queued.responder {
            let _ = responder.send(response.into_result(command));
        }
    }

    async fn send_next(&mut self) {
        while self.in_flight.is_none() && self.writer.is_some() {
            let Some(queued) = self.queue.pop_front() else {
                return;
            };

            tracing::debug!("{}: sending {:?}", self.config.name, queued.command.text());
            let payload = queued.command.payload().clone();
            if let Err(e) = self.write(&payload).await {
                tracing::error!("{}: write failed: {}", self.config.name, e);
                if let Some(responder) = queued.responder {
                    let _ = responder.send(Err(e));
                }
                self.close().await;
                return;
            }

            let timeout = queued
                .command
                .timeout_override()
                .unwrap_or(self.config.default_timeout);
            self.in_flight = Some(InFlight {
                queued,
                deadline: Instant::now() + timeout,
                timeout,
            });
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }
}

async fn read_some(
    reader: Option<&mut ReadHalf<Box<dyn ByteStream>>>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Wakes the modem until it answers, reopening the line once on the way.
async fn handshake(
    transport: &mut dyn Transport,
    config: &ChannelConfig,
) -> Result<Box<dyn ByteStream>> {
    let mut stream = transport.open().await?;

    for attempt in 1..=config.max_handshake_attempts {
        tracing::debug!("{}: handshake attempt #{}", config.name, attempt);
        stream.write_all(&config.wake_sequence).await?;
        stream.flush().await?;

        if wait_for_answer(&mut stream, config.handshake_wait).await? {
            return Ok(stream);
        }

        tracing::debug!("{}: modem not responding", config.name);
        if attempt == config.handshake_attempts {
            tracing::info!("{}: reopening {}", config.name, transport.name());
            drop(stream);
            stream = transport.open().await?;
        }
    }

    tracing::error!(
        "{}: no answer after {} handshake attempts",
        config.name,
        config.max_handshake_attempts
    );
    Err(Error::OpenFailed {
        channel: config.name.clone(),
        attempts: config.max_handshake_attempts,
    })
}

async fn wait_for_answer(stream: &mut Box<dyn ByteStream>, wait: Duration) -> Result<bool> {
    let deadline = Instant::now() + wait;
    let mut seen = Vec::new();
    let mut buf = [0u8; 256];

    loop {
        match tokio::time::timeout_at(deadline, stream.read(&mut buf)).await {
            Err(_) | Ok(Ok(0)) => return Ok(false),
            Ok(Ok(n)) => {
                seen.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&seen);
                if text.contains("OK") || text.contains("AT") {
                    tracing::trace!("handshake answer {:?}", text);
                    return Ok(true);
                }
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}
