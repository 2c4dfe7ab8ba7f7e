//! The GSM modem service.
//!
//! [`Modem`] composes the pieces of this crate into the object a daemon would
//! export: a command channel to the modem, a resource lifecycle named "GSM"
//! whose hooks open and initialise that channel, and the default unsolicited
//! handlers that turn URCs into service signals.
//!
//! ```no_run
//! use modemcore::{ChannelConfig, CommandSets, EventDispatcher, Modem, SerialTransport};
//!
//! # async fn run() -> modemcore::Result<()> {
//! let modem = Modem::new(
//!     ChannelConfig::new("main"),
//!     SerialTransport::with_port("/dev/ttySAC0"),
//!     CommandSets::default(),
//!     EventDispatcher::default(),
//! );
//! modem.enable().await?;
//! println!("{:?}", modem.get_info().await?);
//! modem.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod mediator;
mod urc;

pub use mediator::{DEVICE_INFO_QUERY, DeviceInfo};

use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::channel::{ChannelConfig, ChannelHandle, CommandChannel};
use crate::error::Result;
use crate::event::{Event, EventDispatcher, Subscription};
use crate::protocol::command::Command;
use crate::resource::{
    PendingTransition, ResourceHooks, ResourceLifecycle, ResourceStatus, SignalGate,
};
use crate::sequencer::Sequencer;
use crate::transport::Transport;

/// Name of the modem resource.
pub const RESOURCE_NAME: &str = "GSM";

/// Commands sent on lifecycle transitions and modem state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSets {
    /// Sent after the channel opened.
    pub init: Vec<String>,
    /// Sent once the SIM reports `READY`.
    pub sim: Vec<String>,
    /// Sent after the antenna was powered on.
    pub antenna: Vec<String>,
    /// Sent before the system suspends.
    pub suspend: Vec<String>,
    /// Sent after the system resumed.
    pub resume: Vec<String>,
}

impl Default for CommandSets {
    fn default() -> Self {
        let set = |commands: &[&str]| -> Vec<String> {
            commands.iter().map(|&c| c.to_owned()).collect()
        };
        Self {
            init: set(&[
                "Z",              // soft reset
                "E0V1",           // echo off, verbose results
                "+CMEE=1",        // numeric error codes
                "+CRC=1",         // extended ring indication
                "+CSCS=\"8859-1\"",
                "+CSDH=1",
                "+CMGF=1",
                "+CSMS=1",
                "+CLIP=1",
                "+COLP=1",
                "+CCWA=1",
                "+CSSN=1,1",
                "+CSNS=0",
                "+CTZU=1",
                "+CTZR=1",
                "+CREG=2",        // registration with location
                "+CAOC=2",
            ]),
            // buffer SMS on the SIM, report cell broadcasts directly
            sim: set(&["+CNMI=2,1,2,1,1"]),
            antenna: Vec::new(),
            suspend: set(&["+CTZU=0", "+CTZR=0", "+CREG=0"]),
            resume: set(&["+CTZU=1", "+CTZR=1", "+CREG=2"]),
        }
    }
}

/// Tracks what the modem reported and sends the matching command sets.
#[derive(Clone)]
pub(crate) struct ModemState {
    commands: Arc<CommandSets>,
    sim_pin: Arc<Mutex<Option<String>>>,
}

impl ModemState {
    pub(crate) fn new(commands: CommandSets) -> Self {
        Self {
            commands: Arc::new(commands),
            sim_pin: Arc::new(Mutex::new(None)),
        }
    }

    /// Records a SIM PIN state; the first `READY` sends the SIM set.
    pub(crate) fn set_sim_pin_state(&self, channel: &ChannelHandle, state: &str) {
        let previous = self
            .sim_pin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(state.to_owned());
        if state == "READY" && previous.as_deref() != Some("READY") {
            tracing::info!("SIM unlocked");
            enqueue_set(channel, "sim", &self.commands.sim);
        }
    }

    pub(crate) fn antenna_on(&self, channel: &ChannelHandle) {
        tracing::info!("antenna powered on");
        enqueue_set(channel, "antenna", &self.commands.antenna);
    }

    fn reset(&self) {
        *self.sim_pin.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Enqueues a command set without waiting; failures are logged.
fn enqueue_set(channel: &ChannelHandle, name: &'static str, commands: &[String]) {
    for command in commands {
        let pending = channel.enqueue(Command::at(command.as_str()));
        tokio::spawn(async move {
            let text = pending.command().to_owned();
            if let Err(e) = pending.await {
                tracing::warn!("{} command {:?} failed: {}", name, text, e);
            }
        });
    }
}

/// Lifecycle hooks of the modem resource.
struct ModemHooks {
    channel: ChannelHandle,
    state: ModemState,
}

impl ModemHooks {
    async fn send_set(&self, name: &str, commands: &[String]) {
        let pending: Vec<_> = commands
            .iter()
            .map(|c| self.channel.enqueue(Command::at(c.as_str())))
            .collect();

        for response in pending {
            if let Err(e) = response.await {
                tracing::warn!("{} command failed: {}", name, e);
            }
        }
    }
}

impl ResourceHooks for ModemHooks {
    fn enable(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.state.reset();
            self.channel.open().await?;
            self.send_set("init", &self.state.commands.init).await;
            Ok(())
        }
        .boxed()
    }

    fn disable(&mut self) -> BoxFuture<'_, Result<()>> {
        async move { self.channel.close().await }.boxed()
    }

    fn suspend(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.send_set("suspend", &self.state.commands.suspend).await;
            Ok(())
        }
        .boxed()
    }

    fn resume(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.send_set("resume", &self.state.commands.resume).await;
            Ok(())
        }
        .boxed()
    }
}

/// A GSM modem behind one command channel.
pub struct Modem {
    channel: CommandChannel,
    resource: ResourceLifecycle,
    gate: SignalGate,
    state: ModemState,
    events: EventDispatcher,
}

impl Modem {
    /// Creates the service. Nothing is opened until [`Modem::enable`].
    pub fn new<T>(
        config: ChannelConfig,
        transport: T,
        commands: CommandSets,
        events: EventDispatcher,
    ) -> Self
    where
        T: Transport + 'static,
    {
        let gate = SignalGate::new(RESOURCE_NAME, events.clone());
        let state = ModemState::new(commands);
        let channel = CommandChannel::with_handler(config, transport, events.clone(), |handle| {
            urc::default_registry(&gate, &events, handle, &state)
        });

        let hooks = ModemHooks {
            channel: channel.handle(),
            state: state.clone(),
        };
        let resource = ResourceLifecycle::with_gate(gate.clone(), hooks);

        Self {
            channel,
            resource,
            gate,
            state,
            events,
        }
    }

    /// Returns the event dispatcher signals are published on.
    #[must_use]
    pub const fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Subscribes to all events of this modem.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Returns a handle to the command channel.
    #[must_use]
    pub fn channel(&self) -> ChannelHandle {
        self.channel.handle()
    }

    /// Returns the resource status.
    #[must_use]
    pub fn status(&self) -> ResourceStatus {
        self.resource.status()
    }

    /// Opens the channel and sends the init command set.
    pub fn enable(&self) -> PendingTransition {
        self.resource.enable()
    }

    /// Closes the channel.
    pub fn disable(&self) -> PendingTransition {
        self.resource.disable()
    }

    /// Sends the suspend set, which silences location and time reports.
    pub fn suspend(&self) -> PendingTransition {
        self.resource.suspend()
    }

    pub fn resume(&self) -> PendingTransition {
        self.resource.resume()
    }

    /// Queries revision, model, manufacturer and IMEI in one exchange.
    pub async fn get_info(&self) -> Result<DeviceInfo> {
        self.gate.check_enabled()?;
        let response = self.channel().send(Command::at(DEVICE_INFO_QUERY)).await?;
        DeviceInfo::parse(&response)
    }

    /// Returns true if the antenna is powered.
    pub async fn get_antenna_power(&self) -> Result<bool> {
        self.gate.check_enabled()?;
        let command = Command::at("+CFUN?").valid_prefixes(["+CFUN"]);
        let response = self.channel().send(command).await?;
        mediator::parse_antenna_power(&response)
    }

    /// Powers the antenna on or off. Nothing is written if it already is.
    ///
    /// Switching it on sends the antenna command set.
    pub async fn set_antenna_power(&self, power: bool) -> Result<()> {
        self.gate.check_enabled()?;
        let channel = self.channel();
        let switched = Sequencer::new(mediator::SetAntennaPower::new(power))
            .run(&channel)
            .await?;
        if power && switched {
            self.state.antenna_on(&channel);
        }
        Ok(())
    }

    /// Returns the SIM authentication status, e.g. `READY` or `SIM PIN`.
    pub async fn get_auth_status(&self) -> Result<String> {
        self.gate.check_enabled()?;
        let command = Command::at("+CPIN?").valid_prefixes(["+CPIN"]);
        let channel = self.channel();
        let response = channel.send(command).await?;
        let status = mediator::parse_auth_status(&response)?;
        self.state.set_sim_pin_state(&channel, &status);
        Ok(status)
    }

    /// Sends a PIN and publishes the resulting `AuthStatus` signal.
    pub async fn send_auth_code(&self, code: &str) -> Result<()> {
        self.gate.check_enabled()?;
        let channel = self.channel();
        let status = Sequencer::new(mediator::SendAuthCode::new(code))
            .run(&channel)
            .await?;
        if let Some(status) = status {
            self.state.set_sim_pin_state(&channel, &status);
            self.gate.emit_queued(Event::signal("AuthStatus", [status]));
        }
        Ok(())
    }

    /// Cancels the command in flight, e.g. a dial attempt.
    ///
    /// Returns false if nothing was in flight.
    pub async fn cancel_command(&self) -> Result<bool> {
        self.gate.check_enabled()?;
        self.channel().cancel_current().await
    }

    /// Disables the modem (best effort) and stops all tasks.
    pub async fn shutdown(self) {
        self.resource.shutdown().await;
        self.channel.shutdown().await;
    }
}
